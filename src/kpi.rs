// src/kpi.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use time::{Date, Weekday};

use crate::dates::{self, DateRange, iso};

/// Percent of gross income paid to the courier.
pub const COURIER_SHARE_PCT: u64 = 70;
/// Percent of gross income owed to the platform before maintenance.
pub const PLATFORM_SHARE_PCT: u64 = 30;
/// Weekly maintenance charge for couriers active most of the week.
pub const MAINTENANCE_FEE: u64 = 250;
pub const MAINTENANCE_MIN_ACTIVE_DAYS: usize = 6;
pub const TOP_ESTABLISHMENTS: usize = 10;

/// Anything with a delivery date and a fee can be aggregated.
pub trait Shipment {
    fn date(&self) -> Option<Date>;
    fn shipping_fee(&self) -> u64;
}

/// Share of `amount` in percent, rounded once.
fn share(amount: u64, pct: u64) -> f64 {
    amount.saturating_mul(pct) as f64 / 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(total: u64, count: usize) -> f64 {
    if count == 0 { 0.0 } else { total as f64 / count as f64 }
}

fn fee_sum<R: Shipment>(records: &[R]) -> u64 {
    records
        .iter()
        .map(Shipment::shipping_fee)
        .fold(0, u64::saturating_add)
}

fn active_days<'a, R: Shipment + 'a>(records: impl IntoIterator<Item = &'a R>) -> usize {
    records
        .into_iter()
        .filter_map(Shipment::date)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Keep records dated inside `range`; undated records never match.
pub fn filter_by_range<R: Shipment + Clone>(records: &[R], range: &DateRange) -> Vec<R> {
    records
        .iter()
        .filter(|r| range.contains(r.date()))
        .cloned()
        .collect()
}

/// Headline numbers for one courier over an already filtered record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub shipment_count: usize,
    pub gross_income: u64,
    pub courier_payout: f64,
    pub active_days: usize,
    pub maintenance_fee: u64,
    pub platform_due: f64,
    pub extra_income: u64,
}

pub fn aggregate<R: Shipment>(records: &[R], extra_income: u64) -> KpiSnapshot {
    let gross_income = fee_sum(records).saturating_add(extra_income);
    let active_days = active_days(records);
    let maintenance_fee = if active_days >= MAINTENANCE_MIN_ACTIVE_DAYS {
        MAINTENANCE_FEE
    } else {
        0
    };
    KpiSnapshot {
        shipment_count: records.len(),
        gross_income,
        courier_payout: share(gross_income, COURIER_SHARE_PCT),
        active_days,
        maintenance_fee,
        platform_due: share(gross_income, PLATFORM_SHARE_PCT) - maintenance_fee as f64,
        extra_income,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeekendKpis {
    pub shipment_count: usize,
    pub gross_income: u64,
}

/// Saturday and Sunday deliveries; extra income is not included.
pub fn weekend<R: Shipment>(records: &[R]) -> WeekendKpis {
    records
        .iter()
        .filter(|r| r.date().is_some_and(dates::is_weekend))
        .fold(WeekendKpis::default(), |mut acc, r| {
            acc.shipment_count += 1;
            acc.gross_income = acc.gross_income.saturating_add(r.shipping_fee());
            acc
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekdayRow {
    pub day: &'static str,
    pub orders: usize,
    pub income: u64,
}

/// Orders and income per weekday, Monday first. Days without orders are omitted.
pub fn weekday_breakdown<R: Shipment>(records: &[R]) -> Vec<WeekdayRow> {
    let mut buckets = [(0usize, 0u64); 7];
    for record in records {
        if let Some(date) = record.date() {
            let slot = &mut buckets[date.weekday().number_days_from_monday() as usize];
            slot.0 += 1;
            slot.1 = slot.1.saturating_add(record.shipping_fee());
        }
    }
    (0u8..)
        .zip(buckets)
        .filter(|(_, (orders, _))| *orders > 0)
        .map(|(offset, (orders, income))| WeekdayRow {
            day: dates::weekday_label(Weekday::Monday.nth_next(offset)),
            orders,
            income,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Multi-courier aggregates over the cumulative dataset
// ---------------------------------------------------------------------------

/// A shipment attributed to a courier and a pickup place.
pub trait CourierShipment: Shipment {
    fn courier(&self) -> &str;
    fn establishment(&self) -> &str;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalTotals {
    pub shipment_count: usize,
    pub gross_income: u64,
    pub mean_per_shipment: f64,
    pub active_days: usize,
}

pub fn global_totals<R: Shipment>(records: &[R]) -> GlobalTotals {
    let gross_income = fee_sum(records);
    GlobalTotals {
        shipment_count: records.len(),
        gross_income,
        mean_per_shipment: round2(mean(gross_income, records.len())),
        active_days: active_days(records),
    }
}

/// Per-courier performance row, as exported to `analisis_repartidores_*.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourierStats {
    #[serde(rename = "repartidor")]
    pub courier: String,
    #[serde(rename = "envios")]
    pub shipments: usize,
    #[serde(rename = "ingresos_total")]
    pub income_total: u64,
    #[serde(rename = "promedio_envio")]
    pub mean_per_shipment: f64,
    #[serde(rename = "dias_activos")]
    pub active_days: usize,
    #[serde(rename = "pago_repartidor_70")]
    pub payout: f64,
    #[serde(rename = "promedio_diario")]
    pub mean_per_active_day: f64,
}

fn group_by<'a, R, K>(records: &'a [R], key: K) -> BTreeMap<&'a str, Vec<&'a R>>
where
    K: Fn(&'a R) -> &'a str,
{
    let mut groups: BTreeMap<&str, Vec<&R>> = BTreeMap::new();
    for record in records {
        groups.entry(key(record)).or_default().push(record);
    }
    groups
}

/// Couriers ranked by total income, highest first; ties keep name order.
pub fn courier_stats<R: CourierShipment>(records: &[R]) -> Vec<CourierStats> {
    let mut stats: Vec<CourierStats> = group_by(records, |r| r.courier())
        .into_iter()
        .map(|(courier, rows)| {
            let income_total = rows
                .iter()
                .map(|r| r.shipping_fee())
                .fold(0, u64::saturating_add);
            let active_days = active_days(rows.iter().copied());
            CourierStats {
                courier: courier.to_string(),
                shipments: rows.len(),
                income_total,
                mean_per_shipment: round2(mean(income_total, rows.len())),
                active_days,
                payout: round2(share(income_total, COURIER_SHARE_PCT)),
                mean_per_active_day: round2(mean(income_total, active_days)),
            }
        })
        .collect();
    stats.sort_by(|a, b| b.income_total.cmp(&a.income_total));
    stats
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EstablishmentRank {
    pub establishment: String,
    pub shipments: usize,
    pub income_total: u64,
}

/// The `limit` busiest pickup places by shipment count; ties keep name order.
pub fn top_establishments<R: CourierShipment>(
    records: &[R],
    limit: usize,
) -> Vec<EstablishmentRank> {
    let mut ranks: Vec<EstablishmentRank> = group_by(records, |r| r.establishment())
        .into_iter()
        .map(|(establishment, rows)| EstablishmentRank {
            establishment: establishment.to_string(),
            shipments: rows.len(),
            income_total: rows
                .iter()
                .map(|r| r.shipping_fee())
                .fold(0, u64::saturating_add),
        })
        .collect();
    ranks.sort_by(|a, b| b.shipments.cmp(&a.shipments));
    ranks.truncate(limit);
    ranks
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyPoint {
    #[serde(serialize_with = "iso::serialize")]
    pub date: Date,
    pub shipments: usize,
    pub income: u64,
}

/// Shipments and income per calendar day, oldest first.
pub fn daily_trend<R: Shipment>(records: &[R]) -> Vec<DailyPoint> {
    let mut days: BTreeMap<Date, (usize, u64)> = BTreeMap::new();
    for record in records {
        if let Some(date) = record.date() {
            let day = days.entry(date).or_default();
            day.0 += 1;
            day.1 = day.1.saturating_add(record.shipping_fee());
        }
    }
    days.into_iter()
        .map(|(date, (shipments, income))| DailyPoint { date, shipments, income })
        .collect()
}
