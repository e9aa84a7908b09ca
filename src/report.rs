// src/report.rs

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use serde::Serialize;
use time::Date;
use time::macros::format_description;
use tracing::info;

use crate::dataset::{self, DatasetRow};
use crate::dates::{DateRange, iso};
use crate::errors::AnalysisError;
use crate::kpi::{
    CourierStats, DailyPoint, EstablishmentRank, GlobalTotals, KpiSnapshot, WeekdayRow,
    WeekendKpis,
};
use crate::order_extract::OrderRecord;

pub const COURIER_STATS_COLUMNS: [&str; 7] = [
    "repartidor",
    "envios",
    "ingresos_total",
    "promedio_envio",
    "dias_activos",
    "pago_repartidor_70",
    "promedio_diario",
];

/// State of the cumulative dataset after an append.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub appended: usize,
    pub total_rows: usize,
    pub saved: bool,
    #[serde(serialize_with = "iso::serialize_opt")]
    pub first_date: Option<Date>,
    #[serde(serialize_with = "iso::serialize_opt")]
    pub last_date: Option<Date>,
}

/// Everything produced by one courier analysis.
#[derive(Debug, Default, Serialize)]
pub struct CourierReport {
    pub courier: String,
    pub range: Option<DateRange>,
    pub kpis: KpiSnapshot,
    pub weekend: WeekendKpis,
    pub weekdays: Vec<WeekdayRow>,
    /// Display dates (`DD/MM/YYYY`) of counted extra-income messages.
    pub extra_income_dates: Vec<String>,
    pub filtered_products: Vec<String>,
    pub normalized_establishments: BTreeMap<String, BTreeSet<String>>,
    pub dataset: Option<DatasetInfo>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    /// Records inside the range; exported separately as CSV.
    #[serde(skip)]
    pub records: Vec<OrderRecord>,
}

impl CourierReport {
    /// Report published when the run could not aggregate anything.
    pub fn empty(courier: &str, error: &AnalysisError) -> Self {
        Self {
            courier: courier.to_string(),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Multi-courier view over the cumulative dataset.
#[derive(Debug, Default, Serialize)]
pub struct GlobalReport {
    pub range: Option<DateRange>,
    pub couriers_filter: Vec<String>,
    pub totals: GlobalTotals,
    pub couriers: Vec<CourierStats>,
    pub top_establishments: Vec<EstablishmentRank>,
    pub daily_trend: Vec<DailyPoint>,
    pub error: Option<String>,
    #[serde(skip)]
    pub rows: Vec<DatasetRow>,
}

impl GlobalReport {
    pub fn empty(error: &AnalysisError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Destination for finished reports.
pub trait ReportSink {
    fn publish_courier(&mut self, report: &CourierReport) -> Result<(), AnalysisError>;
    fn publish_global(&mut self, report: &GlobalReport) -> Result<(), AnalysisError>;
}

/// Writes each report as pretty-printed JSON followed by a newline.
pub struct JsonSink<W: Write> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn emit<T: Serialize>(&mut self, report: &T) -> Result<(), AnalysisError> {
        serde_json::to_writer_pretty(&mut self.out, report)?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn publish_courier(&mut self, report: &CourierReport) -> Result<(), AnalysisError> {
        info!(courier = %report.courier, shipments = report.kpis.shipment_count, "Publishing courier report");
        self.emit(report)
    }

    fn publish_global(&mut self, report: &GlobalReport) -> Result<(), AnalysisError> {
        info!(couriers = report.couriers.len(), shipments = report.totals.shipment_count, "Publishing global report");
        self.emit(report)
    }
}

fn compact(date: Date) -> String {
    date.format(format_description!("[year][month][day]"))
        .unwrap_or_else(|_| date.to_string())
}

fn range_suffix(range: Option<&DateRange>) -> String {
    match range {
        Some(r) => format!("{}_{}", compact(r.start), compact(r.end)),
        None => "sin_rango".to_string(),
    }
}

/// `(file name, CSV body)` pairs for a courier run.
pub fn courier_exports(report: &CourierReport) -> Result<Vec<(String, String)>, AnalysisError> {
    Ok(vec![(
        format!("{}_clean.csv", report.courier),
        dataset::encode_records(&report.records)?,
    )])
}

/// `(file name, CSV body)` pairs for a global run.
pub fn global_exports(report: &GlobalReport) -> Result<Vec<(String, String)>, AnalysisError> {
    let suffix = range_suffix(report.range.as_ref());
    Ok(vec![
        (
            format!("analisis_repartidores_{suffix}.csv"),
            dataset::encode_csv(&report.couriers, &COURIER_STATS_COLUMNS)?,
        ),
        (
            format!("datos_filtrados_{suffix}.csv"),
            dataset::encode_dataset(&report.rows)?,
        ),
    ])
}
