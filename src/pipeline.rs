// src/pipeline.rs

use time::Date;
use tracing::{error, info, warn};

use crate::dataset::{self, DatasetRow};
use crate::dates::{self, DateRange};
use crate::errors::AnalysisError;
use crate::extra_income::extra_income;
use crate::heuristics::AliasTable;
use crate::kpi::{self, CourierShipment, Shipment};
use crate::order_extract::{OrderRecord, extract_with};
use crate::report::{CourierReport, DatasetInfo, GlobalReport};
use crate::store::{Storage, dataset_key};

/// Courier name derived from an export's file name (`ana.txt` → `ana`).
pub fn courier_from_file(display_name: &str) -> String {
    display_name
        .strip_suffix(".txt")
        .unwrap_or(display_name)
        .to_string()
}

/// Combine explicit bounds with a default window. A missing bound is taken
/// from the default; an inverted result is an error.
pub fn resolve_range(
    start: Option<Date>,
    end: Option<Date>,
    default: DateRange,
) -> Result<DateRange, AnalysisError> {
    DateRange::new(start.unwrap_or(default.start), end.unwrap_or(default.end))
}

#[derive(Debug, Clone, Default)]
pub struct CourierRequest {
    pub handle: String,
    pub courier: String,
    pub start: Option<Date>,
    pub end: Option<Date>,
    /// Append the filtered records to the cumulative dataset.
    pub append: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalRequest {
    pub start: Option<Date>,
    pub end: Option<Date>,
    /// Couriers to keep; empty keeps everyone.
    pub couriers: Vec<String>,
}

/// Runs analyses against one storage backend.
pub struct Pipeline<'a> {
    store: &'a dyn Storage,
    aliases: &'a AliasTable,
    dataset_name: &'a str,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn Storage, aliases: &'a AliasTable, dataset_name: &'a str) -> Self {
        Self {
            store,
            aliases,
            dataset_name,
        }
    }

    /// Analyze one courier's chat export over a date window.
    pub fn run_courier(
        &self,
        request: &CourierRequest,
        today: Date,
    ) -> Result<CourierReport, AnalysisError> {
        let text = self
            .store
            .read(&request.handle)
            .ok_or_else(|| AnalysisError::MissingExport(request.handle.clone()))?;

        let extraction = extract_with(&text, self.aliases);
        let default = DateRange::courier_default(
            extraction.records.iter().filter_map(Shipment::date),
            today,
        );
        let range = resolve_range(request.start, request.end, default)?;
        info!(
            courier = %request.courier,
            start = %dates::display(range.start),
            end = %dates::display(range.end),
            "Analyzing courier"
        );

        let filtered = kpi::filter_by_range(&extraction.records, &range);
        let extra = extra_income(&text, &range);

        let mut report = CourierReport {
            courier: request.courier.clone(),
            range: Some(range),
            kpis: kpi::aggregate(&filtered, extra.total),
            weekend: kpi::weekend(&filtered),
            weekdays: kpi::weekday_breakdown(&filtered),
            extra_income_dates: extra.dates.iter().copied().map(dates::display).collect(),
            filtered_products: extraction.filtered_products,
            normalized_establishments: extraction.normalized_establishments,
            ..CourierReport::default()
        };

        if request.append && !filtered.is_empty() {
            self.append(&filtered, &mut report);
        }
        report.records = filtered;
        Ok(report)
    }

    fn append(&self, filtered: &[OrderRecord], report: &mut CourierReport) {
        if !self.store.ping() {
            warn!(courier = %report.courier, "Storage offline; dataset not updated");
            report
                .warnings
                .push("storage offline; cumulative dataset not updated".to_string());
            return;
        }

        let tagged = dataset::tag_records(filtered, &report.courier);
        let appended = tagged.len();
        let merged = dataset::merge(self.store.read_table(self.dataset_name), tagged);
        let saved = self.store.write_table(&merged, self.dataset_name);
        if !saved {
            let err = AnalysisError::StorageWrite(dataset_key(self.dataset_name));
            error!(error = %err, "Dataset append failed");
            report.warnings.push(err.to_string());
        }

        let span = dataset::date_span(&merged);
        info!(appended, total = merged.len(), saved, "Cumulative dataset updated");
        report.dataset = Some(DatasetInfo {
            appended,
            total_rows: merged.len(),
            saved,
            first_date: span.map(|(first, _)| first),
            last_date: span.map(|(_, last)| last),
        });
    }

    /// Multi-courier analysis over the cumulative dataset.
    pub fn run_global(
        &self,
        request: &GlobalRequest,
        today: Date,
    ) -> Result<GlobalReport, AnalysisError> {
        let rows = self.store.read_table(self.dataset_name).unwrap_or_default();
        self.run_global_rows(rows, request, today)
    }

    /// Multi-courier analysis over rows supplied by the caller, e.g. a local
    /// CSV file when storage is offline.
    pub fn run_global_rows(
        &self,
        rows: Vec<DatasetRow>,
        request: &GlobalRequest,
        today: Date,
    ) -> Result<GlobalReport, AnalysisError> {
        let rows = dataset::clean_for_global(rows, self.aliases);

        let default = DateRange::global_default(rows.iter().filter_map(|r| r.date), today);
        let range = resolve_range(request.start, request.end, default)?;

        let mut rows = kpi::filter_by_range(&rows, &range);
        if !request.couriers.is_empty() {
            rows.retain(|r| request.couriers.iter().any(|c| c == r.courier()));
        }
        info!(
            rows = rows.len(),
            start = %dates::display(range.start),
            end = %dates::display(range.end),
            "Analyzing cumulative dataset"
        );

        Ok(GlobalReport {
            range: Some(range),
            couriers_filter: request.couriers.clone(),
            totals: kpi::global_totals(&rows),
            couriers: kpi::courier_stats(&rows),
            top_establishments: kpi::top_establishments(&rows, kpi::TOP_ESTABLISHMENTS),
            daily_trend: kpi::daily_trend(&rows),
            error: None,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use time::macros::date;

    const DATASET: &str = "dataset_global.csv";

    const CHAT: &str = "\
[01/01/24, 10:00:00] Yupii: _*Recoger en*_
📍KFC Centro
_*Pedido*_
Pollo con papas
_*Entregar en*_
Calle 1
_*Cobrar*_
$100
[01/01/24, 10:30:00] Yupii: _*Recoger en*_
📍Subway
_*Pedido*_
Sub de pavo
_*Entregar en*_
Calle 2
_*Cobrar*_
$200
[02/01/24, 09:00:00] Yupii: _*Recoger en*_
📍Donde sea
_*Pedido*_
Efectivo
_*Entregar en*_
Calle 3
_*Cobrar*_
$50
[02/01/24, 11:00:00] Yupii: 🟢$20 más de envío por lluvia
[20/01/24, 11:00:00] Yupii: _*Recoger en*_
📍Subway
_*Pedido*_
Sub doble con queso
_*Entregar en*_
Calle 4
_*Cobrar*_
$80
[20/01/24, 12:00:00] Ana: fin
";

    fn request(start: Option<Date>, end: Option<Date>, append: bool) -> CourierRequest {
        CourierRequest {
            handle: "pedidos/ana.txt".into(),
            courier: "ana".into(),
            start,
            end,
            append,
        }
    }

    #[test]
    fn test_courier_run_end_to_end() {
        let store = MemoryStore::with(&[("pedidos/ana.txt", CHAT)]);
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);

        let report = pipeline
            .run_courier(
                &request(Some(date!(2024 - 01 - 01)), Some(date!(2024 - 01 - 07)), true),
                date!(2024 - 01 - 25),
            )
            .unwrap();

        // The third block's date is the next message's timestamp (02/01).
        assert_eq!(report.kpis.shipment_count, 3);
        assert_eq!(report.kpis.extra_income, 20);
        assert_eq!(report.kpis.gross_income, 370);
        assert_eq!(report.kpis.courier_payout, 259.0);
        assert_eq!(report.kpis.active_days, 2);
        assert_eq!(report.extra_income_dates, vec!["02/01/2024".to_string()]);
        assert_eq!(report.filtered_products, vec!["Efectivo".to_string()]);
        assert!(report.normalized_establishments["Kfc"].contains("KFC Centro"));

        let info = report.dataset.unwrap();
        assert_eq!(info.appended, 3);
        assert_eq!(info.total_rows, 3);
        assert!(info.saved);
        assert_eq!(info.first_date, Some(date!(2024 - 01 - 01)));

        let stored = store.read_table(DATASET).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|r| r.courier == "ana"));
    }

    #[test]
    fn test_repeat_append_duplicates_rows() {
        let store = MemoryStore::with(&[("pedidos/ana.txt", CHAT)]);
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);
        let req = request(Some(date!(2024 - 01 - 01)), Some(date!(2024 - 01 - 31)), true);

        pipeline.run_courier(&req, date!(2024 - 02 - 01)).unwrap();
        let second = pipeline.run_courier(&req, date!(2024 - 02 - 01)).unwrap();
        assert_eq!(second.dataset.unwrap().total_rows, 8);
    }

    #[test]
    fn test_default_window_clamps_to_last_week() {
        let store = MemoryStore::with(&[("pedidos/ana.txt", CHAT)]);
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);

        let report = pipeline
            .run_courier(&request(None, None, false), date!(2024 - 01 - 22))
            .unwrap();
        let range = report.range.unwrap();
        assert_eq!(range.start, date!(2024 - 01 - 15));
        assert_eq!(range.end, date!(2024 - 01 - 20));
        assert_eq!(report.kpis.shipment_count, 1);
        assert_eq!(report.kpis.gross_income, 80);
        assert!(report.dataset.is_none());
        assert!(store.read_table(DATASET).is_none());
    }

    #[test]
    fn test_inverted_range_fails() {
        let store = MemoryStore::with(&[("pedidos/ana.txt", CHAT)]);
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);
        let err = pipeline
            .run_courier(
                &request(Some(date!(2024 - 01 - 05)), Some(date!(2024 - 01 - 01)), true),
                date!(2024 - 01 - 22),
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidRange { .. }));
        assert!(store.read_table(DATASET).is_none());
    }

    #[test]
    fn test_missing_export() {
        let store = MemoryStore::default();
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);
        let err = pipeline
            .run_courier(&request(None, None, false), date!(2024 - 01 - 22))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingExport(h) if h == "pedidos/ana.txt"));
    }

    #[test]
    fn test_failed_write_still_reports() {
        let mut store = MemoryStore::with(&[("pedidos/ana.txt", CHAT)]);
        store.fail_writes = true;
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);
        let report = pipeline
            .run_courier(
                &request(Some(date!(2024 - 01 - 01)), Some(date!(2024 - 01 - 31)), true),
                date!(2024 - 02 - 01),
            )
            .unwrap();
        assert_eq!(report.kpis.shipment_count, 4);
        assert!(!report.dataset.unwrap().saved);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("datasets/dataset_global.csv"));
    }

    #[test]
    fn test_global_run_filters_and_ranks() {
        let csv = "\
fecha,establecimiento,producto,costo_envio,repartidor
2024-01-01,KFC Centro,Pollo,100,ana
2024-01-02,Donde sea,-,50,ana
2024-01-02,Subway,Sub,30,beto
2024-01-03,Subway,Sub,30,beto
2024-01-03,kfc,Pollo,10,carla
";
        let store = MemoryStore::with(&[("datasets/dataset_global.csv", csv)]);
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);

        let all = pipeline
            .run_global(&GlobalRequest::default(), date!(2024 - 02 - 01))
            .unwrap();
        let range = all.range.unwrap();
        assert_eq!((range.start, range.end), (date!(2024 - 01 - 01), date!(2024 - 01 - 03)));
        assert_eq!(all.totals.shipment_count, 4);
        assert_eq!(all.totals.gross_income, 170);
        let names: Vec<_> = all.couriers.iter().map(|c| c.courier.as_str()).collect();
        assert_eq!(names, ["ana", "beto", "carla"]);
        assert_eq!(all.top_establishments[0].establishment, "Kfc");
        assert_eq!(all.top_establishments[0].shipments, 2);
        assert_eq!(all.daily_trend.len(), 3);

        let only_beto = pipeline
            .run_global(
                &GlobalRequest {
                    couriers: vec!["beto".into()],
                    ..GlobalRequest::default()
                },
                date!(2024 - 02 - 01),
            )
            .unwrap();
        assert_eq!(only_beto.totals.shipment_count, 2);
        assert_eq!(only_beto.couriers.len(), 1);
    }

    #[test]
    fn test_global_run_from_local_rows_while_offline() {
        let csv = "\
fecha,establecimiento,producto,costo_envio,repartidor
05/03/2024,Starbucks Centro,Latte,35,ana
2024-03-06,starbucks,Frappe,45,beto
";
        let store = crate::store::OfflineStore;
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);

        let from_store = pipeline
            .run_global(&GlobalRequest::default(), date!(2024 - 03 - 10))
            .unwrap();
        assert_eq!(from_store.totals.shipment_count, 0);

        let report = pipeline
            .run_global_rows(
                dataset::decode_csv(csv),
                &GlobalRequest::default(),
                date!(2024 - 03 - 10),
            )
            .unwrap();
        let range = report.range.unwrap();
        assert_eq!((range.start, range.end), (date!(2024 - 03 - 05), date!(2024 - 03 - 06)));
        assert_eq!(report.totals.gross_income, 80);
        assert_eq!(report.top_establishments[0].establishment, "Starbucks");
        assert_eq!(report.top_establishments[0].shipments, 2);
        assert_eq!(report.rows.len(), 2);
    }

    #[test]
    fn test_global_run_without_dataset() {
        let store = MemoryStore::default();
        let aliases = AliasTable::builtin();
        let pipeline = Pipeline::new(&store, &aliases, DATASET);
        let report = pipeline
            .run_global(&GlobalRequest::default(), date!(2024 - 02 - 01))
            .unwrap();
        assert_eq!(report.totals.shipment_count, 0);
        assert!(report.couriers.is_empty());
    }

    #[test]
    fn test_courier_from_file() {
        assert_eq!(courier_from_file("ana.txt"), "ana");
        assert_eq!(courier_from_file("notas"), "notas");
    }
}
