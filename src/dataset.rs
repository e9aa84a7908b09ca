// src/dataset.rs

use serde::{Deserialize, Deserializer, Serialize};
use time::Date;
use tracing::{info, warn};

use crate::dates::iso;
use crate::errors::AnalysisError;
use crate::heuristics::{AliasTable, clean_establishment};
use crate::kpi::{CourierShipment, Shipment};
use crate::order_extract::OrderRecord;

/// Header of a single courier's cleaned export.
pub const RECORD_COLUMNS: [&str; 4] = ["fecha", "establecimiento", "producto", "costo_envio"];
/// Header of the cumulative dataset.
pub const DATASET_COLUMNS: [&str; 5] =
    ["fecha", "establecimiento", "producto", "costo_envio", "repartidor"];

/// A row of the cumulative dataset: an order tagged with its courier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRow {
    #[serde(
        rename = "fecha",
        serialize_with = "iso::serialize_opt",
        deserialize_with = "iso::deserialize_opt",
        default
    )]
    pub date: Option<Date>,
    #[serde(rename = "establecimiento", default)]
    pub establishment: String,
    #[serde(rename = "producto", default)]
    pub product: String,
    #[serde(rename = "costo_envio", deserialize_with = "lenient_fee", default)]
    pub shipping_fee: u64,
    #[serde(rename = "repartidor", default)]
    pub courier: String,
}

impl DatasetRow {
    pub fn from_record(record: &OrderRecord, courier: &str) -> Self {
        Self {
            date: record.date,
            establishment: record.establishment.clone(),
            product: record.product.clone(),
            shipping_fee: record.shipping_fee,
            courier: courier.to_string(),
        }
    }
}

impl Shipment for DatasetRow {
    fn date(&self) -> Option<Date> {
        self.date
    }

    fn shipping_fee(&self) -> u64 {
        self.shipping_fee
    }
}

impl CourierShipment for DatasetRow {
    fn courier(&self) -> &str {
        &self.courier
    }

    fn establishment(&self) -> &str {
        &self.establishment
    }
}

/// Fees written by other tools may be floats (`150.0`) or blank.
fn lenient_fee<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Ok(v);
    }
    Ok(match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v.round() as u64,
        _ => 0,
    })
}

/// Tag a courier's filtered records for the cumulative dataset.
pub fn tag_records(records: &[OrderRecord], courier: &str) -> Vec<DatasetRow> {
    records
        .iter()
        .map(|r| DatasetRow::from_record(r, courier))
        .collect()
}

/// Append `new_rows` after the existing dataset. No de-duplication: running
/// the same analysis twice stores its rows twice.
pub fn merge(existing: Option<Vec<DatasetRow>>, new_rows: Vec<DatasetRow>) -> Vec<DatasetRow> {
    match existing {
        Some(mut rows) if !rows.is_empty() => {
            rows.extend(new_rows);
            rows
        }
        _ => new_rows,
    }
}

/// Earliest and latest valid dates in the dataset.
pub fn date_span(rows: &[DatasetRow]) -> Option<(Date, Date)> {
    let mut dates = rows.iter().filter_map(|r| r.date);
    let first = dates.next()?;
    Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
}

/// Drop placeholder pickup names and fold spellings for the global view.
pub fn clean_for_global(rows: Vec<DatasetRow>, aliases: &AliasTable) -> Vec<DatasetRow> {
    let before = rows.len();
    let cleaned: Vec<DatasetRow> = rows
        .into_iter()
        .filter_map(|mut row| {
            let establishment = clean_establishment(&row.establishment)?;
            row.establishment = aliases.normalize(&establishment);
            Some(row)
        })
        .collect();
    info!(before, after = cleaned.len(), "Cleaned establishments for global view");
    cleaned
}

/// Decode a dataset CSV. Dates that cannot be read become null; rows that
/// cannot be decoded at all are logged and skipped.
pub fn decode_csv(content: &str) -> Vec<DatasetRow> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize::<DatasetRow>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!(line = line + 2, error = %e, "Skipping unreadable dataset row"),
        }
    }
    rows
}

/// Encode rows with an explicit header so empty tables still carry one.
pub fn encode_csv<T: Serialize>(rows: &[T], header: &[&str]) -> Result<String, AnalysisError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn encode_dataset(rows: &[DatasetRow]) -> Result<String, AnalysisError> {
    encode_csv(rows, &DATASET_COLUMNS)
}

pub fn encode_records(records: &[OrderRecord]) -> Result<String, AnalysisError> {
    encode_csv(records, &RECORD_COLUMNS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn row(date: Option<Date>, fee: u64, courier: &str) -> DatasetRow {
        DatasetRow {
            date,
            establishment: "Kfc".into(),
            product: "Pollo".into(),
            shipping_fee: fee,
            courier: courier.into(),
        }
    }

    #[test]
    fn test_merge_appends_in_order() {
        let existing = vec![row(Some(date!(2024 - 01 - 01)), 10, "Ana")];
        let new_rows = vec![row(Some(date!(2024 - 01 - 02)), 20, "Beto")];
        let merged = merge(Some(existing.clone()), new_rows.clone());
        assert_eq!(merged, [existing, new_rows].concat());
    }

    #[test]
    fn test_merge_identities() {
        let existing = vec![row(None, 1, "Ana"), row(Some(date!(2024 - 01 - 01)), 2, "Ana")];
        assert_eq!(merge(Some(existing.clone()), Vec::new()), existing);
        assert_eq!(merge(None, existing.clone()), existing);
        assert_eq!(merge(Some(Vec::new()), existing.clone()), existing);
    }

    #[test]
    fn test_merge_keeps_duplicates() {
        let rows = vec![row(Some(date!(2024 - 01 - 01)), 10, "Ana")];
        assert_eq!(merge(Some(rows.clone()), rows.clone()).len(), 2);
    }

    #[test]
    fn test_decode_coerces_dates_and_fees() {
        let csv = "\
fecha,establecimiento,producto,costo_envio,repartidor,dia_semana
2024-01-01 00:00:00,Kfc,Pollo,45,Ana,Lunes
garbage,Subway,Sub,50.0,Beto,
02/01/2024,Subway,Sub,,Beto,
";
        let rows = decode_csv(csv);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].date, Some(date!(2024 - 01 - 01)));
        assert_eq!(rows[0].shipping_fee, 45);
        assert_eq!(rows[1].date, None);
        assert_eq!(rows[1].shipping_fee, 50);
        assert_eq!(rows[2].date, Some(date!(2024 - 01 - 02)));
        assert_eq!(rows[2].shipping_fee, 0);
    }

    #[test]
    fn test_decode_without_courier_column() {
        let rows = decode_csv("fecha,establecimiento,producto,costo_envio\n2024-01-01,Kfc,Pollo,45\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].courier, "");
    }

    #[test]
    fn test_encode_then_decode_dataset() {
        let rows = vec![row(Some(date!(2024 - 03 - 09)), 30, "Ana"), row(None, 5, "Beto")];
        let text = encode_dataset(&rows).unwrap();
        assert!(text.starts_with("fecha,establecimiento,producto,costo_envio,repartidor\n"));
        assert!(text.contains("2024-03-09,Kfc,Pollo,30,Ana"));
        assert_eq!(decode_csv(&text), rows);
    }

    #[test]
    fn test_encode_empty_keeps_header() {
        let text = encode_records(&[]).unwrap();
        assert_eq!(text, "fecha,establecimiento,producto,costo_envio\n");
    }

    #[test]
    fn test_clean_for_global() {
        let mut placeholder = row(None, 1, "Ana");
        placeholder.establishment = "Donde sea".into();
        let mut branch = row(None, 2, "Ana");
        branch.establishment = "taco marin centro".into();
        let cleaned = clean_for_global(vec![placeholder, branch], &AliasTable::builtin());
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].establishment, "Tacomarin");
    }

    #[test]
    fn test_date_span() {
        let rows = vec![
            row(Some(date!(2024 - 02 - 01)), 1, "Ana"),
            row(None, 1, "Ana"),
            row(Some(date!(2024 - 01 - 15)), 1, "Ana"),
        ];
        assert_eq!(date_span(&rows), Some((date!(2024 - 01 - 15), date!(2024 - 02 - 01))));
        assert_eq!(date_span(&[]), None);
    }
}
