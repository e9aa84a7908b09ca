// src/order_extract.rs

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use time::Date;
use tracing::{debug, info};

use crate::dates::{self, iso};
use crate::kpi::Shipment;
use crate::heuristics::{AliasTable, PRODUCT_NOT_SPECIFIED, classify_product, is_valid_product};

/// Marker that opens every order block in the chat export.
pub const RECORD_SEPARATOR: &str = "_*Recoger en*_";

/// Value used when a block has no establishment or product line.
const MISSING_FIELD: &str = "-";

/// Decorative bullets couriers paste in front of product lines.
const PRODUCT_BULLETS: &[&str] = &["\u{25AA}\u{FE0F}", "\u{25FC}\u{FE0F}"];

static ESTABLISHMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"📍(.*?)(?:\n|$)").unwrap());
static PRODUCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)_\*Pedido\*_\n(.+?)_\*Entregar en\*_").unwrap());
static FEE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_\*Cobrar\*_\s*\n*\s*\$(\d+)").unwrap());
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d{2}/\d{2}/\d{2}),").unwrap());

/// One delivery parsed out of the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    #[serde(rename = "fecha", serialize_with = "iso::serialize_opt")]
    pub date: Option<Date>,
    #[serde(rename = "establecimiento")]
    pub establishment: String,
    #[serde(rename = "producto")]
    pub product: String,
    #[serde(rename = "costo_envio")]
    pub shipping_fee: u64,
}

impl Shipment for OrderRecord {
    fn date(&self) -> Option<Date> {
        self.date
    }

    fn shipping_fee(&self) -> u64 {
        self.shipping_fee
    }
}

/// Records plus what the heuristics changed along the way.
#[derive(Debug, Default, Serialize)]
pub struct Extraction {
    pub records: Vec<OrderRecord>,
    /// Raw product texts replaced by the placeholder.
    pub filtered_products: Vec<String>,
    /// Canonical establishment → raw spellings folded into it.
    pub normalized_establishments: BTreeMap<String, BTreeSet<String>>,
}

/// Parse a chat export using the built-in alias table.
#[cfg(test)]
pub fn extract(raw_text: &str) -> Extraction {
    extract_with(raw_text, &crate::heuristics::DEFAULT_ALIASES)
}

/// Parse a chat export. Every block after the first separator yields exactly
/// one record; missing fields degrade to defaults instead of dropping it.
pub fn extract_with(raw_text: &str, aliases: &AliasTable) -> Extraction {
    let mut out = Extraction::default();

    for block in raw_text.split(RECORD_SEPARATOR).skip(1) {
        let establishment_raw = ESTABLISHMENT_RE
            .captures(block)
            .map(|c| c[1].trim().to_string());
        let establishment = aliases
            .normalize_opt(establishment_raw.as_deref())
            .unwrap_or_else(|| MISSING_FIELD.to_string());
        if let Some(raw) = establishment_raw {
            if raw.to_lowercase() != establishment.to_lowercase() {
                out.normalized_establishments
                    .entry(establishment.clone())
                    .or_default()
                    .insert(raw);
            }
        }

        let product_raw = extract_product(block);
        let product = if is_valid_product(product_raw.as_str()) {
            product_raw
        } else {
            let rule = classify_product(product_raw.as_str()).rule;
            debug!(raw = %product_raw, rule, "Product text looks like a shipping note");
            out.filtered_products.push(product_raw);
            PRODUCT_NOT_SPECIFIED.to_string()
        };

        let shipping_fee = FEE_RE
            .captures(block)
            .and_then(|c| c[1].parse::<u64>().ok())
            .unwrap_or(0);

        let date = DATE_RE
            .captures(block)
            .and_then(|c| dates::parse_chat_date(&c[1]));

        out.records.push(OrderRecord {
            date,
            establishment,
            product,
            shipping_fee,
        });
    }

    info!(
        records = out.records.len(),
        filtered_products = out.filtered_products.len(),
        merged_establishments = out.normalized_establishments.len(),
        "Extraction complete"
    );
    out
}

fn extract_product(block: &str) -> String {
    let Some(cap) = PRODUCT_RE.captures(block) else {
        return MISSING_FIELD.to_string();
    };
    let mut text = cap[1].to_string();
    for bullet in PRODUCT_BULLETS {
        text = text.replace(bullet, "");
    }
    text.trim().to_string()
}
