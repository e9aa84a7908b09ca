// src/extra_income.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use time::Date;
use tracing::{debug, info};

use crate::dates::{self, DateRange};

/// A system message from the platform announcing extra money for a shipment,
/// e.g. `[03/01/24, 18:02:11] Yupii: 🟢$20 más de envío por lluvia`.
/// The amount may be preceded by coloured-circle glyphs. Matches stay on one line.
static EXTRA_INCOME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[(\d{2}/\d{2}/\d{2}),.*?\] Yupii:.*?([$🔴🟢🟡🟣🟠🟤\x{26AB}\x{FE0F}]*\$\d+).*más de envío",
    )
    .unwrap()
});
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+)").unwrap());

/// Income announced outside any order block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtraIncome {
    pub total: u64,
    #[serde(skip)]
    pub dates: Vec<Date>,
}

/// Sum the extra-income announcements whose message date lies in `range`.
pub fn extra_income(raw_text: &str, range: &DateRange) -> ExtraIncome {
    let mut out = ExtraIncome::default();
    let mut seen = 0usize;

    for cap in EXTRA_INCOME_RE.captures_iter(raw_text) {
        seen += 1;
        let amount = AMOUNT_RE
            .captures(&cap[2])
            .and_then(|a| a[1].parse::<u64>().ok())
            .unwrap_or(0);
        let date = dates::parse_chat_date(&cap[1]);
        if range.contains(date) {
            out.total = out.total.saturating_add(amount);
            out.dates.extend(date);
        } else {
            debug!(date = %&cap[1], amount, "Extra income outside range");
        }
    }

    info!(matches = seen, counted = out.dates.len(), total = out.total, "Extra income scan");
    out
}
