use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Qualifiers that distinguish branches of the same business.
const BRANCH_QUALIFIERS: &[&str] = &[
    " centro",
    " local",
    " sucursal",
    " principal",
    " #1",
    " no. 1",
    " numero 1",
];

/// Values that say "no particular pickup place" in the cumulative dataset.
const PLACEHOLDER_ESTABLISHMENTS: &[&str] = &["donde sea", "-", "", "nan"];

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Built-in table; config entries are appended after these.
pub static DEFAULT_ALIASES: Lazy<AliasTable> = Lazy::new(AliasTable::builtin);

/// A canonical establishment and the spellings couriers use for it.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasEntry {
    pub canonical: String,
    pub variants: Vec<String>,
}

/// Ordered alias table. Lookups walk it front to back and the first variant
/// found wins, so overlapping variants resolve by declaration order.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn builtin() -> Self {
        let table: &[(&str, &[&str])] = &[
            (
                "tacomarin",
                &["tacomarin centro", "taco marin", "taco marin centro", "tacomarin", "taco-marin"],
            ),
            (
                "mcdonalds",
                &["mc donalds", "mc donald's", "mcdonald's", "macdonalds", "mac donalds"],
            ),
            ("kfc", &["kentucky fried chicken", "k.f.c", "kfc", "kentucky"]),
            ("burger king", &["burger king", "burgerking", "bk", "burger-king"]),
            ("pizza hut", &["pizza hut", "pizzahut", "pizza-hut"]),
            ("dominos", &["domino's", "dominos", "domino", "dominos pizza"]),
            ("subway", &["subway", "sub way", "sub-way"]),
            ("starbucks", &["starbucks", "star bucks", "star-bucks"]),
        ];
        Self::from_entries(table.iter().map(|(canonical, variants)| AliasEntry {
            canonical: canonical.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = AliasEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| AliasEntry {
                canonical: e.canonical.trim().to_lowercase(),
                variants: e
                    .variants
                    .iter()
                    .map(|v| v.trim().to_lowercase())
                    .filter(|v| !v.is_empty())
                    .collect(),
            })
            .collect();
        Self { entries }
    }

    /// Built-in entries followed by `extra` in the order given.
    pub fn with_extra(extra: &[AliasEntry]) -> Self {
        let mut table = DEFAULT_ALIASES.clone();
        table.entries.extend(Self::from_entries(extra.iter().cloned()).entries);
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn find_exact(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.variants.iter().any(|v| name.contains(v.as_str())))
            .map(|e| e.canonical.as_str())
    }

    fn find_loose(&self, cleaned: &str) -> Option<&str> {
        let haystack = cleaned.replace(' ', "");
        self.entries
            .iter()
            .find(|e| {
                e.variants
                    .iter()
                    .any(|v| haystack.contains(&v.replace([' ', '-'], "")))
            })
            .map(|e| e.canonical.as_str())
    }

    /// Map a raw pickup name to its canonical, title-cased form.
    pub fn normalize(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        let name = raw.trim().to_lowercase();
        if let Some(canonical) = self.find_exact(&name) {
            return title_case(canonical);
        }

        let mut cleaned = name;
        for qualifier in BRANCH_QUALIFIERS {
            cleaned = cleaned.replace(qualifier, "");
        }
        let cleaned = MULTI_SPACE.replace_all(&cleaned, " ");
        let cleaned = PUNCTUATION.replace_all(&cleaned, "");
        if let Some(canonical) = self.find_loose(cleaned.trim()) {
            return title_case(canonical);
        }

        title_case(raw.trim())
    }

    /// Absent values stay absent.
    pub fn normalize_opt(&self, raw: Option<&str>) -> Option<String> {
        raw.map(|r| self.normalize(r))
    }
}

/// Normalize against the built-in table.
#[cfg(test)]
pub fn normalize(raw: &str) -> String {
    DEFAULT_ALIASES.normalize(raw)
}

/// Drop placeholder pickup names before global analysis.
pub fn clean_establishment(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if PLACEHOLDER_ESTABLISHMENTS.contains(&trimmed.to_lowercase().as_str()) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Title-case the way spreadsheet tooling does: a letter is uppercased when
/// the character before it is not a letter, lowercased otherwise.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_cased = false;
    for ch in text.chars() {
        if prev_cased {
            out.extend(ch.to_lowercase());
        } else {
            // Only the first char of a multi-char uppercase stays upper (ß -> Ss).
            let mut upper = ch.to_uppercase();
            out.extend(upper.next());
            out.extend(upper.flat_map(char::to_lowercase));
        }
        prev_cased = ch.is_uppercase() || ch.is_lowercase();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_spellings_collapse() {
        assert_eq!(normalize("Taco Marin Centro"), "Tacomarin");
        assert_eq!(normalize("tacomarin"), "Tacomarin");
        assert_eq!(normalize("  TACO-MARIN "), "Tacomarin");
        assert_eq!(normalize("Mc Donalds Plaza"), "Mcdonalds");
        assert_eq!(normalize("Burger King sucursal 3"), "Burger King");
    }

    #[test]
    fn test_loose_match_after_cleanup() {
        // Punctuation and qualifiers removed, then spaces ignored.
        assert_eq!(normalize("Star.Bucks local"), "Starbucks");
        assert_eq!(normalize("Pizza  Hut!"), "Pizza Hut");
    }

    #[test]
    fn test_unknown_names_are_title_cased() {
        assert_eq!(normalize("la esquina del sabor centro"), "La Esquina Del Sabor Centro");
        assert_eq!(normalize("  farmacia 24h "), "Farmacia 24H");
    }

    #[test]
    fn test_empty_and_absent_pass_through() {
        assert_eq!(normalize(""), "");
        assert_eq!(DEFAULT_ALIASES.normalize_opt(None), None);
    }

    #[test]
    fn test_idempotent() {
        for raw in [
            "Taco Marin Centro",
            "mcdonald's",
            "Kentucky",
            "la esquina del sabor",
            "Farmacia  San Pablo #1",
            "-",
            "",
            "mc donald's  centro",
            "ßaba",
            "straße ßtand",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_first_declared_alias_wins() {
        let table = AliasTable::from_entries([
            AliasEntry { canonical: "alpha".into(), variants: vec!["shared".into()] },
            AliasEntry { canonical: "beta".into(), variants: vec!["shared".into()] },
        ]);
        assert_eq!(table.normalize("Shared Kitchen"), "Alpha");
    }

    #[test]
    fn test_extra_aliases_follow_builtin() {
        let extra = [AliasEntry {
            canonical: "La Esquina".into(),
            variants: vec!["Esquina del Sabor".into()],
        }];
        let table = AliasTable::with_extra(&extra);
        assert_eq!(table.len(), DEFAULT_ALIASES.len() + 1);
        assert_eq!(table.normalize("esquina del sabor centro"), "La Esquina");
    }

    #[test]
    fn test_clean_placeholders() {
        assert_eq!(clean_establishment("DONDE SEA"), None);
        assert_eq!(clean_establishment(" - "), None);
        assert_eq!(clean_establishment("NaN"), None);
        assert_eq!(clean_establishment(" Subway "), Some("Subway".to_string()));
    }

    #[test]
    fn test_title_case_rules() {
        assert_eq!(title_case("mcdonald's"), "Mcdonald'S");
        assert_eq!(title_case("burger king"), "Burger King");
        assert_eq!(title_case("ÑANDÚ café"), "Ñandú Café");
        assert_eq!(title_case("ßaba straße"), "Ssaba Straße");
    }
}
