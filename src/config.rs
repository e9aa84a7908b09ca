use serde::Deserialize;
use std::{fs, path::Path};
use toml_edit::{ArrayOfTables, DocumentMut, Item, Table, value};

use crate::errors::AnalysisError;
use crate::heuristics::{AliasEntry, AliasTable};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_orders_prefix")]
    pub orders_prefix: String,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Extra establishment spellings, appended after the built-in table.
    #[serde(default)]
    pub aliases: Vec<AliasEntry>,
}

fn default_db_path() -> String {
    "store/objects.db".to_string()
}

fn default_orders_prefix() -> String {
    "pedidos/".to_string()
}

fn default_dataset_name() -> String {
    "dataset_global.csv".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            orders_prefix: default_orders_prefix(),
            dataset_name: default_dataset_name(),
            log_filter: default_log_filter(),
            aliases: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn alias_table(&self) -> AliasTable {
        AliasTable::with_extra(&self.aliases)
    }

    /// Add `variant` under `canonical` in the `[[aliases]]` list, keeping the
    /// rest of the file (comments, ordering) untouched.
    pub fn add_alias(
        path: impl AsRef<Path>,
        canonical: &str,
        variant: &str,
    ) -> Result<(), AnalysisError> {
        let content = if path.as_ref().exists() {
            fs::read_to_string(&path)?
        } else {
            String::new()
        };
        let mut doc = content.parse::<DocumentMut>()?;

        if !doc.contains_key("aliases") {
            doc["aliases"] = Item::ArrayOfTables(ArrayOfTables::new());
        }
        let Some(entries) = doc["aliases"].as_array_of_tables_mut() else {
            return Err(AnalysisError::BadConfigShape("aliases".to_string()));
        };

        let canonical = canonical.trim().to_lowercase();
        let variant = variant.trim().to_lowercase();

        let existing = entries
            .iter()
            .position(|t| t.get("canonical").and_then(|c| c.as_str()) == Some(canonical.as_str()));
        match existing.and_then(|idx| entries.get_mut(idx)) {
            Some(entry) => {
                if !entry.contains_key("variants") {
                    entry["variants"] = value(toml_edit::Array::new());
                }
                let Some(variants) = entry["variants"].as_array_mut() else {
                    return Err(AnalysisError::BadConfigShape("variants".to_string()));
                };
                if !variants.iter().any(|v| v.as_str() == Some(variant.as_str())) {
                    variants.push(variant.as_str());
                }
            }
            None => {
                let mut entry = Table::new();
                entry["canonical"] = value(canonical.as_str());
                let mut variants = toml_edit::Array::new();
                variants.push(variant.as_str());
                entry["variants"] = value(variants);
                entries.push(entry);
            }
        }

        fs::write(&path, doc.to_string())?;
        Ok(())
    }
}
