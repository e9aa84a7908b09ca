// src/heuristics/mod.rs

mod establishment;
mod product;

pub use establishment::{AliasEntry, AliasTable, DEFAULT_ALIASES, clean_establishment};
pub use product::{classify_product, is_valid_product};

/// Placeholder stored when the ordered text turned out to be a shipping note.
pub const PRODUCT_NOT_SPECIFIED: &str = "Producto no especificado";
