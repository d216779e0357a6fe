use std::fmt;
use std::sync::OnceLock;

use polars::error::PolarsError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Error taxonomy for the analysis pipeline. The batch driver and the
/// genome-wide aggregator match on specific variants, everything else is
/// passed through from the underlying library.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("too few samples for reliable statistics: {n_samples} (minimum {min_required})")]
    InsufficientSamples {
        n_samples: usize,
        min_required: usize,
    },

    #[error("deletion frequencies not found for study '{study_id}', chromosome {chromosome}")]
    FrequenciesNotFound {
        study_id: String,
        chromosome: String,
    },

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Composite gene identifier: HUGO symbol plus Entrez ID. Symbols are not
/// unique across the genome, so the Entrez ID disambiguates.
///
/// Renders as `"SYMBOL (ENTREZ)"`, the column-label format used in every
/// exported table. Parsed once at the data boundary, never re-split inside
/// numeric loops.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneKey {
    pub symbol: String,
    pub entrez: u32,
}

fn composite_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+) \((\d+)\)$").unwrap())
}

impl GeneKey {
    pub fn new(symbol: impl Into<String>, entrez: u32) -> Self {
        GeneKey {
            symbol: symbol.into(),
            entrez,
        }
    }

    /// Parse a `"SYMBOL (ENTREZ)"` label back into a key.
    pub fn parse(label: &str) -> Option<GeneKey> {
        let caps = composite_key_re().captures(label.trim())?;
        let entrez = caps[2].parse().ok()?;
        Some(GeneKey::new(&caps[1], entrez))
    }
}

/// Split a gene label into symbol and optional Entrez ID. Labels without the
/// `(ENTREZ)` suffix keep their full text as the symbol.
pub fn split_composite(label: &str) -> (String, Option<u32>) {
    match composite_key_re().captures(label.trim()) {
        Some(caps) => (caps[1].to_string(), caps[2].parse().ok()),
        None => (label.trim().to_string(), None),
    }
}

impl fmt::Display for GeneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.entrez)
    }
}

/// Gene position metadata, one row per gene on a chromosome.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneInfo {
    #[serde(rename = "entrezGeneId")]
    pub entrez_gene_id: u32,
    #[serde(rename = "hugoGeneSymbol")]
    pub hugo_gene_symbol: String,
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub cytoband: String,
}

impl GeneInfo {
    pub fn key(&self) -> GeneKey {
        GeneKey::new(&self.hugo_gene_symbol, self.entrez_gene_id)
    }
}

/// One discrete copy-number call, GISTIC-style alteration in -2..=2.
#[derive(Debug, Clone, Deserialize)]
pub struct CnaCall {
    #[serde(rename = "sampleId")]
    pub sample_id: String,
    #[serde(rename = "entrezGeneId")]
    pub entrez_gene_id: u32,
    pub alteration: i8,
}

/// One unordered gene pair with its joint co-deletion frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct GenePairRecord {
    pub gene_a: GeneKey,
    pub gene_b: GeneKey,
    pub co_deletion_frequency: f64,
}

/// One row of the genome-wide deletion-frequency aggregation.
#[derive(Debug, Clone)]
pub struct GeneDeletion {
    pub symbol: String,
    pub entrez: Option<u32>,
    pub chromosome: String,
    pub frequency: f64,
}

/// A directional therapeutic opportunity: `deleted_gene` is lost in the
/// cohort, `target_gene` is its synthetic-lethal partner. Hit-frequency
/// fields are present only when validation-breadth data was supplied to the
/// join; `study_id` is set by the cross-study comparison.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub deleted_gene: String,
    pub target_gene: String,
    pub deletion_frequency: f64,
    pub gi_score: f64,
    pub fdr: f64,
    pub target_is_common_essential: bool,
    pub target_depmap_dependent_lines: u32,
    pub therapeutic_score: f64,
    pub hit_count: Option<u32>,
    pub hit_fraction: Option<f64>,
    pub cancer_types_validated: Option<String>,
    pub study_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gene_key_roundtrip() {
        let key = GeneKey::new("TP53", 7157);
        assert_eq!(key.to_string(), "TP53 (7157)");
        assert_eq!(GeneKey::parse("TP53 (7157)"), Some(key));
    }

    #[test]
    fn gene_key_parse_rejects_plain_symbols() {
        assert_eq!(GeneKey::parse("TP53"), None);
        assert_eq!(GeneKey::parse("TP53 (x)"), None);
    }

    #[test]
    fn split_composite_falls_back_to_symbol_only() {
        assert_eq!(split_composite("RB1 (5925)"), ("RB1".to_string(), Some(5925)));
        assert_eq!(split_composite("RB1"), ("RB1".to_string(), None));
    }
}
