//! Synthetic-lethality catalog loading and filtering.
//!
//! The catalog is a per-(pair, cell line) CSV from a combinatorial CRISPR
//! screen: one row per validating cell line, keyed by a canonical sorted
//! `"GeneA|GeneB"` pair string, with genetic-interaction scores, FDR, and
//! per-side DepMap annotations.

use std::sync::OnceLock;

use polars::prelude::*;
use regex::Regex;
use tracing::{info, warn};

use crate::helper_functions::read_csv;
use crate::models::AnalysisResult;

/// Cell-line panel size of the screen; hit fractions are measured against it.
pub const CELL_LINE_PANEL_SIZE: u32 = 27;

/// Total DepMap cell lines behind the `"N/1086"` dependency-count strings.
pub const DEPMAP_TOTAL_LINES: u32 = 1086;

pub const DEFAULT_FDR_THRESHOLD: f64 = 0.05;

/// Row-level filters applied while loading the catalog.
#[derive(Debug, Clone)]
pub struct SlFilters {
    /// Keep rows with `fdr <= fdr_threshold`.
    pub fdr_threshold: f64,
    /// Keep rows with `|mean_norm_gi| >= min_gi_score`, when set.
    pub min_gi_score: Option<f64>,
    /// Keep rows whose screen source is in this set, when set.
    pub source_types: Option<Vec<String>>,
}

impl Default for SlFilters {
    fn default() -> Self {
        SlFilters {
            fdr_threshold: DEFAULT_FDR_THRESHOLD,
            min_gi_score: None,
            source_types: None,
        }
    }
}

/// One catalog row after filtering, parsed into a fixed schema.
#[derive(Debug, Clone)]
pub struct SlObservation {
    pub sorted_gene_pair: String,
    pub target_a: String,
    pub target_b: String,
    pub mean_norm_gi: f64,
    pub fdr: f64,
    pub cancer_type: String,
    pub cell_line_label: String,
    pub sgrna_group: String,
    pub a_is_common_essential: bool,
    pub b_is_common_essential: bool,
    pub a_depmap_dependent_lines: u32,
    pub b_depmap_dependent_lines: u32,
}

fn depmap_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*/\s*(\d+)\s*$").unwrap())
}

/// Parse a DepMap dependency count encoded as `"N/total"`.
///
/// Real catalogs carry a non-trivial number of malformed or missing entries,
/// so this degrades to `(0, DEPMAP_TOTAL_LINES)` instead of failing the join.
pub fn parse_depmap_count(raw: Option<&str>) -> (u32, u32) {
    let Some(raw) = raw else {
        return (0, DEPMAP_TOTAL_LINES);
    };
    match depmap_count_re().captures(raw) {
        Some(caps) => {
            let dependent = caps[1].parse().unwrap_or(0);
            let total = caps[2].parse().unwrap_or(DEPMAP_TOTAL_LINES);
            (dependent, total)
        }
        None => (0, DEPMAP_TOTAL_LINES),
    }
}

/// Load the SL catalog, apply the row filters, and parse the survivors into
/// typed observations.
pub fn load_synthetic_lethal_data(
    path: &str,
    filters: &SlFilters,
) -> AnalysisResult<Vec<SlObservation>> {
    info!("Reading synthetic lethality catalog from {}", path);
    let df = read_csv(path)?;
    let total_rows = df.height();

    let mut lazy = df
        .lazy()
        .filter(col("fdr").lt_eq(lit(filters.fdr_threshold)));
    if let Some(min_gi) = filters.min_gi_score {
        lazy = lazy.filter(col("mean_norm_gi").abs().gt_eq(lit(min_gi)));
    }
    let df = lazy.collect()?;

    let mut observations = extract_observations(&df)?;
    if let Some(source_types) = &filters.source_types {
        observations.retain(|o| source_types.iter().any(|t| t == &o.sgrna_group));
    }

    info!(
        "SL catalog: kept {} of {} rows (fdr <= {})",
        observations.len(),
        total_rows,
        filters.fdr_threshold
    );
    Ok(observations)
}

fn extract_observations(df: &DataFrame) -> AnalysisResult<Vec<SlObservation>> {
    let pair = df.column("sorted_gene_pair")?.str()?;
    let target_a = df.column("targetA")?.str()?;
    let target_b = df.column("targetB")?.str()?;
    let gi = df.column("mean_norm_gi")?.cast(&DataType::Float64)?;
    let gi = gi.f64()?;
    let fdr = df.column("fdr")?.cast(&DataType::Float64)?;
    let fdr = fdr.f64()?;
    let cancer_type = df.column("cancer_type")?.str()?;
    let cell_line = df.column("cell_line_label")?.str()?;

    let ess_a = df.column("targetA__is_common_essential_bagel2").ok();
    let ess_b = df.column("targetB__is_common_essential_bagel2").ok();
    let depmap_a = df.column("targetA__n_depmap_dependent_cell_lines").ok();
    let depmap_b = df.column("targetB__n_depmap_dependent_cell_lines").ok();
    // Screen-source column is optional; older catalog exports lack it.
    let sgrna_group = df.column("sgrna_group.x").ok();

    let mut observations = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (a_dependent, _) = parse_depmap_count(str_at(depmap_a, idx));
        let (b_dependent, _) = parse_depmap_count(str_at(depmap_b, idx));
        observations.push(SlObservation {
            sorted_gene_pair: pair.get(idx).unwrap_or_default().to_string(),
            target_a: target_a.get(idx).unwrap_or_default().to_string(),
            target_b: target_b.get(idx).unwrap_or_default().to_string(),
            mean_norm_gi: gi.get(idx).unwrap_or(f64::NAN),
            fdr: fdr.get(idx).unwrap_or(f64::NAN),
            cancer_type: cancer_type.get(idx).unwrap_or_default().to_string(),
            cell_line_label: cell_line.get(idx).unwrap_or_default().to_string(),
            sgrna_group: str_at(sgrna_group, idx).unwrap_or_default().to_string(),
            a_is_common_essential: bool_at(ess_a, idx),
            b_is_common_essential: bool_at(ess_b, idx),
            a_depmap_dependent_lines: a_dependent,
            b_depmap_dependent_lines: b_dependent,
        });
    }
    Ok(observations)
}

fn str_at<'a>(column: Option<&'a Column>, idx: usize) -> Option<&'a str> {
    column?.str().ok()?.get(idx)
}

/// Read a boolean cell leniently: native bool columns or the string spellings
/// pandas-era exports use ("True"/"False"). Anything else is false.
fn bool_at(column: Option<&Column>, idx: usize) -> bool {
    let Some(column) = column else {
        return false;
    };
    if let Ok(ca) = column.bool() {
        return ca.get(idx).unwrap_or(false);
    }
    if let Ok(ca) = column.str() {
        return matches!(ca.get(idx), Some("True") | Some("true") | Some("TRUE") | Some("1"));
    }
    warn!("Unexpected dtype for boolean column {}", column.name());
    false
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
