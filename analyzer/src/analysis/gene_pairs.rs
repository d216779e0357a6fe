//! Ranked, filterable gene-pair tables built from the conditional matrix.
//!
//! Pairs are ordered by their stronger conditional direction,
//! `max(P(i|j), P(j|i))`; the rank key itself is not part of the output.

use std::collections::HashMap;

use tracing::debug;

use crate::analysis::codeletion::{DeletionFrequencies, LabeledMatrix};
use crate::models::{GeneInfo, GeneKey, GenePairRecord};

/// Post-hoc filters for the ranked pair table. All active filters are
/// AND-combined. The gene filter is a case-insensitive substring match
/// against either symbol of the pair.
///
/// Rows missing a value a numeric filter needs (undefined conditional
/// direction, unknown distance, no joint entry) fail that filter.
#[derive(Debug, Clone, Default)]
pub struct PairFilters {
    pub gene_filter: Option<String>,
    pub min_distance: Option<u64>,
    pub max_distance: Option<u64>,
    pub min_freq: Option<f64>,
    pub min_p_a_given_b: Option<f64>,
    pub min_p_b_given_a: Option<f64>,
    pub min_joint: Option<f64>,
}

impl PairFilters {
    fn has_numeric_filter(&self) -> bool {
        self.min_distance.is_some()
            || self.max_distance.is_some()
            || self.min_freq.is_some()
            || self.min_p_a_given_b.is_some()
            || self.min_p_b_given_a.is_some()
            || self.min_joint.is_some()
    }
}

/// One row of the ranked pair table. `None` conditionals are undefined
/// directions (the partner gene is never deleted); `None` distance means
/// position metadata was unavailable for at least one gene.
#[derive(Debug, Clone)]
pub struct RankedGenePair {
    pub gene_a: GeneKey,
    pub gene_b: GeneKey,
    pub freq_a: f64,
    pub freq_b: f64,
    pub p_a_given_b: Option<f64>,
    pub p_b_given_a: Option<f64>,
    pub joint_frequency: Option<f64>,
    pub distance_bp: Option<u64>,
}

/// Terminal states of the pair table. The two empty states are reported
/// separately so the presentation layer can tell "your gene search matched
/// nothing" from "pairs exist but none clear the numeric thresholds".
#[derive(Debug)]
pub enum PairTableOutcome {
    Matched(Vec<RankedGenePair>),
    NoGeneMatch,
    NoThresholdMatch,
}

fn defined(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

fn passes_min(value: Option<f64>, threshold: Option<f64>) -> bool {
    match threshold {
        None => true,
        Some(t) => value.map_or(false, |v| v >= t),
    }
}

/// Build the ranked gene-pair table for one chromosome.
///
/// Every unordered pair from the strict upper triangle of the conditional
/// matrix becomes a candidate unless both conditional directions are
/// undefined or either gene has a zero (or unknown) marginal deletion
/// frequency — a never-deleted gene cannot meaningfully co-occur. Candidates
/// are annotated with the symmetric joint frequency and, where position
/// metadata allows, genomic distance `|start_i - start_j|`.
pub fn rank_gene_pairs(
    conditional: &LabeledMatrix,
    deletion_freqs: &DeletionFrequencies,
    joint: &[GenePairRecord],
    gene_metadata: Option<&[GeneInfo]>,
    n: usize,
    filters: &PairFilters,
) -> PairTableOutcome {
    let mut joint_by_pair: HashMap<(GeneKey, GeneKey), f64> = HashMap::with_capacity(joint.len());
    for record in joint {
        let key = ordered_pair(&record.gene_a, &record.gene_b);
        joint_by_pair.insert(key, record.co_deletion_frequency);
    }

    let starts: HashMap<u32, u64> = gene_metadata
        .unwrap_or(&[])
        .iter()
        .map(|g| (g.entrez_gene_id, g.start))
        .collect();

    let genes = conditional.genes();
    let mut candidates: Vec<(f64, RankedGenePair)> = Vec::new();
    for i in 0..genes.len() {
        for j in (i + 1)..genes.len() {
            let p_a_given_b = defined(conditional.value_at(i, j));
            let p_b_given_a = defined(conditional.value_at(j, i));
            if p_a_given_b.is_none() && p_b_given_a.is_none() {
                continue;
            }

            let gene_a = &genes[i];
            let gene_b = &genes[j];
            let freq_a = deletion_freqs.get(gene_a).unwrap_or(0.0);
            let freq_b = deletion_freqs.get(gene_b).unwrap_or(0.0);
            if freq_a == 0.0 || freq_b == 0.0 {
                continue;
            }

            let joint_frequency = joint_by_pair.get(&ordered_pair(gene_a, gene_b)).copied();
            let distance_bp = match (starts.get(&gene_a.entrez), starts.get(&gene_b.entrez)) {
                (Some(&a), Some(&b)) => Some(a.abs_diff(b)),
                _ => None,
            };

            let rank_key = match (p_a_given_b, p_b_given_a) {
                (Some(x), Some(y)) => x.max(y),
                (Some(x), None) | (None, Some(x)) => x,
                (None, None) => unreachable!(),
            };

            candidates.push((
                rank_key,
                RankedGenePair {
                    gene_a: gene_a.clone(),
                    gene_b: gene_b.clone(),
                    freq_a,
                    freq_b,
                    p_a_given_b,
                    p_b_given_a,
                    joint_frequency,
                    distance_bp,
                },
            ));
        }
    }
    debug!("{} candidate pairs before filtering", candidates.len());

    // Stage 1: gene-symbol search.
    if let Some(needle) = filters
        .gene_filter
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let needle = needle.to_lowercase();
        let before = candidates.len();
        candidates.retain(|(_, row)| {
            row.gene_a.symbol.to_lowercase().contains(&needle)
                || row.gene_b.symbol.to_lowercase().contains(&needle)
        });
        if candidates.is_empty() && before > 0 {
            return PairTableOutcome::NoGeneMatch;
        }
    }

    // Stage 2: numeric thresholds.
    if filters.has_numeric_filter() {
        let before = candidates.len();
        candidates.retain(|(_, row)| {
            let distance = row.distance_bp.map(|d| d as f64);
            passes_min(Some(row.freq_a), filters.min_freq)
                && passes_min(Some(row.freq_b), filters.min_freq)
                && passes_min(row.p_a_given_b, filters.min_p_a_given_b)
                && passes_min(row.p_b_given_a, filters.min_p_b_given_a)
                && passes_min(row.joint_frequency, filters.min_joint)
                && passes_min(distance, filters.min_distance.map(|d| d as f64))
                && filters
                    .max_distance
                    .map_or(true, |max| distance.map_or(false, |d| d <= max as f64))
        });
        if candidates.is_empty() && before > 0 {
            return PairTableOutcome::NoThresholdMatch;
        }
    }

    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    candidates.truncate(n);
    PairTableOutcome::Matched(candidates.into_iter().map(|(_, row)| row).collect())
}

fn ordered_pair(a: &GeneKey, b: &GeneKey) -> (GeneKey, GeneKey) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::codeletion::{
        compute_codeletion_frequency, compute_conditional_codeletion,
        compute_deletion_frequencies,
    };
    use crate::data_handling::deletion_matrix::DeletionMatrix;
    use ndarray::array;

    fn key(symbol: &str, entrez: u32) -> GeneKey {
        GeneKey::new(symbol, entrez)
    }

    fn info(entrez: u32, symbol: &str, start: u64) -> GeneInfo {
        GeneInfo {
            entrez_gene_id: entrez,
            hugo_gene_symbol: symbol.to_string(),
            chromosome: "13".to_string(),
            start,
            end: start + 500,
            cytoband: "13q12".to_string(),
        }
    }

    /// BRCA2 and RB1 co-delete in 2/5 samples, MYC once alone, GHOST never.
    fn fixture() -> (LabeledMatrix, DeletionFrequencies, Vec<GenePairRecord>) {
        let data = array![
            [1u8, 1, 0, 0],
            [1, 1, 0, 0],
            [1, 0, 0, 0],
            [0, 0, 1, 0],
            [0, 1, 0, 0],
        ];
        let mat = DeletionMatrix::from_parts(
            (1..=5).map(|i| format!("S{i}")).collect(),
            vec![key("BRCA2", 675), key("RB1", 5925), key("MYC", 4609), key("GHOST", 9)],
            data,
        );
        let stats = compute_codeletion_frequency(&mat);
        let conditional = compute_conditional_codeletion(&stats.counts);
        let freqs = compute_deletion_frequencies(&mat);
        (conditional, freqs, stats.pairs)
    }

    fn metadata() -> Vec<GeneInfo> {
        vec![
            info(675, "BRCA2", 32_315_474),
            info(5925, "RB1", 48_303_748),
            info(4609, "MYC", 1_000_000),
            info(9, "GHOST", 2_000_000),
        ]
    }

    #[test]
    fn pairs_with_never_deleted_genes_are_skipped() {
        let (conditional, freqs, pairs) = fixture();
        let outcome = rank_gene_pairs(&conditional, &freqs, &pairs, None, 50, &PairFilters::default());
        let rows = match outcome {
            PairTableOutcome::Matched(rows) => rows,
            other => panic!("expected rows, got {other:?}"),
        };

        // GHOST never appears: 3 surviving pairs out of C(4,2) = 6.
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.gene_a.symbol != "GHOST" && r.gene_b.symbol != "GHOST"));
        // Strongest conditional direction first: BRCA2/RB1 dominate.
        let top = &rows[0];
        assert_eq!(
            (top.gene_a.symbol.as_str(), top.gene_b.symbol.as_str()),
            ("BRCA2", "RB1")
        );
    }

    #[test]
    fn distance_annotation_requires_both_positions() {
        let (conditional, freqs, pairs) = fixture();
        let meta = vec![info(675, "BRCA2", 100), info(5925, "RB1", 600)];
        let outcome = rank_gene_pairs(&conditional, &freqs, &pairs, Some(&meta), 50, &PairFilters::default());
        let rows = match outcome {
            PairTableOutcome::Matched(rows) => rows,
            other => panic!("expected rows, got {other:?}"),
        };

        for row in &rows {
            if row.gene_a.symbol == "BRCA2" && row.gene_b.symbol == "RB1" {
                assert_eq!(row.distance_bp, Some(500));
            } else {
                assert_eq!(row.distance_bp, None);
            }
        }
    }

    #[test]
    fn joint_frequency_is_symmetric_lookup() {
        let (conditional, freqs, pairs) = fixture();
        let outcome = rank_gene_pairs(&conditional, &freqs, &pairs, None, 50, &PairFilters::default());
        let PairTableOutcome::Matched(rows) = outcome else {
            panic!("expected rows");
        };
        let brca_rb1 = rows
            .iter()
            .find(|r| r.gene_a.symbol == "BRCA2" && r.gene_b.symbol == "RB1")
            .unwrap();
        assert_eq!(brca_rb1.joint_frequency, Some(0.4));
    }

    #[test]
    fn gene_filter_is_case_insensitive_and_reported_when_empty() {
        let (conditional, freqs, pairs) = fixture();

        let filters = PairFilters {
            gene_filter: Some("brca".to_string()),
            ..Default::default()
        };
        let PairTableOutcome::Matched(rows) =
            rank_gene_pairs(&conditional, &freqs, &pairs, None, 50, &filters)
        else {
            panic!("expected rows");
        };
        assert!(!rows.is_empty());
        assert!(rows
            .iter()
            .all(|r| r.gene_a.symbol.contains("BRCA") || r.gene_b.symbol.contains("BRCA")));

        let filters = PairFilters {
            gene_filter: Some("ZZZ9".to_string()),
            ..Default::default()
        };
        let outcome = rank_gene_pairs(&conditional, &freqs, &pairs, None, 50, &filters);
        assert!(matches!(outcome, PairTableOutcome::NoGeneMatch));
    }

    #[test]
    fn numeric_thresholds_and_combine_and_report_empty() {
        let (conditional, freqs, pairs) = fixture();

        // Joint >= 0.4 keeps only BRCA2/RB1.
        let filters = PairFilters {
            min_joint: Some(0.4),
            ..Default::default()
        };
        let PairTableOutcome::Matched(rows) =
            rank_gene_pairs(&conditional, &freqs, &pairs, None, 50, &filters)
        else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);

        // Adding an unsatisfiable distance bound on top empties the table.
        let filters = PairFilters {
            min_joint: Some(0.4),
            min_distance: Some(1),
            ..Default::default()
        };
        let outcome = rank_gene_pairs(&conditional, &freqs, &pairs, None, 50, &filters);
        assert!(matches!(outcome, PairTableOutcome::NoThresholdMatch));

        // With metadata the same bound is satisfiable again.
        let outcome = rank_gene_pairs(&conditional, &freqs, &pairs, Some(&metadata()), 50, &filters);
        assert!(matches!(outcome, PairTableOutcome::Matched(rows) if rows.len() == 1));
    }

    #[test]
    fn truncates_to_requested_count_after_filtering() {
        let (conditional, freqs, pairs) = fixture();
        let PairTableOutcome::Matched(rows) =
            rank_gene_pairs(&conditional, &freqs, &pairs, None, 1, &PairFilters::default())
        else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
    }
}
