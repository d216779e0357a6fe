//! Synthetic-lethality integration: genome-wide deletion aggregation, the
//! bidirectional deletion/SL join, therapeutic scoring, and cross-study
//! comparison.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::data_handling::processed_store::ProcessedStore;
use crate::data_handling::sl_catalog::{SlObservation, CELL_LINE_PANEL_SIZE, DEPMAP_TOTAL_LINES};
use crate::models::{AnalysisError, AnalysisResult, GeneDeletion, Opportunity};

/// Deleted genes below this cohort frequency are not worth targeting.
pub const DEFAULT_MIN_DELETION_FREQ: f64 = 0.05;

pub const ALL_CHROMOSOMES: [&str; 24] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y",
];

/// One SL pair collapsed across its validating cell lines: mean GI score,
/// the most significant FDR, and first-seen annotations per side.
#[derive(Debug, Clone)]
pub struct SlPairSummary {
    pub sorted_gene_pair: String,
    pub gene_a: String,
    pub gene_b: String,
    pub mean_gi: f64,
    pub min_fdr: f64,
    pub a_is_common_essential: bool,
    pub b_is_common_essential: bool,
    pub a_depmap_dependent_lines: u32,
    pub b_depmap_dependent_lines: u32,
}

/// Validation breadth of one SL pair across the screen's cell-line panel.
#[derive(Debug, Clone)]
pub struct HitFrequency {
    pub sorted_gene_pair: String,
    pub hit_count: u32,
    pub hit_fraction: f64,
    pub cell_lines_validated: String,
    pub cancer_types_validated: String,
}

/// Collapse per-cell-line observations into one summary per unordered pair.
pub fn summarize_pairs(observations: &[SlObservation]) -> Vec<SlPairSummary> {
    struct Accumulator<'a> {
        first: &'a SlObservation,
        gi_sum: f64,
        n: usize,
        min_fdr: f64,
    }

    let mut grouped: BTreeMap<&str, Accumulator> = BTreeMap::new();
    for obs in observations {
        grouped
            .entry(obs.sorted_gene_pair.as_str())
            .and_modify(|acc| {
                acc.gi_sum += obs.mean_norm_gi;
                acc.n += 1;
                acc.min_fdr = acc.min_fdr.min(obs.fdr);
            })
            .or_insert(Accumulator {
                first: obs,
                gi_sum: obs.mean_norm_gi,
                n: 1,
                min_fdr: obs.fdr,
            });
    }

    grouped
        .into_values()
        .map(|acc| SlPairSummary {
            sorted_gene_pair: acc.first.sorted_gene_pair.clone(),
            gene_a: acc.first.target_a.clone(),
            gene_b: acc.first.target_b.clone(),
            mean_gi: acc.gi_sum / acc.n as f64,
            min_fdr: acc.min_fdr,
            a_is_common_essential: acc.first.a_is_common_essential,
            b_is_common_essential: acc.first.b_is_common_essential,
            a_depmap_dependent_lines: acc.first.a_depmap_dependent_lines,
            b_depmap_dependent_lines: acc.first.b_depmap_dependent_lines,
        })
        .collect()
}

/// Count the distinct cell lines validating each pair, as a count and as a
/// fraction of the fixed screen panel. Label lists are distinct, sorted, and
/// comma-joined.
pub fn calculate_hit_frequency(observations: &[SlObservation]) -> Vec<HitFrequency> {
    let mut grouped: BTreeMap<&str, (BTreeSet<&str>, BTreeSet<&str>)> = BTreeMap::new();
    for obs in observations {
        let entry = grouped.entry(obs.sorted_gene_pair.as_str()).or_default();
        entry.0.insert(obs.cell_line_label.as_str());
        entry.1.insert(obs.cancer_type.as_str());
    }

    grouped
        .into_iter()
        .map(|(pair, (cell_lines, cancer_types))| {
            let hit_count = cell_lines.len() as u32;
            HitFrequency {
                sorted_gene_pair: pair.to_string(),
                hit_count,
                hit_fraction: hit_count as f64 / CELL_LINE_PANEL_SIZE as f64,
                cell_lines_validated: cell_lines.into_iter().collect::<Vec<_>>().join(","),
                cancer_types_validated: cancer_types.into_iter().collect::<Vec<_>>().join(","),
            }
        })
        .collect()
}

/// Composite therapeutic-opportunity score:
/// `deletion_frequency * |gi_score| * essentiality_weight * context_weight`.
///
/// Essentiality weight: 2.0 for common-essential targets, 1.5 when more than
/// half the DepMap panel depends on the target, else 1.0. Context weight maps
/// validation breadth onto [0.5, 2.0]; without hit data it is neutral (1.0).
pub fn calculate_therapeutic_score(
    deletion_frequency: f64,
    gi_score: f64,
    target_is_common_essential: bool,
    target_depmap_dependent_lines: u32,
    hit_fraction: Option<f64>,
) -> f64 {
    let essentiality_weight = if target_is_common_essential {
        2.0
    } else if target_depmap_dependent_lines as f64 / DEPMAP_TOTAL_LINES as f64 > 0.5 {
        1.5
    } else {
        1.0
    };
    let context_weight = hit_fraction.map_or(1.0, |h| 0.5 + h * 1.5);
    deletion_frequency * gi_score.abs() * essentiality_weight * context_weight
}

/// Load marginal deletion frequencies for every chromosome of a study and
/// concatenate them into one gene -> frequency table. A chromosome with no
/// processed data is skipped; any other failure aborts the aggregation.
pub fn aggregate_deletions_genome_wide(
    store: &ProcessedStore,
    study_id: &str,
    chromosomes: Option<&[&str]>,
) -> AnalysisResult<Vec<GeneDeletion>> {
    let chromosomes = chromosomes.unwrap_or(&ALL_CHROMOSOMES);

    let mut deletions = Vec::new();
    for &chromosome in chromosomes {
        match store.load_deletion_frequencies(study_id, chromosome) {
            Ok(freqs) => {
                for (key, frequency) in freqs.iter() {
                    deletions.push(GeneDeletion {
                        symbol: key.symbol.clone(),
                        entrez: Some(key.entrez),
                        chromosome: chromosome.to_string(),
                        frequency: *frequency,
                    });
                }
            }
            Err(AnalysisError::FrequenciesNotFound { .. }) => {
                debug!("No processed data for {} chr{}, skipping", study_id, chromosome);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(deletions)
}

/// Join cohort deletion frequencies with the SL pair summaries into
/// directional therapeutic opportunities.
///
/// Each undirected pair is tried in both directions: a side whose gene has a
/// recorded deletion frequency `>= min_deletion_freq` emits one record with
/// the partner as the target, so a pair yields 0, 1, or 2 records. Output is
/// ordered by deletion frequency descending, then GI score ascending (more
/// negative GI = stronger synthetic-lethal signal).
pub fn join_deletion_with_synthetic_lethality(
    deletions: &[GeneDeletion],
    sl_pairs: &[SlPairSummary],
    hit_frequencies: Option<&[HitFrequency]>,
    min_deletion_freq: f64,
) -> Vec<Opportunity> {
    // First qualifying row per symbol wins, matching aggregation order.
    let mut frequency_by_symbol: HashMap<&str, f64> = HashMap::new();
    for deletion in deletions {
        if deletion.frequency >= min_deletion_freq {
            frequency_by_symbol
                .entry(deletion.symbol.as_str())
                .or_insert(deletion.frequency);
        }
    }

    let hits_by_pair: HashMap<&str, &HitFrequency> = hit_frequencies
        .unwrap_or(&[])
        .iter()
        .map(|h| (h.sorted_gene_pair.as_str(), h))
        .collect();

    let mut opportunities = Vec::new();
    for pair in sl_pairs {
        let hit = hits_by_pair.get(pair.sorted_gene_pair.as_str()).copied();
        for (deleted, target, target_essential, target_depmap) in [
            (&pair.gene_a, &pair.gene_b, pair.b_is_common_essential, pair.b_depmap_dependent_lines),
            (&pair.gene_b, &pair.gene_a, pair.a_is_common_essential, pair.a_depmap_dependent_lines),
        ] {
            let Some(&deletion_frequency) = frequency_by_symbol.get(deleted.as_str()) else {
                continue;
            };

            let (hit_count, hit_fraction, cancer_types) = match (hit_frequencies, hit) {
                (Some(_), Some(h)) => (
                    Some(h.hit_count),
                    Some(h.hit_fraction),
                    Some(h.cancer_types_validated.clone()),
                ),
                // Hit data supplied but this pair missing from it: lenient
                // zero-breadth default rather than dropping the opportunity.
                (Some(_), None) => (Some(0), Some(0.0), Some(String::new())),
                (None, _) => (None, None, None),
            };

            let therapeutic_score = calculate_therapeutic_score(
                deletion_frequency,
                pair.mean_gi,
                target_essential,
                target_depmap,
                hit_fraction,
            );

            opportunities.push(Opportunity {
                deleted_gene: deleted.clone(),
                target_gene: target.clone(),
                deletion_frequency,
                gi_score: pair.mean_gi,
                fdr: pair.min_fdr,
                target_is_common_essential: target_essential,
                target_depmap_dependent_lines: target_depmap,
                therapeutic_score,
                hit_count,
                hit_fraction,
                cancer_types_validated: cancer_types,
                study_id: None,
            });
        }
    }

    sort_opportunities(&mut opportunities);
    opportunities
}

/// Descending by deletion frequency, then ascending by GI score: frequency is
/// positive-is-better while GI is negative-is-better, so the two keys point
/// in opposite directions.
fn sort_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.deletion_frequency
            .total_cmp(&a.deletion_frequency)
            .then(a.gi_score.total_cmp(&b.gi_score))
    });
}

/// Run the deletion/SL join for several studies and concatenate the results,
/// tagged by study. A study that fails to aggregate is skipped with a
/// warning; it never aborts the rest of the batch.
pub fn compare_across_studies(
    store: &ProcessedStore,
    study_ids: &[String],
    sl_pairs: &[SlPairSummary],
    hit_frequencies: Option<&[HitFrequency]>,
    min_deletion_freq: f64,
) -> Vec<Opportunity> {
    let mut combined = Vec::new();
    for study_id in study_ids {
        let deletions = match aggregate_deletions_genome_wide(store, study_id, None) {
            Ok(deletions) => deletions,
            Err(e) => {
                warn!("Failed to process {}: {}", study_id, e);
                continue;
            }
        };
        let mut opportunities = join_deletion_with_synthetic_lethality(
            &deletions,
            sl_pairs,
            hit_frequencies,
            min_deletion_freq,
        );
        for opportunity in &mut opportunities {
            opportunity.study_id = Some(study_id.clone());
        }
        combined.extend(opportunities);
    }

    sort_opportunities(&mut combined);
    combined
}

/// Essentiality facet for post-hoc opportunity filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EssentialityFilter {
    All,
    EssentialOnly,
    NonEssentialOnly,
}

/// Post-hoc filters over a joined opportunity table. An empty result is a
/// valid outcome ("no opportunities matched"), not an error.
pub fn filter_opportunities(
    opportunities: &[Opportunity],
    essentiality: EssentialityFilter,
    min_therapeutic_score: Option<f64>,
) -> Vec<Opportunity> {
    opportunities
        .iter()
        .filter(|o| match essentiality {
            EssentialityFilter::All => true,
            EssentialityFilter::EssentialOnly => o.target_is_common_essential,
            EssentialityFilter::NonEssentialOnly => !o.target_is_common_essential,
        })
        .filter(|o| min_therapeutic_score.map_or(true, |min| o.therapeutic_score >= min))
        .cloned()
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(
        pair: &str,
        a: &str,
        b: &str,
        gi: f64,
        fdr: f64,
        cancer_type: &str,
        cell_line: &str,
    ) -> SlObservation {
        SlObservation {
            sorted_gene_pair: pair.to_string(),
            target_a: a.to_string(),
            target_b: b.to_string(),
            mean_norm_gi: gi,
            fdr,
            cancer_type: cancer_type.to_string(),
            cell_line_label: cell_line.to_string(),
            sgrna_group: "Paralog".to_string(),
            a_is_common_essential: false,
            b_is_common_essential: true,
            a_depmap_dependent_lines: 100,
            b_depmap_dependent_lines: 900,
        }
    }

    fn deletion(symbol: &str, chromosome: &str, frequency: f64) -> GeneDeletion {
        GeneDeletion {
            symbol: symbol.to_string(),
            entrez: Some(1),
            chromosome: chromosome.to_string(),
            frequency,
        }
    }

    #[test]
    fn summaries_use_mean_gi_and_most_significant_fdr() {
        let observations = vec![
            observation("A|B", "A", "B", -0.6, 0.04, "Melanoma", "A375"),
            observation("A|B", "A", "B", -1.0, 0.002, "NSCLC", "H1299"),
        ];
        let summaries = summarize_pairs(&observations);
        assert_eq!(summaries.len(), 1);
        assert!((summaries[0].mean_gi - (-0.8)).abs() < 1e-12);
        assert_eq!(summaries[0].min_fdr, 0.002);
    }

    #[test]
    fn hit_frequency_counts_distinct_cell_lines() {
        let observations = vec![
            observation("A|B", "A", "B", -0.5, 0.01, "Melanoma", "A375"),
            observation("A|B", "A", "B", -0.5, 0.01, "Melanoma", "A375"),
            observation("A|B", "A", "B", -0.5, 0.01, "NSCLC", "H1299"),
        ];
        let hits = calculate_hit_frequency(&observations);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hit_count, 2);
        assert!((hits[0].hit_fraction - 2.0 / 27.0).abs() < 1e-12);
        assert_eq!(hits[0].cell_lines_validated, "A375,H1299");
        assert_eq!(hits[0].cancer_types_validated, "Melanoma,NSCLC");
    }

    #[test]
    fn join_emits_one_direction_when_only_one_gene_is_deleted() {
        // TP53 deleted in 30% of the cohort, MDM2 never: exactly one
        // opportunity, TP53 deleted -> target MDM2.
        let observations = vec![observation("MDM2|TP53", "MDM2", "TP53", -0.8, 0.01, "NSCLC", "H1299")];
        let summaries = summarize_pairs(&observations);
        let deletions = vec![deletion("TP53", "17", 0.3), deletion("MDM2", "12", 0.0)];

        let opportunities =
            join_deletion_with_synthetic_lethality(&deletions, &summaries, None, 0.05);
        assert_eq!(opportunities.len(), 1);
        let opp = &opportunities[0];
        assert_eq!(opp.deleted_gene, "TP53");
        assert_eq!(opp.target_gene, "MDM2");
        assert_eq!(opp.deletion_frequency, 0.3);
        assert_eq!(opp.gi_score, -0.8);
        // Target side is MDM2 = targetA: non-essential, 100 dependent lines.
        assert!(!opp.target_is_common_essential);
        assert_eq!(opp.target_depmap_dependent_lines, 100);
        assert!(opp.hit_count.is_none());
    }

    #[test]
    fn join_emits_both_directions_with_swapped_annotations() {
        let observations = vec![observation("A|B", "A", "B", -0.5, 0.01, "Melanoma", "A375")];
        let summaries = summarize_pairs(&observations);
        let deletions = vec![deletion("A", "1", 0.4), deletion("B", "2", 0.2)];

        let opportunities =
            join_deletion_with_synthetic_lethality(&deletions, &summaries, None, 0.05);
        assert_eq!(opportunities.len(), 2);

        // Sorted by deletion frequency: A-deleted first.
        let a_deleted = &opportunities[0];
        let b_deleted = &opportunities[1];
        assert_eq!(a_deleted.deleted_gene, "A");
        assert_eq!(a_deleted.target_gene, "B");
        assert!(a_deleted.target_is_common_essential);
        assert_eq!(a_deleted.target_depmap_dependent_lines, 900);
        assert_eq!(b_deleted.deleted_gene, "B");
        assert_eq!(b_deleted.target_gene, "A");
        assert!(!b_deleted.target_is_common_essential);
        assert_eq!(b_deleted.target_depmap_dependent_lines, 100);
    }

    #[test]
    fn join_never_emits_below_the_frequency_threshold() {
        let observations = vec![observation("A|B", "A", "B", -0.5, 0.01, "Melanoma", "A375")];
        let summaries = summarize_pairs(&observations);
        let deletions = vec![deletion("A", "1", 0.04), deletion("B", "2", 0.01)];

        let opportunities =
            join_deletion_with_synthetic_lethality(&deletions, &summaries, None, 0.05);
        assert!(opportunities.is_empty());
    }

    #[test]
    fn join_orders_by_frequency_then_gi() {
        let observations = vec![
            observation("A|B", "A", "B", -0.2, 0.01, "Melanoma", "A375"),
            observation("C|D", "C", "D", -0.9, 0.01, "Melanoma", "A375"),
        ];
        let summaries = summarize_pairs(&observations);
        // A and C share the same deletion frequency; C's stronger (more
        // negative) GI must rank first.
        let deletions = vec![deletion("A", "1", 0.3), deletion("C", "3", 0.3)];

        let opportunities =
            join_deletion_with_synthetic_lethality(&deletions, &summaries, None, 0.05);
        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities[0].deleted_gene, "C");
        assert_eq!(opportunities[1].deleted_gene, "A");
    }

    #[test]
    fn hit_data_flows_into_opportunities_and_context_weight() {
        let observations = vec![
            observation("A|B", "A", "B", -0.5, 0.01, "Melanoma", "A375"),
            observation("A|B", "A", "B", -0.5, 0.01, "NSCLC", "H1299"),
        ];
        let summaries = summarize_pairs(&observations);
        let hits = calculate_hit_frequency(&observations);
        let deletions = vec![deletion("A", "1", 0.4)];

        let opportunities =
            join_deletion_with_synthetic_lethality(&deletions, &summaries, Some(&hits), 0.05);
        assert_eq!(opportunities.len(), 1);
        let opp = &opportunities[0];
        assert_eq!(opp.hit_count, Some(2));
        let hit_fraction = 2.0 / 27.0;
        assert!((opp.hit_fraction.unwrap() - hit_fraction).abs() < 1e-12);
        // Target B is common essential: weight 2.0; context from breadth.
        let expected = 0.4 * 0.5 * 2.0 * (0.5 + hit_fraction * 1.5);
        assert!((opp.therapeutic_score - expected).abs() < 1e-12);
    }

    #[test]
    fn score_is_monotone_in_frequency_and_gi_magnitude() {
        let base = calculate_therapeutic_score(0.2, -0.5, false, 0, None);
        assert!(calculate_therapeutic_score(0.3, -0.5, false, 0, None) >= base);
        assert!(calculate_therapeutic_score(0.2, -0.9, false, 0, None) >= base);
    }

    #[test]
    fn score_weights_essentiality_tiers() {
        let baseline = calculate_therapeutic_score(0.5, -1.0, false, 0, None);
        let dependent = calculate_therapeutic_score(0.5, -1.0, false, 600, None);
        let essential = calculate_therapeutic_score(0.5, -1.0, true, 0, None);
        assert!((baseline - 0.5).abs() < 1e-12);
        assert!((dependent - 0.75).abs() < 1e-12);
        assert!((essential - 1.0).abs() < 1e-12);
    }

    #[test]
    fn essentiality_and_score_filters_may_empty_the_table() {
        let observations = vec![observation("A|B", "A", "B", -0.5, 0.01, "Melanoma", "A375")];
        let summaries = summarize_pairs(&observations);
        let deletions = vec![deletion("A", "1", 0.4)];
        let opportunities =
            join_deletion_with_synthetic_lethality(&deletions, &summaries, None, 0.05);

        let essential_only =
            filter_opportunities(&opportunities, EssentialityFilter::EssentialOnly, None);
        assert_eq!(essential_only.len(), 1);

        let none =
            filter_opportunities(&opportunities, EssentialityFilter::NonEssentialOnly, None);
        assert!(none.is_empty());

        let none = filter_opportunities(&opportunities, EssentialityFilter::All, Some(1e9));
        assert!(none.is_empty());
    }
}
