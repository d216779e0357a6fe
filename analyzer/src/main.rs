use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::df;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::codeletion::{
    compute_codeletion_frequency, compute_conditional_codeletion, compute_deletion_frequencies,
    dataset_stats, get_top_codeleted_pairs,
};
use crate::analysis::gene_pairs::{rank_gene_pairs, PairFilters, PairTableOutcome};
use crate::analysis::synthetic_lethality::{
    calculate_hit_frequency, compare_across_studies, filter_opportunities, summarize_pairs,
    EssentialityFilter, ALL_CHROMOSOMES, DEFAULT_MIN_DELETION_FREQ,
};
use crate::data_handling::cna_calls::{read_cna_calls, read_gene_metadata};
use crate::data_handling::deletion_matrix::{build_deletion_matrix, DEFAULT_DELETION_CUTOFF};
use crate::data_handling::processed_store::{MatrixKind, ProcessedStore};
use crate::data_handling::sl_catalog::{load_synthetic_lethal_data, SlFilters};
use crate::helper_functions::{dataframe_to_csv, project_root, read_csv};
use crate::models::{AnalysisError, AnalysisResult};

mod analysis;
mod data_handling;
mod helper_functions;
mod models;

/// Chromosome featured in the per-study top-pairs report.
const REPORT_CHROMOSOME: &str = "13";
const TOP_PAIRS_REPORT_SIZE: usize = 20;

#[derive(Debug, Serialize)]
struct StudyOutcome {
    study_id: String,
    success: bool,
    n_chromosomes: usize,
    n_samples_max: usize,
    n_genes: usize,
    n_calls: usize,
    error: Option<String>,
}

struct ChromosomeStats {
    n_samples: usize,
    n_genes: usize,
    n_calls: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting co-deletion batch analysis");

    let root = project_root();
    let study_list_path = env::args()
        .nth(1)
        .unwrap_or_else(|| {
            root.join("data/curated_data/TCGA_study_names.csv")
                .to_string_lossy()
                .into_owned()
        });
    let raw_root = root.join("data/raw");
    let store = ProcessedStore::new(root.join("data/processed"));

    let study_ids = read_study_list(&study_list_path)
        .with_context(|| format!("reading study list from {study_list_path}"))?;
    info!("Found {} studies to process", study_ids.len());

    let mut outcomes = Vec::with_capacity(study_ids.len());
    for (idx, study_id) in study_ids.iter().enumerate() {
        info!("[{}/{}] Processing {}", idx + 1, study_ids.len(), study_id);
        outcomes.push(process_study(study_id, &raw_root, &store));
    }

    let n_ok = outcomes.iter().filter(|o| o.success).count();
    info!(
        "Batch complete: {} succeeded, {} failed",
        n_ok,
        outcomes.len() - n_ok
    );
    for outcome in outcomes.iter().filter(|o| !o.success) {
        warn!(
            "  {} failed: {}",
            outcome.study_id,
            outcome.error.as_deref().unwrap_or("unknown")
        );
    }

    let summary_path = store.root().join("processing_summary.json");
    serde_json::to_writer_pretty(
        File::create(&summary_path)
            .with_context(|| format!("creating {}", summary_path.display()))?,
        &outcomes,
    )?;
    info!("Summary report saved to {}", summary_path.display());

    for outcome in outcomes.iter().filter(|o| o.success) {
        match write_top_pairs_report(&store, &outcome.study_id, REPORT_CHROMOSOME) {
            Ok(()) => {}
            // Studies without the report chromosome simply have no report.
            Err(AnalysisError::FrequenciesNotFound { .. }) => {}
            Err(e) => warn!("  {}: top-pairs report failed: {}", outcome.study_id, e),
        }
    }

    // Target-discovery phase: join processed deletions with the SL catalog.
    let sl_path = env::var("SL_DATA_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        root.join("data/synthetic_lethality/SyntheticLethalData.csv")
    });
    if !sl_path.exists() {
        warn!(
            "Synthetic lethality catalog not found at {}, skipping target discovery",
            sl_path.display()
        );
        return Ok(());
    }

    let observations = load_synthetic_lethal_data(&sl_path.to_string_lossy(), &SlFilters::default())?;
    let sl_pairs = summarize_pairs(&observations);
    let hit_frequencies = calculate_hit_frequency(&observations);
    info!(
        "SL catalog: {} observations across {} unique pairs",
        observations.len(),
        sl_pairs.len()
    );

    let processed_studies: Vec<String> = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| o.study_id.clone())
        .collect();
    let opportunities = compare_across_studies(
        &store,
        &processed_studies,
        &sl_pairs,
        Some(&hit_frequencies),
        DEFAULT_MIN_DELETION_FREQ,
    );

    if opportunities.is_empty() {
        info!("No therapeutic opportunities matched the current thresholds");
    } else {
        let path = store.save_opportunities(&opportunities)?;
        let essential =
            filter_opportunities(&opportunities, EssentialityFilter::EssentialOnly, None);
        info!(
            "{} therapeutic opportunities ({} with common-essential targets) saved to {}",
            opportunities.len(),
            essential.len(),
            path.display()
        );
    }

    Ok(())
}

/// Ranked gene-pair report for one chromosome of a processed study, built
/// from the persisted tables the way a dashboard consumer would.
fn write_top_pairs_report(
    store: &ProcessedStore,
    study_id: &str,
    chromosome: &str,
) -> AnalysisResult<()> {
    let frequencies = store.load_deletion_frequencies(study_id, chromosome)?;
    let conditional = store.load_conditional_matrix(study_id, chromosome)?;
    let pairs = store.load_codeletion_pairs(study_id, chromosome)?;
    let metadata = store.load_gene_metadata(study_id, chromosome)?;

    let rows = match rank_gene_pairs(
        &conditional,
        &frequencies,
        &pairs,
        Some(&metadata),
        TOP_PAIRS_REPORT_SIZE,
        &PairFilters::default(),
    ) {
        PairTableOutcome::Matched(rows) => rows,
        PairTableOutcome::NoGeneMatch => {
            info!("  {} chr{}: no pairs matched the gene filter", study_id, chromosome);
            return Ok(());
        }
        PairTableOutcome::NoThresholdMatch => {
            info!(
                "  {} chr{}: no pairs satisfied the numeric thresholds",
                study_id, chromosome
            );
            return Ok(());
        }
    };
    if rows.is_empty() {
        info!("  {} chr{}: no rankable pairs", study_id, chromosome);
        return Ok(());
    }

    let mut df = df![
        "gene_a" => rows.iter().map(|r| r.gene_a.to_string()).collect::<Vec<_>>(),
        "gene_b" => rows.iter().map(|r| r.gene_b.to_string()).collect::<Vec<_>>(),
        "freq_a" => rows.iter().map(|r| r.freq_a).collect::<Vec<_>>(),
        "freq_b" => rows.iter().map(|r| r.freq_b).collect::<Vec<_>>(),
        "p_a_given_b" => rows.iter().map(|r| r.p_a_given_b).collect::<Vec<_>>(),
        "p_b_given_a" => rows.iter().map(|r| r.p_b_given_a).collect::<Vec<_>>(),
        "joint_frequency" => rows.iter().map(|r| r.joint_frequency).collect::<Vec<_>>(),
        "distance_bp" => rows.iter().map(|r| r.distance_bp.map(|d| d as i64)).collect::<Vec<_>>(),
    ]?;
    let path = store
        .root()
        .join(study_id)
        .join(format!("chr{chromosome}_top_pairs.csv"));
    dataframe_to_csv(&mut df, &path.to_string_lossy())?;
    info!("  {}: top-pairs report written to {}", study_id, path.display());
    Ok(())
}

fn read_study_list(path: &str) -> Result<Vec<String>> {
    let df = read_csv(path)?;
    let column = df.column("TCGA_study")?.str()?;
    Ok(column.into_no_null_iter().map(String::from).collect())
}

/// Process every chromosome of one study that has raw data on disk. A
/// failing chromosome (too few samples, bad file) is logged and skipped; the
/// study fails only when no chromosome could be processed at all.
fn process_study(study_id: &str, raw_root: &Path, store: &ProcessedStore) -> StudyOutcome {
    let mut outcome = StudyOutcome {
        study_id: study_id.to_string(),
        success: false,
        n_chromosomes: 0,
        n_samples_max: 0,
        n_genes: 0,
        n_calls: 0,
        error: None,
    };

    let study_raw = raw_root.join(study_id);
    if !study_raw.is_dir() {
        outcome.error = Some(format!("no raw data directory at {}", study_raw.display()));
        error!("  {}", outcome.error.as_deref().unwrap());
        return outcome;
    }

    let mut last_error = None;
    for chromosome in ALL_CHROMOSOMES {
        let calls_path = study_raw.join(format!("chr{chromosome}_cna_calls.csv"));
        if !calls_path.exists() {
            continue;
        }
        match process_chromosome(study_id, chromosome, &study_raw, store) {
            Ok(stats) => {
                outcome.n_chromosomes += 1;
                outcome.n_samples_max = outcome.n_samples_max.max(stats.n_samples);
                outcome.n_genes += stats.n_genes;
                outcome.n_calls += stats.n_calls;
            }
            Err(e) => {
                warn!("  chr{} skipped: {}", chromosome, e);
                last_error = Some(e.to_string());
            }
        }
    }

    if outcome.n_chromosomes > 0 {
        outcome.success = true;
        info!(
            "  {}: {} chromosomes, {} genes, {} calls",
            study_id, outcome.n_chromosomes, outcome.n_genes, outcome.n_calls
        );
    } else {
        outcome.error = Some(last_error.unwrap_or_else(|| "no chromosome data found".to_string()));
        error!("  {} produced no results: {}", study_id, outcome.error.as_deref().unwrap());
    }
    outcome
}

fn process_chromosome(
    study_id: &str,
    chromosome: &str,
    study_raw: &Path,
    store: &ProcessedStore,
) -> AnalysisResult<ChromosomeStats> {
    let calls = read_cna_calls(&study_raw.join(format!("chr{chromosome}_cna_calls.csv")))?;
    let genes = read_gene_metadata(&study_raw.join(format!("chr{chromosome}_genes.csv")))?;

    let matrix = build_deletion_matrix(&calls, &genes, DEFAULT_DELETION_CUTOFF)?;
    let stats = compute_codeletion_frequency(&matrix);
    let conditional = compute_conditional_codeletion(&stats.counts);
    let frequencies = compute_deletion_frequencies(&matrix);

    let summary = dataset_stats(&stats.frequency);
    info!(
        "  chr{}: {} samples, {} genes ({} with deletions, max frequency {:.3})",
        chromosome,
        matrix.n_samples(),
        summary.n_genes,
        summary.n_genes_with_deletions,
        summary.max_deletion_frequency
    );
    if let Some(top) = get_top_codeleted_pairs(&stats.pairs, 1).first() {
        info!(
            "  chr{}: strongest pair {} / {} at {:.3}",
            chromosome, top.gene_a, top.gene_b, top.co_deletion_frequency
        );
    }

    store.save_gene_metadata(study_id, chromosome, &genes)?;
    store.save_matrix(study_id, chromosome, MatrixKind::Frequency, &stats.frequency)?;
    store.save_matrix(study_id, chromosome, MatrixKind::Counts, &stats.counts)?;
    store.save_matrix(study_id, chromosome, MatrixKind::Conditional, &conditional)?;
    store.save_codeletion_pairs(study_id, chromosome, &stats.pairs)?;
    store.save_deletion_frequencies(study_id, chromosome, &frequencies)?;

    Ok(ChromosomeStats {
        n_samples: matrix.n_samples(),
        n_genes: matrix.n_genes(),
        n_calls: calls.len(),
    })
}
