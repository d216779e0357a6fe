use std::collections::{BTreeSet, HashMap, HashSet};

use ndarray::Array2;
use tracing::{debug, info};

use crate::models::{AnalysisError, AnalysisResult, CnaCall, GeneInfo, GeneKey};

/// Alterations at or below this GISTIC value count as deleted
/// (-1 = shallow deletion, -2 = deep deletion).
pub const DEFAULT_DELETION_CUTOFF: i8 = -1;

/// Cohorts smaller than this produce unreliable frequency estimates and are
/// rejected at construction time.
pub const MIN_VIABLE_SAMPLES: usize = 10;

/// Binary samples x genes deletion matrix. Rows are sample identifiers in
/// sorted order, columns are genes in chromosomal-position order. Values are
/// 0/1 and the matrix is immutable once built.
#[derive(Debug, Clone)]
pub struct DeletionMatrix {
    samples: Vec<String>,
    genes: Vec<GeneKey>,
    data: Array2<u8>,
}

impl DeletionMatrix {
    /// Assemble a matrix from parts. Intended for the builder and for
    /// in-memory construction in tests; shape must match the labels.
    pub fn from_parts(samples: Vec<String>, genes: Vec<GeneKey>, data: Array2<u8>) -> Self {
        assert_eq!(data.nrows(), samples.len(), "row count must match samples");
        assert_eq!(data.ncols(), genes.len(), "column count must match genes");
        DeletionMatrix {
            samples,
            genes,
            data,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn genes(&self) -> &[GeneKey] {
        &self.genes
    }

    pub fn data(&self) -> &Array2<u8> {
        &self.data
    }

    /// Restrict the matrix to genes whose symbol is in `symbols`, preserving
    /// column order.
    pub fn select_genes_by_symbol(&self, symbols: &HashSet<String>) -> DeletionMatrix {
        let keep: Vec<usize> = self
            .genes
            .iter()
            .enumerate()
            .filter(|(_, g)| symbols.contains(&g.symbol))
            .map(|(idx, _)| idx)
            .collect();

        let genes: Vec<GeneKey> = keep.iter().map(|&idx| self.genes[idx].clone()).collect();
        let data = Array2::from_shape_fn((self.samples.len(), keep.len()), |(i, k)| {
            self.data[[i, keep[k]]]
        });

        DeletionMatrix {
            samples: self.samples.clone(),
            genes,
            data,
        }
    }
}

/// Build a binary deletion matrix from raw CNA calls.
///
/// A gene is deleted in a sample when any call for that (sample, gene) pair
/// has `alteration <= deletion_cutoff`; multiple calls OR together. Every
/// sample that appears in `calls` gets a row, whether or not anything was
/// deleted in it. Columns follow `gene_map` order exactly, with all-zero
/// columns for genes that never appear in the calls. Calls for genes outside
/// `gene_map` are ignored.
pub fn build_deletion_matrix(
    calls: &[CnaCall],
    gene_map: &[GeneInfo],
    deletion_cutoff: i8,
) -> AnalysisResult<DeletionMatrix> {
    let sample_ids: BTreeSet<&str> = calls.iter().map(|c| c.sample_id.as_str()).collect();
    let n_samples = sample_ids.len();
    if n_samples < MIN_VIABLE_SAMPLES {
        return Err(AnalysisError::InsufficientSamples {
            n_samples,
            min_required: MIN_VIABLE_SAMPLES,
        });
    }

    let sample_index: HashMap<&str, usize> = sample_ids
        .iter()
        .enumerate()
        .map(|(idx, &s)| (s, idx))
        .collect();

    // First occurrence wins for duplicate Entrez IDs, matching the metadata
    // reader's dedup policy.
    let mut gene_index: HashMap<u32, usize> = HashMap::new();
    let mut genes: Vec<GeneKey> = Vec::with_capacity(gene_map.len());
    for info in gene_map {
        if gene_index.contains_key(&info.entrez_gene_id) {
            continue;
        }
        gene_index.insert(info.entrez_gene_id, genes.len());
        genes.push(info.key());
    }

    let mut data = Array2::<u8>::zeros((n_samples, genes.len()));
    let mut n_dropped = 0usize;
    for call in calls {
        let Some(&gene_idx) = gene_index.get(&call.entrez_gene_id) else {
            n_dropped += 1;
            continue;
        };
        if call.alteration <= deletion_cutoff {
            let sample_idx = sample_index[call.sample_id.as_str()];
            data[[sample_idx, gene_idx]] = 1;
        }
    }
    if n_dropped > 0 {
        debug!("Dropped {} calls for genes outside the supplied gene map", n_dropped);
    }

    info!(
        "Built deletion matrix: {} samples x {} genes",
        n_samples,
        genes.len()
    );

    Ok(DeletionMatrix::from_parts(
        sample_ids.into_iter().map(String::from).collect(),
        genes,
        data,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
