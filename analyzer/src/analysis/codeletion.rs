//! Co-deletion frequency and conditional-probability computation.
//!
//! All pairwise statistics derive from the matrix product `X^T * X` of the
//! binary deletion matrix, never from nested gene-pair loops: chromosome-wide
//! inputs reach ~20k genes and quadratic scans over column pairs are the main
//! performance trap here.

use std::collections::HashMap;

use ndarray::{Array2, Axis};
use ndarray_stats::QuantileExt;
use polars::prelude::*;

use crate::data_handling::deletion_matrix::DeletionMatrix;
use crate::models::{AnalysisError, AnalysisResult, GeneKey, GenePairRecord};

/// Square genes x genes matrix with a label index on both axes.
///
/// Conditional-probability matrices store `f64::NAN` for undefined entries
/// (denominator gene never deleted); consumers must treat NaN as "undefined",
/// never as zero.
#[derive(Debug, Clone)]
pub struct LabeledMatrix {
    genes: Vec<GeneKey>,
    index: HashMap<GeneKey, usize>,
    data: Array2<f64>,
}

impl LabeledMatrix {
    pub fn new(genes: Vec<GeneKey>, data: Array2<f64>) -> Self {
        assert_eq!(data.nrows(), data.ncols(), "matrix must be square");
        assert_eq!(data.nrows(), genes.len(), "shape must match labels");
        let index = genes
            .iter()
            .enumerate()
            .map(|(idx, g)| (g.clone(), idx))
            .collect();
        LabeledMatrix { genes, index, data }
    }

    pub fn genes(&self) -> &[GeneKey] {
        &self.genes
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn value_at(&self, row: usize, col: usize) -> f64 {
        self.data[[row, col]]
    }

    /// Look up an entry by gene keys; `None` when either gene is absent.
    pub fn get(&self, row: &GeneKey, col: &GeneKey) -> Option<f64> {
        let i = *self.index.get(row)?;
        let j = *self.index.get(col)?;
        Some(self.data[[i, j]])
    }

    /// Render as a row-labeled, column-headed table for export: a leading
    /// `gene` column followed by one f64 column per gene.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let labels: Vec<String> = self.genes.iter().map(|g| g.to_string()).collect();
        let mut columns: Vec<Column> = Vec::with_capacity(self.genes.len() + 1);
        columns.push(Column::new("gene".into(), &labels));
        for (j, label) in labels.iter().enumerate() {
            let values: Vec<f64> = self.data.column(j).to_vec();
            columns.push(Column::new(label.as_str().into(), values));
        }
        DataFrame::new(columns)
    }

    /// Rebuild from a table produced by [`to_dataframe`]. Row labels are
    /// authoritative for axis order; columns are fetched by label.
    pub fn from_dataframe(df: &DataFrame) -> AnalysisResult<LabeledMatrix> {
        let label_col = df.column("gene")?.str()?;
        let mut genes = Vec::with_capacity(df.height());
        for idx in 0..label_col.len() {
            let label = label_col.get(idx).unwrap_or("");
            let key = GeneKey::parse(label).ok_or_else(|| {
                AnalysisError::MalformedTable(format!("unparseable gene label '{label}'"))
            })?;
            genes.push(key);
        }

        let n = genes.len();
        let mut data = Array2::<f64>::zeros((n, n));
        for (j, gene) in genes.iter().enumerate() {
            let col = df.column(&gene.to_string())?.cast(&DataType::Float64)?;
            let col = col.f64()?;
            for i in 0..n {
                data[[i, j]] = col.get(i).unwrap_or(f64::NAN);
            }
        }
        Ok(LabeledMatrix::new(genes, data))
    }
}

/// Per-gene marginal deletion rates, kept sorted descending for presentation
/// with a keyed index for lookups.
#[derive(Debug, Clone)]
pub struct DeletionFrequencies {
    entries: Vec<(GeneKey, f64)>,
    by_gene: HashMap<GeneKey, f64>,
}

impl DeletionFrequencies {
    pub fn from_entries(mut entries: Vec<(GeneKey, f64)>) -> Self {
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        let by_gene = entries.iter().map(|(g, f)| (g.clone(), *f)).collect();
        DeletionFrequencies { entries, by_gene }
    }

    pub fn get(&self, gene: &GeneKey) -> Option<f64> {
        self.by_gene.get(gene).copied()
    }

    /// Entries in descending frequency order.
    pub fn iter(&self) -> impl Iterator<Item = &(GeneKey, f64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_frequency(&self) -> Option<f64> {
        self.entries.first().map(|(_, f)| *f)
    }
}

/// Joint and marginal co-deletion statistics for one deletion matrix.
#[derive(Debug, Clone)]
pub struct CodeletionStats {
    /// Fraction of samples with both genes deleted; symmetric.
    pub frequency: LabeledMatrix,
    /// Raw co-deletion sample counts; the diagonal carries each gene's
    /// individual deletion count and is the conditional-probability
    /// denominator.
    pub counts: LabeledMatrix,
    /// One row per unordered pair from the strict upper triangle.
    pub pairs: Vec<GenePairRecord>,
}

/// Compute co-deletion counts and frequencies for all gene pairs.
///
/// `counts[i, j] = (X^T X)[i, j]` is the number of samples where both genes
/// are deleted; `frequency = counts / n_samples`.
pub fn compute_codeletion_frequency(mat: &DeletionMatrix) -> CodeletionStats {
    let n = mat.n_samples() as f64;
    let x = mat.data().mapv(|v| v as f64);
    let counts = x.t().dot(&x);
    let frequency = &counts / n;

    let genes = mat.genes();
    let mut pairs = Vec::with_capacity(genes.len() * genes.len().saturating_sub(1) / 2);
    for i in 0..genes.len() {
        for j in (i + 1)..genes.len() {
            pairs.push(GenePairRecord {
                gene_a: genes[i].clone(),
                gene_b: genes[j].clone(),
                co_deletion_frequency: frequency[[i, j]],
            });
        }
    }

    CodeletionStats {
        frequency: LabeledMatrix::new(genes.to_vec(), frequency),
        counts: LabeledMatrix::new(genes.to_vec(), counts),
        pairs,
    }
}

/// Conditional co-deletion probabilities `P(i | j) = counts[i, j] / counts[j, j]`.
///
/// Not symmetric. A gene that is never deleted has an undefined denominator:
/// its entire column becomes NaN rather than 0, since "denominator undefined"
/// and "never co-occurs" are different statements.
pub fn compute_conditional_codeletion(counts: &LabeledMatrix) -> LabeledMatrix {
    let mut data = counts.data().clone();
    for j in 0..counts.n_genes() {
        let diagonal = counts.value_at(j, j);
        let mut column = data.column_mut(j);
        if diagonal == 0.0 {
            column.fill(f64::NAN);
        } else {
            column.mapv_inplace(|v| v / diagonal);
        }
    }
    LabeledMatrix::new(counts.genes().to_vec(), data)
}

/// Top `n` pairs by joint frequency, descending. Stable: ties keep the
/// upper-triangle iteration order of the input.
pub fn get_top_codeleted_pairs(pairs: &[GenePairRecord], n: usize) -> Vec<GenePairRecord> {
    let mut ranked = pairs.to_vec();
    ranked.sort_by(|a, b| b.co_deletion_frequency.total_cmp(&a.co_deletion_frequency));
    ranked.truncate(n);
    ranked
}

/// Per-gene marginal deletion frequency (column means of the binary matrix).
pub fn compute_deletion_frequencies(mat: &DeletionMatrix) -> DeletionFrequencies {
    let means = mat
        .data()
        .mapv(|v| v as f64)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| ndarray::Array1::zeros(mat.n_genes()));

    let entries = mat
        .genes()
        .iter()
        .cloned()
        .zip(means.iter().copied())
        .collect();
    DeletionFrequencies::from_entries(entries)
}

/// Headline numbers for one processed (study, chromosome) unit.
#[derive(Debug, Clone, Copy)]
pub struct DatasetStats {
    pub n_genes: usize,
    pub n_genes_with_deletions: usize,
    pub max_deletion_frequency: f64,
}

pub fn dataset_stats(frequency: &LabeledMatrix) -> DatasetStats {
    let diagonal = frequency.data().diag();
    let n_genes_with_deletions = diagonal.iter().filter(|&&v| v > 0.0).count();
    let max_deletion_frequency = diagonal.max().map(|v| *v).unwrap_or(0.0);
    DatasetStats {
        n_genes: frequency.n_genes(),
        n_genes_with_deletions,
        max_deletion_frequency,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
