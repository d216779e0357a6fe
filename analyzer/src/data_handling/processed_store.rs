//! Per-(study, chromosome) persistence for processed co-deletion results.
//!
//! One directory per study under the processed root, one CSV per table. The
//! layout is the contract between the batch driver and downstream consumers;
//! rendering these tables (spreadsheets, dashboards) happens elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use polars::df;
use polars::prelude::*;
use tracing::{info, warn};

use crate::analysis::codeletion::{DeletionFrequencies, LabeledMatrix};
use crate::helper_functions::{dataframe_to_csv, read_csv};
use crate::models::{
    AnalysisError, AnalysisResult, GeneInfo, GeneKey, GenePairRecord, Opportunity,
};

/// Maximum data rows a spreadsheet-bound export may carry (the common
/// 1,048,576-row sheet limit, minus the header).
pub const SPREADSHEET_ROW_LIMIT: usize = 1_048_575;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Frequency,
    Counts,
    Conditional,
}

impl MatrixKind {
    fn file_stem(self) -> &'static str {
        match self {
            MatrixKind::Frequency => "codeletion_matrix",
            MatrixKind::Counts => "codeletion_counts",
            MatrixKind::Conditional => "codeletion_conditional_frequencies",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedStore {
    root: PathBuf,
}

impl ProcessedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ProcessedStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn study_dir(&self, study_id: &str) -> PathBuf {
        self.root.join(study_id)
    }

    fn chromosome_file(&self, study_id: &str, chromosome: &str, stem: &str) -> PathBuf {
        self.study_dir(study_id)
            .join(format!("chr{chromosome}_{stem}.csv"))
    }

    pub fn save_matrix(
        &self,
        study_id: &str,
        chromosome: &str,
        kind: MatrixKind,
        matrix: &LabeledMatrix,
    ) -> AnalysisResult<()> {
        let path = self.chromosome_file(study_id, chromosome, kind.file_stem());
        let mut df = matrix.to_dataframe()?;
        dataframe_to_csv(&mut df, &path.to_string_lossy())?;
        Ok(())
    }

    pub fn load_matrix(
        &self,
        study_id: &str,
        chromosome: &str,
        kind: MatrixKind,
    ) -> AnalysisResult<LabeledMatrix> {
        let path = self.chromosome_file(study_id, chromosome, kind.file_stem());
        let df = read_csv(&path.to_string_lossy())?;
        LabeledMatrix::from_dataframe(&df)
    }

    pub fn load_conditional_matrix(
        &self,
        study_id: &str,
        chromosome: &str,
    ) -> AnalysisResult<LabeledMatrix> {
        self.load_matrix(study_id, chromosome, MatrixKind::Conditional)
    }

    /// Persist the long-form pair table, capped for spreadsheet consumers.
    /// Returns the number of rows written; truncation keeps the
    /// highest-frequency pairs and is logged.
    pub fn save_codeletion_pairs(
        &self,
        study_id: &str,
        chromosome: &str,
        pairs: &[GenePairRecord],
    ) -> AnalysisResult<usize> {
        let capped = cap_pairs(pairs, SPREADSHEET_ROW_LIMIT);
        if capped.len() < pairs.len() {
            warn!(
                "Pair table for {} chr{} truncated from {} to {} rows for export",
                study_id,
                chromosome,
                pairs.len(),
                capped.len()
            );
        }

        let gene_i: Vec<String> = capped.iter().map(|p| p.gene_a.to_string()).collect();
        let gene_j: Vec<String> = capped.iter().map(|p| p.gene_b.to_string()).collect();
        let frequency: Vec<f64> = capped.iter().map(|p| p.co_deletion_frequency).collect();
        let mut df = df![
            "gene_i" => gene_i,
            "gene_j" => gene_j,
            "co_deletion_frequency" => frequency,
        ]?;

        let path = self.chromosome_file(study_id, chromosome, "codeletion_frequencies");
        dataframe_to_csv(&mut df, &path.to_string_lossy())?;
        Ok(capped.len())
    }

    pub fn load_codeletion_pairs(
        &self,
        study_id: &str,
        chromosome: &str,
    ) -> AnalysisResult<Vec<GenePairRecord>> {
        let path = self.chromosome_file(study_id, chromosome, "codeletion_frequencies");
        let df = read_csv(&path.to_string_lossy())?;
        let gene_i = df.column("gene_i")?.str()?;
        let gene_j = df.column("gene_j")?.str()?;
        let frequency = df.column("co_deletion_frequency")?.cast(&DataType::Float64)?;
        let frequency = frequency.f64()?;

        let mut pairs = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            pairs.push(GenePairRecord {
                gene_a: parse_gene_label(gene_i.get(idx).unwrap_or(""))?,
                gene_b: parse_gene_label(gene_j.get(idx).unwrap_or(""))?,
                co_deletion_frequency: frequency.get(idx).unwrap_or(f64::NAN),
            });
        }
        Ok(pairs)
    }

    pub fn save_deletion_frequencies(
        &self,
        study_id: &str,
        chromosome: &str,
        frequencies: &DeletionFrequencies,
    ) -> AnalysisResult<()> {
        let genes: Vec<String> = frequencies.iter().map(|(g, _)| g.to_string()).collect();
        let values: Vec<f64> = frequencies.iter().map(|(_, f)| *f).collect();
        let mut df = df![
            "gene" => genes,
            "deletion_frequency" => values,
        ]?;
        let path = self.chromosome_file(study_id, chromosome, "deletion_frequencies");
        dataframe_to_csv(&mut df, &path.to_string_lossy())?;
        Ok(())
    }

    /// Load per-gene marginal deletion frequencies. A missing file is the
    /// distinguishable "no processed data for this chromosome" condition the
    /// genome-wide aggregator catches and skips.
    pub fn load_deletion_frequencies(
        &self,
        study_id: &str,
        chromosome: &str,
    ) -> AnalysisResult<DeletionFrequencies> {
        let path = self.chromosome_file(study_id, chromosome, "deletion_frequencies");
        if !path.exists() {
            return Err(AnalysisError::FrequenciesNotFound {
                study_id: study_id.to_string(),
                chromosome: chromosome.to_string(),
            });
        }

        let df = read_csv(&path.to_string_lossy())?;
        let genes = df.column("gene")?.str()?;
        let values = df.column("deletion_frequency")?.cast(&DataType::Float64)?;
        let values = values.f64()?;

        let mut entries = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            entries.push((
                parse_gene_label(genes.get(idx).unwrap_or(""))?,
                values.get(idx).unwrap_or(0.0),
            ));
        }
        Ok(DeletionFrequencies::from_entries(entries))
    }

    pub fn save_gene_metadata(
        &self,
        study_id: &str,
        chromosome: &str,
        genes: &[GeneInfo],
    ) -> AnalysisResult<()> {
        let path = self.chromosome_file(study_id, chromosome, "genes_metadata");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&path)?;
        for gene in genes {
            writer.serialize(gene)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load_gene_metadata(
        &self,
        study_id: &str,
        chromosome: &str,
    ) -> AnalysisResult<Vec<GeneInfo>> {
        let path = self.chromosome_file(study_id, chromosome, "genes_metadata");
        let mut reader = csv::Reader::from_path(&path)?;
        let mut genes = Vec::new();
        for record in reader.deserialize() {
            genes.push(record?);
        }
        Ok(genes)
    }

    /// Persist the joined therapeutic-opportunity table for the whole batch.
    pub fn save_opportunities(&self, opportunities: &[Opportunity]) -> AnalysisResult<PathBuf> {
        let path = self.root.join("therapeutic_opportunities.csv");
        fs::create_dir_all(&self.root)?;
        let mut writer = csv::Writer::from_path(&path)?;
        for opportunity in opportunities {
            writer.serialize(opportunity)?;
        }
        writer.flush()?;
        info!(
            "Wrote {} opportunities to {}",
            opportunities.len(),
            path.display()
        );
        Ok(path)
    }

    /// Study IDs with a processed directory, sorted.
    pub fn list_available_studies(&self) -> AnalysisResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut studies = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                studies.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        studies.sort();
        Ok(studies)
    }
}

fn parse_gene_label(label: &str) -> AnalysisResult<GeneKey> {
    GeneKey::parse(label)
        .ok_or_else(|| AnalysisError::MalformedTable(format!("unparseable gene label '{label}'")))
}

/// Keep at most `limit` pairs, highest joint frequency first. Under the
/// limit, the input order is preserved untouched.
fn cap_pairs(pairs: &[GenePairRecord], limit: usize) -> Vec<GenePairRecord> {
    if pairs.len() <= limit {
        return pairs.to_vec();
    }
    let mut ranked = pairs.to_vec();
    ranked.sort_by(|a, b| b.co_deletion_frequency.total_cmp(&a.co_deletion_frequency));
    ranked.truncate(limit);
    ranked
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
