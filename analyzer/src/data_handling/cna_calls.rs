use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::models::{AnalysisResult, CnaCall, GeneInfo};

/// Read discrete copy-number calls from a CSV with columns
/// `sampleId,entrezGeneId,alteration`.
pub fn read_cna_calls(path: &Path) -> AnalysisResult<Vec<CnaCall>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut calls = Vec::new();
    for record in reader.deserialize() {
        calls.push(record?);
    }
    info!("Read {} CNA calls from {}", calls.len(), path.display());
    Ok(calls)
}

/// Read gene position metadata and normalize it for matrix construction:
/// duplicate Entrez IDs are dropped (first occurrence wins) and genes are
/// sorted by genomic start position so that column order is chromosomal
/// order.
pub fn read_gene_metadata(path: &Path) -> AnalysisResult<Vec<GeneInfo>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut genes: Vec<GeneInfo> = Vec::new();
    for record in reader.deserialize() {
        genes.push(record?);
    }

    let mut seen = HashSet::new();
    genes.retain(|g: &GeneInfo| seen.insert(g.entrez_gene_id));
    genes.sort_by_key(|g| g.start);

    info!("Read {} genes from {}", genes.len(), path.display());
    Ok(genes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn gene_metadata_is_deduplicated_and_position_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genes.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "entrezGeneId,hugoGeneSymbol,chromosome,start,end,cytoband").unwrap();
        writeln!(file, "5925,RB1,13,48303748,48481890,13q14.2").unwrap();
        writeln!(file, "1,BRCA2,13,32315474,32400266,13q13.1").unwrap();
        writeln!(file, "5925,RB1,13,48303748,48481890,13q14.2").unwrap();
        drop(file);

        let genes = read_gene_metadata(&path).unwrap();
        assert_eq!(genes.len(), 2);
        assert_eq!(genes[0].hugo_gene_symbol, "BRCA2");
        assert_eq!(genes[1].hugo_gene_symbol, "RB1");
    }

    #[test]
    fn cna_calls_parse_negative_alterations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "sampleId,entrezGeneId,alteration").unwrap();
        writeln!(file, "TCGA-01,5925,-2").unwrap();
        writeln!(file, "TCGA-02,5925,1").unwrap();
        drop(file);

        let calls = read_cna_calls(&path).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].alteration, -2);
        assert_eq!(calls[1].sample_id, "TCGA-02");
    }
}
