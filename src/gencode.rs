/// GENCODE GTF reader.
///
/// Produces the canonical gene table (from `gene` rows) and the feature stream
/// consumed by the isoform-annotation joiner (every other row, minus codon and
/// selenocysteine pseudo-features).
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::BufRead;
use tracing::{debug, info, warn};

use crate::chrom;
use crate::error::PipelineError;
use crate::io::{open_reader, strip_version};
use crate::models::GeneRecord;

/// GTF feature types that never become evidence.
const EXCLUDED_FEATURES: &[&str] = &["Selenocysteine", "start_codon", "stop_codon"];

/// One GTF row of interest, converted to 0-based half-open coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GtfFeature {
    pub chrom: String,
    pub feature: String,
    pub start: u64,
    pub end: u64,
    pub strand: String,
    pub gene_id: String,
    pub gene_name: Option<String>,
    pub transcript_id: Option<String>,
    pub exon_id: Option<String>,
}

/// Everything the pipeline needs from the gene model.
#[derive(Debug, Default)]
pub struct GeneModel {
    pub genes: Vec<GeneRecord>,
    pub features: Vec<GtfFeature>,
    pub skipped: usize,
}

/// Value of the first `key "value";` attribute with the given key.
fn attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    attrs.split(';').find_map(|kv| {
        let (k, v) = kv.trim().split_once(' ')?;
        (k == key).then(|| v.trim().trim_matches('"'))
    })
}

/// Parse one GTF data line. `Ok(None)` means a well-formed row that is filtered out.
pub fn parse_gtf_line(
    line: &str,
    source: &str,
    line_no: usize,
) -> Result<Option<GtfFeature>, PipelineError> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < 9 {
        return Err(PipelineError::malformed(
            source,
            line_no,
            format!("expected 9 columns, got {}", cols.len()),
        ));
    }

    let chrom = chrom::normalize(cols[0]);
    if !chrom::is_canonical(&chrom) || EXCLUDED_FEATURES.contains(&cols[2]) {
        return Ok(None);
    }

    let start: u64 = cols[3]
        .parse()
        .map_err(|_| PipelineError::malformed(source, line_no, format!("invalid start '{}'", cols[3])))?;
    let end: u64 = cols[4]
        .parse()
        .map_err(|_| PipelineError::malformed(source, line_no, format!("invalid end '{}'", cols[4])))?;
    if start == 0 || end < start {
        return Err(PipelineError::malformed(
            source,
            line_no,
            format!("invalid span {}-{}", start, end),
        ));
    }

    let attrs = cols[8];
    let gene_id = attribute(attrs, "gene_id")
        .ok_or_else(|| PipelineError::malformed(source, line_no, "missing gene_id"))?;

    Ok(Some(GtfFeature {
        chrom,
        feature: cols[2].to_string(),
        start: start - 1,
        end,
        strand: cols[6].to_string(),
        gene_id: strip_version(gene_id).to_string(),
        gene_name: attribute(attrs, "gene_name").map(str::to_string),
        transcript_id: attribute(attrs, "transcript_id").map(|t| strip_version(t).to_string()),
        exon_id: attribute(attrs, "exon_id").map(|e| strip_version(e).to_string()),
    }))
}

/// Read a GTF into the canonical gene table and the evidence feature stream.
pub fn read_gene_model(path: &str) -> Result<GeneModel> {
    let reader = open_reader(path)?;
    read_gene_model_from(reader, path)
}

pub fn read_gene_model_from<R: BufRead>(reader: R, source: &str) -> Result<GeneModel> {
    let mut model = GeneModel::default();
    let mut seen_genes: HashSet<String> = HashSet::new();
    let mut duplicate_genes = 0usize;

    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading GTF line {}", i + 1))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let feature = match parse_gtf_line(&line, source, i + 1) {
            Ok(Some(f)) => f,
            Ok(None) => continue,
            Err(e) => {
                debug!("{}", e);
                model.skipped += 1;
                continue;
            }
        };

        if feature.feature == "gene" {
            if seen_genes.insert(feature.gene_id.clone()) {
                model.genes.push(GeneRecord {
                    chrom: feature.chrom.clone(),
                    start: feature.start,
                    end: feature.end,
                    gene_id: feature.gene_id.clone(),
                    gene_name: feature
                        .gene_name
                        .clone()
                        .unwrap_or_else(|| feature.gene_id.clone()),
                });
            } else {
                duplicate_genes += 1;
            }
        }
        model.features.push(feature);
    }

    if model.skipped > 0 {
        warn!("{}: skipped {} malformed GTF rows", source, model.skipped);
    }
    if duplicate_genes > 0 {
        warn!(
            "{}: {} duplicate gene rows ignored (first occurrence kept)",
            source, duplicate_genes
        );
    }
    info!(
        "Read {} genes and {} gene-model features from '{}'",
        model.genes.len(),
        model.features.len(),
        source
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GTF: &str = "\
##description: test
chr1\tHAVANA\tgene\t1001\t2000\t.\t+\t.\tgene_id \"ENSG1.3\"; gene_type \"protein_coding\"; gene_name \"G1\";
chr1\tHAVANA\ttranscript\t1001\t2000\t.\t+\t.\tgene_id \"ENSG1.3\"; transcript_id \"ENST1.2\"; gene_name \"G1\";
chr1\tHAVANA\texon\t1001\t1200\t.\t+\t.\tgene_id \"ENSG1.3\"; transcript_id \"ENST1.2\"; exon_number 1; exon_id \"ENSE1.1\";
chr1\tHAVANA\tstart_codon\t1050\t1052\t.\t+\t0\tgene_id \"ENSG1.3\"; transcript_id \"ENST1.2\";
chr1\tHAVANA\tSelenocysteine\t1100\t1102\t.\t+\t.\tgene_id \"ENSG1.3\"; transcript_id \"ENST1.2\";
GL000194.1\tENSEMBL\tgene\t1\t500\t.\t-\t.\tgene_id \"ENSG9\"; gene_name \"ALT\";
chr2\tHAVANA\tgene\tbad\t500\t.\t-\t.\tgene_id \"ENSG2\"; gene_name \"G2\";
chr2\tHAVANA\tgene\t10\t500\t.\t-\t.\tgene_name \"NOID\";
chrX\tHAVANA\tgene\t1\t10\t.\t-\t.\tgene_id \"ENSG3\";
";

    #[test]
    fn test_attribute_lookup() {
        let attrs = "gene_id \"ENSG1.3\"; tag \"basic\"; tag \"CCDS\"; exon_number 2;";
        assert_eq!(attribute(attrs, "gene_id"), Some("ENSG1.3"));
        assert_eq!(attribute(attrs, "tag"), Some("basic"));
        assert_eq!(attribute(attrs, "exon_number"), Some("2"));
        assert_eq!(attribute(attrs, "gene_name"), None);
    }

    #[test]
    fn test_read_gene_model() {
        let model = read_gene_model_from(GTF.as_bytes(), "test.gtf").unwrap();

        assert_eq!(model.genes.len(), 2);
        assert_eq!(
            model.genes[0],
            GeneRecord {
                chrom: "chr1".into(),
                start: 1000,
                end: 2000,
                gene_id: "ENSG1".into(),
                gene_name: "G1".into(),
            }
        );
        // Missing gene_name falls back to the identifier.
        assert_eq!(model.genes[1].gene_name, "ENSG3");

        let kinds: Vec<&str> = model.features.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(kinds, vec!["gene", "transcript", "exon", "gene"]);
        let exon = &model.features[2];
        assert_eq!(exon.transcript_id.as_deref(), Some("ENST1"));
        assert_eq!(exon.exon_id.as_deref(), Some("ENSE1"));
        assert_eq!(exon.start, 1000);
        assert_eq!(exon.end, 1200);

        // Bad start and missing gene_id; the alt contig is filtered, not malformed.
        assert_eq!(model.skipped, 2);
    }

    #[test]
    fn test_duplicate_gene_rows_keep_first() {
        let gtf = "\
chrX\tHAVANA\tgene\t100\t200\t.\t+\t.\tgene_id \"ENSG5.1\"; gene_name \"P1\";
chrY\tHAVANA\tgene\t100\t200\t.\t+\t.\tgene_id \"ENSG5.1\"; gene_name \"P1\";
";
        let model = read_gene_model_from(gtf.as_bytes(), "dup.gtf").unwrap();
        assert_eq!(model.genes.len(), 1);
        assert_eq!(model.genes[0].chrom, "chrX");
        assert_eq!(model.features.len(), 2);
    }

    #[test]
    fn test_short_line_is_malformed() {
        let err = parse_gtf_line("chr1\tHAVANA\tgene", "x.gtf", 7).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { line: 7, .. }));
    }
}
