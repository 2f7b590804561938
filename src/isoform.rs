/// Isoform-annotation joiner.
///
/// Tags every gene-model feature with the APPRIS importance of its transcript.
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::gencode::GtfFeature;
use crate::io::{open_reader, strip_version};
use crate::models::{EvidenceRecord, ExonEvidence};

pub const STAGE: &str = "isoform-annotation joiner";

/// Tag for transcripts of an annotated gene that are not themselves in the table.
pub const MINOR_TAG: &str = "Minor";
/// Tag for genes absent from the importance table.
pub const NA_TAG: &str = "NA";

/// Isoform importance keyed by (gene_id, transcript_id).
#[derive(Debug, Default)]
pub struct IsoformTable {
    tags: HashMap<(String, String), String>,
    genes: HashSet<String>,
}

impl IsoformTable {
    pub fn insert(&mut self, gene_id: &str, transcript_id: &str, tag: &str) {
        self.genes.insert(gene_id.to_string());
        self.tags
            .insert((gene_id.to_string(), transcript_id.to_string()), tag.to_string());
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Importance tag for a feature: its transcript's tag when listed,
    /// `Minor` when only the gene is listed, `NA` otherwise.
    pub fn tag_for(&self, gene_id: &str, transcript_id: Option<&str>) -> &str {
        if let Some(tx) = transcript_id
            && let Some(tag) = self.tags.get(&(gene_id.to_string(), tx.to_string()))
        {
            return tag;
        }
        if self.genes.contains(gene_id) {
            MINOR_TAG
        } else {
            NA_TAG
        }
    }
}

/// Load an APPRIS principal-isoform table.
///
/// Columns (tab-separated, no header): gene name, gene id, transcript id,
/// CCDS id, APPRIS tag. Extra columns are ignored.
pub fn read_isoform_table(path: &str) -> Result<IsoformTable> {
    let reader = open_reader(path)?;
    read_isoform_table_from(reader, path)
}

pub fn read_isoform_table_from<R: BufRead>(reader: R, source: &str) -> Result<IsoformTable> {
    let mut table = IsoformTable::default();
    let mut skipped = 0usize;

    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading isoform table line {}", i + 1))?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 5 || cols[1].is_empty() || cols[2].is_empty() || cols[4].is_empty() {
            let e = PipelineError::malformed(source, i + 1, "expected gene, transcript and tag columns");
            debug!("{}", e);
            skipped += 1;
            continue;
        }
        table.insert(strip_version(cols[1]), strip_version(cols[2]), cols[4]);
    }

    if skipped > 0 {
        warn!("{}: skipped {} malformed isoform rows", source, skipped);
    }
    if table.is_empty() {
        warn!("{}: no isoform tags; every feature will be tagged {}", source, NA_TAG);
    }
    info!(
        "Read {} isoform tags for {} genes from '{}'",
        table.len(),
        table.genes.len(),
        source
    );
    Ok(table)
}

/// Emit one `GENCODE` evidence record per gene-model feature.
pub fn annotate_features(features: &[GtfFeature], table: &IsoformTable) -> Result<Vec<EvidenceRecord>> {
    let evidence: Vec<EvidenceRecord> = features
        .iter()
        .map(|f| {
            EvidenceRecord::Exon(ExonEvidence {
                chr: f.chrom.clone(),
                start: f.start,
                end: f.end,
                gene_id: f.gene_id.clone(),
                strand: f.strand.clone(),
                class: f.feature.clone(),
                appris_tag: table
                    .tag_for(&f.gene_id, f.transcript_id.as_deref())
                    .to_string(),
                transcript_id: f.transcript_id.clone(),
                exon_id: f.exon_id.clone(),
            })
        })
        .collect();

    if evidence.is_empty() {
        return Err(PipelineError::empty(STAGE).into());
    }
    info!("{}: {} gene-model features annotated", STAGE, evidence.len());
    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(gene: &str, tx: Option<&str>) -> GtfFeature {
        GtfFeature {
            chrom: "chr1".into(),
            feature: if tx.is_some() { "exon" } else { "gene" }.into(),
            start: 10,
            end: 20,
            strand: "+".into(),
            gene_id: gene.into(),
            gene_name: None,
            transcript_id: tx.map(str::to_string),
            exon_id: None,
        }
    }

    fn table() -> IsoformTable {
        let tsv = "\
G1\tENSG1.4\tENST1.1\tCCDS1\tPRINCIPAL:1
G1\tENSG1.4\tENST2.1\t-\tALTERNATIVE:2
broken line
";
        read_isoform_table_from(tsv.as_bytes(), "appris.txt").unwrap()
    }

    #[test]
    fn test_read_table_strips_versions() {
        let t = table();
        assert_eq!(t.len(), 2);
        assert_eq!(t.tag_for("ENSG1", Some("ENST1")), "PRINCIPAL:1");
        assert_eq!(t.tag_for("ENSG1", Some("ENST2")), "ALTERNATIVE:2");
    }

    #[test]
    fn test_tag_fallbacks() {
        let t = table();
        // Gene listed under a different transcript.
        assert_eq!(t.tag_for("ENSG1", Some("ENST9")), MINOR_TAG);
        // Gene-level rows carry no transcript.
        assert_eq!(t.tag_for("ENSG1", None), MINOR_TAG);
        // Gene absent from the table.
        assert_eq!(t.tag_for("ENSG2", Some("ENST1")), NA_TAG);
    }

    #[test]
    fn test_annotate_features() {
        let t = table();
        let feats = vec![
            feature("ENSG1", Some("ENST1")),
            feature("ENSG1", Some("ENST7")),
            feature("ENSG2", None),
        ];
        let ev = annotate_features(&feats, &t).unwrap();
        let tags: Vec<String> = ev
            .iter()
            .map(|e| match e {
                EvidenceRecord::Exon(x) => x.appris_tag.clone(),
                _ => panic!("unexpected evidence kind"),
            })
            .collect();
        assert_eq!(tags, vec!["PRINCIPAL:1", "Minor", "NA"]);
        assert!(ev.iter().all(|e| e.source_tag() == "GENCODE"));
    }

    #[test]
    fn test_empty_features_is_fatal() {
        let err = annotate_features(&[], &table()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyInput { stage: STAGE })
        ));
    }
}
