/// Overlap linker: regulatory features lying directly on a gene body.
use anyhow::Result;
use tracing::info;

use crate::error::PipelineError;
use crate::intersect::intersect;
use crate::models::{EvidenceRecord, GeneRecord, OverlapEvidence, RegulatoryFeature};

pub const STAGE: &str = "overlap linker";

/// One `overlap` evidence record per gene-feature pair reported by the
/// interval primitive. The gene table keeps its file order, so neither input
/// needs to be sorted.
pub fn link_overlaps(
    genes: &[GeneRecord],
    features: &[RegulatoryFeature],
) -> Result<Vec<EvidenceRecord>> {
    let pairs = intersect(genes, features)?;
    if pairs.is_empty() {
        return Err(PipelineError::empty(STAGE).into());
    }

    let evidence: Vec<EvidenceRecord> = pairs
        .into_iter()
        .map(|(gene, feature)| {
            EvidenceRecord::Overlap(OverlapEvidence {
                gene_id: gene.gene_id.clone(),
                gene_name: gene.gene_name.clone(),
                chr: feature.chrom.clone(),
                start: feature.start,
                end: feature.end,
                class: feature.feature_class.clone(),
                feature_id: feature.feature_id.clone(),
                tissues: feature.tissues.clone(),
            })
        })
        .collect();
    info!("{}: {} gene-feature overlaps", STAGE, evidence.len());
    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn gene(id: &str, chrom: &str, start: u64, end: u64) -> GeneRecord {
        GeneRecord {
            chrom: chrom.into(),
            start,
            end,
            gene_id: id.into(),
            gene_name: format!("{}-name", id),
        }
    }

    fn feature(id: &str, chrom: &str, start: u64, end: u64, tissues: &[&str]) -> RegulatoryFeature {
        RegulatoryFeature {
            chrom: chrom.into(),
            start,
            end,
            feature_id: id.into(),
            feature_class: "promoter".into(),
            tissues: tissues.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_single_gene_single_feature() {
        let genes = vec![GeneRecord {
            chrom: "chr1".into(),
            start: 1000,
            end: 2000,
            gene_id: "ENSG1".into(),
            gene_name: "G1".into(),
        }];
        let features = vec![feature("ENSR1", "chr1", 1500, 1600, &["K562"])];
        let ev = link_overlaps(&genes, &features).unwrap();
        assert_eq!(
            ev,
            vec![EvidenceRecord::Overlap(OverlapEvidence {
                gene_id: "ENSG1".into(),
                gene_name: "G1".into(),
                chr: "chr1".into(),
                start: 1500,
                end: 1600,
                class: "promoter".into(),
                feature_id: "ENSR1".into(),
                tissues: BTreeSet::from(["K562".to_string()]),
            })]
        );
    }

    #[test]
    fn test_one_record_per_overlapping_pair() {
        let genes = vec![gene("B", "chr1", 500, 3000), gene("A", "chr1", 0, 1000)];
        let features = vec![
            feature("R1", "chr1", 100, 200, &["X"]),
            feature("R2", "chr1", 900, 1100, &["X", "Y"]),
            feature("R3", "chr1", 5000, 5100, &["X"]),
            feature("R4", "chr2", 100, 200, &["X"]),
        ];
        let ev = link_overlaps(&genes, &features).unwrap();
        let mut pairs: Vec<(String, String)> = ev
            .iter()
            .map(|e| match e {
                EvidenceRecord::Overlap(o) => (o.gene_id.clone(), o.feature_id.clone()),
                _ => panic!("unexpected evidence kind"),
            })
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "R1".to_string()),
                ("A".to_string(), "R2".to_string()),
                ("B".to_string(), "R2".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_overlap_is_fatal() {
        let genes = vec![gene("A", "chr1", 0, 100)];
        let features = vec![feature("R1", "chr1", 100, 200, &["X"])];
        let err = link_overlaps(&genes, &features).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyInput { stage: STAGE })
        ));
    }
}
