/// Core record types passed between pipeline stages.
///
/// All coordinates are 0-based half-open and chromosome names are normalized
/// (see `chrom::normalize`). Each stage hands its output downstream as an owned
/// `Vec`; nothing here is mutated after construction.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::intersect::Interval;

// ---------------------------------------------------------------------------
// Canonical gene table
// ---------------------------------------------------------------------------

/// One gene from the gene model, in canonical assembly coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneRecord {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub gene_id: String,
    pub gene_name: String,
}

impl Interval for GeneRecord {
    fn chrom(&self) -> &str {
        &self.chrom
    }
    fn start(&self) -> u64 {
        self.start
    }
    fn end(&self) -> u64 {
        self.end
    }
}

// ---------------------------------------------------------------------------
// Regulatory features
// ---------------------------------------------------------------------------

/// A regulatory feature with the set of cell types in which it is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegulatoryFeature {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub feature_id: String,
    pub feature_class: String,
    pub tissues: BTreeSet<String>,
}

impl Interval for RegulatoryFeature {
    fn chrom(&self) -> &str {
        &self.chrom
    }
    fn start(&self) -> u64 {
        self.start
    }
    fn end(&self) -> u64 {
        self.end
    }
}

// ---------------------------------------------------------------------------
// eQTL variants
// ---------------------------------------------------------------------------

/// A unique eQTL variant and the genes whose expression it is linked to,
/// with the tissues supporting each link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionLink {
    pub rsid: String,
    pub chrom: String,
    /// 1-based variant position.
    pub position: u64,
    pub genes: BTreeMap<String, BTreeSet<String>>,
}

impl ExpressionLink {
    /// Interval tag in the `gene=<id>;rsID=<rsid>;tissue=<a|b>` form, one per gene.
    pub fn tags(&self) -> Vec<String> {
        self.genes
            .iter()
            .map(|(gene, tissues)| {
                let tissues: Vec<&str> = tissues.iter().map(String::as_str).collect();
                format!(
                    "gene={};rsID={};tissue={}",
                    gene,
                    self.rsid,
                    tissues.join("|")
                )
            })
            .collect()
    }
}

/// A variant placed as a single-base interval `[position - 1, position)`.
impl Interval for ExpressionLink {
    fn chrom(&self) -> &str {
        &self.chrom
    }
    fn start(&self) -> u64 {
        self.position.saturating_sub(1)
    }
    fn end(&self) -> u64 {
        self.position
    }
}

// ---------------------------------------------------------------------------
// Evidence records
// ---------------------------------------------------------------------------

/// A gene-model feature annotated with its isoform importance tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExonEvidence {
    pub chr: String,
    pub start: u64,
    pub end: u64,
    pub gene_id: String,
    pub strand: String,
    pub class: String,
    #[serde(rename = "appris")]
    pub appris_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exon_id: Option<String>,
}

/// A regulatory feature linked to a gene through one or more eQTL variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionEvidence {
    pub gene_id: String,
    pub class: String,
    pub chr: String,
    pub start: u64,
    pub end: u64,
    #[serde(rename = "regulatory_id")]
    pub feature_id: String,
    pub tissues: BTreeSet<String>,
    #[serde(rename = "rsIDs")]
    pub linked_rsids: BTreeSet<String>,
    #[serde(rename = "eqtl_tissues")]
    pub linked_tissues: BTreeSet<String>,
}

/// A regulatory feature that directly overlaps a gene body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapEvidence {
    pub gene_id: String,
    pub gene_name: String,
    pub chr: String,
    pub start: u64,
    pub end: u64,
    pub class: String,
    #[serde(rename = "regulatory_id")]
    pub feature_id: String,
    pub tissues: BTreeSet<String>,
}

/// Evidence tying a genomic region to a gene, tagged by its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum EvidenceRecord {
    #[serde(rename = "GENCODE")]
    Exon(ExonEvidence),
    #[serde(rename = "GTEx")]
    Expression(ExpressionEvidence),
    #[serde(rename = "overlap")]
    Overlap(OverlapEvidence),
}

impl EvidenceRecord {
    pub fn gene_id(&self) -> &str {
        match self {
            Self::Exon(e) => &e.gene_id,
            Self::Expression(e) => &e.gene_id,
            Self::Overlap(e) => &e.gene_id,
        }
    }

    pub fn source_tag(&self) -> &'static str {
        match self {
            Self::Exon(_) => "GENCODE",
            Self::Expression(_) => "GTEx",
            Self::Overlap(_) => "overlap",
        }
    }

    /// Serialized annotation payload (JSON object including the `source` tag).
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Output rows
// ---------------------------------------------------------------------------

/// One output row: a gene's canonical coordinates plus one piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalRecord {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub gene_id: String,
    pub annotation: EvidenceRecord,
}
