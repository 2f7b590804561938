/// Expression-link mapper.
///
/// Two steps:
///   1. Parse GTEx eQTL tables into one `ExpressionLink` per rsID and place
///      every variant on the target assembly (via `Liftover` when needed).
///   2. Intersect the placed variants with the aggregated regulatory features
///      and aggregate the supporting rsIDs and eQTL tissues per (gene, feature).
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

use crate::chrom;
use crate::error::PipelineError;
use crate::intersect::{intersect_sorted, sort_intervals};
use crate::io::{file_token, open_reader, open_writer, strip_version};
use crate::liftover::{Lifted, Liftover, lift_all};
use crate::models::{EvidenceRecord, ExpressionEvidence, ExpressionLink, RegulatoryFeature};
use crate::regulatory::LabelledInput;

pub const PARSE_STAGE: &str = "expression-link mapper (eQTL parsing)";
pub const LINK_STAGE: &str = "expression-link mapper (regulatory overlap)";

// ---------------------------------------------------------------------------
// eQTL parsing
// ---------------------------------------------------------------------------

/// A variant key `chr1_13550_G_A_b38` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantKey {
    pub chrom: String,
    pub position: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub build: String,
}

impl VariantKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('_').collect();
        if parts.len() < 5 {
            return None;
        }
        // Trailing fields are fixed; anything extra belongs to the contig name.
        let n = parts.len();
        let position: u64 = parts[n - 4].parse().ok().filter(|&p| p > 0)?;
        Some(Self {
            chrom: chrom::normalize(&parts[..n - 4].join("_")),
            position,
            ref_allele: parts[n - 3].to_string(),
            alt_allele: parts[n - 2].to_string(),
            build: parts[n - 1].to_string(),
        })
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}>{} ({})",
            self.chrom, self.position, self.ref_allele, self.alt_allele, self.build
        )
    }
}

/// One significant variant-gene pair from one tissue.
#[derive(Debug, Clone, PartialEq)]
pub struct EqtlRow {
    pub variant: VariantKey,
    pub gene_id: String,
    pub rsid: String,
    pub tissue: String,
}

/// Column positions located from an eQTL header line.
#[derive(Debug, Clone, Copy)]
struct EqtlColumns {
    variant: usize,
    gene: usize,
    rsid: usize,
}

fn is_rsid_column(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "rsid" || name == "rs_id" || name.starts_with("rs_id_dbsnp")
}

fn locate_columns(header: &str, source: &str) -> Result<EqtlColumns> {
    let cols: Vec<&str> = header.split('\t').map(str::trim).collect();
    let find = |pred: &dyn Fn(&str) -> bool, what: &str| -> Result<usize> {
        cols.iter()
            .position(|c| pred(c))
            .with_context(|| format!("'{}': header has no {} column", source, what))
    };
    Ok(EqtlColumns {
        variant: find(&|c| c.eq_ignore_ascii_case("variant_id"), "variant_id")?,
        gene: find(&|c| c.eq_ignore_ascii_case("gene_id"), "gene_id")?,
        rsid: find(&is_rsid_column, "rsID")?,
    })
}

fn parse_eqtl_line(
    line: &str,
    cols: EqtlColumns,
    tissue: &str,
    source: &str,
    line_no: usize,
) -> Result<EqtlRow, PipelineError> {
    let fields: Vec<&str> = line.split('\t').collect();
    let field = |i: usize| fields.get(i).map(|s| s.trim()).filter(|s| !s.is_empty());
    let missing = |what: &str| PipelineError::malformed(source, line_no, format!("missing {}", what));

    let variant_raw = field(cols.variant).ok_or_else(|| missing("variant_id"))?;
    let variant = VariantKey::parse(variant_raw).ok_or_else(|| {
        PipelineError::malformed(source, line_no, format!("bad variant key '{}'", variant_raw))
    })?;
    let gene_id = strip_version(field(cols.gene).ok_or_else(|| missing("gene_id"))?).to_string();
    let rsid = field(cols.rsid).ok_or_else(|| missing("rsID"))?;
    if rsid == "." {
        return Err(PipelineError::malformed(source, line_no, "variant has no rsID"));
    }
    Ok(EqtlRow {
        variant,
        gene_id,
        rsid: rsid.to_string(),
        tissue: tissue.to_string(),
    })
}

/// Parse one eQTL table. Malformed rows are skipped and counted.
pub fn read_eqtl_from<R: BufRead>(reader: R, tissue: &str, source: &str) -> Result<Vec<EqtlRow>> {
    let mut lines = reader.lines().enumerate();
    let cols = loop {
        match lines.next() {
            Some((i, line)) => {
                let line = line.with_context(|| format!("reading '{}' line {}", source, i + 1))?;
                if !line.trim().is_empty() {
                    break locate_columns(line.trim_start_matches('#'), source)?;
                }
            }
            None => return Ok(Vec::new()),
        }
    };

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (i, line) in lines {
        let line = line.with_context(|| format!("reading '{}' line {}", source, i + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_eqtl_line(&line, cols, tissue, source, i + 1) {
            Ok(row) => rows.push(row),
            Err(e) => {
                debug!("{}", e);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("{}: skipped {} malformed eQTL rows", source, skipped);
    }
    Ok(rows)
}

/// Parse every eQTL table in parallel. The tissue is the explicit label or the
/// file name up to its first `.`.
pub fn read_eqtl_files(inputs: &[LabelledInput]) -> Result<Vec<EqtlRow>> {
    let per_file: Vec<Vec<EqtlRow>> = inputs
        .par_iter()
        .map(|input| -> Result<Vec<EqtlRow>> {
            let tissue = input
                .label
                .clone()
                .unwrap_or_else(|| file_token(&input.path));
            let reader = open_reader(&input.path)?;
            let rows = read_eqtl_from(reader, &tissue, &input.path)?;
            info!("Read {} eQTL pairs for '{}' from '{}'", rows.len(), tissue, input.path);
            Ok(rows)
        })
        .collect::<Result<_>>()?;
    Ok(per_file.into_iter().flatten().collect())
}

/// Variant with the assembly its coordinates are expressed in.
#[derive(Debug, Clone)]
struct PendingLink {
    build: String,
    link: ExpressionLink,
}

/// Collapse eQTL rows into one link per rsID (first-seen coordinates win).
pub fn collect_links(rows: Vec<EqtlRow>) -> Result<Vec<(String, ExpressionLink)>> {
    if rows.is_empty() {
        return Err(PipelineError::empty(PARSE_STAGE).into());
    }
    let mut order: Vec<String> = Vec::new();
    let mut by_rsid: HashMap<String, PendingLink> = HashMap::new();
    let mut conflicting = 0usize;

    for row in rows {
        let entry = by_rsid.entry(row.rsid.clone()).or_insert_with(|| {
            order.push(row.rsid.clone());
            PendingLink {
                build: row.variant.build.clone(),
                link: ExpressionLink {
                    rsid: row.rsid.clone(),
                    chrom: row.variant.chrom.clone(),
                    position: row.variant.position,
                    genes: BTreeMap::new(),
                },
            }
        });
        if entry.link.chrom != row.variant.chrom || entry.link.position != row.variant.position {
            debug!(
                "{} seen at {} after {}:{}",
                row.rsid, row.variant, entry.link.chrom, entry.link.position
            );
            conflicting += 1;
        }
        entry
            .link
            .genes
            .entry(row.gene_id)
            .or_default()
            .insert(row.tissue);
    }
    if conflicting > 0 {
        warn!(
            "{}: {} rows placed an rsID at a different position than its first occurrence",
            PARSE_STAGE, conflicting
        );
    }

    Ok(order
        .into_iter()
        .filter_map(|rsid| by_rsid.remove(&rsid))
        .map(|p| (p.build, p.link))
        .collect())
}

/// Variants placed on the target assembly, plus those that could not be.
#[derive(Debug, Default)]
pub struct NormalizedVariants {
    pub mapped: Vec<ExpressionLink>,
    pub failed: Vec<(ExpressionLink, PipelineError)>,
}

/// Place every link on `target_build`. Links already on it bypass the liftover.
pub fn normalize_coordinates<L: Liftover + ?Sized>(
    links: Vec<(String, ExpressionLink)>,
    target_build: &str,
    liftover: &L,
) -> NormalizedVariants {
    let mut mapped = Vec::new();
    let mut to_lift = Vec::new();
    for (build, link) in links {
        if build == target_build {
            mapped.push(link);
        } else {
            to_lift.push(Lifted {
                chrom: link.chrom.clone(),
                start: link.position - 1,
                end: link.position,
                payload: link,
            });
        }
    }

    let n_native = mapped.len();
    let (lifted, failed) = lift_all(liftover, to_lift);
    let n_lifted = lifted.len();
    mapped.extend(lifted.into_iter().map(|l| ExpressionLink {
        chrom: l.chrom,
        position: l.end,
        ..l.payload
    }));
    let failed: Vec<(ExpressionLink, PipelineError)> =
        failed.into_iter().map(|(l, e)| (l.payload, e)).collect();

    sort_intervals(&mut mapped);
    info!(
        "Variant coordinates: {} already on {}, {} lifted, {} failed conversion",
        n_native,
        target_build,
        n_lifted,
        failed.len()
    );
    if !failed.is_empty() {
        for (link, e) in failed.iter().take(5) {
            debug!("{}: {}", link.rsid, e);
        }
    }
    NormalizedVariants { mapped, failed }
}

/// Write placed variants as BED, one line per (rsID, gene).
pub fn write_variant_bed(path: &str, links: &[ExpressionLink]) -> Result<()> {
    let mut w = open_writer(path)?;
    for link in links {
        for tag in link.tags() {
            writeln!(w, "{}\t{}\t{}\t{}", link.chrom, link.position - 1, link.position, tag)?;
        }
    }
    w.finish().with_context(|| format!("writing '{}'", path))?;
    Ok(())
}

/// Write variants that failed conversion, in their original coordinates.
pub fn write_unmapped(path: &str, failed: &[(ExpressionLink, PipelineError)]) -> Result<()> {
    let mut w = open_writer(path)?;
    writeln!(w, "#CHR\tSTART\tEND\tTAG\tREASON")?;
    for (link, e) in failed {
        for tag in link.tags() {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}",
                link.chrom,
                link.position - 1,
                link.position,
                tag,
                e
            )?;
        }
    }
    w.finish().with_context(|| format!("writing '{}'", path))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Regulatory overlap + aggregation
// ---------------------------------------------------------------------------

/// Aggregation key: one expression evidence record per (gene, feature).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct LinkKey {
    gene_id: String,
    feature_id: String,
}

struct LinkAcc<'a> {
    feature: &'a RegulatoryFeature,
    rsids: BTreeSet<String>,
    tissues: BTreeSet<String>,
}

/// Link genes to regulatory features through the eQTL variants that fall in them.
///
/// Both inputs must be sorted by (chromosome, start).
pub fn link_features(
    variants: &[ExpressionLink],
    features: &[RegulatoryFeature],
) -> Result<Vec<EvidenceRecord>> {
    let pairs = intersect_sorted(variants, features)?;
    if pairs.is_empty() {
        return Err(PipelineError::empty(LINK_STAGE).into());
    }

    let mut acc: BTreeMap<LinkKey, LinkAcc<'_>> = BTreeMap::new();
    for &(variant, feature) in &pairs {
        for (gene_id, tissues) in &variant.genes {
            let key = LinkKey {
                gene_id: gene_id.clone(),
                feature_id: feature.feature_id.clone(),
            };
            let entry = acc.entry(key).or_insert_with(|| LinkAcc {
                feature,
                rsids: BTreeSet::new(),
                tissues: BTreeSet::new(),
            });
            entry.rsids.insert(variant.rsid.clone());
            entry.tissues.extend(tissues.iter().cloned());
        }
    }

    let evidence: Vec<EvidenceRecord> = acc
        .into_iter()
        .map(|(key, a)| {
            EvidenceRecord::Expression(ExpressionEvidence {
                gene_id: key.gene_id,
                class: a.feature.feature_class.clone(),
                chr: a.feature.chrom.clone(),
                start: a.feature.start,
                end: a.feature.end,
                feature_id: key.feature_id,
                tissues: a.feature.tissues.clone(),
                linked_rsids: a.rsids,
                linked_tissues: a.tissues,
            })
        })
        .collect();
    info!(
        "{}: {} variant-feature overlaps, {} gene-feature links",
        LINK_STAGE,
        pairs.len(),
        evidence.len()
    );
    Ok(evidence)
}
