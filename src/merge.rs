/// Merge engine.
///
/// Two phases: index the canonical gene table by gene ID, then stream every
/// evidence record through it. Records whose gene resolves become output rows
/// placed at the gene's coordinates; the rest go to the failure report.
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::chrom;
use crate::error::PipelineError;
use crate::models::{EvidenceRecord, FinalRecord, GeneRecord};

pub const STAGE: &str = "merge engine";

/// Source versions recorded in the output header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Provenance {
    pub gencode: String,
    pub regulation: String,
    pub gtex: String,
    pub appris: String,
    pub chain: Option<String>,
    pub target_build: String,
}

/// An evidence record whose gene ID is missing from the canonical gene table.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedRecord {
    pub gene_id: String,
    pub source_tag: &'static str,
    pub payload: String,
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub records: Vec<FinalRecord>,
    pub unresolved: Vec<UnresolvedRecord>,
}

/// Join evidence to canonical gene coordinates and sort the result by
/// (chromosome, start) in natural chromosome order.
///
/// Every input record ends up in exactly one of `records` or `unresolved`.
pub fn merge<I>(genes: &[GeneRecord], evidence: I) -> Result<MergeOutcome>
where
    I: IntoIterator<Item = EvidenceRecord>,
{
    let index: HashMap<&str, &GeneRecord> =
        genes.iter().map(|g| (g.gene_id.as_str(), g)).collect();

    let mut outcome = MergeOutcome::default();
    for ev in evidence {
        match index.get(ev.gene_id()) {
            Some(gene) => outcome.records.push(FinalRecord {
                chrom: gene.chrom.clone(),
                start: gene.start,
                end: gene.end,
                gene_id: gene.gene_id.clone(),
                annotation: ev,
            }),
            None => {
                let e = PipelineError::UnresolvedGeneReference {
                    gene_id: ev.gene_id().to_string(),
                    source_tag: ev.source_tag().to_string(),
                };
                debug!("{}", e);
                let payload = ev
                    .to_payload()
                    .with_context(|| format!("serializing evidence for '{}'", ev.gene_id()))?;
                outcome.unresolved.push(UnresolvedRecord {
                    gene_id: ev.gene_id().to_string(),
                    source_tag: ev.source_tag(),
                    payload,
                });
            }
        }
    }

    if outcome.records.is_empty() {
        return Err(PipelineError::empty(STAGE).into());
    }
    outcome
        .records
        .sort_by(|a, b| chrom::compare_pos(&a.chrom, a.start, &b.chrom, b.start));

    if !outcome.unresolved.is_empty() {
        warn!(
            "{}: {} evidence records reference genes missing from the gene model",
            STAGE,
            outcome.unresolved.len()
        );
    }
    info!(
        "{}: {} rows linked, {} unresolved",
        STAGE,
        outcome.records.len(),
        outcome.unresolved.len()
    );
    Ok(outcome)
}

fn write_header<W: Write + ?Sized>(w: &mut W, prov: &Provenance) -> Result<()> {
    writeln!(w, "##generegions {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(w, "##gencode={}", prov.gencode)?;
    writeln!(w, "##regulation={}", prov.regulation)?;
    writeln!(w, "##gtex={}", prov.gtex)?;
    writeln!(w, "##appris={}", prov.appris)?;
    writeln!(w, "##chain={}", prov.chain.as_deref().unwrap_or("none"))?;
    writeln!(w, "##assembly={}", prov.target_build)?;
    writeln!(w, "##coordinates=0-based half-open")?;
    writeln!(w, "#CHR\tSTART\tEND\tGENEID\tANNOTATION")?;
    Ok(())
}

/// Write the final artifact. A `.gz` path produces BGZF ready for tabix.
pub fn write_output(path: &str, prov: &Provenance, records: &[FinalRecord]) -> Result<()> {
    let mut w = crate::io::open_writer(path)?;
    write_header(&mut w, prov)?;
    for r in records {
        let payload = r
            .annotation
            .to_payload()
            .with_context(|| format!("serializing evidence for '{}'", r.gene_id))?;
        writeln!(w, "{}\t{}\t{}\t{}\t{}", r.chrom, r.start, r.end, r.gene_id, payload)?;
    }
    w.finish().with_context(|| format!("writing '{}'", path))?;
    info!("Wrote {} rows to '{}'", records.len(), path);
    Ok(())
}

/// Write the unresolved-evidence report.
pub fn write_unresolved(path: &str, unresolved: &[UnresolvedRecord]) -> Result<()> {
    let mut w = crate::io::open_writer(path)?;
    writeln!(w, "#GENEID\tSOURCE\tANNOTATION")?;
    for u in unresolved {
        writeln!(w, "{}\t{}\t{}", u.gene_id, u.source_tag, u.payload)?;
    }
    w.finish().with_context(|| format!("writing '{}'", path))?;
    Ok(())
}
