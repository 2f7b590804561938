/// Coordinate conversion between genome assemblies.
///
/// `Liftover` is the seam the expression-link mapper converts variants through.
/// `ChainLiftover` wraps a `chainfile` liftover machine built from a UCSC chain
/// file; `NoLiftover` is used when no chain is configured and fails every
/// conversion.
use anyhow::{Context, Result};
use chainfile as chain;
use omics::coordinate::interval::interbase as chain_interval;
use rayon::prelude::*;
use std::io::{BufRead, Read};

use crate::chrom;
use crate::error::PipelineError;
use crate::io::open_reader;

/// A 0-based half-open interval with an attached payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Lifted<T> {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub payload: T,
}

pub trait Liftover: Sync {
    /// Convert `[start, end)` on `chrom` to target coordinates.
    fn lift(&self, chrom: &str, start: u64, end: u64) -> Result<(String, u64, u64), PipelineError>;
}

/// Convert every interval; failures are returned with their original coordinates.
pub fn lift_all<T: Send, L: Liftover + ?Sized>(
    liftover: &L,
    items: Vec<Lifted<T>>,
) -> (Vec<Lifted<T>>, Vec<(Lifted<T>, PipelineError)>) {
    let results: Vec<std::result::Result<Lifted<T>, (Lifted<T>, PipelineError)>> = items
        .into_par_iter()
        .map(|item| match liftover.lift(&item.chrom, item.start, item.end) {
            Ok((chrom, start, end)) => Ok(Lifted {
                chrom,
                start,
                end,
                payload: item.payload,
            }),
            Err(e) => Err((item, e)),
        })
        .collect();

    let mut mapped = Vec::new();
    let mut failed = Vec::new();
    for r in results {
        match r {
            Ok(m) => mapped.push(m),
            Err(f) => failed.push(f),
        }
    }
    (mapped, failed)
}

// ---------------------------------------------------------------------------
// No chain configured
// ---------------------------------------------------------------------------

pub struct NoLiftover;

impl Liftover for NoLiftover {
    fn lift(&self, chrom: &str, start: u64, _end: u64) -> Result<(String, u64, u64), PipelineError> {
        Err(PipelineError::CoordinateConversion {
            chrom: chrom.to_string(),
            pos: start + 1,
            reason: "no chain file configured".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// UCSC chain files
// ---------------------------------------------------------------------------

/// Liftover backed by a UCSC chain file.
///
/// Parsing, indexing and strand handling are done by the `chainfile` liftover
/// machine. An interval converts only when exactly one contiguous alignment
/// covers all of it.
pub struct ChainLiftover {
    machine: chain::liftover::Machine,
    n_chains: usize,
}

/// Reject a chain header whose spans do not fit their contigs.
fn check_header(line: &str, line_no: usize) -> Result<()> {
    let cols: Vec<&str> = line.split_whitespace().collect();
    anyhow::ensure!(
        cols.len() >= 12,
        "chain line {}: expected at least 12 header fields, got {}",
        line_no,
        cols.len()
    );
    let num = |i: usize| -> Result<u64> {
        cols[i]
            .parse::<u64>()
            .with_context(|| format!("chain line {}: invalid number '{}'", line_no, cols[i]))
    };
    for (side, size, start, end) in [("reference", 3, 5, 6), ("query", 8, 10, 11)] {
        let (size, start, end) = (num(size)?, num(start)?, num(end)?);
        anyhow::ensure!(
            start <= end && end <= size,
            "chain line {}: {} span {}-{} does not fit a contig of {} bp",
            line_no,
            side,
            start,
            end,
            size
        );
    }
    Ok(())
}

impl ChainLiftover {
    pub fn from_path(path: &str) -> Result<Self> {
        let reader = open_reader(path)?;
        Self::from_reader(reader).with_context(|| format!("reading chain file '{}'", path))
    }

    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .context("reading chain data")?;

        let mut n_chains = 0usize;
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.starts_with("chain") {
                check_header(line, i + 1)?;
                n_chains += 1;
            } else if !line.is_empty() && n_chains == 0 {
                anyhow::bail!("chain line {}: alignment data before any chain header", i + 1);
            }
        }

        let machine = chain::liftover::machine::Builder::default()
            .try_build_from(chain::Reader::new(text.as_bytes()))
            .map_err(|e| anyhow::anyhow!("parsing chain data: {}", e))?;
        Ok(Self { machine, n_chains })
    }

    pub fn n_chains(&self) -> usize {
        self.n_chains
    }

    /// Contiguous alignments touching `[start, end)` on `chrom`, trying the
    /// name as given and then its Ensembl spelling.
    fn pairs(&self, chrom: &str, start: u64, end: u64) -> Vec<(Span, Span)> {
        let bare = chrom.strip_prefix("chr").unwrap_or(chrom);
        let mut names = vec![chrom];
        if bare != chrom {
            names.push(bare);
        }
        if chrom == "chrM" {
            names.push("MT");
        }
        for name in names {
            let Ok(interval) = format!("{}:+:{}-{}", name, start, end).parse::<chain_interval::Interval>()
            else {
                continue;
            };
            if let Some(found) = self.machine.liftover(interval)
                && !found.is_empty()
            {
                return found
                    .iter()
                    .filter_map(|pair| {
                        Some((
                            Span::parse(&pair.reference().to_string())?,
                            Span::parse(&pair.query().to_string())?,
                        ))
                    })
                    .collect();
            }
        }
        Vec::new()
    }
}

/// An interbase interval as printed by `omics` (`contig:strand:start-end`).
/// Negative-strand intervals run from the higher coordinate to the lower one.
#[derive(Debug, Clone, PartialEq)]
struct Span {
    contig: String,
    reverse: bool,
    start: u64,
    end: u64,
}

impl Span {
    fn parse(raw: &str) -> Option<Self> {
        let (rest, range) = raw.rsplit_once(':')?;
        let (contig, strand) = rest.rsplit_once(':')?;
        let (start, end) = range.split_once('-')?;
        Some(Self {
            contig: contig.to_string(),
            reverse: strand == "-",
            start: start.parse().ok()?,
            end: end.parse().ok()?,
        })
    }

    /// Forward-strand `[low, high)` bounds.
    fn bounds(&self) -> (u64, u64) {
        (self.start.min(self.end), self.start.max(self.end))
    }
}

impl Liftover for ChainLiftover {
    fn lift(&self, chrom: &str, start: u64, end: u64) -> Result<(String, u64, u64), PipelineError> {
        let fail = |reason: &str| PipelineError::CoordinateConversion {
            chrom: chrom.to_string(),
            pos: start + 1,
            reason: reason.to_string(),
        };

        let pairs = self.pairs(chrom, start, end);
        if pairs.is_empty() {
            return Err(fail("position not aligned"));
        }

        let mut placed: Vec<(String, u64, u64)> = Vec::new();
        for (reference, query) in &pairs {
            let (r_lo, r_hi) = reference.bounds();
            if start < r_lo || end > r_hi {
                continue;
            }
            let (lead, tail) = (start - r_lo, end - r_lo);
            let span = if query.reverse {
                query
                    .start
                    .checked_sub(tail)
                    .zip(query.start.checked_sub(lead))
            } else {
                query
                    .start
                    .checked_add(lead)
                    .zip(query.start.checked_add(tail))
            };
            let Some((q_lo, q_hi)) = span else {
                return Err(fail("alignment runs past the target contig"));
            };
            let hit = (chrom::normalize(&query.contig), q_lo, q_hi);
            if !placed.contains(&hit) {
                placed.push(hit);
            }
        }

        match placed.len() {
            0 => Err(fail("interval spans an alignment gap")),
            1 => Ok(placed.remove(0)),
            n => Err(fail(&format!("maps to {} target locations", n))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Source chr1 [100, 200) aligns to target chr1 [1100, 1190) in two blocks
    // separated by a 10 base deletion on the source side.
    const CHAIN: &str = "\
chain 1000 chr1 1000 + 100 200 chr1 5000 + 1100 1190 1
40\t10\t0
50

chain 500 chr2 1000 + 0 30 chr5 300 - 0 30 2
30
";

    fn machine() -> ChainLiftover {
        ChainLiftover::from_reader(CHAIN.as_bytes()).unwrap()
    }

    #[test]
    fn test_forward_strand_blocks() {
        let m = machine();
        assert_eq!(m.n_chains(), 2);
        assert_eq!(m.lift("chr1", 100, 101).unwrap(), ("chr1".into(), 1100, 1101));
        assert_eq!(m.lift("chr1", 139, 140).unwrap(), ("chr1".into(), 1139, 1140));
        // Second block starts after the 10 base gap.
        assert_eq!(m.lift("chr1", 150, 151).unwrap(), ("chr1".into(), 1140, 1141));
    }

    #[test]
    fn test_gap_and_unknown_chrom_fail() {
        let m = machine();
        assert!(matches!(
            m.lift("chr1", 145, 146),
            Err(PipelineError::CoordinateConversion { .. })
        ));
        assert!(m.lift("chr1", 130, 160).is_err());
        assert!(m.lift("chr9", 10, 11).is_err());
        assert!(m.lift("chr1", 5, 6).is_err());
    }

    #[test]
    fn test_reverse_strand_block() {
        let m = machine();
        // Source chr2 base 0 maps to the last base of the 300 bp target contig.
        assert_eq!(m.lift("chr2", 0, 1).unwrap(), ("chr5".into(), 299, 300));
        assert_eq!(m.lift("chr2", 29, 30).unwrap(), ("chr5".into(), 270, 271));
    }

    #[test]
    fn test_overlapping_chains_keep_every_block() {
        let chain = "\
chain 10 chr1 1000 + 0 100 chr7 1000 + 0 100 1
100

chain 99 chr1 1000 + 50 60 chr3 1000 + 500 510 2
10
";
        let m = ChainLiftover::from_reader(chain.as_bytes()).unwrap();
        // Covered only by the low-scoring chain.
        assert_eq!(m.lift("chr1", 10, 11).unwrap(), ("chr7".into(), 10, 11));
        assert_eq!(m.lift("chr1", 70, 71).unwrap(), ("chr7".into(), 70, 71));
        // Covered by both: no single placement.
        assert!(m.lift("chr1", 55, 56).is_err());
    }

    #[test]
    fn test_ensembl_contig_names() {
        let chain = "chain 10 1 1000 + 0 100 1 1000 + 200 300 1\n100\n";
        let m = ChainLiftover::from_reader(chain.as_bytes()).unwrap();
        assert_eq!(m.lift("chr1", 10, 11).unwrap(), ("chr1".into(), 210, 211));
    }

    #[test]
    fn test_query_span_past_contig_end_is_rejected_on_load() {
        let chain = "chain 1 chr1 1000 + 0 10 chr2 5 - 0 10 1\n10\n";
        let err = ChainLiftover::from_reader(chain.as_bytes()).err().unwrap();
        assert!(format!("{:#}", err).contains("does not fit a contig of 5 bp"));
    }

    #[test]
    fn test_lift_all_partitions_results() {
        let m = machine();
        let items = vec![
            Lifted { chrom: "chr1".into(), start: 100, end: 101, payload: "ok" },
            Lifted { chrom: "chr1".into(), start: 145, end: 146, payload: "gap" },
            Lifted { chrom: "chrX".into(), start: 1, end: 2, payload: "nochrom" },
        ];
        let (mapped, failed) = lift_all(&m, items);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].payload, "ok");
        assert_eq!(mapped[0].start, 1100);
        let failed: Vec<&str> = failed.iter().map(|(f, _)| f.payload).collect();
        assert_eq!(failed, vec!["gap", "nochrom"]);
    }

    #[test]
    fn test_no_liftover_fails_everything() {
        let items = vec![Lifted { chrom: "chr1".into(), start: 1, end: 2, payload: () }];
        let (mapped, failed) = lift_all(&NoLiftover, items);
        assert!(mapped.is_empty());
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.start, 1);
    }

    #[test]
    fn test_data_before_header_is_rejected() {
        assert!(ChainLiftover::from_reader("10\n".as_bytes()).is_err());
    }

    #[test]
    fn test_span_display_parsing() {
        assert_eq!(
            Span::parse("chr5:-:300-270").unwrap().bounds(),
            (270, 300)
        );
        assert!(Span::parse("chr5:-:5--5").is_none());
    }
}
