/// Error taxonomy shared by the pipeline stages.
///
/// Only `EmptyInput` is fatal. The other variants describe per-record problems
/// that stages absorb locally: they are logged, counted and skipped (or routed
/// to a side report) without aborting the run.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage produced no output; signals an upstream data problem.
    #[error("{stage}: no records produced")]
    EmptyInput { stage: &'static str },

    /// A raw record could not be parsed into its expected shape.
    #[error("{source_name} line {line}: {reason}")]
    MalformedRecord {
        source_name: String,
        line: usize,
        reason: String,
    },

    /// An evidence record names a gene that is not in the canonical gene table.
    #[error("gene '{gene_id}' ({source_tag}) has no canonical coordinates")]
    UnresolvedGeneReference { gene_id: String, source_tag: String },

    /// Liftover could not place an interval on the target assembly.
    #[error("cannot convert {chrom}:{pos}: {reason}")]
    CoordinateConversion {
        chrom: String,
        pos: u64,
        reason: String,
    },
}

impl PipelineError {
    pub fn empty(stage: &'static str) -> Self {
        Self::EmptyInput { stage }
    }

    pub fn malformed(source_name: &str, line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            source_name: source_name.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_identify_stage_and_record() {
        let e = PipelineError::empty("overlap linker");
        assert_eq!(e.to_string(), "overlap linker: no records produced");

        let e = PipelineError::malformed("Liver.v8.tsv", 12, "missing gene_id");
        assert_eq!(e.to_string(), "Liver.v8.tsv line 12: missing gene_id");
    }

    #[test]
    fn test_empty_input_survives_anyhow_downcast() {
        let err: anyhow::Error = PipelineError::empty("merge engine").into();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyInput {
                stage: "merge engine"
            })
        ));
    }
}
