/// CLI argument definitions using clap derive macros.
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "generegions",
    about = "Build gene-centric regulatory region annotations for burden testing",
    version
)]
pub struct Cli {
    /// Number of Rayon threads (global). Defaults to Rayon's internal heuristic.
    #[arg(long, global = true)]
    pub rayon_threads: Option<usize>,

    /// Log level (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full pipeline and write the annotated region table
    Build(BuildArgs),
    /// Collapse per-cell-type regulatory activity files into one feature table
    AggregateRegulation(AggregateArgs),
    /// Parse eQTL tables and place their variants on the target assembly
    LiftVariants(LiftArgs),
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct BuildArgs {
    /// GENCODE gene model (GTF, optionally .gz)
    #[arg(long)]
    pub gencode: String,

    /// APPRIS principal-isoform table (gene_name, gene_id, transcript_id, ccds, tag)
    #[arg(long)]
    pub appris: String,

    /// Regulatory activity GFF, one per cell type. Accepts LABEL=PATH to set the
    /// cell type explicitly; otherwise the epigenome attribute or file name is used.
    #[arg(long, num_args = 1.., required = true)]
    pub regulation: Vec<String>,

    /// GTEx significant variant-gene pairs, one per tissue. Accepts LABEL=PATH;
    /// otherwise the tissue is the file name up to its first '.'.
    #[arg(long, num_args = 1.., required = true)]
    pub eqtl: Vec<String>,

    /// UCSC chain file used to lift variants that are not on --target-build
    #[arg(long)]
    pub chain: Option<String>,

    /// Assembly tag (last field of the eQTL variant key) of the output coordinates
    #[arg(long, default_value = "b38")]
    pub target_build: String,

    /// Output table. If the path ends in .gz, the output is BGZF-compressed.
    #[arg(long)]
    pub out: String,

    /// Report of evidence whose gene is missing from the gene model
    /// [default: <out>.unresolved.tsv]
    #[arg(long)]
    pub failed: Option<String>,

    /// Directory for intermediate stage tables (regulatory features, lifted and unmapped variants)
    #[arg(long)]
    pub work_dir: Option<String>,

    /// GENCODE release recorded in the header [default: gene model file name]
    #[arg(long)]
    pub gencode_version: Option<String>,

    /// Regulatory Build release recorded in the header [default: regulation file names]
    #[arg(long)]
    pub regulation_version: Option<String>,

    /// GTEx release recorded in the header [default: eQTL file names]
    #[arg(long)]
    pub gtex_version: Option<String>,

    /// APPRIS release recorded in the header [default: APPRIS file name]
    #[arg(long)]
    pub appris_version: Option<String>,
}

// ---------------------------------------------------------------------------
// aggregate-regulation
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct AggregateArgs {
    /// Regulatory activity GFF, one per cell type (LABEL=PATH accepted)
    #[arg(long, num_args = 1.., required = true)]
    pub regulation: Vec<String>,

    /// Output feature table (CHR START END REGULATORY_ID CLASS TISSUES).
    /// If the path ends in .gz, the output is BGZF-compressed.
    #[arg(long)]
    pub out: String,
}

// ---------------------------------------------------------------------------
// lift-variants
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct LiftArgs {
    /// GTEx significant variant-gene pairs, one per tissue (LABEL=PATH accepted)
    #[arg(long, num_args = 1.., required = true)]
    pub eqtl: Vec<String>,

    /// UCSC chain file used to lift variants that are not on --target-build
    #[arg(long)]
    pub chain: Option<String>,

    /// Assembly tag of the output coordinates
    #[arg(long, default_value = "b38")]
    pub target_build: String,

    /// Output prefix: writes <out>.bed and <out>.unmapped.bed
    #[arg(long)]
    pub out: String,
}
