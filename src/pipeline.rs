/// Stage orchestration for the `build`, `aggregate-regulation` and
/// `lift-variants` subcommands.
///
/// Stage order for `build`:
///   1. gene model + isoform-annotation joiner
///   2. regulatory feature aggregator
///   3. expression-link mapper (parse, lift, then link to features)
///   4. overlap linker (runs alongside the linking half of stage 3)
///   5. merge engine
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::cli::{AggregateArgs, BuildArgs, LiftArgs};
use crate::expression::{self, NormalizedVariants};
use crate::gencode;
use crate::io::file_label;
use crate::isoform;
use crate::liftover::{ChainLiftover, Liftover, NoLiftover};
use crate::merge::{self, Provenance};
use crate::overlap;
use crate::regulatory::{self, LabelledInput};

/// Everything a `build` run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub gencode: String,
    pub appris: String,
    pub regulation: Vec<LabelledInput>,
    pub eqtl: Vec<LabelledInput>,
    pub chain: Option<String>,
    pub target_build: String,
    pub out: String,
    pub failed: String,
    pub work_dir: Option<String>,
    pub provenance: Provenance,
}

fn joined_labels(inputs: &[LabelledInput]) -> String {
    inputs
        .iter()
        .map(|i| file_label(&i.path))
        .collect::<Vec<_>>()
        .join(",")
}

impl PipelineConfig {
    pub fn from_args(args: BuildArgs) -> Self {
        let regulation: Vec<LabelledInput> =
            args.regulation.iter().map(|r| LabelledInput::parse(r)).collect();
        let eqtl: Vec<LabelledInput> = args.eqtl.iter().map(|e| LabelledInput::parse(e)).collect();
        let provenance = Provenance {
            gencode: args
                .gencode_version
                .unwrap_or_else(|| file_label(&args.gencode)),
            regulation: args
                .regulation_version
                .unwrap_or_else(|| joined_labels(&regulation)),
            gtex: args.gtex_version.unwrap_or_else(|| joined_labels(&eqtl)),
            appris: args.appris_version.unwrap_or_else(|| file_label(&args.appris)),
            chain: args.chain.as_deref().map(file_label),
            target_build: args.target_build.clone(),
        };
        let failed = args
            .failed
            .unwrap_or_else(|| format!("{}.unresolved.tsv", args.out));
        Self {
            gencode: args.gencode,
            appris: args.appris,
            regulation,
            eqtl,
            chain: args.chain,
            target_build: args.target_build,
            out: args.out,
            failed,
            work_dir: args.work_dir,
            provenance,
        }
    }

    /// Check that every input exists before any stage starts.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.regulation.is_empty(), "at least one --regulation file is required");
        anyhow::ensure!(!self.eqtl.is_empty(), "at least one --eqtl file is required");
        let inputs = [self.gencode.as_str(), self.appris.as_str()]
            .into_iter()
            .chain(self.regulation.iter().map(|r| r.path.as_str()))
            .chain(self.eqtl.iter().map(|e| e.path.as_str()))
            .chain(self.chain.as_deref());
        for path in inputs {
            anyhow::ensure!(Path::new(path).is_file(), "input file '{}' does not exist", path);
        }
        Ok(())
    }

    fn work_path(&self, name: &str) -> Option<String> {
        self.work_dir
            .as_ref()
            .map(|dir| Path::new(dir).join(name).to_string_lossy().into_owned())
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub genes: usize,
    pub exon_evidence: usize,
    pub regulatory_features: usize,
    pub variants_mapped: usize,
    pub variants_failed: usize,
    pub expression_links: usize,
    pub overlap_links: usize,
    pub linked: usize,
    pub lost: usize,
}

fn load_liftover(chain: Option<&str>) -> Result<Box<dyn Liftover>> {
    match chain {
        Some(path) => {
            let lo = ChainLiftover::from_path(path)?;
            info!("Loaded {} chains from '{}'", lo.n_chains(), path);
            Ok(Box::new(lo))
        }
        None => Ok(Box::new(NoLiftover)),
    }
}

/// Stage 3(a): parse every eQTL table and place the variants on `target_build`.
fn place_variants(
    eqtl: &[LabelledInput],
    chain: Option<&str>,
    target_build: &str,
) -> Result<NormalizedVariants> {
    let rows = expression::read_eqtl_files(eqtl)?;
    let links = expression::collect_links(rows)?;
    let liftover = load_liftover(chain)?;
    Ok(expression::normalize_coordinates(links, target_build, &*liftover))
}

/// Run stages 1-5 and write the final artifact plus the failure report.
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;
    let mut summary = RunSummary::default();

    // Stage 1
    let model = gencode::read_gene_model(&config.gencode)?;
    let table = isoform::read_isoform_table(&config.appris)?;
    let exon_evidence = isoform::annotate_features(&model.features, &table)?;
    summary.genes = model.genes.len();
    summary.exon_evidence = exon_evidence.len();

    // Stage 2
    let raw = regulatory::read_activity_files(&config.regulation)?;
    let features = regulatory::aggregate(raw)?;
    summary.regulatory_features = features.len();
    if let Some(path) = config.work_path("regulatory_features.tsv") {
        regulatory::write_features(&path, &features)?;
    }

    // Stage 3(a)
    let variants = place_variants(&config.eqtl, config.chain.as_deref(), &config.target_build)?;
    summary.variants_mapped = variants.mapped.len();
    summary.variants_failed = variants.failed.len();
    if let Some(path) = config.work_path("variants.lifted.bed") {
        expression::write_variant_bed(&path, &variants.mapped)?;
    }
    if let Some(path) = config.work_path("variants.unmapped.bed") {
        expression::write_unmapped(&path, &variants.failed)?;
    }

    // Stages 3(b) and 4 only read the aggregated features.
    let (expression_evidence, overlap_evidence) = rayon::join(
        || expression::link_features(&variants.mapped, &features),
        || overlap::link_overlaps(&model.genes, &features),
    );
    let expression_evidence = expression_evidence?;
    let overlap_evidence = overlap_evidence?;
    summary.expression_links = expression_evidence.len();
    summary.overlap_links = overlap_evidence.len();

    // Stage 5
    let outcome = merge::merge(
        &model.genes,
        exon_evidence
            .into_iter()
            .chain(expression_evidence)
            .chain(overlap_evidence),
    )?;
    summary.linked = outcome.records.len();
    summary.lost = outcome.unresolved.len();

    merge::write_output(&config.out, &config.provenance, &outcome.records)?;
    merge::write_unresolved(&config.failed, &outcome.unresolved)
        .with_context(|| format!("writing failure report '{}'", config.failed))?;

    info!(
        "Summary: variants mapped={} failed={}; expression links={}; overlap links={}; evidence linked={} lost={}",
        summary.variants_mapped,
        summary.variants_failed,
        summary.expression_links,
        summary.overlap_links,
        summary.linked,
        summary.lost
    );
    Ok(summary)
}

pub fn run_build(args: BuildArgs) -> Result<()> {
    let config = PipelineConfig::from_args(args);
    run(&config)?;
    Ok(())
}

pub fn run_aggregate(args: AggregateArgs) -> Result<()> {
    let inputs: Vec<LabelledInput> = args.regulation.iter().map(|r| LabelledInput::parse(r)).collect();
    let raw = regulatory::read_activity_files(&inputs)?;
    let features = regulatory::aggregate(raw)?;
    regulatory::write_features(&args.out, &features)?;
    info!("Wrote {} regulatory features to '{}'", features.len(), args.out);
    Ok(())
}

pub fn run_lift(args: LiftArgs) -> Result<()> {
    let inputs: Vec<LabelledInput> = args.eqtl.iter().map(|e| LabelledInput::parse(e)).collect();
    let variants = place_variants(&inputs, args.chain.as_deref(), &args.target_build)?;
    let mapped_path = format!("{}.bed", args.out);
    let unmapped_path = format!("{}.unmapped.bed", args.out);
    expression::write_variant_bed(&mapped_path, &variants.mapped)?;
    expression::write_unmapped(&unmapped_path, &variants.failed)?;
    info!(
        "Wrote {} placed variants to '{}' and {} unmapped to '{}'",
        variants.mapped.len(),
        mapped_path,
        variants.failed.len(),
        unmapped_path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(out: &str) -> BuildArgs {
        BuildArgs {
            gencode: "/data/gencode.v44.annotation.gtf.gz".into(),
            appris: "/data/appris_data.principal.txt".into(),
            regulation: vec!["K562=/data/k562.gff.gz".into(), "/data/HeLa.gff".into()],
            eqtl: vec!["/data/Liver.v8.signif_variant_gene_pairs.txt.gz".into()],
            chain: None,
            target_build: "b38".into(),
            out: out.into(),
            failed: None,
            work_dir: None,
            gencode_version: Some("v44".into()),
            regulation_version: None,
            gtex_version: None,
            appris_version: None,
        }
    }

    #[test]
    fn test_config_defaults() {
        let cfg = PipelineConfig::from_args(args("/out/regions.tsv.gz"));
        assert_eq!(cfg.failed, "/out/regions.tsv.gz.unresolved.tsv");
        assert_eq!(cfg.provenance.gencode, "v44");
        assert_eq!(cfg.provenance.appris, "appris_data.principal");
        assert_eq!(cfg.provenance.regulation, "k562,HeLa");
        assert_eq!(cfg.provenance.gtex, "Liver.v8.signif_variant_gene_pairs");
        assert_eq!(cfg.regulation[0].label.as_deref(), Some("K562"));
        assert_eq!(cfg.regulation[1].label, None);
        assert!(cfg.work_path("x.tsv").is_none());
    }

    #[test]
    fn test_validate_reports_missing_input() {
        let cfg = PipelineConfig::from_args(args("/out/regions.tsv"));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("gencode.v44.annotation.gtf.gz"));
    }

    #[test]
    fn test_work_path_joins_directory() {
        let mut a = args("/out/regions.tsv");
        a.work_dir = Some("/tmp/work".into());
        let cfg = PipelineConfig::from_args(a);
        assert_eq!(cfg.work_path("regulatory_features.tsv").as_deref(), Some("/tmp/work/regulatory_features.tsv"));
    }
}
