/// Regulatory feature aggregator.
///
/// Per-cell-type activity files list the same regulatory feature once per
/// epigenome it is active in. This stage collapses them into one record per
/// feature ID carrying the deduplicated set of cell types.
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

use crate::chrom;
use crate::error::PipelineError;
use crate::intersect::sort_intervals;
use crate::io::{file_token, open_reader, open_writer};
use crate::models::RegulatoryFeature;

pub const STAGE: &str = "regulatory feature aggregator";

/// One active regulatory feature in one cell type.
#[derive(Debug, Clone, PartialEq)]
pub struct RawActivity {
    pub cell_type: String,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub feature_id: String,
    pub feature_class: String,
}

/// A labelled input file (`LABEL=PATH` on the command line, or a bare path).
///
/// Only text before the first `=` that holds no path separator is taken as a
/// label, so `/data/tissue=Liver/x.gff` stays a bare path.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledInput {
    pub label: Option<String>,
    pub path: String,
}

impl LabelledInput {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((label, path))
                if !label.is_empty() && !path.is_empty() && !label.contains(['/', '\\']) =>
            {
                Self {
                    label: Some(label.to_string()),
                    path: path.to_string(),
                }
            }
            _ => Self {
                label: None,
                path: raw.to_string(),
            },
        }
    }
}

fn gff_attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    attrs.split(';').find_map(|kv| {
        let (k, v) = kv.trim().split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Parse one regulatory-activity GFF row. `Ok(None)` for rows that are not active.
pub fn parse_activity_line(
    line: &str,
    default_cell_type: &str,
    source: &str,
    line_no: usize,
) -> Result<Option<RawActivity>, PipelineError> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < 9 {
        return Err(PipelineError::malformed(
            source,
            line_no,
            format!("expected 9 columns, got {}", cols.len()),
        ));
    }
    let attrs = cols[8];
    if gff_attribute(attrs, "activity").is_none_or(|a| !a.eq_ignore_ascii_case("ACTIVE")) {
        return Ok(None);
    }

    let start: u64 = cols[3].parse().map_err(|_| {
        PipelineError::malformed(source, line_no, format!("invalid start '{}'", cols[3]))
    })?;
    let end: u64 = cols[4].parse().map_err(|_| {
        PipelineError::malformed(source, line_no, format!("invalid end '{}'", cols[4]))
    })?;
    if start == 0 || end < start {
        return Err(PipelineError::malformed(
            source,
            line_no,
            format!("invalid span {}-{}", start, end),
        ));
    }
    let feature_id = gff_attribute(attrs, "regulatory_feature_stable_id")
        .or_else(|| gff_attribute(attrs, "ID"))
        .ok_or_else(|| PipelineError::malformed(source, line_no, "missing feature id"))?;
    let cell_type = gff_attribute(attrs, "epigenome").unwrap_or(default_cell_type);

    Ok(Some(RawActivity {
        cell_type: cell_type.to_string(),
        chrom: chrom::normalize(cols[0]),
        start: start - 1,
        end,
        feature_id: feature_id.to_string(),
        feature_class: cols[2].to_string(),
    }))
}

/// Read the active features from one per-cell-type activity file.
pub fn read_activity_from<R: BufRead>(
    reader: R,
    default_cell_type: &str,
    source: &str,
) -> Result<Vec<RawActivity>> {
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading '{}' line {}", source, i + 1))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_activity_line(&line, default_cell_type, source, i + 1) {
            Ok(Some(r)) => records.push(r),
            Ok(None) => {}
            Err(e) => {
                debug!("{}", e);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("{}: skipped {} malformed activity rows", source, skipped);
    }
    Ok(records)
}

/// Read every activity file in parallel. When an explicit label is given it
/// overrides the per-row epigenome attribute.
pub fn read_activity_files(inputs: &[LabelledInput]) -> Result<Vec<RawActivity>> {
    let per_file: Vec<Vec<RawActivity>> = inputs
        .par_iter()
        .map(|input| -> Result<Vec<RawActivity>> {
            let default_cell_type = input
                .label
                .clone()
                .unwrap_or_else(|| file_token(&input.path));
            let reader = open_reader(&input.path)?;
            let mut records = read_activity_from(reader, &default_cell_type, &input.path)?;
            if input.label.is_some() {
                for r in &mut records {
                    r.cell_type.clone_from(&default_cell_type);
                }
            }
            info!("Read {} active features from '{}'", records.len(), input.path);
            Ok(records)
        })
        .collect::<Result<_>>()?;
    Ok(per_file.into_iter().flatten().collect())
}

/// Group activity records by feature ID, accumulating a deduplicated tissue set.
///
/// Coordinates and class come from the first record seen for each feature.
/// Output is sorted by (chromosome, start).
pub fn aggregate<I>(records: I) -> Result<Vec<RegulatoryFeature>>
where
    I: IntoIterator<Item = RawActivity>,
{
    let mut by_id: HashMap<String, RegulatoryFeature> = HashMap::new();
    let mut eligible = 0usize;
    let mut off_pattern = 0usize;

    for r in records {
        if !chrom::is_canonical(&r.chrom) {
            off_pattern += 1;
            continue;
        }
        eligible += 1;
        by_id
            .entry(r.feature_id.clone())
            .or_insert_with(|| RegulatoryFeature {
                chrom: r.chrom,
                start: r.start,
                end: r.end,
                feature_id: r.feature_id,
                feature_class: r.feature_class,
                tissues: BTreeSet::new(),
            })
            .tissues
            .insert(r.cell_type);
    }

    if off_pattern > 0 {
        warn!(
            "{}: skipped {} records on non-canonical contigs",
            STAGE, off_pattern
        );
    }
    if eligible == 0 {
        return Err(PipelineError::empty(STAGE).into());
    }

    let mut features: Vec<RegulatoryFeature> = by_id.into_values().collect();
    // Stable sort on top of an ID sort keeps ties deterministic.
    features.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
    sort_intervals(&mut features);
    info!(
        "{}: {} activity records collapsed into {} features",
        STAGE,
        eligible,
        features.len()
    );
    Ok(features)
}

/// Write aggregated features as a sorted BED-like table.
pub fn write_features(path: &str, features: &[RegulatoryFeature]) -> Result<()> {
    let mut w = open_writer(path)?;
    writeln!(w, "#CHR\tSTART\tEND\tREGULATORY_ID\tCLASS\tTISSUES")?;
    for f in features {
        let tissues: Vec<&str> = f.tissues.iter().map(String::as_str).collect();
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}",
            f.chrom,
            f.start,
            f.end,
            f.feature_id,
            f.feature_class,
            tissues.join(",")
        )?;
    }
    w.finish().with_context(|| format!("writing '{}'", path))?;
    Ok(())
}
