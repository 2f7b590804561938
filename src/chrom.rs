/// Chromosome naming and natural ordering.
///
/// Sources disagree on contig names (`1` vs `chr1`, `MT` vs `chrM`); everything
/// is normalized to the UCSC `chr` form on read.
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^chr([1-9]|1[0-9]|2[0-2]|X|Y|M)$").expect("valid chromosome pattern")
});

/// Normalize a contig name to the `chr` prefixed form.
pub fn normalize(raw: &str) -> String {
    let raw = raw.trim();
    let bare = raw
        .strip_prefix("chr")
        .or_else(|| raw.strip_prefix("Chr"))
        .unwrap_or(raw);
    match bare {
        "MT" | "M" => "chrM".to_string(),
        _ => format!("chr{}", bare),
    }
}

/// True for primary-assembly chromosomes (1-22, X, Y, M) after normalization.
pub fn is_canonical(chrom: &str) -> bool {
    CANONICAL.is_match(chrom)
}

/// Sort rank: numeric chromosomes first, then X, Y, M, then everything else.
fn rank(chrom: &str) -> (u8, u32) {
    let bare = chrom.strip_prefix("chr").unwrap_or(chrom);
    if let Ok(n) = bare.parse::<u32>() {
        return (0, n);
    }
    match bare {
        "X" => (1, 0),
        "Y" => (2, 0),
        "M" | "MT" => (3, 0),
        _ => (4, 0),
    }
}

/// Natural chromosome ordering (`chr2` < `chr10` < `chrX` < `chrY` < `chrM`).
pub fn compare(a: &str, b: &str) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

/// Compare two positions by (chromosome, start).
pub fn compare_pos(a_chrom: &str, a_start: u64, b_chrom: &str, b_start: u64) -> Ordering {
    compare(a_chrom, b_chrom).then(a_start.cmp(&b_start))
}
