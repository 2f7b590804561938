/// Interval-overlap primitive.
///
/// Reports every (A, B) pair whose 0-based half-open intervals share at least
/// one base, in the manner of `bedtools intersect -wa -wb`. The right-hand set
/// is indexed into one `ArrayBackedIntervalTree` per chromosome and every
/// left-hand record is queried against it, so each overlapping pair is
/// reported exactly once.
use anyhow::Result;
use bio::data_structures::interval_tree::ArrayBackedIntervalTree;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::chrom;

/// Anything with a chromosome and a 0-based half-open span.
pub trait Interval {
    fn chrom(&self) -> &str;
    fn start(&self) -> u64;
    fn end(&self) -> u64;
}

fn cmp_intervals<T: Interval>(a: &T, b: &T) -> Ordering {
    chrom::compare_pos(a.chrom(), a.start(), b.chrom(), b.start())
}

/// Sort intervals by (natural chromosome order, start, end).
pub fn sort_intervals<T: Interval>(items: &mut [T]) {
    items.sort_by(|a, b| cmp_intervals(a, b).then(a.end().cmp(&b.end())));
}

/// Index of the first out-of-order element, if any.
fn first_unsorted<T: Interval>(items: &[T]) -> Option<usize> {
    items
        .windows(2)
        .position(|w| cmp_intervals(&w[0], &w[1]) == Ordering::Greater)
        .map(|i| i + 1)
}

/// Interval trees over one interval set, keyed by chromosome. Tree payloads
/// are positions in the indexed slice.
struct IntervalIndex {
    trees: HashMap<String, ArrayBackedIntervalTree<u64, usize>>,
}

impl IntervalIndex {
    fn build<T: Interval>(items: &[T]) -> Self {
        let mut trees: HashMap<String, ArrayBackedIntervalTree<u64, usize>> = HashMap::new();
        for (i, item) in items.iter().enumerate() {
            // Empty spans overlap nothing.
            if item.start() >= item.end() {
                continue;
            }
            trees
                .entry(item.chrom().to_string())
                .or_insert_with(ArrayBackedIntervalTree::new)
                .insert(item.start()..item.end(), i);
        }
        trees.values_mut().for_each(|tree| tree.index());
        Self { trees }
    }

    /// Positions of the indexed records overlapping `query`, in slice order.
    fn overlapping<T: Interval>(&self, query: &T) -> Vec<usize> {
        if query.start() >= query.end() {
            return Vec::new();
        }
        let Some(tree) = self.trees.get(query.chrom()) else {
            return Vec::new();
        };
        let mut hits: Vec<usize> = tree
            .find(query.start()..query.end())
            .iter()
            .map(|entry| *entry.data())
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// Intersect two interval sets that are already sorted by (chromosome, start).
///
/// Fails if either input is out of order.
pub fn intersect_sorted<'a, A: Interval, B: Interval>(
    a: &'a [A],
    b: &'a [B],
) -> Result<Vec<(&'a A, &'a B)>> {
    if let Some(i) = first_unsorted(a) {
        anyhow::bail!(
            "intersect: left input not sorted at record {} ({}:{})",
            i + 1,
            a[i].chrom(),
            a[i].start()
        );
    }
    if let Some(i) = first_unsorted(b) {
        anyhow::bail!(
            "intersect: right input not sorted at record {} ({}:{})",
            i + 1,
            b[i].chrom(),
            b[i].start()
        );
    }
    intersect(a, b)
}

/// Intersect two interval sets in any order. Pairs come out in left-hand
/// order, then right-hand order.
pub fn intersect<'a, A: Interval, B: Interval>(
    a: &'a [A],
    b: &'a [B],
) -> Result<Vec<(&'a A, &'a B)>> {
    let index = IntervalIndex::build(b);
    let mut pairs = Vec::new();
    for ra in a {
        for j in index.overlapping(ra) {
            pairs.push((ra, &b[j]));
        }
    }
    Ok(pairs)
}
