//! Generic bucket reconciliation
//!
//! Matches two collections under a cheap bucketing key and a value equality
//! relation. Used for documents (keyed by filesize) and annotations (keyed by
//! page).
//!
//! The match is all-pairs, not a bijection: when a bucket holds several
//! mutually equal items on both sides, every equal cross pair is emitted, so
//! `pairs.len()` can exceed `min(left.len(), right.len())`.

use std::collections::BTreeMap;

/// Result of reconciling a left and a right collection
#[derive(Debug, Clone)]
pub struct Reconciliation<T> {
    /// Every `(left, right)` cross pair whose values are equal
    pub pairs: Vec<(T, T)>,
    /// Left items that are part of no pair
    pub only_left: Vec<T>,
    /// Right items that are part of no pair
    pub only_right: Vec<T>,
}

impl<T> Default for Reconciliation<T> {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            only_left: Vec::new(),
            only_right: Vec::new(),
        }
    }
}

impl<T> Reconciliation<T> {
    /// True when nothing was matched and nothing is left over
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.only_left.is_empty() && self.only_right.is_empty()
    }

    /// Swap the roles of left and right
    pub fn transpose(self) -> Self {
        Self {
            pairs: self.pairs.into_iter().map(|(a, b)| (b, a)).collect(),
            only_left: self.only_right,
            only_right: self.only_left,
        }
    }
}

/// Bucket items by key, keeping insertion order inside each bucket
fn bucket<T, K, F>(items: impl IntoIterator<Item = T>, key: &mut F) -> BTreeMap<K, Vec<T>>
where
    K: Ord,
    F: FnMut(&T) -> K,
{
    let mut buckets: BTreeMap<K, Vec<T>> = BTreeMap::new();
    for item in items {
        buckets.entry(key(&item)).or_default().push(item);
    }
    buckets
}

/// Reconcile `left` against `right`.
///
/// Keys present on one side only send all their items to that side's
/// only-set. Colliding buckets are compared as a full cartesian product; an
/// item equal to nothing on the other side lands in its only-set, so every
/// item ends up in at least one pair or in its only-set, never both.
pub fn reconcile<T, K, F, E>(
    left: impl IntoIterator<Item = T>,
    right: impl IntoIterator<Item = T>,
    mut key: F,
    mut eq: E,
) -> Reconciliation<T>
where
    T: Clone,
    K: Ord,
    F: FnMut(&T) -> K,
    E: FnMut(&T, &T) -> bool,
{
    let left_buckets = bucket(left, &mut key);
    let mut right_buckets = bucket(right, &mut key);

    let mut result = Reconciliation::default();

    for (k, left_items) in left_buckets {
        let Some(right_items) = right_buckets.remove(&k) else {
            result.only_left.extend(left_items);
            continue;
        };

        let mut right_matched = vec![false; right_items.len()];
        for a in left_items {
            let mut matched = false;
            for (j, b) in right_items.iter().enumerate() {
                if eq(&a, b) {
                    result.pairs.push((a.clone(), b.clone()));
                    right_matched[j] = true;
                    matched = true;
                }
            }
            if !matched {
                result.only_left.push(a);
            }
        }

        result.only_right.extend(
            right_items
                .into_iter()
                .zip(right_matched)
                .filter(|(_, matched)| !matched)
                .map(|(b, _)| b),
        );
    }

    for (_, right_items) in right_buckets {
        result.only_right.extend(right_items);
    }

    result
}
