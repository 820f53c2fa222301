//! # Histogram
//!
//! Approximate frequency summary with geometrically spaced buckets. Bucket `i` covers
//! `exp(i·ln(1+ε))..exp((i+1)·ln(1+ε))` so a bucket's representative value is within
//! roughly ε/2 of every value placed in it. Sum, count, min and max are tracked exactly.

use std::collections::BTreeMap;

/// Relative error used when none is configured
pub const DEFAULT_EPSILON: f64 = 0.1;

/// Smallest relative error accepted; finer buckets lose their index precision
pub const MIN_EPSILON: f64 = 1e-9;

/// A non-empty bucket in its emitted form
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bucket {
    pub value: f64,
    pub count: u64,
}

#[derive(Clone, Debug)]
pub struct ExponentialHistogram {
    buckets: BTreeMap<i64, u64>,
    bin_size: f64,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl ExponentialHistogram {
    /// An ε below [MIN_EPSILON], or one that is not a number, is raised to [MIN_EPSILON]
    pub fn new(epsilon: f64) -> Self {
        let epsilon = if epsilon >= MIN_EPSILON { epsilon } else { MIN_EPSILON };
        Self {
            buckets: BTreeMap::new(),
            bin_size: epsilon.ln_1p(),
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Values <= 0 are pinned to bucket 0, there is no negative domain
    pub fn bucket_index(&self, value: f64) -> i64 {
        if value <= 0.0 {
            return 0;
        }
        (value.ln() / self.bin_size).floor() as i64
    }

    /// Geometric midpoint of a bucket
    pub fn value_of(&self, bucket: i64) -> f64 {
        ((bucket as f64 + 0.5) * self.bin_size).exp()
    }

    pub fn bucket_count(&self, bucket: i64) -> u64 {
        self.buckets.get(&bucket).copied().unwrap_or(0)
    }

    /// Record `count` observations of `value`; NaN and infinities are ignored
    pub fn add(&mut self, value: f64, count: u64) {
        if !value.is_finite() || count == 0 {
            return;
        }

        let bucket = self.buckets.entry(self.bucket_index(value)).or_default();
        *bucket = bucket.saturating_add(count);
        self.count = self.count.saturating_add(count);
        self.sum += value * count as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Combine another histogram into this one
    /// * Histograms built with a different ε are left untouched
    pub fn merge(&mut self, other: &ExponentialHistogram) {
        if other.bin_size != self.bin_size {
            return;
        }

        for (bucket, count) in &other.buckets {
            let total = self.buckets.entry(*bucket).or_default();
            *total = total.saturating_add(*count);
        }
        self.count = self.count.saturating_add(other.count);
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Buckets with observations, in ascending value order
    pub fn non_empty_buckets(&self) -> Vec<Bucket> {
        self.buckets
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(bucket, count)| Bucket {
                value: self.value_of(*bucket),
                count: *count,
            })
            .collect()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }
}

impl Default for ExponentialHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_histogram_is_empty() {
        let histogram = ExponentialHistogram::default();
        assert_eq!(histogram.bin_size, (1.0 + DEFAULT_EPSILON).ln());
        assert_eq!(histogram.count(), 0);
        assert_eq!(histogram.sum(), 0.0);
        assert_eq!(histogram.min(), None);
        assert_eq!(histogram.mean(), 0.0);
        assert!(histogram.non_empty_buckets().is_empty());
    }

    #[test]
    fn add_ignores_non_finite_values() {
        let mut histogram = ExponentialHistogram::default();
        histogram.add(1.0, 1);
        histogram.add(2.0, 2);
        histogram.add(f64::NAN, 1);
        histogram.add(f64::INFINITY, 1);
        histogram.add(f64::NEG_INFINITY, 1);

        assert_eq!(histogram.bucket_count(histogram.bucket_index(1.0)), 1);
        assert_eq!(histogram.bucket_count(histogram.bucket_index(2.0)), 2);
        assert_eq!(histogram.count(), 3);
        assert_eq!(histogram.sum(), 5.0);
    }

    #[test]
    fn tracks_min_and_max() {
        let mut histogram = ExponentialHistogram::default();
        histogram.add(1.0, 1);
        histogram.add(2.0, 1);
        histogram.add(0.5, 1);

        assert_eq!(histogram.min(), Some(0.5));
        assert_eq!(histogram.max(), Some(2.0));
    }

    #[test]
    fn non_positive_values_share_bucket_zero() {
        let mut histogram = ExponentialHistogram::default();
        histogram.add(0.0, 1);
        histogram.add(-5.0, 2);

        assert_eq!(histogram.bucket_count(0), 3);
        assert_eq!(histogram.min(), Some(-5.0));
        assert_eq!(histogram.sum(), -10.0);
    }

    #[test]
    fn merge_combines_buckets_and_totals() {
        let mut a = ExponentialHistogram::default();
        a.add(1.0, 2);
        a.add(100.0, 1);
        let mut b = ExponentialHistogram::default();
        b.add(1.0, 1);
        b.add(0.25, 4);

        a.merge(&b);
        assert_eq!(a.count(), 8);
        assert_eq!(a.sum(), 104.0);
        assert_eq!(a.min(), Some(0.25));
        assert_eq!(a.max(), Some(100.0));
        assert_eq!(a.bucket_count(a.bucket_index(1.0)), 3);
    }

    #[test]
    fn merge_ignores_different_bin_sizes() {
        let mut a = ExponentialHistogram::new(0.1);
        a.add(1.0, 1);
        let mut b = ExponentialHistogram::new(0.01);
        b.add(5.0, 1);

        a.merge(&b);
        assert_eq!(a.count(), 1);
        assert_eq!(a.max(), Some(1.0));
    }

    #[test]
    fn buckets_are_sorted_by_value() {
        let mut histogram = ExponentialHistogram::default();
        for value in [500.0, 3.0, 42.0, 3.01] {
            histogram.add(value, 1);
        }

        let buckets = histogram.non_empty_buckets();
        assert_eq!(buckets.len(), 3);
        assert!(buckets.windows(2).all(|w| w[0].value < w[1].value));
        assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), 4);
    }

    #[test]
    fn counts_saturate_instead_of_overflowing() {
        let mut histogram = ExponentialHistogram::default();
        histogram.add(1.0, u64::MAX - 1);
        histogram.add(1.0, 5);

        let mut other = ExponentialHistogram::default();
        other.add(1.0, 10);
        histogram.merge(&other);

        assert_eq!(histogram.count(), u64::MAX);
        assert_eq!(histogram.bucket_count(histogram.bucket_index(1.0)), u64::MAX);
    }

    #[test]
    fn tiny_epsilon_keeps_values_apart() {
        let histogram = ExponentialHistogram::new(MIN_EPSILON);
        let small = histogram.bucket_index(10.0);
        let large = histogram.bucket_index(1e300);
        assert!(small < large);

        let representative = histogram.value_of(large);
        assert!((representative / 1e300 - 1.0).abs() < 1e-6, "{representative}");
    }

    #[test]
    fn epsilon_below_minimum_is_raised() {
        for epsilon in [1e-300, 0.0, -1.0, f64::NAN] {
            assert_eq!(
                ExponentialHistogram::new(epsilon).bin_size,
                ExponentialHistogram::new(MIN_EPSILON).bin_size
            );
        }
    }

    proptest! {
        #[test]
        fn representative_value_is_within_half_epsilon(value in 1e-6f64..1e12) {
            let histogram = ExponentialHistogram::default();
            let representative = histogram.value_of(histogram.bucket_index(value));
            let bound = (1.0 + DEFAULT_EPSILON).sqrt() * (1.0 + 1e-9);
            prop_assert!(representative / value <= bound, "{} vs {}", representative, value);
            prop_assert!(value / representative <= bound, "{} vs {}", representative, value);
        }
    }
}
