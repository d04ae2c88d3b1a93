//! Time-bucket aggregation over an ordered point sequence

use crate::types::{DataPoint, Timestamp};

/// Aggregation applied to each downsampling bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Avg,
    Sum,
    Min,
    Max,
    First,
    Last,
}

impl Aggregation {
    /// Parse from a request string; unknown names fall back to `Avg`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Aggregation::Sum,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "first" => Aggregation::First,
            "last" => Aggregation::Last,
            _ => Aggregation::Avg,
        }
    }
}

struct Bucket {
    start: Timestamp,
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
    first: f64,
    last: f64,
}

impl Bucket {
    fn open(point: &DataPoint) -> Self {
        Self {
            start: point.timestamp,
            sum: point.value,
            count: 1,
            min: point.value,
            max: point.value,
            first: point.value,
            last: point.value,
        }
    }

    fn absorb(&mut self, point: &DataPoint) {
        self.sum += point.value;
        self.count += 1;
        self.min = self.min.min(point.value);
        self.max = self.max.max(point.value);
        self.last = point.value;
    }

    fn close(&self, key: &str, aggregation: Aggregation) -> DataPoint {
        let value = match aggregation {
            Aggregation::Avg => self.sum / self.count as f64,
            Aggregation::Sum => self.sum,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::First => self.first,
            Aggregation::Last => self.last,
        };
        DataPoint::new(key, self.start, value)
    }
}

/// Reduce a time-ordered sequence into buckets of width `interval`.
///
/// A bucket begins at its first point's timestamp; a point joins the
/// current bucket while `point.ts - bucket_start < interval`. Emitted
/// points are stamped with the bucket start, and the final bucket always
/// flushes. All input points carry the same key.
pub fn downsample(points: &[DataPoint], interval: i64, aggregation: Aggregation) -> Vec<DataPoint> {
    let Some(head) = points.first() else {
        return Vec::new();
    };

    let key = head.key.clone();
    let mut out = Vec::new();
    let mut bucket = Bucket::open(head);

    for point in &points[1..] {
        if point.timestamp - bucket.start < interval {
            bucket.absorb(point);
        } else {
            out.push(bucket.close(&key, aggregation));
            bucket = Bucket::open(point);
        }
    }
    out.push(bucket.close(&key, aggregation));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(values: &[(i64, f64)]) -> Vec<DataPoint> {
        values
            .iter()
            .map(|&(ts, v)| DataPoint::new("k", ts, v))
            .collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(downsample(&[], 10, Aggregation::Avg).is_empty());
    }

    #[test]
    fn test_single_point_yields_one_bucket() {
        let out = downsample(&points(&[(100, 5.0)]), 10, Aggregation::Avg);
        assert_eq!(out, points(&[(100, 5.0)]));
    }

    #[test]
    fn test_avg_buckets() {
        let input = points(&[(0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0)]);
        let out = downsample(&input, 2, Aggregation::Avg);
        assert_eq!(out, points(&[(0, 1.5), (2, 3.5)]));
    }

    #[test]
    fn test_sum_min_max() {
        let input = points(&[(0, 3.0), (1, 1.0), (5, 8.0), (6, 2.0)]);
        assert_eq!(
            downsample(&input, 5, Aggregation::Sum),
            points(&[(0, 4.0), (5, 10.0)])
        );
        assert_eq!(
            downsample(&input, 5, Aggregation::Min),
            points(&[(0, 1.0), (5, 2.0)])
        );
        assert_eq!(
            downsample(&input, 5, Aggregation::Max),
            points(&[(0, 3.0), (5, 8.0)])
        );
    }

    #[test]
    fn test_first_and_last() {
        let input = points(&[(0, 3.0), (1, 1.0), (2, 7.0)]);
        assert_eq!(
            downsample(&input, 10, Aggregation::First),
            points(&[(0, 3.0)])
        );
        assert_eq!(
            downsample(&input, 10, Aggregation::Last),
            points(&[(0, 7.0)])
        );
    }

    #[test]
    fn test_unknown_aggregation_falls_back_to_avg() {
        assert_eq!(Aggregation::parse("median"), Aggregation::Avg);
        assert_eq!(Aggregation::parse(""), Aggregation::Avg);
        assert_eq!(Aggregation::parse("MAX"), Aggregation::Max);
    }

    #[test]
    fn test_bucket_boundary_is_exclusive() {
        // ts 2 is exactly interval away from bucket start 0 and must open
        // a new bucket
        let input = points(&[(0, 1.0), (2, 2.0)]);
        let out = downsample(&input, 2, Aggregation::Avg);
        assert_eq!(out, points(&[(0, 1.0), (2, 2.0)]));
    }
}
