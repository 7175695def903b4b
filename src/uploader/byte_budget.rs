//! Request byte budgeting
//!
//! One write request must stay under the server's message ceiling. The
//! budget manager deducts a conservative upper bound for each addition
//! before the caller mutates the request, so the request can never grow past
//! the limit. Running out of space is a normal return value, not an error:
//! the caller flushes and retries the addition once against a fresh budget.

use prost::Message;

use crate::limits::MAX_VARINT64_LENGTH;
use crate::wire::{TimeSeriesData, TimeSeriesDataPoint, WriteRunDataRequest};

/// The addition would push the request past its byte ceiling.
///
/// Control-flow signal between the budget and the batched senders; never
/// surfaced to callers of the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfSpace;

/// Tracks the bytes remaining in the in-flight request.
#[derive(Debug)]
pub struct ByteBudgetManager {
    max_bytes: usize,
    remaining: usize,
}

impl ByteBudgetManager {
    /// Create a budget with `max_bytes` per request.
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            remaining: max_bytes,
        }
    }

    /// Bytes still available in the current request.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    /// Reset the budget for a new request with `base` already serialized in.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfSpace`] when the base request alone exceeds the budget.
    pub fn reset(&mut self, base: &WriteRunDataRequest) -> Result<(), OutOfSpace> {
        let base_len = base.encoded_len();
        if base_len > self.max_bytes {
            return Err(OutOfSpace);
        }
        self.remaining = self.max_bytes - base_len;
        Ok(())
    }

    /// Deduct the upper-bound cost of adding `series` (with no points) to the
    /// request: its encoded size, the longest possible length delimiter, and
    /// one byte for the field tag.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfSpace`] without deducting when the cost exceeds the
    /// remaining budget.
    pub fn add_time_series(&mut self, series: &TimeSeriesData) -> Result<(), OutOfSpace> {
        let mut empty = series.clone();
        empty.values.clear();
        let cost = empty.encoded_len() + MAX_VARINT64_LENGTH + 1;
        self.deduct(cost)
    }

    /// Deduct the exact cost of adding `point` to a series already in the
    /// request: its encoded size, its length delimiter, and one tag byte.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfSpace`] without deducting when the cost exceeds the
    /// remaining budget.
    pub fn add_point(&mut self, point: &TimeSeriesDataPoint) -> Result<(), OutOfSpace> {
        let point_len = point.encoded_len();
        let cost = point_len + prost::length_delimiter_len(point_len) + 1;
        self.deduct(cost)
    }

    fn deduct(&mut self, cost: usize) -> Result<(), OutOfSpace> {
        if cost > self.remaining {
            return Err(OutOfSpace);
        }
        self.remaining -= cost;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ValueType;

    fn series(id: &str) -> TimeSeriesData {
        TimeSeriesData {
            time_series_id: id.to_string(),
            value_type: ValueType::Scalar as i32,
            values: Vec::new(),
        }
    }

    #[test]
    fn test_reset_subtracts_base_request() {
        let mut budget = ByteBudgetManager::new(1000);
        let base = WriteRunDataRequest::new("runs/r");
        budget.reset(&base).unwrap();
        assert_eq!(budget.remaining(), 1000 - base.encoded_len());
    }

    #[test]
    fn test_reset_overflow() {
        let mut budget = ByteBudgetManager::new(4);
        let base = WriteRunDataRequest::new("projects/p/very/long/run/name");
        assert_eq!(budget.reset(&base), Err(OutOfSpace));
    }

    #[test]
    fn test_failed_deduction_does_not_mutate() {
        let mut budget = ByteBudgetManager::new(64);
        budget.reset(&WriteRunDataRequest::new("r")).unwrap();
        let before = budget.remaining();

        let mut big = series("ts");
        big.time_series_id = "x".repeat(256);
        assert_eq!(budget.add_time_series(&big), Err(OutOfSpace));
        assert_eq!(budget.remaining(), before);
    }

    #[test]
    fn test_series_cost_includes_varint_and_tag() {
        let mut budget = ByteBudgetManager::new(10_000);
        budget.reset(&WriteRunDataRequest::new("r")).unwrap();
        let before = budget.remaining();

        let s = series("ts1");
        budget.add_time_series(&s).unwrap();
        let expected = s.encoded_len() + MAX_VARINT64_LENGTH + 1;
        assert_eq!(before - budget.remaining(), expected);
    }

    #[test]
    fn test_point_cost_is_exact() {
        let mut budget = ByteBudgetManager::new(10_000);
        budget.reset(&WriteRunDataRequest::new("r")).unwrap();
        let before = budget.remaining();

        let point = TimeSeriesDataPoint::scalar(10, 123.0, 0.5);
        budget.add_point(&point).unwrap();
        let len = point.encoded_len();
        assert_eq!(
            before - budget.remaining(),
            len + prost::length_delimiter_len(len) + 1
        );
    }

    #[test]
    fn test_points_accumulate_until_out_of_space() {
        let mut budget = ByteBudgetManager::new(128);
        budget.reset(&WriteRunDataRequest::new("r")).unwrap();
        let point = TimeSeriesDataPoint::scalar(1, 1.0, 1.0);
        let mut added = 0;
        while budget.add_point(&point).is_ok() {
            added += 1;
        }
        assert!(added > 0);
        // Once out of space, it stays out until reset.
        assert_eq!(budget.add_point(&point), Err(OutOfSpace));
        budget.reset(&WriteRunDataRequest::new("r")).unwrap();
        assert!(budget.add_point(&point).is_ok());
    }
}
