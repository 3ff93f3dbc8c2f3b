// Copyright (C) 2024 Onyx Technologies, Inc.
// This file is part of Onyx.

// The Licensed Work is licensed under the Business Source License 1.1 (BSL 1.1).
// You may use this file in compliance with the BSL 1.1, subject to the following restrictions:
// 1. You may not use the Licensed Work for AI-related services, database services,
//    or any service or product offering that provides database, big data, or analytics
//    services to third parties unless explicitly authorized by Onyx Technologies, Inc.
// 2. For more details, see the LICENSE file or visit https://mariadb.com/bsl11/.

// The Licensed Work is provided "AS IS", WITHOUT WARRANTY OF ANY KIND, express or implied,
// including but not limited to the warranties of merchantability, fitness for a particular purpose,
// and non-infringement. See the Business Source License for more details.

use serde::{Deserialize, Serialize};

/// A closed range of source timestamps, in unix seconds, known to
/// have been ingested.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Interval {
	pub start: i64,
	pub end: i64,
}

impl Interval {
	pub fn new(start: i64, end: i64) -> Self {
		Self { start, end }
	}
}

/// Sorts ascending by start and merges every overlapping or touching
/// pair. The stored bookmark lists stay sorted and non-overlapping
/// through this.
pub fn merge_overlap(intervals: &mut Vec<Interval>) {
	if intervals.is_empty() {
		return;
	}
	intervals.sort_by_key(|interval| interval.start);
	let mut res_idx = 0;
	for i in 1..intervals.len() {
		if intervals[res_idx].end >= intervals[i].start {
			intervals[res_idx].end = intervals[res_idx].end.max(intervals[i].end);
		} else {
			res_idx += 1;
			intervals[res_idx] = intervals[i];
		}
	}
	intervals.truncate(res_idx + 1);
}

/// Slices an interval into fixed-width sub-intervals, for providers
/// that cap the queryable window.
pub fn split_interval(interval: Interval, freq: i64) -> Vec<Interval> {
	assert!(freq > 0, "freq should be greater than zero");
	let mut results = Vec::new();
	let mut start = interval.start;
	while start < interval.end {
		results.push(Interval::new(start, (start + freq).min(interval.end)));
		start += freq;
	}
	results
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_overlap_merges_and_sorts() {
		let mut intervals =
			vec![Interval::new(30, 40), Interval::new(10, 20), Interval::new(18, 32)];
		merge_overlap(&mut intervals);
		assert_eq!(intervals, vec![Interval::new(10, 40)]);
	}

	#[test]
	fn test_merge_overlap_keeps_disjoint() {
		let mut intervals = vec![Interval::new(10, 20), Interval::new(30, 40)];
		merge_overlap(&mut intervals);
		assert_eq!(intervals, vec![Interval::new(10, 20), Interval::new(30, 40)]);
	}

	#[test]
	fn test_merge_overlap_touching_ends_merge() {
		let mut intervals = vec![Interval::new(10, 20), Interval::new(20, 25)];
		merge_overlap(&mut intervals);
		assert_eq!(intervals, vec![Interval::new(10, 25)]);
	}

	#[test]
	fn test_split_interval() {
		let splits = split_interval(Interval::new(0, 25), 10);
		assert_eq!(splits, vec![
			Interval::new(0, 10),
			Interval::new(10, 20),
			Interval::new(20, 25)
		]);
	}

	proptest::proptest! {
		#[test]
		fn test_merge_overlap_always_sorted_and_disjoint(
			raw in proptest::collection::vec((0i64..1_000, 0i64..1_000), 0..40)
		) {
			let mut intervals: Vec<Interval> = raw
				.into_iter()
				.map(|(a, b)| Interval::new(a.min(b), a.max(b)))
				.collect();
			merge_overlap(&mut intervals);
			for pair in intervals.windows(2) {
				proptest::prop_assert!(pair[0].start <= pair[1].start);
				proptest::prop_assert!(pair[0].end < pair[1].start);
			}
		}
	}
}
