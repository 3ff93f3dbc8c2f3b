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

use async_trait::async_trait;
use common::Interval;

use crate::{Identity, IngestResult};

/// Per-integration bookmark and status bookkeeping.
///
/// Implementations persist under the integration's row lock; the
/// controller is the only writer during a run. Appending an interval
/// merges it into the stored list, which stays sorted and
/// non-overlapping.
#[async_trait]
pub trait StateStorage: Send + Sync {
	async fn read_stream_state(
		&self,
		identity: &Identity,
		stream_name: &str,
	) -> IngestResult<Vec<Interval>>;

	async fn append_stream_interval(
		&self,
		identity: &Identity,
		stream_name: &str,
		interval: Interval,
	) -> IngestResult<()>;

	/// Flips the integration to `syncing` and clears the previous
	/// error.
	async fn mark_sync_started(&self, identity: &Identity) -> IngestResult<()>;

	async fn last_success_bookmark(&self, identity: &Identity) -> IngestResult<Option<i64>>;

	/// Records a successful run: `sync_status=success`, the new
	/// bookmark, and `last_synced_at=now`.
	async fn write_success(
		&self,
		identity: &Identity,
		last_success_bookmark: i64,
	) -> IngestResult<()>;

	/// Records a failed run: `sync_status=error` with the cause, and
	/// `last_synced_at=now`. Previously committed bookmarks stay.
	async fn write_error(&self, identity: &Identity, error: &str) -> IngestResult<()>;
}

impl std::fmt::Debug for dyn StateStorage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StateStorage").finish()
	}
}

#[cfg(any(test, feature = "testsuite"))]
pub mod memory {
	use std::{
		collections::HashMap,
		sync::{Arc, Mutex},
	};

	use async_trait::async_trait;
	use common::{merge_overlap, now_unix_seconds, Interval};

	use super::StateStorage;
	use crate::{Identity, IngestResult};

	/// Sync status mirror used by the in-memory state.
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub enum MemorySyncStatus {
		#[default]
		Initial,
		Syncing,
		Success,
		Error,
	}

	#[derive(Clone, Debug, Default)]
	pub struct MemoryIngestState {
		pub bookmarks: HashMap<String, Vec<Interval>>,
		pub sync_status: MemorySyncStatus,
		pub sync_error: Option<String>,
		pub last_synced_at: Option<i64>,
		pub last_success_bookmark: Option<i64>,
	}

	/// In-memory state storage for pipeline tests.
	#[derive(Clone, Default)]
	pub struct MemoryStateStorage {
		state: Arc<Mutex<MemoryIngestState>>,
	}

	impl MemoryStateStorage {
		pub fn with_bookmarks(stream_name: &str, intervals: Vec<Interval>) -> Self {
			let storage = Self::default();
			storage
				.state
				.lock()
				.unwrap()
				.bookmarks
				.insert(stream_name.to_string(), intervals);
			storage
		}

		pub fn snapshot(&self) -> MemoryIngestState {
			self.state.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl StateStorage for MemoryStateStorage {
		async fn read_stream_state(
			&self,
			_identity: &Identity,
			stream_name: &str,
		) -> IngestResult<Vec<Interval>> {
			Ok(self.state.lock().unwrap().bookmarks.get(stream_name).cloned().unwrap_or_default())
		}

		async fn append_stream_interval(
			&self,
			_identity: &Identity,
			stream_name: &str,
			interval: Interval,
		) -> IngestResult<()> {
			let mut state = self.state.lock().unwrap();
			let intervals = state.bookmarks.entry(stream_name.to_string()).or_default();
			intervals.push(interval);
			merge_overlap(intervals);
			Ok(())
		}

		async fn mark_sync_started(&self, _identity: &Identity) -> IngestResult<()> {
			let mut state = self.state.lock().unwrap();
			state.sync_status = MemorySyncStatus::Syncing;
			state.sync_error = None;
			Ok(())
		}

		async fn last_success_bookmark(&self, _identity: &Identity) -> IngestResult<Option<i64>> {
			Ok(self.state.lock().unwrap().last_success_bookmark)
		}

		async fn write_success(
			&self,
			_identity: &Identity,
			last_success_bookmark: i64,
		) -> IngestResult<()> {
			let mut state = self.state.lock().unwrap();
			state.sync_status = MemorySyncStatus::Success;
			state.sync_error = None;
			state.last_success_bookmark = Some(last_success_bookmark);
			state.last_synced_at = Some(now_unix_seconds());
			Ok(())
		}

		async fn write_error(&self, _identity: &Identity, error: &str) -> IngestResult<()> {
			let mut state = self.state.lock().unwrap();
			state.sync_status = MemorySyncStatus::Error;
			state.sync_error = Some(error.to_string());
			state.last_synced_at = Some(now_unix_seconds());
			Ok(())
		}
	}
}
