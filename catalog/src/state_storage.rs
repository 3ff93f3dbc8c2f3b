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
use common::{merge_overlap, now_unix_seconds, Interval};
use ingest::{Identity, IngestError, IngestErrorKind, IngestResult, StateStorage};
use storage::MemoryStore;
use uuid::Uuid;

use crate::{models::SyncStatus, repository::CatalogUow};

fn state_error(err: impl Into<anyhow::Error>) -> IngestError {
	IngestError::new(IngestErrorKind::State, err.into())
}

/// Ingest-state bookkeeping over the catalog's relational rows. The
/// caller holds the integration's row lock for the whole run; each
/// write lands in its own committed transaction.
pub struct IntegrationStateStorage {
	store: MemoryStore,
}

impl IntegrationStateStorage {
	pub fn new(store: MemoryStore) -> Self {
		Self { store }
	}

	fn integration_id(identity: &Identity) -> IngestResult<Uuid> {
		identity.datasource_id.parse().map_err(state_error)
	}

	fn with_state<R>(
		&self,
		identity: &Identity,
		mutate: impl FnOnce(&mut crate::models::IngestState) -> R,
	) -> IngestResult<R> {
		let integration_id = Self::integration_id(identity)?;
		let uow = CatalogUow::begin(&self.store);
		let mut state = uow.get_or_create_ingest_state(integration_id);
		let result = mutate(&mut state);
		uow.uow.add(state);
		uow.commit().map_err(state_error)?;
		Ok(result)
	}
}

#[async_trait]
impl StateStorage for IntegrationStateStorage {
	async fn read_stream_state(
		&self,
		identity: &Identity,
		stream_name: &str,
	) -> IngestResult<Vec<Interval>> {
		let integration_id = Self::integration_id(identity)?;
		let uow = CatalogUow::begin(&self.store);
		let state = uow.get_or_create_ingest_state(integration_id);
		uow.commit().map_err(state_error)?;
		Ok(state.bookmarks.get(stream_name).cloned().unwrap_or_default())
	}

	async fn append_stream_interval(
		&self,
		identity: &Identity,
		stream_name: &str,
		interval: Interval,
	) -> IngestResult<()> {
		self.with_state(identity, |state| {
			let intervals = state.bookmarks.entry(stream_name.to_string()).or_default();
			intervals.push(interval);
			merge_overlap(intervals);
		})
	}

	async fn mark_sync_started(&self, identity: &Identity) -> IngestResult<()> {
		self.with_state(identity, |state| {
			state.sync_status = SyncStatus::Syncing;
			state.sync_error = None;
		})
	}

	async fn last_success_bookmark(&self, identity: &Identity) -> IngestResult<Option<i64>> {
		let integration_id = Self::integration_id(identity)?;
		let uow = CatalogUow::begin(&self.store);
		let state = uow.get_or_create_ingest_state(integration_id);
		uow.commit().map_err(state_error)?;
		Ok(state.last_success_bookmark)
	}

	async fn write_success(
		&self,
		identity: &Identity,
		last_success_bookmark: i64,
	) -> IngestResult<()> {
		self.with_state(identity, |state| {
			state.sync_status = SyncStatus::Success;
			state.sync_error = None;
			state.last_success_bookmark = Some(last_success_bookmark);
			state.last_synced_at = Some(now_unix_seconds());
		})
	}

	async fn write_error(&self, identity: &Identity, error: &str) -> IngestResult<()> {
		self.with_state(identity, |state| {
			state.sync_status = SyncStatus::Error;
			state.sync_error = Some(error.to_string());
			state.last_synced_at = Some(now_unix_seconds());
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::install_constraints;

	fn identity(integration_id: Uuid) -> Identity {
		Identity {
			slug: "mail".to_string(),
			namespace_id: "acme".to_string(),
			datasource_id: integration_id.to_string(),
		}
	}

	#[tokio::test]
	async fn test_intervals_stay_sorted_and_non_overlapping() {
		let store = MemoryStore::default();
		install_constraints(&store);
		let storage = IntegrationStateStorage::new(store);
		let identity = identity(Uuid::new_v4());

		for interval in [Interval::new(30, 40), Interval::new(10, 20), Interval::new(18, 32)] {
			storage.append_stream_interval(&identity, "messages", interval).await.unwrap();
		}
		let intervals = storage.read_stream_state(&identity, "messages").await.unwrap();
		assert_eq!(intervals, vec![Interval::new(10, 40)]);
	}

	#[tokio::test]
	async fn test_error_write_preserves_bookmarks() {
		let store = MemoryStore::default();
		install_constraints(&store);
		let storage = IntegrationStateStorage::new(store.clone());
		let identity = identity(Uuid::new_v4());

		storage
			.append_stream_interval(&identity, "messages", Interval::new(1, 5))
			.await
			.unwrap();
		storage.write_error(&identity, "provider down").await.unwrap();

		let intervals = storage.read_stream_state(&identity, "messages").await.unwrap();
		assert_eq!(intervals, vec![Interval::new(1, 5)]);
		let uow = CatalogUow::begin(&store);
		let state = uow.get_or_create_ingest_state(identity.datasource_id.parse().unwrap());
		assert_eq!(state.sync_status, SyncStatus::Error);
		assert_eq!(state.sync_error.as_deref(), Some("provider down"));
		assert!(state.last_synced_at.is_some());
	}
}
