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

use storage::{MemoryStore, StorageResult, UnitOfWork};
use uuid::Uuid;

use crate::models::{Agent, AgentVersion, Connection, IngestState, Integration, Namespace, Prompt};

/// Installs the catalog's schema-level uniqueness constraints on a
/// fresh store. Runs once at bootstrap.
pub fn install_constraints(store: &MemoryStore) {
	// One published version per agent at a time.
	store.add_unique_index::<AgentVersion>("one_published_version_per_agent", |version| {
		version.is_published.then(|| version.agent_id.to_string())
	});
	// One ingest-state row per integration.
	store.add_unique_index::<IngestState>("one_state_per_integration", |state| {
		Some(state.integration_id.to_string())
	});
	// Namespace names are unique within an organization.
	store.add_unique_index::<Namespace>("namespace_name_per_org", |namespace| {
		Some(format!("{}::{}", namespace.organization_id, namespace.name))
	});
}

/// The catalog's transaction scope: typed queries over the shared
/// unit of work.
pub struct CatalogUow {
	pub uow: UnitOfWork,
}

impl CatalogUow {
	pub fn begin(store: &MemoryStore) -> Self {
		Self { uow: store.begin() }
	}

	pub fn commit(&self) -> StorageResult<()> {
		self.uow.commit()
	}

	pub fn get_agent(&self, agent_id: Uuid) -> Option<Agent> {
		self.uow.get::<Agent>(agent_id)
	}

	pub fn get_version(&self, version_id: Uuid) -> Option<AgentVersion> {
		self.uow.get::<AgentVersion>(version_id)
	}

	pub fn get_integration(&self, integration_id: Uuid) -> Option<Integration> {
		self.uow.get::<Integration>(integration_id)
	}

	pub fn get_connection(&self, connection_id: Uuid) -> Option<Connection> {
		self.uow.get::<Connection>(connection_id)
	}

	pub fn get_namespace(&self, namespace_id: Uuid) -> Option<Namespace> {
		self.uow.get::<Namespace>(namespace_id)
	}

	pub fn get_prompts(&self, version_id: Uuid) -> Vec<Prompt> {
		self.uow.list::<Prompt>(|prompt| prompt.version_id == version_id)
	}

	pub fn get_or_create_ingest_state(&self, integration_id: Uuid) -> IngestState {
		let existing = self
			.uow
			.list::<IngestState>(|state| state.integration_id == integration_id)
			.into_iter()
			.next();
		match existing {
			Some(state) => state,
			None => {
				let state = IngestState::for_integration(integration_id);
				self.uow.add(state.clone());
				state
			},
		}
	}
}

impl std::fmt::Debug for CatalogUow {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CatalogUow").finish()
	}
}

#[cfg(test)]
mod tests {
	use storage::StorageErrorKind;
	use uuid::Uuid;

	use super::*;
	use crate::models::SyncStatus;

	#[test]
	fn test_only_one_published_version_per_agent() {
		let store = MemoryStore::default();
		install_constraints(&store);
		let agent_id = Uuid::new_v4();
		let uow = CatalogUow::begin(&store);
		uow.uow.add(AgentVersion {
			id: Uuid::new_v4(),
			agent_id,
			is_published: true,
			..Default::default()
		});
		uow.commit().unwrap();

		let uow = CatalogUow::begin(&store);
		uow.uow.add(AgentVersion {
			id: Uuid::new_v4(),
			agent_id,
			is_published: true,
			..Default::default()
		});
		let error = uow.commit().unwrap_err();
		assert_eq!(error.kind(), StorageErrorKind::UniqueViolation);
	}

	#[test]
	fn test_get_or_create_ingest_state_is_stable() {
		let store = MemoryStore::default();
		install_constraints(&store);
		let integration_id = Uuid::new_v4();
		let uow = CatalogUow::begin(&store);
		let first = uow.get_or_create_ingest_state(integration_id);
		assert_eq!(first.sync_status, SyncStatus::Initial);
		let second = uow.get_or_create_ingest_state(integration_id);
		assert_eq!(first.id, second.id);
		uow.commit().unwrap();

		let uow = CatalogUow::begin(&store);
		assert_eq!(uow.get_or_create_ingest_state(integration_id).id, first.id);
	}

	#[test]
	fn test_namespace_unique_per_org() {
		let store = MemoryStore::default();
		install_constraints(&store);
		let organization_id = Uuid::new_v4();
		let uow = CatalogUow::begin(&store);
		uow.uow.add(Namespace {
			id: Uuid::new_v4(),
			organization_id,
			owner_id: organization_id,
			name: "shared".to_string(),
		});
		uow.uow.add(Namespace {
			id: Uuid::new_v4(),
			organization_id,
			owner_id: organization_id,
			name: "shared".to_string(),
		});
		assert!(uow.commit().is_err());
	}
}
