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

use std::collections::HashMap;

use common::{Interval, Table, TrainingPromptSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::Entity;
use uuid::Uuid;

/// Native ingest slugs the catalog can run in-process; anything else
/// goes through the task queue.
pub const NATIVE_SLUGS: [&str; 1] = ["mail"];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	#[default]
	Initial,
	Syncing,
	Success,
	Error,
}

/// A persona + data-source bundle a user can chat with. Carries at
/// most one published and one dev version, both rows in the version
/// table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
	pub id: Uuid,
	pub organization_id: Uuid,
	pub is_deleted: bool,
	pub is_featured: bool,
	pub weight: i32,
	pub published_version_id: Option<Uuid>,
	pub dev_version_id: Option<Uuid>,
}

impl Agent {
	pub fn new(organization_id: Uuid) -> Self {
		Self {
			id: Uuid::new_v4(),
			organization_id,
			is_deleted: false,
			is_featured: false,
			weight: 0,
			published_version_id: None,
			dev_version_id: None,
		}
	}
}

impl Entity for Agent {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// A snapshot of agent configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentVersion {
	pub id: Uuid,
	pub agent_id: Uuid,
	pub name: String,
	pub instructions: String,
	pub description: String,
	pub avatar: String,
	pub greeting: String,
	pub subdomain: String,
	pub knowledge: String,
	pub starters: Vec<String>,
	pub is_published: bool,
	pub agent_metadata: Value,
	pub integrations: Vec<Uuid>,
	pub connections: Vec<Uuid>,
	pub prompts: Vec<Uuid>,
}

impl AgentVersion {
	/// Clones the version under a fresh id, never published. The
	/// caller clones the prompt rows and passes their new ids.
	pub fn clone_version(&self, cloned_prompts: Vec<Uuid>) -> Self {
		Self {
			id: Uuid::new_v4(),
			is_published: false,
			prompts: cloned_prompts,
			..self.clone()
		}
	}
}

impl Entity for AgentVersion {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// Retrieval hint rows attached to a version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prompt {
	pub id: Uuid,
	pub version_id: Uuid,
	pub message: String,
	pub sources: Vec<TrainingPromptSource>,
}

impl Prompt {
	pub fn clone_for(&self, version_id: Uuid) -> Self {
		Self { id: Uuid::new_v4(), version_id, ..self.clone() }
	}
}

impl Entity for Prompt {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// API-style data source bound to a slug, with encrypted
/// configuration at rest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Integration {
	pub id: Uuid,
	pub organization_id: Uuid,
	pub namespace_id: Uuid,
	pub name: String,
	pub slug: String,
	/// Envelope-encrypted connection configuration.
	pub configuration: String,
}

impl Entity for Integration {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// Warehouse-style data source with live tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Connection {
	pub id: Uuid,
	pub organization_id: Uuid,
	pub namespace_id: Uuid,
	pub name: String,
	pub slug: String,
	pub configuration: String,
	pub tables: Vec<Table>,
	pub sync_status: SyncStatus,
	pub sync_error: Option<String>,
	pub last_synced_at: Option<i64>,
}

impl Entity for Connection {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// Tenancy scope isolating vector-store data. Owner equals the
/// organization for the shared namespace, the user for a private one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Namespace {
	pub id: Uuid,
	pub organization_id: Uuid,
	pub owner_id: Uuid,
	pub name: String,
}

impl Entity for Namespace {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// Per-integration ingest bookkeeping; one row per integration,
/// mutated only under the row lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestState {
	pub id: Uuid,
	pub integration_id: Uuid,
	pub bookmarks: HashMap<String, Vec<Interval>>,
	pub sync_status: SyncStatus,
	pub sync_error: Option<String>,
	pub last_synced_at: Option<i64>,
	pub last_success_bookmark: Option<i64>,
}

impl IngestState {
	pub fn for_integration(integration_id: Uuid) -> Self {
		Self {
			id: Uuid::new_v4(),
			integration_id,
			bookmarks: HashMap::new(),
			sync_status: SyncStatus::Initial,
			sync_error: None,
			last_synced_at: None,
			last_success_bookmark: None,
		}
	}
}

impl Entity for IngestState {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// A queued pipeline run for a non-native slug.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
	pub id: Uuid,
	pub queue_system: String,
	pub external_id: String,
	pub payload: Value,
}

impl Entity for Task {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_clone_version_resets_publication() {
		let version = AgentVersion {
			id: Uuid::new_v4(),
			agent_id: Uuid::new_v4(),
			name: "v1".to_string(),
			is_published: true,
			prompts: vec![Uuid::new_v4()],
			..Default::default()
		};
		let cloned_prompts = vec![Uuid::new_v4()];
		let clone = version.clone_version(cloned_prompts.clone());
		assert_ne!(clone.id, version.id);
		assert_eq!(clone.agent_id, version.agent_id);
		assert_eq!(clone.name, version.name);
		assert!(!clone.is_published);
		assert_eq!(clone.prompts, cloned_prompts);
	}
}
