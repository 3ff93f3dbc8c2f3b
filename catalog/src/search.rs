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
use uuid::Uuid;

/// What the agent-directory search index needs to know about an
/// agent.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSearchDocument {
	pub agent_id: Uuid,
	pub name: String,
	pub description: String,
	pub subdomain: String,
	pub is_featured: bool,
	pub weight: i32,
}

/// Agent-directory index. Invoked asynchronously from the publication
/// and deletion events.
#[async_trait]
pub trait SearchClient: Send + Sync {
	async fn index_agent(&self, document: AgentSearchDocument) -> anyhow::Result<()>;

	async fn delete_agent(&self, agent_id: Uuid) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn SearchClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SearchClient").finish()
	}
}

#[cfg(any(test, feature = "testsuite"))]
pub mod fake {
	use std::sync::{Arc, Mutex};

	use async_trait::async_trait;
	use uuid::Uuid;

	use super::{AgentSearchDocument, SearchClient};

	/// Records every call for assertions.
	#[derive(Clone, Default)]
	pub struct RecordingSearchClient {
		pub indexed: Arc<Mutex<Vec<AgentSearchDocument>>>,
		pub deleted: Arc<Mutex<Vec<Uuid>>>,
	}

	#[async_trait]
	impl SearchClient for RecordingSearchClient {
		async fn index_agent(&self, document: AgentSearchDocument) -> anyhow::Result<()> {
			self.indexed.lock().unwrap().push(document);
			Ok(())
		}

		async fn delete_agent(&self, agent_id: Uuid) -> anyhow::Result<()> {
			self.deleted.lock().unwrap().push(agent_id);
			Ok(())
		}
	}
}
