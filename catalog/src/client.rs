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

use std::sync::Arc;

use async_trait::async_trait;
use common::AgentInfo;
use services::Service;
use uuid::Uuid;

use crate::features::GetAgentInfo;

/// The catalog as its sibling services see it.
#[async_trait]
pub trait CatalogClient: Send + Sync {
	async fn get_agent_info(
		&self,
		agent_id: Uuid,
		published: bool,
	) -> anyhow::Result<Option<AgentInfo>>;
}

impl std::fmt::Debug for dyn CatalogClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CatalogClient").finish()
	}
}

/// In-process client: a thin shim over the catalog service's message
/// types.
pub struct ServiceCatalogClient {
	service: Arc<Service>,
}

impl ServiceCatalogClient {
	pub fn new(service: Arc<Service>) -> Self {
		Self { service }
	}
}

#[async_trait]
impl CatalogClient for ServiceCatalogClient {
	async fn get_agent_info(
		&self,
		agent_id: Uuid,
		published: bool,
	) -> anyhow::Result<Option<AgentInfo>> {
		let agent_info =
			self.service.handle(GetAgentInfo { agent_id, published }).await?;
		Ok(agent_info)
	}
}
