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
use serde_json::Value;

use crate::schemas::{DataSource, Table};

/// Warehouse access shared by every connector. The concrete engines
/// live out of tree; they all answer these three questions.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
	async fn test_connection(&self, datasource: &DataSource) -> anyhow::Result<()>;

	async fn get_tables(&self, datasource: &DataSource) -> anyhow::Result<Vec<Table>>;

	async fn query(&self, datasource: &DataSource, query: &str) -> anyhow::Result<Vec<Value>>;
}

impl std::fmt::Debug for dyn WarehouseClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WarehouseClient").finish()
	}
}
