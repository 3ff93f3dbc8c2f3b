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
use serde_json::Value;
use uuid::Uuid;

/// Kind of data source an agent can draw from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
	/// API-style source (mail, chat, docs) ingested into the embed store.
	Integration,
	/// Warehouse-style source queried live through the SQL tool.
	Warehouse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Column {
	pub name: String,
	#[serde(rename = "type")]
	pub column_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table {
	pub schema: String,
	pub name: String,
	pub columns: Vec<Column>,
}

/// A resolved data source attached to an agent version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSource {
	pub id: Uuid,
	pub organization_id: Uuid,
	pub name: String,
	pub slug: String,
	#[serde(rename = "type")]
	pub source_type: DataSourceType,
	/// Embed-store namespace for integrations, database for warehouses.
	pub database: String,
	/// Embed-store groupname for integrations, table for warehouses.
	pub table: String,
	#[serde(default)]
	pub source_tables: Vec<Table>,
	#[serde(default)]
	pub metadata: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingPromptSource {
	pub id: String,
	#[serde(rename = "type")]
	pub source_type: String,
	pub filters: String,
	pub target_embedding_table: String,
}

/// Retrieval hint attached to an agent version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingPrompt {
	pub message: String,
	pub sources: Vec<TrainingPromptSource>,
}

/// The catalog's answer to "who is this agent" — everything the answer
/// chain needs, detached from the relational rows.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentInfo {
	pub name: String,
	pub instructions: String,
	pub description: String,
	pub knowledge: String,
	#[serde(default)]
	pub data_sources: Vec<DataSource>,
	#[serde(default)]
	pub training_prompts: Vec<TrainingPrompt>,
}

impl AgentInfo {
	pub fn to_prompt(&self) -> String {
		format!(
			"---\nName: {}\nDescription: {}\nInstruction: {}\nKnowledge: {}\n---\n",
			self.name, self.description, self.instructions, self.knowledge
		)
	}
}
