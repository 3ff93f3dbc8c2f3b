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

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{DataSource, WarehouseClient};
use llms::ToolSpec;
use serde_json::{json, Value};
use tracing::{error, info};

/// A callable the model may invoke mid-stream.
///
/// `run` never raises: failures come back as a descriptive string so
/// the stream can continue.
#[async_trait]
pub trait Tool: Send + Sync {
	fn spec(&self) -> ToolSpec;

	async fn execute(&self, parameters: &Value) -> anyhow::Result<String>;

	fn name(&self) -> String {
		self.spec().name
	}

	async fn run(&self, parameters: &Value) -> String {
		match self.execute(parameters).await {
			Ok(result) => result,
			Err(tool_error) => {
				error!(tool = %self.name(), error = ?tool_error, "tool failed");
				format!("Tool {} failed with error: {tool_error}", self.name())
			},
		}
	}
}

impl std::fmt::Debug for dyn Tool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tool").field("name", &self.name()).finish()
	}
}

/// Stand-in returned for an unknown tool name; its result is the
/// standard not-found string.
pub struct NotFoundTool {
	name: String,
}

impl NotFoundTool {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into() }
	}
}

#[async_trait]
impl Tool for NotFoundTool {
	fn spec(&self) -> ToolSpec {
		ToolSpec {
			name: self.name.clone(),
			description: "Tool not found".to_string(),
			parameters: json!({}),
		}
	}

	async fn execute(&self, _parameters: &Value) -> anyhow::Result<String> {
		Ok(format!("Tool {} not found", self.name))
	}
}

/// Per-request tool table; built while the chain is assembled, never
/// mutated concurrently.
#[derive(Default)]
pub struct ToolsRegistry {
	tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolsRegistry {
	/// Unique by tool name.
	pub fn register(&mut self, tool: Arc<dyn Tool>) -> anyhow::Result<()> {
		let name = tool.name();
		if self.tools.contains_key(&name) {
			anyhow::bail!("tool `{name}` already registered");
		}
		self.tools.insert(name, tool);
		Ok(())
	}

	/// Never fails: unknown names come back as a [`NotFoundTool`].
	pub fn get(&self, name: &str) -> Arc<dyn Tool> {
		match self.tools.get(name) {
			Some(tool) => tool.clone(),
			None => Arc::new(NotFoundTool::new(name)),
		}
	}

	pub fn to_spec(&self) -> Vec<ToolSpec> {
		self.tools.values().map(|tool| tool.spec()).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}
}

impl std::fmt::Debug for ToolsRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ToolsRegistry")
			.field("tools", &self.tools.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// One SQL tool per warehouse data source attached to the agent.
pub struct SqlQueryTool {
	datasource: DataSource,
	warehouse: Arc<dyn WarehouseClient>,
}

impl SqlQueryTool {
	pub fn from_datasource(datasource: DataSource, warehouse: Arc<dyn WarehouseClient>) -> Self {
		info!(name = %datasource.name, "registering sql query tool");
		Self { datasource, warehouse }
	}

	fn tables_description(&self) -> String {
		self.datasource
			.source_tables
			.iter()
			.map(|table| {
				let columns = table
					.columns
					.iter()
					.map(|column| format!("{} {}", column.name, column.column_type))
					.collect::<Vec<_>>()
					.join(", ");
				format!("{}.{} ({columns})", table.schema, table.name)
			})
			.collect::<Vec<_>>()
			.join("; ")
	}
}

#[async_trait]
impl Tool for SqlQueryTool {
	fn spec(&self) -> ToolSpec {
		ToolSpec {
			name: format!("query_{}", common::canonical(&self.datasource.name)),
			description: format!(
				"Run a read-only SQL query against `{}`. Available tables: {}",
				self.datasource.name,
				self.tables_description()
			),
			parameters: json!({
				"type": "object",
				"properties": {
					"query": {
						"type": "string",
						"description": "The SQL query to execute"
					}
				},
				"required": ["query"]
			}),
		}
	}

	async fn execute(&self, parameters: &Value) -> anyhow::Result<String> {
		let query = parameters["query"]
			.as_str()
			.ok_or_else(|| anyhow::anyhow!("missing `query` parameter"))?;
		let rows = self.warehouse.query(&self.datasource, query).await?;
		Ok(serde_json::to_string(&rows)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct EchoTool;

	#[async_trait]
	impl Tool for EchoTool {
		fn spec(&self) -> ToolSpec {
			ToolSpec {
				name: "echo".to_string(),
				description: "echoes".to_string(),
				parameters: json!({}),
			}
		}

		async fn execute(&self, parameters: &Value) -> anyhow::Result<String> {
			Ok(parameters["text"].as_str().unwrap_or_default().to_string())
		}
	}

	struct FailingTool;

	#[async_trait]
	impl Tool for FailingTool {
		fn spec(&self) -> ToolSpec {
			ToolSpec {
				name: "boom".to_string(),
				description: "fails".to_string(),
				parameters: json!({}),
			}
		}

		async fn execute(&self, _parameters: &Value) -> anyhow::Result<String> {
			anyhow::bail!("kaput")
		}
	}

	#[tokio::test]
	async fn test_duplicate_registration_fails() {
		let mut registry = ToolsRegistry::default();
		registry.register(Arc::new(EchoTool)).unwrap();
		assert!(registry.register(Arc::new(EchoTool)).is_err());
	}

	#[tokio::test]
	async fn test_unknown_tool_returns_not_found_string() {
		let registry = ToolsRegistry::default();
		let result = registry.get("missing").run(&json!({})).await;
		assert_eq!(result, "Tool missing not found");
	}

	#[tokio::test]
	async fn test_tool_failure_is_converted_to_string() {
		let mut registry = ToolsRegistry::default();
		registry.register(Arc::new(FailingTool)).unwrap();
		let result = registry.get("boom").run(&json!({})).await;
		assert!(result.contains("Tool boom failed with error"));
		assert!(result.contains("kaput"));
	}
}
