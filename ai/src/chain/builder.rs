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

use std::sync::{Arc, Mutex};

use common::{AgentInfo, ChatConfig, DataSource, DataSourceType, TrainingPrompt, WarehouseClient};
use llms::{ChatModel, Embedder};
use services::Dispatcher;
use storage::VespaClient;
use tracing::info;

use crate::{
	chain::{AgentChain, RagStep, StreamPredict},
	citation::CitationMarker,
	retrievers::{HybridRetriever, Retriever, RetrieverConfig},
	tools::{SqlQueryTool, ToolsRegistry},
	AiError, AiErrorKind, AiResult,
};

/// Composes the per-request answer chain from the agent's metadata:
/// one SQL tool per warehouse source, the hybrid retriever over the
/// integration sources, and the streaming predictor.
pub struct AgentBuilder {
	chat_config: ChatConfig,
	retriever_config: RetrieverConfig,
	model: Arc<dyn ChatModel>,
	embedder: Arc<dyn Embedder>,
	vespa: Arc<VespaClient>,
	warehouse: Arc<dyn WarehouseClient>,
	dispatcher: Arc<Dispatcher>,
}

impl AgentBuilder {
	pub fn new(
		chat_config: ChatConfig,
		retriever_config: RetrieverConfig,
		model: Arc<dyn ChatModel>,
		embedder: Arc<dyn Embedder>,
		vespa: Arc<VespaClient>,
		warehouse: Arc<dyn WarehouseClient>,
		dispatcher: Arc<Dispatcher>,
	) -> Self {
		Self { chat_config, retriever_config, model, embedder, vespa, warehouse, dispatcher }
	}

	fn build_training_instruction(training_prompts: &[TrainingPrompt]) -> String {
		let mut result = String::new();
		for prompt in training_prompts {
			if prompt.message.is_empty() || prompt.sources.is_empty() {
				continue;
			}
			let groupnames = prompt
				.sources
				.iter()
				.map(|source| source.target_embedding_table.as_str())
				.collect::<Vec<_>>()
				.join(",");
			result.push_str(&format!(
				"For queries similar to '{}' filter to use these groupname(s): {groupnames}\n\n",
				prompt.message
			));
		}
		result
	}

	fn build_retriever(&self, agent_info: &AgentInfo) -> Arc<dyn Retriever> {
		let group_names: Vec<String> = agent_info
			.data_sources
			.iter()
			.filter(|source| source.source_type == DataSourceType::Integration)
			.map(|source| source.table.clone())
			.collect();
		let mut retriever = HybridRetriever::new(
			self.vespa.clone(),
			self.embedder.clone(),
			group_names,
			self.retriever_config.clone(),
		)
		.with_training_instruction(Self::build_training_instruction(
			&agent_info.training_prompts,
		));
		if self.retriever_config.use_self_query {
			retriever = retriever.with_self_query(self.model.clone());
		}
		Arc::new(retriever)
	}

	fn register_sql_tools(
		&self,
		warehouse_sources: &[&DataSource],
		tools: &mut ToolsRegistry,
	) -> AiResult<()> {
		for source in warehouse_sources {
			info!(name = %source.name, "registering sql query tool");
			tools
				.register(Arc::new(SqlQueryTool::from_datasource(
					(*source).clone(),
					self.warehouse.clone(),
				)))
				.map_err(|err| AiError::new(AiErrorKind::Invalid, err))?;
		}
		Ok(())
	}

	/// Builds the chain for one request. The tool registry and
	/// citation marker are request-scoped.
	pub fn build(&self, agent_info: &AgentInfo, cite_sources: bool) -> AiResult<AgentChain> {
		let marker =
			cite_sources.then(|| Arc::new(Mutex::new(CitationMarker::default())));
		let mut tools = ToolsRegistry::default();
		let warehouse_sources: Vec<&DataSource> = agent_info
			.data_sources
			.iter()
			.filter(|source| source.source_type == DataSourceType::Warehouse)
			.collect();
		self.register_sql_tools(&warehouse_sources, &mut tools)?;

		let rag = RagStep::new(self.build_retriever(agent_info), marker.clone());
		let predict = StreamPredict::new(
			self.model.clone(),
			Arc::new(tools),
			marker,
			self.chat_config.max_tool_depth,
			self.dispatcher.clone(),
		);
		Ok(AgentChain { rag, predict })
	}
}

#[cfg(test)]
mod tests {
	use common::TrainingPromptSource;

	use super::*;

	#[test]
	fn test_training_instruction_formatting() {
		let prompts = vec![
			TrainingPrompt {
				message: "sales numbers".to_string(),
				sources: vec![TrainingPromptSource {
					id: "1".to_string(),
					source_type: "integration".to_string(),
					filters: String::new(),
					target_embedding_table: "mail__ds_1".to_string(),
				}],
			},
			// Skipped: no sources.
			TrainingPrompt { message: "ignored".to_string(), sources: Vec::new() },
		];
		let instruction = AgentBuilder::build_training_instruction(&prompts);
		assert_eq!(
			instruction,
			"For queries similar to 'sales numbers' filter to use these groupname(s): mail__ds_1\n\n"
		);
	}
}
