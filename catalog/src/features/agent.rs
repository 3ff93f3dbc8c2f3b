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

use common::{
	canonical, AgentInfo, DataSource, DataSourceType, TrainingPrompt,
};
use serde_json::json;
use services::{Event, HandlerContext, HandlerError, HandlerResult, Message};
use storage::MemoryStore;
use tracing::info;
use uuid::Uuid;

use crate::{
	models::{Agent, AgentVersion},
	repository::CatalogUow,
	search::{AgentSearchDocument, SearchClient},
};

#[derive(Debug)]
pub struct PublishAgent {
	pub agent_id: Uuid,
}

impl Message for PublishAgent {
	type Response = Uuid;
}

#[derive(Debug)]
pub struct DeleteAgent {
	pub agent_id: Uuid,
}

impl Message for DeleteAgent {
	type Response = ();
}

#[derive(Debug)]
pub struct CloneAgentVersion {
	pub version_id: Uuid,
}

impl Message for CloneAgentVersion {
	type Response = Uuid;
}

#[derive(Debug)]
pub struct GetAgentInfo {
	pub agent_id: Uuid,
	pub published: bool,
}

impl Message for GetAgentInfo {
	type Response = Option<AgentInfo>;
}

#[derive(Clone, Debug)]
pub struct AgentPublished {
	pub document: AgentSearchDocument,
}

impl Event for AgentPublished {}

#[derive(Clone, Debug)]
pub struct AgentDeleted {
	pub agent_id: Uuid,
}

impl Event for AgentDeleted {}

fn search_document(agent: &Agent, version: &AgentVersion) -> AgentSearchDocument {
	AgentSearchDocument {
		agent_id: agent.id,
		name: version.name.clone(),
		description: version.description.clone(),
		subdomain: version.subdomain.clone(),
		is_featured: agent.is_featured,
		weight: agent.weight,
	}
}

fn clone_with_prompts(uow: &CatalogUow, version: &AgentVersion) -> AgentVersion {
	let mut cloned_prompt_ids = Vec::with_capacity(version.prompts.len());
	let clone = version.clone_version(Vec::new());
	for prompt_id in &version.prompts {
		if let Some(prompt) = uow.uow.get::<crate::models::Prompt>(*prompt_id) {
			let cloned = prompt.clone_for(clone.id);
			cloned_prompt_ids.push(cloned.id);
			uow.uow.add(cloned);
		}
	}
	AgentVersion { prompts: cloned_prompt_ids, ..clone }
}

/// Clones the dev version into a fresh published version and swaps
/// the agent's published pointer atomically.
pub async fn publish_agent(request: PublishAgent, ctx: HandlerContext) -> HandlerResult<Uuid> {
	let store = ctx.resolve::<MemoryStore>()?;
	let uow = CatalogUow::begin(&store);
	let mut agent = uow
		.get_agent(request.agent_id)
		.ok_or_else(|| HandlerError::not_found("Agent not found"))?;
	let dev_version_id = agent
		.dev_version_id
		.ok_or_else(|| HandlerError::bad_request("Agent has no dev version"))?;
	let dev_version = uow
		.get_version(dev_version_id)
		.ok_or_else(|| HandlerError::not_found("Dev version not found"))?;

	// The previous published version is demoted in the same commit,
	// keeping the one-published-version constraint satisfied.
	if let Some(previous_id) = agent.published_version_id {
		if let Some(mut previous) = uow.get_version(previous_id) {
			previous.is_published = false;
			uow.uow.add(previous);
		}
	}
	let mut published = clone_with_prompts(&uow, &dev_version);
	published.is_published = true;
	let published_id = published.id;
	agent.published_version_id = Some(published_id);
	let document = search_document(&agent, &published);
	uow.uow.add(published);
	uow.uow.add(agent);
	uow.commit().map_err(|err| HandlerError::internal(err))?;

	info!(agent_id = %request.agent_id, version_id = %published_id, "agent published");
	ctx.publish(AgentPublished { document });
	Ok(published_id)
}

/// Soft-deletes the agent; the search index entry goes with it.
pub async fn delete_agent(request: DeleteAgent, ctx: HandlerContext) -> HandlerResult<()> {
	let store = ctx.resolve::<MemoryStore>()?;
	let uow = CatalogUow::begin(&store);
	let mut agent = uow
		.get_agent(request.agent_id)
		.ok_or_else(|| HandlerError::not_found("Agent not found"))?;
	agent.is_deleted = true;
	uow.uow.add(agent);
	uow.commit().map_err(|err| HandlerError::internal(err))?;
	ctx.publish(AgentDeleted { agent_id: request.agent_id });
	Ok(())
}

/// Clones a version (and its prompts) into a new unpublished one.
pub async fn clone_agent_version(
	request: CloneAgentVersion,
	ctx: HandlerContext,
) -> HandlerResult<Uuid> {
	let store = ctx.resolve::<MemoryStore>()?;
	let uow = CatalogUow::begin(&store);
	let version = uow
		.get_version(request.version_id)
		.ok_or_else(|| HandlerError::not_found("Version not found"))?;
	let clone = clone_with_prompts(&uow, &version);
	let clone_id = clone.id;
	uow.uow.add(clone);
	uow.commit().map_err(|err| HandlerError::internal(err))?;
	Ok(clone_id)
}

fn integration_data_source(
	uow: &CatalogUow,
	integration_id: Uuid,
) -> Option<DataSource> {
	let integration = uow.get_integration(integration_id)?;
	Some(DataSource {
		id: integration.id,
		organization_id: integration.organization_id,
		name: integration.name.clone(),
		slug: integration.slug.clone(),
		source_type: DataSourceType::Integration,
		database: format!("onyx__{}", canonical(&integration.namespace_id.to_string())),
		table: format!(
			"{}__{}",
			integration.slug,
			canonical(&integration.id.to_string())
		),
		source_tables: Vec::new(),
		metadata: json!({}),
	})
}

fn connection_data_source(uow: &CatalogUow, connection_id: Uuid) -> Option<DataSource> {
	let connection = uow.get_connection(connection_id)?;
	Some(DataSource {
		id: connection.id,
		organization_id: connection.organization_id,
		name: connection.name.clone(),
		slug: connection.slug.clone(),
		source_type: DataSourceType::Warehouse,
		database: connection.name.clone(),
		table: String::new(),
		source_tables: connection.tables.clone(),
		metadata: json!({}),
	})
}

/// Resolves the agent metadata the answer chain runs on. Deleted
/// agents are invisible.
pub async fn get_agent_info(
	request: GetAgentInfo,
	ctx: HandlerContext,
) -> HandlerResult<Option<AgentInfo>> {
	let store = ctx.resolve::<MemoryStore>()?;
	let uow = CatalogUow::begin(&store);
	let Some(agent) = uow.get_agent(request.agent_id).filter(|agent| !agent.is_deleted) else {
		return Ok(None);
	};
	let version_id = if request.published {
		agent.published_version_id
	} else {
		agent.dev_version_id
	};
	let Some(version) = version_id.and_then(|version_id| uow.get_version(version_id)) else {
		return Ok(None);
	};

	let mut data_sources = Vec::new();
	for integration_id in &version.integrations {
		data_sources.extend(integration_data_source(&uow, *integration_id));
	}
	for connection_id in &version.connections {
		data_sources.extend(connection_data_source(&uow, *connection_id));
	}
	let training_prompts = uow
		.get_prompts(version.id)
		.into_iter()
		.map(|prompt| TrainingPrompt { message: prompt.message, sources: prompt.sources })
		.collect();

	Ok(Some(AgentInfo {
		name: version.name,
		instructions: version.instructions,
		description: version.description,
		knowledge: version.knowledge,
		data_sources,
		training_prompts,
	}))
}

/// Scheduled off the publish commit; failures are logged by the bus.
pub async fn agent_published(event: AgentPublished, ctx: HandlerContext) -> HandlerResult<()> {
	let search = ctx.resolve::<Arc<dyn SearchClient>>()?;
	search
		.index_agent(event.document)
		.await
		.map_err(|err| HandlerError::internal(err))?;
	Ok(())
}

pub async fn agent_deleted(event: AgentDeleted, ctx: HandlerContext) -> HandlerResult<()> {
	let search = ctx.resolve::<Arc<dyn SearchClient>>()?;
	search
		.delete_agent(event.agent_id)
		.await
		.map_err(|err| HandlerError::internal(err))?;
	Ok(())
}
