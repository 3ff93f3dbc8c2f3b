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

pub mod agent;
pub use agent::*;
pub mod data_sources;
pub use data_sources::*;

use std::sync::Arc;

use services::{Dispatcher, Service};

/// Wires the catalog service: agent lifecycle, data sources, and the
/// search-index event handlers. Dependencies and the event bus are
/// bound by the caller.
pub fn build_service(dispatcher: Arc<Dispatcher>) -> Service {
	Service::new("catalog", dispatcher)
		.with_request_handler(agent::publish_agent)
		.with_request_handler(agent::delete_agent)
		.with_request_handler(agent::clone_agent_version)
		.with_request_handler(agent::get_agent_info)
		.with_request_handler(data_sources::create_integration)
		.with_request_handler(data_sources::sync_integration)
		.with_request_handler(data_sources::sync_connection)
		.with_event_handler(agent::agent_published)
		.with_event_handler(agent::agent_deleted)
}

#[cfg(test)]
mod tests {
	use std::{collections::BTreeMap, sync::Arc, time::Duration};

	use common::{IngestConfig, ServiceErrorCode};
	use ingest::{
		testsuite::{MemoryEmbedStore, MemoryStagingStore, PassthroughStrategy},
		IngestController,
	};
	use serde_json::json;
	use services::{EventBus, Service};
	use storage::{EnvelopeCipher, MemoryStore, SecretsManager};
	use uuid::Uuid;
	use wiremock::{
		matchers::{method, path},
		Mock, MockServer, ResponseTemplate,
	};

	use super::*;
	use crate::{
		models::{Agent, AgentVersion, Integration, SyncStatus, Task},
		repository::{install_constraints, CatalogUow},
		search::{fake::RecordingSearchClient, SearchClient},
		state_storage::IntegrationStateStorage,
		task_queue::{MemoryTaskQueue, TaskQueue},
	};

	struct TestBed {
		service: Service,
		store: MemoryStore,
		search: RecordingSearchClient,
		queue: Arc<MemoryTaskQueue>,
	}

	fn testbed() -> TestBed {
		let store = MemoryStore::default();
		install_constraints(&store);
		let dispatcher = Arc::new(Dispatcher::default());
		let search = RecordingSearchClient::default();
		let queue = Arc::new(MemoryTaskQueue::default());
		let strategies: ingest::StrategyFactory =
			Arc::new(|_spec| Arc::new(PassthroughStrategy));
		let controller = IngestController::new(
			IngestConfig { drain_timeout_secs: 5, ..Default::default() },
			Arc::new(MemoryStagingStore::default()),
			Arc::new(MemoryEmbedStore::default()),
			Arc::new(IntegrationStateStorage::new(store.clone())),
			strategies,
		);

		let service = build_service(dispatcher).bind_event_bus(EventBus::default());
		service.deps().bind::<MemoryStore>(store.clone());
		service.deps().bind::<Arc<dyn SearchClient>>(Arc::new(search.clone()));
		service
			.deps()
			.bind::<Arc<dyn SecretsManager>>(Arc::new(EnvelopeCipher::new(b"test-key".to_vec())));
		service.deps().bind::<Arc<dyn TaskQueue>>(queue.clone());
		service.deps().bind::<Arc<IngestController>>(Arc::new(controller));
		TestBed { service, store, search, queue }
	}

	fn seed_agent(store: &MemoryStore) -> (Uuid, Uuid) {
		let uow = CatalogUow::begin(store);
		let mut agent = Agent::new(Uuid::new_v4());
		let dev_version = AgentVersion {
			id: Uuid::new_v4(),
			agent_id: agent.id,
			name: "Helper".to_string(),
			description: "a helper".to_string(),
			..Default::default()
		};
		agent.dev_version_id = Some(dev_version.id);
		let ids = (agent.id, dev_version.id);
		uow.uow.add(agent);
		uow.uow.add(dev_version);
		uow.commit().unwrap();
		ids
	}

	async fn wait_until(mut condition: impl FnMut() -> bool) {
		tokio::time::timeout(Duration::from_secs(2), async {
			while !condition() {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("condition should become true");
	}

	#[tokio::test]
	async fn test_publish_indexes_agent_asynchronously() {
		let bed = testbed();
		let (agent_id, _) = seed_agent(&bed.store);

		let published_id = bed.service.handle(PublishAgent { agent_id }).await.unwrap();
		// The index call is scheduled after the handler commits.
		wait_until(|| !bed.search.indexed.lock().unwrap().is_empty()).await;
		let indexed = bed.search.indexed.lock().unwrap();
		assert_eq!(indexed[0].agent_id, agent_id);
		assert_eq!(indexed[0].name, "Helper");

		let uow = CatalogUow::begin(&bed.store);
		let agent = uow.get_agent(agent_id).unwrap();
		assert_eq!(agent.published_version_id, Some(published_id));
		assert!(uow.get_version(published_id).unwrap().is_published);
	}

	#[tokio::test]
	async fn test_republish_swaps_published_version() {
		let bed = testbed();
		let (agent_id, _) = seed_agent(&bed.store);
		let first = bed.service.handle(PublishAgent { agent_id }).await.unwrap();
		let second = bed.service.handle(PublishAgent { agent_id }).await.unwrap();
		assert_ne!(first, second);
		let uow = CatalogUow::begin(&bed.store);
		assert!(!uow.get_version(first).unwrap().is_published);
		assert!(uow.get_version(second).unwrap().is_published);
	}

	#[tokio::test]
	async fn test_delete_agent_drops_from_index() {
		let bed = testbed();
		let (agent_id, _) = seed_agent(&bed.store);
		bed.service.handle(DeleteAgent { agent_id }).await.unwrap();
		wait_until(|| !bed.search.deleted.lock().unwrap().is_empty()).await;
		assert_eq!(bed.search.deleted.lock().unwrap()[0], agent_id);
		// A deleted agent resolves to no info.
		let info = bed
			.service
			.handle(GetAgentInfo { agent_id, published: false })
			.await
			.unwrap();
		assert!(info.is_none());
	}

	#[tokio::test]
	async fn test_create_integration_encrypts_config_and_queues_task() {
		let bed = testbed();
		let mut configuration = BTreeMap::new();
		configuration.insert("token".to_string(), "s3cret".to_string());
		let integration_id = bed
			.service
			.handle(CreateIntegration {
				organization_id: Uuid::new_v4(),
				namespace_id: Uuid::new_v4(),
				name: "crm".to_string(),
				slug: "crm".to_string(),
				configuration: configuration.clone(),
			})
			.await
			.unwrap();

		let uow = CatalogUow::begin(&bed.store);
		let integration = uow.get_integration(integration_id).unwrap();
		// Ciphertext at rest, decryptable with the bound key.
		assert!(!integration.configuration.contains("s3cret"));
		let cipher = EnvelopeCipher::new(b"test-key".to_vec());
		assert_eq!(cipher.decrypt_dict(&integration.configuration).unwrap(), configuration);
		// Non-native slug: a pipeline task row exists and is queued.
		let tasks = uow.uow.list::<Task>(|_| true);
		assert_eq!(tasks.len(), 1);
		assert!(bed.queue.is_task_running(&tasks[0].external_id, "crm").await.unwrap());
	}

	#[tokio::test]
	async fn test_native_slug_skips_task_queue() {
		let bed = testbed();
		let mut configuration = BTreeMap::new();
		configuration.insert("auth_type".to_string(), "api_token".to_string());
		bed.service
			.handle(CreateIntegration {
				organization_id: Uuid::new_v4(),
				namespace_id: Uuid::new_v4(),
				name: "mail".to_string(),
				slug: "mail".to_string(),
				configuration,
			})
			.await
			.unwrap();
		let uow = CatalogUow::begin(&bed.store);
		assert!(uow.uow.list::<Task>(|_| true).is_empty());
	}

	async fn seed_mail_integration(bed: &TestBed, base_url: String) -> Uuid {
		let mut configuration = BTreeMap::new();
		configuration.insert("auth_type".to_string(), "api_token".to_string());
		configuration.insert("token".to_string(), "token".to_string());
		configuration.insert("base_url".to_string(), base_url);
		bed.service
			.handle(CreateIntegration {
				organization_id: Uuid::new_v4(),
				namespace_id: Uuid::new_v4(),
				name: "mail".to_string(),
				slug: "mail".to_string(),
				configuration,
			})
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_concurrent_syncs_fail_fast_on_row_lock() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/messages"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_delay(Duration::from_millis(300))
					.set_body_json(json!({ "messages": [], "next_page_token": null })),
			)
			.mount(&server)
			.await;

		let bed = Arc::new(testbed());
		let integration_id = seed_mail_integration(&bed, server.uri()).await;

		let first_bed = bed.clone();
		let first =
			tokio::spawn(async move { first_bed.service.handle(SyncIntegration { integration_id }).await });
		tokio::time::sleep(Duration::from_millis(50)).await;
		let second = bed.service.handle(SyncIntegration { integration_id }).await;

		let busy = second.unwrap_err();
		assert_eq!(busy.code(), ServiceErrorCode::ResourceBusy);
		assert!(busy.to_string().contains("IntegrationAreBeingSynced"));
		first.await.unwrap().unwrap();

		let uow = CatalogUow::begin(&bed.store);
		let state = uow.get_or_create_ingest_state(integration_id);
		assert_eq!(state.sync_status, SyncStatus::Success);
	}

	#[tokio::test]
	async fn test_sync_unsupported_slug_is_rejected() {
		let bed = testbed();
		let uow = CatalogUow::begin(&bed.store);
		let integration = Integration {
			id: Uuid::new_v4(),
			organization_id: Uuid::new_v4(),
			namespace_id: Uuid::new_v4(),
			name: "crm".to_string(),
			slug: "crm".to_string(),
			configuration: EnvelopeCipher::new(b"test-key".to_vec())
				.encrypt_dict(&BTreeMap::new())
				.unwrap(),
		};
		let integration_id = integration.id;
		uow.uow.add(integration);
		uow.commit().unwrap();

		let error = bed
			.service
			.handle(SyncIntegration { integration_id })
			.await
			.unwrap_err();
		assert_eq!(error.code(), ServiceErrorCode::BadRequest);
		assert!(error.to_string().contains("SourceNotSupported"));
	}

	#[tokio::test]
	async fn test_get_agent_info_builds_data_sources() {
		let bed = testbed();
		let uow = CatalogUow::begin(&bed.store);
		let organization_id = Uuid::new_v4();
		let integration = Integration {
			id: Uuid::new_v4(),
			organization_id,
			namespace_id: Uuid::new_v4(),
			name: "work mail".to_string(),
			slug: "mail".to_string(),
			configuration: String::new(),
		};
		let mut agent = Agent::new(organization_id);
		let version = AgentVersion {
			id: Uuid::new_v4(),
			agent_id: agent.id,
			name: "Helper".to_string(),
			integrations: vec![integration.id],
			..Default::default()
		};
		agent.dev_version_id = Some(version.id);
		let agent_id = agent.id;
		let expected_group =
			format!("mail__{}", common::canonical(&integration.id.to_string()));
		uow.uow.add(integration);
		uow.uow.add(version);
		uow.uow.add(agent);
		uow.commit().unwrap();

		let info = bed
			.service
			.handle(GetAgentInfo { agent_id, published: false })
			.await
			.unwrap()
			.unwrap();
		assert_eq!(info.name, "Helper");
		assert_eq!(info.data_sources.len(), 1);
		assert_eq!(info.data_sources[0].table, expected_group);
		assert!(info.data_sources[0].database.starts_with("onyx__"));
	}
}
