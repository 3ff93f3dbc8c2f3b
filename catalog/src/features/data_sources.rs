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

use std::{collections::BTreeMap, sync::Arc};

use common::{now_unix_seconds, WarehouseClient};
use ingest::{
	Encoder, FieldMappedStrategy, Identity, IngestController, IngestRequest, StrategyFactory,
};
use serde_json::json;
use services::{HandlerContext, HandlerError, HandlerResult, Message};
use sources::{AuthConfig, MailSource, MailSourceConfig, Source, StreamSpec};
use storage::{MemoryStore, SecretsManager, StorageErrorKind};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
	models::{Integration, SyncStatus, NATIVE_SLUGS},
	repository::CatalogUow,
	task_queue::TaskQueue,
};

#[derive(Debug)]
pub struct CreateIntegration {
	pub organization_id: Uuid,
	pub namespace_id: Uuid,
	pub name: String,
	pub slug: String,
	pub configuration: BTreeMap<String, String>,
}

impl Message for CreateIntegration {
	type Response = Uuid;
}

#[derive(Debug)]
pub struct SyncIntegration {
	pub integration_id: Uuid,
}

impl Message for SyncIntegration {
	type Response = ();
}

#[derive(Debug)]
pub struct SyncConnection {
	pub connection_id: Uuid,
}

impl Message for SyncConnection {
	type Response = ();
}

/// Creates the integration row with its configuration encrypted at
/// rest. Non-native slugs are handed to the external pipeline queue.
pub async fn create_integration(
	request: CreateIntegration,
	ctx: HandlerContext,
) -> HandlerResult<Uuid> {
	let store = ctx.resolve::<MemoryStore>()?;
	let secrets = ctx.resolve::<Arc<dyn SecretsManager>>()?;
	let configuration = secrets
		.encrypt_dict(&request.configuration)
		.map_err(|err| HandlerError::internal(err))?;
	let integration = Integration {
		id: Uuid::new_v4(),
		organization_id: request.organization_id,
		namespace_id: request.namespace_id,
		name: request.name,
		slug: request.slug.clone(),
		configuration,
	};
	let integration_id = integration.id;

	let uow = CatalogUow::begin(&store);
	uow.uow.add(integration.clone());
	if !NATIVE_SLUGS.contains(&request.slug.as_str()) {
		let queue = ctx.resolve::<Arc<dyn TaskQueue>>()?;
		let task = queue
			.publish_integration_created(&integration)
			.await
			.map_err(|err| HandlerError::internal(err))?;
		info!(slug = %request.slug, external_id = %task.external_id, "pipeline task published");
		uow.uow.add(task);
	}
	uow.commit().map_err(|err| HandlerError::internal(err))?;
	Ok(integration_id)
}

/// Embedding strategy for the native mail streams: the message body
/// (plus subject and snippet) becomes the document, chunked under the
/// configured token capacity.
pub fn mail_strategy_factory(capacity: usize, encoder: Arc<dyn Encoder>) -> StrategyFactory {
	Arc::new(move |spec: &StreamSpec| {
		Arc::new(FieldMappedStrategy::new(
			spec.name.clone(),
			spec.key_properties.first().cloned().unwrap_or_else(|| "id".to_string()),
			spec.bookmark_property.clone(),
			"subject",
			"https://mail.example/messages/{id}",
			vec!["subject".to_string(), "snippet".to_string(), "body".to_string()],
			vec!["from_email".to_string(), "to_email".to_string()],
			capacity,
			encoder.clone(),
		))
	})
}

fn build_source(slug: &str, configuration: &BTreeMap<String, String>) -> HandlerResult<Arc<dyn Source>> {
	match slug {
		"mail" => {
			let auth = match configuration.get("auth_type").map(String::as_str) {
				Some("api_token") => AuthConfig::ApiToken {
					token: configuration.get("token").cloned().unwrap_or_default(),
				},
				_ => AuthConfig::Oauth {
					endpoint: configuration.get("endpoint").cloned().unwrap_or_default(),
					client_id: configuration.get("client_id").cloned().unwrap_or_default(),
					client_secret: configuration
						.get("client_secret")
						.cloned()
						.unwrap_or_default(),
					refresh_token: configuration
						.get("refresh_token")
						.cloned()
						.unwrap_or_default(),
				},
			};
			let base_url = configuration
				.get("base_url")
				.cloned()
				.unwrap_or_else(|| "https://mail.googleapis.com".to_string());
			let source = MailSource::new(MailSourceConfig { base_url, auth })
				.map_err(|err| HandlerError::internal(err))?;
			Ok(Arc::new(source))
		},
		other => Err(HandlerError::bad_request(format!("SourceNotSupported: `{other}`"))),
	}
}

/// Runs one ingest for an integration, holding its row lock for the
/// whole run. A concurrent sync of the same integration fails fast
/// with `ResourceBusy`.
pub async fn sync_integration(request: SyncIntegration, ctx: HandlerContext) -> HandlerResult<()> {
	let store = ctx.resolve::<MemoryStore>()?;
	let _guard = store
		.locks()
		.try_lock("integration", request.integration_id)
		.map_err(|lock_error| match lock_error.kind() {
			StorageErrorKind::RowLocked =>
				HandlerError::resource_busy("IntegrationAreBeingSynced"),
			_ => HandlerError::internal(lock_error),
		})?;

	let uow = CatalogUow::begin(&store);
	let integration = uow
		.get_integration(request.integration_id)
		.ok_or_else(|| HandlerError::not_found("Integration not found"))?;
	drop(uow);

	let secrets = ctx.resolve::<Arc<dyn SecretsManager>>()?;
	let configuration = secrets
		.decrypt_dict(&integration.configuration)
		.map_err(|err| HandlerError::internal(err))?;
	let source = build_source(&integration.slug, &configuration)?;

	let controller = ctx.resolve::<Arc<IngestController>>()?;
	let identity = Identity {
		slug: integration.slug.clone(),
		namespace_id: integration.namespace_id.to_string(),
		datasource_id: integration.id.to_string(),
	};
	controller
		.ingest(source.as_ref(), IngestRequest::new(identity))
		.await
		.map_err(|ingest_error| {
			// The controller already recorded sync_status=error.
			warn!(integration_id = %request.integration_id, error = ?ingest_error, "sync failed");
			HandlerError::internal(ingest_error)
		})?;
	Ok(())
}

/// Refreshes a warehouse connection's table listing under the same
/// row-lock discipline as integrations.
pub async fn sync_connection(request: SyncConnection, ctx: HandlerContext) -> HandlerResult<()> {
	let store = ctx.resolve::<MemoryStore>()?;
	let _guard = store
		.locks()
		.try_lock("connection", request.connection_id)
		.map_err(|lock_error| match lock_error.kind() {
			StorageErrorKind::RowLocked =>
				HandlerError::resource_busy("ConnectionAreBeingSynced"),
			_ => HandlerError::internal(lock_error),
		})?;

	let uow = CatalogUow::begin(&store);
	let mut connection = uow
		.get_connection(request.connection_id)
		.ok_or_else(|| HandlerError::not_found("Connection not found"))?;
	connection.sync_status = SyncStatus::Syncing;
	connection.sync_error = None;
	uow.uow.add(connection.clone());
	uow.commit().map_err(|err| HandlerError::internal(err))?;

	let warehouse = ctx.resolve::<Arc<dyn WarehouseClient>>()?;
	let datasource = common::DataSource {
		id: connection.id,
		organization_id: connection.organization_id,
		name: connection.name.clone(),
		slug: connection.slug.clone(),
		source_type: common::DataSourceType::Warehouse,
		database: connection.name.clone(),
		table: String::new(),
		source_tables: connection.tables.clone(),
		metadata: json!({}),
	};
	let refresh = async {
		warehouse.test_connection(&datasource).await?;
		warehouse.get_tables(&datasource).await
	};
	let uow = CatalogUow::begin(&store);
	match refresh.await {
		Ok(tables) => {
			connection.tables = tables;
			connection.sync_status = SyncStatus::Success;
			connection.sync_error = None;
		},
		Err(sync_error) => {
			connection.sync_status = SyncStatus::Error;
			connection.sync_error = Some(sync_error.to_string());
		},
	}
	connection.last_synced_at = Some(now_unix_seconds());
	let failed = connection.sync_status == SyncStatus::Error;
	let sync_error = connection.sync_error.clone();
	uow.uow.add(connection);
	uow.commit().map_err(|err| HandlerError::internal(err))?;
	if failed {
		return Err(HandlerError::internal(
			sync_error.unwrap_or_else(|| "connection sync failed".to_string()),
		));
	}
	Ok(())
}
