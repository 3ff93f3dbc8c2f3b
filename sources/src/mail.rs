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

//! Mail source: a REST provider with a message-list endpoint, a batch
//! message-detail endpoint, and page-token pagination.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{clean_ascii_control_chars, Interval, RetryParams};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
	source::{AuthConfig, Source, SourceError, SourceErrorKind, SourceResult, SourceSession},
	stream::{PagedStream, Record, RecordStream, StreamSpec},
};

const MESSAGES_STREAM: &str = "messages";

#[derive(Clone, Debug)]
pub struct MailSourceConfig {
	pub base_url: String,
	pub auth: AuthConfig,
}

/// Mail provider source. `connect` exchanges the refresh token for an
/// access token and exposes the single `messages` stream.
#[derive(Clone, Debug)]
pub struct MailSource {
	config: MailSourceConfig,
	http: reqwest::Client,
}

impl MailSource {
	pub fn new(config: MailSourceConfig) -> SourceResult<Self> {
		let http = reqwest::Client::builder().build().map_err(SourceError::from)?;
		Ok(Self { config, http })
	}

	async fn access_token(&self) -> SourceResult<String> {
		match &self.config.auth {
			AuthConfig::ApiToken { token } => Ok(token.clone()),
			AuthConfig::Oauth { endpoint, client_id, client_secret, refresh_token } => {
				#[derive(Deserialize)]
				struct TokenResponse {
					access_token: String,
				}
				let response = self
					.http
					.post(endpoint)
					.form(&[
						("grant_type", "refresh_token"),
						("client_id", client_id.as_str()),
						("client_secret", client_secret.as_str()),
						("refresh_token", refresh_token.as_str()),
					])
					.send()
					.await?;
				if response.status() == reqwest::StatusCode::UNAUTHORIZED {
					return Err(SourceError::new(
						SourceErrorKind::Unauthorized,
						anyhow::anyhow!("token refresh rejected"),
					));
				}
				if !response.status().is_success() {
					return Err(SourceError::new(
						SourceErrorKind::Connection,
						anyhow::anyhow!("token refresh failed with {}", response.status()),
					));
				}
				let token: TokenResponse = response.json().await?;
				Ok(token.access_token)
			},
		}
	}
}

#[async_trait]
impl Source for MailSource {
	async fn connect(&self) -> SourceResult<SourceSession> {
		let access_token = self.access_token().await?;
		info!(base_url = %self.config.base_url, "mail source connected");
		let stream = MailMessagesStream::new(
			self.http.clone(),
			self.config.base_url.clone(),
			access_token,
		);
		Ok(SourceSession::new(vec![Arc::new(stream) as Arc<dyn RecordStream>]))
	}
}

pub fn mail_stream_spec() -> StreamSpec {
	StreamSpec {
		name: MESSAGES_STREAM.to_string(),
		properties: vec![
			("message_id".to_string(), "string".to_string()),
			("thread_id".to_string(), "string".to_string()),
			("subject".to_string(), "string".to_string()),
			("from_email".to_string(), "string".to_string()),
			("to_email".to_string(), "string".to_string()),
			("snippet".to_string(), "string".to_string()),
			("body".to_string(), "string".to_string()),
			("internal_date".to_string(), "integer".to_string()),
		],
		key_properties: vec!["message_id".to_string()],
		bookmark_property: "internal_date".to_string(),
	}
}

#[derive(Clone, Debug)]
pub struct MailRequest {
	pub query: String,
	pub max_results: usize,
	pub page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MailListResponse {
	#[serde(default)]
	pub messages: Vec<MailListEntry>,
	#[serde(default)]
	pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MailListEntry {
	pub id: String,
}

#[derive(Debug, Deserialize)]
struct MailBatchResponse {
	#[serde(default)]
	results: Vec<MailBatchEntry>,
}

#[derive(Debug, Deserialize)]
struct MailBatchEntry {
	id: String,
	status: u16,
	#[serde(default)]
	message: Option<MailMessage>,
}

#[derive(Clone, Debug, Deserialize)]
struct MailMessage {
	id: String,
	#[serde(default)]
	thread_id: String,
	#[serde(default)]
	subject: String,
	#[serde(default)]
	from_email: String,
	#[serde(default)]
	to_email: String,
	#[serde(default)]
	snippet: String,
	#[serde(default)]
	body: String,
	/// Epoch milliseconds, as the provider reports it.
	#[serde(default)]
	internal_date: i64,
}

pub struct MailMessagesStream {
	spec: StreamSpec,
	http: reqwest::Client,
	base_url: String,
	access_token: String,
}

impl MailMessagesStream {
	pub fn new(http: reqwest::Client, base_url: String, access_token: String) -> Self {
		Self { spec: mail_stream_spec(), http, base_url, access_token }
	}

	/// One round against the batch-detail endpoint. Items that fail
	/// within an otherwise successful batch come back as failed ids so
	/// the caller can retry them without re-fetching the page.
	async fn batch_messages(
		&self,
		message_ids: &[String],
	) -> SourceResult<(HashMap<String, MailMessage>, Vec<String>)> {
		let mut messages = HashMap::new();
		let mut failed_ids = Vec::new();
		if message_ids.is_empty() {
			return Ok((messages, failed_ids));
		}
		let response = self
			.http
			.post(format!("{}/v1/messages:batchGet", self.base_url))
			.bearer_auth(&self.access_token)
			.json(&json!({ "ids": message_ids }))
			.send()
			.await?;
		if !response.status().is_success() {
			return Err(SourceError::new(
				SourceErrorKind::Polling,
				anyhow::anyhow!("batch fetch failed with {}", response.status()),
			));
		}
		let batch: MailBatchResponse = response.json().await?;
		for entry in batch.results {
			match (entry.status, entry.message) {
				(200, Some(message)) => {
					messages.insert(entry.id, message);
				},
				_ => failed_ids.push(entry.id),
			}
		}
		Ok((messages, failed_ids))
	}

	async fn fetch_details(
		&self,
		message_ids: Vec<String>,
	) -> SourceResult<HashMap<String, MailMessage>> {
		let mut results = HashMap::new();
		let mut pending = message_ids;
		let params = self.retry_params();
		let mut num_attempts = 0;
		while !pending.is_empty() {
			let (messages, failed_ids) = self.batch_messages(&pending).await?;
			results.extend(messages);
			if failed_ids.is_empty() {
				break;
			}
			num_attempts += 1;
			if num_attempts >= params.max_attempts {
				return Err(SourceError::new(
					SourceErrorKind::Polling,
					anyhow::anyhow!("failed to fetch {} messages", failed_ids.len()),
				));
			}
			warn!(failed = failed_ids.len(), num_attempts, "retrying failed batch items");
			tokio::time::sleep(params.compute_delay(num_attempts)).await;
			pending = failed_ids;
		}
		Ok(results)
	}

	fn to_record(message: MailMessage) -> Record {
		let mut record = Record::default();
		record.set("message_id", message.id);
		record.set("thread_id", message.thread_id);
		record.set("subject", clean_ascii_control_chars(&message.subject));
		record.set("from_email", message.from_email);
		record.set("to_email", message.to_email);
		record.set("snippet", clean_ascii_control_chars(&message.snippet));
		record.set("body", clean_ascii_control_chars(&message.body));
		record.set("internal_date", message.internal_date / 1000);
		record
	}
}

impl std::fmt::Debug for MailMessagesStream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MailMessagesStream").field("base_url", &self.base_url).finish()
	}
}

#[async_trait]
impl PagedStream for MailMessagesStream {
	type Request = MailRequest;
	type Response = MailListResponse;

	fn spec(&self) -> &StreamSpec {
		&self.spec
	}

	fn request_factory(&self, interval: Interval, batch_size: usize) -> MailRequest {
		MailRequest {
			query: format!("after:{} before:{}", interval.start, interval.end),
			max_results: batch_size,
			page_token: None,
		}
	}

	async fn retrieve(&self, request: &MailRequest) -> SourceResult<MailListResponse> {
		let mut query: Vec<(&str, String)> = vec![
			("q", request.query.clone()),
			("maxResults", request.max_results.to_string()),
		];
		if let Some(page_token) = &request.page_token {
			query.push(("pageToken", page_token.clone()));
		}
		let response = self
			.http
			.get(format!("{}/v1/messages", self.base_url))
			.bearer_auth(&self.access_token)
			.query(&query)
			.send()
			.await?;
		match response.status() {
			status if status.is_success() => Ok(response.json().await?),
			reqwest::StatusCode::UNAUTHORIZED => Err(SourceError::new(
				SourceErrorKind::Unauthorized,
				anyhow::anyhow!("message list rejected"),
			)),
			status => Err(SourceError::new(
				SourceErrorKind::Polling,
				anyhow::anyhow!("message list failed with {status}"),
			)),
		}
	}

	async fn extract_records(&self, response: &MailListResponse) -> SourceResult<Vec<Record>> {
		let message_ids: Vec<String> =
			response.messages.iter().map(|entry| entry.id.clone()).collect();
		debug!(count = message_ids.len(), "extracting mail records");
		let details = self.fetch_details(message_ids.clone()).await?;
		let mut records = Vec::with_capacity(message_ids.len());
		for message_id in &message_ids {
			if let Some(message) = details.get(message_id) {
				records.push(Self::to_record(message.clone()));
			}
		}
		Ok(records)
	}

	fn extract_cursor(&self, response: &MailListResponse) -> Option<String> {
		response.next_page_token.clone()
	}

	fn merge_cursor(&self, request: &mut MailRequest, cursor: Option<String>) {
		request.page_token = cursor;
	}

	fn retry_params(&self) -> RetryParams {
		RetryParams::default()
	}
}

#[cfg(test)]
mod tests {
	use common::Interval;
	use futures::StreamExt;
	use serde_json::json;
	use wiremock::{
		matchers::{method, path, query_param},
		Mock, MockServer, Request, ResponseTemplate,
	};

	use super::*;

	fn message_json(id: &str, date_ms: i64) -> serde_json::Value {
		json!({
			"id": id,
			"thread_id": format!("t-{id}"),
			"subject": format!("Subject {id}"),
			"from_email": "alice@example.com",
			"to_email": "bob@example.com",
			"snippet": "hi",
			"body": "hello there",
			"internal_date": date_ms,
		})
	}

	async fn mock_provider() -> MockServer {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/v1/messages"))
			.and(query_param("q", "after:100 before:200"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"messages": [{"id": "m1"}, {"id": "m2"}],
				"next_page_token": null,
			})))
			.mount(&server)
			.await;
		server
	}

	#[tokio::test]
	async fn test_messages_stream_drips_one_page() {
		let server = mock_provider().await;
		Mock::given(method("POST"))
			.and(path("/v1/messages:batchGet"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"results": [
					{"id": "m1", "status": 200, "message": message_json("m1", 150_000)},
					{"id": "m2", "status": 200, "message": message_json("m2", 160_000)},
				]
			})))
			.mount(&server)
			.await;

		let stream = MailMessagesStream::new(
			reqwest::Client::new(),
			server.uri(),
			"token".to_string(),
		);
		let batches: Vec<_> = stream
			.drip(Interval::new(100, 200), 100)
			.map(|batch| batch.unwrap())
			.collect()
			.await;
		assert_eq!(batches.len(), 1);
		let records = &batches[0];
		assert_eq!(records.len(), 2);
		assert_eq!(records[0].get_str("message_id"), Some("m1"));
		// Provider milliseconds land as unix seconds.
		assert_eq!(records[0].get_i64("internal_date"), Some(150));
	}

	#[tokio::test]
	async fn test_failed_batch_items_are_retried_individually() {
		let server = mock_provider().await;
		Mock::given(method("POST"))
			.and(path("/v1/messages:batchGet"))
			.respond_with(move |request: &Request| {
				let body: serde_json::Value = request.body_json().unwrap();
				let ids = body["ids"].as_array().unwrap();
				if ids.len() == 2 {
					// First round: m2 fails inside a successful page.
					ResponseTemplate::new(200).set_body_json(json!({
						"results": [
							{"id": "m1", "status": 200, "message": message_json("m1", 150_000)},
							{"id": "m2", "status": 500},
						]
					}))
				} else {
					assert_eq!(ids[0], "m2");
					ResponseTemplate::new(200).set_body_json(json!({
						"results": [
							{"id": "m2", "status": 200, "message": message_json("m2", 160_000)},
						]
					}))
				}
			})
			.mount(&server)
			.await;

		let stream = MailMessagesStream::new(
			reqwest::Client::new(),
			server.uri(),
			"token".to_string(),
		);
		let batches: Vec<_> = stream
			.drip(Interval::new(100, 200), 100)
			.map(|batch| batch.unwrap())
			.collect()
			.await;
		assert_eq!(batches[0].len(), 2);
	}

	#[tokio::test]
	async fn test_oauth_connect_exchanges_refresh_token() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/token"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"access_token": "fresh-token",
				"token_type": "Bearer",
			})))
			.mount(&server)
			.await;

		let source = MailSource::new(MailSourceConfig {
			base_url: server.uri(),
			auth: AuthConfig::Oauth {
				endpoint: format!("{}/token", server.uri()),
				client_id: "cid".to_string(),
				client_secret: "cs".to_string(),
				refresh_token: "rt".to_string(),
			},
		})
		.unwrap();
		let session = source.connect().await.unwrap();
		assert_eq!(session.streams.len(), 1);
		assert_eq!(session.streams[0].spec().name, "messages");
	}
}
