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
use futures::StreamExt;
use llms::{ChatDelta, ChatModel, Embedder, Message};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use storage::{RetrievedDocument, SearchType, VespaClient, VespaQuery};
use tracing::{debug, warn};

use crate::{AiError, AiErrorKind, AiResult};

/// Fetches grounding documents for a query.
///
/// The chain currently issues a single query per turn;
/// `retrieve_many` keeps the multi-query path open in the interface.
#[async_trait]
pub trait Retriever: Send + Sync {
	async fn retrieve(&self, query: &str) -> AiResult<Vec<RetrievedDocument>>;

	async fn retrieve_many(&self, queries: &[String]) -> AiResult<Vec<RetrievedDocument>> {
		let mut all_documents = Vec::new();
		for query in queries.iter().filter(|query| !query.is_empty()) {
			all_documents.extend(self.retrieve(query).await?);
		}
		Ok(all_documents)
	}
}

impl std::fmt::Debug for dyn Retriever {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Retriever").finish()
	}
}

/// Metadata fields a self-query filter may touch.
const FILTERABLE_FIELDS: [&str; 3] = ["source_type", "title", "url"];

static FILTER_EXPR_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r#"^(?:source_type|title|url) contains "[^"\\]*"(?: (?:and|or) (?:source_type|title|url) contains "[^"\\]*")*$"#)
		.expect("filter regex should compile")
});

/// Validates a model-built filter expression before it reaches the
/// store. Anything suspicious is dropped, not escalated.
pub fn validate_filter(expression: &str) -> Option<String> {
	let trimmed = expression.trim();
	if trimmed.is_empty() {
		return None;
	}
	FILTER_EXPR_REGEX.is_match(trimmed).then(|| trimmed.to_string())
}

#[derive(Clone, Debug)]
pub struct RetrieverConfig {
	pub k: usize,
	pub search_type: SearchType,
	/// Builds a metadata filter from the user message with an extra
	/// LLM pass. Off by default: it adds latency on every turn.
	pub use_self_query: bool,
}

impl Default for RetrieverConfig {
	fn default() -> Self {
		Self { k: 4, search_type: SearchType::Hybrid, use_self_query: false }
	}
}

/// Hybrid vector+keyword retriever over the embed store, scoped to
/// the agent's data sources through `group_names`.
pub struct HybridRetriever {
	client: Arc<VespaClient>,
	embedder: Arc<dyn Embedder>,
	group_names: Vec<String>,
	config: RetrieverConfig,
	filter_model: Option<Arc<dyn ChatModel>>,
	training_instruction: String,
}

impl HybridRetriever {
	pub fn new(
		client: Arc<VespaClient>,
		embedder: Arc<dyn Embedder>,
		group_names: Vec<String>,
		config: RetrieverConfig,
	) -> Self {
		Self {
			client,
			embedder,
			group_names,
			config,
			filter_model: None,
			training_instruction: String::new(),
		}
	}

	pub fn with_self_query(mut self, model: Arc<dyn ChatModel>) -> Self {
		self.filter_model = Some(model);
		self
	}

	pub fn with_training_instruction(mut self, instruction: String) -> Self {
		self.training_instruction = instruction;
		self
	}

	async fn build_filter(&self, query: &str) -> Option<String> {
		if !self.config.use_self_query {
			return None;
		}
		let model = self.filter_model.as_ref()?;
		let prompt = format!(
			"Construct a metadata filter for a document search, or reply NONE.\n\
			 Allowed fields: {}. Allowed operator: `contains`. Combine with `and`/`or`.\n\
			 Example: source_type contains \"mail\"\n{}Query: {query}\nFilter:",
			FILTERABLE_FIELDS.join(", "),
			self.training_instruction,
		);
		let mut stream =
			model.stream_chat(&[Message::new_human_message(prompt)], &[]).await.ok()?;
		let mut expression = String::new();
		while let Some(delta) = stream.next().await {
			match delta {
				Ok(ChatDelta::Content(text)) => expression.push_str(&text),
				Ok(_) => {},
				Err(llm_error) => {
					warn!(error = ?llm_error, "self-query filter construction failed");
					return None;
				},
			}
		}
		if expression.trim().eq_ignore_ascii_case("none") {
			return None;
		}
		let filter = validate_filter(&expression);
		if filter.is_none() {
			warn!(expression = %expression, "discarding invalid self-query filter");
		}
		filter
	}
}

#[async_trait]
impl Retriever for HybridRetriever {
	async fn retrieve(&self, query: &str) -> AiResult<Vec<RetrievedDocument>> {
		if self.group_names.is_empty() {
			return Ok(Vec::new());
		}
		let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
		let embedding = vectors.pop().ok_or_else(|| {
			AiError::new(AiErrorKind::Retrieval, anyhow::anyhow!("embedder returned no vector"))
		})?;
		let filter = self.build_filter(query).await;
		debug!(k = self.config.k, groups = ?self.group_names, filter = ?filter, "hybrid retrieval");
		let documents = self
			.client
			.query(&VespaQuery {
				query: query.to_string(),
				embedding,
				hits: self.config.k,
				search_type: self.config.search_type,
				filter,
				group_names: self.group_names.clone(),
			})
			.await?;
		Ok(documents)
	}
}

#[derive(Clone, Debug)]
pub struct WebSearchConfig {
	pub endpoint: String,
	pub api_key: String,
	pub k: usize,
}

/// Web-search retriever for agents without private data sources.
pub struct WebSearchRetriever {
	http: reqwest::Client,
	config: WebSearchConfig,
}

#[derive(Debug, Deserialize)]
struct WebSearchResponse {
	#[serde(default)]
	results: Vec<WebSearchResult>,
}

#[derive(Debug, Deserialize)]
struct WebSearchResult {
	title: String,
	url: String,
	#[serde(default)]
	snippet: String,
}

impl WebSearchRetriever {
	pub fn new(config: WebSearchConfig) -> AiResult<Self> {
		let http = reqwest::Client::builder()
			.build()
			.map_err(|err| AiError::new(AiErrorKind::Retrieval, err.into()))?;
		Ok(Self { http, config })
	}
}

#[async_trait]
impl Retriever for WebSearchRetriever {
	async fn retrieve(&self, query: &str) -> AiResult<Vec<RetrievedDocument>> {
		let response = self
			.http
			.get(&self.config.endpoint)
			.bearer_auth(&self.config.api_key)
			.query(&[("q", query), ("count", &self.config.k.to_string())])
			.send()
			.await
			.map_err(|err| AiError::new(AiErrorKind::Retrieval, err.into()))?;
		if !response.status().is_success() {
			return Err(AiError::new(
				AiErrorKind::Retrieval,
				anyhow::anyhow!("web search failed with {}", response.status()),
			));
		}
		let payload: WebSearchResponse = response
			.json()
			.await
			.map_err(|err| AiError::new(AiErrorKind::Retrieval, err.into()))?;
		Ok(payload
			.results
			.into_iter()
			.map(|result| {
				let mut metadata = std::collections::BTreeMap::new();
				metadata.insert("title".to_string(), result.title);
				metadata.insert("url".to_string(), result.url);
				metadata.insert("source_type".to_string(), "web".to_string());
				RetrievedDocument { content: result.snippet, score: 1.0, metadata }
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_validate_filter_accepts_allowed_fields() {
		assert_eq!(
			validate_filter("source_type contains \"mail\""),
			Some("source_type contains \"mail\"".to_string())
		);
		assert_eq!(
			validate_filter("source_type contains \"mail\" and title contains \"report\""),
			Some("source_type contains \"mail\" and title contains \"report\"".to_string())
		);
	}

	#[test]
	fn test_validate_filter_rejects_junk() {
		assert_eq!(validate_filter(""), None);
		assert_eq!(validate_filter("drop table users"), None);
		assert_eq!(validate_filter("secret contains \"x\""), None);
		assert_eq!(validate_filter("source_type contains \"a\" ; rm"), None);
	}

	#[tokio::test]
	async fn test_hybrid_retriever_without_groups_returns_nothing() {
		let retriever = HybridRetriever::new(
			Arc::new(VespaClient::new(common::VespaConfig::default()).unwrap()),
			Arc::new(llms::fake::FakeEmbedder),
			Vec::new(),
			RetrieverConfig::default(),
		);
		let documents = retriever.retrieve("anything").await.unwrap();
		assert!(documents.is_empty());
	}
}
