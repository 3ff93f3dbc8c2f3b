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

use std::{collections::BTreeMap, time::Duration};

use common::VespaConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{StorageError, StorageErrorKind, StorageResult};

/// Per-record document layout of the embed store.
///
/// `embeddings` is keyed by chunk index; `metadata` entries are
/// `key===value` strings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EmbedDocument {
	pub id: String,
	pub title: String,
	pub chunks: Vec<String>,
	pub embeddings: BTreeMap<String, Vec<f32>>,
	pub metadata: Vec<String>,
	pub timestamp: i64,
}

/// A scored hit from a hybrid query, with metadata flattened out of
/// the `key===value` entries.
#[derive(Clone, Debug, Default)]
pub struct RetrievedDocument {
	pub content: String,
	pub score: f64,
	pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchType {
	Semantic,
	Hybrid,
}

impl SearchType {
	fn ranking(&self) -> &'static str {
		match self {
			SearchType::Semantic => "semantic",
			SearchType::Hybrid => "hybrid",
		}
	}
}

/// Query parameters for the hybrid retrieval endpoint.
#[derive(Clone, Debug)]
pub struct VespaQuery {
	pub query: String,
	pub embedding: Vec<f32>,
	pub hits: usize,
	pub search_type: SearchType,
	pub filter: Option<String>,
	pub group_names: Vec<String>,
}

/// Builds the yql + body for one query, independent of transport.
pub fn build_query_body(query: &VespaQuery, target_hits: usize) -> Value {
	let nearest_neighbor = format!("{{targetHits:{target_hits}}}nearestNeighbor(embeddings,q)");
	let yql = match (query.search_type, query.filter.as_deref()) {
		(SearchType::Hybrid, Some(filter)) =>
			format!("select * from sources * where rank(userQuery(), {nearest_neighbor}, {filter})"),
		(SearchType::Hybrid, None) =>
			format!("select * from sources * where rank(userQuery(), {nearest_neighbor})"),
		(SearchType::Semantic, Some(filter)) =>
			format!("select * from sources * where {nearest_neighbor} and {filter}"),
		(SearchType::Semantic, None) =>
			format!("select * from sources * where {nearest_neighbor}"),
	};
	let mut body = json!({
		"yql": yql,
		"input.query(q)": query.embedding,
		"ranking": query.search_type.ranking(),
		"hits": query.hits,
	});
	if query.search_type == SearchType::Hybrid {
		body["query"] = Value::String(query.query.clone());
	}
	if !query.group_names.is_empty() {
		let selection = query
			.group_names
			.iter()
			.map(|group_name| format!("id.group == \"{group_name}\""))
			.collect::<Vec<_>>()
			.join(" or ");
		body["streaming.selection"] = Value::String(selection);
	}
	body
}

/// Thin client over the embed store's HTTP document and query APIs.
#[derive(Clone, Debug)]
pub struct VespaClient {
	http: reqwest::Client,
	config: VespaConfig,
	paragraph_expansion: usize,
}

impl VespaClient {
	pub fn new(config: VespaConfig) -> StorageResult<Self> {
		let http = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.timeout_secs))
			.build()
			.map_err(StorageError::from)?;
		let paragraph_expansion = config.paragraph_expansion;
		Ok(Self { http, config, paragraph_expansion })
	}

	/// Upserts one document under `(namespace, groupname, schema)`.
	pub async fn upsert_document(
		&self,
		namespace: &str,
		schema: &str,
		groupname: &str,
		document: &EmbedDocument,
	) -> StorageResult<()> {
		let url = format!(
			"{}/document/v1/{namespace}/{schema}/group/{groupname}/{}?create=true",
			self.config.endpoint, document.id
		);
		let fields = json!({
			"title": { "assign": document.title },
			"chunks": { "assign": document.chunks },
			"embeddings": { "assign": { "blocks": document.embeddings } },
			"metadata": { "assign": document.metadata },
			"timestamp": { "assign": document.timestamp },
		});
		let response =
			self.http.put(&url).json(&json!({ "fields": fields })).send().await?;
		if !response.status().is_success() {
			let status = response.status();
			let body = response.text().await.unwrap_or_default();
			return Err(StorageError::new(
				StorageErrorKind::Insertion,
				anyhow::anyhow!("document upsert failed with {status}: {body}"),
			));
		}
		Ok(())
	}

	/// Runs one hybrid/semantic query and parses the hits.
	pub async fn query(&self, query: &VespaQuery) -> StorageResult<Vec<RetrievedDocument>> {
		let body = build_query_body(query, self.config.target_hits);
		debug!(yql = %body["yql"], "vector query");
		let response = self
			.http
			.post(format!("{}/search/", self.config.endpoint))
			.json(&body)
			.send()
			.await?;
		if !response.status().is_success() {
			let status = response.status();
			return Err(StorageError::new(
				StorageErrorKind::Query,
				anyhow::anyhow!("vector query failed with {status}"),
			));
		}
		let payload: Value = response.json().await?;
		self.parse_hits(&payload)
	}

	fn parse_hits(&self, payload: &Value) -> StorageResult<Vec<RetrievedDocument>> {
		let root = &payload["root"];
		if let Some(errors) = root.get("errors") {
			return Err(StorageError::new(
				StorageErrorKind::Query,
				anyhow::anyhow!("vector query errors: {errors}"),
			));
		}
		let Some(children) = root.get("children").and_then(Value::as_array) else {
			return Ok(Vec::new());
		};
		Ok(children.iter().map(|hit| self.parse_hit(hit)).collect())
	}

	fn parse_hit(&self, hit: &Value) -> RetrievedDocument {
		let fields = &hit["fields"];
		let score = hit["relevance"].as_f64().unwrap_or(1.0);
		let chunks: Vec<String> = fields["chunks"]
			.as_array()
			.map(|chunks| {
				chunks.iter().filter_map(Value::as_str).map(str::to_string).collect()
			})
			.unwrap_or_default();
		let content = match closest_chunk_index(fields) {
			Some(closest) => {
				let start = closest.saturating_sub(self.paragraph_expansion);
				let end = (closest + self.paragraph_expansion + 1).min(chunks.len());
				chunks[start.min(chunks.len())..end].join("\n")
			},
			None => chunks.join("\n"),
		};

		let mut metadata = BTreeMap::new();
		if let Some(id) = hit["id"].as_str() {
			metadata.insert("id".to_string(), id.to_string());
		}
		if let Some(title) = fields["title"].as_str() {
			metadata.insert("title".to_string(), title.to_string());
		}
		if let Some(timestamp) = fields["timestamp"].as_i64() {
			metadata.insert("timestamp".to_string(), timestamp.to_string());
		}
		if let Some(entries) = fields["metadata"].as_array() {
			for entry in entries.iter().filter_map(Value::as_str) {
				if let Some((key, value)) = entry.split_once("===") {
					metadata.insert(key.to_string(), value.to_string());
				}
			}
		}
		RetrievedDocument { content, score, metadata }
	}
}

fn closest_chunk_index(fields: &Value) -> Option<usize> {
	fields["matchfeatures"]["closest(embeddings)"]["cells"]
		.as_object()?
		.keys()
		.next()?
		.parse()
		.ok()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn query(search_type: SearchType, filter: Option<&str>) -> VespaQuery {
		VespaQuery {
			query: "what changed".to_string(),
			embedding: vec![0.1, 0.2],
			hits: 4,
			search_type,
			filter: filter.map(str::to_string),
			group_names: vec!["mail__ds_1".to_string()],
		}
	}

	#[test]
	fn test_hybrid_query_yql() {
		let body = build_query_body(&query(SearchType::Hybrid, None), 1000);
		assert_eq!(
			body["yql"],
			"select * from sources * where rank(userQuery(), {targetHits:1000}nearestNeighbor(embeddings,q))"
		);
		assert_eq!(body["ranking"], "hybrid");
		assert_eq!(body["hits"], 4);
		assert_eq!(body["query"], "what changed");
		assert_eq!(body["streaming.selection"], "id.group == \"mail__ds_1\"");
	}

	#[test]
	fn test_hybrid_query_with_filter() {
		let body =
			build_query_body(&query(SearchType::Hybrid, Some("source_type contains \"mail\"")), 10);
		assert_eq!(
			body["yql"],
			"select * from sources * where rank(userQuery(), {targetHits:10}nearestNeighbor(embeddings,q), source_type contains \"mail\")"
		);
	}

	#[test]
	fn test_semantic_query_has_no_text_term() {
		let body = build_query_body(&query(SearchType::Semantic, None), 10);
		assert_eq!(
			body["yql"],
			"select * from sources * where {targetHits:10}nearestNeighbor(embeddings,q)"
		);
		assert_eq!(body["ranking"], "semantic");
		assert!(body.get("query").is_none());
	}

	#[test]
	fn test_parse_hit_expands_around_closest_chunk() {
		let client = VespaClient::new(VespaConfig::default()).unwrap();
		let payload = json!({
			"root": {
				"children": [{
					"id": "id:onyx__ns:mail:g=grp:doc-1",
					"relevance": 0.87,
					"fields": {
						"chunks": ["a", "b", "c", "d"],
						"title": "Subject",
						"timestamp": 1700000000,
						"metadata": ["source_type===mail", "url===https://mail.example/1"],
						"matchfeatures": {
							"closest(embeddings)": { "cells": { "2": 1.0 } }
						}
					}
				}]
			}
		});
		let docs = client.parse_hits(&payload).unwrap();
		assert_eq!(docs.len(), 1);
		// Chunk 2 with one neighbour each side.
		assert_eq!(docs[0].content, "b\nc\nd");
		assert_eq!(docs[0].metadata["source_type"], "mail");
		assert_eq!(docs[0].metadata["title"], "Subject");
		assert!((docs[0].score - 0.87).abs() < f64::EPSILON);
	}

	#[test]
	fn test_parse_hits_propagates_errors() {
		let client = VespaClient::new(VespaConfig::default()).unwrap();
		let payload = json!({ "root": { "errors": [{ "message": "bad yql" }] } });
		let error = client.parse_hits(&payload).unwrap_err();
		assert_eq!(error.kind(), StorageErrorKind::Query);
	}
}
