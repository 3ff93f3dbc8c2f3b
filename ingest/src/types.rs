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

use chrono::Duration;
use common::{canonical, Interval};
use serde::{Deserialize, Serialize};
use sources::{Record, StreamSpec};

use crate::{processor::EmbeddingStrategy, state::StateStorage, IngestResult};

/// Who the ingested data belongs to: the source slug, the tenancy
/// namespace, and the data source row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
	pub slug: String,
	pub namespace_id: String,
	pub datasource_id: String,
}

impl Identity {
	pub fn staging_schema(&self) -> String {
		format!("onyx__{}", canonical(&self.namespace_id))
	}

	pub fn staging_table(&self, stream_name: &str) -> String {
		format!("{}__{}__{}", self.slug, stream_name, canonical(&self.datasource_id))
	}

	pub fn embed_namespace(&self) -> String {
		format!("onyx__{}", canonical(&self.namespace_id))
	}

	pub fn embed_groupname(&self) -> String {
		format!("{}__{}", self.slug, canonical(&self.datasource_id))
	}

	pub fn embed_schema(&self) -> &str {
		&self.slug
	}
}

/// One ingest run request for a single integration.
#[derive(Clone, Debug)]
pub struct IngestRequest {
	pub identity: Identity,
	pub request_interval: Option<Interval>,
	/// How far back the first run reaches when no bookmark exists.
	pub default_beginning_delta: Duration,
}

impl IngestRequest {
	pub fn new(identity: Identity) -> Self {
		Self { identity, request_interval: None, default_beginning_delta: Duration::days(30) }
	}
}

/// Run-wide parameters shared by every stream of the run.
#[derive(Clone, Debug)]
pub struct IngestContext {
	pub identity: Identity,
	pub request_interval: Interval,
	pub batch_size: usize,
	pub rewrite: bool,
}

/// Everything one stream's sinks need: the stream description, the
/// naming identity, the embedding strategy and the bookmark store.
pub struct StreamContext {
	pub spec: StreamSpec,
	pub ingest: IngestContext,
	pub strategy: Arc<dyn EmbeddingStrategy>,
	pub state: Arc<dyn StateStorage>,
}

impl StreamContext {
	pub fn name(&self) -> &str {
		&self.spec.name
	}

	pub fn identity(&self) -> &Identity {
		&self.ingest.identity
	}

	pub fn staging_table(&self) -> String {
		self.identity().staging_table(&self.spec.name)
	}

	/// Projects a batch onto the stream's property schema for the
	/// columnar target.
	pub fn to_staging_rows(&self, records: &[Record]) -> Vec<serde_json::Value> {
		records
			.iter()
			.map(|record| {
				let mut row = serde_json::Map::new();
				for (property, _) in &self.spec.properties {
					let value =
						record.0.get(property).cloned().unwrap_or(serde_json::Value::Null);
					row.insert(property.clone(), value);
				}
				serde_json::Value::Object(row)
			})
			.collect()
	}

	/// Folds a processed batch into the stream's bookmark list: the
	/// closed range of observed source timestamps, merged into the
	/// stored intervals.
	pub async fn update_state(&self, records: &[Record]) -> IngestResult<()> {
		let timestamps: Vec<i64> = records
			.iter()
			.filter_map(|record| record.get_i64(&self.spec.bookmark_property))
			.collect();
		let (Some(min_ts), Some(max_ts)) =
			(timestamps.iter().min().copied(), timestamps.iter().max().copied())
		else {
			return Ok(());
		};
		self.state
			.append_stream_interval(self.identity(), &self.spec.name, Interval::new(min_ts, max_ts))
			.await
	}
}

impl std::fmt::Debug for StreamContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamContext")
			.field("name", &self.spec.name)
			.field("interval", &self.ingest.request_interval)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_identity_naming() {
		let identity = Identity {
			slug: "mail".to_string(),
			namespace_id: "Acme-Corp".to_string(),
			datasource_id: "DS.17".to_string(),
		};
		assert_eq!(identity.staging_schema(), "onyx__acme_corp");
		assert_eq!(identity.staging_table("messages"), "mail__messages__ds_17");
		assert_eq!(identity.embed_namespace(), "onyx__acme_corp");
		assert_eq!(identity.embed_groupname(), "mail__ds_17");
		assert_eq!(identity.embed_schema(), "mail");
	}
}
