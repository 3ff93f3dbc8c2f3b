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

/// Process-wide configuration, deserialized once by the entry shim and
/// handed to the services through the dependency container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OnyxConfig {
	pub openai: OpenAiConfig,
	pub vespa: VespaConfig,
	pub clickhouse: ClickHouseConfig,
	pub ingest: IngestConfig,
	pub chat: ChatConfig,
	pub secrets: SecretsConfig,
	pub tracing: TracingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
	pub api_key: String,
	pub api_base: Option<String>,
	pub chat_model: String,
	pub embedding_model: String,
	/// Token capacity of a single embedded chunk.
	pub embeddings_max_tokens: usize,
}

impl Default for OpenAiConfig {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			api_base: None,
			chat_model: "gpt-4o".to_string(),
			embedding_model: "text-embedding-3-small".to_string(),
			embeddings_max_tokens: 512,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VespaConfig {
	pub endpoint: String,
	pub timeout_secs: u64,
	pub target_hits: usize,
	/// Number of neighbouring chunks pulled in around the best match.
	pub paragraph_expansion: usize,
}

impl Default for VespaConfig {
	fn default() -> Self {
		Self {
			endpoint: "http://localhost:8080".to_string(),
			timeout_secs: 30,
			target_hits: 1000,
			paragraph_expansion: 1,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
	pub endpoint: String,
	pub username: String,
	pub password: String,
}

impl Default for ClickHouseConfig {
	fn default() -> Self {
		Self {
			endpoint: "http://localhost:8123".to_string(),
			username: "default".to_string(),
			password: String::new(),
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
	pub batch_size: usize,
	pub queue_capacity: usize,
	pub drain_timeout_secs: u64,
	/// How far back the first run of an integration reaches, in days.
	pub default_beginning_delta_days: i64,
}

impl Default for IngestConfig {
	fn default() -> Self {
		Self {
			batch_size: 100,
			queue_capacity: 64,
			drain_timeout_secs: 300,
			default_beginning_delta_days: 30,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
	/// Number of trailing messages fed back as chat history.
	pub history_limit: usize,
	pub max_tool_depth: usize,
}

impl Default for ChatConfig {
	fn default() -> Self {
		Self { history_limit: 20, max_tool_depth: 5 }
	}
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
	pub key: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
	pub enabled: bool,
	pub endpoint: String,
	pub public_key: String,
	pub secret_key: String,
}

#[cfg(test)]
mod tests {
	use super::OnyxConfig;

	#[test]
	fn test_config_defaults_deserialize_from_empty_object() {
		let config: OnyxConfig = serde_json::from_str("{}").unwrap();
		assert_eq!(config.ingest.batch_size, 100);
		assert_eq!(config.chat.max_tool_depth, 5);
		assert!(!config.tracing.enabled);
	}

	#[test]
	fn test_config_partial_override() {
		let config: OnyxConfig =
			serde_json::from_str(r#"{"ingest": {"batch_size": 5}}"#).unwrap();
		assert_eq!(config.ingest.batch_size, 5);
		assert_eq!(config.ingest.queue_capacity, 64);
	}
}
