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

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single prior turn handed to the answer chain as history.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatMessage {
	pub content: String,
	pub is_ai_message: bool,
}

/// Per-request caller identity threaded through the answer chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatContext {
	pub organization_id: Option<Uuid>,
	pub username: String,
	pub user_email: String,
	pub user_id: Uuid,
	pub channel_id: Option<Uuid>,
	pub current_date: String,
}

impl ChatContext {
	pub fn new(user_id: Uuid, username: impl Into<String>, user_email: impl Into<String>) -> Self {
		Self {
			organization_id: None,
			username: username.into(),
			user_email: user_email.into(),
			user_id,
			channel_id: None,
			current_date: Utc::now().to_rfc3339(),
		}
	}
}

/// Pipeline progress markers surfaced in message metadata.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Step {
	#[serde(rename = "fetch-data")]
	FetchData,
	#[serde(rename = "thinking")]
	Thinking,
	#[serde(rename = "generate-answer")]
	GenerateAnswer,
}

/// A cited document surfaced to the end user, numbered by first use
/// within the request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
	pub number: usize,
	pub label: String,
	pub content: String,
	#[serde(rename = "type")]
	pub source_type: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub page: String,
}

/// One unit of the outgoing answer stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamingChunk {
	pub text: String,
	pub sources: Vec<Source>,
	#[serde(default)]
	pub steps: Vec<Step>,
}

impl StreamingChunk {
	pub fn step(step: Step) -> Self {
		Self { text: String::new(), sources: Vec::new(), steps: vec![step] }
	}

	pub fn content(text: impl Into<String>) -> Self {
		Self { text: text.into(), sources: Vec::new(), steps: Vec::new() }
	}

	pub fn cited(text: impl Into<String>, sources: Vec<Source>) -> Self {
		Self { text: text.into(), sources, steps: Vec::new() }
	}
}

/// Observability handle attached once per answer stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamingTrace {
	pub trace_id: String,
	pub trace_url: String,
	pub total_duration: Option<f64>,
	pub time_to_first_token: Option<f64>,
}

/// Either content or the trailing trace marker.
#[derive(Clone, Debug)]
pub enum StreamItem {
	Chunk(StreamingChunk),
	Trace(StreamingTrace),
}
