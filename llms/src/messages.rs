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
use serde_json::Value;

/// Role tag of a chat message.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub enum MessageType {
	#[default]
	#[serde(rename = "system")]
	SystemMessage,
	#[serde(rename = "ai")]
	AIMessage,
	#[serde(rename = "human")]
	HumanMessage,
	#[serde(rename = "tool")]
	ToolMessage,
}

/// One role-tagged message of the LLM request.
///
/// ```rust,ignore
/// let human_message = Message::new_human_message("Hello");
/// let system_message = Message::new_system_message("System Alert");
/// let ai_message = Message::new_ai_message("AI Response");
/// ```
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Message {
	pub content: String,
	pub message_type: MessageType,
	pub id: Option<String>,
	pub tool_calls: Option<Value>,
}

impl Message {
	pub fn new_human_message<T: std::fmt::Display>(content: T) -> Self {
		Message {
			content: content.to_string(),
			message_type: MessageType::HumanMessage,
			id: None,
			tool_calls: None,
		}
	}

	pub fn new_system_message<T: std::fmt::Display>(content: T) -> Self {
		Message {
			content: content.to_string(),
			message_type: MessageType::SystemMessage,
			id: None,
			tool_calls: None,
		}
	}

	pub fn new_ai_message<T: std::fmt::Display>(content: T) -> Self {
		Message {
			content: content.to_string(),
			message_type: MessageType::AIMessage,
			id: None,
			tool_calls: None,
		}
	}

	pub fn new_tool_message<T: std::fmt::Display, S: Into<String>>(content: T, id: S) -> Self {
		Message {
			content: content.to_string(),
			message_type: MessageType::ToolMessage,
			id: Some(id.into()),
			tool_calls: None,
		}
	}

	/// Attaches the assistant's tool-call records, for the follow-up
	/// request after tool execution.
	pub fn with_tool_calls(mut self, tool_calls: Value) -> Self {
		self.tool_calls = Some(tool_calls);
		self
	}
}
