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

use chrono::{DateTime, Utc};
use common::{ChatMessage, Source, Step, StreamingChunk};
use serde::{Deserialize, Serialize};
use storage::Entity;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
	#[default]
	Success,
	/// Only during live generation.
	Streaming,
	Failure,
}

/// A conversation bound to one agent; owns an ordered message list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
	pub id: Uuid,
	pub organization_id: Uuid,
	pub agent_id: Option<Uuid>,
	pub name: String,
	pub created_by: Uuid,
	pub last_message_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

impl Channel {
	pub fn new(organization_id: Uuid, agent_id: Uuid, created_by: Uuid, name: &str) -> Self {
		Self {
			id: Uuid::new_v4(),
			organization_id,
			agent_id: Some(agent_id),
			name: name.to_string(),
			created_by,
			last_message_at: None,
			created_at: Utc::now(),
		}
	}
}

impl Entity for Channel {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
	#[serde(default)]
	pub steps: Vec<Step>,
}

/// One row of a channel's transcript. An AI message always parents a
/// user message in the same channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
	pub id: Uuid,
	pub channel_id: Option<Uuid>,
	pub user_id: Uuid,
	pub parent_id: Option<Uuid>,
	pub content: String,
	pub is_ai_message: bool,
	pub sources: Vec<Source>,
	pub metadata: MessageMetadata,
	pub status: MessageStatus,
	pub trace_id: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl Message {
	pub fn user_message(
		user_id: Uuid,
		content: impl Into<String>,
		channel_id: Option<Uuid>,
		parent_id: Option<Uuid>,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			channel_id,
			user_id,
			parent_id,
			content: content.into(),
			is_ai_message: false,
			sources: Vec::new(),
			metadata: MessageMetadata::default(),
			status: MessageStatus::Success,
			trace_id: None,
			created_at: Utc::now(),
		}
	}

	pub fn ai_message_for(user_message: &Message) -> Self {
		Self {
			id: Uuid::new_v4(),
			channel_id: user_message.channel_id,
			user_id: user_message.user_id,
			parent_id: Some(user_message.id),
			content: String::new(),
			is_ai_message: true,
			sources: Vec::new(),
			metadata: MessageMetadata::default(),
			status: MessageStatus::Streaming,
			trace_id: None,
			created_at: Utc::now(),
		}
	}

	/// Folds one streamed chunk into the row: append the text, keep
	/// each surfaced source once (by display number), extend the step
	/// trail.
	pub fn apply_streaming_chunk(&mut self, chunk: &StreamingChunk) {
		self.content.push_str(&chunk.text);
		for source in &chunk.sources {
			if !self.sources.iter().any(|existing| existing.number == source.number) {
				self.sources.push(source.clone());
			}
		}
		self.metadata.steps.extend(chunk.steps.iter().copied());
	}

	/// A delta view: only the newly streamed text, with the
	/// accumulated sources/metadata snapshot.
	pub fn to_chunk(&self, chunk: &StreamingChunk) -> Message {
		Message { content: chunk.text.clone(), ..self.clone() }
	}

	pub fn to_chat_message(&self) -> ChatMessage {
		ChatMessage { content: self.content.clone(), is_ai_message: self.is_ai_message }
	}
}

impl Entity for Message {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

/// User feedback on one AI message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Feedback {
	pub id: Uuid,
	pub message_id: Uuid,
	pub created_by: Uuid,
	pub feedback_type: i8,
	pub comment: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl Entity for Feedback {
	fn entity_id(&self) -> Uuid {
		self.id
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_apply_streaming_chunk_deduplicates_sources() {
		let user = Message::user_message(Uuid::new_v4(), "hi", None, None);
		let mut ai = Message::ai_message_for(&user);
		let source = Source { number: 1, label: "doc".to_string(), ..Default::default() };
		ai.apply_streaming_chunk(&StreamingChunk::cited("Hello", vec![source.clone()]));
		ai.apply_streaming_chunk(&StreamingChunk::cited(" again", vec![source]));
		assert_eq!(ai.content, "Hello again");
		assert_eq!(ai.sources.len(), 1);
	}

	#[test]
	fn test_ai_message_parents_user_message() {
		let user = Message::user_message(Uuid::new_v4(), "hi", Some(Uuid::new_v4()), None);
		let ai = Message::ai_message_for(&user);
		assert_eq!(ai.parent_id, Some(user.id));
		assert_eq!(ai.channel_id, user.channel_id);
		assert!(ai.is_ai_message);
		assert_eq!(ai.status, MessageStatus::Streaming);
	}

	#[test]
	fn test_to_chunk_is_a_delta_view() {
		let user = Message::user_message(Uuid::new_v4(), "hi", None, None);
		let mut ai = Message::ai_message_for(&user);
		ai.apply_streaming_chunk(&StreamingChunk::content("Hello wor"));
		let delta = ai.to_chunk(&StreamingChunk::content("ld"));
		assert_eq!(delta.content, "ld");
		assert_eq!(delta.id, ai.id);
	}
}
