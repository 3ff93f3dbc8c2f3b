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

use storage::{MemoryStore, StorageResult, UnitOfWork};
use uuid::Uuid;

use crate::models::{Channel, Feedback, Message};

/// The chat service's transaction scope.
pub struct ChatUow {
	pub uow: UnitOfWork,
}

impl ChatUow {
	pub fn begin(store: &MemoryStore) -> Self {
		Self { uow: store.begin() }
	}

	pub fn commit(&self) -> StorageResult<()> {
		self.uow.commit()
	}

	pub fn get_channel(&self, channel_id: Uuid) -> Option<Channel> {
		self.uow.get::<Channel>(channel_id)
	}

	pub fn get_message(&self, message_id: Uuid) -> Option<Message> {
		self.uow.get::<Message>(message_id)
	}

	/// The channel's transcript, oldest first.
	pub fn channel_messages(&self, channel_id: Uuid) -> Vec<Message> {
		let mut messages =
			self.uow.list::<Message>(|message| message.channel_id == Some(channel_id));
		messages.sort_by_key(|message| (message.created_at, message.id));
		messages
	}

	/// The trailing `limit` messages, oldest first, for chat history.
	pub fn recent_messages(&self, channel_id: Uuid, limit: usize) -> Vec<Message> {
		let messages = self.channel_messages(channel_id);
		let skip = messages.len().saturating_sub(limit);
		messages.into_iter().skip(skip).collect()
	}

	pub fn last_message(&self, channel_id: Uuid) -> Option<Message> {
		self.channel_messages(channel_id).into_iter().last()
	}

	pub fn get_active_agent_channel(&self, agent_id: Uuid, created_by: Uuid) -> Option<Channel> {
		self.uow
			.list::<Channel>(|channel| {
				channel.agent_id == Some(agent_id) && channel.created_by == created_by
			})
			.into_iter()
			.max_by_key(|channel| channel.created_at)
	}

	pub fn get_feedback(&self, message_id: Uuid, created_by: Uuid) -> Option<Feedback> {
		self.uow
			.list::<Feedback>(|feedback| {
				feedback.message_id == message_id && feedback.created_by == created_by
			})
			.into_iter()
			.next()
	}

	pub fn message_feedbacks(&self, message_ids: &[Uuid]) -> Vec<Feedback> {
		self.uow.list::<Feedback>(|feedback| message_ids.contains(&feedback.message_id))
	}
}

impl std::fmt::Debug for ChatUow {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChatUow").finish()
	}
}
