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

//! Scripted transports for the test suites of dependent crates.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
	ChatDelta, ChatModel, ChatStream, Embedder, LLMError, LLMErrorKind, LLMResult, Message,
	ToolSpec,
};

/// Replays scripted responses, one per `stream_chat` call, split into
/// small content chunks to exercise streaming consumers. Records every
/// request it sees.
pub struct FakeChatModel {
	responses: Mutex<Vec<Vec<ChatDelta>>>,
	pub requests: Mutex<Vec<(Vec<Message>, Vec<ToolSpec>)>>,
	chunk_size: usize,
}

impl FakeChatModel {
	pub fn with_text(text: &str) -> Self {
		Self::with_deltas(vec![vec![ChatDelta::Content(text.to_string())]])
	}

	pub fn with_deltas(responses: Vec<Vec<ChatDelta>>) -> Self {
		Self { responses: Mutex::new(responses), requests: Mutex::new(Vec::new()), chunk_size: 3 }
	}

	/// Splits content deltas into chunks of `chunk_size` characters.
	pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
		self.chunk_size = chunk_size.max(1);
		self
	}
}

#[async_trait]
impl ChatModel for FakeChatModel {
	async fn stream_chat(
		&self,
		messages: &[Message],
		tools: &[ToolSpec],
	) -> LLMResult<ChatStream> {
		self.requests.lock().unwrap().push((messages.to_vec(), tools.to_vec()));
		let mut responses = self.responses.lock().unwrap();
		if responses.is_empty() {
			return Err(LLMError::new(
				LLMErrorKind::Internal,
				anyhow::anyhow!("fake model exhausted"),
			));
		}
		let deltas = responses.remove(0);
		let chunk_size = self.chunk_size;
		let mut items = Vec::new();
		for delta in deltas {
			match delta {
				ChatDelta::Content(text) => {
					let chars: Vec<char> = text.chars().collect();
					for chunk in chars.chunks(chunk_size) {
						items.push(Ok(ChatDelta::Content(chunk.iter().collect())));
					}
				},
				tool_call => items.push(Ok(tool_call)),
			}
		}
		Ok(futures::stream::iter(items).boxed())
	}
}

/// Deterministic embedder: a tiny vector derived from the input
/// bytes, stable across calls.
#[derive(Clone, Debug, Default)]
pub struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
	async fn embed(&self, inputs: &[String]) -> LLMResult<Vec<Vec<f32>>> {
		Ok(inputs
			.iter()
			.map(|input| {
				let sum: u32 = input.bytes().map(u32::from).sum();
				vec![(sum % 97) as f32 / 97.0, input.len() as f32, 0.5]
			})
			.collect())
	}
}
