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

use crate::IngestResult;

/// Chunk-batch embedding used by the embed sink. One vector per
/// chunk, in chunk order.
#[async_trait]
pub trait Encoder: Send + Sync {
	async fn encode(&self, chunks: &[String]) -> IngestResult<Vec<Vec<f32>>>;
}

impl std::fmt::Debug for dyn Encoder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Encoder").finish()
	}
}

/// The production encoder: the llms batch embedding transport.
pub struct EmbedderEncoder {
	embedder: Arc<dyn llms::Embedder>,
}

impl EmbedderEncoder {
	pub fn new(embedder: Arc<dyn llms::Embedder>) -> Self {
		Self { embedder }
	}
}

#[async_trait]
impl Encoder for EmbedderEncoder {
	async fn encode(&self, chunks: &[String]) -> IngestResult<Vec<Vec<f32>>> {
		Ok(self.embedder.embed(chunks).await?)
	}
}
