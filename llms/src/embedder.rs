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

use async_openai::{
	config::OpenAIConfig,
	types::{CreateEmbeddingRequestArgs, EmbeddingInput},
	Client,
};
use async_trait::async_trait;
use common::OpenAiConfig;
use tracing::debug;

use crate::{LLMError, LLMErrorKind, LLMResult};

/// Batch-input embedding transport. One vector per input, in input
/// order.
#[async_trait]
pub trait Embedder: Send + Sync {
	async fn embed(&self, inputs: &[String]) -> LLMResult<Vec<Vec<f32>>>;
}

impl std::fmt::Debug for dyn Embedder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Embedder").finish()
	}
}

#[derive(Clone)]
pub struct OpenAiEmbedder {
	client: Client<OpenAIConfig>,
	model: String,
}

impl OpenAiEmbedder {
	pub fn new(config: &OpenAiConfig) -> Self {
		let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key.clone());
		if let Some(api_base) = &config.api_base {
			openai_config = openai_config.with_api_base(api_base.clone());
		}
		Self { client: Client::with_config(openai_config), model: config.embedding_model.clone() }
	}
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
	async fn embed(&self, inputs: &[String]) -> LLMResult<Vec<Vec<f32>>> {
		if inputs.is_empty() {
			return Ok(Vec::new());
		}
		let request = CreateEmbeddingRequestArgs::default()
			.model(self.model.clone())
			.input(EmbeddingInput::StringArray(inputs.to_vec()))
			.build()
			.map_err(LLMError::from)?;
		let response = self.client.embeddings().create(request).await?;
		debug!(num_inputs = inputs.len(), "embedded batch");
		if response.data.len() != inputs.len() {
			return Err(LLMError::new(
				LLMErrorKind::Invalid,
				anyhow::anyhow!(
					"embedding response size {} does not match input size {}",
					response.data.len(),
					inputs.len()
				),
			));
		}
		let mut vectors = vec![Vec::new(); inputs.len()];
		for embedding in response.data {
			vectors[embedding.index as usize] = embedding.embedding;
		}
		Ok(vectors)
	}
}
