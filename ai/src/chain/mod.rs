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

pub mod builder;
pub use builder::*;
pub mod predict;
pub use predict::*;
pub mod retrieval;
pub use retrieval::*;
pub mod signature;
pub use signature::*;

use common::{AgentInfo, ChatMessage, Step, StreamingChunk};
use futures::stream::BoxStream;

use crate::AiResult;

/// Everything the answer chain needs for one turn.
#[derive(Clone, Debug)]
pub struct ChainInput {
	pub message: String,
	pub username: String,
	pub chat_history: Vec<ChatMessage>,
	pub agent_info: AgentInfo,
}

/// The composed chain: retrieval context assembly followed by the
/// streaming predictor.
pub struct AgentChain {
	pub(crate) rag: RagStep,
	pub(crate) predict: StreamPredict,
}

impl AgentChain {
	/// Runs the chain for one input, yielding progress steps and
	/// content chunks in token order.
	pub fn stream(self, input: ChainInput) -> BoxStream<'static, AiResult<StreamingChunk>> {
		Box::pin(async_stream::try_stream! {
			yield StreamingChunk::step(Step::FetchData);
			let relevant_information = self.rag.run(&input.message).await?;
			let agent_block = input.agent_info.to_prompt();
			// The chat summary is reserved; the predictor receives an
			// empty block for now.
			let chat_summary = String::new();
			let inner =
				self.predict.stream(input, agent_block, relevant_information, chat_summary);
			futures::pin_mut!(inner);
			while let Some(chunk) = futures::StreamExt::next(&mut inner).await {
				yield chunk?;
			}
		})
	}
}
