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
use common::{AgentInfo, ChatContext, ChatMessage, Step, StreamItem, StreamingTrace};
use futures::{stream::BoxStream, StreamExt};
use services::{Dispatcher, HandlerContext, HandlerResult, Service, StreamMessage};

use crate::{chain::{AgentBuilder, ChainInput}, trace::Tracer, AiResult};

/// One answer-stream request, as the chat service sends it.
#[derive(Clone, Debug)]
pub struct AiStreamRequest {
	pub text: String,
	pub context: ChatContext,
	pub chat_history: Vec<ChatMessage>,
	pub agent_info: AgentInfo,
	pub cite_sources: bool,
	pub tracing_session_id: Option<String>,
}

/// The ai service as its callers see it.
#[async_trait]
pub trait AiClient: Send + Sync {
	async fn stream(
		&self,
		request: AiStreamRequest,
	) -> AiResult<BoxStream<'static, AiResult<StreamItem>>>;
}

impl std::fmt::Debug for dyn AiClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AiClient").finish()
	}
}

/// In-process client: builds the chain per request and wraps it with
/// tracing. The trailing [`StreamItem::Trace`] carries the trace id,
/// url and timings once the content stream completes.
pub struct ChainAiClient {
	builder: AgentBuilder,
	tracer: Arc<dyn Tracer>,
}

impl ChainAiClient {
	pub fn new(builder: AgentBuilder, tracer: Arc<dyn Tracer>) -> Self {
		Self { builder, tracer }
	}
}

#[async_trait]
impl AiClient for ChainAiClient {
	async fn stream(
		&self,
		request: AiStreamRequest,
	) -> AiResult<BoxStream<'static, AiResult<StreamItem>>> {
		let chain = self.builder.build(&request.agent_info, request.cite_sources)?;
		let handler =
			self.tracer.begin(request.context.user_id, request.tracing_session_id.clone());
		let input = ChainInput {
			message: request.text,
			username: request.context.username,
			chat_history: request.chat_history,
			agent_info: request.agent_info,
		};
		let inner = chain.stream(input);
		let tracer = self.tracer.clone();
		let stream = async_stream::stream! {
			futures::pin_mut!(inner);
			while let Some(chunk) = inner.next().await {
				match chunk {
					Ok(chunk) => {
						if chunk.steps.contains(&Step::GenerateAnswer) {
							handler.on_answer_start();
						}
						if !chunk.text.is_empty() {
							handler.on_first_token();
						}
						yield Ok(StreamItem::Chunk(chunk));
					},
					Err(chain_error) => {
						yield Err(chain_error);
					},
				}
			}
			handler.finish();
			tracer.flush(&handler);
			if let Some(trace_id) = handler.trace_id() {
				yield Ok(StreamItem::Trace(StreamingTrace {
					trace_id,
					trace_url: handler.trace_url().unwrap_or_default(),
					total_duration: handler.total_duration(),
					time_to_first_token: handler.time_to_first_token(),
				}));
			}
		};
		Ok(stream.boxed())
	}
}

/// The ai service's one streaming request type.
#[derive(Clone, Debug)]
pub struct StreamAnswer(pub AiStreamRequest);

impl StreamMessage for StreamAnswer {
	type Item = StreamItem;
}

fn stream_answer(
	request: StreamAnswer,
	ctx: HandlerContext,
) -> BoxStream<'static, HandlerResult<StreamItem>> {
	async_stream::try_stream! {
		let client: Arc<dyn AiClient> = ctx.resolve::<Arc<dyn AiClient>>()?;
		let inner = client
			.stream(request.0)
			.await
			.map_err(|ai_error| services::HandlerError::internal(ai_error))?;
		futures::pin_mut!(inner);
		while let Some(item) = inner.next().await {
			yield item.map_err(|ai_error| services::HandlerError::internal(ai_error))?;
		}
	}
	.boxed()
}

/// Wires the ai service: the answer-stream handler over the
/// [`AiClient`] bound in its container.
pub fn build_service(dispatcher: Arc<Dispatcher>) -> Service {
	Service::new("ai", dispatcher).with_stream_handler(stream_answer)
}
