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

use ai::{AiClient, AiStreamRequest};
use catalog::CatalogClient;
use common::{
	AgentInfo, ChatContext, ChatMessage, OnyxConfig, StreamItem, StreamingChunk,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use services::{Event, HandlerContext, HandlerError, HandlerResult, Message as BusMessage, StreamMessage};
use storage::MemoryStore;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
	models::{Channel, Message, MessageStatus},
	repository::ChatUow,
};

pub const LIST_MESSAGE_PAGE_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PaginationParams {
	pub page: usize,
	pub page_size: usize,
}

impl Default for PaginationParams {
	fn default() -> Self {
		Self { page: 1, page_size: LIST_MESSAGE_PAGE_SIZE }
	}
}

impl PaginationParams {
	fn offset(&self) -> usize {
		self.page.saturating_sub(1) * self.page_size
	}
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PaginationMetadata {
	pub page: usize,
	pub page_size: usize,
	pub total_count: usize,
}

/// One chat turn against a channel's agent.
#[derive(Clone, Debug)]
pub struct ChatWithAI {
	pub content: String,
	pub user_id: Uuid,
	pub user_email: String,
	pub username: String,
	pub channel_id: Uuid,
	pub parent_id: Option<Uuid>,
	/// Present on regeneration: the AI message to rewrite.
	pub answer_id: Option<Uuid>,
}

impl StreamMessage for ChatWithAI {
	type Item = Message;
}

/// A preview turn without channel persistence; history comes inline.
#[derive(Clone, Debug)]
pub struct PreviewWithAI {
	pub content: String,
	pub organization_id: Option<Uuid>,
	pub user_id: Uuid,
	pub user_email: String,
	pub username: String,
	pub agent_id: Uuid,
	pub chat_history: Vec<ChatMessage>,
	pub parent_id: Option<Uuid>,
	pub is_published: bool,
	pub slack_thread_ts: Option<String>,
}

impl StreamMessage for PreviewWithAI {
	type Item = Message;
}

/// Persists one preview exchange into the user's preview channel.
#[derive(Debug)]
pub struct SavePreview {
	pub agent_id: Uuid,
	pub query: String,
	pub message: String,
	pub created_by: Uuid,
	pub organization_id: Uuid,
}

impl BusMessage for SavePreview {
	type Response = ();
}

#[derive(Debug)]
pub struct ListMessages {
	pub channel_id: Uuid,
	pub pagination: PaginationParams,
}

impl BusMessage for ListMessages {
	type Response = (Vec<(Message, Option<i8>)>, PaginationMetadata);
}

/// Published once per finished chat stream, carrying the run metrics.
#[derive(Clone, Debug)]
pub struct StreamFinished {
	pub user_email: String,
	pub agent_name: String,
	pub question: String,
	pub answer: String,
	pub trace_url: Option<String>,
	pub total_duration: Option<f64>,
	pub time_to_first_token: Option<f64>,
}

impl Event for StreamFinished {}

#[derive(Clone, Debug)]
pub struct PreviewedWithAI {
	pub agent_name: String,
	pub content: String,
	pub slack_thread_ts: String,
	pub trace_url: Option<String>,
	pub total_duration: Option<f64>,
	pub time_to_first_token: Option<f64>,
}

impl Event for PreviewedWithAI {}

/// Repairs the AI row if the stream is dropped mid-generation: a row
/// must never stay `streaming` after its generator is gone.
struct StreamingGuard {
	store: MemoryStore,
	message_id: Uuid,
	defused: bool,
}

impl StreamingGuard {
	fn new(store: MemoryStore, message_id: Uuid) -> Self {
		Self { store, message_id, defused: false }
	}

	fn defuse(&mut self) {
		self.defused = true;
	}
}

impl Drop for StreamingGuard {
	fn drop(&mut self) {
		if self.defused {
			return;
		}
		let uow = self.store.begin();
		if let Some(mut message) = uow.get::<Message>(self.message_id) {
			if message.status == MessageStatus::Streaming {
				error!(message_id = %self.message_id, "stream dropped mid-generation");
				message.status = MessageStatus::Failure;
				uow.add(message);
				let _ = uow.commit();
			}
		}
	}
}

struct Prepared {
	agent_info: AgentInfo,
	user_message: Message,
	ai_message: Message,
	chat_history: Vec<ChatMessage>,
}

type ChatDeps = (MemoryStore, Arc<dyn CatalogClient>, Arc<dyn AiClient>, OnyxConfig);

fn resolve_chat_deps(ctx: &HandlerContext) -> HandlerResult<ChatDeps> {
	Ok((ctx.resolve()?, ctx.resolve()?, ctx.resolve()?, ctx.resolve()?))
}

type PreviewDeps = (Arc<dyn CatalogClient>, Arc<dyn AiClient>);

fn resolve_preview_deps(ctx: &HandlerContext) -> HandlerResult<PreviewDeps> {
	Ok((ctx.resolve()?, ctx.resolve()?))
}

async fn prepare(
	store: &MemoryStore,
	catalog_client: &dyn CatalogClient,
	request: &ChatWithAI,
	history_limit: usize,
) -> HandlerResult<Prepared> {
	let uow = ChatUow::begin(store);
	let mut channel = uow
		.get_channel(request.channel_id)
		.ok_or_else(|| HandlerError::not_found("Channel not found"))?;
	let agent_id = channel
		.agent_id
		.ok_or_else(|| HandlerError::bad_request("Agent ID is required"))?;
	let agent_info = catalog_client
		.get_agent_info(agent_id, true)
		.await
		.map_err(HandlerError::internal)?
		.ok_or_else(|| HandlerError::not_found("Agent not found"))?;

	let is_regenerated = request.answer_id.is_some();
	let user_message = if is_regenerated && request.parent_id.is_some() {
		let parent_id = request.parent_id.expect("checked above");
		uow.get_message(parent_id)
			.ok_or_else(|| HandlerError::not_found(format!("Message not found for {parent_id}")))?
	} else {
		let parent_id =
			request.parent_id.or_else(|| uow.last_message(channel.id).map(|last| last.id));
		let user_message = Message::user_message(
			request.user_id,
			&request.content,
			Some(request.channel_id),
			parent_id,
		);
		uow.uow.add(user_message.clone());
		user_message
	};

	let ai_message = match request.answer_id {
		Some(answer_id) => {
			let mut ai_message = uow.get_message(answer_id).ok_or_else(|| {
				HandlerError::not_found(format!("Message not found for {answer_id}"))
			})?;
			ai_message.content.clear();
			ai_message.sources.clear();
			ai_message.status = MessageStatus::Streaming;
			uow.uow.add(ai_message.clone());
			ai_message
		},
		None => {
			let ai_message = Message::ai_message_for(&user_message);
			uow.uow.add(ai_message.clone());
			ai_message
		},
	};

	channel.last_message_at = Some(ai_message.created_at);
	uow.uow.add(channel.clone());
	uow.commit().map_err(HandlerError::internal)?;

	let chat_history = uow
		.recent_messages(channel.id, history_limit)
		.iter()
		.map(Message::to_chat_message)
		.collect();
	Ok(Prepared { agent_info, user_message, ai_message, chat_history })
}

/// The chat turn as an async generator: the user message first, then
/// one delta per streamed chunk, then a final empty delta carrying
/// the terminal status. The transcript is committed and
/// `StreamFinished` published on every completion path.
pub fn chat_with_ai(
	request: ChatWithAI,
	ctx: HandlerContext,
) -> impl Stream<Item = HandlerResult<Message>> + Send + 'static {
	async_stream::stream! {
		let (store, catalog_client, ai_client, config) = match resolve_chat_deps(&ctx) {
			Ok(deps) => deps,
			Err(wiring_error) => {
				yield Err(wiring_error);
				return;
			},
		};

		let prepared = prepare(
			&store,
			catalog_client.as_ref(),
			&request,
			config.chat.history_limit,
		)
		.await;
		let Prepared { agent_info, user_message, mut ai_message, chat_history } = match prepared {
			Ok(prepared) => prepared,
			Err(prepare_error) => {
				yield Err(prepare_error);
				return;
			},
		};

		yield Ok(user_message.clone());
		let mut guard = StreamingGuard::new(store.clone(), ai_message.id);

		let mut chat_context =
			ChatContext::new(request.user_id, &request.username, &request.user_email);
		chat_context.channel_id = Some(request.channel_id);
		let mut trace_url = None;
		let mut total_duration = None;
		let mut time_to_first_token = None;
		let mut failed = false;

		let ai_stream = ai_client
			.stream(AiStreamRequest {
				text: request.content.clone(),
				context: chat_context,
				chat_history,
				agent_info: agent_info.clone(),
				cite_sources: true,
				tracing_session_id: Some(request.channel_id.to_string()),
			})
			.await;
		match ai_stream {
			Err(stream_error) => {
				error!(error = ?stream_error, "error occurred when streaming");
				failed = true;
			},
			Ok(mut ai_stream) => {
				while let Some(item) = ai_stream.next().await {
					match item {
						Ok(StreamItem::Trace(trace)) => {
							ai_message.trace_id = Some(trace.trace_id.clone());
							trace_url = Some(trace.trace_url);
							total_duration = trace.total_duration;
							time_to_first_token = trace.time_to_first_token;
						},
						Ok(StreamItem::Chunk(chunk)) => {
							ai_message.apply_streaming_chunk(&chunk);
							yield Ok(ai_message.to_chunk(&chunk));
						},
						Err(chunk_error) => {
							error!(error = ?chunk_error, "error occurred when streaming");
							failed = true;
							break;
						},
					}
				}
			},
		}

		ai_message.status =
			if failed { MessageStatus::Failure } else { MessageStatus::Success };
		let uow = ChatUow::begin(&store);
		uow.uow.add(ai_message.clone());
		match uow.commit() {
			Ok(()) => guard.defuse(),
			Err(commit_error) => {
				yield Err(HandlerError::internal(commit_error));
				return;
			},
		}
		// A failed stream still ends with an empty delta carrying the
		// terminal status.
		yield Ok(ai_message.to_chunk(&StreamingChunk::content("")));
		ctx.publish(StreamFinished {
			user_email: request.user_email.clone(),
			agent_name: agent_info.name.clone(),
			question: request.content.clone(),
			answer: ai_message.content.clone(),
			trace_url,
			total_duration,
			time_to_first_token,
		});
	}
}

/// Preview turn: same streaming shape, nothing persisted.
pub fn preview_with_ai(
	request: PreviewWithAI,
	ctx: HandlerContext,
) -> impl Stream<Item = HandlerResult<Message>> + Send + 'static {
	async_stream::stream! {
		let (catalog_client, ai_client) = match resolve_preview_deps(&ctx) {
			Ok(deps) => deps,
			Err(wiring_error) => {
				yield Err(wiring_error);
				return;
			},
		};
		let agent_info = match catalog_client
			.get_agent_info(request.agent_id, request.is_published)
			.await
		{
			Ok(Some(agent_info)) => agent_info,
			Ok(None) => {
				yield Err(HandlerError::not_found("Agent not found"));
				return;
			},
			Err(catalog_error) => {
				yield Err(HandlerError::internal(catalog_error));
				return;
			},
		};

		let user_message =
			Message::user_message(request.user_id, &request.content, None, request.parent_id);
		yield Ok(user_message.clone());
		let mut ai_message = Message::ai_message_for(&user_message);

		let mut chat_context =
			ChatContext::new(request.user_id, &request.username, &request.user_email);
		chat_context.organization_id = request.organization_id;
		// Only published previews are traced; only dev previews cite.
		let tracing_session_id =
			request.is_published.then(|| request.agent_id.to_string());
		let mut trace_url = None;
		let mut total_duration = None;
		let mut time_to_first_token = None;
		let mut failed = false;

		let ai_stream = ai_client
			.stream(AiStreamRequest {
				text: request.content.clone(),
				context: chat_context,
				chat_history: request.chat_history.clone(),
				agent_info: agent_info.clone(),
				cite_sources: !request.is_published,
				tracing_session_id,
			})
			.await;
		match ai_stream {
			Err(stream_error) => {
				error!(error = ?stream_error, "error occurred when streaming");
				failed = true;
			},
			Ok(mut ai_stream) => {
				while let Some(item) = ai_stream.next().await {
					match item {
						Ok(StreamItem::Trace(trace)) => {
							ai_message.trace_id = Some(trace.trace_id.clone());
							trace_url = Some(trace.trace_url);
							total_duration = trace.total_duration;
							time_to_first_token = trace.time_to_first_token;
						},
						Ok(StreamItem::Chunk(chunk)) => {
							ai_message.apply_streaming_chunk(&chunk);
							yield Ok(ai_message.to_chunk(&chunk));
						},
						Err(chunk_error) => {
							error!(error = ?chunk_error, "error occurred when streaming");
							failed = true;
							break;
						},
					}
				}
			},
		}

		ai_message.status =
			if failed { MessageStatus::Failure } else { MessageStatus::Success };
		yield Ok(ai_message.to_chunk(&StreamingChunk::content("")));
		if let Some(slack_thread_ts) = request.slack_thread_ts.clone() {
			if !failed {
				ctx.publish(PreviewedWithAI {
					agent_name: agent_info.name.clone(),
					content: ai_message.content.clone(),
					slack_thread_ts,
					trace_url,
					total_duration,
					time_to_first_token,
				});
			}
		}
	}
}

/// Persists a preview exchange into the user's preview channel,
/// creating the channel on first use.
pub async fn save_preview(request: SavePreview, ctx: HandlerContext) -> HandlerResult<()> {
	let store = ctx.resolve::<MemoryStore>()?;
	let uow = ChatUow::begin(&store);
	let mut channel = match uow.get_active_agent_channel(request.agent_id, request.created_by) {
		Some(channel) => channel,
		None => {
			let channel = Channel::new(
				request.organization_id,
				request.agent_id,
				request.created_by,
				&request.query,
			);
			info!(channel_id = %channel.id, "created preview channel");
			uow.uow.add(channel.clone());
			channel
		},
	};

	let parent_id = uow.last_message(channel.id).map(|last| last.id);
	let user_message = Message::user_message(
		request.created_by,
		&request.query,
		Some(channel.id),
		parent_id,
	);
	let mut ai_message = Message::ai_message_for(&user_message);
	ai_message.content = request.message.clone();
	ai_message.status = MessageStatus::Success;
	channel.last_message_at = Some(ai_message.created_at);
	uow.uow.add(user_message);
	uow.uow.add(ai_message);
	uow.uow.add(channel);
	uow.commit().map_err(HandlerError::internal)?;
	Ok(())
}

/// Pages through a channel's transcript newest-first, with each
/// message's feedback type joined in.
pub async fn list_messages(
	request: ListMessages,
	ctx: HandlerContext,
) -> HandlerResult<(Vec<(Message, Option<i8>)>, PaginationMetadata)> {
	let store = ctx.resolve::<MemoryStore>()?;
	let uow = ChatUow::begin(&store);
	let mut messages = uow.channel_messages(request.channel_id);
	let total_count = messages.len();
	messages.reverse();
	let page: Vec<Message> = messages
		.into_iter()
		.skip(request.pagination.offset())
		.take(request.pagination.page_size)
		.collect();

	let message_ids: Vec<Uuid> = page.iter().map(|message| message.id).collect();
	let feedbacks = uow.message_feedbacks(&message_ids);
	let rows = page
		.into_iter()
		.map(|message| {
			let feedback_type = feedbacks
				.iter()
				.find(|feedback| feedback.message_id == message.id)
				.map(|feedback| feedback.feedback_type);
			(message, feedback_type)
		})
		.collect();
	Ok((
		rows,
		PaginationMetadata {
			page: request.pagination.page,
			page_size: request.pagination.page_size,
			total_count,
		},
	))
}
