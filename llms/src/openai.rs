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

use std::collections::BTreeMap;

use async_openai::{
	config::OpenAIConfig,
	types::{
		ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
		ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
		ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
		ChatCompletionToolArgs, ChatCompletionToolType, CreateChatCompletionRequest,
		CreateChatCompletionRequestArgs, FunctionObjectArgs,
	},
	Client,
};
use async_trait::async_trait;
use common::OpenAiConfig;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::{
	ChatDelta, ChatModel, ChatStream, LLMError, LLMResult, Message, MessageType, ToolCall,
	ToolSpec,
};

/// OpenAI-compatible streaming chat transport.
#[derive(Clone)]
pub struct OpenAiChatModel {
	client: Client<OpenAIConfig>,
	model: String,
}

impl OpenAiChatModel {
	pub fn new(config: &OpenAiConfig) -> Self {
		let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key.clone());
		if let Some(api_base) = &config.api_base {
			openai_config = openai_config.with_api_base(api_base.clone());
		}
		Self { client: Client::with_config(openai_config), model: config.chat_model.clone() }
	}

	pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
		self.model = model.into();
		self
	}

	fn to_openai_messages(
		&self,
		messages: &[Message],
	) -> LLMResult<Vec<ChatCompletionRequestMessage>> {
		let mut openai_messages: Vec<ChatCompletionRequestMessage> = Vec::new();
		for m in messages {
			match m.message_type {
				MessageType::AIMessage => openai_messages.push(match &m.tool_calls {
					Some(value) => {
						let function: Vec<ChatCompletionMessageToolCall> =
							serde_json::from_value(value.clone())?;
						ChatCompletionRequestAssistantMessageArgs::default()
							.tool_calls(function)
							.content(m.content.clone())
							.build()
							.map_err(LLMError::from)?
							.into()
					},
					None => ChatCompletionRequestAssistantMessageArgs::default()
						.content(m.content.clone())
						.build()
						.map_err(LLMError::from)?
						.into(),
				}),
				MessageType::HumanMessage => openai_messages.push(
					ChatCompletionRequestUserMessageArgs::default()
						.content(m.content.clone())
						.build()
						.map_err(LLMError::from)?
						.into(),
				),
				MessageType::SystemMessage => openai_messages.push(
					ChatCompletionRequestSystemMessageArgs::default()
						.content(m.content.clone())
						.build()
						.map_err(LLMError::from)?
						.into(),
				),
				MessageType::ToolMessage => openai_messages.push(
					ChatCompletionRequestToolMessageArgs::default()
						.content(m.content.clone())
						.tool_call_id(m.id.clone().unwrap_or_default())
						.build()
						.map_err(LLMError::from)?
						.into(),
				),
			}
		}
		Ok(openai_messages)
	}

	fn generate_request(
		&self,
		messages: &[Message],
		tools: &[ToolSpec],
	) -> LLMResult<CreateChatCompletionRequest> {
		let messages = self.to_openai_messages(messages)?;
		let mut request_builder = CreateChatCompletionRequestArgs::default();
		request_builder.model(self.model.clone());
		request_builder.messages(messages);
		if !tools.is_empty() {
			let mut functions = Vec::new();
			for tool in tools {
				let function = FunctionObjectArgs::default()
					.name(tool.name.clone())
					.description(tool.description.clone())
					.parameters(tool.parameters.clone())
					.build()
					.map_err(LLMError::from)?;
				functions.push(
					ChatCompletionToolArgs::default()
						.r#type(ChatCompletionToolType::Function)
						.function(function)
						.build()
						.map_err(LLMError::from)?,
				);
			}
			request_builder.tools(functions);
		}
		request_builder.build().map_err(LLMError::from)
	}
}

#[derive(Default)]
struct PartialToolCall {
	id: String,
	name: String,
	arguments: String,
}

impl PartialToolCall {
	fn into_tool_call(self) -> ToolCall {
		// The provider streams arguments as a JSON fragment; a parse
		// failure falls back to the raw string.
		let args = serde_json::from_str(&self.arguments)
			.unwrap_or(Value::String(self.arguments.clone()));
		ToolCall { id: self.id, name: self.name, args }
	}
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
	async fn stream_chat(
		&self,
		messages: &[Message],
		tools: &[ToolSpec],
	) -> LLMResult<ChatStream> {
		let request = self.generate_request(messages, tools)?;
		debug!(model = %self.model, num_messages = request.messages.len(), "llm request");
		let mut inner = self.client.chat().create_stream(request).await?;
		let stream = async_stream::stream! {
			let mut partial_tool_calls: BTreeMap<u32, PartialToolCall> = BTreeMap::new();
			while let Some(result) = inner.next().await {
				match result {
					Ok(response) => {
						for chat_choice in response.choices {
							if let Some(content) = chat_choice.delta.content {
								yield Ok(ChatDelta::Content(content));
							}
							for tool_chunk in chat_choice.delta.tool_calls.unwrap_or_default() {
								let partial = partial_tool_calls
									.entry(tool_chunk.index as u32)
									.or_default();
								if let Some(id) = tool_chunk.id {
									partial.id = id;
								}
								if let Some(function) = tool_chunk.function {
									if let Some(name) = function.name {
										partial.name.push_str(&name);
									}
									if let Some(arguments) = function.arguments {
										partial.arguments.push_str(&arguments);
									}
								}
							}
						}
					},
					Err(err) => {
						yield Err(LLMError::from(err));
						return;
					},
				}
			}
			// Tool-call records go out fully assembled, after the text.
			for (_index, partial) in partial_tool_calls {
				yield Ok(ChatDelta::ToolCall(partial.into_tool_call()));
			}
		};
		Ok(stream.boxed())
	}
}
