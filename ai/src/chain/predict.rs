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

use std::sync::{Arc, Mutex};

use common::{Step, StreamingChunk};
use futures::{Stream, StreamExt};
use llms::{ChatDelta, ChatModel, Message, ToolCall};
use serde_json::json;
use services::Dispatcher;
use tracing::debug;

use crate::{
	chain::{signature::system_prompt, ChainInput},
	citation::{CitationMarker, CitationState},
	tools::ToolsRegistry,
	AiError, AiErrorKind, AiResult,
};

/// The streaming predictor: serializes the conversation, issues the
/// LLM call, feeds the token stream through the citation gate, and
/// runs tool rounds up to the depth cap.
pub struct StreamPredict {
	model: Arc<dyn ChatModel>,
	tools: Arc<ToolsRegistry>,
	marker: Option<Arc<Mutex<CitationMarker>>>,
	max_depth: usize,
	dispatcher: Arc<Dispatcher>,
}

impl StreamPredict {
	pub fn new(
		model: Arc<dyn ChatModel>,
		tools: Arc<ToolsRegistry>,
		marker: Option<Arc<Mutex<CitationMarker>>>,
		max_depth: usize,
		dispatcher: Arc<Dispatcher>,
	) -> Self {
		Self { model, tools, marker, max_depth, dispatcher }
	}

	fn deserialize_messages(prompt: &str, input: &ChainInput) -> Vec<Message> {
		let mut messages = vec![Message::new_system_message(prompt)];
		for chat_message in &input.chat_history {
			if chat_message.content.is_empty() {
				continue;
			}
			if chat_message.is_ai_message {
				messages.push(Message::new_ai_message(&chat_message.content));
			} else {
				messages.push(Message::new_human_message(&chat_message.content));
			}
		}
		let current_is_last = input
			.chat_history
			.last()
			.map(|last| !last.is_ai_message && last.content == input.message)
			.unwrap_or(false);
		if !current_is_last {
			messages.push(Message::new_human_message(&input.message));
		}
		messages
	}

	/// Feeds one content delta through the citation state machine.
	/// Chunks without a possible mark skip the per-character walk.
	fn gate(&self, state: &mut CitationState, content: &str) -> Vec<StreamingChunk> {
		let Some(marker) = &self.marker else {
			return vec![StreamingChunk::content(content)];
		};
		if !content.contains(':') && state.is_empty() {
			return vec![StreamingChunk::content(content)];
		}
		let mut marker = marker.lock().expect("lock should not be poisoned");
		let mut chunks = Vec::new();
		for c in content.chars() {
			if let Some(emitted) = state.process(c) {
				let (text, sources) = marker.mark_used(&emitted);
				chunks.push(StreamingChunk::cited(text, sources));
			}
		}
		chunks
	}

	fn assistant_tool_calls(tool_calls: &[ToolCall]) -> serde_json::Value {
		json!(tool_calls
			.iter()
			.map(|call| {
				json!({
					"id": call.id,
					"type": "function",
					"function": {
						"name": call.name,
						"arguments": call.args.to_string(),
					},
				})
			})
			.collect::<Vec<_>>())
	}

	pub fn stream(
		self,
		input: ChainInput,
		agent_block: String,
		relevant_information: String,
		chat_summary: String,
	) -> impl Stream<Item = AiResult<StreamingChunk>> + Send + 'static {
		async_stream::try_stream! {
			yield StreamingChunk::step(Step::GenerateAnswer);
			let prompt = system_prompt(
				self.marker.is_some(),
				&agent_block,
				&relevant_information,
				&chat_summary,
			);
			let mut messages = Self::deserialize_messages(&prompt, &input);
			let tool_specs = self.tools.to_spec();
			let mut citation_state = CitationState::default();
			let mut depth = 1usize;
			loop {
				if depth > self.max_depth + 1 {
					Err(AiError::new(
						AiErrorKind::Invalid,
						anyhow::anyhow!("max depth of {} reached", self.max_depth),
					))?;
				}
				let mut stream = self.model.stream_chat(&messages, &tool_specs).await?;
				let mut tool_calls: Vec<ToolCall> = Vec::new();
				while let Some(delta) = stream.next().await {
					match delta? {
						ChatDelta::Content(content) => {
							for chunk in self.gate(&mut citation_state, &content) {
								yield chunk;
							}
						},
						ChatDelta::ToolCall(tool_call) => tool_calls.push(tool_call),
					}
				}
				// Marks never span model invocations.
				if let Some(rest) = citation_state.flush() {
					yield StreamingChunk::content(rest);
				}
				if tool_calls.is_empty() {
					break;
				}
				debug!(count = tool_calls.len(), depth, "executing tool calls");
				let results: Vec<String> = if depth > self.max_depth {
					tool_calls
						.iter()
						.map(|_call| format!("Max depth of {} reached", self.max_depth))
						.collect()
				} else {
					let futures = tool_calls
						.iter()
						.map(|call| {
							let tool = self.tools.get(&call.name);
							let args = call.args.clone();
							async move { tool.run(&args).await }
						})
						.collect();
					self.dispatcher.map(futures).await
				};
				messages.push(
					Message::new_ai_message("")
						.with_tool_calls(Self::assistant_tool_calls(&tool_calls)),
				);
				for (tool_call, result) in tool_calls.iter().zip(results) {
					messages.push(Message::new_tool_message(result, tool_call.id.clone()));
				}
				depth += 1;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use common::{AgentInfo, ChatMessage};
	use llms::{fake::FakeChatModel, ToolSpec};
	use serde_json::{json, Value};

	use super::*;
	use crate::tools::Tool;

	fn input(message: &str, history: Vec<ChatMessage>) -> ChainInput {
		ChainInput {
			message: message.to_string(),
			username: "tester".to_string(),
			chat_history: history,
			agent_info: AgentInfo { name: "helper".to_string(), ..Default::default() },
		}
	}

	async fn collect(
		predict: StreamPredict,
		chain_input: ChainInput,
	) -> (String, Vec<common::Source>) {
		let stream = predict.stream(
			chain_input,
			"agent".to_string(),
			"docs".to_string(),
			String::new(),
		);
		futures::pin_mut!(stream);
		let mut text = String::new();
		let mut sources = Vec::new();
		while let Some(chunk) = stream.next().await {
			let chunk = chunk.unwrap();
			text.push_str(&chunk.text);
			sources.extend(chunk.sources);
		}
		(text, sources)
	}

	#[tokio::test]
	async fn test_plain_streaming_without_citation_marker() {
		let model = Arc::new(FakeChatModel::with_text("Hello! I'm a test bot."));
		let predict = StreamPredict::new(
			model,
			Arc::new(ToolsRegistry::default()),
			None,
			5,
			Arc::new(Dispatcher::default()),
		);
		let (text, sources) = collect(predict, input("Hello", Vec::new())).await;
		assert_eq!(text, "Hello! I'm a test bot.");
		assert!(sources.is_empty());
	}

	#[tokio::test]
	async fn test_history_is_serialized_with_roles() {
		let model = Arc::new(FakeChatModel::with_text("ok"));
		let model_probe = model.clone();
		let predict = StreamPredict::new(
			model,
			Arc::new(ToolsRegistry::default()),
			None,
			5,
			Arc::new(Dispatcher::default()),
		);
		let history = vec![
			ChatMessage { content: "earlier question".to_string(), is_ai_message: false },
			ChatMessage { content: "earlier answer".to_string(), is_ai_message: true },
		];
		collect(predict, input("new question", history)).await;
		let requests = model_probe.requests.lock().unwrap();
		let (messages, _tools) = &requests[0];
		let roles: Vec<_> = messages.iter().map(|m| m.message_type.clone()).collect();
		assert_eq!(roles, vec![
			llms::MessageType::SystemMessage,
			llms::MessageType::HumanMessage,
			llms::MessageType::AIMessage,
			llms::MessageType::HumanMessage,
		]);
		assert_eq!(messages.last().unwrap().content, "new question");
	}

	struct AdderTool;

	#[async_trait]
	impl Tool for AdderTool {
		fn spec(&self) -> ToolSpec {
			ToolSpec {
				name: "adder".to_string(),
				description: "adds two numbers".to_string(),
				parameters: json!({"type": "object"}),
			}
		}

		async fn execute(&self, parameters: &Value) -> anyhow::Result<String> {
			let a = parameters["a"].as_i64().unwrap_or_default();
			let b = parameters["b"].as_i64().unwrap_or_default();
			Ok((a + b).to_string())
		}
	}

	#[tokio::test]
	async fn test_tool_round_feeds_results_back() {
		let model = Arc::new(FakeChatModel::with_deltas(vec![
			vec![ChatDelta::ToolCall(ToolCall {
				id: "call-1".to_string(),
				name: "adder".to_string(),
				args: json!({"a": 20, "b": 22}),
			})],
			vec![ChatDelta::Content("The sum is 42.".to_string())],
		]));
		let model_probe = model.clone();
		let mut tools = ToolsRegistry::default();
		tools.register(Arc::new(AdderTool)).unwrap();
		let predict = StreamPredict::new(
			model,
			Arc::new(tools),
			None,
			5,
			Arc::new(Dispatcher::default()),
		);
		let (text, _) = collect(predict, input("add them", Vec::new())).await;
		assert_eq!(text, "The sum is 42.");
		let requests = model_probe.requests.lock().unwrap();
		assert_eq!(requests.len(), 2);
		// The follow-up request carries the tool result message.
		let (messages, tools) = &requests[1];
		assert_eq!(tools.len(), 1);
		let tool_message =
			messages.iter().find(|m| m.message_type == llms::MessageType::ToolMessage).unwrap();
		assert_eq!(tool_message.content, "42");
		assert_eq!(tool_message.id.as_deref(), Some("call-1"));
	}

	#[tokio::test]
	async fn test_depth_limit_yields_terminal_tool_message() {
		// The model asks for a tool on every round until it gives up.
		let rounds: Vec<Vec<ChatDelta>> = (0..2)
			.map(|i| {
				vec![ChatDelta::ToolCall(ToolCall {
					id: format!("call-{i}"),
					name: "adder".to_string(),
					args: json!({"a": 1, "b": 1}),
				})]
			})
			.chain([vec![ChatDelta::Content("done".to_string())]])
			.collect();
		let model = Arc::new(FakeChatModel::with_deltas(rounds));
		let model_probe = model.clone();
		let mut tools = ToolsRegistry::default();
		tools.register(Arc::new(AdderTool)).unwrap();
		let predict = StreamPredict::new(
			model,
			Arc::new(tools),
			None,
			1,
			Arc::new(Dispatcher::default()),
		);
		let (text, _) = collect(predict, input("loop", Vec::new())).await;
		assert_eq!(text, "done");
		let requests = model_probe.requests.lock().unwrap();
		// Depth 2 exceeded the cap: the tool result is the terminal
		// error string instead of an execution.
		let (messages, _) = &requests[2];
		let tool_message = messages
			.iter()
			.filter(|m| m.message_type == llms::MessageType::ToolMessage)
			.last()
			.unwrap();
		assert_eq!(tool_message.content, "Max depth of 1 reached");
	}
}
