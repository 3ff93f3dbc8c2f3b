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

use std::{fmt, io, sync::Arc};

use async_openai::error::OpenAIError;
use async_trait::async_trait;
use common::Retryable;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::Message;

/// LLM error kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LLMErrorKind {
	/// Io error.
	Io,
	/// Not found error.
	NotFound,
	/// The provider rejected the credentials; never retried.
	AuthFailed,
	/// Rate limited or transient provider failure.
	Transient,
	/// Malformed request or response.
	Invalid,
	/// Internal error.
	Internal,
}

/// A generic error type for LLM operations, encapsulating an error
/// kind and its source.
#[derive(Debug, Clone, Error)]
#[error("llm error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct LLMError {
	pub kind: LLMErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// A type alias for results returned by LLM operations.
pub type LLMResult<T> = Result<T, LLMError>;

impl LLMError {
	pub fn new(kind: LLMErrorKind, source: anyhow::Error) -> Self {
		LLMError { kind, source: Arc::new(source) }
	}

	/// Adds some context to the existing error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		LLMError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the kind of this error.
	pub fn kind(&self) -> LLMErrorKind {
		self.kind.clone()
	}
}

impl From<io::Error> for LLMError {
	fn from(err: io::Error) -> LLMError {
		match err.kind() {
			io::ErrorKind::NotFound => LLMError::new(LLMErrorKind::NotFound, err.into()),
			_ => LLMError::new(LLMErrorKind::Io, err.into()),
		}
	}
}

impl From<serde_json::Error> for LLMError {
	fn from(err: serde_json::Error) -> LLMError {
		LLMError::new(LLMErrorKind::Invalid, err.into())
	}
}

impl From<OpenAIError> for LLMError {
	fn from(err: OpenAIError) -> LLMError {
		let kind = match &err {
			OpenAIError::ApiError(api_error) => match api_error.code.as_ref().and_then(|v| v.as_str()) {
				Some("invalid_api_key") => LLMErrorKind::AuthFailed,
				Some("rate_limit_exceeded") => LLMErrorKind::Transient,
				_ => LLMErrorKind::Io,
			},
			OpenAIError::Reqwest(_) => LLMErrorKind::Transient,
			_ => LLMErrorKind::Io,
		};
		LLMError::new(kind, err.into())
	}
}

impl Retryable for LLMError {
	fn is_retryable(&self) -> bool {
		self.kind == LLMErrorKind::Transient
	}
}

/// A tool advertised to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
	pub name: String,
	pub description: String,
	pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
	pub id: String,
	pub name: String,
	pub args: Value,
}

/// One unit of the streaming response: plain text, or a fully
/// assembled tool-call record.
#[derive(Clone, Debug)]
pub enum ChatDelta {
	Content(String),
	ToolCall(ToolCall),
}

pub type ChatStream = BoxStream<'static, LLMResult<ChatDelta>>;

/// Streaming chat transport.
///
/// The request is the ordered, role-tagged message list plus an
/// optional tool list; a response carrying tool calls triggers one
/// round of tool execution and re-invocation upstream.
#[async_trait]
pub trait ChatModel: Send + Sync {
	async fn stream_chat(&self, messages: &[Message], tools: &[ToolSpec])
		-> LLMResult<ChatStream>;
}

impl fmt::Debug for dyn ChatModel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChatModel").finish()
	}
}
