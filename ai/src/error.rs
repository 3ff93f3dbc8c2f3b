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

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Answer-chain error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AiErrorKind {
	/// LLM transport failure.
	Llm,
	/// Retrieval failure.
	Retrieval,
	/// Tracing collaborator failure.
	Tracing,
	/// Malformed chain input.
	Invalid,
	/// Internal error.
	Internal,
}

/// Generic AiError.
#[derive(Debug, Clone, Error)]
#[error("ai error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct AiError {
	pub kind: AiErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// Generic Result type for answer-chain operations.
pub type AiResult<T> = Result<T, AiError>;

impl AiError {
	pub fn new(kind: AiErrorKind, source: anyhow::Error) -> Self {
		AiError { kind, source: Arc::new(source) }
	}

	/// Add some context to the wrapped error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		AiError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the corresponding `AiErrorKind` for this error.
	pub fn kind(&self) -> AiErrorKind {
		self.kind
	}
}

impl From<llms::LLMError> for AiError {
	fn from(err: llms::LLMError) -> Self {
		AiError::new(AiErrorKind::Llm, err.into())
	}
}

impl From<storage::StorageError> for AiError {
	fn from(err: storage::StorageError) -> Self {
		AiError::new(AiErrorKind::Retrieval, err.into())
	}
}
