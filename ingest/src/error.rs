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

/// Ingest error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum IngestErrorKind {
	/// The source or one of its streams failed.
	Source,
	/// No source implementation for the requested slug.
	SourceNotSupported,
	/// Staging or embed store failure.
	Storage,
	/// Chunking or embedding failure.
	Embedding,
	/// Ingest-state bookkeeping failure.
	State,
	/// A sink faulted; subsequent writes fail fast.
	SinkFaulted,
	/// The graceful drain window elapsed.
	DrainTimeout,
	/// Internal error.
	Internal,
}

/// Generic IngestError.
#[derive(Debug, Clone, Error)]
#[error("ingest error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct IngestError {
	pub kind: IngestErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// Generic Result type for ingest operations.
pub type IngestResult<T> = Result<T, IngestError>;

impl IngestError {
	pub fn new(kind: IngestErrorKind, source: anyhow::Error) -> Self {
		IngestError { kind, source: Arc::new(source) }
	}

	/// Add some context to the wrapped error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		IngestError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the corresponding `IngestErrorKind` for this error.
	pub fn kind(&self) -> IngestErrorKind {
		self.kind
	}
}

impl From<sources::SourceError> for IngestError {
	fn from(err: sources::SourceError) -> Self {
		IngestError::new(IngestErrorKind::Source, err.into())
	}
}

impl From<storage::StorageError> for IngestError {
	fn from(err: storage::StorageError) -> Self {
		IngestError::new(IngestErrorKind::Storage, err.into())
	}
}

impl From<llms::LLMError> for IngestError {
	fn from(err: llms::LLMError) -> Self {
		IngestError::new(IngestErrorKind::Embedding, err.into())
	}
}
