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

use std::{
	fmt::{self, Debug},
	sync::Arc,
};

use common::Retryable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StorageErrorKind {
	/// The target row/table/document does not exist.
	NotFound,
	/// Another writer holds the row lock; the caller must not block.
	RowLocked,
	/// A unique constraint would be violated by the commit.
	UniqueViolation,
	/// DDL execution error.
	SchemaCreation,
	/// Insertion error.
	Insertion,
	/// Query error.
	Query,
	/// The request credentials do not allow for this operation.
	Unauthorized,
	/// A third-party service refuses this operation, or is misconfigured.
	Service,
	/// A timeout occurred during the operation.
	Timeout,
	/// Serialization error.
	Serialization,
	/// Io error.
	Io,
	/// Any generic internal error.
	Internal,
}

/// Generic StorageError.
#[derive(Debug, Clone, Error)]
#[error("storage error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct StorageError {
	pub kind: StorageErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// Generic Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
	pub fn new(kind: StorageErrorKind, source: anyhow::Error) -> Self {
		StorageError { kind, source: Arc::new(source) }
	}

	/// Add some context to the wrapped error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		StorageError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the corresponding `StorageErrorKind` for this error.
	pub fn kind(&self) -> StorageErrorKind {
		self.kind
	}
}

impl From<std::io::Error> for StorageError {
	fn from(err: std::io::Error) -> StorageError {
		match err.kind() {
			std::io::ErrorKind::NotFound =>
				StorageError::new(StorageErrorKind::NotFound, err.into()),
			_ => StorageError::new(StorageErrorKind::Io, err.into()),
		}
	}
}

impl From<serde_json::Error> for StorageError {
	fn from(err: serde_json::Error) -> StorageError {
		StorageError::new(StorageErrorKind::Serialization, err.into())
	}
}

impl From<reqwest::Error> for StorageError {
	fn from(err: reqwest::Error) -> StorageError {
		let kind = if err.is_timeout() {
			StorageErrorKind::Timeout
		} else if err.is_connect() {
			StorageErrorKind::Service
		} else {
			StorageErrorKind::Io
		};
		StorageError::new(kind, err.into())
	}
}

impl Retryable for StorageError {
	fn is_retryable(&self) -> bool {
		matches!(
			self.kind,
			StorageErrorKind::Service | StorageErrorKind::Timeout | StorageErrorKind::Io
		)
	}
}
