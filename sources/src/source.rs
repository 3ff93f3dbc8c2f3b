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
	any::Any,
	fmt::{self, Debug},
	sync::Arc,
};

use async_trait::async_trait;
use common::Retryable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stream::RecordStream;

/// Source error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SourceErrorKind {
	/// Connection error.
	Connection,
	/// Polling error.
	Polling,
	/// Not found error.
	NotFound,
	/// Unauthorized error.
	Unauthorized,
	/// Service error.
	Service,
	/// Io error.
	Io,
	/// Internal error.
	Internal,
}

/// Generic SourceError.
#[derive(Debug, Clone, Error)]
#[error("source error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct SourceError {
	pub kind: SourceErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// Generic Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
	pub fn new(kind: SourceErrorKind, source: anyhow::Error) -> Self {
		SourceError { kind, source: Arc::new(source) }
	}

	/// Add some context to the wrapped error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		SourceError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the corresponding `SourceErrorKind` for this error.
	pub fn kind(&self) -> SourceErrorKind {
		self.kind
	}
}

impl From<std::io::Error> for SourceError {
	fn from(err: std::io::Error) -> SourceError {
		match err.kind() {
			std::io::ErrorKind::NotFound =>
				SourceError::new(SourceErrorKind::NotFound, err.into()),
			_ => SourceError::new(SourceErrorKind::Io, err.into()),
		}
	}
}

impl From<serde_json::Error> for SourceError {
	fn from(err: serde_json::Error) -> SourceError {
		SourceError::new(SourceErrorKind::Io, err.into())
	}
}

impl From<reqwest::Error> for SourceError {
	fn from(err: reqwest::Error) -> Self {
		let kind = if err.is_timeout() || err.is_connect() {
			SourceErrorKind::Connection
		} else {
			SourceErrorKind::Io
		};
		SourceError::new(kind, anyhow::anyhow!("provider request failed: {err:?}"))
	}
}

impl Retryable for SourceError {
	fn is_retryable(&self) -> bool {
		matches!(self.kind, SourceErrorKind::Connection | SourceErrorKind::Polling)
	}
}

/// Provider authentication, decrypted from the integration's
/// configuration by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "auth_type", rename_all = "snake_case")]
pub enum AuthConfig {
	Oauth {
		endpoint: String,
		client_id: String,
		client_secret: String,
		refresh_token: String,
	},
	ApiToken {
		token: String,
	},
}

/// An authenticated session over a source: its streams, plus any
/// guard released when the session goes out of scope.
pub struct SourceSession {
	pub streams: Vec<Arc<dyn RecordStream>>,
	_guard: Option<Box<dyn Any + Send + Sync>>,
}

impl SourceSession {
	pub fn new(streams: Vec<Arc<dyn RecordStream>>) -> Self {
		Self { streams, _guard: None }
	}

	pub fn with_guard(
		streams: Vec<Arc<dyn RecordStream>>,
		guard: Box<dyn Any + Send + Sync>,
	) -> Self {
		Self { streams, _guard: Some(guard) }
	}
}

impl Debug for SourceSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SourceSession").field("streams", &self.streams.len()).finish()
	}
}

/// A pluggable external data source.
#[async_trait]
pub trait Source: Debug + Send + Sync {
	/// Authenticates against the provider and yields the session with
	/// its list of streams.
	async fn connect(&self) -> SourceResult<SourceSession>;
}
