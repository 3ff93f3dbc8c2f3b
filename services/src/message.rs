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

use common::{ServiceError, ServiceErrorCode};
use thiserror::Error;

/// A request/response message. Exactly one handler per concrete type.
pub trait Message: fmt::Debug + Send + 'static {
	type Response: Send + 'static;
}

/// A request whose response is a lazy sequence of items.
pub trait StreamMessage: fmt::Debug + Send + 'static {
	type Item: Send + 'static;
}

/// Error surfaced by a handler invocation.
///
/// Carries a restricted error category rather than a per-service type,
/// so callers on the other side of the bus can branch without
/// depending on the producing crate.
#[derive(Debug, Clone, Error)]
#[error("handler error(code={code:?}, source={source})")]
pub struct HandlerError {
	pub code: ServiceErrorCode,
	#[source]
	pub source: Arc<anyhow::Error>,
}

pub type HandlerResult<T> = Result<T, HandlerError>;

impl HandlerError {
	pub fn new(code: ServiceErrorCode, source: anyhow::Error) -> Self {
		Self { code, source: Arc::new(source) }
	}

	pub fn not_found(msg: impl fmt::Display) -> Self {
		Self::new(ServiceErrorCode::NotFound, anyhow::anyhow!("{msg}"))
	}

	pub fn bad_request(msg: impl fmt::Display) -> Self {
		Self::new(ServiceErrorCode::BadRequest, anyhow::anyhow!("{msg}"))
	}

	pub fn resource_busy(msg: impl fmt::Display) -> Self {
		Self::new(ServiceErrorCode::ResourceBusy, anyhow::anyhow!("{msg}"))
	}

	pub fn internal(msg: impl fmt::Display) -> Self {
		Self::new(ServiceErrorCode::Internal, anyhow::anyhow!("{msg}"))
	}

	/// Raised when a request type reaches a service with no handler
	/// registered for it.
	pub fn no_handler(type_name: &'static str) -> Self {
		Self::new(
			ServiceErrorCode::Internal,
			anyhow::anyhow!("no handler registered for `{type_name}`"),
		)
	}

	pub fn code(&self) -> ServiceErrorCode {
		self.code
	}
}

impl From<anyhow::Error> for HandlerError {
	fn from(source: anyhow::Error) -> Self {
		Self::new(ServiceErrorCode::Internal, source)
	}
}

impl ServiceError for HandlerError {
	fn error_code(&self) -> ServiceErrorCode {
		self.code
	}
}
