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

use std::convert::Infallible;

/// This enum is a restricted, transport-agnostic subset of
/// failure categories shared by every onyx service.
///
/// The HTTP/gRPC surface (out of tree) owns the mapping to wire
/// status codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceErrorCode {
	AlreadyExists,
	AuthFailed,
	BadRequest,
	Internal,
	NotFound,
	ResourceBusy,
	Timeout,
	Unavailable,
}

/// Edge trait implemented by every service-level error type.
pub trait ServiceError: ToString {
	fn error_code(&self) -> ServiceErrorCode;
}

impl ServiceError for Infallible {
	fn error_code(&self) -> ServiceErrorCode {
		unreachable!()
	}
}
