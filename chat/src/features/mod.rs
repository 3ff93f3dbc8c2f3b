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

pub mod chat;
pub use chat::*;
pub mod feedback;
pub use feedback::*;

use std::sync::Arc;

use services::{Dispatcher, Service};

/// Wires the chat service: the streaming chat handlers, transcript
/// listing, and feedback. Dependencies and the event bus are bound by
/// the caller.
pub fn build_service(dispatcher: Arc<Dispatcher>) -> Service {
	Service::new("chat", dispatcher)
		.with_stream_handler(chat::chat_with_ai)
		.with_stream_handler(chat::preview_with_ai)
		.with_request_handler(chat::save_preview)
		.with_request_handler(chat::list_messages)
		.with_request_handler(feedback::submit_feedback)
}
