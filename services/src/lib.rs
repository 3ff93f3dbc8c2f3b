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

//! services is the intra-process request/event fabric of onyx.
//!
//! It solves the following problem:
//! - wire several feature services (catalog, chat, ai) into one process
//! - dispatch typed requests to exactly one handler each
//! - fan events out to any number of handlers, after the producer commits
//! - keep handler collaborators behind a by-type dependency container

pub mod di;
pub use di::{Dependencies, Scope};
pub mod dispatcher;
pub use dispatcher::Dispatcher;
pub mod event_bus;
pub use event_bus::{Event, EventBus, EventCollector};
pub mod message;
pub use message::{HandlerError, HandlerResult, Message, StreamMessage};
pub mod service;
pub use service::{HandlerContext, Service};
