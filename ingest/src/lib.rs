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

//! The ingest pipeline: drip records out of a source's streams, fan
//! each batch into the staging and embed sinks through bounded
//! queues, and keep per-stream bookmark intervals with at-least-once
//! semantics.

pub mod controller;
pub use controller::*;
pub mod encoder;
pub use encoder::*;
pub mod error;
pub use error::*;
pub mod processor;
pub use processor::*;
pub mod sink;
pub use sink::*;
pub mod state;
pub use state::*;
pub mod types;
pub use types::*;

#[cfg(any(test, feature = "testsuite"))]
pub mod testsuite;
