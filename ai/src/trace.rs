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

//! Tracing and feedback collaborators. Both are optional: the no-op
//! implementations satisfy the same signatures and return nulls.

use std::{
	sync::{Arc, Mutex},
	time::Instant,
};

use async_trait::async_trait;
use common::TracingConfig;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AiResult;

/// Observability handle for one answer stream.
pub trait TraceHandler: Send + Sync {
	fn trace_id(&self) -> Option<String>;

	fn trace_url(&self) -> Option<String>;

	fn total_duration(&self) -> Option<f64>;

	/// Time to first token = (answer start − root start) + the answer
	/// builder's own first-token latency.
	fn time_to_first_token(&self) -> Option<f64>;

	/// Marks the answer-builder span start.
	fn on_answer_start(&self);

	/// Marks the first streamed token.
	fn on_first_token(&self);

	fn finish(&self);
}

pub trait Tracer: Send + Sync {
	fn begin(&self, user_id: Uuid, session_id: Option<String>) -> Arc<dyn TraceHandler>;

	/// Ships buffered spans; failures are logged, never surfaced.
	fn flush(&self, handler: &Arc<dyn TraceHandler>);
}

impl std::fmt::Debug for dyn Tracer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tracer").finish()
	}
}

#[derive(Default)]
struct Timings {
	answer_started: Option<Instant>,
	first_token: Option<Instant>,
	finished: Option<Instant>,
}

struct TimedTrace {
	trace_id: String,
	trace_url: Option<String>,
	root_started: Instant,
	timings: Mutex<Timings>,
}

impl TraceHandler for TimedTrace {
	fn trace_id(&self) -> Option<String> {
		Some(self.trace_id.clone())
	}

	fn trace_url(&self) -> Option<String> {
		self.trace_url.clone()
	}

	fn total_duration(&self) -> Option<f64> {
		let timings = self.timings.lock().expect("lock should not be poisoned");
		let finished = timings.finished?;
		Some(round2(finished.duration_since(self.root_started).as_secs_f64()))
	}

	fn time_to_first_token(&self) -> Option<f64> {
		let timings = self.timings.lock().expect("lock should not be poisoned");
		let answer_started = timings.answer_started?;
		let first_token = timings.first_token?;
		let preamble = answer_started.duration_since(self.root_started).as_secs_f64();
		let first_token_latency = first_token.duration_since(answer_started).as_secs_f64();
		Some(round2(preamble + first_token_latency))
	}

	fn on_answer_start(&self) {
		let mut timings = self.timings.lock().expect("lock should not be poisoned");
		timings.answer_started.get_or_insert_with(Instant::now);
	}

	fn on_first_token(&self) {
		let mut timings = self.timings.lock().expect("lock should not be poisoned");
		timings.first_token.get_or_insert_with(Instant::now);
	}

	fn finish(&self) {
		let mut timings = self.timings.lock().expect("lock should not be poisoned");
		timings.finished.get_or_insert_with(Instant::now);
	}
}

fn round2(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}

/// Langfuse-backed tracer speaking the public ingestion API.
pub struct LangfuseTracer {
	http: reqwest::Client,
	config: TracingConfig,
}

impl LangfuseTracer {
	pub fn new(config: TracingConfig) -> Self {
		Self { http: reqwest::Client::new(), config }
	}
}

impl Tracer for LangfuseTracer {
	fn begin(&self, user_id: Uuid, session_id: Option<String>) -> Arc<dyn TraceHandler> {
		let trace_id = Uuid::new_v4().to_string();
		debug!(trace_id = %trace_id, user_id = %user_id, session_id = ?session_id, "trace started");
		Arc::new(TimedTrace {
			trace_url: Some(format!("{}/trace/{trace_id}", self.config.endpoint)),
			trace_id,
			root_started: Instant::now(),
			timings: Mutex::default(),
		})
	}

	fn flush(&self, handler: &Arc<dyn TraceHandler>) {
		let Some(trace_id) = handler.trace_id() else {
			return;
		};
		let body = json!({
			"batch": [{
				"id": Uuid::new_v4().to_string(),
				"type": "trace-create",
				"body": {
					"id": trace_id,
					"latency": handler.total_duration(),
					"timeToFirstToken": handler.time_to_first_token(),
				},
			}]
		});
		let request = self
			.http
			.post(format!("{}/api/public/ingestion", self.config.endpoint))
			.basic_auth(&self.config.public_key, Some(&self.config.secret_key))
			.json(&body);
		tokio::spawn(async move {
			if let Err(flush_error) = request.send().await {
				warn!(error = ?flush_error, "trace flush failed");
			}
		});
	}
}

/// No-op tracer: same signatures, null answers.
#[derive(Debug, Default)]
pub struct NoopTracer;

struct NoopTraceHandler;

impl TraceHandler for NoopTraceHandler {
	fn trace_id(&self) -> Option<String> {
		None
	}

	fn trace_url(&self) -> Option<String> {
		None
	}

	fn total_duration(&self) -> Option<f64> {
		None
	}

	fn time_to_first_token(&self) -> Option<f64> {
		None
	}

	fn on_answer_start(&self) {}

	fn on_first_token(&self) {}

	fn finish(&self) {}
}

impl Tracer for NoopTracer {
	fn begin(&self, _user_id: Uuid, _session_id: Option<String>) -> Arc<dyn TraceHandler> {
		Arc::new(NoopTraceHandler)
	}

	fn flush(&self, _handler: &Arc<dyn TraceHandler>) {}
}

/// Feedback score sink. Upserts are keyed by `(id, trace_id)`;
/// deletion is a zero score.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
	async fn score(
		&self,
		score: i8,
		id: Uuid,
		trace_id: &str,
		comment: Option<&str>,
	) -> AiResult<()>;

	async fn delete_score(&self, id: Uuid, trace_id: &str, comment: Option<&str>) -> AiResult<()> {
		self.score(0, id, trace_id, comment).await
	}
}

impl std::fmt::Debug for dyn FeedbackSink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FeedbackSink").finish()
	}
}

pub struct LangfuseFeedbackSink {
	http: reqwest::Client,
	config: TracingConfig,
}

impl LangfuseFeedbackSink {
	const STREAM_NAME: &'static str = "user_feedback";

	pub fn new(config: TracingConfig) -> Self {
		Self { http: reqwest::Client::new(), config }
	}
}

#[async_trait]
impl FeedbackSink for LangfuseFeedbackSink {
	async fn score(
		&self,
		score: i8,
		id: Uuid,
		trace_id: &str,
		comment: Option<&str>,
	) -> AiResult<()> {
		let body = json!({
			"batch": [{
				"id": Uuid::new_v4().to_string(),
				"type": "score-create",
				"body": {
					// Upserted by (id, trace_id): one feedback per user.
					"id": id.to_string(),
					"traceId": trace_id,
					"name": Self::STREAM_NAME,
					"value": score,
					"comment": comment,
				},
			}]
		});
		let response = self
			.http
			.post(format!("{}/api/public/ingestion", self.config.endpoint))
			.basic_auth(&self.config.public_key, Some(&self.config.secret_key))
			.json(&body)
			.send()
			.await
			.map_err(|err| crate::AiError::new(crate::AiErrorKind::Tracing, err.into()))?;
		if !response.status().is_success() {
			return Err(crate::AiError::new(
				crate::AiErrorKind::Tracing,
				anyhow::anyhow!("score ingestion failed with {}", response.status()),
			));
		}
		Ok(())
	}
}

/// Log-only feedback sink for environments without the collaborator.
#[derive(Debug, Default)]
pub struct ConsoleFeedbackSink;

#[async_trait]
impl FeedbackSink for ConsoleFeedbackSink {
	async fn score(
		&self,
		score: i8,
		id: Uuid,
		trace_id: &str,
		comment: Option<&str>,
	) -> AiResult<()> {
		tracing::info!(score, id = %id, trace_id, comment = ?comment, "feedback score");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_timed_trace_measures_ttft() {
		let tracer = LangfuseTracer::new(TracingConfig::default());
		let handler = tracer.begin(Uuid::new_v4(), Some("session".to_string()));
		assert!(handler.time_to_first_token().is_none());
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		handler.on_answer_start();
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		handler.on_first_token();
		handler.finish();
		let ttft = handler.time_to_first_token().unwrap();
		let total = handler.total_duration().unwrap();
		assert!(ttft >= 0.0);
		assert!(total >= ttft);
		assert!(handler.trace_id().is_some());
		assert!(handler.trace_url().unwrap().contains("/trace/"));
	}

	#[test]
	fn test_noop_tracer_returns_nulls() {
		let tracer = NoopTracer;
		let handler = tracer.begin(Uuid::new_v4(), None);
		assert!(handler.trace_id().is_none());
		assert!(handler.trace_url().is_none());
		assert!(handler.total_duration().is_none());
		assert!(handler.time_to_first_token().is_none());
	}
}
