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

use std::{sync::Arc, time::Duration};

use common::{now_unix_seconds, IngestConfig, Interval};
use futures::{future::try_join_all, StreamExt};
use sources::{RecordStream, Source, StreamSpec};
use tracing::{error, info};

use crate::{
	EmbedSink, EmbedStore, EmbeddingStrategy, IngestContext, IngestError, IngestErrorKind,
	IngestRequest, IngestResult, Sink, SinkHandle, StagingSink, StagingStore, StateStorage,
	StreamContext,
};

/// Builds the embedding strategy for one stream of the run.
pub type StrategyFactory =
	Arc<dyn Fn(&StreamSpec) -> Arc<dyn EmbeddingStrategy> + Send + Sync>;

/// Orchestrates a single ingest run for one integration: derive the
/// request interval, open the source and both sinks as scoped
/// resources, drip every stream in parallel, and finalize the
/// integration's sync state.
pub struct IngestController {
	config: IngestConfig,
	staging: Arc<dyn StagingStore>,
	embed: Arc<dyn EmbedStore>,
	state: Arc<dyn StateStorage>,
	strategies: StrategyFactory,
}

impl IngestController {
	pub fn new(
		config: IngestConfig,
		staging: Arc<dyn StagingStore>,
		embed: Arc<dyn EmbedStore>,
		state: Arc<dyn StateStorage>,
		strategies: StrategyFactory,
	) -> Self {
		Self { config, staging, embed, state, strategies }
	}

	/// Runs one ingest. On success `sync_status=success` and the
	/// bookmark advances to the interval end; on failure
	/// `sync_status=error` with the stringified cause. Committed
	/// intervals survive either way.
	pub async fn ingest(&self, source: &dyn Source, request: IngestRequest) -> IngestResult<()> {
		let identity = request.identity.clone();
		self.state.mark_sync_started(&identity).await?;
		let request_interval = match request.request_interval {
			Some(interval) => interval,
			None => {
				let now = now_unix_seconds();
				let start = match self.state.last_success_bookmark(&identity).await? {
					Some(bookmark) => bookmark,
					None => now - request.default_beginning_delta.num_seconds(),
				};
				Interval::new(start, now)
			},
		};
		let context = IngestContext {
			identity: identity.clone(),
			request_interval,
			batch_size: self.config.batch_size,
			rewrite: false,
		};
		match self.run(source, &context).await {
			Ok(()) => {
				info!(
					datasource_id = %identity.datasource_id,
					interval = ?request_interval,
					"finished ingesting source"
				);
				self.state.write_success(&identity, request_interval.end).await
			},
			Err(ingest_error) => {
				error!(
					datasource_id = %identity.datasource_id,
					error = ?ingest_error,
					"error ingesting source"
				);
				self.state.write_error(&identity, &ingest_error.to_string()).await?;
				Err(ingest_error)
			},
		}
	}

	async fn run(&self, source: &dyn Source, context: &IngestContext) -> IngestResult<()> {
		// The session scopes provider auth; dropped on every exit path.
		let session = source.connect().await?;
		self.staging.ensure_database(&context.identity.staging_schema()).await?;
		try_join_all(
			session.streams.iter().map(|stream| self.process_stream(context, stream.as_ref())),
		)
		.await?;
		Ok(())
	}

	async fn process_stream(
		&self,
		context: &IngestContext,
		stream: &dyn RecordStream,
	) -> IngestResult<()> {
		let ctx = Arc::new(StreamContext {
			spec: stream.spec().clone(),
			ingest: context.clone(),
			strategy: (self.strategies)(stream.spec()),
			state: self.state.clone(),
		});

		let staging_sink = Arc::new(StagingSink::new(self.staging.clone()));
		let embed_sink = Arc::new(EmbedSink::new(self.embed.clone()));
		staging_sink.create_schema(&ctx).await?;
		embed_sink.create_schema(&ctx).await?;

		let handles = [
			SinkHandle::start(staging_sink, ctx.clone(), self.config.queue_capacity),
			SinkHandle::start(embed_sink, ctx.clone(), self.config.queue_capacity),
		];

		let mut count = 0usize;
		let mut failure: Option<IngestError> = None;
		{
			let mut drip = stream.drip(context.request_interval, context.batch_size);
			'drip: while let Some(batch) = drip.next().await {
				let records = match batch {
					Ok(records) => records,
					Err(source_error) => {
						failure = Some(source_error.into());
						break;
					},
				};
				if records.is_empty() {
					break;
				}
				count += records.len();
				for handle in &handles {
					if let Err(write_error) = handle.write(records.clone()).await {
						failure = Some(write_error);
						break 'drip;
					}
				}
			}
		}

		let drain_timeout = Duration::from_secs(self.config.drain_timeout_secs);
		let mut results = Vec::new();
		for handle in handles {
			results.push(handle.stop(drain_timeout).await);
		}
		// A faulted sink's own error wins over the fail-fast write error.
		for result in results {
			if let Err(sink_error) = result {
				failure = Some(match failure {
					Some(write_error)
						if write_error.kind() != IngestErrorKind::SinkFaulted =>
						write_error,
					_ => sink_error,
				});
			}
		}
		if let Some(ingest_error) = failure {
			return Err(ingest_error);
		}

		info!(
			stream = %ctx.name(),
			interval = ?context.request_interval,
			num_records = count,
			"finished processing stream"
		);
		self.state
			.append_stream_interval(&context.identity, ctx.name(), context.request_interval)
			.await
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use async_trait::async_trait;
	use common::{IngestConfig, Interval};
	use futures::stream::BoxStream;
	use sources::{Record, RecordStream, Source, SourceResult, SourceSession, StreamSpec};

	use super::*;
	use crate::{
		memory::{MemoryStateStorage, MemorySyncStatus},
		testsuite::{MemoryEmbedStore, MemoryStagingStore, PassthroughStrategy},
		Identity, IngestRequest,
	};

	fn identity() -> Identity {
		Identity {
			slug: "mail".to_string(),
			namespace_id: "acme".to_string(),
			datasource_id: "ds1".to_string(),
		}
	}

	fn record(n: i64) -> Record {
		let mut record = Record::default();
		record.set("message_id", format!("m-{n}"));
		record.set("internal_date", n);
		record
	}

	struct ScriptedStream {
		spec: StreamSpec,
		batches: Vec<Vec<Record>>,
	}

	impl ScriptedStream {
		fn new(batches: Vec<Vec<Record>>) -> Self {
			Self {
				spec: StreamSpec {
					name: "messages".to_string(),
					properties: vec![
						("message_id".to_string(), "string".to_string()),
						("internal_date".to_string(), "integer".to_string()),
					],
					key_properties: vec!["message_id".to_string()],
					bookmark_property: "internal_date".to_string(),
				},
				batches,
			}
		}
	}

	impl RecordStream for ScriptedStream {
		fn spec(&self) -> &StreamSpec {
			&self.spec
		}

		fn drip(
			&self,
			_interval: Interval,
			_batch_size: usize,
		) -> BoxStream<'_, SourceResult<Vec<Record>>> {
			Box::pin(futures::stream::iter(self.batches.clone().into_iter().map(Ok)))
		}
	}

	#[derive(Debug)]
	struct ScriptedSource {
		batches: Vec<Vec<Record>>,
	}

	#[async_trait]
	impl Source for ScriptedSource {
		async fn connect(&self) -> SourceResult<SourceSession> {
			Ok(SourceSession::new(vec![Arc::new(ScriptedStream::new(self.batches.clone()))]))
		}
	}

	struct Harness {
		controller: IngestController,
		staging: Arc<MemoryStagingStore>,
		embed: Arc<MemoryEmbedStore>,
		state: MemoryStateStorage,
	}

	fn harness(state: MemoryStateStorage, embed: MemoryEmbedStore) -> Harness {
		let staging = Arc::new(MemoryStagingStore::default());
		let embed = Arc::new(embed);
		let strategies: StrategyFactory = Arc::new(|_spec| Arc::new(PassthroughStrategy));
		let controller = IngestController::new(
			IngestConfig { drain_timeout_secs: 5, ..Default::default() },
			staging.clone(),
			embed.clone(),
			Arc::new(state.clone()),
			strategies,
		);
		Harness { controller, staging, embed, state }
	}

	fn request(interval: Interval) -> IngestRequest {
		IngestRequest {
			identity: identity(),
			request_interval: Some(interval),
			default_beginning_delta: chrono::Duration::days(30),
		}
	}

	#[tokio::test]
	async fn test_successful_run_merges_interval_into_bookmarks() {
		let state = MemoryStateStorage::with_bookmarks(
			"messages",
			vec![Interval::new(10, 20), Interval::new(30, 40)],
		);
		let harness = harness(state, MemoryEmbedStore::default());
		let source = ScriptedSource { batches: vec![vec![record(19), record(25)]] };

		harness.controller.ingest(&source, request(Interval::new(18, 32))).await.unwrap();

		let snapshot = harness.state.snapshot();
		assert_eq!(snapshot.bookmarks["messages"], vec![Interval::new(10, 40)]);
		assert_eq!(snapshot.sync_status, MemorySyncStatus::Success);
		assert_eq!(snapshot.last_success_bookmark, Some(32));
		assert!(snapshot.last_synced_at.is_some());
		assert_eq!(harness.embed.upserts.lock().unwrap().len(), 2);
		// Schema DDL ran before any insert.
		let ddl = harness.staging.ddl.lock().unwrap();
		assert!(ddl[0].starts_with("ensure onyx__acme"));
		assert!(ddl[1].contains("CREATE TABLE IF NOT EXISTS"));
	}

	#[tokio::test]
	async fn test_rerun_with_same_interval_is_idempotent_on_bookmarks() {
		let state = MemoryStateStorage::default();
		let harness = harness(state, MemoryEmbedStore::default());
		let source = ScriptedSource { batches: vec![vec![record(110), record(120)]] };

		harness.controller.ingest(&source, request(Interval::new(100, 200))).await.unwrap();
		let first = harness.state.snapshot().bookmarks["messages"].clone();
		harness.controller.ingest(&source, request(Interval::new(100, 200))).await.unwrap();
		let second = harness.state.snapshot().bookmarks["messages"].clone();
		assert_eq!(first, second);
		assert_eq!(second, vec![Interval::new(100, 200)]);
	}

	#[tokio::test]
	async fn test_embed_sink_failure_marks_error_and_keeps_staged_rows() {
		let state = MemoryStateStorage::default();
		// Two records per batch; the embed store dies on the second batch.
		let harness = harness(state, MemoryEmbedStore::failing_after(2));
		let source = ScriptedSource {
			batches: vec![
				vec![record(110), record(115)],
				vec![record(130), record(135)],
			],
		};

		let error =
			harness.controller.ingest(&source, request(Interval::new(100, 200))).await.unwrap_err();
		assert_eq!(error.kind(), IngestErrorKind::Storage);

		let snapshot = harness.state.snapshot();
		assert_eq!(snapshot.sync_status, MemorySyncStatus::Error);
		assert!(snapshot.sync_error.unwrap().contains("embed store down"));
		assert_eq!(snapshot.last_success_bookmark, None);
		// The run interval was never appended.
		let bookmarks = snapshot.bookmarks.get("messages").cloned().unwrap_or_default();
		assert!(!bookmarks.contains(&Interval::new(100, 200)));
		// Staging rows from the first batch are retained (at-least-once).
		let rows = harness.staging.rows.lock().unwrap();
		assert!(rows.iter().any(|(_, row)| row["message_id"] == "m-110"));
	}

	#[tokio::test]
	async fn test_source_connect_failure_surfaces_as_error_state() {
		#[derive(Debug)]
		struct DeadSource;

		#[async_trait]
		impl Source for DeadSource {
			async fn connect(&self) -> SourceResult<SourceSession> {
				Err(sources::SourceError::new(
					sources::SourceErrorKind::Unauthorized,
					anyhow::anyhow!("bad token"),
				))
			}
		}

		let state = MemoryStateStorage::default();
		let harness = harness(state, MemoryEmbedStore::default());
		let error = harness
			.controller
			.ingest(&DeadSource, request(Interval::new(0, 10)))
			.await
			.unwrap_err();
		assert_eq!(error.kind(), IngestErrorKind::Source);
		let snapshot = harness.state.snapshot();
		assert_eq!(snapshot.sync_status, MemorySyncStatus::Error);
	}

	#[tokio::test]
	async fn test_interval_derived_from_last_success_bookmark() {
		let state = MemoryStateStorage::default();
		let harness = harness(state, MemoryEmbedStore::default());
		let source = ScriptedSource { batches: vec![vec![record(1_500)]] };
		// Seed a prior success.
		harness.state.write_success(&identity(), 1_000).await.unwrap();

		let request = IngestRequest {
			identity: identity(),
			request_interval: None,
			default_beginning_delta: chrono::Duration::days(30),
		};
		harness.controller.ingest(&source, request).await.unwrap();

		let snapshot = harness.state.snapshot();
		let bookmarks = &snapshot.bookmarks["messages"];
		// The derived interval starts at the previous bookmark and
		// swallows the batch interval.
		assert_eq!(bookmarks.len(), 1);
		assert_eq!(bookmarks[0].start, 1_000);
		assert!(snapshot.last_success_bookmark.unwrap() >= 1_000);
	}
}
