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
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use storage::{create_table_sql, EmbedDocument, StorageResult};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info};

use crate::{IngestError, IngestErrorKind, IngestResult, StreamContext};

/// Columnar staging backend, as the staging sink sees it.
#[async_trait]
pub trait StagingStore: Send + Sync {
	async fn ensure_database(&self, database: &str) -> StorageResult<()>;
	async fn execute(&self, sql: &str) -> StorageResult<()>;
	async fn insert_rows(&self, database: &str, table: &str, rows: &[Value])
		-> StorageResult<()>;
}

#[async_trait]
impl StagingStore for storage::ClickHouseClient {
	async fn ensure_database(&self, database: &str) -> StorageResult<()> {
		self.ensure_database(database).await
	}

	async fn execute(&self, sql: &str) -> StorageResult<()> {
		self.execute(sql).await
	}

	async fn insert_rows(
		&self,
		database: &str,
		table: &str,
		rows: &[Value],
	) -> StorageResult<()> {
		self.insert_rows(database, table, rows).await
	}
}

/// Vector-store backend, as the embed sink sees it.
#[async_trait]
pub trait EmbedStore: Send + Sync {
	async fn upsert_document(
		&self,
		namespace: &str,
		schema: &str,
		groupname: &str,
		document: &EmbedDocument,
	) -> StorageResult<()>;
}

#[async_trait]
impl EmbedStore for storage::VespaClient {
	async fn upsert_document(
		&self,
		namespace: &str,
		schema: &str,
		groupname: &str,
		document: &EmbedDocument,
	) -> StorageResult<()> {
		self.upsert_document(namespace, schema, groupname, document).await
	}
}

/// One target of the per-stream fan-out.
#[async_trait]
pub trait Sink: Send + Sync {
	fn name(&self) -> &'static str;

	/// Creates the sink's schema/target for this stream, idempotently.
	async fn create_schema(&self, ctx: &StreamContext) -> IngestResult<()>;

	/// Processes one drained batch.
	async fn sink(&self, ctx: &StreamContext, records: Vec<sources::Record>) -> IngestResult<()>;
}

/// Staging sink: typed rows into the columnar store, then the batch's
/// bookmark interval.
pub struct StagingSink {
	store: Arc<dyn StagingStore>,
}

impl StagingSink {
	pub fn new(store: Arc<dyn StagingStore>) -> Self {
		Self { store }
	}
}

#[async_trait]
impl Sink for StagingSink {
	fn name(&self) -> &'static str {
		"staging"
	}

	async fn create_schema(&self, ctx: &StreamContext) -> IngestResult<()> {
		let statements = create_table_sql(
			&ctx.identity().staging_schema(),
			&ctx.staging_table(),
			&ctx.spec.properties,
			&ctx.spec.key_properties,
			ctx.ingest.rewrite,
		);
		for statement in statements {
			self.store.execute(&statement).await?;
		}
		Ok(())
	}

	async fn sink(&self, ctx: &StreamContext, records: Vec<sources::Record>) -> IngestResult<()> {
		let rows = ctx.to_staging_rows(&records);
		debug!(table = %ctx.staging_table(), rows = rows.len(), "staging batch");
		self.store
			.insert_rows(&ctx.identity().staging_schema(), &ctx.staging_table(), &rows)
			.await?;
		ctx.update_state(&records).await
	}
}

/// Embed sink: chunk, embed, and upsert each record into the vector
/// store. The schema is predefined on the store side.
pub struct EmbedSink {
	store: Arc<dyn EmbedStore>,
}

impl EmbedSink {
	pub fn new(store: Arc<dyn EmbedStore>) -> Self {
		Self { store }
	}
}

#[async_trait]
impl Sink for EmbedSink {
	fn name(&self) -> &'static str {
		"embed"
	}

	async fn create_schema(&self, _ctx: &StreamContext) -> IngestResult<()> {
		info!("embed schema is predefined, skipping schema creation");
		Ok(())
	}

	async fn sink(&self, ctx: &StreamContext, records: Vec<sources::Record>) -> IngestResult<()> {
		let identity = ctx.identity();
		let documents = try_join_all(
			records.iter().map(|record| ctx.strategy.process_record(record)),
		)
		.await?;
		debug!(
			namespace = %identity.embed_namespace(),
			groupname = %identity.embed_groupname(),
			count = documents.len(),
			"embedding batch"
		);
		try_join_all(documents.iter().map(|document| async {
			self.store
				.upsert_document(
					&identity.embed_namespace(),
					identity.embed_schema(),
					&identity.embed_groupname(),
					document,
				)
				.await
		}))
		.await?;
		Ok(())
	}
}

enum QueueItem {
	Batch(Vec<sources::Record>),
	Sentinel,
}

/// A sink plus its drain worker on a bounded FIFO queue.
///
/// A faulted sink fails subsequent `write` calls fast; the real cause
/// is harvested by `stop`. Dropping the handle aborts the worker.
pub struct SinkHandle {
	name: &'static str,
	tx: mpsc::Sender<QueueItem>,
	faulted: Arc<AtomicBool>,
	worker: Option<JoinHandle<IngestResult<()>>>,
}

impl SinkHandle {
	pub fn start(sink: Arc<dyn Sink>, ctx: Arc<StreamContext>, queue_capacity: usize) -> Self {
		let (tx, mut rx) = mpsc::channel::<QueueItem>(queue_capacity.max(1));
		let faulted = Arc::new(AtomicBool::new(false));
		let worker_faulted = faulted.clone();
		let name = sink.name();
		let worker = tokio::spawn(async move {
			while let Some(item) = rx.recv().await {
				match item {
					QueueItem::Sentinel => return Ok(()),
					QueueItem::Batch(records) => {
						if let Err(sink_error) = sink.sink(&ctx, records).await {
							error!(sink = name, error = ?sink_error, "sink faulted");
							worker_faulted.store(true, Ordering::SeqCst);
							rx.close();
							return Err(sink_error);
						}
					},
				}
			}
			Ok(())
		});
		Self { name, tx, faulted, worker: Some(worker) }
	}

	/// Enqueues a batch. Fails fast once the sink has faulted.
	pub async fn write(&self, records: Vec<sources::Record>) -> IngestResult<()> {
		if self.faulted.load(Ordering::SeqCst) {
			return Err(IngestError::new(
				IngestErrorKind::SinkFaulted,
				anyhow::anyhow!("sink `{}` is stopped", self.name),
			));
		}
		self.tx.send(QueueItem::Batch(records)).await.map_err(|_| {
			IngestError::new(
				IngestErrorKind::SinkFaulted,
				anyhow::anyhow!("sink `{}` is stopped", self.name),
			)
		})
	}

	/// Enqueues the sentinel and awaits drain completion. Exceeding
	/// the timeout cancels the worker and drops pending work.
	pub async fn stop(mut self, drain_timeout: Duration) -> IngestResult<()> {
		let _ = self.tx.send(QueueItem::Sentinel).await;
		let worker = self.worker.take().expect("worker should still be attached");
		let abort = worker.abort_handle();
		match tokio::time::timeout(drain_timeout, worker).await {
			Err(_elapsed) => {
				abort.abort();
				Err(IngestError::new(
					IngestErrorKind::DrainTimeout,
					anyhow::anyhow!("sink `{}` drain timed out", self.name),
				))
			},
			Ok(Err(join_error)) => Err(IngestError::new(
				IngestErrorKind::Internal,
				anyhow::anyhow!("sink `{}` worker panicked: {join_error}", self.name),
			)),
			Ok(Ok(result)) => result,
		}
	}

	/// Cancels the drain worker outright.
	pub fn abort(&self) {
		if let Some(worker) = &self.worker {
			worker.abort();
		}
	}
}

impl Drop for SinkHandle {
	fn drop(&mut self) {
		if let Some(worker) = &self.worker {
			worker.abort();
		}
	}
}
