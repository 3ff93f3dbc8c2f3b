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

//! Pipeline fakes shared by this crate's tests and dependent crates'.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Mutex,
};

use async_trait::async_trait;
use serde_json::Value;
use sources::Record;
use storage::{EmbedDocument, StorageError, StorageErrorKind, StorageResult};

use crate::{EmbedStore, EmbeddingStrategy, IngestResult, StagingStore};

/// Collects DDL and rows instead of talking to a columnar store.
#[derive(Default)]
pub struct MemoryStagingStore {
	pub ddl: Mutex<Vec<String>>,
	pub rows: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
	async fn ensure_database(&self, database: &str) -> StorageResult<()> {
		self.ddl.lock().unwrap().push(format!("ensure {database}"));
		Ok(())
	}

	async fn execute(&self, sql: &str) -> StorageResult<()> {
		self.ddl.lock().unwrap().push(sql.to_string());
		Ok(())
	}

	async fn insert_rows(
		&self,
		_database: &str,
		table: &str,
		rows: &[Value],
	) -> StorageResult<()> {
		let mut stored = self.rows.lock().unwrap();
		for row in rows {
			stored.push((table.to_string(), row.clone()));
		}
		Ok(())
	}
}

/// Collects upserted documents; optionally faults after N calls.
#[derive(Default)]
pub struct MemoryEmbedStore {
	pub upserts: Mutex<Vec<EmbedDocument>>,
	pub fail_after: Option<usize>,
	calls: AtomicUsize,
}

impl MemoryEmbedStore {
	pub fn failing_after(fail_after: usize) -> Self {
		Self { fail_after: Some(fail_after), ..Default::default() }
	}
}

#[async_trait]
impl EmbedStore for MemoryEmbedStore {
	async fn upsert_document(
		&self,
		_namespace: &str,
		_schema: &str,
		_groupname: &str,
		document: &EmbedDocument,
	) -> StorageResult<()> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst);
		if let Some(fail_after) = self.fail_after {
			if call >= fail_after {
				return Err(StorageError::new(
					StorageErrorKind::Service,
					anyhow::anyhow!("embed store down"),
				));
			}
		}
		self.upserts.lock().unwrap().push(document.clone());
		Ok(())
	}
}

/// Maps records straight into documents, no chunking or embedding.
pub struct PassthroughStrategy;

#[async_trait]
impl EmbeddingStrategy for PassthroughStrategy {
	async fn process_record(&self, record: &Record) -> IngestResult<EmbedDocument> {
		Ok(EmbedDocument {
			id: record.get_str("message_id").unwrap_or_default().to_string(),
			timestamp: record.get_i64("internal_date").unwrap_or_default(),
			..Default::default()
		})
	}
}
