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

use async_trait::async_trait;
use common::{retry, Interval, RetryParams};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::SourceResult;

/// One row pulled from a provider page, keyed by the stream's
/// property names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record(pub serde_json::Map<String, Value>);

impl Record {
	pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(key.into(), value.into());
	}

	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.0.get(key).and_then(Value::as_str)
	}

	pub fn get_i64(&self, key: &str) -> Option<i64> {
		match self.0.get(key) {
			Some(Value::Number(number)) => number.as_i64(),
			Some(Value::String(raw)) => raw.parse().ok(),
			_ => None,
		}
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.0)
	}
}

/// Static description of a logical sub-feed of a source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamSpec {
	pub name: String,
	/// `(column, logical type)` pairs in staging order.
	pub properties: Vec<(String, String)>,
	pub key_properties: Vec<String>,
	/// The record field carrying the source timestamp.
	pub bookmark_property: String,
}

/// What the ingest controller drives: a spec and a drip loop.
///
/// The drip loop yields one batch per provider page; per-stream
/// ordering is the provider's pagination order.
pub trait RecordStream: Send + Sync {
	fn spec(&self) -> &StreamSpec;

	fn drip(
		&self,
		interval: Interval,
		batch_size: usize,
	) -> BoxStream<'_, SourceResult<Vec<Record>>>;
}

impl std::fmt::Debug for dyn RecordStream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RecordStream").field("name", &self.spec().name).finish()
	}
}

/// The five primitives a paginated provider feed implements. The
/// drip loop — request, retrieve one page, extract records and the
/// next cursor, advance — is derived from these; cursors stay opaque
/// to the controller.
#[async_trait]
pub trait PagedStream: Send + Sync {
	type Request: Send + Sync;
	type Response: Send + Sync;

	fn spec(&self) -> &StreamSpec;

	fn request_factory(&self, interval: Interval, batch_size: usize) -> Self::Request;

	async fn retrieve(&self, request: &Self::Request) -> SourceResult<Self::Response>;

	async fn extract_records(&self, response: &Self::Response) -> SourceResult<Vec<Record>>;

	fn extract_cursor(&self, response: &Self::Response) -> Option<String>;

	fn merge_cursor(&self, request: &mut Self::Request, cursor: Option<String>);

	/// Backoff applied around each page retrieval.
	fn retry_params(&self) -> RetryParams {
		RetryParams::default()
	}
}

impl<T: PagedStream> RecordStream for T {
	fn spec(&self) -> &StreamSpec {
		PagedStream::spec(self)
	}

	fn drip(
		&self,
		interval: Interval,
		batch_size: usize,
	) -> BoxStream<'_, SourceResult<Vec<Record>>> {
		Box::pin(async_stream::try_stream! {
			let mut request = self.request_factory(interval, batch_size);
			let mut cursor: Option<String> = None;
			loop {
				self.merge_cursor(&mut request, cursor.take());
				let response =
					retry(&self.retry_params(), || self.retrieve(&request)).await?;
				let records = self.extract_records(&response).await?;
				let no_records = records.is_empty();
				cursor = self.extract_cursor(&response);
				yield records;
				if cursor.is_none() || no_records {
					break;
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use async_trait::async_trait;
	use common::{Interval, RetryParams};
	use futures::StreamExt;

	use super::*;
	use crate::source::{SourceError, SourceErrorKind};

	struct CountingStream {
		spec: StreamSpec,
		pages: usize,
		retrievals: AtomicUsize,
		fail_first: bool,
	}

	impl CountingStream {
		fn new(pages: usize, fail_first: bool) -> Self {
			Self {
				spec: StreamSpec {
					name: "numbers".to_string(),
					properties: vec![("n".to_string(), "integer".to_string())],
					key_properties: vec!["n".to_string()],
					bookmark_property: "n".to_string(),
				},
				pages,
				retrievals: AtomicUsize::new(0),
				fail_first,
			}
		}
	}

	struct NumberRequest {
		page: usize,
	}

	#[async_trait]
	impl PagedStream for CountingStream {
		type Request = NumberRequest;
		type Response = (usize, Option<String>);

		fn spec(&self) -> &StreamSpec {
			&self.spec
		}

		fn request_factory(&self, _interval: Interval, _batch_size: usize) -> NumberRequest {
			NumberRequest { page: 0 }
		}

		async fn retrieve(&self, request: &NumberRequest) -> SourceResult<(usize, Option<String>)> {
			let attempt = self.retrievals.fetch_add(1, Ordering::SeqCst);
			if self.fail_first && attempt == 0 {
				return Err(SourceError::new(
					SourceErrorKind::Connection,
					anyhow::anyhow!("flaky provider"),
				));
			}
			let next = (request.page + 1 < self.pages).then(|| (request.page + 1).to_string());
			Ok((request.page, next))
		}

		async fn extract_records(
			&self,
			response: &(usize, Option<String>),
		) -> SourceResult<Vec<Record>> {
			let mut record = Record::default();
			record.set("n", response.0 as i64);
			Ok(vec![record])
		}

		fn extract_cursor(&self, response: &(usize, Option<String>)) -> Option<String> {
			response.1.clone()
		}

		fn merge_cursor(&self, request: &mut NumberRequest, cursor: Option<String>) {
			if let Some(cursor) = cursor {
				request.page = cursor.parse().unwrap();
			}
		}

		fn retry_params(&self) -> RetryParams {
			RetryParams::for_test()
		}
	}

	#[tokio::test]
	async fn test_drip_walks_every_page_in_order() {
		let stream = CountingStream::new(3, false);
		let batches: Vec<_> = stream
			.drip(Interval::new(0, 10), 10)
			.map(|batch| batch.unwrap())
			.collect()
			.await;
		let values: Vec<i64> =
			batches.iter().flatten().map(|record| record.get_i64("n").unwrap()).collect();
		assert_eq!(values, vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn test_drip_retries_transient_page_failures() {
		let stream = CountingStream::new(1, true);
		let batches: Vec<_> = stream
			.drip(Interval::new(0, 10), 10)
			.map(|batch| batch.unwrap())
			.collect()
			.await;
		assert_eq!(batches.len(), 1);
		assert!(stream.retrievals.load(Ordering::SeqCst) >= 2);
	}
}
