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

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use sources::Record;
use storage::EmbedDocument;

use crate::{Encoder, IngestError, IngestErrorKind, IngestResult};

/// Turns one source record into the embed-store document: derive the
/// document text, chunk it under the token capacity, embed each
/// chunk.
#[async_trait]
pub trait EmbeddingStrategy: Send + Sync {
	async fn process_record(&self, record: &Record) -> IngestResult<EmbedDocument>;
}

impl std::fmt::Debug for dyn EmbeddingStrategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmbeddingStrategy").finish()
	}
}

/// Field-mapped strategy: the document parts are named record fields.
///
/// `url_template` may reference `{id}`; `metadata_fields` are carried
/// into the document as `field===value` entries.
pub struct FieldMappedStrategy {
	pub stream_name: String,
	pub doc_id_field: String,
	pub timestamp_field: String,
	pub title_field: String,
	pub url_template: String,
	pub text_fields: Vec<String>,
	pub metadata_fields: Vec<String>,
	capacity: usize,
	encoder: Arc<dyn Encoder>,
}

impl FieldMappedStrategy {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		stream_name: impl Into<String>,
		doc_id_field: impl Into<String>,
		timestamp_field: impl Into<String>,
		title_field: impl Into<String>,
		url_template: impl Into<String>,
		text_fields: Vec<String>,
		metadata_fields: Vec<String>,
		capacity: usize,
		encoder: Arc<dyn Encoder>,
	) -> Self {
		Self {
			stream_name: stream_name.into(),
			doc_id_field: doc_id_field.into(),
			timestamp_field: timestamp_field.into(),
			title_field: title_field.into(),
			url_template: url_template.into(),
			text_fields,
			metadata_fields,
			capacity,
			encoder,
		}
	}

	fn doc_id(&self, record: &Record) -> IngestResult<String> {
		record.get_str(&self.doc_id_field).map(str::to_string).ok_or_else(|| {
			IngestError::new(
				IngestErrorKind::Embedding,
				anyhow::anyhow!("record is missing doc id field `{}`", self.doc_id_field),
			)
		})
	}

	fn build_doc(&self, record: &Record) -> String {
		self.text_fields
			.iter()
			.filter_map(|field| record.get_str(field))
			.filter(|text| !text.is_empty())
			.collect::<Vec<_>>()
			.join("\n\n")
	}

	fn build_metadata(&self, record: &Record, doc_id: &str) -> Vec<String> {
		let url = self.url_template.replace("{id}", doc_id);
		let mut metadata = vec![
			format!("source_type==={}", self.stream_name),
			format!("source==={doc_id}"),
			format!("url==={url}"),
		];
		for field in &self.metadata_fields {
			if let Some(value) = record.get_str(field) {
				metadata.push(format!("{field}==={value}"));
			}
		}
		metadata
	}

	fn chunk(&self, document: &str) -> IngestResult<Vec<String>> {
		let tokenizer = tiktoken_rs::cl100k_base().map_err(|err| {
			IngestError::new(IngestErrorKind::Embedding, anyhow::anyhow!("{err}"))
		})?;
		let splitter = text_splitter::TextSplitter::new(tokenizer);
		Ok(splitter.chunks(document, self.capacity).map(str::to_string).collect())
	}
}

#[async_trait]
impl EmbeddingStrategy for FieldMappedStrategy {
	async fn process_record(&self, record: &Record) -> IngestResult<EmbedDocument> {
		let doc_id = self.doc_id(record)?;
		let document = self.build_doc(record);
		let chunks = self.chunk(&document)?;
		let vectors = self.encoder.encode(&chunks).await?;
		let embeddings: BTreeMap<String, Vec<f32>> = vectors
			.into_iter()
			.enumerate()
			.map(|(index, vector)| (index.to_string(), vector))
			.collect();
		Ok(EmbedDocument {
			id: doc_id.clone(),
			title: record.get_str(&self.title_field).unwrap_or_default().to_string(),
			chunks,
			embeddings,
			metadata: self.build_metadata(record, &doc_id),
			timestamp: record.get_i64(&self.timestamp_field).unwrap_or_default(),
		})
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use llms::fake::FakeEmbedder;
	use sources::Record;

	use super::*;
	use crate::EmbedderEncoder;

	fn strategy(capacity: usize) -> FieldMappedStrategy {
		FieldMappedStrategy::new(
			"messages",
			"message_id",
			"internal_date",
			"subject",
			"https://mail.example/{id}",
			vec!["subject".to_string(), "body".to_string()],
			vec!["from_email".to_string()],
			capacity,
			Arc::new(EmbedderEncoder::new(Arc::new(FakeEmbedder))),
		)
	}

	fn record() -> Record {
		let mut record = Record::default();
		record.set("message_id", "m-1");
		record.set("subject", "Quarterly numbers");
		record.set("body", "Revenue was up.");
		record.set("from_email", "alice@example.com");
		record.set("internal_date", 1_700_000_000_i64);
		record
	}

	#[tokio::test]
	async fn test_process_record_builds_document() {
		let document = strategy(512).process_record(&record()).await.unwrap();
		assert_eq!(document.id, "m-1");
		assert_eq!(document.title, "Quarterly numbers");
		assert_eq!(document.timestamp, 1_700_000_000);
		assert!(!document.chunks.is_empty());
		assert_eq!(document.chunks.len(), document.embeddings.len());
		assert!(document.metadata.contains(&"source_type===messages".to_string()));
		assert!(document.metadata.contains(&"source===m-1".to_string()));
		assert!(document.metadata.contains(&"url===https://mail.example/m-1".to_string()));
		assert!(document.metadata.contains(&"from_email===alice@example.com".to_string()));
	}

	#[tokio::test]
	async fn test_chunks_respect_token_capacity_and_cover_input() {
		let mut record = record();
		let body = "word ".repeat(400);
		record.set("body", body.trim());
		let document = strategy(16).process_record(&record).await.unwrap();
		assert!(document.chunks.len() > 1);
		// Chunks cover the input in order.
		let rejoined = document.chunks.join(" ");
		assert!(rejoined.contains("word word"));
	}

	#[tokio::test]
	async fn test_missing_doc_id_is_an_error() {
		let mut record = record();
		record.0.remove("message_id");
		let error = strategy(512).process_record(&record).await.unwrap_err();
		assert_eq!(error.kind(), IngestErrorKind::Embedding);
	}
}
