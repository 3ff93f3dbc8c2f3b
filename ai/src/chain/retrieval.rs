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

use std::sync::{Arc, Mutex};

use storage::RetrievedDocument;
use tracing::debug;

use crate::{citation::CitationMarker, retrievers::Retriever, AiResult};

const SEPARATOR: &str = "\n___\n";
const EMPTY_RESPONSE: &str = "<empty>";

/// Retrieval step: fetch the grounding documents for the turn and
/// format them into the context block, assigning citation marks when
/// citations are enabled.
pub struct RagStep {
	retriever: Arc<dyn Retriever>,
	marker: Option<Arc<Mutex<CitationMarker>>>,
}

impl RagStep {
	pub fn new(
		retriever: Arc<dyn Retriever>,
		marker: Option<Arc<Mutex<CitationMarker>>>,
	) -> Self {
		Self { retriever, marker }
	}

	pub async fn run(&self, message: &str) -> AiResult<String> {
		// A single query per turn; the retriever interface keeps the
		// multi-query path open.
		let documents = self.retriever.retrieve_many(&[message.to_string()]).await?;
		debug!(count = documents.len(), "retrieved documents");
		Ok(self.format_context(documents))
	}

	fn format_doc(&self, document: RetrievedDocument) -> String {
		let metadata_str = document
			.metadata
			.iter()
			.map(|(key, value)| format!("{}: {value}", key.to_uppercase()))
			.collect::<Vec<_>>()
			.join("\n");
		let content = format!("```\n{}\n```", document.content);
		match &self.marker {
			Some(marker) => {
				let citation = marker
					.lock()
					.expect("lock should not be poisoned")
					.get_citation(document);
				format!("{citation} :\n{metadata_str}\n{content}\n")
			},
			None => format!("{metadata_str}\n{content}\n"),
		}
	}

	fn format_context(&self, documents: Vec<RetrievedDocument>) -> String {
		if documents.is_empty() {
			return EMPTY_RESPONSE.to_string();
		}
		let documents_str = documents
			.into_iter()
			.map(|document| self.format_doc(document))
			.collect::<Vec<_>>()
			.join(SEPARATOR);
		format!("DOCUMENTS:\n---\n{documents_str}\n---\n")
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use async_trait::async_trait;

	use super::*;
	use crate::AiResult;

	struct FixedRetriever(Vec<RetrievedDocument>);

	#[async_trait]
	impl Retriever for FixedRetriever {
		async fn retrieve(&self, _query: &str) -> AiResult<Vec<RetrievedDocument>> {
			Ok(self.0.clone())
		}
	}

	fn document(title: &str, content: &str) -> RetrievedDocument {
		let mut metadata = BTreeMap::new();
		metadata.insert("title".to_string(), title.to_string());
		RetrievedDocument { content: content.to_string(), score: 1.0, metadata }
	}

	#[tokio::test]
	async fn test_context_carries_citation_marks_in_order() {
		let marker = Arc::new(Mutex::new(CitationMarker::default()));
		let step = RagStep::new(
			Arc::new(FixedRetriever(vec![
				document("a", "first doc"),
				document("b", "second doc"),
			])),
			Some(marker),
		);
		let context = step.run("query").await.unwrap();
		assert!(context.starts_with("DOCUMENTS:"));
		assert!(context.contains(":s[1] :\nTITLE: a\n```\nfirst doc\n```"));
		assert!(context.contains(":s[2] :\nTITLE: b\n```\nsecond doc\n```"));
		assert!(context.contains("\n___\n"));
	}

	#[tokio::test]
	async fn test_context_without_citations_has_no_marks() {
		let step =
			RagStep::new(Arc::new(FixedRetriever(vec![document("a", "doc")])), None);
		let context = step.run("query").await.unwrap();
		assert!(!context.contains(":s["));
		assert!(context.contains("TITLE: a"));
	}

	#[tokio::test]
	async fn test_empty_retrieval_yields_empty_marker() {
		let step = RagStep::new(Arc::new(FixedRetriever(Vec::new())), None);
		let context = step.run("query").await.unwrap();
		assert_eq!(context, "<empty>");
	}
}
