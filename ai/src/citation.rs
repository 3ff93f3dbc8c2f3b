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

//! Citation handling over the live token stream.
//!
//! Marks look like `:s[7]`. Retrieval hands each document a mark
//! through [`CitationMarker::get_citation`]; the outgoing stream is
//! fed through [`CitationState`] character by character (no regex on
//! live streams), and completed buffers are renumbered with
//! [`CitationMarker::mark_used`] so display numbers start at 1 in
//! order of first use within the request.

use std::collections::HashMap;

use common::Source;
use once_cell::sync::Lazy;
use regex::Regex;
use storage::RetrievedDocument;
use tracing::warn;

static SOURCE_MARK_REGEX: Lazy<Regex> =
	Lazy::new(|| Regex::new(r":s\[(\d+)\]").expect("source mark regex should compile"));

/// Request-scoped mapping between retrieval marks and display
/// numbers.
#[derive(Debug, Default)]
pub struct CitationMarker {
	counter: usize,
	mapping: HashMap<usize, RetrievedDocument>,
	used_markers: HashMap<usize, usize>,
	used_order: Vec<usize>,
}

impl CitationMarker {
	/// Assigns the next retrieval mark to a document and returns the
	/// token to embed in the context block.
	pub fn get_citation(&mut self, document: RetrievedDocument) -> String {
		self.counter += 1;
		self.mapping.insert(self.counter, document);
		format!(":s[{}]", self.counter)
	}

	fn add_marker_if_not_exists(&mut self, source_number: usize) -> usize {
		if let Some(display) = self.used_markers.get(&source_number) {
			return *display;
		}
		// Display numbers start from 1 and grow by first use.
		let display = self.used_markers.len() + 1;
		self.used_markers.insert(source_number, display);
		self.used_order.push(source_number);
		display
	}

	fn citation_to_source(&self, source_number: usize) -> Option<Source> {
		let document = self.mapping.get(&source_number)?;
		let display = *self.used_markers.get(&source_number)?;
		let source_type =
			document.metadata.get("source_type").cloned().unwrap_or_else(|| "unknown".to_string());
		let label = document
			.metadata
			.get("title")
			.cloned()
			.unwrap_or_else(|| source_type.clone());
		Some(Source {
			number: display,
			label,
			content: document.content.clone(),
			source_type,
			url: document.metadata.get("url").cloned().unwrap_or_default(),
			page: document.metadata.get("page").cloned().unwrap_or_default(),
		})
	}

	/// Renumbers every mark in a completed buffer to its display
	/// number, left to right, and returns the sources surfaced by
	/// this buffer.
	pub fn mark_used(&mut self, content: &str) -> (String, Vec<Source>) {
		let mut marked_content = String::with_capacity(content.len());
		let mut last_end = 0;
		let mut source_numbers = Vec::new();
		for captures in SOURCE_MARK_REGEX.captures_iter(content) {
			let whole = captures.get(0).expect("regex match should have a range");
			let Ok(real_number) = captures[1].parse::<usize>() else {
				continue;
			};
			let display = self.add_marker_if_not_exists(real_number);
			marked_content.push_str(&content[last_end..whole.start()]);
			marked_content.push_str(&format!(":s[{display}]"));
			last_end = whole.end();
			if !source_numbers.contains(&real_number) {
				source_numbers.push(real_number);
			}
		}
		marked_content.push_str(&content[last_end..]);

		let sources = source_numbers
			.into_iter()
			.filter_map(|source_number| self.citation_to_source(source_number))
			.collect();
		(marked_content, sources)
	}
}

/// Finite-state recognizer for `:s[<N>]` over a character stream.
///
/// States: 0 expect `:`, 1 expect `s`, 2 expect `[`, 3 inside the
/// number. `process` returns text to emit — either buffered plain
/// content on a mismatch, or the completed mark.
#[derive(Debug, Default)]
pub struct CitationState {
	state: u8,
	buffer: String,
	number: String,
}

impl CitationState {
	pub fn is_empty(&self) -> bool {
		self.state == 0 && self.buffer.is_empty()
	}

	pub fn reset(&mut self) {
		self.state = 0;
		self.buffer.clear();
		self.number.clear();
	}

	/// Flushes whatever is buffered as plain content.
	pub fn flush(&mut self) -> Option<String> {
		if self.buffer.is_empty() {
			return None;
		}
		let rest = std::mem::take(&mut self.buffer);
		self.reset();
		Some(rest)
	}

	pub fn process(&mut self, c: char) -> Option<String> {
		match self.state {
			0 | 1 | 2 => {
				let expected = [':', 's', '['][self.state as usize];
				if c == expected {
					self.buffer.push(c);
					self.state += 1;
					None
				} else {
					let mut emitted = std::mem::take(&mut self.buffer);
					emitted.push(c);
					self.reset();
					Some(emitted)
				}
			},
			_ => {
				if c.is_ascii_digit() {
					self.buffer.push(c);
					self.number.push(c);
					return None;
				}
				if c == ']' {
					self.buffer.push(c);
					let emitted = std::mem::take(&mut self.buffer);
					let valid = self.number.parse::<usize>().is_ok();
					if !valid {
						warn!(buffer = %emitted, "invalid source number");
					}
					self.reset();
					return Some(emitted);
				}
				let mut emitted = std::mem::take(&mut self.buffer);
				emitted.push(c);
				self.reset();
				Some(emitted)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use storage::RetrievedDocument;

	use super::*;

	fn document(title: &str) -> RetrievedDocument {
		let mut metadata = BTreeMap::new();
		metadata.insert("title".to_string(), title.to_string());
		metadata.insert("source_type".to_string(), "mail".to_string());
		metadata.insert("url".to_string(), format!("https://mail.example/{title}"));
		RetrievedDocument { content: format!("content of {title}"), score: 1.0, metadata }
	}

	fn feed(state: &mut CitationState, marker: &mut CitationMarker, text: &str) -> (String, Vec<Source>) {
		let mut output = String::new();
		let mut sources: Vec<Source> = Vec::new();
		for c in text.chars() {
			if let Some(emitted) = state.process(c) {
				let (marked, emitted_sources) = marker.mark_used(&emitted);
				output.push_str(&marked);
				for source in emitted_sources {
					if !sources.iter().any(|s| s.number == source.number) {
						sources.push(source);
					}
				}
			}
		}
		if let Some(rest) = state.flush() {
			output.push_str(&rest);
		}
		(output, sources)
	}

	#[test]
	fn test_plain_text_passes_through() {
		let mut state = CitationState::default();
		let mut marker = CitationMarker::default();
		let (output, sources) = feed(&mut state, &mut marker, "no citations here.");
		assert_eq!(output, "no citations here.");
		assert!(sources.is_empty());
	}

	#[test]
	fn test_renumbering_follows_first_use_order() {
		let mut marker = CitationMarker::default();
		// Seven retrieval marks assigned during the rag step.
		for i in 1..=7 {
			marker.get_citation(document(&format!("doc-{i}")));
		}
		let mut state = CitationState::default();
		let (output, sources) =
			feed(&mut state, &mut marker, "Per :s[7], also :s[3], and :s[7] again.");
		assert_eq!(output, "Per :s[1], also :s[2], and :s[1] again.");
		assert_eq!(sources.len(), 2);
		assert_eq!(sources[0].number, 1);
		assert_eq!(sources[0].label, "doc-7");
		assert_eq!(sources[1].number, 2);
		assert_eq!(sources[1].label, "doc-3");
	}

	#[test]
	fn test_partial_mark_across_chunks() {
		let mut marker = CitationMarker::default();
		marker.get_citation(document("doc-1"));
		let mut state = CitationState::default();
		let mut output = String::new();
		for chunk in ["see :s", "[1] ok"] {
			for c in chunk.chars() {
				if let Some(emitted) = state.process(c) {
					let (marked, _) = marker.mark_used(&emitted);
					output.push_str(&marked);
				}
			}
		}
		assert_eq!(output, "see :s[1] ok");
	}

	#[test]
	fn test_mismatch_flushes_buffer_as_plain_content() {
		let mut state = CitationState::default();
		let mut marker = CitationMarker::default();
		let (output, sources) = feed(&mut state, &mut marker, "ratio :sum and :s[x]");
		assert_eq!(output, "ratio :sum and :s[x]");
		assert!(sources.is_empty());
	}

	#[test]
	fn test_empty_number_is_emitted_raw() {
		let mut state = CitationState::default();
		let mut marker = CitationMarker::default();
		let (output, sources) = feed(&mut state, &mut marker, "odd :s[] mark");
		assert_eq!(output, "odd :s[] mark");
		assert!(sources.is_empty());
	}

	#[test]
	fn test_unmapped_number_renumbers_without_source() {
		let mut marker = CitationMarker::default();
		let mut state = CitationState::default();
		// The model hallucinated a mark that retrieval never assigned.
		let (output, sources) = feed(&mut state, &mut marker, "ghost :s[9].");
		assert_eq!(output, "ghost :s[1].");
		assert!(sources.is_empty());
	}

	#[test]
	fn test_display_numbers_form_bijection() {
		let mut marker = CitationMarker::default();
		for i in 1..=5 {
			marker.get_citation(document(&format!("doc-{i}")));
		}
		let mut state = CitationState::default();
		let (_, sources) =
			feed(&mut state, &mut marker, ":s[4]:s[2]:s[4]:s[1]:s[2]");
		let numbers: Vec<usize> = sources.iter().map(|source| source.number).collect();
		assert_eq!(numbers, vec![1, 2, 3]);
		let labels: Vec<&str> = sources.iter().map(|source| source.label.as_str()).collect();
		assert_eq!(labels, vec!["doc-4", "doc-2", "doc-1"]);
	}
}
