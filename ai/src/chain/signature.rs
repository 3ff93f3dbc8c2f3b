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

/// Answering instructions when inline citations are requested.
const CITE_INSTRUCTIONS: &str = "Continue the conversation using the provided agent, \
carefully incorporating relevant information from the documents.\n\
Reply in markdown format.\n\
Cite sources inline when supporting your conclusions, \
using the `:s[<source_number>]` format for source numbers.\n\
If the conclusion is from multiple sources, use the format \
`:s[<source_number_1>]:s[<source_number_2>]...`.\n\
Example: :s[1]:s[3]:s[7].";

/// Answering instructions for the citation-free variant.
const NO_CITE_INSTRUCTIONS: &str = "Continue the conversation using the provided agent, \
carefully incorporating relevant information from the documents.\n\
Reply in markdown format.\n\
Do not cite sources that support your conclusions.";

/// Renders the agent signature into the system prompt.
pub fn system_prompt(
	cite_sources: bool,
	agent: &str,
	relevant_information: &str,
	chat_summary: &str,
) -> String {
	let instructions = if cite_sources { CITE_INSTRUCTIONS } else { NO_CITE_INSTRUCTIONS };
	format!(
		"{instructions}\n\n---\n\n\
		 Agent: {agent}\n\n\
		 Relevant Information: {relevant_information}\n\n\
		 Chat Summary: {chat_summary}\n\n\
		 Response:"
	)
}

#[cfg(test)]
mod tests {
	use super::system_prompt;

	#[test]
	fn test_cite_variant_mentions_the_mark_format() {
		let prompt = system_prompt(true, "agent", "docs", "");
		assert!(prompt.contains(":s[<source_number>]"));
		assert!(prompt.contains("Agent: agent"));
		assert!(prompt.contains("Relevant Information: docs"));
	}

	#[test]
	fn test_no_cite_variant_forbids_marks() {
		let prompt = system_prompt(false, "agent", "docs", "");
		assert!(prompt.contains("Do not cite sources"));
		assert!(!prompt.contains(":s[<source_number>]"));
	}
}
