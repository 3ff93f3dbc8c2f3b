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

use chrono::Utc;

/// Canonicalizes an identifier for use in vector-store namespaces and
/// staging table names: lowercase, anything outside `[a-z0-9_$]`
/// becomes `_`.
pub fn canonical(raw: &str) -> String {
	raw.to_lowercase()
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
		.collect()
}

/// Strips ASCII control characters from staged text.
pub fn clean_ascii_control_chars(text: &str) -> String {
	text.chars().filter(|c| !c.is_ascii_control()).collect()
}

pub fn now_unix_seconds() -> i64 {
	Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_canonical() {
		assert_eq!(canonical("My Source-Id"), "my_source_id");
		assert_eq!(canonical("a1_b$2"), "a1_b$2");
		assert_eq!(canonical("3f9d-4c.e"), "3f9d_4c_e");
	}

	#[test]
	fn test_clean_ascii_control_chars() {
		assert_eq!(clean_ascii_control_chars("a\x00b\x1fc\nd"), "abcd");
		assert_eq!(clean_ascii_control_chars("plain"), "plain");
	}
}
