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
	fmt::{Debug, Formatter},
	path::PathBuf,
	sync::Arc,
};

use rand::RngCore;
use redb::{Database, ReadableTable, TableDefinition};

use crate::{StorageError, StorageErrorKind, StorageResult};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("onyx_secrets");
const ENVELOPE_KEY: &str = "envelope_key";

fn internal(err: impl Into<anyhow::Error>) -> StorageError {
	StorageError::new(StorageErrorKind::Internal, err.into())
}

/// Local keystore for the envelope key and provider credentials that
/// never belong in configuration files.
pub struct Keystore {
	db: Arc<Database>,
}

impl Debug for Keystore {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		writeln!(f, "Keystore")?;
		Ok(())
	}
}

impl Keystore {
	pub fn open(dir_path: PathBuf) -> StorageResult<Self> {
		if !dir_path.exists() {
			std::fs::create_dir_all(&dir_path)?;
		}
		let db_path = dir_path.join("onyx_secrets.redb");
		let db = Database::create(db_path).map_err(internal)?;

		let write_txn = db.begin_write().map_err(internal)?;
		write_txn.open_table(TABLE).map_err(internal)?;
		write_txn.commit().map_err(internal)?;

		Ok(Self { db: Arc::new(db) })
	}

	pub fn store(&self, key: &str, value: &[u8]) -> StorageResult<()> {
		let bytes = rmp_serde::to_vec(&value).map_err(internal)?;
		let write_txn = self.db.begin_write().map_err(internal)?;
		{
			let mut table = write_txn.open_table(TABLE).map_err(internal)?;
			table.insert(key, bytes.as_slice()).map_err(internal)?;
		}
		write_txn.commit().map_err(internal)?;
		Ok(())
	}

	pub fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
		let read_txn = self.db.begin_read().map_err(internal)?;
		let table = read_txn.open_table(TABLE).map_err(internal)?;
		let value = table.get(key).map_err(internal)?;
		match value {
			Some(bytes) => {
				let value: Vec<u8> = rmp_serde::from_slice(bytes.value()).map_err(internal)?;
				Ok(Some(value))
			},
			None => Ok(None),
		}
	}

	pub fn delete(&self, key: &str) -> StorageResult<()> {
		let write_txn = self.db.begin_write().map_err(internal)?;
		{
			let mut table = write_txn.open_table(TABLE).map_err(internal)?;
			let _ = table.remove(key).map_err(internal)?;
		}
		write_txn.commit().map_err(internal)?;
		Ok(())
	}

	/// Returns the persisted envelope key, minting one on first use.
	pub fn envelope_key(&self) -> StorageResult<Vec<u8>> {
		if let Some(key) = self.get(ENVELOPE_KEY)? {
			return Ok(key);
		}
		let mut key = vec![0u8; 32];
		rand::thread_rng().fill_bytes(&mut key);
		self.store(ENVELOPE_KEY, &key)?;
		Ok(key)
	}
}

#[cfg(test)]
mod tests {
	use super::Keystore;

	#[test]
	fn test_store_get_delete() {
		let dir = tempfile::tempdir().unwrap();
		let keystore = Keystore::open(dir.path().to_path_buf()).unwrap();
		assert!(keystore.get("token").unwrap().is_none());
		keystore.store("token", b"abc").unwrap();
		assert_eq!(keystore.get("token").unwrap().unwrap(), b"abc");
		keystore.delete("token").unwrap();
		assert!(keystore.get("token").unwrap().is_none());
	}

	#[test]
	fn test_envelope_key_is_stable() {
		let dir = tempfile::tempdir().unwrap();
		let keystore = Keystore::open(dir.path().to_path_buf()).unwrap();
		let first = keystore.envelope_key().unwrap();
		let second = keystore.envelope_key().unwrap();
		assert_eq!(first, second);
		assert_eq!(first.len(), 32);

		// Reopening the store reads the same key back.
		drop(keystore);
		let keystore = Keystore::open(dir.path().to_path_buf()).unwrap();
		assert_eq!(keystore.envelope_key().unwrap(), first);
	}
}
