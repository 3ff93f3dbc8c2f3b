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

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::{StorageError, StorageErrorKind, StorageResult};

const NONCE_LEN: usize = 16;

/// Symmetric envelope encryption for integration/connection
/// configuration at rest.
pub trait SecretsManager: Send + Sync {
	fn encrypt(&self, plaintext: &str) -> StorageResult<String>;
	fn decrypt(&self, ciphertext: &str) -> StorageResult<String>;

	/// Serializes the map through JSON and encrypts the whole envelope.
	fn encrypt_dict(&self, config: &BTreeMap<String, String>) -> StorageResult<String> {
		let serialized = serde_json::to_string(config).map_err(StorageError::from)?;
		self.encrypt(&serialized)
	}

	fn decrypt_dict(&self, ciphertext: &str) -> StorageResult<BTreeMap<String, String>> {
		let decrypted = self.decrypt(ciphertext)?;
		serde_json::from_str(&decrypted).map_err(StorageError::from)
	}
}

/// Counter-mode keystream over SHA-256 of `(key, nonce, block)`,
/// base64 envelope `nonce || ciphertext`.
pub struct EnvelopeCipher {
	key: Vec<u8>,
}

impl EnvelopeCipher {
	pub fn new(key: impl Into<Vec<u8>>) -> Self {
		Self { key: key.into() }
	}

	fn keystream_block(&self, nonce: &[u8], block_index: u64) -> [u8; 32] {
		let mut hasher = Sha256::new();
		hasher.update(&self.key);
		hasher.update(nonce);
		hasher.update(block_index.to_be_bytes());
		hasher.finalize().into()
	}

	fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) {
		for (block_index, block) in data.chunks_mut(32).enumerate() {
			let keystream = self.keystream_block(nonce, block_index as u64);
			for (byte, key_byte) in block.iter_mut().zip(keystream.iter()) {
				*byte ^= key_byte;
			}
		}
	}
}

impl SecretsManager for EnvelopeCipher {
	fn encrypt(&self, plaintext: &str) -> StorageResult<String> {
		let mut nonce = [0u8; NONCE_LEN];
		rand::thread_rng().fill_bytes(&mut nonce);
		let mut data = plaintext.as_bytes().to_vec();
		self.apply_keystream(&nonce, &mut data);
		let mut envelope = nonce.to_vec();
		envelope.extend(data);
		Ok(BASE64.encode(envelope))
	}

	fn decrypt(&self, ciphertext: &str) -> StorageResult<String> {
		let envelope = BASE64.decode(ciphertext).map_err(|err| {
			StorageError::new(StorageErrorKind::Serialization, err.into())
		})?;
		if envelope.len() < NONCE_LEN {
			return Err(StorageError::new(
				StorageErrorKind::Serialization,
				anyhow::anyhow!("ciphertext envelope too short"),
			));
		}
		let (nonce, data) = envelope.split_at(NONCE_LEN);
		let mut data = data.to_vec();
		self.apply_keystream(nonce, &mut data);
		String::from_utf8(data).map_err(|err| {
			StorageError::new(StorageErrorKind::Serialization, err.into())
		})
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::{EnvelopeCipher, SecretsManager};

	#[test]
	fn test_round_trip() {
		let cipher = EnvelopeCipher::new(b"test-key".to_vec());
		let plaintext = "refresh_token=abc123";
		let encrypted = cipher.encrypt(plaintext).unwrap();
		assert_ne!(encrypted, plaintext);
		assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
	}

	#[test]
	fn test_encrypt_is_randomized_but_decrypt_is_stable() {
		let cipher = EnvelopeCipher::new(b"test-key".to_vec());
		let a = cipher.encrypt("same input").unwrap();
		let b = cipher.encrypt("same input").unwrap();
		assert_ne!(a, b);
		assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
	}

	#[test]
	fn test_dict_round_trip() {
		let cipher = EnvelopeCipher::new(b"test-key".to_vec());
		let mut config = BTreeMap::new();
		config.insert("client_id".to_string(), "id".to_string());
		config.insert("client_secret".to_string(), "s3cret".to_string());
		let encrypted = cipher.encrypt_dict(&config).unwrap();
		assert_eq!(cipher.decrypt_dict(&encrypted).unwrap(), config);
	}

	#[test]
	fn test_wrong_key_does_not_round_trip() {
		let cipher = EnvelopeCipher::new(b"key-a".to_vec());
		let other = EnvelopeCipher::new(b"key-b".to_vec());
		let encrypted = cipher.encrypt("hello").unwrap();
		// Either an utf8 failure or garbage, never the plaintext.
		match other.decrypt(&encrypted) {
			Ok(decrypted) => assert_ne!(decrypted, "hello"),
			Err(_) => {},
		}
	}
}
