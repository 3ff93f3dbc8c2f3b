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
	any::{Any, TypeId},
	collections::HashMap,
};

/// A heterogeneous map keyed by type.
///
/// Backs the dependency container and the event bus subscription
/// tables.
#[derive(Debug, Default)]
pub struct TMap(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl TMap {
	pub fn contains<T: Any + Send + Sync>(&self) -> bool {
		self.0.contains_key(&TypeId::of::<T>())
	}

	pub fn insert<T: Any + Send + Sync>(&mut self, instance: T) {
		self.0.insert(TypeId::of::<T>(), Box::new(instance));
	}

	pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
		self.0
			.get(&TypeId::of::<T>())
			.map(|instance| instance.downcast_ref::<T>().expect("Instance should be of type T."))
	}

	pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
		self.0
			.get_mut(&TypeId::of::<T>())
			.map(|instance| instance.downcast_mut::<T>().expect("Instance should be of type T."))
	}

	pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
		self.0
			.remove(&TypeId::of::<T>())
			.map(|instance| *instance.downcast::<T>().expect("Instance should be of type T."))
	}
}

#[cfg(test)]
mod tests {
	use super::TMap;

	#[test]
	fn test_type_map_round_trip() {
		let mut tmap = TMap::default();
		assert!(!tmap.contains::<usize>());
		tmap.insert::<usize>(7);
		assert!(tmap.contains::<usize>());
		assert_eq!(tmap.get::<usize>(), Some(&7));
		*tmap.get_mut::<usize>().unwrap() += 1;
		assert_eq!(tmap.remove::<usize>(), Some(8));
		assert!(!tmap.contains::<usize>());
	}
}
