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

//! Unit-of-work plumbing over the in-process relational store.
//!
//! Repositories in the feature crates wrap [`UnitOfWork`] with typed
//! queries; the store itself only knows rows by id, unique indexes,
//! and atomic commits. Mutations stage in a per-transaction overlay
//! (read-your-writes) and land in one write-lock section on `commit`;
//! dropping an uncommitted unit of work rolls it back.

use std::{
	any::type_name,
	collections::{HashMap, HashSet},
	fmt,
	marker::PhantomData,
	sync::{Arc, Mutex, RwLock},
};

use common::TMap;
use uuid::Uuid;

use crate::{StorageError, StorageErrorKind, StorageResult};

/// A persisted row addressed by uuid.
pub trait Entity: Clone + Send + Sync + 'static {
	fn entity_id(&self) -> Uuid;
}

type Table<T> = HashMap<Uuid, T>;
type KeyFn<T> = Arc<dyn Fn(&T) -> Option<String> + Send + Sync>;

struct UniqueIndex<T> {
	name: &'static str,
	key: KeyFn<T>,
}

type UniqueIndexes<T> = Vec<UniqueIndex<T>>;

/// The committed table set plus its row-lock registry.
///
/// Commits apply under one write lock, and unique indexes are
/// re-checked against the committed state inside that section.
#[derive(Clone, Default)]
pub struct MemoryStore {
	tables: Arc<RwLock<TMap>>,
	indexes: Arc<RwLock<TMap>>,
	locks: LockRegistry,
}

impl MemoryStore {
	/// Declares a unique index for `T`. Rows mapping to `None` are
	/// exempt (soft-deleted rows opt out this way).
	pub fn add_unique_index<T: Entity>(
		&self,
		name: &'static str,
		key: impl Fn(&T) -> Option<String> + Send + Sync + 'static,
	) {
		let mut indexes = self.indexes.write().expect("lock should not be poisoned");
		if !indexes.contains::<UniqueIndexes<T>>() {
			indexes.insert::<UniqueIndexes<T>>(Vec::new());
		}
		indexes
			.get_mut::<UniqueIndexes<T>>()
			.expect("index list should exist")
			.push(UniqueIndex { name, key: Arc::new(key) });
	}

	pub fn locks(&self) -> &LockRegistry {
		&self.locks
	}

	/// Starts a transaction scope.
	pub fn begin(&self) -> UnitOfWork {
		UnitOfWork { store: self.clone(), overlay: Mutex::new(Staging::default()) }
	}

	fn read_committed<T: Entity>(&self, id: Uuid) -> Option<T> {
		let tables = self.tables.read().expect("lock should not be poisoned");
		tables.get::<Table<T>>().and_then(|table| table.get(&id)).cloned()
	}

	fn scan_committed<T: Entity>(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
		let tables = self.tables.read().expect("lock should not be poisoned");
		tables
			.get::<Table<T>>()
			.map(|table| table.values().filter(|row| filter(row)).cloned().collect())
			.unwrap_or_default()
	}

	fn check_unique<T: Entity>(&self, tables: &TMap, staged: &Overlay<T>) -> StorageResult<()> {
		let indexes = self.indexes.read().expect("lock should not be poisoned");
		let Some(typed_indexes) = indexes.get::<UniqueIndexes<T>>() else {
			return Ok(());
		};
		let committed = tables.get::<Table<T>>();
		for index in typed_indexes {
			let mut seen: HashMap<String, Uuid> = HashMap::new();
			let surviving_committed = committed
				.into_iter()
				.flat_map(|table| table.values())
				.filter(|row| {
					!staged.upserts.contains_key(&row.entity_id()) &&
						!staged.deletes.contains(&row.entity_id())
				});
			for row in staged.upserts.values().chain(surviving_committed) {
				let Some(key) = (index.key)(row) else {
					continue;
				};
				if let Some(other) = seen.insert(key.clone(), row.entity_id()) {
					if other != row.entity_id() {
						return Err(StorageError::new(
							StorageErrorKind::UniqueViolation,
							anyhow::anyhow!(
								"unique index `{}` on `{}` violated by key `{key}`",
								index.name,
								type_name::<T>()
							),
						));
					}
				}
			}
		}
		Ok(())
	}
}

impl fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryStore").finish()
	}
}

struct Overlay<T> {
	upserts: HashMap<Uuid, T>,
	deletes: HashSet<Uuid>,
}

impl<T> Default for Overlay<T> {
	fn default() -> Self {
		Self { upserts: HashMap::new(), deletes: HashSet::new() }
	}
}

/// Commit-time view of one staged entity type. The overlay is
/// type-erased, so each touched type contributes its own applier.
trait StagedTable: Send + Sync {
	fn check(&self, store: &MemoryStore, overlay: &TMap, tables: &TMap) -> StorageResult<()>;
	fn apply(&self, overlay: &mut TMap, tables: &mut TMap);
}

struct StagedTableFor<T>(PhantomData<fn() -> T>);

impl<T: Entity> StagedTable for StagedTableFor<T> {
	fn check(&self, store: &MemoryStore, overlay: &TMap, tables: &TMap) -> StorageResult<()> {
		match overlay.get::<Overlay<T>>() {
			Some(staged) => store.check_unique::<T>(tables, staged),
			None => Ok(()),
		}
	}

	fn apply(&self, overlay: &mut TMap, tables: &mut TMap) {
		let Some(staged) = overlay.remove::<Overlay<T>>() else {
			return;
		};
		if !tables.contains::<Table<T>>() {
			tables.insert::<Table<T>>(Table::default());
		}
		let table = tables.get_mut::<Table<T>>().expect("table should exist");
		for id in staged.deletes {
			table.remove(&id);
		}
		for (id, row) in staged.upserts {
			table.insert(id, row);
		}
	}
}

#[derive(Default)]
struct Staging {
	typed: TMap,
	appliers: Vec<Box<dyn StagedTable>>,
}

impl Staging {
	fn overlay_mut<T: Entity>(&mut self) -> &mut Overlay<T> {
		if !self.typed.contains::<Overlay<T>>() {
			self.typed.insert::<Overlay<T>>(Overlay::default());
			self.appliers.push(Box::new(StagedTableFor::<T>(PhantomData)));
		}
		self.typed.get_mut::<Overlay<T>>().expect("overlay should exist")
	}
}

/// One transaction scope over the [`MemoryStore`].
///
/// Handlers receive a fresh unit of work per invocation; commits are
/// explicit, and dropping without commit discards the overlay.
pub struct UnitOfWork {
	store: MemoryStore,
	overlay: Mutex<Staging>,
}

impl UnitOfWork {
	/// Stages an insert or update.
	pub fn add<T: Entity>(&self, row: T) {
		let mut staging = self.overlay.lock().expect("lock should not be poisoned");
		let overlay = staging.overlay_mut::<T>();
		let id = row.entity_id();
		overlay.deletes.remove(&id);
		overlay.upserts.insert(id, row);
	}

	/// Stages a hard delete.
	pub fn delete<T: Entity>(&self, id: Uuid) {
		let mut staging = self.overlay.lock().expect("lock should not be poisoned");
		let overlay = staging.overlay_mut::<T>();
		overlay.upserts.remove(&id);
		overlay.deletes.insert(id);
	}

	/// Reads a row, observing staged writes first.
	pub fn get<T: Entity>(&self, id: Uuid) -> Option<T> {
		{
			let staging = self.overlay.lock().expect("lock should not be poisoned");
			if let Some(overlay) = staging.typed.get::<Overlay<T>>() {
				if overlay.deletes.contains(&id) {
					return None;
				}
				if let Some(row) = overlay.upserts.get(&id) {
					return Some(row.clone());
				}
			}
		}
		self.store.read_committed(id)
	}

	/// Scans a table, observing staged writes first.
	pub fn list<T: Entity>(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
		let staging = self.overlay.lock().expect("lock should not be poisoned");
		let (mut rows, shadowed): (Vec<T>, HashSet<Uuid>) = match staging.typed.get::<Overlay<T>>()
		{
			Some(overlay) => {
				let mut shadowed: HashSet<Uuid> = overlay.deletes.clone();
				shadowed.extend(overlay.upserts.keys().copied());
				(overlay.upserts.values().filter(|row| filter(row)).cloned().collect(), shadowed)
			},
			None => (Vec::new(), HashSet::new()),
		};
		rows.extend(
			self.store
				.scan_committed(|row: &T| !shadowed.contains(&row.entity_id()) && filter(row)),
		);
		rows
	}

	/// Applies every staged write atomically. Unique indexes are
	/// validated before any mutation lands; a violation leaves the
	/// store untouched and the overlay intact.
	pub fn commit(&self) -> StorageResult<()> {
		let mut staging = self.overlay.lock().expect("lock should not be poisoned");
		let mut tables = self.store.tables.write().expect("lock should not be poisoned");
		for applier in &staging.appliers {
			applier.check(&self.store, &staging.typed, &tables)?;
		}
		let appliers = std::mem::take(&mut staging.appliers);
		for applier in appliers {
			applier.apply(&mut staging.typed, &mut tables);
		}
		Ok(())
	}

	/// Discards every staged write.
	pub fn rollback(&self) {
		let mut staging = self.overlay.lock().expect("lock should not be poisoned");
		*staging = Staging::default();
	}

	pub fn store(&self) -> &MemoryStore {
		&self.store
	}
}

impl fmt::Debug for UnitOfWork {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UnitOfWork").finish()
	}
}

/// Non-blocking row locks, the in-process stand-in for
/// `SELECT ... FOR UPDATE NOWAIT`.
///
/// Contention surfaces immediately as [`StorageErrorKind::RowLocked`];
/// callers map it to their resource-busy error and abort.
#[derive(Clone, Default)]
pub struct LockRegistry {
	held: Arc<Mutex<HashSet<(&'static str, Uuid)>>>,
}

impl LockRegistry {
	pub fn try_lock(&self, scope: &'static str, id: Uuid) -> StorageResult<RowLockGuard> {
		let mut held = self.held.lock().expect("lock should not be poisoned");
		if !held.insert((scope, id)) {
			return Err(StorageError::new(
				StorageErrorKind::RowLocked,
				anyhow::anyhow!("row `{scope}/{id}` is locked by another writer"),
			));
		}
		Ok(RowLockGuard { registry: self.clone(), scope, id })
	}
}

impl fmt::Debug for LockRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LockRegistry").finish()
	}
}

/// Releases the row on drop, on every exit path.
#[derive(Debug)]
pub struct RowLockGuard {
	registry: LockRegistry,
	scope: &'static str,
	id: Uuid,
}

impl Drop for RowLockGuard {
	fn drop(&mut self) {
		let mut held = self.registry.held.lock().expect("lock should not be poisoned");
		held.remove(&(self.scope, self.id));
	}
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use super::{Entity, MemoryStore};
	use crate::StorageErrorKind;

	#[derive(Clone, Debug, PartialEq)]
	struct Widget {
		id: Uuid,
		name: String,
		deleted: bool,
	}

	impl Entity for Widget {
		fn entity_id(&self) -> Uuid {
			self.id
		}
	}

	fn widget(name: &str) -> Widget {
		Widget { id: Uuid::new_v4(), name: name.to_string(), deleted: false }
	}

	#[test]
	fn test_uncommitted_writes_are_invisible() {
		let store = MemoryStore::default();
		let uow = store.begin();
		let row = widget("a");
		uow.add(row.clone());
		assert_eq!(uow.get::<Widget>(row.id).unwrap().name, "a");

		let other = store.begin();
		assert!(other.get::<Widget>(row.id).is_none());
	}

	#[test]
	fn test_commit_makes_writes_visible() {
		let store = MemoryStore::default();
		let uow = store.begin();
		let row = widget("a");
		uow.add(row.clone());
		uow.commit().unwrap();

		let other = store.begin();
		assert_eq!(other.get::<Widget>(row.id).unwrap().name, "a");
	}

	#[test]
	fn test_rollback_discards_staged_writes() {
		let store = MemoryStore::default();
		let uow = store.begin();
		let row = widget("a");
		uow.add(row.clone());
		uow.rollback();
		uow.commit().unwrap();
		assert!(store.begin().get::<Widget>(row.id).is_none());
	}

	#[test]
	fn test_drop_without_commit_rolls_back() {
		let store = MemoryStore::default();
		let row = widget("a");
		{
			let uow = store.begin();
			uow.add(row.clone());
		}
		assert!(store.begin().get::<Widget>(row.id).is_none());
	}

	#[test]
	fn test_delete_shadows_committed_row() {
		let store = MemoryStore::default();
		let row = widget("a");
		let uow = store.begin();
		uow.add(row.clone());
		uow.commit().unwrap();

		let uow = store.begin();
		uow.delete::<Widget>(row.id);
		assert!(uow.get::<Widget>(row.id).is_none());
		assert_eq!(uow.list::<Widget>(|_| true).len(), 0);
		uow.commit().unwrap();
		assert!(store.begin().get::<Widget>(row.id).is_none());
	}

	#[test]
	fn test_unique_index_rejects_duplicate_on_commit() {
		let store = MemoryStore::default();
		store.add_unique_index::<Widget>("name", |row| {
			(!row.deleted).then(|| row.name.clone())
		});
		let uow = store.begin();
		uow.add(widget("a"));
		uow.commit().unwrap();

		let uow = store.begin();
		uow.add(widget("a"));
		let error = uow.commit().unwrap_err();
		assert_eq!(error.kind(), StorageErrorKind::UniqueViolation);
		// The conflicting row never landed.
		assert_eq!(store.begin().list::<Widget>(|_| true).len(), 1);
	}

	#[test]
	fn test_unique_index_exempts_none_keys() {
		let store = MemoryStore::default();
		store.add_unique_index::<Widget>("name", |row| {
			(!row.deleted).then(|| row.name.clone())
		});
		let uow = store.begin();
		uow.add(Widget { deleted: true, ..widget("a") });
		uow.add(Widget { deleted: true, ..widget("a") });
		uow.commit().unwrap();
	}

	#[test]
	fn test_row_lock_is_exclusive_and_released_on_drop() {
		let store = MemoryStore::default();
		let id = Uuid::new_v4();
		let guard = store.locks().try_lock("integration", id).unwrap();
		let error = store.locks().try_lock("integration", id).unwrap_err();
		assert_eq!(error.kind(), StorageErrorKind::RowLocked);
		// Same id under another scope is fine.
		store.locks().try_lock("connection", id).unwrap();
		drop(guard);
		store.locks().try_lock("integration", id).unwrap();
	}
}
