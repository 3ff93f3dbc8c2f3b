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

use std::sync::{Arc, RwLock};

use common::TMap;

/// Lifetime of a factory-produced dependency.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
	/// The factory runs once; the produced value is cached.
	Singleton,
	/// The factory runs on every resolution.
	Transient,
}

type FactoryFn<T> = Arc<dyn Fn(&Dependencies) -> T + Send + Sync>;

enum Binding<T> {
	Instance(T),
	Factory { factory: FactoryFn<T>, scope: Scope },
}

/// By-type dependency container.
///
/// Trait objects are registered under their handle type, e.g.
/// `Arc<dyn SearchClient>`. Bindings are installed at bootstrap and
/// read-only afterwards; singleton caching is the only later write.
#[derive(Clone, Default)]
pub struct Dependencies {
	bindings: Arc<RwLock<TMap>>,
}

impl Dependencies {
	/// Registers a ready instance.
	pub fn bind<T>(&self, value: T)
	where
		T: Clone + Send + Sync + 'static,
	{
		let mut bindings = self.bindings.write().expect("lock should not be poisoned");
		bindings.insert::<Binding<T>>(Binding::Instance(value));
	}

	/// Registers a factory with the given scope.
	pub fn bind_factory<T, F>(&self, scope: Scope, factory: F)
	where
		T: Clone + Send + Sync + 'static,
		F: Fn(&Dependencies) -> T + Send + Sync + 'static,
	{
		let mut bindings = self.bindings.write().expect("lock should not be poisoned");
		bindings.insert::<Binding<T>>(Binding::Factory { factory: Arc::new(factory), scope });
	}

	/// Resolves a dependency by type. `None` for a handler parameter is
	/// a programming error surfaced by the service at invocation time.
	pub fn resolve<T>(&self) -> Option<T>
	where
		T: Clone + Send + Sync + 'static,
	{
		let (factory, scope) = {
			let bindings = self.bindings.read().expect("lock should not be poisoned");
			match bindings.get::<Binding<T>>()? {
				Binding::Instance(value) => return Some(value.clone()),
				Binding::Factory { factory, scope } => (factory.clone(), *scope),
			}
		};
		// The factory may resolve further dependencies, so it must run
		// without holding the lock.
		let value = factory(self);
		if scope == Scope::Singleton {
			let mut bindings = self.bindings.write().expect("lock should not be poisoned");
			bindings.insert::<Binding<T>>(Binding::Instance(value.clone()));
		}
		Some(value)
	}
}

impl std::fmt::Debug for Dependencies {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dependencies").finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	use super::{Dependencies, Scope};

	trait Greeter: Send + Sync {
		fn greet(&self) -> String;
	}

	struct EnglishGreeter;

	impl Greeter for EnglishGreeter {
		fn greet(&self) -> String {
			"hello".to_string()
		}
	}

	#[test]
	fn test_bind_instance_and_resolve_trait_object() {
		let deps = Dependencies::default();
		deps.bind::<Arc<dyn Greeter>>(Arc::new(EnglishGreeter));
		let greeter = deps.resolve::<Arc<dyn Greeter>>().unwrap();
		assert_eq!(greeter.greet(), "hello");
	}

	#[test]
	fn test_missing_dependency_resolves_to_none() {
		let deps = Dependencies::default();
		assert!(deps.resolve::<Arc<dyn Greeter>>().is_none());
	}

	#[test]
	fn test_transient_factory_runs_every_time() {
		let deps = Dependencies::default();
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = calls.clone();
		deps.bind_factory::<usize, _>(Scope::Transient, move |_| {
			calls_clone.fetch_add(1, Ordering::SeqCst)
		});
		assert_eq!(deps.resolve::<usize>(), Some(0));
		assert_eq!(deps.resolve::<usize>(), Some(1));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn test_singleton_factory_runs_once() {
		let deps = Dependencies::default();
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = calls.clone();
		deps.bind_factory::<usize, _>(Scope::Singleton, move |_| {
			calls_clone.fetch_add(1, Ordering::SeqCst)
		});
		assert_eq!(deps.resolve::<usize>(), Some(0));
		assert_eq!(deps.resolve::<usize>(), Some(0));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_factory_can_resolve_other_bindings() {
		let deps = Dependencies::default();
		deps.bind::<String>("world".to_string());
		deps.bind_factory::<Arc<String>, _>(Scope::Transient, |deps| {
			Arc::new(format!("hello {}", deps.resolve::<String>().unwrap()))
		});
		assert_eq!(*deps.resolve::<Arc<String>>().unwrap(), "hello world");
	}
}
