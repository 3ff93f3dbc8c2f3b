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

use std::{sync::Mutex, time::Duration};

use futures::{future::join_all, Future};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(5);

/// Decouples the caller's thread of control from handler execution.
///
/// Coroutine-style work runs as tasks on the tokio loop; synchronous
/// work is pushed onto the bounded blocking pool. Scheduled (fire and
/// forget) tasks are tracked so `teardown` can await or cancel them.
#[derive(Debug)]
pub struct Dispatcher {
	scheduled: Mutex<Vec<JoinHandle<()>>>,
	graceful_shutdown_timeout: Duration,
}

impl Default for Dispatcher {
	fn default() -> Self {
		Self::new(DEFAULT_GRACEFUL_SHUTDOWN)
	}
}

impl Dispatcher {
	pub fn new(graceful_shutdown_timeout: Duration) -> Self {
		Self { scheduled: Mutex::new(Vec::new()), graceful_shutdown_timeout }
	}

	/// Runs a future as a task and returns its handle.
	pub fn dispatch<F>(&self, fut: F) -> JoinHandle<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		tokio::spawn(fut)
	}

	/// Runs a synchronous closure on the blocking pool.
	pub fn dispatch_blocking<F, R>(&self, f: F) -> JoinHandle<R>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		tokio::task::spawn_blocking(f)
	}

	/// Dispatches and registers the task. The caller never observes the
	/// outcome; failures must be logged inside the future itself.
	pub fn schedule<F>(&self, fut: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let handle = tokio::spawn(fut);
		let mut scheduled = self.scheduled.lock().expect("lock should not be poisoned");
		scheduled.retain(|handle| !handle.is_finished());
		scheduled.push(handle);
	}

	/// Parallel dispatch over a list of futures; results come back in
	/// input order.
	pub async fn map<F>(&self, futs: Vec<F>) -> Vec<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		let handles: Vec<JoinHandle<F::Output>> = futs.into_iter().map(tokio::spawn).collect();
		let mut results = Vec::with_capacity(handles.len());
		for handle in handles {
			match handle.await {
				Ok(result) => results.push(result),
				Err(join_error) => {
					// A panicking branch poisons the whole map call.
					std::panic::resume_unwind(join_error.into_panic());
				},
			}
		}
		results
	}

	/// Awaits all scheduled tasks up to the graceful timeout, then
	/// cancels whatever is left.
	pub async fn teardown(&self) {
		let handles: Vec<JoinHandle<()>> =
			self.scheduled.lock().expect("lock should not be poisoned").drain(..).collect();
		if handles.is_empty() {
			return;
		}
		let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
		let drained =
			tokio::time::timeout(self.graceful_shutdown_timeout, join_all(handles)).await;
		match drained {
			Ok(results) => {
				debug!(num_tasks = results.len(), "dispatcher drained");
			},
			Err(_elapsed) => {
				warn!(
					remaining = aborts.len(),
					"graceful shutdown timed out, cancelling remaining tasks"
				);
				for abort in aborts {
					abort.abort();
				}
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{
		sync::{
			atomic::{AtomicUsize, Ordering},
			Arc,
		},
		time::Duration,
	};

	use super::Dispatcher;

	#[tokio::test]
	async fn test_dispatch_returns_result() {
		let dispatcher = Dispatcher::default();
		let value = dispatcher.dispatch(async { 41 + 1 }).await.unwrap();
		assert_eq!(value, 42);
	}

	#[tokio::test]
	async fn test_dispatch_blocking_runs_on_pool() {
		let dispatcher = Dispatcher::default();
		let value = dispatcher.dispatch_blocking(|| 7 * 6).await.unwrap();
		assert_eq!(value, 42);
	}

	#[tokio::test]
	async fn test_map_preserves_order() {
		let dispatcher = Dispatcher::default();
		let futs: Vec<_> = (0..10u64)
			.map(|i| async move {
				// Later entries finish first.
				tokio::time::sleep(Duration::from_millis(10 - i)).await;
				i
			})
			.collect();
		let results = dispatcher.map(futs).await;
		assert_eq!(results, (0..10).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn test_teardown_awaits_scheduled() {
		let dispatcher = Dispatcher::default();
		let counter = Arc::new(AtomicUsize::new(0));
		for _ in 0..3 {
			let counter = counter.clone();
			dispatcher.schedule(async move {
				tokio::time::sleep(Duration::from_millis(5)).await;
				counter.fetch_add(1, Ordering::SeqCst);
			});
		}
		dispatcher.teardown().await;
		assert_eq!(counter.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = false)]
	async fn test_teardown_cancels_after_timeout() {
		let dispatcher = Dispatcher::new(Duration::from_millis(20));
		let counter = Arc::new(AtomicUsize::new(0));
		let counter_clone = counter.clone();
		dispatcher.schedule(async move {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			counter_clone.fetch_add(1, Ordering::SeqCst);
		});
		dispatcher.teardown().await;
		assert_eq!(counter.load(Ordering::SeqCst), 0);
	}
}
