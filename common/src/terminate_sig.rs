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

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc, Mutex, Weak,
};

use tracing::debug;

/// Cooperative cancellation flag shared by a tree of tasks.
///
/// Killing a signal kills every child derived from it; killing a child
/// leaves the parent alive.
#[derive(Clone, Default)]
pub struct TerminateSignal {
	inner: Arc<Inner>,
}

struct Inner {
	alive: AtomicBool,
	children: Mutex<Vec<Weak<Inner>>>,
}

impl Default for Inner {
	fn default() -> Self {
		Self { alive: AtomicBool::new(true), children: Mutex::default() }
	}
}

fn garbage_collect(children: &mut Vec<Weak<Inner>>) {
	let mut i = 0;
	while i < children.len() {
		if Weak::strong_count(&children[i]) == 0 {
			children.swap_remove(i);
		} else {
			i += 1;
		}
	}
}

impl TerminateSignal {
	pub fn is_alive(&self) -> bool {
		self.inner.alive.load(Ordering::Relaxed)
	}

	pub fn is_dead(&self) -> bool {
		!self.is_alive()
	}

	pub fn kill(&self) {
		self.inner.kill();
	}

	// Creates a child signal.
	//
	// If the parent signal is dead to begin with, the child is dead too.
	pub fn child(&self) -> TerminateSignal {
		let mut lock = self.inner.children.lock().unwrap();
		let child_inner = Inner { alive: AtomicBool::new(self.is_alive()), ..Default::default() };
		garbage_collect(&mut lock);
		let child_inner_arc = Arc::new(child_inner);
		lock.push(Arc::downgrade(&child_inner_arc));
		TerminateSignal { inner: child_inner_arc }
	}
}

impl Inner {
	pub fn kill(&self) {
		debug!("terminate-signal-activated");
		self.alive.store(false, Ordering::Relaxed);
		let mut lock = self.children.lock().unwrap();
		for weak in lock.drain(..) {
			if let Some(inner) = weak.upgrade() {
				inner.kill();
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::TerminateSignal;

	#[test]
	fn test_terminate_signal() {
		let sig = TerminateSignal::default();
		assert!(sig.is_alive());
		sig.kill();
		assert!(sig.is_dead());
		sig.kill();
		assert!(sig.is_dead());
	}

	#[test]
	fn test_terminate_signal_child() {
		let sig = TerminateSignal::default();
		let child = sig.child();
		let grandchild = child.child();
		assert!(child.is_alive());
		assert!(grandchild.is_alive());
		sig.kill();
		assert!(child.is_dead());
		assert!(grandchild.is_dead());
	}

	#[test]
	fn test_terminate_signal_child_does_not_kill_parent() {
		let sig = TerminateSignal::default();
		let child = sig.child();
		child.kill();
		assert!(sig.is_alive());
		assert!(child.is_dead());
	}
}
