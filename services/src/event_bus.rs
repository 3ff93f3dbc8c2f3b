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
	fmt,
	sync::{Arc, Mutex},
};

use common::TMap;
use tracing::debug;

/// Fire-and-forget message fanned out to any number of handlers.
pub trait Event: fmt::Debug + Clone + Send + Sync + 'static {}

type EventHandlerFn<E> = Arc<dyn Fn(E) + Send + Sync>;
type EventSubscriptions<E> = Vec<EventHandlerFn<E>>;

/// Process-wide event fan-out.
///
/// `publish` never runs handlers inline: handlers registered through a
/// service are wrapped so that invocation is scheduled on that
/// service's dispatcher. Subscriptions are installed at service-wire
/// time only.
#[derive(Clone, Default)]
pub struct EventBus {
	subscriptions: Arc<Mutex<TMap>>,
}

impl EventBus {
	pub fn subscribe<E, F>(&self, handler: F)
	where
		E: Event,
		F: Fn(E) + Send + Sync + 'static,
	{
		let mut subscriptions = self.subscriptions.lock().expect("lock should not be poisoned");
		if !subscriptions.contains::<EventSubscriptions<E>>() {
			subscriptions.insert::<EventSubscriptions<E>>(Vec::new());
		}
		subscriptions
			.get_mut::<EventSubscriptions<E>>()
			.expect("subscription list should exist")
			.push(Arc::new(handler));
	}

	/// Starts a per-request collector. Nothing reaches the handlers
	/// until the producing handler commits and `process` runs.
	pub fn begin(&self) -> EventCollector {
		EventCollector::default()
	}

	/// Drains the collector, delivering events in publish order.
	pub fn process(&self, collector: EventCollector) {
		for publish in collector.drain() {
			publish(self);
		}
	}

	pub(crate) fn dispatch_event<E: Event>(&self, event: E) {
		let subscriptions = self.subscriptions.lock().expect("lock should not be poisoned");
		let Some(typed_subscriptions) = subscriptions.get::<EventSubscriptions<E>>() else {
			debug!(event = ?event, "no subscribers");
			return;
		};
		for handler in typed_subscriptions {
			handler(event.clone());
		}
	}
}

impl fmt::Debug for EventBus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventBus").finish()
	}
}

type DeferredPublish = Box<dyn FnOnce(&EventBus) + Send>;

/// Buffers events published during one handler invocation.
///
/// The service hands the collector to the bus only when the handler
/// returns without error; a failing handler's events are dropped with
/// the collector.
#[derive(Clone, Default)]
pub struct EventCollector {
	events: Arc<Mutex<Vec<DeferredPublish>>>,
}

impl EventCollector {
	pub fn publish<E: Event>(&self, event: E) {
		let mut events = self.events.lock().expect("lock should not be poisoned");
		events.push(Box::new(move |bus| bus.dispatch_event(event)));
	}

	pub fn is_empty(&self) -> bool {
		self.events.lock().expect("lock should not be poisoned").is_empty()
	}

	fn drain(&self) -> Vec<DeferredPublish> {
		let mut events = self.events.lock().expect("lock should not be poisoned");
		events.drain(..).collect()
	}
}

impl fmt::Debug for EventCollector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventCollector").finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::{Event, EventBus};

	#[derive(Clone, Debug)]
	struct Ping(usize);

	impl Event for Ping {}

	#[test]
	fn test_publish_is_deferred_until_process() {
		let bus = EventBus::default();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let seen_clone = seen.clone();
		bus.subscribe::<Ping, _>(move |ping| seen_clone.lock().unwrap().push(ping.0));

		let collector = bus.begin();
		collector.publish(Ping(1));
		collector.publish(Ping(2));
		assert!(seen.lock().unwrap().is_empty());

		bus.process(collector);
		assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
	}

	#[test]
	fn test_dropped_collector_discards_events() {
		let bus = EventBus::default();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let seen_clone = seen.clone();
		bus.subscribe::<Ping, _>(move |ping| seen_clone.lock().unwrap().push(ping.0));

		let collector = bus.begin();
		collector.publish(Ping(1));
		drop(collector);
		assert!(seen.lock().unwrap().is_empty());
	}

	#[test]
	fn test_multiple_subscribers_all_receive() {
		let bus = EventBus::default();
		let seen = Arc::new(Mutex::new(Vec::new()));
		for tag in 0..2 {
			let seen_clone = seen.clone();
			bus.subscribe::<Ping, _>(move |ping| seen_clone.lock().unwrap().push((tag, ping.0)));
		}
		let collector = bus.begin();
		collector.publish(Ping(9));
		bus.process(collector);
		let seen = seen.lock().unwrap();
		assert!(seen.contains(&(0, 9)));
		assert!(seen.contains(&(1, 9)));
	}
}
