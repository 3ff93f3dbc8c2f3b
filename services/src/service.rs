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

use std::{any::type_name, sync::Arc};

use common::TMap;
use futures::{
	stream::{BoxStream, StreamExt},
	Future, FutureExt, Stream,
};
use tracing::error;

use crate::{
	di::Dependencies,
	dispatcher::Dispatcher,
	event_bus::{Event, EventBus, EventCollector},
	message::{HandlerError, HandlerResult, Message, StreamMessage},
};

/// Per-invocation scope handed to every handler.
///
/// Carries the two implicit dependencies — the dispatcher and a
/// request-scoped event collector — plus the service's container for
/// the rest.
#[derive(Clone, Debug)]
pub struct HandlerContext {
	deps: Dependencies,
	dispatcher: Arc<Dispatcher>,
	collector: EventCollector,
}

impl HandlerContext {
	/// Resolves a handler collaborator by type. A miss is a wiring bug,
	/// reported at invocation time.
	pub fn resolve<T>(&self) -> HandlerResult<T>
	where
		T: Clone + Send + Sync + 'static,
	{
		self.deps.resolve::<T>().ok_or_else(|| {
			HandlerError::internal(format!("unresolved dependency `{}`", type_name::<T>()))
		})
	}

	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	/// Publishes an event into the request-scoped collector. It reaches
	/// the bus only if the producing handler commits.
	pub fn publish<E: Event>(&self, event: E) {
		self.collector.publish(event);
	}
}

type RequestHandlerFn<M> = Arc<
	dyn Fn(
			M,
			HandlerContext,
		)
			-> futures::future::BoxFuture<'static, HandlerResult<<M as Message>::Response>>
		+ Send
		+ Sync,
>;

type StreamHandlerFn<M> = Arc<
	dyn Fn(M, HandlerContext) -> BoxStream<'static, HandlerResult<<M as StreamMessage>::Item>>
		+ Send
		+ Sync,
>;

type PendingSubscription = Box<dyn FnOnce(&EventBus) + Send + Sync>;

/// A named collection of handlers plus a dependency container, wired
/// to the process-wide event bus and a dispatcher.
///
/// ```ignore
/// let service = Service::new("catalog", dispatcher)
///     .with_request_handler(publish_agent)
///     .with_event_handler(agent_published)
///     .bind_event_bus(event_bus.clone());
/// service.deps().bind::<Arc<dyn SearchClient>>(search_client);
/// let version_id = service.handle(PublishAgent { agent_id }).await?;
/// ```
pub struct Service {
	name: &'static str,
	deps: Dependencies,
	dispatcher: Arc<Dispatcher>,
	event_bus: Option<EventBus>,
	handlers: TMap,
	pending_subscriptions: Vec<PendingSubscription>,
}

impl Service {
	pub fn new(name: &'static str, dispatcher: Arc<Dispatcher>) -> Self {
		Self {
			name,
			deps: Dependencies::default(),
			dispatcher,
			event_bus: None,
			handlers: TMap::default(),
			pending_subscriptions: Vec::new(),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn deps(&self) -> &Dependencies {
		&self.deps
	}

	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	/// Registers the unique request handler for `M`.
	pub fn with_request_handler<M, F, Fut>(mut self, handler: F) -> Self
	where
		M: Message,
		F: Fn(M, HandlerContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = HandlerResult<M::Response>> + Send + 'static,
	{
		let wrapped: RequestHandlerFn<M> =
			Arc::new(move |message, ctx| handler(message, ctx).boxed());
		self.handlers.insert::<RequestHandlerFn<M>>(wrapped);
		self
	}

	/// Registers the unique streaming handler for `M`.
	pub fn with_stream_handler<M, F, S>(mut self, handler: F) -> Self
	where
		M: StreamMessage,
		F: Fn(M, HandlerContext) -> S + Send + Sync + 'static,
		S: Stream<Item = HandlerResult<M::Item>> + Send + 'static,
	{
		let wrapped: StreamHandlerFn<M> =
			Arc::new(move |message, ctx| handler(message, ctx).boxed());
		self.handlers.insert::<StreamHandlerFn<M>>(wrapped);
		self
	}

	/// Registers an event handler; the subscription is delegated to the
	/// bus when `bind_event_bus` runs.
	pub fn with_event_handler<E, F, Fut>(mut self, handler: F) -> Self
	where
		E: Event,
		F: Fn(E, HandlerContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = HandlerResult<()>> + Send + 'static,
	{
		let name = self.name;
		let deps = self.deps.clone();
		let dispatcher = self.dispatcher.clone();
		let handler = Arc::new(handler);
		self.pending_subscriptions.push(Box::new(move |bus: &EventBus| {
			let handler_bus = bus.clone();
			bus.subscribe::<E, _>(move |event| {
				let handler = handler.clone();
				let collector = handler_bus.begin();
				let ctx = HandlerContext {
					deps: deps.clone(),
					dispatcher: dispatcher.clone(),
					collector: collector.clone(),
				};
				let bus = handler_bus.clone();
				// Scheduled, never awaited: a failing event handler is
				// logged and must not reach the producer.
				dispatcher.schedule(async move {
					match handler(event, ctx).await {
						Ok(()) => bus.process(collector),
						Err(handler_error) => {
							error!(service = name, error = ?handler_error, "event handler failed");
						},
					}
				});
			});
		}));
		self
	}

	pub fn bind_event_bus(mut self, event_bus: EventBus) -> Self {
		for subscribe in self.pending_subscriptions.drain(..) {
			subscribe(&event_bus);
		}
		self.event_bus = Some(event_bus);
		self
	}

	fn begin_scope(&self) -> (EventCollector, HandlerContext) {
		let collector =
			self.event_bus.as_ref().map(EventBus::begin).unwrap_or_default();
		let ctx = HandlerContext {
			deps: self.deps.clone(),
			dispatcher: self.dispatcher.clone(),
			collector: collector.clone(),
		};
		(collector, ctx)
	}

	/// Dispatches a request to its handler and awaits the response.
	///
	/// Events published during the invocation are handed to the bus
	/// only when the handler returns `Ok`.
	pub async fn handle<M: Message>(&self, message: M) -> HandlerResult<M::Response> {
		let handler = self
			.handlers
			.get::<RequestHandlerFn<M>>()
			.cloned()
			.ok_or_else(|| HandlerError::no_handler(type_name::<M>()))?;
		let (collector, ctx) = self.begin_scope();
		let response = self
			.dispatcher
			.dispatch(handler(message, ctx))
			.await
			.map_err(|join_error| HandlerError::internal(format!("handler panicked: {join_error}")))??;
		if let Some(event_bus) = &self.event_bus {
			event_bus.process(collector);
		}
		Ok(response)
	}

	/// Dispatches a streaming request, exposing the handler's lazy
	/// sequence to the caller. Events are processed once the stream is
	/// fully drained without a terminal error; dropping the stream
	/// early discards them.
	pub fn handle_stream<M: StreamMessage>(
		&self,
		message: M,
	) -> BoxStream<'static, HandlerResult<M::Item>> {
		let Some(handler) = self.handlers.get::<StreamHandlerFn<M>>().cloned() else {
			let no_handler = HandlerError::no_handler(type_name::<M>());
			return futures::stream::once(async move { Err(no_handler) }).boxed();
		};
		let (collector, ctx) = self.begin_scope();
		let event_bus = self.event_bus.clone();
		let inner = handler(message, ctx);
		async_stream::stream! {
			let mut failed = false;
			futures::pin_mut!(inner);
			while let Some(item) = inner.next().await {
				failed |= item.is_err();
				yield item;
			}
			if !failed {
				if let Some(event_bus) = event_bus {
					event_bus.process(collector);
				}
			}
		}
		.boxed()
	}
}

impl std::fmt::Debug for Service {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Service").field("name", &self.name).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::{
		sync::{
			atomic::{AtomicUsize, Ordering},
			Arc, Mutex,
		},
		time::Duration,
	};

	use super::*;

	#[derive(Debug)]
	struct Double(usize);

	impl Message for Double {
		type Response = usize;
	}

	#[derive(Debug)]
	struct Count(usize);

	impl StreamMessage for Count {
		type Item = usize;
	}

	#[derive(Clone, Debug)]
	struct Doubled(usize);

	impl Event for Doubled {}

	#[derive(Debug)]
	struct Fail;

	impl Message for Fail {
		type Response = ();
	}

	async fn double(request: Double, ctx: HandlerContext) -> HandlerResult<usize> {
		let offset = ctx.resolve::<usize>()?;
		ctx.publish(Doubled(request.0));
		Ok(request.0 * 2 + offset)
	}

	fn wired_service(seen: Arc<Mutex<Vec<usize>>>) -> (Service, EventBus) {
		let event_bus = EventBus::default();
		event_bus.subscribe::<Doubled, _>(move |event| seen.lock().unwrap().push(event.0));
		let service = Service::new("test", Arc::new(Dispatcher::default()))
			.with_request_handler(double)
			.with_request_handler(|_request: Fail, ctx: HandlerContext| async move {
				ctx.publish(Doubled(99));
				Err::<(), _>(HandlerError::bad_request("nope"))
			})
			.bind_event_bus(event_bus.clone());
		service.deps().bind::<usize>(1);
		(service, event_bus)
	}

	#[tokio::test]
	async fn test_request_handler_round_trip() {
		let (service, _bus) = wired_service(Arc::new(Mutex::new(Vec::new())));
		assert_eq!(service.handle(Double(21)).await.unwrap(), 43);
	}

	#[tokio::test]
	async fn test_no_handler_registered() {
		let service = Service::new("empty", Arc::new(Dispatcher::default()));
		let error = service.handle(Double(1)).await.unwrap_err();
		assert!(error.to_string().contains("no handler registered"));
	}

	#[tokio::test]
	async fn test_events_processed_after_commit() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let (service, _bus) = wired_service(seen.clone());
		service.handle(Double(5)).await.unwrap();
		assert_eq!(*seen.lock().unwrap(), vec![5]);
	}

	#[tokio::test]
	async fn test_events_dropped_when_handler_fails() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let (service, _bus) = wired_service(seen.clone());
		service.handle(Fail).await.unwrap_err();
		assert!(seen.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_missing_dependency_is_invocation_error() {
		let service = Service::new("test", Arc::new(Dispatcher::default()))
			.with_request_handler(double);
		let error = service.handle(Double(1)).await.unwrap_err();
		assert!(error.to_string().contains("unresolved dependency"));
	}

	#[tokio::test]
	async fn test_stream_handler_yields_lazily_and_commits_events() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let seen_clone = seen.clone();
		let event_bus = EventBus::default();
		event_bus.subscribe::<Doubled, _>(move |event| seen_clone.lock().unwrap().push(event.0));
		let service = Service::new("test", Arc::new(Dispatcher::default()))
			.with_stream_handler(|request: Count, ctx: HandlerContext| {
				async_stream::stream! {
					for i in 0..request.0 {
						yield Ok(i);
					}
					ctx.publish(Doubled(request.0));
				}
			})
			.bind_event_bus(event_bus.clone());

		let mut stream = service.handle_stream(Count(3));
		let mut items = Vec::new();
		while let Some(item) = stream.next().await {
			items.push(item.unwrap());
		}
		assert_eq!(items, vec![0, 1, 2]);
		assert_eq!(*seen.lock().unwrap(), vec![3]);
	}

	#[tokio::test]
	async fn test_event_handler_scheduled_after_producer_returns() {
		let counter = Arc::new(AtomicUsize::new(0));
		let counter_clone = counter.clone();
		let event_bus = EventBus::default();
		let dispatcher = Arc::new(Dispatcher::default());
		let service = Service::new("test", dispatcher.clone())
			.with_request_handler(double)
			.with_event_handler(move |event: Doubled, _ctx: HandlerContext| {
				let counter = counter_clone.clone();
				async move {
					counter.fetch_add(event.0, Ordering::SeqCst);
					Ok(())
				}
			})
			.bind_event_bus(event_bus.clone());
		service.deps().bind::<usize>(0);

		service.handle(Double(4)).await.unwrap();
		// The event handler runs on the dispatcher, asynchronously.
		tokio::time::timeout(Duration::from_secs(1), async {
			while counter.load(Ordering::SeqCst) == 0 {
				tokio::time::sleep(Duration::from_millis(1)).await;
			}
		})
		.await
		.unwrap();
		assert_eq!(counter.load(Ordering::SeqCst), 4);
	}
}
