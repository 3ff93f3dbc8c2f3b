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

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use futures::Future;
use rand::Rng;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(20);

/// Classifies an error as worth retrying or terminal.
///
/// Transient network/provider failures opt in; everything else is
/// permanent by default.
pub trait Retryable {
	fn is_retryable(&self) -> bool {
		false
	}
}

#[derive(Debug, Eq, PartialEq)]
pub enum Retry<E> {
	Permanent(E),
	Transient(E),
}

impl<E> Retry<E> {
	pub fn into_inner(self) -> E {
		match self {
			Self::Transient(error) => error,
			Self::Permanent(error) => error,
		}
	}
}

impl<E> Retryable for Retry<E> {
	fn is_retryable(&self) -> bool {
		matches!(self, Retry::Transient(_))
	}
}

#[derive(Debug, Clone, Copy)]
pub struct RetryParams {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub max_attempts: usize,
}

impl Default for RetryParams {
	fn default() -> Self {
		Self {
			base_delay: DEFAULT_BASE_DELAY,
			max_delay: DEFAULT_MAX_DELAY,
			max_attempts: DEFAULT_MAX_ATTEMPTS,
		}
	}
}

impl RetryParams {
	/// Computes the delay after which a new attempt should be performed.
	/// The randomized delay increases after each attempt (exponential
	/// backoff and full jitter).
	///
	/// The caller passes the number of attempts performed so far. Not to
	/// be confused with the number of retries, which is one less.
	///
	/// # Panics
	///
	/// Panics if `num_attempts` is zero.
	pub fn compute_delay(&self, num_attempts: usize) -> Duration {
		assert!(num_attempts > 0, "num_attempts should be greater than zero");

		let delay_ms = self.base_delay.as_millis() as u64 * 2u64.pow(num_attempts as u32 - 1);
		let ceil_delay_ms = delay_ms.min(self.max_delay.as_millis() as u64);
		let half_delay_ms = ceil_delay_ms / 2;
		let jitter_range = 0..half_delay_ms + 1;
		let jittered_delay_ms = half_delay_ms + rand::thread_rng().gen_range(jitter_range);
		Duration::from_millis(jittered_delay_ms)
	}

	#[cfg(any(test, feature = "testsuite"))]
	pub fn for_test() -> Self {
		Self {
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(2),
			..Default::default()
		}
	}
}

#[async_trait]
pub trait MockableSleep {
	async fn sleep(&self, duration: Duration);
}

pub struct TokioSleep;

#[async_trait]
impl MockableSleep for TokioSleep {
	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

pub async fn retry_with_mockable_sleep<U, E, Fut>(
	retry_params: &RetryParams,
	f: impl Fn() -> Fut,
	mockable_sleep: impl MockableSleep,
) -> Result<U, E>
where
	Fut: Future<Output = Result<U, E>>,
	E: Retryable + Debug + 'static,
{
	let mut num_attempts = 0;

	loop {
		let response = f().await;

		let error = match response {
			Ok(response) => {
				return Ok(response);
			},
			Err(error) => error,
		};
		if !error.is_retryable() {
			return Err(error);
		}
		num_attempts += 1;

		if num_attempts >= retry_params.max_attempts {
			warn!(
				num_attempts=%num_attempts,
				"request failed"
			);
			return Err(error);
		}
		let delay = retry_params.compute_delay(num_attempts);
		debug!(
			num_attempts=%num_attempts,
			delay_ms=%delay.as_millis(),
			error=?error,
			"request failed, retrying"
		);
		mockable_sleep.sleep(delay).await;
	}
}

pub async fn retry<U, E, Fut>(retry_params: &RetryParams, f: impl Fn() -> Fut) -> Result<U, E>
where
	Fut: Future<Output = Result<U, E>>,
	E: Retryable + Debug + 'static,
{
	retry_with_mockable_sleep(retry_params, f, TokioSleep).await
}

#[cfg(test)]
mod tests {
	use std::{sync::RwLock, time::Duration};

	use futures::future::ready;

	use super::{retry_with_mockable_sleep, MockableSleep, Retry, RetryParams, Retryable};

	struct NoopSleep;

	#[async_trait::async_trait]
	impl MockableSleep for NoopSleep {
		async fn sleep(&self, _duration: Duration) {}
	}

	#[tokio::test]
	async fn test_retry_accepts_first_success() {
		let result: Result<usize, Retry<usize>> =
			retry_with_mockable_sleep(&RetryParams::for_test(), || ready(Ok(7)), NoopSleep).await;
		assert_eq!(result, Ok(7));
	}

	#[tokio::test]
	async fn test_retry_does_not_retry_permanent_errors() {
		let attempts = RwLock::new(0);
		let result: Result<usize, Retry<usize>> = retry_with_mockable_sleep(
			&RetryParams::for_test(),
			|| {
				*attempts.write().unwrap() += 1;
				ready(Err(Retry::Permanent(1)))
			},
			NoopSleep,
		)
		.await;
		assert_eq!(result, Err(Retry::Permanent(1)));
		assert_eq!(*attempts.read().unwrap(), 1);
	}

	#[tokio::test]
	async fn test_retry_gives_up_after_max_attempts() {
		let attempts = RwLock::new(0);
		let params = RetryParams::for_test();
		let result: Result<usize, Retry<usize>> = retry_with_mockable_sleep(
			&params,
			|| {
				*attempts.write().unwrap() += 1;
				ready(Err(Retry::Transient(1)))
			},
			NoopSleep,
		)
		.await;
		assert_eq!(result, Err(Retry::Transient(1)));
		assert_eq!(*attempts.read().unwrap(), params.max_attempts);
	}

	#[tokio::test]
	async fn test_retry_eventually_succeeds() {
		let attempts = RwLock::new(0);
		let result: Result<usize, Retry<usize>> = retry_with_mockable_sleep(
			&RetryParams::for_test(),
			|| {
				let mut attempts = attempts.write().unwrap();
				*attempts += 1;
				if *attempts < 3 {
					ready(Err(Retry::Transient(1)))
				} else {
					ready(Ok(42))
				}
			},
			NoopSleep,
		)
		.await;
		assert_eq!(result, Ok(42));
	}

	#[test]
	fn test_compute_delay_is_bounded() {
		let params = RetryParams {
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_millis(500),
			max_attempts: 10,
		};
		for num_attempts in 1..=10 {
			let delay = params.compute_delay(num_attempts);
			assert!(delay <= params.max_delay);
		}
	}
}
