//! Contains the [Retrying] optimistic update protocol, which wraps
//! the single-attempt one in a bounded loop with exponential backoff and jitter.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::{self, Apply, ApplyError};
use crate::store::Store;

/// Default maximum number of attempts of a [RetryPolicy].
pub const DEFAULT_MAX_ATTEMPTS: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => panic!("default max attempts must be positive"),
};

/// Default base backoff of a [RetryPolicy].
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(10);

/// Bounds the number of attempts of a [Retrying] protocol, and
/// how long it waits between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy allowing up to `max_attempts` attempts, where
    /// the delay after the first conflict is around `base_backoff`.
    pub fn new(max_attempts: NonZeroU32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    /// Maximum number of attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// Delay used after the first conflicted attempt, before jitter.
    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    /// Returns the delay to wait after the conflicted `attempt` (1-indexed),
    /// before jitter is applied: `base_backoff * 2^(attempt - 1)`.
    ///
    /// Saturates at [`Duration::MAX`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }

        1_u128
            .checked_shl(attempt.saturating_sub(1))
            .and_then(|factor| self.base_backoff.as_nanos().checked_mul(factor))
            .and_then(duration_from_nanos)
            .unwrap_or(Duration::MAX)
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

fn duration_from_nanos(nanos: u128) -> Option<Duration> {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    let subsec_nanos = u32::try_from(nanos % NANOS_PER_SEC).ok()?;

    Some(Duration::new(secs, subsec_nanos))
}

/// Moves `backoff` by a random offset drawn uniformly from
/// `[-backoff/2, +backoff/2]`.
///
/// The result always lies in `[backoff/2, 3*backoff/2]`.
pub fn jitter<R>(backoff: Duration, rng: &mut R) -> Duration
where
    R: Rng + ?Sized,
{
    let half = backoff / 2;
    let offset = rng.gen_range(Duration::ZERO..=half.saturating_mul(2));

    backoff.saturating_sub(half).saturating_add(offset)
}

/// The retrying optimistic update protocol.
///
/// Every attempt performs a fresh read of the record. A conflicted attempt is
/// followed by a jittered exponential backoff, until the [RetryPolicy] runs out
/// of attempts. Errors other than conflicts are returned right away.
#[derive(Debug, Clone)]
pub struct Retrying<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> From<S> for Retrying<S> {
    fn from(store: S) -> Self {
        Self::new(store, RetryPolicy::default())
    }
}

impl<S> Retrying<S> {
    /// Creates a new protocol instance over the specified store.
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the [RetryPolicy] in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Same as [`Apply::apply`], but returns the number of attempts
    /// it took to commit.
    pub async fn apply_counted<Id>(&self, id: &Id, delta: i64) -> Result<u32, ApplyError>
    where
        S: Store<Id>,
        Id: Clone + Send + Sync,
    {
        self.run(id, delta, future::pending()).await
    }

    /// Same as [`Apply::apply`], but gives up with [`ApplyError::Cancelled`]
    /// as soon as `cancel` completes while waiting between two attempts.
    ///
    /// `cancel` is polled ahead of every backoff sleep and for its whole
    /// duration, so no new attempt starts once it has completed. An attempt
    /// already in flight is never interrupted: a committed update is
    /// reported as committed.
    pub async fn apply_until<Id, C>(
        &self,
        id: &Id,
        delta: i64,
        cancel: C,
    ) -> Result<(), ApplyError>
    where
        S: Store<Id>,
        Id: Clone + Send + Sync,
        C: Future<Output = ()> + Send,
    {
        self.run(id, delta, cancel).await.map(|_| ())
    }

    async fn run<Id, C>(&self, id: &Id, delta: i64, cancel: C) -> Result<u32, ApplyError>
    where
        S: Store<Id>,
        Id: Clone + Send + Sync,
        C: Future<Output = ()> + Send,
    {
        let max_attempts = self.policy.max_attempts();
        let mut rng = StdRng::from_entropy();
        let mut attempt = 1;

        tokio::pin!(cancel);

        loop {
            let conflict = match protocol::attempt(&self.store, id, delta).await {
                Ok(()) => return Ok(attempt),
                Err(ApplyError::Conflict(conflict)) => conflict,
                Err(err) => return Err(err),
            };

            if attempt >= max_attempts {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempts = attempt,
                    expected = conflict.expected,
                    "version conflict persisted, retries exhausted"
                );

                return Err(ApplyError::RetriesExhausted {
                    attempts: attempt,
                    last: conflict,
                });
            }

            let delay = jitter(self.policy.backoff(attempt), &mut rng);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt,
                expected = conflict.expected,
                delay = ?delay,
                "version conflict detected, backing off"
            );

            tokio::select! {
                biased;
                () = &mut cancel => return Err(ApplyError::Cancelled),
                () = tokio::time::sleep(delay) => {},
            }

            attempt += 1;
        }
    }
}

#[async_trait]
impl<S, Id> Apply<Id> for Retrying<S>
where
    S: Store<Id>,
    Id: Clone + Send + Sync,
{
    async fn apply(&self, id: &Id, delta: i64) -> Result<(), ApplyError> {
        self.apply_counted(id, delta).await.map(|_| ())
    }
}
