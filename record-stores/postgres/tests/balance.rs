mod setup;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use optimistic_lock::store::{Fetcher, Updater};
use optimistic_lock::{Apply, ApplyError, Optimistic, RetryPolicy, Retrying, INITIAL_VERSION};

const WRITERS: usize = 100;
const SEED: i64 = 1000;

#[derive(Debug, Default)]
struct Outcome {
    successes: usize,
    conflicts: usize,
    exhausted: usize,
}

impl Outcome {
    fn record(&mut self, result: Result<(), ApplyError>) {
        match result {
            Ok(()) => self.successes += 1,
            Err(ApplyError::Conflict(_)) => self.conflicts += 1,
            Err(ApplyError::RetriesExhausted { .. }) => self.exhausted += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}

async fn run_writers<P>(protocol: Arc<P>, id: i64, delta: i64) -> Outcome
where
    P: Apply<i64> + 'static,
{
    let handles = (0..WRITERS).map(|_| {
        let protocol = protocol.clone();
        tokio::spawn(async move { protocol.apply(&id, delta).await })
    });

    let mut outcome = Outcome::default();

    for result in join_all(handles).await {
        outcome.record(result.expect("writer task should not panic"));
    }

    outcome
}

#[tokio::test]
async fn conditional_update_is_guarded_by_the_version() {
    let docker = testcontainers::clients::Cli::default();
    let (_node, pool) = setup::start(&docker).await;
    let store = setup::store(&pool);

    let balance = store.create(SEED).await.expect("failed to seed balance");
    assert_eq!(SEED, balance.value);
    assert_eq!(INITIAL_VERSION, balance.version);

    let fetched = store
        .fetch(&balance.id)
        .await
        .expect("failed to fetch balance");
    assert_eq!(Some(balance.clone()), fetched);

    let stale = store
        .conditional_update(&balance.id, INITIAL_VERSION + 1, 0, INITIAL_VERSION + 2)
        .await
        .expect("failed to run conditional update");
    assert_eq!(0, stale);

    let applied = store
        .conditional_update(&balance.id, INITIAL_VERSION, 1500, INITIAL_VERSION + 1)
        .await
        .expect("failed to run conditional update");
    assert_eq!(1, applied);

    let missing = store
        .conditional_update(&(balance.id + 1), INITIAL_VERSION, 0, INITIAL_VERSION + 1)
        .await
        .expect("failed to run conditional update");
    assert_eq!(0, missing);

    let fetched = store
        .fetch(&balance.id)
        .await
        .expect("failed to fetch balance")
        .expect("balance should exist");
    assert_eq!(1500, fetched.value);
    assert_eq!(INITIAL_VERSION + 1, fetched.version);
}

#[tokio::test]
async fn uncontended_update_and_missing_balance() {
    let docker = testcontainers::clients::Cli::default();
    let (_node, pool) = setup::start(&docker).await;
    let store = setup::store(&pool);

    let balance = store.create(SEED).await.expect("failed to seed balance");
    let protocol = Optimistic::from(store.clone());

    protocol
        .apply(&balance.id, 10)
        .await
        .expect("uncontended update should succeed");

    let updated = store
        .fetch(&balance.id)
        .await
        .expect("failed to fetch balance")
        .expect("balance should exist");
    assert_eq!(1010, updated.value);
    assert_eq!(INITIAL_VERSION + 1, updated.version);

    let err = protocol
        .apply(&(balance.id + 1_000), 10)
        .await
        .expect_err("balance does not exist");
    assert!(matches!(err, ApplyError::NotFound));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_single_attempt_writers_conserve_the_balance() {
    let docker = testcontainers::clients::Cli::default();
    let (_node, pool) = setup::start(&docker).await;
    let store = setup::store(&pool);

    let balance = store.create(SEED).await.expect("failed to seed balance");
    let outcome = run_writers(Arc::new(Optimistic::from(store.clone())), balance.id, 10).await;

    let record = store
        .fetch(&balance.id)
        .await
        .expect("failed to fetch balance")
        .expect("balance should exist");

    assert_eq!(WRITERS, outcome.successes + outcome.conflicts);
    assert!(outcome.successes >= 1);
    assert_eq!(SEED + outcome.successes as i64 * 10, record.value);
    assert_eq!(INITIAL_VERSION + outcome.successes as u64, record.version);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_retrying_writers_conserve_the_balance() {
    let docker = testcontainers::clients::Cli::default();
    let (_node, pool) = setup::start(&docker).await;
    let store = setup::store(&pool);

    let balance = store.create(SEED).await.expect("failed to seed balance");
    let protocol = Retrying::new(store.clone(), RetryPolicy::default());
    let outcome = run_writers(Arc::new(protocol), balance.id, 10).await;

    let record = store
        .fetch(&balance.id)
        .await
        .expect("failed to fetch balance")
        .expect("balance should exist");

    assert_eq!(0, outcome.conflicts, "conflicts are retried, never surfaced");
    assert_eq!(WRITERS, outcome.successes + outcome.exhausted);
    assert_eq!(SEED + outcome.successes as i64 * 10, record.value);
    assert_eq!(INITIAL_VERSION + outcome.successes as u64, record.version);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_traffic_conserves_the_balance() {
    let docker = testcontainers::clients::Cli::default();
    let (_node, pool) = setup::start(&docker).await;
    let store = setup::store(&pool);

    let balance = store.create(SEED).await.expect("failed to seed balance");
    let protocol = Arc::new(Retrying::new(
        store.clone(),
        RetryPolicy::new(NonZeroU32::new(5).unwrap(), Duration::from_millis(5)),
    ));

    // High burst, steady trickle, final burst.
    let bursts = [
        (50, Duration::ZERO),
        (20, Duration::from_millis(10)),
        (30, Duration::ZERO),
    ];

    let mut handles = Vec::new();

    for (count, interval) in bursts {
        for _ in 0..count {
            let protocol = protocol.clone();
            let id = balance.id;
            handles.push(tokio::spawn(async move { protocol.apply(&id, 2).await }));
            tokio::time::sleep(interval).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut outcome = Outcome::default();
    for result in join_all(handles).await {
        outcome.record(result.expect("writer task should not panic"));
    }

    let record = store
        .fetch(&balance.id)
        .await
        .expect("failed to fetch balance")
        .expect("balance should exist");

    assert_eq!(SEED + outcome.successes as i64 * 2, record.value);
    assert_eq!(INITIAL_VERSION + outcome.successes as u64, record.version);
}
