use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::*;

const STRATEGIES: [Strategy; 2] = [Strategy::Actor, Strategy::Locked];

fn memo<P: Producer>(producer: P, strategy: Strategy) -> Memo<P> {
    let config = MemoConfig {
        name: format!("test-{strategy}"),
        strategy,
        ..Default::default()
    };
    Memo::with_config(producer, &config, Handle::current())
}

fn reverse(key: &CacheKey) -> String {
    key.as_str().chars().rev().collect()
}

/// A producer that counts its invocations and returns the reversed key after `latency`.
fn reversing(
    calls: &Arc<AtomicUsize>,
    latency: Duration,
) -> impl Producer<Value = String, Error = String> {
    let calls = Arc::clone(calls);
    from_fn(move |key| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(latency).await;
            Ok::<_, String>(reverse(&key))
        }
    })
}

/// The counter scenario: the producer bumps a shared counter and returns its new value.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let counter = Arc::new(AtomicUsize::new(0));
        let producer = {
            let counter = Arc::clone(&counter);
            from_fn(move |_key| {
                let counter = Arc::clone(&counter);
                async move {
                    let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    // give the other callers a chance to pile up
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(value)
                }
            })
        };
        let memo = Arc::new(memo(producer, strategy));
        let barrier = Arc::new(tokio::sync::Barrier::new(100));

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let memo = Arc::clone(&memo);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    memo.get("a").await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap(), Ok(1));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1, "strategy: {strategy}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_many_keys() {
    memoflight_test::setup();

    const NUM_TASKS: usize = 8;
    const NUM_KEYS: usize = 128;

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = Arc::new(memo(reversing(&calls, Duration::from_millis(1)), strategy));

        let tasks: Vec<_> = (0..NUM_TASKS)
            .map(|_| {
                let memo = Arc::clone(&memo);
                tokio::spawn(async move {
                    for key in 0..NUM_KEYS {
                        let key = CacheKey::from(key.to_string());
                        assert_eq!(memo.get(key.clone()).await, Ok(reverse(&key)));
                    }
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), NUM_KEYS, "strategy: {strategy}");
    }
}

/// Two keys with a 200ms producer each complete in 200ms, not 400ms.
#[tokio::test(start_paused = true)]
async fn test_cross_key_parallelism() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = memo(reversing(&calls, Duration::from_millis(200)), strategy);

        let start = Instant::now();
        let (abc, xyz) = futures::join!(memo.get("abc"), memo.get("xyz"));
        let elapsed = start.elapsed();

        assert_eq!(abc, Ok("cba".into()));
        assert_eq!(xyz, Ok("zyx".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(
            elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(250),
            "strategy {strategy} took {elapsed:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_memoization() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = memo(reversing(&calls, Duration::from_millis(100)), strategy);

        assert_eq!(memo.get("abc").await, Ok("cba".into()));

        // a cached result is served right away
        let start = Instant::now();
        assert_eq!(memo.get("abc").await, Ok("cba".into()));
        assert!(start.elapsed() < Duration::from_millis(1));

        // and is not forgotten either
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(memo.get("abc").await, Ok("cba".into()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.inflight(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_error_memoization() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            from_fn(move |key: CacheKey| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err::<String, _>(format!("failed to produce {key}"))
                }
            })
        };
        let memo = memo(producer, strategy);
        let expected = Err(MemoError::Producer("failed to produce a".to_owned()));

        let (first, second) = futures::join!(memo.get("a"), memo.get("a"));
        assert_eq!(first, expected);
        assert_eq!(second, expected);

        // errors are never retried
        tokio::time::sleep(Duration::from_secs(60)).await;
        let third = memo.get("a").await;
        assert_eq!(third, expected);
        assert_eq!(
            third.unwrap_err().producer_error().map(String::as_str),
            Some("failed to produce a")
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1, "strategy: {strategy}");
    }
}

#[tokio::test]
async fn test_get_after_close() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = memo(reversing(&calls, Duration::ZERO), strategy);

        assert_eq!(memo.get("abc").await, Ok("cba".into()));
        assert!(!memo.is_closed());

        memo.close();
        assert!(memo.is_closed());

        // a closed cache fails right away, even for keys that were computed before
        let result = tokio::time::timeout(Duration::from_secs(1), memo.get("anything"))
            .await
            .expect("get after close must not hang");
        assert_eq!(result, Err(MemoError::Closed));
        assert_eq!(memo.get("abc").await, Err(MemoError::Closed));

        // closing twice is fine
        memo.close();
        assert!(memo.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_close_does_not_abandon_waiters() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let gate = Arc::new(Semaphore::new(0));
        let producer = {
            let gate = Arc::clone(&gate);
            from_fn(move |key: CacheKey| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await.map_err(|_| "gate closed".to_owned())?;
                    Ok::<_, String>(reverse(&key))
                }
            })
        };
        let memo = Arc::new(memo(producer, strategy));

        let waiter = {
            let memo = Arc::clone(&memo);
            tokio::spawn(async move { memo.get("slow").await })
        };
        while memo.inflight() == 0 {
            tokio::task::yield_now().await;
        }

        memo.close();
        gate.add_permits(1);

        assert_eq!(waiter.await.unwrap(), Ok("wols".into()));
        assert_eq!(memo.inflight(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_block_disjoint() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let gate = Arc::new(Semaphore::new(0));
        let producer = {
            let gate = Arc::clone(&gate);
            from_fn(move |key: CacheKey| {
                let gate = Arc::clone(&gate);
                async move {
                    if key.as_str() == "1" {
                        // block the computation of key 1
                        let _permit = gate.acquire().await.map_err(|_| ())?;
                    }
                    Ok::<_, ()>(reverse(&key))
                }
            })
        };
        let memo = Arc::new(memo(producer, strategy));

        let computing = {
            let memo = Arc::clone(&memo);
            tokio::spawn(async move { memo.get("1").await })
        };
        let reading = {
            let memo = Arc::clone(&memo);
            tokio::spawn(async move { memo.get("1").await })
        };

        // Neither the computation of 1 nor its readers may block other keys.
        let disjoint = tokio::time::timeout(Duration::from_secs(3), memo.get("23"))
            .await
            .expect("Inserting a different key should not block");
        assert_eq!(disjoint, Ok("32".into()));

        // clean up
        gate.add_permits(1);
        assert_eq!(computing.await.unwrap(), Ok("1".into()));
        assert_eq!(reading.await.unwrap(), Ok("1".into()));
    }
}

#[tokio::test]
async fn test_panicking_producer() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            from_fn(move |key: CacheKey| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if key.as_str() == "boom" {
                        panic!("producer exploded");
                    }
                    Ok::<_, String>(reverse(&key))
                }
            })
        };
        let memo = memo(producer, strategy);

        let (first, second) = futures::join!(memo.get("boom"), memo.get("boom"));
        assert_eq!(first, Err(MemoError::Interrupted));
        assert_eq!(second, Err(MemoError::Interrupted));
        assert_eq!(memo.get("boom").await, Err(MemoError::Interrupted));

        // the cache itself is unaffected
        assert_eq!(memo.get("fine").await, Ok("enif".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2, "strategy: {strategy}");
        assert_eq!(memo.inflight(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_dropped_get_does_not_cancel() {
    memoflight_test::setup();

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = memo(reversing(&calls, Duration::from_millis(100)), strategy);

        let timed_out = tokio::time::timeout(Duration::from_millis(10), memo.get("abc")).await;
        assert!(timed_out.is_err());

        // the computation kept running in the background
        let start = Instant::now();
        assert_eq!(memo.get("abc").await, Ok("cba".into()));
        assert!(start.elapsed() <= Duration::from_millis(90));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_independent_caches() {
    memoflight_test::setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let first = memo(reversing(&calls, Duration::ZERO), Strategy::Actor);
    let second = memo(reversing(&calls, Duration::ZERO), Strategy::Locked);

    assert_eq!(first.get("abc").await, Ok("cba".into()));
    assert_eq!(second.get("abc").await, Ok("cba".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // closing one cache leaves the other one alone
    first.close();
    assert_eq!(first.get("abc").await, Err(MemoError::Closed));
    assert_eq!(second.get("abc").await, Ok("cba".into()));
}

#[test]
fn test_blocking_single_flight() {
    memoflight_test::setup();

    const NUM_THREADS: usize = 8;
    const NUM_KEYS: usize = 64;

    let runtime = tokio::runtime::Runtime::new().unwrap();

    for strategy in STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            blocking(move |key: CacheKey| {
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
                Ok::<_, ()>(key.as_str().parse::<usize>().unwrap_or_default())
            })
        };
        let config = MemoConfig {
            strategy,
            ..Default::default()
        };
        let memo = Memo::with_config(producer, &config, runtime.handle().clone());
        let barrier = std::sync::Barrier::new(NUM_THREADS);

        std::thread::scope(|s| {
            for _ in 0..NUM_THREADS {
                s.spawn(|| {
                    barrier.wait();
                    for key in 0..NUM_KEYS {
                        assert_eq!(memo.get_blocking(key.to_string()), Ok(key));
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), NUM_KEYS, "strategy: {strategy}");

        memo.close();
        assert_eq!(memo.get_blocking("0"), Err(MemoError::Closed));
    }
}

#[tokio::test]
async fn test_debug_output() {
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memo(reversing(&calls, Duration::ZERO), Strategy::Locked);
    memo.get("abc").await.unwrap();

    let debug = format!("{memo:?}");
    assert!(debug.contains("test-locked"), "{debug}");
    assert!(debug.contains("Locked"), "{debug}");
    assert!(debug.contains("entries: Some(1)"), "{debug}");
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_runtime_shutdown_interrupts_computation() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .finish();
    // A current-thread runtime drops its tasks on this thread, where the subscriber is active.
    let _guard = tracing::subscriber::set_default(subscriber);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let config = MemoConfig {
        name: "shutdown".into(),
        strategy: Strategy::Locked,
        ..Default::default()
    };
    let memo = Memo::with_config(
        reversing(&calls, Duration::from_secs(60)),
        &config,
        runtime.handle().clone(),
    );

    runtime.block_on(async {
        let pending = tokio::time::timeout(Duration::from_millis(10), memo.get("abc")).await;
        assert!(pending.is_err());
    });
    assert_eq!(memo.inflight(), 1);

    // tears down the sleeping computation before it could publish
    drop(runtime);

    assert_eq!(memo.inflight(), 0);
    assert_eq!(memo.get_blocking("abc"), Err(MemoError::Interrupted));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let logs = logs.contents();
    assert!(
        logs.contains("Computation interrupted before publishing a result"),
        "{logs}"
    );
    assert!(logs.contains("panicked=false"), "{logs}");
    assert!(logs.contains("memo=shutdown"), "{logs}");
}
