use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use memoflight::{CacheKey, Memo};
use memoflight::config::Config;
use parking_lot::Mutex;
use rand::Rng;
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{Counting, PreparedWorkload, WorkloadProducer, WorkloadsConfig};

/// What a single workload achieved.
pub struct WorkloadStats {
    pub concurrency: usize,
    pub task_durations: DDSketch,
    pub errors: usize,
    /// How often the producer was invoked.
    pub calls: usize,
    /// How many distinct keys were requested, which is how often the producer
    /// is expected to run.
    pub distinct_keys: usize,
}

pub async fn perform_stresstest(
    config: &Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let runtime = tokio::runtime::Handle::current();

    // initialize workloads, each one with a cache of its own
    let workloads = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let workload = PreparedWorkload::prepare(workload)
                .with_context(|| format!("failed to prepare workload {i}"))?;
            let producer = Counting::new(workload.producer);
            let calls = producer.calls();
            let memo = Memo::with_config(
                producer,
                &config.memo.named(format!("workload-{i}")),
                runtime.clone(),
            );
            let workload = RunningWorkload {
                concurrency: workload.concurrency,
                keys: workload.keys,
                memo,
            };
            Ok((Arc::new(workload), calls))
        })
        .collect::<Result<Vec<_>>>()?;

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (workload, calls) in workloads {
        let task = tokio::spawn(run_workload(workload, calls, duration));
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let stats = task.context("workload task panicked")?;
        print_stats(i, &stats, duration);
    }

    Ok(())
}

/// A prepared workload together with its cache.
struct RunningWorkload {
    concurrency: usize,
    keys: Vec<CacheKey>,
    memo: Memo<Counting<WorkloadProducer>>,
}

impl RunningWorkload {
    /// Picks a random key. Keys listed more than once are picked more often.
    fn random_key(&self) -> CacheKey {
        let index = rand::rng().random_range(0..self.keys.len());
        self.keys[index].clone()
    }
}

async fn run_workload(
    workload: Arc<RunningWorkload>,
    calls: Arc<AtomicUsize>,
    duration: Duration,
) -> WorkloadStats {
    let concurrency = workload.concurrency;
    let deadline = tokio::time::Instant::now() + duration;

    let task_durations = Arc::new(Mutex::new(DDSketch::default()));
    let touched_keys = Arc::new(Mutex::new(BTreeSet::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let semaphore = Arc::new(Semaphore::new(concurrency));

    // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        if deadline.elapsed() > Duration::ZERO {
            break;
        }
        tokio::select! {
            permit = semaphore.clone().acquire_owned() => {
                let Ok(permit) = permit else {
                    break;
                };
                let workload = Arc::clone(&workload);
                let task_durations = Arc::clone(&task_durations);
                let touched_keys = Arc::clone(&touched_keys);
                let errors = Arc::clone(&errors);
                let task_start = Instant::now();

                let hub = sentry::Hub::new_from_top(sentry::Hub::current());

                let future = async move {
                    let key = workload.random_key();
                    touched_keys.lock().insert(key.clone());

                    if workload.memo.get(key).await.is_err() {
                        errors.fetch_add(1, Ordering::Relaxed);
                    }

                    task_durations.lock().add(task_start.elapsed().as_secs_f64());

                    drop(permit);
                };
                let future = future.bind_hub(hub);

                tokio::spawn(future);
            }
            _ = &mut sleep => {
                break;
            }
        }
    }

    // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
    let _permits = semaphore.acquire_many(concurrency as u32).await;

    workload.memo.close();

    let task_durations = std::mem::take(&mut *task_durations.lock());
    let distinct_keys = touched_keys.lock().len();

    WorkloadStats {
        concurrency,
        task_durations,
        errors: errors.load(Ordering::Relaxed),
        calls: calls.load(Ordering::Relaxed),
        distinct_keys,
    }
}

fn print_stats(i: usize, stats: &WorkloadStats, duration: Duration) {
    let WorkloadStats {
        concurrency,
        task_durations,
        errors,
        calls,
        distinct_keys,
    } = stats;

    let ops = task_durations.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    println!(
        "Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s, {errors} errors"
    );
    println!("  producer calls: {calls}; distinct keys: {distinct_keys}");

    if ops == 0 {
        return;
    }

    let quantile = |q| {
        let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs)
    };
    let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
}
