//! End-to-end scenarios exercising task handles and named locks.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{anyhow, ensure, Result};
use weave_core::{CompletionReason, Config, LockManager, LockNamespace, TaskBuilder, TaskState};

use crate::cli::ScenarioSelection;

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum Scenario {
    TaskLifecycle,
    BlockingLock,
    SkipLock,
}

impl Scenario {
    const fn label(self) -> &'static str {
        match self {
            Self::TaskLifecycle => "a (dedicated-thread lifecycle)",
            Self::BlockingLock => "b (blocking lock)",
            Self::SkipLock => "c (skip lock)",
        }
    }
}

impl ScenarioSelection {
    fn scenarios(self) -> Vec<Scenario> {
        match self {
            Self::A => vec![Scenario::TaskLifecycle],
            Self::B => vec![Scenario::BlockingLock],
            Self::C => vec![Scenario::SkipLock],
            Self::All => vec![
                Scenario::TaskLifecycle,
                Scenario::BlockingLock,
                Scenario::SkipLock,
            ],
        }
    }
}

/// Run the selected scenarios, printing one line each.
///
/// # Errors
///
/// Returns an error naming how many scenarios failed.
pub async fn run(selection: ScenarioSelection, config: &Config) -> Result<()> {
    let mut failed = 0_usize;
    for scenario in selection.scenarios() {
        let outcome = match scenario {
            Scenario::TaskLifecycle => task_lifecycle(config).await,
            Scenario::BlockingLock => blocking_lock_serializes().await,
            Scenario::SkipLock => skip_lock_bails(),
        };
        match outcome {
            Ok(detail) => {
                tracing::info!(scenario = scenario.label(), "scenario passed");
                println!("scenario {}: ok ({detail})", scenario.label());
            }
            Err(e) => {
                failed += 1;
                tracing::error!(scenario = scenario.label(), "scenario failed: {e:#}");
                println!("scenario {}: FAILED: {e:#}", scenario.label());
            }
        }
    }
    ensure!(failed == 0, "{failed} scenario(s) failed");
    Ok(())
}

/// A not-immediate dedicated-thread task observed through `run`.
async fn task_lifecycle(config: &Config) -> Result<String> {
    let (release, gate) = mpsc::channel::<()>();
    let task = TaskBuilder::from_config(&config.tasks)
        .name("scenario-a")
        .execute_immediately(false)
        .dedicated_thread(move || {
            let _ = gate.recv_timeout(DEADLINE);
        })?;

    let mut seen = vec![task.state()];
    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });

    tokio::time::timeout(DEADLINE, async {
        while !task.is_started() {
            tokio::task::yield_now().await;
        }
    })
    .await?;
    seen.push(task.state());

    release.send(())?;
    let reason = tokio::time::timeout(DEADLINE, runner).await???;
    seen.push(task.state());

    ensure!(
        seen == [TaskState::WaitingForExecution, TaskState::Running, TaskState::Completed],
        "unexpected state sequence {seen:?}"
    );
    ensure!(
        reason == CompletionReason::RanToComplete,
        "unexpected completion reason {reason}"
    );

    let path: Vec<String> = seen.iter().map(ToString::to_string).collect();
    Ok(format!("{} ({reason})", path.join(" -> ")))
}

/// Two callers contend for the blocking lock "db"; the second body only
/// starts after the first finishes.
async fn blocking_lock_serializes() -> Result<String> {
    let locks = Arc::new(LockManager::new());
    let events = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));

    let caller = |who: &'static str| {
        let locks = Arc::clone(&locks);
        let events = Arc::clone(&events);
        tokio::spawn(async move {
            locks
                .concurrent_sync_lock("db", || async move {
                    events.lock().await.push(format!("{who} start"));
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    events.lock().await.push(format!("{who} end"));
                })
                .await
        })
    };

    let first = caller("first");
    tokio::time::timeout(DEADLINE, async {
        while locks.check_lock(LockNamespace::AsyncBlocking, "db") != Ok(false) {
            tokio::task::yield_now().await;
        }
    })
    .await?;
    let second = caller("second");

    tokio::time::timeout(DEADLINE, first).await???;
    tokio::time::timeout(DEADLINE, second).await???;

    let events = events.lock().await.clone();
    ensure!(
        events == ["first start", "first end", "second start", "second end"],
        "bodies overlapped: {events:?}"
    );
    Ok(format!("{} executions, serialized", events.len() / 2))
}

/// Caller 1 holds the skip lock "poll"; caller 2 returns at once without
/// running its body.
fn skip_lock_bails() -> Result<String> {
    let locks = Arc::new(LockManager::new());
    let (held_tx, held_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder = {
        let locks = Arc::clone(&locks);
        std::thread::spawn(move || {
            locks.skip_lock("poll", move || {
                let _ = held_tx.send(());
                let _ = release_rx.recv_timeout(DEADLINE);
            })
        })
    };
    held_rx.recv_timeout(DEADLINE)?;

    let ran = AtomicBool::new(false);
    let started = Instant::now();
    let second = locks.skip_lock("poll", || ran.store(true, Ordering::SeqCst))?;
    let elapsed = started.elapsed();

    release_tx.send(())?;
    let first = holder
        .join()
        .map_err(|_| anyhow!("lock holder thread panicked"))??;

    ensure!(first, "caller 1 did not get the lock");
    ensure!(
        !second && !ran.load(Ordering::SeqCst),
        "caller 2 ran its body"
    );
    ensure!(elapsed < Duration::from_secs(1), "caller 2 waited {elapsed:?}");
    Ok(format!("caller 2 skipped in {elapsed:?}"))
}
