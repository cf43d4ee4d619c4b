//! Scheduling loop composed with the lock manager, risk controller and outbox.

use async_trait::async_trait;
use outreach_core::config::RiskConfig;
use outreach_core::lock::{InMemoryLockStore, RuntimeLockManager};
use outreach_core::outbox::{InMemoryOutboxStore, NewOutboxEvent, OutboxStore};
use outreach_core::risk::{Admission, InMemoryFlagStore, RiskAction, RiskController, RiskInputs};
use outreach_core::runtime::{CycleContext, CycleRunner, RunExit, RunnerSettings, WorkCycle};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn settings(ttl: Duration) -> RunnerSettings {
    RunnerSettings {
        lock_key: "automation_runner".to_string(),
        lease_ttl: ttl,
        heartbeat_interval: Duration::from_millis(5),
        cycle_interval: Duration::from_millis(5),
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Records which owner ran each cycle and whether two cycles ever overlapped
#[derive(Default)]
struct ExclusiveWork {
    active: AtomicBool,
    overlaps: AtomicU64,
    owners: Mutex<Vec<String>>,
}

impl ExclusiveWork {
    fn ran(&self, owner: &str) -> bool {
        self.owners.lock().iter().any(|o| o == owner)
    }
}

#[async_trait]
impl WorkCycle for ExclusiveWork {
    async fn run_cycle(&self, context: &CycleContext) -> outreach_core::Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.active.store(false, Ordering::SeqCst);
        self.owners.lock().push(context.owner_id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_second_runner_waits_for_handoff() {
    let locks = RuntimeLockManager::new(Arc::new(InMemoryLockStore::new()));
    let work = Arc::new(ExclusiveWork::default());

    let ttl = Duration::from_secs(60);
    let runner_a =
        Arc::new(CycleRunner::new(locks.clone(), settings(ttl)).with_owner_id("worker-a"));
    let runner_b =
        Arc::new(CycleRunner::new(locks.clone(), settings(ttl)).with_owner_id("worker-b"));

    let (stop_a, rx_a) = watch::channel(false);
    let task_a = {
        let (runner, work) = (Arc::clone(&runner_a), Arc::clone(&work));
        tokio::spawn(async move { runner.run(&*work, rx_a).await })
    };
    wait_until(|| work.ran("worker-a")).await;

    let (stop_b, rx_b) = watch::channel(false);
    let task_b = {
        let (runner, work) = (Arc::clone(&runner_b), Arc::clone(&work));
        tokio::spawn(async move { runner.run(&*work, rx_b).await })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!work.ran("worker-b"));

    stop_a.send(true).unwrap();
    let summary_a = task_a.await.unwrap().unwrap();
    assert_eq!(summary_a.exit, RunExit::Shutdown);

    wait_until(|| work.ran("worker-b")).await;
    stop_b.send(true).unwrap();
    task_b.await.unwrap().unwrap();

    assert_eq!(work.overlaps.load(Ordering::SeqCst), 0);
    assert!(locks.current_holder("automation_runner").await.unwrap().is_none());
}

#[tokio::test]
async fn test_crashed_holder_is_reclaimed_after_ttl() {
    let locks = RuntimeLockManager::new(Arc::new(InMemoryLockStore::new()));
    let work = Arc::new(ExclusiveWork::default());

    let crashed = Arc::new(
        CycleRunner::new(locks.clone(), settings(Duration::from_millis(60)))
            .with_owner_id("worker-a"),
    );
    let (_keep_a, rx_a) = watch::channel(false);
    let task_a = {
        let (runner, work) = (Arc::clone(&crashed), Arc::clone(&work));
        tokio::spawn(async move { runner.run(&*work, rx_a).await })
    };
    wait_until(|| work.ran("worker-a")).await;
    // No release, no more heartbeats
    task_a.abort();

    let survivor = CycleRunner::new(locks.clone(), settings(Duration::from_millis(60)))
        .with_owner_id("worker-b");
    let (stop_b, rx_b) = watch::channel(false);
    let observed = Arc::clone(&work);
    let stopper = tokio::spawn(async move {
        wait_until(|| observed.ran("worker-b")).await;
        stop_b.send(true).unwrap();
    });

    let summary = survivor.run(&*work, rx_b).await.unwrap();
    stopper.await.unwrap();
    assert!(summary.cycles_run >= 1);
    assert!(locks.current_holder("automation_runner").await.unwrap().is_none());
}

/// Reports high risk on its first cycle, pausing automation and recording an
/// outbox event; stops the runner after `stop_after` cycles
struct CampaignWork {
    risk: RiskController,
    outbox: Arc<InMemoryOutboxStore>,
    tripped: AtomicBool,
    runs: AtomicU64,
    stop_after: u64,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl WorkCycle for CampaignWork {
    async fn run_cycle(&self, context: &CycleContext) -> outreach_core::Result<()> {
        let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;

        let inputs = if self.tripped.swap(true, Ordering::SeqCst) {
            RiskInputs::default()
        } else {
            RiskInputs {
                pending_invites: 100,
                total_invites: 100,
                invites_sent: 20,
                invite_cap: 20,
                messages_sent: 50,
                message_cap: 50,
                recent_failures: 5,
                selector_incidents: 2,
                challenge_incidents: 1,
            }
        };

        let decision = self.risk.evaluate(&inputs).await?;
        if let Some(pause) = self.risk.apply(&decision).await? {
            self.outbox
                .enqueue(&NewOutboxEvent::new(
                    "automation.paused",
                    json!({ "score": decision.score, "until": pause.paused_until }),
                    format!("automation.paused:{}", context.cycle),
                ))
                .await?;
        }

        if runs >= self.stop_after {
            let _ = self.shutdown.send(true);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_high_risk_pauses_cycles_until_resumed() {
    let locks = RuntimeLockManager::new(Arc::new(InMemoryLockStore::new()));
    let risk = RiskController::new(RiskConfig::default(), Arc::new(InMemoryFlagStore::new()));
    let outbox = Arc::new(InMemoryOutboxStore::new());
    let (tx, rx) = watch::channel(false);
    let work = Arc::new(CampaignWork {
        risk: risk.clone(),
        outbox: Arc::clone(&outbox),
        tripped: AtomicBool::new(false),
        runs: AtomicU64::new(0),
        stop_after: 3,
        shutdown: tx,
    });

    let runner = Arc::new(
        CycleRunner::new(locks, settings(Duration::from_secs(60)))
            .with_risk_controller(risk.clone()),
    );
    let task = {
        let (runner, work) = (Arc::clone(&runner), Arc::clone(&work));
        tokio::spawn(async move { runner.run(&*work, rx).await })
    };

    let paused = risk.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while matches!(paused.admission().await.unwrap(), Admission::Allowed) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let pause = risk.automation_pause().await.unwrap().unwrap();
    assert!(!pause.indefinite);
    assert!(pause.reason.contains("score"));

    // Several intervals pass without another cycle
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(work.runs.load(Ordering::SeqCst), 1);

    assert!(risk.resume().await.unwrap());
    let summary = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.cycles_run, 3);
    assert!(summary.cycles_skipped >= 1);
    assert_eq!(outbox.count_pending().await.unwrap(), 1);
    let event = outbox.all().remove(0);
    assert_eq!(event.topic, "automation.paused");
    assert_eq!(event.idempotency_key, "automation.paused:1");
}

#[tokio::test]
async fn test_high_risk_decision_is_a_long_pause() {
    let risk = RiskController::new(RiskConfig::default(), Arc::new(InMemoryFlagStore::new()));
    let decision = risk
        .evaluate(&RiskInputs {
            pending_invites: 100,
            total_invites: 100,
            invites_sent: 20,
            invite_cap: 20,
            messages_sent: 50,
            message_cap: 50,
            recent_failures: 5,
            selector_incidents: 2,
            challenge_incidents: 1,
        })
        .await
        .unwrap();
    assert!(decision.score >= 80.0);
    assert_eq!(decision.action, RiskAction::Pause { minutes: 180 });
}
