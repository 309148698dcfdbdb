//! Autoscaler cycles against a scripted orchestrator.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{job_id, submit, ScriptedProbe, NS, START};
use genfleet::autoscaler::{AutoscalerConfig, FleetAutoscaler, ScaleDirection, ScalingPolicy};
use genfleet::clock::ManualClock;
use genfleet::store::{JobStore, MemoryJobStore, StorePaths};

fn autoscaler(
    pod_id: &str,
    store: Arc<MemoryJobStore>,
    probe: Arc<ScriptedProbe>,
    clock: Arc<ManualClock>,
) -> FleetAutoscaler {
    let config = AutoscalerConfig::new(pod_id, vec![NS.to_string()])
        .with_deployment("project-generator")
        .with_check_interval(Duration::from_millis(10))
        .with_policy(ScalingPolicy {
            min_replicas: 1,
            max_replicas: 3,
            target_jobs_per_pod: 1,
            ..Default::default()
        });
    FleetAutoscaler::new(config, store, probe)
        .expect("valid config")
        .with_clock(clock)
}

struct Setup {
    store: Arc<MemoryJobStore>,
    probe: Arc<ScriptedProbe>,
    clock: Arc<ManualClock>,
}

impl Setup {
    fn new(replicas: u32) -> Self {
        let probe = Arc::new(ScriptedProbe::new(replicas));
        probe.add_pod("pod-old", START - 600);
        probe.add_pod("pod-new", START - 60);
        Self {
            store: Arc::new(MemoryJobStore::new()),
            probe,
            clock: Arc::new(ManualClock::at_epoch_seconds(START)),
        }
    }

    fn leader(&self) -> FleetAutoscaler {
        autoscaler("pod-old", self.store.clone(), self.probe.clone(), self.clock.clone())
    }

    async fn processing(&self, n: u32, heartbeat: f64) {
        let id = job_id(n);
        self.store
            .set(
                &StorePaths::requested_job(NS, &id),
                json!({
                    "createdAt": n,
                    "assignedPodId": "pod-old",
                    "status": "processing",
                    "lastHeartbeat": heartbeat,
                }),
            )
            .await
            .expect("set");
    }
}

#[tokio::test]
async fn test_only_oldest_pod_acts() {
    let setup = Setup::new(1);
    for n in 1..=3 {
        submit(&setup.store, &job_id(n), n as f64).await;
    }

    let mut follower = autoscaler(
        "pod-new",
        setup.store.clone(),
        setup.probe.clone(),
        setup.clock.clone(),
    );
    assert!(!follower.is_leader().await);
    assert!(follower.tick().await.expect("tick").is_none());
    assert!(setup.probe.set_calls().is_empty());

    let mut leader = setup.leader();
    assert!(leader.is_leader().await);
    let decision = leader.tick().await.expect("tick").expect("leader decides");
    assert_eq!(decision.waiting_job_count, 3);
    assert_eq!(decision.desired_replicas, 3);
    assert_eq!(decision.action, Some(ScaleDirection::Up));
    assert_eq!(setup.probe.replicas(), 3);
    assert_eq!(leader.state().last_scale_action, Some(ScaleDirection::Up));
}

#[tokio::test]
async fn test_listing_failure_means_no_leader() {
    let setup = Setup::new(1);
    submit(&setup.store, &job_id(1), 1.0).await;
    submit(&setup.store, &job_id(2), 2.0).await;
    setup.probe.fail_listing.store(true, Ordering::SeqCst);

    let mut leader = setup.leader();
    assert!(!leader.is_leader().await);
    assert!(leader.tick().await.expect("tick").is_none());
    assert_eq!(setup.probe.replicas(), 1);
}

#[tokio::test]
async fn test_replica_read_failure_skips_cycle() {
    let setup = Setup::new(1);
    submit(&setup.store, &job_id(1), 1.0).await;
    submit(&setup.store, &job_id(2), 2.0).await;
    setup.probe.fail_get_replicas.store(true, Ordering::SeqCst);

    let mut leader = setup.leader();
    assert!(leader.tick().await.is_err());
    assert!(setup.probe.set_calls().is_empty());
}

#[tokio::test]
async fn test_rejected_scale_is_retried() {
    let setup = Setup::new(1);
    submit(&setup.store, &job_id(1), 1.0).await;
    submit(&setup.store, &job_id(2), 2.0).await;
    setup.probe.fail_set_replicas.store(true, Ordering::SeqCst);

    let mut leader = setup.leader();
    let decision = leader.tick().await.expect("tick").expect("decision");
    assert_eq!(decision.action, Some(ScaleDirection::Up));
    assert_eq!(setup.probe.replicas(), 1);
    assert_eq!(leader.state().last_scale_time, None);

    setup.probe.fail_set_replicas.store(false, Ordering::SeqCst);
    let decision = leader.tick().await.expect("tick").expect("decision");
    assert_eq!(decision.action, Some(ScaleDirection::Up));
    assert_eq!(setup.probe.replicas(), 2);
    assert_eq!(setup.probe.set_calls(), vec![2, 2]);
}

#[tokio::test]
async fn test_scale_down_after_sustained_idle() {
    let setup = Setup::new(3);
    let mut leader = setup.leader();

    for cycle in 1..5 {
        let decision = leader.tick().await.expect("tick").expect("decision");
        assert_eq!(decision.action, None, "cycle {}", cycle);
        assert_eq!(decision.consecutive_scale_down_observations, cycle);
        setup.clock.advance(Duration::from_secs(60));
    }

    let decision = leader.tick().await.expect("tick").expect("decision");
    assert_eq!(decision.action, Some(ScaleDirection::Down));
    assert_eq!(setup.probe.replicas(), 1);
    assert_eq!(leader.state().consecutive_scale_down_observations, 0);
}

#[tokio::test]
async fn test_processing_jobs_block_scale_down() {
    let setup = Setup::new(3);
    setup.processing(1, START as f64).await;
    let mut leader = setup.leader();

    for _ in 0..10 {
        let decision = leader.tick().await.expect("tick").expect("decision");
        assert_eq!(decision.processing_job_count, 1);
        assert_eq!(decision.action, None);
        assert_eq!(decision.consecutive_scale_down_observations, 0);
    }
    assert_eq!(setup.probe.replicas(), 3);
}

#[tokio::test]
async fn test_stale_processing_jobs_do_not_count() {
    let setup = Setup::new(1);
    setup.processing(1, (START - 301) as f64).await;
    let mut leader = setup.leader();

    let decision = leader.tick().await.expect("tick").expect("decision");
    assert_eq!(decision.processing_job_count, 0);
    assert_eq!(decision.waiting_job_count, 0);
    assert_eq!(decision.desired_replicas, 1);
}

#[tokio::test]
async fn test_processing_floor_exceeds_max_replicas() {
    let setup = Setup::new(3);
    for n in 1..=5 {
        setup.processing(n, START as f64).await;
    }
    let mut leader = setup.leader();

    let decision = leader.tick().await.expect("tick").expect("decision");
    assert_eq!(decision.desired_replicas, 5);
    assert_eq!(decision.action, Some(ScaleDirection::Up));
    assert_eq!(setup.probe.replicas(), 5);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let setup = Setup::new(1);
    let mut leader = setup.leader();
    let stop = CancellationToken::new();

    let token = stop.clone();
    let task = tokio::spawn(async move { leader.run(token).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    stop.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("stops in time")
        .expect("task");
    assert!(result.is_ok());
}
