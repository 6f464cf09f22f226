//! Scheduling property and end-to-end scenario tests.
//!
//! Drives the real cache, scorer, engine and store together. Each test
//! builds a fresh in-memory store, hydrates a cache from it and runs
//! scheduling attempts against the result.

use std::collections::HashMap;
use std::sync::Arc;

use anchor_placement::{CPU_PRESSURE_THRESHOLD, NodeScorer, PredicateRejection, ResourceRequest, parse_cpu};
use anchor_scheduler::*;
use anchor_state::*;

struct Harness {
    store: StateStore,
    cache: Arc<ClusterStateCache>,
    engine: SchedulerEngine,
}

async fn harness(nodes: &[NodeRecord]) -> Harness {
    let store = StateStore::open_in_memory().unwrap();
    for node in nodes {
        store.put_node(node).unwrap();
    }
    let cache = Arc::new(ClusterStateCache::new());
    cache.hydrate(&store).await.unwrap();
    let engine = SchedulerEngine::new(Arc::clone(&cache), NodeScorer::default(), store.clone());
    Harness { store, cache, engine }
}

fn node(id: &str, cpu: f64, has_gpu: bool) -> NodeRecord {
    NodeRecord {
        id: id.to_string(),
        name: format!("{id}-host"),
        status: NodeStatus::Online,
        metrics: NodeMetrics { cpu_usage_percent: cpu, ram_usage_percent: 0.0 },
        specs: NodeSpecs { has_gpu, gpu_type: has_gpu.then(|| "RTX4090".to_string()), gpu_vram: None },
        labels: HashMap::new(),
        taints: Vec::new(),
        region: None,
        cached_images: Vec::new(),
        pod_count: 0,
        last_scheduled_at: None,
        last_heartbeat: 0,
    }
}

/// A node that every scoring strategy loves.
fn attractive(mut record: NodeRecord) -> NodeRecord {
    record.cached_images = vec!["app:1".to_string()];
    record.labels = HashMap::from([("tier".to_string(), "gold".to_string())]);
    record
}

fn spec(cpu: Option<&str>, gpu: Option<u32>) -> WorkloadSpec {
    let raw = serde_json::json!({
        "name": "job",
        "containers": [{ "image": "app:1" }],
        "affinity": { "nodeAffinity": { "preferredDuringSchedulingIgnoredDuringExecution": [
            { "weight": 50, "preference": { "matchExpressions": [
                { "key": "tier", "operator": "In", "values": ["gold"] }
            ]}}
        ]}}
    });
    let mut spec: WorkloadSpec = serde_json::from_value(raw).unwrap();
    spec.resources.requests.cpu = cpu.map(|c| Quantity::Text(c.to_string()));
    spec.resources.requests.gpu = gpu;
    spec
}

fn admit(store: &StateStore, id: &str, spec: &WorkloadSpec) {
    store
        .put_workload(&WorkloadRecord {
            id: id.to_string(),
            name: spec.name.clone(),
            namespace: spec.namespace().to_string(),
            spec: spec.clone(),
            status: WorkloadStatus::Pending,
            phase: Some(PHASE_SCHEDULING.to_string()),
            node_id: None,
            node_name: None,
            failure_reason: None,
            exit_code: None,
            created_at: epoch_secs(),
            scheduled_at: None,
            updated_at: epoch_secs(),
        })
        .unwrap();
}

// ── Properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn feasible_workload_always_binds_within_feasible_set() {
    let requests = [
        (Some("500m"), None),
        (Some("1"), None),
        (Some("2"), Some(1)),
        (None, Some(2)),
        (Some("6"), None),
        (Some("50"), None),
        (Some("50"), Some(1)),
        (Some("90"), None),
    ];
    for usage in [0.0, 20.0, 50.0, 80.0, 94.0, 95.0] {
        for (cpu, gpu) in requests {
            // "fit" outranks "nogpu" on every strategy, so a full "fit" is
            // only skipped if the engine moves down the ranking.
            let nodes = [
                node("hot", 97.0, true),
                attractive(node("fit", usage, true)),
                node("nogpu", 10.0, false),
            ];
            let h = harness(&nodes).await;
            let s = spec(cpu, gpu);
            admit(&h.store, "w", &s);

            let request = cpu.map(|c| parse_cpu(&Quantity::Text(c.to_string()))).unwrap_or(0.0);
            let feasible: Vec<&str> = nodes
                .iter()
                .filter(|n| {
                    let usage = n.metrics.cpu_usage_percent;
                    let pressured = request > 0.0 && usage > CPU_PRESSURE_THRESHOLD;
                    let gpu_ok = gpu.is_none() || n.specs.has_gpu;
                    !pressured && gpu_ok && usage + request <= 100.0
                })
                .map(|n| n.id.as_str())
                .collect();

            let result = h.engine.schedule_one("w", &s).await;
            if feasible.is_empty() {
                assert!(result.is_err(), "usage {usage}, cpu {cpu:?}, gpu {gpu:?} should not bind");
                continue;
            }
            let binding = result.unwrap_or_else(|err| {
                panic!("usage {usage}, cpu {cpu:?}, gpu {gpu:?} failed with {err:?}, feasible {feasible:?}")
            });
            assert!(
                feasible.contains(&binding.node_id.as_str()),
                "usage {usage}, cpu {cpu:?}, gpu {gpu:?} bound to {}",
                binding.node_id
            );
            let reserved = h.cache.snapshot(&binding.node_id).await.unwrap();
            assert!(reserved.metrics.cpu_usage_percent <= 100.0);
        }
    }
}

#[tokio::test]
async fn overloaded_node_is_excluded_regardless_of_score() {
    for hot_usage in [95.5, 96.0, 99.0, 100.0] {
        let h = harness(&[attractive(node("hot", hot_usage, false)), node("cool", 94.0, false)]).await;
        let s = spec(Some("10m"), None);
        admit(&h.store, "w", &s);

        let binding = h.engine.schedule_one("w", &s).await.unwrap();
        assert_eq!(binding.node_id, "cool", "hot usage {hot_usage}");
    }

    // Without an alternative the hot node is reported as rejected.
    let h = harness(&[attractive(node("hot", 99.0, false))]).await;
    let err = h.engine.schedule_one("w", &spec(Some("10m"), None)).await.unwrap_err();
    let SchedulerError::PredicateFailure { rejections } = err else {
        panic!("expected predicate failure, got {err:?}");
    };
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].0, "hot");
}

#[tokio::test]
async fn rejected_reservation_leaves_no_partial_mutation() {
    let h = harness(&[node("n1", 30.0, false)]).await;

    let first = ResourceRequest { cpu: 50.0, ram: 10.0, gpu: 0 };
    assert!(h.cache.reserve_resources("n1", &first).await);
    let after_first = h.cache.snapshot("n1").await.unwrap().metrics;

    let second = ResourceRequest { cpu: 21.0, ram: 10.0, gpu: 0 };
    assert!(!h.cache.reserve_resources("n1", &second).await);
    assert_eq!(h.cache.snapshot("n1").await.unwrap().metrics, after_first);
}

#[tokio::test]
async fn filtering_precedes_scoring() {
    for plain_usage in (0..=90).step_by(10) {
        let h = harness(&[
            attractive(node("trap", 0.0, false)),
            node("plain", f64::from(plain_usage), true),
        ])
        .await;
        let s = spec(None, Some(1));
        admit(&h.store, "w", &s);

        // The trap outscores the plain node on every strategy.
        let candidates = h.cache.candidate_nodes().await.unwrap();
        let ranked = h.engine.scorer().rank(&candidates, &s);
        assert_eq!(ranked[0].node_id, "trap");

        let binding = h.engine.schedule_one("w", &s).await.unwrap();
        assert_eq!(binding.node_id, "plain", "plain usage {plain_usage}");
    }
}

#[tokio::test]
async fn ties_go_to_the_first_seen_node() {
    let h = harness(&[]).await;
    for id in ["second-name", "first-name"] {
        h.cache
            .apply_update(&NodeUpdate::Status { node_id: id.to_string(), status: NodeStatus::Online })
            .await;
    }
    let order: Vec<NodeId> =
        h.cache.candidate_nodes().await.unwrap().into_iter().map(|n| n.node_id).collect();
    assert_eq!(order, vec!["second-name", "first-name"]);

    let s = WorkloadSpec::default();
    admit(&h.store, "w", &s);
    let binding = h.engine.schedule_one("w", &s).await.unwrap();
    assert_eq!(binding.node_id, "second-name");
}

// ── End-to-end scenarios ────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_free_capacity_wins() {
    let h = harness(&[node("a", 10.0, false), node("b", 90.0, true)]).await;
    let mut s = WorkloadSpec::default();
    s.resources.requests.cpu = Some(Quantity::Number(5.0));
    admit(&h.store, "w", &s);

    let binding = h.engine.schedule_one("w", &s).await.unwrap();
    assert_eq!(binding.node_id, "a");
    assert_eq!(binding.node_name, "a-host");
    assert_eq!(h.store.get_node("a").unwrap().unwrap().pod_count, 1);
    assert_eq!(h.store.get_node("b").unwrap().unwrap().pod_count, 0);
}

#[tokio::test]
async fn scenario_b_only_node_overloaded() {
    let h = harness(&[node("c", 96.0, false)]).await;
    let mut s = WorkloadSpec::default();
    s.resources.requests.cpu = Some(Quantity::Number(1.0));
    admit(&h.store, "w", &s);

    let err = h.engine.schedule_one("w", &s).await.unwrap_err();
    match err {
        SchedulerError::PredicateFailure { rejections } => assert_eq!(
            rejections,
            vec![("c".to_string(), PredicateRejection::CpuPressure { usage_percent: 96.0 })]
        ),
        other => panic!("expected predicate failure, got {other:?}"),
    }
    let record = h.store.get_workload("w").unwrap().unwrap();
    assert_eq!(record.status, WorkloadStatus::Pending);
}

#[tokio::test]
async fn scenario_c_image_locality_adds_exactly_fifty() {
    let mut d = node("d", 20.0, false);
    d.cached_images = vec!["registry/app:2".to_string()];
    let e = node("e", 20.0, false);
    let h = harness(&[e, d]).await;

    let mut s = WorkloadSpec::default();
    s.containers.push(ContainerSpec { image: "registry/app:2".to_string(), ..Default::default() });
    admit(&h.store, "w", &s);

    let scorer = NodeScorer::default();
    let d_snap = h.cache.snapshot("d").await.unwrap();
    let e_snap = h.cache.snapshot("e").await.unwrap();
    assert_eq!(scorer.score(&d_snap, &s) - scorer.score(&e_snap, &s), 50.0);

    let binding = h.engine.schedule_one("w", &s).await.unwrap();
    assert_eq!(binding.node_id, "d");
}
