//! Assignment integration tests.
//!
//! Placement spread, idempotence, preferred nodes, the least-loaded
//! fallback and concurrent callers racing on one instrument.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use signalgrid_cluster::Heartbeat;
use signalgrid_coordinator::CoordinatorError;

#[tokio::test]
async fn three_equal_nodes_share_250_instruments() {
    let c = coordinator();
    for id in ["A", "B", "C"] {
        assert!(c.register_node(id, 100).await.unwrap());
    }

    for key in instruments(250) {
        c.assign(&key, None).await.unwrap();
    }

    for id in ["A", "B", "C"] {
        let load = c.registry().get(id).unwrap().current_load;
        assert!((70..=100).contains(&load), "{id} has load {load}");
    }
    assert_eq!(c.assignment_count(), 250);
}

#[tokio::test]
async fn assign_is_idempotent() {
    let c = coordinator();
    for id in ["A", "B", "C"] {
        c.register_node(id, 100).await.unwrap();
    }

    for key in instruments(50) {
        let first = c.assign(&key, None).await.unwrap();
        let second = c.assign(&key, None).await.unwrap();
        assert_eq!(first, second, "{key} moved without a topology change");
    }
    let total: u32 = c.registry().list().iter().map(|n| n.current_load).sum();
    assert_eq!(total, 50);
}

#[tokio::test]
async fn load_always_matches_assignments() {
    let c = coordinator();
    for id in ["A", "B", "C"] {
        c.register_node(id, 40).await.unwrap();
    }
    for key in instruments(90) {
        c.assign(&key, None).await.unwrap();
    }
    c.unregister_node("B").await.unwrap();

    let mut per_node: HashMap<String, u32> = HashMap::new();
    for owner in c.assignments().values() {
        *per_node.entry(owner.clone()).or_default() += 1;
    }
    for node in c.registry().list() {
        assert_eq!(node.current_load as usize, node.assigned().len());
        assert_eq!(node.current_load, per_node.get(&node.node_id).copied().unwrap_or(0));
    }
}

#[tokio::test]
async fn preferred_node_is_honoured_when_registered() {
    let c = coordinator();
    c.register_node("A", 100).await.unwrap();
    c.register_node("B", 100).await.unwrap();

    assert_eq!(c.assign("AAPL", Some("B")).await.unwrap(), "B");
    // An existing live assignment beats the preference.
    assert_eq!(c.assign("AAPL", Some("A")).await.unwrap(), "B");

    // Unknown preferences fall back to the ring.
    let owner = c.assign("MSFT", Some("nope")).await.unwrap();
    assert!(owner == "A" || owner == "B");
}

#[tokio::test]
async fn overloaded_ring_owner_falls_back_to_ready_node() {
    let mut config = test_config();
    config.assignment.candidate_count = 1;
    let c = coordinator_on(
        Arc::new(signalgrid_state::StateStore::open_in_memory().unwrap()),
        config,
    );
    c.register_node("A", 100).await.unwrap();
    c.register_node("B", 100).await.unwrap();
    c.heartbeat(
        "A",
        Heartbeat {
            cpu_usage: 0.95,
            memory_usage: 0.2,
            computation_rate: 0.0,
        },
    )
    .unwrap();

    let keys = instruments(20);
    let a_owned = keys
        .iter()
        .filter(|k| c.ring().node_for(k).as_deref() == Some("A"))
        .count();
    assert!(a_owned > 0);

    for key in &keys {
        assert_eq!(c.assign(key, None).await.unwrap(), "B");
    }
}

#[tokio::test]
async fn saturated_candidates_fall_back_cluster_wide() {
    let mut config = test_config();
    config.assignment.candidate_count = 1;
    let c = coordinator_on(
        Arc::new(signalgrid_state::StateStore::open_in_memory().unwrap()),
        config,
    );
    c.register_node("A", 1).await.unwrap();
    c.register_node("B", 1).await.unwrap();
    c.register_node("C", 1000).await.unwrap();

    // Fill A and B to ratio 1.0.
    c.update_assignment("fill-a", "A").await.unwrap();
    c.update_assignment("fill-b", "B").await.unwrap();

    for key in instruments(30) {
        assert_eq!(c.assign(&key, None).await.unwrap(), "C");
    }
}

#[tokio::test]
async fn no_ready_node_is_an_error() {
    let c = coordinator();
    assert!(matches!(
        c.assign("AAPL", None).await,
        Err(CoordinatorError::NoAvailableNode(_))
    ));

    c.register_node("A", 10).await.unwrap();
    c.drain_node("A").await.unwrap();
    assert!(matches!(
        c.assign("AAPL", None).await,
        Err(CoordinatorError::NoAvailableNode(_))
    ));
    assert!(c.owner_of("AAPL").is_none());
}

#[tokio::test]
async fn reassign_never_picks_excluded_node() {
    let c = coordinator();
    for id in ["A", "B", "C"] {
        c.register_node(id, 100).await.unwrap();
    }
    for key in instruments(30) {
        let owner = c.assign(&key, None).await.unwrap();
        let moved = c.reassign(&key, &[owner.as_str()]).await.unwrap();
        assert_ne!(moved, owner);
        assert_eq!(c.owner_of(&key), Some(moved));
    }
}

#[tokio::test]
async fn concurrent_assigns_agree_on_one_owner() {
    let c = Arc::new(coordinator());
    for id in ["A", "B", "C"] {
        c.register_node(id, 100).await.unwrap();
    }

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.assign("NVDA", None).await.unwrap() })
        })
        .collect();
    let mut owners = Vec::new();
    for h in handles {
        owners.push(h.await.unwrap());
    }

    owners.dedup();
    assert_eq!(owners.len(), 1);
    let total: u32 = c.registry().list().iter().map(|n| n.current_load).sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn should_handle_matches_owner() {
    let c = coordinator();
    c.register_node("A", 100).await.unwrap();
    c.register_node("B", 100).await.unwrap();

    let owner = c.assign("TSLA", None).await.unwrap();
    let other = if owner == "A" { "B" } else { "A" };
    assert!(c.should_handle("TSLA", &owner).await.unwrap());
    assert!(!c.should_handle("TSLA", other).await.unwrap());
    assert!(!c.should_handle("TSLA", "ghost").await.unwrap());
}
