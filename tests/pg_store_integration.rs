//! Integration tests for the Postgres entity store and attribution rebinder
//!
//! Requires: DATABASE_URL environment variable and `database` feature

#![cfg(feature = "database")]

use serde_json::json;
use std::sync::Arc;

use ministry_hierarchy::database::{DatabaseConfig, DatabaseManager};
use ministry_hierarchy::{
    EngineConfig, EntityStore, ErrorKind, HierarchyEngine, NodeDraft, NodeStatus, StoreTransaction,
    Tier,
};

/// Helper to get a manager over the test database, with the schema in place
async fn get_test_manager() -> DatabaseManager {
    let config = DatabaseConfig {
        database_url: std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests"),
        max_connections: 5,
        ..DatabaseConfig::default()
    };
    let manager = DatabaseManager::new(config)
        .await
        .expect("Failed to connect to test database");
    manager
        .initialize_schema()
        .await
        .expect("Failed to initialize schema");
    manager
}

fn engine(manager: &DatabaseManager) -> HierarchyEngine {
    HierarchyEngine::new(
        Arc::new(manager.entity_store()),
        Arc::new(manager.attribution_rebinder()),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn test_attach_and_read_back_full_chain() {
    let manager = get_test_manager().await;
    let engine = engine(&manager);

    let church = engine
        .attach(NodeDraft::new(Tier::Church, json!({"name": "Central"})), None)
        .await
        .expect("church");
    let pastor = engine
        .attach(NodeDraft::new(Tier::Pastor, json!({})), Some(church.id))
        .await
        .expect("pastor");
    let copastor = engine
        .attach(NodeDraft::new(Tier::Copastor, json!({})), Some(pastor.id))
        .await
        .expect("copastor");

    let stored = engine.get(copastor.id).await.expect("get");
    assert_eq!(stored.ancestors.church, Some(church.id));
    assert_eq!(stored.ancestors.pastor, Some(pastor.id));
    assert_eq!(stored.payload, json!({}));
}

#[tokio::test]
async fn test_partial_unique_index_backs_zone_rule() {
    let manager = get_test_manager().await;
    let engine = engine(&manager);

    let mut leader = engine
        .attach(NodeDraft::new(Tier::Church, json!({})), None)
        .await
        .expect("church");
    for tier in [Tier::Pastor, Tier::Copastor, Tier::Supervisor] {
        leader = engine
            .attach(NodeDraft::new(tier, json!({})), Some(leader.id))
            .await
            .expect("attach");
    }
    let zone = engine
        .attach(NodeDraft::new(Tier::Zone, json!({})), Some(leader.id))
        .await
        .expect("zone");

    let err = engine
        .attach(NodeDraft::new(Tier::Zone, json!({})), Some(leader.id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniquenessConflict);

    engine.deactivate(zone.id, "closed").await.expect("deactivate");
    engine
        .attach(NodeDraft::new(Tier::Zone, json!({})), Some(leader.id))
        .await
        .expect("inactive zone frees the slot");
}

#[tokio::test]
async fn test_subordinate_query_skips_deeper_rows() {
    let manager = get_test_manager().await;
    let engine = engine(&manager);

    let mut leader = engine
        .attach(NodeDraft::new(Tier::Church, json!({})), None)
        .await
        .expect("church");
    for tier in [Tier::Pastor, Tier::Copastor, Tier::Supervisor] {
        leader = engine
            .attach(NodeDraft::new(tier, json!({})), Some(leader.id))
            .await
            .expect("attach");
    }
    let zone = engine
        .attach(NodeDraft::new(Tier::Zone, json!({})), Some(leader.id))
        .await
        .expect("zone");
    engine
        .attach(NodeDraft::new(Tier::Preacher, json!({})), Some(zone.id))
        .await
        .expect("preacher");

    let mut tx = manager.entity_store().begin().await.expect("begin");
    let direct = tx
        .find_subordinates(Tier::Supervisor, leader.id, None, 10)
        .await
        .expect("subordinates");
    tx.rollback().await.expect("rollback");

    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].id, zone.id);
}

#[tokio::test]
async fn test_promotion_rebinds_offering_records() {
    let manager = get_test_manager().await;
    let engine = engine(&manager);
    let ledger = manager.attribution_rebinder();

    let church = engine
        .attach(NodeDraft::new(Tier::Church, json!({})), None)
        .await
        .expect("church");
    let pastor = engine
        .attach(NodeDraft::new(Tier::Pastor, json!({})), Some(church.id))
        .await
        .expect("pastor");
    let copastor = engine
        .attach(NodeDraft::new(Tier::Copastor, json!({})), Some(pastor.id))
        .await
        .expect("copastor");
    ledger.record(copastor.id, "tithe").await.expect("record");

    let promotion = engine
        .promote(copastor.id, Tier::Pastor, church.id)
        .await
        .expect("promote");

    assert_eq!(promotion.records_rebound, 1);
    assert_eq!(ledger.count_for(promotion.promoted.id).await.expect("count"), 1);
    assert_eq!(
        engine.get(copastor.id).await.expect("get").status,
        NodeStatus::Inactive
    );

    manager.close().await;
}
