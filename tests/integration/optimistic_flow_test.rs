//! Optimistic flow tests
//!
//! Dispatches mutations through the data client and checks what subscribers
//! and readers observe while and after the real call settles.

use crate::common::*;
use assert_matches::assert_matches;
use crate::{assert_err, assert_ok};
use mealsync::client::offline::{DispatchOutcome, Mutation};
use mealsync::shared::{
    DataError, DedupPolicy, EntityFamily, EntityId, EventType, RollbackReason, UpdateEvent,
    UpdateStatus,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_rename_conflict_restores_original() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    for name in ["Soup", "Stew", "Salad", "Pie", "Curry", "Tart", "Old Name"] {
        seed(local.as_ref(), EntityFamily::Recipes, recipe(name)).await;
    }
    let id = EntityId::from_local(7);
    let before = assert_ok!(client.get_by_id(EntityFamily::Recipes, &id).await).unwrap();
    assert_eq!(before.text("name"), Some("Old Name"));

    local.inject_failure(DataError::backend(409, "name already taken"));
    let mut rx = client.subscribe();
    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(
                EntityFamily::Recipes,
                Mutation::Update { id: id.clone(), changes: json!({"name": "New Name"}) },
            )
            .await
    );

    // Created is published before the backend is consulted.
    let created = rx.try_recv().expect("created event");
    assert_eq!(created.event_type(), EventType::Created);
    assert_eq!(created.update().optimistic.as_ref().and_then(|e| e.text("name")), Some("New Name"));
    assert_eq!(created.update().original.as_ref().and_then(|e| e.text("name")), Some("Old Name"));

    let outcome = dispatch.handle.settled().await;
    assert_matches!(outcome, DispatchOutcome::Failed(DataError::Backend { status: 409, .. }));

    let events = drain_events(&mut rx);
    let types: Vec<EventType> = events.iter().map(UpdateEvent::event_type).collect();
    assert_eq!(types, vec![EventType::Failed, EventType::RolledBack]);
    let rolled_back = events[1].update();
    assert_eq!(rolled_back.status, UpdateStatus::RolledBack);
    assert_eq!(rolled_back.original.as_ref().and_then(|e| e.text("name")), Some("Old Name"));
    assert_eq!(
        rolled_back.failure.as_ref().map(|f| f.reason),
        Some(RollbackReason::ServiceError)
    );

    let after = assert_ok!(client.get_by_id(EntityFamily::Recipes, &id).await).unwrap();
    assert_eq!(after.text("name"), Some("Old Name"));
    assert!(client.manager().pending_updates().await.is_empty());
}

#[tokio::test]
async fn test_successful_update_reconciles_reads() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    seed(local.as_ref(), EntityFamily::ShoppingItems, shopping_item("milk")).await;
    let id = EntityId::from_local(1);
    assert_ok!(client.get_all(EntityFamily::ShoppingItems).await);

    let mut rx = client.subscribe();
    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(
                EntityFamily::ShoppingItems,
                Mutation::Update { id: id.clone(), changes: json!({"isChecked": "yes"}) },
            )
            .await
    );
    assert_eq!(dispatch.entity.as_ref().and_then(|e| e.flag("checked")), Some(true));
    assert_eq!(dispatch.entity.as_ref().and_then(|e| e.text("name")), Some("milk"));

    let DispatchOutcome::Succeeded(Some(actual)) = dispatch.handle.settled().await else {
        panic!("update should succeed");
    };
    assert_eq!(actual.flag("checked"), Some(true));
    assert_events(&mut rx, &[EventType::Created, EventType::Success]);

    let checked = assert_ok!(client.find_by(EntityFamily::ShoppingItems, "checked", &json!(true)).await);
    assert_eq!(checked.len(), 1);
    assert_eq!(client.manager().history().await.len(), 1);
}

#[tokio::test]
async fn test_invalid_payload_never_creates_update() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    let mut rx = client.subscribe();

    assert_err!(
        client
            .dispatch_optimistic(EntityFamily::MealHistory, Mutation::Create(json!({"recipeName": "Dal"})))
            .await,
        DataError::Validation { .. }
    );
    assert_err!(
        client
            .dispatch_optimistic(
                EntityFamily::Recipes,
                Mutation::Update { id: EntityId::from_local(1), changes: json!({"name": "  "}) },
            )
            .await,
        DataError::Validation { .. }
    );

    assert!(drain_events(&mut rx).is_empty());
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_delete_hides_entity_until_settled() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    seed(local.as_ref(), EntityFamily::Recipes, recipe("Soup")).await;
    let id = EntityId::from_local(1);
    assert_ok!(client.get_all(EntityFamily::Recipes).await);

    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Delete { id: id.clone() })
            .await
    );
    assert!(dispatch.entity.is_none());
    assert_eq!(dispatch.update.original.as_ref().and_then(|e| e.text("name")), Some("Soup"));

    assert_eq!(dispatch.handle.settled().await, DispatchOutcome::Succeeded(None));
    assert!(assert_ok!(client.get_all(EntityFamily::Recipes).await).is_empty());
    assert!(client.snapshot(EntityFamily::Recipes, &id).is_none());
}

#[tokio::test]
async fn test_update_without_snapshot_reads_full_entity() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    seed(local.as_ref(), EntityFamily::Recipes, recipe("Soup")).await;
    let id = EntityId::from_local(1);
    local.set_delay(Duration::from_millis(200));

    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(
                EntityFamily::Recipes,
                Mutation::Update { id: id.clone(), changes: json!({"servings": 6}) },
            )
            .await
    );
    assert!(dispatch.update.original.is_none());

    // The write is in flight; reads go straight through.
    tokio::task::yield_now().await;
    local.set_delay(Duration::ZERO);

    let pending = assert_ok!(client.get_by_id(EntityFamily::Recipes, &id).await)
        .expect("entity visible while the update is pending");
    assert_eq!(pending.id, Some(id.clone()));
    assert_eq!(pending.text("name"), Some("Soup"));
    assert_eq!(pending.list("tags"), vec!["dinner"]);
    assert_eq!(pending.get("ingredients"), Some(&json!([])));
    assert_eq!(pending.number("prep_time"), Some(10.0));
    assert_eq!(pending.flag("favorite"), Some(false));
    assert_eq!(pending.number("servings"), Some(6.0));
    assert!(pending.created_at.is_some());

    let listed = assert_ok!(client.get_all(EntityFamily::Recipes).await);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].fields, pending.fields);

    let found = assert_ok!(client.find_by(EntityFamily::Recipes, "name", &json!("Soup")).await);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].number("servings"), Some(6.0));

    assert_matches!(dispatch.handle.settled().await, DispatchOutcome::Succeeded(Some(_)));
    let stored = assert_ok!(client.get_by_id(EntityFamily::Recipes, &id).await).unwrap();
    assert_eq!(stored.fields, pending.fields);
}

#[tokio::test]
async fn test_overlapping_updates_stack_in_dispatch_order() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    seed(local.as_ref(), EntityFamily::Recipes, recipe("Soup")).await;
    let id = EntityId::from_local(1);
    assert_ok!(client.get_all(EntityFamily::Recipes).await);
    local.set_delay(Duration::from_millis(200));

    let rename = assert_ok!(
        client
            .dispatch_optimistic(
                EntityFamily::Recipes,
                Mutation::Update { id: id.clone(), changes: json!({"name": "Broth"}) },
            )
            .await
    );
    let resize = assert_ok!(
        client
            .dispatch_optimistic(
                EntityFamily::Recipes,
                Mutation::Update { id: id.clone(), changes: json!({"servings": 6}) },
            )
            .await
    );
    let speculative = resize.entity.clone().expect("speculative value");
    assert_eq!(speculative.text("name"), Some("Broth"));
    assert_eq!(speculative.number("servings"), Some(6.0));
    assert_eq!(speculative.list("tags"), vec!["dinner"]);
    assert_eq!(resize.update.original.as_ref().and_then(|e| e.text("name")), Some("Soup"));

    tokio::task::yield_now().await;
    local.set_delay(Duration::ZERO);

    let seen = assert_ok!(client.get_by_id(EntityFamily::Recipes, &id).await).unwrap();
    assert_eq!(seen.text("name"), Some("Broth"));
    assert_eq!(seen.number("servings"), Some(6.0));
    assert_eq!(seen.number("prep_time"), Some(10.0));

    let listed = assert_ok!(client.get_all(EntityFamily::Recipes).await);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].fields, seen.fields);

    assert_matches!(rename.handle.settled().await, DispatchOutcome::Succeeded(Some(_)));
    assert_matches!(resize.handle.settled().await, DispatchOutcome::Succeeded(Some(_)));
    let stored = assert_ok!(client.get_by_id(EntityFamily::Recipes, &id).await).unwrap();
    assert_eq!(stored.fields, seen.fields);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_deadline_wins_over_slow_backend() {
    let manager = mealsync::client::offline::ManagerConfig {
        rollback_timeout: Duration::from_secs(1),
        ..fast_manager_config()
    };
    let (client, local) = memory_client(manager, DedupPolicy::Join);
    local.set_delay(Duration::from_secs(10));

    let mut rx = client.subscribe();
    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(recipe("Slow Soup")))
            .await
    );

    assert_eq!(dispatch.handle.settled().await, DispatchOutcome::Expired);
    let events = drain_events(&mut rx);
    let types: Vec<EventType> = events.iter().map(UpdateEvent::event_type).collect();
    assert_eq!(types, vec![EventType::Created, EventType::RolledBack]);
    assert_eq!(
        events[1].update().failure.as_ref().map(|f| f.reason),
        Some(RollbackReason::Timeout)
    );
}

#[tokio::test(start_paused = true)]
async fn test_network_errors_exhaust_retries() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    for _ in 0..3 {
        local.inject_failure(DataError::Network("connection reset".into()));
    }

    let mut rx = client.subscribe();
    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::ShoppingItems, Mutation::Create(shopping_item("eggs")))
            .await
    );

    let outcome = dispatch.handle.settled().await;
    assert_matches!(outcome, DispatchOutcome::Failed(DataError::Network(_)));
    assert_events(
        &mut rx,
        &[
            EventType::Created,
            EventType::Retrying,
            EventType::Retrying,
            EventType::Failed,
            EventType::RolledBack,
        ],
    );
    assert_eq!(local.call_count(), 3);
    assert!(local.is_empty(EntityFamily::ShoppingItems));
}

#[tokio::test(start_paused = true)]
async fn test_identical_updates_join_one_call() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    seed(local.as_ref(), EntityFamily::Recipes, recipe("Soup")).await;
    local.set_delay(Duration::from_millis(500));
    let calls_before = local.call_count();

    let update = || Mutation::Update { id: EntityId::from_local(1), changes: json!({"favorite": true}) };
    let first = assert_ok!(client.dispatch_optimistic(EntityFamily::Recipes, update()).await);
    let second = assert_ok!(client.dispatch_optimistic(EntityFamily::Recipes, update()).await);
    assert_ne!(first.update.id, second.update.id);

    assert_matches!(first.handle.settled().await, DispatchOutcome::Succeeded(Some(_)));
    assert_matches!(second.handle.settled().await, DispatchOutcome::Succeeded(Some(_)));
    assert_eq!(local.call_count() - calls_before, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_rejected_synchronously() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Reject);
    seed(local.as_ref(), EntityFamily::Recipes, recipe("Soup")).await;
    local.set_delay(Duration::from_millis(500));

    let mut rx = client.subscribe();
    let update = || Mutation::Update { id: EntityId::from_local(1), changes: json!({"rating": 5}) };
    let first = assert_ok!(client.dispatch_optimistic(EntityFamily::Recipes, update()).await);
    assert_err!(
        client.dispatch_optimistic(EntityFamily::Recipes, update()).await,
        DataError::DuplicateRequest(_)
    );
    assert_events(&mut rx, &[EventType::Created]);

    assert_matches!(first.handle.settled().await, DispatchOutcome::Succeeded(_));
    // Once settled the same mutation is accepted again.
    let again = assert_ok!(client.dispatch_optimistic(EntityFamily::Recipes, update()).await);
    assert_matches!(again.handle.settled().await, DispatchOutcome::Succeeded(_));
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_rolls_back_children() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    local.set_delay(Duration::from_secs(5));
    let view = CancellationToken::new();

    let mut rx = client.subscribe();
    let first = assert_ok!(
        client
            .dispatch_optimistic_scoped(EntityFamily::Recipes, Mutation::Create(recipe("A")), &view)
            .await
    );
    let second = assert_ok!(
        client
            .dispatch_optimistic_scoped(EntityFamily::Recipes, Mutation::Create(recipe("B")), &view)
            .await
    );
    view.cancel();

    assert_eq!(first.handle.settled().await, DispatchOutcome::Cancelled);
    assert_eq!(second.handle.settled().await, DispatchOutcome::Cancelled);
    let types = drain_event_types(&mut rx);
    assert_eq!(types.iter().filter(|t| **t == EventType::RolledBack).count(), 2);
    assert!(client.manager().pending_updates().await.is_empty());
}

#[tokio::test]
async fn test_listener_sees_events_until_unsubscribed() {
    let (client, _local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let subscription = client.add_listener(move |_event| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(recipe("Soup")))
            .await
    );
    dispatch.handle.settled().await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    subscription.unsubscribe();
    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(recipe("Stew")))
            .await
    );
    dispatch.handle.settled().await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panicking_listener_does_not_block_others() {
    let (client, _local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    let _bad = client.add_listener(|_event| panic!("listener bug"));
    let mut rx = client.subscribe();

    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(recipe("Soup")))
            .await
    );
    assert_matches!(dispatch.handle.settled().await, DispatchOutcome::Succeeded(_));
    assert_events(&mut rx, &[EventType::Created, EventType::Success]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_in_flight_work() {
    let (client, local) = memory_client(fast_manager_config(), DedupPolicy::Join);
    local.set_delay(Duration::from_secs(5));

    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(recipe("Soup")))
            .await
    );
    client.shutdown().await;

    assert_eq!(dispatch.handle.settled().await, DispatchOutcome::Cancelled);
    assert!(client.manager().pending_updates().await.is_empty());
    assert_err!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(recipe("Stew")))
            .await,
        DataError::Cancelled
    );
}
