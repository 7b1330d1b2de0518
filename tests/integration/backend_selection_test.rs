//! Backend selection tests
//!
//! The store serving each call follows remote configuration and the
//! session's authentication state at the moment the call is made.

use crate::assert_ok;
use crate::common::*;
use assert_matches::assert_matches;
use mealsync::client::auth::AuthSession;
use mealsync::client::backend::{select_backend, BackendKind};
use mealsync::client::offline::{DispatchOutcome, Mutation};
use mealsync::shared::{EntityFamily, EntityId};

#[test]
fn test_selection_truth_table() {
    assert_eq!(select_backend(true, true), BackendKind::Remote);
    assert_eq!(select_backend(true, false), BackendKind::Local);
    assert_eq!(select_backend(false, true), BackendKind::Local);
    assert_eq!(select_backend(false, false), BackendKind::Local);
}

#[tokio::test]
async fn test_signed_in_writes_go_remote() {
    let (client, local, remote) = dual_client(signed_in_session());
    assert_eq!(client.backend_kind(), BackendKind::Remote);
    assert_eq!(client.resolve_backend(EntityFamily::Recipes).kind(), BackendKind::Remote);

    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(EntityFamily::Recipes, Mutation::Create(recipe("Soup")))
            .await
    );
    assert_matches!(dispatch.handle.settled().await, DispatchOutcome::Succeeded(Some(_)));

    assert_eq!(remote.len(EntityFamily::Recipes), 1);
    assert!(local.is_empty(EntityFamily::Recipes));
}

#[tokio::test]
async fn test_selection_is_reevaluated_per_call() {
    let session = AuthSession::new();
    let (client, local, remote) = dual_client(session.clone());
    seed(remote.as_ref(), EntityFamily::Recipes, recipe("Remote Soup")).await;
    seed(local.as_ref(), EntityFamily::Recipes, recipe("Local Stew")).await;

    let names = |entities: Vec<mealsync::shared::Entity>| -> Vec<String> {
        entities
            .iter()
            .filter_map(|e| e.text("name").map(str::to_string))
            .collect()
    };

    assert_eq!(names(assert_ok!(client.get_all(EntityFamily::Recipes).await)), vec!["Local Stew"]);

    session.sign_in(signed_in_session().current_user().unwrap());
    assert_eq!(names(assert_ok!(client.get_all(EntityFamily::Recipes).await)), vec!["Remote Soup"]);

    session.sign_out();
    assert_eq!(names(assert_ok!(client.get_all(EntityFamily::Recipes).await)), vec!["Local Stew"]);
}

#[tokio::test]
async fn test_disabling_remote_falls_back_to_local() {
    let (client, local, remote) = dual_client(signed_in_session());
    client.selector().set_remote_enabled(false);
    assert!(!client.selector().remote_configured());
    assert_eq!(client.backend_kind(), BackendKind::Local);

    let stored = assert_ok!(
        client
            .bulk_add(EntityFamily::ShoppingItems, &[shopping_item("milk"), shopping_item("eggs")])
            .await
    );
    assert_eq!(stored.len(), 2);
    assert_eq!(local.len(EntityFamily::ShoppingItems), 2);
    assert!(remote.is_empty(EntityFamily::ShoppingItems));

    client.selector().set_remote_enabled(true);
    assert_eq!(client.backend_kind(), BackendKind::Remote);
    assert_eq!(
        assert_ok!(client.get_by_id(EntityFamily::ShoppingItems, &EntityId::from_local(1)).await),
        None
    );
}

#[tokio::test]
async fn test_reads_are_normalized_from_either_store() {
    let (client, _local, remote) = dual_client(signed_in_session());
    seed(
        remote.as_ref(),
        EntityFamily::Recipes,
        serde_json::json!({"title": " Dal ", "prepTime": "0", "tags": null, "isFavorite": 1}),
    )
    .await;

    let recipes = assert_ok!(client.get_all(EntityFamily::Recipes).await);
    assert_eq!(recipes.len(), 1);
    let dal = &recipes[0];
    assert_eq!(dal.text("name"), Some("Dal"));
    assert_eq!(dal.get("prep_time"), Some(&serde_json::Value::Null));
    assert!(dal.list("tags").is_empty());
    assert_eq!(dal.flag("favorite"), Some(true));
    assert!(dal.get("title").is_none());
}
