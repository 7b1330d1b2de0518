//! Local database tests
//!
//! File-backed SQLite store: persistence across reopen, migrations, indexed
//! lookups and the full data client stack on top of it.

use crate::assert_ok;
use crate::common::*;
use mealsync::client::auth::AuthSession;
use mealsync::client::backend::{Backend, BackendKind};
use mealsync::client::config::Config;
use mealsync::client::local_db::schema::CURRENT_SCHEMA_VERSION;
use mealsync::client::local_db::LocalDatabase;
use mealsync::client::offline::{DataClient, DispatchOutcome, Mutation};
use mealsync::shared::{AppConfig, EntityFamily, EntityId, UpdateStatus};
use serde_json::json;
use sqlx::Row;
use std::time::Duration;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> Config {
    let app = AppConfig::builder()
        .local_db_path(dir.path().join("nested").join("meals.db"))
        .success_grace(Duration::ZERO)
        .build()
        .unwrap();
    Config::from_app(app).unwrap()
}

#[tokio::test]
async fn test_file_database_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meals.db");

    let db = assert_ok!(LocalDatabase::open(&path).await);
    seed(&db, EntityFamily::MealHistory, json!({"recipe_name": "Dal", "date": "2026-03-01"})).await;
    db.close().await;

    let reopened = assert_ok!(LocalDatabase::open(&path).await);
    assert_eq!(assert_ok!(reopened.schema_version().await), CURRENT_SCHEMA_VERSION);
    let rows = assert_ok!(reopened.get_all(EntityFamily::MealHistory).await);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("recipe_name"), Some(&json!("Dal")));

    let stats = assert_ok!(reopened.get_stats().await);
    assert_eq!(stats.count(EntityFamily::MealHistory), 1);
    assert_eq!(stats.total(), 1);
}

#[tokio::test]
async fn test_indexed_lookup_uses_expression_index() {
    let db = assert_ok!(LocalDatabase::in_memory().await);
    let plan = sqlx::query(
        "EXPLAIN QUERY PLAN SELECT id FROM recipes WHERE json_extract(data, '$.name') = ?",
    )
    .bind("Soup")
    .fetch_all(db.pool())
    .await
    .unwrap();

    let details: Vec<String> = plan.iter().map(|row| row.get::<String, _>("detail")).collect();
    assert!(
        details.iter().any(|detail| detail.contains("idx_recipes_name")),
        "plan did not use the index: {:?}",
        details
    );
}

#[tokio::test]
async fn test_client_over_file_database() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let client = assert_ok!(DataClient::open(&config, AuthSession::new()).await);
    assert_eq!(client.backend_kind(), BackendKind::Local);

    let dispatch = assert_ok!(
        client
            .dispatch_optimistic(
                EntityFamily::WeeklyPlans,
                Mutation::Create(json!({"weekStart": "2026-03-02", "recipeIds": [3, 7]})),
            )
            .await
    );
    let DispatchOutcome::Succeeded(Some(plan)) = dispatch.handle.settled().await else {
        panic!("plan should be stored");
    };
    let id = plan.id.clone().unwrap();
    assert_eq!(id, EntityId::from_local(1));
    assert_eq!(plan.list("recipe_ids"), vec!["3", "7"]);

    let found = assert_ok!(
        client
            .find_by(EntityFamily::WeeklyPlans, "week_start", &json!("2026-03-02"))
            .await
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, Some(id));

    let history = client.manager().history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, UpdateStatus::Success);
}

#[tokio::test]
async fn test_bulk_operations_on_file_database() {
    let dir = TempDir::new().unwrap();
    let client = assert_ok!(DataClient::open(&file_config(&dir), AuthSession::new()).await);

    let items: Vec<_> = ["milk", "eggs", "flour"].into_iter().map(shopping_item).collect();
    let stored = assert_ok!(client.bulk_add(EntityFamily::ShoppingItems, &items).await);
    assert_eq!(stored.len(), 3);

    let ids: Vec<EntityId> = stored.iter().filter_map(|e| e.id.clone()).take(2).collect();
    assert_eq!(assert_ok!(client.bulk_delete(EntityFamily::ShoppingItems, &ids).await), 2);
    assert_eq!(assert_ok!(client.clear_family(EntityFamily::ShoppingItems).await), 1);
    assert!(assert_ok!(client.get_all(EntityFamily::ShoppingItems).await).is_empty());
}
