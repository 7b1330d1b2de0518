//! Entity Types
//!
//! Domain-agnostic entity representation shared by every backend and by the
//! optimistic update layer.
//!
//! An [`Entity`] is a bag of named fields plus the three bookkeeping values
//! every stored row carries: an identifier, a creation timestamp and a
//! last-modified timestamp. Field shapes are canonicalised by
//! [`crate::client::normalize`]; this module only defines the containers.
//!
//! # Usage
//!
//! ```rust
//! use mealsync::shared::entity::{Entity, EntityFamily, EntityId};
//!
//! let mut recipe = Entity::new();
//! recipe.set("name", "Shakshuka");
//! recipe.id = Some(EntityId::from_local(7));
//!
//! assert_eq!(recipe.text("name"), Some("Shakshuka"));
//! assert_eq!(EntityFamily::Recipes.collection(), "recipes");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raw row exchanged with a backend before normalization
pub type Record = Map<String, Value>;

/// Prefix used for client-generated identifiers of not-yet-created entities
const TEMPORARY_PREFIX: &str = "tmp-";

/// Logical grouping of entities routed through backend selection independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityFamily {
    /// Recipes with ingredients and instructions
    Recipes,
    /// Weekly meal plans
    WeeklyPlans,
    /// Log of meals that were actually cooked
    MealHistory,
    /// Shopping-list items
    ShoppingItems,
}

impl EntityFamily {
    /// Every family, in a stable order
    pub const ALL: [EntityFamily; 4] = [
        EntityFamily::Recipes,
        EntityFamily::WeeklyPlans,
        EntityFamily::MealHistory,
        EntityFamily::ShoppingItems,
    ];

    /// Table / collection name used by both backends
    pub fn collection(&self) -> &'static str {
        match self {
            EntityFamily::Recipes => "recipes",
            EntityFamily::WeeklyPlans => "weekly_plans",
            EntityFamily::MealHistory => "meal_history",
            EntityFamily::ShoppingItems => "shopping_items",
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for EntityFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recipes" | "recipe" => Ok(EntityFamily::Recipes),
            "weekly_plans" | "plans" | "plan" => Ok(EntityFamily::WeeklyPlans),
            "meal_history" | "history" => Ok(EntityFamily::MealHistory),
            "shopping_items" | "shopping" | "shopping_list" => Ok(EntityFamily::ShoppingItems),
            other => Err(format!("unknown entity family: {}", other)),
        }
    }
}

/// Opaque entity identifier
///
/// Local ids are decimal renderings of the SQLite rowid, remote ids are
/// whatever the server assigned, and temporary ids (`tmp-<uuid>`) stand in
/// for entities that have not been created yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an identifier assigned by a backend
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for a row of the embedded store
    pub fn from_local(rowid: i64) -> Self {
        Self(rowid.to_string())
    }

    /// Fresh client-generated identifier for an entity being created
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMPORARY_PREFIX, Uuid::new_v4()))
    }

    /// Whether this id was generated on the client and never stored
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }

    /// Interpret the id as an embedded-store rowid
    pub fn as_local(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::from_local(value)
    }
}

/// A domain entity in canonical shape
///
/// Serialises as one flat JSON object: bookkeeping values sit next to the
/// domain fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Identifier, absent before a backend assigns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last-modified timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Domain fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Create an empty entity
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style identifier setter
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set a domain field
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Raw value of a domain field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of a domain field
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Numeric value of a domain field (`None` when unset)
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// Boolean value of a domain field
    pub fn flag(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }

    /// List value of a domain field; empty when absent
    pub fn list(&self, field: &str) -> Vec<&str> {
        match self.fields.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Overlay the fields of a partial entity onto this one
    ///
    /// Bookkeeping values from the patch win when present.
    pub fn apply_patch(&mut self, patch: &Entity) {
        for (key, value) in &patch.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        if patch.updated_at.is_some() {
            self.updated_at = patch.updated_at;
        }
        if patch.created_at.is_some() && self.created_at.is_none() {
            self.created_at = patch.created_at;
        }
    }

    /// Backend-facing record: domain fields plus timestamps, without the id
    pub fn to_record(&self) -> Record {
        let mut record = self.fields.clone();
        if let Some(created_at) = self.created_at {
            record.insert("created_at".to_string(), Value::String(created_at.to_rfc3339()));
        }
        if let Some(updated_at) = self.updated_at {
            record.insert("updated_at".to_string(), Value::String(updated_at.to_rfc3339()));
        }
        record
    }
}
