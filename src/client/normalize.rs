//! # Entity Normalizer
//!
//! Coerces raw entity payloads into one canonical shape regardless of which
//! backend produced them. The embedded store historically wrote camelCase
//! keys while the remote store uses snake_case columns; both fold into the
//! snake_case names declared in each family's field table.
//!
//! ## Rules
//!
//! - **Lists** always become an ordered sequence of strings, never null
//! - **Numbers** are positive or explicitly unset (`null`)
//! - **Text** is trimmed; required text must be non-empty
//! - **Flags** become booleans
//!
//! Normalization is pure and idempotent: normalizing an already normalized
//! entity returns it unchanged.
//!
//! ## Usage
//!
//! ```rust
//! use mealsync::client::normalize::{normalize, validate};
//! use mealsync::shared::entity::EntityFamily;
//! use serde_json::json;
//!
//! let recipe = normalize(EntityFamily::Recipes, &json!({
//!     "name": "  Dal  ",
//!     "prepTime": "15",
//!     "tags": null,
//! })).unwrap();
//!
//! assert_eq!(recipe.text("name"), Some("Dal"));
//! assert_eq!(recipe.number("prep_time"), Some(15.0));
//! assert!(recipe.list("tags").is_empty());
//!
//! let report = validate(EntityFamily::Recipes, &json!({"name": ""}));
//! assert!(!report.valid);
//! ```

use crate::shared::entity::{Entity, EntityFamily, EntityId, Record};
use crate::shared::error::DataError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};

/// Largest magnitude stored as an integer without losing precision
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Backend bookkeeping keys that never reach an entity
const BOOKKEEPING_KEYS: &[&str] = &["user_id", "userId"];

/// How a field is coerced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Trimmed string; `required` rejects empty values
    Text { required: bool },
    /// Ordered sequence of strings
    List,
    /// Positive number or `null`
    Number,
    /// Boolean
    Flag,
}

/// One entry of a family's field table
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Canonical snake_case key
    pub name: &'static str,
    /// Alternative keys folded into `name`
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
}

const fn text(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, aliases, kind: FieldKind::Text { required: false } }
}

const fn required(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, aliases, kind: FieldKind::Text { required: true } }
}

const fn list(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, aliases, kind: FieldKind::List }
}

const fn number(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, aliases, kind: FieldKind::Number }
}

const fn flag(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, aliases, kind: FieldKind::Flag }
}

const RECIPE_FIELDS: &[FieldSpec] = &[
    required("name", &["title"]),
    text("description", &[]),
    text("source_url", &["sourceUrl", "url"]),
    text("notes", &[]),
    list("tags", &[]),
    list("ingredients", &[]),
    list("instructions", &["steps"]),
    number("prep_time", &["prepTime"]),
    number("cook_time", &["cookTime"]),
    number("servings", &[]),
    number("rating", &[]),
    flag("favorite", &["isFavorite"]),
];

const PLAN_FIELDS: &[FieldSpec] = &[
    required("week_start", &["weekStart", "week_start_date"]),
    text("title", &["name"]),
    text("notes", &[]),
    list("recipe_ids", &["recipeIds"]),
    list("days", &[]),
    number("servings", &[]),
];

const HISTORY_FIELDS: &[FieldSpec] = &[
    required("recipe_name", &["recipeName"]),
    required("date", &["cookedAt", "cooked_at"]),
    text("recipe_id", &["recipeId"]),
    text("notes", &[]),
    list("tags", &[]),
    number("servings", &[]),
    number("rating", &[]),
];

const SHOPPING_FIELDS: &[FieldSpec] = &[
    required("name", &[]),
    text("quantity", &[]),
    text("category", &[]),
    text("unit", &[]),
    list("recipe_ids", &["recipeIds"]),
    number("amount", &[]),
    flag("checked", &["isChecked", "done"]),
];

/// Field table of a family
pub fn schema(family: EntityFamily) -> &'static [FieldSpec] {
    match family {
        EntityFamily::Recipes => RECIPE_FIELDS,
        EntityFamily::WeeklyPlans => PLAN_FIELDS,
        EntityFamily::MealHistory => HISTORY_FIELDS,
        EntityFamily::ShoppingItems => SHOPPING_FIELDS,
    }
}

/// Fields the embedded store keeps an index on
pub fn indexed_fields(family: EntityFamily) -> &'static [&'static str] {
    match family {
        EntityFamily::Recipes => &["name", "favorite"],
        EntityFamily::WeeklyPlans => &["week_start"],
        EntityFamily::MealHistory => &["date", "recipe_id"],
        EntityFamily::ShoppingItems => &["checked", "category"],
    }
}

/// Outcome of [`validate`]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    /// Normalized payload; only present when `valid`
    pub data: Option<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Full entity, required fields enforced
    Strict,
    /// Full entity, never fails
    Lenient,
    /// Only present fields, present required fields enforced
    Patch,
}

/// Normalize a full payload, enforcing required fields
pub fn normalize(family: EntityFamily, raw: &Value) -> Result<Entity, DataError> {
    let (entity, errors) = normalize_with(family, raw, Mode::Strict);
    if errors.is_empty() {
        Ok(entity)
    } else {
        Err(DataError::Validation { family, errors })
    }
}

/// Normalize a stored row; total, used on every read
pub fn normalize_lenient(family: EntityFamily, raw: &Value) -> Entity {
    normalize_with(family, raw, Mode::Lenient).0
}

/// Normalize a backend record; total, used on every read
pub fn normalize_record(family: EntityFamily, record: Record) -> Entity {
    normalize_lenient(family, &Value::Object(record))
}

/// Normalize a partial update; only the fields present are touched
pub fn normalize_patch(family: EntityFamily, raw: &Value) -> Result<Entity, DataError> {
    let (entity, errors) = normalize_with(family, raw, Mode::Patch);
    if errors.is_empty() {
        Ok(entity)
    } else {
        Err(DataError::Validation { family, errors })
    }
}

/// Validate a full payload and return its normalized form
pub fn validate(family: EntityFamily, raw: &Value) -> ValidationReport {
    let (entity, errors) = normalize_with(family, raw, Mode::Strict);
    if errors.is_empty() {
        ValidationReport {
            valid: true,
            errors,
            data: Some(entity),
        }
    } else {
        ValidationReport {
            valid: false,
            errors,
            data: None,
        }
    }
}

fn normalize_with(family: EntityFamily, raw: &Value, mode: Mode) -> (Entity, Vec<String>) {
    let mut fields: Map<String, Value> = match raw {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let mut errors = Vec::new();

    let id = fields.remove("id").and_then(|value| coerce_id(&value));
    let created_at = take_first(&mut fields, "created_at", &["createdAt"])
        .and_then(|value| coerce_timestamp(&value));
    let updated_at = take_first(&mut fields, "updated_at", &["updatedAt"])
        .and_then(|value| coerce_timestamp(&value));
    for key in BOOKKEEPING_KEYS {
        fields.remove(*key);
    }

    for spec in schema(family) {
        let value = take_first(&mut fields, spec.name, spec.aliases);
        if value.is_none() && mode == Mode::Patch {
            continue;
        }
        let value = value.unwrap_or(Value::Null);

        let coerced = match spec.kind {
            FieldKind::Text { required } => {
                let text = coerce_text(&value);
                if required && text.is_empty() && mode != Mode::Lenient {
                    errors.push(format!("{} is required", spec.name));
                }
                Value::String(text)
            }
            FieldKind::List => Value::Array(coerce_list(&value)),
            FieldKind::Number => coerce_number(&value),
            FieldKind::Flag => Value::Bool(coerce_flag(&value)),
        };
        fields.insert(spec.name.to_string(), coerced);
    }

    let entity = Entity {
        id,
        created_at,
        updated_at,
        fields,
    };
    (entity, errors)
}

/// Remove the canonical key and its aliases, returning the first present
fn take_first(fields: &mut Map<String, Value>, name: &str, aliases: &[&str]) -> Option<Value> {
    let mut found = fields.remove(name);
    for alias in aliases {
        let aliased = fields.remove(*alias);
        if found.is_none() {
            found = aliased;
        }
    }
    found
}

fn coerce_id(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(EntityId::new(s.trim())),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(rowid), _, _) => EntityId::from_local(rowid),
            (None, Some(big), _) => EntityId::new(big.to_string()),
            (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                EntityId::from_local(f as i64)
            }
            _ => EntityId::new(n.to_string()),
        }),
        _ => None,
    }
}

fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                })
        }
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn coerce_list(value: &Value) -> Vec<Value> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
            }
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        })
        .collect()
}

fn coerce_number(value: &Value) -> Value {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() && n > 0.0 => canonical_number(n),
        _ => Value::Null,
    }
}

fn canonical_number(n: f64) -> Value {
    if n.fract() == 0.0 && n <= MAX_EXACT_INTEGER {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn coerce_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1" | "on"
        ),
        _ => false,
    }
}
