use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Object rows
// =============================================================================

/// Row key holding the object's instance id.
pub const SYSTEM_PROPERTY_INSTANCE_ID: &str = "_instance_id";
/// Row key holding the object's identity map.
pub const SYSTEM_PROPERTY_INSTANCE_IDENTITY: &str = "_instance_identity";
/// Row key holding the object's display string.
pub const SYSTEM_PROPERTY_DISPLAY: &str = "_display";

/// One object as returned by the object selector: system fields plus
/// arbitrary properties.
pub type ObjectRow = Map<String, Value>;

/// Identity fields of one target object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSystemInfo {
    #[serde(rename = "_instance_id", default)]
    pub instance_id: String,
    #[serde(rename = "_instance_identity", default)]
    pub instance_identity: Map<String, Value>,
    #[serde(rename = "_display", default)]
    pub display: String,
}

impl ObjectSystemInfo {
    /// Extract the system fields from a selector row.
    ///
    /// Missing fields stay empty; a non-object identity is ignored.
    pub fn from_row(row: &ObjectRow) -> Self {
        let instance_identity = match row.get(SYSTEM_PROPERTY_INSTANCE_IDENTITY) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Self {
            instance_id: row
                .get(SYSTEM_PROPERTY_INSTANCE_ID)
                .map(value_as_text)
                .unwrap_or_default(),
            instance_identity,
            display: row
                .get(SYSTEM_PROPERTY_DISPLAY)
                .map(value_as_text)
                .unwrap_or_default(),
        }
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Logical conjunction.
pub const OPERATION_AND: &str = "and";
/// Logical disjunction.
pub const OPERATION_OR: &str = "or";
/// Field equality.
pub const OPERATION_EQ: &str = "==";

/// A predicate tree understood by the object selector.
///
/// Opaque to the scheduler beyond the `and`/`or`/`==` constructors it needs
/// to target specific instances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_conditions: Vec<Condition>,
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: Some(field.into()),
            operation: OPERATION_EQ.to_string(),
            value: Some(value),
            sub_conditions: Vec::new(),
        }
    }

    pub fn and(sub_conditions: Vec<Condition>) -> Self {
        Self::group(OPERATION_AND, sub_conditions)
    }

    pub fn or(sub_conditions: Vec<Condition>) -> Self {
        Self::group(OPERATION_OR, sub_conditions)
    }

    fn group(operation: &str, sub_conditions: Vec<Condition>) -> Self {
        Self {
            field: None,
            operation: operation.to_string(),
            value: None,
            sub_conditions,
        }
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// The caller on whose behalf an execution runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
}

impl AccountInfo {
    pub fn new(id: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_type: account_type.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_empty()
    }
}

// =============================================================================
// Time
// =============================================================================

/// Unix timestamp in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }

    /// Milliseconds elapsed since `earlier`, clamped at zero.
    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).max(0)
    }
}
