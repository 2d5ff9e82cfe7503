//! Action type definitions as served by the action-type catalog.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Condition;

/// Where a parameter's value comes from when binding against one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFrom {
    /// The declared value, used literally.
    Const,
    /// The declared value names a property of the target object.
    Prop,
    /// Supplied by the caller in the request's dynamic params.
    Input,
    #[serde(other)]
    Unknown,
}

/// HTTP request bucket a tool parameter is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSource {
    Header,
    Query,
    Body,
    Path,
}

impl ParamSource {
    /// Case-insensitive parse; absent or unrecognised sources map to `Body`.
    pub fn from_config(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("header") => ParamSource::Header,
            Some("query") => ParamSource::Query,
            Some("path") => ParamSource::Path,
            _ => ParamSource::Body,
        }
    }
}

/// A declared parameter of an action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value_from: ValueFrom,
    #[serde(default)]
    pub value: Value,
    /// Raw routing bucket (`header`, `query`, `body`, `path`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Parameter {
    pub fn param_source(&self) -> ParamSource {
        ParamSource::from_config(self.source.as_deref())
    }
}

/// Backend kind behind an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSourceType {
    Tool,
    Mcp,
}

impl fmt::Display for ActionSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSourceType::Tool => write!(f, "tool"),
            ActionSourceType::Mcp => write!(f, "mcp"),
        }
    }
}

impl std::str::FromStr for ActionSourceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(ActionSourceType::Tool),
            "mcp" => Ok(ActionSourceType::Mcp),
            _ => Err(format!("Unknown action source type: {}", s)),
        }
    }
}

/// The callable behind an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSource {
    /// A tool exposed through the tool-box proxy.
    Tool {
        #[serde(default)]
        box_id: String,
        #[serde(default)]
        tool_id: String,
    },
    /// A tool exposed by an MCP server through the MCP proxy.
    Mcp {
        #[serde(default)]
        mcp_id: String,
        #[serde(default)]
        tool_name: String,
        #[serde(default)]
        tool_id: String,
    },
}

impl ActionSource {
    pub fn source_type(&self) -> ActionSourceType {
        match self {
            ActionSource::Tool { .. } => ActionSourceType::Tool,
            ActionSource::Mcp { .. } => ActionSourceType::Mcp,
        }
    }
}

/// A reusable action definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionType {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub object_type_id: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub action_source: ActionSource,
}
