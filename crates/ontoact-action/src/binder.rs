//! Parameter binding.
//!
//! Maps an action type's declared parameters to concrete values for one
//! target object.

use serde_json::{Map, Value};
use tracing::warn;

use ontoact_core::action::{ActionType, ValueFrom};
use ontoact_core::types::ObjectRow;

use crate::error::BindError;

/// Bind every declared parameter of `action_type` against `object`.
///
/// - `const`: the declared value, verbatim.
/// - `prop`: the declared value names a property of `object`.
/// - `input`: the parameter's own name is looked up in `dynamic_params`.
///
/// A `prop` or `input` value that cannot be found leaves the parameter out
/// of the map entirely. Unknown `value_from` kinds and parameters without a
/// name are skipped.
pub fn build_execution_params(
    action_type: &ActionType,
    object: &ObjectRow,
    dynamic_params: &Map<String, Value>,
) -> Result<Map<String, Value>, BindError> {
    let mut params = Map::new();

    for (idx, param) in action_type.parameters.iter().enumerate() {
        if param.name.is_empty() {
            warn!(action_type_id = %action_type.id, position = idx, "Skipping unnamed parameter");
            continue;
        }

        let value = match param.value_from {
            ValueFrom::Const => Some(param.value.clone()),
            ValueFrom::Prop => param
                .value
                .as_str()
                .and_then(|prop| object.get(prop))
                .cloned(),
            ValueFrom::Input => dynamic_params.get(&param.name).cloned(),
            ValueFrom::Unknown => None,
        };

        if let Some(value) = value {
            params.insert(param.name.clone(), value);
        }
    }

    Ok(params)
}
