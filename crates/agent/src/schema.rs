//! Tool schema adapter.
//!
//! Arguments the loop injects itself (`topology_id`, `model_name`) are
//! hidden from the model's view of the catalog.

use dispatch_core::tool::ToolDefinition;
use serde_json::{Value, json};

/// Parameters filled in by the agent loop, never by the model.
pub const INJECTED_PARAMETERS: [&str; 2] = ["topology_id", "model_name"];

/// Adapt a catalog for the model. The input is left untouched.
pub fn adapt_catalog(catalog: &[ToolDefinition]) -> Vec<ToolDefinition> {
    catalog
        .iter()
        .map(|def| ToolDefinition {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: strip_injected(&def.parameters),
        })
        .collect()
}

fn strip_injected(parameters: &Value) -> Value {
    if !parameters.is_object() {
        return json!({"type": "object", "properties": {}});
    }

    let mut schema = parameters.clone();
    if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for key in INJECTED_PARAMETERS {
            props.remove(key);
        }
    }
    if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|r| !r.as_str().is_some_and(|r| INJECTED_PARAMETERS.contains(&r)));
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, parameters: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            parameters,
        }
    }

    #[test]
    fn injected_parameters_are_removed() {
        let catalog = vec![def(
            "fetch_related_knowledge",
            json!({
                "type": "object",
                "properties": {
                    "topology_id": {"type": "string"},
                    "model_name": {"type": "string"},
                    "query": {"type": "string"}
                },
                "required": ["topology_id", "query", "model_name"]
            }),
        )];

        let adapted = adapt_catalog(&catalog);
        let params = &adapted[0].parameters;
        assert_eq!(params["properties"].as_object().unwrap().len(), 1);
        assert!(params["properties"].get("query").is_some());
        assert_eq!(params["required"], json!(["query"]));
    }

    #[test]
    fn source_catalog_is_not_mutated() {
        let catalog = vec![def(
            "list_devices",
            json!({
                "type": "object",
                "properties": {"topology_id": {"type": "string"}},
                "required": ["topology_id"]
            }),
        )];
        let before = catalog.clone();
        let adapted = adapt_catalog(&catalog);
        assert_eq!(catalog, before);
        assert_eq!(adapted[0].parameters["required"], json!([]));
    }

    #[test]
    fn missing_schema_gets_empty_object() {
        let adapted = adapt_catalog(&[def("noop", Value::Null)]);
        assert_eq!(
            adapted[0].parameters,
            json!({"type": "object", "properties": {}})
        );
        assert_eq!(adapted[0].name, "noop");
    }

    #[test]
    fn schema_without_properties_is_kept() {
        let adapted = adapt_catalog(&[def("ping", json!({"type": "object"}))]);
        assert_eq!(adapted[0].parameters, json!({"type": "object"}));
    }
}
