/// Core flow type definitions
///
/// Flows are stored as JSON and parsed into strongly typed node configs at load time,
/// so a malformed node is rejected once instead of failing on every execution.

use crate::flow::error::FlowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A complete flow definition: ordered nodes plus the edges connecting them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Unique flow identifier (e.g., "appointment-reminder")
    pub id: String,
    /// Human-readable flow name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nodes in definition order; the order matters for the start-node fallback
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Inactive flows are kept in storage but refuse to execute
    #[serde(default = "default_active", alias = "isActive")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Directed connection between two nodes
///
/// An edge with a condition is only followed when the resolved condition is truthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Source node ID
    #[serde(alias = "from")]
    pub source: String,
    /// Target node ID
    #[serde(alias = "to")]
    pub target: String,
    /// Optional template expression, e.g. "{{lookup.count}}"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    /// The condition template, ignoring blank strings
    pub fn condition(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|condition| !condition.is_empty())
    }

    pub fn is_unconditional(&self) -> bool {
        self.condition().is_none()
    }
}

/// Available node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    Condition,
    AiAnalysis,
    DatabaseQuery,
    DatabaseUpdate,
    ApiCall,
    Notification,
    Delay,
    Transform,
    Webhook,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Trigger => "trigger",
            NodeType::Condition => "condition",
            NodeType::AiAnalysis => "ai_analysis",
            NodeType::DatabaseQuery => "database_query",
            NodeType::DatabaseUpdate => "database_update",
            NodeType::ApiCall => "api_call",
            NodeType::Notification => "notification",
            NodeType::Delay => "delay",
            NodeType::Transform => "transform",
            NodeType::Webhook => "webhook",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node in the flow graph
///
/// Serialized as `{ "id", "type", "label", "config" }`. The `continueOnError` flag lives
/// inside `config` on the wire and is lifted onto the node when parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "NodeDefinition", into = "NodeDefinition")]
pub struct FlowNode {
    pub id: String,
    pub label: Option<String>,
    /// Keep walking along the unconditional edge when this node fails
    pub continue_on_error: bool,
    pub config: NodeConfig,
}

impl FlowNode {
    pub fn node_type(&self) -> NodeType {
        self.config.node_type()
    }

    /// Label for log lines, falling back to the id
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Wire form of a node, with an untyped config map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type", alias = "node_type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl TryFrom<NodeDefinition> for FlowNode {
    type Error = FlowError;

    fn try_from(definition: NodeDefinition) -> Result<Self, Self::Error> {
        let continue_on_error = definition
            .config
            .get("continueOnError")
            .or_else(|| definition.config.get("continue_on_error"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let config = NodeConfig::parse(definition.node_type, definition.config).map_err(|reason| {
            FlowError::InvalidNodeConfig {
                node_id: definition.id.clone(),
                reason,
            }
        })?;

        Ok(Self {
            id: definition.id,
            label: definition.label,
            continue_on_error,
            config,
        })
    }
}

impl From<FlowNode> for NodeDefinition {
    fn from(node: FlowNode) -> Self {
        let node_type = node.node_type();
        let mut config = node.config.to_value();
        if node.continue_on_error {
            if let Value::Object(map) = &mut config {
                map.insert("continueOnError".to_string(), Value::Bool(true));
            }
        }

        Self {
            id: node.id,
            node_type,
            label: node.label,
            config,
        }
    }
}

/// Per-type node configuration, parsed once when the flow is loaded
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    /// Entry point; passes the input through
    Trigger,
    Condition(ConditionConfig),
    AiAnalysis(AiAnalysisConfig),
    DatabaseQuery(DatabaseQueryConfig),
    DatabaseUpdate(DatabaseUpdateConfig),
    ApiCall(ApiCallConfig),
    /// Placeholder for outbound notifications; only logs
    Notification(NotificationConfig),
    Delay(DelayConfig),
    Transform(TransformConfig),
    Webhook(WebhookConfig),
}

impl NodeConfig {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Trigger => NodeType::Trigger,
            NodeConfig::Condition(_) => NodeType::Condition,
            NodeConfig::AiAnalysis(_) => NodeType::AiAnalysis,
            NodeConfig::DatabaseQuery(_) => NodeType::DatabaseQuery,
            NodeConfig::DatabaseUpdate(_) => NodeType::DatabaseUpdate,
            NodeConfig::ApiCall(_) => NodeType::ApiCall,
            NodeConfig::Notification(_) => NodeType::Notification,
            NodeConfig::Delay(_) => NodeType::Delay,
            NodeConfig::Transform(_) => NodeType::Transform,
            NodeConfig::Webhook(_) => NodeType::Webhook,
        }
    }

    /// Parse and validate the untyped config map for the given node type
    pub fn parse(node_type: NodeType, raw: Value) -> Result<Self, String> {
        let raw = if raw.is_null() { empty_object() } else { raw };

        let config = match node_type {
            NodeType::Trigger => NodeConfig::Trigger,
            NodeType::Condition => NodeConfig::Condition(from_config(raw)?),
            NodeType::AiAnalysis => NodeConfig::AiAnalysis(from_config(raw)?),
            NodeType::DatabaseQuery => NodeConfig::DatabaseQuery(from_config(raw)?),
            NodeType::DatabaseUpdate => NodeConfig::DatabaseUpdate(from_config(raw)?),
            NodeType::ApiCall => NodeConfig::ApiCall(from_config(raw)?),
            NodeType::Notification => NodeConfig::Notification(from_config(raw)?),
            NodeType::Delay => NodeConfig::Delay(from_config(raw)?),
            NodeType::Transform => NodeConfig::Transform(from_config(raw)?),
            NodeType::Webhook => NodeConfig::Webhook(from_config(raw)?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            NodeConfig::Condition(config) if config.condition.trim().is_empty() => {
                Err("'condition' must not be empty".to_string())
            }
            NodeConfig::AiAnalysis(config) if config.prompt.trim().is_empty() => {
                Err("'prompt' must not be empty".to_string())
            }
            NodeConfig::DatabaseQuery(config) => {
                validate_identifier(&config.table)?;
                for column in config.filters.keys().chain(config.select.iter()) {
                    validate_identifier(column)?;
                }
                if let Some(order_by) = &config.order_by {
                    validate_identifier(order_by)?;
                }
                Ok(())
            }
            NodeConfig::DatabaseUpdate(config) => {
                validate_identifier(&config.table)?;
                if config.filters.is_empty() {
                    return Err("'filters' must not be empty for an update".to_string());
                }
                if config.updates.is_empty() {
                    return Err("'updates' must not be empty".to_string());
                }
                for column in config.filters.keys().chain(config.updates.keys()) {
                    validate_identifier(column)?;
                }
                Ok(())
            }
            NodeConfig::ApiCall(config) => validate_request(&config.url, config.method.as_deref()),
            NodeConfig::Webhook(config) => validate_request(&config.url, config.method.as_deref()),
            _ => Ok(()),
        }
    }

    /// Serialize back to the untyped config map
    pub fn to_value(&self) -> Value {
        let value = match self {
            NodeConfig::Trigger => Ok(empty_object()),
            NodeConfig::Condition(config) => serde_json::to_value(config),
            NodeConfig::AiAnalysis(config) => serde_json::to_value(config),
            NodeConfig::DatabaseQuery(config) => serde_json::to_value(config),
            NodeConfig::DatabaseUpdate(config) => serde_json::to_value(config),
            NodeConfig::ApiCall(config) => serde_json::to_value(config),
            NodeConfig::Notification(config) => serde_json::to_value(config),
            NodeConfig::Delay(config) => serde_json::to_value(config),
            NodeConfig::Transform(config) => serde_json::to_value(config),
            NodeConfig::Webhook(config) => serde_json::to_value(config),
        };
        value.unwrap_or_else(|_| empty_object())
    }
}

fn from_config<T: serde::de::DeserializeOwned>(raw: Value) -> Result<T, String> {
    serde_json::from_value(raw).map_err(|e| e.to_string())
}

/// Table and column names are interpolated into SQL, so only plain identifiers pass
pub fn validate_identifier(name: &str) -> Result<(), String> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(format!("invalid identifier '{}'", name))
    }
}

const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

fn validate_request(url: &str, method: Option<&str>) -> Result<(), String> {
    if url.trim().is_empty() {
        return Err("'url' must not be empty".to_string());
    }
    match method {
        Some(method) if !HTTP_METHODS.contains(&method.to_uppercase().as_str()) => {
            Err(format!("unsupported HTTP method '{}'", method))
        }
        _ => Ok(()),
    }
}

/// Expected config: { "condition": "{{appointment.confirmed}}" }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub condition: String,
}

/// Expected config: { "prompt": "Summarize {{patient.notes}}", "model": "gpt-4o-mini" }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysisConfig {
    pub prompt: String,
    #[serde(default, alias = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, alias = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Expected config: { "table": "appointments", "filters": { "patient_id": "{{patient.id}}" }, "limit": 10 }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseQueryConfig {
    pub table: String,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, alias = "orderBy", skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default)]
    pub descending: bool,
}

/// Expected config: { "table": "appointments", "filters": { "id": "{{appointment.id}}" }, "updates": { "status": "reminded" } }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseUpdateConfig {
    pub table: String,
    pub filters: Map<String, Value>,
    pub updates: Map<String, Value>,
}

/// Expected config: { "url": "https://api.example.com/patients/{{patient.id}}", "method": "GET" }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Expected config: { "url": "https://hooks.example.com/clinic", "payload": { "patient": "{{patient.name}}" } }
///
/// Without a payload the whole accumulated context is posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Expected config: { "duration_ms": 500 }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(alias = "duration", alias = "durationMs")]
    pub duration_ms: u64,
}

/// Expected config: { "output": { "full_name": "{{patient.first}} {{patient.last}}" } }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(alias = "fields")]
    pub output: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typed_config_and_continue_flag() {
        let node: FlowNode = serde_json::from_value(json!({
            "id": "lookup",
            "type": "database_query",
            "label": "Find appointments",
            "config": {
                "table": "appointments",
                "filters": { "patient_id": "{{patient.id}}" },
                "continueOnError": true
            }
        }))
        .unwrap();

        assert_eq!(node.node_type(), NodeType::DatabaseQuery);
        assert!(node.continue_on_error);
        match &node.config {
            NodeConfig::DatabaseQuery(config) => {
                assert_eq!(config.table, "appointments");
                assert_eq!(config.filters["patient_id"], json!("{{patient.id}}"));
                assert_eq!(config.limit, None);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn trigger_accepts_missing_config() {
        let node: FlowNode = serde_json::from_value(json!({ "id": "start", "type": "trigger" })).unwrap();
        assert_eq!(node.config, NodeConfig::Trigger);
        assert!(!node.continue_on_error);
        assert_eq!(node.display_name(), "start");
    }

    #[test]
    fn rejects_invalid_configs() {
        let missing_condition = serde_json::from_value::<FlowNode>(json!({
            "id": "c", "type": "condition", "config": {}
        }));
        assert!(missing_condition.is_err());

        let bad_table = serde_json::from_value::<FlowNode>(json!({
            "id": "q", "type": "database_query", "config": { "table": "patients; DROP TABLE x" }
        }));
        assert!(bad_table.unwrap_err().to_string().contains("invalid identifier"));

        let unfiltered_update = serde_json::from_value::<FlowNode>(json!({
            "id": "u", "type": "database_update",
            "config": { "table": "patients", "filters": {}, "updates": { "active": 0 } }
        }));
        assert!(unfiltered_update.is_err());

        let bad_method = serde_json::from_value::<FlowNode>(json!({
            "id": "h", "type": "api_call", "config": { "url": "http://x", "method": "TRACE" }
        }));
        assert!(bad_method.is_err());

        let unknown_type = serde_json::from_value::<FlowNode>(json!({
            "id": "x", "type": "teleport", "config": {}
        }));
        assert!(unknown_type.is_err());
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let node: FlowNode = serde_json::from_value(json!({
            "id": "wait",
            "type": "delay",
            "config": { "duration": 250, "continueOnError": true }
        }))
        .unwrap();

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], json!("delay"));
        assert_eq!(value["config"]["duration_ms"], json!(250));
        assert_eq!(value["config"]["continueOnError"], json!(true));
    }

    #[test]
    fn flow_defaults_and_edge_aliases() {
        let flow: Flow = serde_json::from_value(json!({
            "id": "f",
            "name": "Flow",
            "nodes": [{ "id": "a", "type": "trigger" }],
            "edges": [{ "from": "a", "to": "b", "condition": "  " }]
        }))
        .unwrap();

        assert!(flow.is_active);
        assert_eq!(flow.edges[0].source, "a");
        assert!(flow.edges[0].is_unconditional());
    }
}
