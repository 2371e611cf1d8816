/// Execution scope and accumulated node results
///
/// `NodeResults` is an immutable value: each step produces a new one via `with`, and node
/// executors only ever see a shared reference to the results accumulated so far.

use serde_json::{json, Map, Value};

/// Per-node results in the order the nodes were first executed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeResults {
    entries: Vec<(String, Value)>,
}

impl NodeResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of these results with `node_id` set to `result`
    ///
    /// A node that runs again replaces its earlier entry in place.
    pub fn with(&self, node_id: &str, result: Value) -> Self {
        let mut entries = self.entries.clone();
        match entries.iter_mut().find(|(id, _)| id == node_id) {
            Some(entry) => entry.1 = result,
            None => entries.push((node_id.to_string(), result)),
        }
        Self { entries }
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.entries.iter().find(|(id, _)| id == node_id).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(id, value)| (id.as_str(), value))
    }

    /// Results keyed by node id
    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.iter().cloned().collect())
    }
}

/// Immutable facts about one execution, shared by every node in the walk
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    pub execution_id: String,
    pub flow_id: String,
    /// Kind of record the run is about (e.g., "appointment")
    pub context_type: String,
    pub context_id: Option<String>,
    /// The execution's `input_data`
    pub input: Value,
}

impl ExecutionScope {
    /// Template context for the current step
    ///
    /// Layout: input fields at the top level (when the input is an object), `input` for
    /// the whole input, `execution` for ids, then one entry per executed node keyed by
    /// node id. Later layers win on name clashes.
    pub fn context_with(&self, results: &NodeResults) -> Value {
        let mut context = Map::new();

        if let Value::Object(fields) = &self.input {
            context.extend(fields.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        context.insert("input".to_string(), self.input.clone());
        context.insert(
            "execution".to_string(),
            json!({
                "id": self.execution_id,
                "flow_id": self.flow_id,
                "context_type": self.context_type,
                "context_id": self.context_id,
            }),
        );
        for (node_id, result) in results.iter() {
            context.insert(node_id.to_string(), result.clone());
        }

        Value::Object(context)
    }
}
