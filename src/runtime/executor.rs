/// Node execution handlers for every node type
///
/// Dispatch is an exhaustive match over `NodeConfig`. Each handler takes the typed node
/// config, the execution scope and the results accumulated so far, and returns a result
/// object with at least `{ success, data | result }`. Errors propagate to the walker,
/// which decides whether the flow continues.

use crate::{
    flow::types::{
        AiAnalysisConfig, ApiCallConfig, ConditionConfig, DatabaseQueryConfig, DatabaseUpdateConfig, DelayConfig,
        FlowNode, NodeConfig, NotificationConfig, TransformConfig, WebhookConfig,
    },
    integrations::{DataStore, GenerationRequest, TableQuery, TableUpdate, TextGenerator},
    runtime::{
        context::{ExecutionScope, NodeResults},
        template,
    },
};
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Node executor holding the external collaborators nodes call into
pub struct NodeExecutor {
    data_store: Arc<dyn DataStore>,
    text_generator: Option<Arc<dyn TextGenerator>>,
    http: reqwest::Client,
}

impl NodeExecutor {
    /// Create an executor without a text generation provider
    pub fn new(data_store: Arc<dyn DataStore>, http: reqwest::Client) -> Self {
        Self {
            data_store,
            text_generator: None,
            http,
        }
    }

    pub fn with_text_generator(mut self, text_generator: Arc<dyn TextGenerator>) -> Self {
        self.text_generator = Some(text_generator);
        self
    }

    /// Execute a single node against the accumulated results
    pub async fn execute_node(&self, node: &FlowNode, scope: &ExecutionScope, results: &NodeResults) -> Result<Value> {
        tracing::info!("🚀 Starting node execution: {} (type: {})", node.id, node.node_type());
        let start_time = std::time::Instant::now();

        let context = scope.context_with(results);
        let result = match &node.config {
            NodeConfig::Trigger => Ok(self.execute_trigger(scope)),
            NodeConfig::Condition(config) => Ok(self.execute_condition(config, &context)),
            NodeConfig::AiAnalysis(config) => self.execute_ai_analysis(config, &context).await,
            NodeConfig::DatabaseQuery(config) => self.execute_database_query(config, &context).await,
            NodeConfig::DatabaseUpdate(config) => self.execute_database_update(config, &context).await,
            NodeConfig::ApiCall(config) => self.execute_api_call(config, &context).await,
            NodeConfig::Notification(config) => Ok(self.execute_notification(node, config, &context)),
            NodeConfig::Delay(config) => Ok(self.execute_delay(config).await),
            NodeConfig::Transform(config) => Ok(self.execute_transform(config, &context)),
            NodeConfig::Webhook(config) => self.execute_webhook(config, &context).await,
        };

        let duration = start_time.elapsed();
        match &result {
            Ok(output) => {
                tracing::info!("✅ Node execution completed: {} in {:?}", node.id, duration);
                tracing::debug!("📤 Output: {}", output);
            }
            Err(e) => {
                tracing::error!("❌ Node execution failed: {} in {:?} - Error: {:#}", node.id, duration, e);
            }
        }

        result
    }

    /// Trigger: entry point, passes the execution input through
    fn execute_trigger(&self, scope: &ExecutionScope) -> Value {
        json!({ "success": true, "data": scope.input })
    }

    /// Condition: resolve the template and coerce to a boolean
    fn execute_condition(&self, config: &ConditionConfig, context: &Value) -> Value {
        let (resolved, result) = template::evaluate_condition_text(&config.condition, context);
        tracing::debug!("🔀 Condition '{}' resolved to '{}' -> {}", config.condition, resolved, result);

        json!({ "success": true, "result": result, "condition": resolved })
    }

    /// AI analysis: resolve the prompt and delegate to the text generator
    async fn execute_ai_analysis(&self, config: &AiAnalysisConfig, context: &Value) -> Result<Value> {
        let generator = self
            .text_generator
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No text generation provider is configured"))?;

        let request = GenerationRequest {
            prompt: template::resolve_str(&config.prompt, context),
            system_prompt: config
                .system_prompt
                .as_deref()
                .map(|prompt| template::resolve_str(prompt, context)),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        tracing::debug!("🤖 AI prompt: {}", request.prompt);

        let generation = generator.generate(&request).await.context("AI analysis failed")?;

        Ok(json!({
            "success": true,
            "result": generation.text,
            "model": generation.model,
        }))
    }

    /// Database query: resolve filters and read matching rows
    async fn execute_database_query(&self, config: &DatabaseQueryConfig, context: &Value) -> Result<Value> {
        let query = TableQuery {
            table: config.table.clone(),
            filters: resolve_map(&config.filters, context),
            select: config.select.clone(),
            limit: config.limit,
            order_by: config.order_by.clone(),
            descending: config.descending,
        };
        tracing::debug!("📖 Querying table {} with filters {:?}", query.table, query.filters);

        let rows = self.data_store.query(&query).await?;
        tracing::info!("✅ Database query successful: {} rows returned from {}", rows.len(), query.table);

        Ok(json!({
            "success": true,
            "count": rows.len(),
            "data": rows,
        }))
    }

    /// Database update: resolve filters and new values, then apply them
    async fn execute_database_update(&self, config: &DatabaseUpdateConfig, context: &Value) -> Result<Value> {
        let update = TableUpdate {
            table: config.table.clone(),
            filters: resolve_map(&config.filters, context),
            updates: resolve_map(&config.updates, context),
        };
        tracing::debug!("💾 Updating table {} where {:?}", update.table, update.filters);

        let rows_affected = self.data_store.update(&update).await?;
        tracing::info!("✅ Database update successful: {} rows affected in {}", rows_affected, update.table);

        Ok(json!({
            "success": true,
            "data": { "table": update.table, "rows_affected": rows_affected },
        }))
    }

    /// API call: outbound HTTP request with a resolved body
    async fn execute_api_call(&self, config: &ApiCallConfig, context: &Value) -> Result<Value> {
        let body = config.body.as_ref().map(|body| template::resolve_value(body, context));
        self.send_request(config.method.as_deref().unwrap_or("GET"), &config.url, &config.headers, body, context)
            .await
    }

    /// Webhook: outbound HTTP request carrying the payload or the whole context
    async fn execute_webhook(&self, config: &WebhookConfig, context: &Value) -> Result<Value> {
        let payload = match &config.payload {
            Some(payload) => template::resolve_value(payload, context),
            None => context.clone(),
        };
        self.send_request(
            config.method.as_deref().unwrap_or("POST"),
            &config.url,
            &config.headers,
            Some(payload),
            context,
        )
        .await
    }

    async fn send_request(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<Value>,
        context: &Value,
    ) -> Result<Value> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .with_context(|| format!("Unsupported HTTP method: {}", method))?;
        let url = template::resolve_str(url, context);
        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request_builder = self.http.request(method.clone(), &url);
        for (key, value) in headers {
            request_builder = request_builder.header(key.as_str(), template::resolve_str(value, context));
        }
        if let Some(body) = &body {
            request_builder = request_builder.json(body);
        }

        let response = request_builder
            .send()
            .await
            .with_context(|| format!("HTTP request failed: {} {}", method, url))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("Failed to read response body")?;
        let data = serde_json::from_str::<Value>(&response_text).unwrap_or(Value::String(response_text));

        if !status.is_success() {
            anyhow::bail!("HTTP {} {} returned status {}", method, url, status.as_u16());
        }

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);
        Ok(json!({
            "success": true,
            "status": status.as_u16(),
            "data": data,
        }))
    }

    /// Notification: delivery is not wired up yet, so the resolved message is only logged
    fn execute_notification(&self, node: &FlowNode, config: &NotificationConfig, context: &Value) -> Value {
        let resolve = |field: &Option<String>| field.as_deref().map(|text| template::resolve_str(text, context));
        let channel = resolve(&config.channel);
        let recipient = resolve(&config.recipient);
        let message = resolve(&config.message);

        tracing::info!(
            "🔔 Notification '{}' via {} to {}: {}",
            node.display_name(),
            channel.as_deref().unwrap_or("default"),
            recipient.as_deref().unwrap_or("-"),
            message.as_deref().unwrap_or("")
        );

        json!({
            "success": true,
            "data": {
                "channel": channel,
                "recipient": recipient,
                "message": message,
                "delivered": false,
            },
        })
    }

    /// Delay: sleep for the configured duration
    async fn execute_delay(&self, config: &DelayConfig) -> Value {
        tracing::debug!("⏳ Delaying for {} ms", config.duration_ms);
        tokio::time::sleep(Duration::from_millis(config.duration_ms)).await;
        json!({ "success": true, "data": { "delayed_ms": config.duration_ms } })
    }

    /// Transform: resolve each output field from its template
    fn execute_transform(&self, config: &TransformConfig, context: &Value) -> Value {
        json!({ "success": true, "data": resolve_map(&config.output, context) })
    }
}

fn resolve_map(map: &Map<String, Value>, context: &Value) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| (key.clone(), template::resolve_value(value, context)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::Generation;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        queries: Mutex<Vec<TableQuery>>,
    }

    #[async_trait]
    impl DataStore for RecordingStore {
        async fn query(&self, query: &TableQuery) -> Result<Vec<Value>> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(vec![json!({ "id": 1, "name": "Ana" })])
        }

        async fn update(&self, _update: &TableUpdate) -> Result<u64> {
            Ok(2)
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
            Ok(Generation {
                text: format!("analysis of: {}", request.prompt),
                model: request.model.clone().unwrap_or_else(|| "echo".to_string()),
            })
        }
    }

    fn node(value: Value) -> FlowNode {
        serde_json::from_value(value).unwrap()
    }

    fn scope() -> ExecutionScope {
        ExecutionScope {
            execution_id: "exec".to_string(),
            flow_id: "flow".to_string(),
            context_type: "patient".to_string(),
            context_id: None,
            input: json!({ "patient": { "id": 7, "name": "Ana", "active": 1 } }),
        }
    }

    fn executor(store: Arc<RecordingStore>) -> NodeExecutor {
        NodeExecutor::new(store, reqwest::Client::new())
    }

    #[tokio::test]
    async fn trigger_passes_input_through() {
        let executor = executor(Arc::default());
        let result = executor
            .execute_node(&node(json!({ "id": "t", "type": "trigger" })), &scope(), &NodeResults::new())
            .await
            .unwrap();
        assert_eq!(result, json!({ "success": true, "data": scope().input }));
    }

    #[tokio::test]
    async fn condition_reads_prior_results() {
        let executor = executor(Arc::default());
        let results = NodeResults::new().with("lookup", json!({ "count": 0 }));
        let condition = node(json!({ "id": "c", "type": "condition", "config": { "condition": "{{lookup.count}}" } }));

        let result = executor.execute_node(&condition, &scope(), &results).await.unwrap();
        assert_eq!(result["result"], json!(false));
        assert_eq!(result["condition"], json!("0"));
    }

    #[tokio::test]
    async fn condition_reports_text_false_and_braced_data_as_true() {
        let executor = executor(Arc::default());
        let results = NodeResults::new().with("reply", json!({ "status": "false", "text": "use {{code}}" }));

        let status = node(json!({ "id": "c", "type": "condition", "config": { "condition": "{{reply.status}}" } }));
        let result = executor.execute_node(&status, &scope(), &results).await.unwrap();
        assert_eq!(result["result"], json!(true));
        assert_eq!(result["condition"], json!("false"));

        let text = node(json!({ "id": "t", "type": "condition", "config": { "condition": "{{reply.text}}" } }));
        let result = executor.execute_node(&text, &scope(), &results).await.unwrap();
        assert_eq!(result["result"], json!(true));

        let missing = node(json!({ "id": "m", "type": "condition", "config": { "condition": "{{reply.code}}" } }));
        let result = executor.execute_node(&missing, &scope(), &results).await.unwrap();
        assert_eq!(result["result"], json!(false));
    }

    #[tokio::test]
    async fn database_query_resolves_filters() {
        let store = Arc::new(RecordingStore::default());
        let executor = executor(Arc::clone(&store));
        let query = node(json!({
            "id": "q",
            "type": "database_query",
            "config": { "table": "appointments", "filters": { "patient_id": "{{patient.id}}" }, "limit": 5 }
        }));

        let result = executor.execute_node(&query, &scope(), &NodeResults::new()).await.unwrap();
        assert_eq!(result["count"], json!(1));
        assert_eq!(result["data"][0]["name"], json!("Ana"));

        let recorded = store.queries.lock().unwrap();
        assert_eq!(recorded[0].filters["patient_id"], json!("7"));
        assert_eq!(recorded[0].limit, Some(5));
    }

    #[tokio::test]
    async fn database_update_reports_rows_affected() {
        let executor = executor(Arc::default());
        let update = node(json!({
            "id": "u",
            "type": "database_update",
            "config": { "table": "patients", "filters": { "id": "{{patient.id}}" }, "updates": { "status": "seen" } }
        }));

        let result = executor.execute_node(&update, &scope(), &NodeResults::new()).await.unwrap();
        assert_eq!(result["data"]["rows_affected"], json!(2));
    }

    #[tokio::test]
    async fn ai_analysis_requires_generator() {
        let ai = node(json!({ "id": "ai", "type": "ai_analysis", "config": { "prompt": "Check {{patient.name}}" } }));

        let missing = executor(Arc::default()).execute_node(&ai, &scope(), &NodeResults::new()).await;
        assert!(missing.unwrap_err().to_string().contains("No text generation provider"));

        let with_generator = executor(Arc::default()).with_text_generator(Arc::new(EchoGenerator));
        let result = with_generator.execute_node(&ai, &scope(), &NodeResults::new()).await.unwrap();
        assert_eq!(result["result"], json!("analysis of: Check Ana"));
        assert_eq!(result["model"], json!("echo"));
    }

    #[tokio::test]
    async fn transform_and_notification_resolve_templates() {
        let executor = executor(Arc::default());

        let transform = node(json!({
            "id": "x",
            "type": "transform",
            "config": { "output": { "greeting": "Hi {{patient.name}}", "ids": ["{{patient.id}}"] } }
        }));
        let result = executor.execute_node(&transform, &scope(), &NodeResults::new()).await.unwrap();
        assert_eq!(result["data"], json!({ "greeting": "Hi Ana", "ids": ["7"] }));

        let notify = node(json!({
            "id": "n",
            "type": "notification",
            "config": { "channel": "whatsapp", "message": "Reminder for {{patient.name}}" }
        }));
        let result = executor.execute_node(&notify, &scope(), &NodeResults::new()).await.unwrap();
        assert_eq!(result["data"]["message"], json!("Reminder for Ana"));
        assert_eq!(result["data"]["delivered"], json!(false));
    }

    #[tokio::test]
    async fn delay_sleeps_for_configured_duration() {
        let executor = executor(Arc::default());
        let delay = node(json!({ "id": "d", "type": "delay", "config": { "duration_ms": 20 } }));

        let started = std::time::Instant::now();
        let result = executor.execute_node(&delay, &scope(), &NodeResults::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(result["data"]["delayed_ms"], json!(20));
    }
}
