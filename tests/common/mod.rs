// Shared fixtures for integration tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode},
    response::Json,
    routing::any,
    Router,
};
use clinicflow::{
    api::AppState,
    db::Database,
    flow::{CompiledFlow, Flow, FlowRegistry, FlowStorage},
    integrations::{Generation, GenerationRequest, SqliteDataStore, TextGenerator},
    runtime::{ExecutionTracker, FlowEngine, NewExecution, NodeExecutor},
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Text generator that records prompts and answers deterministically
#[derive(Default)]
pub struct MockGenerator {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(Generation {
            text: format!("triage: {}", request.prompt),
            model: "mock-model".to_string(),
        })
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub storage: FlowStorage,
    pub registry: Arc<FlowRegistry>,
    pub engine: Arc<FlowEngine>,
    pub generator: Arc<MockGenerator>,
}

impl Harness {
    pub fn state(&self) -> AppState {
        AppState {
            storage: self.storage.clone(),
            registry: Arc::clone(&self.registry),
            engine: Arc::clone(&self.engine),
        }
    }

    /// Persist a flow so the API and registry can see it
    pub async fn save(&self, flow: Value) -> Flow {
        let flow: Flow = serde_json::from_value(flow).unwrap();
        self.storage.save_flow(&flow).await.unwrap();
        flow
    }
}

pub async fn harness() -> Harness {
    build(true, 1000).await
}

pub async fn harness_without_ai() -> Harness {
    build(false, 1000).await
}

pub async fn harness_with_max_steps(max_steps: usize) -> Harness {
    build(true, max_steps).await
}

async fn build(with_ai: bool, max_steps: usize) -> Harness {
    let database = Database::in_memory().await.unwrap();
    let pool = database.pool().clone();
    seed_clinic_tables(&pool).await;

    let storage = FlowStorage::new(pool.clone());
    let registry = Arc::new(FlowRegistry::new(storage.clone()));
    let generator = Arc::new(MockGenerator::default());

    let mut executor = NodeExecutor::new(Arc::new(SqliteDataStore::new(pool.clone())), reqwest::Client::new());
    if with_ai {
        executor = executor.with_text_generator(Arc::clone(&generator) as Arc<dyn TextGenerator>);
    }
    let engine = Arc::new(FlowEngine::new(
        Arc::new(executor),
        ExecutionTracker::new(pool.clone()),
        max_steps,
    ));

    Harness {
        pool,
        storage,
        registry,
        engine,
        generator,
    }
}

async fn seed_clinic_tables(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE appointments (id INTEGER PRIMARY KEY, patient_name TEXT, status TEXT, reminder_sent INTEGER)",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO appointments (id, patient_name, status, reminder_sent) VALUES \
         (1, 'Ana', 'scheduled', 0), (2, 'Ben', 'scheduled', 0), (3, 'Caro', 'cancelled', 0)",
    )
    .execute(pool)
    .await
    .unwrap();
}

pub fn compile(flow: Value) -> CompiledFlow {
    CompiledFlow::compile(serde_json::from_value(flow).unwrap(), "test").unwrap()
}

pub fn request(input: Value) -> NewExecution {
    NewExecution {
        context_type: "appointment".to_string(),
        context_id: Some("1".to_string()),
        input_data: input,
        triggered_by: Some("tests".to_string()),
        triggered_by_type: Some("system".to_string()),
    }
}

/// Node ids in execution order, read from the final execution log entry
pub async fn path_of(engine: &FlowEngine, execution_id: &str) -> Vec<String> {
    let logs = engine.tracker().logs(execution_id).await.unwrap();
    let last = logs.last().expect("execution has log entries");
    serde_json::from_value(last.data["path"].clone()).unwrap()
}

/// Local HTTP server: `/echo` reflects the request, `/fail` always answers 500
pub async fn spawn_echo_server() -> String {
    async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Value> {
        let body = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
        let clinic_header = headers
            .get("x-clinic")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Json(json!({ "method": method.as_str(), "x_clinic": clinic_header, "body": body }))
    }

    let app = Router::new()
        .route("/echo", any(echo))
        .route("/fail", any(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}
