//! Common test utilities for API testing with mocks.
//!
//! The fixture builds the real router over SQLite stores in a temporary
//! directory, the filesystem preparator and a mock catalog whose products
//! point at files written by the test.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use oseo_core::{
    catalog::ProductDescriptor, config::DatabaseConfig, config::ServerConfig,
    create_audit_system, testing::MockCatalogResolver, AuditStore, Config, OrderStore,
    PipelineConfig, PreparatorConfig, RetryConfig, SqliteAuditStore, SqliteOrderStore,
};
use oseo_server::api::create_router;
use oseo_server::state::{build_orchestrator, AppState, Orchestrator};

/// Test fixture for API testing.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_order_creation() {
///     let fixture = TestFixture::new().await;
///     fixture.add_product("p-1", "data");
///
///     let response = fixture.post("/api/v1/orders", json!({
///         "user": "alice",
///         "batches": [[{ "identifier": "p-1" }]]
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub orchestrator: Orchestrator,
    /// Mock catalog - configure product descriptors
    pub catalog: MockCatalogResolver,
    /// Root of the delivery tree
    pub delivery_dir: PathBuf,
    source_dir: PathBuf,
    /// Holds the database and every directory above
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let source_dir = temp_dir.path().join("source");
        let delivery_dir = temp_dir.path().join("delivery");
        std::fs::create_dir_all(&source_dir).expect("Failed to create source dir");

        let mut config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            pipeline: PipelineConfig::default().with_retry(RetryConfig::immediate(2)),
            ..Default::default()
        };
        config.preparator =
            PreparatorConfig::new(temp_dir.path().join("staging"), delivery_dir.clone());

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let order_store: Arc<dyn OrderStore> = Arc::new(
            SqliteOrderStore::new(&db_path).expect("Failed to create order store"),
        );

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let catalog = MockCatalogResolver::new();
        let orchestrator = build_orchestrator(
            &config,
            order_store,
            Arc::new(catalog.clone()),
            audit_handle.clone(),
        );

        let state = Arc::new(AppState::new(
            config,
            orchestrator.clone(),
            audit_handle,
            audit_store,
        ));
        let router = create_router(state);

        Self {
            router,
            orchestrator,
            catalog,
            delivery_dir,
            source_dir,
            temp_dir,
        }
    }

    /// Write a product file and register it in the mock catalog.
    pub fn add_product(&self, identifier: &str, contents: &str) -> PathBuf {
        let path = self.source_dir.join(format!("{}.dat", identifier));
        std::fs::write(&path, contents).expect("Failed to write product");
        let mut descriptor = ProductDescriptor::new(identifier, path.to_string_lossy());
        descriptor.size_bytes = Some(contents.len() as u64);
        self.catalog.set_descriptor(descriptor);
        path
    }

    /// Poll an order until its status is one of `statuses`.
    pub async fn wait_for_status(&self, order_id: &str, statuses: &[&str]) -> Value {
        for _ in 0..200 {
            let response = self.get(&format!("/api/v1/orders/{}", order_id)).await;
            if statuses.iter().any(|s| response.body["status"] == *s) {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("order {} never reached {:?}", order_id, statuses);
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            $response.text
        );
    };
}
