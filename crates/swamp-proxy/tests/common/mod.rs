//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use swamp_proxy::api::{AppState, create_router};
use swamp_proxy::auth::AuthState;
use swamp_proxy::collector::{
    CollectorError, CollectorResult, ViewerCollector, ViewerData, ViewerInstanceStatus,
};
use swamp_proxy::db::Database;
use swamp_proxy::directory::SqliteDirectory;
use swamp_proxy::settings::AppConfig;

pub const JWT_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";
pub const APP_JS: &str = "console.log('viewer');";
pub const LOGO_PNG: &[u8] = b"\x89PNG\r\n";

/// Collector answering from fixed tables.
#[derive(Default)]
pub struct StubCollector {
    pub viewers: HashMap<String, ViewerData>,
    pub instances: HashMap<String, ViewerInstanceStatus>,
    pub broken: bool,
    pub queries: AtomicUsize,
}

impl StubCollector {
    pub fn with_viewer(mut self, proxy_id: &str, vm: Option<&str>, project: Option<&str>) -> Self {
        self.viewers.insert(
            proxy_id.to_string(),
            ViewerData {
                vm_address: vm.map(str::to_string),
                project_id: project.map(str::to_string),
            },
        );
        self
    }

    pub fn with_instance(mut self, status: ViewerInstanceStatus) -> Self {
        self.instances
            .insert(status.viewer_instance_uuid.clone(), status);
        self
    }
}

#[async_trait]
impl ViewerCollector for StubCollector {
    async fn get_viewer_data(&self, proxy_id: &str) -> CollectorResult<ViewerData> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(CollectorError::MalformedOutput("stub".to_string()));
        }
        Ok(self.viewers.get(proxy_id).cloned().unwrap_or_default())
    }

    async fn get_viewer_instance(
        &self,
        viewer_instance_uuid: &str,
    ) -> CollectorResult<Option<ViewerInstanceStatus>> {
        if self.broken {
            return Err(CollectorError::CommandFailed {
                command: "condor_status".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "stub".to_string(),
            });
        }
        Ok(self.instances.get(viewer_instance_uuid).cloned())
    }
}

/// A plain-HTTP stand-in for a viewer VM.
pub struct MockViewer {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl MockViewer {
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn spawn_mock_viewer() -> MockViewer {
    let hits = Arc::new(AtomicUsize::new(0));

    let js_hits = hits.clone();
    let logo_hits = hits.clone();
    let redirect_hits = hits.clone();
    let echo_hits = hits.clone();

    let app = Router::new()
        .route(
            "/proxy-123/app.js",
            get(move || {
                let hits = js_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (
                        [
                            (header::CONTENT_TYPE, "text/javascript;charset=utf-8"),
                            (header::SERVER, "Jetty(9.2)"),
                        ],
                        APP_JS,
                    )
                }
            }),
        )
        .route(
            "/proxy-123/logo.png",
            get(move || {
                let hits = logo_hits.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        [
                            (header::CONTENT_TYPE, "image/png".to_string()),
                            (header::SET_COOKIE, format!("JSESSIONID=session-{n}; Path=/")),
                        ],
                        LOGO_PNG,
                    )
                }
            }),
        )
        .route(
            "/proxy-123/redirect",
            get(move || {
                let hits = redirect_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::FOUND,
                        [
                            (header::LOCATION, "https://10.0.0.5/proxy-123/login"),
                            (header::SET_COOKIE, "JSESSIONID=fresh; Path=/"),
                        ],
                    )
                }
            }),
        )
        .route(
            "/proxy-123/echo",
            post(move |headers: HeaderMap, body: Bytes| {
                let hits = echo_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    echo(headers, body)
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockViewer { addr, hits }
}

/// Reflect the identity headers and body back as JSON.
fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let json = serde_json::json!({
        "host": value(header::HOST),
        "authorization": value(header::AUTHORIZATION),
        "cookie": value(header::COOKIE),
        "user_agent": value(header::USER_AGENT),
        "accept": value(header::ACCEPT),
        "body": String::from_utf8_lossy(&body),
    });
    (
        [(header::CONTENT_TYPE, "application/json")],
        json.to_string(),
    )
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = Some(JWT_SECRET.to_string());
    config.upstream.scheme = "http".to_string();
    config.upstream.timeout_secs = 5;
    config.resolver.poll_interval_ms = 1;
    config.resolver.max_polls = 3;
    config
}

pub struct TestApp {
    pub router: Router,
    pub auth: AuthState,
    pub collector: Arc<StubCollector>,
    pub directory: SqliteDirectory,
}

impl TestApp {
    pub fn token(&self, user_uid: &str) -> String {
        self.auth.generate_token(user_uid).unwrap()
    }

    pub fn request(&self, method: &str, uri: &str, user_uid: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_uid)))
    }
}

/// Users: `usr-owner` owns `proj-9` and `proj-other`; `usr-member` is an active
/// member of `proj-9`; `usr-outsider` belongs to nothing.
pub async fn test_app(collector: StubCollector, config: AppConfig) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let directory = SqliteDirectory::new(db.pool().clone());

    directory.create_user("usr-owner", "Owner").await.unwrap();
    directory.create_user("usr-member", "MemberName").await.unwrap();
    directory.create_user("usr-outsider", "Outsider").await.unwrap();
    directory
        .create_project("proj-9", "usr-owner", "Assessment")
        .await
        .unwrap();
    directory
        .create_project("proj-other", "usr-owner", "Other")
        .await
        .unwrap();
    directory
        .add_membership("mem-1", "proj-9", "usr-member", false)
        .await
        .unwrap();

    let collector = Arc::new(collector);
    let state = AppState::new(&config, collector.clone(), Arc::new(directory.clone())).unwrap();
    let auth = state.auth.clone();

    TestApp {
        router: create_router(state),
        auth,
        collector,
        directory,
    }
}

pub async fn body_string(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

pub fn empty() -> Body {
    Body::empty()
}
