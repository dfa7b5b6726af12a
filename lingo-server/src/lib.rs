use std::{
    io,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::routing::get;
use lingo_core::Lingo;
use log::info;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

mod auth;
mod context;
mod conversations;
mod dashboards;
mod docs;
mod errors;
mod personas;
mod proxy;
mod schemas;
mod serialized;
mod sessions;
mod users;

pub use context::ServerContext;
pub use docs::ApiDoc;

pub type Router = axum::Router<ServerContext>;

/// Builds the complete application, every route living under `/api`
pub fn app(lingo: Arc<Lingo>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let uploads = ServeDir::new(&lingo.config().uploads_dir);

    let api_router = Router::new()
        .nest("/auth", auth::router())
        .nest("/user", users::router())
        .nest("/language-dashboards", dashboards::router())
        .nest("/conversations", conversations::router())
        .nest("/messages", conversations::message_router())
        .nest("/personas", personas::router())
        .nest("/sessions", sessions::router())
        .merge(proxy::router())
        .route("/api.json", get(docs::docs));

    Router::new()
        .nest("/api", api_router)
        .nest_service("/uploads", uploads)
        .layer(cors)
        .with_state(ServerContext { lingo })
}

/// Starts the lingo server
pub async fn run_server(lingo: Lingo) -> io::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, lingo.config().port).into();
    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on {}", addr);

    let lingo = Arc::new(lingo);
    tokio::spawn(purge_cache(lingo.clone()));

    axum::serve(listener, app(lingo)).await
}

/// Periodically drops conversation cache entries that have expired
async fn purge_cache(lingo: Arc<Lingo>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));

    loop {
        interval.tick().await;
        lingo.cache.purge_expired();
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use lingo_core::{Config, Lingo, SqliteDatabase};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use url::Url;
    use wiremock::MockServer;

    static NEXT_APP: AtomicUsize = AtomicUsize::new(0);

    pub struct TestApp {
        pub lingo: Arc<Lingo>,
        router: axum::Router,
    }

    impl TestApp {
        pub async fn new() -> Self {
            Self::with_config(Config::default()).await
        }

        /// An app talking to a mocked AI backend
        pub async fn with_ai(server: &MockServer) -> Self {
            Self::with_ai_url(&server.uri()).await
        }

        pub async fn with_ai_url(url: &str) -> Self {
            Self::with_config(Config {
                ai_backend_url: Url::parse(url).unwrap(),
                ..Config::default()
            })
            .await
        }

        async fn with_config(mut config: Config) -> Self {
            config.uploads_dir = std::env::temp_dir().join(format!(
                "lingo-test-{}-{}",
                std::process::id(),
                NEXT_APP.fetch_add(1, Ordering::Relaxed)
            ));

            let database = SqliteDatabase::in_memory().await.unwrap();
            let lingo = Arc::new(Lingo::new(config, database));

            Self {
                router: super::app(lingo.clone()),
                lingo,
            }
        }

        pub async fn request(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);

            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }

            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => builder.body(Body::empty()),
            };

            self.send(request.unwrap()).await
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };

            (status, body)
        }

        /// Registers a user and returns their token
        pub async fn user(&self, email: &str) -> String {
            let name = email.split('@').next().unwrap_or(email);
            let (status, body) = self
                .request(
                    Method::POST,
                    "/api/auth/register",
                    None,
                    Some(json!({ "email": email, "password": "correct horse", "name": name })),
                )
                .await;

            assert_eq!(status, StatusCode::OK, "{body}");
            body["token"].as_str().unwrap().to_string()
        }

        pub async fn dashboard(&self, token: &str, language: &str) {
            let (status, body) = self
                .request(
                    Method::POST,
                    "/api/language-dashboards",
                    Some(token),
                    Some(json!({ "language": language })),
                )
                .await;

            assert_eq!(status, StatusCode::CREATED, "{body}");
        }

        /// Starts a conversation and returns its id
        pub async fn conversation(&self, token: &str, language: &str, title: &str) -> i64 {
            let (status, body) = self
                .request(
                    Method::POST,
                    "/api/conversations",
                    Some(token),
                    Some(json!({ "language": language, "title": title })),
                )
                .await;

            assert_eq!(status, StatusCode::CREATED, "{body}");
            body["id"].as_i64().unwrap()
        }
    }
}
