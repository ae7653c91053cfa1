//! # HTTP Remote Gateway
//!
//! [`RemoteGateway`] over the backend's REST API.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST {base}/{entity}s          create  (Idempotency-Key: local_id)    │
//! │  PUT  {base}/{entity}s/{id}     update                                  │
//! │  GET  {base}/{entity}s          list    ?updated_since=&offset=&limit= │
//! │  GET  {base}/health             probe                                   │
//! │                                                                         │
//! │  STATUS MAPPING:                                                        │
//! │  2xx                 → decoded body                                    │
//! │  408, 429, 5xx       → NetworkUnavailable (retried next pass)          │
//! │  other 4xx           → RemoteRejected (counts toward parking)          │
//! │  connect/DNS/TLS     → NetworkUnavailable                              │
//! │  client timeout      → Timeout                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use titan_core::{EntityType, RemoteRecord};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{ListFilter, RemoteGateway, UploadPayload};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct HttpRemoteGateway {
    client: Client,
    base: Url,
    api_key: Option<String>,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpRemoteGateway {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> SyncResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }
        // relative joins need a trailing slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpRemoteGateway {
            client,
            base,
            api_key,
            request_timeout,
            probe_timeout,
        })
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(
            &config.api.base_url,
            config.api.api_key.clone(),
            config.request_timeout(),
            config.probe_timeout(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn collection_url(&self, entity_type: EntityType) -> SyncResult<Url> {
        Ok(self.base.join(&format!("{}s", entity_type.as_str()))?)
    }

    fn item_url(&self, entity_type: EntityType, server_id: &str) -> SyncResult<Url> {
        let mut url = self.collection_url(entity_type)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base.to_string()))?
            .push(server_id);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            SyncError::NetworkUnavailable(err.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        entity_type: EntityType,
        response: Response,
    ) -> SyncResult<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                if e.is_timeout() {
                    self.transport_error(e)
                } else {
                    SyncError::DeserializationFailed(e.to_string())
                }
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(entity_type, status, body.trim()))
    }
}

fn classify(entity_type: EntityType, status: StatusCode, body: &str) -> SyncError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        warn!(%entity_type, %status, "Backend unavailable");
        SyncError::NetworkUnavailable(detail)
    } else {
        SyncError::rejected(entity_type, detail)
    }
}

#[async_trait]
impl RemoteGateway for HttpRemoteGateway {
    async fn create(
        &self,
        entity_type: EntityType,
        payload: &UploadPayload,
    ) -> SyncResult<RemoteRecord> {
        let url = self.collection_url(entity_type)?;
        debug!(%entity_type, local_id = %payload.local_id, "POST {}", url);

        let request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, payload.local_id.as_str())
            .json(payload);
        let response = self.send(request).await?;
        self.decode(entity_type, response).await
    }

    async fn update(
        &self,
        entity_type: EntityType,
        server_id: &str,
        payload: &UploadPayload,
    ) -> SyncResult<RemoteRecord> {
        let url = self.item_url(entity_type, server_id)?;
        debug!(%entity_type, %server_id, "PUT {}", url);

        let response = self.send(self.client.put(url).json(payload)).await?;
        self.decode(entity_type, response).await
    }

    async fn list(&self, entity_type: EntityType, filter: &ListFilter) -> SyncResult<Vec<RemoteRecord>> {
        let url = self.collection_url(entity_type)?;

        let mut query = vec![
            ("offset", filter.offset.to_string()),
            ("limit", filter.limit.to_string()),
        ];
        if let Some(since) = filter.updated_since {
            query.push((
                "updated_since",
                since.to_rfc3339_opts(SecondsFormat::Micros, true),
            ));
        }

        let response = self.send(self.client.get(url).query(&query)).await?;
        self.decode(entity_type, response).await
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.base.join("health") else {
            return false;
        };

        let request = self.authorize(self.client.get(url).timeout(self.probe_timeout));
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use titan_core::{Entity, Product};

    #[derive(Default)]
    struct Backend {
        idempotency_keys: Mutex<Vec<String>>,
        auth: Mutex<Option<String>>,
        list_query: Mutex<HashMap<String, String>>,
    }

    async fn create_product(
        State(backend): State<Arc<Backend>>,
        headers: HeaderMap,
        Json(payload): Json<UploadPayload>,
    ) -> (StatusCode, Json<RemoteRecord>) {
        if let Some(key) = headers.get(IDEMPOTENCY_HEADER).and_then(|v| v.to_str().ok()) {
            backend.idempotency_keys.lock().unwrap().push(key.to_string());
        }
        *backend.auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        (
            StatusCode::CREATED,
            Json(RemoteRecord {
                server_id: "ITM-001".into(),
                local_id: Some(payload.local_id),
                updated_at: payload.updated_at,
                entity: payload.entity,
            }),
        )
    }

    async fn update_product(
        Path(id): Path<String>,
        Json(payload): Json<UploadPayload>,
    ) -> Json<RemoteRecord> {
        Json(RemoteRecord {
            server_id: id,
            local_id: Some(payload.local_id),
            updated_at: payload.updated_at,
            entity: payload.entity,
        })
    }

    async fn list_products(
        State(backend): State<Arc<Backend>>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Vec<RemoteRecord>> {
        *backend.list_query.lock().unwrap() = query;
        Json(Vec::new())
    }

    async fn serve(backend: Arc<Backend>) -> String {
        let router = Router::new()
            .route("/api/v1/health", get(|| async { StatusCode::OK }))
            .route("/api/v1/products", post(create_product).get(list_products))
            .route("/api/v1/products/{id}", axum::routing::put(update_product))
            .route(
                "/api/v1/customers",
                post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "email already registered") })
                    .get(|| async {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Json(Vec::<RemoteRecord>::new())
                    }),
            )
            .route(
                "/api/v1/transactions",
                get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .with_state(backend);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/v1", addr)
    }

    fn gateway(base_url: &str) -> HttpRemoteGateway {
        HttpRemoteGateway::new(
            base_url,
            Some("secret".into()),
            Duration::from_millis(300),
            Duration::from_millis(300),
        )
        .unwrap()
    }

    fn payload(local_id: &str) -> UploadPayload {
        let record = titan_core::Record::with_local_id(
            local_id,
            Entity::Product(Product::new("Widget", 999)),
        );
        UploadPayload::from_record(&record)
    }

    #[test]
    fn test_endpoint_urls() {
        let gateway = gateway("https://api.example.com/v1");
        assert_eq!(
            gateway.collection_url(EntityType::Transaction).unwrap().as_str(),
            "https://api.example.com/v1/transactions"
        );
        assert_eq!(
            gateway.item_url(EntityType::Product, "ITM/7").unwrap().as_str(),
            "https://api.example.com/v1/products/ITM%2F7"
        );
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = HttpRemoteGateway::new(
            "ftp://example.com",
            None,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(SyncError::InvalidUrl(_))));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify(EntityType::Product, StatusCode::BAD_GATEWAY, ""),
            SyncError::NetworkUnavailable(_)
        ));
        assert!(matches!(
            classify(EntityType::Product, StatusCode::TOO_MANY_REQUESTS, ""),
            SyncError::NetworkUnavailable(_)
        ));
        assert!(matches!(
            classify(EntityType::Product, StatusCode::CONFLICT, "duplicate sku"),
            SyncError::RemoteRejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_create_sends_idempotency_key_and_token() {
        let backend = Arc::new(Backend::default());
        let gateway = gateway(&serve(backend.clone()).await);

        let created = gateway
            .create(EntityType::Product, &payload("P1"))
            .await
            .unwrap();

        assert_eq!(created.server_id, "ITM-001");
        assert_eq!(created.local_id.as_deref(), Some("P1"));
        assert_eq!(*backend.idempotency_keys.lock().unwrap(), vec!["P1".to_string()]);
        assert_eq!(backend.auth.lock().unwrap().as_deref(), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn test_update_targets_server_id() {
        let gateway = gateway(&serve(Arc::new(Backend::default())).await);

        let updated = gateway
            .update(EntityType::Product, "ITM-042", &payload("P1"))
            .await
            .unwrap();
        assert_eq!(updated.server_id, "ITM-042");
    }

    #[tokio::test]
    async fn test_list_passes_filter() {
        let backend = Arc::new(Backend::default());
        let gateway = gateway(&serve(backend.clone()).await);
        let since = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();

        let page = gateway
            .list(EntityType::Product, &ListFilter::since(Some(since), 50).next_page())
            .await
            .unwrap();

        assert!(page.is_empty());
        let query = backend.list_query.lock().unwrap().clone();
        assert_eq!(query["offset"], "50");
        assert_eq!(query["limit"], "50");
        assert_eq!(query["updated_since"], "2024-01-15T10:30:00.000000Z");
    }

    #[tokio::test]
    async fn test_client_error_is_rejection() {
        let gateway = gateway(&serve(Arc::new(Backend::default())).await);

        let err = gateway
            .create(EntityType::Customer, &payload("C1"))
            .await
            .unwrap_err();
        match err {
            SyncError::RemoteRejected { entity_type, reason } => {
                assert_eq!(entity_type, EntityType::Customer);
                assert!(reason.contains("email already registered"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let gateway = gateway(&serve(Arc::new(Backend::default())).await);

        let err = gateway
            .list(EntityType::Transaction, &ListFilter::since(None, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NetworkUnavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let gateway = gateway(&serve(Arc::new(Backend::default())).await);

        let err = gateway
            .list(EntityType::Customer, &ListFilter::since(None, 10))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::Timeout(300));
    }

    #[tokio::test]
    async fn test_health_check() {
        let gateway = gateway(&serve(Arc::new(Backend::default())).await);
        assert!(gateway.health_check().await);
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let gateway = gateway(&format!("http://{}/api/v1", addr));

        assert!(!gateway.health_check().await);
        let err = gateway
            .create(EntityType::Product, &payload("P1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NetworkUnavailable(_)));
    }
}
