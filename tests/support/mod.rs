//! In-process mock of the identity, catalog and object API hosts
//!
//! Every endpoint lives on one axum server bound to an ephemeral port, laid
//! out the way `CatalogConfig::for_base_url` expects. Tests script failures
//! through [`MockState`] and inspect the requests it recorded.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use md5::{Digest, Md5};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use dataspace_downloader::auth::{CredentialStore, TokenManager};
use dataspace_downloader::catalog::{CatalogConfig, CatalogHttpClient, SearchClient};
use dataspace_downloader::downloader::{DownloadCoordinator, RetryPolicy};
use dataspace_downloader::shutdown::{CancellationSignal, SharedCancellation};
use dataspace_downloader::{
    Checksum, ChecksumAlgorithm, Collection, ProductRecord, ProductStatus,
};

/// Retry policy with millisecond delays so retry paths run quickly.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}

/// Deterministic archive content.
pub fn archive_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// One archive served by the object API
#[derive(Debug, Clone)]
pub struct MockProduct {
    pub id: String,
    pub title: String,
    pub body: Vec<u8>,
    pub online: bool,
    /// Answer `Range` requests with 206; otherwise always send the whole body
    pub honor_range: bool,
    /// Digest advertised in listings; defaults to the body's real MD5
    pub declared_md5: Option<String>,
    /// Held before the response starts (while counted as in flight)
    pub response_delay: Duration,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    /// Drop the connection after this many bytes, on the first request only
    pub interrupt_after: Option<usize>,
    /// Pause for the duration after this many bytes, on the first request only
    pub stall_after: Option<(usize, Duration)>,
}

impl MockProduct {
    pub fn new(id: &str, body: Vec<u8>) -> Self {
        Self {
            id: id.to_string(),
            title: format!("S2A_MSIL2A_20220611T101611_{id}.SAFE"),
            body,
            online: true,
            honor_range: true,
            declared_md5: None,
            response_delay: Duration::ZERO,
            chunk_size: 4096,
            chunk_delay: Duration::ZERO,
            interrupt_after: None,
            stall_after: None,
        }
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub fn ignoring_range(mut self) -> Self {
        self.honor_range = false;
        self
    }

    pub fn with_declared_md5(mut self, md5: &str) -> Self {
        self.declared_md5 = Some(md5.to_string());
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn with_chunks(mut self, size: usize, delay: Duration) -> Self {
        self.chunk_size = size.max(1);
        self.chunk_delay = delay;
        self
    }

    pub fn interrupted_after(mut self, bytes: usize) -> Self {
        self.interrupt_after = Some(bytes);
        self
    }

    pub fn stalled_after(mut self, bytes: usize, pause: Duration) -> Self {
        self.stall_after = Some((bytes, pause));
        self
    }

    fn advertised_md5(&self) -> String {
        self.declared_md5
            .clone()
            .unwrap_or_else(|| md5_hex(&self.body))
    }
}

/// One request received by the object API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub product_id: String,
    pub range: Option<String>,
}

/// Scriptable server state and request log
pub struct MockState {
    pub token_requests: AtomicUsize,
    pub grants: Mutex<Vec<String>>,
    pub token_lifetime_secs: AtomicI64,
    pub token_delay_ms: AtomicU64,
    pub password_rejection: Mutex<Option<String>>,
    pub refresh_rejected: AtomicBool,
    /// Token exchanges whose connection is cut before the body arrives
    pub token_drops: AtomicUsize,

    pub search_pages: Mutex<Vec<Value>>,
    pub search_queries: Mutex<Vec<String>>,
    pub search_tokens: Mutex<Vec<String>>,
    /// Statuses returned, in order, before any real page is served
    pub search_failures: Mutex<VecDeque<u16>>,

    pub products: Mutex<HashMap<String, MockProduct>>,
    pub interrupted: Mutex<HashSet<String>>,
    pub stalled: Mutex<HashSet<String>>,
    pub download_requests: Mutex<Vec<DownloadRequest>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            token_requests: AtomicUsize::new(0),
            grants: Mutex::new(Vec::new()),
            token_lifetime_secs: AtomicI64::new(3600),
            token_delay_ms: AtomicU64::new(0),
            password_rejection: Mutex::new(None),
            refresh_rejected: AtomicBool::new(false),
            token_drops: AtomicUsize::new(0),
            search_pages: Mutex::new(Vec::new()),
            search_queries: Mutex::new(Vec::new()),
            search_tokens: Mutex::new(Vec::new()),
            search_failures: Mutex::new(VecDeque::new()),
            products: Mutex::new(HashMap::new()),
            interrupted: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashSet::new()),
            download_requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

struct InFlight<'a>(&'a MockState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockState {
    async fn token(&self, form: &str) -> Response {
        let n = self.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.token_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let grant = url::form_urlencoded::parse(form.as_bytes())
            .find(|(key, _)| key == "grant_type")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        self.grants.lock().unwrap().push(grant.clone());

        let dropped = self
            .token_drops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            let cut = futures::stream::once(async {
                Err::<Vec<u8>, _>(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "identity connection dropped",
                ))
            });
            return Response::builder()
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from_stream(cut))
                .unwrap();
        }

        let rejection = self.password_rejection.lock().unwrap().clone();
        if grant == "password" {
            if let Some(reason) = rejection {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "invalid_grant", "error_description": reason})),
                )
                    .into_response();
            }
        }
        if grant == "refresh_token" && self.refresh_rejected.load(Ordering::SeqCst) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_grant", "error_description": "Token is not active"})),
            )
                .into_response();
        }

        Json(json!({
            "access_token": format!("token-{n}"),
            "refresh_token": format!("refresh-{n}"),
            "expires_in": self.token_lifetime_secs.load(Ordering::SeqCst),
            "refresh_expires_in": 3600,
            "token_type": "Bearer"
        }))
        .into_response()
    }

    fn search(&self, query: Option<&str>, token: String) -> Response {
        self.search_queries
            .lock()
            .unwrap()
            .push(query.unwrap_or_default().to_string());
        self.search_tokens.lock().unwrap().push(token);

        let scripted = self.search_failures.lock().unwrap().pop_front();
        if let Some(status) = scripted {
            let status = StatusCode::from_u16(status).unwrap();
            return (status, "scripted failure").into_response();
        }

        let page = query
            .and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(key, _)| key == "page")
                    .and_then(|(_, value)| value.parse::<usize>().ok())
            })
            .unwrap_or(1);
        let payload = self
            .search_pages
            .lock()
            .unwrap()
            .get(page - 1)
            .cloned()
            .unwrap_or_else(|| feature_collection(Vec::new(), None));
        Json(payload).into_response()
    }

    fn lookup(&self, id: &str) -> Response {
        let product = self.products.lock().unwrap().get(id).cloned();
        match product {
            Some(product) => Json(json!({
                "@odata.context": "$metadata#Products/$entity",
                "Id": product.id,
                "Name": product.title,
                "ContentLength": product.body.len(),
                "Online": product.online,
                "ContentDate": {"Start": "2022-06-11T10:16:11.024Z", "End": "2022-06-11T10:16:11.024Z"},
                "Checksum": [{"Value": product.advertised_md5(), "Algorithm": "MD5"}]
            }))
            .into_response(),
            None => (StatusCode::NOT_FOUND, "no such product").into_response(),
        }
    }

    async fn download(&self, id: &str, headers: &HeaderMap) -> Response {
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.download_requests.lock().unwrap().push(DownloadRequest {
            product_id: id.to_string(),
            range: range.clone(),
        });

        let product = self.products.lock().unwrap().get(id).cloned();
        let Some(product) = product else {
            return (StatusCode::NOT_FOUND, "no such product").into_response();
        };

        {
            let _in_flight = InFlight::enter(self);
            if !product.response_delay.is_zero() {
                tokio::time::sleep(product.response_delay).await;
            }
        }

        let total = product.body.len();
        let start = if product.honor_range {
            range.as_deref().and_then(range_start)
        } else {
            None
        };
        if let Some(start) = start {
            if start >= total {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{total}"))],
                )
                    .into_response();
            }
        }

        let interrupt_at = product
            .interrupt_after
            .filter(|_| self.interrupted.lock().unwrap().insert(id.to_string()));

        let stall_at = product
            .stall_after
            .filter(|_| self.stalled.lock().unwrap().insert(id.to_string()));

        let offset = start.unwrap_or(0);
        let chunks: Vec<Vec<u8>> = product.body[offset..]
            .chunks(product.chunk_size)
            .map(<[u8]>::to_vec)
            .collect();
        let delay = product.chunk_delay;

        let stream = futures::stream::unfold(
            (chunks.into_iter(), 0usize, false, stall_at),
            move |(mut chunks, sent, failed, mut stall)| async move {
                if failed {
                    return None;
                }
                if interrupt_at.is_some_and(|limit| sent >= limit) {
                    let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "interrupted");
                    return Some((Err(err), (chunks, sent, true, stall)));
                }
                if let Some((limit, pause)) = stall {
                    if sent >= limit {
                        tokio::time::sleep(pause).await;
                        stall = None;
                    }
                }
                let chunk = chunks.next()?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let len = chunk.len();
                Some((Ok(chunk), (chunks, sent + len, false, stall)))
            },
        );

        let mut response = Response::builder();
        if let Some(start) = start {
            response = response.status(StatusCode::PARTIAL_CONTENT).header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{}/{total}", total - 1),
            );
        }
        response
            .header(header::CONTENT_TYPE, "application/zip")
            .body(Body::from_stream(stream))
            .unwrap()
    }
}

fn range_start(value: &str) -> Option<usize> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, _) = spec.split_once('-')?;
    start.parse().ok()
}

async fn route(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    if path == "/auth/token" {
        return state.token(&body).await;
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };

    if path.starts_with("/resto/api/collections/") {
        return state.search(uri.query(), token);
    }
    if let Some(id) = path
        .strip_prefix("/odata/v1/Products(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return state.lookup(id);
    }
    if let Some(id) = path
        .strip_prefix("/download/v1/Products(")
        .and_then(|rest| rest.strip_suffix(")/$value"))
    {
        return state.download(id, &headers).await;
    }
    (StatusCode::NOT_FOUND, "unknown route").into_response()
}

/// A running mock server
pub struct MockCatalog {
    pub base_url: String,
    pub state: Arc<MockState>,
    server: JoinHandle<()>,
}

impl MockCatalog {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(route).with_state(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
            server,
        }
    }

    /// Config pointing at this server with a fast three-attempt retry policy.
    pub fn config(&self) -> CatalogConfig {
        CatalogConfig::for_base_url(&self.base_url).with_retry_policy(fast_retry(3))
    }

    pub fn session(&self) -> TestSession {
        self.session_with(self.config())
    }

    pub fn session_with(&self, config: CatalogConfig) -> TestSession {
        let config = Arc::new(config);
        let client = Arc::new(reqwest::Client::new());
        let credentials = CredentialStore::new("user@example.com", "secret").unwrap();
        let tokens = Arc::new(TokenManager::with_client(
            client.clone(),
            config.clone(),
            credentials,
        ));
        let cancellation = CancellationSignal::shared();
        let http = Arc::new(
            CatalogHttpClient::new(tokens.clone())
                .with_client(client)
                .with_cancellation(cancellation.clone()),
        );
        TestSession {
            config,
            tokens,
            http,
            cancellation,
        }
    }

    /// Serve `product` and return the catalog record describing it.
    pub fn add_product(&self, product: MockProduct) -> ProductRecord {
        let record = ProductRecord {
            id: product.id.clone(),
            title: product.title.clone(),
            collection: Some(Collection::Sentinel2),
            footprint: None,
            acquired_at: Utc.with_ymd_and_hms(2022, 6, 11, 10, 16, 11).unwrap(),
            size_bytes: Some(product.body.len() as u64),
            download_uri: format!("{}/download/v1/Products({})/$value", self.base_url, product.id),
            checksum: Some(Checksum::new(ChecksumAlgorithm::Md5, product.advertised_md5())),
            status: if product.online {
                ProductStatus::Online
            } else {
                ProductStatus::Offline
            },
            extra: BTreeMap::new(),
        };
        self.state
            .products
            .lock()
            .unwrap()
            .insert(product.id.clone(), product);
        record
    }

    pub fn set_pages(&self, pages: Vec<Value>) {
        *self.state.search_pages.lock().unwrap() = pages;
    }

    pub fn fail_searches(&self, statuses: &[u16]) {
        self.state
            .search_failures
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
    }

    pub fn drop_token_exchanges(&self, count: usize) {
        self.state.token_drops.store(count, Ordering::SeqCst);
    }

    pub fn search_count(&self) -> usize {
        self.state.search_queries.lock().unwrap().len()
    }

    pub fn grants(&self) -> Vec<String> {
        self.state.grants.lock().unwrap().clone()
    }

    pub fn download_requests(&self) -> Vec<DownloadRequest> {
        self.state.download_requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, product_id: &str) -> Vec<DownloadRequest> {
        self.download_requests()
            .into_iter()
            .filter(|r| r.product_id == product_id)
            .collect()
    }
}

impl Drop for MockCatalog {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Client stack wired to a [`MockCatalog`]
pub struct TestSession {
    pub config: Arc<CatalogConfig>,
    pub tokens: Arc<TokenManager>,
    pub http: Arc<CatalogHttpClient>,
    pub cancellation: SharedCancellation,
}

impl TestSession {
    pub fn search(&self) -> SearchClient {
        SearchClient::new(self.config.clone(), self.http.clone())
    }

    pub fn coordinator(&self) -> DownloadCoordinator {
        DownloadCoordinator::new(self.config.clone(), self.http.clone())
    }
}

/// GeoJSON feature for a search page.
pub fn feature(id: &str, title: &str) -> Value {
    json!({
        "type": "Feature",
        "id": id,
        "geometry": {"type": "Point", "coordinates": [12.5, 41.9]},
        "properties": {
            "collection": "SENTINEL-2",
            "title": title,
            "startDate": "2022-06-11T10:16:11.024Z",
            "status": "ONLINE",
            "cloudCover": 4.2,
            "productType": "S2MSI2A",
            "services": {
                "download": {
                    "url": format!("http://mock/download/v1/Products({id})/$value"),
                    "size": 1024
                }
            },
            "checksum": [{"algorithm": "MD5", "value": "900150983cd24fb0d6963f7d28e17f72"}]
        }
    })
}

/// Features `first..first + count` named `p{n}`.
pub fn features(first: usize, count: usize) -> Vec<Value> {
    (first..first + count)
        .map(|n| feature(&format!("p{n}"), &format!("S2A_MSIL2A_{n}.SAFE")))
        .collect()
}

pub fn feature_collection(features: Vec<Value>, total: Option<u64>) -> Value {
    let mut properties = json!({"itemsPerPage": features.len()});
    if let Some(total) = total {
        properties["totalResults"] = json!(total);
    }
    json!({
        "type": "FeatureCollection",
        "properties": properties,
        "features": features
    })
}
