//! HTTP transport backed by `reqwest` with a streaming body and an in-memory response cache.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::TransportConfig;
use crate::core::error::{AppResult, TransportError};
use crate::core::loader::{DataTransport, ResponseMetadata, TransferEvents, TransportHandle};
use crate::core::request::ImageRequest;
use crate::util::serde::TransferId;

#[derive(Clone)]
struct CachedResponse {
    body: Arc<[u8]>,
    metadata: ResponseMetadata,
}

/// Successful responses keyed by URL, bounded by total body size.
struct ResponseCache {
    entries: HashMap<Url, CachedResponse>,
    order: VecDeque<Url>,
    bytes: usize,
    budget: usize,
}

impl ResponseCache {
    fn new(budget: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            bytes: 0,
            budget,
        }
    }

    const fn is_enabled(&self) -> bool {
        self.budget > 0
    }

    fn get(&self, url: &Url) -> Option<CachedResponse> {
        self.entries.get(url).cloned()
    }

    fn insert(&mut self, url: Url, response: CachedResponse) {
        let size = response.body.len();
        if size > self.budget {
            return;
        }
        if let Some(previous) = self.entries.remove(&url) {
            self.bytes -= previous.body.len();
            self.order.retain(|existing| existing != &url);
        }
        while self.bytes + size > self.budget {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.bytes -= evicted.body.len();
            }
        }
        self.bytes += size;
        self.order.push_back(url.clone());
        self.entries.insert(url, response);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.bytes = 0;
    }
}

struct Shared {
    client: reqwest::Client,
    runtime: Handle,
    resource_timeout: Duration,
    cache: Mutex<ResponseCache>,
    live: Mutex<HashMap<TransferId, Weak<HttpHandle>>>,
}

enum FetchState {
    Idle,
    Running(AbortHandle),
    Finished,
}

struct HttpHandle {
    url: Url,
    events: TransferEvents,
    state: Mutex<FetchState>,
    shared: Weak<Shared>,
}

impl HttpHandle {
    fn untrack(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.live.lock().remove(&self.events.transfer_id());
        }
    }
}

impl Drop for HttpHandle {
    fn drop(&mut self) {
        self.untrack();
    }
}

impl TransportHandle for HttpHandle {
    fn start(&self) {
        let Some(shared) = self.shared.upgrade() else {
            self.events
                .did_complete(ResponseMetadata::default(), Some(TransportError::Invalidated));
            return;
        };
        let mut state = self.state.lock();
        if !matches!(*state, FetchState::Idle) {
            return;
        }
        let fetch = fetch(Arc::clone(&shared), self.url.clone(), self.events.clone());
        let task = shared.runtime.spawn(fetch);
        *state = FetchState::Running(task.abort_handle());
        trace!(transfer = self.events.transfer_id(), url = %self.url, "fetch started");
    }

    fn cancel(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), FetchState::Finished);
        self.untrack();
        match previous {
            FetchState::Finished => return,
            FetchState::Running(abort) => abort.abort(),
            FetchState::Idle => {}
        }
        debug!(transfer = self.events.transfer_id(), "fetch cancelled");
        self.events
            .did_complete(ResponseMetadata::default(), Some(TransportError::Cancelled));
    }
}

/// [`DataTransport`] issuing GET requests with `reqwest` on a tokio runtime.
///
/// Body chunks are reported as they arrive. Successful responses are kept in a response cache
/// bounded by [`TransportConfig::response_cache_bytes`] and served from it without touching the
/// network.
pub struct HttpTransport {
    shared: Arc<Shared>,
}

impl HttpTransport {
    /// Build a transport that runs fetches on `runtime`.
    pub fn new(config: &TransportConfig, runtime: Handle) -> AppResult<Self> {
        let client = Self::client_builder(config).build()?;
        Ok(Self::with_client(client, config, runtime))
    }

    /// Client settings derived from `config`. The request timeout bounds both connecting and
    /// every idle gap while reading the response.
    fn client_builder(config: &TransportConfig) -> reqwest::ClientBuilder {
        let builder = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .read_timeout(config.request_timeout());
        match &config.user_agent {
            Some(user_agent) => builder.user_agent(user_agent.clone()),
            None => builder,
        }
    }

    /// Build a transport around an existing client.
    pub fn with_client(client: reqwest::Client, config: &TransportConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                runtime,
                resource_timeout: config.resource_timeout(),
                cache: Mutex::new(ResponseCache::new(config.response_cache_bytes)),
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Total size of the cached response bodies.
    pub fn cached_bytes(&self) -> usize {
        self.shared.cache.lock().bytes
    }
}

impl DataTransport for HttpTransport {
    fn open(&self, request: &ImageRequest, events: TransferEvents) -> Arc<dyn TransportHandle> {
        let id = events.transfer_id();
        trace!(transfer = id, url = %request.url(), priority = ?request.priority(), "opening fetch");
        let handle = Arc::new(HttpHandle {
            url: request.url().clone(),
            events,
            state: Mutex::new(FetchState::Idle),
            shared: Arc::downgrade(&self.shared),
        });
        self.shared.live.lock().insert(id, Arc::downgrade(&handle));
        handle
    }

    fn invalidate(&self) {
        let live: Vec<Arc<HttpHandle>> = self
            .shared
            .live
            .lock()
            .drain()
            .filter_map(|(_, handle)| handle.upgrade())
            .collect();
        if !live.is_empty() {
            warn!(live = live.len(), "cancelling in-flight fetches");
        }
        for handle in live {
            handle.cancel();
        }
    }

    fn remove_all_cached_responses(&self) {
        self.shared.cache.lock().clear();
    }
}

async fn fetch(shared: Arc<Shared>, url: Url, events: TransferEvents) {
    let cached = shared.cache.lock().get(&url);
    if let Some(cached) = cached {
        trace!(transfer = events.transfer_id(), url = %url, "serving cached response");
        events.did_receive(&cached.body, Some(cached.body.len() as u64));
        events.did_complete(cached.metadata, None);
        shared.live.lock().remove(&events.transfer_id());
        return;
    }

    let keep_body = shared.cache.lock().is_enabled();
    let outcome = tokio::time::timeout(
        shared.resource_timeout,
        download(&shared.client, &url, &events, keep_body),
    )
    .await;
    shared.live.lock().remove(&events.transfer_id());

    match outcome {
        Err(_) => {
            debug!(transfer = events.transfer_id(), url = %url, "fetch timed out");
            events.did_complete(ResponseMetadata::default(), Some(TransportError::TimedOut));
        }
        Ok(Err((metadata, err))) => {
            debug!(transfer = events.transfer_id(), url = %url, error = %err, "fetch failed");
            events.did_complete(metadata, Some(err));
        }
        Ok(Ok((metadata, body))) => {
            if keep_body {
                let response = CachedResponse {
                    body: body.into(),
                    metadata: metadata.clone(),
                };
                shared.cache.lock().insert(url, response);
            }
            events.did_complete(metadata, None);
        }
    }
}

type DownloadResult = Result<(ResponseMetadata, Vec<u8>), (ResponseMetadata, TransportError)>;

async fn download(
    client: &reqwest::Client,
    url: &Url,
    events: &TransferEvents,
    keep_body: bool,
) -> DownloadResult {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|err| (ResponseMetadata::default(), map_error(&err)))?;

    let status = response.status();
    let metadata = ResponseMetadata {
        status: Some(status.as_u16()),
        content_type: response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        expected_length: response.content_length(),
    };
    if !status.is_success() {
        return Err((metadata, TransportError::Status(status.as_u16())));
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => return Err((metadata, map_error(&err))),
        };
        events.did_receive(&chunk, metadata.expected_length);
        if keep_body {
            body.extend_from_slice(&chunk);
        }
    }
    Ok((metadata, body))
}

fn map_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::Network(err.to_string())
    }
}
