//! Matrix client-server API over HTTP
//!
//! A thin client: every method is one request, and errors are classified
//! into [`ProtocolError`] so the retry wrapper can recognise rate limits.
//! The sync loop keeps the shared room view current and fires the sync
//! signal once per completed cycle.

use crate::protocol::sync::{SyncEvent, SyncResponse, apply_sync};
use crate::protocol::{
    ClientState, CreateRoomRequest, EventId, LIMIT_EXCEEDED, ProtocolClient, ProtocolError,
    ProtocolResult, RoomId, RoomsView, SyncSignal, UserId,
};
use crate::ratelimit::RateLimitRetrier;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pause between sync attempts after a failed one
const SYNC_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Backoff used when a 429 carries no `retry_after_ms`
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    errcode: Option<String>,
    error: Option<String>,
    retry_after_ms: Option<u64>,
}

#[derive(Deserialize)]
struct EventIdBody {
    event_id: EventId,
}

#[derive(Deserialize)]
struct RoomIdBody {
    room_id: RoomId,
}

#[derive(Deserialize)]
struct UploadBody {
    content_uri: String,
}

/// Classify a non-success response into a protocol error
#[must_use]
pub fn classify_error(status: u16, body: &str) -> ProtocolError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let errcode = parsed
        .errcode
        .unwrap_or_else(|| format!("HTTP_{status}"));

    if status == StatusCode::TOO_MANY_REQUESTS.as_u16() || errcode == LIMIT_EXCEEDED {
        return ProtocolError::RateLimited {
            retry_after_ms: parsed.retry_after_ms.unwrap_or(DEFAULT_RETRY_AFTER_MS),
        };
    }

    ProtocolError::api(status, errcode, parsed.error.unwrap_or_default())
}

/// HTTP client for one bot account
pub struct MatrixClient {
    http: reqwest::Client,
    homeserver: Url,
    access_token: String,
    user_id: UserId,
    state: ClientState,
}

impl std::fmt::Debug for MatrixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixClient")
            .field("homeserver", &self.homeserver.as_str())
            .field("user_id", &self.user_id)
            .field("rooms", &self.state.rooms)
            .finish_non_exhaustive()
    }
}

impl MatrixClient {
    /// Create a client for `user_id` on `homeserver`
    ///
    /// # Errors
    /// Returns an error if the homeserver URL cannot be parsed or the HTTP
    /// client cannot be built.
    pub fn new(
        homeserver: &str,
        user_id: UserId,
        access_token: impl Into<String>,
    ) -> ProtocolResult<Self> {
        let homeserver = Url::parse(homeserver)
            .map_err(|e| ProtocolError::Local(format!("Invalid homeserver URL {homeserver}: {e}")))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            homeserver,
            access_token: access_token.into(),
            user_id,
            state: ClientState::default(),
        })
    }

    fn url(&self, prefix: &[&str], segments: &[&str]) -> ProtocolResult<Url> {
        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ProtocolError::Local(format!("Homeserver URL {} cannot be a base", self.homeserver))
            })?
            .pop_if_empty()
            .extend(prefix)
            .extend(segments);
        Ok(url)
    }

    fn client_url(&self, segments: &[&str]) -> ProtocolResult<Url> {
        self.url(&["_matrix", "client", "v3"], segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProtocolResult<T> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &body))
    }

    /// Run one long-polling sync request
    ///
    /// # Errors
    /// Returns the classified protocol error if the request fails.
    pub async fn sync_once(&self, since: Option<&str>, timeout_ms: u64) -> ProtocolResult<SyncResponse> {
        let mut url = self.client_url(&["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeout", &timeout_ms.to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }

        self.execute(
            self.request(Method::GET, url)
                .timeout(Duration::from_millis(timeout_ms) + Duration::from_secs(30)),
        )
        .await
    }

    /// Sync until the event receiver goes away
    ///
    /// Each completed cycle updates the room view, fires the sync signal and
    /// then forwards the cycle's events in order.
    pub async fn sync_forever(
        &self,
        events: Sender<SyncEvent>,
        retrier: &RateLimitRetrier,
        timeout_ms: u64,
    ) {
        let mut since: Option<String> = None;
        info!(user_id = %self.user_id, "Starting sync loop");

        loop {
            let response = retrier
                .execute("sync", || self.sync_once(since.as_deref(), timeout_ms))
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    error!("Sync failed: {e}");
                    tokio::time::sleep(SYNC_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let next_batch = response.next_batch.clone();
            let batch = apply_sync(&self.state.rooms, response, since.is_some());
            if since.is_none() {
                info!(rooms = self.state.rooms.len(), "Initial sync complete");
            }
            since = Some(next_batch);
            self.state.synced.notify_synced();

            for event in batch {
                if events.send(event).await.is_err() {
                    info!("Event receiver closed, stopping sync loop");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ProtocolClient for MatrixClient {
    fn user_id(&self) -> UserId {
        self.user_id.clone()
    }

    fn rooms(&self) -> RoomsView {
        self.state.rooms.clone()
    }

    fn sync_signal(&self) -> SyncSignal {
        self.state.synced.clone()
    }

    async fn send_message(&self, room_id: &RoomId, content: Value) -> ProtocolResult<EventId> {
        let txn_id = Uuid::new_v4().to_string();
        let url = self.client_url(&["rooms", room_id.as_str(), "send", "m.room.message", &txn_id])?;
        debug!(room_id = %room_id, txn_id = %txn_id, "Sending message");

        let body: EventIdBody = self.execute(self.request(Method::PUT, url).json(&content)).await?;
        Ok(body.event_id)
    }

    async fn redact_event(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
        reason: Option<String>,
    ) -> ProtocolResult<EventId> {
        let txn_id = Uuid::new_v4().to_string();
        let url = self.client_url(&["rooms", room_id.as_str(), "redact", event_id.as_str(), &txn_id])?;
        let body = reason.map_or_else(|| json!({}), |reason| json!({ "reason": reason }));

        let body: EventIdBody = self.execute(self.request(Method::PUT, url).json(&body)).await?;
        Ok(body.event_id)
    }

    async fn create_room(&self, request: &CreateRoomRequest) -> ProtocolResult<RoomId> {
        let url = self.client_url(&["createRoom"])?;
        let body: RoomIdBody = self.execute(self.request(Method::POST, url).json(request)).await?;
        Ok(body.room_id)
    }

    async fn get_room_state(&self, room_id: &RoomId, event_type: &str) -> ProtocolResult<Value> {
        let url = self.client_url(&["rooms", room_id.as_str(), "state", event_type, ""])?;
        self.execute(self.request(Method::GET, url)).await
    }

    async fn put_room_state(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
    ) -> ProtocolResult<EventId> {
        let url = self.client_url(&["rooms", room_id.as_str(), "state", event_type, ""])?;
        let body: EventIdBody = self.execute(self.request(Method::PUT, url).json(&content)).await?;
        Ok(body.event_id)
    }

    async fn upload(
        &self,
        data: Vec<u8>,
        content_type: &str,
        filename: &str,
    ) -> ProtocolResult<String> {
        let mut url = self.url(&["_matrix", "media", "v3"], &["upload"])?;
        url.query_pairs_mut().append_pair("filename", filename);

        let request = self
            .request(Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);
        let body: UploadBody = self.execute(request).await?;
        Ok(body.content_uri)
    }

    async fn join_room(&self, room_id: &RoomId) -> ProtocolResult<RoomId> {
        let url = self.client_url(&["join", room_id.as_str()])?;
        let body: RoomIdBody = self.execute(self.request(Method::POST, url).json(&json!({}))).await?;
        if &body.room_id != room_id {
            warn!(requested = %room_id, joined = %body.room_id, "Joined a different room id than requested");
        }
        Ok(body.room_id)
    }
}
