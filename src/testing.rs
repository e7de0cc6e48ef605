//! In-memory protocol client for multi-step tests
//!
//! `MockProtocolClient` covers single calls; this fake keeps a room view,
//! records everything the bot does and can be told to fail specific calls.

use crate::protocol::{
    ClientState, CreateRoomRequest, EventId, POWER_LEVELS_EVENT, PowerLevels, ProtocolClient,
    ProtocolError, ProtocolResult, RoomId, RoomSnapshot, RoomsView, SyncSignal, UserId,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A message the bot sent
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub room_id: RoomId,
    pub content: Value,
}

impl SentMessage {
    pub fn body(&self) -> &str {
        self.content["body"].as_str().unwrap_or_default()
    }

    pub fn msgtype(&self) -> &str {
        self.content["msgtype"].as_str().unwrap_or_default()
    }
}

#[derive(Default)]
struct Failures {
    sends: u32,
    send_rate_limits: VecDeque<u64>,
    redaction: Option<ProtocolError>,
    state_write: Option<ProtocolError>,
    room_creation: Option<ProtocolError>,
}

pub struct FakeClient {
    user_id: UserId,
    state: ClientState,
    next_id: AtomicU32,
    failures: Mutex<Failures>,
    sent: Mutex<Vec<SentMessage>>,
    redactions: Mutex<Vec<(RoomId, EventId, Option<String>)>>,
    created_rooms: Mutex<Vec<CreateRoomRequest>>,
    state_writes: Mutex<Vec<(RoomId, Value)>>,
    uploads: Mutex<Vec<String>>,
    joined: Mutex<Vec<RoomId>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            user_id: UserId::from("@bot:example.org"),
            state: ClientState::default(),
            next_id: AtomicU32::new(1),
            failures: Mutex::new(Failures::default()),
            sent: Mutex::new(Vec::new()),
            redactions: Mutex::new(Vec::new()),
            created_rooms: Mutex::new(Vec::new()),
            state_writes: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
        }
    }

    fn next(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn bot_id(&self) -> UserId {
        self.user_id.clone()
    }

    pub fn rooms_view(&self) -> RoomsView {
        self.state.rooms.clone()
    }

    pub fn signal(&self) -> SyncSignal {
        self.state.synced.clone()
    }

    /// Put a room in the view without a sync cycle
    pub fn add_room(&self, room: RoomSnapshot) {
        self.state.rooms.insert(room);
    }

    /// Put a room in the view and complete a sync cycle
    pub fn sync_room(&self, room: RoomSnapshot) {
        self.state.rooms.insert(room);
        self.state.synced.notify_synced();
    }

    pub fn fail_next_send(&self) {
        self.failures.lock().unwrap().sends += 1;
    }

    pub fn rate_limit_next_send(&self, retry_after_ms: u64) {
        self.failures
            .lock()
            .unwrap()
            .send_rate_limits
            .push_back(retry_after_ms);
    }

    pub fn fail_redaction(&self, error: ProtocolError) {
        self.failures.lock().unwrap().redaction = Some(error);
    }

    pub fn fail_state_write(&self, error: ProtocolError) {
        self.failures.lock().unwrap().state_write = Some(error);
    }

    pub fn fail_room_creation(&self, error: ProtocolError) {
        self.failures.lock().unwrap().room_creation = Some(error);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        self.sent().iter().map(|m| m.body().to_string()).collect()
    }

    pub fn redactions(&self) -> Vec<(RoomId, EventId, Option<String>)> {
        self.redactions.lock().unwrap().clone()
    }

    pub fn created_rooms(&self) -> Vec<CreateRoomRequest> {
        self.created_rooms.lock().unwrap().clone()
    }

    pub fn state_writes(&self) -> Vec<(RoomId, Value)> {
        self.state_writes.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn joined(&self) -> Vec<RoomId> {
        self.joined.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were sent
    pub async fn wait_for_sent(&self, count: usize, limit: Duration) {
        tokio::time::timeout(limit, async {
            while self.sent.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Timed out waiting for messages");
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
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
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(retry_after_ms) = failures.send_rate_limits.pop_front() {
                return Err(ProtocolError::RateLimited { retry_after_ms });
            }
            if failures.sends > 0 {
                failures.sends -= 1;
                return Err(ProtocolError::api(500, "M_UNKNOWN", "send failed"));
            }
        }

        self.sent.lock().unwrap().push(SentMessage {
            room_id: room_id.clone(),
            content,
        });
        Ok(EventId::new(format!("$sent{}", self.next())))
    }

    async fn redact_event(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
        reason: Option<String>,
    ) -> ProtocolResult<EventId> {
        if let Some(error) = self.failures.lock().unwrap().redaction.clone() {
            return Err(error);
        }
        self.redactions
            .lock()
            .unwrap()
            .push((room_id.clone(), event_id.clone(), reason));
        Ok(EventId::new(format!("$redaction{}", self.next())))
    }

    async fn create_room(&self, request: &CreateRoomRequest) -> ProtocolResult<RoomId> {
        // Let concurrent callers interleave here
        tokio::task::yield_now().await;

        if let Some(error) = self.failures.lock().unwrap().room_creation.clone() {
            return Err(error);
        }
        let mut created = self.created_rooms.lock().unwrap();
        created.push(request.clone());
        Ok(RoomId::new(format!("!created{}:example.org", created.len())))
    }

    async fn get_room_state(&self, room_id: &RoomId, event_type: &str) -> ProtocolResult<Value> {
        match (self.state.rooms.get(room_id), event_type) {
            (Some(room), POWER_LEVELS_EVENT) => serde_json::to_value(&room.power_levels)
                .map_err(|e| ProtocolError::InvalidResponse(e.to_string())),
            _ => Err(ProtocolError::api(404, "M_NOT_FOUND", "Event not found")),
        }
    }

    async fn put_room_state(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
    ) -> ProtocolResult<EventId> {
        if let Some(error) = self.failures.lock().unwrap().state_write.clone() {
            return Err(error);
        }

        if event_type == POWER_LEVELS_EVENT {
            if let Ok(levels) = serde_json::from_value::<PowerLevels>(content.clone()) {
                self.state
                    .rooms
                    .update(room_id, |room| room.power_levels = levels);
            }
        }
        self.state_writes
            .lock()
            .unwrap()
            .push((room_id.clone(), content));
        Ok(EventId::new(format!("$state{}", self.next())))
    }

    async fn upload(&self, _data: Vec<u8>, _content_type: &str, filename: &str) -> ProtocolResult<String> {
        self.uploads.lock().unwrap().push(filename.to_string());
        Ok(format!("mxc://example.org/{}", self.next()))
    }

    async fn join_room(&self, room_id: &RoomId) -> ProtocolResult<RoomId> {
        self.joined.lock().unwrap().push(room_id.clone());
        Ok(room_id.clone())
    }
}
