//! Session registry: rooms, membership, completion and expiry
//!
//! The room map is behind one `RwLock`; each room has its own `Mutex`, so
//! operations on one room are serialized while unrelated rooms proceed in
//! parallel. Lock order is always map then room. A room removed from the map
//! is flagged `deleted` first, and anyone still holding its handle treats it
//! as absent.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::RngExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use ferry_common::protocol::{Direction, FileInfo, Role};
use ferry_common::topology::{ModeDecision, TopologyLimits, classify_with};
use ferry_common::{
    DEFAULT_RELAY_BUFFER_LIMIT, MAX_CHUNK_SIZE, MAX_ROOM_MEMBERS, ROOM_CODE_ALPHABET,
    ROOM_CODE_LENGTH,
};

use super::types::{
    CompletionOutcome, JoinError, JoinResult, LeaveResult, RejoinResult, RelayError, Room,
    RoomError,
};

/// Attempts at finding an unused code before giving up
const MAX_CODE_ATTEMPTS: usize = 32;

type RoomHandle = Arc<Mutex<Room>>;

/// Manages all rooms
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    next_serial: Arc<AtomicU64>,
    limits: TopologyLimits,
    /// Relay bytes each room may hold
    relay_limit: usize,
}

impl RoomManager {
    pub fn new(limits: TopologyLimits) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            next_serial: Arc::new(AtomicU64::new(1)),
            limits,
            relay_limit: usize::try_from(DEFAULT_RELAY_BUFFER_LIMIT).unwrap_or(usize::MAX),
        }
    }

    pub fn with_relay_limit(mut self, bytes: u64) -> Self {
        self.relay_limit = usize::try_from(bytes).unwrap_or(usize::MAX);
        self
    }

    /// Create a room with `host` as its sole member
    pub async fn create_room(
        &self,
        host: u32,
        address: IpAddr,
        file_info: FileInfo,
    ) -> Result<String, RoomError> {
        let mut rooms = self.rooms.write().await;

        let mut rng = rand::rng();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code: String = (0..ROOM_CODE_LENGTH)
                .map(|_| {
                    ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char
                })
                .collect();
            if rooms.contains_key(&code) {
                continue;
            }

            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
            let room = Room::new(
                code.clone(),
                serial,
                host,
                address,
                file_info,
                Instant::now(),
                self.relay_limit,
            );
            rooms.insert(code.clone(), Arc::new(Mutex::new(room)));
            return Ok(code);
        }

        Err(RoomError::IdSpaceExhausted)
    }

    /// Join a room
    ///
    /// Idempotent for existing members. The host joining its own room turns
    /// it into a self-transfer. The second distinct member triggers
    /// classification.
    pub async fn join(
        &self,
        room_id: &str,
        member_id: u32,
        address: IpAddr,
    ) -> Result<JoinResult, JoinError> {
        let handle = self.get(room_id).await.ok_or(JoinError::NotFound)?;
        let mut room = handle.lock().await;
        if room.deleted {
            return Err(JoinError::NotFound);
        }

        if room.is_host(member_id) {
            room.self_transfer = true;
            return Ok(join_result(&room, false, true, None));
        }

        if room.has_member(member_id) {
            return Ok(join_result(&room, true, false, None));
        }

        if room.self_transfer || room.members.len() >= MAX_ROOM_MEMBERS {
            return Err(JoinError::Full);
        }

        room.members.push(member_id);
        room.addresses.insert(member_id, address);
        let decision = self.classify_if_paired(&mut room);

        Ok(join_result(&room, false, false, decision))
    }

    /// Re-enter a room after a reconnect
    ///
    /// Returns `RoomError::Gone` if the room no longer exists. Only the call
    /// that actually re-adds the member yields members to notify. When the
    /// room is full, the seat for `direction` is still held by the member's
    /// old connection; that member is evicted and reported in `evicted`.
    pub async fn rejoin(
        &self,
        room_id: &str,
        member_id: u32,
        direction: Direction,
        transfer_id: Option<&str>,
        address: IpAddr,
    ) -> Result<RejoinResult, RoomError> {
        let handle = self.get(room_id).await.ok_or(RoomError::Gone)?;
        let mut room = handle.lock().await;
        if room.deleted {
            return Err(RoomError::Gone);
        }

        let mut notify = Vec::new();
        let mut decision = None;
        let mut evicted = None;
        if !room.has_member(member_id) {
            if room.members.len() >= MAX_ROOM_MEMBERS {
                let stale = stale_seat(&room, direction).ok_or(RoomError::Full)?;
                remove_member(&mut room, stale);
                evicted = Some(stale);
            }
            room.members.push(member_id);
            room.addresses.insert(member_id, address);
            if direction == Direction::Send && room.host_vacant() {
                room.host = Some(member_id);
            }
            notify = room.others(member_id);
            decision = self.classify_if_paired(&mut room);
        }

        let buffered_chunks = match transfer_id {
            Some(id) => {
                if direction == Direction::Receive {
                    // A restarted receiver reports what it holds on its next pull
                    room.relay.forget_held(id);
                }
                room.relay.indices(id)
            }
            None => Vec::new(),
        };

        Ok(RejoinResult {
            file_info: room.file_info.clone(),
            mode: room.transfer_mode(),
            buffered_chunks,
            notify,
            evicted,
            decision,
            members: room.members.clone(),
        })
    }

    /// Record a completed role
    ///
    /// Returns `Closing` exactly once per room: for the report that completes
    /// the role set. A receiver report also drops the transfer's relay chunks.
    pub async fn report_role_complete(
        &self,
        room_id: &str,
        member_id: u32,
        role: Role,
        transfer_id: Option<&str>,
    ) -> Result<CompletionOutcome, RoomError> {
        let handle = self.get(room_id).await.ok_or(RoomError::NotFound)?;
        let mut room = handle.lock().await;
        if room.deleted {
            return Err(RoomError::NotFound);
        }
        if !room.has_member(member_id) {
            return Err(RoomError::NotMember);
        }

        room.completion_roles
            .entry(member_id)
            .or_default()
            .insert(role);

        if role == Role::Receiver
            && let Some(id) = transfer_id
        {
            room.relay.drop_transfer(id);
        }

        if room.closing || !room.all_roles_complete() {
            return Ok(CompletionOutcome::Recorded);
        }

        room.closing = true;
        Ok(CompletionOutcome::Closing {
            serial: room.serial,
            members: room.members.clone(),
        })
    }

    /// Delete a completed room, returning the members to notify
    ///
    /// Does nothing if the room is already gone or the code now belongs to a
    /// different room.
    pub async fn close(&self, room_id: &str, serial: u64) -> Option<Vec<u32>> {
        let mut rooms = self.rooms.write().await;
        let handle = rooms.get(room_id)?.clone();
        let mut room = handle.lock().await;
        if room.serial != serial || room.deleted {
            return None;
        }
        rooms.remove(room_id);
        Some(delete_room(&mut room))
    }

    /// Leave a room; an empty room is deleted immediately
    pub async fn leave(&self, room_id: &str, member_id: u32) -> Result<LeaveResult, RoomError> {
        let handle = self.get(room_id).await.ok_or(RoomError::NotFound)?;
        let result = {
            let mut room = handle.lock().await;
            if room.deleted {
                return Err(RoomError::NotFound);
            }
            if !remove_member(&mut room, member_id) {
                return Err(RoomError::NotMember);
            }
            if room.is_empty() {
                delete_room(&mut room);
            }
            LeaveResult {
                remaining: room.members.clone(),
                deleted: room.deleted,
            }
        };

        if result.deleted {
            self.unlink(room_id, &handle).await;
        }
        Ok(result)
    }

    /// Remove a member from every room it belongs to (connection closed)
    ///
    /// Returns `(room_id, remaining_members)` per room left.
    pub async fn remove_from_all(&self, member_id: u32) -> Vec<(String, Vec<u32>)> {
        let handles: Vec<(String, RoomHandle)> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let mut left = Vec::new();
        for (room_id, handle) in handles {
            let deleted = {
                let mut room = handle.lock().await;
                if room.deleted || !remove_member(&mut room, member_id) {
                    continue;
                }
                if room.is_empty() {
                    delete_room(&mut room);
                }
                left.push((room_id.clone(), room.members.clone()));
                room.deleted
            };
            if deleted {
                self.unlink(&room_id, &handle).await;
            }
        }
        left
    }

    /// Delete every room created at or before `now - ttl`
    ///
    /// Returns `(room_id, members)` for each deleted room.
    pub async fn sweep_expired(&self, now: Instant, ttl: Duration) -> Vec<(String, Vec<u32>)> {
        let mut rooms = self.rooms.write().await;
        let mut expired = Vec::new();

        for (room_id, handle) in rooms.iter() {
            let mut room = handle.lock().await;
            if now.saturating_duration_since(room.created_at) >= ttl {
                expired.push((room_id.clone(), delete_room(&mut room)));
            }
        }
        for (room_id, _) in &expired {
            rooms.remove(room_id);
        }
        expired
    }

    /// The other members of a room the caller belongs to
    pub async fn others_in_room(&self, room_id: &str, member_id: u32) -> Result<Vec<u32>, RoomError> {
        let handle = self.get(room_id).await.ok_or(RoomError::NotFound)?;
        let room = handle.lock().await;
        if room.deleted {
            return Err(RoomError::NotFound);
        }
        if !room.has_member(member_id) {
            return Err(RoomError::NotMember);
        }
        Ok(room.others(member_id))
    }

    /// Buffer a relay chunk, returning the members to notify
    ///
    /// Fails with `RelayError::Busy` when the room's buffer is full of chunks
    /// the receiver has not taken yet.
    pub async fn relay_store(
        &self,
        room_id: &str,
        member_id: u32,
        transfer_id: &str,
        index: u64,
        total_chunks: u64,
        payload: Vec<u8>,
    ) -> Result<Vec<u32>, RelayError> {
        if index >= total_chunks {
            return Err(RelayError::IndexOutOfRange {
                index,
                total: total_chunks,
            });
        }
        if payload.len() as u64 > MAX_CHUNK_SIZE {
            return Err(RelayError::ChunkTooLarge(payload.len()));
        }

        let handle = self.get(room_id).await.ok_or(RelayError::RoomNotFound)?;
        let mut room = handle.lock().await;
        if room.deleted {
            return Err(RelayError::RoomNotFound);
        }
        if !room.has_member(member_id) {
            return Err(RelayError::NotMember);
        }

        room.relay.store(transfer_id, index, total_chunks, payload)?;
        Ok(room.others(member_id))
    }

    /// Fetch a buffered relay chunk
    ///
    /// `held_below` records how far the caller holds the transfer
    /// contiguously; those chunks become evictable.
    pub async fn relay_fetch(
        &self,
        room_id: &str,
        member_id: u32,
        transfer_id: &str,
        index: u64,
        held_below: u64,
    ) -> Result<Arc<Vec<u8>>, RelayError> {
        let handle = self.get(room_id).await.ok_or(RelayError::RoomNotFound)?;
        let mut room = handle.lock().await;
        if room.deleted {
            return Err(RelayError::RoomNotFound);
        }
        if !room.has_member(member_id) {
            return Err(RelayError::NotMember);
        }
        room.relay.mark_held(transfer_id, held_below);
        room.relay
            .get(transfer_id, index)
            .map(|entry| entry.payload.clone())
            .ok_or(RelayError::ChunkMissing(index))
    }

    /// Whether the member belongs to any live room
    pub async fn is_member_anywhere(&self, member_id: u32) -> bool {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        for handle in handles {
            let room = handle.lock().await;
            if !room.deleted && room.has_member(member_id) {
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Remove a deleted room's map entry if it still points at `handle`
    async fn unlink(&self, room_id: &str, handle: &RoomHandle) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(room_id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            rooms.remove(room_id);
        }
    }

    /// Classify the room once it holds two distinct members and has no mode
    fn classify_if_paired(&self, room: &mut Room) -> Option<ModeDecision> {
        if room.mode.is_some() || room.members.len() < MAX_ROOM_MEMBERS {
            return None;
        }
        let local = *room.addresses.get(&room.members[0])?;
        let remote = *room.addresses.get(&room.members[1])?;
        let decision = classify_with(local, remote, room.file_info.size, &self.limits);
        room.mode = Some(decision.clone());
        Some(decision)
    }
}

fn join_result(
    room: &Room,
    already_member: bool,
    self_transfer: bool,
    decision: Option<ModeDecision>,
) -> JoinResult {
    JoinResult {
        room_id: room.id.clone(),
        file_info: room.file_info.clone(),
        mode: room.transfer_mode(),
        self_transfer,
        already_member,
        decision,
        members: room.members.clone(),
    }
}

/// The member occupying the seat a rejoin in `direction` reclaims
///
/// Senders hold the host seat and receivers the other one.
fn stale_seat(room: &Room, direction: Direction) -> Option<u32> {
    match direction {
        Direction::Send => room.host.filter(|&host| room.has_member(host)),
        Direction::Receive => room.members.iter().copied().find(|&m| !room.is_host(m)),
    }
}

fn remove_member(room: &mut Room, member_id: u32) -> bool {
    let Some(pos) = room.members.iter().position(|&m| m == member_id) else {
        return false;
    };
    room.members.remove(pos);
    room.addresses.remove(&member_id);
    if room.host == Some(member_id) {
        room.host = None;
    }
    true
}

/// Mark deleted and release buffered state, returning the former members
fn delete_room(room: &mut Room) -> Vec<u32> {
    room.deleted = true;
    room.relay.clear();
    std::mem::take(&mut room.members)
}
