//! Periodic expiry of old rooms

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use ferry_common::protocol::ServerMessage;

use super::RoomManager;
use crate::members::MemberManager;

/// Run one expiry pass, telling members of each deleted room it is closed
pub async fn sweep_once(rooms: &RoomManager, members: &MemberManager, ttl: Duration) -> usize {
    let expired = rooms.sweep_expired(Instant::now(), ttl).await;
    for (room_id, room_members) in &expired {
        tracing::info!(room = %room_id, "room expired");
        let notice = ServerMessage::RoomClosed {
            room_id: room_id.clone(),
        };
        members.send_to_all(room_members, &notice).await;
    }
    expired.len()
}

/// Spawn the background sweeper
///
/// The first pass runs one `interval` after start.
pub fn spawn_sweeper(
    rooms: RoomManager,
    members: MemberManager,
    interval: Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let count = sweep_once(&rooms, &members, ttl).await;
            if count > 0 {
                tracing::debug!(count, "expiry sweep finished");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_common::protocol::FileInfo;
    use ferry_common::topology::TopologyLimits;
    use ferry_common::{DEFAULT_ROOM_TTL, DEFAULT_SWEEP_INTERVAL};
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_room_absent_after_ttl_plus_interval() {
        let rooms = RoomManager::new(TopologyLimits::default());
        let members = MemberManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = members.add("127.0.0.1:1".parse().unwrap(), tx).await;

        let code = rooms
            .create_room(
                host,
                "10.0.0.1".parse().unwrap(),
                FileInfo {
                    name: "a.txt".to_string(),
                    size: 1,
                    mime_type: String::new(),
                },
            )
            .await
            .unwrap();

        let handle = spawn_sweeper(
            rooms.clone(),
            members.clone(),
            DEFAULT_SWEEP_INTERVAL,
            DEFAULT_ROOM_TTL,
        );

        tokio::time::sleep(DEFAULT_ROOM_TTL / 2).await;
        assert!(rooms.contains(&code).await);

        tokio::time::sleep(DEFAULT_ROOM_TTL / 2 + DEFAULT_SWEEP_INTERVAL).await;
        assert!(!rooms.contains(&code).await);

        let (msg, _) = rx.recv().await.unwrap();
        match msg {
            ServerMessage::RoomClosed { room_id } => assert_eq!(room_id, code),
            other => panic!("Expected RoomClosed, got {:?}", other),
        }
        handle.abort();
    }
}
