//! Member manager for tracking connected members

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::RwLock;

use ferry_common::protocol::ServerMessage;

use super::member::{Member, MemberSender};

/// Manages all connected members
#[derive(Debug, Clone)]
pub struct MemberManager {
    members: Arc<RwLock<HashMap<u32, Member>>>,
    next_id: Arc<AtomicU32>,
}

impl MemberManager {
    pub fn new() -> Self {
        Self {
            members: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Register a connection and return its member id
    pub async fn add(&self, address: SocketAddr, tx: MemberSender) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let member = Member { id, address, tx };
        self.members.write().await.insert(id, member);
        id
    }

    pub async fn remove(&self, id: u32) -> Option<Member> {
        self.members.write().await.remove(&id)
    }

    /// Queue a message for each listed member
    pub async fn send_to_all(&self, ids: &[u32], message: &ServerMessage) {
        let members = self.members.read().await;
        for id in ids {
            if let Some(member) = members.get(id) {
                let _ = member.tx.send((message.clone(), None));
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.members.read().await.len()
    }
}

impl Default for MemberManager {
    fn default() -> Self {
        Self::new()
    }
}
