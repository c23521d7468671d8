//! Accept loop

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::connection::{ConnectionParams, handle_connection};
use crate::members::MemberManager;
use crate::rooms::{RoomManager, spawn_sweeper};

/// Shared server state, cheap to clone
#[derive(Clone)]
pub struct Server {
    pub rooms: RoomManager,
    pub members: MemberManager,
    pub config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: RoomManager::new(config.limits).with_relay_limit(config.relay_buffer_limit),
            members: MemberManager::new(),
            config,
        }
    }

    fn params(&self, peer_addr: SocketAddr) -> ConnectionParams {
        ConnectionParams {
            peer_addr,
            rooms: self.rooms.clone(),
            members: self.members.clone(),
            config: self.config,
        }
    }
}

/// Run the server on `listener` until the task is dropped
///
/// Starts the expiry sweeper and serves each accepted connection on its
/// own task.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> io::Result<()> {
    let server = Server::new(config);
    let sweeper = spawn_sweeper(
        server.rooms.clone(),
        server.members.clone(),
        config.sweep_interval,
        config.room_ttl,
    );

    let result = accept_loop(&listener, &server).await;
    sweeper.abort();
    result
}

async fn accept_loop(listener: &TcpListener, server: &Server) -> io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                let _ = socket.set_nodelay(true);
                let params = server.params(peer_addr);
                let debug = server.config.debug;
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, params).await {
                        log_connection_error(&e, peer_addr, debug);
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to accept connection");
            }
        }
    }
}

/// Resets and timeouts are routine; only log them in debug mode
fn log_connection_error(error: &io::Error, peer_addr: SocketAddr, debug: bool) {
    let routine = matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
    );
    if routine && !debug {
        return;
    }
    tracing::warn!(peer = %peer_addr, error = %error, "connection error");
}
