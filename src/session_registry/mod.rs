//! SessionRegistry - Session Lifecycle and Connection Bookkeeping
//!
//! ## Responsibilities
//!
//! - Track every open connection and its lifecycle state
//! - Bind a session to a connection on handshake
//! - Per-session statistics (frames processed, last observed rate)
//! - Fan-out of server-wide messages to active connections
//!
//! Connections are keyed by a server-issued id; the session id is whatever the
//! client announced in its handshake. Outbound traffic goes through an unbounded
//! channel per connection, drained by that connection's writer task.

use crate::stream_orchestrator::OutboundMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Open, waiting for a handshake
    Connecting,
    /// Handshake done, session bound
    Active,
    /// Torn down
    Closed,
}

/// Session statistics view
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub connection_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub frames_processed: u64,
    pub last_rate: usize,
}

/// Result of closing a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub session_id: String,
    /// No other active connection carries the same session id
    pub last_for_session: bool,
}

/// Delivery outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Session bound to a connection
struct Session {
    session_id: String,
    created_at: DateTime<Utc>,
    frames_processed: u64,
    last_rate: usize,
}

/// Client connection
struct ClientConnection {
    state: ConnectionState,
    session: Option<Session>,
    tx: mpsc::UnboundedSender<String>,
}

/// SessionRegistry instance
pub struct SessionRegistry {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    active_count: AtomicU64,
}

impl SessionRegistry {
    /// Create new SessionRegistry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicU64::new(0),
        }
    }

    /// Open a connection in CONNECTING state
    pub async fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections.write().await.insert(
            id,
            ClientConnection {
                state: ConnectionState::Connecting,
                session: None,
                tx,
            },
        );

        tracing::info!(connection_id = %id, "Client connected");
        (id, rx)
    }

    /// Bind `session_id` to a connection and move it to ACTIVE
    ///
    /// Returns false when the connection is unknown or not CONNECTING.
    pub async fn activate(&self, connection_id: &Uuid, session_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let Some(conn) = connections.get_mut(connection_id) else {
            return false;
        };
        if conn.state != ConnectionState::Connecting {
            return false;
        }

        conn.state = ConnectionState::Active;
        conn.session = Some(Session {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            frames_processed: 0,
            last_rate: 0,
        });
        self.active_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %connection_id, session_id = %session_id, "Session registered");
        true
    }

    /// Count a processed frame and remember the session's current rate
    pub async fn record_frame(&self, connection_id: &Uuid, rate: usize) {
        let mut connections = self.connections.write().await;
        if let Some(session) = connections
            .get_mut(connection_id)
            .and_then(|c| c.session.as_mut())
        {
            session.frames_processed += 1;
            session.last_rate = rate;
        }
    }

    /// Queue a message for one connection
    pub async fn send(&self, connection_id: &Uuid, message: &OutboundMessage) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return false;
            }
        };

        let connections = self.connections.read().await;
        match connections.get(connection_id) {
            Some(conn) => conn.tx.send(json).is_ok(),
            None => false,
        }
    }

    /// Close a connection; returns its session if it was ACTIVE
    pub async fn disconnect(&self, connection_id: &Uuid) -> Option<Departure> {
        let mut connections = self.connections.write().await;
        let mut conn = connections.remove(connection_id)?;

        let was_active = conn.state == ConnectionState::Active;
        conn.state = ConnectionState::Closed;
        if was_active {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
        }

        tracing::info!(connection_id = %connection_id, "Client disconnected");

        let session = conn.session.take().filter(|_| was_active)?;
        let still_open = connections.values().any(|c| {
            c.session
                .as_ref()
                .is_some_and(|s| s.session_id == session.session_id)
        });

        tracing::info!(
            session_id = %session.session_id,
            frames_processed = session.frames_processed,
            "Session removed"
        );

        Some(Departure {
            session_id: session.session_id,
            last_for_session: !still_open,
        })
    }

    /// State of a connection; unknown ids are reported as closed
    pub async fn state(&self, connection_id: &Uuid) -> ConnectionState {
        self.connections
            .read()
            .await
            .get(connection_id)
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Number of ACTIVE connections
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::Relaxed)
    }

    /// All active sessions
    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        let connections = self.connections.read().await;
        let mut sessions: Vec<SessionSnapshot> = connections
            .iter()
            .filter_map(|(id, conn)| conn.session.as_ref().map(|s| snapshot(id, s)))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Look up an active session by id
    pub async fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        let connections = self.connections.read().await;
        connections.iter().find_map(|(id, conn)| {
            conn.session
                .as_ref()
                .filter(|s| s.session_id == session_id)
                .map(|s| snapshot(id, s))
        })
    }

    /// Send a message to every ACTIVE connection
    ///
    /// A failed send to one connection does not stop delivery to the others.
    pub async fn broadcast(&self, message: &OutboundMessage) -> BroadcastReport {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return BroadcastReport::default();
            }
        };

        let connections = self.connections.read().await;
        let mut report = BroadcastReport::default();
        for (id, conn) in connections.iter() {
            if conn.state != ConnectionState::Active {
                continue;
            }
            match conn.tx.send(json.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(connection_id = %id, error = %e, "Failed to send message");
                }
            }
        }
        report
    }

    /// Broadcast connection stats every `interval`, for the process lifetime
    pub async fn run_stats_broadcast(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.active_count() == 0 {
                continue;
            }

            let stats = OutboundMessage::Stats {
                active_connections: self.active_count(),
                timestamp: Utc::now().to_rfc3339(),
            };
            let report = self.broadcast(&stats).await;
            tracing::trace!(delivered = report.delivered, failed = report.failed, "Stats broadcast");
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(connection_id: &Uuid, session: &Session) -> SessionSnapshot {
    SessionSnapshot {
        session_id: session.session_id.clone(),
        connection_id: *connection_id,
        created_at: session.created_at,
        frames_processed: session.frames_processed,
        last_rate: session.last_rate,
    }
}
