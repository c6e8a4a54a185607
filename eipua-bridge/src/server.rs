//! OPC UA side: session lifecycle, node bindings and typed writes.
//!
//! [`ServerLink`] methods take `&self` so that one cycle can issue all of its
//! writes concurrently. The session and bindings live behind an async mutex
//! that is only held while connecting or while looking up a binding, never
//! across a write.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use eipua_bridge_framework::{BackoffGate, BackoffState, ConnectionState};
use eipua_common::{TypedValue, Value, ValueKind, coerce};

use crate::config::ServerConfig;

/// Logical name of the liveness flag node.
pub const WATCHDOG: &str = "watchdog";

/// Errors reported by a server client.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("Write failed: {0}")]
    Write(String),
    #[error("Session closed")]
    SessionClosed,
}

/// Asynchronous request/response access to an OPC UA server.
#[async_trait]
pub trait ServerClient: Send + Sync + 'static {
    type Session: Clone + Send + Sync;
    type Node: Clone + Send + Sync;

    /// Establish a session with the server at `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<Self::Session, ServerError>;

    /// Close a session.
    async fn close(&self, session: Self::Session) -> Result<(), ServerError>;

    /// Get a handle for a node id string such as `ns=2;s=WATCHDOG`.
    async fn resolve_node(
        &self,
        session: &Self::Session,
        node_id: &str,
    ) -> Result<Self::Node, ServerError>;

    /// Read the node's declared data type, if it can be determined.
    async fn discover_declared_type(
        &self,
        session: &Self::Session,
        node: &Self::Node,
    ) -> Option<ValueKind>;

    /// Write a value attribute.
    async fn write_value(
        &self,
        session: &Self::Session,
        node: &Self::Node,
        value: TypedValue,
    ) -> Result<(), ServerError>;
}

/// Node handle and declared type for one logical name.
#[derive(Debug, Clone)]
pub struct NodeBinding<N> {
    pub node: N,
    pub declared: Option<ValueKind>,
}

struct Connection<S: ServerClient> {
    session: Option<S::Session>,
    /// Bumped on every new session so stale write failures are ignored.
    generation: u64,
    bindings: HashMap<String, NodeBinding<S::Node>>,
    backoff: BackoffState,
}

/// Owner of the server session, node bindings and watchdog flag.
pub struct ServerLink<S: ServerClient> {
    client: S,
    endpoint: String,
    nodes: BTreeMap<String, String>,
    timeout: Duration,
    gate: BackoffGate,
    conn: Mutex<Connection<S>>,
    watchdog: AtomicBool,
}

impl<S: ServerClient> ServerLink<S> {
    /// Create a disconnected link.
    pub fn new(client: S, config: &ServerConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            nodes: config.nodes.clone(),
            timeout: config.timeout(),
            gate: BackoffGate::default(),
            conn: Mutex::new(Connection {
                session: None,
                generation: 0,
                bindings: HashMap::new(),
                backoff: BackoffState::default(),
            }),
            watchdog: AtomicBool::new(false),
        }
    }

    /// Replace the backoff policy.
    pub fn with_backoff(mut self, gate: BackoffGate) -> Self {
        self.gate = gate;
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &S {
        &self.client
    }

    pub async fn state(&self) -> ConnectionState {
        if self.conn.lock().await.session.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub async fn backoff(&self) -> BackoffState {
        self.conn.lock().await.backoff
    }

    /// Binding of a logical name, if resolved at connect time.
    pub async fn binding(&self, name: &str) -> Option<NodeBinding<S::Node>> {
        self.conn.lock().await.bindings.get(name).cloned()
    }

    /// Last watchdog value sent (or attempted).
    pub fn watchdog(&self) -> bool {
        self.watchdog.load(Ordering::SeqCst)
    }

    /// Connect if not already connected, subject to backoff.
    pub async fn connect(&self) -> bool {
        let mut conn = self.conn.lock().await;
        self.connect_locked(&mut conn).await
    }

    async fn connect_locked(&self, conn: &mut Connection<S>) -> bool {
        if conn.session.is_some() {
            return true;
        }

        let now = Instant::now();
        if !self.gate.try_begin(&mut conn.backoff, now) {
            debug!(
                endpoint = %self.endpoint,
                retry_in = ?self.gate.remaining(&conn.backoff, now),
                "Server reconnect deferred by backoff"
            );
            return false;
        }

        let session = match self.timed(self.client.open(&self.endpoint)).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    endpoint = %self.endpoint,
                    attempt = conn.backoff.attempts(),
                    retry_in = ?self.gate.delay(conn.backoff.attempts()),
                    error = %e,
                    "Failed to connect to OPC UA server"
                );
                return false;
            }
        };

        let mut bindings = HashMap::with_capacity(self.nodes.len());
        for (name, node_id) in &self.nodes {
            let node = match self.timed(self.client.resolve_node(&session, node_id)).await {
                Ok(node) => node,
                Err(e) => {
                    warn!(name = %name, node_id = %node_id, error = %e, "Failed to resolve node");
                    continue;
                }
            };

            let declared = tokio::time::timeout(
                self.timeout,
                self.client.discover_declared_type(&session, &node),
            )
            .await
            .ok()
            .flatten();
            match &declared {
                Some(kind) => debug!(name = %name, node_id = %node_id, kind = %kind, "Resolved node"),
                None => warn!(
                    name = %name,
                    node_id = %node_id,
                    "Declared type unknown, inferring from values"
                ),
            }
            bindings.insert(name.clone(), NodeBinding { node, declared });
        }

        info!(
            endpoint = %self.endpoint,
            nodes = bindings.len(),
            configured = self.nodes.len(),
            "Connected to OPC UA server"
        );

        conn.session = Some(session);
        conn.generation += 1;
        conn.bindings = bindings;
        conn.backoff.reset();
        true
    }

    /// Write `value` to the node bound to `name`.
    ///
    /// A failed write marks the link disconnected so the next call
    /// re-establishes the session.
    pub async fn write(&self, name: &str, value: &Value) -> bool {
        let (session, generation, binding) = {
            let mut conn = self.conn.lock().await;
            if !self.connect_locked(&mut conn).await {
                debug!(name = %name, "Skipping write, server not connected");
                return false;
            }
            let Some(session) = conn.session.clone() else {
                return false;
            };
            let Some(binding) = conn.bindings.get(name).cloned() else {
                error!(name = %name, "Node not found in mapping");
                return false;
            };
            (session, conn.generation, binding)
        };

        let typed = coerce(binding.declared.as_ref(), value);
        let kind = typed.kind();
        match self
            .timed(self.client.write_value(&session, &binding.node, typed))
            .await
        {
            Ok(()) => {
                debug!(name = %name, value = %value, kind = %kind, "Updated node");
                true
            }
            Err(e) => {
                error!(name = %name, value = %value, error = %e, "Error writing to node");
                self.mark_disconnected(generation).await;
                false
            }
        }
    }

    /// Flip the watchdog flag and write it.
    pub async fn toggle_watchdog(&self) -> bool {
        let next = !self.watchdog.fetch_xor(true, Ordering::SeqCst);
        self.write(WATCHDOG, &Value::Bool(next)).await
    }

    /// Best-effort session teardown.
    pub async fn close(&self) {
        let session = {
            let mut conn = self.conn.lock().await;
            conn.bindings.clear();
            conn.session.take()
        };

        if let Some(session) = session {
            match self.timed(self.client.close(session)).await {
                Ok(()) => info!(endpoint = %self.endpoint, "Disconnected from OPC UA server"),
                Err(e) => warn!(endpoint = %self.endpoint, error = %e, "Error during OPC UA disconnect"),
            }
        }
    }

    /// Drop the session of `generation`, if still current, and close it.
    async fn mark_disconnected(&self, generation: u64) {
        let stale = {
            let mut conn = self.conn.lock().await;
            if conn.generation != generation {
                return;
            }
            conn.bindings.clear();
            conn.session.take()
        };

        if let Some(session) = stale {
            warn!(endpoint = %self.endpoint, "OPC UA session marked disconnected");
            if let Err(e) = self.timed(self.client.close(session)).await {
                debug!(endpoint = %self.endpoint, error = %e, "Error closing stale OPC UA session");
            }
        }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ServerError>
    where
        F: Future<Output = Result<T, ServerError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(ServerError::Timeout(self.timeout)))
    }
}
