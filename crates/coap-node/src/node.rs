//! Core Node struct and async event loop.
//!
//! The Node binds the configured UDP sockets, bridges their datagrams into a
//! single event channel and drives one shared engine: inbound packets are fed
//! to `handle_incoming_packet`, a timer runs the work loop, and observer
//! registrations are snapshotted to storage.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use coap_engine::{CoapEngine, EngineError, MetaInfo, NetPacket, SocketHandle, SystemClock};

use crate::config::{NodeConfig, parse_group, parse_path, parse_socket_addr};
use crate::error::NodeError;
use crate::resources::ResourceSet;
use crate::storage::{Storage, StorageError};
use crate::transport::{UDP_RECV_BUFFER, UdpTransport};

/// Engine type run by the node.
pub type NodeEngine = CoapEngine<UdpTransport, SystemClock>;

/// Upper bound on work-loop passes per tick.
const MAX_WORK_PASSES: usize = 16;

/// Events delivered to the central event loop from socket receive bridges.
#[derive(Debug)]
enum NodeEvent {
    Inbound { socket: SocketHandle, packet: NetPacket },
    SocketDown { socket: SocketHandle },
}

/// A bound UDP socket and the metadata attached to what it receives.
#[derive(Debug)]
struct BoundSocket {
    handle: SocketHandle,
    socket: Arc<UdpSocket>,
    meta: MetaInfo,
}

/// Cloneable handle that stops a running node.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// A CoAP node that owns the engine, its sockets and the event loop.
pub struct Node {
    config: NodeConfig,
    engine: Arc<Mutex<NodeEngine>>,
    resources: ResourceSet,
    storage: Option<Storage>,
    sockets: Vec<BoundSocket>,
    event_tx: mpsc::Sender<NodeEvent>,
    event_rx: mpsc::Receiver<NodeEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    bridge_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Node {
    /// Create a node from configuration and register its resources.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let engine_config = config.engine.to_engine_config()?;
        let mut engine = CoapEngine::new(engine_config, UdpTransport::new(), SystemClock::default());
        let resources = ResourceSet::install(
            &mut engine,
            &config.resources,
            config.node.builtin_resources,
            Instant::now(),
        )?;

        // Initialize storage (non-fatal)
        let storage = if config.storage.enable {
            match Storage::new(parse_path(&config.storage.path)) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("failed to initialize storage: {e}");
                    None
                }
            }
        } else {
            None
        };

        let (event_tx, event_rx) = mpsc::channel(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            engine: Arc::new(Mutex::new(engine)),
            resources,
            storage,
            sockets: Vec::new(),
            event_tx,
            event_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            bridge_handles: Vec::new(),
        })
    }

    /// Shared engine, for hosts that also act as a client.
    pub fn engine(&self) -> Arc<Mutex<NodeEngine>> {
        Arc::clone(&self.engine)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Local address of the unicast socket once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.sockets.first().and_then(|s| s.socket.local_addr().ok())
    }

    pub fn observer_count(&self) -> usize {
        self.lock_engine().resources().observer_count()
    }

    fn lock_engine(&self) -> MutexGuard<'_, NodeEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind sockets, restore observers and start the receive bridges.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if !self.sockets.is_empty() {
            return Err(NodeError::AlreadyRunning);
        }

        let bind = parse_socket_addr(&self.config.node.bind)?;
        let socket = UdpSocket::bind(bind).await?;
        tracing::info!(addr = %socket.local_addr().unwrap_or(bind), "unicast socket bound");
        self.add_socket(socket, MetaInfo::None);

        if let Some(multicast) = &self.config.node.multicast {
            let group = parse_group(&multicast.group)?;
            let bind = parse_socket_addr(&multicast.bind)?;
            let socket = UdpSocket::bind(bind).await?;
            match group {
                IpAddr::V4(v4) => socket.join_multicast_v4(v4, Ipv4Addr::UNSPECIFIED)?,
                IpAddr::V6(v6) => socket.join_multicast_v6(&v6, 0)?,
            }
            tracing::info!(%group, addr = %bind, "multicast socket joined");
            self.add_socket(socket, MetaInfo::Multicast);
        }

        if let Err(e) = self.restore_observers().await {
            tracing::warn!("failed to restore observers: {e}");
        }

        self.spawn_receive_bridges();
        tracing::info!(sockets = self.sockets.len(), resources = self.resources.len(), "node started");
        Ok(())
    }

    fn add_socket(&mut self, socket: UdpSocket, meta: MetaInfo) {
        let socket = Arc::new(socket);
        let handle = {
            let mut engine = self.lock_engine();
            let handle = engine.new_socket();
            engine.transport_mut().add_socket(handle, Arc::clone(&socket));
            handle
        };
        self.sockets.push(BoundSocket { handle, socket, meta });
    }

    async fn restore_observers(&self) -> Result<(), StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let Some(blob) = storage.load_observers().await? else {
            return Ok(());
        };
        let restored = self.lock_engine().load_observers(&blob)?;
        tracing::info!(restored, "observers restored");
        Ok(())
    }

    /// Spawn per-socket receive bridge tasks.
    fn spawn_receive_bridges(&mut self) {
        for bound in &self.sockets {
            let socket = Arc::clone(&bound.socket);
            let (handle, meta) = (bound.handle, bound.meta);
            let event_tx = self.event_tx.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();

            let task = tokio::spawn(async move {
                let mut buf = vec![0u8; UDP_RECV_BUFFER];
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            tracing::debug!(socket = %handle, "receive bridge shutting down");
                            break;
                        }
                        result = socket.recv_from(&mut buf) => {
                            match result {
                                Ok((len, remote)) => {
                                    tracing::trace!(socket = %handle, %remote, len, "datagram received");
                                    let packet = NetPacket::new(buf[..len].to_vec(), remote).with_meta(meta);
                                    if event_tx.send(NodeEvent::Inbound { socket: handle, packet }).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(socket = %handle, "receive error: {e}");
                                    let _ = event_tx.send(NodeEvent::SocketDown { socket: handle }).await;
                                    break;
                                }
                            }
                        }
                    }
                }
            });
            self.bridge_handles.push(task);
        }
    }

    /// Run the main event loop. Returns when shutdown is signalled.
    pub async fn run(&mut self) {
        let mut work_interval =
            tokio::time::interval(Duration::from_millis(self.config.node.work_interval_ms.max(1)));

        let uptime_secs = self.config.node.uptime_notify_secs;
        let uptime_enabled = uptime_secs > 0 && self.resources.uptime().is_some();
        let mut uptime_interval =
            tokio::time::interval(Duration::from_secs(if uptime_enabled { uptime_secs } else { 3600 }));

        let persist_secs = self.config.storage.persist_interval;
        let persist_enabled = persist_secs > 0 && self.storage.is_some();
        let mut persist_interval =
            tokio::time::interval(Duration::from_secs(if persist_enabled { persist_secs } else { 3600 }));

        // Don't fire immediately
        work_interval.tick().await;
        uptime_interval.tick().await;
        persist_interval.tick().await;

        tracing::info!("entering event loop");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    tracing::info!("shutdown signal received");
                    break;
                }

                event = self.event_rx.recv() => {
                    match event {
                        Some(NodeEvent::Inbound { socket, packet }) => {
                            self.handle_inbound(socket, packet);
                            self.run_work();
                        }
                        Some(NodeEvent::SocketDown { socket }) => {
                            tracing::warn!(%socket, "socket down");
                        }
                        None => {
                            tracing::info!("event channel closed, exiting");
                            break;
                        }
                    }
                }

                _ = work_interval.tick() => {
                    self.run_work();
                }

                _ = uptime_interval.tick(), if uptime_enabled => {
                    self.notify_uptime();
                }

                _ = persist_interval.tick(), if persist_enabled => {
                    self.persist_state().await;
                }
            }
        }
    }

    fn handle_inbound(&self, socket: SocketHandle, packet: NetPacket) {
        let remote = packet.remote;
        match self.lock_engine().handle_incoming_packet(socket, packet) {
            Ok(()) => {}
            // duplicates, stray confirmations and 4.04s are routine
            Err(e @ (EngineError::Existing { .. } | EngineError::NotFound(_))) => {
                tracing::debug!(%remote, error = %e, "inbound datagram handled");
            }
            Err(e) => tracing::warn!(%remote, error = %e, "inbound datagram rejected"),
        }
    }

    /// Notify observers of changed resources, then run due interactions.
    fn run_work(&self) {
        let mut engine = self.lock_engine();
        for rid in self.resources.take_changed() {
            if let Err(e) = engine.notify_resource_observers(rid) {
                tracing::warn!(resource = rid.0, error = %e, "notification failed");
            }
        }
        for _ in 0..MAX_WORK_PASSES {
            if engine.run_pending() == 0 {
                break;
            }
        }
    }

    fn notify_uptime(&self) {
        let Some(rid) = self.resources.uptime() else {
            return;
        };
        let mut engine = self.lock_engine();
        if engine.resource(rid).is_some_and(|r| r.observers.is_empty()) {
            return;
        }
        if let Err(e) = engine.notify_resource_observers(rid) {
            tracing::warn!(error = %e, "uptime notification failed");
        }
    }

    /// Persist observer registrations to storage.
    async fn persist_state(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let blob = self.lock_engine().save_observers();
        match storage.save_observers(&blob).await {
            Ok(()) => tracing::debug!(bytes = blob.len(), "persisted observers"),
            Err(e) => tracing::warn!("failed to persist observers: {e}"),
        }
    }

    /// Signal the node to shut down.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Persist state, stop the receive bridges and release the sockets.
    pub async fn shutdown(mut self) {
        tracing::info!("shutting down node");
        self.trigger_shutdown();

        // Final state persistence before shutdown
        self.persist_state().await;

        for handle in self.bridge_handles.drain(..) {
            let _ = handle.await;
        }

        tracing::info!("node shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config(extra: &str) -> NodeConfig {
        let toml = format!(
            "[node]\nbind = \"127.0.0.1:0\"\n[storage]\nenable = false\n{extra}"
        );
        NodeConfig::parse(&toml).unwrap()
    }

    #[test]
    fn node_new_registers_builtins() {
        let node = Node::new(loopback_config("")).unwrap();
        assert_eq!(node.resources.len(), 2);
        assert!(node.storage.is_none());
        assert!(node.local_addr().is_none());
    }

    #[test]
    fn node_new_rejects_bad_resource() {
        let config = loopback_config("[[resources]]\npath = \"x\"\nmethods = [\"BREW\"]\n");
        assert!(matches!(Node::new(config), Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn node_start_twice_fails() {
        let mut node = Node::new(loopback_config("")).unwrap();
        node.start().await.unwrap();
        assert!(node.local_addr().is_some());
        assert!(matches!(node.start().await, Err(NodeError::AlreadyRunning)));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn node_start_bad_bind_fails() {
        let config = NodeConfig::parse("[node]\nbind = \"nowhere\"\n[storage]\nenable = false\n").unwrap();
        let mut node = Node::new(config).unwrap();
        assert!(matches!(node.start().await, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn node_trigger_shutdown() {
        let mut node = Node::new(loopback_config("")).unwrap();
        node.start().await.unwrap();

        node.trigger_shutdown();

        tokio::time::timeout(Duration::from_millis(500), node.run())
            .await
            .expect("run should exit after shutdown");
        node.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_handle_stops_run() {
        let mut node = Node::new(loopback_config("")).unwrap();
        node.start().await.unwrap();
        let handle = node.shutdown_handle();

        let task = tokio::spawn(async move {
            node.run().await;
            node
        });
        handle.shutdown();

        let node = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("run should exit after shutdown")
            .unwrap();
        node.shutdown().await;
    }
}
