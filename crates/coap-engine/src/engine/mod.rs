//! The engine context: sockets, resources, interactions and the work queue.
//!
//! All state lives in [`CoapEngine`] and is mutated through two entry points,
//! [`CoapEngine::handle_incoming_packet`] and [`CoapEngine::do_work`]. Hosts
//! that share the engine across tasks guard it with a single mutex.

mod client;
mod incoming;
mod notification;
mod server;

use std::collections::VecDeque;
use std::net::SocketAddr;

use coap_core::constants::{MessageType, SMALL_DATAGRAM_SIZE};
use coap_core::message::{Code, Message};
use coap_core::types::Token;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::arena::{Arena, Handle};
use crate::config::EngineConfig;
use crate::error::{EngineError, PersistError};
use crate::interaction::{Interaction, Role, State};
use crate::persist::{self, StoredObserver};
use crate::reliability::{ack_deadline_ms, initial_timeout_ms};
use crate::resource::{
    AllowedMethods, DISCOVERY_CONTENT_FORMAT, Notifier, ObserverId, RequestHandler, Resource,
    ResourceHandler, ResourceId, ResourceRegistry, WELL_KNOWN_CORE,
};
use crate::transport::{Clock, SocketHandle, Transport};

/// What the work loop does with an interaction after one role step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Requeue,
    Done,
}

pub struct CoapEngine<T, C> {
    config: EngineConfig,
    transport: T,
    clock: C,
    rng: StdRng,
    sockets: Vec<SocketHandle>,
    next_socket: u32,
    resources: ResourceRegistry,
    interactions: Arena<Interaction>,
    queue: VecDeque<Handle>,
    next_message_id: u16,
}

impl<T: Transport, C: Clock> CoapEngine<T, C> {
    pub fn new(config: EngineConfig, transport: T, clock: C) -> Self {
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let next_message_id = rng.next_u32() as u16;

        let mut engine = Self {
            config,
            transport,
            clock,
            rng,
            sockets: Vec::new(),
            next_socket: 0,
            resources: ResourceRegistry::new(),
            interactions: Arena::new(),
            queue: VecDeque::new(),
            next_message_id,
        };

        if engine.config.enable_well_known_core {
            let registered = engine.resources.register(
                WELL_KNOWN_CORE,
                "",
                AllowedMethods::GET,
                Some(DISCOVERY_CONTENT_FORMAT),
                ResourceHandler::Discovery,
                None,
            );
            if let Err(e) = registered {
                tracing::warn!(error = %e, "failed to register discovery resource");
            }
        }
        engine
    }

    // ------------------------------------------------------------ accessors

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn interaction_count(&self) -> usize {
        self.interactions.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn interaction_state(&self, handle: Handle) -> Option<State> {
        self.interactions.get(handle).map(|i| i.state)
    }

    // -------------------------------------------------------- registration

    /// Allocate a handle for a host socket. Packets on unknown sockets are refused.
    pub fn new_socket(&mut self) -> SocketHandle {
        let handle = SocketHandle(self.next_socket);
        self.next_socket += 1;
        self.sockets.push(handle);
        tracing::debug!(socket = %handle, "socket registered");
        handle
    }

    pub fn has_socket(&self, socket: SocketHandle) -> bool {
        self.sockets.contains(&socket)
    }

    /// Register a resource at `path`. Observable resources pass a notifier.
    pub fn register_resource<H>(
        &mut self,
        path: &str,
        description: &str,
        allowed: AllowedMethods,
        content_format: Option<u16>,
        handler: H,
        notifier: Option<Box<dyn Notifier>>,
    ) -> Result<ResourceId, EngineError>
    where
        H: RequestHandler + 'static,
    {
        let id = self.resources.register(
            path,
            description,
            allowed,
            content_format,
            ResourceHandler::User(Box::new(handler)),
            notifier,
        )?;
        tracing::info!(path, resource = id.0, ?allowed, "resource registered");
        Ok(id)
    }

    // ----------------------------------------------------------- work loop

    /// Run at most one interaction step.
    ///
    /// Takes the head of the queue; if it is still sleeping it moves to the
    /// tail. Returns whether an interaction was processed.
    pub fn do_work(&mut self) -> bool {
        let Some(handle) = self.pop_live() else {
            return false;
        };
        let now = self.clock.now_ms();

        let sleeping = self
            .interactions
            .get(handle)
            .is_some_and(|ia| ia.sleep_until_ms > now);
        if sleeping {
            self.queue.push_back(handle);
            return false;
        }

        let Some(mut ia) = self.interactions.take(handle) else {
            return false;
        };
        let step = match ia.role {
            Role::Server => self.process_server(handle, &mut ia, now),
            Role::Notification => self.process_notification(handle, &mut ia, now),
            Role::Client => self.process_client(handle, &mut ia, now),
        };

        match step {
            Step::Requeue => {
                self.interactions.restore(handle, ia);
                self.queue.push_back(handle);
            }
            Step::Done => {
                ia.state = State::Finished;
                tracing::debug!(%handle, role = ?ia.role, "interaction finished");
                self.interactions.discard(handle);
            }
        }
        true
    }

    /// Give every queued interaction one chance to run. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut processed = 0;
        for _ in 0..self.queue.len() {
            if self.do_work() {
                processed += 1;
            }
        }
        processed
    }

    /// Pop the queue head, skipping handles whose interaction is gone.
    fn pop_live(&mut self) -> Option<Handle> {
        while let Some(handle) = self.queue.pop_front() {
            if self.interactions.contains(handle) {
                return Some(handle);
            }
        }
        None
    }

    // --------------------------------------------------- interaction store

    fn enqueue(&mut self, ia: Interaction) -> Result<Handle, EngineError> {
        if self.interactions.len() >= self.config.max_interactions {
            return Err(EngineError::OutOfMemory("interactions"));
        }
        let role = ia.role;
        let handle = self.interactions.insert(ia);
        self.queue.push_back(handle);
        tracing::debug!(%handle, ?role, "interaction created");
        Ok(handle)
    }

    fn remove_interaction(&mut self, handle: Handle) -> Option<Interaction> {
        let ia = self.interactions.remove(handle)?;
        self.queue.retain(|h| *h != handle);
        Some(ia)
    }

    /// Destroy in-flight notifications for `observer`.
    fn abort_notifications(&mut self, observer: ObserverId) -> usize {
        let handles: Vec<Handle> = self
            .interactions
            .iter()
            .filter(|(_, ia)| ia.role == Role::Notification && ia.observer == Some(observer))
            .map(|(h, _)| h)
            .collect();
        for handle in &handles {
            self.remove_interaction(*handle);
            tracing::debug!(%handle, observer = observer.0, "notification aborted");
        }
        handles.len()
    }

    // ---------------------------------------------------------------- send

    fn next_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = id.wrapping_add(1);
        id
    }

    fn random_token(&mut self) -> Token {
        Token::from_u64(self.rng.next_u64())
    }

    fn send_message(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        message: &Message,
    ) -> Result<(), EngineError> {
        if !self.has_socket(socket) {
            return Err(EngineError::Socket(socket));
        }
        if message.sizeof_datagram() <= SMALL_DATAGRAM_SIZE {
            let mut buf = [0u8; SMALL_DATAGRAM_SIZE];
            let len = message.build_into_slice(&mut buf)?;
            self.transport.send(socket, remote, &buf[..len])?;
        } else {
            self.transport.send(socket, remote, &message.build())?;
        }
        tracing::trace!(%socket, %remote, %message, "sent");
        Ok(())
    }

    /// Send a bare ACK or RST; failures are only logged.
    fn send_empty(&mut self, socket: SocketHandle, remote: SocketAddr, msg_type: MessageType, message_id: u16) {
        let message = Message::empty(msg_type, message_id);
        if let Err(e) = self.send_message(socket, remote, &message) {
            tracing::warn!(%remote, error = %e, "failed to send empty {}", msg_type.as_str());
        }
    }

    /// Send a response without tracking it (4.04, 4.02, 5.00 rejections).
    fn send_untracked_response(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        request: &Message,
        code: Code,
    ) {
        let (msg_type, message_id) = match request.msg_type {
            MessageType::Con => (MessageType::Ack, request.message_id),
            _ => (MessageType::Non, self.next_message_id()),
        };
        let response = Message::new(msg_type, code, message_id).with_token(request.token);
        if let Err(e) = self.send_message(socket, remote, &response) {
            tracing::warn!(%remote, %code, error = %e, "failed to send response");
        }
    }

    /// Arm the ACK deadline for the current transmission of a CON message.
    fn arm_retransmission(&mut self, ia: &mut Interaction, now: u64) {
        if ia.base_timeout_ms == 0 {
            ia.base_timeout_ms = initial_timeout_ms(&self.config, &mut self.rng);
        }
        ia.ack_deadline_ms = ack_deadline_ms(now, ia.base_timeout_ms, ia.retrans_counter);
        ia.sleep_until_ms = ia.ack_deadline_ms;
    }

    /// Resend the tracked message and re-arm its deadline with doubled timeout.
    fn retransmit(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Result<(), EngineError> {
        ia.retrans_counter = ia.retrans_counter.saturating_add(1);
        let message = ia
            .sent_message()
            .ok_or(EngineError::NotFound("message to retransmit"))?;
        self.send_message(ia.socket, ia.remote, message)?;
        self.arm_retransmission(ia, now);
        tracing::debug!(
            %handle,
            retrans = ia.retrans_counter,
            deadline_ms = ia.ack_deadline_ms,
            "retransmitted"
        );
        Ok(())
    }

    // --------------------------------------------------------- persistence

    /// Serialize every registered observer.
    pub fn save_observers(&self) -> Vec<u8> {
        let records: Vec<StoredObserver> = self
            .resources
            .iter()
            .flat_map(|(_, resource)| {
                resource.observers.iter().map(|o| StoredObserver {
                    socket: o.socket,
                    remote: o.remote,
                    token: o.token,
                    uri: resource.uri.clone(),
                    extra_options: o.extra_options.clone(),
                })
            })
            .collect();
        persist::encode_observers(&records)
    }

    /// Re-attach observers from a snapshot. Returns how many were restored.
    ///
    /// Records for unknown resources, unregistered sockets or resources
    /// without a notifier are skipped.
    pub fn load_observers(&mut self, bytes: &[u8]) -> Result<usize, PersistError> {
        let records = persist::decode_observers(bytes)?;
        let mut restored = 0;
        for record in records {
            let path = record.uri.uri_path_string();
            let Some(rid) = self.resources.find(&record.uri) else {
                tracing::debug!(path = %path, "skipping observer for unknown resource");
                continue;
            };
            let observable = self.resources.get(rid).is_some_and(Resource::is_observable);
            if !observable || !self.has_socket(record.socket) {
                tracing::debug!(path = %path, socket = %record.socket, "skipping observer");
                continue;
            }
            match self.resources.add_observer(
                rid,
                record.socket,
                record.remote,
                record.token,
                record.extra_options,
                self.config.max_observers,
            ) {
                Ok(_) => restored += 1,
                Err(e) => tracing::warn!(path = %path, error = %e, "failed to restore observer"),
            }
        }
        tracing::info!(restored, "observers loaded");
        Ok(restored)
    }
}

/// Millisecond instant after which a message sent at `timestamp_secs` is
/// older than `hold_secs`.
fn hold_until_ms(timestamp_secs: u64, hold_secs: u64) -> u64 {
    timestamp_secs
        .saturating_add(hold_secs)
        .saturating_add(1)
        .saturating_mul(1000)
}
