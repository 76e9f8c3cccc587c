//! One CoAP exchange tracked by the engine.
//!
//! An interaction owns the request and response messages of its exchange and
//! the timing state the reliability layer needs. It refers to resources and
//! observers by id only.

use std::fmt;
use std::net::SocketAddr;

use coap_core::message::Message;

use crate::error::EngineError;
use crate::reliability::SentState;
use crate::resource::{ObserverId, ResourceId};
use crate::transport::{MetaInfo, SocketHandle};

/// Callback invoked once when a client exchange finishes.
pub type ResponseCallback = Box<dyn FnMut(Result<&Message, EngineError>, SocketAddr) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Notification,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    // server
    HandleRequest,
    PostponeEmptyAckSent,
    ResponseWaitingLeisure,
    ResponseSent,
    // notification
    ReadyToNotify,
    NotificationSent,
    // client
    ReadyToRequest,
    WaitingResponse,
    HandleResponse,
    Finished,
}

/// Acknowledgement state of one side of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confirm {
    #[default]
    Pending,
    Acked,
    Reset,
}

pub struct Interaction {
    pub role: Role,
    pub state: State,
    pub socket: SocketHandle,
    pub remote: SocketAddr,
    pub retrans_counter: u32,
    /// Randomized initial ACK timeout, chosen on first transmission.
    pub base_timeout_ms: u64,
    pub ack_deadline_ms: u64,
    pub sleep_until_ms: u64,
    pub req_confirm: Confirm,
    pub res_confirm: Confirm,
    pub request: Option<Message>,
    pub response: Option<Message>,
    pub resource: Option<ResourceId>,
    pub observer: Option<ObserverId>,
    pub meta: MetaInfo,
    /// Resource changed while a notification was in flight.
    pub update_pending: bool,
    pub callback: Option<ResponseCallback>,
}

impl Interaction {
    pub fn new(role: Role, socket: SocketHandle, remote: SocketAddr) -> Self {
        let state = match role {
            Role::Server => State::HandleRequest,
            Role::Notification => State::ReadyToNotify,
            Role::Client => State::ReadyToRequest,
        };
        Self {
            role,
            state,
            socket,
            remote,
            retrans_counter: 0,
            base_timeout_ms: 0,
            ack_deadline_ms: 0,
            sleep_until_ms: 0,
            req_confirm: Confirm::Pending,
            res_confirm: Confirm::Pending,
            request: None,
            response: None,
            resource: None,
            observer: None,
            meta: MetaInfo::None,
            update_pending: false,
            callback: None,
        }
    }

    /// The message this side sent and waits on (client: request, else response).
    pub fn sent_message(&self) -> Option<&Message> {
        match self.role {
            Role::Client => self.request.as_ref(),
            Role::Server | Role::Notification => self.response.as_ref(),
        }
    }

    /// Confirm state of the message this side sent.
    pub fn sent_confirm_mut(&mut self) -> &mut Confirm {
        match self.role {
            Role::Client => &mut self.req_confirm,
            Role::Server | Role::Notification => &mut self.res_confirm,
        }
    }

    /// Snapshot of the sent message's timing for the reliability checks.
    pub fn sent_state(&self) -> Option<SentState> {
        let message = self.sent_message()?;
        let confirm = match self.role {
            Role::Client => self.req_confirm,
            Role::Server | Role::Notification => self.res_confirm,
        };
        Some(SentState {
            msg_type: message.msg_type,
            confirm,
            sent_at_secs: message.timestamp,
            ack_deadline_ms: self.ack_deadline_ms,
            retrans_counter: self.retrans_counter,
        })
    }

    /// Clear retransmission state before a fresh transmission.
    pub fn reset_transmission(&mut self) {
        self.retrans_counter = 0;
        self.base_timeout_ms = 0;
        self.ack_deadline_ms = 0;
        self.res_confirm = Confirm::Pending;
    }

    /// Same request (mid, endpoint, socket) as an existing server exchange.
    pub fn is_duplicate_of(&self, socket: SocketHandle, remote: SocketAddr, message_id: u16) -> bool {
        self.role == Role::Server
            && self.socket == socket
            && self.remote == remote
            && self.request.as_ref().is_some_and(|r| r.message_id == message_id)
    }

    /// Wake the interaction on the next `do_work` pass.
    pub fn wake(&mut self) {
        self.sleep_until_ms = 0;
    }
}

impl fmt::Debug for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interaction")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("socket", &self.socket)
            .field("remote", &self.remote)
            .field("retrans_counter", &self.retrans_counter)
            .field("sleep_until_ms", &self.sleep_until_ms)
            .field("req_confirm", &self.req_confirm)
            .field("res_confirm", &self.res_confirm)
            .field("observer", &self.observer)
            .field("update_pending", &self.update_pending)
            .finish_non_exhaustive()
    }
}
