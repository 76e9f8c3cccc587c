//! Inbound datagram classification and matching.

use std::net::SocketAddr;

use coap_core::constants::MessageType;
use coap_core::message::{Code, Message};

use super::CoapEngine;
use crate::error::EngineError;
use crate::interaction::{Confirm, Interaction, Role, State};
use crate::transport::{Clock, MetaInfo, NetPacket, SocketHandle, Transport};

impl<T: Transport, C: Clock> CoapEngine<T, C> {
    /// Feed one received datagram into the engine.
    ///
    /// Malformed datagrams are logged and returned as errors; nothing is sent
    /// for them. Duplicates of a request still being served yield
    /// [`EngineError::Existing`] after any cached reply has been resent.
    pub fn handle_incoming_packet(&mut self, socket: SocketHandle, packet: NetPacket) -> Result<(), EngineError> {
        if !self.has_socket(socket) {
            return Err(EngineError::Socket(socket));
        }
        let remote = packet.remote;
        let mut message = match Message::parse_with_limit(&packet.data, self.config.max_payload_size) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%remote, len = packet.data.len(), error = %e, "dropping malformed datagram");
                return Err(e.into());
            }
        };
        message.timestamp = self.clock.now_ms() / 1000;
        tracing::trace!(%socket, %remote, %message, "received");

        match (message.msg_type, message.code.is_empty()) {
            (MessageType::Con, true) => {
                tracing::debug!(%remote, mid = message.message_id, "ping answered with RST");
                self.send_empty(socket, remote, MessageType::Rst, message.message_id);
                return Ok(());
            }
            (MessageType::Ack, false) if message.is_request() => {
                ignore(&message, remote);
                return Ok(());
            }
            (MessageType::Rst, false) | (MessageType::Non, true) => {
                ignore(&message, remote);
                return Ok(());
            }
            _ => {}
        }

        if let Some(number) = message.options.find_unknown_critical() {
            return self.reject_unknown_critical(socket, remote, &message, number);
        }

        match message.msg_type {
            MessageType::Ack | MessageType::Rst => self.handle_confirmation(socket, remote, message),
            _ if message.is_request() => self.handle_request(socket, remote, packet.meta, message),
            _ => self.handle_separate_response(socket, remote, message),
        }
    }

    fn reject_unknown_critical(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        message: &Message,
        number: u16,
    ) -> Result<(), EngineError> {
        tracing::warn!(%remote, option = number, mid = message.message_id, "unknown critical option");
        if message.msg_type == MessageType::Con {
            if message.is_request() {
                self.send_untracked_response(socket, remote, message, Code::BAD_OPTION);
            } else {
                self.send_empty(socket, remote, MessageType::Rst, message.message_id);
            }
        }
        Err(EngineError::BadOptionValue(number))
    }

    /// ACK or RST for something we sent.
    fn handle_confirmation(&mut self, socket: SocketHandle, remote: SocketAddr, message: Message) -> Result<(), EngineError> {
        let mid = message.message_id;
        let found = self.interactions.iter().find(|(_, ia)| {
            ia.socket == socket && ia.remote == remote && ia.sent_message().is_some_and(|m| m.message_id == mid)
        });
        let Some((handle, _)) = found else {
            tracing::debug!(%remote, mid, msg_type = message.msg_type.as_str(), "unmatched confirmation");
            return Err(EngineError::NotFound("exchange for confirmation"));
        };
        let Some(ia) = self.interactions.get_mut(handle) else {
            return Err(EngineError::NotFound("exchange for confirmation"));
        };

        let confirm = if message.msg_type == MessageType::Rst {
            Confirm::Reset
        } else {
            Confirm::Acked
        };
        *ia.sent_confirm_mut() = confirm;
        tracing::debug!(%handle, %remote, mid, ?confirm, "confirmation matched");

        let piggybacked = ia.role == Role::Client
            && ia.state == State::WaitingResponse
            && message.msg_type == MessageType::Ack
            && !message.code.is_empty()
            && ia.request.as_ref().is_some_and(|r| r.token == message.token);
        if piggybacked {
            ia.response = Some(message);
            ia.state = State::HandleResponse;
        }
        ia.wake();
        Ok(())
    }

    fn handle_request(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        meta: MetaInfo,
        message: Message,
    ) -> Result<(), EngineError> {
        let mid = message.message_id;
        if let Some(resend) = self.duplicate_reply(socket, remote, mid) {
            tracing::debug!(%remote, mid, "duplicate request");
            if let Some(reply) = resend {
                if let Err(e) = self.send_message(socket, remote, &reply) {
                    tracing::warn!(%remote, error = %e, "failed to resend reply");
                }
            }
            return Err(EngineError::Existing { message_id: mid });
        }

        let Some(rid) = self.resources.find(&message.options) else {
            tracing::debug!(%remote, path = %message.options.uri_path_string(), "no such resource");
            if !meta.is_multicast() {
                self.send_untracked_response(socket, remote, &message, Code::NOT_FOUND);
            }
            return Err(EngineError::NotFound("resource"));
        };

        let is_con = message.msg_type == MessageType::Con;
        let token = message.token;
        let mut ia = Interaction::new(Role::Server, socket, remote);
        ia.resource = Some(rid);
        ia.meta = meta;
        ia.request = Some(message);

        match self.enqueue(ia) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(%remote, mid, error = %e, "request refused");
                if is_con && !meta.is_multicast() {
                    let response = Message::new(MessageType::Ack, Code::INTERNAL_SERVER_ERROR, mid).with_token(token);
                    if let Err(send_err) = self.send_message(socket, remote, &response) {
                        tracing::warn!(%remote, error = %send_err, "failed to send 5.00");
                    }
                }
                Err(e)
            }
        }
    }

    /// For a duplicate request, the reply to resend (if any).
    ///
    /// `None` means not a duplicate. A postponed request gets its empty ACK
    /// again and a piggybacked response is resent verbatim.
    fn duplicate_reply(&self, socket: SocketHandle, remote: SocketAddr, mid: u16) -> Option<Option<Message>> {
        let (_, ia) = self
            .interactions
            .iter()
            .find(|(_, ia)| ia.is_duplicate_of(socket, remote, mid))?;
        Some(cached_reply(ia, mid))
    }

    /// CON or NON response to one of our client requests.
    fn handle_separate_response(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        message: Message,
    ) -> Result<(), EngineError> {
        let mid = message.message_id;
        let found = self.interactions.iter().find(|(_, ia)| {
            ia.role == Role::Client
                && ia.state == State::WaitingResponse
                && ia.socket == socket
                && ia.remote == remote
                && ia.request.as_ref().is_some_and(|r| r.token == message.token)
        });
        let Some((handle, _)) = found else {
            tracing::debug!(%remote, mid, token = %message.token, "unmatched response, sending RST");
            self.send_empty(socket, remote, MessageType::Rst, mid);
            return Err(EngineError::NotFound("exchange for response"));
        };

        if message.msg_type == MessageType::Con {
            self.send_empty(socket, remote, MessageType::Ack, mid);
        }
        let Some(ia) = self.interactions.get_mut(handle) else {
            return Err(EngineError::NotFound("exchange for response"));
        };
        if message.msg_type == MessageType::Con {
            ia.res_confirm = Confirm::Acked;
        }
        // a separate response implies the request arrived
        ia.req_confirm = Confirm::Acked;
        ia.response = Some(message);
        ia.state = State::HandleResponse;
        ia.wake();
        tracing::debug!(%handle, %remote, mid, "separate response matched");
        Ok(())
    }
}

fn cached_reply(ia: &Interaction, mid: u16) -> Option<Message> {
    match ia.state {
        State::PostponeEmptyAckSent => Some(Message::empty(MessageType::Ack, mid)),
        State::ResponseSent => ia
            .response
            .as_ref()
            .filter(|r| r.msg_type == MessageType::Ack)
            .cloned(),
        _ => None,
    }
}

fn ignore(message: &Message, remote: SocketAddr) {
    tracing::debug!(%remote, %message, "ignoring message");
}
