//! Server role: run the resource handler and deliver its response.

use coap_core::constants::MessageType;
use coap_core::message::{Code, Message};
use coap_core::option::CoapOption;
use coap_core::option::OptionList;
use coap_core::option::number::{BLOCK2, CONTENT_FORMAT, OBSERVE, RF_PATH_INFO, URI_QUERY};
use rand::Rng;

use super::{CoapEngine, Step, hold_until_ms};
use crate::arena::Handle;
use crate::blockwise::set_payload_checked;
use crate::error::EngineError;
use crate::interaction::{Confirm, Interaction, State};
use crate::reliability::{Progress, is_older_than, response_progress};
use crate::resource::{
    DISCOVERY_CONTENT_FORMAT, HandlerResult, RequestContext, ResourceHandler, ResourceId, link_format,
};
use crate::transport::{Clock, MetaInfo, Transport};

impl<T: Transport, C: Clock> CoapEngine<T, C> {
    pub(crate) fn process_server(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        match ia.state {
            State::HandleRequest if ia.meta.is_multicast() => self.defer_for_leisure(handle, ia, now),
            State::HandleRequest | State::PostponeEmptyAckSent | State::ResponseWaitingLeisure => {
                let Some(request) = ia.request.take() else {
                    return Step::Done;
                };
                let step = self.respond(handle, ia, &request, now);
                ia.request = Some(request);
                step
            }
            State::ResponseSent => self.poll_response(handle, ia, now),
            _ => Step::Done,
        }
    }

    /// Multicast requests wait a random leisure before the handler runs (RFC 7252 §8.2).
    fn defer_for_leisure(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        if ia.request.as_ref().is_some_and(|r| r.msg_type == MessageType::Con) {
            tracing::debug!(%handle, remote = %ia.remote, "dropping confirmable multicast request");
            return Step::Done;
        }
        let leisure_ms = self.rng.gen_range(0..=self.config.max_leisure_ms());
        ia.state = State::ResponseWaitingLeisure;
        ia.sleep_until_ms = now.saturating_add(leisure_ms);
        tracing::debug!(%handle, leisure_ms, "multicast request deferred");
        Step::Requeue
    }

    fn respond(&mut self, handle: Handle, ia: &mut Interaction, request: &Message, now: u64) -> Step {
        let Some(rid) = ia.resource else {
            return Step::Done;
        };
        let Some(allowed) = self.resources.get(rid).map(|r| r.allowed) else {
            return Step::Done;
        };

        let ctx = RequestContext {
            socket: ia.socket,
            remote: ia.remote,
            meta: ia.meta,
            max_chunk: self.config.max_payload_size,
        };
        let mut response = Message::new(MessageType::Non, Code::EMPTY, 0).with_token(request.token);

        if !allowed.allows(request.code) {
            response.code = Code::METHOD_NOT_ALLOWED;
        } else {
            match self.invoke_handler(rid, &ctx, request, &mut response) {
                HandlerResult::Ok => {
                    if response.code.is_empty() {
                        response.code = Code::CONTENT;
                    }
                }
                HandlerResult::Error => {
                    if ia.meta.is_multicast() {
                        tracing::debug!(%handle, "handler error on multicast request, no response");
                        return Step::Done;
                    }
                    if response.code.is_empty() {
                        response.code = Code::INTERNAL_SERVER_ERROR;
                    }
                }
                HandlerResult::Postpone => {
                    if !is_older_than(request.timestamp, self.config.postpone_max_wait_secs, now / 1000) {
                        return self.postpone(handle, ia, request, now);
                    }
                    tracing::warn!(%handle, path = %request.options.uri_path_string(), "postponed request timed out");
                    response = Message::new(MessageType::Non, Code::SERVICE_UNAVAILABLE, 0)
                        .with_token(request.token);
                }
            }
        }

        self.complete_response(rid, ia, request, &mut response);

        // a CON answered by an empty ACK gets a separate CON response
        let (msg_type, message_id) = match request.msg_type {
            MessageType::Con if ia.req_confirm == Confirm::Acked => (MessageType::Con, self.next_message_id()),
            MessageType::Con => (MessageType::Ack, request.message_id),
            _ => (MessageType::Non, self.next_message_id()),
        };
        response.msg_type = msg_type;
        response.message_id = message_id;

        self.send_response(handle, ia, response, now)
    }

    fn invoke_handler(
        &mut self,
        rid: ResourceId,
        ctx: &RequestContext,
        request: &Message,
        response: &mut Message,
    ) -> HandlerResult {
        let is_discovery = self
            .resources
            .get(rid)
            .is_some_and(|r| matches!(r.handler, ResourceHandler::Discovery));
        if is_discovery {
            let body = link_format(self.resources.iter().map(|(_, r)| r));
            response
                .options
                .set_uint(CONTENT_FORMAT, u32::from(DISCOVERY_CONTENT_FORMAT));
            set_payload_checked(Some(request), response, &body, ctx.max_chunk);
            return HandlerResult::Ok;
        }

        match self.resources.get_mut(rid).map(|r| &mut r.handler) {
            Some(ResourceHandler::User(handler)) => handler.handle(ctx, request, response),
            _ => HandlerResult::Error,
        }
    }

    fn postpone(&mut self, handle: Handle, ia: &mut Interaction, request: &Message, now: u64) -> Step {
        if request.msg_type == MessageType::Con && ia.req_confirm != Confirm::Acked {
            self.send_empty(ia.socket, ia.remote, MessageType::Ack, request.message_id);
            ia.req_confirm = Confirm::Acked;
            ia.state = State::PostponeEmptyAckSent;
            tracing::debug!(%handle, mid = request.message_id, "handler postponed, empty ACK sent");
        }
        ia.sleep_until_ms = now.saturating_add(self.config.postpone_wait_ms());
        Step::Requeue
    }

    /// Blockwise slicing, Observe bookkeeping and RF path echo.
    fn complete_response(&mut self, rid: ResourceId, ia: &Interaction, request: &Message, response: &mut Message) {
        let max_chunk = self.config.max_payload_size;
        let wants_block = request.options.contains(BLOCK2);
        if response.code.class() == 2
            && !response.options.contains(BLOCK2)
            && (response.payload.len() > max_chunk || wants_block)
        {
            let body = std::mem::take(&mut response.payload);
            set_payload_checked(Some(request), response, &body, max_chunk);
        }

        if request.code == Code::GET {
            self.handle_observe(rid, ia, request, response);
        }

        if let MetaInfo::RfPath { hop_count, rssi } = ia.meta {
            response.options.insert_option(CoapOption {
                number: RF_PATH_INFO,
                value: vec![hop_count, rssi.wrapping_neg() as u8],
            });
        }
    }

    fn handle_observe(&mut self, rid: ResourceId, ia: &Interaction, request: &Message, response: &mut Message) {
        let observable = self.resources.get(rid).is_some_and(|r| r.is_observable());
        if !observable {
            return;
        }
        match request.options.get_uint(OBSERVE) {
            Ok(None) => {}
            Ok(Some(0)) if response.code == Code::CONTENT => {
                let mut extra = OptionList::new();
                for opt in request.options.get_all(URI_QUERY) {
                    extra.insert_option(opt.clone());
                }
                let added = self.resources.add_observer(
                    rid,
                    ia.socket,
                    ia.remote,
                    request.token,
                    extra,
                    self.config.max_observers,
                );
                match added {
                    Ok((oid, replaced)) => {
                        if let Some(old) = replaced {
                            self.abort_notifications(old.id);
                        }
                        let counter = self.resources.get(rid).map_or(0, |r| r.update_counter);
                        response.options.set_uint(OBSERVE, counter);
                        tracing::info!(
                            observer = oid.0,
                            remote = %ia.remote,
                            path = %request.options.uri_path_string(),
                            "observer registered"
                        );
                    }
                    Err(e) => tracing::warn!(remote = %ia.remote, error = %e, "observer not registered"),
                }
            }
            Ok(Some(0)) => {}
            Ok(Some(1)) => {
                if let Some(old) = self.resources.remove_observer_by_endpoint(rid, ia.socket, ia.remote) {
                    self.abort_notifications(old.id);
                    tracing::info!(observer = old.id.0, remote = %ia.remote, "observer deregistered");
                }
            }
            Ok(Some(value)) => {
                tracing::warn!(value, error = %EngineError::BadOptionValue(OBSERVE), "ignoring Observe");
            }
            Err(_) => {
                tracing::warn!(error = %EngineError::BadOptionLength(OBSERVE), "ignoring Observe");
            }
        }
    }

    fn send_response(&mut self, handle: Handle, ia: &mut Interaction, mut response: Message, now: u64) -> Step {
        response.timestamp = now / 1000;
        if let Err(e) = self.send_message(ia.socket, ia.remote, &response) {
            tracing::warn!(%handle, remote = %ia.remote, error = %e, "failed to send response");
            return Step::Done;
        }
        tracing::debug!(
            %handle,
            remote = %ia.remote,
            code = %response.code,
            msg_type = response.msg_type.as_str(),
            "response sent"
        );

        match response.msg_type {
            MessageType::Con => {
                ia.reset_transmission();
                self.arm_retransmission(ia, now);
            }
            MessageType::Ack => {
                ia.req_confirm = Confirm::Acked;
                ia.sleep_until_ms = hold_until_ms(response.timestamp, self.config.non_hold_secs);
            }
            _ => ia.sleep_until_ms = hold_until_ms(response.timestamp, self.config.non_hold_secs),
        }
        ia.response = Some(response);
        ia.state = State::ResponseSent;
        Step::Requeue
    }

    fn poll_response(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        let Some(sent) = ia.sent_state() else {
            return Step::Done;
        };
        match response_progress(&sent, now, self.config.max_retransmit, self.config.non_hold_secs) {
            Ok(Progress::Waiting) => {
                ia.sleep_until_ms = ia.ack_deadline_ms;
                Step::Requeue
            }
            Ok(Progress::HoldingBack) => {
                ia.sleep_until_ms = hold_until_ms(sent.sent_at_secs, self.config.non_hold_secs);
                Step::Requeue
            }
            Ok(Progress::Retry) => match self.retransmit(handle, ia, now) {
                Ok(()) => Step::Requeue,
                Err(e) => {
                    tracing::warn!(%handle, error = %e, "response retransmission failed");
                    Step::Done
                }
            },
            Ok(Progress::Done) => Step::Done,
            Err(e) => {
                tracing::debug!(%handle, remote = %ia.remote, error = %e, "response exchange ended");
                Step::Done
            }
        }
    }
}
