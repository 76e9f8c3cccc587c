//! Client role: send a request and hand the response to a callback.

use std::net::SocketAddr;

use coap_core::constants::MessageType;
use coap_core::message::Message;

use super::{CoapEngine, Step, hold_until_ms};
use crate::arena::Handle;
use crate::error::EngineError;
use crate::interaction::{Confirm, Interaction, ResponseCallback, Role, State};
use crate::reliability::{Progress, request_progress};
use crate::transport::{Clock, SocketHandle, Transport};

impl<T: Transport, C: Clock> CoapEngine<T, C> {
    /// Queue `request` for sending to `remote`.
    ///
    /// The message id is always assigned here; an empty token is replaced by
    /// a random one. `callback` runs exactly once with the response or the
    /// error that ended the exchange, unless the request is cancelled.
    pub fn start_request<F>(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        mut request: Message,
        callback: F,
    ) -> Result<Handle, EngineError>
    where
        F: FnMut(Result<&Message, EngineError>, SocketAddr) + Send + 'static,
    {
        if !self.has_socket(socket) {
            return Err(EngineError::Socket(socket));
        }
        if !request.is_request() {
            return Err(EngineError::Argument("client message must carry a request code"));
        }
        if !matches!(request.msg_type, MessageType::Con | MessageType::Non) {
            return Err(EngineError::Argument("requests are CON or NON"));
        }

        request.message_id = self.next_message_id();
        if request.token.is_empty() {
            request.token = self.random_token();
        }

        let mut ia = Interaction::new(Role::Client, socket, remote);
        ia.request = Some(request);
        ia.callback = Some(Box::new(callback) as ResponseCallback);
        self.enqueue(ia)
    }

    /// Destroy a client exchange without invoking its callback.
    pub fn cancel(&mut self, handle: Handle) -> Result<(), EngineError> {
        match self.interactions.get(handle).map(|ia| ia.role) {
            Some(Role::Client) => {
                self.remove_interaction(handle);
                tracing::debug!(%handle, "request cancelled");
                Ok(())
            }
            Some(_) => Err(EngineError::Argument("only client requests can be cancelled")),
            None => Err(EngineError::NotFound("interaction")),
        }
    }

    pub(crate) fn process_client(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        match ia.state {
            State::ReadyToRequest => self.send_request(handle, ia, now),
            State::WaitingResponse => self.poll_request(handle, ia, now),
            State::HandleResponse => {
                let remote = ia.remote;
                match (ia.callback.as_mut(), ia.response.as_ref()) {
                    (Some(callback), Some(response)) => callback(Ok(response), remote),
                    (Some(callback), None) => callback(Err(EngineError::NotFound("response")), remote),
                    (None, _) => {}
                }
                Step::Done
            }
            _ => Step::Done,
        }
    }

    fn send_request(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        let Some(request) = ia.request.as_mut() else {
            return Step::Done;
        };
        request.timestamp = now / 1000;
        let (timestamp, msg_type) = (request.timestamp, request.msg_type);

        if let Err(e) = self.send_message(ia.socket, ia.remote, request) {
            tracing::warn!(%handle, remote = %ia.remote, error = %e, "failed to send request");
            return finish_with_error(ia, e);
        }
        tracing::debug!(%handle, remote = %ia.remote, msg_type = msg_type.as_str(), "request sent");

        ia.state = State::WaitingResponse;
        if msg_type == MessageType::Con {
            self.arm_retransmission(ia, now);
        } else {
            ia.sleep_until_ms = hold_until_ms(timestamp, self.config.client_max_resp_wait_secs);
        }
        Step::Requeue
    }

    fn poll_request(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        let Some(sent) = ia.sent_state() else {
            return Step::Done;
        };
        let max_wait = self.config.client_max_resp_wait_secs;
        match request_progress(&sent, now, self.config.max_retransmit, max_wait) {
            Ok(Progress::Retry) => match self.retransmit(handle, ia, now) {
                Ok(()) => Step::Requeue,
                Err(e) => finish_with_error(ia, e),
            },
            Ok(_) => {
                ia.sleep_until_ms = if sent.msg_type == MessageType::Con && sent.confirm != Confirm::Acked {
                    ia.ack_deadline_ms
                } else {
                    hold_until_ms(sent.sent_at_secs, max_wait)
                };
                Step::Requeue
            }
            Err(e) => {
                tracing::debug!(%handle, remote = %ia.remote, error = %e, "request failed");
                finish_with_error(ia, e)
            }
        }
    }
}

fn finish_with_error(ia: &mut Interaction, error: EngineError) -> Step {
    let remote = ia.remote;
    if let Some(callback) = ia.callback.as_mut() {
        callback(Err(error), remote);
    }
    Step::Done
}
