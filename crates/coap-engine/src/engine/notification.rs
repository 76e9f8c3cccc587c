//! Notification role: deliver resource state changes to observers (RFC 7641).

use coap_core::constants::MessageType;
use coap_core::message::{Code, Message};
use coap_core::option::number::OBSERVE;

use super::{CoapEngine, Step, hold_until_ms};
use crate::arena::Handle;
use crate::blockwise::set_payload_checked;
use crate::error::EngineError;
use crate::interaction::{Interaction, Role, State};
use crate::reliability::{Progress, response_progress};
use crate::resource::{HandlerResult, ObserverId, ResourceId};
use crate::transport::{Clock, Transport};

impl<T: Transport, C: Clock> CoapEngine<T, C> {
    /// Bump the resource's update counter and queue a notification per observer.
    ///
    /// Observers with a notification still in flight get the new state on its
    /// next retransmission instead. Returns the number of notifications queued.
    pub fn notify_resource_observers(&mut self, rid: ResourceId) -> Result<usize, EngineError> {
        let resource = self
            .resources
            .get_mut(rid)
            .ok_or(EngineError::NotFound("resource"))?;
        let counter = resource.bump_update_counter();
        let observers: Vec<_> = resource
            .observers
            .iter()
            .map(|o| (o.id, o.socket, o.remote))
            .collect();

        let mut queued = 0;
        for (oid, socket, remote) in observers {
            if let Some(in_flight) = self.notification_for(oid) {
                if let Some(ia) = self.interactions.get_mut(in_flight) {
                    ia.update_pending = true;
                }
                tracing::debug!(observer = oid.0, counter, "update pending on in-flight notification");
                continue;
            }
            let mut ia = Interaction::new(Role::Notification, socket, remote);
            ia.resource = Some(rid);
            ia.observer = Some(oid);
            match self.enqueue(ia) {
                Ok(_) => queued += 1,
                Err(e) => tracing::warn!(observer = oid.0, error = %e, "notification dropped"),
            }
        }
        tracing::debug!(resource = rid.0, counter, queued, "observers notified");
        Ok(queued)
    }

    fn notification_for(&self, oid: ObserverId) -> Option<Handle> {
        self.interactions
            .iter()
            .find(|(_, ia)| ia.role == Role::Notification && ia.observer == Some(oid))
            .map(|(h, _)| h)
    }

    pub(crate) fn process_notification(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        match ia.state {
            State::ReadyToNotify => self.send_notification(handle, ia, now),
            State::NotificationSent => self.poll_notification(handle, ia, now),
            _ => Step::Done,
        }
    }

    /// Build a notification through the resource's notifier.
    ///
    /// `keep_type` pins the message type of a notification being replaced
    /// mid-retransmission. Returns `None` when the observer or notifier is
    /// gone or the notifier postponed.
    fn build_notification(
        &mut self,
        rid: ResourceId,
        oid: ObserverId,
        keep_type: Option<MessageType>,
    ) -> Option<Message> {
        let message_id = self.next_message_id();
        let interval = self.config.notify_con_interval;
        let max_chunk = self.config.max_payload_size;

        let resource = self.resources.get_mut(rid)?;
        let counter = resource.update_counter;
        let observer = resource.observers.iter().find(|o| o.id == oid)?.clone();
        let notifier = resource.notifier.as_mut()?;

        let mut message = Message::new(MessageType::Con, Code::EMPTY, message_id).with_token(observer.token);
        let result = notifier.notify(&observer, &mut message);
        if result == HandlerResult::Postpone {
            return None;
        }

        if result == HandlerResult::Error || message.code.is_error() {
            // RFC 7641 §3.2: an error ends the observation
            if message.code.is_empty() || !message.code.is_error() {
                message.code = Code::INTERNAL_SERVER_ERROR;
            }
            message.options.remove_all(OBSERVE);
            resource.observers.retain(|o| o.id != oid);
            tracing::info!(observer = oid.0, code = %message.code, "observer removed after error notification");
        } else {
            if message.code.is_empty() {
                message.code = Code::CONTENT;
            }
            message.options.set_uint(OBSERVE, counter);
        }

        if let Some(msg_type) = keep_type {
            message.msg_type = msg_type;
        } else if let Some(obs) = resource.observers.iter_mut().find(|o| o.id == oid) {
            // RFC 7641 §4.5: confirmable at least every `interval` notifications
            if message.msg_type == MessageType::Non {
                obs.non_count = obs.non_count.saturating_add(1);
                if obs.non_count >= interval {
                    message.msg_type = MessageType::Con;
                }
            }
            if message.msg_type == MessageType::Con {
                obs.non_count = 0;
            }
        }

        if message.payload.len() > max_chunk {
            let body = std::mem::take(&mut message.payload);
            set_payload_checked(None, &mut message, &body, max_chunk);
        }
        Some(message)
    }

    fn send_notification(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        let (Some(rid), Some(oid)) = (ia.resource, ia.observer) else {
            return Step::Done;
        };
        // the message built here already carries every update queued so far
        ia.update_pending = false;
        let Some(mut message) = self.build_notification(rid, oid, None) else {
            if self.resources.observer(rid, oid).is_none() {
                return Step::Done;
            }
            ia.sleep_until_ms = now.saturating_add(self.config.postpone_wait_ms());
            return Step::Requeue;
        };

        message.timestamp = now / 1000;
        if let Err(e) = self.send_message(ia.socket, ia.remote, &message) {
            tracing::warn!(%handle, observer = oid.0, error = %e, "failed to send notification");
            return Step::Done;
        }
        tracing::debug!(
            %handle,
            observer = oid.0,
            mid = message.message_id,
            msg_type = message.msg_type.as_str(),
            "notification sent"
        );

        ia.reset_transmission();
        if message.msg_type == MessageType::Con {
            self.arm_retransmission(ia, now);
        } else {
            ia.sleep_until_ms = hold_until_ms(message.timestamp, self.config.non_hold_secs);
        }
        ia.response = Some(message);
        ia.state = State::NotificationSent;
        Step::Requeue
    }

    fn poll_notification(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        let (Some(rid), Some(oid)) = (ia.resource, ia.observer) else {
            return Step::Done;
        };
        let Some(sent) = ia.sent_state() else {
            return Step::Done;
        };

        match response_progress(&sent, now, self.config.max_retransmit, self.config.non_hold_secs) {
            Ok(Progress::Waiting) => {
                ia.sleep_until_ms = ia.ack_deadline_ms;
                Step::Requeue
            }
            Ok(Progress::Retry) if ia.update_pending => {
                // RFC 7641 §4.5.2: the retransmission carries the newest state
                ia.update_pending = false;
                match self.build_notification(rid, oid, Some(sent.msg_type)) {
                    Some(mut fresh) => {
                        fresh.timestamp = now / 1000;
                        ia.response = Some(fresh);
                    }
                    None => {
                        if let Some(old) = ia.response.as_mut() {
                            old.message_id = self.next_message_id();
                        }
                    }
                }
                self.retransmit_notification(handle, ia, now)
            }
            Ok(Progress::Retry) => self.retransmit_notification(handle, ia, now),
            Ok(Progress::HoldingBack) if !ia.update_pending => {
                ia.sleep_until_ms = hold_until_ms(sent.sent_at_secs, self.config.non_hold_secs);
                Step::Requeue
            }
            Ok(Progress::Done | Progress::HoldingBack) => {
                if let Some(observer) = self.resources.observer_mut(rid, oid) {
                    observer.fail_count = 0;
                }
                if ia.update_pending {
                    ia.update_pending = false;
                    ia.reset_transmission();
                    ia.response = None;
                    ia.state = State::ReadyToNotify;
                    ia.wake();
                    return Step::Requeue;
                }
                Step::Done
            }
            Err(e @ (EngineError::OutOfAttempts | EngineError::RemoteReset)) => {
                if self.resources.remove_observer(rid, oid).is_some() {
                    tracing::info!(%handle, observer = oid.0, reason = %e, "observer removed");
                }
                Step::Done
            }
            Err(e) => {
                tracing::debug!(%handle, error = %e, "notification ended");
                Step::Done
            }
        }
    }

    fn retransmit_notification(&mut self, handle: Handle, ia: &mut Interaction, now: u64) -> Step {
        if let (Some(rid), Some(oid)) = (ia.resource, ia.observer) {
            if let Some(observer) = self.resources.observer_mut(rid, oid) {
                observer.fail_count = observer.fail_count.saturating_add(1);
            }
        }
        match self.retransmit(handle, ia, now) {
            Ok(()) => Step::Requeue,
            Err(e) => {
                tracing::warn!(%handle, error = %e, "notification retransmission failed");
                Step::Done
            }
        }
    }
}
