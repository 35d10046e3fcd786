use std::sync::Arc;

use bytes::Bytes;

use crate::codec;
use crate::codec::DecodeError;
use crate::core::Delivery;
use crate::core::Envelope;
use crate::core::HandlerError;
use crate::core::HandlerPolicy;
use crate::store::MsgId;

/// Per-delivery processing state. Created when the delivery arrives, owned
/// exclusively by the processing call, and dropped once `process` returns.
#[derive(Debug)]
pub struct Message<D> {
    envelope: Envelope,
    policy: HandlerPolicy,
    delivery: D,
    decode_error: Option<DecodeError>,
    exception: Option<HandlerError>,
}

impl<D: Delivery> Message<D> {
    pub fn new(queue: impl Into<Arc<str>>, delivery: D, policy: HandlerPolicy) -> Self {
        let queue = queue.into();
        let (envelope, decode_error) = match codec::decode(&queue, &delivery) {
            Ok(envelope) => (envelope, None),
            Err(error) => {
                let envelope = Envelope {
                    queue,
                    message_id: Arc::<str>::from(delivery.message_id()),
                    payload: Bytes::copy_from_slice(delivery.payload()),
                    ..Envelope::default()
                };
                (envelope, Some(error))
            }
        };

        Self { envelope, policy: policy.normalized(), delivery, decode_error, exception: None }
    }

    pub fn envelope(&self) -> &Envelope { &self.envelope }

    pub fn policy(&self) -> &HandlerPolicy { &self.policy }

    pub fn delivery(&self) -> &D { &self.delivery }

    pub fn msg_id(&self) -> MsgId { MsgId::new(self.envelope.queue.clone(), self.envelope.message_id.clone()) }

    pub fn redundant(&self) -> bool { self.envelope.redundant() }

    /// Non-redundant with a single allowed attempt: eligible for the
    /// store-free fast path.
    pub fn simple(&self) -> bool { !self.redundant() && self.policy.attempts_limit == 1 }

    pub fn expired(&self, now: u64) -> bool { self.envelope.expired(now) }

    pub fn decode_error(&self) -> Option<&DecodeError> { self.decode_error.as_ref() }

    pub fn exception(&self) -> Option<&HandlerError> { self.exception.as_ref() }

    pub fn record_exception(&mut self, error: HandlerError) { self.exception = Some(error); }
}
