#![allow(async_fn_in_trait)]

use bytes::Bytes;

use crate::core::types::Envelope;
use crate::core::types::HandlerError;
use crate::core::types::HandlerPolicy;
use crate::core::types::ResultCode;
use crate::store::MsgId;
use crate::store::Subkey;

/// A single broker delivery, owned exclusively by the processing task.
pub trait Delivery: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn message_id(&self) -> &str;
    fn headers(&self) -> &[(Bytes, Bytes)];
    fn payload(&self) -> &[u8];

    async fn ack(&self) -> Result<(), Self::Error>;

    /// Hands the delivery back to the broker for redelivery. Optional: brokers
    /// without an explicit reject rely on not-acking, which is equivalent.
    async fn reject(&self, _requeue: bool) -> Result<(), Self::Error> { Ok(()) }
}

/// User processing capability.
///
/// `call` may run concurrently with another consumer retrying the same message
/// after a handler timeout; implementations must tolerate a second execution
/// for the same message id.
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, envelope: &Envelope) -> Result<(), HandlerError>;

    /// Invoked once after each execution that raised. Errors here surface as
    /// `ResultCode::InternalError`.
    async fn on_exception(&self, _envelope: &Envelope, _error: &HandlerError) -> Result<(), HandlerError> { Ok(()) }

    /// Invoked once when processing has definitively given up
    /// (`ResultCode::failure()` is true).
    async fn on_failure(&self, _envelope: &Envelope, _code: ResultCode) -> Result<(), HandlerError> { Ok(()) }

    fn policy(&self) -> HandlerPolicy { HandlerPolicy::default() }
}

/// Key-value coordination store shared by all consumers of a queue.
///
/// Implementations must be linearizable per msg-id: `msetnx` is all-or-nothing
/// across its entries, `setnx` returns true to exactly one caller, and `incr`
/// is atomic. Cross-msg-id ordering is irrelevant.
pub trait Store: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, msg_id: &MsgId, sub: Subkey) -> Result<Option<String>, Self::Error>;
    async fn set(&self, msg_id: &MsgId, sub: Subkey, value: &str) -> Result<(), Self::Error>;
    async fn setnx(&self, msg_id: &MsgId, sub: Subkey, value: &str) -> Result<bool, Self::Error>;
    async fn msetnx(&self, msg_id: &MsgId, entries: &[(Subkey, String)]) -> Result<bool, Self::Error>;
    async fn incr(&self, msg_id: &MsgId, sub: Subkey) -> Result<i64, Self::Error>;
    async fn del(&self, msg_id: &MsgId, sub: Subkey) -> Result<(), Self::Error>;
    async fn del_keys(&self, msg_id: &MsgId) -> Result<(), Self::Error>;
    async fn exists(&self, msg_id: &MsgId, sub: Subkey) -> Result<bool, Self::Error>;
    async fn keys(&self, msg_id: &MsgId) -> Result<Vec<Subkey>, Self::Error>;

    /// Deletes all sub-keys of every msg-id whose `expires` value is at or
    /// below the cutoff. Returns the number of msg-ids collected.
    async fn garbage_collect(&self, older_than: u64) -> Result<usize, Self::Error>;
}

/// The one source of nondeterminism in the state machine; injectable per test.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Unix epoch seconds.
    fn now(&self) -> u64;
}
