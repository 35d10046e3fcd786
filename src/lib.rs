//! At-least-once processing core for redundantly published broker messages.
//!
//! Publishers may send one logical message to two independent brokers; both
//! deliveries reach consumers with the same message id. The processing state
//! machine coordinates through an external key-value store so the registered
//! handler completes exactly once per message id across the whole fleet,
//! surviving duplicate deliveries, handler crashes, process kills, and
//! concurrent consumers racing on the same message.
//!
//! # Handler timeout contract
//!
//! A handler runs as an abortable local task under a hard wall-clock deadline.
//! On expiry the task is aborted at its next await point, so handlers must be
//! genuinely async for the deadline to be enforceable; a long non-yielding
//! section cannot be interrupted.
//!
//! # Handler idempotency
//!
//! A handler whose deadline elapsed can be taken over by another consumer, so
//! two executions for the same message id may briefly overlap. At most one of
//! them is recorded as completed; the side effects of the other are the
//! handler's problem. Write idempotent handlers.

pub mod clock;
pub mod codec;
pub mod config;
pub mod core;
pub mod invoker;
pub mod message;
pub mod process;
pub mod runtime;
pub mod store;

pub use clock::SystemClock;
pub use config::ConsumerConfig;
pub use crate::core::Clock;
pub use crate::core::Delivery;
pub use crate::core::Envelope;
pub use crate::core::Handler;
pub use crate::core::HandlerError;
pub use crate::core::HandlerPolicy;
pub use crate::core::ResultCode;
pub use crate::core::Store;
pub use message::Message;
pub use process::ProcessingContext;
