use std::sync::Arc;

use bytes::Bytes;

pub const FORMAT_VERSION: u32 = 1;
pub const FLAG_REDUNDANT: u32 = 1;

pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub queue: Arc<str>,
    pub message_id: Arc<str>,
    pub format_version: u32,
    pub flags: u32,
    pub expires_at: u64,
    pub payload: Bytes,
}

impl Envelope {
    pub fn redundant(&self) -> bool { self.flags & FLAG_REDUNDANT != 0 }

    pub fn expired(&self, now: u64) -> bool { self.expires_at <= now }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerPolicy {
    pub timeout_secs: u64,
    pub delay_secs: u64,
    pub attempts_limit: u64,
    pub exceptions_limit: u64,
}

impl HandlerPolicy {
    pub fn new(timeout_secs: u64, delay_secs: u64, attempts_limit: u64, exceptions_limit: u64) -> Self {
        Self { timeout_secs, delay_secs, attempts_limit, exceptions_limit }.normalized()
    }

    // a handler allowed n exceptions needs at least n+1 attempts to spend them
    pub fn normalized(mut self) -> Self {
        if self.attempts_limit <= self.exceptions_limit {
            self.attempts_limit = self.exceptions_limit + 1;
        }
        self
    }
}

impl Default for HandlerPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HANDLER_TIMEOUT_SECS,
            delay_secs: DEFAULT_RETRY_DELAY_SECS,
            attempts_limit: 1,
            exceptions_limit: 0,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum HandlerError {
    Message(String),
    Timeout { after_secs: u64 },
    Panic(String),
}

impl std::fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Timeout { after_secs } => f.debug_struct("Timeout").field("after_secs", after_secs).finish(),
            Self::Panic(message) => f.debug_tuple("Panic").field(message).finish(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => write!(f, "handler failed: {message}"),
            Self::Timeout { after_secs } => write!(f, "handler timed out after {after_secs}s"),
            Self::Panic(message) => write!(f, "handler panicked: {message}"),
        }
    }
}

impl std::error::Error for HandlerError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    Raised(HandlerError),
    TimedOut { after_secs: u64 },
}

impl HandlerOutcome {
    pub fn into_error(self) -> Option<HandlerError> {
        match self {
            Self::Completed => None,
            Self::Raised(error) => Some(error),
            Self::TimedOut { after_secs } => Some(HandlerError::Timeout { after_secs }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Ancient,
    DecodingError,
    Delayed,
    HandlerNotYetTimedOut,
    MutexLocked,
    HandlerCrash,
    AttemptsLimitReached,
    ExceptionsLimitReached,
    InternalError,
}

impl ResultCode {
    /// The delivery was not acked; the broker will redeliver it.
    pub fn reject(&self) -> bool {
        matches!(self, Self::Delayed | Self::HandlerNotYetTimedOut | Self::MutexLocked | Self::HandlerCrash)
    }

    /// Processing gave up for good; the failure callback fires.
    pub fn failure(&self) -> bool { matches!(self, Self::AttemptsLimitReached | Self::ExceptionsLimitReached) }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Ancient => "ancient",
            Self::DecodingError => "decoding_error",
            Self::Delayed => "delayed",
            Self::HandlerNotYetTimedOut => "handler_not_yet_timed_out",
            Self::MutexLocked => "mutex_locked",
            Self::HandlerCrash => "handler_crash",
            Self::AttemptsLimitReached => "attempts_limit_reached",
            Self::ExceptionsLimitReached => "exceptions_limit_reached",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}
