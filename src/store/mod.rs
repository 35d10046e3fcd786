pub mod memory;
pub mod redis;

use std::sync::Arc;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

pub const KEY_PREFIX: &str = "msgid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subkey {
    Status,
    Expires,
    Timeout,
    Attempts,
    Exceptions,
    Mutex,
    Delay,
    AckCount,
}

impl Subkey {
    pub const ALL: [Subkey; 8] = [
        Subkey::Status,
        Subkey::Expires,
        Subkey::Timeout,
        Subkey::Attempts,
        Subkey::Exceptions,
        Subkey::Mutex,
        Subkey::Delay,
        Subkey::AckCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Expires => "expires",
            Self::Timeout => "timeout",
            Self::Attempts => "attempts",
            Self::Exceptions => "exceptions",
            Self::Mutex => "mutex",
            Self::Delay => "delay",
            Self::AckCount => "ack_count",
        }
    }

    pub fn parse(text: &str) -> Option<Subkey> {
        Self::ALL.into_iter().find(|subkey| subkey.as_str() == text)
    }
}

impl std::fmt::Display for Subkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Identity of a logical message in the store: the consuming queue plus the
/// publisher-assigned UUID shared by both redundant deliveries.
///
/// Sub-keys live under `msgid:<queue>:<uuid>:<subkey>`; the naming is
/// operator-visible because garbage collection scans it. Queue names must not
/// contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MsgId {
    queue: Arc<str>,
    uuid: Arc<str>,
}

impl MsgId {
    pub fn new(queue: impl Into<Arc<str>>, uuid: impl Into<Arc<str>>) -> Self {
        Self { queue: queue.into(), uuid: uuid.into() }
    }

    pub fn queue(&self) -> &str { self.queue.as_ref() }

    pub fn uuid(&self) -> &str { self.uuid.as_ref() }

    pub fn key(&self, sub: Subkey) -> String { format!("{KEY_PREFIX}:{}:{}:{}", self.queue, self.uuid, sub.as_str()) }

    /// Inverse of the key naming scheme, used by garbage collection scans.
    pub fn from_key(key: &str) -> Option<(MsgId, Subkey)> {
        let rest = key.strip_prefix(KEY_PREFIX)?.strip_prefix(':')?;
        let (rest, sub_text) = rest.rsplit_once(':')?;
        let (queue, uuid) = rest.split_once(':')?;
        if queue.is_empty() {
            return None;
        }

        let subkey = Subkey::parse(sub_text)?;
        Some((MsgId::new(queue, uuid), subkey))
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{KEY_PREFIX}:{}:{}", self.queue, self.uuid)
    }
}
