use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::core::Clock;
use crate::core::Delivery;
use crate::core::Envelope;
use crate::core::types::FLAG_REDUNDANT;
use crate::core::types::FORMAT_VERSION;

pub const DEFAULT_TTL_SECS: u64 = 86_400;

pub const HEADER_FORMAT_VERSION: &str = "format_version";
pub const HEADER_FLAGS: &str = "flags";
pub const HEADER_EXPIRES_AT: &str = "expires_at";

// broker-level options forwarded verbatim; everything else is dropped
pub const PASSTHROUGH_OPTIONS: &[&str] = &["key", "mandatory", "immediate", "persistent", "reply_to"];

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub redundant: bool,
    pub ttl_secs: Option<u64>,
    pub broker_options: HashMap<String, String>,
}

/// Broker-publish descriptor: the generated message id, the envelope headers
/// (all values strings, a broker header codec constraint), and the surviving
/// passthrough options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    pub message_id: String,
    pub headers: SmallVec<[(String, String); 4]>,
    pub broker_options: Vec<(String, String)>,
}

pub fn publishing_options(options: &PublishOptions, clock: &impl Clock) -> PublishProperties {
    let ttl_secs = options.ttl_secs.unwrap_or(DEFAULT_TTL_SECS);
    let flags = if options.redundant { FLAG_REDUNDANT } else { 0 };

    let mut headers = SmallVec::new();
    headers.push((HEADER_FORMAT_VERSION.to_owned(), FORMAT_VERSION.to_string()));
    headers.push((HEADER_FLAGS.to_owned(), flags.to_string()));
    headers.push((HEADER_EXPIRES_AT.to_owned(), (clock.now() + ttl_secs).to_string()));

    let mut broker_options: Vec<(String, String)> = options
        .broker_options
        .iter()
        .filter(|(name, _)| PASSTHROUGH_OPTIONS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    broker_options.sort();

    PublishProperties { message_id: generate_message_id(), headers, broker_options }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MissingMessageId,
    MissingHeader(&'static str),
    InvalidHeader { name: &'static str, value: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingMessageId => write!(f, "delivery carries no message id"),
            Self::MissingHeader(name) => write!(f, "missing envelope header {name}"),
            Self::InvalidHeader { name, value } => write!(f, "envelope header {name} is not an integer: {value}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Best-effort envelope extraction from a raw delivery. Callers keep the
/// error alongside the (defaulted) envelope so processing can ack-and-drop.
pub fn decode<D: Delivery>(queue: &Arc<str>, delivery: &D) -> Result<Envelope, DecodeError> {
    let message_id = delivery.message_id();
    if message_id.is_empty() {
        return Err(DecodeError::MissingMessageId);
    }

    Ok(Envelope {
        queue: queue.clone(),
        message_id: Arc::<str>::from(message_id),
        format_version: header_int(delivery, HEADER_FORMAT_VERSION)?,
        flags: header_int(delivery, HEADER_FLAGS)?,
        expires_at: header_int(delivery, HEADER_EXPIRES_AT)?,
        payload: Bytes::copy_from_slice(delivery.payload()),
    })
}

fn header_int<D: Delivery, T: std::str::FromStr>(delivery: &D, name: &'static str) -> Result<T, DecodeError> {
    let value = delivery
        .headers()
        .iter()
        .find(|(header_name, _)| header_name.as_ref() == name.as_bytes())
        .map(|(_, value)| value)
        .ok_or(DecodeError::MissingHeader(name))?;

    let text = std::str::from_utf8(value.as_ref())
        .map_err(|_| DecodeError::InvalidHeader { name, value: format!("{value:?}") })?;
    text.parse::<T>().map_err(|_| DecodeError::InvalidHeader { name, value: text.to_owned() })
}

fn generate_message_id() -> String {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    Uuid::now_v1(NODE_ID.get_or_init(random_node_id)).to_string()
}

fn random_node_id() -> [u8; 6] {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0_u128, |duration| duration.as_nanos());
    let mut state = (nanos as u64) ^ u64::from(std::process::id()).rotate_left(32);
    state ^= state.rotate_left(13);
    state ^= state.rotate_right(7);
    state ^= state.rotate_left(17);

    let bytes = state.to_be_bytes();
    // multicast bit marks a random (non-MAC) node id
    [bytes[0] | 0x01, bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]]
}
