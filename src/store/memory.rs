use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::Store;
use crate::store::MsgId;
use crate::store::Subkey;

/// Process-local store with the same per-msg-id semantics as the Redis client.
///
/// Every operation holds one lock over the whole map, which trivially gives
/// the linearizability the state machine needs. Useful for tests and for
/// single-process deployments where no cross-consumer coordination exists.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.lock().len() }

    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemoryStore {
    type Error = Infallible;

    async fn get(&self, msg_id: &MsgId, sub: Subkey) -> Result<Option<String>, Self::Error> {
        Ok(self.lock().get(&msg_id.key(sub)).cloned())
    }

    async fn set(&self, msg_id: &MsgId, sub: Subkey, value: &str) -> Result<(), Self::Error> {
        self.lock().insert(msg_id.key(sub), value.to_owned());
        Ok(())
    }

    async fn setnx(&self, msg_id: &MsgId, sub: Subkey, value: &str) -> Result<bool, Self::Error> {
        let mut entries = self.lock();
        let key = msg_id.key(sub);
        if entries.contains_key(&key) {
            return Ok(false);
        }

        entries.insert(key, value.to_owned());
        Ok(true)
    }

    async fn msetnx(&self, msg_id: &MsgId, pairs: &[(Subkey, String)]) -> Result<bool, Self::Error> {
        let mut entries = self.lock();
        if pairs.iter().any(|(sub, _)| entries.contains_key(&msg_id.key(*sub))) {
            return Ok(false);
        }

        for (sub, value) in pairs {
            entries.insert(msg_id.key(*sub), value.clone());
        }
        Ok(true)
    }

    async fn incr(&self, msg_id: &MsgId, sub: Subkey) -> Result<i64, Self::Error> {
        let mut entries = self.lock();
        let key = msg_id.key(sub);
        let next = entries.get(&key).and_then(|value| value.parse::<i64>().ok()).unwrap_or(0) + 1;
        entries.insert(key, next.to_string());
        Ok(next)
    }

    async fn del(&self, msg_id: &MsgId, sub: Subkey) -> Result<(), Self::Error> {
        self.lock().remove(&msg_id.key(sub));
        Ok(())
    }

    async fn del_keys(&self, msg_id: &MsgId) -> Result<(), Self::Error> {
        let mut entries = self.lock();
        for sub in Subkey::ALL {
            entries.remove(&msg_id.key(sub));
        }
        Ok(())
    }

    async fn exists(&self, msg_id: &MsgId, sub: Subkey) -> Result<bool, Self::Error> {
        Ok(self.lock().contains_key(&msg_id.key(sub)))
    }

    async fn keys(&self, msg_id: &MsgId) -> Result<Vec<Subkey>, Self::Error> {
        let entries = self.lock();
        Ok(Subkey::ALL.into_iter().filter(|sub| entries.contains_key(&msg_id.key(*sub))).collect())
    }

    async fn garbage_collect(&self, older_than: u64) -> Result<usize, Self::Error> {
        let expired: Vec<MsgId> = {
            let entries = self.lock();
            entries
                .iter()
                .filter_map(|(key, value)| match MsgId::from_key(key) {
                    Some((msg_id, Subkey::Expires)) => {
                        let expires = value.parse::<u64>().ok()?;
                        (expires <= older_than).then_some(msg_id)
                    }
                    _ => None,
                })
                .collect()
        };

        for msg_id in &expired {
            self.del_keys(msg_id).await?;
        }
        Ok(expired.len())
    }
}
