use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock, Weak};

use crate::session::Session;

/// A named multicast group of sessions. Setting a key registers a
/// close callback on the session so it evicts itself from the group
/// the moment it closes, without any caller action.
pub struct Channel<K> {
    id: u64,
    sessions: RwLock<HashMap<K, Arc<Session>>>,
}

static NEXT_CHANNEL_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

impl<K> Channel<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static + std::fmt::Display,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Inserts `session` under `key`, replacing and unregistering any
    /// prior entry, and arranges for the session's close to remove it.
    pub fn set(self: &Arc<Self>, key: K, session: Arc<Session>) {
        {
            let mut sessions = self.sessions.write().unwrap();
            if let Some(old) = sessions.remove(&key) {
                old.del_close_callback(&self.handler_key(), &key.to_string());
            }
            sessions.insert(key.clone(), session.clone());
        }

        let weak_self: Weak<Self> = Arc::downgrade(self);
        let handler_key = self.handler_key();
        let key_for_cb = key.clone();
        session.add_close_callback(handler_key, key.to_string(), move || {
            if let Some(channel) = weak_self.upgrade() {
                channel.sessions.write().unwrap().remove(&key_for_cb);
            }
        });
    }

    /// Removes `key`, unregistering its close callback. Returns
    /// whether an entry existed.
    pub fn delete(&self, key: &K) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(session) = sessions.remove(key) {
            session.del_close_callback(&self.handler_key(), &key.to_string());
            true
        } else {
            false
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(key).cloned()
    }

    /// Invokes `f` for every live entry under the channel lock.
    /// `f` must not call back into this channel — the lock is held
    /// for the whole iteration.
    pub fn fetch(&self, mut f: impl FnMut(&K, &Arc<Session>)) {
        let sessions = self.sessions.read().unwrap();
        for (k, s) in sessions.iter() {
            f(k, s);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry, unregistering each close callback.
    pub fn destroy(&self) {
        let mut sessions = self.sessions.write().unwrap();
        for (key, session) in sessions.drain() {
            session.del_close_callback(&self.handler_key(), &key.to_string());
        }
    }

    fn handler_key(&self) -> String {
        format!("channel#{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::error::ProtocolError;

    struct NullCodec;
    impl Codec for NullCodec {
        fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
            Ok(Vec::new())
        }
        fn send(&mut self, _data: &[u8]) -> Result<(), ProtocolError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    #[test]
    fn session_close_evicts_from_channel() {
        let channel = Channel::<String>::new();
        let session = Session::new(Box::new(NullCodec), Box::new(NullCodec), 0);
        channel.set("client-1".to_string(), session.clone());
        assert_eq!(channel.len(), 1);

        session.close().unwrap();
        assert!(channel.get(&"client-1".to_string()).is_none());
        assert_eq!(channel.len(), 0);
    }
}
