use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::codec::Codec;
use crate::session::Session;

/// A registry of live sessions, with a waitable live-count and a
/// one-shot `destroy` that closes every session and blocks until each
/// has finished its close sequence.
pub struct SessionManager {
    sessions: Mutex<HashMap<i64, Arc<Session>>>,
    live: Arc<(Mutex<usize>, Condvar)>,
    destroyed: AtomicBool,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            live: Arc::new((Mutex::new(0), Condvar::new())),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Wraps `recv_codec`/`send_codec` in a new `Session`, registers
    /// it, and arranges for it to remove itself on close.
    pub fn new_session(self: &Arc<Self>, recv_codec: Box<dyn Codec>, send_codec: Box<dyn Codec>, send_chan_size: usize) -> Arc<Session> {
        let session = Session::new(recv_codec, send_codec, send_chan_size);
        {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.insert(session.id(), session.clone());
        }
        {
            let (count, _) = &*self.live;
            *count.lock().unwrap() += 1;
        }

        let live = self.live.clone();
        let manager = self.clone();
        let id = session.id();
        session.set_on_remove(move |removed_id| {
            debug_assert_eq!(removed_id, id);
            manager.remove(id);
            let (count, cvar) = &*live;
            let mut count = count.lock().unwrap();
            *count -= 1;
            if *count == 0 {
                cvar.notify_all();
            }
        });

        session
    }

    fn remove(&self, id: i64) {
        self.sessions.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    pub fn get(&self, id: i64) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Closes every live session, then blocks until all have finished
    /// closing. Idempotent: a second call is a no-op.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let snapshot: Vec<Arc<Session>> = self.sessions.lock().unwrap().values().cloned().collect();
        for session in snapshot {
            let _ = session.close();
        }

        let (count, cvar) = &*self.live;
        let mut count = count.lock().unwrap();
        while *count > 0 {
            count = cvar.wait(count).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    struct NullCodec;
    impl Codec for NullCodec {
        fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
            std::thread::park();
            Err(ProtocolError::UnknownType("parked".to_string()))
        }
        fn send(&mut self, _data: &[u8]) -> Result<(), ProtocolError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    #[test]
    fn new_session_is_tracked_and_removed_on_close() {
        let manager = SessionManager::new();
        let session = manager.new_session(Box::new(NullCodec), Box::new(NullCodec), 0);
        assert_eq!(manager.len(), 1);
        assert!(manager.get(session.id()).is_some());

        session.close().unwrap();

        assert!(manager.is_empty());
        assert!(manager.get(session.id()).is_none());
    }

    #[test]
    fn destroy_blocks_until_every_session_finishes_closing() {
        let manager = SessionManager::new();
        for _ in 0..10 {
            manager.new_session(Box::new(NullCodec), Box::new(NullCodec), 0);
        }
        assert_eq!(manager.len(), 10);

        manager.destroy();

        assert!(manager.is_empty(), "destroy must wait for every session's close sequence to finish");
    }

    #[test]
    fn destroy_is_idempotent() {
        let manager = SessionManager::new();
        manager.new_session(Box::new(NullCodec), Box::new(NullCodec), 0);
        manager.destroy();
        manager.destroy();
        assert!(manager.is_empty());
    }

    #[test]
    fn closing_a_session_directly_removes_it_from_the_manager_before_destroy() {
        let manager = SessionManager::new();
        let keep = manager.new_session(Box::new(NullCodec), Box::new(NullCodec), 0);
        let closed = manager.new_session(Box::new(NullCodec), Box::new(NullCodec), 0);
        closed.close().unwrap();

        assert_eq!(manager.len(), 1);
        assert!(manager.get(keep.id()).is_some());
        assert!(manager.get(closed.id()).is_none());

        manager.destroy();
        assert!(manager.is_empty());
    }
}
