//! Per-session cancellation token tracking.
//!
//! The lane scheduler tracks the active turn's token per session so
//! interrupts and gateway stop can abort running turns cleanly.

use std::collections::HashMap;

use parking_lot::Mutex;

use drost_providers::CancelToken;

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the active turn's token for a session, replacing any
    /// previous one.
    pub fn track(&self, session_id: &str, token: CancelToken) {
        self.tokens.lock().insert(session_id.to_owned(), token);
    }

    /// Cancel the running turn for a session. Returns whether a token was
    /// tracked.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked turn (gateway stop).
    pub fn cancel_all(&self) {
        for token in self.tokens.lock().values() {
            token.cancel();
        }
    }

    /// Stop tracking once the turn completes.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_cancel_remove() {
        let map = CancelMap::new();
        let token = CancelToken::new();
        map.track("s1", token.clone());
        assert!(map.is_running("s1"));

        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1"));
    }

    #[test]
    fn cancel_all_hits_every_session() {
        let map = CancelMap::new();
        let t1 = CancelToken::new();
        let t2 = CancelToken::new();
        map.track("a", t1.clone());
        map.track("b", t2.clone());
        map.cancel_all();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[test]
    fn track_replaces_previous_token() {
        let map = CancelMap::new();
        let old = CancelToken::new();
        let new = CancelToken::new();
        map.track("s1", old.clone());
        map.track("s1", new.clone());
        map.cancel("s1");
        assert!(!old.is_cancelled());
        assert!(new.is_cancelled());
    }
}
