//! Recognizing our own publishes when the broker sends them back
//!
//! The engine subscribes to the whole namespace, so every retained publish
//! this process makes comes back as an inbound message. By then the file may
//! have moved on, and applying the stale copy would roll it back. The
//! publishing side records a fingerprint of each payload it sends; the
//! engine drops the inbound message that matches the oldest outstanding one.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

/// Outstanding publishes kept per topic before the oldest is forgotten
const MAX_PENDING_PER_TOPIC: usize = 32;

/// Length and hash standing in for a published payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    len: usize,
    hash: u64,
}

impl Fingerprint {
    fn of(payload: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        Self {
            len: payload.len(),
            hash: hasher.finish(),
        }
    }
}

/// Shared record of payloads published but not yet seen coming back
#[derive(Debug, Clone, Default)]
pub struct EchoFilter {
    pending: Arc<Mutex<HashMap<String, VecDeque<Fingerprint>>>>,
}

impl EchoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a payload about to be published on `topic`
    pub fn record(&self, topic: &str, payload: &[u8]) -> Fingerprint {
        let fingerprint = Fingerprint::of(payload);
        let mut pending = self.pending.lock();
        let queue = pending.entry(topic.to_string()).or_default();
        if queue.len() == MAX_PENDING_PER_TOPIC {
            queue.pop_front();
        }
        queue.push_back(fingerprint);
        fingerprint
    }

    /// Withdraw the most recent matching record after a failed publish
    pub fn forget(&self, topic: &str, fingerprint: Fingerprint) {
        let mut pending = self.pending.lock();
        if let Some(queue) = pending.get_mut(topic) {
            if let Some(pos) = queue.iter().rposition(|f| *f == fingerprint) {
                queue.remove(pos);
            }
            if queue.is_empty() {
                pending.remove(topic);
            }
        }
    }

    /// True when an inbound message is the echo of one of our publishes
    ///
    /// Messages on a topic arrive in publish order, so a match also settles
    /// every older record on that topic. Anything else came from another
    /// client: it clears the topic's records, since our later echoes now
    /// carry the broker's newest state and must be applied.
    pub fn take_echo(&self, topic: &str, payload: &[u8]) -> bool {
        let mut pending = self.pending.lock();
        let Some(queue) = pending.get_mut(topic) else {
            return false;
        };

        let fingerprint = Fingerprint::of(payload);
        let matched = match queue.iter().position(|f| *f == fingerprint) {
            Some(pos) => {
                queue.drain(..=pos);
                true
            }
            None => {
                queue.clear();
                false
            }
        };

        if queue.is_empty() {
            pending.remove(topic);
        }
        matched
    }

    /// Number of outstanding records on `topic`
    pub fn pending(&self, topic: &str) -> usize {
        self.pending.lock().get(topic).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_topic_is_not_an_echo() {
        let echoes = EchoFilter::new();
        assert!(!echoes.take_echo("fs/a", b"x"));
    }

    #[test]
    fn test_echoes_are_consumed_in_order() {
        let echoes = EchoFilter::new();
        echoes.record("fs/a", b"one");
        echoes.record("fs/a", b"two");

        assert!(echoes.take_echo("fs/a", b"one"));
        assert_eq!(echoes.pending("fs/a"), 1);
        assert!(echoes.take_echo("fs/a", b"two"));
        assert_eq!(echoes.pending("fs/a"), 0);
        assert!(!echoes.take_echo("fs/a", b"two"));
    }

    #[test]
    fn test_lost_echo_is_settled_by_a_later_one() {
        let echoes = EchoFilter::new();
        echoes.record("fs/a", b"one");
        echoes.record("fs/a", b"two");

        assert!(echoes.take_echo("fs/a", b"two"));
        assert_eq!(echoes.pending("fs/a"), 0);
    }

    #[test]
    fn test_foreign_message_clears_topic() {
        let echoes = EchoFilter::new();
        echoes.record("fs/a", b"mine");
        echoes.record("fs/b", b"mine");

        assert!(!echoes.take_echo("fs/a", b"theirs"));
        assert_eq!(echoes.pending("fs/a"), 0);
        assert_eq!(echoes.pending("fs/b"), 1);
        assert!(!echoes.take_echo("fs/a", b"mine"));
    }

    #[test]
    fn test_forget_withdraws_failed_publish() {
        let echoes = EchoFilter::new();
        let fingerprint = echoes.record("fs/a", b"x");
        echoes.forget("fs/a", fingerprint);

        assert_eq!(echoes.pending("fs/a"), 0);
        assert!(!echoes.take_echo("fs/a", b"x"));
    }

    #[test]
    fn test_records_per_topic_are_bounded() {
        let echoes = EchoFilter::new();
        for i in 0..(MAX_PENDING_PER_TOPIC + 5) {
            echoes.record("fs/a", i.to_string().as_bytes());
        }

        assert_eq!(echoes.pending("fs/a"), MAX_PENDING_PER_TOPIC);
        assert!(!echoes.take_echo("fs/a", b"0"));
    }
}
