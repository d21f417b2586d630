//! Bounded LRU cache of DNS answers, indexed by question key and aware of
//! each entry's expiry time.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use hickory_proto::op::Message;
use lru::LruCache;
use parking_lot::Mutex;

use crate::question_key::QuestionKey;

/// Default capacity, per the resolution engine's data model.
pub const DEFAULT_CAPACITY: usize = 4096;

struct Entry {
    message: Message,
    expires_at: Instant,
}

/// Thread-safe bounded LRU mapping of question key to `(message, expiry)`.
pub struct Cache {
    inner: Mutex<LruCache<QuestionKey, Entry>>,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert or overwrite `key`, evicting the least-recently-used entry if
    /// the cache is already at capacity. Returns whether an eviction occurred.
    pub fn add(&self, key: QuestionKey, message: Message, expires_at: Instant) -> bool {
        let mut guard = self.inner.lock();
        let evicted = guard.len() == guard.cap().get() && !guard.contains(&key);
        guard.put(key, Entry { message, expires_at });
        evicted
    }

    /// Look up `key`, updating its LRU recency. Does not mutate expiry.
    pub fn get(&self, key: &str) -> Option<(Message, Instant)> {
        let mut guard = self.inner.lock();
        guard.get(key).map(|e| (e.message.clone(), e.expires_at))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Derive the cache expiry for `message` from the TTL of the first record in
/// Answer / Authority / Additional, in that order. `None` if the message
/// carries no records in any of those sections — such a message is not
/// cacheable.
pub fn expiry_of(message: &Message, now: Instant) -> Option<Instant> {
    ttl_of(message).map(|ttl| now + Duration::from_secs(ttl as u64))
}

fn ttl_of(message: &Message) -> Option<u32> {
    message
        .answers()
        .first()
        .or_else(|| message.name_servers().first())
        .or_else(|| message.additionals().first())
        .map(|rr| rr.ttl())
}

/// Rewrite every record's TTL in Answer, Authority and Additional sections of
/// `message` in place.
pub fn rewrite_ttl(message: &mut Message, ttl: u32) {
    for rr in message.answers_mut() {
        rr.set_ttl(ttl);
    }
    for rr in message.name_servers_mut() {
        rr.set_ttl(ttl);
    }
    for rr in message.additionals_mut() {
        rr.set_ttl(ttl);
    }
}

/// Whether `message` has any record the cache would index (§3's "messages
/// with none of these sections are not cached").
pub fn is_cacheable(message: &Message) -> bool {
    ttl_of(message).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record};
    use std::str::FromStr;
    use std::time::Duration;

    fn answer(ttl: u32) -> Message {
        let mut msg = Message::new();
        let rr = Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            ttl,
            RData::A(A::new(93, 184, 216, 34)),
        );
        msg.add_answer(rr);
        msg
    }

    #[test]
    fn evicts_lru_on_overflow() {
        let cache = Cache::new(2);
        let now = Instant::now();
        cache.add("a".into(), answer(60), now);
        cache.add("b".into(), answer(60), now);
        // touch "a" so "b" becomes the LRU entry
        cache.get("a");
        let evicted = cache.add("c".into(), answer(60), now);
        assert!(evicted);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn expiry_from_first_answer_ttl() {
        let now = Instant::now();
        let msg = answer(60);
        let expires = expiry_of(&msg, now).unwrap();
        assert_eq!(expires, now + Duration::from_secs(60));
    }

    #[test]
    fn empty_message_not_cacheable() {
        assert!(!is_cacheable(&Message::new()));
    }

    #[test]
    fn rewrite_ttl_touches_every_section() {
        let mut msg = answer(300);
        rewrite_ttl(&mut msg, 1);
        assert_eq!(msg.answers()[0].ttl(), 1);
    }
}
