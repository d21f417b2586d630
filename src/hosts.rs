//! Static hosts-file overlay: `/etc/hosts`-style text parsed into a
//! question-key → response map, hot-swapped when the file changes on disk.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::DnsResult;
use crate::question_key::{self, QuestionKey};

/// TTL, class and EDNS0 buffer size the source format always implies.
const HOSTS_TTL: u32 = 86400;
const HOSTS_EDNS_BUFFER: u16 = 4096;

/// Immutable snapshot of the parsed hosts file.
#[derive(Debug, Default)]
pub struct HostsTable {
    entries: HashMap<QuestionKey, Message>,
}

impl HostsTable {
    /// Parse the RFC-952-ish `IP NAME...` text format into a table.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let Some(ip_str) = fields.next() else {
                continue;
            };
            let Ok(ip) = ip_str.parse::<IpAddr>() else {
                warn!(line = %line, "skipping hosts line with unparseable address");
                continue;
            };

            for name in fields {
                let Some((key, msg)) = build_record(name, ip) else {
                    continue;
                };
                entries.insert(key, msg);
            }
        }
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> DnsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Look up a question key; returns a clone so callers can freely mutate
    /// the response (e.g. restoring the client's original query ID).
    pub fn query(&self, key: &str) -> Option<Message> {
        self.entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_record(name: &str, ip: IpAddr) -> Option<(QuestionKey, Message)> {
    let mut fqdn = name.to_string();
    if !fqdn.ends_with('.') {
        fqdn.push('.');
    }
    let owner = Name::from_utf8(&fqdn).ok()?;

    let (rtype, rdata) = match ip {
        IpAddr::V4(v4) => (RecordType::A, RData::A(A::from(v4))),
        IpAddr::V6(v6) => (RecordType::AAAA, RData::AAAA(AAAA::from(v6))),
    };

    let mut msg = Message::new();
    msg.set_message_type(MessageType::Response);
    msg.add_query(Query::query(owner.clone(), rtype));
    msg.add_answer(Record::from_rdata(owner, HOSTS_TTL, rdata));
    msg.set_edns(default_edns());

    let key = question_key::from_parts(&msg.queries()[0].name().clone(), DNSClass::IN, rtype);
    Some((key, msg))
}

fn default_edns() -> hickory_proto::op::Edns {
    let mut edns = hickory_proto::op::Edns::new();
    edns.set_max_payload(HOSTS_EDNS_BUFFER);
    edns
}

/// Shared, atomically-swappable handle to the current hosts table.
///
/// `None` (the `Shared::empty()` variant) means no hosts file is configured;
/// every lookup then simply misses.
#[derive(Clone)]
pub struct Shared(Arc<ArcSwap<HostsTable>>);

impl Shared {
    pub fn empty() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(HostsTable::default())))
    }

    pub fn new(table: HostsTable) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(table)))
    }

    pub fn query(&self, key: &str) -> Option<Message> {
        self.0.load().query(key)
    }

    fn store(&self, table: HostsTable) {
        self.0.store(Arc::new(table));
    }
}

/// Load `path` once and spawn a background task that reloads and atomically
/// replaces the table whenever the file's contents change.
///
/// On removal of the watched path the watcher re-arms itself against the new
/// inode created by the next write, matching editors that replace files
/// atomically (write-new, rename-over) rather than editing in place.
pub fn watch(path: impl Into<PathBuf>) -> DnsResult<Shared> {
    let path = path.into();
    let table = HostsTable::load(&path)?;
    info!(path = %path.display(), entries = table.len(), "loaded hosts file");
    let shared = Shared::new(table);

    let watch_shared = shared.clone();
    let watch_path = path.clone();
    std::thread::spawn(move || watch_loop(watch_path, watch_shared));

    Ok(shared)
}

fn watch_loop(path: PathBuf, shared: Shared) {
    loop {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = match notify::recommended_watcher(tx) {
            Ok(w) => w,
            Err(err) => {
                warn!(%err, "could not create hosts file watcher");
                return;
            }
        };
        if let Err(err) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            warn!(%err, path = %path.display(), "could not watch hosts file");
            return;
        }

        for event in rx {
            let Ok(event) = event else { continue };
            match event.kind {
                EventKind::Modify(_) | EventKind::Create(_) => match HostsTable::load(&path) {
                    Ok(table) => {
                        debug!(path = %path.display(), entries = table.len(), "reloaded hosts file");
                        shared.store(table);
                    }
                    Err(err) => warn!(%err, path = %path.display(), "could not reload hosts file"),
                },
                EventKind::Remove(_) => {
                    // the watch on the old inode is now dead; drop it and
                    // re-arm against whatever replaces the path next.
                    break;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_and_ipv6_with_multiple_names() {
        let table = HostsTable::parse(
            "# comment\n127.0.0.1   localhost  loopback\n::1 ip6-localhost\n",
        );
        assert_eq!(table.len(), 3);
        let key = question_key::from_parts(
            &Name::from_utf8("localhost.").unwrap(),
            DNSClass::IN,
            RecordType::A,
        );
        let msg = table.query(&key).expect("localhost entry present");
        assert_eq!(msg.answers()[0].ttl(), HOSTS_TTL);
    }

    #[test]
    fn collapses_whitespace_and_adds_trailing_dot() {
        let table = HostsTable::parse("10.0.0.1    host\t\twith-tabs\n");
        let key = question_key::from_parts(
            &Name::from_utf8("with-tabs.").unwrap(),
            DNSClass::IN,
            RecordType::A,
        );
        assert!(table.query(&key).is_some());
    }

    #[test]
    fn ignores_unparseable_lines() {
        let table = HostsTable::parse("not-an-ip somehost\n");
        assert!(table.is_empty());
    }

    #[test]
    fn watch_reloads_on_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 initial\n").unwrap();

        let shared = watch(&path).unwrap();
        let initial_key = question_key::from_parts(
            &Name::from_utf8("initial.").unwrap(),
            DNSClass::IN,
            RecordType::A,
        );
        assert!(shared.query(&initial_key).is_some());

        std::fs::write(&path, "127.0.0.2 updated\n").unwrap();

        let updated_key = question_key::from_parts(
            &Name::from_utf8("updated.").unwrap(),
            DNSClass::IN,
            RecordType::A,
        );
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if shared.query(&updated_key).is_some() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        panic!("hosts table was not reloaded after modification");
    }
}
