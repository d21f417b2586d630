//! Canonical textual form of a question, used as the lookup key for both
//! the hosts table and the answer cache.

use hickory_proto::op::Message;
use hickory_proto::rr::{DNSClass, Name, RecordType};

/// `<name>.\t<class>\t<type>`, name lower-cased per DNS's case-insensitivity.
///
/// The form is a plain `String` rather than a newtype so it can be used
/// directly as a `HashMap`/`DashMap` key without an extra `Hash`/`Eq` impl.
pub type QuestionKey = String;

/// Build the canonical key for the first question of `msg`.
///
/// Returns `None` if the message carries no question, mirroring the
/// resolver façade's "should have one question at least" rejection.
pub fn from_message(msg: &Message) -> Option<QuestionKey> {
    msg.queries().first().map(from_parts_ref)
}

fn from_parts_ref(q: &hickory_proto::op::Query) -> QuestionKey {
    from_parts(q.name(), q.query_class(), q.query_type())
}

/// Build the canonical key from explicit `(name, class, type)` parts.
pub fn from_parts(name: &Name, class: DNSClass, rtype: RecordType) -> QuestionKey {
    let mut lower = name.to_utf8();
    lower.make_ascii_lowercase();
    if !lower.ends_with('.') {
        lower.push('.');
    }
    format!("{lower}\t{class}\t{rtype}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use std::str::FromStr;

    fn query(name: &str, rtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
        msg
    }

    #[test]
    fn canonicalises_case_and_trailing_dot() {
        let a = from_message(&query("Example.COM", RecordType::A)).unwrap();
        let b = from_message(&query("example.com.", RecordType::A)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinguishes_type_and_class() {
        let a = from_message(&query("example.com", RecordType::A)).unwrap();
        let aaaa = from_message(&query("example.com", RecordType::AAAA)).unwrap();
        assert_ne!(a, aaaa);
    }

    #[test]
    fn no_question_yields_none() {
        let msg = Message::new();
        assert!(from_message(&msg).is_none());
    }
}
