//! Ingestion classifier.
//!
//! Turns a raw log message into a typed [`Ingest`] event for the governed account, or drops it.
//! Dropping is not an error: the log carries plenty of traffic that is simply not ours.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::msg::{is_moot, moot_id, AccountId, Msg, MsgId};

/// Domain prefix marking a message as belonging to a dict.
pub const DOMAIN_PREFIX: &str = "dict_v1__";

pub fn to_domain(subdomain: &str) -> String {
    format!("{DOMAIN_PREFIX}{subdomain}")
}

pub fn to_subdomain(domain: &str) -> Option<&str> {
    domain.strip_prefix(DOMAIN_PREFIX)
}

/// Payload of a dict update message.
#[derive(Debug, Clone, PartialEq)]
pub struct DictUpdate {
    /// Fields written by this message.
    pub update: Map<String, Value>,
    /// Field-root message IDs this message replaces.
    pub supersedes: Vec<MsgId>,
}

impl DictUpdate {
    /// Parses `{ "update": {..}, "supersedes": [..] }`.
    ///
    /// `update` must be a non-empty object and every `supersedes` entry a message ID.
    pub fn parse(data: &Value) -> Option<Self> {
        let update = data.get("update")?.as_object()?;
        if update.is_empty() {
            return None;
        }
        let supersedes = data
            .get("supersedes")?
            .as_array()?
            .iter()
            .map(|v| v.as_str()?.parse().ok())
            .collect::<Option<Vec<MsgId>>>()?;

        Some(Self {
            update: update.clone(),
            supersedes,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "update": self.update,
            "supersedes": self.supersedes,
        })
    }

    /// Parses the payload of any message, regardless of owner.
    pub fn from_msg(msg: &Msg) -> Option<Self> {
        msg.data.as_ref().and_then(Self::parse)
    }
}

/// A message the engine should learn from.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    Moot {
        subdomain: String,
    },
    Update {
        subdomain: String,
        root: MsgId,
        prev: BTreeSet<MsgId>,
        payload: DictUpdate,
    },
}

impl Ingest {
    pub fn subdomain(&self) -> &str {
        match self {
            Ingest::Moot { subdomain } | Ingest::Update { subdomain, .. } => subdomain,
        }
    }
}

/// Classifies `msg` for the governed `account`. `None` means "not ours or malformed".
pub fn classify(account: &AccountId, msg: &Msg) -> Option<Ingest> {
    if msg.account != *account {
        return None;
    }
    let subdomain = to_subdomain(&msg.domain)?.to_string();

    match &msg.tangle {
        None => {
            if !is_moot(msg, account, &msg.domain) {
                return None;
            }
            Some(Ingest::Moot { subdomain })
        }
        Some(link) => {
            if link.root != moot_id(account, &msg.domain) {
                return None;
            }
            let payload = DictUpdate::from_msg(msg)?;
            Some(Ingest::Update {
                subdomain,
                root: link.root,
                prev: link.prev.clone(),
                payload,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountId {
        MsgId::digest(b"alice")
    }

    fn update(data: Value) -> Msg {
        let root = moot_id(&alice(), "dict_v1__profile");
        Msg::update_on(alice(), "dict_v1__profile", [root].into_iter().collect(), data)
    }

    #[test]
    fn moot_is_classified() {
        let moot = Msg::moot(alice(), "dict_v1__profile");
        assert_eq!(
            classify(&alice(), &moot),
            Some(Ingest::Moot {
                subdomain: "profile".to_string()
            })
        );
    }

    #[test]
    fn foreign_and_unprefixed_messages_are_ignored() {
        let bob = MsgId::digest(b"bob");
        assert_eq!(classify(&bob, &Msg::moot(alice(), "dict_v1__profile")), None);
        assert_eq!(classify(&alice(), &Msg::moot(alice(), "feed_v1__profile")), None);
    }

    #[test]
    fn well_formed_update_is_parsed() {
        let superseded = MsgId::digest(b"old");
        let msg = update(json!({
            "update": { "name": "alice" },
            "supersedes": [superseded.to_string()],
        }));

        match classify(&alice(), &msg) {
            Some(Ingest::Update {
                subdomain, payload, ..
            }) => {
                assert_eq!(subdomain, "profile");
                assert_eq!(payload.update["name"], json!("alice"));
                assert_eq!(payload.supersedes, vec![superseded]);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn malformed_updates_are_ignored() {
        for data in [
            json!({ "update": ["name"], "supersedes": [] }),
            json!({ "update": {}, "supersedes": [] }),
            json!({ "update": { "name": "x" } }),
            json!({ "update": { "name": "x" }, "supersedes": {} }),
            json!({ "update": { "name": "x" }, "supersedes": ["not-an-id"] }),
            json!("garbage"),
        ] {
            assert_eq!(classify(&alice(), &update(data.clone())), None, "{data}");
        }
    }

    #[test]
    fn payload_roundtrips_through_json() {
        let payload = DictUpdate {
            update: json!({ "age": 20 }).as_object().cloned().unwrap_or_default(),
            supersedes: vec![MsgId::digest(b"r")],
        };
        assert_eq!(DictUpdate::parse(&payload.to_value()), Some(payload));
    }
}
