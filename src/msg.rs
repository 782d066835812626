//! Immutable, content-addressed log messages.
//!
//! Every record lives in its own tangle: a DAG of messages rooted at a *moot*, the genesis message
//! for one `(account, domain)` pair. The moot carries no payload, so its ID is a pure function of
//! the pair and any peer can derive it without having seen it.
//!
//! Update messages point back into the tangle through [`TangleLink::prev`], the tangle tips the
//! author knew about when it wrote. Payloads are kept as untyped JSON here; interpreting them is
//! the ingestion classifier's job.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use blake3::Hasher;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// Content address of a [`Msg`]: a 32-byte BLAKE3 digest.
///
/// The derived `Ord` is the byte order of the digest, which is what every peer uses to break ties
/// between causally unordered messages.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgId([u8; 32]);

/// Accounts are identified the same way messages are.
pub type AccountId = MsgId;

impl MsgId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hashes arbitrary bytes into an ID. Handy for deriving account IDs from seeds.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(blake3::Hash::from(self.0).to_hex().as_str())
    }
}

impl fmt::Debug for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgId({})", self.short())
    }
}

impl FromStr for MsgId {
    type Err = blake3::HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s).map(|h| Self(*h.as_bytes()))
    }
}

impl Serialize for MsgId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MsgId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Position of a non-root message inside its tangle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TangleLink {
    /// ID of the tangle's moot.
    pub root: MsgId,
    /// Direct causal predecessors (the tips the author saw).
    pub prev: BTreeSet<MsgId>,
}

/// A log message as stored by the log, before any domain-specific interpretation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Msg {
    pub account: AccountId,
    pub domain: String,
    /// `None` for moots.
    pub tangle: Option<TangleLink>,
    /// Application payload. `None` for moots.
    pub data: Option<Value>,
    /// Random salt so two identical payloads on the same tips still get distinct IDs. Nil for moots.
    pub nonce: Uuid,
}

impl Msg {
    /// Builds the moot for `(account, domain)`.
    pub fn moot(account: AccountId, domain: impl Into<String>) -> Self {
        Self {
            account,
            domain: domain.into(),
            tangle: None,
            data: None,
            nonce: Uuid::nil(),
        }
    }

    /// Builds an update in the `(account, domain)` tangle on top of `prev`.
    pub fn update_on(
        account: AccountId,
        domain: impl Into<String>,
        prev: BTreeSet<MsgId>,
        data: Value,
    ) -> Self {
        let domain = domain.into();
        let root = moot_id(&account, &domain);
        Self {
            account,
            domain,
            tangle: Some(TangleLink { root, prev }),
            data: Some(data),
            nonce: Uuid::new_v4(),
        }
    }

    /// Computes this message's content address.
    pub fn id(&self) -> MsgId {
        let mut hasher = Hasher::new();

        hasher.update(self.account.as_bytes());
        hasher.update(&(self.domain.len() as u64).to_le_bytes());
        hasher.update(self.domain.as_bytes());

        match &self.tangle {
            Some(link) => {
                hasher.update(&[1]);
                hasher.update(link.root.as_bytes());
                hasher.update(&(link.prev.len() as u64).to_le_bytes());
                for prev in &link.prev {
                    hasher.update(prev.as_bytes());
                }
            }
            None => {
                hasher.update(&[0]);
            }
        }

        hasher.update(self.nonce.as_bytes());

        // serde_json maps are ordered, so the rendering is canonical.
        if let Some(data) = &self.data {
            hasher.update(data.to_string().as_bytes());
        }

        MsgId(*hasher.finalize().as_bytes())
    }

    /// The tangle this message belongs to: its own ID for a moot, otherwise the linked root.
    pub fn tangle_root(&self, own_id: &MsgId) -> MsgId {
        match &self.tangle {
            Some(link) => link.root,
            None => *own_id,
        }
    }
}

/// Canonical moot ID for `(account, domain)`.
pub fn moot_id(account: &AccountId, domain: &str) -> MsgId {
    Msg::moot(*account, domain).id()
}

/// Whether `msg` is exactly the moot of `(account, domain)`.
pub fn is_moot(msg: &Msg, account: &AccountId, domain: &str) -> bool {
    msg.tangle.is_none()
        && msg.data.is_none()
        && msg.nonce.is_nil()
        && msg.account == *account
        && msg.domain == domain
}
