//! Replicated, field-level key/value records ("dicts") over a causal message tangle.
//!
//! Each dict is the tangle of one `(account, domain)` moot. Peers append immutable update messages
//! that carry changed fields plus the field roots they replace; the current value is the fold of all
//! updates in a deterministic topological order. Concurrent writes never conflict, they just leave
//! several roots for a field until a later write or a squeeze joins them.
//!
//! Module map:
//! - [`msg`] and [`tangle`]: content-addressed messages and their causal DAG.
//! - [`store`]: the log the engine reads from and publishes to.
//! - [`classify`], [`field_roots`], [`merge`], [`ghost`]: the merge engine's building blocks.
//! - [`dict`]: the [`Dict`] engine tying them together.

pub mod classify;
pub mod config;
pub mod dict;
pub mod error;
pub mod field_roots;
pub mod ghost;
pub mod merge;
pub mod msg;
pub mod store;
pub mod tangle;

pub use classify::DOMAIN_PREFIX;
pub use config::DictConfig;
pub use dict::Dict;
pub use error::{DictError, StoreError, TangleError};
pub use merge::Record;
pub use msg::{moot_id, AccountId, Msg, MsgId};
pub use store::{MemoryStore, MsgStore};
pub use tangle::Tangle;
