//! The message log the dict engine sits on.
//!
//! The engine never persists anything itself. It consumes a [`MsgStore`]: something that can
//! enumerate stored messages, stream newly added ones in causal order, hand out tangles, and
//! append new messages under the local identity.
//!
//! [`MemoryStore`] is a complete in-process implementation used by the demo binary and the tests.
//! It has no signing or persistence; those belong to a real log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;
use crate::msg::{AccountId, Msg, MsgId};
use crate::tangle::Tangle;

pub trait MsgStore: Send + Sync + 'static {
    /// Every stored message, in the order it was appended.
    fn msgs(&self) -> Vec<(MsgId, Msg)>;

    /// Stream of messages appended after this call, in causal order.
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<(MsgId, Msg)>;

    fn get(&self, id: &MsgId) -> Option<Msg>;

    /// Snapshot of the tangle rooted at `root`, if any message of it is stored.
    fn tangle(&self, root: &MsgId) -> Option<Arc<Tangle>>;

    /// Appends a new message on the current tips of the `(account, domain)` tangle, creating the
    /// moot first if needed. Resolves once the message is durably stored.
    fn publish(
        &self,
        account: AccountId,
        domain: String,
        data: Value,
    ) -> BoxFuture<'_, Result<(MsgId, Msg), StoreError>>;
}

#[derive(Default)]
struct StoreInner {
    order: Vec<MsgId>,
    by_id: HashMap<MsgId, Msg>,
    tangles: HashMap<MsgId, Arc<Tangle>>,
    subscribers: Vec<mpsc::UnboundedSender<(MsgId, Msg)>>,
    closed: bool,
}

/// In-memory [`MsgStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores an already-built message, e.g. one received from another peer.
    ///
    /// Adding a message that is already stored is a no-op and does not notify subscribers.
    pub fn add(&self, msg: Msg) -> Result<MsgId, StoreError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        Self::append(&mut inner, msg)
    }

    /// Stops accepting messages and ends every subscription stream.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    fn append(inner: &mut StoreInner, msg: Msg) -> Result<MsgId, StoreError> {
        let id = msg.id();
        if inner.by_id.contains_key(&id) {
            return Ok(id);
        }

        let root = msg.tangle_root(&id);
        let mut tangle = inner
            .tangles
            .remove(&root)
            .unwrap_or_else(|| Arc::new(Tangle::new(root)));
        let added = Arc::make_mut(&mut tangle).add_msg(id, &msg);
        if !tangle.is_empty() {
            inner.tangles.insert(root, tangle);
        }
        added?;

        debug!(msg = %id.short(), domain = %msg.domain, "stored message");
        inner.order.push(id);
        inner.by_id.insert(id, msg.clone());
        inner
            .subscribers
            .retain(|tx| tx.send((id, msg.clone())).is_ok());

        Ok(id)
    }

    fn append_update(
        &self,
        account: AccountId,
        domain: &str,
        data: Value,
    ) -> Result<(MsgId, Msg), StoreError> {
        if domain.is_empty() {
            return Err(StoreError::Rejected("empty domain".to_string()));
        }

        let mut inner = self.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }

        let moot = Msg::moot(account, domain);
        let root = Self::append(&mut inner, moot)?;

        let prev = inner
            .tangles
            .get(&root)
            .map(|tangle| tangle.tips().clone())
            .unwrap_or_default();
        let msg = Msg::update_on(account, domain, prev, data);
        let id = Self::append(&mut inner, msg.clone())?;

        Ok((id, msg))
    }
}

impl MsgStore for MemoryStore {
    fn msgs(&self) -> Vec<(MsgId, Msg)> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).map(|msg| (*id, msg.clone())))
            .collect()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<(MsgId, Msg)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        rx
    }

    fn get(&self, id: &MsgId) -> Option<Msg> {
        self.lock().by_id.get(id).cloned()
    }

    fn tangle(&self, root: &MsgId) -> Option<Arc<Tangle>> {
        self.lock().tangles.get(root).cloned()
    }

    fn publish(
        &self,
        account: AccountId,
        domain: String,
        data: Value,
    ) -> BoxFuture<'_, Result<(MsgId, Msg), StoreError>> {
        async move { self.append_update(account, &domain, data) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::moot_id;
    use serde_json::json;

    #[tokio::test]
    async fn publish_creates_moot_lazily_and_chains_on_tips() {
        let store = MemoryStore::new();
        let alice = MsgId::digest(b"alice");
        let mut rx = store.subscribe();

        let (first, _) = store
            .publish(alice, "dict_v1__profile".into(), json!({ "n": 1 }))
            .await
            .expect("first publish");
        let (second, msg) = store
            .publish(alice, "dict_v1__profile".into(), json!({ "n": 2 }))
            .await
            .expect("second publish");

        let root = moot_id(&alice, "dict_v1__profile");
        assert_eq!(store.len(), 3);
        assert_eq!(msg.tangle.expect("link").prev.into_iter().collect::<Vec<_>>(), vec![first]);

        let tangle = store.tangle(&root).expect("tangle");
        assert_eq!(tangle.depth(&second), Some(2));

        let delivered: Vec<MsgId> = [
            rx.recv().await.expect("moot").0,
            rx.recv().await.expect("first").0,
            rx.recv().await.expect("second").0,
        ]
        .into();
        assert_eq!(delivered, vec![root, first, second]);
    }

    #[test]
    fn add_is_idempotent_and_checks_parents() {
        let store = MemoryStore::new();
        let alice = MsgId::digest(b"alice");
        let root = moot_id(&alice, "dict_v1__x");
        let orphan = Msg::update_on(alice, "dict_v1__x", [root].into_iter().collect(), json!({}));

        assert!(matches!(store.add(orphan.clone()), Err(StoreError::Tangle(_))));
        assert!(store.tangle(&orphan.tangle_root(&orphan.id())).is_none());

        store.add(Msg::moot(alice, "dict_v1__x")).expect("moot");
        store.add(Msg::moot(alice, "dict_v1__x")).expect("moot again");
        store.add(orphan).expect("now attached");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn closed_store_rejects_publish() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.close();

        let err = store
            .publish(MsgId::digest(b"alice"), "dict_v1__p".into(), json!({}))
            .await
            .expect_err("closed");
        assert!(matches!(err, StoreError::Closed));
        assert!(rx.recv().await.is_none());
    }
}
