//! The dict engine.
//!
//! `Dict` governs every dict of one local account. It learns from the message log through the
//! classifier, keeps a per-subdomain tangle index and field-root tracker, and turns user writes
//! into update messages that it hands back to the log.
//!
//! State changes only through ingestion. A write publishes a message and then waits until that
//! same message has come back through the subscription and been learned, so nothing is ever
//! applied speculatively.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{classify, to_domain, to_subdomain, DictUpdate, Ingest};
use crate::config::{validate_ghost_span, DictConfig};
use crate::error::{DictError, TangleError};
use crate::field_roots::FieldRoots;
use crate::ghost;
use crate::merge::{fold_record, has_changes, Record};
use crate::msg::{is_moot, moot_id, AccountId, Msg, MsgId};
use crate::store::MsgStore;
use crate::tangle::Tangle;

/// Mutable engine state, written only by ingestion.
struct DictState {
    tangles: DashMap<String, Tangle>,
    /// Moot ID of every governed dict tangle, mapped to its subdomain.
    roots: DashMap<MsgId, String>,
    field_roots: FieldRoots,
    /// Messages of governed tangles that could not be attached.
    detached: DashMap<MsgId, TangleError>,
    /// Bumped after every message ingestion has settled.
    ingested: watch::Sender<u64>,
    closed: AtomicBool,
}

impl DictState {
    fn new() -> Self {
        let (ingested, _) = watch::channel(0);
        Self {
            tangles: DashMap::new(),
            roots: DashMap::new(),
            field_roots: FieldRoots::new(),
            detached: DashMap::new(),
            ingested,
            closed: AtomicBool::new(false),
        }
    }

    fn knows(&self, subdomain: &str, id: &MsgId) -> bool {
        self.tangles
            .get(subdomain)
            .is_some_and(|tangle| tangle.contains(id))
    }

    /// Subdomain of the governed tangle `msg` links into, if any.
    fn governing(&self, msg: &Msg) -> Option<String> {
        let link = msg.tangle.as_ref()?;
        self.roots.get(&link.root).map(|entry| entry.value().clone())
    }

    /// Mirrors one message into the tangle index when it belongs to one of `account`'s dicts.
    ///
    /// Every message linked into a governed tangle is attached, valid or not, so the index keeps
    /// the same shape as the log's tangle. Only valid updates feed the field-root tracker.
    fn ingest(&self, account: &AccountId, id: MsgId, msg: &Msg) {
        let event = classify(account, msg);
        let subdomain = match &event {
            Some(event) => event.subdomain().to_string(),
            None => match self.governing(msg) {
                Some(subdomain) => subdomain,
                None => {
                    debug!(msg = %id.short(), domain = %msg.domain, "ignoring message");
                    return;
                }
            },
        };

        let root = msg.tangle_root(&id);
        if let Some(Ingest::Moot { .. }) = &event {
            self.roots.insert(root, subdomain.clone());
        }
        let mut tangle = self
            .tangles
            .entry(subdomain.clone())
            .or_insert_with(|| Tangle::new(root));

        match tangle.add_msg(id, msg) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                drop(tangle);
                warn!(msg = %id.short(), %subdomain, %err, "cannot attach message to tangle");
                self.detached.insert(id, err);
                self.ingested.send_modify(|count| *count += 1);
                return;
            }
        }

        match &event {
            Some(Ingest::Update { payload, .. }) => {
                self.field_roots.learn(
                    &subdomain,
                    id,
                    payload.update.keys().map(String::as_str),
                    &tangle,
                );
                debug!(msg = %id.short(), %subdomain, "learned update");
            }
            Some(Ingest::Moot { .. }) => debug!(msg = %id.short(), %subdomain, "learned moot"),
            None => debug!(msg = %id.short(), %subdomain, "attached non-dict message"),
        }
        drop(tangle);

        self.ingested.send_modify(|count| *count += 1);
    }
}

pub struct Dict<S: MsgStore> {
    store: Arc<S>,
    state: Arc<DictState>,
    ghost_span: AtomicU64,
    account: OnceLock<AccountId>,
    loaded: watch::Sender<bool>,
    ingest_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: MsgStore> Dict<S> {
    pub fn new(store: Arc<S>, config: DictConfig) -> Result<Self, DictError> {
        config.validate()?;
        let (loaded, _) = watch::channel(false);
        Ok(Self {
            store,
            state: Arc::new(DictState::new()),
            ghost_span: AtomicU64::new(config.ghost_span),
            account: OnceLock::new(),
            loaded,
            ingest_task: Mutex::new(None),
        })
    }

    /// Binds the engine to `account`, learns every stored message and follows new ones.
    ///
    /// Loading twice with the same account just waits for the first load.
    pub async fn load(&self, account: AccountId) -> Result<(), DictError> {
        if let Err(account) = self.account.set(account) {
            return match self.account.get() {
                Some(bound) if *bound == account => self.loaded().await,
                Some(bound) => Err(DictError::AlreadyLoaded(*bound)),
                None => Err(DictError::NotLoaded),
            };
        }

        // Subscribe before replaying so nothing slips between the two; ingestion skips duplicates.
        let mut rx = self.store.subscribe();
        let existing = self.store.msgs();
        let replayed = existing.len();
        for (id, msg) in existing {
            self.state.ingest(&account, id, &msg);
        }

        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            while let Some((id, msg)) = rx.recv().await {
                state.ingest(&account, id, &msg);
            }
            debug!("message stream ended");
        });
        *self
            .ingest_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        self.loaded.send_replace(true);
        info!(account = %account.short(), replayed, "dict loaded");
        Ok(())
    }

    /// Resolves once `load` has finished.
    pub async fn loaded(&self) -> Result<(), DictError> {
        if self.account.get().is_none() {
            return Err(DictError::NotLoaded);
        }
        let mut rx = self.loaded.subscribe();
        rx.wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|_| DictError::Closed)
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account.get().copied()
    }

    /// Stops following the log. Pending writes fail with [`DictError::Closed`].
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self
            .ingest_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.state.ingested.send_modify(|_| {});
    }

    fn bound_account(&self) -> Result<AccountId, DictError> {
        self.account().ok_or(DictError::NotLoaded)
    }

    fn ensure_own(&self, account: &AccountId) -> Result<(), DictError> {
        if self.bound_account()? != *account {
            return Err(DictError::ForeignAccount(*account));
        }
        Ok(())
    }

    /// Current value of `account`'s dict `subdomain`.
    ///
    /// With nothing stored, the local account's dict is known to be empty, while a remote one is
    /// unknown (`None`).
    pub fn read(&self, account: &AccountId, subdomain: &str) -> Option<Record> {
        let root = moot_id(account, &to_domain(subdomain));
        match self.store.tangle(&root).filter(|tangle| !tangle.is_empty()) {
            Some(tangle) => Some(fold_record(&tangle, |id| self.store.get(id))),
            None => (self.account.get() == Some(account)).then(Record::new),
        }
    }

    /// Writes `changes` into the local account's dict. Returns `false` when nothing would change.
    pub async fn update(&self, subdomain: &str, changes: Record) -> Result<bool, DictError> {
        let account = self.bound_account()?;
        self.update_as(account, subdomain, changes).await
    }

    /// Like [`Dict::update`], but rejects any account other than the bound one.
    pub async fn update_as(
        &self,
        account: AccountId,
        subdomain: &str,
        changes: Record,
    ) -> Result<bool, DictError> {
        self.ensure_own(&account)?;
        self.loaded().await?;

        let record = self.read(&account, subdomain).unwrap_or_default();
        if !has_changes(&record, &changes) {
            debug!(%subdomain, "redundant update skipped");
            return Ok(false);
        }

        self.force_update(account, subdomain, changes).await?;
        Ok(true)
    }

    /// Collapses every field root of the local dict into one message.
    pub async fn squeeze(&self, subdomain: &str) -> Result<bool, DictError> {
        let account = self.bound_account()?;
        self.squeeze_as(account, subdomain).await
    }

    pub async fn squeeze_as(
        &self,
        account: AccountId,
        subdomain: &str,
    ) -> Result<bool, DictError> {
        self.ensure_own(&account)?;
        self.loaded().await?;

        let potential = self.squeeze_potential(subdomain)?;
        if potential < 1 {
            return Ok(false);
        }
        let record = self.read(&account, subdomain).unwrap_or_default();
        if record.is_empty() {
            return Ok(false);
        }

        let id = self
            .force_update(account, subdomain, record)
            .await
            .map_err(|err| match err {
                err @ DictError::Publish { .. } => {
                    DictError::publish("failed to force-update when squeezing", err)
                }
                other => other,
            })?;
        info!(%subdomain, potential, msg = %id.short(), "squeezed dict");
        Ok(true)
    }

    /// Publishes `changes` superseding every current root of the changed fields, then waits for
    /// the new message to be learned.
    async fn force_update(
        &self,
        account: AccountId,
        subdomain: &str,
        changes: Record,
    ) -> Result<MsgId, DictError> {
        let supersedes = self
            .state
            .field_roots
            .supersedes_for(subdomain, changes.keys().map(String::as_str));
        let payload = DictUpdate {
            update: changes,
            supersedes,
        };

        let (id, _) = self
            .store
            .publish(account, to_domain(subdomain), payload.to_value())
            .await
            .map_err(|err| DictError::publish("failed to create message when force-updating", err))?;
        info!(
            %subdomain,
            msg = %id.short(),
            superseded = payload.supersedes.len(),
            "published dict update"
        );

        self.learned(subdomain, &id).await?;
        Ok(id)
    }

    /// Resolves once message `id` of the local dict `subdomain` has been learned.
    ///
    /// `id` must already be in the log. Messages rooted elsewhere fail with
    /// [`DictError::NotInDict`] without waiting. Messages that reach the tangle but carry no valid
    /// update fail with [`DictError::Filtered`] once ingestion has attached them.
    pub async fn learned(&self, subdomain: &str, id: &MsgId) -> Result<(), DictError> {
        let account = self.bound_account()?;
        let msg = self.store.get(id).ok_or(DictError::MsgNotFound(*id))?;
        if msg.tangle_root(id) != moot_id(&account, &to_domain(subdomain)) {
            return Err(DictError::NotInDict {
                id: *id,
                subdomain: subdomain.to_string(),
            });
        }

        let state = &self.state;
        let mut rx = state.ingested.subscribe();
        rx.wait_for(|_| {
            state.closed.load(Ordering::SeqCst)
                || state.knows(subdomain, id)
                || state.detached.contains_key(id)
        })
        .await
        .map_err(|_| DictError::Closed)?;

        if let Some(err) = state.detached.get(id) {
            return Err(DictError::Detached {
                id: *id,
                source: err.value().clone(),
            });
        }
        if !state.knows(subdomain, id) {
            return Err(DictError::Closed);
        }
        if classify(&account, &msg).is_none() {
            return Err(DictError::Filtered(*id));
        }
        Ok(())
    }

    /// How many tangle levels separate the oldest field root from the newest message.
    pub fn squeeze_potential(&self, subdomain: &str) -> Result<u64, DictError> {
        let root = self.feed_id(subdomain)?;
        let Some(tangle) = self.store.tangle(&root) else {
            return Ok(0);
        };

        let mut min_depth: Option<u64> = None;
        for id in self.state.field_roots.distinct_roots(subdomain) {
            let depth = tangle.depth(&id).ok_or(DictError::MsgNotFound(id))?;
            min_depth = Some(min_depth.map_or(depth, |min| min.min(depth)));
        }
        Ok(min_depth.map_or(0, |min| tangle.max_depth().saturating_sub(min)))
    }

    /// Current field roots of the local dict `subdomain`.
    pub fn field_roots(&self, subdomain: &str) -> BTreeMap<String, BTreeSet<MsgId>> {
        self.state.field_roots.all(subdomain)
    }

    /// Moot ID of the local account's dict `subdomain`.
    pub fn feed_id(&self, subdomain: &str) -> Result<MsgId, DictError> {
        let account = self.bound_account()?;
        Ok(moot_id(&account, &to_domain(subdomain)))
    }

    pub fn ghost_span(&self) -> u64 {
        self.ghost_span.load(Ordering::Relaxed)
    }

    pub fn set_ghost_span(&self, span: u64) -> Result<(), DictError> {
        validate_ghost_span(span)?;
        self.ghost_span.store(span, Ordering::Relaxed);
        Ok(())
    }

    /// Fetches `tangle_id` and checks that it is rooted at a dict moot.
    fn dict_tangle(&self, tangle_id: &MsgId) -> Result<Arc<Tangle>, DictError> {
        let tangle = self
            .store
            .tangle(tangle_id)
            .ok_or(DictError::TangleNotFound(*tangle_id))?;
        let root = self
            .store
            .get(tangle_id)
            .ok_or(DictError::TangleNotFound(*tangle_id))?;
        if !is_moot(&root, &root.account, &root.domain) {
            return Err(DictError::InvalidTangle {
                id: *tangle_id,
                reason: "root is not a moot",
            });
        }
        if to_subdomain(&root.domain).is_none() {
            return Err(DictError::InvalidTangle {
                id: *tangle_id,
                reason: "root is not a dict moot",
            });
        }
        Ok(tangle)
    }

    /// Smallest depth among the field roots implied by the tangle's contents.
    pub fn min_required_depth(&self, tangle_id: &MsgId) -> Result<u64, DictError> {
        let tangle = self.dict_tangle(tangle_id)?;
        Ok(ghost::min_required_depth(&tangle, |id| self.store.get(id)))
    }

    pub fn min_ghost_depth(&self, tangle_id: &MsgId) -> Result<u64, DictError> {
        let required = self.min_required_depth(tangle_id)?;
        Ok(ghost::min_ghost_depth(required, self.ghost_span()))
    }

    /// Whether `msg_id` lies inside the ghost window of `tangle_id`. The moot never does.
    pub fn is_ghostable(&self, msg_id: &MsgId, tangle_id: &MsgId) -> Result<bool, DictError> {
        let tangle = self.dict_tangle(tangle_id)?;
        if msg_id == tangle_id {
            return Ok(false);
        }
        let depth = tangle
            .depth(msg_id)
            .ok_or(DictError::MsgNotFound(*msg_id))?;
        let required = ghost::min_required_depth(&tangle, |id| self.store.get(id));
        Ok(ghost::in_ghost_window(depth, required, self.ghost_span()))
    }
}

impl<S: MsgStore> Drop for Dict<S> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .ingest_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
