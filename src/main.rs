//! Dict demo entrypoint.
//!
//! Runs one peer against an in-memory log: writes a profile field by field, shows the field roots
//! piling up, squeezes them into one message, then injects an out-of-band branch the way a
//! lagging replica would and reports how ghost eligibility and squeeze potential react.
//!
//! Usage: `tangle-dict [ghost-span]` (falls back to `TANGLE_DICT_GHOST_SPAN`, then 32).

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tangle_dict::classify::to_domain;
use tangle_dict::{Dict, DictConfig, MemoryStore, Msg, MsgId, MsgStore, Record};

fn fields(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = DictConfig::from_env();
    if let Some(span) = env::args().nth(1) {
        config.ghost_span = span.parse().context("ghost span must be an integer")?;
    }

    let store = Arc::new(MemoryStore::new());
    let dict = Dict::new(store.clone(), config)?;
    let alice = MsgId::digest(b"alice");
    dict.load(alice).await?;

    dict.update("profile", fields(json!({ "name": "alice" }))).await?;
    dict.update("profile", fields(json!({ "age": 20 }))).await?;
    let redundant = dict.update("profile", fields(json!({ "name": "alice" }))).await?;
    info!(redundant, "rewrote an unchanged field");
    for age in 21..=23 {
        dict.update("profile", fields(json!({ "age": age }))).await?;
    }

    info!(
        record = %json!(dict.read(&alice, "profile")),
        potential = dict.squeeze_potential("profile")?,
        "before squeeze"
    );
    let squeezed = dict.squeeze("profile").await?;
    info!(squeezed, roots = ?dict.field_roots("profile"), "after squeeze");

    let feed = dict.feed_id("profile")?;
    let tangle = store.tangle(&feed).context("profile tangle missing")?;
    for id in tangle.topo_sort() {
        info!(
            msg = %id.short(),
            depth = tangle.depth(&id).unwrap_or_default(),
            ghostable = dict.is_ghostable(&id, &feed)?,
            "ghost check"
        );
    }

    // A replica that only ever saw the moot writes concurrently.
    let branch = Msg::update_on(
        alice,
        to_domain("profile"),
        [feed].into_iter().collect(),
        json!({ "update": { "age": 2 }, "supersedes": [] }),
    );
    let branch_id = store.add(branch)?;
    dict.learned("profile", &branch_id).await?;

    info!(
        record = %json!(dict.read(&alice, "profile")),
        roots = ?dict.field_roots("profile"),
        min_required_depth = dict.min_required_depth(&feed)?,
        potential = dict.squeeze_potential("profile")?,
        "after out-of-band branch"
    );

    dict.close();
    Ok(())
}
