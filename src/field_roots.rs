//! Field-root tracker.
//!
//! For every `(subdomain, field)` we keep the frontier of update messages that wrote the field and
//! have not been causally superseded by a later write to it. One root means the field is settled;
//! several mean concurrent writers that nobody has merged yet.

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use tracing::warn;

use crate::msg::MsgId;
use crate::tangle::Tangle;

#[derive(Debug, Default)]
pub struct FieldRoots {
    map: DashMap<String, BTreeMap<String, BTreeSet<MsgId>>>,
}

impl FieldRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subdomain: &str, field: &str) -> Option<BTreeSet<MsgId>> {
        self.map
            .get(subdomain)
            .and_then(|fields| fields.value().get(field).cloned())
    }

    /// All fields of a subdomain with their roots.
    pub fn all(&self, subdomain: &str) -> BTreeMap<String, BTreeSet<MsgId>> {
        self.map
            .get(subdomain)
            .map(|fields| fields.value().clone())
            .unwrap_or_default()
    }

    /// Records that message `id` wrote each of `fields`.
    ///
    /// An existing root is replaced when it causally precedes `id`; otherwise both stay, since
    /// they are concurrent writes to the same field.
    pub fn learn<'a>(
        &self,
        subdomain: &str,
        id: MsgId,
        fields: impl IntoIterator<Item = &'a str>,
        tangle: &Tangle,
    ) {
        let mut entry = self.map.entry(subdomain.to_string()).or_default();
        for field in fields {
            let roots = entry.value_mut().entry(field.to_string()).or_default();
            roots.retain(|existing| {
                // Causal delivery makes this unreachable.
                let out_of_order = tangle.precedes(&id, existing);
                debug_assert!(
                    !out_of_order,
                    "{id:?} learned after its successor {existing:?}"
                );
                if out_of_order {
                    warn!(
                        msg = %id.short(),
                        root = %existing.short(),
                        field,
                        "update arrived after a causally later root"
                    );
                }
                !tangle.precedes(existing, &id)
            });
            roots.insert(id);
        }
    }

    /// Deduplicated union of the roots of `fields`, in field order.
    pub fn supersedes_for<'a>(
        &self,
        subdomain: &str,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Vec<MsgId> {
        let Some(entry) = self.map.get(subdomain) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for field in fields {
            for root in entry.value().get(field).into_iter().flatten() {
                if seen.insert(*root) {
                    out.push(*root);
                }
            }
        }
        out
    }

    /// Every root of every field of a subdomain, deduplicated.
    pub fn distinct_roots(&self, subdomain: &str) -> BTreeSet<MsgId> {
        self.map
            .get(subdomain)
            .map(|fields| fields.value().values().flatten().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(label: &str) -> MsgId {
        MsgId::digest(label.as_bytes())
    }

    fn chain(labels: &[&str]) -> (Tangle, Vec<MsgId>) {
        let root = id("moot");
        let mut tangle = Tangle::new(root);
        tangle.add(root, &BTreeSet::new()).expect("moot");
        let mut ids = Vec::new();
        let mut prev = root;
        for label in labels {
            let next = id(label);
            tangle
                .add(next, &[prev].into_iter().collect())
                .expect("chain link");
            ids.push(next);
            prev = next;
        }
        (tangle, ids)
    }

    #[test]
    fn later_write_replaces_earlier_root() {
        let (tangle, ids) = chain(&["a", "b", "c"]);
        let roots = FieldRoots::new();

        roots.learn("profile", ids[0], ["name"], &tangle);
        roots.learn("profile", ids[1], ["age"], &tangle);
        roots.learn("profile", ids[2], ["name"], &tangle);

        assert_eq!(roots.get("profile", "name"), Some([ids[2]].into()));
        assert_eq!(roots.get("profile", "age"), Some([ids[1]].into()));
        assert_eq!(roots.distinct_roots("profile"), [ids[1], ids[2]].into());
    }

    #[test]
    fn concurrent_writes_accumulate() {
        let (mut tangle, ids) = chain(&["a"]);
        let branch = id("branch");
        let root = tangle.root();
        tangle
            .add(branch, &[root].into_iter().collect())
            .expect("branch");
        let roots = FieldRoots::new();

        roots.learn("profile", ids[0], ["age"], &tangle);
        roots.learn("profile", branch, ["age"], &tangle);

        assert_eq!(roots.get("profile", "age"), Some([ids[0], branch].into()));
        assert_eq!(
            roots.supersedes_for("profile", ["age", "age"]).len(),
            2,
            "supersedes is deduplicated"
        );
    }

    #[test]
    fn subdomains_are_independent() {
        let (tangle, ids) = chain(&["a"]);
        let roots = FieldRoots::new();
        roots.learn("profile", ids[0], ["name"], &tangle);

        assert!(roots.all("settings").is_empty());
        assert_eq!(roots.get("settings", "name"), None);
        assert_eq!(roots.supersedes_for("settings", ["name"]), Vec::<MsgId>::new());
    }

    /// moot <- a, moot <- branch, {a, branch} <- join.
    fn diamond() -> (Tangle, [MsgId; 3]) {
        let (mut tangle, ids) = chain(&["a"]);
        let (a, branch, join) = (ids[0], id("branch"), id("join"));
        let root = tangle.root();
        tangle
            .add(branch, &[root].into_iter().collect())
            .expect("branch");
        tangle
            .add(join, &[a, branch].into_iter().collect())
            .expect("join");
        (tangle, [a, branch, join])
    }

    #[test]
    fn concurrent_roots_do_not_depend_on_arrival_order() {
        let (tangle, [a, branch, _]) = diamond();
        let forward = FieldRoots::new();
        forward.learn("profile", a, ["age"], &tangle);
        forward.learn("profile", branch, ["age"], &tangle);
        let backward = FieldRoots::new();
        backward.learn("profile", branch, ["age"], &tangle);
        backward.learn("profile", a, ["age"], &tangle);

        assert_eq!(forward.all("profile"), backward.all("profile"));
        assert_eq!(forward.get("profile", "age"), Some([a, branch].into()));
    }

    #[test]
    fn join_collapses_concurrent_roots() {
        let (tangle, [a, branch, join]) = diamond();
        let roots = FieldRoots::new();
        roots.learn("profile", a, ["age", "name"], &tangle);
        roots.learn("profile", branch, ["age"], &tangle);
        roots.learn("profile", join, ["age"], &tangle);

        assert_eq!(roots.get("profile", "age"), Some([join].into()));
        assert_eq!(roots.get("profile", "name"), Some([a].into()));
        assert_eq!(roots.distinct_roots("profile"), [a, join].into());
    }
}
