//! Read/merge projection.
//!
//! A dict's value is never stored. It is the fold of every update's field map over the tangle's
//! deterministic topological order, later writes overwriting earlier ones. Concurrent branches are
//! settled purely by where that order puts them.

use serde_json::{Map, Value};

use crate::classify::DictUpdate;
use crate::msg::{Msg, MsgId};
use crate::tangle::Tangle;

/// Current field values of a dict.
pub type Record = Map<String, Value>;

/// Valid updates in `tangle`, in topological order, written by the account owning its moot.
///
/// Messages by other accounts can be linked into the tangle but never count as updates.
pub(crate) fn owner_updates<F>(
    tangle: &Tangle,
    mut lookup: F,
) -> impl Iterator<Item = (MsgId, DictUpdate)>
where
    F: FnMut(&MsgId) -> Option<Msg>,
{
    let owner = lookup(&tangle.root()).map(|moot| moot.account);
    tangle.topo_sort().into_iter().filter_map(move |id| {
        let msg = lookup(&id)?;
        if Some(msg.account) != owner {
            return None;
        }
        DictUpdate::from_msg(&msg).map(|payload| (id, payload))
    })
}

/// Folds every valid update in `tangle` into one record.
///
/// `lookup` resolves message IDs to stored messages; IDs it cannot resolve are skipped.
pub fn fold_record(tangle: &Tangle, lookup: impl FnMut(&MsgId) -> Option<Msg>) -> Record {
    let mut record = Record::new();
    for (_, payload) in owner_updates(tangle, lookup) {
        for (field, value) in payload.update {
            record.insert(field, value);
        }
    }
    record
}

/// Whether applying `changes` on top of `record` would change any field.
pub fn has_changes(record: &Record, changes: &Record) -> bool {
    changes
        .iter()
        .any(|(field, value)| record.get(field) != Some(value))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use serde_json::json;

    use super::*;
    use crate::msg::moot_id;

    struct Fixture {
        tangle: Tangle,
        msgs: HashMap<MsgId, Msg>,
    }

    impl Fixture {
        fn new() -> Self {
            let account = MsgId::digest(b"alice");
            let moot = Msg::moot(account, "dict_v1__profile");
            let root = moot_id(&account, "dict_v1__profile");
            let mut tangle = Tangle::new(root);
            tangle.add_msg(root, &moot).expect("moot");
            Self {
                tangle,
                msgs: HashMap::from([(root, moot)]),
            }
        }

        fn write(&mut self, prev: &[MsgId], update: Value) -> MsgId {
            let prev: BTreeSet<MsgId> = prev.iter().copied().collect();
            let msg = Msg::update_on(
                MsgId::digest(b"alice"),
                "dict_v1__profile",
                prev,
                json!({ "update": update, "supersedes": [] }),
            );
            let id = msg.id();
            self.tangle.add_msg(id, &msg).expect("attach");
            self.msgs.insert(id, msg);
            id
        }

        fn attach(&mut self, msg: Msg) -> MsgId {
            let id = msg.id();
            self.tangle.add_msg(id, &msg).expect("attach");
            self.msgs.insert(id, msg);
            id
        }

        fn fold(&self) -> Record {
            fold_record(&self.tangle, |id| self.msgs.get(id).cloned())
        }
    }

    #[test]
    fn later_writes_win() {
        let mut fx = Fixture::new();
        let root = fx.tangle.root();
        let a = fx.write(&[root], json!({ "name": "alice" }));
        let b = fx.write(&[a], json!({ "age": 20 }));
        fx.write(&[b], json!({ "name": "Alice" }));

        assert_eq!(Value::Object(fx.fold()), json!({ "name": "Alice", "age": 20 }));
    }

    #[test]
    fn concurrent_writes_resolve_by_topological_position() {
        let mut fx = Fixture::new();
        let root = fx.tangle.root();
        let left = fx.write(&[root], json!({ "color": "red" }));
        let right = fx.write(&[root], json!({ "color": "blue" }));

        let expected = if left > right { "red" } else { "blue" };
        assert_eq!(fx.fold()["color"], json!(expected));
    }

    #[test]
    fn foreign_and_malformed_messages_do_not_fold() {
        let mut fx = Fixture::new();
        let root = fx.tangle.root();
        let a = fx.write(&[root], json!({ "name": "alice" }));

        let mut foreign = Msg::update_on(
            MsgId::digest(b"mallory"),
            "dict_v1__profile",
            [a].into_iter().collect(),
            json!({ "update": { "name": "mallory" }, "supersedes": [] }),
        );
        if let Some(link) = foreign.tangle.as_mut() {
            link.root = root;
        }
        let foreign = fx.attach(foreign);
        let junk = fx.attach(Msg::update_on(
            MsgId::digest(b"alice"),
            "dict_v1__profile",
            [foreign].into_iter().collect(),
            json!({ "junk": true }),
        ));

        assert_eq!(fx.tangle.depth(&junk), Some(3));
        assert_eq!(Value::Object(fx.fold()), json!({ "name": "alice" }));
    }

    #[test]
    fn moot_only_tangle_folds_to_empty() {
        let fx = Fixture::new();
        assert!(fx.fold().is_empty());
    }

    #[test]
    fn detects_redundant_changes() {
        let record = json!({ "name": "alice", "age": 20 })
            .as_object()
            .cloned()
            .unwrap_or_default();
        let same = json!({ "name": "alice" }).as_object().cloned().unwrap_or_default();
        let different = json!({ "age": 21 }).as_object().cloned().unwrap_or_default();
        let new_field = json!({ "city": "Oslo" }).as_object().cloned().unwrap_or_default();

        assert!(!has_changes(&record, &same));
        assert!(!has_changes(&record, &Record::new()));
        assert!(has_changes(&record, &different));
        assert!(has_changes(&record, &new_field));
    }
}
