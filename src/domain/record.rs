//! Arranged output: identities, hierarchical records and ordered record maps

use std::collections::HashMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::domain::join::JoinTree;
use crate::domain::value::Fields;

/// Reserved key for nested child joins when none is configured.
pub const DEFAULT_JOINT_KEY: &str = "joint_data";

/// Key under which an arranged record is stored.
///
/// `Key` is derived from the identity fields of a row. `Position` is used
/// for columnar entities whose identity could not be computed; it is the
/// insertion position within the owning map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowIdentity {
    Key(String),
    Position(usize),
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowIdentity::Key(k) => f.write_str(k),
            RowIdentity::Position(p) => write!(f, "{p}"),
        }
    }
}

impl From<&str> for RowIdentity {
    fn from(k: &str) -> Self {
        RowIdentity::Key(k.to_string())
    }
}

impl From<String> for RowIdentity {
    fn from(k: String) -> Self {
        RowIdentity::Key(k)
    }
}

impl From<usize> for RowIdentity {
    fn from(p: usize) -> Self {
        RowIdentity::Position(p)
    }
}

/// One entity reconstructed from flat rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HierRecord {
    /// Entity fields with the identity fields removed
    pub fields: Fields,
    /// Child join results in join declaration order; only non-empty maps are kept
    joint_data: Vec<(String, RecordMap)>,
}

impl HierRecord {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            joint_data: Vec::new(),
        }
    }

    pub fn has_joint_data(&self) -> bool {
        !self.joint_data.is_empty()
    }

    pub fn joint(&self, join_id: &str) -> Option<&RecordMap> {
        self.joint_data
            .iter()
            .find(|(id, _)| id == join_id)
            .map(|(_, m)| m)
    }

    pub fn joint_ids(&self) -> impl Iterator<Item = &str> {
        self.joint_data.iter().map(|(id, _)| id.as_str())
    }

    /// Move the accumulated map for `join_id` out of the record.
    ///
    /// Returns an empty map if the join has no entries yet.
    pub(crate) fn take_joint(&mut self, join_id: &str) -> RecordMap {
        match self.joint_data.iter_mut().find(|(id, _)| id == join_id) {
            Some((_, map)) => std::mem::take(map),
            None => RecordMap::new(),
        }
    }

    /// Store the map for `join_id` back, dropping the slot when it is empty.
    ///
    /// Slots keep the position of their first non-empty store.
    pub(crate) fn put_joint(&mut self, join_id: &str, map: RecordMap) {
        match self.joint_data.iter().position(|(id, _)| id == join_id) {
            Some(pos) if map.is_empty() => {
                self.joint_data.remove(pos);
            }
            Some(pos) => self.joint_data[pos].1 = map,
            None if map.is_empty() => {}
            None => self.joint_data.push((join_id.to_string(), map)),
        }
    }

    /// Render as JSON with child joins nested under `joint_key` at every level.
    pub fn to_json(&self, joint_key: &str) -> serde_json::Value {
        self.render_with(joint_key, |_, map| map.to_json(joint_key))
    }

    /// Render as JSON following `tree`, the join tree this record was
    /// arranged with.
    ///
    /// Each level nests its child joins under the joint key of its own spec.
    /// Joins that `tree` does not declare fall back to the key of the level
    /// that holds them.
    pub fn render(&self, tree: &JoinTree) -> serde_json::Value {
        let joint_key = tree.spec().joint_key.as_str();
        self.render_with(joint_key, |join_id, map| {
            match tree.children().find(|(id, _)| *id == join_id) {
                Some((_, child)) => map.render(child),
                None => map.to_json(joint_key),
            }
        })
    }

    fn render_with<F>(&self, joint_key: &str, render_joint: F) -> serde_json::Value
    where
        F: Fn(&str, &RecordMap) -> serde_json::Value,
    {
        let mut obj: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(c, v)| (c.to_string(), serde_json::Value::from(v.clone())))
            .collect();
        if self.has_joint_data() {
            let joints = self
                .joint_data
                .iter()
                .map(|(id, map)| (id.clone(), render_joint(id, map)))
                .collect();
            obj.insert(joint_key.to_string(), serde_json::Value::Object(joints));
        }
        serde_json::Value::Object(obj)
    }
}

/// Serializes with child joins under [`DEFAULT_JOINT_KEY`]; use
/// [`HierRecord::render`] for per-join keys.
impl Serialize for HierRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let joint = usize::from(self.has_joint_data());
        let mut map = serializer.serialize_map(Some(self.fields.len() + joint))?;
        for (c, v) in self.fields.iter() {
            map.serialize_entry(c, v)?;
        }
        if self.has_joint_data() {
            map.serialize_entry(DEFAULT_JOINT_KEY, &JointData(&self.joint_data))?;
        }
        map.end()
    }
}

struct JointData<'a>(&'a [(String, RecordMap)]);

impl Serialize for JointData<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, records) in self.0 {
            map.serialize_entry(id, records)?;
        }
        map.end()
    }
}

/// Insertion-ordered mapping `RowIdentity -> HierRecord`.
///
/// Entries are unique by identity text, which is what they render as. When a
/// keyed identity arrives whose text is held by a positional entry, that
/// entry moves to the next free position so both records survive rendering.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordMap {
    entries: Vec<(RowIdentity, HierRecord)>,
    /// identity text -> position in `entries`
    index: HashMap<String, usize>,
}

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, id: &RowIdentity) -> Option<usize> {
        self.index
            .get(&id.to_string())
            .copied()
            .filter(|&i| self.entries[i].0 == *id)
    }

    pub fn get(&self, id: &RowIdentity) -> Option<&HierRecord> {
        self.slot(id).map(|i| &self.entries[i].1)
    }

    /// Lookup by identity text, as rendered in the output.
    pub fn get_key(&self, key: &str) -> Option<&HierRecord> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, id: &RowIdentity) -> Option<&mut HierRecord> {
        let i = self.slot(id)?;
        Some(&mut self.entries[i].1)
    }

    pub fn contains(&self, id: &RowIdentity) -> bool {
        self.slot(id).is_some()
    }

    /// Insert a fresh record unless `id` is already present.
    ///
    /// The first occurrence of an identity wins; returns whether a record
    /// was inserted.
    pub fn insert_if_absent(&mut self, id: RowIdentity, fields: Fields) -> bool {
        let text = id.to_string();
        if let Some(&i) = self.index.get(&text) {
            let displaces = matches!(id, RowIdentity::Key(_))
                && matches!(self.entries[i].0, RowIdentity::Position(_));
            if !displaces {
                return false;
            }
            self.move_to_free_position(i);
        }
        self.index.insert(text, self.entries.len());
        self.entries.push((id, HierRecord::new(fields)));
        true
    }

    /// Find the entry whose fields equal `fields`, ignoring joint data.
    pub fn find_by_fields(&self, fields: &Fields) -> Option<RowIdentity> {
        self.entries
            .iter()
            .find(|(_, rec)| rec.fields.same_fields(fields))
            .map(|(id, _)| id.clone())
    }

    /// Append a record keyed by the next free insertion position.
    pub fn push_positional(&mut self, fields: Fields) -> RowIdentity {
        let id = RowIdentity::Position(self.next_free_position());
        self.insert_if_absent(id.clone(), fields);
        id
    }

    fn next_free_position(&self) -> usize {
        let mut pos = self.entries.len();
        while self.index.contains_key(&pos.to_string()) {
            pos += 1;
        }
        pos
    }

    fn move_to_free_position(&mut self, i: usize) {
        let pos = self.next_free_position();
        self.index.remove(&self.entries[i].0.to_string());
        self.entries[i].0 = RowIdentity::Position(pos);
        self.index.insert(pos.to_string(), i);
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowIdentity> {
        self.entries.iter().map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowIdentity, &HierRecord)> {
        self.entries.iter().map(|(id, rec)| (id, rec))
    }

    /// Render as a JSON object keyed by identity text, child joins under
    /// `joint_key` at every level.
    pub fn to_json(&self, joint_key: &str) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(id, rec)| (id.to_string(), rec.to_json(joint_key)))
                .collect(),
        )
    }

    /// Render following the joint keys configured on `tree`.
    pub fn render(&self, tree: &JoinTree) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(id, rec)| (id.to_string(), rec.render(tree)))
                .collect(),
        )
    }
}

impl IntoIterator for RecordMap {
    type Item = (RowIdentity, HierRecord);
    type IntoIter = std::vec::IntoIter<(RowIdentity, HierRecord)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for RecordMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, rec) in &self.entries {
            map.serialize_entry(&id.to_string(), rec)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::FlatRow;

    #[test]
    fn given_existing_identity_when_inserting_then_first_occurrence_wins() {
        let mut map = RecordMap::new();
        assert!(map.insert_if_absent("1".into(), FlatRow::new().with("name", "first")));
        assert!(!map.insert_if_absent("1".into(), FlatRow::new().with("name", "second")));

        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get_key("1").map(|r| r.fields.get("name").cloned()),
            Some(Some("first".into()))
        );
    }

    #[test]
    fn given_empty_map_when_put_joint_then_slot_not_created() {
        let mut rec = HierRecord::default();
        rec.put_joint("image", RecordMap::new());
        assert!(!rec.has_joint_data());
        assert!(rec.to_json("joint_data").get("joint_data").is_none());
    }

    #[test]
    fn given_positional_entries_when_pushing_then_keys_follow_insertion() {
        let mut map = RecordMap::new();
        let a = map.push_positional(FlatRow::new().with("v", 1));
        let b = map.push_positional(FlatRow::new().with("v", 2));
        assert_eq!(a, RowIdentity::Position(0));
        assert_eq!(b, RowIdentity::Position(1));
        assert_eq!(
            map.find_by_fields(&FlatRow::new().with("v", 2)),
            Some(RowIdentity::Position(1))
        );
    }

    #[test]
    fn given_positional_entry_when_key_with_same_text_arrives_then_both_kept() {
        let mut map = RecordMap::new();
        map.push_positional(FlatRow::new().with("title", "NoKey"));

        assert!(map.insert_if_absent("0".into(), FlatRow::new().with("title", "Keyed")));
        let next = map.push_positional(FlatRow::new().with("title", "NoKey2"));

        assert_eq!(map.len(), 3);
        assert_eq!(
            map.keys().cloned().collect::<Vec<_>>(),
            vec![
                RowIdentity::Position(1),
                RowIdentity::Key("0".to_string()),
                RowIdentity::Position(2)
            ]
        );
        assert_eq!(next, RowIdentity::Position(2));
        assert_eq!(
            serde_json::to_string(&map).unwrap(),
            r#"{"1":{"title":"NoKey"},"0":{"title":"Keyed"},"2":{"title":"NoKey2"}}"#
        );
    }

    #[test]
    fn given_key_entry_when_pushing_positional_then_skips_taken_text() {
        let mut map = RecordMap::new();
        map.insert_if_absent("0".into(), FlatRow::new().with("title", "Keyed"));

        let id = map.push_positional(FlatRow::new().with("title", "NoKey"));

        assert_eq!(id, RowIdentity::Position(1));
        assert_eq!(map.to_json("joint_data").as_object().map(|o| o.len()), Some(2));
        assert!(map.get(&RowIdentity::Position(0)).is_none());
    }

    #[test]
    fn given_record_with_joints_when_serialized_then_insertion_order_kept() {
        let mut images = RecordMap::new();
        images.insert_if_absent("9".into(), FlatRow::new().with("name", "b.png"));
        images.insert_if_absent("2".into(), FlatRow::new().with("name", "a.png"));
        let mut rec = HierRecord::new(FlatRow::new().with("zeta", 1).with("alpha", 2));
        rec.put_joint("image", images);

        let expected = r#"{"zeta":1,"alpha":2,"joint_data":{"image":{"9":{"name":"b.png"},"2":{"name":"a.png"}}}}"#;
        assert_eq!(serde_json::to_string(&rec).unwrap(), expected);
        assert_eq!(rec.to_json("joint_data").to_string(), expected);
    }
}
