//! Keyed transport envelope: field name -> typed column of values.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Reserved key for the state tensor.
pub const KEY_STATE: &str = "s";
/// Reserved key for the content hash of the state.
pub const KEY_HASH: &str = "hash";

/// The keys a remote peer already holds and never needs back.
pub fn default_input_keys() -> BTreeSet<String> {
    [KEY_STATE, KEY_HASH].iter().map(|k| k.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    F32,
    I32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl Column {
    pub fn zeros(kind: FieldKind, len: usize) -> Self {
        match kind {
            FieldKind::F32 => Column::F32(vec![0.0; len]),
            FieldKind::I32 => Column::I32(vec![0; len]),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Column::F32(_) => FieldKind::F32,
            Column::I32(_) => FieldKind::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::F32(v) => v.len(),
            Column::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Column::F32(v) => Some(v),
            Column::I32(_) => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Column::I32(v) => Some(v),
            Column::F32(_) => None,
        }
    }

    /// Copy of `range` as a new column of the same kind.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Column {
        match self {
            Column::F32(v) => Column::F32(v[range].to_vec()),
            Column::I32(v) => Column::I32(v[range].to_vec()),
        }
    }

    /// Overwrite `self[offset..offset + src.len()]`. Returns false on kind or bounds mismatch.
    pub fn copy_from(&mut self, offset: usize, src: &Column) -> bool {
        let end = offset + src.len();
        if end > self.len() {
            return false;
        }
        match (self, src) {
            (Column::F32(dst), Column::F32(s)) => dst[offset..end].copy_from_slice(s),
            (Column::I32(dst), Column::I32(s)) => dst[offset..end].copy_from_slice(s),
            _ => return false,
        }
        true
    }
}

/// Which keys of a batch end up in an envelope.
#[derive(Debug, Clone, Copy)]
pub enum KeyFilter<'a> {
    All,
    Only(&'a BTreeSet<String>),
    Except(&'a BTreeSet<String>),
}

impl KeyFilter<'_> {
    pub fn accepts(&self, key: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Only(keys) => keys.contains(key),
            KeyFilter::Except(keys) => !keys.contains(key),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope {
    fields: BTreeMap<String, Column>,
}

impl Envelope {
    pub fn insert(&mut self, key: impl Into<String>, col: Column) {
        self.fields.insert(key.into(), col);
    }

    pub fn get(&self, key: &str) -> Option<&Column> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
