//! Fixed-shape batch storage and the slot that fills it from wire messages.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use spc_core::FillMode;
use thiserror::Error;

use crate::envelope::{default_input_keys, Column, Envelope, FieldKind, KeyFilter};
use crate::message::{ReplyStatus, RoutingKey, WireMessage};

#[derive(Debug, Error, PartialEq)]
pub enum SlotError {
    #[error("batch is already full")]
    Full,
    #[error("slice {idx} out of range for capacity {capacity}")]
    SliceOutOfRange { idx: usize, capacity: usize },
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("field {field}: expected {expected:?} values")]
    KindMismatch { field: String, expected: FieldKind },
    #[error("field {field}: expected {expected} values, got {got}")]
    DimMismatch {
        field: String,
        expected: usize,
        got: usize,
    },
    #[error("message carries {got} samples, capacity is {capacity}")]
    TooManySamples { got: usize, capacity: usize },
    #[error("message carries no fields")]
    Empty,
    #[error("batch {0:?} has zero capacity")]
    ZeroCapacity(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Values per sample.
    pub dim: usize,
}

/// Immutable batch shape.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSpec {
    pub label: String,
    pub batch_size: usize,
    pub fields: Vec<FieldSpec>,
    /// Fields sent to the remote side and left out of replies.
    pub input_keys: BTreeSet<String>,
}

impl BatchSpec {
    pub fn new(label: impl Into<String>, batch_size: usize) -> Self {
        Self {
            label: label.into(),
            batch_size,
            fields: Vec::new(),
            input_keys: default_input_keys(),
        }
    }

    /// A collector can only fill a spec with at least one slice.
    pub fn validate(&self) -> Result<(), SlotError> {
        if self.batch_size == 0 {
            return Err(SlotError::ZeroCapacity(self.label.clone()));
        }
        Ok(())
    }

    pub fn field_f32(self, name: impl Into<String>, dim: usize) -> Self {
        self.field(name, FieldKind::F32, dim)
    }

    pub fn field_i32(self, name: impl Into<String>, dim: usize) -> Self {
        self.field(name, FieldKind::I32, dim)
    }

    fn field(mut self, name: impl Into<String>, kind: FieldKind, dim: usize) -> Self {
        let name = name.into();
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldSpec { name, kind, dim });
        self
    }

    pub fn with_input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Column storage for one batch: `batch_size * dim` values per field.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchData {
    spec: Arc<BatchSpec>,
    columns: BTreeMap<String, Column>,
    len: usize,
}

impl BatchData {
    pub fn new(spec: Arc<BatchSpec>) -> Self {
        let columns = spec
            .fields
            .iter()
            .map(|f| (f.name.clone(), Column::zeros(f.kind, f.dim * spec.batch_size)))
            .collect();
        Self {
            spec,
            columns,
            len: 0,
        }
    }

    /// Storage-less stand-in used while the real data is handed to inference.
    pub(crate) fn empty(spec: Arc<BatchSpec>) -> Self {
        Self {
            spec,
            columns: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn spec(&self) -> &BatchSpec {
        &self.spec
    }

    pub(crate) fn spec_arc(&self) -> Arc<BatchSpec> {
        Arc::clone(&self.spec)
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    pub fn capacity(&self) -> usize {
        self.spec.batch_size
    }

    /// Number of valid samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn f32(&self, name: &str) -> Option<&[f32]> {
        self.columns.get(name).and_then(Column::as_f32)
    }

    pub fn i32(&self, name: &str) -> Option<&[i32]> {
        self.columns.get(name).and_then(Column::as_i32)
    }

    pub fn f32_mut(&mut self, name: &str) -> Option<&mut [f32]> {
        match self.columns.get_mut(name) {
            Some(Column::F32(v)) => Some(v),
            _ => None,
        }
    }

    pub fn i32_mut(&mut self, name: &str) -> Option<&mut [i32]> {
        match self.columns.get_mut(name) {
            Some(Column::I32(v)) => Some(v),
            _ => None,
        }
    }

    /// One sample of an f32 field.
    pub fn sample_f32(&self, name: &str, idx: usize) -> Option<&[f32]> {
        let dim = self.spec.get_field(name)?.dim;
        self.f32(name).map(|v| &v[idx * dim..(idx + 1) * dim])
    }

    /// Envelope holding sample `idx` of every field accepted by `filter`.
    pub fn slice_envelope(&self, idx: usize, filter: KeyFilter<'_>) -> Envelope {
        let mut env = Envelope::default();
        for f in &self.spec.fields {
            if !filter.accepts(&f.name) {
                continue;
            }
            if let Some(col) = self.columns.get(&f.name) {
                env.insert(f.name.clone(), col.slice(idx * f.dim..(idx + 1) * f.dim));
            }
        }
        env
    }

    /// Envelope holding the first `len()` samples of every field accepted by `filter`.
    pub fn to_envelope(&self, filter: KeyFilter<'_>) -> Envelope {
        let mut env = Envelope::default();
        for f in &self.spec.fields {
            if !filter.accepts(&f.name) {
                continue;
            }
            if let Some(col) = self.columns.get(&f.name) {
                env.insert(f.name.clone(), col.slice(0..self.len * f.dim));
            }
        }
        env
    }

    /// Write one sample from `env` into slice `idx`.
    pub fn write_slice(
        &mut self,
        idx: usize,
        env: &Envelope,
        filter: KeyFilter<'_>,
    ) -> Result<(), SlotError> {
        let capacity = self.capacity();
        if idx >= capacity {
            return Err(SlotError::SliceOutOfRange { idx, capacity });
        }
        for (key, src) in env.iter() {
            if !filter.accepts(key) {
                continue;
            }
            let f = self.check_field(key, src)?;
            if src.len() != f.dim {
                return Err(SlotError::DimMismatch {
                    field: key.to_string(),
                    expected: f.dim,
                    got: src.len(),
                });
            }
            let dim = f.dim;
            if let Some(dst) = self.columns.get_mut(key) {
                dst.copy_from(idx * dim, src);
            }
        }
        Ok(())
    }

    /// Write a multi-sample envelope from slice 0 on. Returns the sample count it carried.
    ///
    /// Every accepted field must carry the same number of samples. `len()` is left untouched.
    pub fn write_whole(&mut self, env: &Envelope, filter: KeyFilter<'_>) -> Result<usize, SlotError> {
        let mut samples: Option<usize> = None;
        for (key, src) in env.iter() {
            if !filter.accepts(key) {
                continue;
            }
            let f = self.check_field(key, src)?;
            let n = if f.dim == 0 { 0 } else { src.len() / f.dim };
            if f.dim * n != src.len() || samples.is_some_and(|s| s != n) {
                return Err(SlotError::DimMismatch {
                    field: key.to_string(),
                    expected: f.dim * samples.unwrap_or(n),
                    got: src.len(),
                });
            }
            if n > self.capacity() {
                return Err(SlotError::TooManySamples {
                    got: n,
                    capacity: self.capacity(),
                });
            }
            samples = Some(n);
        }
        for (key, src) in env.iter() {
            if filter.accepts(key) {
                if let Some(dst) = self.columns.get_mut(key) {
                    dst.copy_from(0, src);
                }
            }
        }
        Ok(samples.unwrap_or(0))
    }

    fn check_field(&self, key: &str, src: &Column) -> Result<&FieldSpec, SlotError> {
        let f = self
            .spec
            .get_field(key)
            .ok_or_else(|| SlotError::UnknownField(key.to_string()))?;
        if f.kind != src.kind() {
            return Err(SlotError::KindMismatch {
                field: key.to_string(),
                expected: f.kind,
            });
        }
        Ok(f)
    }
}

#[derive(Debug, Clone)]
enum FillState {
    Whole { route: Option<RoutingKey> },
    PerSlice { routes: Vec<RoutingKey> },
}

/// A batch being filled from wire messages.
///
/// The slot is ready once every slice has been written exactly once since the
/// last `reset`; further fills are rejected until then. Each slice keeps the
/// routing key it arrived with so replies go back where they came from.
#[derive(Debug, Clone)]
pub struct BatchSlot {
    data: BatchData,
    fill: FillState,
}

impl BatchSlot {
    pub fn new(spec: Arc<BatchSpec>, mode: FillMode) -> Self {
        let fill = match mode {
            FillMode::Whole => FillState::Whole { route: None },
            FillMode::PerSlice => FillState::PerSlice {
                routes: Vec::with_capacity(spec.batch_size),
            },
        };
        Self {
            data: BatchData::new(spec),
            fill,
        }
    }

    pub fn mode(&self) -> FillMode {
        match self.fill {
            FillState::Whole { .. } => FillMode::Whole,
            FillState::PerSlice { .. } => FillMode::PerSlice,
        }
    }

    pub fn label(&self) -> &str {
        self.data.label()
    }

    pub fn data(&self) -> &BatchData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut BatchData {
        &mut self.data
    }

    /// Samples written since the last reset.
    pub fn filled(&self) -> usize {
        match &self.fill {
            FillState::Whole { route: Some(_) } => self.data.len(),
            FillState::Whole { route: None } => 0,
            FillState::PerSlice { routes } => routes.len(),
        }
    }

    pub fn is_ready(&self) -> bool {
        match &self.fill {
            FillState::Whole { route } => route.is_some(),
            FillState::PerSlice { routes } => routes.len() == self.data.capacity(),
        }
    }

    /// Decode `msg` into the next unfilled slice (or the whole batch). Returns whether the slot is now ready.
    pub fn fill_next(&mut self, msg: &WireMessage) -> Result<bool, SlotError> {
        if self.is_ready() {
            return Err(SlotError::Full);
        }
        if msg.body.is_empty() {
            return Err(SlotError::Empty);
        }
        match &mut self.fill {
            FillState::Whole { route } => {
                let n = self.data.write_whole(&msg.body, KeyFilter::All)?;
                self.data.set_len(n);
                *route = Some(msg.key);
            }
            FillState::PerSlice { routes } => {
                self.data.write_slice(routes.len(), &msg.body, KeyFilter::All)?;
                routes.push(msg.key);
                self.data.set_len(routes.len());
            }
        }
        Ok(self.is_ready())
    }

    /// Reply messages for every filled slice, without the input keys.
    pub fn replies(&self, status: ReplyStatus) -> Vec<WireMessage> {
        let spec = self.data.spec();
        let filter = KeyFilter::Except(&spec.input_keys);
        let reply = |key: RoutingKey, body: Envelope| WireMessage {
            key,
            label: spec.label.clone(),
            status,
            body,
        };
        match &self.fill {
            FillState::Whole { route } => route
                .iter()
                .map(|key| reply(*key, self.data.to_envelope(filter)))
                .collect(),
            FillState::PerSlice { routes } => routes
                .iter()
                .enumerate()
                .map(|(i, key)| reply(*key, self.data.slice_envelope(i, filter)))
                .collect(),
        }
    }

    /// Forget routes and rewind the cursor for the next round.
    pub fn reset(&mut self) {
        match &mut self.fill {
            FillState::Whole { route } => *route = None,
            FillState::PerSlice { routes } => routes.clear(),
        }
        self.data.set_len(0);
    }

    /// Move the data out for inference, leaving routes in place.
    pub(crate) fn take_data(&mut self) -> BatchData {
        let spec = self.data.spec_arc();
        std::mem::replace(&mut self.data, BatchData::empty(spec))
    }

    pub(crate) fn put_data(&mut self, data: BatchData) {
        self.data = data;
    }
}
