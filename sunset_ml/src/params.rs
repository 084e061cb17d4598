use std::{collections::HashMap, ops::Range};

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The role a tensor plays inside its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Weight,
    Bias,
    RunningMean,
    RunningVar,
}

impl ParamKind {
    /// The last component of the tensor's dotted name.
    pub fn suffix(self) -> &'static str {
        match self {
            ParamKind::Weight => "weight",
            ParamKind::Bias => "bias",
            ParamKind::RunningMean => "running_mean",
            ParamKind::RunningVar => "running_var",
        }
    }

    /// Whether an optimizer should update tensors of this kind. Running statistics are
    /// buffers: they are only written by training-mode forward passes.
    pub fn is_trainable(self) -> bool {
        matches!(self, ParamKind::Weight | ParamKind::Bias)
    }
}

/// The description of a single tensor a layer owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub shape: Vec<usize>,
    /// Inputs per output unit, for tensors drawn from a fan-in scaled distribution.
    pub fan_in: Option<usize>,
}

impl ParamSpec {
    pub fn new(kind: ParamKind, shape: Vec<usize>, fan_in: Option<usize>) -> Self {
        Self {
            kind,
            shape,
            fan_in,
        }
    }

    /// The amount of scalars in the tensor.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A named tensor placed in the flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamEntry {
    pub name: String,
    pub kind: ParamKind,
    pub shape: Vec<usize>,
    pub fan_in: Option<usize>,
    pub range: Range<usize>,
}

impl ParamEntry {
    pub fn len(&self) -> usize {
        self.range.len()
    }
}

/// Maps a flat parameter buffer into named tensors.
///
/// Entries are laid out back to back in the order they were given, so the position of a
/// tensor in the buffer is stable as long as the architecture is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    entries: Vec<ParamEntry>,
    index: HashMap<String, usize>,
    total: usize,
}

impl ParameterLayout {
    /// Creates a new `ParameterLayout`.
    ///
    /// # Arguments
    /// * `specs` - The named tensor specifications in buffer order.
    ///
    /// # Returns
    /// A new layout, or an error if a name is repeated.
    pub fn new<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ParamSpec)>,
        S: Into<String>,
    {
        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut offset = 0;

        for (name, spec) in specs {
            let name = name.into();
            let len = spec.len();

            if index.insert(name.clone(), entries.len()).is_some() {
                return Err(MlErr::InvalidConfig(format!(
                    "parameter '{name}' is declared twice"
                )));
            }

            entries.push(ParamEntry {
                name,
                kind: spec.kind,
                shape: spec.shape,
                fan_in: spec.fan_in,
                range: offset..offset + len,
            });
            offset += len;
        }

        Ok(Self {
            entries,
            index,
            total: offset,
        })
    }

    /// The total amount of scalars described by the layout.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The amount of named tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamEntry> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ParamEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Checks that the entries are non-overlapping, contiguous and cover exactly
    /// `total_params` scalars.
    pub fn validate(&self, total_params: usize) -> Result<()> {
        let mut expected_start = 0;

        for entry in &self.entries {
            if entry.range.start != expected_start {
                return Err(MlErr::SizeMismatch {
                    what: "parameter layout offset",
                    got: entry.range.start,
                    expected: expected_start,
                });
            }

            expected_start = entry.range.end;
        }

        if expected_start != total_params {
            return Err(MlErr::SizeMismatch {
                what: "parameter layout total",
                got: expected_start,
                expected: total_params,
            });
        }

        Ok(())
    }
}

/// A write produced by a training-mode forward pass into a region of the flat buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub offset: usize,
    pub values: Vec<f32>,
}

impl StateUpdate {
    pub fn new(offset: usize, values: Vec<f32>) -> Self {
        Self { offset, values }
    }

    /// Moves the update `by` positions further into the buffer.
    pub fn shifted(mut self, by: usize) -> Self {
        self.offset += by;
        self
    }
}

/// The learned parameters and buffers of a model, in one flat buffer.
#[derive(Debug, Clone)]
pub struct Params {
    layout: ParameterLayout,
    values: Vec<f32>,
}

impl Params {
    /// Creates a new `Params`.
    ///
    /// # Returns
    /// An error if `values` does not match the size of `layout`.
    pub fn new(layout: ParameterLayout, values: Vec<f32>) -> Result<Self> {
        layout.validate(values.len())?;
        Ok(Self { layout, values })
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// The amount of scalars, buffers included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The amount of scalars an optimizer updates.
    pub fn num_trainable(&self) -> usize {
        self.layout
            .iter()
            .filter(|entry| entry.kind.is_trainable())
            .map(ParamEntry::len)
            .sum()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Returns a view of the named tensor with its declared shape.
    pub fn get(&self, name: &str) -> Option<ArrayViewD<'_, f32>> {
        let entry = self.layout.get(name)?;
        ArrayViewD::from_shape(IxDyn(&entry.shape), &self.values[entry.range.clone()]).ok()
    }

    /// Returns a mutable view of the named tensor with its declared shape.
    pub fn get_mut(&mut self, name: &str) -> Option<ArrayViewMutD<'_, f32>> {
        let entry = self.layout.get(name)?;
        ArrayViewMutD::from_shape(IxDyn(&entry.shape), &mut self.values[entry.range.clone()])
            .ok()
    }

    /// Overwrites the named tensor with `values`, given in row-major order.
    pub fn set(&mut self, name: &str, values: &[f32]) -> Result<()> {
        let entry = self
            .layout
            .get(name)
            .ok_or_else(|| MlErr::UnknownParam(name.to_string()))?;

        if values.len() != entry.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameter values",
                got: values.len(),
                expected: entry.len(),
            });
        }

        self.values[entry.range.clone()].copy_from_slice(values);
        Ok(())
    }

    /// Iterates every tensor as `(entry, view)` in buffer order.
    pub fn named(&self) -> impl Iterator<Item = (&ParamEntry, &[f32])> {
        self.layout
            .iter()
            .map(|entry| (entry, &self.values[entry.range.clone()]))
    }

    /// Iterates the trainable tensors as mutable slices, for external optimizers.
    pub fn trainable_mut(&mut self) -> impl Iterator<Item = (&ParamEntry, &mut [f32])> {
        let mut rest: &mut [f32] = &mut self.values;
        let mut consumed = 0;

        self.layout.iter().filter_map(move |entry| {
            let skip = entry.range.start - consumed;
            let taken = std::mem::take(&mut rest);
            let (slice, tail) = taken[skip..].split_at_mut(entry.len());
            rest = tail;
            consumed = entry.range.end;

            entry.kind.is_trainable().then_some((entry, slice))
        })
    }

    /// Commits the writes of a training-mode forward pass.
    pub fn apply(&mut self, updates: &[StateUpdate]) -> Result<()> {
        let len = self.values.len();

        for update in updates {
            let end = update.offset + update.values.len();
            let region = self
                .values
                .get_mut(update.offset..end)
                .ok_or(MlErr::SizeMismatch {
                    what: "state update",
                    got: end,
                    expected: len,
                })?;

            region.copy_from_slice(&update.values);
        }

        Ok(())
    }
}
