#![forbid(unsafe_code)]

use fc_columnar::{DeviceBuffer, DeviceColumn, HostArray};
use fc_types::{DType, Scalar, TypeCategory, plain_to_nullable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("duplicate column name {name:?}")]
    DuplicateColumn { name: String },
    #[error("column {name:?} has {actual} rows, frame has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("value {value:?} does not fit dtype {dtype:?}")]
    ValueDtypeMismatch { value: String, dtype: DType },
}

fn payload_fits(dtype: DType, value: &Scalar) -> bool {
    match dtype.category() {
        TypeCategory::SignedInteger => matches!(value, Scalar::Int(_)),
        TypeCategory::UnsignedInteger => {
            matches!(value, Scalar::UInt(_)) || matches!(value, Scalar::Int(v) if *v >= 0)
        }
        TypeCategory::Float => matches!(value, Scalar::Float(_) | Scalar::Int(_)),
        TypeCategory::Boolean => matches!(value, Scalar::Bool(_)),
        TypeCategory::Datetime => matches!(value, Scalar::Datetime(_)),
        // Object columns hold anything, like their host-library namesake.
        TypeCategory::Object => true,
        TypeCategory::Categorical => matches!(value, Scalar::Utf8(_)),
    }
}

/// Host-side reference column: eager, host-addressable, missingness
/// in-band. Under a plain dtype a missing slot is the dtype's marker
/// (NaN, NaT, or None); under a nullable-extension dtype it is always
/// the generic null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSeries {
    name: Option<String>,
    dtype: DType,
    values: Vec<Scalar>,
}

impl HostSeries {
    pub fn new(
        name: Option<String>,
        dtype: DType,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let values = values
            .into_iter()
            .map(|value| {
                if value.is_missing() {
                    Ok(dtype.missing_marker())
                } else if payload_fits(dtype, &value) {
                    Ok(value)
                } else {
                    Err(FrameError::ValueDtypeMismatch {
                        value: format!("{value:?}"),
                        dtype,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name,
            dtype,
            values,
        })
    }

    pub fn named(
        name: impl Into<String>,
        dtype: DType,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        Self::new(Some(name.into()), dtype, values)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }

    #[must_use]
    pub fn is_missing_at(&self, idx: usize) -> bool {
        self.values.get(idx).is_some_and(Scalar::is_missing)
    }

    #[must_use]
    pub fn rename(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Replace every missing slot with `fill`. Dtype is unchanged.
    #[must_use]
    pub fn fill_missing(&self, fill: &Scalar) -> Self {
        let values = self
            .values
            .iter()
            .map(|v| if v.is_missing() { fill.clone() } else { v.clone() })
            .collect();
        Self {
            name: self.name.clone(),
            dtype: self.dtype,
            values,
        }
    }

    /// Re-tag the declared dtype, remapping missing markers to the new
    /// dtype's convention. Payloads are kept as-is.
    #[must_use]
    pub fn with_dtype(&self, dtype: DType) -> Self {
        let values = self
            .values
            .iter()
            .map(|v| {
                if v.is_missing() {
                    dtype.missing_marker()
                } else {
                    v.clone()
                }
            })
            .collect();
        Self {
            name: self.name.clone(),
            dtype,
            values,
        }
    }

    /// Position-wise equality with missing == missing; ignores the name.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.semantic_eq(b))
    }
}

/// Host-side reference table: ordered columns over one shared row count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostFrame {
    columns: Vec<HostSeries>,
}

impl HostFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<HostSeries>) -> Result<Self, FrameError> {
        let mut frame = Self::new();
        for column in columns {
            frame.push(column)?;
        }
        Ok(frame)
    }

    pub fn push(&mut self, column: HostSeries) -> Result<(), FrameError> {
        let name = column.name().unwrap_or_default().to_owned();
        if self.columns.iter().any(|c| c.name().unwrap_or_default() == name) {
            return Err(FrameError::DuplicateColumn { name });
        }
        if let Some(first) = self.columns.first()
            && first.len() != column.len()
        {
            return Err(FrameError::LengthMismatch {
                name,
                expected: first.len(),
                actual: column.len(),
            });
        }
        self.columns.push(column);
        Ok(())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&HostSeries> {
        self.columns
            .iter()
            .find(|c| c.name().unwrap_or_default() == name)
    }

    #[must_use]
    pub fn columns(&self) -> &[HostSeries] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name().unwrap_or_default())
            .collect()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, HostSeries::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Rebuild the frame column by column, preserving order. `f` must
    /// keep each column's name and length.
    #[must_use]
    pub fn map_columns<F>(&self, f: F) -> Self
    where
        F: Fn(&HostSeries) -> HostSeries,
    {
        Self {
            columns: self.columns.iter().map(f).collect(),
        }
    }
}

/// Table held by the library under test: named device columns over one
/// shared row count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceFrame {
    columns: Vec<(String, DeviceColumn)>,
}

impl DeviceFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(
        columns: Vec<(String, DeviceColumn)>,
    ) -> Result<Self, FrameError> {
        let mut frame = Self::new();
        for (name, column) in columns {
            frame.push(name, column)?;
        }
        Ok(frame)
    }

    pub fn push(&mut self, name: impl Into<String>, column: DeviceColumn) -> Result<(), FrameError> {
        let name = name.into();
        if self.columns.iter().any(|(n, _)| *n == name) {
            return Err(FrameError::DuplicateColumn { name });
        }
        if let Some((_, first)) = self.columns.first()
            && first.len() != column.len()
        {
            return Err(FrameError::LengthMismatch {
                name,
                expected: first.len(),
                actual: column.len(),
            });
        }
        self.columns.push((name, column));
        Ok(())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&DeviceColumn> {
        self.columns
            .iter()
            .find_map(|(n, c)| (n == name).then_some(c))
    }

    #[must_use]
    pub fn columns(&self) -> &[(String, DeviceColumn)] {
        &self.columns
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ── Host materialization ───────────────────────────────────────────────

/// Bridge from a device-resident value to its eager host-side reference
/// representation.
pub trait ToHost {
    type Host;

    fn to_host(&self) -> Self::Host;
}

impl ToHost for DeviceBuffer {
    type Host = HostArray;

    fn to_host(&self) -> HostArray {
        self.copy_to_host()
    }
}

/// Host dtype a device column materializes under. Integer, boolean and
/// object columns that carry nulls surface as the corresponding
/// nullable-extension dtype; everything else keeps its plain dtype and
/// marks missing slots in-band.
fn host_dtype_for(column: &DeviceColumn) -> DType {
    let dtype = column.dtype();
    if column.null_count() == 0 {
        return dtype;
    }
    match dtype.category() {
        TypeCategory::SignedInteger
        | TypeCategory::UnsignedInteger
        | TypeCategory::Boolean
        | TypeCategory::Object => plain_to_nullable(dtype).unwrap_or(dtype),
        _ => dtype,
    }
}

impl ToHost for DeviceColumn {
    type Host = HostSeries;

    fn to_host(&self) -> HostSeries {
        let dtype = host_dtype_for(self);
        let values: Vec<Scalar> = (0..self.len())
            .map(|idx| {
                if self.validity().get(idx) {
                    self.value(idx).unwrap_or_else(|| dtype.missing_marker())
                } else {
                    dtype.missing_marker()
                }
            })
            .collect();
        HostSeries {
            name: None,
            dtype,
            values,
        }
    }
}

impl ToHost for DeviceFrame {
    type Host = HostFrame;

    fn to_host(&self) -> HostFrame {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| column.to_host().rename(Some(name.clone())))
            .collect();
        HostFrame { columns }
    }
}
