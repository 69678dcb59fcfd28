#![forbid(unsafe_code)]

use fc_types::{DType, Scalar, TypeCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device bitmask allocations are padded to this boundary.
const BITMASK_PADDING_BYTES: usize = 64;

/// Number of bytes allocated for a validity bitmask covering `len` rows.
///
/// One bit per row, rounded up to whole bytes, then padded to a 64-byte
/// boundary (the device allocator's alignment unit). Callers that build
/// masks from raw bytes size their buffers with this.
#[must_use]
pub fn bitmask_allocation_size_bytes(len: usize) -> usize {
    let bytes = len.div_ceil(8);
    bytes.div_ceil(BITMASK_PADDING_BYTES) * BITMASK_PADDING_BYTES
}

/// Packed per-row validity. Bit i set means row i holds a meaningful value.
#[derive(Debug, Clone, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_bools(bits: &[bool]) -> Self {
        let len = bits.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, &valid) in bits.iter().enumerate() {
            if valid {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn from_scalars(values: &[Scalar]) -> Self {
        let bits: Vec<bool> = values.iter().map(|v| !v.is_missing()).collect();
        Self::from_bools(&bits)
    }

    /// Interpret raw bitmask bytes (LSB-first within each byte, the device
    /// wire layout). Bytes beyond `len` bits are padding and ignored.
    #[must_use]
    pub fn from_bitmask_bytes(bytes: &[u8], len: usize) -> Self {
        let bits: Vec<bool> = (0..len)
            .map(|idx| {
                bytes
                    .get(idx / 8)
                    .is_some_and(|byte| (byte >> (idx % 8)) & 1 == 1)
            })
            .collect();
        Self::from_bools(&bits)
    }

    /// Serialize back to the device byte layout, including padding.
    #[must_use]
    pub fn to_bitmask_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0_u8; bitmask_allocation_size_bytes(self.len)];
        for idx in 0..self.len {
            if self.get(idx) {
                bytes[idx / 8] |= 1 << (idx % 8);
            }
        }
        bytes
    }

    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        let remainder = len % 64;
        if remainder > 0
            && let Some(last) = words.last_mut()
        {
            *last = (1_u64 << remainder) - 1;
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        Self {
            words: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        if idx >= self.len {
            return;
        }
        if value {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        let full_words = self.len / 64;
        let mut count: u32 = self.words[..full_words]
            .iter()
            .map(|w| w.count_ones())
            .sum();
        let remainder = self.len % 64;
        if remainder > 0 && full_words < self.words.len() {
            let mask = (1_u64 << remainder) - 1;
            count += (self.words[full_words] & mask).count_ones();
        }
        count as usize
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.len - self.count_valid()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

impl PartialEq for ValidityMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bits().eq(other.bits())
    }
}

impl Serialize for ValidityMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("ValidityMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ValidityMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_bools(&raw.bits))
    }
}

// ── Buffers ────────────────────────────────────────────────────────────

/// Device-resident value storage: one contiguous typed lane per column.
///
/// Narrow widths are stored widened; the owning column's dtype records the
/// declared width. Invalid positions hold unspecified payloads and must
/// never be read without consulting the validity mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lane", content = "data", rename_all = "snake_case")]
pub enum DeviceBuffer {
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Bool(Vec<bool>),
    Utf8(Vec<String>),
}

/// Host-resident raw homogeneous array, produced by copying a
/// `DeviceBuffer` off the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lane", content = "data", rename_all = "snake_case")]
pub enum HostArray {
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Bool(Vec<bool>),
    Utf8(Vec<String>),
}

impl DeviceBuffer {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float64(d) => d.len(),
            Self::Int64(d) => d.len(),
            Self::UInt64(d) => d.len(),
            Self::Bool(d) => d.len(),
            Self::Utf8(d) => d.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking device-to-host copy.
    #[must_use]
    pub fn copy_to_host(&self) -> HostArray {
        match self {
            Self::Float64(d) => HostArray::Float64(d.clone()),
            Self::Int64(d) => HostArray::Int64(d.clone()),
            Self::UInt64(d) => HostArray::UInt64(d.clone()),
            Self::Bool(d) => HostArray::Bool(d.clone()),
            Self::Utf8(d) => HostArray::Utf8(d.clone()),
        }
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<Scalar> {
        match self {
            Self::Float64(d) => d.get(idx).map(|v| Scalar::Float(*v)),
            Self::Int64(d) => d.get(idx).map(|v| Scalar::Int(*v)),
            Self::UInt64(d) => d.get(idx).map(|v| Scalar::UInt(*v)),
            Self::Bool(d) => d.get(idx).map(|v| Scalar::Bool(*v)),
            Self::Utf8(d) => d.get(idx).map(|v| Scalar::Utf8(v.clone())),
        }
    }
}

impl HostArray {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float64(d) => d.len(),
            Self::Int64(d) => d.len(),
            Self::UInt64(d) => d.len(),
            Self::Bool(d) => d.len(),
            Self::Utf8(d) => d.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float64(_))
    }
}

// ── Device columns ─────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("buffer holds {data} values but mask covers {mask} rows")]
    MaskLengthMismatch { data: usize, mask: usize },
    #[error("dtype {dtype:?} cannot describe a device column")]
    InvalidColumnDtype { dtype: DType },
    #[error("value {value:?} does not fit a {dtype:?} column")]
    ValueDtypeMismatch { value: String, dtype: DType },
}

/// A typed device column: declared plain dtype, typed payload buffer, and
/// a packed validity mask. The payload at an invalid slot is unspecified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceColumn {
    dtype: DType,
    data: DeviceBuffer,
    validity: ValidityMask,
}

fn buffer_lane(dtype: DType, len: usize) -> DeviceBuffer {
    match dtype.category() {
        TypeCategory::SignedInteger => DeviceBuffer::Int64(vec![0; len]),
        TypeCategory::UnsignedInteger => DeviceBuffer::UInt64(vec![0; len]),
        TypeCategory::Float => DeviceBuffer::Float64(vec![0.0; len]),
        TypeCategory::Boolean => DeviceBuffer::Bool(vec![false; len]),
        TypeCategory::Datetime => DeviceBuffer::Int64(vec![0; len]),
        TypeCategory::Object | TypeCategory::Categorical => {
            DeviceBuffer::Utf8(vec![String::new(); len])
        }
    }
}

fn store(buffer: &mut DeviceBuffer, idx: usize, value: &Scalar, dtype: DType) -> Result<(), ColumnError> {
    let mismatch = || ColumnError::ValueDtypeMismatch {
        value: format!("{value:?}"),
        dtype,
    };
    match (buffer, value) {
        (DeviceBuffer::Int64(d), Scalar::Int(v)) => d[idx] = *v,
        (DeviceBuffer::Int64(d), Scalar::Datetime(v)) => d[idx] = *v,
        (DeviceBuffer::UInt64(d), Scalar::UInt(v)) => d[idx] = *v,
        (DeviceBuffer::UInt64(d), Scalar::Int(v)) if *v >= 0 => d[idx] = *v as u64,
        (DeviceBuffer::Float64(d), Scalar::Float(v)) => d[idx] = *v,
        (DeviceBuffer::Float64(d), Scalar::Int(v)) => d[idx] = *v as f64,
        (DeviceBuffer::Bool(d), Scalar::Bool(v)) => d[idx] = *v,
        (DeviceBuffer::Utf8(d), Scalar::Utf8(v)) => d[idx] = v.clone(),
        _ => return Err(mismatch()),
    }
    Ok(())
}

impl DeviceColumn {
    /// Build a column from host scalars. Missing scalars become invalid
    /// slots; their payload stays at the lane's zero sentinel.
    pub fn from_scalars(dtype: DType, values: &[Scalar]) -> Result<Self, ColumnError> {
        if dtype.is_extension() {
            return Err(ColumnError::InvalidColumnDtype { dtype });
        }
        let mut data = buffer_lane(dtype, values.len());
        let mut bits = vec![false; values.len()];
        for (idx, value) in values.iter().enumerate() {
            if value.is_missing() {
                continue;
            }
            store(&mut data, idx, value, dtype)?;
            bits[idx] = true;
        }
        Ok(Self {
            dtype,
            data,
            validity: ValidityMask::from_bools(&bits),
        })
    }

    /// Pair a payload buffer with a raw validity bitmask. Payloads under
    /// cleared bits are preserved untouched; they carry no meaning.
    pub fn from_masked_array(
        dtype: DType,
        data: DeviceBuffer,
        bitmask: &[u8],
    ) -> Result<Self, ColumnError> {
        if dtype.is_extension() {
            return Err(ColumnError::InvalidColumnDtype { dtype });
        }
        let validity = ValidityMask::from_bitmask_bytes(bitmask, data.len());
        Ok(Self {
            dtype,
            data,
            validity,
        })
    }

    /// Reuse an existing mask, checking coverage.
    pub fn with_validity(
        dtype: DType,
        data: DeviceBuffer,
        validity: ValidityMask,
    ) -> Result<Self, ColumnError> {
        if dtype.is_extension() {
            return Err(ColumnError::InvalidColumnDtype { dtype });
        }
        if data.len() != validity.len() {
            return Err(ColumnError::MaskLengthMismatch {
                data: data.len(),
                mask: validity.len(),
            });
        }
        Ok(Self {
            dtype,
            data,
            validity,
        })
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.validity.null_count()
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn data(&self) -> &DeviceBuffer {
        &self.data
    }

    /// Materialize one slot: the dtype's missing marker when invalid.
    #[must_use]
    pub fn value(&self, idx: usize) -> Option<Scalar> {
        if idx >= self.len() {
            return None;
        }
        if !self.validity.get(idx) {
            return Some(self.dtype.missing_marker());
        }
        match (self.dtype.category(), self.data.value(idx)) {
            (TypeCategory::Datetime, Some(Scalar::Int(v))) => Some(Scalar::Datetime(v)),
            (_, v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use fc_types::{DType, NullKind, Scalar};

    use super::{
        DeviceBuffer, DeviceColumn, ValidityMask, bitmask_allocation_size_bytes,
    };

    #[test]
    fn allocation_size_is_padded_to_64_bytes() {
        assert_eq!(bitmask_allocation_size_bytes(0), 0);
        assert_eq!(bitmask_allocation_size_bytes(1), 64);
        assert_eq!(bitmask_allocation_size_bytes(512), 64);
        assert_eq!(bitmask_allocation_size_bytes(513), 128);
        assert_eq!(bitmask_allocation_size_bytes(1024), 128);
    }

    #[test]
    fn bitmask_bytes_round_trip_is_lsb_first() {
        // 0b0000_0101 marks rows 0 and 2 valid.
        let mask = ValidityMask::from_bitmask_bytes(&[0b0000_0101], 3);
        assert!(mask.get(0));
        assert!(!mask.get(1));
        assert!(mask.get(2));

        let bytes = mask.to_bitmask_bytes();
        assert_eq!(bytes.len(), bitmask_allocation_size_bytes(3));
        assert_eq!(bytes[0], 0b0000_0101);
    }

    #[test]
    fn mask_boundary_at_word_edges() {
        let mut bits = vec![true; 65];
        bits[64] = false;
        let mask = ValidityMask::from_bools(&bits);
        assert_eq!(mask.len(), 65);
        assert_eq!(mask.count_valid(), 64);
        assert_eq!(mask.null_count(), 1);
        assert!(mask.get(63));
        assert!(!mask.get(64));
    }

    #[test]
    fn mask_set_and_equality() {
        let mut a = ValidityMask::all_invalid(4);
        a.set(1, true);
        let b = ValidityMask::from_bools(&[false, true, false, false]);
        assert_eq!(a, b);
        a.set(1, false);
        assert_ne!(a, b);
    }

    #[test]
    fn mask_serde_round_trip() {
        let mask = ValidityMask::from_bools(&[true, false, true]);
        let json = serde_json::to_string(&mask).expect("serialize");
        assert!(json.contains("\"bits\""));
        let back: ValidityMask = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(mask, back);
    }

    #[test]
    fn from_scalars_marks_missing_invalid() {
        let column = DeviceColumn::from_scalars(
            DType::Float64,
            &[
                Scalar::Float(1.0),
                Scalar::Null(NullKind::NaN),
                Scalar::Float(f64::NAN),
                Scalar::Float(3.0),
            ],
        )
        .expect("column");
        assert_eq!(column.null_count(), 2);
        assert_eq!(column.value(0), Some(Scalar::Float(1.0)));
        assert_eq!(column.value(1), Some(Scalar::Null(NullKind::NaN)));
        assert_eq!(column.value(3), Some(Scalar::Float(3.0)));
    }

    #[test]
    fn masked_payload_is_preserved_but_unreadable() {
        let column = DeviceColumn::from_masked_array(
            DType::Int32,
            DeviceBuffer::Int64(vec![10, 999, 30]),
            &[0b0000_0101],
        )
        .expect("column");
        assert_eq!(column.null_count(), 1);
        // Payload under the cleared bit survives in the buffer...
        assert_eq!(column.data().value(1), Some(Scalar::Int(999)));
        // ...but materializes as missing.
        assert_eq!(column.value(1), Some(Scalar::Null(NullKind::Null)));
    }

    #[test]
    fn extension_dtypes_are_rejected_on_device() {
        let err = DeviceColumn::from_scalars(DType::NullableInt32, &[Scalar::Int(1)])
            .expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "dtype NullableInt32 cannot describe a device column"
        );
    }

    #[test]
    fn datetime_columns_materialize_nat_and_timestamps() {
        let column = DeviceColumn::from_scalars(
            DType::DatetimeMs,
            &[
                Scalar::Datetime(86_400_000),
                Scalar::Null(NullKind::NaT),
            ],
        )
        .expect("column");
        assert_eq!(column.value(0), Some(Scalar::Datetime(86_400_000)));
        assert_eq!(column.value(1), Some(Scalar::Null(NullKind::NaT)));
    }

    #[test]
    fn copy_to_host_preserves_lane_and_length() {
        let buffer = DeviceBuffer::Float64(vec![1.0, 2.0, 3.0]);
        let host = buffer.copy_to_host();
        assert!(host.is_float());
        assert_eq!(host.len(), 3);
    }

    #[test]
    fn oversized_bitmask_padding_is_ignored() {
        let bytes = vec![0xFF_u8; bitmask_allocation_size_bytes(10)];
        let mask = ValidityMask::from_bitmask_bytes(&bytes, 10);
        assert_eq!(mask.len(), 10);
        assert_eq!(mask.count_valid(), 10);
    }
}
