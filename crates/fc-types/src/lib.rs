#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared column type.
///
/// Plain dtypes describe physical storage with in-band missing markers
/// (NaN for floats, NaT for datetimes). Nullable-extension dtypes carry
/// per-position validity natively and never need a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    DatetimeMs,
    DatetimeUs,
    Object,
    Categorical,
    NullableInt8,
    NullableInt16,
    NullableInt32,
    NullableInt64,
    NullableUInt8,
    NullableUInt16,
    NullableUInt32,
    NullableUInt64,
    NullableBool,
    NullableString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    SignedInteger,
    UnsignedInteger,
    Float,
    Boolean,
    Datetime,
    Object,
    Categorical,
}

impl DType {
    #[must_use]
    pub fn category(self) -> TypeCategory {
        use DType::*;
        match self {
            Int8 | Int16 | Int32 | Int64 | NullableInt8 | NullableInt16 | NullableInt32
            | NullableInt64 => TypeCategory::SignedInteger,
            UInt8 | UInt16 | UInt32 | UInt64 | NullableUInt8 | NullableUInt16 | NullableUInt32
            | NullableUInt64 => TypeCategory::UnsignedInteger,
            Float32 | Float64 => TypeCategory::Float,
            Bool | NullableBool => TypeCategory::Boolean,
            DatetimeMs | DatetimeUs => TypeCategory::Datetime,
            Object | NullableString => TypeCategory::Object,
            Categorical => TypeCategory::Categorical,
        }
    }

    /// Whether this dtype carries validity natively instead of a sentinel.
    #[must_use]
    pub fn is_extension(self) -> bool {
        nullable_to_plain(self).is_some()
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self.category(),
            TypeCategory::SignedInteger | TypeCategory::UnsignedInteger
        )
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self.category(), TypeCategory::Float)
    }

    /// Minimum representable value for plain integer dtypes.
    ///
    /// This is the demotion sentinel: a missing slot in a nullable integer
    /// column is rewritten to this value before the column is flattened to
    /// its plain counterpart.
    #[must_use]
    pub fn min_value(self) -> Option<Scalar> {
        use DType::*;
        match self {
            Int8 => Some(Scalar::Int(i64::from(i8::MIN))),
            Int16 => Some(Scalar::Int(i64::from(i16::MIN))),
            Int32 => Some(Scalar::Int(i64::from(i32::MIN))),
            Int64 => Some(Scalar::Int(i64::MIN)),
            UInt8 | UInt16 | UInt32 | UInt64 => Some(Scalar::UInt(0)),
            _ => None,
        }
    }

    #[must_use]
    pub fn missing_marker(self) -> Scalar {
        match self.category() {
            TypeCategory::Float => Scalar::Null(NullKind::NaN),
            TypeCategory::Datetime => Scalar::Null(NullKind::NaT),
            _ => Scalar::Null(NullKind::Null),
        }
    }
}

// ── Fixed dtype category lists ─────────────────────────────────────────

pub const SIGNED_INTEGER_TYPES: &[DType] =
    &[DType::Int8, DType::Int16, DType::Int32, DType::Int64];
pub const UNSIGNED_INTEGER_TYPES: &[DType] =
    &[DType::UInt8, DType::UInt16, DType::UInt32, DType::UInt64];
pub const INTEGER_TYPES: &[DType] = &[
    DType::Int8,
    DType::Int16,
    DType::Int32,
    DType::Int64,
    DType::UInt8,
    DType::UInt16,
    DType::UInt32,
    DType::UInt64,
];
pub const FLOAT_TYPES: &[DType] = &[DType::Float32, DType::Float64];
pub const NUMERIC_TYPES: &[DType] = &[
    DType::Int8,
    DType::Int16,
    DType::Int32,
    DType::Int64,
    DType::UInt8,
    DType::UInt16,
    DType::UInt32,
    DType::UInt64,
    DType::Float32,
    DType::Float64,
];
pub const DATETIME_TYPES: &[DType] = &[DType::DatetimeMs, DType::DatetimeUs];
pub const OTHER_TYPES: &[DType] = &[DType::Bool, DType::Object, DType::Categorical];
pub const ALL_TYPES: &[DType] = &[
    DType::Int8,
    DType::Int16,
    DType::Int32,
    DType::Int64,
    DType::UInt8,
    DType::UInt16,
    DType::UInt32,
    DType::UInt64,
    DType::Float32,
    DType::Float64,
    DType::Bool,
    DType::DatetimeMs,
    DType::DatetimeUs,
    DType::Object,
    DType::Categorical,
];

// ── Plain ↔ nullable dtype correspondence ──────────────────────────────

/// Canonical plain → nullable pairs. Floats, datetimes and categoricals
/// have no nullable counterpart: their missing markers are in-band.
const DTYPE_PAIRS: &[(DType, DType)] = &[
    (DType::Int8, DType::NullableInt8),
    (DType::Int16, DType::NullableInt16),
    (DType::Int32, DType::NullableInt32),
    (DType::Int64, DType::NullableInt64),
    (DType::UInt8, DType::NullableUInt8),
    (DType::UInt16, DType::NullableUInt16),
    (DType::UInt32, DType::NullableUInt32),
    (DType::UInt64, DType::NullableUInt64),
    (DType::Bool, DType::NullableBool),
    (DType::Object, DType::NullableString),
];

struct DtypeCorrespondence {
    plain_to_nullable: HashMap<DType, DType>,
    nullable_to_plain: HashMap<DType, DType>,
}

static CORRESPONDENCE: LazyLock<DtypeCorrespondence> = LazyLock::new(|| {
    let mut plain_to_nullable = HashMap::with_capacity(DTYPE_PAIRS.len());
    let mut nullable_to_plain = HashMap::with_capacity(DTYPE_PAIRS.len());
    for &(plain, nullable) in DTYPE_PAIRS {
        plain_to_nullable.insert(plain, nullable);
        nullable_to_plain.insert(nullable, plain);
    }
    DtypeCorrespondence {
        plain_to_nullable,
        nullable_to_plain,
    }
});

#[must_use]
pub fn plain_to_nullable(dtype: DType) -> Option<DType> {
    CORRESPONDENCE.plain_to_nullable.get(&dtype).copied()
}

#[must_use]
pub fn nullable_to_plain(dtype: DType) -> Option<DType> {
    CORRESPONDENCE.nullable_to_plain.get(&dtype).copied()
}

// ── Scalars ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
    NaT,
}

/// A single cell value. Width is carried by the column dtype, not the
/// scalar: an `Int16` column stores `Scalar::Int` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Utf8(String),
    Datetime(i64),
}

impl Scalar {
    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Null(NullKind::NaN)) || matches!(self, Self::Float(v) if v.is_nan())
    }

    /// Exact equality with NaN treated as equal to NaN.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Null(NullKind::NaN), Self::Float(v))
            | (Self::Float(v), Self::Null(NullKind::NaN)) => v.is_nan(),
            (Self::Null(_), Self::Null(_)) => true,
            _ => self == other,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int(v) => Ok(*v as f64),
            Self::UInt(v) => Ok(*v as f64),
            Self::Float(v) => Ok(*v),
            Self::Datetime(v) => Ok(*v as f64),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue { value: v.clone() }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("value {value:?} is not numeric")]
    NonNumericValue { value: String },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_nullable_dtype_resolves_to_its_plain_width() {
        assert_eq!(nullable_to_plain(DType::NullableInt16), Some(DType::Int16));
        assert_eq!(
            nullable_to_plain(DType::NullableUInt64),
            Some(DType::UInt64)
        );
        assert_eq!(nullable_to_plain(DType::NullableBool), Some(DType::Bool));
        assert_eq!(
            nullable_to_plain(DType::NullableString),
            Some(DType::Object)
        );
    }

    #[test]
    fn correspondence_is_its_own_inverse() {
        for &dtype in ALL_TYPES {
            if let Some(nullable) = plain_to_nullable(dtype) {
                assert_eq!(nullable_to_plain(nullable), Some(dtype));
            }
        }
    }

    #[test]
    fn floats_and_datetimes_have_no_nullable_counterpart() {
        assert_eq!(plain_to_nullable(DType::Float32), None);
        assert_eq!(plain_to_nullable(DType::Float64), None);
        assert_eq!(plain_to_nullable(DType::DatetimeMs), None);
        assert_eq!(plain_to_nullable(DType::Categorical), None);
    }

    #[test]
    fn min_value_matches_width() {
        assert_eq!(DType::Int8.min_value(), Some(Scalar::Int(-128)));
        assert_eq!(DType::Int32.min_value(), Some(Scalar::Int(-2_147_483_648)));
        assert_eq!(DType::Int64.min_value(), Some(Scalar::Int(i64::MIN)));
        assert_eq!(DType::UInt8.min_value(), Some(Scalar::UInt(0)));
        assert_eq!(DType::Float64.min_value(), None);
        assert_eq!(DType::NullableInt32.min_value(), None);
    }

    #[test]
    fn extension_dtypes_report_plain_category() {
        assert_eq!(
            DType::NullableInt8.category(),
            TypeCategory::SignedInteger
        );
        assert_eq!(
            DType::NullableUInt32.category(),
            TypeCategory::UnsignedInteger
        );
        assert_eq!(DType::NullableBool.category(), TypeCategory::Boolean);
        assert_eq!(DType::NullableString.category(), TypeCategory::Object);
    }

    #[test]
    fn category_lists_cover_all_plain_dtypes() {
        assert_eq!(
            ALL_TYPES.len(),
            NUMERIC_TYPES.len() + DATETIME_TYPES.len() + OTHER_TYPES.len()
        );
        for &dtype in ALL_TYPES {
            assert!(!dtype.is_extension());
        }
        for &dtype in INTEGER_TYPES {
            assert!(dtype.is_integer());
        }
    }

    // ── Scalar missingness ─────────────────────────────────────────────

    #[test]
    fn nan_valued_float_counts_as_missing() {
        assert!(Scalar::Float(f64::NAN).is_missing());
        assert!(Scalar::Null(NullKind::NaT).is_missing());
        assert!(!Scalar::Float(0.0).is_missing());
        assert!(!Scalar::Int(0).is_missing());
    }

    #[test]
    fn semantic_eq_treats_nan_as_equal() {
        assert!(Scalar::Float(f64::NAN).semantic_eq(&Scalar::Float(f64::NAN)));
        assert!(Scalar::Float(f64::NAN).semantic_eq(&Scalar::Null(NullKind::NaN)));
        assert!(!Scalar::Float(f64::NAN).semantic_eq(&Scalar::Float(1.0)));
        assert!(Scalar::Utf8("a".to_owned()).semantic_eq(&Scalar::Utf8("a".to_owned())));
    }

    #[test]
    fn missing_marker_follows_category() {
        assert_eq!(
            DType::Float32.missing_marker(),
            Scalar::Null(NullKind::NaN)
        );
        assert_eq!(
            DType::DatetimeUs.missing_marker(),
            Scalar::Null(NullKind::NaT)
        );
        assert_eq!(DType::Int64.missing_marker(), Scalar::Null(NullKind::Null));
        assert_eq!(
            DType::NullableBool.missing_marker(),
            Scalar::Null(NullKind::Null)
        );
    }

    #[test]
    fn dtype_serde_uses_snake_case() {
        let json = serde_json::to_string(&DType::NullableInt32).expect("serialize");
        assert_eq!(json, "\"nullable_int32\"");
        let back: DType = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, DType::NullableInt32);
    }

    #[test]
    fn to_f64_rejects_missing_and_strings() {
        assert_eq!(Scalar::Bool(true).to_f64(), Ok(1.0));
        assert_eq!(Scalar::UInt(7).to_f64(), Ok(7.0));
        assert!(Scalar::Null(NullKind::Null).to_f64().is_err());
        assert!(Scalar::Utf8("x".to_owned()).to_f64().is_err());
    }
}
