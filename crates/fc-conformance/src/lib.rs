#![forbid(unsafe_code)]

//! Equivalence oracle for comparing device-produced values against their
//! host-side reference representation.
//!
//! The oracle accepts frames, single columns, raw arrays, and scalars from
//! either side of the device/host divide, materializes everything to the
//! host representation, optionally demotes nullable-extension dtypes to
//! their plain counterparts, and delegates to a strict position-wise
//! comparison that reports the first divergence.

pub mod testutil;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use fc_columnar::{DeviceBuffer, DeviceColumn, HostArray};
use fc_frame::{DeviceFrame, HostFrame, HostSeries, ToHost};
use fc_types::{DType, Scalar, TypeCategory, nullable_to_plain};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Failure taxonomy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonCategory {
    /// Operands are different kinds of value (frame vs. series, ...).
    Kind,
    /// Row count, column count, or column name disagreement.
    Shape,
    /// Dtype disagreement after normalization.
    Type,
    /// Series name disagreement.
    Name,
    /// Position-wise value or validity disagreement.
    Value,
}

fn category_slug(category: ComparisonCategory) -> &'static str {
    match category {
        ComparisonCategory::Kind => "kind",
        ComparisonCategory::Shape => "shape",
        ComparisonCategory::Type => "type",
        ComparisonCategory::Name => "name",
        ComparisonCategory::Value => "value",
    }
}

/// First divergence found by a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub category: ComparisonCategory,
    pub location: String,
    pub left: String,
    pub right: String,
}

impl Mismatch {
    fn new(
        category: ComparisonCategory,
        location: impl Into<String>,
        left: impl fmt::Debug,
        right: impl fmt::Debug,
    ) -> Self {
        Self {
            category,
            location: location.into(),
            left: format!("{left:?}"),
            right: format!("{right:?}"),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatch at {}: left={}, right={}",
            category_slug(self.category),
            self.location,
            self.left,
            self.right
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("comparison failed: {0}")]
    Mismatch(Mismatch),
    #[error("operands compare equal where a difference was expected")]
    UnexpectedEquality,
    #[error("no handling rule for dtype {dtype:?}")]
    UnsupportedDtype { dtype: DType },
}

// ── Comparison subjects ────────────────────────────────────────────────

/// Any value the oracle can compare, device- or host-resident.
#[derive(Debug, Clone)]
pub enum Subject {
    DeviceFrame(DeviceFrame),
    DeviceColumn(DeviceColumn),
    DeviceArray(DeviceBuffer),
    Frame(HostFrame),
    Series(HostSeries),
    Array(HostArray),
    Scalar(Scalar),
}

impl From<DeviceFrame> for Subject {
    fn from(value: DeviceFrame) -> Self {
        Self::DeviceFrame(value)
    }
}

impl From<DeviceColumn> for Subject {
    fn from(value: DeviceColumn) -> Self {
        Self::DeviceColumn(value)
    }
}

impl From<DeviceBuffer> for Subject {
    fn from(value: DeviceBuffer) -> Self {
        Self::DeviceArray(value)
    }
}

impl From<HostFrame> for Subject {
    fn from(value: HostFrame) -> Self {
        Self::Frame(value)
    }
}

impl From<HostSeries> for Subject {
    fn from(value: HostSeries) -> Self {
        Self::Series(value)
    }
}

impl From<HostArray> for Subject {
    fn from(value: HostArray) -> Self {
        Self::Array(value)
    }
}

impl From<Scalar> for Subject {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<f64> for Subject {
    fn from(value: f64) -> Self {
        Self::Scalar(Scalar::Float(value))
    }
}

impl From<i64> for Subject {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int(value))
    }
}

/// Post-materialization form: everything host-resident and eager.
enum HostSubject {
    Frame(HostFrame),
    Series(HostSeries),
    Array(HostArray),
    Scalar(Scalar),
}

impl HostSubject {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Frame(_) => "frame",
            Self::Series(_) => "series",
            Self::Array(_) => "array",
            Self::Scalar(_) => "scalar",
        }
    }
}

impl Subject {
    /// Bridge device-resident operands to the host representation. The
    /// raw-array variant is a blocking device-to-host copy.
    fn materialize(self) -> HostSubject {
        match self {
            Self::DeviceFrame(frame) => HostSubject::Frame(frame.to_host()),
            Self::DeviceColumn(column) => HostSubject::Series(column.to_host()),
            Self::DeviceArray(buffer) => HostSubject::Array(buffer.to_host()),
            Self::Frame(frame) => HostSubject::Frame(frame),
            Self::Series(series) => HostSubject::Series(series),
            Self::Array(array) => HostSubject::Array(array),
            Self::Scalar(scalar) => HostSubject::Scalar(scalar),
        }
    }
}

// ── Options ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Require identical dtypes after normalization.
    pub check_dtype: bool,
    /// Require identical series names.
    pub check_names: bool,
    /// Relative tolerance for float comparison.
    pub rtol: f64,
    /// Absolute tolerance for float comparison.
    pub atol: f64,
    /// Demote nullable-extension dtypes before comparing, so a
    /// validity-masked column and a sentinel-filled plain column can
    /// compare equal.
    pub allow_nullable_normalization: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            check_dtype: true,
            check_names: true,
            rtol: 1e-5,
            atol: 1e-8,
            allow_nullable_normalization: true,
        }
    }
}

// ── Dtype demotion ─────────────────────────────────────────────────────

/// Flatten a nullable-extension series into its plain counterpart.
///
/// Integer dtypes fill missing slots with the dtype's minimum
/// representable value before taking the plain dtype; this keeps integer
/// data integer instead of forcing a float/NaN detour. The sentinel is
/// only distinguishable from real data when the data never contains the
/// dtype minimum; that collision is an accepted precision caveat of the
/// comparison, not something this function detects.
///
/// Boolean and string dtypes flatten to object with an explicit null
/// placeholder at missing slots. Everything else passes through
/// unchanged, which also makes the operation idempotent: a demoted
/// series no longer matches any nullable dtype.
#[must_use]
pub fn demote_series_dtype(series: &HostSeries) -> HostSeries {
    let out_dtype = nullable_to_plain(series.dtype()).unwrap_or(series.dtype());
    match out_dtype.category() {
        TypeCategory::SignedInteger | TypeCategory::UnsignedInteger => {
            match out_dtype.min_value() {
                Some(sentinel) => series.fill_missing(&sentinel).with_dtype(out_dtype),
                None => series.clone(),
            }
        }
        TypeCategory::Boolean | TypeCategory::Object => series.with_dtype(DType::Object),
        _ => series.clone(),
    }
}

/// Column-wise demotion over a whole frame; order and names preserved.
#[must_use]
pub fn demote_frame_dtypes(frame: &HostFrame) -> HostFrame {
    frame.map_columns(demote_series_dtype)
}

// ── Strict comparison backend ──────────────────────────────────────────

fn allclose_f64(left: f64, right: f64, rtol: f64, atol: f64) -> bool {
    if left.is_nan() && right.is_nan() {
        return true;
    }
    if left.is_infinite() || right.is_infinite() {
        return left == right;
    }
    (left - right).abs() <= atol + rtol * right.abs()
}

mod strict {
    use super::{
        CompareOptions, ComparisonCategory, HostFrame, HostSeries, Mismatch, Scalar, allclose_f64,
    };

    fn values_match(
        left: &Scalar,
        right: &Scalar,
        numeric_tolerant: bool,
        options: &CompareOptions,
    ) -> bool {
        if left.is_missing() || right.is_missing() {
            return left.is_missing() && right.is_missing();
        }
        if numeric_tolerant
            && let (Ok(a), Ok(b)) = (left.to_f64(), right.to_f64())
        {
            return allclose_f64(a, b, options.rtol, options.atol);
        }
        left.semantic_eq(right)
    }

    pub(super) fn series_body_match(
        left: &HostSeries,
        right: &HostSeries,
        options: &CompareOptions,
        location: &str,
    ) -> Result<(), Mismatch> {
        if options.check_dtype && left.dtype() != right.dtype() {
            return Err(Mismatch::new(
                ComparisonCategory::Type,
                format!("{location}.dtype"),
                left.dtype(),
                right.dtype(),
            ));
        }
        if left.len() != right.len() {
            return Err(Mismatch::new(
                ComparisonCategory::Shape,
                format!("{location}.len"),
                left.len(),
                right.len(),
            ));
        }

        let numeric_tolerant = left.dtype().is_float() || right.dtype().is_float();
        for (idx, (a, b)) in left.values().iter().zip(right.values()).enumerate() {
            if !values_match(a, b, numeric_tolerant, options) {
                return Err(Mismatch::new(
                    ComparisonCategory::Value,
                    format!("{location}[{idx}]"),
                    a,
                    b,
                ));
            }
        }
        Ok(())
    }

    pub(super) fn assert_series_match(
        left: &HostSeries,
        right: &HostSeries,
        options: &CompareOptions,
    ) -> Result<(), Mismatch> {
        if options.check_names && left.name() != right.name() {
            return Err(Mismatch::new(
                ComparisonCategory::Name,
                "series.name",
                left.name(),
                right.name(),
            ));
        }
        series_body_match(left, right, options, "series")
    }

    pub(super) fn assert_frame_match(
        left: &HostFrame,
        right: &HostFrame,
        options: &CompareOptions,
    ) -> Result<(), Mismatch> {
        if left.column_names() != right.column_names() {
            return Err(Mismatch::new(
                ComparisonCategory::Shape,
                "frame.columns",
                left.column_names(),
                right.column_names(),
            ));
        }
        if left.num_rows() != right.num_rows() {
            return Err(Mismatch::new(
                ComparisonCategory::Shape,
                "frame.rows",
                left.num_rows(),
                right.num_rows(),
            ));
        }
        for (lcol, rcol) in left.columns().iter().zip(right.columns()) {
            let name = lcol.name().unwrap_or_default();
            series_body_match(lcol, rcol, options, &format!("frame[{name:?}]"))?;
        }
        Ok(())
    }
}

fn exact_lane_match<T: PartialEq + fmt::Debug>(
    left: &[T],
    right: &[T],
) -> Result<(), Mismatch> {
    if left.len() != right.len() {
        return Err(Mismatch::new(
            ComparisonCategory::Shape,
            "array.len",
            left.len(),
            right.len(),
        ));
    }
    for (idx, (a, b)) in left.iter().zip(right).enumerate() {
        if a != b {
            return Err(Mismatch::new(
                ComparisonCategory::Value,
                format!("array[{idx}]"),
                a,
                b,
            ));
        }
    }
    Ok(())
}

fn compare_arrays(
    left: &HostArray,
    right: &HostArray,
    options: &CompareOptions,
) -> Result<(), Mismatch> {
    match (left, right) {
        // Float against float tolerates rounding and treats NaN == NaN.
        (HostArray::Float64(l), HostArray::Float64(r)) => {
            if l.len() != r.len() {
                return Err(Mismatch::new(
                    ComparisonCategory::Shape,
                    "array.len",
                    l.len(),
                    r.len(),
                ));
            }
            for (idx, (a, b)) in l.iter().zip(r).enumerate() {
                if !allclose_f64(*a, *b, options.rtol, options.atol) {
                    return Err(Mismatch::new(
                        ComparisonCategory::Value,
                        format!("array[{idx}]"),
                        a,
                        b,
                    ));
                }
            }
            Ok(())
        }
        (HostArray::Int64(l), HostArray::Int64(r)) => exact_lane_match(l, r),
        (HostArray::UInt64(l), HostArray::UInt64(r)) => exact_lane_match(l, r),
        (HostArray::Bool(l), HostArray::Bool(r)) => exact_lane_match(l, r),
        (HostArray::Utf8(l), HostArray::Utf8(r)) => exact_lane_match(l, r),
        _ => Err(Mismatch::new(
            ComparisonCategory::Type,
            "array.lane",
            left,
            right,
        )),
    }
}

fn compare_scalars(
    left: &Scalar,
    right: &Scalar,
    options: &CompareOptions,
) -> Result<(), Mismatch> {
    if left.semantic_eq(right) {
        return Ok(());
    }
    if left.is_nan() && right.is_nan() {
        return Ok(());
    }
    if let (Ok(a), Ok(b)) = (left.to_f64(), right.to_f64())
        && allclose_f64(a, b, options.rtol, options.atol)
    {
        return Ok(());
    }
    Err(Mismatch::new(
        ComparisonCategory::Value,
        "scalar",
        left,
        right,
    ))
}

// ── Oracle entry points ────────────────────────────────────────────────

/// Check that two values are semantically equal.
///
/// Works uniformly for frames, series, raw arrays, and scalars from
/// either side of the device/host divide, so parameterized tests never
/// switch between shape-specific comparison helpers.
pub fn assert_eq(
    left: impl Into<Subject>,
    right: impl Into<Subject>,
) -> Result<(), OracleError> {
    assert_eq_with(left, right, &CompareOptions::default())
}

pub fn assert_eq_with(
    left: impl Into<Subject>,
    right: impl Into<Subject>,
    options: &CompareOptions,
) -> Result<(), OracleError> {
    let left = left.into().materialize();
    let right = right.into().materialize();

    let result = match (left, right) {
        (HostSubject::Frame(l), HostSubject::Frame(r)) => {
            if options.allow_nullable_normalization {
                strict::assert_frame_match(
                    &demote_frame_dtypes(&l),
                    &demote_frame_dtypes(&r),
                    options,
                )
            } else {
                strict::assert_frame_match(&l, &r, options)
            }
        }
        (HostSubject::Series(l), HostSubject::Series(r)) => {
            if options.allow_nullable_normalization {
                strict::assert_series_match(
                    &demote_series_dtype(&l),
                    &demote_series_dtype(&r),
                    options,
                )
            } else {
                strict::assert_series_match(&l, &r, options)
            }
        }
        (HostSubject::Array(l), HostSubject::Array(r)) => compare_arrays(&l, &r, options),
        (HostSubject::Scalar(l), HostSubject::Scalar(r)) => compare_scalars(&l, &r, options),
        (l, r) => Err(Mismatch::new(
            ComparisonCategory::Kind,
            "subject",
            l.kind_name(),
            r.kind_name(),
        )),
    };

    result.map_err(OracleError::Mismatch)
}

/// Check that two values are NOT semantically equal.
///
/// Inverts the comparison outcome only: an unexpected equality fails,
/// a comparison mismatch succeeds, and every other error propagates
/// unchanged.
pub fn assert_neq(
    left: impl Into<Subject>,
    right: impl Into<Subject>,
) -> Result<(), OracleError> {
    assert_neq_with(left, right, &CompareOptions::default())
}

pub fn assert_neq_with(
    left: impl Into<Subject>,
    right: impl Into<Subject>,
    options: &CompareOptions,
) -> Result<(), OracleError> {
    match assert_eq_with(left, right, options) {
        Err(OracleError::Mismatch(_)) => Ok(()),
        Ok(()) => Err(OracleError::UnexpectedEquality),
        Err(other) => Err(other),
    }
}

// ── Suite harness ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub artifact_root: PathBuf,
    pub base_seed: u64,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            artifact_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("artifacts"),
            base_seed: 0xC0FF_EE00,
        }
    }

    #[must_use]
    pub fn suite_report_path(&self) -> PathBuf {
        self.artifact_root.join("oracle_suite.json")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub passed: usize,
    pub failed: usize,
    pub cases: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("artifact io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact encoding failure: {0}")]
    Json(#[from] serde_json::Error),
}

type CaseFn = fn(&HarnessConfig) -> Result<(), String>;

fn case_reflexivity_int_frame(config: &HarnessConfig) -> Result<(), String> {
    let frame = DeviceFrame::from_columns(vec![
        (
            "id".to_owned(),
            testutil::gen_rand_series(DType::Int64, 64, false, config.base_seed)
                .map_err(|e| e.to_string())?,
        ),
        (
            "val".to_owned(),
            testutil::gen_rand_series(DType::Int32, 64, false, config.base_seed + 1)
                .map_err(|e| e.to_string())?,
        ),
    ])
    .map_err(|e| e.to_string())?;

    assert_eq(frame.clone(), frame).map_err(|e| e.to_string())
}

fn case_reflexivity_masked_float_column(config: &HarnessConfig) -> Result<(), String> {
    let column = testutil::gen_rand_series(DType::Float64, 100, true, config.base_seed + 2)
        .map_err(|e| e.to_string())?;
    assert_eq(column.clone(), column).map_err(|e| e.to_string())
}

fn case_demotion_bridges_masked_and_sentinel_ints(_config: &HarnessConfig) -> Result<(), String> {
    let device = DeviceColumn::from_scalars(
        DType::Int32,
        &[
            Scalar::Int(1),
            Scalar::Null(fc_types::NullKind::Null),
            Scalar::Int(3),
        ],
    )
    .map_err(|e| e.to_string())?;

    let reference = HostSeries::new(
        None,
        DType::Int32,
        vec![
            Scalar::Int(1),
            Scalar::Int(i64::from(i32::MIN)),
            Scalar::Int(3),
        ],
    )
    .map_err(|e| e.to_string())?;

    assert_eq(device, reference).map_err(|e| e.to_string())
}

fn case_demotion_off_sees_representation_gap(_config: &HarnessConfig) -> Result<(), String> {
    let device = DeviceColumn::from_scalars(
        DType::Int32,
        &[Scalar::Int(1), Scalar::Null(fc_types::NullKind::Null)],
    )
    .map_err(|e| e.to_string())?;

    let reference = HostSeries::new(
        None,
        DType::Int32,
        vec![Scalar::Int(1), Scalar::Int(i64::from(i32::MIN))],
    )
    .map_err(|e| e.to_string())?;

    let options = CompareOptions {
        allow_nullable_normalization: false,
        ..CompareOptions::default()
    };
    assert_neq_with(device, reference, &options).map_err(|e| e.to_string())
}

fn case_float_arrays_nan_aware(_config: &HarnessConfig) -> Result<(), String> {
    assert_eq(
        HostArray::Float64(vec![1.0, f64::NAN]),
        HostArray::Float64(vec![1.0, f64::NAN]),
    )
    .map_err(|e| e.to_string())?;

    assert_neq(
        HostArray::Float64(vec![1.0, f64::NAN]),
        HostArray::Float64(vec![1.0, 2.0]),
    )
    .map_err(|e| e.to_string())
}

fn case_scalar_rules(_config: &HarnessConfig) -> Result<(), String> {
    assert_eq(f64::NAN, f64::NAN).map_err(|e| e.to_string())?;
    assert_eq(1.0, 1.0 + 1e-9).map_err(|e| e.to_string())?;
    assert_neq(1_i64, 2_i64).map_err(|e| e.to_string())
}

fn case_masked_payload_indifference(_config: &HarnessConfig) -> Result<(), String> {
    // Row 1 is invalid on both sides; its payload differs and must not
    // influence the outcome.
    let left = DeviceColumn::from_masked_array(
        DType::Int64,
        DeviceBuffer::Int64(vec![5, 111, 7]),
        &[0b0000_0101],
    )
    .map_err(|e| e.to_string())?;
    let right = DeviceColumn::from_masked_array(
        DType::Int64,
        DeviceBuffer::Int64(vec![5, 999, 7]),
        &[0b0000_0101],
    )
    .map_err(|e| e.to_string())?;

    assert_eq(left, right).map_err(|e| e.to_string())
}

fn case_generation_rejects_unhandled_dtype(config: &HarnessConfig) -> Result<(), String> {
    match testutil::gen_rand_series(DType::DatetimeMs, 8, false, config.base_seed) {
        Err(OracleError::UnsupportedDtype { dtype }) if dtype == DType::DatetimeMs => Ok(()),
        Err(other) => Err(format!("unexpected error: {other}")),
        Ok(_) => Err("datetime generation should have been rejected".to_owned()),
    }
}

const SUITE_CASES: &[(&str, CaseFn)] = &[
    ("reflexivity_int_frame", case_reflexivity_int_frame),
    (
        "reflexivity_masked_float_column",
        case_reflexivity_masked_float_column,
    ),
    (
        "demotion_bridges_masked_and_sentinel_ints",
        case_demotion_bridges_masked_and_sentinel_ints,
    ),
    (
        "demotion_off_sees_representation_gap",
        case_demotion_off_sees_representation_gap,
    ),
    ("float_arrays_nan_aware", case_float_arrays_nan_aware),
    ("scalar_rules", case_scalar_rules),
    (
        "masked_payload_indifference",
        case_masked_payload_indifference,
    ),
    (
        "generation_rejects_unhandled_dtype",
        case_generation_rejects_unhandled_dtype,
    ),
];

/// Run the built-in oracle property suite and classify each case.
#[must_use]
pub fn run_oracle_suite(config: &HarnessConfig) -> SuiteReport {
    let mut cases = Vec::with_capacity(SUITE_CASES.len());
    let mut passed = 0;
    let mut failed = 0;

    for (case_id, run) in SUITE_CASES {
        let result = run(config);
        match result {
            Ok(()) => {
                passed += 1;
                cases.push(CaseResult {
                    case_id: (*case_id).to_owned(),
                    status: CaseStatus::Pass,
                    mismatch: None,
                });
            }
            Err(message) => {
                failed += 1;
                cases.push(CaseResult {
                    case_id: (*case_id).to_owned(),
                    status: CaseStatus::Fail,
                    mismatch: Some(message),
                });
            }
        }
    }

    SuiteReport {
        suite: "oracle".to_owned(),
        passed,
        failed,
        cases,
    }
}

/// Write a suite report as a pretty-printed JSON artifact.
pub fn write_suite_report(report: &SuiteReport, path: &Path) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_string_pretty(report)?;
    fs::write(path, payload)?;
    Ok(())
}
