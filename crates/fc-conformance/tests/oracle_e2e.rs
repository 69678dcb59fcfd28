#![forbid(unsafe_code)]

//! End-to-end scenarios: device columns flowing through host
//! materialization, demotion, and the oracle, plus the suite runner and
//! its report artifact.

use fc_columnar::{DeviceBuffer, DeviceColumn, HostArray};
use fc_conformance::{
    CompareOptions, HarnessConfig, OracleError, run_oracle_suite, testutil, write_suite_report,
};
use fc_frame::{DeviceFrame, HostFrame, HostSeries, ToHost};
use fc_types::{DType, NullKind, Scalar, SIGNED_INTEGER_TYPES, nullable_to_plain, plain_to_nullable};

fn masked_int_column(width: DType) -> DeviceColumn {
    DeviceColumn::from_scalars(
        width,
        &[
            Scalar::Int(1),
            Scalar::Null(NullKind::Null),
            Scalar::Int(3),
        ],
    )
    .expect("column")
}

#[test]
fn masked_ints_equal_sentinel_filled_reference_at_every_width() {
    for &width in SIGNED_INTEGER_TYPES {
        let sentinel = width.min_value().expect("integer minimum");
        let reference = HostSeries::new(
            None,
            width,
            vec![Scalar::Int(1), sentinel, Scalar::Int(3)],
        )
        .expect("reference");

        fc_conformance::assert_eq(masked_int_column(width), reference)
            .unwrap_or_else(|err| panic!("width {width:?}: {err}"));
    }
}

#[test]
fn normalization_can_be_disabled() {
    let device = masked_int_column(DType::Int32);
    let reference = HostSeries::new(
        None,
        DType::Int32,
        vec![
            Scalar::Int(1),
            Scalar::Int(i64::from(i32::MIN)),
            Scalar::Int(3),
        ],
    )
    .expect("reference");

    let options = CompareOptions {
        allow_nullable_normalization: false,
        ..CompareOptions::default()
    };
    // Without demotion the masked side keeps its nullable dtype and the
    // comparison sees the representation gap.
    assert!(fc_conformance::assert_neq_with(device, reference, &options).is_ok());
}

#[test]
fn bool_column_with_nulls_flattens_to_object() {
    let device = DeviceColumn::from_scalars(
        DType::Bool,
        &[
            Scalar::Bool(true),
            Scalar::Null(NullKind::Null),
            Scalar::Bool(false),
        ],
    )
    .expect("column");

    let host = device.to_host();
    assert_eq!(host.dtype(), DType::NullableBool);

    let reference = HostSeries::new(
        None,
        DType::Object,
        vec![
            Scalar::Bool(true),
            Scalar::Null(NullKind::Null),
            Scalar::Bool(false),
        ],
    )
    .expect("reference");

    assert!(fc_conformance::assert_eq(device, reference).is_ok());
}

#[test]
fn differential_frame_comparison_with_random_data() {
    // The "device" result and the host-built reference share the same
    // payloads and validity; only the representations differ.
    let seed = 2024;
    let mut frame = DeviceFrame::new();
    let mut reference = HostFrame::new();

    for (i, &dtype) in [DType::Int64, DType::Float64, DType::UInt32].iter().enumerate() {
        let name = format!("c{i}");
        let column = testutil::gen_rand_series(dtype, 200, true, seed + i as u64)
            .expect("generation");

        let host_dtype = if column.null_count() > 0 && dtype.is_integer() {
            plain_to_nullable(dtype).expect("integer widths have nullable forms")
        } else {
            dtype
        };
        let values: Vec<Scalar> = (0..column.len())
            .map(|idx| column.value(idx).expect("in range"))
            .collect();
        let host = HostSeries::named(name.clone(), host_dtype, values).expect("reference column");

        frame.push(name, column).expect("device column");
        reference.push(host).expect("host column");
    }

    assert!(fc_conformance::assert_eq(frame, reference).is_ok());
}

#[test]
fn float_arrays_compare_nan_aware() {
    assert!(
        fc_conformance::assert_eq(
            HostArray::Float64(vec![1.0, f64::NAN]),
            HostArray::Float64(vec![1.0, f64::NAN]),
        )
        .is_ok()
    );
    assert!(
        fc_conformance::assert_neq(
            HostArray::Float64(vec![1.0, f64::NAN]),
            HostArray::Float64(vec![1.0, 2.0]),
        )
        .is_ok()
    );
}

#[test]
fn device_buffer_is_copied_before_comparison() {
    let device = DeviceBuffer::Int64(vec![1, 2, 3]);
    let host = HostArray::Int64(vec![1, 2, 3]);
    assert!(fc_conformance::assert_eq(device, host).is_ok());
}

#[test]
fn scalar_comparison_rules() {
    assert!(fc_conformance::assert_eq(f64::NAN, f64::NAN).is_ok());
    assert!(fc_conformance::assert_eq(1.0, 1.0 + 1e-9).is_ok());

    let err = fc_conformance::assert_eq(1_i64, 2_i64).expect_err("must fail");
    assert!(matches!(err, OracleError::Mismatch(_)));
}

#[test]
fn payload_under_cleared_bits_never_matters() {
    let bitmask = [0b0000_0011_u8];
    let left = DeviceColumn::from_masked_array(
        DType::Float64,
        DeviceBuffer::Float64(vec![0.5, -0.25, 777.0]),
        &bitmask,
    )
    .expect("left");
    let right = DeviceColumn::from_masked_array(
        DType::Float64,
        DeviceBuffer::Float64(vec![0.5, -0.25, -777.0]),
        &bitmask,
    )
    .expect("right");

    assert!(fc_conformance::assert_eq(left, right).is_ok());
}

#[test]
fn nullable_dtype_resolution_survives_the_full_bridge() {
    // Device column -> host series -> demoted series is the same dtype
    // journey the oracle performs internally.
    let column = masked_int_column(DType::Int16);
    let host = column.to_host();
    assert_eq!(host.dtype(), DType::NullableInt16);
    assert_eq!(nullable_to_plain(host.dtype()), Some(DType::Int16));

    let demoted = fc_conformance::demote_series_dtype(&host);
    assert_eq!(demoted.dtype(), DType::Int16);
    assert_eq!(demoted.values()[1], Scalar::Int(i64::from(i16::MIN)));
}

#[test]
fn suite_runner_writes_a_green_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HarnessConfig {
        artifact_root: dir.path().to_path_buf(),
        base_seed: 7,
    };

    let report = run_oracle_suite(&config);
    assert!(report.is_green(), "failed cases: {:?}", report.cases);

    let path = config.suite_report_path();
    write_suite_report(&report, &path).expect("write report");

    let raw = std::fs::read_to_string(&path).expect("read report");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(parsed["suite"], "oracle");
    assert_eq!(parsed["failed"], 0);
    assert!(parsed["cases"].as_array().is_some_and(|c| !c.is_empty()));
}

#[test]
fn kind_mismatch_is_not_a_value_question() {
    let series = HostSeries::new(None, DType::Int64, vec![Scalar::Int(1)]).expect("series");
    let array = HostArray::Int64(vec![1]);

    let err = fc_conformance::assert_eq(series, array).expect_err("must fail");
    let OracleError::Mismatch(mismatch) = err else {
        panic!("expected mismatch");
    };
    assert_eq!(mismatch.location, "subject");
}
