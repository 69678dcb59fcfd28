//! Random test-data generation for driving the oracle.
//!
//! Generation is always seeded so a failing case can be replayed from its
//! report. Value ranges are deliberately small for narrow widths, which
//! keeps generated data well away from the integer-demotion sentinel.

use fc_columnar::{DeviceColumn, bitmask_allocation_size_bytes};
use fc_types::{DType, Scalar};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::OracleError;

/// Dtypes `gen_rand` has a rule for.
pub const SUPPORTED_GENERATION_TYPES: &[DType] = &[
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
];

#[derive(Debug, Clone, Default)]
pub struct GenOptions {
    pub low: Option<i64>,
    pub high: Option<i64>,
    pub positive_only: bool,
}

impl GenOptions {
    fn bounds_or(&self, low: i64, high: i64) -> (i64, i64) {
        (self.low.unwrap_or(low), self.high.unwrap_or(high))
    }
}

fn unit_float(rng: &mut StdRng, options: &GenOptions) -> f64 {
    let v: f64 = rng.random();
    if options.positive_only { v } else { v * 2.0 - 1.0 }
}

/// Generate `size` random scalars of the given dtype.
///
/// Narrow integer widths draw from a tight range; wider widths from a
/// moderate one. Dtypes without a generation rule are rejected.
pub fn gen_rand(
    dtype: DType,
    size: usize,
    options: &GenOptions,
    rng: &mut StdRng,
) -> Result<Vec<Scalar>, OracleError> {
    let values = match dtype {
        DType::Float64 => (0..size)
            .map(|_| Scalar::Float(unit_float(rng, options)))
            .collect(),
        DType::Float32 => (0..size)
            .map(|_| Scalar::Float(f64::from(unit_float(rng, options) as f32)))
            .collect(),
        DType::Int8 | DType::Int16 => {
            let (low, high) = options.bounds_or(-32, 32);
            (0..size)
                .map(|_| Scalar::Int(rng.random_range(low..high)))
                .collect()
        }
        DType::Int32 | DType::Int64 => {
            let (low, high) = options.bounds_or(-10_000, 10_000);
            (0..size)
                .map(|_| Scalar::Int(rng.random_range(low..high)))
                .collect()
        }
        DType::UInt8 | DType::UInt16 => {
            let (low, high) = options.bounds_or(0, 32);
            (0..size)
                .map(|_| Scalar::UInt(rng.random_range(low..high) as u64))
                .collect()
        }
        DType::UInt32 | DType::UInt64 => {
            let (low, high) = options.bounds_or(0, 128);
            (0..size)
                .map(|_| Scalar::UInt(rng.random_range(low..high) as u64))
                .collect()
        }
        DType::Bool => (0..size).map(|_| Scalar::Bool(rng.random())).collect(),
        _ => return Err(OracleError::UnsupportedDtype { dtype }),
    };
    Ok(values)
}

/// Random bitmask bytes sized by the device allocation rule.
pub fn random_bitmask(bits: usize, rng: &mut StdRng) -> Vec<u8> {
    (0..bitmask_allocation_size_bytes(bits))
        .map(|_| rng.random::<u8>())
        .collect()
}

/// Expand packed bitmask bytes into per-row booleans, LSB-first.
#[must_use]
pub fn expand_bits_to_bytes(bytes: &[u8], len: usize) -> Vec<bool> {
    (0..len)
        .map(|idx| {
            bytes
                .get(idx / 8)
                .is_some_and(|byte| (byte >> (idx % 8)) & 1 == 1)
        })
        .collect()
}

/// Count cleared positions in an expanded bitmask (the expected null
/// count of a column masked with it).
#[must_use]
pub fn count_unset_bits(bits: &[bool]) -> usize {
    bits.iter().filter(|&&b| !b).count()
}

/// Generate a seeded random device column, optionally masked by a random
/// validity bitmask.
pub fn gen_rand_series(
    dtype: DType,
    size: usize,
    has_nulls: bool,
    seed: u64,
) -> Result<DeviceColumn, OracleError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let values = gen_rand(dtype, size, &GenOptions::default(), &mut rng)?;
    let column = DeviceColumn::from_scalars(dtype, &values)
        .map_err(|_| OracleError::UnsupportedDtype { dtype })?;
    if !has_nulls {
        return Ok(column);
    }
    let bitmask = random_bitmask(size, &mut rng);
    DeviceColumn::from_masked_array(dtype, column.data().clone(), &bitmask)
        .map_err(|_| OracleError::UnsupportedDtype { dtype })
}
