//! Initial values for variables.

use ndarray::{ArrayD, IxDyn};
use ndarray_rand::{
    RandomExt,
    rand::{SeedableRng, rngs::StdRng},
    rand_distr::{Normal, NormalError, Uniform, uniform::Error as UniformError},
};

use crate::error::GraphErr;

impl From<NormalError> for GraphErr {
    fn from(value: NormalError) -> Self {
        GraphErr::InvalidArgument(value.to_string())
    }
}

impl From<UniformError> for GraphErr {
    fn from(value: UniformError) -> Self {
        GraphErr::InvalidArgument(value.to_string())
    }
}

/// Builds the random number generator for an initializer.
///
/// # Arguments
/// * `seed` - An optional seed for the rng.
///
/// # Returns
/// A seeded rng, or one seeded from the os when no seed is given.
fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

pub fn zeros(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::zeros(IxDyn(shape))
}

pub fn ones(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::ones(IxDyn(shape))
}

/// Samples a tensor from a normal distribution.
///
/// # Arguments
/// * `shape` - The tensor's shape.
/// * `mean` - The distribution's mean.
/// * `std_dev` - The distribution's standard deviation, must be finite.
/// * `seed` - An optional seed for reproducible values.
///
/// # Returns
/// The sampled tensor or an `InvalidArgument` error for a bad `std_dev`.
pub fn random_normal(
    shape: &[usize],
    mean: f32,
    std_dev: f32,
    seed: Option<u64>,
) -> Result<ArrayD<f32>, GraphErr> {
    let dist = Normal::new(mean, std_dev)?;
    let mut rng = generate_rng(seed);
    Ok(ArrayD::random_using(IxDyn(shape), dist, &mut rng))
}

/// Samples a tensor uniformly from `[low, high)`.
pub fn random_uniform(
    shape: &[usize],
    low: f32,
    high: f32,
    seed: Option<u64>,
) -> Result<ArrayD<f32>, GraphErr> {
    let dist = Uniform::new(low, high)?;
    let mut rng = generate_rng(seed);
    Ok(ArrayD::random_using(IxDyn(shape), dist, &mut rng))
}

/// Samples a `(fan_in, fan_out)` matrix with Glorot uniform scaling.
pub fn glorot_uniform(fan_in: usize, fan_out: usize, seed: Option<u64>) -> Result<ArrayD<f32>, GraphErr> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    random_uniform(&[fan_in, fan_out], -limit, limit, seed)
}
