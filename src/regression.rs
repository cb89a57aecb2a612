//! Linear regression trained by minimizing the mean squared error.

use graph::{Graph, Node, Session, Variable, init};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayD};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Uniform};
use training::Result;

use crate::config::{ConfigErr, DatasetConfig, TrainConfig};

/// Builds the random number generator for a run.
///
/// # Arguments
/// * `seed` - An optional seed for the rng.
fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Samples of a noisy linear function.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
    pub weights: Array1<f32>,
    pub bias: f32,
}

impl Dataset {
    /// Samples a random linear function and noisy points of it.
    ///
    /// # Arguments
    /// * `config` - The size of the dataset and its noise.
    /// * `seed` - An optional seed for reproducible datasets.
    ///
    /// # Errors
    /// Returns `ConfigErr::Invalid` if the noise isn't a valid standard
    /// deviation.
    pub fn synthetic(config: &DatasetConfig, seed: Option<u64>) -> std::result::Result<Self, ConfigErr> {
        if !config.noise.is_finite() || config.noise < 0.0 {
            return Err(ConfigErr::Invalid(format!(
                "noise must be a non negative number, got {}",
                config.noise
            )));
        }

        let invalid = |e: &dyn std::error::Error| ConfigErr::Invalid(e.to_string());

        let mut rng = generate_rng(seed);
        let uniform = Uniform::new(-1.0f32, 1.0).map_err(|e| invalid(&e))?;
        let noise = Normal::new(0.0f32, config.noise).map_err(|e| invalid(&e))?;

        let weights = Array1::from_shape_fn(config.features, |_| 2.0 * uniform.sample(&mut rng));
        let bias = uniform.sample(&mut rng);
        let x = Array2::from_shape_fn((config.samples, config.features), |_| uniform.sample(&mut rng));

        let mut y = x.dot(&weights) + bias;
        y.mapv_inplace(|v| v + noise.sample(&mut rng));
        let y = y.insert_axis(ndarray::Axis(1));

        Ok(Self { x, y, weights, bias })
    }
}

/// A linear model `x . w + b` and the op training it.
#[derive(Debug)]
pub struct LinearRegression {
    graph: Graph,
    x: Node,
    y: Node,
    weights: Variable,
    bias: Variable,
    loss: Node,
    train: Node,
    global_step: Variable,
}

impl LinearRegression {
    /// Builds the model's graph.
    ///
    /// # Arguments
    /// * `config` - The optimizer and its options.
    /// * `features` - The amount of input features.
    pub fn build(config: &TrainConfig, features: usize) -> Result<Self> {
        let mut graph = Graph::new();
        let x = graph.placeholder("x")?;
        let y = graph.placeholder("y")?;

        let initial = init::random_normal(&[features, 1], 0.0, 0.1, config.seed)?;
        let (weights, bias) = if config.resource_variables {
            (
                graph.resource_variable("weights", initial, true),
                graph.resource_variable("bias", init::zeros(&[1]), true),
            )
        } else {
            (
                graph.variable("weights", initial, true),
                graph.variable("bias", init::zeros(&[1]), true),
            )
        };

        let loss = graph.with_name_scope("loss", |g| -> Result<Node> {
            let pred = g.matmul(x, weights.node())?;
            let pred = g.add(pred, bias.node())?;
            let err = g.sub(pred, y)?;
            let sq = g.square(err)?;
            Ok(g.mean(sq)?)
        })?;

        let global_step = graph.get_or_create_global_step();
        let mut optimizer = config.optimizer();
        let train = optimizer.minimize(
            &mut graph,
            loss,
            Some(&global_step),
            None,
            &config.gradient_options(),
        )?;

        debug!(
            optimizer = optimizer.name(),
            nodes = graph.len();
            "built linear regression graph"
        );

        Ok(Self {
            graph,
            x,
            y,
            weights,
            bias,
            loss,
            train,
            global_step,
        })
    }

    /// Runs `steps` training steps over the whole dataset.
    ///
    /// # Returns
    /// The loss before the last step.
    pub fn fit(&self, dataset: &Dataset, steps: usize, log_interval: usize) -> Result<f32> {
        let session = Session::new(&self.graph);
        let feeds = [
            (self.x, dataset.x.clone().into_dyn()),
            (self.y, dataset.y.clone().into_dyn()),
        ];

        let mut loss = f32::NAN;
        for step in 1..=steps {
            let out = session.run(&[self.loss, self.train], &feeds)?;
            loss = out[0].sum();

            if step % log_interval.max(1) == 0 {
                info!(step = step, loss = loss; "training");
            }
        }

        Ok(loss)
    }

    /// Evaluates the loss over `dataset` without training.
    pub fn loss(&self, dataset: &Dataset) -> Result<f32> {
        let feeds = [
            (self.x, dataset.x.clone().into_dyn()),
            (self.y, dataset.y.clone().into_dyn()),
        ];

        let out = Session::new(&self.graph).run(&[self.loss], &feeds)?;
        Ok(out[0].sum())
    }

    pub fn weights(&self) -> Result<ArrayD<f32>> {
        Ok(self.graph.value(&self.weights)?)
    }

    pub fn bias(&self) -> Result<ArrayD<f32>> {
        Ok(self.graph.value(&self.bias)?)
    }

    /// Returns the amount of training steps taken so far.
    pub fn global_step(&self) -> Result<f32> {
        Ok(self.graph.value(&self.global_step)?.sum())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_dataset_shapes() {
        let config = DatasetConfig {
            samples: 8,
            features: 2,
            noise: 0.0,
        };
        let dataset = Dataset::synthetic(&config, Some(3)).unwrap();

        assert_eq!(dataset.x.shape(), &[8, 2]);
        assert_eq!(dataset.y.shape(), &[8, 1]);

        // Without noise the targets are exactly the linear function.
        let expected = dataset.x.dot(&dataset.weights) + dataset.bias;
        for (got, want) in dataset.y.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_seeded_datasets_are_reproducible() {
        let config = DatasetConfig::default();
        let a = Dataset::synthetic(&config, Some(11)).unwrap();
        let b = Dataset::synthetic(&config, Some(11)).unwrap();
        assert_eq!(a.x, b.x);
        assert_eq!(a.y, b.y);
    }

    #[test]
    fn test_invalid_noise_is_rejected() {
        for noise in [-1.0, -f32::MIN_POSITIVE, f32::NAN, f32::INFINITY] {
            let config = DatasetConfig {
                noise,
                ..Default::default()
            };
            assert!(
                matches!(Dataset::synthetic(&config, None), Err(ConfigErr::Invalid(_))),
                "noise {noise} was accepted"
            );
        }
    }
}
