use std::fs;

use graph_training::{
    config::{DatasetConfig, OptimizerConfig, TrainConfig},
    regression::{Dataset, LinearRegression},
};

fn config(optimizer: OptimizerConfig) -> TrainConfig {
    TrainConfig {
        optimizer,
        steps: 300,
        seed: Some(7),
        dataset: DatasetConfig {
            samples: 64,
            features: 2,
            noise: 0.0,
        },
        ..Default::default()
    }
}

fn assert_recovers(model: &LinearRegression, dataset: &Dataset) {
    let weights = model.weights().unwrap();
    for (got, want) in weights.iter().zip(&dataset.weights) {
        assert!((got - want).abs() < 5e-2, "weight {got} != {want}");
    }
    let bias = model.bias().unwrap()[[0]];
    assert!((bias - dataset.bias).abs() < 5e-2, "bias {bias} != {}", dataset.bias);
}

#[test]
fn gradient_descent_recovers_the_line() {
    let config = config(OptimizerConfig::GradientDescent { learning_rate: 0.2 });
    let dataset = Dataset::synthetic(&config.dataset, config.seed).unwrap();
    let model = LinearRegression::build(&config, 2).unwrap();

    let before = model.loss(&dataset).unwrap();
    let last = model.fit(&dataset, config.steps, config.log_interval).unwrap();

    assert!(last < before);
    assert!(model.loss(&dataset).unwrap() < 1e-3);
    assert_eq!(model.global_step().unwrap(), 300.0);
    assert_recovers(&model, &dataset);
}

#[test]
fn momentum_on_resource_variables_recovers_the_line() {
    let config = TrainConfig {
        use_locking: true,
        resource_variables: true,
        ..config(OptimizerConfig::Momentum {
            learning_rate: 0.05,
            momentum: 0.9,
            nesterov: true,
        })
    };
    let dataset = Dataset::synthetic(&config.dataset, config.seed).unwrap();
    let model = LinearRegression::build(&config, 2).unwrap();

    model.fit(&dataset, config.steps, config.log_interval).unwrap();

    assert!(model.loss(&dataset).unwrap() < 1e-3);
    assert!(model.graph().find("weights/Momentum").is_some());
    assert_recovers(&model, &dataset);
}

#[test]
fn config_is_loaded_from_a_file() {
    let path = std::env::temp_dir().join("graph_training_config_test.json");
    fs::write(
        &path,
        r#"{
            "optimizer": { "kind": "gradient_descent", "learning_rate": 0.3 },
            "steps": 20,
            "seed": 1,
            "dataset": { "samples": 16, "features": 1, "noise": 0.0 }
        }"#,
    )
    .unwrap();

    let config = TrainConfig::from_path(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(
        config.optimizer,
        OptimizerConfig::GradientDescent { learning_rate: 0.3 }
    );
    let dataset = Dataset::synthetic(&config.dataset, config.seed).unwrap();
    let model = LinearRegression::build(&config, config.dataset.features).unwrap();
    let before = model.loss(&dataset).unwrap();
    model.fit(&dataset, config.steps, config.log_interval).unwrap();
    assert!(model.loss(&dataset).unwrap() < before);
}
