use std::env;

use anyhow::Context;
use graph_training::{
    config::TrainConfig,
    regression::{Dataset, LinearRegression},
};
use log::info;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => TrainConfig::from_path(&path)
            .with_context(|| format!("failed to load the config at {path}"))?,
        None => TrainConfig::default(),
    };
    info!("training with {config:?}");

    let dataset = Dataset::synthetic(&config.dataset, config.seed)?;
    let model = LinearRegression::build(&config, config.dataset.features)?;
    let loss = model.fit(&dataset, config.steps, config.log_interval)?;

    let steps = model.global_step()?;
    info!(steps = steps, loss = loss; "training finished");
    println!("true weights: {}", dataset.weights);
    println!("true bias:    {}", dataset.bias);
    println!("weights:      {}", model.weights()?);
    println!("bias:         {}", model.bias()?);
    println!("final loss:   {loss}");

    Ok(())
}
