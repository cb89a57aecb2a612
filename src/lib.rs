//! Fits a linear regression with the graph runtime and its optimizers.

pub mod config;
pub mod regression;
