use std::{
    error::Error,
    fmt::{self, Display},
};

use graph::GraphErr;

/// The result type used in the entire training module.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// The training module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainErr {
    Graph(GraphErr),
    NoVariables,
    NoGradients {
        variables: Vec<String>,
    },
    GradientCountMismatch {
        grads: usize,
        vars: usize,
    },
    NoGradientsProvided,
    NotPrepared {
        optimizer: String,
    },
    MissingSlot {
        slot: String,
        variable: String,
    },
}

impl Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrainErr::Graph(e) => format!("graph error: {e}"),
            TrainErr::NoVariables => "No variables to optimize".to_string(),
            TrainErr::NoGradients { variables } => format!(
                "No gradients provided for any variable, check the graph for ops that do not support gradients, between variables {variables:?} and the loss"
            ),
            TrainErr::GradientCountMismatch { grads, vars } => format!(
                "Got {grads} gradients for {vars} variables, every variable must get exactly one"
            ),
            TrainErr::NoGradientsProvided => "No gradients to apply".to_string(),
            TrainErr::NotPrepared { optimizer } => {
                format!("The {optimizer} optimizer was used before being prepared")
            }
            TrainErr::MissingSlot { slot, variable } => {
                format!("There's no {slot} slot for variable {variable}")
            }
        };

        write!(f, "{s}")
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Graph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphErr> for TrainErr {
    fn from(value: GraphErr) -> Self {
        TrainErr::Graph(value)
    }
}
