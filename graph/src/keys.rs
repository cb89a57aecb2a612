/// Standard names for the graph's collections.
///
/// Collections are plain string keyed lists, these constants are the names the
/// runtime and the optimizers agree on.
pub struct GraphKeys;

impl GraphKeys {
    /// Every variable that is shared across sessions, trainable or not.
    pub const GLOBAL_VARIABLES: &'static str = "variables";
    /// Variables local to a single session, e.g. metric accumulators.
    pub const LOCAL_VARIABLES: &'static str = "local_variables";
    /// Variables used by the model's forward pass.
    pub const MODEL_VARIABLES: &'static str = "model_variables";
    /// Variables an optimizer is allowed to update by default.
    pub const TRAINABLE_VARIABLES: &'static str = "trainable_variables";
    /// The resource variables among the trainable ones.
    pub const TRAINABLE_RESOURCE_VARIABLES: &'static str = "trainable_resource_variables";
    pub const SUMMARIES: &'static str = "summaries";
    pub const QUEUE_RUNNERS: &'static str = "queue_runners";
    pub const TABLE_INITIALIZERS: &'static str = "table_initializer";
    pub const ASSET_FILEPATHS: &'static str = "asset_filepaths";
    pub const MOVING_AVERAGE_VARIABLES: &'static str = "moving_average_variables";
    pub const REGULARIZATION_LOSSES: &'static str = "regularization_losses";
    pub const CONCATENATED_VARIABLES: &'static str = "concatenated_variables";
    pub const SAVERS: &'static str = "savers";
    pub const WEIGHTS: &'static str = "weights";
    pub const BIASES: &'static str = "biases";
    pub const ACTIVATIONS: &'static str = "activations";
    /// Ops that must run alongside each training step.
    pub const UPDATE_OPS: &'static str = "update_ops";
    pub const LOSSES: &'static str = "losses";
    /// The ops returned by `apply_gradients`.
    pub const TRAIN_OP: &'static str = "train_op";
    /// The step counter incremented by `apply_gradients`.
    pub const GLOBAL_STEP: &'static str = "global_step";
    pub const EVAL_STEP: &'static str = "eval_step";
    pub const READY_OP: &'static str = "ready_op";
    pub const INIT_OP: &'static str = "init_op";
    pub const LOCAL_INIT_OP: &'static str = "local_init_op";

    /// The collections that hold variables rather than ops.
    pub const VARIABLE_COLLECTIONS: &'static [&'static str] = &[
        Self::GLOBAL_VARIABLES,
        Self::LOCAL_VARIABLES,
        Self::MODEL_VARIABLES,
        Self::TRAINABLE_VARIABLES,
        Self::TRAINABLE_RESOURCE_VARIABLES,
        Self::MOVING_AVERAGE_VARIABLES,
        Self::CONCATENATED_VARIABLES,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_collections_are_distinct() {
        let mut keys = GraphKeys::VARIABLE_COLLECTIONS.to_vec();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), GraphKeys::VARIABLE_COLLECTIONS.len());
        assert!(!keys.contains(&GraphKeys::TRAIN_OP));
    }
}
