/// How much the gradient computations are allowed to overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateGradients {
    /// No gating, maximum parallelism but the least reproducible results.
    GateNone = 0,
    /// The gradients of an op's inputs are all produced before any of them is
    /// used, removing the races between ops with several inputs.
    #[default]
    GateOp = 1,
    /// Every gradient of every variable is produced before any of them is
    /// used.
    GateGraph = 2,
}

impl GateGradients {
    /// Whether the gradient facility itself gates each op.
    pub(crate) fn gates_ops(self) -> bool {
        self == GateGradients::GateOp
    }
}
