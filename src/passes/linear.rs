//! Fully-connected specialization.
//!
//! Tensor convention for builtin fully_connected: inputs
//! `[data, weights, bias?]` with weights `(out_features, in_features)`,
//! one output whose last dimension is `out_features`.

use crate::error::{Error, Result};
use crate::ir::{BuiltinOp, Model, NpuOp, OperatorId, Options};

use super::conv2d::replace_with_kernel;
use super::{OperatorPass, Policy};

pub struct SpecializeFullyConnected;

impl SpecializeFullyConnected {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }

    fn well_formed(model: &Model, op: OperatorId) -> bool {
        let operator = model.operator(op);
        if operator.code().builtin_op() != Some(BuiltinOp::FullyConnected) {
            return false;
        }
        if operator.inputs().len() < 2 || operator.outputs().len() != 1 {
            return false;
        }
        let weights = model.tensor(operator.inputs()[1]);
        let output = model.tensor(operator.outputs()[0]);
        let &[out_features, in_features] = weights.shape() else {
            return false;
        };
        if in_features == 0 {
            return false;
        }
        output.shape().last() == Some(&out_features)
    }
}

impl OperatorPass for SpecializeFullyConnected {
    fn name(&self) -> &'static str {
        "specialize_fully_connected"
    }

    fn policy(&self) -> Policy {
        Policy::FixedPoint
    }

    fn match_op(&self, model: &Model, op: OperatorId) -> bool {
        Self::well_formed(model, op)
    }

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
        if !Self::well_formed(model, op) {
            return Err(Error::precondition(
                "mutate called on a non-matching operator",
            ));
        }
        replace_with_kernel(model, op, NpuOp::FullyConnected, Options::new())
    }
}
