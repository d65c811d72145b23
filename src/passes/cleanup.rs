//! Cleanup of training-only and float-bridging operators.
//!
//! Exported graphs arrive with operators that mean nothing to the NPU:
//! dropout (a training-time identity at inference), and the
//! quantize/dequantize pair that bridges the float world at the graph
//! boundary of a quantized model. All three are removed by rewiring
//! producer/consumer directly across them.
//!
//! - dropout: consumers of its output are rewired to read its input.
//! - quantize at a float graph input: the quantized output tensor
//!   becomes the subgraph input and the float tensor disappears.
//! - dequantize at a float graph output: the quantized input tensor
//!   becomes the subgraph output and the float tensor disappears.

use crate::error::{Error, Result};
use crate::ir::{BuiltinOp, Model, OperatorId, TensorType};

use super::OperatorPass;

pub struct Cleanup;

impl Cleanup {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

fn is_float(t: TensorType) -> bool {
    t == TensorType::F32
}

fn is_quantized(t: TensorType) -> bool {
    matches!(t, TensorType::I8 | TensorType::U8 | TensorType::I16)
}

enum Candidate {
    TrainingIdentity,
    InputBridge,
    OutputBridge,
}

fn classify(model: &Model, op: OperatorId) -> Option<Candidate> {
    let operator = model.operator(op);
    if operator.inputs().len() != 1 || operator.outputs().len() != 1 {
        return None;
    }
    let sg = operator.subgraph();
    let input = model.tensor(operator.inputs()[0]);
    let output = model.tensor(operator.outputs()[0]);
    let subgraph = model.subgraph(sg);
    match operator.code().builtin_op()? {
        BuiltinOp::Dropout => {
            if input.ttype() != output.ttype() || input.shape() != output.shape() {
                return None;
            }
            if subgraph.outputs().contains(&operator.outputs()[0]) {
                return None;
            }
            Some(Candidate::TrainingIdentity)
        }
        BuiltinOp::Quantize => {
            // Float graph input feeding only this bridge.
            if !is_float(input.ttype()) || !is_quantized(output.ttype()) {
                return None;
            }
            if !subgraph.inputs().contains(&operator.inputs()[0]) {
                return None;
            }
            if !input.producers().is_empty() || input.consumers() != [op] {
                return None;
            }
            if subgraph.inputs().contains(&operator.outputs()[0]) {
                return None;
            }
            Some(Candidate::InputBridge)
        }
        BuiltinOp::Dequantize => {
            // Float graph output fed only by this bridge.
            if !is_quantized(input.ttype()) || !is_float(output.ttype()) {
                return None;
            }
            if !subgraph.outputs().contains(&operator.outputs()[0]) {
                return None;
            }
            if !output.consumers().is_empty() || output.producers() != [op] {
                return None;
            }
            if subgraph.outputs().contains(&operator.inputs()[0]) {
                return None;
            }
            Some(Candidate::OutputBridge)
        }
        _ => None,
    }
}

impl OperatorPass for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn match_op(&self, model: &Model, op: OperatorId) -> bool {
        classify(model, op).is_some()
    }

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
        let kind = classify(model, op)
            .ok_or_else(|| Error::precondition("mutate called on a non-matching operator"))?;
        let operator = model.operator(op);
        let sg = operator.subgraph();
        let input = operator.inputs()[0];
        let output = operator.outputs()[0];
        match kind {
            Candidate::TrainingIdentity => {
                let consumers = model.tensor(output).consumers().to_vec();
                for consumer in consumers {
                    if consumer != op {
                        model.rewire_input(consumer, output, input)?;
                    }
                }
                model.remove_operator(op)?;
                model.remove_tensor(output)
            }
            Candidate::InputBridge => {
                model.remove_operator(op)?;
                model.replace_subgraph_input(sg, input, output)?;
                model.remove_tensor(input)
            }
            Candidate::OutputBridge => {
                model.remove_operator(op)?;
                model.replace_subgraph_output(sg, output, input)?;
                model.remove_tensor(output)
            }
        }
    }
}
