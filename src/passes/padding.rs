//! Explicit padding insertion.
//!
//! Specialized kernels record the padding their "same" mode implies as a
//! `pad_plan` custom option; the kernels themselves only read unpadded
//! input. This pass materializes each plan as one `nw_pad` operator
//! right before the consumer — two chained ones when a per-edge amount
//! exceeds what a single pad operator can express — producing fresh
//! intermediate tensors and rewiring the consumer to the last pad's
//! output. The consumed `pad_plan` key is deleted, which is what makes
//! the fixed point converge: pad operators themselves never carry one.

use crate::error::{Error, Result};
use crate::ir::{
    Model, NpuOp, OperatorCode, OperatorId, OptionValue, Options, TensorId, TensorInit,
    Position,
};
use crate::target::TargetConfig;

use super::{OperatorPass, Policy};

pub struct InsertPadding {
    pad_range: u32,
}

impl InsertPadding {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            pad_range: config.pad_range,
        }
    }

    fn plan_of(model: &Model, op: OperatorId) -> Option<[i64; 4]> {
        let operator = model.operator(op);
        operator.code().npu_op()?;
        let plan = operator.custom_options.get("pad_plan")?.as_int_seq()?;
        let &[top, bottom, left, right] = plan.as_slice() else {
            return None;
        };
        if plan.iter().any(|&v| v < 0) {
            return None;
        }
        Some([top, bottom, left, right])
    }

    /// Create one `nw_pad` operator reading `src` and producing a fresh
    /// intermediate tensor, positioned immediately before `consumer`.
    fn emit_pad(
        &self,
        model: &mut Model,
        consumer: OperatorId,
        src: TensorId,
        amounts: [i64; 4],
    ) -> Result<TensorId> {
        let (sg, name, ttype, quantization, shape) = {
            let tensor = model.tensor(src);
            let &[n, h, w, c] = tensor.shape() else {
                return Err(Error::precondition(format!(
                    "pad insertion needs a rank-4 input, tensor '{}' has rank {}",
                    tensor.name(),
                    tensor.shape().len()
                )));
            };
            let [top, bottom, left, right] = amounts;
            (
                tensor.subgraph(),
                format!("{}_padded", tensor.name()),
                tensor.ttype(),
                tensor.quantization().cloned(),
                vec![
                    n,
                    h + top as u32 + bottom as u32,
                    w + left as u32 + right as u32,
                    c,
                ],
            )
        };
        let padded = model.create_tensor(
            sg,
            &name,
            ttype,
            shape,
            TensorInit {
                quantization,
                ..TensorInit::default()
            },
        );
        let mut custom = Options::new();
        custom.insert("pads".to_string(), OptionValue::int_seq(amounts));
        let pad_op = model.create_operator(
            sg,
            OperatorCode::npu(NpuOp::Pad),
            &[src],
            &[padded],
            Options::new(),
            custom,
        );
        model.insert_operator(consumer, pad_op, Position::Before)?;
        Ok(padded)
    }
}

impl OperatorPass for InsertPadding {
    fn name(&self) -> &'static str {
        "insert_padding"
    }

    fn policy(&self) -> Policy {
        Policy::FixedPoint
    }

    fn match_op(&self, model: &Model, op: OperatorId) -> bool {
        Self::plan_of(model, op).is_some()
    }

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
        let plan = Self::plan_of(model, op)
            .ok_or_else(|| Error::precondition("mutate called on a non-matching operator"))?;
        let input = model.operator(op).inputs()[0];

        let cap = self.pad_range as i64;
        let mut remaining = plan;
        let mut src = input;
        while remaining.iter().any(|&v| v != 0) {
            let step = remaining.map(|v| v.min(cap));
            src = self.emit_pad(model, op, src, step)?;
            for (left, done) in remaining.iter_mut().zip(step) {
                *left -= done;
            }
        }
        if src != input {
            model.rewire_input(op, input, src)?;
        }
        model.operator_mut(op).custom_options.remove("pad_plan");
        Ok(())
    }
}
