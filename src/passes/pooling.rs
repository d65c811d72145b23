//! Pooling specialization.
//!
//! The Narwhal pooling kernels slide the window without overlap: stride
//! must equal the pool size and padding must be "valid". Anything else
//! declines and is left for the final lowering check to report.
//!
//! Builtin options: `filter_h`, `filter_w`, `stride_h`, `stride_w` ints
//! and `padding`.

use crate::error::{Error, Result};
use crate::ir::{BuiltinOp, Model, NpuOp, OperatorId, OptionValue, Options};

use super::conv2d::replace_with_kernel;
use super::{OperatorPass, Policy};

pub struct SpecializePooling;

impl SpecializePooling {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }

    fn kernel_for(model: &Model, op: OperatorId) -> Option<(NpuOp, u32, u32)> {
        let operator = model.operator(op);
        let kernel = match operator.code().builtin_op()? {
            BuiltinOp::MaxPool2d => NpuOp::MaxPool2d,
            BuiltinOp::AvgPool2d => NpuOp::AvgPool2d,
            _ => return None,
        };
        if operator.inputs().len() != 1 || operator.outputs().len() != 1 {
            return None;
        }
        let filter_h = operator.builtin_options.get("filter_h")?.as_int()?;
        let filter_w = operator.builtin_options.get("filter_w")?.as_int()?;
        let stride_h = operator.builtin_options.get("stride_h")?.as_int()?;
        let stride_w = operator.builtin_options.get("stride_w")?.as_int()?;
        let padding = operator.builtin_options.get("padding")?.as_str()?;
        if padding != "valid" || filter_h < 1 || filter_w < 1 {
            return None;
        }
        if stride_h != filter_h || stride_w != filter_w {
            return None;
        }
        Some((kernel, filter_h as u32, filter_w as u32))
    }
}

impl OperatorPass for SpecializePooling {
    fn name(&self) -> &'static str {
        "specialize_pooling"
    }

    fn policy(&self) -> Policy {
        Policy::FixedPoint
    }

    fn match_op(&self, model: &Model, op: OperatorId) -> bool {
        Self::kernel_for(model, op).is_some()
    }

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
        let (kernel, filter_h, filter_w) = Self::kernel_for(model, op).ok_or_else(|| {
            Error::precondition("mutate called on a non-matching operator")
        })?;
        let mut custom = Options::new();
        custom.insert(
            "filter".to_string(),
            OptionValue::int_seq([filter_h as i64, filter_w as i64]),
        );
        replace_with_kernel(model, op, kernel, custom)
    }
}
