//! Conv2d kernel specialization.
//!
//! The Narwhal NPU has no generic convolution: each conv must be matched
//! to one of the specialized kernels. The deep kernel wants its output
//! channels in full channel groups; the shallow-input kernel handles
//! small spatial kernels over thin inputs. Preconditions a candidate
//! cannot meet make the pass decline, so unmatched convolutions pass
//! through unchanged and are caught by the final lowering check.
//!
//! Tensor convention for builtin conv2d: inputs `[data, weights, bias?]`
//! with data `(n, h, w, c_in)` and weights `(c_out, k_h, k_w, c_in)`,
//! one output `(n, h_out, w_out, c_out)`. Builtin options: `stride_h`,
//! `stride_w` ints and `padding` of "same" or "valid".

use crate::error::Result;
use crate::ir::{
    BuiltinOp, Model, NpuOp, OperatorCode, OperatorId, OptionValue, Options,
};
use crate::target::TargetConfig;

use super::{OperatorPass, Policy};

/// Parameters shared by the conv matchers, read out of a builtin conv.
pub(crate) struct ConvShape {
    pub stride_h: u32,
    pub stride_w: u32,
    pub same_padding: bool,
    pub k_h: u32,
    pub k_w: u32,
    pub c_in: u32,
    pub c_out: u32,
    pub in_h: u32,
    pub in_w: u32,
    pub out_h: u32,
    pub out_w: u32,
}

impl ConvShape {
    /// Read the candidate's shapes and options. `None` when the
    /// operator is not a well-formed builtin conv2d.
    pub(crate) fn read(model: &Model, op: OperatorId) -> Option<Self> {
        let operator = model.operator(op);
        if operator.code().builtin_op() != Some(BuiltinOp::Conv2d) {
            return None;
        }
        if operator.inputs().len() < 2 || operator.outputs().len() != 1 {
            return None;
        }
        let data = model.tensor(operator.inputs()[0]);
        let weights = model.tensor(operator.inputs()[1]);
        let output = model.tensor(operator.outputs()[0]);
        let (&[_, in_h, in_w, c_in], &[c_out, k_h, k_w, w_c_in], &[_, out_h, out_w, out_c]) =
            (data.shape(), weights.shape(), output.shape())
        else {
            return None;
        };
        if w_c_in != c_in || out_c != c_out {
            return None;
        }
        let stride_h = operator.builtin_options.get("stride_h")?.as_int()?;
        let stride_w = operator.builtin_options.get("stride_w")?.as_int()?;
        let same_padding = match operator.builtin_options.get("padding")?.as_str()? {
            "same" => true,
            "valid" => false,
            _ => return None,
        };
        if stride_h < 1 || stride_w < 1 {
            return None;
        }
        Some(Self {
            stride_h: stride_h as u32,
            stride_w: stride_w as u32,
            same_padding,
            k_h,
            k_w,
            c_in,
            c_out,
            in_h,
            in_w,
            out_h,
            out_w,
        })
    }

    /// Explicit padding amounts `(top, bottom, left, right)` implied by
    /// "same" padding. All zero under "valid".
    pub(crate) fn pad_plan(&self) -> [i64; 4] {
        if !self.same_padding {
            return [0; 4];
        }
        let total = |out: u32, stride: u32, k: u32, input: u32| -> i64 {
            (((out as i64 - 1) * stride as i64) + k as i64 - input as i64).max(0)
        };
        let total_h = total(self.out_h, self.stride_h, self.k_h, self.in_h);
        let total_w = total(self.out_w, self.stride_w, self.k_w, self.in_w);
        let top = total_h / 2;
        let left = total_w / 2;
        [top, total_h - top, left, total_w - left]
    }

    /// Custom options the specialized kernel carries: the stride pair,
    /// plus the padding plan when it is nonzero (consumed later by the
    /// padding-insertion pass).
    pub(crate) fn kernel_options(&self) -> Options {
        let mut options = Options::new();
        options.insert(
            "stride".to_string(),
            OptionValue::int_seq([self.stride_h as i64, self.stride_w as i64]),
        );
        let plan = self.pad_plan();
        if plan.iter().any(|&v| v != 0) {
            options.insert("pad_plan".to_string(), OptionValue::int_seq(plan));
        }
        options
    }
}

/// Swap a matched builtin operator for a Narwhal kernel on the same
/// tensors, at the same position in execution order.
pub(crate) fn replace_with_kernel(
    model: &mut Model,
    op: OperatorId,
    kernel: NpuOp,
    custom_options: Options,
) -> Result<()> {
    let operator = model.operator(op);
    let (sg, inputs, outputs) = (
        operator.subgraph(),
        operator.inputs().to_vec(),
        operator.outputs().to_vec(),
    );
    let new = model.create_operator(
        sg,
        OperatorCode::npu(kernel),
        &inputs,
        &outputs,
        Options::new(),
        custom_options,
    );
    model.replace_operator(op, new)
}

/// Builtin conv2d whose output channels fill whole channel groups →
/// `nw_conv2d_deep`.
pub struct SpecializeConv2dDeep {
    channel_group: u32,
    channel_word: u32,
}

impl SpecializeConv2dDeep {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            channel_group: config.channel_group,
            channel_word: config.channel_word,
        }
    }
}

impl OperatorPass for SpecializeConv2dDeep {
    fn name(&self) -> &'static str {
        "specialize_conv2d_deep"
    }

    fn policy(&self) -> Policy {
        Policy::FixedPoint
    }

    fn match_op(&self, model: &Model, op: OperatorId) -> bool {
        match ConvShape::read(model, op) {
            Some(conv) => {
                conv.c_out % self.channel_group == 0 && conv.c_in % self.channel_word == 0
            }
            None => false,
        }
    }

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
        let conv = ConvShape::read(model, op).ok_or_else(|| {
            crate::error::Error::precondition("mutate called on a non-matching operator")
        })?;
        replace_with_kernel(model, op, NpuOp::Conv2dDeep, conv.kernel_options())
    }
}

/// Builtin conv2d with a small spatial kernel over a thin input →
/// `nw_conv2d_shallowin`. Runs after the deep pass, so deep-eligible
/// convolutions never reach it.
pub struct SpecializeConv2dShallowIn {
    shallow_input_width: u32,
    channel_word: u32,
}

impl SpecializeConv2dShallowIn {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            shallow_input_width: config.shallow_input_width,
            channel_word: config.channel_word,
        }
    }
}

impl OperatorPass for SpecializeConv2dShallowIn {
    fn name(&self) -> &'static str {
        "specialize_conv2d_shallowin"
    }

    fn policy(&self) -> Policy {
        Policy::FixedPoint
    }

    fn match_op(&self, model: &Model, op: OperatorId) -> bool {
        match ConvShape::read(model, op) {
            Some(conv) => {
                conv.c_in * conv.k_w <= self.shallow_input_width
                    && conv.c_in % self.channel_word == 0
            }
            None => false,
        }
    }

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
        let conv = ConvShape::read(model, op).ok_or_else(|| {
            crate::error::Error::precondition("mutate called on a non-matching operator")
        })?;
        replace_with_kernel(model, op, NpuOp::Conv2dShallowIn, conv.kernel_options())
    }
}
