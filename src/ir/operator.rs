//! Operators and their identity codes.
//!
//! An operator's function is named by an `OperatorCode`: either a builtin
//! op from the exchange schema (plus a version), or a target-specific
//! custom opcode string. The Narwhal kernel set is typed as `NpuOp` and
//! rendered to/parsed from its `nw_*` wire strings.

use super::options::Options;
use super::{SubgraphId, TensorId};

/// Builtin operators of the exchange schema that harpoon understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinOp {
    Conv2d,
    DepthwiseConv2d,
    FullyConnected,
    MaxPool2d,
    AvgPool2d,
    Reshape,
    Softmax,
    Pad,
    Quantize,
    Dequantize,
    Dropout,
}

impl BuiltinOp {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinOp::Conv2d => "conv2d",
            BuiltinOp::DepthwiseConv2d => "depthwise_conv2d",
            BuiltinOp::FullyConnected => "fully_connected",
            BuiltinOp::MaxPool2d => "maxpool2d",
            BuiltinOp::AvgPool2d => "avgpool2d",
            BuiltinOp::Reshape => "reshape",
            BuiltinOp::Softmax => "softmax",
            BuiltinOp::Pad => "pad",
            BuiltinOp::Quantize => "quantize",
            BuiltinOp::Dequantize => "dequantize",
            BuiltinOp::Dropout => "dropout",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "conv2d" => BuiltinOp::Conv2d,
            "depthwise_conv2d" => BuiltinOp::DepthwiseConv2d,
            "fully_connected" => BuiltinOp::FullyConnected,
            "maxpool2d" => BuiltinOp::MaxPool2d,
            "avgpool2d" => BuiltinOp::AvgPool2d,
            "reshape" => BuiltinOp::Reshape,
            "softmax" => BuiltinOp::Softmax,
            "pad" => BuiltinOp::Pad,
            "quantize" => BuiltinOp::Quantize,
            "dequantize" => BuiltinOp::Dequantize,
            "dropout" => BuiltinOp::Dropout,
            _ => return None,
        })
    }
}

/// Kernels of the Narwhal NPU instruction set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NpuOp {
    Conv2dDeep,
    Conv2dShallowIn,
    FullyConnected,
    MaxPool2d,
    AvgPool2d,
    Pad,
}

impl NpuOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            NpuOp::Conv2dDeep => "nw_conv2d_deep",
            NpuOp::Conv2dShallowIn => "nw_conv2d_shallowin",
            NpuOp::FullyConnected => "nw_fully_connected",
            NpuOp::MaxPool2d => "nw_maxpool2d",
            NpuOp::AvgPool2d => "nw_avgpool2d",
            NpuOp::Pad => "nw_pad",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "nw_conv2d_deep" => NpuOp::Conv2dDeep,
            "nw_conv2d_shallowin" => NpuOp::Conv2dShallowIn,
            "nw_fully_connected" => NpuOp::FullyConnected,
            "nw_maxpool2d" => NpuOp::MaxPool2d,
            "nw_avgpool2d" => NpuOp::AvgPool2d,
            "nw_pad" => NpuOp::Pad,
            _ => return None,
        })
    }
}

/// Identity tag of an operator's function. Used as the key of the
/// serialized operator-code table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperatorCode {
    Builtin { op: BuiltinOp, version: u32 },
    Custom(String),
}

impl OperatorCode {
    pub fn builtin(op: BuiltinOp) -> Self {
        OperatorCode::Builtin { op, version: 1 }
    }

    pub fn npu(op: NpuOp) -> Self {
        OperatorCode::Custom(op.as_str().to_string())
    }

    /// The Narwhal kernel this code names, if any.
    pub fn npu_op(&self) -> Option<NpuOp> {
        match self {
            OperatorCode::Custom(s) => NpuOp::from_str(s),
            OperatorCode::Builtin { .. } => None,
        }
    }

    pub fn builtin_op(&self) -> Option<BuiltinOp> {
        match self {
            OperatorCode::Builtin { op, .. } => Some(*op),
            OperatorCode::Custom(_) => None,
        }
    }

    /// Short name used when generating operator names.
    pub fn display_name(&self) -> &str {
        match self {
            OperatorCode::Builtin { op, .. } => op.name(),
            OperatorCode::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for OperatorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorCode::Builtin { op, version } => write!(f, "{} v{}", op.name(), version),
            OperatorCode::Custom(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Operator {
    pub(super) name: String,
    pub(super) code: OperatorCode,
    pub(super) inputs: Vec<TensorId>,
    pub(super) outputs: Vec<TensorId>,
    pub builtin_options: Options,
    pub custom_options: Options,
    pub(super) subgraph: SubgraphId,
}

impl Operator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &OperatorCode {
        &self.code
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn subgraph(&self) -> SubgraphId {
        self.subgraph
    }
}
