//! Tensors: typed, shaped, optionally quantized values flowing between
//! operators. Producer/consumer links are id lists maintained exclusively
//! by the `Model` mutators.

use super::{BufferId, OperatorId, SubgraphId};

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U32,
    F32,
    Bool,
    Str,
}

impl TensorType {
    /// Size of one element in bytes. `Str` elements are variable-length.
    pub fn byte_size(&self) -> Option<u32> {
        match self {
            TensorType::I8 | TensorType::U8 | TensorType::Bool => Some(1),
            TensorType::I16 => Some(2),
            TensorType::I32 | TensorType::U32 | TensorType::F32 => Some(4),
            TensorType::I64 => Some(8),
            TensorType::Str => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TensorType::I8 => "i8",
            TensorType::I16 => "i16",
            TensorType::I32 => "i32",
            TensorType::I64 => "i64",
            TensorType::U8 => "u8",
            TensorType::U32 => "u32",
            TensorType::F32 => "f32",
            TensorType::Bool => "bool",
            TensorType::Str => "str",
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => TensorType::I8,
            1 => TensorType::I16,
            2 => TensorType::I32,
            3 => TensorType::I64,
            4 => TensorType::U8,
            5 => TensorType::U32,
            6 => TensorType::F32,
            7 => TensorType::Bool,
            8 => TensorType::Str,
            _ => return None,
        })
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            TensorType::I8 => 0,
            TensorType::I16 => 1,
            TensorType::I32 => 2,
            TensorType::I64 => 3,
            TensorType::U8 => 4,
            TensorType::U32 => 5,
            TensorType::F32 => 6,
            TensorType::Bool => 7,
            TensorType::Str => 8,
        }
    }
}

/// Affine mapping between stored integer values and real numbers.
/// Per-tensor when the arrays hold one entry, per-channel otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantization {
    pub scale: Vec<f32>,
    pub zero_point: Vec<i32>,
    pub quantized_dimension: u32,
}

impl Quantization {
    pub fn per_tensor(scale: f32, zero_point: i32) -> Self {
        Self {
            scale: vec![scale],
            zero_point: vec![zero_point],
            quantized_dimension: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Tensor {
    pub(super) name: String,
    pub(super) ttype: TensorType,
    pub(super) shape: Vec<u32>,
    pub(super) quantization: Option<Quantization>,
    pub(super) buffer: BufferId,
    pub(super) producers: Vec<OperatorId>,
    pub(super) consumers: Vec<OperatorId>,
    pub(super) subgraph: SubgraphId,
}

impl Tensor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttype(&self) -> TensorType {
        self.ttype
    }

    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    pub fn quantization(&self) -> Option<&Quantization> {
        self.quantization.as_ref()
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn producers(&self) -> &[OperatorId] {
        &self.producers
    }

    pub fn consumers(&self) -> &[OperatorId] {
        &self.consumers
    }

    pub fn subgraph(&self) -> SubgraphId {
        self.subgraph
    }

    /// Element count implied by the shape.
    pub fn element_count(&self) -> u64 {
        self.shape.iter().map(|&d| d as u64).product()
    }
}
