//! Binary encode/decode between the IR and the wire format.
//!
//! Layout: magic `HRPN`, schema version, description, buffer section,
//! operator-code table, subgraphs (tensors, input/output index lists,
//! operators with option maps), metadata. The operator-code table is
//! rebuilt on every encode from usage frequency (ties by first-seen
//! order), never preserved verbatim from a decoded artifact, so
//! re-encoding an unmodified model reproduces the same table.
//!
//! The round trip is lossless for every IR field except the description
//! text, which the test equality intentionally ignores.

pub mod varmap;
pub mod wire;

use crate::error::{Error, Result};
use crate::ir::{
    BufferId, BuiltinOp, Model, OperatorCode, SubgraphId, TensorId, TensorInit, TensorType,
    Quantization,
};

use varmap::{decode_options, encode_options};
use wire::{Reader, Writer};

const MAGIC: &[u8; 4] = b"HRPN";

/// The only schema version this build understands. Anything else is
/// rejected with a format error rather than guessed at.
pub const SCHEMA_VERSION: u32 = 3;

const CODE_TAG_BUILTIN: u8 = 0;
const CODE_TAG_CUSTOM: u8 = 1;

// ─── Encode ────────────────────────────────────────────────────────

pub fn encode(model: &Model) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_raw(MAGIC);
    w.put_u32(model.version);
    w.put_str(&model.description);

    let buffers = model.buffer_ids();
    w.put_u32(buffers.len() as u32);
    for &b in &buffers {
        w.put_bytes(model.buffer(b).data());
    }
    let buffer_index = |b: BufferId| -> u32 {
        buffers
            .iter()
            .position(|&x| x == b)
            .expect("tensor references a pruned buffer") as u32
    };

    let codes = model.operator_codes();
    w.put_u32(codes.len() as u32);
    for code in &codes {
        match code {
            OperatorCode::Builtin { op, version } => {
                w.put_u8(CODE_TAG_BUILTIN);
                w.put_str(op.name());
                w.put_u32(*version);
            }
            OperatorCode::Custom(name) => {
                w.put_u8(CODE_TAG_CUSTOM);
                w.put_str(name);
            }
        }
    }

    let subgraphs: Vec<SubgraphId> = model.subgraph_ids().collect();
    w.put_u32(subgraphs.len() as u32);
    for &sg_id in &subgraphs {
        let sg = model.subgraph(sg_id);
        w.put_str(sg.name());

        let tensor_index = |t: TensorId| -> u32 {
            sg.tensors()
                .iter()
                .position(|&x| x == t)
                .expect("operator references a foreign tensor") as u32
        };

        w.put_u32(sg.tensors().len() as u32);
        for &t_id in sg.tensors() {
            let t = model.tensor(t_id);
            w.put_str(t.name());
            w.put_u8(t.ttype().tag());
            w.put_u32(t.shape().len() as u32);
            for &dim in t.shape() {
                w.put_u32(dim);
            }
            match t.quantization() {
                Some(q) => {
                    w.put_u8(1);
                    w.put_u32(q.scale.len() as u32);
                    for &s in &q.scale {
                        w.put_f32(s);
                    }
                    w.put_u32(q.zero_point.len() as u32);
                    for &z in &q.zero_point {
                        w.put_i32(z);
                    }
                    w.put_u32(q.quantized_dimension);
                }
                None => w.put_u8(0),
            }
            w.put_u32(buffer_index(t.buffer()));
        }

        for list in [sg.inputs(), sg.outputs()] {
            w.put_u32(list.len() as u32);
            for &t in list {
                w.put_u32(tensor_index(t));
            }
        }

        w.put_u32(sg.operators().len() as u32);
        for &op_id in sg.operators() {
            let op = model.operator(op_id);
            let code_index = codes
                .iter()
                .position(|c| c == op.code())
                .expect("operator code missing from the rebuilt table");
            w.put_u32(code_index as u32);
            for list in [op.inputs(), op.outputs()] {
                w.put_u32(list.len() as u32);
                for &t in list {
                    w.put_u32(tensor_index(t));
                }
            }
            encode_options(&op.builtin_options, &mut w);
            encode_options(&op.custom_options, &mut w);
        }
    }

    w.put_u32(model.metadata_entries().len() as u32);
    for m in model.metadata_entries() {
        w.put_str(m.name());
        w.put_u32(buffer_index(m.buffer()));
    }

    w.into_bytes()
}

// ─── Decode ────────────────────────────────────────────────────────

pub fn decode(bytes: &[u8]) -> Result<Model> {
    let mut r = Reader::new(bytes);
    let magic = r.get_raw(4)?;
    if magic != MAGIC {
        return Err(Error::format("not a Narwhal model artifact (bad magic)"));
    }
    let version = r.get_u32()?;
    if version != SCHEMA_VERSION {
        return Err(Error::format(format!(
            "unsupported schema version {version} (expected {SCHEMA_VERSION})"
        )));
    }
    let description = r.get_str()?;
    let mut model = Model::new(version, description);

    let buffer_count = r.get_u32()?;
    let mut buffers = Vec::with_capacity(buffer_count as usize);
    for _ in 0..buffer_count {
        let data = r.get_bytes()?;
        buffers.push(model.create_buffer(data));
    }
    let buffer_at = |idx: u32| -> Result<BufferId> {
        buffers
            .get(idx as usize)
            .copied()
            .ok_or_else(|| Error::format(format!("buffer index {idx} out of range")))
    };

    let code_count = r.get_u32()?;
    let mut codes = Vec::with_capacity(code_count as usize);
    for _ in 0..code_count {
        let tag = r.get_u8()?;
        let code = match tag {
            CODE_TAG_BUILTIN => {
                let name = r.get_str()?;
                let version = r.get_u32()?;
                let op = BuiltinOp::from_name(&name)
                    .ok_or_else(|| Error::format(format!("unknown builtin operator '{name}'")))?;
                OperatorCode::Builtin { op, version }
            }
            CODE_TAG_CUSTOM => OperatorCode::Custom(r.get_str()?),
            other => {
                return Err(Error::format(format!("unknown operator-code tag {other}")));
            }
        };
        codes.push(code);
    }

    let subgraph_count = r.get_u32()?;
    for _ in 0..subgraph_count {
        let name = r.get_str()?;
        let sg = model.create_subgraph(name);
        decode_subgraph(&mut r, &mut model, sg, &codes, &buffer_at)?;
    }

    let metadata_count = r.get_u32()?;
    for _ in 0..metadata_count {
        let name = r.get_str()?;
        let buffer = buffer_at(r.get_u32()?)?;
        model.create_metadata(name, Some(buffer));
    }

    if !r.is_exhausted() {
        return Err(Error::format("trailing bytes after model payload"));
    }
    Ok(model)
}

fn decode_subgraph(
    r: &mut Reader,
    model: &mut Model,
    sg: SubgraphId,
    codes: &[OperatorCode],
    buffer_at: &dyn Fn(u32) -> Result<BufferId>,
) -> Result<()> {
    let tensor_count = r.get_u32()?;
    let mut tensors = Vec::with_capacity(tensor_count as usize);
    for _ in 0..tensor_count {
        let name = r.get_str()?;
        if model.get_tensor(sg, &name).is_some() {
            return Err(Error::format(format!("duplicate tensor name '{name}'")));
        }
        let type_tag = r.get_u8()?;
        let ttype = TensorType::from_tag(type_tag)
            .ok_or_else(|| Error::format(format!("unknown tensor type tag {type_tag}")))?;
        let dim_count = r.get_u32()?;
        let mut shape = Vec::with_capacity(dim_count as usize);
        for _ in 0..dim_count {
            shape.push(r.get_u32()?);
        }
        let quantization = match r.get_u8()? {
            0 => None,
            1 => {
                let scale_count = r.get_u32()?;
                let mut scale = Vec::with_capacity(scale_count as usize);
                for _ in 0..scale_count {
                    scale.push(r.get_f32()?);
                }
                let zero_count = r.get_u32()?;
                let mut zero_point = Vec::with_capacity(zero_count as usize);
                for _ in 0..zero_count {
                    zero_point.push(r.get_i32()?);
                }
                let quantized_dimension = r.get_u32()?;
                Some(Quantization {
                    scale,
                    zero_point,
                    quantized_dimension,
                })
            }
            other => {
                return Err(Error::format(format!("invalid quantization flag {other}")));
            }
        };
        let buffer = buffer_at(r.get_u32()?)?;
        tensors.push(model.create_tensor(
            sg,
            &name,
            ttype,
            shape,
            TensorInit {
                buffer: Some(buffer),
                quantization,
                ..TensorInit::default()
            },
        ));
    }

    let tensor_at = |idx: u32| -> Result<TensorId> {
        tensors
            .get(idx as usize)
            .copied()
            .ok_or_else(|| Error::format(format!("tensor index {idx} out of range")))
    };

    let input_count = r.get_u32()?;
    for _ in 0..input_count {
        let t = tensor_at(r.get_u32()?)?;
        model
            .mark_input(sg, t)
            .map_err(|e| Error::format(format!("invalid input list: {e}")))?;
    }
    let output_count = r.get_u32()?;
    for _ in 0..output_count {
        let t = tensor_at(r.get_u32()?)?;
        model
            .mark_output(sg, t)
            .map_err(|e| Error::format(format!("invalid output list: {e}")))?;
    }

    let op_count = r.get_u32()?;
    for _ in 0..op_count {
        let code_idx = r.get_u32()?;
        let code = codes
            .get(code_idx as usize)
            .cloned()
            .ok_or_else(|| Error::format(format!("operator-code index {code_idx} out of range")))?;
        let input_count = r.get_u32()?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            inputs.push(tensor_at(r.get_u32()?)?);
        }
        let output_count = r.get_u32()?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            outputs.push(tensor_at(r.get_u32()?)?);
        }
        let builtin_options = decode_options(r)?;
        let custom_options = decode_options(r)?;
        model.create_operator(sg, code, &inputs, &outputs, builtin_options, custom_options);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{OptionValue, Options};

    fn sample_model() -> Model {
        let mut model = Model::new(SCHEMA_VERSION, "sample network");
        let sg = model.create_subgraph("main");
        let weights_buf = model.create_buffer(vec![7; 36]);
        let input = model.create_tensor(
            sg,
            "input",
            TensorType::I8,
            vec![1, 3, 3, 4],
            TensorInit {
                quantization: Some(Quantization::per_tensor(0.02, -1)),
                is_input: true,
                ..TensorInit::default()
            },
        );
        let weights = model.create_tensor(
            sg,
            "weights",
            TensorType::I8,
            vec![4, 1, 1, 4],
            TensorInit {
                buffer: Some(weights_buf),
                quantization: Some(Quantization {
                    scale: vec![0.5, 0.25, 0.5, 0.125],
                    zero_point: vec![0, 0, 0, 0],
                    quantized_dimension: 0,
                }),
                ..TensorInit::default()
            },
        );
        let output = model.create_tensor(
            sg,
            "output",
            TensorType::I8,
            vec![1, 3, 3, 4],
            TensorInit {
                quantization: Some(Quantization::per_tensor(0.04, 2)),
                is_output: true,
                ..TensorInit::default()
            },
        );
        let mut builtin = Options::new();
        builtin.insert("stride_h".to_string(), OptionValue::Int(1));
        builtin.insert("stride_w".to_string(), OptionValue::Int(1));
        builtin.insert("padding".to_string(), OptionValue::from("valid"));
        model.create_operator(
            sg,
            OperatorCode::builtin(BuiltinOp::Conv2d),
            &[input, weights],
            &[output],
            builtin,
            Options::new(),
        );
        model.create_metadata("exporter", None);
        model
    }

    #[test]
    fn round_trip_is_lossless() {
        let model = sample_model();
        let bytes = encode(&model);
        let decoded = decode(&bytes).unwrap();
        decoded.sanity_check().unwrap();
        assert!(model.logical_eq(&decoded));
        // Property 1: decode ∘ encode ∘ decode == decode.
        let again = decode(&encode(&decoded)).unwrap();
        assert!(decoded.logical_eq(&again));
    }

    #[test]
    fn description_is_excluded_from_equality() {
        let model = sample_model();
        let mut other = decode(&encode(&model)).unwrap();
        other.description = "rewritten for the NPU".to_string();
        assert!(model.logical_eq(&other));
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let model = sample_model();
        let mut bytes = encode(&model);
        // Patch the version field (after the 4-byte magic).
        bytes[4..8].copy_from_slice(&9u32.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        match err {
            Error::Format(msg) => assert!(msg.contains("unsupported schema version 9")),
            other => panic!("expected format error, got {other}"),
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = decode(b"NOPE\x03\x00\x00\x00").unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&sample_model());
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn encode_is_deterministic() {
        let model = sample_model();
        assert_eq!(encode(&model), encode(&model));
        let decoded = decode(&encode(&model)).unwrap();
        assert_eq!(encode(&model), encode(&decoded));
    }

    #[test]
    fn operator_code_table_is_rebuilt_by_frequency() {
        let mut model = Model::new(SCHEMA_VERSION, "");
        let sg = model.create_subgraph("main");
        let t = model.create_tensor(sg, "t", TensorType::I8, vec![1], TensorInit::default());
        let softmax = OperatorCode::builtin(BuiltinOp::Softmax);
        let reshape = OperatorCode::builtin(BuiltinOp::Reshape);
        model.create_operator(
            sg,
            softmax.clone(),
            &[t],
            &[],
            Options::new(),
            Options::new(),
        );
        model.create_operator(
            sg,
            reshape.clone(),
            &[t],
            &[],
            Options::new(),
            Options::new(),
        );
        model.create_operator(sg, reshape, &[t], &[], Options::new(), Options::new());
        let decoded = decode(&encode(&model)).unwrap();
        assert_eq!(
            decoded.operator_codes(),
            vec![
                OperatorCode::builtin(BuiltinOp::Reshape),
                OperatorCode::builtin(BuiltinOp::Softmax),
            ]
        );
    }
}
