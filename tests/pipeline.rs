//! End-to-end pipeline tests over the public API: build an artifact,
//! convert it, and check what the runtime would receive.

use harpoon::ir::{
    BuiltinOp, Model, NpuOp, OperatorCode, OptionValue, Options, Quantization, SubgraphId,
    TensorId, TensorInit, TensorType,
};
use harpoon::{codec, listing, ConvertOptions};

fn conv_options(stride: u32, padding: &str) -> Options {
    let mut options = Options::new();
    options.insert("stride_h".to_string(), OptionValue::Int(stride as i64));
    options.insert("stride_w".to_string(), OptionValue::Int(stride as i64));
    options.insert("padding".to_string(), OptionValue::from(padding));
    options
}

fn quantized(model: &mut Model, sg: SubgraphId, name: &str, shape: Vec<u32>) -> TensorId {
    model.create_tensor(
        sg,
        name,
        TensorType::I8,
        shape,
        TensorInit {
            quantization: Some(Quantization::per_tensor(0.03, 0)),
            ..TensorInit::default()
        },
    )
}

fn constant(model: &mut Model, sg: SubgraphId, name: &str, shape: Vec<u32>, data: Vec<u8>) -> TensorId {
    let buffer = model.create_buffer(data);
    model.create_tensor(
        sg,
        name,
        TensorType::I8,
        shape,
        TensorInit {
            buffer: Some(buffer),
            ..TensorInit::default()
        },
    )
}

/// Input (1,5,5,4), 4 output channels, valid padding — the shallow-input
/// scenario.
fn shallow_conv_artifact() -> Vec<u8> {
    let mut model = Model::new(codec::SCHEMA_VERSION, "shallow conv");
    let sg = model.create_subgraph("main");
    let input = model.create_tensor(
        sg,
        "input",
        TensorType::I8,
        vec![1, 5, 5, 4],
        TensorInit {
            quantization: Some(Quantization::per_tensor(0.03, 0)),
            is_input: true,
            ..TensorInit::default()
        },
    );
    let weights = constant(&mut model, sg, "weights", vec![4, 3, 3, 4], vec![1; 144]);
    let bias_buffer = model.create_buffer(vec![0; 16]);
    let bias = model.create_tensor(
        sg,
        "bias",
        TensorType::I32,
        vec![4],
        TensorInit {
            buffer: Some(bias_buffer),
            ..TensorInit::default()
        },
    );
    let output = model.create_tensor(
        sg,
        "output",
        TensorType::I8,
        vec![1, 3, 3, 4],
        TensorInit {
            quantization: Some(Quantization::per_tensor(0.05, 0)),
            is_output: true,
            ..TensorInit::default()
        },
    );
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::Conv2d),
        &[input, weights, bias],
        &[output],
        conv_options(1, "valid"),
        Options::new(),
    );
    codec::encode(&model)
}

/// A small float-bridged network exercising every pass: quantize →
/// conv2d (deep, same padding) → maxpool → dropout → reshape →
/// fully_connected → dequantize.
fn full_network_artifact() -> Vec<u8> {
    let mut model = Model::new(codec::SCHEMA_VERSION, "full network");
    let sg = model.create_subgraph("main");

    let f_in = model.create_tensor(
        sg,
        "f_in",
        TensorType::F32,
        vec![1, 8, 8, 4],
        TensorInit {
            is_input: true,
            ..TensorInit::default()
        },
    );
    let q_in = quantized(&mut model, sg, "q_in", vec![1, 8, 8, 4]);
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::Quantize),
        &[f_in],
        &[q_in],
        Options::new(),
        Options::new(),
    );

    let conv_w = constant(&mut model, sg, "conv_w", vec![32, 3, 3, 4], vec![2; 1152]);
    let conv_b_buffer = model.create_buffer(vec![0; 128]);
    let conv_b = model.create_tensor(
        sg,
        "conv_b",
        TensorType::I32,
        vec![32],
        TensorInit {
            buffer: Some(conv_b_buffer),
            ..TensorInit::default()
        },
    );
    let conv_out = quantized(&mut model, sg, "conv_out", vec![1, 8, 8, 32]);
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::Conv2d),
        &[q_in, conv_w, conv_b],
        &[conv_out],
        conv_options(1, "same"),
        Options::new(),
    );

    let pool_out = quantized(&mut model, sg, "pool_out", vec![1, 4, 4, 32]);
    let mut pool_options = Options::new();
    for key in ["filter_h", "filter_w", "stride_h", "stride_w"] {
        pool_options.insert(key.to_string(), OptionValue::Int(2));
    }
    pool_options.insert("padding".to_string(), OptionValue::from("valid"));
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::MaxPool2d),
        &[conv_out],
        &[pool_out],
        pool_options,
        Options::new(),
    );

    let drop_out = quantized(&mut model, sg, "drop_out", vec![1, 4, 4, 32]);
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::Dropout),
        &[pool_out],
        &[drop_out],
        Options::new(),
        Options::new(),
    );

    let flat = quantized(&mut model, sg, "flat", vec![1, 512]);
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::Reshape),
        &[drop_out],
        &[flat],
        Options::new(),
        Options::new(),
    );

    let fc_w = constant(&mut model, sg, "fc_w", vec![10, 512], vec![3; 5120]);
    let fc_out = quantized(&mut model, sg, "fc_out", vec![1, 10]);
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::FullyConnected),
        &[flat, fc_w],
        &[fc_out],
        Options::new(),
        Options::new(),
    );

    let f_out = model.create_tensor(
        sg,
        "f_out",
        TensorType::F32,
        vec![1, 10],
        TensorInit {
            is_output: true,
            ..TensorInit::default()
        },
    );
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::Dequantize),
        &[fc_out],
        &[f_out],
        Options::new(),
        Options::new(),
    );

    codec::encode(&model)
}

fn kernels_of(model: &Model) -> Vec<String> {
    let sg = model.subgraph_ids().next().unwrap();
    model
        .subgraph(sg)
        .operators()
        .iter()
        .map(|&op| model.operator(op).code().to_string())
        .collect()
}

#[test]
fn full_network_lowers_onto_the_kernel_set() {
    let artifact = full_network_artifact();
    let converted = harpoon::convert(&artifact, &ConvertOptions::default()).unwrap();
    let model = codec::decode(&converted).unwrap();
    model.sanity_check().unwrap();

    assert_eq!(
        kernels_of(&model),
        vec![
            "nw_pad",
            "nw_conv2d_deep",
            "nw_maxpool2d",
            "reshape v1",
            "nw_fully_connected",
        ]
    );

    // The float bridges are gone: the boundary is quantized now.
    let sg = model.subgraph_ids().next().unwrap();
    let inputs = model.subgraph(sg).inputs().to_vec();
    let outputs = model.subgraph(sg).outputs().to_vec();
    assert_eq!(model.tensor(inputs[0]).ttype(), TensorType::I8);
    assert_eq!(model.tensor(outputs[0]).ttype(), TensorType::I8);

    // Every compute kernel carries its thread annotation.
    for &op_id in model.subgraph(sg).operators() {
        let op = model.operator(op_id);
        let expects_par = matches!(
            op.code().npu_op(),
            Some(NpuOp::Conv2dDeep | NpuOp::MaxPool2d | NpuOp::FullyConnected)
        );
        assert_eq!(op.custom_options.contains_key("par"), expects_par, "{}", op.name());
    }

    // The converter stamped its version.
    let stamp = model.get_metadata(harpoon::VERSION_METADATA_KEY).unwrap();
    assert_eq!(
        model.buffer(stamp.buffer()).data(),
        env!("CARGO_PKG_VERSION").as_bytes()
    );

    // Dedup collapsed all empty activation buffers into one.
    let empty_buffers = model
        .buffer_ids()
        .into_iter()
        .filter(|&b| model.buffer(b).is_empty())
        .count();
    assert_eq!(empty_buffers, 1);
}

#[test]
fn conversion_is_idempotent() {
    let artifact = full_network_artifact();
    let options = ConvertOptions::default();
    let once = harpoon::convert(&artifact, &options).unwrap();
    let twice = harpoon::convert(&once, &options).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn round_trip_is_byte_stable() {
    let artifact = full_network_artifact();
    let converted = harpoon::convert(&artifact, &ConvertOptions::default()).unwrap();
    let model = codec::decode(&converted).unwrap();
    assert_eq!(codec::encode(&model), converted);

    // Logical equality under the test relation, too.
    let again = codec::decode(&codec::encode(&model)).unwrap();
    assert!(model.logical_eq(&again));
}

#[test]
fn artifacts_survive_the_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.nwm");
    let artifact = full_network_artifact();
    let converted = harpoon::convert(&artifact, &ConvertOptions::default()).unwrap();
    std::fs::write(&path, &converted).unwrap();
    let reread = std::fs::read(&path).unwrap();
    let model = codec::decode(&reread).unwrap();
    model.sanity_check().unwrap();
    assert_eq!(codec::encode(&model), converted);
}

#[test]
fn shallow_conv_listing_snapshot() {
    let artifact = shallow_conv_artifact();
    let converted = harpoon::convert(&artifact, &ConvertOptions::default()).unwrap();
    let model = codec::decode(&converted).unwrap();

    // One operator, shallow-input kernel, no pad op.
    let sg = model.subgraph_ids().next().unwrap();
    assert_eq!(model.subgraph(sg).operators().len(), 1);

    let listing = listing::render(&model);
    insta::assert_snapshot!("converted_listing", listing);
}

#[test]
fn unsupported_schema_version_is_fatal() {
    let mut artifact = full_network_artifact();
    artifact[4..8].copy_from_slice(&7u32.to_le_bytes());
    let err = harpoon::convert(&artifact, &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, harpoon::Error::Format(_)));
}

#[test]
fn unspecializable_operator_is_reported_with_identity() {
    // Depthwise convolutions have no Narwhal kernel in this pipeline;
    // the conversion must fail naming the operator, not silently emit
    // something the runtime cannot execute.
    let mut model = Model::new(codec::SCHEMA_VERSION, "");
    let sg = model.create_subgraph("main");
    let input = quantized(&mut model, sg, "input", vec![1, 4, 4, 8]);
    model.mark_input(sg, input).unwrap();
    let weights = constant(&mut model, sg, "weights", vec![1, 3, 3, 8], vec![1; 72]);
    let output = quantized(&mut model, sg, "output", vec![1, 4, 4, 8]);
    model.mark_output(sg, output).unwrap();
    model.create_operator(
        sg,
        OperatorCode::builtin(BuiltinOp::DepthwiseConv2d),
        &[input, weights],
        &[output],
        conv_options(1, "same"),
        Options::new(),
    );
    let artifact = codec::encode(&model);

    let err = harpoon::convert(&artifact, &ConvertOptions::default()).unwrap_err();
    match err {
        harpoon::Error::Unlowered { operator, shape } => {
            assert_eq!(operator, "depthwise_conv2d_0");
            assert_eq!(shape, vec![1, 4, 4, 8]);
        }
        other => panic!("expected unlowered error, got {other}"),
    }
}
