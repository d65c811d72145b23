//! Text listing of a model's operators.
//!
//! One line per operator with its code, tensor shapes, and thread
//! annotation. Used by the CLI summary and by snapshot tests; not a
//! serialization format.

use std::fmt::Write;

use crate::ir::{Model, Tensor, TensorId};

fn format_tensor(tensor: &Tensor) -> String {
    let dims: Vec<String> = tensor.shape().iter().map(|d| d.to_string()).collect();
    format!("{} {}", dims.join("x"), tensor.ttype().name())
}

fn format_list(model: &Model, ids: &[TensorId]) -> String {
    let parts: Vec<String> = ids
        .iter()
        .map(|&t| format_tensor(model.tensor(t)))
        .collect();
    parts.join(", ")
}

pub fn render(model: &Model) -> String {
    let mut out = String::new();
    for sg_id in model.subgraph_ids() {
        let sg = model.subgraph(sg_id);
        let _ = writeln!(
            out,
            "subgraph '{}': inputs={} outputs={} operators={}",
            sg.name(),
            sg.inputs().len(),
            sg.outputs().len(),
            sg.operators().len()
        );
        for &op_id in sg.operators() {
            let op = model.operator(op_id);
            let par = match op.custom_options.get("par").and_then(|v| v.as_int()) {
                Some(threads) => format!(" par={threads}"),
                None => String::new(),
            };
            let _ = writeln!(
                out,
                "  {}: {} ({}) -> ({}){}",
                op.name(),
                op.code(),
                format_list(model, op.inputs()),
                format_list(model, op.outputs()),
                par
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BuiltinOp, OperatorCode, OptionValue, Options, TensorInit, TensorType};

    #[test]
    fn listing_shows_shapes_and_par() {
        let mut model = Model::new(3, "");
        let sg = model.create_subgraph("main");
        let a = model.create_tensor(
            sg,
            "a",
            TensorType::I8,
            vec![1, 8, 8, 32],
            TensorInit {
                is_input: true,
                ..TensorInit::default()
            },
        );
        let b = model.create_tensor(
            sg,
            "b",
            TensorType::I8,
            vec![1, 8, 8, 32],
            TensorInit {
                is_output: true,
                ..TensorInit::default()
            },
        );
        let mut custom = Options::new();
        custom.insert("par".to_string(), OptionValue::Int(4));
        model.create_operator(
            sg,
            OperatorCode::builtin(BuiltinOp::Reshape),
            &[a],
            &[b],
            Options::new(),
            custom,
        );
        let text = render(&model);
        assert!(text.contains("subgraph 'main': inputs=1 outputs=1 operators=1"));
        assert!(text.contains("reshape_0: reshape v1 (1x8x8x32 i8) -> (1x8x8x32 i8) par=4"));
    }
}
