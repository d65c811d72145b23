//! Dead-code elimination.
//!
//! Whole-model pass, last in the pipeline. Three waves: operators whose
//! outputs nobody reads (and that feed no subgraph output), then tensors
//! left without any operator links that are not part of the subgraph
//! boundary, then buffers whose owner list is empty. Earlier rewrites
//! only detach objects; this is the single place that prunes them.

use crate::error::Result;
use crate::ir::{Model, SubgraphId};

use super::ModelPass;

pub struct EliminateDeadCode;

impl EliminateDeadCode {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }

    fn sweep_operators(model: &mut Model, sg: SubgraphId) -> Result<usize> {
        let mut removed = 0;
        // Walk in reverse execution order so a dead chain falls in one
        // sweep; repeat until stable for anything the order missed.
        loop {
            let mut changed = false;
            for op in model.subgraph(sg).operators().to_vec().into_iter().rev() {
                let dead = model.operator(op).outputs().iter().all(|&t| {
                    model.tensor(t).consumers().is_empty()
                        && !model.subgraph(sg).outputs().contains(&t)
                });
                if dead {
                    model.remove_operator(op)?;
                    removed += 1;
                    changed = true;
                }
            }
            if !changed {
                return Ok(removed);
            }
        }
    }

    fn sweep_tensors(model: &mut Model, sg: SubgraphId) -> Result<usize> {
        let mut removed = 0;
        for t in model.subgraph(sg).tensors().to_vec() {
            let tensor = model.tensor(t);
            let orphaned = tensor.producers().is_empty()
                && tensor.consumers().is_empty()
                && !model.subgraph(sg).inputs().contains(&t)
                && !model.subgraph(sg).outputs().contains(&t);
            if orphaned {
                model.remove_tensor(t)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl ModelPass for EliminateDeadCode {
    fn name(&self) -> &'static str {
        "eliminate_dead_code"
    }

    fn run(&self, model: &mut Model) -> Result<usize> {
        let mut removed = 0;
        let subgraphs: Vec<SubgraphId> = model.subgraph_ids().collect();
        for sg in subgraphs {
            removed += Self::sweep_operators(model, sg)?;
            removed += Self::sweep_tensors(model, sg)?;
        }
        for b in model.buffer_ids() {
            if model.buffer(b).owners().is_empty() {
                model.remove_buffer(b)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BuiltinOp, OperatorCode, Options, TensorInit, TensorType,
    };
    use crate::passes::conv2d::tests::conv_model;
    use crate::passes::{PassManager, SpecializeConv2dDeep};
    use crate::target::TargetConfig;

    #[test]
    fn dead_chain_is_removed_in_one_run() {
        let mut model = Model::new(3, "");
        let sg = model.create_subgraph("main");
        let live_in = model.create_tensor(
            sg,
            "in",
            TensorType::I8,
            vec![1],
            TensorInit {
                is_input: true,
                ..TensorInit::default()
            },
        );
        let live_out = model.create_tensor(
            sg,
            "out",
            TensorType::I8,
            vec![1],
            TensorInit {
                is_output: true,
                ..TensorInit::default()
            },
        );
        let code = OperatorCode::builtin(BuiltinOp::Reshape);
        model.create_operator(
            sg,
            code.clone(),
            &[live_in],
            &[live_out],
            Options::new(),
            Options::new(),
        );
        // Dead side chain: in -> d1 -> d2, nothing reads d2.
        let d1 = model.create_tensor(sg, "d1", TensorType::I8, vec![1], TensorInit::default());
        let d2 = model.create_tensor(sg, "d2", TensorType::I8, vec![1], TensorInit::default());
        model.create_operator(sg, code.clone(), &[live_in], &[d1], Options::new(), Options::new());
        model.create_operator(sg, code, &[d1], &[d2], Options::new(), Options::new());

        let removed = EliminateDeadCode::new().run(&mut model).unwrap();
        model.sanity_check().unwrap();
        // Two operators, two tensors, two activation buffers.
        assert_eq!(removed, 6);
        assert_eq!(model.subgraph(sg).operators().len(), 1);
        assert_eq!(model.subgraph(sg).tensors().len(), 2);
    }

    #[test]
    fn ownerless_buffers_are_pruned() {
        let mut model = Model::new(3, "");
        model.create_buffer(vec![1, 2, 3]);
        let removed = EliminateDeadCode::new().run(&mut model).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(model.buffer_count(), 0);
    }

    #[test]
    fn specialization_leaves_nothing_for_dce() {
        // A conv with 32 output channels and a 1x1 kernel: running DCE
        // right after specialization must not change buffer or tensor
        // counts — the rewrite orphans nothing.
        let config = TargetConfig::narwhal();
        let (mut model, _, _) = conv_model(8, 8, 4, 32, 1, 1, 1, "valid");
        let manager = PassManager::new()
            .register_operator(SpecializeConv2dDeep::new(&config))
            .with_verification(true);
        manager.run(&mut model).unwrap();

        let buffers_before = model.buffer_count();
        let tensors_before = model.tensor_count();
        let removed = EliminateDeadCode::new().run(&mut model).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(model.buffer_count(), buffers_before);
        assert_eq!(model.tensor_count(), tensors_before);
    }

    #[test]
    fn boundary_tensors_survive_without_links() {
        let mut model = Model::new(3, "");
        let sg = model.create_subgraph("main");
        model.create_tensor(
            sg,
            "io",
            TensorType::I8,
            vec![1],
            TensorInit {
                is_input: true,
                is_output: true,
                ..TensorInit::default()
            },
        );
        let removed = EliminateDeadCode::new().run(&mut model).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(model.subgraph(sg).tensors().len(), 1);
    }
}
