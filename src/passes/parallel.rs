//! Parallel-work annotation.
//!
//! Narwhal compute kernels can split their output rows across worker
//! threads. This pass writes the chosen thread count into
//! `custom_options["par"]` for every eligible kernel that is not yet
//! annotated. The heuristic is purely a function of the output shape and
//! the target's thread budget — same input, same output — and the pass
//! never touches tensors, so it is safely additive. It must run after
//! specialization and padding insertion, which fix the final per-kernel
//! shapes the work distribution reads.

use crate::error::{Error, Result};
use crate::ir::{Model, NpuOp, OperatorId, OptionValue};
use crate::target::TargetConfig;

use super::OperatorPass;

pub struct AnnotateParallelism {
    max_threads: u32,
    fc_grain: u32,
}

impl AnnotateParallelism {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            max_threads: config.max_threads,
            fc_grain: config.fc_grain,
        }
    }

    /// Work units a kernel distributes: output rows for the spatial
    /// kernels, output-feature groups for fully-connected.
    fn work_units(&self, model: &Model, op: OperatorId) -> Option<u32> {
        let operator = model.operator(op);
        let kernel = operator.code().npu_op()?;
        let output = model.tensor(*operator.outputs().first()?);
        match kernel {
            NpuOp::Conv2dDeep | NpuOp::Conv2dShallowIn | NpuOp::MaxPool2d | NpuOp::AvgPool2d => {
                output.shape().get(1).copied()
            }
            NpuOp::FullyConnected => {
                let features = *output.shape().last()?;
                Some(features.div_ceil(self.fc_grain.max(1)))
            }
            NpuOp::Pad => None,
        }
    }
}

/// Smallest thread count that reaches the same per-thread row bound as
/// the full budget: more threads past that point only idle.
fn plan_threads(units: u32, max_threads: u32) -> u32 {
    let units = units.max(1);
    let max_threads = max_threads.max(1);
    let best_bound = units.div_ceil(max_threads);
    (1..=max_threads)
        .find(|&t| units.div_ceil(t) == best_bound)
        .unwrap_or(max_threads)
}

impl OperatorPass for AnnotateParallelism {
    fn name(&self) -> &'static str {
        "annotate_parallelism"
    }

    fn match_op(&self, model: &Model, op: OperatorId) -> bool {
        if model.operator(op).custom_options.contains_key("par") {
            return false;
        }
        self.work_units(model, op).is_some()
    }

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
        let units = self
            .work_units(model, op)
            .ok_or_else(|| Error::precondition("mutate called on a non-matching operator"))?;
        let threads = plan_threads(units, self.max_threads);
        model
            .operator_mut(op)
            .custom_options
            .insert("par".to_string(), OptionValue::Int(threads as i64));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{OperatorCode, Options, TensorInit, TensorType};
    use crate::passes::PassManager;

    fn kernel_model(kernel: NpuOp, out_shape: Vec<u32>) -> (Model, OperatorId) {
        let mut model = Model::new(3, "");
        let sg = model.create_subgraph("main");
        let input = model.create_tensor(
            sg,
            "input",
            TensorType::I8,
            vec![1, 8, 8, 32],
            TensorInit {
                is_input: true,
                ..TensorInit::default()
            },
        );
        let output = model.create_tensor(
            sg,
            "output",
            TensorType::I8,
            out_shape,
            TensorInit {
                is_output: true,
                ..TensorInit::default()
            },
        );
        let op = model.create_operator(
            sg,
            OperatorCode::npu(kernel),
            &[input],
            &[output],
            Options::new(),
            Options::new(),
        );
        (model, op)
    }

    #[test]
    fn plan_threads_is_bounded_and_monotone_in_budget() {
        assert_eq!(plan_threads(1, 5), 1);
        assert_eq!(plan_threads(5, 5), 5);
        assert_eq!(plan_threads(100, 5), 5);
        // 8 rows over 5 threads bound 2 rows/thread; 4 threads already
        // reach that bound.
        assert_eq!(plan_threads(8, 5), 4);
        for units in 1..50 {
            for max in 1..8 {
                let t = plan_threads(units, max);
                assert!(t >= 1 && t <= max);
            }
        }
    }

    #[test]
    fn conv_kernel_gets_row_based_annotation() {
        let config = TargetConfig::narwhal();
        let (mut model, op) = kernel_model(NpuOp::Conv2dDeep, vec![1, 8, 8, 32]);
        let pass = AnnotateParallelism::new(&config);
        assert!(pass.match_op(&model, op));
        pass.mutate(&mut model, op).unwrap();
        assert_eq!(
            model.operator(op).custom_options.get("par").unwrap().as_int(),
            Some(4)
        );
    }

    #[test]
    fn pad_kernel_is_not_eligible() {
        let config = TargetConfig::narwhal();
        let (model, op) = kernel_model(NpuOp::Pad, vec![1, 10, 10, 32]);
        assert!(!AnnotateParallelism::new(&config).match_op(&model, op));
    }

    #[test]
    fn annotation_is_idempotent() {
        // Running the pass twice on an already-annotated operator
        // leaves the value untouched and matches nothing.
        let config = TargetConfig::narwhal();
        let (mut model, op) = kernel_model(NpuOp::FullyConnected, vec![1, 80]);
        let manager = PassManager::new()
            .register_operator(AnnotateParallelism::new(&config))
            .with_verification(true);

        let reports = manager.run(&mut model).unwrap();
        assert_eq!(reports[0].applied, 1);
        let first = model.operator(op).custom_options.get("par").cloned();

        let reports = manager.run(&mut model).unwrap();
        assert_eq!(reports[0].applied, 0);
        let second = model.operator(op).custom_options.get("par").cloned();
        assert_eq!(first, second);
    }

    #[test]
    fn annotation_never_touches_tensors() {
        let config = TargetConfig::narwhal();
        let (mut model, op) = kernel_model(NpuOp::Conv2dDeep, vec![1, 8, 8, 32]);
        let inputs = model.operator(op).inputs().to_vec();
        let outputs = model.operator(op).outputs().to_vec();
        let tensor_count = model.tensor_count();
        AnnotateParallelism::new(&config)
            .mutate(&mut model, op)
            .unwrap();
        assert_eq!(model.operator(op).inputs(), inputs.as_slice());
        assert_eq!(model.operator(op).outputs(), outputs.as_slice());
        assert_eq!(model.tensor_count(), tensor_count);
    }
}
