//! Pass engine: ordered execution of matching+mutating transformation
//! passes over the IR.
//!
//! Two pass shapes exist. Operator passes are driven by the engine over
//! every operator of every subgraph, with one of two policies: a single
//! sweep (each sweep works on a snapshot of the operator list, so
//! mutations never feed the same sweep), or a fixed point that repeats
//! sweeps until one matches nothing. A pass whose rewrite re-triggers its
//! own match predicate would never converge, so every library pass
//! excludes already-rewritten opcodes by construction; a termination
//! guard proportional to operator count catches violations. Model passes
//! (buffer dedup, dead-code elimination) need cross-subgraph visibility
//! and run once over the whole model.
//!
//! In verification mode the manager re-checks the graph invariants after
//! every pass, so a violation is attributed to the pass that introduced
//! it rather than discovered downstream.

pub mod cleanup;
pub mod conv2d;
pub mod dce;
pub mod dedup;
pub mod linear;
pub mod padding;
pub mod parallel;
pub mod pooling;

pub use cleanup::Cleanup;
pub use conv2d::{SpecializeConv2dDeep, SpecializeConv2dShallowIn};
pub use dce::EliminateDeadCode;
pub use dedup::DedupBuffers;
pub use linear::SpecializeFullyConnected;
pub use padding::InsertPadding;
pub use parallel::AnnotateParallelism;
pub use pooling::SpecializePooling;

use crate::error::{Error, Result};
use crate::ir::{order, Model, OperatorId, SubgraphId};
use crate::target::TargetConfig;

/// Execution policy of an operator pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Iterate all candidates once; mutations do not affect the sweep.
    SingleSweep,
    /// Repeat sweeps until one produces zero matches.
    FixedPoint,
}

/// A pass driven per-operator by the engine.
pub trait OperatorPass {
    fn name(&self) -> &'static str;

    fn policy(&self) -> Policy {
        Policy::SingleSweep
    }

    /// Whether `op` should be rewritten. Unsatisfiable preconditions
    /// decline here (return false) so unmatched operators pass through
    /// unchanged; `mutate` errors are reserved for pass bugs.
    fn match_op(&self, model: &Model, op: OperatorId) -> bool;

    fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()>;
}

/// A pass that needs whole-model visibility. Returns how many rewrites
/// it performed.
pub trait ModelPass {
    fn name(&self) -> &'static str;

    fn run(&self, model: &mut Model) -> Result<usize>;
}

pub enum Pass {
    Operator(Box<dyn OperatorPass>),
    Model(Box<dyn ModelPass>),
}

impl Pass {
    pub fn name(&self) -> &'static str {
        match self {
            Pass::Operator(p) => p.name(),
            Pass::Model(p) => p.name(),
        }
    }
}

/// Per-pass outcome of a pipeline run.
#[derive(Clone, Debug)]
pub struct PassReport {
    pub pass: &'static str,
    pub applied: usize,
}

/// Holds an ordered list of passes and runs them in sequence.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Pass>,
    verify: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn register_operator(mut self, pass: impl OperatorPass + 'static) -> Self {
        self.passes.push(Pass::Operator(Box::new(pass)));
        self
    }

    pub fn register_model(mut self, pass: impl ModelPass + 'static) -> Self {
        self.passes.push(Pass::Model(Box::new(pass)));
        self
    }

    /// The standard conversion pipeline. Ordering is load-bearing:
    /// specialization and padding insertion run before parallel
    /// annotation (the thread heuristic reads final per-kernel shapes);
    /// buffer dedup and dead-code elimination run last, after no further
    /// content-producing rewrite occurs.
    pub fn standard(config: &TargetConfig) -> Self {
        Self::new()
            .register_operator(Cleanup::new())
            .register_operator(SpecializeConv2dDeep::new(config))
            .register_operator(SpecializeConv2dShallowIn::new(config))
            .register_operator(SpecializeFullyConnected::new())
            .register_operator(SpecializePooling::new())
            .register_operator(InsertPadding::new(config))
            .register_operator(AnnotateParallelism::new(config))
            .register_model(DedupBuffers::new())
            .register_model(EliminateDeadCode::new())
    }

    /// Run every pass in order. In verification mode the graph
    /// invariants and the execution order are re-checked after each
    /// pass, and a failure names that pass.
    pub fn run(&self, model: &mut Model) -> Result<Vec<PassReport>> {
        let mut reports = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let applied = match pass {
                Pass::Operator(p) => run_operator_pass(p.as_ref(), model)?,
                Pass::Model(p) => p.run(model).map_err(|e| e.in_pass(p.name()))?,
            };
            if self.verify {
                model.sanity_check().map_err(|e| e.in_pass(pass.name()))?;
                order::execution_order_check(model).map_err(|e| e.in_pass(pass.name()))?;
            }
            reports.push(PassReport {
                pass: pass.name(),
                applied,
            });
        }
        Ok(reports)
    }
}

fn run_operator_pass(pass: &dyn OperatorPass, model: &mut Model) -> Result<usize> {
    // Convergence is bounded by the operator count: every productive
    // sweep rewrites at least one operator out of the match set.
    let max_sweeps = model.operator_count() + 2;
    let mut total = 0;
    let mut sweeps = 0;
    loop {
        sweeps += 1;
        let snapshot = all_operators(model);
        let mut applied = 0;
        for op in snapshot {
            if model.is_live_operator(op) && pass.match_op(model, op) {
                pass.mutate(model, op).map_err(|e| e.in_pass(pass.name()))?;
                applied += 1;
            }
        }
        total += applied;
        match pass.policy() {
            Policy::SingleSweep => break,
            Policy::FixedPoint => {
                if applied == 0 {
                    break;
                }
                if sweeps > max_sweeps {
                    return Err(Error::Engine(format!(
                        "pass '{}' did not converge after {sweeps} sweeps",
                        pass.name()
                    )));
                }
            }
        }
    }
    Ok(total)
}

/// Snapshot of every operator id in every subgraph, in execution order.
pub(crate) fn all_operators(model: &Model) -> Vec<OperatorId> {
    let subgraphs: Vec<SubgraphId> = model.subgraph_ids().collect();
    subgraphs
        .into_iter()
        .flat_map(|sg| model.subgraph(sg).operators().to_vec())
        .collect()
}

/// Pipeline-level final check: every remaining operator must be
/// executable by the target — a Narwhal kernel or a passthrough builtin.
/// Reported with the operator's identity and output shape.
pub fn check_lowered(model: &Model, config: &TargetConfig) -> Result<()> {
    for op_id in all_operators(model) {
        let op = model.operator(op_id);
        if let Some(builtin) = op.code().builtin_op() {
            if !config.passthrough(builtin) {
                let shape = op
                    .outputs()
                    .first()
                    .map(|&t| model.tensor(t).shape().to_vec())
                    .unwrap_or_default();
                return Err(Error::Unlowered {
                    operator: op.name().to_string(),
                    shape,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BuiltinOp, OperatorCode, Options, Position, TensorInit, TensorType,
    };

    /// Test pass: rewrites builtin reshape codes to a custom marker.
    /// The rewrite removes the operator from the match set, so the
    /// fixed point converges in one productive sweep.
    struct LowerReshapes;

    impl OperatorPass for LowerReshapes {
        fn name(&self) -> &'static str {
            "lower_reshapes"
        }

        fn policy(&self) -> Policy {
            Policy::FixedPoint
        }

        fn match_op(&self, model: &Model, op: OperatorId) -> bool {
            model.operator(op).code().builtin_op() == Some(BuiltinOp::Reshape)
        }

        fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
            let operator = model.operator(op);
            let (sg, inputs, outputs) = (
                operator.subgraph(),
                operator.inputs().to_vec(),
                operator.outputs().to_vec(),
            );
            let new = model.create_operator(
                sg,
                OperatorCode::Custom("test_lowered".to_string()),
                &inputs,
                &outputs,
                Options::new(),
                Options::new(),
            );
            model.replace_operator(op, new)
        }
    }

    /// Test pass: breaks execution order on purpose by hoisting the
    /// last operator of a chain ahead of its producers.
    struct ShuffleOrder;

    impl OperatorPass for ShuffleOrder {
        fn name(&self) -> &'static str {
            "shuffle_order"
        }

        fn match_op(&self, model: &Model, op: OperatorId) -> bool {
            let sg = model.operator(op).subgraph();
            let ops = model.subgraph(sg).operators();
            ops.len() >= 2 && ops.last() == Some(&op)
        }

        fn mutate(&self, model: &mut Model, op: OperatorId) -> Result<()> {
            let sg = model.operator(op).subgraph();
            let first = *model.subgraph(sg).operators().first().expect("nonempty");
            model.insert_operator(first, op, Position::Before)
        }
    }

    fn chain_model(n: usize) -> Model {
        let mut model = Model::new(3, "");
        let sg = model.create_subgraph("main");
        let mut prev = model.create_tensor(
            sg,
            "a0",
            TensorType::I8,
            vec![1, 4],
            TensorInit {
                is_input: true,
                ..TensorInit::default()
            },
        );
        for i in 1..=n {
            let next = model.create_tensor(
                sg,
                &format!("a{i}"),
                TensorType::I8,
                vec![1, 4],
                TensorInit {
                    is_output: i == n,
                    ..TensorInit::default()
                },
            );
            model.create_operator(
                sg,
                OperatorCode::builtin(BuiltinOp::Reshape),
                &[prev],
                &[next],
                Options::new(),
                Options::new(),
            );
            prev = next;
        }
        model
    }

    #[test]
    fn fixed_point_converges_and_rematches_nothing() {
        let mut model = chain_model(4);
        let manager = PassManager::new()
            .register_operator(LowerReshapes)
            .with_verification(true);
        let reports = manager.run(&mut model).unwrap();
        assert_eq!(reports[0].applied, 4);

        // Idempotent post-convergence: a second run matches zero.
        let reports = manager.run(&mut model).unwrap();
        assert_eq!(reports[0].applied, 0);
    }

    #[test]
    fn verification_attributes_order_violations_to_the_pass() {
        let mut model = chain_model(3);
        let manager = PassManager::new()
            .register_operator(ShuffleOrder)
            .with_verification(true);
        let err = manager.run(&mut model).unwrap_err();
        match err {
            Error::Pass { pass, .. } => assert_eq!(pass, "shuffle_order"),
            other => panic!("expected pass-attributed error, got {other}"),
        }
    }

    #[test]
    fn without_verification_the_same_pipeline_reports_no_error() {
        let mut model = chain_model(3);
        let manager = PassManager::new().register_operator(ShuffleOrder);
        manager.run(&mut model).unwrap();
    }

    #[test]
    fn check_lowered_reports_identity_and_shape() {
        let model = chain_model(1);
        // Reshape is a passthrough, so the chain model is fine.
        check_lowered(&model, &TargetConfig::narwhal()).unwrap();

        let mut model = Model::new(3, "");
        let sg = model.create_subgraph("main");
        let t_in = model.create_tensor(sg, "in", TensorType::I8, vec![1, 2], TensorInit::default());
        let t_out =
            model.create_tensor(sg, "out", TensorType::I8, vec![1, 2], TensorInit::default());
        model.create_operator(
            sg,
            OperatorCode::builtin(BuiltinOp::Conv2d),
            &[t_in],
            &[t_out],
            Options::new(),
            Options::new(),
        );
        let err = check_lowered(&model, &TargetConfig::narwhal()).unwrap_err();
        match err {
            Error::Unlowered { operator, shape } => {
                assert_eq!(operator, "conv2d_0");
                assert_eq!(shape, vec![1, 2]);
            }
            other => panic!("expected unlowered error, got {other}"),
        }
    }
}
