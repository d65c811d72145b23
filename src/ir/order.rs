//! Execution-order verification.
//!
//! `insert_operator`/`replace_operator` deliberately do not validate that
//! a new position respects data-dependency order; that is the caller's
//! obligation. In verification mode the pass manager closes the gap by
//! running this check after every pass: it builds the data-dependency
//! digraph of each subgraph and confirms the operator list is one of its
//! topological orders.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Error, Result};

use super::Model;

/// Verify that every subgraph's operator list respects data dependencies:
/// each operator appears after all producers of its input tensors.
/// Cyclic wiring is reported as well.
pub fn execution_order_check(model: &Model) -> Result<()> {
    for sg_id in model.subgraph_ids() {
        let sg = model.subgraph(sg_id);
        let mut graph: DiGraph<(), ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = sg.operators().iter().map(|_| graph.add_node(())).collect();
        let position = |op| sg.operators().iter().position(|&x| x == op);

        for (consumer_pos, &op_id) in sg.operators().iter().enumerate() {
            for &t in model.operator(op_id).inputs() {
                for &producer in model.tensor(t).producers() {
                    if producer == op_id {
                        continue;
                    }
                    let producer_pos = match position(producer) {
                        Some(pos) => pos,
                        None => continue,
                    };
                    graph.add_edge(nodes[producer_pos], nodes[consumer_pos], ());
                    if producer_pos > consumer_pos {
                        return Err(Error::sanity(
                            format!("operator '{}'", model.operator(op_id).name()),
                            format!(
                                "consumes tensor '{}' before its producer '{}' runs",
                                model.tensor(t).name(),
                                model.operator(producer).name()
                            ),
                        ));
                    }
                }
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(Error::sanity(
                format!("subgraph '{}'", sg.name()),
                "data-dependency graph contains a cycle",
            ));
        }
    }
    Ok(())
}
