//! In-memory graph IR: Model, Subgraph, Tensor, Operator, Buffer, Metadata.
//!
//! Entities live in arenas owned by the `Model` and are addressed by typed
//! copyable ids; bidirectional relations (tensor↔operator producer/consumer,
//! buffer↔owner) are id lists. Every link mutation goes through the `Model`
//! mutators in this module — passes never manipulate link lists directly —
//! so a caller observing the IR between two mutator calls never sees a
//! half-updated link. Removed arena slots are tombstoned; ids are never
//! reused within one model.

pub mod buffer;
pub mod operator;
pub mod options;
pub mod order;
pub mod tensor;

pub use buffer::{Buffer, BufferOwner, ContentHash};
pub use operator::{BuiltinOp, NpuOp, Operator, OperatorCode};
pub use options::{OptionValue, Options};
pub use tensor::{Quantization, Tensor, TensorType};

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(SubgraphId, "sg");
id_type!(TensorId, "t");
id_type!(OperatorId, "op");
id_type!(BufferId, "b");
id_type!(MetadataId, "m");

/// Where to place an operator relative to a reference operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
}

/// Optional fields for `create_tensor`. Without an explicit buffer the
/// tensor gets its own fresh empty buffer (pure activation).
#[derive(Default)]
pub struct TensorInit {
    pub buffer: Option<BufferId>,
    pub quantization: Option<Quantization>,
    pub is_input: bool,
    pub is_output: bool,
}

/// A named buffer attached at model scope, used for out-of-band artifacts
/// such as versioning stamps.
#[derive(Clone, Debug)]
pub struct Metadata {
    name: String,
    buffer: BufferId,
}

impl Metadata {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }
}

/// One subgraph: ordered tensors, the input/output subsets, and the
/// operator list in execution order. The runtime executes operators in
/// list order and assumes every operator's inputs were already produced
/// by an earlier operator, a constant, or a graph input.
#[derive(Clone, Debug, Default)]
pub struct Subgraph {
    name: String,
    tensors: Vec<TensorId>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    operators: Vec<OperatorId>,
}

impl Subgraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensors(&self) -> &[TensorId] {
        &self.tensors
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn operators(&self) -> &[OperatorId] {
        &self.operators
    }

    /// Tensors that are neither subgraph inputs nor outputs.
    pub fn intermediates(&self) -> Vec<TensorId> {
        self.tensors
            .iter()
            .copied()
            .filter(|t| !self.inputs.contains(t) && !self.outputs.contains(t))
            .collect()
    }
}

/// Root of the IR. Owns all graph objects transitively.
#[derive(Debug)]
pub struct Model {
    pub version: u32,
    pub description: String,
    subgraphs: Vec<Subgraph>,
    tensors: Vec<Option<Tensor>>,
    operators: Vec<Option<Operator>>,
    buffers: Vec<Option<Buffer>>,
    buffer_order: Vec<BufferId>,
    metadata: Vec<Metadata>,
}

impl Model {
    pub fn new(version: u32, description: impl Into<String>) -> Self {
        Self {
            version,
            description: description.into(),
            subgraphs: Vec::new(),
            tensors: Vec::new(),
            operators: Vec::new(),
            buffers: Vec::new(),
            buffer_order: Vec::new(),
            metadata: Vec::new(),
        }
    }

    // ─── Accessors ─────────────────────────────────────────────────

    pub fn subgraph_ids(&self) -> impl Iterator<Item = SubgraphId> {
        (0..self.subgraphs.len() as u32).map(SubgraphId)
    }

    pub fn subgraph(&self, id: SubgraphId) -> &Subgraph {
        &self.subgraphs[id.0 as usize]
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        match &self.tensors[id.0 as usize] {
            Some(t) => t,
            None => panic!("stale {id:?}"),
        }
    }

    pub fn operator(&self, id: OperatorId) -> &Operator {
        match &self.operators[id.0 as usize] {
            Some(op) => op,
            None => panic!("stale {id:?}"),
        }
    }

    /// Mutable operator access for option updates. Link lists stay
    /// private to this module, so links cannot be edited through this.
    pub fn operator_mut(&mut self, id: OperatorId) -> &mut Operator {
        match &mut self.operators[id.0 as usize] {
            Some(op) => op,
            None => panic!("stale {id:?}"),
        }
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        match &self.buffers[id.0 as usize] {
            Some(b) => b,
            None => panic!("stale {id:?}"),
        }
    }

    /// Live buffers in model order.
    pub fn buffer_ids(&self) -> Vec<BufferId> {
        self.buffer_order.clone()
    }

    pub fn metadata_entries(&self) -> &[Metadata] {
        &self.metadata
    }

    pub fn get_metadata(&self, name: &str) -> Option<&Metadata> {
        self.metadata.iter().find(|m| m.name == name)
    }

    pub fn is_live_operator(&self, id: OperatorId) -> bool {
        self.operators
            .get(id.0 as usize)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn is_live_tensor(&self, id: TensorId) -> bool {
        self.tensors
            .get(id.0 as usize)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn operator_count(&self) -> usize {
        self.subgraphs.iter().map(|sg| sg.operators.len()).sum()
    }

    pub fn tensor_count(&self) -> usize {
        self.subgraphs.iter().map(|sg| sg.tensors.len()).sum()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_order.len()
    }

    /// Total payload bytes across live buffers.
    pub fn data_size(&self) -> usize {
        self.buffer_order
            .iter()
            .map(|&b| self.buffer(b).len())
            .sum()
    }

    /// Distinct operator codes ranked by descending usage frequency,
    /// ties broken by first-encountered order. The serialized artifact
    /// is a little smaller when frequent codes get small table indices,
    /// and the ranking must be reproduced exactly for byte-stable output.
    pub fn operator_codes(&self) -> Vec<OperatorCode> {
        let mut counts: HashMap<&OperatorCode, (usize, usize)> = HashMap::new();
        let mut next_rank = 0usize;
        for sg in &self.subgraphs {
            for &op_id in &sg.operators {
                let code = &match &self.operators[op_id.0 as usize] {
                    Some(op) => op,
                    None => panic!("stale {op_id:?}"),
                }
                .code;
                let entry = counts.entry(code).or_insert_with(|| {
                    let rank = next_rank;
                    next_rank += 1;
                    (0, rank)
                });
                entry.0 += 1;
            }
        }
        let mut table: Vec<(&OperatorCode, (usize, usize))> = counts.into_iter().collect();
        table.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        table.into_iter().map(|(code, _)| code.clone()).collect()
    }

    // ─── Construction ──────────────────────────────────────────────

    pub fn create_subgraph(&mut self, name: impl Into<String>) -> SubgraphId {
        let id = SubgraphId(self.subgraphs.len() as u32);
        self.subgraphs.push(Subgraph {
            name: name.into(),
            ..Subgraph::default()
        });
        id
    }

    pub fn create_buffer(&mut self, data: Vec<u8>) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(Some(Buffer::new(data)));
        self.buffer_order.push(id);
        id
    }

    pub fn create_metadata(
        &mut self,
        name: impl Into<String>,
        buffer: Option<BufferId>,
    ) -> MetadataId {
        let buffer = buffer.unwrap_or_else(|| self.create_buffer(Vec::new()));
        let id = MetadataId(self.metadata.len() as u32);
        self.metadata.push(Metadata {
            name: name.into(),
            buffer,
        });
        self.buffer_slot_mut(buffer)
            .owners
            .push(BufferOwner::Metadata(id));
        id
    }

    /// Create a tensor in `sg`. The name is made unique within the
    /// subgraph by appending a numeric suffix on collision.
    pub fn create_tensor(
        &mut self,
        sg: SubgraphId,
        name: &str,
        ttype: TensorType,
        shape: Vec<u32>,
        init: TensorInit,
    ) -> TensorId {
        let name = self.make_unique_tensor_name(sg, name);
        let buffer = init
            .buffer
            .unwrap_or_else(|| self.create_buffer(Vec::new()));
        let id = TensorId(self.tensors.len() as u32);
        self.tensors.push(Some(Tensor {
            name,
            ttype,
            shape,
            quantization: init.quantization,
            buffer,
            producers: Vec::new(),
            consumers: Vec::new(),
            subgraph: sg,
        }));
        self.buffer_slot_mut(buffer)
            .owners
            .push(BufferOwner::Tensor(id));
        let sub = &mut self.subgraphs[sg.0 as usize];
        sub.tensors.push(id);
        if init.is_input {
            sub.inputs.push(id);
        }
        if init.is_output {
            sub.outputs.push(id);
        }
        id
    }

    /// Duplicate a tensor: same type, shape, and quantization, a fresh
    /// buffer holding a copy of the original's payload, and a
    /// suffix-uniqued name.
    pub fn clone_tensor(&mut self, t: TensorId) -> TensorId {
        let (sg, name, ttype, shape, quantization, data) = {
            let tensor = self.tensor(t);
            (
                tensor.subgraph,
                tensor.name.clone(),
                tensor.ttype,
                tensor.shape.clone(),
                tensor.quantization.clone(),
                self.buffer(tensor.buffer).data().to_vec(),
            )
        };
        let buffer = self.create_buffer(data);
        self.create_tensor(
            sg,
            &name,
            ttype,
            shape,
            TensorInit {
                buffer: Some(buffer),
                quantization,
                ..TensorInit::default()
            },
        )
    }

    pub fn get_tensor(&self, sg: SubgraphId, name: &str) -> Option<TensorId> {
        self.subgraphs[sg.0 as usize]
            .tensors
            .iter()
            .copied()
            .find(|&t| self.tensor(t).name == name)
    }

    /// Create an operator at the end of `sg`'s execution order and
    /// register it as a consumer of every input and a producer of every
    /// output (one link entry per occurrence).
    pub fn create_operator(
        &mut self,
        sg: SubgraphId,
        code: OperatorCode,
        inputs: &[TensorId],
        outputs: &[TensorId],
        builtin_options: Options,
        custom_options: Options,
    ) -> OperatorId {
        let name = self.generate_unique_op_name(sg, &code);
        let id = OperatorId(self.operators.len() as u32);
        self.operators.push(Some(Operator {
            name,
            code,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            builtin_options,
            custom_options,
            subgraph: sg,
        }));
        for &t in inputs {
            self.tensor_slot_mut(t).consumers.push(id);
        }
        for &t in outputs {
            self.tensor_slot_mut(t).producers.push(id);
        }
        self.subgraphs[sg.0 as usize].operators.push(id);
        id
    }

    // ─── Removal ───────────────────────────────────────────────────

    /// Remove a tensor. Rejected while any operator still links it;
    /// the buffer-owner detach happens inside this atomic routine.
    pub fn remove_tensor(&mut self, t: TensorId) -> Result<()> {
        let tensor = self.tensor(t);
        if !tensor.producers.is_empty() || !tensor.consumers.is_empty() {
            return Err(Error::precondition(format!(
                "cannot remove tensor '{}': still linked by {} producer(s) and {} consumer(s)",
                tensor.name,
                tensor.producers.len(),
                tensor.consumers.len()
            )));
        }
        let sg = tensor.subgraph;
        let buffer = tensor.buffer;
        let sub = &mut self.subgraphs[sg.0 as usize];
        sub.tensors.retain(|&x| x != t);
        sub.inputs.retain(|&x| x != t);
        sub.outputs.retain(|&x| x != t);
        let owners = &mut self.buffer_slot_mut(buffer).owners;
        if let Some(pos) = owners.iter().position(|&o| o == BufferOwner::Tensor(t)) {
            owners.remove(pos);
        }
        self.tensors[t.0 as usize] = None;
        Ok(())
    }

    /// Remove an operator, symmetrically unregistering it from every
    /// input tensor's consumer list and output tensor's producer list.
    pub fn remove_operator(&mut self, op: OperatorId) -> Result<()> {
        let (sg, inputs, outputs) = {
            let operator = self.operator(op);
            (
                operator.subgraph,
                operator.inputs.clone(),
                operator.outputs.clone(),
            )
        };
        if !self.subgraphs[sg.0 as usize].operators.contains(&op) {
            return Err(Error::precondition(format!(
                "operator '{}' is not in its subgraph's operator list",
                self.operator(op).name
            )));
        }
        for t in inputs {
            remove_one(&mut self.tensor_slot_mut(t).consumers, op);
        }
        for t in outputs {
            remove_one(&mut self.tensor_slot_mut(t).producers, op);
        }
        self.subgraphs[sg.0 as usize].operators.retain(|&x| x != op);
        self.operators[op.0 as usize] = None;
        Ok(())
    }

    /// Remove a dead buffer. Rejected while the owner list is nonempty.
    pub fn remove_buffer(&mut self, b: BufferId) -> Result<()> {
        if !self.buffer(b).owners().is_empty() {
            return Err(Error::precondition(format!(
                "cannot remove buffer {b:?}: owner list is not empty"
            )));
        }
        self.buffer_order.retain(|&x| x != b);
        self.buffers[b.0 as usize] = None;
        Ok(())
    }

    // ─── Execution-order placement ─────────────────────────────────

    /// Reposition `new` relative to `reference` in execution order only.
    /// Tensor input/output lists are untouched: the caller connects
    /// tensors separately, and keeping data-dependency order valid is
    /// the caller's obligation.
    pub fn insert_operator(
        &mut self,
        reference: OperatorId,
        new: OperatorId,
        position: Position,
    ) -> Result<()> {
        let sg = self.operator(new).subgraph;
        if self.operator(reference).subgraph != sg {
            return Err(Error::precondition(
                "insert_operator: operators belong to different subgraphs".to_string(),
            ));
        }
        let ops = &mut self.subgraphs[sg.0 as usize].operators;
        ops.retain(|&x| x != new);
        let ref_idx = ops.iter().position(|&x| x == reference).ok_or_else(|| {
            Error::precondition("cannot find reference operator in the subgraph".to_string())
        })?;
        let at = match position {
            Position::Before => ref_idx,
            Position::After => ref_idx + 1,
        };
        ops.insert(at, new);
        Ok(())
    }

    /// Put `new` in `old`'s place in execution order, then remove `old`.
    /// Like `insert_operator`, this does not rewire tensors.
    pub fn replace_operator(&mut self, old: OperatorId, new: OperatorId) -> Result<()> {
        self.insert_operator(old, new, Position::Before)
            .map_err(|_| {
                Error::precondition("cannot find operator to replace in the subgraph".to_string())
            })?;
        self.remove_operator(old)
    }

    // ─── Rewiring ──────────────────────────────────────────────────

    /// Replace every occurrence of `from` in `op`'s input list with `to`,
    /// keeping consumer links symmetric on both tensors.
    pub fn rewire_input(&mut self, op: OperatorId, from: TensorId, to: TensorId) -> Result<()> {
        self.rewire(op, from, to, true)
    }

    /// Replace every occurrence of `from` in `op`'s output list with `to`,
    /// keeping producer links symmetric on both tensors.
    pub fn rewire_output(&mut self, op: OperatorId, from: TensorId, to: TensorId) -> Result<()> {
        self.rewire(op, from, to, false)
    }

    fn rewire(&mut self, op: OperatorId, from: TensorId, to: TensorId, input: bool) -> Result<()> {
        if self.tensor(to).subgraph != self.operator(op).subgraph {
            return Err(Error::precondition(
                "rewire: replacement tensor belongs to a different subgraph".to_string(),
            ));
        }
        let occurrences = {
            let operator = self.operator_mut(op);
            let list = if input {
                &mut operator.inputs
            } else {
                &mut operator.outputs
            };
            let mut n = 0;
            for slot in list.iter_mut() {
                if *slot == from {
                    *slot = to;
                    n += 1;
                }
            }
            n
        };
        if occurrences == 0 {
            return Err(Error::precondition(format!(
                "rewire: tensor '{}' is not an {} of operator '{}'",
                self.tensor(from).name,
                if input { "input" } else { "output" },
                self.operator(op).name
            )));
        }
        for _ in 0..occurrences {
            let from_links = if input {
                &mut self.tensor_slot_mut(from).consumers
            } else {
                &mut self.tensor_slot_mut(from).producers
            };
            remove_one(from_links, op);
            let to_links = if input {
                &mut self.tensor_slot_mut(to).consumers
            } else {
                &mut self.tensor_slot_mut(to).producers
            };
            to_links.push(op);
        }
        Ok(())
    }

    // ─── Subgraph boundary edits ───────────────────────────────────

    pub fn mark_input(&mut self, sg: SubgraphId, t: TensorId) -> Result<()> {
        self.mark_io(sg, t, true)
    }

    pub fn mark_output(&mut self, sg: SubgraphId, t: TensorId) -> Result<()> {
        self.mark_io(sg, t, false)
    }

    fn mark_io(&mut self, sg: SubgraphId, t: TensorId, input: bool) -> Result<()> {
        let sub = &mut self.subgraphs[sg.0 as usize];
        if !sub.tensors.contains(&t) {
            return Err(Error::precondition(
                "tensor does not belong to the subgraph".to_string(),
            ));
        }
        let list = if input {
            &mut sub.inputs
        } else {
            &mut sub.outputs
        };
        if list.contains(&t) {
            return Err(Error::precondition(format!(
                "tensor is already a subgraph {}",
                if input { "input" } else { "output" }
            )));
        }
        list.push(t);
        Ok(())
    }

    /// Swap a subgraph input for another tensor at the same position.
    pub fn replace_subgraph_input(
        &mut self,
        sg: SubgraphId,
        old: TensorId,
        new: TensorId,
    ) -> Result<()> {
        self.replace_io(sg, old, new, true)
    }

    /// Swap a subgraph output for another tensor at the same position.
    pub fn replace_subgraph_output(
        &mut self,
        sg: SubgraphId,
        old: TensorId,
        new: TensorId,
    ) -> Result<()> {
        self.replace_io(sg, old, new, false)
    }

    fn replace_io(
        &mut self,
        sg: SubgraphId,
        old: TensorId,
        new: TensorId,
        input: bool,
    ) -> Result<()> {
        let sub = &mut self.subgraphs[sg.0 as usize];
        if !sub.tensors.contains(&new) {
            return Err(Error::precondition(
                "replacement tensor does not belong to the subgraph".to_string(),
            ));
        }
        let list = if input {
            &mut sub.inputs
        } else {
            &mut sub.outputs
        };
        let pos = list.iter().position(|&x| x == old).ok_or_else(|| {
            Error::precondition(format!(
                "tensor is not a subgraph {}",
                if input { "input" } else { "output" }
            ))
        })?;
        list[pos] = new;
        Ok(())
    }

    // ─── Buffer merging ────────────────────────────────────────────

    /// Repoint every owner of `dup` to `canonical`, leaving `dup`
    /// ownerless. Both buffers must hold byte-identical content.
    /// Returns the number of owners moved.
    pub fn merge_buffers(&mut self, dup: BufferId, canonical: BufferId) -> Result<usize> {
        if dup == canonical {
            return Err(Error::precondition(
                "merge_buffers: duplicate and canonical are the same buffer".to_string(),
            ));
        }
        if self.buffer(dup).data() != self.buffer(canonical).data() {
            return Err(Error::precondition(
                "merge_buffers: buffer contents differ".to_string(),
            ));
        }
        let owners = std::mem::take(&mut self.buffer_slot_mut(dup).owners);
        let moved = owners.len();
        for owner in &owners {
            match owner {
                BufferOwner::Tensor(t) => self.tensor_slot_mut(*t).buffer = canonical,
                BufferOwner::Metadata(m) => self.metadata[m.0 as usize].buffer = canonical,
            }
        }
        self.buffer_slot_mut(canonical).owners.extend(owners);
        Ok(moved)
    }

    // ─── Name generation ───────────────────────────────────────────

    fn make_unique_tensor_name(&self, sg: SubgraphId, candidate: &str) -> String {
        let existing: HashSet<&str> = self.subgraphs[sg.0 as usize]
            .tensors
            .iter()
            .map(|&t| self.tensor(t).name())
            .collect();
        if !existing.contains(candidate) {
            return candidate.to_string();
        }
        let mut j = 2;
        loop {
            let name = format!("{candidate}_{j}");
            if !existing.contains(name.as_str()) {
                return name;
            }
            j += 1;
        }
    }

    fn generate_unique_op_name(&self, sg: SubgraphId, code: &OperatorCode) -> String {
        let existing: HashSet<&str> = self.subgraphs[sg.0 as usize]
            .operators
            .iter()
            .map(|&op| self.operator(op).name())
            .collect();
        let mut j = 0;
        loop {
            let name = format!("{}_{}", code.display_name(), j);
            if !existing.contains(name.as_str()) {
                return name;
            }
            j += 1;
        }
    }

    // ─── Sanity check ──────────────────────────────────────────────

    /// Recursive invariant check: no duplicates in any list, inputs and
    /// outputs are subsets of the tensor list, every operator's tensors
    /// belong to its own subgraph, every tensor's buffer owner list
    /// contains that tensor, and all links are symmetric. This is the
    /// contract every pass must leave satisfied.
    pub fn sanity_check(&self) -> Result<()> {
        check_no_dup(&self.buffer_order, "model buffer list")?;
        for (idx, sg) in self.subgraphs.iter().enumerate() {
            let label = |what: &str| format!("subgraph {idx} {what}");
            check_no_dup(&sg.tensors, &label("tensor list"))?;
            check_no_dup(&sg.inputs, &label("input list"))?;
            check_no_dup(&sg.outputs, &label("output list"))?;
            check_no_dup(&sg.operators, &label("operator list"))?;
            for &t in sg.inputs.iter().chain(sg.outputs.iter()) {
                if !sg.tensors.contains(&t) {
                    return Err(Error::sanity(
                        format!("tensor '{}'", self.tensor(t).name),
                        "listed as subgraph input/output but not in the tensor list",
                    ));
                }
            }
            for &op_id in &sg.operators {
                self.operator_sanity(SubgraphId(idx as u32), op_id)?;
            }
            for &t_id in &sg.tensors {
                self.tensor_sanity(SubgraphId(idx as u32), t_id)?;
            }
        }
        for m in &self.metadata {
            let owned = self.buffer(m.buffer).owners().iter().any(
                |o| matches!(o, BufferOwner::Metadata(id) if self.metadata[id.0 as usize].name == m.name),
            );
            if !owned {
                return Err(Error::sanity(
                    format!("metadata '{}'", m.name),
                    "its buffer's owner list does not contain it",
                ));
            }
        }
        Ok(())
    }

    fn operator_sanity(&self, sg: SubgraphId, op_id: OperatorId) -> Result<()> {
        let op = self.operator(op_id);
        let object = || format!("operator '{}'", op.name);
        if op.subgraph != sg {
            return Err(Error::sanity(object(), "listed in a foreign subgraph"));
        }
        for &t in &op.inputs {
            let tensor = self.tensor(t);
            if tensor.subgraph != sg {
                return Err(Error::sanity(
                    object(),
                    format!("input tensor '{}' belongs to another subgraph", tensor.name),
                ));
            }
            if count(&tensor.consumers, op_id) < count(&op.inputs, t) {
                return Err(Error::sanity(
                    object(),
                    format!("missing consumer link on input tensor '{}'", tensor.name),
                ));
            }
        }
        for &t in &op.outputs {
            let tensor = self.tensor(t);
            if tensor.subgraph != sg {
                return Err(Error::sanity(
                    object(),
                    format!("output tensor '{}' belongs to another subgraph", tensor.name),
                ));
            }
            if count(&tensor.producers, op_id) < count(&op.outputs, t) {
                return Err(Error::sanity(
                    object(),
                    format!("missing producer link on output tensor '{}'", tensor.name),
                ));
            }
        }
        Ok(())
    }

    fn tensor_sanity(&self, sg: SubgraphId, t_id: TensorId) -> Result<()> {
        let tensor = self.tensor(t_id);
        let object = || format!("tensor '{}'", tensor.name);
        if tensor.subgraph != sg {
            return Err(Error::sanity(object(), "listed in a foreign subgraph"));
        }
        let owned = self
            .buffer(tensor.buffer)
            .owners()
            .contains(&BufferOwner::Tensor(t_id));
        if !owned {
            return Err(Error::sanity(
                object(),
                "its buffer's owner list does not contain it",
            ));
        }
        for &op_id in &tensor.producers {
            if !self.operator(op_id).outputs.contains(&t_id) {
                return Err(Error::sanity(
                    object(),
                    format!(
                        "producer link to '{}' is not mirrored in that operator's outputs",
                        self.operator(op_id).name
                    ),
                ));
            }
        }
        for &op_id in &tensor.consumers {
            if !self.operator(op_id).inputs.contains(&t_id) {
                return Err(Error::sanity(
                    object(),
                    format!(
                        "consumer link to '{}' is not mirrored in that operator's inputs",
                        self.operator(op_id).name
                    ),
                ));
            }
        }
        Ok(())
    }

    // ─── Logical equality ──────────────────────────────────────────

    /// Structural equality over every serialized field except the
    /// description text and generated operator/subgraph names. This is
    /// the equality the round-trip tests are defined against.
    pub fn logical_eq(&self, other: &Model) -> bool {
        if self.version != other.version {
            return false;
        }
        let a_buffers = self.buffer_ids();
        let b_buffers = other.buffer_ids();
        if a_buffers.len() != b_buffers.len() {
            return false;
        }
        if a_buffers
            .iter()
            .zip(&b_buffers)
            .any(|(&a, &b)| self.buffer(a).data() != other.buffer(b).data())
        {
            return false;
        }
        if self.metadata.len() != other.metadata.len() {
            return false;
        }
        if self.metadata.iter().zip(&other.metadata).any(|(a, b)| {
            a.name != b.name || self.buffer(a.buffer).data() != other.buffer(b.buffer).data()
        }) {
            return false;
        }
        if self.subgraphs.len() != other.subgraphs.len() {
            return false;
        }
        self.subgraphs
            .iter()
            .zip(&other.subgraphs)
            .all(|(a, b)| self.subgraph_eq(a, other, b))
    }

    fn subgraph_eq(&self, a: &Subgraph, other: &Model, b: &Subgraph) -> bool {
        let names = |model: &Model, list: &[TensorId]| -> Vec<String> {
            list.iter()
                .map(|&t| model.tensor(t).name().to_string())
                .collect()
        };
        if names(self, &a.inputs) != names(other, &b.inputs)
            || names(self, &a.outputs) != names(other, &b.outputs)
        {
            return false;
        }
        if a.tensors.len() != b.tensors.len() || a.operators.len() != b.operators.len() {
            return false;
        }
        let tensors_equal = a.tensors.iter().zip(&b.tensors).all(|(&ta, &tb)| {
            let (ta, tb) = (self.tensor(ta), other.tensor(tb));
            ta.name() == tb.name()
                && ta.ttype() == tb.ttype()
                && ta.shape() == tb.shape()
                && ta.quantization() == tb.quantization()
                && self.buffer(ta.buffer()).data() == other.buffer(tb.buffer()).data()
        });
        if !tensors_equal {
            return false;
        }
        a.operators.iter().zip(&b.operators).all(|(&oa, &ob)| {
            let (oa, ob) = (self.operator(oa), other.operator(ob));
            oa.code() == ob.code()
                && oa.builtin_options == ob.builtin_options
                && oa.custom_options == ob.custom_options
                && names(self, oa.inputs()) == names(other, ob.inputs())
                && names(self, oa.outputs()) == names(other, ob.outputs())
        })
    }

    // ─── Internal slot access ──────────────────────────────────────

    fn tensor_slot_mut(&mut self, id: TensorId) -> &mut Tensor {
        match &mut self.tensors[id.0 as usize] {
            Some(t) => t,
            None => panic!("stale {id:?}"),
        }
    }

    fn buffer_slot_mut(&mut self, id: BufferId) -> &mut Buffer {
        match &mut self.buffers[id.0 as usize] {
            Some(b) => b,
            None => panic!("stale {id:?}"),
        }
    }
}

fn remove_one<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if let Some(pos) = list.iter().position(|x| *x == item) {
        list.remove(pos);
    }
}

fn count<T: PartialEq>(list: &[T], item: T) -> usize {
    list.iter().filter(|x| **x == item).count()
}

fn check_no_dup<T: PartialEq + Copy>(list: &[T], what: &str) -> Result<()> {
    for (i, a) in list.iter().enumerate() {
        if list[i + 1..].contains(a) {
            return Err(Error::sanity(what, "duplicate entry"));
        }
    }
    Ok(())
}
