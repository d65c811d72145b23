//! Buffer deduplication.
//!
//! Whole-model pass: any two live buffers with byte-identical content
//! are merged, repointing every owner of the duplicate at the
//! first-encountered canonical buffer. Duplicates are left ownerless for
//! dead-code elimination to prune, which is why this pass (and DCE) run
//! last, after no further content-producing rewrite occurs.

use std::collections::HashMap;

use crate::error::Result;
use crate::ir::{BufferId, ContentHash, Model};

use super::ModelPass;

pub struct DedupBuffers;

impl DedupBuffers {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

impl ModelPass for DedupBuffers {
    fn name(&self) -> &'static str {
        "dedup_buffers"
    }

    fn run(&self, model: &mut Model) -> Result<usize> {
        let mut canonical: HashMap<ContentHash, BufferId> = HashMap::new();
        let mut moved = 0;
        for b in model.buffer_ids() {
            if model.buffer(b).owners().is_empty() {
                continue;
            }
            let hash = model.buffer(b).content_hash();
            match canonical.get(&hash) {
                Some(&keep) => moved += model.merge_buffers(b, keep)?,
                None => {
                    canonical.insert(hash, b);
                }
            }
        }
        Ok(moved)
    }
}
