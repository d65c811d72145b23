//! harpoon — graph-rewriting compiler for the Narwhal NPU.
//!
//! The pipeline decodes a trained model artifact into the graph IR, runs
//! the ordered transformation passes that map its operators onto the
//! NPU's kernel set, verifies that everything lowered, and re-encodes
//! the result for the embedded runtime.

pub mod codec;
pub mod error;
pub mod ir;
pub mod listing;
pub mod passes;
pub mod target;

pub use error::{Error, Result};
pub use ir::Model;
pub use passes::{PassManager, PassReport};
pub use target::TargetConfig;

/// Metadata key under which the converter records its own version.
pub const VERSION_METADATA_KEY: &str = "harpoon_version";

/// Options controlling a conversion: target description + whether the
/// graph invariants are re-checked after every pass.
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    pub target: TargetConfig,
    pub verify: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            target: TargetConfig::narwhal(),
            verify: true,
        }
    }
}

/// Convert a model artifact for the NPU: decode, rewrite, re-encode.
pub fn convert(artifact: &[u8], options: &ConvertOptions) -> Result<Vec<u8>> {
    let (bytes, _) = convert_with_reports(artifact, options)?;
    Ok(bytes)
}

/// Like [`convert`], also returning the per-pass reports.
pub fn convert_with_reports(
    artifact: &[u8],
    options: &ConvertOptions,
) -> Result<(Vec<u8>, Vec<PassReport>)> {
    let mut model = codec::decode(artifact)?;
    if options.verify {
        model.sanity_check()?;
    }
    let manager = PassManager::standard(&options.target).with_verification(options.verify);
    let reports = manager.run(&mut model)?;
    passes::check_lowered(&model, &options.target)?;
    stamp_version(&mut model);
    Ok((codec::encode(&model), reports))
}

/// Stamp the converter version into model metadata, once.
fn stamp_version(model: &mut Model) {
    if model.get_metadata(VERSION_METADATA_KEY).is_some() {
        return;
    }
    let payload = env!("CARGO_PKG_VERSION").as_bytes().to_vec();
    let buffer = model.create_buffer(payload);
    model.create_metadata(VERSION_METADATA_KEY, Some(buffer));
}
