//! Target NPU description.
//!
//! Every numeric constraint the passes key on (thread budget, channel
//! grouping, shallow-input limit, per-op pad range) lives here instead of
//! being hardcoded in the pass library, so a different accelerator
//! revision is a config file away.

use std::path::Path;

use crate::error::{Error, Result};
use crate::ir::BuiltinOp;

#[derive(Clone, Debug)]
pub struct TargetConfig {
    /// Short identifier used in CLI and file paths (e.g. "narwhal").
    pub name: String,
    /// Human-readable name (e.g. "Narwhal NPU").
    pub display_name: String,
    /// Maximum worker threads a kernel may be split across.
    pub max_threads: u32,
    /// Output-channel group width of the deep convolution kernel.
    pub channel_group: u32,
    /// Input-channel word alignment required by every conv kernel.
    pub channel_word: u32,
    /// Upper bound on `c_in * k_w` for the shallow-input conv kernel.
    pub shallow_input_width: u32,
    /// Largest per-edge padding one pad operator can express.
    pub pad_range: u32,
    /// Output rows per work unit in the fully-connected heuristic.
    pub fc_grain: u32,
    /// File extension for converted artifacts (e.g. ".nwm").
    pub output_extension: String,
}

impl TargetConfig {
    /// Built-in Narwhal NPU configuration (hardcoded fallback).
    pub fn narwhal() -> Self {
        Self {
            name: "narwhal".to_string(),
            display_name: "Narwhal NPU".to_string(),
            max_threads: 5,
            channel_group: 32,
            channel_word: 4,
            shallow_input_width: 32,
            pad_range: 7,
            fc_grain: 16,
            output_extension: ".nwm".to_string(),
        }
    }

    /// Builtins the runtime executes directly, without a kernel rewrite.
    pub fn passthrough(&self, op: BuiltinOp) -> bool {
        matches!(op, BuiltinOp::Reshape | BuiltinOp::Softmax | BuiltinOp::Pad)
    }

    /// Load a target configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::format(format!("cannot read target config '{}': {e}", path.display()))
        })?;
        Self::parse_toml(&content, path)
    }

    /// Resolve a target by name: the built-in config, or
    /// `npu/{name}.toml` relative to the working directory or the
    /// compiler binary.
    pub fn resolve(name: &str) -> Result<Self> {
        if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.')
        {
            return Err(Error::format(format!("invalid target name '{name}'")));
        }
        if name == "narwhal" {
            return Ok(Self::narwhal());
        }

        let candidate = format!("npu/{name}.toml");
        let cwd_path = std::path::PathBuf::from(&candidate);
        if cwd_path.exists() {
            return Self::load(&cwd_path);
        }
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let path = dir.join(&candidate);
                if path.exists() {
                    return Self::load(&path);
                }
            }
        }

        Err(Error::format(format!(
            "unknown target '{name}' (looked for '{candidate}'; built-in targets: narwhal)"
        )))
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let err = |msg: String| Error::format(format!("{}: {msg}", path.display()));

        let mut config = Self::narwhal();
        config.name = String::new();
        config.display_name = String::new();

        let mut section = String::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value.trim_matches('"');
                let parse_u32 = |what: &str| -> Result<u32> {
                    value
                        .parse()
                        .map_err(|_| err(format!("invalid {what}: {value}")))
                };
                match (section.as_str(), key) {
                    ("target", "name") => config.name = unquoted.to_string(),
                    ("target", "display_name") => config.display_name = unquoted.to_string(),
                    ("target", "output_extension") => {
                        config.output_extension = unquoted.to_string()
                    }
                    ("limits", "max_threads") => {
                        config.max_threads = parse_u32("limits.max_threads")?
                    }
                    ("limits", "channel_group") => {
                        config.channel_group = parse_u32("limits.channel_group")?
                    }
                    ("limits", "channel_word") => {
                        config.channel_word = parse_u32("limits.channel_word")?
                    }
                    ("limits", "shallow_input_width") => {
                        config.shallow_input_width = parse_u32("limits.shallow_input_width")?
                    }
                    ("limits", "pad_range") => config.pad_range = parse_u32("limits.pad_range")?,
                    ("limits", "fc_grain") => config.fc_grain = parse_u32("limits.fc_grain")?,
                    _ => {}
                }
            }
        }

        if config.name.is_empty() {
            return Err(err("missing target.name".to_string()));
        }
        if config.max_threads == 0 {
            return Err(err("limits.max_threads must be at least 1".to_string()));
        }
        Ok(config)
    }
}
