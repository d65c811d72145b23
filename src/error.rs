//! Error taxonomy for the conversion pipeline.
//!
//! Four fatal families: malformed artifacts (`Format`), invariant
//! violations detected by the sanity check (`Sanity`, attributed to the
//! offending pass via `Pass`), operators the target cannot execute after
//! rewriting (`Unlowered`), and pass-engine failures (`Engine`).
//! `Precondition` is the rejection an IR mutator returns before touching
//! any state. There are no retries anywhere: every operation is a
//! deterministic transformation over in-memory state.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Malformed or unsupported-version artifact. Surfaced at decode.
    Format(String),
    /// A graph invariant does not hold. Indicates a pass bug, not bad data.
    Sanity { object: String, detail: String },
    /// A mutator call was rejected before any partial mutation occurred.
    Precondition(String),
    /// Wraps an error with the name of the pass that caused it.
    Pass {
        pass: &'static str,
        source: Box<Error>,
    },
    /// An operator the target cannot execute survived the pipeline.
    Unlowered { operator: String, shape: Vec<u32> },
    /// Pass-engine failure (e.g. a fixed point that does not converge).
    Engine(String),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    pub(crate) fn sanity(object: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Sanity {
            object: object.into(),
            detail: detail.into(),
        }
    }

    /// Attribute this error to a named pass.
    pub(crate) fn in_pass(self, pass: &'static str) -> Self {
        Error::Pass {
            pass,
            source: Box::new(self),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format(msg) => write!(f, "format error: {msg}"),
            Error::Sanity { object, detail } => {
                write!(f, "sanity check failed at {object}: {detail}")
            }
            Error::Precondition(msg) => write!(f, "precondition violated: {msg}"),
            Error::Pass { pass, source } => write!(f, "pass '{pass}': {source}"),
            Error::Unlowered { operator, shape } => {
                let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
                write!(
                    f,
                    "operator '{operator}' with shape ({}) cannot be executed by the target",
                    dims.join(",")
                )
            }
            Error::Engine(msg) => write!(f, "pass engine error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pass { source, .. } => Some(source),
            _ => None,
        }
    }
}
