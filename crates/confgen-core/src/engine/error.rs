use crate::core::forcefield::oracle::ForceFieldError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Outcome of generating conformers for one molecule.
///
/// This is the only failure information that crosses worker boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    Success,
    /// Conformers were produced, but the automorphism budget was exhausted so some
    /// symmetric duplicates may remain.
    TooMuchSymmetry,
    /// The per-molecule time limit was hit. Conformers found before that are kept.
    Timeout,
    Aborted,
    ForceFieldSetupFailed,
    ForceFieldMinimizationFailed,
    FragmentConfGenFailed,
    FragmentLibraryNotSet,
    ConfGenFailed,
}

impl ReturnCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::TooMuchSymmetry => "TOO_MUCH_SYMMETRY",
            Self::Timeout => "TIMEOUT",
            Self::Aborted => "ABORTED",
            Self::ForceFieldSetupFailed => "FORCEFIELD_SETUP_FAILED",
            Self::ForceFieldMinimizationFailed => "FORCEFIELD_MINIMIZATION_FAILED",
            Self::FragmentConfGenFailed => "FRAGMENT_CONF_GEN_FAILED",
            Self::FragmentLibraryNotSet => "FRAGMENT_LIBRARY_NOT_SET",
            Self::ConfGenFailed => "CONF_GEN_FAILED",
        }
    }

    /// Whether a molecule with this code and `conformers` results goes to the
    /// succeeded stream.
    pub fn is_success(self, conformers: usize) -> bool {
        match self {
            Self::Success | Self::TooMuchSymmetry => true,
            Self::Timeout => conformers > 0,
            _ => false,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Force-field setup failed: {0}")]
    ForceFieldSetup(#[source] ForceFieldError),

    #[error("Force-field minimization failed for every candidate: {0}")]
    Minimization(#[source] ForceFieldError),

    #[error("Conformer generation failed for fragment {fingerprint:016x}: {reason}")]
    FragmentGeneration { fingerprint: u64, reason: String },

    #[error("Fragment library is required but not set")]
    FragmentLibraryNotSet,

    #[error("Conformer generation failed: {0}")]
    Generation(String),

    #[error("Time limit reached before any conformer was produced")]
    Timeout,

    #[error("Generation was aborted")]
    Aborted,

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> ReturnCode {
        match self {
            Self::ForceFieldSetup(_) => ReturnCode::ForceFieldSetupFailed,
            Self::Minimization(_) => ReturnCode::ForceFieldMinimizationFailed,
            Self::FragmentGeneration { .. } => ReturnCode::FragmentConfGenFailed,
            Self::FragmentLibraryNotSet => ReturnCode::FragmentLibraryNotSet,
            Self::Generation(_) | Self::Internal(_) => ReturnCode::ConfGenFailed,
            Self::Timeout => ReturnCode::Timeout,
            Self::Aborted => ReturnCode::Aborted,
        }
    }

    /// Errors that indicate a defect rather than a difficult molecule. The batch
    /// driver stops the whole run on the first one.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_onto_result_codes() {
        let setup = EngineError::ForceFieldSetup(ForceFieldError::EmptyStructure);
        assert_eq!(setup.code(), ReturnCode::ForceFieldSetupFailed);
        let fragment = EngineError::FragmentGeneration {
            fingerprint: 0xabcd,
            reason: "no trial succeeded".into(),
        };
        assert_eq!(fragment.code(), ReturnCode::FragmentConfGenFailed);
        assert!(fragment.to_string().contains("000000000000abcd"));
        assert_eq!(EngineError::Internal("x".into()).code(), ReturnCode::ConfGenFailed);
        assert!(EngineError::Internal("x".into()).is_unexpected());
        assert!(!EngineError::Aborted.is_unexpected());
    }

    #[test]
    fn timeout_is_a_success_only_with_results() {
        assert!(ReturnCode::Timeout.is_success(3));
        assert!(!ReturnCode::Timeout.is_success(0));
        assert!(ReturnCode::TooMuchSymmetry.is_success(0));
        assert!(!ReturnCode::Aborted.is_success(10));
        assert_eq!(ReturnCode::FragmentConfGenFailed.to_string(), "FRAGMENT_CONF_GEN_FAILED");
    }
}
