//! Error Taxonomy
//!
//! Every failure the engine can report. Configuration and extraction errors are
//! raised synchronously at setup time; dispatch errors surface from the
//! intercepted call; verification errors carry the full aggregated report.

use thiserror::Error;

use crate::sequence::SequenceFailure;
use crate::value::Fault;
use crate::verify::VerificationReport;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SubstituteError>;

/// Reasons a call-describing expression cannot be turned into a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("expression must start at the substitute target: {0}")]
    DetachedExpression(String),

    #[error("unsupported expression: {0}")]
    UnsupportedNode(String),

    #[error("field '{field}' on '{contract}' cannot be intercepted")]
    FieldAccess { contract: String, field: String },

    #[error("'{contract}' has no {kind} named '{member}' taking {arity} argument(s)")]
    UnknownMember {
        contract: String,
        kind: String,
        member: String,
        arity: usize,
    },

    #[error("'{contract}.{member}' is not overridable and cannot be intercepted")]
    NotOverridable { contract: String, member: String },

    #[error("intermediate member '{member}' returns non-substitutable type '{returns}'")]
    NotSubstitutable { member: String, returns: String },

    #[error("intermediate expression '{0}' cannot be re-invoked to reach the next member")]
    NotReinvokable(String),

    #[error("multi-dimensional indexer hop '{0}' is only allowed as the final segment")]
    IndexerHop(String),

    #[error("'{member}' expects {expected} generic argument(s), got {actual}")]
    GenericArity {
        member: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Errors raised by the substitute engine
#[derive(Debug, Clone, Error)]
pub enum SubstituteError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("no evaluator registered for matcher '{scope}::{name}' with {arity} argument(s)")]
    MissingMatcherEvaluator {
        scope: String,
        name: String,
        arity: usize,
    },

    #[error("'{member}' expects {expected} argument(s), got {actual}")]
    ArgumentCountMismatch {
        member: String,
        expected: usize,
        actual: usize,
    },

    #[error("strict substitute '{substitute}' has no setup for invocation {invocation}")]
    NoSetup {
        substitute: String,
        invocation: String,
    },

    #[error("strict setup '{setup}' on '{substitute}' requires a return value")]
    ReturnValueRequired { substitute: String, setup: String },

    #[error("call-count range {range} admits no count: {reason}")]
    InvalidTimes { range: String, reason: String },

    #[error("constructor arguments cannot be passed to a substitute of interface '{contract}'")]
    ConstructorArguments { contract: String },

    #[error("{0}")]
    VerificationFailed(VerificationReport),

    #[error("{0}")]
    SequenceVerification(SequenceFailure),

    #[error("{0}")]
    Thrown(Fault),
}

impl SubstituteError {
    /// The configured fault, when this error is one a setup raised on purpose
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            SubstituteError::Thrown(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn is_no_setup(&self) -> bool {
        matches!(self, SubstituteError::NoSetup { .. })
    }

    pub fn is_verification_failure(&self) -> bool {
        matches!(self, SubstituteError::VerificationFailed(_))
    }
}

impl From<Fault> for SubstituteError {
    fn from(fault: Fault) -> Self {
        SubstituteError::Thrown(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_error_converts() {
        let err: SubstituteError = ExtractionError::UnsupportedNode("x + 1".into()).into();
        assert!(matches!(err, SubstituteError::Extraction(_)));
        assert!(err.to_string().contains("x + 1"));
    }

    #[test]
    fn test_thrown_fault_is_recoverable() {
        let err: SubstituteError = Fault::new("IoError", "disk full").into();
        assert_eq!(err.as_fault().map(|f| f.kind()), Some("IoError"));
        assert!(!err.is_no_setup());
    }
}
