use std::process::ExitCode;

/// Typed failures surfaced by the core components.
///
/// Command code wraps these in `anyhow::Error` for context; `main` downcasts
/// back to pick the process exit code. Wrapping never loses the kind.
#[derive(Debug, thiserror::Error)]
pub enum GtError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("contention: {0}")]
    Contention(String),

    #[error("dependency cycle: {0}")]
    Cycle(String),

    #[error("rig {0} is docked")]
    Docked(String),

    #[error("anchor gate refused: {0}")]
    Gate(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("{tool} failed (exit {code}): {message}")]
    External {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("escalation required: {0}")]
    Escalation(String),
}

impl GtError {
    /// Exit code for the CLI boundary: 0 success, 1 failure, 2 escalation.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Escalation(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }

    /// True for errors worth retrying against the bead backend.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::External { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ExitCode has no PartialEq; compare debug representations.
    fn code_repr(code: ExitCode) -> String {
        format!("{code:?}")
    }

    #[test]
    fn escalation_maps_to_exit_2() {
        let err = GtError::Escalation("verification gate".into());
        assert_eq!(code_repr(err.exit_code()), code_repr(ExitCode::from(2)));
    }

    #[test]
    fn ordinary_errors_map_to_exit_1() {
        assert_eq!(
            code_repr(GtError::NotFound("gt-x".into()).exit_code()),
            code_repr(ExitCode::FAILURE)
        );
        assert_eq!(
            code_repr(GtError::Docked("gastown".into()).exit_code()),
            code_repr(ExitCode::FAILURE)
        );
    }

    #[test]
    fn transient_classification() {
        assert!(GtError::Backend("daemon hiccup".into()).is_transient());
        assert!(!GtError::NotFound("gt-x".into()).is_transient());
        assert!(!GtError::Cycle("a -> b -> a".into()).is_transient());
    }

    #[test]
    fn kind_survives_anyhow_wrapping() {
        let err = anyhow::Error::new(GtError::Contention("claim lost 3x".into()))
            .context("claiming from queue reviews");
        let kind = err.downcast_ref::<GtError>();
        assert!(matches!(kind, Some(GtError::Contention(_))));
    }
}
