use crate::config::ConfigError;

/// Canonical error type used across all translation and normalization modules.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Protocol translation error: {0}")]
    Translation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CanonicalError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Wrap a coercion failure, naming the conversion step that failed.
    pub(crate) fn translation(step: &str, err: impl std::fmt::Display) -> Self {
        Self::Translation(format!("Failed to convert {step}: {err}"))
    }
}

/// The single error type surfaced at call boundaries.
///
/// Every failure escaping request preparation, response translation or chunk
/// normalization is wrapped exactly once into this type, so callers handle one
/// error regardless of which internal step failed.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy error: {0}")]
    Canonical(#[from] CanonicalError),
    #[error("proxy error: {0}")]
    Config(#[from] ConfigError),
}

impl ProxyError {
    /// The wrapped canonical cause, if this error came from a translation step.
    #[must_use]
    pub fn canonical(&self) -> Option<&CanonicalError> {
        match self {
            ProxyError::Canonical(err) => Some(err),
            ProxyError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_keeps_source() {
        let err = ProxyError::from(CanonicalError::invalid("message at index 0 is missing a role"));
        assert!(err.to_string().contains("missing a role"));
        assert!(matches!(
            err.canonical(),
            Some(CanonicalError::InvalidRequest(_))
        ));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_translation_names_step() {
        let err = CanonicalError::translation("tool_call arguments", "bad value");
        assert_eq!(
            err.to_string(),
            "Protocol translation error: Failed to convert tool_call arguments: bad value"
        );
    }
}
