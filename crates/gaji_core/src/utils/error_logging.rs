//! Formatting helpers for errors that are logged and absorbed

use std::fmt;

/// Log a surfaced error at ERROR level with its miette rendering
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let err = &$err;
        tracing::error!("{:?}", err);
    }};
    ($msg:expr, $err:expr) => {{
        let err = &$err;
        tracing::error!("{}: {:?}", $msg, err);
    }};
}

/// Displays an error followed by its sources on one line: `outer: inner: root`.
///
/// Used in structured log fields where a fallback swallows the error, so the
/// root cause still reaches the logs.
pub struct ErrorChain<'a>(pub &'a (dyn std::error::Error + 'a));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut current = self.0.source();
        while let Some(source) = current {
            write!(f, ": {}", source)?;
            current = source.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("root cause")]
    struct Root;

    #[derive(Debug, thiserror::Error)]
    #[error("lookup failed")]
    struct Outer(#[source] Root);

    #[test]
    fn test_chain_includes_sources() {
        let err = Outer(Root);
        assert_eq!(ErrorChain(&err).to_string(), "lookup failed: root cause");
    }

    #[test]
    fn test_chain_without_source() {
        assert_eq!(ErrorChain(&Root).to_string(), "root cause");
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_log_error_includes_context() {
        crate::log_error!("prompt build failed", crate::CoreError::scenario_not_found("scn-404"));
        assert!(logs_contain("prompt build failed"));
    }
}
