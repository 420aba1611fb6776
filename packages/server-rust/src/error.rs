//! Error types for building and running a probe.

/// Errors raised while assembling or starting a probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid probe configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("failed to spawn delivery thread {name:?}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn display_includes_context() {
        let err = ProbeError::InvalidConfig {
            reason: "park interval must be non-zero".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid probe configuration: park interval must be non-zero"
        );

        let err = ProbeError::ThreadSpawn {
            name: "async-probe".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no threads left"),
        };
        assert!(err.to_string().contains("async-probe"));
        assert!(err.source().is_some());
    }
}
