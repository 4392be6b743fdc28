use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to map register window from {path:?}: {source}")]
    Acquisition {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("clock generator still busy after {spins} polls")]
    ClockBusy { spins: usize },
    #[error("clock divider {0} is outside the supported range")]
    InvalidDivider(u32),
    #[error("exclusive timing scope failed: {0}")]
    CriticalSection(String),
    #[error("device is busy: another reader holds it open")]
    Busy,
    #[error("this operation isn't supported")]
    Unsupported,
    #[error("no capture has been taken yet")]
    NoCapture,
    #[error("wire length mismatch: expected {expected} bytes, got {actual}")]
    WireLength { expected: usize, actual: usize },
    #[error("failed to install the stop signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("capture writer thread panicked")]
    WriterPanicked,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_failures_have_their_own_variants() {
        let err: Error = ctrlc::Error::MultipleHandlers.into();
        assert!(matches!(err, Error::Signal(_)));
        assert_eq!(
            Error::WriterPanicked.to_string(),
            "capture writer thread panicked"
        );
    }
}
