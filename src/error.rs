//! Error type shared by all public operations.

use thiserror::Error;

/// Errors returned by decomposition, file loading and communication routines.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An argument was out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The process group is unknown or this rank is not a member.
    #[error("invalid process group {0}")]
    InvalidProcessGroup(usize),
    /// The communicator handle is unusable.
    #[error("invalid communicator: {0}")]
    InvalidCommunicator(String),
    /// A send, receive or collective failed.
    #[error("message passing failure: {0}")]
    MessagePassing(String),
    /// A tree description file could not be parsed.
    #[error("malformed tree file: {0}")]
    MalformedTreeFile(String),
    /// An active subdomain file could not be parsed.
    #[error("malformed active subdomain file: {0}")]
    MalformedSubdomainFile(String),
    /// The decomposition cannot be reconciled with the process group.
    #[error("decomposition mismatch: {0}")]
    DecompositionMismatch(String),
    /// A buffer could not be allocated.
    #[error("allocation failure: {0}")]
    Allocation(String),
    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Writing a visualisation file failed.
    #[error("export failure: {0}")]
    Export(String),
}

impl DomainError {
    /// Stable integer result code of the error.
    ///
    /// Zero is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            DomainError::InvalidArgument(_) => 1,
            DomainError::InvalidProcessGroup(_) => 2,
            DomainError::InvalidCommunicator(_) => 3,
            DomainError::MessagePassing(_) => 4,
            DomainError::MalformedTreeFile(_) => 5,
            DomainError::MalformedSubdomainFile(_) => 6,
            DomainError::DecompositionMismatch(_) => 7,
            DomainError::Allocation(_) => 8,
            DomainError::Io(_) => 9,
            DomainError::Export(_) => 10,
        }
    }
}

#[cfg(test)]
mod test {
    use super::DomainError;

    #[test]
    fn test_codes_are_distinct_and_nonzero() {
        let errors = [
            DomainError::InvalidArgument(String::new()),
            DomainError::InvalidProcessGroup(3),
            DomainError::InvalidCommunicator(String::new()),
            DomainError::MessagePassing(String::new()),
            DomainError::MalformedTreeFile(String::new()),
            DomainError::MalformedSubdomainFile(String::new()),
            DomainError::DecompositionMismatch(String::new()),
            DomainError::Allocation(String::new()),
            DomainError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)),
            DomainError::Export(String::new()),
        ];

        let mut codes = errors.iter().map(|e| e.code()).collect::<Vec<_>>();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_display() {
        let err = DomainError::InvalidProcessGroup(4);
        assert_eq!(format!("{err}"), "invalid process group 4");
    }
}
