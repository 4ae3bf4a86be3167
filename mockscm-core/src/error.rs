//! Error types for MockSCM

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ScmError>;

/// Errors surfaced by the controller and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    #[error("Unknown branch: {branch} in repository {repository}")]
    UnknownBranch { repository: String, branch: String },

    #[error("Unknown tag: {tag} in repository {repository}")]
    UnknownTag { repository: String, tag: String },

    #[error("Unknown change request: {number} in repository {repository}")]
    UnknownChangeRequest { repository: String, number: u32 },

    #[error("Unknown branch/tag/revision: {identifier} in repository {repository}")]
    UnknownRevision { repository: String, identifier: String },

    #[error("No change request numbers left in repository {repository}")]
    ChangeRequestsExhausted { repository: String },

    /// Simulated failure raised by a fault injector
    #[error("Injected fault: {0}")]
    Fault(String),

    /// An interruptible wait was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scenario step {index} failed: {source}")]
    Step {
        index: usize,
        #[source]
        source: Box<ScmError>,
    },
}

impl ScmError {
    /// Whether this is one of the "unknown name" errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ScmError::UnknownRepository(_)
                | ScmError::UnknownBranch { .. }
                | ScmError::UnknownTag { .. }
                | ScmError::UnknownChangeRequest { .. }
                | ScmError::UnknownRevision { .. }
        )
    }
}

impl From<serde_json::Error> for ScmError {
    fn from(e: serde_json::Error) -> Self {
        ScmError::Config(e.to_string())
    }
}
