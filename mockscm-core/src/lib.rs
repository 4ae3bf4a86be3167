//! MockSCM Core Library
//!
//! In-memory, deterministic source-control backend for exercising
//! source-control integrations without a real server:
//! - Content-addressed revision graph (SHA-1 commit hashes)
//! - Repositories with branches, tags and change requests
//! - Identifier resolution (hash, branch, tag, `change-request/<n>`)
//! - Process-wide controller registry
//! - Fault-injection and cancellable latency hooks
//! - JSON configuration and scenario replay

pub mod config;
pub mod controller;
pub mod error;
pub mod flags;
pub mod hooks;
pub mod object;
pub mod registry;
pub mod repository;
pub mod scenario;

pub use config::{ControllerConfig, LatencyConfig};
pub use controller::{Controller, DEFAULT_BRANCH};
pub use error::{Result, ScmError};
pub use flags::{ChangeRequestFlag, ChangeRequestFlags, RepositoryFlag, RepositoryFlags};
pub use hooks::{
    CancelToken, Canceller, Checkpoint, FaultInjector, FaultRule, FixedLatency, JitterLatency,
    Latency, NoLatency, cancellation,
};
pub use object::{FileMap, FileType, LogEntry, ObjectId, Revision};
pub use repository::{
    MAX_CHANGE_REQUEST, Repository, change_request_ref, parse_change_request_ref,
};
pub use scenario::{FileContent, Scenario, Step};
