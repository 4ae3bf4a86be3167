//! Classification flags for repositories and change requests
//!
//! The controller only stores these; consumers decide which change-request
//! head variant to synthesize from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Repository-wide capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryFlag {
    /// Change requests can be built merged with their target
    Mergeable,
    /// Change requests may originate from forks
    Forkable,
}

/// Per-change-request properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestFlag {
    /// The change request comes from a fork
    Fork,
}

pub type RepositoryFlags = BTreeSet<RepositoryFlag>;
pub type ChangeRequestFlags = BTreeSet<ChangeRequestFlag>;
