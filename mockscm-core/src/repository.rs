//! In-memory repository
//!
//! Holds the append-only revision store and the mutable name tables
//! (branches, tags, change requests) that point into it. A `Repository` is
//! never shared directly; the [`Controller`](crate::Controller) owns it and
//! serializes every access.

use crate::error::{Result, ScmError};
use crate::flags::{ChangeRequestFlags, RepositoryFlags};
use crate::object::{ObjectId, Revision};
use bytes::Bytes;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

/// Textual prefix of change-request references
pub const CHANGE_REQUEST_PREFIX: &str = "change-request/";

/// Largest change-request number; references carry at most nine digits
pub const MAX_CHANGE_REQUEST: u32 = 999_999_999;

static CHANGE_REQUEST_REF: OnceLock<Regex> = OnceLock::new();

/// Render the reference used to address change request `number`
pub fn change_request_ref(number: u32) -> String {
    format!("{}{}", CHANGE_REQUEST_PREFIX, number)
}

/// Parse `change-request/<digits>`.
///
/// At most nine digits are accepted so the number always fits; longer
/// strings are treated as ordinary names.
pub fn parse_change_request_ref(identifier: &str) -> Option<u32> {
    let pattern = CHANGE_REQUEST_REF.get_or_init(|| {
        Regex::new(r"^change-request/(\d{1,9})$").expect("change-request pattern is valid")
    });
    pattern
        .captures(identifier)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Name table entry a file mutation advances
enum WriteTarget {
    Branch(String),
    ChangeRequest(u32),
}

/// A single named repository
#[derive(Debug)]
pub struct Repository {
    name: String,

    /// Commit store, never pruned
    revisions: HashMap<ObjectId, Arc<Revision>>,

    /// Branch name -> tip
    heads: BTreeMap<String, ObjectId>,

    tags: BTreeMap<String, ObjectId>,
    tag_dates: BTreeMap<String, i64>,

    /// Change request number -> tip
    changes: BTreeMap<u32, ObjectId>,
    /// Change request number -> target branch
    change_baselines: BTreeMap<u32, String>,
    change_flags: BTreeMap<u32, ChangeRequestFlags>,
    last_change_request: u32,

    flags: RepositoryFlags,

    description: Option<String>,
    display_name: Option<String>,
    url: Option<String>,
}

impl Repository {
    /// Create an empty repository with no branches
    pub(crate) fn new(name: &str, flags: RepositoryFlags) -> Self {
        Self {
            name: name.to_string(),
            revisions: HashMap::new(),
            heads: BTreeMap::new(),
            tags: BTreeMap::new(),
            tag_dates: BTreeMap::new(),
            changes: BTreeMap::new(),
            change_baselines: BTreeMap::new(),
            change_flags: BTreeMap::new(),
            last_change_request: 0,
            flags,
            description: None,
            display_name: None,
            url: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn store(&mut self, revision: Revision) -> ObjectId {
        let id = revision.id();
        self.revisions.entry(id).or_insert_with(|| Arc::new(revision));
        id
    }

    fn revision(&self, id: ObjectId, identifier: &str) -> Result<&Arc<Revision>> {
        self.revisions.get(&id).ok_or_else(|| ScmError::UnknownRevision {
            repository: self.name.clone(),
            identifier: identifier.to_string(),
        })
    }

    // ── Read side ──────────────────────────────────────────────

    /// Resolve an identifier to a revision.
    ///
    /// Tried in order: literal hash, branch, tag, `change-request/<n>`. A
    /// change-request reference to a number that is not open is an error,
    /// not a fallthrough.
    pub fn resolve(&self, identifier: &str) -> Result<&Arc<Revision>> {
        if let Some(revision) =
            ObjectId::parse_canonical(identifier).and_then(|id| self.revisions.get(&id))
        {
            return Ok(revision);
        }
        if let Some(id) = self.heads.get(identifier) {
            return self.revision(*id, identifier);
        }
        if let Some(id) = self.tags.get(identifier) {
            return self.revision(*id, identifier);
        }
        if let Some(number) = parse_change_request_ref(identifier) {
            return match self.changes.get(&number) {
                Some(id) => self.revision(*id, identifier),
                None => Err(self.unknown_change_request(number)),
            };
        }
        Err(ScmError::UnknownRevision {
            repository: self.name.clone(),
            identifier: identifier.to_string(),
        })
    }

    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.heads.keys().map(String::as_str)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    pub fn change_requests(&self) -> impl Iterator<Item = u32> + '_ {
        self.changes.keys().copied()
    }

    /// Number of revisions ever stored, reachable or not
    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }

    pub fn tag_timestamp(&self, tag: &str) -> Result<i64> {
        self.tag_dates.get(tag).copied().ok_or_else(|| ScmError::UnknownTag {
            repository: self.name.clone(),
            tag: tag.to_string(),
        })
    }

    /// Target branch of an open change request
    pub fn change_request_target(&self, number: u32) -> Result<&str> {
        self.change_baselines
            .get(&number)
            .map(String::as_str)
            .ok_or_else(|| self.unknown_change_request(number))
    }

    pub fn flags(&self) -> &RepositoryFlags {
        &self.flags
    }

    pub fn change_request_flags(&self, number: u32) -> Result<&ChangeRequestFlags> {
        self.change_flags
            .get(&number)
            .ok_or_else(|| self.unknown_change_request(number))
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, display_name: Option<String>) {
        self.display_name = display_name;
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: Option<String>) {
        self.url = url;
    }

    // ── Branches ───────────────────────────────────────────────

    /// Bind `branch` to a fresh, empty root revision
    pub fn create_branch(&mut self, branch: &str, timestamp: i64) -> ObjectId {
        let id = self.store(Revision::root(timestamp));
        self.heads.insert(branch.to_string(), id);
        id
    }

    /// Bind `dst` to the current tip of `src`
    pub fn clone_branch(&mut self, src: &str, dst: &str) -> Result<ObjectId> {
        let id = *self.heads.get(src).ok_or_else(|| self.unknown_branch(src))?;
        self.heads.insert(dst.to_string(), id);
        Ok(id)
    }

    /// Remove the branch binding; its revisions stay in the store
    pub fn delete_branch(&mut self, branch: &str) -> bool {
        self.heads.remove(branch).is_some()
    }

    // ── Tags ───────────────────────────────────────────────────

    /// Bind `tag` to whatever `identifier` resolves to, dated `when`
    pub fn create_tag(&mut self, identifier: &str, tag: &str, when: i64) -> Result<ObjectId> {
        let id = self.resolve(identifier)?.id();
        self.tags.insert(tag.to_string(), id);
        self.tag_dates.insert(tag.to_string(), when);
        Ok(id)
    }

    pub fn delete_tag(&mut self, tag: &str) -> bool {
        self.tag_dates.remove(tag);
        self.tags.remove(tag).is_some()
    }

    // ── Change requests ────────────────────────────────────────

    /// Open a change request at the tip of `branch` targeting it.
    ///
    /// Numbers are never reused, even after a close.
    pub fn open_change_request(&mut self, branch: &str, flags: ChangeRequestFlags) -> Result<u32> {
        let id = self.resolve(branch)?.id();
        if self.last_change_request >= MAX_CHANGE_REQUEST {
            return Err(ScmError::ChangeRequestsExhausted {
                repository: self.name.clone(),
            });
        }
        self.last_change_request += 1;
        let number = self.last_change_request;
        self.changes.insert(number, id);
        self.change_baselines.insert(number, branch.to_string());
        self.change_flags.insert(number, flags);
        Ok(number)
    }

    pub fn close_change_request(&mut self, number: u32) -> bool {
        self.change_baselines.remove(&number);
        self.change_flags.remove(&number);
        self.changes.remove(&number).is_some()
    }

    // ── Files ──────────────────────────────────────────────────

    fn write_target(&self, branch_or_cr: &str) -> Result<(WriteTarget, ObjectId)> {
        if let Some(id) = self.heads.get(branch_or_cr) {
            return Ok((WriteTarget::Branch(branch_or_cr.to_string()), *id));
        }
        match parse_change_request_ref(branch_or_cr) {
            Some(number) => match self.changes.get(&number) {
                Some(id) => Ok((WriteTarget::ChangeRequest(number), *id)),
                None => Err(self.unknown_change_request(number)),
            },
            None => Err(self.unknown_branch(branch_or_cr)),
        }
    }

    /// Append a revision on top of a branch or open change request and
    /// advance it. Nothing is written if the target does not resolve.
    pub fn commit<A, R>(
        &mut self,
        branch_or_cr: &str,
        message: Option<String>,
        timestamp: i64,
        added: A,
        removed: R,
    ) -> Result<ObjectId>
    where
        A: IntoIterator<Item = (String, Bytes)>,
        R: IntoIterator<Item = String>,
    {
        let (target, base) = self.write_target(branch_or_cr)?;
        let parent = self.revision(base, branch_or_cr)?.clone();
        let id = self.store(Revision::child(parent, message, timestamp, added, removed));
        match target {
            WriteTarget::Branch(branch) => {
                self.heads.insert(branch, id);
            }
            WriteTarget::ChangeRequest(number) => {
                self.changes.insert(number, id);
            }
        }
        Ok(id)
    }

    fn unknown_branch(&self, branch: &str) -> ScmError {
        ScmError::UnknownBranch {
            repository: self.name.clone(),
            branch: branch.to_string(),
        }
    }

    fn unknown_change_request(&self, number: u32) -> ScmError {
        ScmError::UnknownChangeRequest {
            repository: self.name.clone(),
            number,
        }
    }
}
