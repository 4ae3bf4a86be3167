//! Controller: the single entry point to a set of mock repositories
//!
//! All repository tables reachable from a controller sit behind one mutex,
//! so every mutation and every multi-table read is serialized against the
//! others. Hooks (latency, faults) run on snapshots taken under the lock but
//! are evaluated after releasing it, so a slow hook never blocks other
//! callers.

use crate::config::ControllerConfig;
use crate::error::{Result, ScmError};
use crate::flags::{ChangeRequestFlags, RepositoryFlags};
use crate::hooks::{CancelToken, Checkpoint, FaultInjector, Latency, NoLatency};
use crate::object::{FileType, LogEntry, ObjectId, Revision};
use crate::repository::Repository;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Branch every new repository starts with
pub const DEFAULT_BRANCH: &str = "master";

/// Wall-clock milliseconds that never repeat or go backwards
#[derive(Debug, Default)]
struct MonotonicClock {
    last: i64,
}

impl MonotonicClock {
    fn now(&mut self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        self.last = wall.max(self.last + 1);
        self.last
    }
}

struct ControllerState {
    repositories: BTreeMap<String, Repository>,
    faults: Vec<Arc<dyn FaultInjector>>,
    latency: Arc<dyn Latency>,
    clock: MonotonicClock,
    display_name: Option<String>,
    description: Option<String>,
    url: Option<String>,
    repo_icon_class_name: Option<String>,
    org_icon_class_name: Option<String>,
}

/// Mock source-control backend
pub struct Controller {
    id: String,
    state: Mutex<ControllerState>,
}

impl Controller {
    /// Create a controller that is not in the process-wide registry.
    ///
    /// Use [`Controller::create`] for one that [`Controller::lookup`] can find.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ControllerState {
                repositories: BTreeMap::new(),
                faults: Vec::new(),
                latency: Arc::new(NoLatency),
                clock: MonotonicClock::default(),
                display_name: None,
                description: None,
                url: None,
                repo_icon_class_name: None,
                org_icon_class_name: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_repo<T>(&self, name: &str, f: impl FnOnce(&Repository) -> Result<T>) -> Result<T> {
        let state = self.state();
        let repo = state
            .repositories
            .get(name)
            .ok_or_else(|| ScmError::UnknownRepository(name.to_string()))?;
        f(repo)
    }

    fn with_repo_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Repository, &mut MonotonicClock) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state();
        let state = &mut *guard;
        let repo = state
            .repositories
            .get_mut(name)
            .ok_or_else(|| ScmError::UnknownRepository(name.to_string()))?;
        f(repo, &mut state.clock)
    }

    /// Deregister from the process-wide registry and drop all repositories.
    ///
    /// Revisions already handed out stay valid.
    pub fn close(&self) {
        crate::registry::unregister(&self.id);
        self.state().repositories.clear();
        info!(controller = %self.id, "controller closed");
    }

    /// Apply controller metadata and latency from a configuration
    pub fn configure(&self, config: &ControllerConfig) {
        let mut state = self.state();
        state.display_name = config.display_name.clone();
        state.description = config.description.clone();
        state.url = config.url.clone();
        state.repo_icon_class_name = config.repo_icon_class_name.clone();
        state.org_icon_class_name = config.org_icon_class_name.clone();
        state.latency = config.latency.build();
    }

    // ── Hooks ──────────────────────────────────────────────────

    pub fn set_latency(&self, latency: impl Latency + 'static) {
        self.state().latency = Arc::new(latency);
    }

    pub fn add_fault(&self, fault: impl FaultInjector + 'static) {
        self.state().faults.push(Arc::new(fault));
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Run the latency policy; fails with [`ScmError::Cancelled`] if
    /// `cancel` fires during the wait.
    pub fn apply_latency(&self, cancel: &CancelToken) -> Result<()> {
        let latency = self.state().latency.clone();
        latency.apply(cancel)
    }

    /// Run every registered fault injector against this checkpoint
    pub fn check_faults(
        &self,
        repository: Option<&str>,
        branch: Option<&str>,
        revision: Option<&str>,
        actions: bool,
    ) -> Result<()> {
        let faults = self.state().faults.clone();
        let point = Checkpoint {
            repository,
            branch,
            revision,
            actions,
        };
        faults.iter().try_for_each(|fault| fault.check(&point))
    }

    // ── Controller metadata ────────────────────────────────────

    pub fn display_name(&self) -> Option<String> {
        self.state().display_name.clone()
    }

    pub fn set_display_name(&self, display_name: Option<String>) {
        self.state().display_name = display_name;
    }

    pub fn description(&self) -> Option<String> {
        self.state().description.clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        self.state().description = description;
    }

    pub fn url(&self) -> Option<String> {
        self.state().url.clone()
    }

    pub fn set_url(&self, url: Option<String>) {
        self.state().url = url;
    }

    pub fn repo_icon_class_name(&self) -> Option<String> {
        self.state().repo_icon_class_name.clone()
    }

    pub fn set_repo_icon_class_name(&self, class_name: Option<String>) {
        self.state().repo_icon_class_name = class_name;
    }

    pub fn org_icon_class_name(&self) -> Option<String> {
        self.state().org_icon_class_name.clone()
    }

    pub fn set_org_icon_class_name(&self, class_name: Option<String>) {
        self.state().org_icon_class_name = class_name;
    }

    // ── Repositories ───────────────────────────────────────────

    /// Create (or silently replace) a repository with a `master` branch
    /// at an empty root revision.
    pub fn create_repository(&self, name: &str) {
        self.create_repository_with_flags(name, RepositoryFlags::new());
    }

    pub fn create_repository_with_flags(&self, name: &str, flags: RepositoryFlags) {
        let mut guard = self.state();
        let state = &mut *guard;
        let mut repo = Repository::new(name, flags);
        repo.create_branch(DEFAULT_BRANCH, state.clock.now());
        if state.repositories.insert(name.to_string(), repo).is_some() {
            debug!(repository = name, "replaced existing repository");
        } else {
            debug!(repository = name, "created repository");
        }
    }

    /// Remove a repository; returns whether it existed
    pub fn delete_repository(&self, name: &str) -> bool {
        let removed = self.state().repositories.remove(name).is_some();
        debug!(repository = name, removed, "deleted repository");
        removed
    }

    pub fn list_repositories(&self) -> Vec<String> {
        self.state().repositories.keys().cloned().collect()
    }

    pub fn repository_description(&self, repository: &str) -> Result<Option<String>> {
        self.with_repo(repository, |repo| Ok(repo.description().map(str::to_string)))
    }

    pub fn set_repository_description(&self, repository: &str, description: Option<String>) -> Result<()> {
        self.with_repo_mut(repository, |repo, _| {
            repo.set_description(description);
            Ok(())
        })
    }

    pub fn repository_display_name(&self, repository: &str) -> Result<Option<String>> {
        self.with_repo(repository, |repo| Ok(repo.display_name().map(str::to_string)))
    }

    pub fn set_repository_display_name(&self, repository: &str, display_name: Option<String>) -> Result<()> {
        self.with_repo_mut(repository, |repo, _| {
            repo.set_display_name(display_name);
            Ok(())
        })
    }

    pub fn repository_url(&self, repository: &str) -> Result<Option<String>> {
        self.with_repo(repository, |repo| Ok(repo.url().map(str::to_string)))
    }

    pub fn set_repository_url(&self, repository: &str, url: Option<String>) -> Result<()> {
        self.with_repo_mut(repository, |repo, _| {
            repo.set_url(url);
            Ok(())
        })
    }

    pub fn flags(&self, repository: &str) -> Result<RepositoryFlags> {
        self.with_repo(repository, |repo| Ok(repo.flags().clone()))
    }

    // ── Branches ───────────────────────────────────────────────

    /// Bind `branch` to a new empty root revision (not a copy of master)
    pub fn create_branch(&self, repository: &str, branch: &str) -> Result<ObjectId> {
        self.with_repo_mut(repository, |repo, clock| {
            let id = repo.create_branch(branch, clock.now());
            debug!(repository, branch, %id, "created branch");
            Ok(id)
        })
    }

    /// Point `dst` at the current tip of `src`
    pub fn clone_branch(&self, repository: &str, src: &str, dst: &str) -> Result<ObjectId> {
        self.with_repo_mut(repository, |repo, _| {
            let id = repo.clone_branch(src, dst)?;
            debug!(repository, src, dst, %id, "cloned branch");
            Ok(id)
        })
    }

    pub fn delete_branch(&self, repository: &str, branch: &str) -> Result<()> {
        self.with_repo_mut(repository, |repo, _| {
            repo.delete_branch(branch);
            debug!(repository, branch, "deleted branch");
            Ok(())
        })
    }

    pub fn list_branches(&self, repository: &str) -> Result<Vec<String>> {
        self.with_repo(repository, |repo| Ok(repo.branches().map(str::to_string).collect()))
    }

    // ── Tags ───────────────────────────────────────────────────

    /// Tag the current revision of `branch`, dated now; returns the date
    pub fn create_tag(&self, repository: &str, branch: &str, tag: &str) -> Result<i64> {
        self.with_repo_mut(repository, |repo, clock| {
            let when = clock.now();
            let id = repo.create_tag(branch, tag, when)?;
            debug!(repository, branch, tag, %id, "created tag");
            Ok(when)
        })
    }

    /// Tag the current revision of `branch` with an explicit date
    pub fn create_tag_at(&self, repository: &str, branch: &str, tag: &str, when: i64) -> Result<()> {
        self.with_repo_mut(repository, |repo, _| {
            let id = repo.create_tag(branch, tag, when)?;
            debug!(repository, branch, tag, %id, when, "created tag");
            Ok(())
        })
    }

    pub fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.with_repo_mut(repository, |repo, _| {
            repo.delete_tag(tag);
            debug!(repository, tag, "deleted tag");
            Ok(())
        })
    }

    pub fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.with_repo(repository, |repo| Ok(repo.tags().map(str::to_string).collect()))
    }

    pub fn tag_timestamp(&self, repository: &str, tag: &str) -> Result<i64> {
        self.with_repo(repository, |repo| repo.tag_timestamp(tag))
    }

    // ── Change requests ────────────────────────────────────────

    pub fn open_change_request(&self, repository: &str, branch: &str) -> Result<u32> {
        self.open_change_request_with_flags(repository, branch, ChangeRequestFlags::new())
    }

    pub fn open_change_request_with_flags(
        &self,
        repository: &str,
        branch: &str,
        flags: ChangeRequestFlags,
    ) -> Result<u32> {
        self.with_repo_mut(repository, |repo, _| {
            let number = repo.open_change_request(branch, flags)?;
            debug!(repository, branch, number, "opened change request");
            Ok(number)
        })
    }

    pub fn close_change_request(&self, repository: &str, number: u32) -> Result<()> {
        self.with_repo_mut(repository, |repo, _| {
            repo.close_change_request(number);
            debug!(repository, number, "closed change request");
            Ok(())
        })
    }

    /// Target branch of an open change request
    pub fn change_request_target(&self, repository: &str, number: u32) -> Result<String> {
        self.with_repo(repository, |repo| repo.change_request_target(number).map(str::to_string))
    }

    pub fn change_request_flags(&self, repository: &str, number: u32) -> Result<ChangeRequestFlags> {
        self.with_repo(repository, |repo| repo.change_request_flags(number).cloned())
    }

    pub fn list_change_requests(&self, repository: &str) -> Result<Vec<u32>> {
        self.with_repo(repository, |repo| Ok(repo.change_requests().collect()))
    }

    // ── Files ──────────────────────────────────────────────────

    /// Add or overwrite one file on a branch or `change-request/<n>`
    pub fn add_file(
        &self,
        repository: &str,
        branch_or_cr: &str,
        message: &str,
        path: &str,
        content: impl Into<Bytes>,
    ) -> Result<ObjectId> {
        let content = content.into();
        self.with_repo_mut(repository, |repo, clock| {
            let id = repo.commit(
                branch_or_cr,
                Some(message.to_string()),
                clock.now(),
                [(path.to_string(), content)],
                std::iter::empty::<String>(),
            )?;
            debug!(repository, target = branch_or_cr, path, %id, "added file");
            Ok(id)
        })
    }

    /// Remove one file on a branch or `change-request/<n>`.
    ///
    /// Removing an absent path still records a new revision.
    pub fn rm_file(&self, repository: &str, branch_or_cr: &str, message: &str, path: &str) -> Result<ObjectId> {
        self.with_repo_mut(repository, |repo, clock| {
            let id = repo.commit(
                branch_or_cr,
                Some(message.to_string()),
                clock.now(),
                std::iter::empty::<(String, Bytes)>(),
                [path.to_string()],
            )?;
            debug!(repository, target = branch_or_cr, path, %id, "removed file");
            Ok(id)
        })
    }

    // ── Resolution ─────────────────────────────────────────────

    /// Resolve a hash, branch, tag or `change-request/<n>` to its revision
    pub fn resolve(&self, repository: &str, identifier: &str) -> Result<Arc<Revision>> {
        self.with_repo(repository, |repo| repo.resolve(identifier).cloned())
    }

    /// Hash the identifier currently resolves to
    pub fn revision(&self, repository: &str, identifier: &str) -> Result<ObjectId> {
        self.with_repo(repository, |repo| Ok(repo.resolve(identifier)?.id()))
    }

    /// History from the resolved revision back to its root
    pub fn log(&self, repository: &str, identifier: &str) -> Result<Vec<LogEntry>> {
        Ok(self.resolve(repository, identifier)?.log())
    }

    pub fn stat(&self, repository: &str, identifier: &str, path: &str) -> Result<FileType> {
        Ok(self.resolve(repository, identifier)?.stat(path))
    }

    /// Timestamp of the resolved revision, or 0 if it does not resolve
    pub fn last_modified(&self, repository: &str, identifier: &str) -> i64 {
        self.resolve(repository, identifier)
            .map(|revision| revision.timestamp())
            .unwrap_or(0)
    }

    /// Write every file of the resolved revision under `target`.
    ///
    /// Absolute paths are nested under `target`; a path containing `..` is
    /// rejected before anything is written. Otherwise stops at the first
    /// write failure and leaves files already written.
    pub fn checkout(&self, target: &Path, repository: &str, identifier: &str) -> Result<ObjectId> {
        let revision = self.resolve(repository, identifier)?;
        let files = revision
            .files()
            .iter()
            .map(|(path, content)| Ok((checkout_path(target, path)?, content)))
            .collect::<Result<Vec<_>>>()?;
        for (dest, content) in files {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, content)?;
        }
        debug!(repository, identifier, files = revision.files().len(), "checked out");
        Ok(revision.id())
    }
}

/// Location of a stored file under a checkout directory
fn checkout_path(target: &Path, path: &str) -> Result<PathBuf> {
    let mut dest = target.to_path_buf();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path leaves the checkout directory: {}", path),
                )
                .into());
            }
        }
    }
    if dest.as_path() == target {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path names the checkout directory itself: {:?}", path),
        )
        .into());
    }
    Ok(dest)
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").field("id", &self.id).finish_non_exhaustive()
    }
}
