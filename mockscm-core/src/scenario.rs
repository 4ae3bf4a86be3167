//! Scenario replay
//!
//! A scenario is a JSON document listing controller mutations in order. It
//! seeds fixtures for tests and re-populates a controller that was
//! re-attached by id after its state was lost.
//!
//! ```json
//! {
//!   "controller_id": "fixture",
//!   "steps": [
//!     { "op": "create_repository", "name": "r" },
//!     { "op": "add_file", "repository": "r", "target": "master",
//!       "message": "init", "path": "README.md", "content": "hello" },
//!     { "op": "add_file", "repository": "r", "target": "master",
//!       "message": "logo", "path": "logo.bin", "content": { "hex": "89504e47" } },
//!     { "op": "open_change_request", "repository": "r", "branch": "master" }
//!   ]
//! }
//! ```

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::{Result, ScmError};
use crate::flags::{ChangeRequestFlags, RepositoryFlags};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// File body in a scenario: a JSON string is stored as UTF-8, and
/// `{"hex": "..."}` carries arbitrary bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    Text(String),
    Hex { hex: String },
}

impl FileContent {
    pub fn to_bytes(&self) -> Result<Bytes> {
        match self {
            FileContent::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            FileContent::Hex { hex } => hex::decode(hex)
                .map(Bytes::from)
                .map_err(|e| ScmError::Config(format!("invalid hex file content: {}", e))),
        }
    }
}

/// One controller mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    CreateRepository {
        name: String,
        #[serde(default)]
        flags: RepositoryFlags,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    DeleteRepository {
        name: String,
    },
    CreateBranch {
        repository: String,
        branch: String,
    },
    CloneBranch {
        repository: String,
        src: String,
        dst: String,
    },
    DeleteBranch {
        repository: String,
        branch: String,
    },
    CreateTag {
        repository: String,
        branch: String,
        tag: String,
        /// Tag date in epoch milliseconds; now if absent
        #[serde(default)]
        when: Option<i64>,
    },
    DeleteTag {
        repository: String,
        tag: String,
    },
    OpenChangeRequest {
        repository: String,
        branch: String,
        #[serde(default)]
        flags: ChangeRequestFlags,
    },
    CloseChangeRequest {
        repository: String,
        number: u32,
    },
    AddFile {
        repository: String,
        /// Branch name or `change-request/<n>`
        target: String,
        message: String,
        path: String,
        content: FileContent,
    },
    RmFile {
        repository: String,
        target: String,
        message: String,
        path: String,
    },
}

impl Step {
    pub fn apply(&self, controller: &Controller) -> Result<()> {
        match self {
            Step::CreateRepository {
                name,
                flags,
                description,
                display_name,
                url,
            } => {
                controller.create_repository_with_flags(name, flags.clone());
                controller.set_repository_description(name, description.clone())?;
                controller.set_repository_display_name(name, display_name.clone())?;
                controller.set_repository_url(name, url.clone())?;
            }
            Step::DeleteRepository { name } => {
                controller.delete_repository(name);
            }
            Step::CreateBranch { repository, branch } => {
                controller.create_branch(repository, branch)?;
            }
            Step::CloneBranch { repository, src, dst } => {
                controller.clone_branch(repository, src, dst)?;
            }
            Step::DeleteBranch { repository, branch } => {
                controller.delete_branch(repository, branch)?;
            }
            Step::CreateTag {
                repository,
                branch,
                tag,
                when,
            } => match when {
                Some(when) => controller.create_tag_at(repository, branch, tag, *when)?,
                None => {
                    controller.create_tag(repository, branch, tag)?;
                }
            },
            Step::DeleteTag { repository, tag } => {
                controller.delete_tag(repository, tag)?;
            }
            Step::OpenChangeRequest {
                repository,
                branch,
                flags,
            } => {
                controller.open_change_request_with_flags(repository, branch, flags.clone())?;
            }
            Step::CloseChangeRequest { repository, number } => {
                controller.close_change_request(repository, *number)?;
            }
            Step::AddFile {
                repository,
                target,
                message,
                path,
                content,
            } => {
                let content = content.to_bytes()?;
                controller.add_file(repository, target, message, path, content)?;
            }
            Step::RmFile {
                repository,
                target,
                message,
                path,
            } => {
                controller.rm_file(repository, target, message, path)?;
            }
        }
        Ok(())
    }
}

/// Ordered list of steps plus optional controller identity and settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Re-attach to (or register) this id instead of a random one
    pub controller_id: Option<String>,
    pub config: Option<ControllerConfig>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Replay every step, stopping at the first failure
    pub fn apply(&self, controller: &Controller) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            step.apply(controller).map_err(|source| ScmError::Step {
                index,
                source: Box::new(source),
            })?;
        }
        tracing::debug!(controller = controller.id(), steps = self.steps.len(), "scenario applied");
        Ok(())
    }

    /// Obtain a registered controller (re-attached when `controller_id` is
    /// set), configure it, and replay the steps into it.
    pub fn instantiate(&self) -> Result<Arc<Controller>> {
        let controller = match &self.controller_id {
            Some(id) => Controller::recreate(id),
            None => Controller::create(),
        };
        if let Some(config) = &self.config {
            controller.configure(config);
        }
        self.apply(&controller)?;
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::RepositoryFlag;

    const FIXTURE: &str = r#"{
        "steps": [
            { "op": "create_repository", "name": "r", "flags": ["mergeable"], "description": "demo" },
            { "op": "add_file", "repository": "r", "target": "master", "message": "m1", "path": "a.txt", "content": "one" },
            { "op": "clone_branch", "repository": "r", "src": "master", "dst": "feature" },
            { "op": "add_file", "repository": "r", "target": "feature", "message": "m2", "path": "b.txt", "content": "two" },
            { "op": "create_tag", "repository": "r", "branch": "master", "tag": "v1", "when": 42 },
            { "op": "open_change_request", "repository": "r", "branch": "feature", "flags": ["fork"] },
            { "op": "rm_file", "repository": "r", "target": "change-request/1", "message": "m3", "path": "a.txt" }
        ]
    }"#;

    #[test]
    fn test_replay_fixture() {
        let scenario = Scenario::from_json(FIXTURE).unwrap();
        let controller = Controller::new("scenario-test");
        scenario.apply(&controller).unwrap();

        assert_eq!(controller.list_branches("r").unwrap(), vec!["feature", "master"]);
        assert_eq!(controller.tag_timestamp("r", "v1").unwrap(), 42);
        assert_eq!(controller.repository_description("r").unwrap().as_deref(), Some("demo"));
        assert!(controller.flags("r").unwrap().contains(&RepositoryFlag::Mergeable));

        let cr = controller.resolve("r", "change-request/1").unwrap();
        assert!(cr.file("a.txt").is_none());
        assert_eq!(cr.file("b.txt").unwrap().as_ref(), b"two");
        assert_eq!(controller.change_request_target("r", 1).unwrap(), "feature");
    }

    #[test]
    fn test_failing_step_reports_index() {
        let scenario = Scenario {
            steps: vec![
                Step::CreateRepository {
                    name: "r".into(),
                    flags: RepositoryFlags::new(),
                    description: None,
                    display_name: None,
                    url: None,
                },
                Step::CloneBranch {
                    repository: "r".into(),
                    src: "missing".into(),
                    dst: "x".into(),
                },
            ],
            ..Default::default()
        };
        let controller = Controller::new("scenario-fail");
        match scenario.apply(&controller) {
            Err(ScmError::Step { index, source }) => {
                assert_eq!(index, 1);
                assert!(source.is_not_found());
            }
            other => panic!("expected step failure, got {:?}", other),
        }
    }

    #[test]
    fn test_instantiate_reattaches_by_id() {
        let id = format!("scenario-{}", uuid::Uuid::new_v4());
        let scenario = Scenario {
            controller_id: Some(id.clone()),
            steps: vec![Step::DeleteRepository { name: "none".into() }],
            ..Default::default()
        };
        let controller = scenario.instantiate().unwrap();
        assert_eq!(controller.id(), id);
        assert!(Arc::ptr_eq(&controller, &Controller::lookup(&id).unwrap()));
        controller.close();
    }

    #[test]
    fn test_binary_content_from_hex() {
        let scenario = Scenario::from_json(
            r#"{"steps": [
                { "op": "create_repository", "name": "r" },
                { "op": "add_file", "repository": "r", "target": "master", "message": "bin",
                  "path": "blob.bin", "content": { "hex": "00ff80" } },
                { "op": "add_file", "repository": "r", "target": "master", "message": "txt",
                  "path": "a.txt", "content": "plain" }
            ]}"#,
        )
        .unwrap();
        let controller = Controller::new("scenario-binary");
        scenario.apply(&controller).unwrap();

        let head = controller.resolve("r", "master").unwrap();
        assert_eq!(head.file("blob.bin").unwrap().as_ref(), &[0x00, 0xff, 0x80]);
        assert_eq!(head.file("a.txt").unwrap().as_ref(), b"plain");
    }

    #[test]
    fn test_bad_hex_content_fails_before_commit() {
        let scenario = Scenario {
            steps: vec![
                Step::CreateRepository {
                    name: "r".into(),
                    flags: RepositoryFlags::new(),
                    description: None,
                    display_name: None,
                    url: None,
                },
                Step::AddFile {
                    repository: "r".into(),
                    target: "master".into(),
                    message: "bad".into(),
                    path: "x".into(),
                    content: FileContent::Hex { hex: "zz".into() },
                },
            ],
            ..Default::default()
        };
        let controller = Controller::new("scenario-bad-hex");
        match scenario.apply(&controller) {
            Err(ScmError::Step { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, ScmError::Config(_)));
            }
            other => panic!("expected step failure, got {:?}", other),
        }
        assert_eq!(controller.log("r", "master").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_op_is_config_error() {
        let err = Scenario::from_json(r#"{"steps": [{"op": "merge"}]}"#).unwrap_err();
        assert!(matches!(err, ScmError::Config(_)));
    }
}
