//! Process-wide controller registry
//!
//! Maps controller ids to live instances so code holding only an id (for
//! example a source definition restored from saved data) can reach its
//! controller. The registry has its own lock, independent of every
//! controller's lock; the two are never held together.
//!
//! Entries are removed only by [`Controller::close`].

use crate::controller::Controller;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::info;

static CONTROLLERS: OnceLock<Mutex<HashMap<String, Arc<Controller>>>> = OnceLock::new();

fn controllers() -> MutexGuard<'static, HashMap<String, Arc<Controller>>> {
    CONTROLLERS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Remove an entry; returns the controller if it was registered
pub(crate) fn unregister(id: &str) -> Option<Arc<Controller>> {
    controllers().remove(id)
}

impl Controller {
    /// Create and register a controller with a random id
    pub fn create() -> Arc<Controller> {
        let controller = Arc::new(Controller::new(uuid::Uuid::new_v4().to_string()));
        controllers().insert(controller.id().to_string(), controller.clone());
        info!(controller = controller.id(), "controller created");
        controller
    }

    /// Re-attach to the controller registered under `id`, registering a new
    /// empty one if there is none.
    ///
    /// Meant for restoring saved state that references a known id; the
    /// caller is responsible for re-seeding a new instance.
    pub fn recreate(id: &str) -> Arc<Controller> {
        let mut registry = controllers();
        if let Some(existing) = registry.get(id) {
            info!(controller = id, "re-attached to registered controller");
            return existing.clone();
        }
        let controller = Arc::new(Controller::new(id));
        registry.insert(id.to_string(), controller.clone());
        info!(controller = id, "controller recreated");
        controller
    }

    pub fn lookup(id: &str) -> Option<Arc<Controller>> {
        controllers().get(id).cloned()
    }

    /// All registered controllers, ordered by id
    pub fn all() -> Vec<Arc<Controller>> {
        let mut all: Vec<_> = controllers().values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_registers() {
        let c = Controller::create();
        let found = Controller::lookup(c.id()).unwrap();
        assert!(Arc::ptr_eq(&c, &found));
        assert!(Controller::all().iter().any(|x| x.id() == c.id()));
        c.close();
        assert!(Controller::lookup(c.id()).is_none());
    }

    #[test]
    fn test_recreate_reuses_registered_instance() {
        let id = format!("recreate-{}", uuid::Uuid::new_v4());
        let first = Controller::recreate(&id);
        first.create_repository("r");
        let second = Controller::recreate(&id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.list_repositories(), vec!["r"]);
        first.close();

        let third = Controller::recreate(&id);
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.list_repositories().is_empty());
        third.close();
    }

    #[test]
    fn test_close_clears_but_keeps_handed_out_data() {
        let c = Controller::create();
        c.create_repository("r");
        c.add_file("r", "master", "m", "a.txt", &b"a"[..]).unwrap();
        let revision = c.resolve("r", "master").unwrap();
        c.close();
        assert!(c.list_repositories().is_empty());
        assert_eq!(revision.file("a.txt").unwrap().as_ref(), b"a");
    }

    #[test]
    fn test_new_is_not_registered() {
        let c = Controller::new(format!("detached-{}", uuid::Uuid::new_v4()));
        assert!(Controller::lookup(c.id()).is_none());
    }
}
