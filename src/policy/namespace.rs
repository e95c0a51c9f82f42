/// Profile namespaces.
///
/// A namespace partitions the store so identical profile names can coexist
/// across scopes. Each namespace carries two permission-less builtins: the
/// shared null-complain profile used as a substitution target, and the
/// null-enforce profile activated when a hat lookup misses in enforce mode.
use crate::policy::profile::{Profile, ProfileMode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Name of the namespace that always exists
pub const DEFAULT_NAMESPACE: &str = "default";

/// Name of the shared complain-mode substitution profile
pub const NULL_COMPLAIN_NAME: &str = "null-complain";

/// Name of the permission-less enforce-mode builtin
pub const NULL_ENFORCE_NAME: &str = "null-enforce";

/// One partition of the profile store
#[derive(Debug)]
pub struct PolicyNamespace {
    pub name: String,
    profiles: Mutex<HashMap<String, Arc<Profile>>>,
    null_complain: Arc<Profile>,
    null_enforce: Arc<Profile>,
}

impl PolicyNamespace {
    pub fn new(name: &str) -> PolicyNamespace {
        PolicyNamespace {
            name: name.to_string(),
            profiles: Mutex::new(HashMap::new()),
            null_complain: Arc::new(Profile::null(name, NULL_COMPLAIN_NAME, ProfileMode::Complain)),
            null_enforce: Arc::new(Profile::null(name, NULL_ENFORCE_NAME, ProfileMode::Enforce)),
        }
    }

    /// Shared complain-mode substitution profile
    pub fn null_complain(&self) -> Arc<Profile> {
        Arc::clone(&self.null_complain)
    }

    /// Permission-less enforce-mode builtin
    pub fn null_enforce(&self) -> Arc<Profile> {
        Arc::clone(&self.null_enforce)
    }

    /// Find a profile by name. A `parent//hat` name descends one hat level.
    pub fn find(&self, name: &str) -> Option<Arc<Profile>> {
        let profiles = self.profiles.lock().expect("namespace map poisoned");
        if let Some((parent, hat)) = name.split_once("//") {
            let base = profiles.get(parent)?;
            base.hat(hat).map(Arc::clone)
        } else {
            profiles.get(name).map(Arc::clone)
        }
    }

    /// Snapshot of the currently loaded top-level profiles
    pub fn profile_names(&self) -> Vec<String> {
        let profiles = self.profiles.lock().expect("namespace map poisoned");
        let mut names: Vec<String> = profiles.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn insert_new(&self, profile: Arc<Profile>) -> Result<(), Arc<Profile>> {
        let mut profiles = self.profiles.lock().expect("namespace map poisoned");
        if profiles.contains_key(&profile.name) {
            return Err(profile);
        }
        profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Swap in a replacement; the outgoing profile is marked stale before
    /// the namespace lock is released.
    pub(crate) fn swap(&self, profile: Arc<Profile>) -> Option<Arc<Profile>> {
        let mut profiles = self.profiles.lock().expect("namespace map poisoned");
        let old = profiles.insert(profile.name.clone(), profile);
        if let Some(old) = &old {
            old.mark_stale();
        }
        old
    }

    /// Unlink a profile, marking it stale before the lock is released
    pub(crate) fn unlink(&self, name: &str) -> Option<Arc<Profile>> {
        let mut profiles = self.profiles.lock().expect("namespace map poisoned");
        let old = profiles.remove(name);
        if let Some(old) = &old {
            old.mark_stale();
        }
        old
    }
}
