/// In-memory catalog of profiles grouped into namespaces.
///
/// The store is an explicit value owned by the engine and passed by
/// reference; there is no process-wide registry. Mutations (`add`,
/// `replace`, `remove`) are totally ordered by one load mutex. Decision
/// checks never take it: they only touch per-namespace and per-profile
/// locks, all short-held.
use crate::errors::{ConfineError, Result};
use crate::policy::namespace::{PolicyNamespace, DEFAULT_NAMESPACE};
use crate::policy::profile::Profile;
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Split a possibly qualified `:ns:name` reference
pub fn parse_qualified(full: &str) -> (Option<&str>, &str) {
    if let Some(rest) = full.strip_prefix(':') {
        if let Some((ns, name)) = rest.split_once(':') {
            return (Some(ns), name);
        }
    }
    (None, full)
}

/// Namespace-partitioned profile catalog
#[derive(Debug)]
pub struct PolicyStore {
    namespaces: Mutex<HashMap<String, Arc<PolicyNamespace>>>,
    /// Serializes add/replace/remove against each other
    load_lock: Mutex<()>,
}

impl PolicyStore {
    pub fn new() -> PolicyStore {
        let mut namespaces = HashMap::new();
        namespaces.insert(
            DEFAULT_NAMESPACE.to_string(),
            Arc::new(PolicyNamespace::new(DEFAULT_NAMESPACE)),
        );
        PolicyStore {
            namespaces: Mutex::new(namespaces),
            load_lock: Mutex::new(()),
        }
    }

    /// The namespace that always exists
    pub fn default_namespace(&self) -> Arc<PolicyNamespace> {
        self.namespace(DEFAULT_NAMESPACE)
            .expect("default namespace must exist")
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<PolicyNamespace>> {
        let namespaces = self.namespaces.lock().expect("namespace catalog poisoned");
        namespaces.get(name).map(Arc::clone)
    }

    /// Look up a namespace, creating it when first referenced by a load
    pub(crate) fn namespace_or_create(&self, name: &str) -> Arc<PolicyNamespace> {
        let mut namespaces = self.namespaces.lock().expect("namespace catalog poisoned");
        Arc::clone(
            namespaces
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(PolicyNamespace::new(name))),
        )
    }

    /// Find a profile by namespace and name; `None` namespace means default.
    /// `name` may itself carry a `:ns:` qualifier or a `//` hat path.
    pub fn find(&self, ns: Option<&str>, name: &str) -> Option<Arc<Profile>> {
        let (qualifier, bare) = parse_qualified(name);
        let ns_name = qualifier.or(ns).unwrap_or(DEFAULT_NAMESPACE);
        self.namespace(ns_name)?.find(bare)
    }

    /// Insert a freshly built profile. Fails when the name is already live.
    pub fn add(&self, profile: Arc<Profile>) -> Result<()> {
        let _load = self.lock_loads();
        let ns = self.namespace_or_create(&profile.ns_name);
        let name = profile.name.clone();
        ns.insert_new(profile)
            .map_err(|p| ConfineError::AlreadyExists(format!(":{}:{}", p.ns_name, p.name)))?;
        info!("loaded profile {} into namespace {}", name, ns.name);
        Ok(())
    }

    /// Atomically swap in a replacement. The outgoing profile is already
    /// stale when this returns; migrating its bound tasks is the caller's
    /// job and must happen without the store lock held.
    pub fn replace(&self, profile: Arc<Profile>) -> Option<Arc<Profile>> {
        let _load = self.lock_loads();
        let ns = self.namespace_or_create(&profile.ns_name);
        let name = profile.name.clone();
        let old = ns.swap(profile);
        info!(
            "replaced profile {} in namespace {} (previous instance: {})",
            name,
            ns.name,
            if old.is_some() { "stale" } else { "none" }
        );
        old
    }

    /// Unlink a profile by qualified name, marking it stale. Migrating its
    /// bound tasks to unconfined is the caller's job.
    pub fn remove(&self, name: &str) -> Result<Arc<Profile>> {
        let _load = self.lock_loads();
        let (qualifier, bare) = parse_qualified(name);
        let ns_name = qualifier.unwrap_or(DEFAULT_NAMESPACE);
        let ns = self
            .namespace(ns_name)
            .ok_or_else(|| ConfineError::NotFound(name.to_string()))?;
        let old = ns
            .unlink(bare)
            .ok_or_else(|| ConfineError::NotFound(name.to_string()))?;
        info!("removed profile {} from namespace {}", bare, ns.name);
        Ok(old)
    }

    fn lock_loads(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock().expect("load mutex poisoned")
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        PolicyStore::new()
    }
}
