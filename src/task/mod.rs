//! Live association between processes and the profiles confining them.
//!
//! A [`TaskContext`] is an immutable snapshot (save for the audited-caps
//! cache) of one process's confinement: active profile, previous profile
//! while inside a hat, and the hat-return cookie. Every change publishes a
//! new context; readers clone the `Arc` under a short slot lock and never
//! block a writer across allocation. Writers re-verify the slot still holds
//! the context they started from before publishing (compare-and-retry).

pub mod hats;

use crate::policy::namespace::DEFAULT_NAMESPACE;
use crate::policy::profile::{Capability, Profile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One process's confinement snapshot
#[derive(Debug)]
pub struct TaskContext {
    pub pid: u32,
    /// Active profile; a hat while the task is inside one
    pub profile: Arc<Profile>,
    /// The bound top-level profile while inside a hat
    pub previous: Option<Arc<Profile>>,
    /// Validates a pending hat return; 0 means no return is possible
    pub cookie: u64,
    /// Capabilities already audited for this context (bit per capability)
    audited_caps: AtomicU64,
}

impl TaskContext {
    pub fn new(pid: u32, profile: Arc<Profile>) -> TaskContext {
        TaskContext {
            pid,
            profile,
            previous: None,
            cookie: 0,
            audited_caps: AtomicU64::new(0),
        }
    }

    pub(crate) fn with_hat(
        pid: u32,
        active: Arc<Profile>,
        bound: Arc<Profile>,
        cookie: u64,
    ) -> TaskContext {
        TaskContext {
            pid,
            profile: active,
            previous: Some(bound),
            cookie,
            audited_caps: AtomicU64::new(0),
        }
    }

    /// Duplicate this confinement for a forked child: profile, active hat,
    /// and cookie are copied; the audited-caps cache starts empty.
    pub fn fork_copy(&self, child_pid: u32) -> TaskContext {
        TaskContext {
            pid: child_pid,
            profile: Arc::clone(&self.profile),
            previous: self.previous.as_ref().map(Arc::clone),
            cookie: self.cookie,
            audited_caps: AtomicU64::new(0),
        }
    }

    /// The top-level profile this task is bound to
    pub fn bound(&self) -> &Arc<Profile> {
        self.previous.as_ref().unwrap_or(&self.profile)
    }

    pub fn in_hat(&self) -> bool {
        self.previous.is_some()
    }

    /// Record that `cap` was audited for this context. Returns true the
    /// first time, false for every repeat until the context is replaced.
    pub fn first_cap_audit(&self, cap: Capability) -> bool {
        let bit = cap.bit();
        let prior = self.audited_caps.fetch_or(bit, Ordering::AcqRel);
        prior & bit == 0
    }

    /// Status line: `<ns:><hatpath> (enforce|complain)`
    pub fn describe(&self) -> String {
        let prefix = if self.profile.ns_name == DEFAULT_NAMESPACE {
            String::new()
        } else {
            format!(":{}:", self.profile.ns_name)
        };
        format!("{}{} ({})", prefix, self.profile.name, self.profile.mode)
    }
}

/// Mutable slot holding a task's current context
#[derive(Debug)]
pub struct TaskSlot {
    pub pid: u32,
    ctx: Mutex<Option<Arc<TaskContext>>>,
}

impl TaskSlot {
    fn new(pid: u32, ctx: Arc<TaskContext>) -> TaskSlot {
        TaskSlot {
            pid,
            ctx: Mutex::new(Some(ctx)),
        }
    }

    /// Snapshot the current context. `None` once the task has exited.
    pub fn current(&self) -> Option<Arc<TaskContext>> {
        self.ctx.lock().expect("task slot poisoned").clone()
    }

    /// Publish `next` only if the slot still holds `expected`. The caller
    /// allocated `next` before taking any lock; on false it re-reads and
    /// retries or gives up.
    pub fn publish_if(&self, expected: &Arc<TaskContext>, next: Arc<TaskContext>) -> bool {
        let mut slot = self.ctx.lock().expect("task slot poisoned");
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, expected) => {
                *slot = Some(next);
                true
            }
            _ => false,
        }
    }

    /// Unconditional publish, used when a slot is first created for a task
    pub fn publish(&self, next: Arc<TaskContext>) {
        *self.ctx.lock().expect("task slot poisoned") = Some(next);
    }

    /// Tear down at exit; returns the final context for unbinding
    pub(crate) fn clear(&self) -> Option<Arc<TaskContext>> {
        self.ctx.lock().expect("task slot poisoned").take()
    }
}

/// Pid-indexed registry of confined tasks. Non-owning with respect to
/// profiles: a profile never points back at the tasks bound to it.
#[derive(Debug, Default)]
pub struct TaskTable {
    slots: Mutex<HashMap<u32, Arc<TaskSlot>>>,
}

impl TaskTable {
    pub fn new() -> TaskTable {
        TaskTable::default()
    }

    /// Slot for a confined pid; `None` means the process is unconfined
    pub fn slot(&self, pid: u32) -> Option<Arc<TaskSlot>> {
        self.slots.lock().expect("task table poisoned").get(&pid).map(Arc::clone)
    }

    /// Current context for a confined pid
    pub fn context(&self, pid: u32) -> Option<Arc<TaskContext>> {
        self.slot(pid).and_then(|slot| slot.current())
    }

    pub fn is_confined(&self, pid: u32) -> bool {
        self.context(pid).is_some()
    }

    /// Bind a pid to a freshly allocated context
    pub fn insert(&self, ctx: Arc<TaskContext>) -> Arc<TaskSlot> {
        let pid = ctx.pid;
        let slot = Arc::new(TaskSlot::new(pid, ctx));
        self.slots
            .lock()
            .expect("task table poisoned")
            .insert(pid, Arc::clone(&slot));
        slot
    }

    /// Remove a pid's binding, returning its final context
    pub fn remove(&self, pid: u32) -> Option<Arc<TaskContext>> {
        let slot = self.slots.lock().expect("task table poisoned").remove(&pid)?;
        slot.clear()
    }

    /// Remove a pid's binding only if it still holds `expected`. Used by
    /// migration sweeps so a task that exited or self-migrated concurrently
    /// is left alone.
    pub fn unbind_if(&self, pid: u32, expected: &Arc<TaskContext>) -> bool {
        let mut slots = self.slots.lock().expect("task table poisoned");
        let Some(slot) = slots.get(&pid) else {
            return false;
        };
        let mut ctx = slot.ctx.lock().expect("task slot poisoned");
        match ctx.as_ref() {
            Some(current) if Arc::ptr_eq(current, expected) => {
                *ctx = None;
                drop(ctx);
                slots.remove(&pid);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every live slot, for migration sweeps
    pub fn snapshot(&self) -> Vec<Arc<TaskSlot>> {
        self.slots
            .lock()
            .expect("task table poisoned")
            .values()
            .map(Arc::clone)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("task table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::profile::ProfileMode;

    fn profile(name: &str) -> Arc<Profile> {
        Arc::new(Profile::null(DEFAULT_NAMESPACE, name, ProfileMode::Enforce))
    }

    #[test]
    fn describe_formats_mode_and_namespace() {
        let ctx = TaskContext::new(10, profile("/usr/sbin/httpd"));
        assert_eq!(ctx.describe(), "/usr/sbin/httpd (enforce)");

        let staged = Arc::new(Profile::null("staging", "web", ProfileMode::Complain));
        let ctx = TaskContext::new(10, staged);
        assert_eq!(ctx.describe(), ":staging:web (complain)");
    }

    #[test]
    fn bound_profile_is_previous_while_in_hat() {
        let base = profile("web");
        let hat = profile("web//cgi");
        let ctx = TaskContext::with_hat(10, Arc::clone(&hat), Arc::clone(&base), 77);
        assert!(ctx.in_hat());
        assert!(Arc::ptr_eq(ctx.bound(), &base));
        assert!(Arc::ptr_eq(&ctx.profile, &hat));
    }

    #[test]
    fn cap_audit_cache_reports_first_only() {
        let ctx = TaskContext::new(10, profile("web"));
        assert!(ctx.first_cap_audit(Capability::SysAdmin));
        assert!(!ctx.first_cap_audit(Capability::SysAdmin));
        assert!(ctx.first_cap_audit(Capability::Chown));
    }

    #[test]
    fn publish_if_rejects_stale_expectations() {
        let table = TaskTable::new();
        let first = Arc::new(TaskContext::new(10, profile("web")));
        let slot = table.insert(Arc::clone(&first));

        let second = Arc::new(TaskContext::new(10, profile("web2")));
        assert!(slot.publish_if(&first, Arc::clone(&second)));

        // `first` is no longer current: the swap must be refused
        let third = Arc::new(TaskContext::new(10, profile("web3")));
        assert!(!slot.publish_if(&first, third));
        assert!(Arc::ptr_eq(&slot.current().unwrap(), &second));
    }

    #[test]
    fn remove_clears_the_slot_for_concurrent_observers() {
        let table = TaskTable::new();
        let ctx = Arc::new(TaskContext::new(10, profile("web")));
        let slot = table.insert(ctx);
        // a migrator holding the slot Arc observes the teardown
        let held = Arc::clone(&slot);
        assert!(table.remove(10).is_some());
        assert!(held.current().is_none());
        assert!(!table.is_confined(10));
    }
}
