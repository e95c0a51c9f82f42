//! Profile lifecycle: load, replace, remove, and the live migration of
//! every process bound to a superseded profile.
//!
//! Migration follows a strict discipline: replacement contexts are
//! allocated before any lock is taken; the old and new profile accounting
//! locks are acquired in address order; a task's binding is re-verified
//! against the expected context before the replacement is published
//! (the task may have exited or self-migrated concurrently); the sweep
//! repeats until the old profile has no bound tasks left.

use crate::errors::Result;
use crate::policy::load::ProfileDoc;
use crate::policy::profile::Profile;
use crate::policy::store::PolicyStore;
use crate::task::{TaskContext, TaskTable};
use log::debug;
use std::sync::Arc;

/// Deserialize and add a new profile. Fails when the name is already live.
pub fn load_bytes(store: &PolicyStore, bytes: &[u8]) -> Result<()> {
    let doc = ProfileDoc::parse(bytes)?;
    store.add(doc.build())
}

/// Deserialize and atomically replace a profile, then migrate every task
/// bound to the outgoing instance. Loading a previously unknown name is
/// allowed and behaves like `load`.
pub fn replace_bytes(store: &PolicyStore, tasks: &TaskTable, bytes: &[u8]) -> Result<()> {
    let doc = ProfileDoc::parse(bytes)?;
    let new = doc.build();
    if let Some(old) = store.replace(Arc::clone(&new)) {
        migrate_to(tasks, &old, &new);
    }
    Ok(())
}

/// Unlink a profile and migrate its bound tasks to the unconfined state
pub fn remove_profile(store: &PolicyStore, tasks: &TaskTable, name: &str) -> Result<()> {
    let old = store.remove(name)?;
    migrate_to_unconfined(tasks, &old);
    Ok(())
}

/// Rebind every task bound to `old` (now stale) onto `new`. A task inside a
/// hat keeps its hat and cookie when the replacement declares a hat of the
/// same name; otherwise it drops to the replacement's top level.
pub(crate) fn migrate_to(tasks: &TaskTable, old: &Arc<Profile>, new: &Arc<Profile>) {
    loop {
        if old.bound_tasks() == 0 {
            return;
        }
        let mut progressed = false;
        for slot in tasks.snapshot() {
            let Some(ctx) = slot.current() else { continue };
            if !Arc::ptr_eq(ctx.bound(), old) {
                continue;
            }

            // allocation happens here, before any profile lock
            let next = Arc::new(rebind_context(&ctx, new));
            if slot.publish_if(&ctx, next) {
                let mut pair = Profile::lock_pair(old, new);
                pair.transfer();
                drop(pair);
                progressed = true;
                debug!(
                    "migrated pid {} from stale {} to {}",
                    ctx.pid, old.name, new.name
                );
            }
            // on failure the task swapped contexts concurrently; the next
            // sweep re-reads its binding
        }
        if !progressed {
            std::thread::yield_now();
        }
    }
}

/// Tear down every binding to `old` (removal: tasks become unconfined)
pub(crate) fn migrate_to_unconfined(tasks: &TaskTable, old: &Arc<Profile>) {
    loop {
        if old.bound_tasks() == 0 {
            return;
        }
        let mut progressed = false;
        for slot in tasks.snapshot() {
            let Some(ctx) = slot.current() else { continue };
            if !Arc::ptr_eq(ctx.bound(), old) {
                continue;
            }
            if tasks.unbind_if(slot.pid, &ctx) {
                old.unbind();
                progressed = true;
                debug!("unconfined pid {} after removal of {}", ctx.pid, old.name);
            }
        }
        if !progressed {
            std::thread::yield_now();
        }
    }
}

fn rebind_context(ctx: &TaskContext, new: &Arc<Profile>) -> TaskContext {
    if ctx.in_hat() {
        let hat_name = ctx.profile.name.rsplit("//").next().unwrap_or("");
        if let Some(hat) = new.hat(hat_name) {
            return TaskContext::with_hat(ctx.pid, Arc::clone(hat), Arc::clone(new), ctx.cookie);
        }
        // the replacement dropped this hat: fall back to its top level
    }
    TaskContext::new(ctx.pid, Arc::clone(new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::load::ProfileDoc;

    fn doc(json: &str) -> Arc<Profile> {
        ProfileDoc::parse(json.as_bytes()).unwrap().build()
    }

    fn bind(tasks: &TaskTable, pid: u32, profile: &Arc<Profile>) {
        profile.try_bind().unwrap();
        tasks.insert(Arc::new(TaskContext::new(pid, Arc::clone(profile))));
    }

    #[test]
    fn replace_migrates_every_bound_task() {
        let store = PolicyStore::new();
        let tasks = TaskTable::new();
        let old = doc(r#"{"name": "web"}"#);
        store.add(Arc::clone(&old)).unwrap();
        for pid in 1..=5 {
            bind(&tasks, pid, &old);
        }

        replace_bytes(&store, &tasks, br#"{"name": "web", "mode": "complain"}"#).unwrap();

        assert_eq!(old.bound_tasks(), 0);
        let new = store.find(None, "web").unwrap();
        assert_eq!(new.bound_tasks(), 5);
        for pid in 1..=5 {
            let ctx = tasks.context(pid).unwrap();
            assert!(Arc::ptr_eq(ctx.bound(), &new));
            assert!(ctx.profile.is_complain());
        }
    }

    #[test]
    fn replace_preserves_matching_hats() {
        let store = PolicyStore::new();
        let tasks = TaskTable::new();
        let old = doc(r#"{"name": "web", "hats": [{"name": "cgi"}]}"#);
        store.add(Arc::clone(&old)).unwrap();

        old.try_bind().unwrap();
        let hat = old.hat("cgi").unwrap();
        tasks.insert(Arc::new(TaskContext::with_hat(
            7,
            Arc::clone(hat),
            Arc::clone(&old),
            0xfeed,
        )));

        replace_bytes(&store, &tasks, br#"{"name": "web", "hats": [{"name": "cgi"}]}"#)
            .unwrap();

        let ctx = tasks.context(7).unwrap();
        assert!(ctx.in_hat());
        assert_eq!(ctx.profile.name, "web//cgi");
        assert_eq!(ctx.cookie, 0xfeed);
        assert!(!ctx.bound().is_stale());
    }

    #[test]
    fn replace_drops_vanished_hats_to_top_level() {
        let store = PolicyStore::new();
        let tasks = TaskTable::new();
        let old = doc(r#"{"name": "web", "hats": [{"name": "cgi"}]}"#);
        store.add(Arc::clone(&old)).unwrap();

        old.try_bind().unwrap();
        let hat = old.hat("cgi").unwrap();
        tasks.insert(Arc::new(TaskContext::with_hat(
            7,
            Arc::clone(hat),
            Arc::clone(&old),
            0xfeed,
        )));

        replace_bytes(&store, &tasks, br#"{"name": "web"}"#).unwrap();

        let ctx = tasks.context(7).unwrap();
        assert!(!ctx.in_hat());
        assert_eq!(ctx.cookie, 0);
        assert_eq!(ctx.profile.name, "web");
    }

    #[test]
    fn remove_unconfines_bound_tasks() {
        let store = PolicyStore::new();
        let tasks = TaskTable::new();
        let old = doc(r#"{"name": "web"}"#);
        store.add(Arc::clone(&old)).unwrap();
        bind(&tasks, 1, &old);
        bind(&tasks, 2, &old);

        remove_profile(&store, &tasks, "web").unwrap();

        assert!(old.is_stale());
        assert_eq!(old.bound_tasks(), 0);
        assert!(!tasks.is_confined(1));
        assert!(!tasks.is_confined(2));
        assert!(store.find(None, "web").is_none());
    }

    #[test]
    fn replace_of_unknown_name_loads_fresh() {
        let store = PolicyStore::new();
        let tasks = TaskTable::new();
        replace_bytes(&store, &tasks, br#"{"name": "web"}"#).unwrap();
        assert!(store.find(None, "web").is_some());
    }
}
