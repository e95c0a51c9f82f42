//! Integration tests for profile replacement, removal, and live migration
//!
//! These tests verify the lifecycle guarantees: a superseded profile never
//! accepts new bindings, and every task bound to it is rebound (or
//! unconfined) before the lifecycle operation returns.

use confine::hooks::{Caller, Confinement};
use confine::policy::profile::BindRefusal;
use std::sync::Arc;

fn admin() -> Caller {
    Caller { pid: 0, euid: 0 }
}

fn bind(engine: &Confinement, pid: u32, name: &str) {
    engine.set_profile(admin(), pid, name).unwrap();
}

#[test]
fn test_replace_migrates_every_bound_task() {
    let engine = Confinement::new();
    engine.load(admin(), br#"{"name": "web"}"#).unwrap();
    let old = engine.store().find(None, "web").unwrap();
    for pid in 1..=8 {
        bind(&engine, pid, "web");
    }
    assert_eq!(old.bound_tasks(), 8);

    engine
        .replace(admin(), br#"{"name": "web", "mode": "complain"}"#)
        .unwrap();

    // migration completed before replace returned
    assert_eq!(old.bound_tasks(), 0);
    let new = engine.store().find(None, "web").unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.bound_tasks(), 8);
    for pid in 1..=8 {
        assert_eq!(engine.read_status(pid), "web (complain)");
    }
}

#[test]
fn test_stale_profile_refuses_new_bindings() {
    let engine = Confinement::new();
    engine.load(admin(), br#"{"name": "web"}"#).unwrap();
    let old = engine.store().find(None, "web").unwrap();
    assert!(!old.is_stale());

    engine.replace(admin(), br#"{"name": "web"}"#).unwrap();

    // staleness is monotone: the outgoing instance never comes back
    assert!(old.is_stale());
    assert_eq!(old.try_bind(), Err(BindRefusal::Stale));
    // the store hands out the live replacement
    assert!(engine.store().find(None, "web").unwrap().try_bind().is_ok());
}

#[test]
fn test_replace_preserves_matching_hat_and_cookie() {
    let engine = Confinement::new();
    engine
        .load(
            admin(),
            br#"{"name": "web", "hats": [{"name": "cgi"}]}"#,
        )
        .unwrap();
    bind(&engine, 5, "web");
    assert!(engine.change_hat(5, Some("cgi"), 0xfeed).is_allow());

    engine
        .replace(
            admin(),
            br#"{"name": "web", "mode": "complain", "hats": [{"name": "cgi"}]}"#,
        )
        .unwrap();

    // still inside the hat, now on the replacement instance
    assert_eq!(engine.read_status(5), "web//cgi (complain)");
    // the stored cookie survived the migration
    assert!(engine.change_hat(5, None, 0xfeed).is_allow());
    assert_eq!(engine.read_status(5), "web (complain)");
}

#[test]
fn test_replace_drops_vanished_hat_to_top_level() {
    let engine = Confinement::new();
    engine
        .load(
            admin(),
            br#"{"name": "web", "hats": [{"name": "cgi"}]}"#,
        )
        .unwrap();
    bind(&engine, 5, "web");
    assert!(engine.change_hat(5, Some("cgi"), 0xfeed).is_allow());

    engine.replace(admin(), br#"{"name": "web"}"#).unwrap();

    assert_eq!(engine.read_status(5), "web (enforce)");
}

#[test]
fn test_remove_unconfines_bound_tasks() {
    let engine = Confinement::new();
    engine.load(admin(), br#"{"name": "web"}"#).unwrap();
    let old = engine.store().find(None, "web").unwrap();
    for pid in 1..=4 {
        bind(&engine, pid, "web");
    }

    engine.remove(admin(), "web").unwrap();

    assert!(old.is_stale());
    assert_eq!(old.bound_tasks(), 0);
    for pid in 1..=4 {
        assert_eq!(engine.read_status(pid), "unconfined");
    }
    assert!(engine.store().find(None, "web").is_none());
}

#[test]
fn test_replace_unknown_name_behaves_like_load() {
    let engine = Confinement::new();
    engine.replace(admin(), br#"{"name": "fresh"}"#).unwrap();
    assert!(engine.store().find(None, "fresh").is_some());
}

#[test]
fn test_concurrent_forks_during_replacement() {
    // Worker threads fork and exit children under a profile that is being
    // replaced in a loop. Afterwards every surviving task must be bound to
    // the live instance and every retired instance must be fully drained.
    let engine = Arc::new(Confinement::new());
    engine.load(admin(), br#"{"name": "busy"}"#).unwrap();

    let mut retired = vec![engine.store().find(None, "busy").unwrap()];
    for pid in 1..=4 {
        bind(&engine, pid, "busy");
    }

    let mut workers = Vec::new();
    for worker in 0..4u32 {
        let engine = Arc::clone(&engine);
        workers.push(std::thread::spawn(move || {
            let parent = worker + 1;
            let base = 1000 + worker * 1000;
            for i in 0..200 {
                let child = base + i;
                // a fork can lose the race against a replacement sweep;
                // that surfaces as a denial, never as a stuck binding
                if engine.on_fork(parent, child).is_allow() {
                    engine.on_exit(child);
                }
            }
        }));
    }

    for round in 0..20 {
        let doc = format!(
            r#"{{"name": "busy", "rules": [{{"pattern": "/round/{}", "perms": "r"}}]}}"#,
            round
        );
        engine.replace(admin(), doc.as_bytes()).unwrap();
        retired.push(engine.store().find(None, "busy").unwrap());
    }

    for worker in workers {
        worker.join().unwrap();
    }

    let live = retired.pop().unwrap();
    for old in &retired {
        assert!(old.is_stale());
        assert_eq!(old.bound_tasks(), 0, "retired instance still has tasks");
    }

    // the four long-lived parents all ended up on the live instance
    let mut bound = 0;
    for slot in engine.tasks().snapshot() {
        if let Some(ctx) = slot.current() {
            assert!(Arc::ptr_eq(ctx.bound(), &live));
            bound += 1;
        }
    }
    assert_eq!(bound as u64, live.bound_tasks());
    assert!(live.bound_tasks() >= 4);
}
