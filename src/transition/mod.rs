//! Exec-time transition resolution: which profile (if any) governs a
//! process after it replaces its program image.

use crate::engine::EACCES;
use crate::matcher::{ExecMode, ExecSpec, Matcher};
use crate::observability::audit::{emit, AuditOutcome, AuditRecord};
use crate::policy::perms::Perms;
use crate::policy::store::PolicyStore;
use crate::task::TaskContext;
use std::sync::Arc;
use crate::policy::profile::Profile;

/// Resolution result for one exec
#[derive(Clone, Debug)]
pub enum ExecOutcome {
    /// Keep the current confinement (or stay unconfined)
    Keep,
    /// Drop confinement
    Unconfined,
    /// Rebind to the given profile
    Transition(Arc<Profile>),
    /// Refuse the exec
    Denied { errno: i32, info: String },
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Resolve the profile governing `pid` after executing `path`.
///
/// Unconfined callers attach by executable path in the default namespace.
/// Confined callers decode the exec qualifier granted by their active
/// profile; mandatory targets that are missing deny in enforce mode and
/// substitute the shared null-complain profile in complain mode. Every
/// resolution failure is audited with the attempted name.
pub fn resolve_exec(
    store: &PolicyStore,
    ctx: Option<&TaskContext>,
    pid: u32,
    path: &str,
) -> ExecOutcome {
    let Some(ctx) = ctx else {
        // unconfined: attach when a profile is named after the executable
        return match store.default_namespace().find(path) {
            Some(profile) => ExecOutcome::Transition(profile),
            None => ExecOutcome::Keep,
        };
    };

    let profile = &ctx.profile;
    let ns = store
        .namespace(&profile.ns_name)
        .unwrap_or_else(|| store.default_namespace());

    let m = profile.rules.match_path(path);
    if !m.allow.contains(Perms::EXEC) {
        if profile.is_complain() {
            emit(
                AuditRecord::new("exec", AuditOutcome::ComplainAllowed, pid, &profile.name)
                    .with_masks(Perms::EXEC, Perms::EXEC)
                    .with_path(path)
                    .with_namespace(&profile.ns_name)
                    .with_info("no exec rule; continuing under null-complain".to_string()),
            );
            return ExecOutcome::Transition(ns.null_complain());
        }
        emit(
            AuditRecord::new("exec", AuditOutcome::Denied, pid, &profile.name)
                .with_masks(Perms::EXEC, Perms::EXEC)
                .with_path(path)
                .with_namespace(&profile.ns_name)
                .with_errno(EACCES),
        );
        return ExecOutcome::Denied {
            errno: EACCES,
            info: "execute not permitted".to_string(),
        };
    }

    // an exec grant without a qualifier inherits the current profile
    let spec = m.exec.unwrap_or(ExecSpec {
        mode: ExecMode::Inherit,
        safe: true,
    });

    let attempted: String = match spec.mode {
        ExecMode::Inherit => return ExecOutcome::Keep,
        ExecMode::Unconfined => return ExecOutcome::Unconfined,
        ExecMode::Profile => basename(path).to_string(),
        ExecMode::Child => format!("{}//{}", ctx.bound().name, basename(path)),
        ExecMode::Named { index } => match profile.transitions.get(index) {
            Some(target) => match &target.namespace {
                Some(ns_name) => format!(":{}:{}", ns_name, target.name),
                None => target.name.clone(),
            },
            None => {
                return missing_target(
                    pid,
                    profile,
                    &ns,
                    path,
                    &format!("transition index {}", index),
                )
            }
        },
    };

    match store.find(Some(&profile.ns_name), &attempted) {
        Some(target) => ExecOutcome::Transition(target),
        None => missing_target(pid, profile, &ns, path, &attempted),
    }
}

fn missing_target(
    pid: u32,
    profile: &Arc<Profile>,
    ns: &Arc<crate::policy::namespace::PolicyNamespace>,
    path: &str,
    attempted: &str,
) -> ExecOutcome {
    let info = format!("mandatory profile missing: {}", attempted);
    if profile.is_complain() {
        emit(
            AuditRecord::new("exec", AuditOutcome::ComplainAllowed, pid, &profile.name)
                .with_path(path)
                .with_namespace(&profile.ns_name)
                .with_info(info),
        );
        return ExecOutcome::Transition(ns.null_complain());
    }
    emit(
        AuditRecord::new("exec", AuditOutcome::Denied, pid, &profile.name)
            .with_path(path)
            .with_namespace(&profile.ns_name)
            .with_info(info.clone())
            .with_errno(EACCES),
    );
    ExecOutcome::Denied {
        errno: EACCES,
        info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{GlobRule, GlobRules, RuleSet};
    use crate::policy::load::ProfileDoc;
    use crate::policy::namespace::NULL_COMPLAIN_NAME;
    use crate::policy::profile::ProfileMode;

    fn doc(json: &str) -> Arc<Profile> {
        ProfileDoc::parse(json.as_bytes()).unwrap().build()
    }

    fn ctx_for(profile: &Arc<Profile>) -> TaskContext {
        TaskContext::new(50, Arc::clone(profile))
    }

    #[test]
    fn unconfined_attaches_by_executable_path() {
        let store = PolicyStore::new();
        store.add(doc(r#"{"name": "/usr/sbin/nginx"}"#)).unwrap();

        match resolve_exec(&store, None, 1, "/usr/sbin/nginx") {
            ExecOutcome::Transition(p) => assert_eq!(p.name, "/usr/sbin/nginx"),
            other => panic!("expected attach, got {:?}", other),
        }
        assert!(matches!(
            resolve_exec(&store, None, 1, "/bin/true"),
            ExecOutcome::Keep
        ));
    }

    #[test]
    fn inherit_keeps_current_profile() {
        let store = PolicyStore::new();
        let p = doc(
            r#"{"name": "app", "rules": [
                {"pattern": "/bin/helper", "perms": "x", "exec": {"mode": "inherit"}}
            ]}"#,
        );
        store.add(Arc::clone(&p)).unwrap();
        let ctx = ctx_for(&p);
        assert!(matches!(
            resolve_exec(&store, Some(&ctx), 1, "/bin/helper"),
            ExecOutcome::Keep
        ));
    }

    #[test]
    fn unconfined_qualifier_drops_confinement() {
        let store = PolicyStore::new();
        let p = doc(
            r#"{"name": "app", "rules": [
                {"pattern": "/bin/open", "perms": "x", "exec": {"mode": "unconfined"}}
            ]}"#,
        );
        store.add(Arc::clone(&p)).unwrap();
        let ctx = ctx_for(&p);
        assert!(matches!(
            resolve_exec(&store, Some(&ctx), 1, "/bin/open"),
            ExecOutcome::Unconfined
        ));
    }

    #[test]
    fn profile_qualifier_resolves_by_basename() {
        let store = PolicyStore::new();
        let p = doc(
            r#"{"name": "app", "rules": [
                {"pattern": "/usr/bin/*", "perms": "x", "exec": {"mode": "profile"}}
            ]}"#,
        );
        store.add(Arc::clone(&p)).unwrap();
        store.add(doc(r#"{"name": "helper"}"#)).unwrap();
        let ctx = ctx_for(&p);
        match resolve_exec(&store, Some(&ctx), 1, "/usr/bin/helper") {
            ExecOutcome::Transition(t) => assert_eq!(t.name, "helper"),
            other => panic!("expected transition, got {:?}", other),
        }
    }

    #[test]
    fn child_qualifier_resolves_under_current_profile() {
        let store = PolicyStore::new();
        let p = doc(
            r#"{"name": "app",
                "rules": [{"pattern": "/usr/bin/cgi", "perms": "x", "exec": {"mode": "child"}}],
                "hats": [{"name": "cgi"}]}"#,
        );
        store.add(Arc::clone(&p)).unwrap();
        let ctx = ctx_for(&p);
        match resolve_exec(&store, Some(&ctx), 1, "/usr/bin/cgi") {
            ExecOutcome::Transition(t) => assert_eq!(t.name, "app//cgi"),
            other => panic!("expected child transition, got {:?}", other),
        }
    }

    #[test]
    fn missing_mandatory_target_denies_in_enforce() {
        let store = PolicyStore::new();
        let p = doc(
            r#"{"name": "app",
                "rules": [{"pattern": "/usr/bin/helper", "perms": "x",
                           "exec": {"mode": "named", "index": 0}}],
                "transitions": ["app//helper"]}"#,
        );
        store.add(Arc::clone(&p)).unwrap();
        let ctx = ctx_for(&p);
        match resolve_exec(&store, Some(&ctx), 1, "/usr/bin/helper") {
            ExecOutcome::Denied { info, .. } => {
                assert!(info.contains("mandatory profile missing"))
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn missing_mandatory_target_substitutes_null_complain() {
        let store = PolicyStore::new();
        let p = doc(
            r#"{"name": "app", "mode": "complain",
                "rules": [{"pattern": "/usr/bin/helper", "perms": "x",
                           "exec": {"mode": "named", "index": 0}}],
                "transitions": ["app//helper"]}"#,
        );
        store.add(Arc::clone(&p)).unwrap();
        let ctx = ctx_for(&p);
        match resolve_exec(&store, Some(&ctx), 1, "/usr/bin/helper") {
            ExecOutcome::Transition(t) => assert_eq!(t.name, NULL_COMPLAIN_NAME),
            other => panic!("expected null-complain substitution, got {:?}", other),
        }
    }

    #[test]
    fn no_exec_rule_denies_in_enforce() {
        let store = PolicyStore::new();
        let p = Arc::new(crate::policy::profile::Profile::build(
            "app".to_string(),
            "default".to_string(),
            RuleSet::Globs(GlobRules::new(vec![GlobRule {
                pattern: "/etc/**".to_string(),
                perms: "r".parse().unwrap(),
                audit: Perms::empty(),
                exec: None,
                link_target: None,
            }])),
            Default::default(),
            Default::default(),
            Default::default(),
            Vec::new(),
            Default::default(),
            ProfileMode::Enforce,
            false,
            false,
        ));
        store.add(Arc::clone(&p)).unwrap();
        let ctx = ctx_for(&p);
        assert!(matches!(
            resolve_exec(&store, Some(&ctx), 1, "/bin/sh"),
            ExecOutcome::Denied { .. }
        ));
    }
}
