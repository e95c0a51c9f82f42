/// File and hard-link permission checks.
use crate::engine::{Decision, EACCES};
use crate::matcher::Matcher;
use crate::observability::audit::{emit, AuditOutcome, AuditRecord};
use crate::policy::perms::Perms;
use crate::policy::profile::Profile;

/// Check one path access against a profile.
///
/// An audit record is produced whenever denied bits exist, or when the
/// request touches force-audit bits even on a full grant.
pub fn check_file(
    profile: &Profile,
    pid: u32,
    operation: &str,
    path: &str,
    requested: Perms,
) -> Decision {
    let m = profile.rules.match_path(path);
    let denied = requested & !m.allow;
    let forced = (requested & m.audit) != Perms::NONE || profile.audit_all;

    if denied.is_empty() {
        if forced {
            emit(
                AuditRecord::new(operation, AuditOutcome::Allowed, pid, &profile.name)
                    .with_masks(requested, Perms::NONE)
                    .with_path(path)
                    .with_namespace(&profile.ns_name),
            );
        }
        return Decision::Allow;
    }

    if profile.is_complain() {
        emit(
            AuditRecord::new(operation, AuditOutcome::ComplainAllowed, pid, &profile.name)
                .with_masks(requested, denied)
                .with_path(path)
                .with_namespace(&profile.ns_name),
        );
        return Decision::Allow;
    }

    emit(
        AuditRecord::new(operation, AuditOutcome::Denied, pid, &profile.name)
            .with_masks(requested, denied)
            .with_path(path)
            .with_namespace(&profile.ns_name)
            .with_errno(EACCES),
    );
    Decision::Deny(EACCES)
}

/// Check creation of a hard link `link` to `target`.
///
/// An explicit pair rule (a continuation match granting the link bit on the
/// target) accepts outright. Otherwise the subset law applies: the link name
/// must not grant more ordinary access than the target already has, and the
/// safe/unsafe exec qualifier must agree whenever either side carries
/// execute. A hard link must never widen access to the target.
pub fn check_link(profile: &Profile, pid: u32, link: &str, target: &str) -> Decision {
    let lm = profile.rules.match_path(link);
    let link_perms = lm.allow.strip_link_exec();
    let requested = Perms::LINK | link_perms;
    let mut denied = Perms::empty();

    if lm.allow.contains(Perms::LINK) {
        // explicit pair: re-match the target from the link's matched state
        if let Some(state) = lm.state {
            if let Some(cont) = profile.rules.match_continuation(state, target) {
                if cont.contains(Perms::LINK) {
                    return Decision::Allow;
                }
            }
        }

        // subset test over ordinary bits
        let tm = profile.rules.match_path(target);
        let target_perms = tm.allow.strip_link_exec();
        denied |= link_perms & !target_perms;

        if (link_perms | target_perms).contains(Perms::EXEC)
            && lm.allow.exec_qualifier() != tm.allow.exec_qualifier()
        {
            denied |= Perms::EXEC;
        }
    } else {
        denied |= Perms::LINK;
    }

    if denied.is_empty() {
        return Decision::Allow;
    }

    if profile.is_complain() {
        emit(
            AuditRecord::new("link", AuditOutcome::ComplainAllowed, pid, &profile.name)
                .with_masks(requested, denied)
                .with_path(link)
                .with_target(target)
                .with_namespace(&profile.ns_name),
        );
        return Decision::Allow;
    }

    emit(
        AuditRecord::new("link", AuditOutcome::Denied, pid, &profile.name)
            .with_masks(requested, denied)
            .with_path(link)
            .with_target(target)
            .with_namespace(&profile.ns_name)
            .with_errno(EACCES),
    );
    Decision::Deny(EACCES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{ExecSpec, GlobRule, GlobRules, RuleSet};
    use crate::policy::namespace::DEFAULT_NAMESPACE;
    use crate::policy::profile::{CapRules, ProfileMode};
    use std::collections::HashMap;

    fn rule(pattern: &str, perms: &str) -> GlobRule {
        GlobRule {
            pattern: pattern.to_string(),
            perms: perms.parse().unwrap(),
            audit: Perms::empty(),
            exec: None,
            link_target: None,
        }
    }

    fn profile(mode: ProfileMode, rules: Vec<GlobRule>) -> Profile {
        Profile::build(
            "/bin/app".to_string(),
            DEFAULT_NAMESPACE.to_string(),
            RuleSet::Globs(GlobRules::new(rules)),
            CapRules::default(),
            HashMap::new(),
            HashMap::new(),
            Vec::new(),
            HashMap::new(),
            mode,
            false,
            false,
        )
    }

    #[test]
    fn enforce_denies_ungranted_bits() {
        let p = profile(ProfileMode::Enforce, vec![rule("/etc/**", "r")]);
        assert_eq!(
            check_file(&p, 1, "open", "/etc/passwd", "rw".parse().unwrap()),
            Decision::Deny(EACCES)
        );
        assert_eq!(
            check_file(&p, 1, "open", "/etc/passwd", "r".parse().unwrap()),
            Decision::Allow
        );
    }

    #[test]
    fn complain_accepts_despite_denied_bits() {
        let p = profile(ProfileMode::Complain, vec![rule("/etc/**", "r")]);
        assert_eq!(
            check_file(&p, 1, "open", "/etc/passwd", "rw".parse().unwrap()),
            Decision::Allow
        );
    }

    #[test]
    fn repeated_checks_are_deterministic() {
        let p = profile(ProfileMode::Enforce, vec![rule("/var/**", "rw")]);
        let first = check_file(&p, 1, "open", "/var/tmp/x", "rwa".parse().unwrap());
        for _ in 0..8 {
            assert_eq!(
                check_file(&p, 1, "open", "/var/tmp/x", "rwa".parse().unwrap()),
                first
            );
        }
    }

    #[test]
    fn link_subset_law_denies_wider_link_names() {
        // scenario: /tmp/a grants rwl, /etc/shadow grants r only
        let p = profile(
            ProfileMode::Enforce,
            vec![rule("/tmp/a", "rwl"), rule("/etc/shadow", "r")],
        );
        assert_eq!(
            check_link(&p, 1, "/tmp/a", "/etc/shadow"),
            Decision::Deny(EACCES)
        );
        // each path individually passes its own file check
        assert_eq!(
            check_file(&p, 1, "open", "/tmp/a", "rw".parse().unwrap()),
            Decision::Allow
        );
        assert_eq!(
            check_file(&p, 1, "open", "/etc/shadow", "r".parse().unwrap()),
            Decision::Allow
        );
    }

    #[test]
    fn link_allowed_when_subset_holds() {
        let p = profile(
            ProfileMode::Enforce,
            vec![rule("/tmp/a", "rl"), rule("/data/file", "rw")],
        );
        assert_eq!(check_link(&p, 1, "/tmp/a", "/data/file"), Decision::Allow);
    }

    #[test]
    fn link_requires_link_bit_on_link_name() {
        let p = profile(
            ProfileMode::Enforce,
            vec![rule("/tmp/a", "r"), rule("/data/file", "r")],
        );
        assert_eq!(
            check_link(&p, 1, "/tmp/a", "/data/file"),
            Decision::Deny(EACCES)
        );
    }

    #[test]
    fn explicit_pair_rule_overrides_subset_test() {
        let mut paired = rule("/spool/in/*", "wl");
        paired.link_target = Some("/spool/out/*".to_string());
        // target pattern grants nothing on its own: only the pair rule
        // makes this link legal
        let p = profile(ProfileMode::Enforce, vec![paired]);
        assert_eq!(check_link(&p, 1, "/spool/in/j1", "/spool/out/j1"), Decision::Allow);
        assert_eq!(
            check_link(&p, 1, "/spool/in/j1", "/etc/passwd"),
            Decision::Deny(EACCES)
        );
    }

    #[test]
    fn exec_qualifier_must_agree_when_either_side_executes() {
        let mut lrule = rule("/tmp/runner", "rxl");
        lrule.perms = "rxlu".parse().unwrap(); // unsafe exec on the link name
        lrule.exec = Some(ExecSpec {
            mode: crate::matcher::ExecMode::Inherit,
            safe: false,
        });
        let trule = rule("/opt/tool", "rx"); // safe exec on the target
        let p = profile(ProfileMode::Enforce, vec![lrule, trule]);
        assert_eq!(
            check_link(&p, 1, "/tmp/runner", "/opt/tool"),
            Decision::Deny(EACCES)
        );
    }
}
