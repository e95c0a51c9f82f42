/// Hat state machine: cookie-guarded switches between a bound profile and
/// its declared sub-profiles.
///
/// States: Top (active == bound profile) and InHat (active == a declared
/// hat). A forged cookie is a protocol violation, never a denial: the
/// caller must terminate the process and return no decision to it.
use crate::policy::namespace::PolicyNamespace;
use crate::task::{TaskContext, TaskSlot};
use std::sync::Arc;

/// Result of a hat-switch operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HatOutcome {
    /// Active profile is now the named hat
    Switched,
    /// Hat missing, complain mode: active is the shared null-complain
    /// profile and the access proceeds with a logged hint
    ComplainFallback,
    /// Hat missing, enforce mode: active is the permission-less builtin and
    /// the switch is reported denied
    DeniedMiss,
    /// Return path refused (no pending hat return for a nonzero cookie)
    Denied,
    /// Active restored to the bound profile, cookie cleared
    Restored,
    /// Zero cookie: irrevocable hat, nothing to do
    NoOp,
    /// Cookie mismatch against a nonzero stored value; fatal
    Violation,
}

/// Enter `name` from Top, or switch to a sibling hat from InHat under the
/// same cookie check.
pub fn enter_hat(
    slot: &TaskSlot,
    ns: &PolicyNamespace,
    name: &str,
    cookie: u64,
) -> HatOutcome {
    loop {
        let Some(ctx) = slot.current() else {
            // exited concurrently; nothing left to switch
            return HatOutcome::Denied;
        };

        if ctx.in_hat() && cookie != ctx.cookie {
            return HatOutcome::Violation;
        }

        let bound = Arc::clone(ctx.bound());
        let (active, outcome) = match bound.hat(name) {
            Some(hat) => (Arc::clone(hat), HatOutcome::Switched),
            None if bound.is_complain() => (ns.null_complain(), HatOutcome::ComplainFallback),
            None => (ns.null_enforce(), HatOutcome::DeniedMiss),
        };

        let next = Arc::new(TaskContext::with_hat(ctx.pid, active, bound, cookie));
        if slot.publish_if(&ctx, next) {
            return outcome;
        }
        // lost a race against another context swap; re-read and retry
    }
}

/// Return from a hat when `cookie` matches the stored value
pub fn return_from_hat(slot: &TaskSlot, cookie: u64) -> HatOutcome {
    if cookie == 0 {
        return HatOutcome::NoOp;
    }

    loop {
        let Some(ctx) = slot.current() else {
            return HatOutcome::Denied;
        };

        if ctx.cookie == 0 {
            // no pending hat return to validate against
            return HatOutcome::Denied;
        }
        if cookie != ctx.cookie {
            return HatOutcome::Violation;
        }

        let Some(bound) = ctx.previous.as_ref().map(Arc::clone) else {
            return HatOutcome::Denied;
        };

        let next = Arc::new(TaskContext::new(ctx.pid, bound));
        if slot.publish_if(&ctx, next) {
            return HatOutcome::Restored;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::namespace::{PolicyNamespace, DEFAULT_NAMESPACE, NULL_ENFORCE_NAME};
    use crate::policy::profile::{Profile, ProfileMode};
    use crate::task::TaskTable;
    use std::collections::HashMap;

    fn setup(mode: ProfileMode) -> (PolicyNamespace, TaskTable, Arc<TaskSlot>) {
        let ns = PolicyNamespace::new(DEFAULT_NAMESPACE);
        let hat = Arc::new(Profile::null(DEFAULT_NAMESPACE, "web//cgi", mode));
        let mut base = Profile::null(DEFAULT_NAMESPACE, "web", mode);
        base.hats = HashMap::from([("cgi".to_string(), hat)]);
        let base = Arc::new(base);

        let table = TaskTable::new();
        let slot = table.insert(Arc::new(TaskContext::new(10, base)));
        (ns, table, slot)
    }

    #[test]
    fn enter_and_return_round_trip() {
        let (ns, _table, slot) = setup(ProfileMode::Enforce);

        assert_eq!(enter_hat(&slot, &ns, "cgi", 0xfeed), HatOutcome::Switched);
        let ctx = slot.current().unwrap();
        assert_eq!(ctx.profile.name, "web//cgi");
        assert_eq!(ctx.cookie, 0xfeed);

        assert_eq!(return_from_hat(&slot, 0xfeed), HatOutcome::Restored);
        let ctx = slot.current().unwrap();
        assert_eq!(ctx.profile.name, "web");
        assert_eq!(ctx.cookie, 0);
        assert!(!ctx.in_hat());
    }

    #[test]
    fn forged_cookie_is_a_violation_not_a_denial() {
        let (ns, _table, slot) = setup(ProfileMode::Enforce);
        enter_hat(&slot, &ns, "cgi", 0xfeed);
        assert_eq!(return_from_hat(&slot, 0xdead), HatOutcome::Violation);
    }

    #[test]
    fn zero_cookie_return_is_a_no_op() {
        let (ns, _table, slot) = setup(ProfileMode::Enforce);
        enter_hat(&slot, &ns, "cgi", 0xfeed);
        assert_eq!(return_from_hat(&slot, 0), HatOutcome::NoOp);
        // still inside the hat
        assert!(slot.current().unwrap().in_hat());
    }

    #[test]
    fn missing_hat_enforce_activates_null_enforce() {
        let (ns, _table, slot) = setup(ProfileMode::Enforce);
        assert_eq!(enter_hat(&slot, &ns, "ghost", 1), HatOutcome::DeniedMiss);
        let ctx = slot.current().unwrap();
        assert_eq!(ctx.profile.name, NULL_ENFORCE_NAME);
        // the bound profile is retained so a cookie return still works
        assert_eq!(ctx.bound().name, "web");
        assert_eq!(return_from_hat(&slot, 1), HatOutcome::Restored);
    }

    #[test]
    fn missing_hat_complain_falls_back_to_null_complain() {
        let (ns, _table, slot) = setup(ProfileMode::Complain);
        assert_eq!(enter_hat(&slot, &ns, "ghost", 1), HatOutcome::ComplainFallback);
        assert!(slot.current().unwrap().profile.is_complain());
    }

    #[test]
    fn sibling_switch_requires_matching_cookie() {
        let (ns, _table, slot) = setup(ProfileMode::Enforce);
        enter_hat(&slot, &ns, "cgi", 0xfeed);
        // same cookie: allowed to switch (even to a miss fallback)
        assert_eq!(enter_hat(&slot, &ns, "cgi", 0xfeed), HatOutcome::Switched);
        // different cookie while in a hat: fatal
        assert_eq!(enter_hat(&slot, &ns, "cgi", 0xbeef), HatOutcome::Violation);
    }

    #[test]
    fn nonzero_cookie_with_no_pending_return_is_denied() {
        let (_ns, _table, slot) = setup(ProfileMode::Enforce);
        assert_eq!(return_from_hat(&slot, 5), HatOutcome::Denied);
    }
}
