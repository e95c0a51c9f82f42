/// Capability checks with the per-context audit cache.
use crate::engine::{Decision, EPERM};
use crate::observability::audit::{emit, AuditOutcome, AuditRecord};
use crate::policy::profile::Capability;
use crate::task::TaskContext;

/// Check use of a capability against the task's active profile.
///
/// The decision itself is recomputed every call (it is deterministic over
/// the profile); the per-context cache only suppresses duplicate audit
/// records until the context is replaced.
pub fn check_capability(ctx: &TaskContext, cap: Capability) -> Decision {
    let profile = &ctx.profile;
    let granted = profile.caps.grants(cap);
    let quiet = profile.caps.quiet & cap.bit() != 0;
    let forced = profile.caps.audit & cap.bit() != 0 || profile.audit_all;

    let (decision, outcome) = if granted {
        (Decision::Allow, AuditOutcome::Allowed)
    } else if profile.is_complain() {
        (Decision::Allow, AuditOutcome::ComplainAllowed)
    } else {
        (Decision::Deny(EPERM), AuditOutcome::Denied)
    };

    let should_audit = if granted { forced } else { !quiet };
    if should_audit && ctx.first_cap_audit(cap) {
        let mut record = AuditRecord::new("capability", outcome, ctx.pid, &profile.name)
            .with_namespace(&profile.ns_name)
            .with_info(format!("capability {:?}", cap));
        if ctx.in_hat() {
            record = record.with_hat(&profile.name);
        }
        if let Decision::Deny(errno) = decision {
            record = record.with_errno(errno);
        }
        emit(record);
    }

    decision
}
