/// Resource-limit checks: a profile may cap the hard limit a task can set.
use crate::engine::{Decision, EPERM};
use crate::observability::audit::{emit, AuditOutcome, AuditRecord};
use crate::policy::profile::{Profile, RlimitResource};

/// Check a request to raise a hard limit to `requested`
pub fn check_rlimit(
    profile: &Profile,
    pid: u32,
    resource: RlimitResource,
    requested: u64,
) -> Decision {
    let Some(cap) = profile.rlimits.get(&resource).copied() else {
        // uncapped resources are not mediated
        return Decision::Allow;
    };
    if requested <= cap {
        return Decision::Allow;
    }

    let info = format!("rlimit {:?} requested {} capped at {}", resource, requested, cap);
    if profile.is_complain() {
        emit(
            AuditRecord::new("setrlimit", AuditOutcome::ComplainAllowed, pid, &profile.name)
                .with_namespace(&profile.ns_name)
                .with_info(info),
        );
        return Decision::Allow;
    }

    emit(
        AuditRecord::new("setrlimit", AuditOutcome::Denied, pid, &profile.name)
            .with_namespace(&profile.ns_name)
            .with_info(info)
            .with_errno(EPERM),
    );
    Decision::Deny(EPERM)
}
