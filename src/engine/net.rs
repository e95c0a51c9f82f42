/// Socket-creation checks against per-family type masks.
use crate::engine::{Decision, EACCES};
use crate::observability::audit::{emit, AuditOutcome, AuditRecord};
use crate::policy::profile::{Profile, SocketFamily, SocketType};

/// Check creation of a socket `(family, sock_type)` by raw AF_*/SOCK_*
/// numbers. Transports outside the mediated scope are always permitted.
pub fn check_network(profile: &Profile, pid: u32, family: i32, sock_type: i32) -> Decision {
    let Some(family) = SocketFamily::from_raw(family) else {
        return Decision::Allow;
    };
    let Some(sock_type) = SocketType::from_raw(sock_type) else {
        return Decision::Allow;
    };

    let perms = profile.net.get(&family).copied().unwrap_or_default();
    let bit = sock_type.bit();
    let granted = perms.allow & bit != 0;

    if granted {
        // success is logged only when the profile's audit bit is set
        if perms.audit & bit != 0 || profile.audit_all {
            emit(
                AuditRecord::new("socket_create", AuditOutcome::Allowed, pid, &profile.name)
                    .with_namespace(&profile.ns_name)
                    .with_info(format!("family {:?} type {:?}", family, sock_type)),
            );
        }
        return Decision::Allow;
    }

    let quiet = perms.quiet & bit != 0;
    if profile.is_complain() {
        if !quiet {
            emit(
                AuditRecord::new(
                    "socket_create",
                    AuditOutcome::ComplainAllowed,
                    pid,
                    &profile.name,
                )
                .with_namespace(&profile.ns_name)
                .with_info(format!("family {:?} type {:?}", family, sock_type)),
            );
        }
        return Decision::Allow;
    }

    if !quiet {
        emit(
            AuditRecord::new("socket_create", AuditOutcome::Denied, pid, &profile.name)
                .with_namespace(&profile.ns_name)
                .with_info(format!("family {:?} type {:?}", family, sock_type))
                .with_errno(EACCES),
        );
    }
    Decision::Deny(EACCES)
}
