//! The engine surface: hook entry points for the interception layer, the
//! per-process surface, and the administrator control plane.
//!
//! A [`Confinement`] owns the policy store and the task table and is passed
//! by reference to every caller; there is no hidden process-wide state. The
//! interception layer translates each returned [`Decision`] into the native
//! outcome of the mediated operation; [`Decision::Kill`] means the process
//! has been handed to the kill handler and receives no decision at all.

use crate::engine::{self, Decision, EACCES, EAGAIN, EPERM};
use crate::errors::{ConfineError, Result};
use crate::lifecycle;
use crate::observability::audit::{emit, AuditOutcome, AuditRecord};
use crate::policy::perms::Perms;
use crate::policy::profile::{BindRefusal, Capability, Profile};
use crate::policy::store::PolicyStore;
use crate::task::hats::{self, HatOutcome};
use crate::task::{TaskContext, TaskTable};
use crate::transition::{resolve_exec, ExecOutcome};
use log::{error, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::Arc;

/// Bounded retries for internal stale-profile races. The store is the
/// authority: a stale hit means a replacement is already linked, so one
/// re-resolution normally suffices.
const STALE_RETRIES: usize = 4;

/// Identity of a caller on the control plane or per-process surface
#[derive(Clone, Copy, Debug)]
pub struct Caller {
    pub pid: u32,
    pub euid: u32,
}

impl Caller {
    /// The invoking process itself
    pub fn current() -> Caller {
        Caller {
            pid: nix::unistd::getpid().as_raw() as u32,
            euid: nix::unistd::geteuid().as_raw(),
        }
    }
}

/// Termination of a process after a protocol violation
pub trait KillHandler: Send + Sync {
    fn kill(&self, pid: u32, reason: &str);
}

/// Default handler: SIGKILL through the host kernel
pub struct SignalKill;

impl KillHandler for SignalKill {
    fn kill(&self, pid: u32, reason: &str) {
        error!("terminating pid {}: {}", pid, reason);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            error!("failed to kill pid {}: {}", pid, e);
        }
    }
}

/// File operations collapsing to one path check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathOp {
    Open,
    Create,
    Unlink,
    SetAttr,
}

impl PathOp {
    fn name(self) -> &'static str {
        match self {
            PathOp::Open => "open",
            PathOp::Create => "create",
            PathOp::Unlink => "unlink",
            PathOp::SetAttr => "setattr",
        }
    }
}

/// The confinement engine
pub struct Confinement {
    store: PolicyStore,
    tasks: TaskTable,
    kill: Box<dyn KillHandler>,
}

impl Confinement {
    pub fn new() -> Confinement {
        Confinement::with_kill_handler(Box::new(SignalKill))
    }

    pub fn with_kill_handler(kill: Box<dyn KillHandler>) -> Confinement {
        Confinement {
            store: PolicyStore::new(),
            tasks: TaskTable::new(),
            kill,
        }
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    // ---- control plane ------------------------------------------------

    /// Confined callers are rejected unconditionally, before any rule could
    /// apply; administration additionally requires euid 0.
    fn require_admin(&self, caller: Caller) -> Result<()> {
        if self.tasks.is_confined(caller.pid) {
            return Err(ConfineError::PolicyDenied {
                info: "confined processes may not manage policy".to_string(),
                errno: EACCES,
            });
        }
        if caller.euid != 0 {
            return Err(ConfineError::PolicyDenied {
                info: "policy management requires administrator privileges".to_string(),
                errno: EPERM,
            });
        }
        Ok(())
    }

    pub fn load(&self, caller: Caller, bytes: &[u8]) -> Result<()> {
        self.require_admin(caller)?;
        lifecycle::load_bytes(&self.store, bytes)
    }

    pub fn replace(&self, caller: Caller, bytes: &[u8]) -> Result<()> {
        self.require_admin(caller)?;
        lifecycle::replace_bytes(&self.store, &self.tasks, bytes)
    }

    pub fn remove(&self, caller: Caller, name: &str) -> Result<()> {
        self.require_admin(caller)?;
        lifecycle::remove_profile(&self.store, &self.tasks, name)
    }

    // ---- per-process surface ------------------------------------------

    /// `"<ns:><hatpath> (enforce|complain)"`, or `"unconfined"`
    pub fn read_status(&self, pid: u32) -> String {
        match self.tasks.context(pid) {
            Some(ctx) => ctx.describe(),
            None => "unconfined".to_string(),
        }
    }

    /// Switch into a hat (`Some(name)`) or return from one (`None`)
    pub fn change_hat(&self, pid: u32, hat: Option<&str>, cookie: u64) -> Decision {
        let Some(slot) = self.tasks.slot(pid) else {
            // unconfined processes have no hats
            return Decision::Deny(EPERM);
        };
        let Some(ctx) = slot.current() else {
            return Decision::Deny(EPERM);
        };
        let bound = Arc::clone(ctx.bound());
        let ns = match self.store.namespace(&bound.ns_name) {
            Some(ns) => ns,
            None => self.store.default_namespace(),
        };

        let outcome = match hat {
            Some(name) => hats::enter_hat(&slot, &ns, name, cookie),
            None => hats::return_from_hat(&slot, cookie),
        };

        match outcome {
            HatOutcome::Switched | HatOutcome::Restored | HatOutcome::NoOp => Decision::Allow,
            HatOutcome::ComplainFallback => {
                emit(
                    AuditRecord::new("change_hat", AuditOutcome::ComplainAllowed, pid, &bound.name)
                        .with_namespace(&bound.ns_name)
                        .with_info(format!(
                            "unknown hat {:?}; continuing under null-complain",
                            hat.unwrap_or_default()
                        )),
                );
                Decision::Allow
            }
            HatOutcome::DeniedMiss => {
                emit(
                    AuditRecord::new("change_hat", AuditOutcome::Denied, pid, &bound.name)
                        .with_namespace(&bound.ns_name)
                        .with_info(format!("unknown hat {:?}", hat.unwrap_or_default()))
                        .with_errno(EACCES),
                );
                Decision::Deny(EACCES)
            }
            HatOutcome::Denied => Decision::Deny(EPERM),
            HatOutcome::Violation => self.terminate(pid, &bound, "hat cookie mismatch"),
        }
    }

    /// Rebind another process to a named profile, or to `"unconfined"`.
    /// Administrator-only; no exec is involved.
    pub fn set_profile(&self, caller: Caller, pid: u32, name: &str) -> Result<()> {
        self.require_admin(caller)?;

        if name == "unconfined" {
            if let Some(ctx) = self.tasks.remove(pid) {
                ctx.bound().unbind();
            }
            return Ok(());
        }

        for _ in 0..STALE_RETRIES {
            let target = self
                .store
                .find(None, name)
                .ok_or_else(|| ConfineError::NotFound(name.to_string()))?;
            match target.try_bind() {
                Ok(()) => {
                    let next = Arc::new(TaskContext::new(pid, Arc::clone(&target)));
                    let previous = match self.tasks.slot(pid) {
                        Some(slot) => {
                            let Some(current) = slot.current() else {
                                self.tasks.insert(next);
                                return Ok(());
                            };
                            if !slot.publish_if(&current, next) {
                                // racing context change; undo and retry
                                target.unbind();
                                continue;
                            }
                            Some(current)
                        }
                        None => {
                            self.tasks.insert(next);
                            None
                        }
                    };
                    if let Some(previous) = previous {
                        previous.bound().unbind();
                    }
                    return Ok(());
                }
                Err(BindRefusal::Stale) => continue,
                Err(BindRefusal::LimitExceeded) => {
                    return Err(ConfineError::ResourceExhausted(format!(
                        "profile {} is at its task limit",
                        target.name
                    )))
                }
            }
        }
        Err(ConfineError::NotFound(name.to_string()))
    }

    // ---- hook surface -------------------------------------------------

    /// Exec: resolve and apply the profile transition for `pid`
    pub fn on_exec(&self, pid: u32, path: &str) -> Decision {
        for _ in 0..STALE_RETRIES {
            let ctx = self.tasks.context(pid);
            match resolve_exec(&self.store, ctx.as_deref(), pid, path) {
                ExecOutcome::Keep => return Decision::Allow,
                ExecOutcome::Unconfined => {
                    if let Some(ctx) = self.tasks.remove(pid) {
                        ctx.bound().unbind();
                    }
                    return Decision::Allow;
                }
                ExecOutcome::Denied { errno, .. } => return Decision::Deny(errno),
                ExecOutcome::Transition(target) => match target.try_bind() {
                    Ok(()) => {
                        let next = Arc::new(TaskContext::new(pid, Arc::clone(&target)));
                        match (&ctx, self.tasks.slot(pid)) {
                            (Some(current), Some(slot)) => {
                                if slot.publish_if(current, next) {
                                    current.bound().unbind();
                                    return Decision::Allow;
                                }
                                // lost a context race; undo and re-resolve
                                target.unbind();
                            }
                            (None, _) => {
                                self.tasks.insert(next);
                                return Decision::Allow;
                            }
                            (Some(_), None) => {
                                // exited mid-exec; nothing left to bind
                                target.unbind();
                                return Decision::Allow;
                            }
                        }
                    }
                    // the store already holds this profile's replacement
                    Err(BindRefusal::Stale) => {}
                    Err(BindRefusal::LimitExceeded) => {
                        emit(
                            AuditRecord::new("exec", AuditOutcome::Denied, pid, &target.name)
                                .with_path(path)
                                .with_namespace(&target.ns_name)
                                .with_info("task limit exceeded".to_string())
                                .with_errno(EAGAIN),
                        );
                        return Decision::Deny(EAGAIN);
                    }
                },
            }
        }
        warn!("exec transition for pid {} kept racing; denying", pid);
        Decision::Deny(EAGAIN)
    }

    /// Open/create/unlink/setattr collapse to one path check
    pub fn on_path_access(&self, pid: u32, op: PathOp, path: &str, requested: Perms) -> Decision {
        match self.tasks.context(pid) {
            Some(ctx) => engine::check_file(&ctx.profile, pid, op.name(), path, requested),
            None => Decision::Allow,
        }
    }

    pub fn on_open(&self, pid: u32, path: &str, requested: Perms) -> Decision {
        self.on_path_access(pid, PathOp::Open, path, requested)
    }

    pub fn on_create(&self, pid: u32, path: &str) -> Decision {
        self.on_path_access(pid, PathOp::Create, path, Perms::WRITE | Perms::APPEND)
    }

    pub fn on_unlink(&self, pid: u32, path: &str) -> Decision {
        self.on_path_access(pid, PathOp::Unlink, path, Perms::WRITE)
    }

    pub fn on_setattr(&self, pid: u32, path: &str) -> Decision {
        self.on_path_access(pid, PathOp::SetAttr, path, Perms::WRITE)
    }

    /// Rename checks removal of the old name and creation of the new one
    pub fn on_rename(&self, pid: u32, old: &str, new: &str) -> Decision {
        let first = self.on_path_access(pid, PathOp::Unlink, old, Perms::WRITE);
        if !first.is_allow() {
            return first;
        }
        self.on_path_access(pid, PathOp::Create, new, Perms::WRITE | Perms::APPEND)
    }

    pub fn on_link(&self, pid: u32, link: &str, target: &str) -> Decision {
        match self.tasks.context(pid) {
            Some(ctx) => engine::check_link(&ctx.profile, pid, link, target),
            None => Decision::Allow,
        }
    }

    pub fn on_capability(&self, pid: u32, cap: Capability) -> Decision {
        match self.tasks.context(pid) {
            Some(ctx) => engine::check_capability(&ctx, cap),
            None => Decision::Allow,
        }
    }

    /// `protocol` is accepted for interface fidelity; mediation is by
    /// family and type only
    pub fn on_socket_create(
        &self,
        pid: u32,
        family: i32,
        sock_type: i32,
        _protocol: i32,
    ) -> Decision {
        match self.tasks.context(pid) {
            Some(ctx) => engine::check_network(&ctx.profile, pid, family, sock_type),
            None => Decision::Allow,
        }
    }

    pub fn on_setrlimit(
        &self,
        pid: u32,
        resource: crate::policy::profile::RlimitResource,
        requested: u64,
    ) -> Decision {
        match self.tasks.context(pid) {
            Some(ctx) => engine::check_rlimit(&ctx.profile, pid, resource, requested),
            None => Decision::Allow,
        }
    }

    /// Clone/fork: the child inherits the parent's confinement. The child
    /// context is allocated before the parent profile's lock is taken; the
    /// binding is refused when the profile is stale or at its task limit.
    pub fn on_fork(&self, parent: u32, child: u32) -> Decision {
        let Some(ctx) = self.tasks.context(parent) else {
            return Decision::Allow;
        };

        // allocation strictly precedes the profile accounting lock
        let child_ctx = Arc::new(ctx.fork_copy(child));
        let bound = ctx.bound();
        match bound.try_bind() {
            Ok(()) => {
                self.tasks.insert(child_ctx);
                Decision::Allow
            }
            Err(refusal) => {
                let info = match refusal {
                    BindRefusal::Stale => "profile superseded during fork".to_string(),
                    BindRefusal::LimitExceeded => {
                        format!("task limit reached for {}", bound.name)
                    }
                };
                emit(
                    AuditRecord::new("fork", AuditOutcome::Denied, parent, &bound.name)
                        .with_ppid(parent)
                        .with_namespace(&bound.ns_name)
                        .with_info(info)
                        .with_errno(EAGAIN),
                );
                Decision::Deny(EAGAIN)
            }
        }
    }

    /// Exit tears down the binding and releases the profile references
    pub fn on_exit(&self, pid: u32) {
        if let Some(ctx) = self.tasks.remove(pid) {
            ctx.bound().unbind();
        }
    }

    fn terminate(&self, pid: u32, profile: &Arc<Profile>, reason: &str) -> Decision {
        emit(
            AuditRecord::new("change_hat", AuditOutcome::Killed, pid, &profile.name)
                .with_namespace(&profile.ns_name)
                .with_info(reason.to_string()),
        );
        self.kill.kill(pid, reason);
        if let Some(ctx) = self.tasks.remove(pid) {
            ctx.bound().unbind();
        }
        Decision::Kill
    }
}

impl Default for Confinement {
    fn default() -> Self {
        Confinement::new()
    }
}
