/// Profile data model: the unit of policy a process is confined by.
///
/// A profile is immutable once built, with two exceptions: the monotone
/// `stale` flag set when the store supersedes or removes it, and the
/// bound-task accounting mutated as processes bind and unbind. Identity is
/// the `Arc` pointer, never the name; a reload produces a new object.
use crate::matcher::RuleSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Enforcement mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileMode {
    /// Denials are returned to the caller
    Enforce,
    /// Denials are logged but the access proceeds
    Complain,
}

impl fmt::Display for ProfileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileMode::Enforce => write!(f, "enforce"),
            ProfileMode::Complain => write!(f, "complain"),
        }
    }
}

/// POSIX capabilities mediated by profiles (closed set, v1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Capability {
    Chown = 0,
    DacOverride = 1,
    DacReadSearch = 2,
    Fowner = 3,
    Fsetid = 4,
    Kill = 5,
    Setgid = 6,
    Setuid = 7,
    Setpcap = 8,
    NetBindService = 10,
    NetBroadcast = 11,
    NetAdmin = 12,
    NetRaw = 13,
    IpcLock = 14,
    SysModule = 16,
    SysRawio = 17,
    SysChroot = 18,
    SysPtrace = 19,
    SysAdmin = 21,
    SysBoot = 22,
    SysNice = 23,
    SysResource = 24,
    SysTime = 25,
    Mknod = 27,
    AuditWrite = 29,
    AuditControl = 30,
}

impl Capability {
    pub const fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}

/// Capability grant and audit masks
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CapRules {
    /// Granted capabilities
    pub allow: u64,
    /// Capabilities audited even when granted
    pub audit: u64,
    /// Capabilities whose denial is not logged
    pub quiet: u64,
}

impl CapRules {
    pub fn grants(&self, cap: Capability) -> bool {
        self.allow & cap.bit() != 0
    }
}

/// Socket address families mediated by profiles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketFamily {
    Unix,
    Inet,
    Inet6,
    Netlink,
    Packet,
}

impl SocketFamily {
    /// Map a raw AF_* constant into mediation scope. Families outside the
    /// closed set are not mediated and their sockets are always permitted.
    pub fn from_raw(family: i32) -> Option<SocketFamily> {
        match family {
            1 => Some(SocketFamily::Unix),
            2 => Some(SocketFamily::Inet),
            10 => Some(SocketFamily::Inet6),
            16 => Some(SocketFamily::Netlink),
            17 => Some(SocketFamily::Packet),
            _ => None,
        }
    }
}

/// Socket types within a mediated family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    Stream,
    Dgram,
    Raw,
    Rdm,
    Seqpacket,
}

impl SocketType {
    pub fn from_raw(sock_type: i32) -> Option<SocketType> {
        match sock_type {
            1 => Some(SocketType::Stream),
            2 => Some(SocketType::Dgram),
            3 => Some(SocketType::Raw),
            4 => Some(SocketType::Rdm),
            5 => Some(SocketType::Seqpacket),
            _ => None,
        }
    }

    pub const fn bit(self) -> u16 {
        match self {
            SocketType::Stream => 1 << 0,
            SocketType::Dgram => 1 << 1,
            SocketType::Raw => 1 << 2,
            SocketType::Rdm => 1 << 3,
            SocketType::Seqpacket => 1 << 4,
        }
    }
}

/// Per-family socket-type permission masks
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct NetFamilyPerms {
    /// Permitted socket-type bits
    pub allow: u16,
    /// Types whose successful creation is logged
    pub audit: u16,
    /// Types whose denial is not logged
    pub quiet: u16,
}

/// Network permission table keyed by address family
pub type NetRules = HashMap<SocketFamily, NetFamilyPerms>;

/// Resource-limit classes a profile may cap
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RlimitResource {
    Cpu,
    Fsize,
    Data,
    Stack,
    Core,
    Rss,
    Nproc,
    Nofile,
    Memlock,
    As,
    Locks,
}

impl FromStr for RlimitResource {
    type Err = String;

    fn from_str(s: &str) -> Result<RlimitResource, String> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown rlimit resource: {:?}", s))
    }
}

/// Hard-limit overrides keyed by resource
pub type RlimitRules = HashMap<RlimitResource, u64>;

/// Target of a named exec transition, optionally namespace-qualified
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTarget {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

/// Why a new binding was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindRefusal {
    /// The profile has been superseded or removed
    Stale,
    /// The profile's bound-task limit is reached
    LimitExceeded,
}

#[derive(Debug, Default)]
pub(crate) struct TaskAccounting {
    bound: u64,
}

/// A named set of access rules, capabilities, and limits
#[derive(Debug)]
pub struct Profile {
    /// Profile name; hats are named `parent//hat`
    pub name: String,
    /// Owning namespace name
    pub ns_name: String,
    /// Opaque rule table behind the matcher contract
    pub rules: RuleSet,
    pub caps: CapRules,
    pub net: NetRules,
    pub rlimits: RlimitRules,
    /// Named-transition table indexed by exec rules
    pub transitions: Vec<TransitionTarget>,
    /// Declared hats, depth exactly one
    pub hats: HashMap<String, Arc<Profile>>,
    pub mode: ProfileMode,
    /// Audit every decision made against this profile
    pub audit_all: bool,
    pub is_hat: bool,
    /// Bound-task ceiling, from the nproc rlimit override
    pub task_limit: Option<u64>,

    stale: AtomicBool,
    accounting: Mutex<TaskAccounting>,
}

impl Profile {
    /// Build a permission-less builtin profile (the null profiles)
    pub(crate) fn null(ns_name: &str, name: &str, mode: ProfileMode) -> Profile {
        Profile {
            name: name.to_string(),
            ns_name: ns_name.to_string(),
            rules: RuleSet::empty(),
            caps: CapRules::default(),
            net: NetRules::default(),
            rlimits: RlimitRules::default(),
            transitions: Vec::new(),
            hats: HashMap::new(),
            mode,
            audit_all: false,
            is_hat: false,
            task_limit: None,
            stale: AtomicBool::new(false),
            accounting: Mutex::new(TaskAccounting::default()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build(
        name: String,
        ns_name: String,
        rules: RuleSet,
        caps: CapRules,
        net: NetRules,
        rlimits: RlimitRules,
        transitions: Vec<TransitionTarget>,
        hats: HashMap<String, Arc<Profile>>,
        mode: ProfileMode,
        audit_all: bool,
        is_hat: bool,
    ) -> Profile {
        let task_limit = rlimits.get(&RlimitResource::Nproc).copied();
        Profile {
            name,
            ns_name,
            rules,
            caps,
            net,
            rlimits,
            transitions,
            hats,
            mode,
            audit_all,
            is_hat,
            task_limit,
            stale: AtomicBool::new(false),
            accounting: Mutex::new(TaskAccounting::default()),
        }
    }

    pub fn is_complain(&self) -> bool {
        self.mode == ProfileMode::Complain
    }

    /// Monotone: once stale, a profile never becomes fresh again
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
        for hat in self.hats.values() {
            hat.stale.store(true, Ordering::Release);
        }
    }

    /// Find a declared hat by its bare name
    pub fn hat(&self, name: &str) -> Option<&Arc<Profile>> {
        self.hats.get(name)
    }

    /// Number of tasks currently bound
    pub fn bound_tasks(&self) -> u64 {
        self.accounting.lock().expect("profile accounting poisoned").bound
    }

    /// Account a new binding. Refused when stale or at the task limit;
    /// existing bindings are unaffected by staleness.
    pub fn try_bind(&self) -> Result<(), BindRefusal> {
        let mut acct = self.accounting.lock().expect("profile accounting poisoned");
        if self.is_stale() {
            return Err(BindRefusal::Stale);
        }
        if let Some(limit) = self.task_limit {
            if acct.bound >= limit {
                return Err(BindRefusal::LimitExceeded);
            }
        }
        acct.bound += 1;
        Ok(())
    }

    /// Account a binding moved in by migration. Bypasses the stale and limit
    /// checks: migration must always succeed.
    pub(crate) fn bind_migrated(&self) {
        self.accounting.lock().expect("profile accounting poisoned").bound += 1;
    }

    /// Release one binding
    pub fn unbind(&self) {
        let mut acct = self.accounting.lock().expect("profile accounting poisoned");
        acct.bound = acct.bound.saturating_sub(1);
    }

    /// Acquire the accounting locks of two profiles in address order, so
    /// concurrent two-profile operations can never deadlock. Locking the same
    /// profile twice collapses to a single acquisition.
    pub(crate) fn lock_pair<'a>(a: &'a Profile, b: &'a Profile) -> PairGuard<'a> {
        let pa = a as *const Profile;
        let pb = b as *const Profile;
        if std::ptr::eq(pa, pb) {
            PairGuard::Same(a.accounting.lock().expect("profile accounting poisoned"))
        } else if pa < pb {
            let ga = a.accounting.lock().expect("profile accounting poisoned");
            let gb = b.accounting.lock().expect("profile accounting poisoned");
            PairGuard::Both(ga, gb)
        } else {
            let gb = b.accounting.lock().expect("profile accounting poisoned");
            let ga = a.accounting.lock().expect("profile accounting poisoned");
            PairGuard::Both(ga, gb)
        }
    }
}

/// Guard over one or two profile accounting locks
pub(crate) enum PairGuard<'a> {
    Same(MutexGuard<'a, TaskAccounting>),
    Both(MutexGuard<'a, TaskAccounting>, MutexGuard<'a, TaskAccounting>),
}

impl PairGuard<'_> {
    /// Move one binding from the first profile to the second
    pub(crate) fn transfer(&mut self) {
        match self {
            // Same profile on both sides: nothing moves
            PairGuard::Same(_) => {}
            PairGuard::Both(from, to) => {
                from.bound = from.bound.saturating_sub(1);
                to.bound += 1;
            }
        }
    }
}
