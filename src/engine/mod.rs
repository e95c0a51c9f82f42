//! Stateless permission decision engine.
//!
//! Each check matches a request against one profile snapshot and applies
//! policy: requested-versus-granted masks for files, the subset law for
//! links, cached capability audits, per-family network tables, and rlimit
//! caps. Complain mode converts denials into audited accepts; it never
//! converts a protocol violation.

pub mod capability;
pub mod file;
pub mod net;
pub mod rlimit;

pub use capability::check_capability;
pub use file::{check_file, check_link};
pub use net::check_network;
pub use rlimit::check_rlimit;

/// Outcome of a mediated operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Denied with the native errno of the mediated operation
    Deny(i32),
    /// Protocol violation: the interception layer must terminate the
    /// process; no decision is returned to it
    Kill,
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Decision::Deny(errno) => Some(*errno),
            _ => None,
        }
    }
}

pub(crate) const EPERM: i32 = 1;
pub(crate) const EACCES: i32 = 13;
pub(crate) const EAGAIN: i32 = 11;
