//! Path-matching contract consumed by the decision engine.
//!
//! The engine is polymorphic over [`Matcher`]: one granted mask plus one
//! audit-force mask per match, regardless of how the backend stores its
//! rules. [`RuleSet`] is the closed set of shipped backends; adding a
//! compiled-automaton backend means adding a variant, not touching callers.

mod glob;

pub use glob::{GlobRule, GlobRules};

use crate::policy::perms::Perms;
use serde::{Deserialize, Serialize};

/// Exec transition qualifier decoded from a matched rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum ExecMode {
    /// Keep the current profile across exec
    Inherit,
    /// Drop confinement across exec
    Unconfined,
    /// Transition to the profile named after the executable's base name
    Profile,
    /// Transition to the child profile `<current>//<basename>`
    Child,
    /// Transition through the profile's named-transition table
    Named { index: usize },
}

/// Full exec specification attached to a rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    #[serde(flatten)]
    pub mode: ExecMode,
    /// Safe transitions scrub the environment; unsafe ones keep it
    #[serde(default = "default_safe")]
    pub safe: bool,
}

fn default_safe() -> bool {
    true
}

/// Opaque continuation handle for explicit link-pair rules
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchState(pub(crate) usize);

/// Result of matching one subject path against a rule table
#[derive(Clone, Copy, Debug, Default)]
pub struct PathMatch {
    /// Granted permission bits
    pub allow: Perms,
    /// Bits that must be audited even when the access is fully granted
    pub audit: Perms,
    /// Exec qualifier, when the matched rule carries one
    pub exec: Option<ExecSpec>,
    /// Continuation state for a paired link-target match
    pub state: Option<MatchState>,
}

/// Path matching capability
///
/// Implementations must be deterministic and must not mutate the rule table:
/// repeated calls with the same path yield identical results.
pub trait Matcher {
    fn match_path(&self, path: &str) -> PathMatch;

    /// Re-match `target` from a state produced by [`Matcher::match_path`] on
    /// the link path. `None` when the backend has no paired rule there.
    fn match_continuation(&self, state: MatchState, target: &str) -> Option<Perms>;
}

/// Shipped rule-table representations
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSet {
    Globs(GlobRules),
}

impl RuleSet {
    /// An empty table granting nothing (the null profiles use this)
    pub fn empty() -> RuleSet {
        RuleSet::Globs(GlobRules::new(Vec::new()))
    }
}

impl Matcher for RuleSet {
    fn match_path(&self, path: &str) -> PathMatch {
        match self {
            RuleSet::Globs(rules) => rules.match_path(path),
        }
    }

    fn match_continuation(&self, state: MatchState, target: &str) -> Option<Perms> {
        match self {
            RuleSet::Globs(rules) => rules.match_continuation(state, target),
        }
    }
}
