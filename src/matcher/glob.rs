/// Ordered literal/glob rule table.
///
/// Pattern language: `?` matches one non-separator character, `*` matches
/// within a path component, `**` matches across components. Everything else
/// is literal. Granted and audit masks accumulate across every matching
/// entry; exec qualifier and link continuation come from the first matching
/// entry that declares one.
use super::{ExecSpec, MatchState, Matcher, PathMatch};
use crate::policy::perms::Perms;
use serde::{Deserialize, Serialize};

/// One rule entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobRule {
    /// Subject pattern
    pub pattern: String,
    /// Granted permission bits
    pub perms: Perms,
    /// Force-audit bits (logged even on full grant)
    #[serde(default)]
    pub audit: Perms,
    /// Exec qualifier for rules granting execute
    #[serde(default)]
    pub exec: Option<ExecSpec>,
    /// Explicit link-pair target pattern
    #[serde(default)]
    pub link_target: Option<String>,
}

/// Ordered rule table over glob patterns
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobRules {
    rules: Vec<GlobRule>,
}

impl GlobRules {
    pub fn new(rules: Vec<GlobRule>) -> GlobRules {
        GlobRules { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub(super) fn match_path(&self, path: &str) -> PathMatch {
        let mut result = PathMatch::default();
        for (idx, rule) in self.rules.iter().enumerate() {
            if !glob_match(&rule.pattern, path) {
                continue;
            }
            result.allow |= rule.perms;
            result.audit |= rule.audit;
            if result.exec.is_none() {
                result.exec = rule.exec;
            }
            if result.state.is_none() && rule.link_target.is_some() {
                result.state = Some(MatchState(idx));
            }
        }
        result
    }

    pub(super) fn match_continuation(&self, state: MatchState, target: &str) -> Option<Perms> {
        let rule = self.rules.get(state.0)?;
        let pattern = rule.link_target.as_deref()?;
        if glob_match(pattern, target) {
            Some(rule.perms)
        } else {
            None
        }
    }
}

/// Match `path` against `pattern`
fn glob_match(pattern: &str, path: &str) -> bool {
    glob_match_bytes(pattern.as_bytes(), path.as_bytes())
}

fn glob_match_bytes(pat: &[u8], path: &[u8]) -> bool {
    match pat.first() {
        None => path.is_empty(),
        Some(b'*') => {
            if pat.get(1) == Some(&b'*') {
                // `**` spans separators
                let rest = &pat[2..];
                (0..=path.len()).any(|i| glob_match_bytes(rest, &path[i..]))
            } else {
                let rest = &pat[1..];
                // `*` stops at a separator
                let limit = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
                (0..=limit).any(|i| glob_match_bytes(rest, &path[i..]))
            }
        }
        Some(b'?') => match path.first() {
            Some(&c) if c != b'/' => glob_match_bytes(&pat[1..], &path[1..]),
            _ => false,
        },
        Some(&c) => path.first() == Some(&c) && glob_match_bytes(&pat[1..], &path[1..]),
    }
}
