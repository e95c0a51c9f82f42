/// Profile documents: the deserialize step behind the control plane.
///
/// A document is JSON describing one top-level profile with its rules,
/// capabilities, network and rlimit policy, named transitions, and hats.
/// Hats are declared nested exactly one level; the document types make a
/// deeper nesting unrepresentable.
use crate::errors::{ConfineError, Result};
use crate::matcher::{GlobRule, GlobRules, RuleSet};
use crate::policy::namespace::DEFAULT_NAMESPACE;
use crate::policy::profile::{
    CapRules, Capability, NetFamilyPerms, NetRules, Profile, ProfileMode, RlimitResource,
    SocketFamily, SocketType, TransitionTarget,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Capability lists in document form
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CapDoc {
    #[serde(default)]
    pub allow: Vec<Capability>,
    #[serde(default)]
    pub audit: Vec<Capability>,
    #[serde(default)]
    pub quiet: Vec<Capability>,
}

impl CapDoc {
    fn build(&self) -> CapRules {
        let fold = |caps: &[Capability]| caps.iter().fold(0u64, |mask, c| mask | c.bit());
        CapRules {
            allow: fold(&self.allow),
            audit: fold(&self.audit),
            quiet: fold(&self.quiet),
        }
    }
}

/// Per-family socket-type lists in document form
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetFamilyDoc {
    #[serde(default)]
    pub allow: Vec<SocketType>,
    #[serde(default)]
    pub audit: Vec<SocketType>,
    #[serde(default)]
    pub quiet: Vec<SocketType>,
}

impl NetFamilyDoc {
    fn build(&self) -> NetFamilyPerms {
        let fold = |types: &[SocketType]| types.iter().fold(0u16, |mask, t| mask | t.bit());
        NetFamilyPerms {
            allow: fold(&self.allow),
            audit: fold(&self.audit),
            quiet: fold(&self.quiet),
        }
    }
}

/// A hat declaration. Deliberately has no `hats` field: depth is one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HatDoc {
    pub name: String,
    #[serde(default)]
    pub mode: Option<ProfileMode>,
    #[serde(default)]
    pub rules: Vec<GlobRule>,
    #[serde(default)]
    pub caps: CapDoc,
    #[serde(default)]
    pub network: HashMap<SocketFamily, NetFamilyDoc>,
    #[serde(default)]
    pub rlimits: HashMap<RlimitResource, u64>,
}

/// One top-level profile document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileDoc {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: ProfileMode,
    /// Audit every decision, not only denials
    #[serde(default)]
    pub audit: bool,
    #[serde(default)]
    pub rules: Vec<GlobRule>,
    #[serde(default)]
    pub caps: CapDoc,
    #[serde(default)]
    pub network: HashMap<SocketFamily, NetFamilyDoc>,
    #[serde(default)]
    pub rlimits: HashMap<RlimitResource, u64>,
    /// Targets for named exec transitions, `:ns:name` qualifiers allowed
    #[serde(default)]
    pub transitions: Vec<String>,
    #[serde(default)]
    pub hats: Vec<HatDoc>,
}

fn default_mode() -> ProfileMode {
    ProfileMode::Enforce
}

impl ProfileDoc {
    /// Parse a document from control-plane bytes
    pub fn parse(bytes: &[u8]) -> Result<ProfileDoc> {
        let doc: ProfileDoc = serde_json::from_slice(bytes)
            .map_err(|e| ConfineError::Parse(format!("profile document: {}", e)))?;
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfineError::Parse("profile name must not be empty".to_string()));
        }
        if self.name.contains("//") {
            return Err(ConfineError::Parse(format!(
                "profile name {:?} uses the reserved hat separator",
                self.name
            )));
        }
        for hat in &self.hats {
            if hat.name.is_empty() || hat.name.contains("//") {
                return Err(ConfineError::Parse(format!("invalid hat name {:?}", hat.name)));
            }
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            if let Some(spec) = rule.exec {
                if let crate::matcher::ExecMode::Named { index } = spec.mode {
                    if index >= self.transitions.len() {
                        return Err(ConfineError::Parse(format!(
                            "rule {} references transition {} but only {} are declared",
                            idx,
                            index,
                            self.transitions.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Build the live profile. The namespace name is resolved here; the
    /// caller links the result into the store.
    pub fn build(&self) -> Arc<Profile> {
        let ns_name = self
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let transitions: Vec<TransitionTarget> = self
            .transitions
            .iter()
            .map(|full| {
                let (ns, name) = super::store::parse_qualified(full);
                TransitionTarget {
                    namespace: ns.map(str::to_string),
                    name: name.to_string(),
                }
            })
            .collect();

        let mut hats = HashMap::new();
        for hat in &self.hats {
            let hat_profile = Profile::build(
                format!("{}//{}", self.name, hat.name),
                ns_name.clone(),
                RuleSet::Globs(GlobRules::new(hat.rules.clone())),
                hat.caps.build(),
                build_net(&hat.network),
                hat.rlimits.clone(),
                Vec::new(),
                HashMap::new(),
                hat.mode.unwrap_or(self.mode),
                self.audit,
                true,
            );
            hats.insert(hat.name.clone(), Arc::new(hat_profile));
        }

        Arc::new(Profile::build(
            self.name.clone(),
            ns_name,
            RuleSet::Globs(GlobRules::new(self.rules.clone())),
            self.caps.build(),
            build_net(&self.network),
            self.rlimits.clone(),
            transitions,
            hats,
            self.mode,
            self.audit,
            false,
        ))
    }
}

fn build_net(doc: &HashMap<SocketFamily, NetFamilyDoc>) -> NetRules {
    doc.iter().map(|(family, perms)| (*family, perms.build())).collect()
}
