/// Structured audit records for confinement decisions.
///
/// Records carry the abstract shape every decision reports: operation,
/// requested and denied masks, subject paths, process identity, profile
/// identity, free-text info, and errno. Emission never happens under a
/// profile or task lock: records are handed to a writer thread over a
/// channel, mirrored to the `log` facade, and appended as JSON lines to an
/// audit file when one is configured.
use crate::policy::perms::Perms;
use crossbeam_channel::{unbounded, Sender};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::thread;
use std::time::SystemTime;
use uuid::Uuid;

/// Outcome class of an audited decision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Fully granted; logged because force-audit bits were requested
    Allowed,
    /// Denied bits present but accepted under complain mode
    ComplainAllowed,
    /// Denied and refused
    Denied,
    /// Protocol violation; the process is terminated
    Killed,
}

/// One audit record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique event id
    pub id: String,
    pub timestamp_secs: u64,
    /// Mediated operation ("open", "exec", "link", "capability", ...)
    pub operation: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Perms::is_empty")]
    pub requested: Perms,
    #[serde(default, skip_serializing_if = "Perms::is_empty")]
    pub denied: Perms,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Second subject for link and rename operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    pub profile: String,
    /// Only recorded for non-default namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
}

impl AuditRecord {
    pub fn new(operation: &str, outcome: AuditOutcome, pid: u32, profile: &str) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4().to_string(),
            timestamp_secs: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            outcome,
            requested: Perms::empty(),
            denied: Perms::empty(),
            path: None,
            target: None,
            pid,
            ppid: None,
            profile: profile.to_string(),
            namespace: None,
            hat: None,
            info: None,
            errno: None,
        }
    }

    pub fn with_masks(mut self, requested: Perms, denied: Perms) -> Self {
        self.requested = requested;
        self.denied = denied;
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_ppid(mut self, ppid: u32) -> Self {
        self.ppid = Some(ppid);
        self
    }

    pub fn with_namespace(mut self, ns: &str) -> Self {
        if ns != crate::policy::namespace::DEFAULT_NAMESPACE {
            self.namespace = Some(ns.to_string());
        }
        self
    }

    pub fn with_hat(mut self, hat: &str) -> Self {
        self.hat = Some(hat.to_string());
        self
    }

    pub fn with_info(mut self, info: String) -> Self {
        self.info = Some(info);
        self
    }

    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }
}

/// Audit sink: a writer thread draining a channel into an append-only file
pub struct AuditLogger {
    tx: Sender<AuditRecord>,
    path: PathBuf,
}

impl AuditLogger {
    /// Open the audit file and start the writer thread
    pub fn new(path: PathBuf) -> std::io::Result<AuditLogger> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = unbounded::<AuditRecord>();
        thread::Builder::new()
            .name("confine-audit".to_string())
            .spawn(move || {
                for record in rx.iter() {
                    match serde_json::to_string(&record) {
                        Ok(line) => {
                            if let Err(e) = writeln!(file, "{}", line) {
                                error!("audit file write failed: {}", e);
                            }
                        }
                        Err(e) => error!("audit record serialization failed: {}", e),
                    }
                }
            })?;

        Ok(AuditLogger { tx, path })
    }

    pub fn audit_path(&self) -> &PathBuf {
        &self.path
    }

    pub fn submit(&self, record: AuditRecord) {
        // The channel is unbounded: submission never blocks the decision path
        let _ = self.tx.send(record);
    }
}

static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Install the global audit file sink. Without it, records still reach the
/// `log` facade.
pub fn init_audit_logger(path: PathBuf) -> std::io::Result<()> {
    match AuditLogger::new(path) {
        Ok(logger) => {
            if AUDIT_LOGGER.set(logger).is_err() {
                warn!("audit logger already initialized");
            }
            Ok(())
        }
        Err(e) => {
            error!("failed to initialize audit logger: {}", e);
            Err(e)
        }
    }
}

/// Emit one audit record
pub fn emit(record: AuditRecord) {
    match record.outcome {
        AuditOutcome::Killed => error!(
            "VIOLATION {}: pid={} profile={} {}",
            record.operation,
            record.pid,
            record.profile,
            record.info.as_deref().unwrap_or("")
        ),
        AuditOutcome::Denied => warn!(
            "DENIED {}: pid={} profile={} path={} denied={}",
            record.operation,
            record.pid,
            record.profile,
            record.path.as_deref().unwrap_or("-"),
            record.denied
        ),
        AuditOutcome::ComplainAllowed => warn!(
            "ALLOWED (complain) {}: pid={} profile={} path={} denied={}",
            record.operation,
            record.pid,
            record.profile,
            record.path.as_deref().unwrap_or("-"),
            record.denied
        ),
        AuditOutcome::Allowed => info!(
            "AUDIT {}: pid={} profile={} path={}",
            record.operation,
            record.pid,
            record.profile,
            record.path.as_deref().unwrap_or("-")
        ),
    }

    if let Some(logger) = AUDIT_LOGGER.get() {
        logger.submit(record);
    }
}
