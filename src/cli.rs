use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::{check_file, Decision};
use crate::errors::ConfineError;
use crate::observability::audit::init_audit_logger;
use crate::policy::load::ProfileDoc;
use crate::policy::perms::Perms;
use crate::policy::store::{parse_qualified, PolicyStore};
use crate::task::TaskContext;
use crate::transition::{resolve_exec, ExecOutcome};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Append audit records to this file as JSON lines
    #[arg(long, value_name = "FILE")]
    audit_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse profile documents and report validation errors
    Validate {
        /// Profile document files (JSON)
        files: Vec<PathBuf>,
    },
    /// Load profile documents and print one profile as JSON
    Show {
        /// Profile name, optionally qualified as :namespace:name
        #[arg(long)]
        profile: String,
        /// Profile document files (JSON)
        files: Vec<PathBuf>,
    },
    /// Dry-run a file access decision against a loaded profile
    Check {
        /// Profile name, optionally qualified as :namespace:name
        #[arg(long)]
        profile: String,
        /// Path the hypothetical task would access
        #[arg(long)]
        path: String,
        /// Requested access string, e.g. "rw"
        #[arg(long)]
        access: String,
        /// Profile document files (JSON)
        files: Vec<PathBuf>,
    },
    /// Dry-run the exec transition a confined task would take
    CheckExec {
        /// Profile name of the caller, optionally qualified
        #[arg(long)]
        profile: String,
        /// Executable path
        #[arg(long)]
        path: String,
        /// Profile document files (JSON)
        files: Vec<PathBuf>,
    },
    /// List the profiles the given documents would load
    Status {
        /// Profile document files (JSON)
        files: Vec<PathBuf>,
    },
}

impl Commands {
    fn files(&self) -> &[PathBuf] {
        match self {
            Self::Validate { files }
            | Self::Show { files, .. }
            | Self::Check { files, .. }
            | Self::CheckExec { files, .. }
            | Self::Status { files } => files,
        }
    }
}

/// Parse every document, loading the valid ones into a fresh store.
fn load_store(files: &[PathBuf]) -> Result<PolicyStore, ConfineError> {
    let store = PolicyStore::new();
    for file in files {
        let bytes = std::fs::read(file)?;
        let doc = ProfileDoc::parse(&bytes)?;
        store.add(doc.build())?;
    }
    Ok(store)
}

fn find_or_exit(store: &PolicyStore, name: &str) -> std::sync::Arc<crate::policy::profile::Profile> {
    let (ns, bare) = parse_qualified(name);
    match store.find(ns, bare) {
        Some(profile) => profile,
        None => {
            eprintln!("Error: profile '{}' not found in the given documents", name);
            std::process::exit(1);
        }
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    if let Some(path) = &cli.audit_log {
        if let Err(e) = init_audit_logger(path.clone()) {
            eprintln!("Failed to initialize audit log {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }

    if cli.command.files().is_empty() {
        eprintln!("Error: at least one profile document file is required");
        std::process::exit(2);
    }

    match cli.command {
        Commands::Validate { files } => {
            let mut failed = false;
            for file in &files {
                let result = std::fs::read(file)
                    .map_err(ConfineError::from)
                    .and_then(|bytes| ProfileDoc::parse(&bytes));
                match result {
                    Ok(doc) => {
                        let hats = doc.hats.len();
                        println!("OK {} ({}, {} hats)", file.display(), doc.name, hats);
                    }
                    Err(e) => {
                        failed = true;
                        println!("FAIL {}: {}", file.display(), e);
                    }
                }
            }
            if failed {
                std::process::exit(i32::from(&ConfineError::Parse(String::new())));
            }
            Ok(())
        }
        Commands::Show { profile, files } => {
            let store = load_store(&files).map_err(exit_with)?;
            let found = find_or_exit(&store, &profile);
            let mut hats: Vec<&String> = found.hats.keys().collect();
            hats.sort();
            let summary = serde_json::json!({
                "name": found.name,
                "namespace": found.ns_name,
                "mode": found.mode,
                "audit": found.audit_all,
                "stale": found.is_stale(),
                "task_limit": found.task_limit,
                "bound_tasks": found.bound_tasks(),
                "transitions": found.transitions,
                "hats": hats,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Check {
            profile,
            path,
            access,
            files,
        } => {
            let store = load_store(&files).map_err(exit_with)?;
            let found = find_or_exit(&store, &profile);
            let requested: Perms = match access.parse() {
                Ok(perms) => perms,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(2);
                }
            };
            let decision = check_file(&found, std::process::id(), "check", &path, requested);
            print_decision(&decision);
            if !decision.is_allow() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::CheckExec {
            profile,
            path,
            files,
        } => {
            let store = load_store(&files).map_err(exit_with)?;
            let found = find_or_exit(&store, &profile);
            // Synthetic context; nothing is bound during a dry run.
            let ctx = TaskContext::new(std::process::id(), found);
            match resolve_exec(&store, Some(&ctx), std::process::id(), &path) {
                ExecOutcome::Keep => println!("keep: {}", ctx.describe()),
                ExecOutcome::Unconfined => println!("unconfined"),
                ExecOutcome::Transition(target) => {
                    println!("transition: :{}:{}", target.ns_name, target.name)
                }
                ExecOutcome::Denied { errno, info } => {
                    println!("denied (errno {}): {}", errno, info);
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Commands::Status { files } => {
            let store = PolicyStore::new();
            let mut loaded = Vec::new();
            for file in &files {
                let bytes = std::fs::read(file)?;
                let doc = ProfileDoc::parse(&bytes).map_err(exit_with)?;
                let profile = doc.build();
                let mut hats: Vec<&String> = profile.hats.keys().collect();
                hats.sort();
                loaded.push(serde_json::json!({
                    "name": profile.name,
                    "namespace": profile.ns_name,
                    "mode": profile.mode,
                    "hats": hats,
                }));
                store.add(profile).map_err(exit_with)?;
            }
            let json_result = serde_json::json!({
                "status": "OK",
                "profiles": loaded,
                "count": loaded.len(),
            });
            println!("{}", serde_json::to_string_pretty(&json_result)?);
            Ok(())
        }
    }
}

fn print_decision(decision: &Decision) {
    match decision {
        Decision::Allow => println!("allow"),
        Decision::Deny(errno) => println!("deny (errno {})", errno),
        Decision::Kill => println!("kill"),
    }
}

fn exit_with(e: ConfineError) -> ConfineError {
    eprintln!("Error: {}", e);
    std::process::exit(i32::from(&e));
}
