//! CLI argument definitions using clap derive

use crate::plan::PLAN_FILE;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stratum - content-addressed snapshot builds
///
/// Applies commands, file copies and container setups to VM snapshots,
/// reusing any snapshot that already holds the result.
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the digest chained from a parent digest and an effect identity
    Fingerprint(FingerprintArgs),

    /// Run a shell command on top of a snapshot
    Run(RunArgs),

    /// Copy a local file or directory into a snapshot
    Copy(CopyArgs),

    /// Apply every step of a build plan
    Build(BuildArgs),

    /// Inspect and manage snapshots
    Snapshot(SnapshotArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// Parent digest (or snapshot id when the parent has no digest)
    pub parent: String,

    /// Effect identity string
    pub identity: String,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Snapshot to build on
    #[arg(short, long)]
    pub snapshot: String,

    /// Start the command detached and return immediately
    #[arg(long)]
    pub background: bool,

    /// Run without a pseudo-terminal
    #[arg(long)]
    pub no_pty: bool,

    /// Shell command run via `sh -c`: one argument is used as written,
    /// several are quoted word by word
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct CopyArgs {
    /// Snapshot to build on
    #[arg(short, long)]
    pub snapshot: String,

    /// Local source path
    pub src: PathBuf,

    /// Destination path inside the instance
    pub dest: String,

    /// Remove destination files missing from the source
    #[arg(long)]
    pub delete: bool,

    /// Exclude pattern (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Build plan file
    #[arg(default_value = PLAN_FILE)]
    pub plan: PathBuf,

    /// Print step digests without touching the backend where possible
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub action: SnapshotAction,
}

/// Snapshot subcommands
#[derive(Subcommand, Debug)]
pub enum SnapshotAction {
    /// List snapshots
    List {
        /// Only snapshots carrying this digest
        #[arg(long)]
        digest: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one snapshot as JSON
    Show {
        /// Snapshot ID
        id: String,
    },

    /// Create a snapshot from a base image
    Create {
        /// Base image
        #[arg(long)]
        image: String,

        #[arg(long)]
        vcpus: Option<u32>,

        #[arg(long)]
        memory_mb: Option<u32>,

        #[arg(long)]
        disk_size_mb: Option<u32>,

        /// Digest to record on the snapshot
        #[arg(long)]
        digest: Option<String>,

        /// Metadata entry (KEY=VALUE, repeatable)
        #[arg(short, long, value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },

    /// Delete a snapshot
    Delete {
        /// Snapshot ID
        id: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Update a snapshot's metadata
    SetMetadata {
        /// Snapshot ID
        id: String,

        /// Entries to write (KEY=VALUE)
        #[arg(required = true, value_parser = parse_key_value)]
        entries: Vec<(String, String)>,

        /// Discard existing entries instead of merging
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Snapshot IDs, one per line
    Plain,
}

/// Parse a `KEY=VALUE` pair; the value may itself contain `=`
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("empty key in '{s}'")),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("invalid KEY=VALUE format: no '=' found in '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_value_variants() {
        assert_eq!(
            parse_key_value("stage=base=1").unwrap(),
            ("stage".to_string(), "base=1".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_value("missing").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn cli_parses_run() {
        let cli = Cli::parse_from([
            "stratum", "run", "--snapshot", "snap_1", "--no-pty", "--", "apt-get", "update",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.snapshot, "snap_1");
                assert!(args.no_pty);
                assert!(!args.background);
                assert_eq!(args.command, vec!["apt-get", "update"]);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_build_default_plan() {
        let cli = Cli::parse_from(["stratum", "build", "--dry-run"]);
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.plan, PathBuf::from("stratum.toml"));
                assert!(args.dry_run);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn cli_parses_set_metadata() {
        let cli = Cli::parse_from([
            "stratum",
            "snapshot",
            "set-metadata",
            "snap_1",
            "owner=ci",
            "--replace",
        ]);
        match cli.command {
            Commands::Snapshot(SnapshotArgs {
                action:
                    SnapshotAction::SetMetadata {
                        id,
                        entries,
                        replace,
                    },
            }) => {
                assert_eq!(id, "snap_1");
                assert_eq!(entries, vec![("owner".to_string(), "ci".to_string())]);
                assert!(replace);
            }
            _ => panic!("expected SetMetadata command"),
        }
    }

    #[test]
    fn cli_parses_verbose_and_config() {
        let cli = Cli::parse_from(["stratum", "-vv", "-c", "/tmp/s.toml", "config", "path"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.toml")));
    }
}
