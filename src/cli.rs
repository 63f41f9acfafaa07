//! Command-line surface (§4.9/§6), shared between `main` and integration tests.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Turn declarative blueprints into Debian binary packages.
#[derive(Debug, Parser)]
#[command(name = "ops2deb", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long, global = true, default_value = "ops2deb.yml")]
    pub config: PathBuf,

    /// Enable verbose (debug-level) logging, equivalent to `OPS2DEB_VERBOSE=1`.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// One `--format` choice for `delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeltaFormat {
    /// Human-readable `+`/`-`/`~` lines.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Every subcommand ops2deb exposes.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate Debian source trees without building them.
    Generate {
        /// Directory generated source trees are written under.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build `.deb` files from previously generated source trees.
    Build {
        /// Directory generated source trees are read from / `.deb`s written to.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Maximum number of concurrent builds.
        #[arg(long)]
        workers: Option<usize>,
        /// Build via `dpkg-buildpackage` instead of the in-process assembler.
        #[arg(long)]
        external_builder: bool,
    },
    /// Generate then build every package (the default when no subcommand is given).
    Default {
        /// Directory generated source trees and `.deb` files are written under.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Maximum number of concurrent builds.
        #[arg(long)]
        workers: Option<usize>,
        /// Build via `dpkg-buildpackage` instead of the in-process assembler.
        #[arg(long)]
        external_builder: bool,
    },
    /// Check blueprints for newer upstream versions and rewrite the config.
    Update {
        /// Restrict the check to these blueprint names.
        #[arg(long = "only")]
        only: Vec<String>,
        /// Report what would change without writing anything.
        #[arg(long)]
        dry_run: bool,
        /// Don't regenerate/rebuild after updating.
        #[arg(long)]
        skip_build: bool,
        /// Directory generated source trees and `.deb` files are written under
        /// (only used when `--skip-build` is absent).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch and record the digest of every URL the configuration references.
    Lock,
    /// Remove the content-addressed fetch/extract cache.
    Purge,
    /// Rewrite a legacy `fetch.sha256` configuration into config + lockfile.
    Migrate,
    /// Validate the configuration without generating or building anything.
    Validate,
    /// Rewrite the configuration file in its canonical form.
    Format,
    /// Diff two configurations by their rendered `(name, architecture, version)` triples.
    Delta {
        /// The "before" configuration file.
        old: PathBuf,
        /// The "after" configuration file.
        new: PathBuf,
        /// Output format.
        #[arg(long, value_enum, default_value_t = DeltaFormat::Text)]
        format: DeltaFormat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path_is_ops2deb_yml() {
        let cli = Cli::parse_from(["ops2deb", "validate"]);
        assert_eq!(cli.config, PathBuf::from("ops2deb.yml"));
        assert!(matches!(cli.command, Command::Validate));
    }

    #[test]
    fn build_accepts_external_builder_flag() {
        let cli = Cli::parse_from(["ops2deb", "build", "--external-builder"]);
        match cli.command {
            Command::Build { external_builder, .. } => assert!(external_builder),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn update_collects_repeated_only_flags() {
        let cli = Cli::parse_from(["ops2deb", "update", "--only", "a", "--only", "b"]);
        match cli.command {
            Command::Update { only, .. } => assert_eq!(only, vec!["a".to_string(), "b".to_string()]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn delta_format_defaults_to_text() {
        let cli = Cli::parse_from(["ops2deb", "delta", "old.yml", "new.yml"]);
        match cli.command {
            Command::Delta { format, .. } => assert_eq!(format, DeltaFormat::Text),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
