#![warn(missing_docs)]
//! Library for turning declarative blueprints into Debian binary packages.

/// Archive format detection and extraction (tar/zip/ar combinations).
pub mod archive;
/// Content-addressed download/extraction cache with per-URL single-flight.
pub mod cache;
/// Command-line argument definitions shared between `main` and tests.
pub mod cli;
/// Blueprint model, YAML loader, matrix expansion and validation.
pub mod config;
/// Parallel `.deb` builder with bounded concurrency and per-package isolation.
pub mod builder;
/// Debian source-tree artefacts: `control`, `changelog`, `rules`, `install`, `copyright`.
pub mod debian;
/// In-process `.deb` assembly (the default build path).
pub mod deb;
/// Structured diff between two rendered configurations.
pub mod delta;
/// Process-wide configuration read from the environment.
pub mod env;
/// URL fetching with retry/backoff, hash verification and archive extraction.
pub mod fetcher;
/// Persistent URL to sha256 mapping, decoupled from the blueprint configuration.
pub mod lockfile;
/// Sequences the components into the user-visible subcommands.
pub mod orchestrator;
/// Command execution abstraction used to run build scripts and the external builder.
pub mod session;
/// Generates a Debian source tree (`debian/` + `src/`) for one rendered blueprint.
pub mod sourcetree;
/// Small internal Jinja-subset template renderer.
pub mod template;
/// Version-bump engine: strategy-driven discovery of newer upstreams.
pub mod updater;
