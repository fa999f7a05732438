//! Command-line interface definitions.
//!
//! The mode may be given as the first positional argument; when it is absent
//! the binary prompts for it on stdin. Everything else overrides the YAML
//! configuration (see [`crate::config::HarvestConfig`]).

use crate::config::DedupScope;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// What the process should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum Mode {
    /// Harvest every active outlet once.
    Scrape,
    /// Reserved; accepted but has no action.
    Detox,
    /// Terminate the process.
    Exit,
}

impl Mode {
    /// Parse a mode typed at the prompt, ignoring case and surrounding space.
    pub fn parse_input(input: &str) -> Option<Self> {
        Self::from_str(input.trim(), true).ok()
    }
}

/// Command-line arguments for the harvester.
///
/// # Examples
///
/// ```sh
/// # Harvest outlets listed by the backoffice
/// outlet_harvest scrape --backoffice-url https://backoffice.example/api
///
/// # Offline run from a local outlet list, 8 workers per outlet
/// outlet_harvest SCRAPE --outlets-file outlets.yaml --workers 8
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Mode: SCRAPE, DETOX or EXIT (prompted for when omitted)
    #[arg(value_enum, ignore_case = true)]
    pub mode: Option<Mode>,

    /// Path to a YAML config file
    #[arg(short, long, env = "HARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for the per-run document collections
    #[arg(short, long, env = "HARVEST_STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Item workers per outlet
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Which stored collections are checked for duplicates
    #[arg(long, value_enum)]
    pub dedup_scope: Option<DedupScope>,

    /// Read outlets from a YAML file instead of the backoffice
    #[arg(long)]
    pub outlets_file: Option<PathBuf>,

    /// Backoffice API base URL
    #[arg(long, env = "BACKOFFICE_API_URL")]
    pub backoffice_url: Option<String>,

    /// Backoffice API token
    #[arg(long, env = "BACKOFFICE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,
}
