//! Fleet manifest - the TOML declaration of hosts and their resources

use anyhow::{Context, Result};
use converge::{Host, ReconcileOptions, Resource, ResourceGraph, RetryConfig, Switch, Vhd, Vm};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Manifest looked up in the working directory
pub const DEFAULT_MANIFEST: &str = "hvconverge.toml";

// ============================================================================
// Schema
// ============================================================================

/// The fleet manifest
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    /// Delete undeclared resources
    #[serde(default)]
    pub prune: bool,

    #[serde(default)]
    pub settings: Settings,

    #[serde(default, rename = "host")]
    pub hosts: Vec<Host>,

    #[serde(default, rename = "switch")]
    pub switches: Vec<Switch>,

    #[serde(default, rename = "vhd")]
    pub vhds: Vec<Vhd>,

    #[serde(default, rename = "vm")]
    pub vms: Vec<Vm>,
}

/// Run settings, each overridable on the command line
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Hosts reconciled in parallel
    pub jobs: usize,
    /// Attempts per operation on transient errors
    pub retries: u32,
    /// Base backoff between attempts, doubled each time
    pub backoff_ms: u64,
    pub dry_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            jobs: 4,
            retries: retry.max_attempts,
            backoff_ms: retry.base_delay.as_millis() as u64,
            dry_run: false,
        }
    }
}

/// Command-line overrides of the manifest settings
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub prune: bool,
    pub dry_run: bool,
    pub jobs: Option<usize>,
    pub retries: Option<u32>,
}

impl Manifest {
    /// Load a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read manifest: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format")
    }

    /// Every declared resource, hosts first
    pub fn resources(&self) -> Vec<Resource> {
        let hosts = self.hosts.iter().cloned().map(Resource::from);
        let switches = self.switches.iter().cloned().map(Resource::from);
        let vhds = self.vhds.iter().cloned().map(Resource::from);
        let vms = self.vms.iter().cloned().map(Resource::from);
        hosts.chain(switches).chain(vhds).chain(vms).collect()
    }

    /// Validate the declarations and build the resource graph
    pub fn graph(&self) -> Result<ResourceGraph> {
        Ok(ResourceGraph::build(self.resources())?)
    }

    /// Engine options from the settings and command-line overrides
    pub fn options(&self, overrides: Overrides) -> ReconcileOptions {
        let settings = &self.settings;
        let retries = overrides.retries.unwrap_or(settings.retries).max(1);
        ReconcileOptions {
            prune: self.prune || overrides.prune,
            dry_run: settings.dry_run || overrides.dry_run,
            jobs: overrides.jobs.unwrap_or(settings.jobs).max(1),
            retry: RetryConfig::new(retries, Duration::from_millis(settings.backoff_ms)),
        }
    }
}

// ============================================================================
// Location
// ============================================================================

/// Resolve the manifest path: explicit path (with `~` expanded), then the
/// working directory, then the user config directory
pub fn resolve_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let expanded = shellexpand::tilde(path);
        return Ok(PathBuf::from(expanded.as_ref()));
    }

    let local = PathBuf::from(DEFAULT_MANIFEST);
    if local.exists() {
        return Ok(local);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let user = home
        .join(".config")
        .join("hvconverge")
        .join(DEFAULT_MANIFEST);
    if user.exists() {
        Ok(user)
    } else {
        anyhow::bail!(
            "No manifest found: looked for ./{DEFAULT_MANIFEST} and {}",
            user.display()
        )
    }
}
