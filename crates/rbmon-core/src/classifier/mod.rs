//! Environment classification.
//!
//! The host is labelled by an ordered list of tiers. Each tier looks at one kind
//! of evidence and either returns a label or passes. The first label returned
//! wins and later tiers never run. When every tier passes the host is physical.
//!
//! The result is computed once per [`Classifier`] and memoized.

pub mod cloud;
pub mod evidence;
pub mod firmware;
pub mod label;
pub mod linux;
pub mod macos;
pub mod platform;
pub mod windows;

use std::sync::OnceLock;

use tracing::{debug, info};

use crate::collector::traits::{CommandRunner, FileSystem, RealCommands, RealFs};
use cloud::{HttpMetadataClient, MetadataClient};
pub use evidence::{Evidence, EvidenceSource};
pub use label::EnvironmentLabel;
pub use platform::{EnvSnapshot, OsFamily, PlatformSignals};

/// Read-only access to the host for the duration of one classification.
pub struct HostView<'a> {
    pub fs: &'a dyn FileSystem,
    pub commands: &'a dyn CommandRunner,
    pub metadata: &'a dyn MetadataClient,
    pub env: &'a EnvSnapshot,
}

/// One stage of the cascade.
pub struct Tier {
    pub name: &'static str,
    pub check: fn(&HostView<'_>) -> Option<EnvironmentLabel>,
}

impl Tier {
    pub fn new(name: &'static str, check: fn(&HostView<'_>) -> Option<EnvironmentLabel>) -> Self {
        Self { name, check }
    }
}

pub(crate) fn cloud_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    cloud::detect(host.metadata)
}

/// Tier list for an OS family. Unknown hosts only get the cloud tier.
pub fn tiers_for(family: OsFamily) -> Vec<Tier> {
    match family {
        OsFamily::Linux => linux::tiers(),
        OsFamily::Windows => windows::tiers(),
        OsFamily::MacOs => macos::tiers(),
        OsFamily::Unknown => vec![Tier::new("cloud metadata", cloud_tier)],
    }
}

/// Runs `tiers` in order and returns the first label, or `Physical`.
pub fn run_cascade(tiers: &[Tier], host: &HostView<'_>) -> EnvironmentLabel {
    for tier in tiers {
        if let Some(label) = (tier.check)(host) {
            info!("Environment classified as {} (tier: {})", label, tier.name);
            return label;
        }
        debug!("tier {}: no evidence", tier.name);
    }
    info!("Environment classified as {} (no tier matched)", EnvironmentLabel::Physical);
    EnvironmentLabel::Physical
}

/// Source of the host's environment label.
pub trait Classify: Send {
    fn classify(&self) -> EnvironmentLabel;
}

/// Owned classifier over injectable host access.
pub struct Classifier<F, C, M> {
    fs: F,
    commands: C,
    metadata: M,
    env: EnvSnapshot,
    platform: Option<PlatformSignals>,
    label: OnceLock<EnvironmentLabel>,
}

impl Classifier<RealFs, RealCommands, HttpMetadataClient> {
    /// Classifier for the running host.
    pub fn system() -> Self {
        Self::new(RealFs::new(), RealCommands::new(), HttpMetadataClient::new())
    }
}

impl<F: FileSystem, C: CommandRunner, M: MetadataClient> Classifier<F, C, M> {
    pub fn new(fs: F, commands: C, metadata: M) -> Self {
        Self {
            fs,
            commands,
            metadata,
            env: EnvSnapshot::capture(),
            platform: None,
            label: OnceLock::new(),
        }
    }

    /// Replaces the captured environment variables.
    pub fn with_env(mut self, env: EnvSnapshot) -> Self {
        self.env = env;
        self
    }

    /// Overrides OS detection signals.
    pub fn with_platform(mut self, signals: PlatformSignals) -> Self {
        self.platform = Some(signals);
        self
    }

    /// Returns the label, running the cascade on first use only.
    pub fn classify(&self) -> EnvironmentLabel {
        self.label.get_or_init(|| self.detect()).clone()
    }

    fn detect(&self) -> EnvironmentLabel {
        let signals = self
            .platform
            .clone()
            .unwrap_or_else(|| PlatformSignals::capture(&self.fs, &self.env));
        let family = OsFamily::detect(&signals);
        info!("Classifying environment ({:?} host)", family);

        let host = HostView {
            fs: &self.fs,
            commands: &self.commands,
            metadata: &self.metadata,
            env: &self.env,
        };
        run_cascade(&tiers_for(family), &host)
    }
}

impl<F, C, M> Classify for Classifier<F, C, M>
where
    F: FileSystem,
    C: CommandRunner,
    M: MetadataClient,
{
    fn classify(&self) -> EnvironmentLabel {
        Classifier::classify(self)
    }
}
