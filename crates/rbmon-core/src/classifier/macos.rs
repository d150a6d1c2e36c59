//! macOS tier list.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::evidence::{Evidence, EvidenceSource};
use super::label::EnvironmentLabel;
use super::{HostView, Tier, cloud_tier};

const SYSCTL_TIMEOUT: Duration = Duration::from_secs(3);

pub fn tiers() -> Vec<Tier> {
    vec![
        Tier::new("cpu features", cpu_feature_tier),
        Tier::new("host apps", host_app_tier),
        Tier::new("cloud metadata", cloud_tier),
    ]
}

fn sysctl(host: &HostView<'_>, name: &str) -> Option<String> {
    match host.commands.run("sysctl", &["-n", name], SYSCTL_TIMEOUT) {
        Ok(out) if out.success => Some(out.stdout),
        Ok(_) => {
            debug!("sysctl {} failed", name);
            None
        }
        Err(e) => {
            debug!("sysctl unavailable: {}", e);
            None
        }
    }
}

/// Intel hosts expose the hypervisor bit in the feature list; Apple silicon
/// only has `kern.hv_vmm_present`.
fn cpu_feature_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    let mut ev = Evidence::new();
    if let Some(features) = sysctl(host, "machdep.cpu.features") {
        ev.insert(EvidenceSource::CpuFeatures, &features);
    }
    if let Some(vmm) = sysctl(host, "kern.hv_vmm_present") {
        ev.insert(EvidenceSource::VirtTool, &vmm);
    }
    ev.log("cpu features");

    let features = ev.token(EvidenceSource::CpuFeatures);
    if features.contains("hypervisor") || features.contains("vmm") {
        return Some(EnvironmentLabel::MacOsVm);
    }
    if ev.token(EvidenceSource::VirtTool) == "1" {
        return Some(EnvironmentLabel::MacOsVm);
    }
    None
}

fn host_app_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    for (path, label) in [
        ("/Applications/Parallels Desktop.app", EnvironmentLabel::Parallels),
        ("/Applications/VMware Fusion.app", EnvironmentLabel::VMwareFusion),
    ] {
        if host.fs.exists(Path::new(path)) {
            debug!("tier host apps: {} present", path);
            return Some(label);
        }
    }
    None
}
