//! Linux tier list.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::evidence::{Evidence, EvidenceSource};
use super::firmware::{firmware_label, first_match};
use super::label::EnvironmentLabel;
use super::{HostView, Tier, cloud_tier};

const VIRT_TOOL_TIMEOUT: Duration = Duration::from_secs(5);

const DMI_DIR: &str = "/sys/class/dmi/id";
const NET_DIR: &str = "/sys/class/net";

/// Tiers in cascade order.
pub fn tiers() -> Vec<Tier> {
    vec![
        Tier::new("systemd-detect-virt", virt_tool_tier),
        Tier::new("container markers", container_tier),
        Tier::new("firmware", firmware_tier),
        Tier::new("cpuinfo", cpuinfo_tier),
        Tier::new("interfaces", interface_tier),
        Tier::new("cloud metadata", cloud_tier),
    ]
}

/// Maps `systemd-detect-virt` output to a label.
///
/// `none` is authoritative: it yields `Physical`, which stops the cascade.
pub fn map_virt_output(token: &str) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    let label = match token {
        "" => return None,
        "none" => Physical,
        "kvm" => Kvm,
        "qemu" => Qemu,
        "vmware" => VMware,
        "microsoft" => HyperV,
        "xen" => Xen,
        "oracle" => VirtualBox,
        "parallels" => Parallels,
        "bochs" => Bochs,
        "uml" => Uml,
        "zvm" => Zvm,
        "qnx" => Qnx,
        "acrn" => Acrn,
        "powervm" => PowerVm,
        "bhyve" => Bhyve,
        "amazon" => AwsEc2,
        "lxc" | "lxc-libvirt" => Lxc,
        "docker" => Docker,
        "podman" => Podman,
        "openvz" => OpenVz,
        "chroot" => Chroot,
        "systemd-nspawn" => SystemdNspawn,
        "rkt" => Rkt,
        "wsl" => Wsl,
        "container-other" => Container,
        other => Other(other.to_uppercase()),
    };
    Some(label)
}

fn virt_tool_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    let output = match host
        .commands
        .run("systemd-detect-virt", &[], VIRT_TOOL_TIMEOUT)
    {
        Ok(output) => output,
        Err(e) => {
            debug!("systemd-detect-virt unavailable: {}", e);
            return None;
        }
    };

    let ev = Evidence::new().with(EvidenceSource::VirtTool, &output.stdout);
    ev.log("systemd-detect-virt");
    let token = ev.token(EvidenceSource::VirtTool);

    // The tool exits 1 when it detects nothing but still prints "none".
    if token == "none" {
        return Some(EnvironmentLabel::Physical);
    }
    if !output.success {
        return None;
    }
    map_virt_output(token)
}

/// Container runtime named by one line of `/proc/1/cgroup`.
///
/// Only runtime-specific path segments count; a bare "docker" keyword is not a
/// marker because physical hosts running containers show it too.
pub fn cgroup_line_label(line: &str) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    let line = line.trim();
    if line.contains(":/docker/") || line.ends_with("/docker") {
        Some(Docker)
    } else if line.contains(":/lxc/") || line.ends_with("/lxc") {
        Some(Lxc)
    } else if line.contains("/kubepods/") || line.contains("k8s_") {
        Some(Kubernetes)
    } else if line.contains("/libpod-") {
        Some(Podman)
    } else if line.contains("/containerd/") || line.contains("containerd-") {
        Some(Containerd)
    } else {
        None
    }
}

const CONTAINER_ENV_VARS: [&str; 3] = ["CONTAINER", "container", "DOCKER_CONTAINER"];
const CONTAINER_MARKERS: [&str; 2] = ["/.dockerenv", "/run/.containerenv"];

/// Decides on collected container evidence: marker file, then cgroup path,
/// then environment variable.
pub fn container_label(ev: &Evidence) -> Option<EnvironmentLabel> {
    match ev.token(EvidenceSource::MarkerFile) {
        "/.dockerenv" => return Some(EnvironmentLabel::Docker),
        "/run/.containerenv" => return Some(EnvironmentLabel::Podman),
        _ => {}
    }
    if let Some(label) = ev
        .token(EvidenceSource::Cgroup)
        .lines()
        .find_map(cgroup_line_label)
    {
        return Some(label);
    }
    ev.get(EvidenceSource::EnvVar)
        .map(|_| EnvironmentLabel::Container)
}

fn container_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    let mut ev = Evidence::new();
    if let Some(marker) = CONTAINER_MARKERS
        .iter()
        .find(|m| host.fs.exists(Path::new(m)))
    {
        ev.insert(EvidenceSource::MarkerFile, marker);
    }
    ev.read_file(host.fs, EvidenceSource::Cgroup, "/proc/1/cgroup");
    if let Some(var) = CONTAINER_ENV_VARS.iter().find(|v| host.env.contains(v)) {
        ev.insert(EvidenceSource::EnvVar, var);
    }

    if ev.is_empty() {
        return None;
    }
    ev.log("container markers");
    container_label(&ev)
}

/// Reads the four DMI identity strings.
pub fn read_dmi(host: &HostView<'_>) -> Evidence {
    let mut ev = Evidence::new();
    for (source, file) in [
        (EvidenceSource::SystemVendor, "sys_vendor"),
        (EvidenceSource::ProductName, "product_name"),
        (EvidenceSource::BiosVendor, "bios_vendor"),
        (EvidenceSource::ProductSerial, "product_serial"),
    ] {
        ev.read_file(host.fs, source, &format!("{}/{}", DMI_DIR, file));
    }
    ev
}

fn firmware_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    let ev = read_dmi(host);
    ev.log("firmware");
    firmware_label(&ev)
}

fn cpuinfo_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    let mut ev = Evidence::new();
    ev.read_file(host.fs, EvidenceSource::CpuInfo, "/proc/cpuinfo");
    first_match(
        ev.token(EvidenceSource::CpuInfo),
        &[
            ("qemu", Qemu),
            ("kvm", Kvm),
            ("vmware", VMware),
            ("virtualbox", VirtualBox),
            ("xen", Xen),
            ("bochs", Bochs),
            ("bhyve", Bhyve),
        ],
    )
}

/// Interface prefixes owned by exactly one virtualization manager.
///
/// Tunnel and container interfaces (`veth*`, `docker*`, `br-*`, `tun*`) also
/// exist on physical hosts and are never listed here.
pub fn interface_label(name: &str) -> Option<EnvironmentLabel> {
    if name.starts_with("vmbr") {
        Some(EnvironmentLabel::ProxmoxVe)
    } else {
        None
    }
}

fn interface_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    let entries = match host.fs.read_dir(Path::new(NET_DIR)) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("tier interfaces: {} unavailable ({})", NET_DIR, e);
            return None;
        }
    };
    let mut names: Vec<String> = entries
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    names.sort();

    let ev = Evidence::new().with(EvidenceSource::Interfaces, &names.join(","));
    ev.log("interfaces");
    names.iter().find_map(|n| interface_label(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_virt_output() {
        assert_eq!(map_virt_output("none"), Some(EnvironmentLabel::Physical));
        assert_eq!(map_virt_output("microsoft"), Some(EnvironmentLabel::HyperV));
        assert_eq!(map_virt_output("oracle"), Some(EnvironmentLabel::VirtualBox));
        assert_eq!(map_virt_output("amazon"), Some(EnvironmentLabel::AwsEc2));
        assert_eq!(
            map_virt_output("apple"),
            Some(EnvironmentLabel::Other("APPLE".into()))
        );
        assert_eq!(map_virt_output(""), None);
    }

    #[test]
    fn test_cgroup_runtime_segments() {
        assert_eq!(
            cgroup_line_label("12:pids:/docker/3f2a9c"),
            Some(EnvironmentLabel::Docker)
        );
        assert_eq!(cgroup_line_label("0::/lxc/web01"), Some(EnvironmentLabel::Lxc));
        assert_eq!(
            cgroup_line_label("0::/kubepods/besteffort/pod1234/abcd"),
            Some(EnvironmentLabel::Kubernetes)
        );
        assert_eq!(
            cgroup_line_label("0::/machine.slice/libpod-9f1e.scope"),
            Some(EnvironmentLabel::Podman)
        );
        assert_eq!(
            cgroup_line_label("0::/system.slice/containerd-shim-1.scope"),
            Some(EnvironmentLabel::Containerd)
        );
    }

    #[test]
    fn test_cgroup_generic_keywords_are_not_markers() {
        // A physical host running dockerd.
        assert_eq!(cgroup_line_label("0::/system.slice/docker.service"), None);
        assert_eq!(cgroup_line_label("0::/init.scope"), None);
        assert_eq!(cgroup_line_label("1:name=systemd:/"), None);
    }

    #[test]
    fn test_container_evidence_order() {
        use EvidenceSource::*;
        let marker_and_cgroup = Evidence::new()
            .with(MarkerFile, "/run/.containerenv")
            .with(Cgroup, "0::/docker/3f2a9c");
        assert_eq!(container_label(&marker_and_cgroup), Some(EnvironmentLabel::Podman));

        let cgroup_and_env = Evidence::new()
            .with(Cgroup, "1:name=systemd:/\n0::/kubepods/pod1/abc")
            .with(EnvVar, "container");
        assert_eq!(container_label(&cgroup_and_env), Some(EnvironmentLabel::Kubernetes));

        let host_cgroup = Evidence::new().with(Cgroup, "0::/init.scope");
        assert_eq!(container_label(&host_cgroup), None);
        let env_only = host_cgroup.with(EnvVar, "DOCKER_CONTAINER");
        assert_eq!(container_label(&env_only), Some(EnvironmentLabel::Container));
    }

    #[test]
    fn test_interface_exclusions() {
        assert_eq!(interface_label("vmbr0"), Some(EnvironmentLabel::ProxmoxVe));
        for name in ["veth12ab", "docker0", "br-5c1d", "tun0", "eth0", "lo"] {
            assert_eq!(interface_label(name), None, "{} must not match", name);
        }
    }
}
