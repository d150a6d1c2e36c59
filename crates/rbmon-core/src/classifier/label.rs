//! Environment label vocabulary.

use serde::{Serialize, Serializer};
use std::fmt;

/// The single tag the classifier assigns to the host.
///
/// The named variants cover every platform the tier tables can produce.
/// `Other` carries virtualization names reported by `systemd-detect-virt` that
/// have no dedicated variant, upper-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum EnvironmentLabel {
    /// Bare metal. Reported as `DS` (dedicated server).
    #[default]
    Physical,

    // Hypervisors
    Kvm,
    Qemu,
    VMware,
    VMwareFusion,
    HyperV,
    Xen,
    CitrixXen,
    VirtualBox,
    Parallels,
    Bochs,
    NutanixAhv,
    Rhev,
    ProxmoxVe,
    OpenStack,
    OVirt,
    CloudStack,
    Eucalyptus,
    Bhyve,
    Acrn,
    Qnx,
    PowerVm,
    Uml,
    Zvm,
    UefiVm,
    MacOsVm,

    // Containers
    Docker,
    Podman,
    Lxc,
    Kubernetes,
    Containerd,
    OpenVz,
    SystemdNspawn,
    Rkt,
    Chroot,
    Wsl,
    Container,

    // Cloud providers
    AwsEc2,
    AzureVm,
    GcpVm,
    AlibabaEcs,
    TencentCvm,
    HuaweiEcs,
    OracleCloud,
    DigitalOcean,
    Linode,
    Vultr,

    Other(String),
}

impl EnvironmentLabel {
    /// Wire name sent in reports.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Physical => "DS",
            Self::Kvm => "KVM",
            Self::Qemu => "QEMU",
            Self::VMware => "VMware",
            Self::VMwareFusion => "VMware Fusion",
            Self::HyperV => "Hyper-V",
            Self::Xen => "Xen",
            Self::CitrixXen => "Citrix Xen",
            Self::VirtualBox => "VirtualBox",
            Self::Parallels => "Parallels",
            Self::Bochs => "Bochs",
            Self::NutanixAhv => "Nutanix AHV",
            Self::Rhev => "RHEV",
            Self::ProxmoxVe => "Proxmox VE",
            Self::OpenStack => "OpenStack",
            Self::OVirt => "oVirt",
            Self::CloudStack => "CloudStack",
            Self::Eucalyptus => "Eucalyptus",
            Self::Bhyve => "bhyve",
            Self::Acrn => "ACRN",
            Self::Qnx => "QNX",
            Self::PowerVm => "PowerVM",
            Self::Uml => "UML",
            Self::Zvm => "z/VM",
            Self::UefiVm => "UEFI VM",
            Self::MacOsVm => "macOS VM",
            Self::Docker => "Docker",
            Self::Podman => "Podman",
            Self::Lxc => "LXC",
            Self::Kubernetes => "Kubernetes",
            Self::Containerd => "Containerd",
            Self::OpenVz => "OpenVZ",
            Self::SystemdNspawn => "Systemd-nspawn",
            Self::Rkt => "rkt",
            Self::Chroot => "Chroot",
            Self::Wsl => "WSL",
            Self::Container => "Container",
            Self::AwsEc2 => "AWS EC2",
            Self::AzureVm => "Azure VM",
            Self::GcpVm => "GCP VM",
            Self::AlibabaEcs => "Alibaba Cloud ECS",
            Self::TencentCvm => "Tencent Cloud CVM",
            Self::HuaweiEcs => "Huawei Cloud ECS",
            Self::OracleCloud => "Oracle Cloud",
            Self::DigitalOcean => "DigitalOcean",
            Self::Linode => "Linode",
            Self::Vultr => "Vultr",
            Self::Other(name) => name,
        }
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Self::Physical)
    }
}

impl fmt::Display for EnvironmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EnvironmentLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
