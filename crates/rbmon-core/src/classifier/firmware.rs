//! Firmware identity tables shared by the Linux and Windows tier lists.
//!
//! Each stage has its own ordered token table. Stages are evaluated in a fixed
//! order (vendor, product, BIOS vendor, BIOS version, serial) and the first hit
//! wins, so a later stage can never override an earlier one.

use super::evidence::{Evidence, EvidenceSource};
use super::label::EnvironmentLabel;

/// Returns the label of the first table entry whose needle occurs in `value`.
pub(crate) fn first_match(value: &str, table: &[(&str, EnvironmentLabel)]) -> Option<EnvironmentLabel> {
    if value.is_empty() {
        return None;
    }
    table
        .iter()
        .find(|(needle, _)| value.contains(*needle))
        .map(|(_, label)| label.clone())
}

fn vendor_label(vendor: &str) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    // A bare "microsoft corporation" vendor is shared with Surface hardware and
    // is decided together with the product name below.
    first_match(
        vendor,
        &[
            ("qemu", Qemu),
            ("vmware", VMware),
            ("xen", Xen),
            ("parallels", Parallels),
            ("bochs", Bochs),
            ("nutanix", NutanixAhv),
            ("red hat", Rhev),
            ("citrix", CitrixXen),
            ("innotek", VirtualBox),
            ("virtualbox", VirtualBox),
            ("amazon ec2", AwsEc2),
            ("google", GcpVm),
        ],
    )
}

fn product_label(product: &str, vendor: &str) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    if product.contains("virtual machine") && vendor.contains("microsoft") {
        return Some(HyperV);
    }
    first_match(
        product,
        &[
            ("virtualbox", VirtualBox),
            ("vmware", VMware),
            ("kvm", Kvm),
            ("qemu", Qemu),
            ("hyper-v", HyperV),
            ("bochs", Bochs),
            ("proxmox", ProxmoxVe),
            ("openstack", OpenStack),
            ("ovirt", OVirt),
            ("cloudstack", CloudStack),
            ("eucalyptus", Eucalyptus),
            ("bhyve", Bhyve),
            ("acrn", Acrn),
        ],
    )
}

fn bios_vendor_label(bios: &str) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    first_match(
        bios,
        &[
            ("seabios", Kvm),
            ("vmware", VMware),
            ("virtualbox", VirtualBox),
            ("innotek", VirtualBox),
            ("bochs", Bochs),
            ("tianocore", UefiVm),
        ],
    )
}

/// BIOS version string, only populated on Windows.
fn bios_version_label(version: &str, vendor: &str) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    if vendor.contains("microsoft") && (version.contains("hyper-v") || version.contains("microsoft")) {
        return Some(HyperV);
    }
    first_match(
        version,
        &[
            ("vmware", VMware),
            ("virtualbox", VirtualBox),
            ("bochs", Bochs),
            ("seabios", Kvm),
        ],
    )
}

fn serial_label(serial: &str) -> Option<EnvironmentLabel> {
    if serial.starts_with("ec2") {
        return Some(EnvironmentLabel::AwsEc2);
    }
    first_match(
        serial,
        &[
            ("google", EnvironmentLabel::GcpVm),
            ("vmware", EnvironmentLabel::VMware),
        ],
    )
}

/// Decides on the collected firmware identity.
pub fn firmware_label(ev: &Evidence) -> Option<EnvironmentLabel> {
    let vendor = ev.token(EvidenceSource::SystemVendor);
    vendor_label(vendor)
        .or_else(|| product_label(ev.token(EvidenceSource::ProductName), vendor))
        .or_else(|| bios_vendor_label(ev.token(EvidenceSource::BiosVendor)))
        .or_else(|| bios_version_label(ev.token(EvidenceSource::BiosVersion), vendor))
        .or_else(|| serial_label(ev.token(EvidenceSource::ProductSerial)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use EvidenceSource::*;

    #[test]
    fn test_vendor_table() {
        let ev = Evidence::new().with(SystemVendor, "QEMU");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::Qemu));

        let ev = Evidence::new().with(SystemVendor, "VMware, Inc.");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::VMware));

        let ev = Evidence::new().with(SystemVendor, "Dell Inc.");
        assert_eq!(firmware_label(&ev), None);
    }

    #[test]
    fn test_vendor_stage_beats_product_stage() {
        let ev = Evidence::new()
            .with(SystemVendor, "Xen")
            .with(ProductName, "VirtualBox");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::Xen));
    }

    #[test]
    fn test_product_stage_beats_bios_and_serial() {
        let ev = Evidence::new()
            .with(SystemVendor, "Supermicro")
            .with(ProductName, "KVM")
            .with(BiosVendor, "VMware, Inc.")
            .with(ProductSerial, "ec2abcdef");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::Kvm));
    }

    #[test]
    fn test_microsoft_vendor_needs_virtual_machine_product() {
        let surface = Evidence::new()
            .with(SystemVendor, "Microsoft Corporation")
            .with(ProductName, "Surface Laptop 5");
        assert_eq!(firmware_label(&surface), None);

        let guest = Evidence::new()
            .with(SystemVendor, "Microsoft Corporation")
            .with(ProductName, "Virtual Machine");
        assert_eq!(firmware_label(&guest), Some(EnvironmentLabel::HyperV));
    }

    #[test]
    fn test_bios_vendor_stage() {
        let ev = Evidence::new().with(BiosVendor, "SeaBIOS");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::Kvm));

        let ev = Evidence::new().with(BiosVendor, "EFI Development Kit II / OVMF TianoCore");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::UefiVm));
    }

    #[test]
    fn test_bios_version_hyperv_requires_microsoft_vendor() {
        let ev = Evidence::new()
            .with(SystemVendor, "Microsoft Corporation")
            .with(BiosVersion, "VRTUAL - 1 Hyper-V UEFI Release v4.1");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::HyperV));

        let ev = Evidence::new()
            .with(SystemVendor, "LENOVO")
            .with(BiosVersion, "Microsoft-signed firmware 1.2");
        assert_eq!(firmware_label(&ev), None);
    }

    #[test]
    fn test_serial_stage() {
        let ev = Evidence::new().with(ProductSerial, "ec2e1916-9099-7caf-fd21-012345abcdef");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::AwsEc2));

        let ev = Evidence::new().with(ProductSerial, "GoogleCloud-1234");
        assert_eq!(firmware_label(&ev), Some(EnvironmentLabel::GcpVm));

        // Prefix only: "ec2" in the middle is not an EC2 serial.
        let ev = Evidence::new().with(ProductSerial, "abc-ec2-1");
        assert_eq!(firmware_label(&ev), None);
    }

    #[test]
    fn test_empty_evidence() {
        assert_eq!(firmware_label(&Evidence::new()), None);
    }
}
