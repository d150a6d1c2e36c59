//! Canned hosts for classifier tests.

use super::{MockCommands, MockFs, MockMetadata};
use crate::collector::traits::CommandOutput;

/// QEMU guest without `systemd-detect-virt`.
pub fn qemu_guest() -> (MockFs, MockCommands) {
    let mut fs = MockFs::new();
    fs.add_dmi("QEMU", "Standard PC (i440FX + PIIX, 1996)", "SeaBIOS", "");
    fs.add_file("/proc/1/cgroup", "0::/init.scope\n");
    fs.add_file(
        "/proc/cpuinfo",
        "processor\t: 0\nmodel name\t: Intel Xeon Processor (Cascadelake)\nflags\t\t: fpu vme hypervisor\n",
    );
    fs.add_interfaces(&["lo", "eth0"]);
    (fs, MockCommands::new())
}

/// Docker container: sentinel file, no firmware identity.
pub fn docker_container() -> (MockFs, MockCommands) {
    let mut fs = MockFs::new();
    fs.add_file("/.dockerenv", "");
    fs.add_file("/proc/1/cgroup", "0::/\n");
    fs.add_interfaces(&["lo", "eth0"]);
    (fs, MockCommands::new())
}

/// Physical server whose DMI strings mention VMware (leftover OEM image),
/// with `systemd-detect-virt` reporting `none`.
pub fn bare_metal_with_vmware_firmware() -> (MockFs, MockCommands) {
    let mut fs = MockFs::new();
    fs.add_dmi("VMware, Inc.", "VMware Virtual Platform", "VMware, Inc.", "VMware-56 4d 1a");
    fs.add_file("/proc/1/cgroup", "0::/system.slice/docker.service\n");
    fs.add_interfaces(&["lo", "eno1", "docker0"]);

    let mut commands = MockCommands::new();
    commands.add("systemd-detect-virt", CommandOutput::failed("none\n"));
    (fs, commands)
}

/// Dell desktop: registry identity and drivers without virtualization.
pub fn windows_workstation() -> (MockCommands, MockMetadata) {
    let mut commands = MockCommands::new();
    commands.add(
        r"reg query HKLM\HARDWARE\DESCRIPTION\System\BIOS",
        CommandOutput::ok(
            "\r\nHKEY_LOCAL_MACHINE\\HARDWARE\\DESCRIPTION\\System\\BIOS\r\n    \
             BIOSVendor    REG_SZ    Dell Inc.\r\n    \
             BIOSVersion    REG_SZ    1.14.0\r\n    \
             SystemManufacturer    REG_SZ    Dell Inc.\r\n    \
             SystemProductName    REG_SZ    OptiPlex 7090\r\n",
        ),
    );
    commands.add(
        "sc query type= driver",
        CommandOutput::ok(
            "SERVICE_NAME: ACPI\r\nDISPLAY_NAME: Microsoft ACPI Driver\r\n\
             SERVICE_NAME: vmbus\r\nDISPLAY_NAME: Virtual Machine Bus\r\n\
             SERVICE_NAME: e1dexpress\r\nDISPLAY_NAME: Intel(R) Ethernet Connection\r\n",
        ),
    );
    (commands, MockMetadata::new())
}
