//! Windows tier list.
//!
//! Identity comes from the BIOS registry key; `systeminfo` only fills values the
//! registry did not provide. Hyper-V driver files and vmbus service keys ship
//! with every Windows install and are not used as markers.

use std::time::Duration;

use tracing::debug;

use super::evidence::{Evidence, EvidenceSource};
use super::firmware::{firmware_label, first_match};
use super::label::EnvironmentLabel;
use super::{HostView, Tier, cloud_tier};

const REG_TIMEOUT: Duration = Duration::from_secs(5);
const SYSTEMINFO_TIMEOUT: Duration = Duration::from_secs(10);
const SC_TIMEOUT: Duration = Duration::from_secs(5);

const BIOS_KEY: &str = r"HKLM\HARDWARE\DESCRIPTION\System\BIOS";
const HYPERV_GUEST_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Virtual Machine\Guest\Parameters";

pub fn tiers() -> Vec<Tier> {
    vec![
        Tier::new("firmware", firmware_tier),
        Tier::new("drivers", driver_tier),
        Tier::new("hyper-v guest key", hyperv_guest_tier),
        Tier::new("cloud metadata", cloud_tier),
    ]
}

/// Parses `reg query` output into `(name, value)` pairs.
///
/// Value lines look like `    BIOSVendor    REG_SZ    American Megatrends Inc.`.
pub fn parse_reg_values(output: &str) -> Vec<(String, String)> {
    let mut values = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((name, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let rest = rest.trim_start();
        let (kind, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if !kind.starts_with("REG_") {
            continue;
        }
        values.push((name.to_string(), value.trim().to_string()));
    }
    values
}

/// Extracts the identity lines of `systeminfo` output.
///
/// Only the manufacturer, model and BIOS lines are kept: the full output names
/// "Hyper-V Requirements" on physical hosts too.
pub fn parse_systeminfo(output: &str) -> Evidence {
    let mut ev = Evidence::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let source = match key.trim() {
            "System Manufacturer" => EvidenceSource::SystemVendor,
            "System Model" => EvidenceSource::ProductName,
            "BIOS Version" => EvidenceSource::BiosVersion,
            _ => continue,
        };
        ev.insert(source, value);
    }
    ev
}

fn read_identity(host: &HostView<'_>) -> Evidence {
    let mut ev = Evidence::new();
    match host.commands.run("reg", &["query", BIOS_KEY], REG_TIMEOUT) {
        Ok(out) if out.success => {
            for (name, value) in parse_reg_values(&out.stdout) {
                let source = match name.as_str() {
                    "SystemManufacturer" => EvidenceSource::SystemVendor,
                    "SystemProductName" => EvidenceSource::ProductName,
                    "BIOSVendor" => EvidenceSource::BiosVendor,
                    "BIOSVersion" => EvidenceSource::BiosVersion,
                    _ => continue,
                };
                ev.insert(source, &value);
            }
        }
        Ok(_) => debug!("reg query {} failed", BIOS_KEY),
        Err(e) => debug!("reg unavailable: {}", e),
    }

    if ev.get(EvidenceSource::SystemVendor).is_some() && ev.get(EvidenceSource::ProductName).is_some() {
        return ev;
    }

    match host.commands.run("systeminfo", &[], SYSTEMINFO_TIMEOUT) {
        Ok(out) if out.success => {
            let info = parse_systeminfo(&out.stdout);
            for source in [
                EvidenceSource::SystemVendor,
                EvidenceSource::ProductName,
                EvidenceSource::BiosVersion,
            ] {
                if ev.get(source).is_none() {
                    if let Some(value) = info.get(source) {
                        ev.insert(source, value);
                    }
                }
            }
        }
        Ok(_) => debug!("systeminfo failed"),
        Err(e) => debug!("systeminfo unavailable: {}", e),
    }
    ev
}

fn firmware_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    let ev = read_identity(host);
    ev.log("firmware");
    firmware_label(&ev)
}

/// Maps the loaded driver list to a hypervisor.
///
/// The Hyper-V names are guest integration drivers; `vmbus` and `hvboot` also
/// run on Hyper-V hosts and are left out.
pub fn driver_label(drivers: &str) -> Option<EnvironmentLabel> {
    use EnvironmentLabel::*;
    first_match(
        drivers,
        &[
            ("vmware", VMware),
            ("vbox", VirtualBox),
            ("virtualbox", VirtualBox),
            ("storvsc", HyperV),
            ("netvsc", HyperV),
            ("vmickvpexchange", HyperV),
            ("vmicguestinterface", HyperV),
            ("hypervideo", HyperV),
        ],
    )
}

fn driver_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    match host.commands.run("sc", &["query", "type=", "driver"], SC_TIMEOUT) {
        Ok(out) if out.success => {
            let ev = Evidence::new().with(EvidenceSource::Drivers, &out.stdout);
            driver_label(ev.token(EvidenceSource::Drivers))
        }
        Ok(_) => {
            debug!("sc query failed");
            None
        }
        Err(e) => {
            debug!("sc unavailable: {}", e);
            None
        }
    }
}

fn hyperv_guest_tier(host: &HostView<'_>) -> Option<EnvironmentLabel> {
    match host.commands.run("reg", &["query", HYPERV_GUEST_KEY], REG_TIMEOUT) {
        Ok(out) if out.success => {
            let ev = Evidence::new().with(EvidenceSource::Registry, HYPERV_GUEST_KEY);
            ev.log("hyper-v guest key");
            Some(EnvironmentLabel::HyperV)
        }
        _ => None,
    }
}
