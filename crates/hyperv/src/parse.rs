//! Decoding of probe and inventory responses.
//!
//! Scripts emit PascalCase JSON built from cmdlet output; this module turns
//! it into the engine's observed types.

use crate::error::{Error, Result};
use converge::{
    BandwidthMode, BootDevice, Capacity, DiskType, HostFacts, MemoryPolicy, StartAction,
    StopAction, Switch, SwitchKind, Vhd, Vm,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostInfo {
    hyper_v_installed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwitchInfo {
    name: String,
    switch_type: String,
    #[serde(default)]
    net_adapter_name: Option<String>,
    #[serde(default, rename = "AllowManagementOS")]
    allow_management_os: Option<bool>,
    #[serde(default)]
    iov_enabled: Option<bool>,
    #[serde(default)]
    bandwidth_reservation_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VhdInfo {
    path: String,
    size: u64,
    vhd_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VmInfo {
    name: String,
    #[serde(default)]
    path: Option<String>,
    generation: u8,
    processor_count: u32,
    memory_startup: u64,
    dynamic_memory_enabled: bool,
    memory_minimum: u64,
    memory_maximum: u64,
    #[serde(default)]
    hard_drives: Vec<String>,
    #[serde(default)]
    switches: Vec<String>,
    #[serde(default)]
    dvd_path: Option<String>,
    boot_device: BootDevice,
    automatic_start_action: String,
    automatic_start_delay: u32,
    automatic_stop_action: String,
    secure_boot: bool,
    #[serde(default)]
    secure_boot_template: Option<String>,
}

fn decode<T: DeserializeOwned>(stdout: &str) -> Result<T> {
    Ok(serde_json::from_str(stdout.trim())?)
}

pub fn host_facts(stdout: &str) -> Result<HostFacts> {
    let info: HostInfo = decode(stdout)?;
    Ok(HostFacts {
        hyperv_installed: info.hyper_v_installed,
    })
}

/// Names (or paths) listed by an inventory script
pub fn names(stdout: &str) -> Result<Vec<String>> {
    decode(stdout)
}

pub fn switch(host: &str, stdout: &str) -> Result<Option<Switch>> {
    let Some(info) = decode::<Option<SwitchInfo>>(stdout)? else {
        return Ok(None);
    };

    let kind = match info.switch_type.to_ascii_lowercase().as_str() {
        "internal" => SwitchKind::Internal,
        "private" => SwitchKind::Private,
        "external" => SwitchKind::External {
            adapter: info.net_adapter_name.unwrap_or_default(),
            allow_management_os: info.allow_management_os,
            enable_iov: info.iov_enabled,
            bandwidth_mode: info
                .bandwidth_reservation_mode
                .as_deref()
                .and_then(bandwidth_mode),
        },
        other => {
            return Err(Error::UnexpectedResponse(format!(
                "switch {} has unknown type '{other}'",
                info.name
            )));
        }
    };
    Ok(Some(Switch::new(host, info.name, kind)))
}

fn bandwidth_mode(value: &str) -> Option<BandwidthMode> {
    match value.to_ascii_lowercase().as_str() {
        "default" => Some(BandwidthMode::Default),
        "weight" => Some(BandwidthMode::Weight),
        "absolute" => Some(BandwidthMode::Absolute),
        "none" => Some(BandwidthMode::None),
        _ => None,
    }
}

pub fn vhd(host: &str, stdout: &str) -> Result<Option<Vhd>> {
    let Some(info) = decode::<Option<VhdInfo>>(stdout)? else {
        return Ok(None);
    };

    let disk_type = match info.vhd_type.to_ascii_lowercase().as_str() {
        "fixed" => DiskType::Fixed,
        "dynamic" => DiskType::Dynamic,
        other => {
            return Err(Error::UnexpectedResponse(format!(
                "disk {} has unsupported type '{other}'",
                info.path
            )));
        }
    };
    let mut vhd = Vhd::new(host, info.path, Capacity::from_bytes(info.size));
    vhd.disk_type = disk_type;
    Ok(Some(vhd))
}

pub fn vm(host: &str, stdout: &str) -> Result<Option<Vm>> {
    let Some(info) = decode::<Option<VmInfo>>(stdout)? else {
        return Ok(None);
    };

    let automatic_start_action = match info.automatic_start_action.as_str() {
        "Nothing" => StartAction::Nothing,
        "StartIfRunning" => StartAction::StartIfRunning,
        "Start" => StartAction::Start,
        other => return Err(unknown_value(&info.name, "automatic start action", other)),
    };
    let automatic_stop_action = match info.automatic_stop_action.as_str() {
        "TurnOff" => StopAction::TurnOff,
        "Save" => StopAction::Save,
        "ShutDown" => StopAction::ShutDown,
        other => return Err(unknown_value(&info.name, "automatic stop action", other)),
    };

    let mut vm = Vm::new(host, info.name);
    vm.path = info.path;
    vm.generation = info.generation;
    vm.cpu_count = info.processor_count;
    vm.memory = MemoryPolicy {
        startup: Capacity::from_bytes(info.memory_startup),
        dynamic: info.dynamic_memory_enabled,
        minimum: Some(Capacity::from_bytes(info.memory_minimum)),
        maximum: Some(Capacity::from_bytes(info.memory_maximum)),
    };
    vm.vhds = info.hard_drives;
    vm.switches = info.switches;
    vm.boot_iso = info.dvd_path.filter(|p| !p.is_empty());
    vm.boot_device = info.boot_device;
    vm.automatic_start_action = automatic_start_action;
    vm.automatic_start_delay = info.automatic_start_delay;
    vm.automatic_stop_action = automatic_stop_action;
    vm.secure_boot = info.secure_boot;
    vm.secure_boot_template = info.secure_boot_template.filter(|t| !t.is_empty());
    Ok(Some(vm))
}

fn unknown_value(vm: &str, what: &str, value: &str) -> Error {
    Error::UnexpectedResponse(format!("VM {vm} has unknown {what} '{value}'"))
}
