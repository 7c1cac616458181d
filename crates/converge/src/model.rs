//! Declared resources: hosts, virtual switches, virtual hard disks and VMs.
//!
//! Every resource is identified by a [`ResourceKey`] that is unique within a
//! graph. References between resources are expressed as keys and resolved by
//! [`ResourceGraph`](crate::graph::ResourceGraph) at construction time.

use crate::capacity::Capacity;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Default minimum memory for dynamic-memory VMs.
pub const DEFAULT_MEMORY_MINIMUM: Capacity = Capacity::mib(512);
/// Default maximum memory for dynamic-memory VMs.
pub const DEFAULT_MEMORY_MAXIMUM: Capacity = Capacity::tib(1);
/// Default startup memory.
pub const DEFAULT_MEMORY_STARTUP: Capacity = Capacity::mib(512);

// ============================================================================
// Keys
// ============================================================================

/// Resource kind, ordered the way ties are broken in the apply order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Host,
    Switch,
    Vhd,
    Vm,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Switch => "switch",
            Self::Vhd => "vhd",
            Self::Vm => "vm",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique key of a resource within a graph.
///
/// Hosts are keyed by name; everything else by (owning host, name), where the
/// name of a VHD is its path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub host: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, host: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            host: host.into(),
            name: name.into(),
        }
    }

    pub fn host(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ResourceKind::Host, name.clone(), name)
    }

    pub fn switch(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Switch, host, name)
    }

    pub fn vhd(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(ResourceKind::Vhd, host, path)
    }

    pub fn vm(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Vm, host, name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::Host => write!(f, "host:{}", self.host),
            kind => write!(f, "{}:{}/{}", kind, self.host, self.name),
        }
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ============================================================================
// Host
// ============================================================================

/// Filesystem path convention of a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStyle {
    /// `C:\VMs\disk.vhdx` or `\\server\share\disk.vhdx`
    #[default]
    Windows,
    /// `/vms/disk.vhdx`
    Posix,
}

impl PathStyle {
    /// Whether `path` is absolute under this convention
    pub fn is_absolute(&self, path: &str) -> bool {
        match self {
            Self::Posix => path.starts_with('/'),
            Self::Windows => {
                let bytes = path.as_bytes();
                let drive = bytes.len() >= 3
                    && bytes[0].is_ascii_alphabetic()
                    && bytes[1] == b':'
                    && matches!(bytes[2], b'\\' | b'/');
                drive || path.starts_with(r"\\")
            }
        }
    }

    /// Whether two paths name the same location. Trailing separators are
    /// ignored; Windows paths also ignore case and accept `/` for `\`.
    pub fn same_path(&self, a: &str, b: &str) -> bool {
        match self {
            Self::Posix => a.trim_end_matches('/') == b.trim_end_matches('/'),
            Self::Windows => {
                let (a, b) = (a.replace('/', "\\"), b.replace('/', "\\"));
                a.trim_end_matches('\\')
                    .eq_ignore_ascii_case(b.trim_end_matches('\\'))
            }
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

/// A machine that runs (or should run) the hypervisor role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    /// Network address; defaults to the host name
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Enable the hypervisor role when it is missing
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub path_style: PathStyle,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            port: default_ssh_port(),
            user: None,
            identity_file: None,
            install: false,
            path_style: PathStyle::default(),
        }
    }

    pub fn with_path_style(mut self, path_style: PathStyle) -> Self {
        self.path_style = path_style;
        self
    }

    pub fn with_install(mut self, install: bool) -> Self {
        self.install = install;
        self
    }

    /// Address to connect to
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::host(&self.name)
    }
}

// ============================================================================
// Switch
// ============================================================================

/// Minimum-bandwidth mode of an external switch, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthMode {
    Default,
    Weight,
    Absolute,
    None,
}

impl BandwidthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Weight => "weight",
            Self::Absolute => "absolute",
            Self::None => "none",
        }
    }
}

impl fmt::Display for BandwidthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switch variants and their kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchKind {
    /// Connects VMs with each other and with the host
    Internal,
    /// Connects VMs with each other only
    Private,
    /// Bridges VMs onto a physical network adapter
    External {
        adapter: String,
        #[serde(default)]
        allow_management_os: Option<bool>,
        #[serde(default)]
        enable_iov: Option<bool>,
        #[serde(default)]
        bandwidth_mode: Option<BandwidthMode>,
    },
}

impl SwitchKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Private => "private",
            Self::External { .. } => "external",
        }
    }

    /// External switch on `adapter` with every optional setting left alone
    pub fn external(adapter: impl Into<String>) -> Self {
        Self::External {
            adapter: adapter.into(),
            allow_management_os: None,
            enable_iov: None,
            bandwidth_mode: None,
        }
    }
}

/// A virtual switch on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub name: String,
    pub host: String,
    #[serde(flatten)]
    pub kind: SwitchKind,
}

impl Switch {
    pub fn new(host: impl Into<String>, name: impl Into<String>, kind: SwitchKind) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            kind,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::switch(&self.host, &self.name)
    }
}

// ============================================================================
// VHD
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskType {
    Fixed,
    #[default]
    Dynamic,
}

impl DiskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A virtual hard disk file on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vhd {
    pub path: String,
    pub host: String,
    pub size: Capacity,
    #[serde(default, rename = "type")]
    pub disk_type: DiskType,
}

impl Vhd {
    pub fn new(host: impl Into<String>, path: impl Into<String>, size: Capacity) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            size,
            disk_type: DiskType::default(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::vhd(&self.host, &self.path)
    }
}

// ============================================================================
// VM
// ============================================================================

/// RAM policy of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    #[serde(default = "default_memory_startup")]
    pub startup: Capacity,
    #[serde(default)]
    pub dynamic: bool,
    /// Dynamic memory floor (defaults to 512MB)
    #[serde(default)]
    pub minimum: Option<Capacity>,
    /// Dynamic memory ceiling (defaults to 1TB)
    #[serde(default)]
    pub maximum: Option<Capacity>,
}

fn default_memory_startup() -> Capacity {
    DEFAULT_MEMORY_STARTUP
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MEMORY_STARTUP)
    }
}

impl MemoryPolicy {
    pub fn fixed(startup: Capacity) -> Self {
        Self {
            startup,
            dynamic: false,
            minimum: None,
            maximum: None,
        }
    }

    pub fn dynamic(minimum: Capacity, startup: Capacity, maximum: Capacity) -> Self {
        Self {
            startup,
            dynamic: true,
            minimum: Some(minimum),
            maximum: Some(maximum),
        }
    }

    /// Effective dynamic-memory floor
    pub fn minimum(&self) -> Capacity {
        self.minimum.unwrap_or(DEFAULT_MEMORY_MINIMUM)
    }

    /// Effective dynamic-memory ceiling
    pub fn maximum(&self) -> Capacity {
        self.maximum.unwrap_or(DEFAULT_MEMORY_MAXIMUM)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootDevice {
    #[default]
    Vhd,
    Cd,
    NetworkAdapter,
    Floppy,
}

impl BootDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vhd => "vhd",
            Self::Cd => "cd",
            Self::NetworkAdapter => "network_adapter",
            Self::Floppy => "floppy",
        }
    }
}

impl fmt::Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the host does with the VM when the host starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartAction {
    Nothing,
    #[default]
    StartIfRunning,
    Start,
}

impl StartAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::StartIfRunning => "start_if_running",
            Self::Start => "start",
        }
    }
}

impl fmt::Display for StartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the host does with the VM when the host shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAction {
    TurnOff,
    #[default]
    Save,
    ShutDown,
}

impl StopAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnOff => "turn_off",
            Self::Save => "save",
            Self::ShutDown => "shut_down",
        }
    }
}

impl fmt::Display for StopAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_generation() -> u8 {
    2
}

fn default_cpu_count() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// A virtual machine on a host.
///
/// `vhds` are disk paths and `switches` are switch names, both resolved on
/// the VM's own host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    pub host: String,
    /// Directory holding the VM configuration
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_generation")]
    pub generation: u8,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: u32,
    #[serde(default)]
    pub vhds: Vec<String>,
    #[serde(default)]
    pub switches: Vec<String>,
    #[serde(default)]
    pub boot_iso: Option<String>,
    #[serde(default)]
    pub memory: MemoryPolicy,
    #[serde(default)]
    pub boot_device: BootDevice,
    #[serde(default)]
    pub automatic_start_action: StartAction,
    /// Seconds to wait before an automatic start
    #[serde(default)]
    pub automatic_start_delay: u32,
    #[serde(default)]
    pub automatic_stop_action: StopAction,
    #[serde(default = "default_true")]
    pub secure_boot: bool,
    #[serde(default)]
    pub secure_boot_template: Option<String>,
}

impl Vm {
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            path: None,
            generation: default_generation(),
            cpu_count: default_cpu_count(),
            vhds: Vec::new(),
            switches: Vec::new(),
            boot_iso: None,
            memory: MemoryPolicy::default(),
            boot_device: BootDevice::default(),
            automatic_start_action: StartAction::default(),
            automatic_start_delay: 0,
            automatic_stop_action: StopAction::default(),
            secure_boot: true,
            secure_boot_template: None,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::vm(&self.host, &self.name)
    }

    /// Secure boot only exists on generation 2 firmware
    pub fn secure_boot_enabled(&self) -> bool {
        self.generation == 2 && self.secure_boot
    }

    /// Whether the VM declares a device of its boot kind. Generation 2
    /// firmware boots from a device, so without one the setting is inert.
    pub fn has_boot_target(&self) -> bool {
        match self.boot_device {
            BootDevice::Vhd => !self.vhds.is_empty(),
            BootDevice::Cd => self.boot_iso.is_some(),
            BootDevice::NetworkAdapter => !self.switches.is_empty(),
            BootDevice::Floppy => true,
        }
    }
}

// ============================================================================
// Resource
// ============================================================================

/// Any declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Host(Host),
    Switch(Switch),
    Vhd(Vhd),
    Vm(Vm),
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        match self {
            Self::Host(h) => h.key(),
            Self::Switch(s) => s.key(),
            Self::Vhd(v) => v.key(),
            Self::Vm(v) => v.key(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Host(_) => ResourceKind::Host,
            Self::Switch(_) => ResourceKind::Switch,
            Self::Vhd(_) => ResourceKind::Vhd,
            Self::Vm(_) => ResourceKind::Vm,
        }
    }

    /// Name of the owning host
    pub fn host_name(&self) -> &str {
        match self {
            Self::Host(h) => &h.name,
            Self::Switch(s) => &s.host,
            Self::Vhd(v) => &v.host,
            Self::Vm(v) => &v.host,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match self {
            Self::Host(h) => format!("Hyper-V host {}", h.address()),
            Self::Switch(s) => format!("{} switch {}", s.kind.label(), s.name),
            Self::Vhd(v) => format!("{} {} disk {}", v.disk_type, v.size, v.path),
            Self::Vm(v) => format!(
                "VM {} ({} vCPU, {} RAM)",
                v.name, v.cpu_count, v.memory.startup
            ),
        }
    }

    /// Keys this resource depends on, in declaration order
    pub fn references(&self) -> Vec<ResourceKey> {
        match self {
            Self::Host(_) => Vec::new(),
            Self::Switch(s) => vec![ResourceKey::host(&s.host)],
            Self::Vhd(v) => vec![ResourceKey::host(&v.host)],
            Self::Vm(vm) => {
                let mut refs = vec![ResourceKey::host(&vm.host)];
                refs.extend(vm.vhds.iter().map(|p| ResourceKey::vhd(&vm.host, p)));
                refs.extend(vm.switches.iter().map(|s| ResourceKey::switch(&vm.host, s)));
                refs
            }
        }
    }

    /// Check field invariants. Paths are checked against the owning host's convention.
    pub fn validate(&self, path_style: PathStyle) -> Result<()> {
        let key = self.key();
        let require_name = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(Error::invalid_field(&key, field, "must not be empty"))
            } else {
                Ok(())
            }
        };
        let require_absolute = |field: &'static str, value: &str| {
            if path_style.is_absolute(value) {
                Ok(())
            } else {
                Err(Error::invalid_field(
                    &key,
                    field,
                    format!("'{value}' is not an absolute {path_style:?} path"),
                ))
            }
        };

        match self {
            Self::Host(h) => {
                require_name("name", &h.name)?;
                if h.port == 0 {
                    return Err(Error::invalid_field(&key, "port", "must be non-zero"));
                }
            }
            Self::Switch(s) => {
                require_name("name", &s.name)?;
                if let SwitchKind::External { adapter, .. } = &s.kind {
                    require_name("adapter", adapter)?;
                }
            }
            Self::Vhd(v) => {
                require_name("path", &v.path)?;
                require_absolute("path", &v.path)?;
                if v.size.is_zero() {
                    return Err(Error::invalid_field(&key, "size", "must be positive"));
                }
            }
            Self::Vm(vm) => validate_vm(&key, vm, require_name, require_absolute)?,
        }
        Ok(())
    }
}

fn validate_vm(
    key: &ResourceKey,
    vm: &Vm,
    require_name: impl Fn(&'static str, &str) -> Result<()>,
    require_absolute: impl Fn(&'static str, &str) -> Result<()>,
) -> Result<()> {
    require_name("name", &vm.name)?;
    if let Some(path) = &vm.path {
        require_absolute("path", path)?;
    }
    if let Some(iso) = &vm.boot_iso {
        require_absolute("boot_iso", iso)?;
    }
    if !matches!(vm.generation, 1 | 2) {
        return Err(Error::invalid_field(key, "generation", "must be 1 or 2"));
    }
    if vm.cpu_count < 1 {
        return Err(Error::invalid_field(key, "cpu_count", "must be at least 1"));
    }

    let memory = &vm.memory;
    if memory.startup.is_zero() {
        return Err(Error::invalid_field(key, "memory.startup", "must be positive"));
    }
    if memory.dynamic {
        if memory.minimum() > memory.startup {
            return Err(Error::invalid_field(
                key,
                "memory.minimum",
                format!(
                    "minimum {} exceeds startup {}",
                    memory.minimum(),
                    memory.startup
                ),
            ));
        }
        if memory.startup > memory.maximum() {
            return Err(Error::invalid_field(
                key,
                "memory.maximum",
                format!(
                    "startup {} exceeds maximum {}",
                    memory.startup,
                    memory.maximum()
                ),
            ));
        }
    }

    if vm.secure_boot_template.is_some() && !vm.secure_boot_enabled() {
        return Err(Error::invalid_field(
            key,
            "secure_boot_template",
            "only meaningful when secure boot is enabled on a generation 2 VM",
        ));
    }
    if vm.boot_device == BootDevice::Floppy && vm.generation != 1 {
        return Err(Error::invalid_field(
            key,
            "boot_device",
            "floppy boot requires a generation 1 VM",
        ));
    }
    if vm.boot_device == BootDevice::Cd && vm.boot_iso.is_none() {
        return Err(Error::invalid_field(
            key,
            "boot_device",
            "cd boot requires boot_iso",
        ));
    }
    Ok(())
}

impl From<Host> for Resource {
    fn from(value: Host) -> Self {
        Self::Host(value)
    }
}

impl From<Switch> for Resource {
    fn from(value: Switch) -> Self {
        Self::Switch(value)
    }
}

impl From<Vhd> for Resource {
    fn from(value: Vhd) -> Self {
        Self::Vhd(value)
    }
}

impl From<Vm> for Resource {
    fn from(value: Vm) -> Self {
        Self::Vm(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(ResourceKey::host("hv01").to_string(), "host:hv01");
        assert_eq!(
            ResourceKey::switch("hv01", "LAN").to_string(),
            "switch:hv01/LAN"
        );
        assert_eq!(
            ResourceKey::vhd("hv01", "/vms/a.vhdx").to_string(),
            "vhd:hv01//vms/a.vhdx"
        );
    }

    #[test]
    fn test_key_ordering_is_kind_first() {
        let mut keys = vec![
            ResourceKey::vm("a", "z"),
            ResourceKey::switch("b", "s"),
            ResourceKey::host("c"),
            ResourceKey::vhd("a", "/d"),
        ];
        keys.sort();
        let kinds: Vec<_> = keys.iter().map(|k| k.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Host,
                ResourceKind::Switch,
                ResourceKind::Vhd,
                ResourceKind::Vm
            ]
        );
    }

    #[test]
    fn test_windows_paths() {
        let style = PathStyle::Windows;
        assert!(style.is_absolute(r"D:\VMs\web.vhdx"));
        assert!(style.is_absolute("C:/VMs/web.vhdx"));
        assert!(style.is_absolute(r"\\nas\vms\web.vhdx"));
        assert!(!style.is_absolute(r"VMs\web.vhdx"));
        assert!(!style.is_absolute("/vms/web.vhdx"));
    }

    #[test]
    fn test_posix_paths() {
        assert!(PathStyle::Posix.is_absolute("/vms/a.vhdx"));
        assert!(!PathStyle::Posix.is_absolute("vms/a.vhdx"));
    }

    #[test]
    fn test_same_path() {
        let windows = PathStyle::Windows;
        assert!(windows.same_path(r"D:\VMs", r"d:\vms\"));
        assert!(windows.same_path("D:/VMs/web", r"D:\VMs\web"));
        assert!(!windows.same_path(r"D:\VMs", r"D:\VMs\web"));

        let posix = PathStyle::Posix;
        assert!(posix.same_path("/vms/", "/vms"));
        assert!(!posix.same_path("/VMs", "/vms"));
    }

    #[test]
    fn test_boot_target() {
        let mut vm = Vm::new("hv01", "web");
        assert!(!vm.has_boot_target());
        vm.vhds = vec![r"D:\VMs\web.vhdx".into()];
        assert!(vm.has_boot_target());

        vm.boot_device = BootDevice::NetworkAdapter;
        assert!(!vm.has_boot_target());
        vm.switches = vec!["LAN".into()];
        assert!(vm.has_boot_target());
    }

    #[test]
    fn test_vm_references_resolve_on_own_host() {
        let mut vm = Vm::new("hv01", "web");
        vm.vhds = vec!["/vms/a.vhdx".into()];
        vm.switches = vec!["LAN".into()];

        let refs = Resource::Vm(vm).references();
        assert_eq!(
            refs,
            vec![
                ResourceKey::host("hv01"),
                ResourceKey::vhd("hv01", "/vms/a.vhdx"),
                ResourceKey::switch("hv01", "LAN"),
            ]
        );
    }

    #[test]
    fn test_external_switch_requires_adapter() {
        let switch = Switch::new("hv01", "WAN", SwitchKind::external("  "));
        let err = Resource::Switch(switch)
            .validate(PathStyle::Windows)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "adapter", .. }));
    }

    #[test]
    fn test_vhd_path_must_match_host_convention() {
        let vhd = Resource::Vhd(Vhd::new("hv01", "/vms/a.vhdx", Capacity::gib(10)));
        assert!(vhd.validate(PathStyle::Posix).is_ok());
        assert!(vhd.validate(PathStyle::Windows).is_err());
    }

    #[test]
    fn test_vhd_size_must_be_positive() {
        let vhd = Resource::Vhd(Vhd::new("hv01", "/vms/a.vhdx", Capacity::from_bytes(0)));
        let err = vhd.validate(PathStyle::Posix).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "size", .. }));
    }

    #[test]
    fn test_vm_cpu_count_must_be_positive() {
        let mut vm = Vm::new("hv01", "web");
        vm.cpu_count = 0;
        let err = Resource::Vm(vm).validate(PathStyle::Windows).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "cpu_count", .. }));
    }

    #[test]
    fn test_dynamic_memory_ordering() {
        let mut vm = Vm::new("hv01", "web");
        vm.memory = MemoryPolicy::dynamic(Capacity::gib(1), Capacity::gib(2), Capacity::gib(4));
        assert!(Resource::Vm(vm.clone()).validate(PathStyle::Windows).is_ok());

        vm.memory = MemoryPolicy::dynamic(Capacity::gib(3), Capacity::gib(2), Capacity::gib(4));
        let err = Resource::Vm(vm.clone()).validate(PathStyle::Windows).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "memory.minimum", .. }));

        vm.memory = MemoryPolicy::dynamic(Capacity::gib(1), Capacity::gib(8), Capacity::gib(4));
        let err = Resource::Vm(vm).validate(PathStyle::Windows).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "memory.maximum", .. }));
    }

    #[test]
    fn test_fixed_memory_ignores_bounds() {
        let mut vm = Vm::new("hv01", "web");
        vm.memory = MemoryPolicy {
            startup: Capacity::gib(8),
            dynamic: false,
            minimum: Some(Capacity::gib(16)),
            maximum: Some(Capacity::gib(1)),
        };
        assert!(Resource::Vm(vm).validate(PathStyle::Windows).is_ok());
    }

    #[test]
    fn test_template_requires_secure_boot() {
        let mut vm = Vm::new("hv01", "web");
        vm.secure_boot = false;
        vm.secure_boot_template = Some("MicrosoftUEFICertificateAuthority".into());
        let err = Resource::Vm(vm).validate(PathStyle::Windows).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidField {
                field: "secure_boot_template",
                ..
            }
        ));
    }

    #[test]
    fn test_switch_deserializes_tagged_kind() {
        let external: Switch = toml::from_str(
            r#"
            name = "WAN"
            host = "hv01"
            type = "external"
            adapter = "Ethernet 2"
            allow_management_os = true
            "#,
        )
        .unwrap();
        assert_eq!(
            external.kind,
            SwitchKind::External {
                adapter: "Ethernet 2".into(),
                allow_management_os: Some(true),
                enable_iov: None,
                bandwidth_mode: None,
            }
        );

        let private: Switch = toml::from_str(
            r#"
            name = "lab"
            host = "hv01"
            type = "private"
            "#,
        )
        .unwrap();
        assert_eq!(private.kind, SwitchKind::Private);
    }

    #[test]
    fn test_vm_defaults() {
        let vm: Vm = toml::from_str(
            r#"
            name = "web"
            host = "hv01"
            "#,
        )
        .unwrap();
        assert_eq!(vm, Vm::new("hv01", "web"));
    }
}
