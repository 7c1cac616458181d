//! PowerShell script builders.
//!
//! Probe and inventory scripts print a single JSON document on stdout
//! (`null` when the resource does not exist). Mutating scripts print nothing.
//! Every script runs with `$ErrorActionPreference = 'Stop'` and reports a
//! failure as a non-zero exit with the error text on stderr.

use converge::diff::fields;
use converge::{
    BandwidthMode, BootDevice, DiskType, FieldChange, Host, Resource, ResourceKey, ResourceKind,
    StartAction, StopAction, Switch, SwitchKind, Vhd, Vm,
};

const FEATURE: &str = "Microsoft-Hyper-V";

/// Quote a value as a PowerShell single-quoted string literal
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn flag(value: bool) -> &'static str {
    if value { "$true" } else { "$false" }
}

fn string_array(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("@({})", items.join(", "))
}

/// Wrap a script body with error handling
pub fn wrap(body: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'\n\
         $ProgressPreference = 'SilentlyContinue'\n\
         try {{\n{body}\n}} catch {{\n    [Console]::Error.WriteLine($_.ToString())\n    exit 1\n}}\n"
    )
}

fn find_switch(name: &str) -> String {
    format!(
        "$s = Get-VMSwitch | Where-Object Name -eq {} | Select-Object -First 1",
        quote(name)
    )
}

fn find_vm(name: &str) -> String {
    format!(
        "$vm = Get-VM | Where-Object Name -eq {} | Select-Object -First 1",
        quote(name)
    )
}

fn require_vm(name: &str) -> String {
    format!(
        "{}\nif ($null -eq $vm) {{ throw ('VM ' + {} + ' was not found') }}",
        find_vm(name),
        quote(name)
    )
}

// ============================================================================
// Probe
// ============================================================================

/// Script reading the current state of `key`
pub fn probe(key: &ResourceKey) -> String {
    match key.kind {
        ResourceKind::Host => probe_host(),
        ResourceKind::Switch => probe_switch(&key.name),
        ResourceKind::Vhd => probe_vhd(&key.name),
        ResourceKind::Vm => probe_vm(&key.name),
    }
}

fn probe_host() -> String {
    format!(
        "$feature = Get-WindowsOptionalFeature -Online -FeatureName {FEATURE}\n\
         $installed = ($null -ne $feature) -and (\"$($feature.State)\" -eq 'Enabled')\n\
         [pscustomobject]@{{ HyperVInstalled = $installed }} | ConvertTo-Json -Compress"
    )
}

fn probe_switch(name: &str) -> String {
    format!(
        r#"{}
if ($null -eq $s) {{ 'null' }} else {{
    $adapter = $null
    if ("$($s.SwitchType)" -eq 'External') {{
        $adapter = (Get-NetAdapter -InterfaceDescription $s.NetAdapterInterfaceDescription).Name
    }}
    [pscustomobject]@{{
        Name = $s.Name
        SwitchType = "$($s.SwitchType)"
        NetAdapterName = $adapter
        AllowManagementOS = $s.AllowManagementOS
        IovEnabled = $s.IovEnabled
        BandwidthReservationMode = "$($s.BandwidthReservationMode)"
    }} | ConvertTo-Json -Compress
}}"#,
        find_switch(name)
    )
}

fn probe_vhd(path: &str) -> String {
    let path = quote(path);
    format!(
        r#"if (-not (Test-Path -LiteralPath {path})) {{ 'null' }} else {{
    $d = Get-VHD -Path {path}
    [pscustomobject]@{{
        Path = $d.Path
        Size = $d.Size
        VhdType = "$($d.VhdType)"
    }} | ConvertTo-Json -Compress
}}"#
    )
}

fn probe_vm(name: &str) -> String {
    format!(
        r#"{}
if ($null -eq $vm) {{ 'null' }} else {{
    $mem = Get-VMMemory -VM $vm
    # New-VM -Path D:\VMs keeps the VM in D:\VMs\<name>
    $path = $vm.Path
    if ((Split-Path -Leaf $path) -eq $vm.Name) {{ $path = Split-Path -Parent $path }}
    $dvd = Get-VMDvdDrive -VM $vm | Select-Object -First 1
    $boot = 'vhd'
    $secure = $false
    $template = $null
    if ($vm.Generation -eq 2) {{
        $fw = Get-VMFirmware -VM $vm
        $secure = "$($fw.SecureBoot)" -eq 'On'
        $template = $fw.SecureBootTemplate
        $first = $fw.BootOrder | Select-Object -First 1
        if ($null -ne $first) {{
            if ("$($first.BootType)" -eq 'Network') {{ $boot = 'network_adapter' }}
            elseif ($first.Device -is [Microsoft.HyperV.PowerShell.DvdDrive]) {{ $boot = 'cd' }}
        }}
    }} else {{
        $first = "$((Get-VMBios -VM $vm).StartupOrder | Select-Object -First 1)"
        $boot = switch ($first) {{
            'CD' {{ 'cd' }}
            'LegacyNetworkAdapter' {{ 'network_adapter' }}
            'Floppy' {{ 'floppy' }}
            default {{ 'vhd' }}
        }}
    }}
    [pscustomobject]@{{
        Name = $vm.Name
        Path = $path
        Generation = $vm.Generation
        ProcessorCount = $vm.ProcessorCount
        MemoryStartup = $mem.Startup
        DynamicMemoryEnabled = $mem.DynamicMemoryEnabled
        MemoryMinimum = $mem.Minimum
        MemoryMaximum = $mem.Maximum
        HardDrives = @(Get-VMHardDiskDrive -VM $vm | Sort-Object ControllerType, ControllerNumber, ControllerLocation | ForEach-Object {{ $_.Path }})
        Switches = @(Get-VMNetworkAdapter -VM $vm | Where-Object {{ $_.SwitchName }} | ForEach-Object {{ $_.SwitchName }})
        DvdPath = $dvd.Path
        BootDevice = $boot
        AutomaticStartAction = "$($vm.AutomaticStartAction)"
        AutomaticStartDelay = $vm.AutomaticStartDelay
        AutomaticStopAction = "$($vm.AutomaticStopAction)"
        SecureBoot = $secure
        SecureBootTemplate = $template
    }} | ConvertTo-Json -Compress
}}"#,
        find_vm(name)
    )
}

/// Script listing the names of every resource of `kind`
pub fn inventory(kind: ResourceKind) -> String {
    match kind {
        ResourceKind::Host => "ConvertTo-Json -InputObject @($env:COMPUTERNAME) -Compress".into(),
        ResourceKind::Switch => {
            "ConvertTo-Json -InputObject @(Get-VMSwitch | ForEach-Object { $_.Name }) -Compress"
                .into()
        }
        ResourceKind::Vm => {
            "ConvertTo-Json -InputObject @(Get-VM | ForEach-Object { $_.Name }) -Compress".into()
        }
        // Attached disks plus loose files in the host's default disk folder
        ResourceKind::Vhd => r#"$paths = @(Get-VM | Get-VMHardDiskDrive | Where-Object { $_.Path } | ForEach-Object { $_.Path })
$dir = (Get-VMHost).VirtualHardDiskPath
if ($dir -and (Test-Path -LiteralPath $dir)) {
    $paths += @(Get-ChildItem -LiteralPath $dir -File | Where-Object { $_.Extension -in '.vhd', '.vhdx' } | ForEach-Object { $_.FullName })
}
ConvertTo-Json -InputObject @($paths | Sort-Object -Unique) -Compress"#
            .into(),
    }
}

// ============================================================================
// Create / update / delete
// ============================================================================

/// Script creating `resource` as declared
pub fn create(resource: &Resource) -> String {
    match resource {
        Resource::Host(host) => install_role(host),
        Resource::Switch(switch) => create_switch(switch),
        Resource::Vhd(vhd) => create_vhd(vhd),
        Resource::Vm(vm) => create_vm(vm),
    }
}

/// Script changing the given fields of `resource` in place
pub fn update(resource: &Resource, changes: &[FieldChange]) -> String {
    let changed = |field: &str| changes.iter().any(|c| c.field == field);
    match resource {
        Resource::Host(host) => install_role(host),
        Resource::Switch(switch) => update_switch(switch, &changed),
        Resource::Vhd(vhd) => format!(
            "Resize-VHD -Path {} -SizeBytes {}",
            quote(&vhd.path),
            vhd.size.bytes()
        ),
        Resource::Vm(vm) => {
            let mut lines = vec![require_vm(&vm.name)];
            vm_settings(vm, &changed, &mut lines);
            lines.join("\n")
        }
    }
}

/// Script removing `key`; hosts are never removed
pub fn delete(key: &ResourceKey) -> Option<String> {
    match key.kind {
        ResourceKind::Host => None,
        ResourceKind::Switch => Some(format!(
            "{}\nif ($null -ne $s) {{ Remove-VMSwitch -VMSwitch $s -Force }}",
            find_switch(&key.name)
        )),
        ResourceKind::Vhd => Some(format!(
            "Remove-Item -LiteralPath {} -Force",
            quote(&key.name)
        )),
        ResourceKind::Vm => Some(format!(
            "{}\nif ($null -ne $vm) {{\n    if (\"$($vm.State)\" -ne 'Off') {{ Stop-VM -VM $vm -TurnOff -Force }}\n    Remove-VM -VM $vm -Force\n}}",
            find_vm(&key.name)
        )),
    }
}

fn install_role(host: &Host) -> String {
    log::warn!(
        "enabling {FEATURE} on {}; the host must restart before it can run VMs",
        host.name
    );
    format!("Enable-WindowsOptionalFeature -Online -FeatureName {FEATURE} -All -NoRestart | Out-Null")
}

fn bandwidth_name(mode: BandwidthMode) -> &'static str {
    match mode {
        BandwidthMode::Default => "Default",
        BandwidthMode::Weight => "Weight",
        BandwidthMode::Absolute => "Absolute",
        BandwidthMode::None => "None",
    }
}

fn create_switch(switch: &Switch) -> String {
    let name = quote(&switch.name);
    match &switch.kind {
        SwitchKind::Internal => format!("New-VMSwitch -Name {name} -SwitchType Internal | Out-Null"),
        SwitchKind::Private => format!("New-VMSwitch -Name {name} -SwitchType Private | Out-Null"),
        SwitchKind::External {
            adapter,
            allow_management_os,
            enable_iov,
            bandwidth_mode,
        } => {
            let mut cmd = format!("New-VMSwitch -Name {name} -NetAdapterName {}", quote(adapter));
            if let Some(allow) = allow_management_os {
                cmd.push_str(&format!(" -AllowManagementOS {}", flag(*allow)));
            }
            if let Some(iov) = enable_iov {
                cmd.push_str(&format!(" -EnableIov {}", flag(*iov)));
            }
            if let Some(mode) = bandwidth_mode {
                cmd.push_str(&format!(" -MinimumBandwidthMode {}", bandwidth_name(*mode)));
            }
            cmd.push_str(" | Out-Null");
            cmd
        }
    }
}

fn update_switch(switch: &Switch, changed: &dyn Fn(&str) -> bool) -> String {
    let mut cmd = format!("{}\nSet-VMSwitch -VMSwitch $s", find_switch(&switch.name));
    if let SwitchKind::External {
        adapter,
        allow_management_os,
        ..
    } = &switch.kind
    {
        if changed(fields::ADAPTER) {
            cmd.push_str(&format!(" -NetAdapterName {}", quote(adapter)));
        }
        if let (true, Some(allow)) = (changed(fields::ALLOW_MANAGEMENT_OS), allow_management_os) {
            cmd.push_str(&format!(" -AllowManagementOS {}", flag(*allow)));
        }
    }
    cmd
}

fn create_vhd(vhd: &Vhd) -> String {
    let kind = match vhd.disk_type {
        DiskType::Fixed => "-Fixed",
        DiskType::Dynamic => "-Dynamic",
    };
    format!(
        "New-VHD -Path {} -SizeBytes {} {kind} | Out-Null",
        quote(&vhd.path),
        vhd.size.bytes()
    )
}

fn create_vm(vm: &Vm) -> String {
    let mut new_vm = format!(
        "New-VM -Name {} -Generation {} -MemoryStartupBytes {} -NoVHD",
        quote(&vm.name),
        vm.generation,
        vm.memory.startup.bytes()
    );
    if let Some(path) = &vm.path {
        new_vm.push_str(&format!(" -Path {}", quote(path)));
    }
    new_vm.push_str(" | Out-Null");

    let mut lines = vec![new_vm, require_vm(&vm.name)];
    // New-VM adds an unconnected adapter; the switch step removes it
    vm_settings(vm, &|_| true, &mut lines);
    lines.join("\n")
}

fn start_action_name(action: StartAction) -> &'static str {
    match action {
        StartAction::Nothing => "Nothing",
        StartAction::StartIfRunning => "StartIfRunning",
        StartAction::Start => "Start",
    }
}

fn stop_action_name(action: StopAction) -> &'static str {
    match action {
        StopAction::TurnOff => "TurnOff",
        StopAction::Save => "Save",
        StopAction::ShutDown => "ShutDown",
    }
}

/// Commands applying the VM's mutable settings for which `changed` holds.
/// Boot device goes last since it points at drives and adapters.
fn vm_settings(vm: &Vm, changed: &dyn Fn(&str) -> bool, lines: &mut Vec<String>) {
    if changed(fields::CPU_COUNT) {
        lines.push(format!("Set-VMProcessor -VM $vm -Count {}", vm.cpu_count));
    }

    let memory = &vm.memory;
    if [
        fields::MEMORY_STARTUP,
        fields::MEMORY_DYNAMIC,
        fields::MEMORY_MINIMUM,
        fields::MEMORY_MAXIMUM,
    ]
    .into_iter()
    .any(changed)
    {
        if memory.dynamic {
            lines.push(format!(
                "Set-VMMemory -VM $vm -DynamicMemoryEnabled $true -MinimumBytes {} -StartupBytes {} -MaximumBytes {}",
                memory.minimum().bytes(),
                memory.startup.bytes(),
                memory.maximum().bytes()
            ));
        } else {
            lines.push(format!(
                "Set-VMMemory -VM $vm -DynamicMemoryEnabled $false -StartupBytes {}",
                memory.startup.bytes()
            ));
        }
    }

    if changed(fields::VHDS) {
        lines.push("Get-VMHardDiskDrive -VM $vm | Remove-VMHardDiskDrive".into());
        for path in &vm.vhds {
            lines.push(format!("Add-VMHardDiskDrive -VM $vm -Path {}", quote(path)));
        }
    }

    if changed(fields::SWITCHES) {
        lines.push(format!(
            r#"$want = {}
Get-VMNetworkAdapter -VM $vm | Where-Object {{ $want -notcontains $_.SwitchName }} | Remove-VMNetworkAdapter
$have = @(Get-VMNetworkAdapter -VM $vm | ForEach-Object {{ $_.SwitchName }})
foreach ($name in $want) {{ if ($have -notcontains $name) {{ Add-VMNetworkAdapter -VM $vm -SwitchName $name }} }}"#,
            string_array(&vm.switches)
        ));
    }

    if changed(fields::BOOT_ISO) {
        match &vm.boot_iso {
            Some(iso) => lines.push(format!(
                "$dvd = Get-VMDvdDrive -VM $vm | Select-Object -First 1\n\
                 if ($null -eq $dvd) {{ Add-VMDvdDrive -VM $vm -Path {iso} }} else {{ Set-VMDvdDrive -VMDvdDrive $dvd -Path {iso} }}",
                iso = quote(iso)
            )),
            None => lines.push("Get-VMDvdDrive -VM $vm | Remove-VMDvdDrive".into()),
        }
    }

    if [
        fields::AUTOMATIC_START_ACTION,
        fields::AUTOMATIC_START_DELAY,
        fields::AUTOMATIC_STOP_ACTION,
    ]
    .into_iter()
    .any(changed)
    {
        lines.push(format!(
            "Set-VM -VM $vm -AutomaticStartAction {} -AutomaticStartDelay {} -AutomaticStopAction {}",
            start_action_name(vm.automatic_start_action),
            vm.automatic_start_delay,
            stop_action_name(vm.automatic_stop_action)
        ));
    }

    if vm.generation == 2
        && (changed(fields::SECURE_BOOT) || changed(fields::SECURE_BOOT_TEMPLATE))
    {
        let mut cmd = format!(
            "Set-VMFirmware -VM $vm -EnableSecureBoot {}",
            if vm.secure_boot { "On" } else { "Off" }
        );
        if let (true, Some(template)) = (vm.secure_boot, &vm.secure_boot_template) {
            cmd.push_str(&format!(" -SecureBootTemplate {}", quote(template)));
        }
        lines.push(cmd);
    }

    if changed(fields::BOOT_DEVICE) {
        lines.push(boot_order(vm));
    }
}

fn boot_order(vm: &Vm) -> String {
    if vm.generation == 1 {
        let first = match vm.boot_device {
            BootDevice::Vhd => "IDE",
            BootDevice::Cd => "CD",
            BootDevice::NetworkAdapter => "LegacyNetworkAdapter",
            BootDevice::Floppy => "Floppy",
        };
        let mut order = vec![first];
        order.extend(
            ["IDE", "CD", "LegacyNetworkAdapter", "Floppy"]
                .into_iter()
                .filter(|d| *d != first),
        );
        let order: Vec<String> = order.iter().map(|d| quote(d)).collect();
        return format!("Set-VMBios -VM $vm -StartupOrder @({})", order.join(", "));
    }

    let device = match vm.boot_device {
        BootDevice::Cd => "Get-VMDvdDrive -VM $vm",
        BootDevice::NetworkAdapter => "Get-VMNetworkAdapter -VM $vm",
        BootDevice::Vhd | BootDevice::Floppy => "Get-VMHardDiskDrive -VM $vm",
    };
    format!(
        "$first = {device} | Select-Object -First 1\n\
         if ($null -ne $first) {{ Set-VMFirmware -VM $vm -FirstBootDevice $first }}"
    )
}
