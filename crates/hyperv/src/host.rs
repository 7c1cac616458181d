//! Remote host backed by PowerShell scripts.

use crate::error::Error;
use crate::parse;
use crate::script;
use crate::transport::{SshTransport, Transport};
use converge::{
    Connector, FieldChange, Host, Observed, ProbeOutcome, RemoteHost, Resource, ResourceKey,
    ResourceKind,
};

/// A Hyper-V host driven through PowerShell.
pub struct PowerShellHost<T: Transport> {
    host: String,
    transport: T,
}

impl<T: Transport> PowerShellHost<T> {
    pub fn new(host: impl Into<String>, transport: T) -> Self {
        Self {
            host: host.into(),
            transport,
        }
    }

    /// Run a script body on the host, returning stdout
    fn run(&self, key: &ResourceKey, body: &str) -> converge::Result<String> {
        let output = self
            .transport
            .run(&script::wrap(body))
            .map_err(|e| e.into_converge(&self.host, key))?;

        if !output.success() {
            let err = Error::from_output(&output.stderr, output.exit_code);
            log::debug!("{key}: {err}");
            return Err(err.into_converge(&self.host, key));
        }
        Ok(output.stdout)
    }

    fn host_key(&self) -> ResourceKey {
        ResourceKey::host(&self.host)
    }
}

fn present<V>(value: Option<V>, wrap: impl FnOnce(V) -> Observed) -> ProbeOutcome {
    value.map_or(ProbeOutcome::Absent, |v| ProbeOutcome::Observed(wrap(v)))
}

impl<T: Transport> RemoteHost for PowerShellHost<T> {
    fn probe(&self, key: &ResourceKey) -> converge::Result<ProbeOutcome> {
        let stdout = self.run(key, &script::probe(key))?;
        let outcome = match key.kind {
            ResourceKind::Host => parse::host_facts(&stdout)
                .map(|facts| ProbeOutcome::Observed(Observed::Host(facts))),
            ResourceKind::Switch => {
                parse::switch(&self.host, &stdout).map(|s| present(s, Observed::Switch))
            }
            ResourceKind::Vhd => parse::vhd(&self.host, &stdout).map(|v| present(v, Observed::Vhd)),
            ResourceKind::Vm => parse::vm(&self.host, &stdout).map(|v| present(v, Observed::Vm)),
        };
        outcome.map_err(|e| e.into_converge(&self.host, key))
    }

    fn inventory(&self, kind: ResourceKind) -> converge::Result<Vec<ResourceKey>> {
        if kind == ResourceKind::Host {
            return Ok(vec![self.host_key()]);
        }
        let host_key = self.host_key();
        let stdout = self.run(&host_key, &script::inventory(kind))?;
        let names = parse::names(&stdout).map_err(|e| e.into_converge(&self.host, &host_key))?;
        Ok(names
            .into_iter()
            .map(|name| ResourceKey::new(kind, &self.host, name))
            .collect())
    }

    fn create(&self, resource: &Resource) -> converge::Result<()> {
        self.run(&resource.key(), &script::create(resource))
            .map(drop)
    }

    fn update(&self, resource: &Resource, changes: &[FieldChange]) -> converge::Result<()> {
        self.run(&resource.key(), &script::update(resource, changes))
            .map(drop)
    }

    fn delete(&self, key: &ResourceKey) -> converge::Result<()> {
        let Some(body) = script::delete(key) else {
            return Err(converge::Error::InvalidOperation {
                key: key.clone(),
                message: "hosts are never deleted".into(),
            });
        };
        self.run(key, &body).map(drop)
    }
}

/// Connects to hosts over ssh.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(&self, host: &Host) -> converge::Result<Box<dyn RemoteHost>> {
        log::debug!("connecting to {} at {}:{}", host.name, host.address(), host.port);
        Ok(Box::new(PowerShellHost::new(
            &host.name,
            SshTransport::for_host(host),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CommandOutput;
    use converge::{Capacity, ErrorCategory, Switch, SwitchKind, Vhd};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned outputs and records every script it was given
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<crate::Result<CommandOutput>>>,
        scripts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn reply(self, stdout: &str) -> Self {
            self.push(CommandOutput {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }

        fn fail(self, stderr: &str, exit_code: i32) -> Self {
            self.push(CommandOutput {
                stdout: String::new(),
                stderr: stderr.into(),
                exit_code: Some(exit_code),
            })
        }

        fn push(self, output: CommandOutput) -> Self {
            self.responses.lock().unwrap().push_back(Ok(output));
            self
        }

        fn error(self, error: Error) -> Self {
            self.responses.lock().unwrap().push_back(Err(error));
            self
        }
    }

    impl Transport for ScriptedTransport {
        fn run(&self, script: &str) -> crate::Result<CommandOutput> {
            self.scripts.lock().unwrap().push(script.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected script")
        }
    }

    fn host(transport: ScriptedTransport) -> (PowerShellHost<ScriptedTransport>, Arc<Mutex<Vec<String>>>) {
        let scripts = Arc::clone(&transport.scripts);
        (PowerShellHost::new("hv01", transport), scripts)
    }

    #[test]
    fn test_probe_absent_switch() {
        let (remote, scripts) = host(ScriptedTransport::default().reply("null\r\n"));
        let outcome = remote.probe(&ResourceKey::switch("hv01", "LAN")).unwrap();
        assert_eq!(outcome, ProbeOutcome::Absent);
        assert!(scripts.lock().unwrap()[0].contains("Where-Object Name -eq 'LAN'"));
    }

    #[test]
    fn test_probe_vhd() {
        let (remote, _) = host(ScriptedTransport::default().reply(
            r#"{"Path":"D:\\VMs\\a.vhdx","Size":1073741824,"VhdType":"Dynamic"}"#,
        ));
        let outcome = remote
            .probe(&ResourceKey::vhd("hv01", r"D:\VMs\a.vhdx"))
            .unwrap();
        assert_eq!(
            outcome,
            ProbeOutcome::Observed(Observed::Vhd(Vhd::new(
                "hv01",
                r"D:\VMs\a.vhdx",
                Capacity::gib(1)
            )))
        );
    }

    #[test]
    fn test_probe_garbage_is_probe_parse() {
        let (remote, _) = host(ScriptedTransport::default().reply("WARNING: something"));
        let err = remote.probe(&ResourceKey::vm("hv01", "web")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ProbeParse);
    }

    #[test]
    fn test_unreachable_host() {
        let (remote, _) = host(
            ScriptedTransport::default()
                .fail("ssh: connect to host hv01 port 22: Connection timed out", 255),
        );
        let err = remote.probe(&ResourceKey::host("hv01")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timed_out_script_is_retried_as_unreachable() {
        let ssh = SshTransport::for_host(&Host::new("hv01"))
            .with_command_timeout(std::time::Duration::from_secs(5));
        let (remote, _) = host(
            ScriptedTransport::default()
                .error(ssh.timed_out())
                .error(ssh.timed_out())
                .reply("{\"HyperVInstalled\":true}"),
        );

        let err = remote.probe(&ResourceKey::host("hv01")).unwrap_err();
        assert!(matches!(err, converge::Error::HostUnreachable { .. }));
        assert!(err.is_retryable());

        let retried = converge::retry::with_retry(
            &converge::RetryConfig::new(2, std::time::Duration::from_millis(1)),
            None,
            None,
            || remote.probe(&ResourceKey::host("hv01")),
        );
        assert!(retried.unwrap().is_present());
    }

    #[test]
    fn test_create_failure_is_invalid_operation() {
        let (remote, scripts) = host(
            ScriptedTransport::default().fail("New-VMSwitch : The adapter is already bound.", 1),
        );
        let switch = Switch::new("hv01", "WAN", SwitchKind::external("Ethernet"));
        let err = remote.create(&switch.into()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidOperation);
        assert!(scripts.lock().unwrap()[0].contains("New-VMSwitch -Name 'WAN'"));
    }

    #[test]
    fn test_inventory_keys_belong_to_host() {
        let (remote, _) = host(ScriptedTransport::default().reply("[\"web\",\"db\"]"));
        let keys = remote.inventory(ResourceKind::Vm).unwrap();
        assert_eq!(
            keys,
            vec![ResourceKey::vm("hv01", "web"), ResourceKey::vm("hv01", "db")]
        );
    }

    #[test]
    fn test_host_is_never_deleted() {
        let (remote, scripts) = host(ScriptedTransport::default());
        let err = remote.delete(&ResourceKey::host("hv01")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidOperation);
        assert!(scripts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_through_scripts() {
        let graph = converge::ResourceGraph::build(vec![
            Host::new("hv01").into(),
            Switch::new("hv01", "LAN", SwitchKind::Internal).into(),
        ])
        .unwrap();

        struct OneHost(Mutex<Option<ScriptedTransport>>);
        impl Connector for OneHost {
            fn connect(&self, host: &Host) -> converge::Result<Box<dyn RemoteHost>> {
                let transport = self.0.lock().unwrap().take().expect("connected twice");
                Ok(Box::new(PowerShellHost::new(&host.name, transport)))
            }
        }

        let transport = ScriptedTransport::default()
            .reply("{\"HyperVInstalled\":true}")
            .reply("null")
            .reply("")
            .reply("[]")
            .reply("[]")
            .reply("[\"lan\"]");
        let scripts = Arc::clone(&transport.scripts);
        let connector = OneHost(Mutex::new(Some(transport)));

        let options = converge::ReconcileOptions {
            prune: true,
            ..Default::default()
        };
        let report = converge::reconcile_simple(&graph, &connector, &options).unwrap();

        assert_eq!(report.summary.created, 1);
        assert_eq!(report.summary.deleted, 0);
        assert_eq!(report.exit_code(), 0);
        let scripts = scripts.lock().unwrap();
        assert!(scripts[2].contains("New-VMSwitch -Name 'LAN' -SwitchType Internal"));
    }
}
