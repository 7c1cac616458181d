//! # Hyper-V
//!
//! Hyper-V implementation of the converge provider traits.
//!
//! Every operation is a short PowerShell script run on the host through a
//! [`Transport`]. The default transport is the system `ssh` client with
//! `BatchMode=yes`, so hosts must accept key authentication and run an
//! OpenSSH server whose shell can start `powershell`.
//!
//! ## Example
//!
//! ```ignore
//! use converge::{ReconcileOptions, reconcile_simple};
//! use hyperv::SshConnector;
//!
//! let report = reconcile_simple(&graph, &SshConnector, &ReconcileOptions::default())?;
//! ```
//!
//! Failures are classified from stderr and exit status (see
//! [`Error::from_output`]) and mapped onto the engine's error categories.

pub mod error;
pub mod host;
pub mod parse;
pub mod script;
pub mod transport;

pub use error::{Error, ErrorCategory, Result};
pub use host::{PowerShellHost, SshConnector};
pub use transport::{CommandOutput, SshTransport, Transport};
