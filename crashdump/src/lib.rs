// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash dumps of provisioned Talos clusters
//!
//! [`crashdump`] gathers a support bundle from every node of a cluster
//! (and from its Kubernetes API when that is reachable) into
//! `<state path>/support.zip`.

mod config;
mod crashdump;
pub mod kubernetes;
pub mod provision;

pub use config::Config;
pub use config::ConfigError;
pub use config::CrashdumpSettings;
pub use crashdump::crashdump;
pub use crashdump::CrashdumpContext;
pub use crashdump::CrashdumpError;
pub use crashdump::CrashdumpOutcome;
pub use crashdump::CrashdumpReport;
pub use crashdump::Degradation;
pub use crashdump::MachineConnector;
pub use crashdump::StepError;
pub use crashdump::SUPPORT_ZIP;
