// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client for the Talos machine API
//!
//! The machine API is served by `apid` on every Talos node over mutually
//! authenticated gRPC. Requests are proxied to a target node named in the
//! `nodes` request metadata, which lets a single endpoint (usually a
//! control-plane node) answer for the whole cluster.

use async_trait::async_trait;

mod client;
mod config;
mod error;
pub mod proto;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::extract_kubeconfig;
pub use client::Client;
pub use config::ClientConfig;
pub use config::ContextConfig;
pub use config::TalosConfig;
pub use config::DEFAULT_PORT;
pub use error::Error;
pub use proto::ServiceInfo;
pub use proto::VersionInfo;

/// Operations against the machine API of a single node.
///
/// Every call is scoped to the node named by `node`, which is one of the
/// node's addresses as known to the cluster.
#[async_trait]
pub trait MachineApi: Send + Sync {
    /// Returns the admin kubeconfig for the cluster, as raw YAML.
    async fn kubeconfig(&self, node: &str) -> Result<Vec<u8>, Error>;

    /// Returns the Talos version running on the node.
    async fn version(&self, node: &str) -> Result<VersionInfo, Error>;

    /// Lists the system services registered on the node.
    async fn service_list(&self, node: &str)
        -> Result<Vec<ServiceInfo>, Error>;

    /// Returns the kernel message buffer.
    async fn dmesg(&self, node: &str) -> Result<Vec<u8>, Error>;

    /// Returns the logs of the system service `id`.
    async fn logs(&self, node: &str, id: &str) -> Result<Vec<u8>, Error>;

    /// Returns the contents of the file at `path` on the node.
    async fn read(&self, node: &str, path: &str) -> Result<Vec<u8>, Error>;
}
