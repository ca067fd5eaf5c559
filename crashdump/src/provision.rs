// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access to provisioned clusters
//!
//! A provisioner keeps one directory per cluster under a state root. The
//! directory holds a `state.yaml` describing the cluster's nodes, and is
//! where the support bundle for the cluster is written.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use slog::warn;
use slog::Logger;
use std::net::IpAddr;
use thiserror::Error;

const STATE_FILE: &str = "state.yaml";

/// A cluster created by a provisioner.
pub trait Cluster: Send + Sync {
    /// Directory holding the cluster's on-disk state.
    fn state_path(&self) -> Result<Utf8PathBuf, ProvisionError>;

    fn info(&self) -> &ClusterInfo;
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterInfo {
    pub cluster_name: String,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MachineType,
    #[serde(default)]
    pub ips: Vec<IpAddr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    Controlplane,
    Worker,
}

impl ClusterInfo {
    /// Returns the first address of every node, in inventory order.
    ///
    /// Nodes without any address cannot be reached and are left out.
    pub fn node_addresses(&self, log: &Logger) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|node| match node.ips.first() {
                Some(ip) => Some(ip.to_string()),
                None => {
                    warn!(
                        log,
                        "skipping node without an address";
                        "node" => &node.name,
                    );
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to read cluster state: {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to parse cluster state: {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        error: serde_yaml::Error,
    },

    #[error("cluster state directory is not accessible: {path}")]
    StateDir {
        path: Utf8PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("cluster state path is not a directory: {0}")]
    NotADirectory(Utf8PathBuf),
}

/// A cluster whose state lives at `<state root>/<cluster name>`.
#[derive(Debug)]
pub struct StateDirCluster {
    state_dir: Utf8PathBuf,
    info: ClusterInfo,
}

impl StateDirCluster {
    /// Loads the cluster named `cluster_name` from `state_root`.
    pub fn load(
        state_root: &Utf8Path,
        cluster_name: &str,
    ) -> Result<StateDirCluster, ProvisionError> {
        let state_dir = state_root.join(cluster_name);
        let path = state_dir.join(STATE_FILE);
        let data = std::fs::read_to_string(&path).map_err(|error| {
            ProvisionError::Read { path: path.clone(), error }
        })?;
        let info = serde_yaml::from_str(&data)
            .map_err(|error| ProvisionError::Parse { path, error })?;
        Ok(StateDirCluster { state_dir, info })
    }
}

impl Cluster for StateDirCluster {
    fn state_path(&self) -> Result<Utf8PathBuf, ProvisionError> {
        let metadata = std::fs::metadata(&self.state_dir).map_err(|error| {
            ProvisionError::StateDir { path: self.state_dir.clone(), error }
        })?;
        if !metadata.is_dir() {
            return Err(ProvisionError::NotADirectory(self.state_dir.clone()));
        }
        Ok(self.state_dir.clone())
    }

    fn info(&self) -> &ClusterInfo {
        &self.info
    }
}
