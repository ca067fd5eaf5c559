// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory [`MachineApi`] for tests

use crate::Error;
use crate::MachineApi;
use crate::ServiceInfo;
use crate::VersionInfo;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

/// Canned responses for a single node.
///
/// A field set to `Err` makes the corresponding call fail with that message.
/// Setting `panics` makes every call against the node panic.
#[derive(Clone, Debug)]
pub struct FakeNode {
    pub panics: bool,
    pub kubeconfig: Result<Vec<u8>, String>,
    pub version: Result<VersionInfo, String>,
    pub services: Result<Vec<ServiceInfo>, String>,
    pub dmesg: Result<Vec<u8>, String>,
    pub logs: BTreeMap<String, Vec<u8>>,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Default for FakeNode {
    fn default() -> Self {
        FakeNode {
            panics: false,
            kubeconfig: Err("kubeconfig is not available".to_string()),
            version: Ok(VersionInfo {
                tag: "v1.9.0".to_string(),
                arch: "amd64".to_string(),
                ..Default::default()
            }),
            services: Ok(Vec::new()),
            dmesg: Ok(Vec::new()),
            logs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }
}

impl FakeNode {
    /// A node running `services`, each of which logs a single line.
    pub fn with_services(services: &[&str]) -> Self {
        FakeNode {
            services: Ok(services
                .iter()
                .map(|id| ServiceInfo::running(*id))
                .collect()),
            logs: services
                .iter()
                .map(|id| (id.to_string(), format!("{id} started\n").into()))
                .collect(),
            dmesg: Ok(b"[    0.000000] Linux version 6.6\n".to_vec()),
            ..Default::default()
        }
    }
}

/// A [`MachineApi`] answering from [`FakeNode`]s keyed by node address.
#[derive(Debug, Default)]
pub struct FakeMachine {
    nodes: BTreeMap<String, FakeNode>,
    calls: AtomicUsize,
}

impl FakeMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(
        mut self,
        node: impl Into<String>,
        fake: FakeNode,
    ) -> Self {
        self.nodes.insert(node.into(), fake);
        self
    }

    /// Number of calls made against this fake so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn node(&self, node: &str) -> Result<&FakeNode, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fake = self.nodes.get(node).ok_or_else(|| Error::Api {
            node: node.to_string(),
            message: "unknown node".to_string(),
        })?;
        if fake.panics {
            panic!("fake node {node} panicked");
        }
        Ok(fake)
    }
}

fn canned<T: Clone>(
    node: &str,
    value: &Result<T, String>,
) -> Result<T, Error> {
    value
        .clone()
        .map_err(|message| Error::Api { node: node.to_string(), message })
}

#[async_trait]
impl MachineApi for FakeMachine {
    async fn kubeconfig(&self, node: &str) -> Result<Vec<u8>, Error> {
        canned(node, &self.node(node)?.kubeconfig)
    }

    async fn version(&self, node: &str) -> Result<VersionInfo, Error> {
        canned(node, &self.node(node)?.version)
    }

    async fn service_list(
        &self,
        node: &str,
    ) -> Result<Vec<ServiceInfo>, Error> {
        canned(node, &self.node(node)?.services)
    }

    async fn dmesg(&self, node: &str) -> Result<Vec<u8>, Error> {
        canned(node, &self.node(node)?.dmesg)
    }

    async fn logs(&self, node: &str, id: &str) -> Result<Vec<u8>, Error> {
        self.node(node)?.logs.get(id).cloned().ok_or_else(|| Error::Api {
            node: node.to_string(),
            message: format!("service {id:?} not found"),
        })
    }

    async fn read(&self, node: &str, path: &str) -> Result<Vec<u8>, Error> {
        self.node(node)?.files.get(path).cloned().ok_or_else(|| Error::Api {
            node: node.to_string(),
            message: format!("open {path}: no such file or directory"),
        })
    }
}
