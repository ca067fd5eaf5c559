// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Selection and execution of the units of data in a bundle

use crate::BundleOptions;
use crate::InlineErrorChain;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use slog::debug;
use slog::warn;
use std::sync::Arc;
use talos_machine_client::MachineApi;
use thiserror::Error;

pub(crate) mod kubernetes;
mod talos;

/// Gathers one entry of the support bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collector {
    path: Utf8PathBuf,
    source: Source,
}

/// Where a [`Collector`] reads its data from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Talos(TalosSource),
    Kubernetes(KubernetesSource),
}

/// Data read from a single node through the Talos machine API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TalosSource {
    /// Kernel message buffer of a node
    Dmesg { node: String },
    /// Logs of a Talos system service (or of `controller-runtime`)
    ServiceLogs { node: String, service: String },
    /// Talos version of a node
    Version { node: String },
    /// A file read from a node's filesystem
    File { node: String, path: &'static str },
}

/// Data read from the cluster's Kubernetes API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KubernetesSource {
    /// Every Kubernetes node object
    Nodes,
    /// Every pod in the `kube-system` namespace
    SystemPods,
    /// Logs of one container of a pod
    PodLogs { namespace: String, pod: String, container: String },
}

impl From<TalosSource> for Source {
    fn from(source: TalosSource) -> Self {
        Source::Talos(source)
    }
}

impl From<KubernetesSource> for Source {
    fn from(source: KubernetesSource) -> Self {
        Source::Kubernetes(source)
    }
}

impl Collector {
    pub(crate) fn new(
        path: impl Into<Utf8PathBuf>,
        source: impl Into<Source>,
    ) -> Self {
        Collector { path: path.into(), source: source.into() }
    }

    /// Path of the entry within the archive
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Whether the collector reads from the Kubernetes API
    pub fn is_kubernetes(&self) -> bool {
        matches!(self.source, Source::Kubernetes(_))
    }

    pub(crate) async fn collect(
        &self,
        clients: &Clients,
    ) -> Result<Vec<u8>, CollectError> {
        match &self.source {
            Source::Talos(source) => {
                let machine = clients
                    .machine
                    .as_deref()
                    .ok_or(CollectError::NoMachineClient)?;
                talos::collect(machine, source).await
            }
            Source::Kubernetes(source) => {
                let client = clients
                    .kubernetes
                    .clone()
                    .ok_or(CollectError::NoKubernetesClient)?;
                kubernetes::collect(client, source, clients.tail_lines).await
            }
        }
    }
}

/// The clients collectors run against, shared by every collector task.
#[derive(Clone)]
pub(crate) struct Clients {
    pub machine: Option<Arc<dyn MachineApi>>,
    pub kubernetes: Option<kube::Client>,
    pub tail_lines: Option<i64>,
}

impl Clients {
    pub fn from_options(options: &BundleOptions) -> Clients {
        Clients {
            machine: options.machine.clone(),
            kubernetes: options.kubernetes.clone(),
            tail_lines: options.log_tail_lines,
        }
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no Talos API client is configured")]
    NoMachineClient,

    #[error("no Kubernetes client is configured")]
    NoKubernetesClient,

    #[error(transparent)]
    Machine(#[from] talos_machine_client::Error),

    #[error(transparent)]
    Kubernetes(#[from] kube::Error),

    #[error("failed to serialize {what}")]
    Serialize {
        what: &'static str,
        #[source]
        error: serde_yaml::Error,
    },

    #[error("collector task failed")]
    Task(#[source] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no Talos API client is configured")]
    NoMachineClient,

    #[error("failed to list services on node {node}")]
    Services {
        node: String,
        #[source]
        error: talos_machine_client::Error,
    },

    #[error("failed to list pods in namespace {namespace}")]
    Pods {
        namespace: String,
        #[source]
        error: kube::Error,
    },
}

/// Returned when some collectors could not be resolved.
///
/// `collectors` holds everything that did resolve; callers may proceed with
/// it.
#[derive(Debug, Error)]
#[error("{}", describe_errors(.errors))]
pub struct PartialCollectors {
    pub collectors: Vec<Collector>,
    pub errors: Vec<ResolveError>,
}

fn describe_errors(errors: &[ResolveError]) -> String {
    errors
        .iter()
        .map(|error| InlineErrorChain::new(error).to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolves the collectors that apply to `options`.
///
/// Per-node collectors require a Talos API client; cluster-wide collectors
/// require a Kubernetes client. Enumeration continues past failures, which
/// are reported together with the collectors that did resolve.
pub async fn collectors_for_options(
    options: &BundleOptions,
) -> Result<Vec<Collector>, PartialCollectors> {
    let log = &options.log;
    let mut collectors = Vec::new();
    let mut errors = Vec::new();

    match options.machine.as_deref() {
        Some(machine) => {
            for node in &options.nodes {
                match talos::node_collectors(machine, node).await {
                    Ok(found) => collectors.extend(found),
                    Err((found, error)) => {
                        warn!(
                            log,
                            "failed to resolve node collectors";
                            "node" => node,
                            "error" => InlineErrorChain::new(&error),
                        );
                        collectors.extend(found);
                        errors.push(error);
                    }
                }
            }
        }
        None => errors.push(ResolveError::NoMachineClient),
    }

    if let Some(client) = &options.kubernetes {
        match kubernetes::cluster_collectors(client.clone()).await {
            Ok(found) => collectors.extend(found),
            Err((found, error)) => {
                warn!(
                    log,
                    "failed to resolve Kubernetes collectors";
                    "error" => InlineErrorChain::new(&error),
                );
                collectors.extend(found);
                errors.push(error);
            }
        }
    }

    debug!(
        log,
        "resolved collectors";
        "collectors" => collectors.len(),
        "errors" => errors.len(),
    );
    if errors.is_empty() {
        Ok(collectors)
    } else {
        Err(PartialCollectors { collectors, errors })
    }
}
