// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building the support bundle of a provisioned cluster

use crate::kubernetes::KubernetesClientError;
use crate::kubernetes::KubernetesConnector;
use crate::provision::Cluster;
use crate::provision::ProvisionError;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use display_error_chain::DisplayErrorChain;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use talos_machine_client::Client;
use talos_machine_client::ClientConfig;
use talos_machine_client::MachineApi;
use talos_support_bundle::collectors_for_options;
use talos_support_bundle::create_support_bundle;
use talos_support_bundle::BundleError;
use talos_support_bundle::BundleOption;
use talos_support_bundle::BundleOptions;
use talos_support_bundle::InlineErrorChain;
use talos_support_bundle::PartialCollectors;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Name of the archive within the cluster's state directory.
pub const SUPPORT_ZIP: &str = "support.zip";

/// Collectors run one at a time.
const NUM_WORKERS: usize = 1;

/// Opens connections to the machine API of a cluster.
#[async_trait]
pub trait MachineConnector: Send + Sync {
    async fn connect(
        &self,
        log: &Logger,
    ) -> Result<Arc<dyn MachineApi>, talos_machine_client::Error>;
}

#[async_trait]
impl MachineConnector for ClientConfig {
    async fn connect(
        &self,
        log: &Logger,
    ) -> Result<Arc<dyn MachineApi>, talos_machine_client::Error> {
        let client = Client::connect(log, self).await?;
        Ok(Arc::new(client))
    }
}

/// Everything a crashdump runs with besides the cluster itself.
#[derive(Clone)]
pub struct CrashdumpContext {
    pub log: Logger,
    /// Cancels every remaining network step once triggered
    pub cancel: CancellationToken,
    pub machine: Arc<dyn MachineConnector>,
    pub kubernetes: Arc<dyn KubernetesConnector>,
    /// Lines kept from the end of each Kubernetes container log
    pub log_tail_lines: Option<i64>,
}

/// A failure that stops the crashdump before any network call is made.
#[derive(Debug, Error)]
pub enum CrashdumpError {
    #[error("error getting state path")]
    StatePath(#[source] ProvisionError),

    #[error("open {path}")]
    CreateArchive {
        path: Utf8PathBuf,
        #[source]
        error: std::io::Error,
    },
}

/// Why a step that the crashdump continues past did not succeed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("no machine API client is available")]
    NoMachineClient,

    #[error(transparent)]
    Machine(#[from] talos_machine_client::Error),

    #[error(transparent)]
    Kubernetes(#[from] KubernetesClientError),

    #[error(transparent)]
    Collectors(#[from] PartialCollectors),

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

/// A step that failed without stopping the crashdump.
#[derive(Debug)]
pub enum Degradation {
    /// No machine API client: per-node collectors are unavailable.
    MachineClient(StepError),
    /// The cluster has no addressable node to ask for a kubeconfig.
    NoNodes,
    /// No Kubernetes client: cluster-wide collectors are unavailable.
    Kubernetes(StepError),
    /// Some collectors could not be resolved.
    CollectorResolution(StepError),
    /// The bundle is incomplete or was not written.
    BundleCreation(StepError),
}

#[derive(Debug)]
pub struct CrashdumpReport {
    pub archive_path: Utf8PathBuf,
    /// Addresses of the nodes collected from, in inventory order
    pub nodes: Vec<String>,
    /// Whether the cluster-wide Kubernetes collectors were enabled
    pub kubernetes: bool,
    pub degradations: Vec<Degradation>,
}

impl CrashdumpReport {
    /// True if every step succeeded.
    pub fn is_complete(&self) -> bool {
        self.degradations.is_empty()
    }
}

#[derive(Debug)]
pub enum CrashdumpOutcome {
    Aborted(CrashdumpError),
    Completed(CrashdumpReport),
}

/// Writes a support bundle for `cluster` to `<state path>/support.zip`.
///
/// Each failure is also reported as a single line on `out`. Failing to
/// resolve the state path or to create the archive aborts the crashdump.
/// Every later failure is recorded as a [`Degradation`] and the crashdump
/// carries on with whatever is left; a Kubernetes client that cannot be
/// built is not reported on `out`.
pub async fn crashdump(
    ctx: &CrashdumpContext,
    cluster: &dyn Cluster,
    out: &mut (dyn Write + Send),
) -> CrashdumpOutcome {
    let info = cluster.info();
    let log = ctx.log.new(o!(
        "component" => "Crashdump",
        "cluster" => info.cluster_name.clone(),
    ));

    let state_path = match cluster.state_path() {
        Ok(path) => path,
        Err(error) => {
            report(out, "error getting state path", &error);
            return CrashdumpOutcome::Aborted(CrashdumpError::StatePath(
                error,
            ));
        }
    };

    let archive_path = state_path.join(SUPPORT_ZIP);
    let archive = match std::fs::File::create(&archive_path) {
        Ok(file) => file,
        Err(error) => {
            let error =
                CrashdumpError::CreateArchive { path: archive_path, error };
            report(out, "error creating crashdump file", &error);
            return CrashdumpOutcome::Aborted(error);
        }
    };
    info!(log, "creating crashdump"; "path" => %archive_path);

    let mut degradations = Vec::new();

    let machine = match cancellable(&ctx.cancel, ctx.machine.connect(&log))
        .await
    {
        Ok(machine) => Some(machine),
        Err(error) => {
            report(out, "error creating crashdump", &error);
            degradations.push(Degradation::MachineClient(error));
            None
        }
    };

    let nodes = info.node_addresses(&log);
    let controlplane = nodes.first().cloned();

    let mut options = vec![
        BundleOption::ArchiveOutput(archive),
        BundleOption::Nodes(nodes.clone()),
        BundleOption::NumWorkers(NUM_WORKERS),
        BundleOption::Log(log.clone()),
        BundleOption::LogTailLines(ctx.log_tail_lines),
    ];
    if let Some(machine) = &machine {
        options.push(BundleOption::MachineClient(Arc::clone(machine)));
    }

    let mut kubernetes = false;
    match (machine.as_deref(), controlplane) {
        (_, None) => {
            warn!(log, "cluster has no addressable nodes");
            degradations.push(Degradation::NoNodes);
        }
        (None, Some(_)) => {
            degradations.push(Degradation::Kubernetes(
                StepError::NoMachineClient,
            ));
        }
        (Some(machine), Some(controlplane)) => {
            let connect =
                ctx.kubernetes.connect(&log, machine, &controlplane);
            match cancellable(&ctx.cancel, connect).await {
                Ok(client) => {
                    options.push(BundleOption::KubernetesClient(client));
                    kubernetes = true;
                }
                Err(error) => {
                    debug!(
                        log,
                        "continuing without a Kubernetes client";
                        "endpoint" => &controlplane,
                        "error" => %DisplayErrorChain::new(&error),
                    );
                    degradations.push(Degradation::Kubernetes(error));
                }
            }
        }
    }

    let options = BundleOptions::new(options);

    let collectors = match cancellable(
        &ctx.cancel,
        collectors_for_options(&options),
    )
    .await
    {
        Ok(collectors) => collectors,
        Err(error) => {
            report(out, "error creating crashdump collector options", &error);
            let collectors = match &error {
                StepError::Collectors(partial) => partial.collectors.clone(),
                _ => Vec::new(),
            };
            degradations.push(Degradation::CollectorResolution(error));
            collectors
        }
    };

    match cancellable(&ctx.cancel, create_support_bundle(options, collectors))
        .await
    {
        Ok(summary) => {
            info!(
                log,
                "crashdump written";
                "path" => %archive_path,
                "entries" => summary.entries.len(),
            );
        }
        Err(error) => {
            report(out, "error creating crashdump", &error);
            degradations.push(Degradation::BundleCreation(error));
        }
    }

    CrashdumpOutcome::Completed(CrashdumpReport {
        archive_path,
        nodes,
        kubernetes,
        degradations,
    })
}

/// Runs `step` unless `cancel` fires first.
async fn cancellable<T, E, F>(
    cancel: &CancellationToken,
    step: F,
) -> Result<T, StepError>
where
    F: Future<Output = Result<T, E>>,
    StepError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StepError::Cancelled),
        result = step => result.map_err(StepError::from),
    }
}

fn report(
    out: &mut (dyn Write + Send),
    what: &str,
    error: &(dyn std::error::Error + 'static),
) {
    // The line is best effort; there is nowhere left to report to.
    let _ = writeln!(out, "{what}: {}", InlineErrorChain::new(error));
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_cancellable() {
        let cancel = CancellationToken::new();
        let ok = cancellable(&cancel, async {
            Ok::<_, talos_machine_client::Error>(3)
        })
        .await;
        assert_eq!(ok.unwrap(), 3);

        cancel.cancel();
        let cancelled = cancellable(&cancel, async {
            Ok::<_, talos_machine_client::Error>(3)
        })
        .await;
        assert!(matches!(cancelled, Err(StepError::Cancelled)));
    }

    #[test]
    fn test_archive_error_names_path() {
        let error = CrashdumpError::CreateArchive {
            path: Utf8PathBuf::from("/state/demo/support.zip"),
            error: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let mut out = Vec::new();
        report(&mut out, "error creating crashdump file", &error);
        let line = String::from_utf8(out).unwrap();
        assert!(
            line.starts_with(
                "error creating crashdump file: \
                 open /state/demo/support.zip: "
            ),
            "{line}"
        );
    }

    #[test]
    fn test_report_is_one_line() {
        let error = StepError::Machine(talos_machine_client::Error::Api {
            node: "10.5.0.2".to_string(),
            message: "unavailable".to_string(),
        });
        let mut out = Vec::new();
        report(&mut out, "error creating crashdump", &error);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "error creating crashdump: node 10.5.0.2: unavailable\n"
        );
    }
}
