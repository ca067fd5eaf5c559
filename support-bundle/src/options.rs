// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration of a single support bundle

use slog::Logger;
use std::fs::File;
use std::sync::Arc;
use talos_machine_client::MachineApi;

/// One setting of a [`BundleOptions`].
///
/// Options are applied in order by [`BundleOptions::new`]; when the same
/// kind of option appears more than once, the last one wins.
pub enum BundleOption {
    /// Where the zip archive is written
    ArchiveOutput(File),
    /// Client used for every per-node collector
    MachineClient(Arc<dyn MachineApi>),
    /// Addresses of the nodes to collect from, in order
    Nodes(Vec<String>),
    /// Maximum number of collectors running at once
    NumWorkers(usize),
    /// Enables the cluster-wide Kubernetes collectors
    KubernetesClient(kube::Client),
    Log(Logger),
    /// Limit on the number of lines fetched per Kubernetes container log
    LogTailLines(Option<i64>),
}

/// Finalized configuration for [`crate::create_support_bundle`].
pub struct BundleOptions {
    pub(crate) archive: Option<File>,
    pub(crate) machine: Option<Arc<dyn MachineApi>>,
    pub(crate) nodes: Vec<String>,
    pub(crate) num_workers: usize,
    pub(crate) kubernetes: Option<kube::Client>,
    pub(crate) log: Logger,
    pub(crate) log_tail_lines: Option<i64>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        BundleOptions {
            archive: None,
            machine: None,
            nodes: Vec::new(),
            num_workers: 1,
            kubernetes: None,
            log: Logger::root(slog::Discard, slog::o!()),
            log_tail_lines: None,
        }
    }
}

impl BundleOptions {
    pub fn new(options: impl IntoIterator<Item = BundleOption>) -> Self {
        let mut result = BundleOptions::default();
        for option in options {
            result.apply(option);
        }
        result
    }

    fn apply(&mut self, option: BundleOption) {
        match option {
            BundleOption::ArchiveOutput(file) => self.archive = Some(file),
            BundleOption::MachineClient(client) => self.machine = Some(client),
            BundleOption::Nodes(nodes) => self.nodes = nodes,
            BundleOption::NumWorkers(n) => self.num_workers = n.max(1),
            BundleOption::KubernetesClient(client) => {
                self.kubernetes = Some(client)
            }
            BundleOption::Log(log) => self.log = log,
            BundleOption::LogTailLines(lines) => self.log_tail_lines = lines,
        }
    }

    pub fn has_archive(&self) -> bool {
        self.archive.is_some()
    }

    pub fn machine_client(&self) -> Option<&Arc<dyn MachineApi>> {
        self.machine.as_ref()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn kubernetes_client(&self) -> Option<&kube::Client> {
        self.kubernetes.as_ref()
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn log_tail_lines(&self) -> Option<i64> {
        self.log_tail_lines
    }
}

impl std::fmt::Debug for BundleOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleOptions")
            .field("archive", &self.archive)
            .field("machine", &self.machine.is_some())
            .field("nodes", &self.nodes)
            .field("num_workers", &self.num_workers)
            .field("kubernetes", &self.kubernetes.is_some())
            .field("log_tail_lines", &self.log_tail_lines)
            .finish()
    }
}
