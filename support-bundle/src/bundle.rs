// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running collectors into a zip archive

use crate::collectors::Clients;
use crate::task_set::BoundedTaskSet;
use crate::BundleOptions;
use crate::CollectError;
use crate::Collector;
use crate::InlineErrorChain;
use camino::Utf8PathBuf;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use std::collections::HashMap;
use std::io::Write;
use std::time::Instant;
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

/// A collector that did not produce an entry.
#[derive(Debug)]
pub struct FailedCollector {
    pub path: Utf8PathBuf,
    pub error: CollectError,
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("no archive output configured")]
    NoArchive,

    #[error("failed to write archive entry {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        error: ZipError,
    },

    #[error("failed to finalize archive")]
    Finish(#[source] ZipError),

    #[error("{}", describe_failures(.failed))]
    Collectors { failed: Vec<FailedCollector> },
}

fn describe_failures(failed: &[FailedCollector]) -> String {
    let details = failed
        .iter()
        .map(|f| format!("{}: {}", f.path, InlineErrorChain::new(&f.error)))
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} collector(s) failed: {details}", failed.len())
}

/// What ended up in a complete bundle
#[derive(Debug, Default)]
pub struct BundleSummary {
    /// Archive entries, in the order they were written
    pub entries: Vec<Utf8PathBuf>,
}

/// Runs `collectors` and writes their output into the archive configured in
/// `options`.
///
/// At most `options.num_workers()` collectors run at once. A failing or
/// panicking collector does not stop the others: the archive is finalized with every
/// entry that was collected, and the failures are then reported as
/// [`BundleError::Collectors`]. The archive file is closed before this
/// function returns.
pub async fn create_support_bundle(
    options: BundleOptions,
    collectors: Vec<Collector>,
) -> Result<BundleSummary, BundleError> {
    let log = options.log.new(o!("component" => "SupportBundle"));
    let clients = Clients::from_options(&options);
    let archive = options.archive.ok_or(BundleError::NoArchive)?;
    let mut writer = zip::ZipWriter::new(archive);
    let entry_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    info!(
        log,
        "creating support bundle";
        "collectors" => collectors.len(),
        "workers" => options.num_workers,
    );

    let mut tasks = BoundedTaskSet::new(options.num_workers);
    let mut pending = HashMap::new();
    for collector in collectors {
        let clients = clients.clone();
        let path = collector.path().to_owned();
        let task = tasks.spawn(async move {
            let start = Instant::now();
            let result = collector.collect(&clients).await;
            (result, start.elapsed())
        });
        pending.insert(task.id(), path);
    }

    let mut summary = BundleSummary::default();
    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, result, elapsed) = match joined {
            Ok((id, (result, elapsed))) => (id, result, Some(elapsed)),
            Err(error) => (error.id(), Err(CollectError::Task(error)), None),
        };
        let Some(path) = pending.remove(&id) else {
            warn!(log, "joined an unknown collector task"; "task" => %id);
            continue;
        };
        match result {
            Ok(data) => {
                debug!(
                    log,
                    "collected";
                    "path" => %path,
                    "bytes" => data.len(),
                    "elapsed" => ?elapsed,
                );
                writer
                    .start_file(path.as_str(), entry_options)
                    .and_then(|()| Ok(writer.write_all(&data)?))
                    .map_err(|error| BundleError::Write {
                        path: path.clone(),
                        error,
                    })?;
                summary.entries.push(path);
            }
            Err(error) => {
                warn!(
                    log,
                    "collector failed";
                    "path" => %path,
                    "error" => InlineErrorChain::new(&error),
                );
                failed.push(FailedCollector { path, error });
            }
        }
    }

    writer.finish().map_err(BundleError::Finish)?;
    info!(
        log,
        "support bundle finished";
        "entries" => summary.entries.len(),
        "failed" => failed.len(),
    );

    if failed.is_empty() {
        Ok(summary)
    } else {
        failed.sort_by(|a, b| a.path.cmp(&b.path));
        Err(BundleError::Collectors { failed })
    }
}
