// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Writes a support bundle for a provisioned Talos cluster

use anyhow::anyhow;
use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use slog::info;
use slog::warn;
use std::sync::Arc;
use std::time::Duration;
use talos_crashdump::crashdump;
use talos_crashdump::kubernetes::KubeconfigConnector;
use talos_crashdump::provision::StateDirCluster;
use talos_crashdump::Config;
use talos_crashdump::CrashdumpContext;
use talos_crashdump::CrashdumpOutcome;
use talos_machine_client::TalosConfig;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[clap(name = "crashdump", about = "Collect a support bundle from a cluster")]
struct Args {
    /// Directory holding the state of provisioned clusters
    #[clap(long, env = "CRASHDUMP_STATE")]
    state: Utf8PathBuf,

    /// Name of the cluster
    #[clap(long)]
    cluster: String,

    /// Path to the talosconfig (default: $TALOSCONFIG, then
    /// ~/.talos/config)
    #[clap(long)]
    talosconfig: Option<Utf8PathBuf>,

    /// Context of the talosconfig to use instead of its current one
    #[clap(long)]
    context: Option<String>,

    /// TOML configuration file
    #[clap(long)]
    config: Option<Utf8PathBuf>,

    /// Give up on remaining network calls after this many seconds
    /// (overrides `timeout_secs` in the config file)
    #[clap(long)]
    timeout: Option<u64>,

    /// Keep only this many lines of each Kubernetes container log
    /// (overrides `log_tail_lines` in the config file)
    #[clap(long, value_parser = clap::value_parser!(i64).range(1..))]
    log_tail_lines: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let log = config
        .log
        .to_logger("crashdump")
        .context("failed to create logger")?;

    let cluster = StateDirCluster::load(&args.state, &args.cluster)?;

    let talosconfig_path = match args.talosconfig {
        Some(path) => path,
        None => TalosConfig::default_path()
            .ok_or_else(|| anyhow!("cannot locate a talosconfig"))?,
    };
    let machine = TalosConfig::from_file(&talosconfig_path)?
        .client_config(args.context.as_deref())
        .with_context(|| format!("talosconfig {talosconfig_path}"))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        let log = log.clone();
        let timeout = args
            .timeout
            .map(Duration::from_secs)
            .or(config.crashdump.timeout());
        async move {
            let deadline = async {
                match timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!(log, "interrupted, cancelling crashdump");
                }
                _ = deadline => {
                    warn!(log, "timed out, cancelling crashdump");
                }
            }
            cancel.cancel();
        }
    });

    let ctx = CrashdumpContext {
        log: log.clone(),
        cancel,
        machine: Arc::new(machine),
        kubernetes: Arc::new(KubeconfigConnector),
        log_tail_lines: args.log_tail_lines.or(config.crashdump.log_tail_lines),
    };
    let mut stderr = std::io::stderr();
    match crashdump(&ctx, &cluster, &mut stderr).await {
        CrashdumpOutcome::Aborted(error) => Err(error.into()),
        CrashdumpOutcome::Completed(report) => {
            info!(
                log,
                "crashdump finished";
                "degradations" => report.degradations.len(),
            );
            println!("{}", report.archive_path);
            Ok(())
        }
    }
}
