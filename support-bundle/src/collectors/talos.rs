// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-node collectors backed by the Talos machine API

use super::CollectError;
use super::Collector;
use super::ResolveError;
use super::TalosSource;
use camino::Utf8PathBuf;
use std::fmt::Write;
use talos_machine_client::MachineApi;
use talos_machine_client::VersionInfo;

/// Files read from every node, with the archive entry they are stored as.
const NODE_FILES: [(&str, &str); 3] = [
    ("mounts", "/proc/mounts"),
    ("devices", "/proc/bus/pci/devices"),
    ("io", "/proc/pressure/io"),
];

/// Talos' internal controllers log here rather than to a service.
const CONTROLLER_RUNTIME: &str = "controller-runtime";

/// Resolves every collector for `node`.
///
/// On failure, the collectors that do not depend on the failed call are
/// still returned alongside the error.
pub(super) async fn node_collectors(
    machine: &dyn MachineApi,
    node: &str,
) -> Result<Vec<Collector>, (Vec<Collector>, ResolveError)> {
    let root = Utf8PathBuf::from(node);
    let mut collectors = vec![
        Collector::new(
            root.join("dmesg.log"),
            TalosSource::Dmesg { node: node.to_string() },
        ),
        Collector::new(
            root.join("talosVersion"),
            TalosSource::Version { node: node.to_string() },
        ),
        Collector::new(
            root.join(format!("{CONTROLLER_RUNTIME}.log")),
            TalosSource::ServiceLogs {
                node: node.to_string(),
                service: CONTROLLER_RUNTIME.to_string(),
            },
        ),
    ];
    collectors.extend(NODE_FILES.into_iter().map(|(name, path)| {
        Collector::new(
            root.join(name),
            TalosSource::File { node: node.to_string(), path },
        )
    }));

    let services = match machine.service_list(node).await {
        Ok(services) => services,
        Err(error) => {
            return Err((
                collectors,
                ResolveError::Services { node: node.to_string(), error },
            ))
        }
    };
    collectors.extend(services.into_iter().map(|service| {
        Collector::new(
            root.join("service-logs").join(format!("{}.log", service.id)),
            TalosSource::ServiceLogs {
                node: node.to_string(),
                service: service.id,
            },
        )
    }));
    Ok(collectors)
}

pub(super) async fn collect(
    machine: &dyn MachineApi,
    source: &TalosSource,
) -> Result<Vec<u8>, CollectError> {
    let output = match source {
        TalosSource::Dmesg { node } => machine.dmesg(node).await?,
        TalosSource::ServiceLogs { node, service } => {
            machine.logs(node, service).await?
        }
        TalosSource::Version { node } => {
            render_version(&machine.version(node).await?).into_bytes()
        }
        TalosSource::File { node, path } => machine.read(node, path).await?,
    };
    Ok(output)
}

fn render_version(version: &VersionInfo) -> String {
    let mut out = String::new();
    let rows = [
        ("Tag", version.tag.as_str()),
        ("SHA", version.sha.as_str()),
        ("Built", version.built.as_str()),
        ("Go version", version.go_version.as_str()),
    ];
    for (label, value) in rows {
        let _ = writeln!(out, "\t{:<12}{}", format!("{label}:"), value);
    }
    let _ = writeln!(
        out,
        "\t{:<12}{}/{}",
        "OS/Arch:", version.os, version.arch
    );
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use talos_machine_client::testing::FakeMachine;
    use talos_machine_client::testing::FakeNode;

    #[tokio::test]
    async fn test_collect_reads_from_node() {
        let mut node = FakeNode::with_services(&["apid"]);
        node.files.insert(
            "/proc/mounts".to_string(),
            b"overlay / overlay\n".to_vec(),
        );
        let machine = FakeMachine::new().with_node("10.5.0.2", node);

        let mounts = collect(
            &machine,
            &TalosSource::File {
                node: "10.5.0.2".to_string(),
                path: "/proc/mounts",
            },
        )
        .await
        .unwrap();
        assert_eq!(mounts, b"overlay / overlay\n");

        let logs = collect(
            &machine,
            &TalosSource::ServiceLogs {
                node: "10.5.0.2".to_string(),
                service: "apid".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(logs, b"apid started\n");

        let err = collect(
            &machine,
            &TalosSource::File {
                node: "10.5.0.2".to_string(),
                path: "/proc/pressure/io",
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CollectError::Machine(_)));
    }

    #[test]
    fn test_render_version() {
        let version = VersionInfo {
            tag: "v1.9.0".to_string(),
            sha: "abc123".to_string(),
            os: "linux".to_string(),
            arch: "arm64".to_string(),
            ..Default::default()
        };
        let rendered = render_version(&version);
        assert!(rendered.contains("\tTag:        v1.9.0\n"));
        assert!(rendered.contains("\tSHA:        abc123\n"));
        assert!(rendered.ends_with("\tOS/Arch:    linux/arm64\n"));
    }
}
