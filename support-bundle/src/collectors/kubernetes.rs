// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster-wide collectors backed by the Kubernetes API

use super::CollectError;
use super::Collector;
use super::ResolveError;
use super::KubernetesSource;
use camino::Utf8PathBuf;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::api::LogParams;
use kube::Api;
use serde::Serialize;

const SYSTEM_NAMESPACE: &str = "kube-system";

fn resources_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("cluster").join("kubernetesResources")
}

fn logs_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("cluster").join("kubernetes-logs")
}

/// Resolves the cluster-wide collectors: resource dumps, and one log
/// collector per container of every `kube-system` pod.
pub(super) async fn cluster_collectors(
    client: kube::Client,
) -> Result<Vec<Collector>, (Vec<Collector>, ResolveError)> {
    let mut collectors = vec![
        Collector::new(
            resources_dir().join("nodes.yaml"),
            KubernetesSource::Nodes,
        ),
        Collector::new(
            resources_dir().join("systemPods.yaml"),
            KubernetesSource::SystemPods,
        ),
    ];

    let pods: Api<Pod> = Api::namespaced(client, SYSTEM_NAMESPACE);
    let pods = match pods.list(&ListParams::default()).await {
        Ok(pods) => pods,
        Err(error) => {
            return Err((
                collectors,
                ResolveError::Pods {
                    namespace: SYSTEM_NAMESPACE.to_string(),
                    error,
                },
            ))
        }
    };

    for pod in pods.items {
        let Some(name) = pod.metadata.name else {
            continue;
        };
        let containers =
            pod.spec.map(|spec| spec.containers).unwrap_or_default();
        for container in containers {
            collectors.push(Collector::new(
                logs_dir()
                    .join(SYSTEM_NAMESPACE)
                    .join(&name)
                    .join(format!("{}.log", container.name)),
                KubernetesSource::PodLogs {
                    namespace: SYSTEM_NAMESPACE.to_string(),
                    pod: name.clone(),
                    container: container.name,
                },
            ));
        }
    }
    Ok(collectors)
}

pub(super) async fn collect(
    client: kube::Client,
    source: &KubernetesSource,
    tail_lines: Option<i64>,
) -> Result<Vec<u8>, CollectError> {
    match source {
        KubernetesSource::Nodes => {
            let nodes: Api<Node> = Api::all(client);
            let list = nodes.list(&ListParams::default()).await?;
            to_yaml("nodes", &list.items)
        }
        KubernetesSource::SystemPods => {
            let pods: Api<Pod> = Api::namespaced(client, SYSTEM_NAMESPACE);
            let list = pods.list(&ListParams::default()).await?;
            to_yaml("pods", &list.items)
        }
        KubernetesSource::PodLogs { namespace, pod, container } => {
            let pods: Api<Pod> = Api::namespaced(client, namespace);
            let params = LogParams {
                container: Some(container.clone()),
                tail_lines,
                ..Default::default()
            };
            Ok(pods.logs(pod, &params).await?.into_bytes())
        }
    }
}

fn to_yaml<T: Serialize>(
    what: &'static str,
    items: &[T],
) -> Result<Vec<u8>, CollectError> {
    serde_yaml::to_string(items)
        .map(String::into_bytes)
        .map_err(|error| CollectError::Serialize { what, error })
}


#[cfg(test)]
mod test {
    use super::test_support::fake_client;
    use super::*;

    #[tokio::test]
    async fn test_cluster_collectors() {
        let collectors = cluster_collectors(fake_client()).await.unwrap();
        let paths: Vec<&str> =
            collectors.iter().map(|c| c.path().as_str()).collect();
        assert_eq!(
            paths,
            [
                "cluster/kubernetesResources/nodes.yaml",
                "cluster/kubernetesResources/systemPods.yaml",
                "cluster/kubernetes-logs/kube-system/coredns-1/coredns.log",
                "cluster/kubernetes-logs/kube-system/kube-proxy-1/kube-proxy.log",
                "cluster/kubernetes-logs/kube-system/kube-proxy-1/sidecar.log",
            ]
        );
        assert!(collectors.iter().all(|c| c.is_kubernetes()));
    }

    #[tokio::test]
    async fn test_collect_resources_and_logs() {
        let nodes = collect(fake_client(), &KubernetesSource::Nodes, None)
            .await
            .unwrap();
        let nodes = String::from_utf8(nodes).unwrap();
        assert!(nodes.contains("name: demo-controlplane-1"), "{nodes}");

        let logs = collect(
            fake_client(),
            &KubernetesSource::PodLogs {
                namespace: "kube-system".to_string(),
                pod: "coredns-1".to_string(),
                container: "coredns".to_string(),
            },
            Some(100),
        )
        .await
        .unwrap();
        let logs = String::from_utf8(logs).unwrap();
        assert!(logs.contains("container=coredns"), "{logs}");
        assert!(logs.contains("tailLines=100"), "{logs}");
    }
}
