// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kubernetes clients built from a kubeconfig served by a Talos node

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::config::KubeconfigError;
use kube::Api;
use slog::debug;
use slog::Logger;
use talos_machine_client::MachineApi;
use thiserror::Error;

/// Namespace fetched to check that a new client can reach the cluster.
const PROBE_NAMESPACE: &str = "kube-system";

/// Each variant carries the first error encountered, unwrapped.
#[derive(Debug, Error)]
pub enum KubernetesClientError {
    #[error(transparent)]
    Fetch(#[from] talos_machine_client::Error),

    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Parse(KubeconfigError),

    #[error(transparent)]
    Config(KubeconfigError),

    #[error(transparent)]
    Client(kube::Error),

    #[error(transparent)]
    Probe(kube::Error),
}

/// Produces a verified Kubernetes client for a cluster.
#[async_trait]
pub trait KubernetesConnector: Send + Sync {
    /// Returns a client for the cluster that `node` belongs to, using
    /// `machine` to reach the node.
    async fn connect(
        &self,
        log: &Logger,
        machine: &dyn MachineApi,
        node: &str,
    ) -> Result<kube::Client, KubernetesClientError>;
}

/// Builds clients from the admin kubeconfig of the cluster.
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeconfigConnector;

#[async_trait]
impl KubernetesConnector for KubeconfigConnector {
    async fn connect(
        &self,
        log: &Logger,
        machine: &dyn MachineApi,
        node: &str,
    ) -> Result<kube::Client, KubernetesClientError> {
        let kubeconfig = machine.kubeconfig(node).await?;
        let kubeconfig = String::from_utf8(kubeconfig)?;
        let kubeconfig = Kubeconfig::from_yaml(&kubeconfig)
            .map_err(KubernetesClientError::Parse)?;
        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions::default(),
        )
        .await
        .map_err(KubernetesClientError::Config)?;
        debug!(log, "built Kubernetes client config";
            "cluster_url" => %config.cluster_url);

        let client = kube::Client::try_from(config)
            .map_err(KubernetesClientError::Client)?;
        Api::<Namespace>::all(client.clone())
            .get(PROBE_NAMESPACE)
            .await
            .map_err(KubernetesClientError::Probe)?;
        Ok(client)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crashdump_test_utils::dev::test_setup_log;
    use serde_json::json;
    use talos_machine_client::testing::FakeMachine;
    use talos_machine_client::testing::FakeNode;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn serving(kubeconfig: Result<Vec<u8>, String>) -> FakeMachine {
        FakeMachine::new().with_node(
            "10.5.0.2",
            FakeNode { kubeconfig, ..Default::default() },
        )
    }

    async fn connect_with(
        log: &Logger,
        kubeconfig: Result<Vec<u8>, String>,
    ) -> KubernetesClientError {
        let machine = serving(kubeconfig);
        match KubeconfigConnector.connect(log, &machine, "10.5.0.2").await {
            Ok(_) => panic!("connect should fail"),
            Err(error) => error,
        }
    }

    /// An admin kubeconfig for a plain-HTTP API server at `server`.
    fn kubeconfig(server: &str) -> Vec<u8> {
        format!(
            "apiVersion: v1
kind: Config
clusters:
  - name: demo
    cluster:
      server: {server}
contexts:
  - name: admin@demo
    context:
      cluster: demo
      user: admin
current-context: admin@demo
users:
  - name: admin
    user: {{}}
"
        )
        .into_bytes()
    }

    /// Answers a single request with the `kube-system` namespace and
    /// returns the request line it was sent.
    async fn serve_namespace(listener: TcpListener) -> String {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the request ended");
            request.extend_from_slice(&buf[..n]);
        }

        let body = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "kube-system" },
        })
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             content-type: application/json\r\n\
             content-length: {}\r\n\
             connection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;

        String::from_utf8_lossy(&request)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_fetch_error_is_unwrapped() {
        let logctx = test_setup_log("test_fetch_error_is_unwrapped");
        let err =
            connect_with(&logctx.log, Err("permission denied".to_string()))
                .await;
        assert!(matches!(err, KubernetesClientError::Fetch(_)));
        assert_eq!(err.to_string(), "node 10.5.0.2: permission denied");
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_bad_kubeconfig() {
        let logctx = test_setup_log("test_bad_kubeconfig");
        let err = connect_with(&logctx.log, Ok(vec![0xff, 0xfe])).await;
        assert!(matches!(err, KubernetesClientError::Utf8(_)), "{err}");

        let err =
            connect_with(&logctx.log, Ok(b"clusters: [unclosed".to_vec()))
                .await;
        assert!(matches!(err, KubernetesClientError::Parse(_)), "{err}");
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_kubeconfig_without_context() {
        let logctx = test_setup_log("test_kubeconfig_without_context");
        let err = connect_with(
            &logctx.log,
            Ok(b"apiVersion: v1\nkind: Config\n".to_vec()),
        )
        .await;
        assert!(matches!(err, KubernetesClientError::Config(_)), "{err}");
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_unreachable_api_server() {
        let logctx = test_setup_log("test_unreachable_api_server");
        // Nothing listens on a port once its listener is dropped.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err =
            connect_with(&logctx.log, Ok(kubeconfig(&format!("http://{addr}"))))
                .await;
        assert!(matches!(err, KubernetesClientError::Probe(_)), "{err}");
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_connect_checks_kube_system() {
        let logctx = test_setup_log("test_connect_checks_kube_system");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_namespace(listener));

        let machine = serving(Ok(kubeconfig(&format!("http://{addr}"))));
        let connect =
            KubeconfigConnector.connect(&logctx.log, &machine, "10.5.0.2");
        if let Err(error) = connect.await {
            panic!("connect failed: {error}");
        }

        let request_line = server.await.unwrap();
        assert!(
            request_line.starts_with("GET /api/v1/namespaces/kube-system "),
            "{request_line}"
        );
        logctx.cleanup_successful();
    }
}
