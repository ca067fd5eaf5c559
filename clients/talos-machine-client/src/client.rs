// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! gRPC implementation of [`MachineApi`]

use crate::proto;
use crate::ClientConfig;
use crate::Error;
use crate::MachineApi;
use crate::DEFAULT_PORT;
use async_trait::async_trait;
use slog::debug;
use slog::Logger;
use std::io::Read;
use std::net::IpAddr;
use std::net::SocketAddr;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Certificate;
use tonic::transport::Channel;
use tonic::transport::ClientTlsConfig;
use tonic::transport::Endpoint;
use tonic::transport::Identity;

/// containerd namespace that holds Talos system services
const SYSTEM_NAMESPACE: &str = "system";

/// Name of the file inside the kubeconfig archive
const KUBECONFIG_ENTRY: &str = "kubeconfig";

/// A connection to the machine API through a single endpoint.
#[derive(Clone)]
pub struct Client {
    log: Logger,
    channel: Channel,
}

impl Client {
    /// Opens an mTLS connection to the first endpoint named in `config`.
    pub async fn connect(
        log: &Logger,
        config: &ClientConfig,
    ) -> Result<Client, Error> {
        let endpoint = config
            .endpoints
            .first()
            .ok_or_else(|| Error::NoEndpoints(String::from("<explicit>")))?;
        let uri = endpoint_uri(endpoint);

        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&config.ca_pem))
            .identity(Identity::from_pem(&config.crt_pem, &config.key_pem));

        let invalid = |error| Error::InvalidEndpoint {
            endpoint: endpoint.clone(),
            error,
        };
        let channel = Endpoint::from_shared(uri.clone())
            .map_err(invalid)?
            .connect_timeout(config.connect_timeout)
            .tls_config(tls)
            .map_err(invalid)?
            .connect()
            .await
            .map_err(|error| Error::Connect { endpoint: uri.clone(), error })?;

        let log = log.new(slog::o!(
            "component" => "MachineClient",
            "endpoint" => uri,
        ));
        debug!(log, "connected to machine API");
        Ok(Client { log, channel })
    }

    fn request<T>(
        &self,
        node: &str,
        message: T,
    ) -> Result<tonic::Request<T>, Error> {
        let mut request = tonic::Request::new(message);
        let value = AsciiMetadataValue::try_from(node)
            .map_err(|_| Error::InvalidNode(node.to_string()))?;
        request.metadata_mut().insert("nodes", value);
        Ok(request)
    }

    async fn unary<Req, Resp>(
        &self,
        node: &str,
        method: &'static str,
        message: Req,
    ) -> Result<Resp, Error>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let request = self.request(node, message)?;
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("service was not ready: {e}"))
        })?;
        let codec = tonic::codec::ProstCodec::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(method), codec)
            .await?;
        Ok(response.into_inner())
    }

    /// Issues a server-streaming call and concatenates every chunk.
    async fn streaming(
        &self,
        node: &str,
        method: &'static str,
        message: impl prost::Message + Send + Sync + 'static,
    ) -> Result<Vec<u8>, Error> {
        let request = self.request(node, message)?;
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("service was not ready: {e}"))
        })?;
        let codec = tonic::codec::ProstCodec::<_, proto::Data>::default();
        let mut stream = grpc
            .server_streaming(request, PathAndQuery::from_static(method), codec)
            .await?
            .into_inner();

        let mut output = Vec::new();
        while let Some(chunk) = stream.message().await? {
            check_metadata(node, chunk.metadata.as_ref())?;
            output.extend_from_slice(&chunk.bytes);
        }
        debug!(
            self.log,
            "streamed response";
            "method" => method,
            "node" => node,
            "bytes" => output.len(),
        );
        Ok(output)
    }
}

#[async_trait]
impl MachineApi for Client {
    async fn kubeconfig(&self, node: &str) -> Result<Vec<u8>, Error> {
        let archive = self
            .streaming(
                node,
                "/machine.MachineService/Kubeconfig",
                proto::Empty {},
            )
            .await?;
        extract_kubeconfig(&archive)
    }

    async fn version(&self, node: &str) -> Result<proto::VersionInfo, Error> {
        let response: proto::VersionResponse = self
            .unary(node, "/machine.MachineService/Version", proto::Empty {})
            .await?;
        let message = response
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmptyResponse(node.to_string()))?;
        check_metadata(node, message.metadata.as_ref())?;
        message.version.ok_or_else(|| Error::EmptyResponse(node.to_string()))
    }

    async fn service_list(
        &self,
        node: &str,
    ) -> Result<Vec<proto::ServiceInfo>, Error> {
        let response: proto::ServiceListResponse = self
            .unary(
                node,
                "/machine.MachineService/ServiceList",
                proto::Empty {},
            )
            .await?;
        let mut services = Vec::new();
        for message in response.messages {
            check_metadata(node, message.metadata.as_ref())?;
            services.extend(message.services);
        }
        Ok(services)
    }

    async fn dmesg(&self, node: &str) -> Result<Vec<u8>, Error> {
        self.streaming(
            node,
            "/machine.MachineService/Dmesg",
            proto::DmesgRequest { follow: false, tail: false },
        )
        .await
    }

    async fn logs(&self, node: &str, id: &str) -> Result<Vec<u8>, Error> {
        self.streaming(
            node,
            "/machine.MachineService/Logs",
            proto::LogsRequest {
                namespace: SYSTEM_NAMESPACE.to_string(),
                id: id.to_string(),
                driver: proto::ContainerDriver::Containerd as i32,
                follow: false,
                tail_lines: -1,
            },
        )
        .await
    }

    async fn read(&self, node: &str, path: &str) -> Result<Vec<u8>, Error> {
        self.streaming(
            node,
            "/machine.MachineService/Read",
            proto::ReadRequest { path: path.to_string() },
        )
        .await
    }
}

fn check_metadata(
    node: &str,
    metadata: Option<&proto::Metadata>,
) -> Result<(), Error> {
    match metadata {
        Some(metadata) if !metadata.error.is_empty() => Err(Error::Api {
            node: node.to_string(),
            message: metadata.error.clone(),
        }),
        _ => Ok(()),
    }
}

/// Builds the URI for an endpoint, which may be a bare address, a hostname,
/// or either of those with a port.
fn endpoint_uri(endpoint: &str) -> String {
    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        return format!("https://{addr}");
    }
    if let Ok(ip) = endpoint.trim_matches(['[', ']']).parse::<IpAddr>() {
        return format!("https://{}", SocketAddr::new(ip, DEFAULT_PORT));
    }
    if endpoint.contains(':') {
        format!("https://{endpoint}")
    } else {
        format!("https://{endpoint}:{DEFAULT_PORT}")
    }
}

/// Pulls the kubeconfig out of the gzipped tarball returned by the
/// `Kubeconfig` call.
pub fn extract_kubeconfig(archive: &[u8]) -> Result<Vec<u8>, Error> {
    let decoder = flate2::read::GzDecoder::new(archive);
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries().map_err(Error::Archive)? {
        let mut entry = entry.map_err(Error::Archive)?;
        if entry.path().map_err(Error::Archive)?.as_os_str() != KUBECONFIG_ENTRY
        {
            continue;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).map_err(Error::Archive)?;
        return Ok(contents);
    }
    Err(Error::KubeconfigNotFound)
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o600);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(endpoint_uri("10.5.0.2"), "https://10.5.0.2:50000");
        assert_eq!(endpoint_uri("10.5.0.2:6443"), "https://10.5.0.2:6443");
        assert_eq!(endpoint_uri("fd00::2"), "https://[fd00::2]:50000");
        assert_eq!(endpoint_uri("[fd00::2]"), "https://[fd00::2]:50000");
        assert_eq!(endpoint_uri("[fd00::2]:1234"), "https://[fd00::2]:1234");
        assert_eq!(endpoint_uri("cp.example"), "https://cp.example:50000");
        assert_eq!(endpoint_uri("cp.example:443"), "https://cp.example:443");
    }

    #[test]
    fn test_extract_kubeconfig() {
        let archive = tarball(&[
            ("README", b"ignored"),
            ("kubeconfig", b"apiVersion: v1\nkind: Config\n"),
        ]);
        assert_eq!(
            extract_kubeconfig(&archive).unwrap(),
            b"apiVersion: v1\nkind: Config\n"
        );
    }

    #[test]
    fn test_extract_kubeconfig_missing() {
        let archive = tarball(&[("other", b"data")]);
        assert!(matches!(
            extract_kubeconfig(&archive),
            Err(Error::KubeconfigNotFound)
        ));
        assert!(matches!(
            extract_kubeconfig(b"not a gzip stream"),
            Err(Error::Archive(_))
        ));
    }

    #[test]
    fn test_check_metadata() {
        assert!(check_metadata("n", None).is_ok());
        let ok = proto::Metadata::default();
        assert!(check_metadata("n", Some(&ok)).is_ok());
        let failed = proto::Metadata {
            hostname: "n".to_string(),
            error: "permission denied".to_string(),
        };
        let err = check_metadata("10.5.0.2", Some(&failed)).unwrap_err();
        assert_eq!(err.to_string(), "node 10.5.0.2: permission denied");
    }
}
