// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read talosconfig: {path}")]
    ConfigIo {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },

    #[error("failed to parse talosconfig: {path}")]
    ConfigParse {
        #[source]
        error: serde_yaml::Error,
        path: Utf8PathBuf,
    },

    #[error("context {0:?} is not defined in talosconfig")]
    UnknownContext(String),

    #[error("talosconfig does not select a context")]
    NoContext,

    #[error("context {0:?} has no endpoints")]
    NoEndpoints(String),

    #[error("invalid {field} in context {context:?}")]
    Certificate {
        context: String,
        field: &'static str,
        #[source]
        error: base64::DecodeError,
    },

    #[error("invalid endpoint {endpoint:?}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        error: tonic::transport::Error,
    },

    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        error: tonic::transport::Error,
    },

    #[error("invalid node name {0:?}")]
    InvalidNode(String),

    #[error(transparent)]
    Status(#[from] tonic::Status),

    #[error("node {node}: {message}")]
    Api { node: String, message: String },

    #[error("node {0} returned no response")]
    EmptyResponse(String),

    #[error("kubeconfig archive is malformed")]
    Archive(#[source] std::io::Error),

    #[error("kubeconfig archive does not contain a kubeconfig")]
    KubeconfigNotFound,
}
