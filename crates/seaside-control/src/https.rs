//! `HttpsControlChannel`: the one concrete [`ControlChannel`]
//! implementation, talking JSON-over-HTTP/1.1 to the control plane over a
//! mutually authenticated TLS connection (spec §6.2/§6.3). Grounded on
//! `fos-network`'s `HttpClient::request` for the connect/handshake/
//! send_request/collect-body shape, generalised from its server-auth-only
//! `rustls::ClientConfig` to one that also presents a client certificate.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::channel::{AuthResponse, ControlChannel};
use crate::error::ControlError;

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    identifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<u32>,
}

#[derive(Deserialize)]
struct AuthenticateResponse {
    public_key: String,
    token: String,
    typhoon_port: u16,
    port_port: u16,
    dns: String,
}

/// A control channel reached over mutual-TLS HTTP (spec §6.2). Holds a
/// ready-to-use `rustls::ClientConfig` so every `authenticate` call only
/// pays for the TCP+TLS handshake, not certificate parsing.
pub struct HttpsControlChannel {
    host: String,
    control_port: u16,
    tls_config: Arc<ClientConfig>,
}

impl HttpsControlChannel {
    /// Builds the client-cert-bearing TLS config from a root CA file
    /// (spec §6.3: "root CA path ... TLS verify for control channel") and
    /// the caller's own certificate/key used for mutual authentication.
    pub async fn new(
        host: impl Into<String>,
        control_port: u16,
        root_ca_path: impl AsRef<Path>,
        client_cert_path: impl AsRef<Path>,
        client_key_path: impl AsRef<Path>,
    ) -> Result<Self, ControlError> {
        let mut root_store = rustls::RootCertStore::empty();
        let ca_pem = tokio::fs::read(root_ca_path).await?;
        for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
            let cert = cert.map_err(|error| ControlError::Tls(error.to_string()))?;
            root_store
                .add(cert)
                .map_err(|error| ControlError::Tls(error.to_string()))?;
        }

        let cert_pem = tokio::fs::read(client_cert_path).await?;
        let client_certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<_, _>>()
            .map_err(|error| ControlError::Tls(error.to_string()))?;

        let key_pem = tokio::fs::read(client_key_path).await?;
        let client_key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|error| ControlError::Tls(error.to_string()))?
            .ok_or_else(|| ControlError::Tls("no private key found in client key file".into()))?;

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|error| ControlError::Tls(error.to_string()))?;

        Ok(Self { host: host.into(), control_port, tls_config: Arc::new(tls_config) })
    }

    async fn post_json(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>, ControlError> {
        let addr = format!("{}:{}", self.host, self.control_port);
        let stream = TcpStream::connect(&addr).await.map_err(|error| ControlError::Request(error.to_string()))?;

        let server_name = ServerName::try_from(self.host.clone()).map_err(|_| ControlError::Tls("invalid server name".into()))?;
        let connector = TlsConnector::from(self.tls_config.clone());
        let tls_stream = connector.connect(server_name, stream).await.map_err(|error| ControlError::Tls(error.to_string()))?;

        let io = TokioIo::new(tls_stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|error| ControlError::Request(error.to_string()))?;
        tokio::spawn(async move {
            if let Err(error) = conn.await {
                tracing::warn!(%error, "control channel connection closed with error");
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("Host", &self.host)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|error| ControlError::Request(error.to_string()))?;

        let response = sender.send_request(request).await.map_err(|error| ControlError::Request(error.to_string()))?;
        if !response.status().is_success() {
            return Err(ControlError::Request(format!("control plane returned {}", response.status())));
        }

        let collected = response.into_body().collect().await.map_err(|error| ControlError::Request(error.to_string()))?;
        Ok(collected.to_bytes().to_vec())
    }
}

#[async_trait]
impl ControlChannel for HttpsControlChannel {
    async fn authenticate(
        &self,
        identifier: &str,
        api_key: Option<&str>,
        name: Option<&str>,
        days: Option<u32>,
    ) -> Result<AuthResponse, ControlError> {
        let request = AuthenticateRequest { identifier, api_key, name, days };
        let body = serde_json::to_vec(&request).map_err(|error| ControlError::Request(error.to_string()))?;

        let response_bytes = self.post_json("/authenticate", body).await?;
        let response: AuthenticateResponse =
            serde_json::from_slice(&response_bytes).map_err(|error| ControlError::MalformedResponse(error.to_string()))?;

        let public_key_bytes = hex::decode(&response.public_key).map_err(|error| ControlError::MalformedResponse(error.to_string()))?;
        let public_key: [u8; 32] = public_key_bytes
            .try_into()
            .map_err(|_| ControlError::MalformedResponse("public_key must be 32 bytes".into()))?;
        let token = hex::decode(&response.token).map_err(|error| ControlError::MalformedResponse(error.to_string()))?;

        Ok(AuthResponse {
            public_key,
            token,
            typhoon_port: response.typhoon_port,
            port_port: response.port_port,
            dns: response.dns,
        })
    }
}
