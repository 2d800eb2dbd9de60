//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! TLS credentials and handshakes

use crate::channel::{BoxStream, Duplex};
use crate::{ChardevError, Result};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Which side of the handshake credentials are for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsEndpoint {
    /// Listening sockets
    Server,
    /// Connecting sockets
    Client,
}

impl TlsEndpoint {
    /// Lowercase name
    pub fn name(self) -> &'static str {
        match self {
            TlsEndpoint::Server => "server",
            TlsEndpoint::Client => "client",
        }
    }
}

impl fmt::Display for TlsEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
enum TlsConfig {
    Server(Arc<ServerConfig>),
    Client(Arc<ClientConfig>),
}

/// Named TLS configuration for one endpoint role
///
/// Shared between every socket chardev that names it.
#[derive(Clone)]
pub struct TlsCredentials {
    name: String,
    config: TlsConfig,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn pem_error(what: &str, err: &rustls_pki_types::pem::Error) -> ChardevError {
    ChardevError::config("tls-creds", format!("invalid {what}: {err:?}"))
}

impl TlsCredentials {
    /// Wrap an existing server configuration
    pub fn server(name: impl Into<String>, config: Arc<ServerConfig>) -> Self {
        Self {
            name: name.into(),
            config: TlsConfig::Server(config),
        }
    }

    /// Wrap an existing client configuration
    pub fn client(name: impl Into<String>, config: Arc<ClientConfig>) -> Self {
        Self {
            name: name.into(),
            config: TlsConfig::Client(config),
        }
    }

    /// Server credentials from a PEM certificate chain and private key
    pub fn server_from_pem(name: impl Into<String>, cert_chain: &[u8], key: &[u8]) -> Result<Self> {
        let certs = CertificateDer::pem_slice_iter(cert_chain)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| pem_error("certificate", &err))?;
        if certs.is_empty() {
            return Err(ChardevError::config("tls-creds", "no certificate found"));
        }
        let key = PrivateKeyDer::from_pem_slice(key).map_err(|err| pem_error("private key", &err))?;
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Self::server(name, Arc::new(config)))
    }

    /// Client credentials trusting the PEM certificates in `ca`
    pub fn client_from_pem(name: impl Into<String>, ca: &[u8]) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_slice_iter(ca) {
            roots.add(cert.map_err(|err| pem_error("CA certificate", &err))?)?;
        }
        if roots.is_empty() {
            return Err(ChardevError::config("tls-creds", "no CA certificate found"));
        }
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self::client(name, Arc::new(config)))
    }

    /// Credentials id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role these credentials serve
    pub fn endpoint(&self) -> TlsEndpoint {
        match self.config {
            TlsConfig::Server(_) => TlsEndpoint::Server,
            TlsConfig::Client(_) => TlsEndpoint::Client,
        }
    }

    /// Fail unless the credentials match a listening (`server`) or connecting socket
    pub(crate) fn check_endpoint(&self, server: bool) -> Result<()> {
        let wanted = if server {
            TlsEndpoint::Server
        } else {
            TlsEndpoint::Client
        };
        if self.endpoint() == wanted {
            Ok(())
        } else {
            Err(ChardevError::TlsEndpointMismatch {
                name: self.name.clone(),
                endpoint: self.endpoint().name(),
            })
        }
    }

    /// Run the handshake over `stream` in this endpoint's role
    pub(crate) async fn handshake<S: Duplex>(&self, stream: S, host: &str) -> io::Result<BoxStream> {
        match self.config {
            TlsConfig::Server(ref config) => {
                let stream = TlsAcceptor::from(config.clone()).accept(stream).await?;
                Ok(Box::new(stream))
            }
            TlsConfig::Client(ref config) => {
                let name = ServerName::try_from(host.to_string())
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
                let stream = TlsConnector::from(config.clone())
                    .connect(name, stream)
                    .await?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint())
            .finish()
    }
}
