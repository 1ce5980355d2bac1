use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// Trust anchor, leaf certificate and private key as PEM files.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub ca_certificate: PathBuf,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

impl TlsFiles {
    /// Returns `None` unless all three paths are given.
    pub fn from_options(
        ca_certificate: Option<PathBuf>,
        certificate: Option<PathBuf>,
        private_key: Option<PathBuf>,
    ) -> Option<Self> {
        Some(Self {
            ca_certificate: ca_certificate?,
            certificate: certificate?,
            private_key: private_key?,
        })
    }

    pub async fn load(&self) -> Result<TlsCredentials> {
        let ca = read_pem("CA certificate", &self.ca_certificate).await?;
        let cert = read_pem("certificate", &self.certificate).await?;
        let key = read_pem("private key", &self.private_key).await?;
        Ok(TlsCredentials::from_pem(ca, cert, key))
    }
}

async fn read_pem(what: &str, path: &Path) -> Result<Vec<u8>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(anyhow!("{} file not found: {}", what, path.display()));
    }
    tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("failed to read {} {}: {}", what, path.display(), e))
}

#[derive(Debug, Clone)]
pub struct TlsCredentials {
    ca: Certificate,
    identity: Identity,
}

impl TlsCredentials {
    pub fn from_pem(
        ca_certificate: impl AsRef<[u8]>,
        certificate: impl AsRef<[u8]>,
        private_key: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            ca: Certificate::from_pem(ca_certificate),
            identity: Identity::from_pem(certificate, private_key),
        }
    }

    /// Server side: client certificates signed by the CA are required.
    pub fn server_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity.clone())
            .client_ca_root(self.ca.clone())
    }

    pub fn client_config(&self, domain: impl Into<String>) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .ca_certificate(self.ca.clone())
            .identity(self.identity.clone())
            .domain_name(domain)
    }
}
