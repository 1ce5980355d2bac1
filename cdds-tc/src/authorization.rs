use std::sync::Arc;

use thiserror::Error;
use tonic::{
    metadata::{MetadataMap, MetadataValue},
    Status,
};
use tracing::{info, warn};

use crate::{
    endpoint::{self, CodecError, TcEndpoint},
    registry::EndpointRegistry,
};

/// Binary metadata key carrying the JSON-encoded endpoint of a TC stream.
pub const TC_ENDPOINT: &str = "tc-endpoint-bin";

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("no tc-endpoint-bin metadata presented")]
    MissingEndpoint,
    #[error("tc-endpoint-bin metadata is not valid base64")]
    InvalidMetadata,
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error("TC endpoint is not authorized: {0}")]
    Unauthorized(TcEndpoint),
}

impl From<AuthorizationError> for Status {
    fn from(_: AuthorizationError) -> Self {
        // every rejection looks the same to the caller
        Status::permission_denied("invalid tc-endpoint-bin metadata provided")
    }
}

/// Admits TC streams whose presented endpoint is in the registry.
#[derive(Debug, Clone)]
pub struct SessionAuthorizer {
    registry: Arc<EndpointRegistry>,
}

impl SessionAuthorizer {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub async fn authorize(&self, metadata: &MetadataMap) -> Result<TcEndpoint, AuthorizationError> {
        let Some(value) = metadata.get_bin(TC_ENDPOINT) else {
            warn!("rejected TC stream without endpoint metadata");
            return Err(AuthorizationError::MissingEndpoint);
        };
        let bytes = value.to_bytes().map_err(|_| {
            warn!("rejected TC stream with undecodable endpoint metadata");
            AuthorizationError::InvalidMetadata
        })?;
        self.authorize_bytes(&bytes).await
    }

    pub async fn authorize_bytes(&self, bytes: &[u8]) -> Result<TcEndpoint, AuthorizationError> {
        let endpoint = endpoint::decode(bytes).map_err(|e| {
            warn!(error = %e, "rejected TC stream with malformed endpoint");
            AuthorizationError::from(e)
        })?;
        if self.registry.contains(&endpoint).await {
            info!(%endpoint, "admitted TC stream");
            Ok(endpoint)
        } else {
            warn!(%endpoint, "rejected TC stream from unauthorized endpoint");
            Err(AuthorizationError::Unauthorized(endpoint))
        }
    }
}

/// Attaches the endpoint to outgoing call metadata.
pub fn attach_endpoint(metadata: &mut MetadataMap, endpoint: &TcEndpoint) -> Result<(), CodecError> {
    let bytes = endpoint::encode(endpoint)?;
    metadata.insert_bin(TC_ENDPOINT, MetadataValue::from_bytes(&bytes));
    Ok(())
}
