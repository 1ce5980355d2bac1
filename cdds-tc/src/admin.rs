use std::sync::Arc;

use tonic::{async_trait, Request, Response, Status};
use tracing::info;

use crate::{
    endpoint::{self, TcEndpoint},
    registry::EndpointRegistry,
};

pub use crate::cdds::tc::admin::{tc_endpoint_admin_server::TcEndpointAdminServer, *};

use crate::cdds::tc::admin::tc_endpoint_admin_server::TcEndpointAdmin;

fn decode_endpoint(bytes: &[u8]) -> Result<TcEndpoint, Status> {
    endpoint::decode(bytes).map_err(|e| Status::invalid_argument(e.to_string()))
}

/// Manages the authorized endpoints of a running provider.
pub struct TcEndpointAdminService {
    registry: Arc<EndpointRegistry>,
}

impl TcEndpointAdminService {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TcEndpointAdmin for TcEndpointAdminService {
    #[tracing::instrument(skip(self))]
    async fn add_endpoint(
        &self,
        request: Request<AddEndpointRequest>,
    ) -> Result<Response<AddEndpointResponse>, Status> {
        let endpoint = decode_endpoint(&request.get_ref().endpoint)?;
        info!(%endpoint, "authorizing TC endpoint");
        let newly_added = self.registry.add(endpoint).await;
        Ok(Response::new(AddEndpointResponse { newly_added }))
    }

    #[tracing::instrument(skip(self))]
    async fn remove_endpoint(
        &self,
        request: Request<RemoveEndpointRequest>,
    ) -> Result<Response<RemoveEndpointResponse>, Status> {
        let endpoint = decode_endpoint(&request.get_ref().endpoint)?;
        info!(%endpoint, "revoking TC endpoint");
        let removed = self.registry.remove(&endpoint).await;
        Ok(Response::new(RemoveEndpointResponse { removed }))
    }

    #[tracing::instrument(skip(self))]
    async fn list_endpoints(
        &self,
        _request: Request<ListEndpointsRequest>,
    ) -> Result<Response<ListEndpointsResponse>, Status> {
        let endpoints = self
            .registry
            .snapshot()
            .await
            .iter()
            .map(endpoint::encode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(ListEndpointsResponse { endpoints }))
    }
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    fn request<T>(message: T) -> Request<T> {
        Request::new(message)
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let registry = Arc::new(EndpointRegistry::new());
        let admin = TcEndpointAdminService::new(registry.clone());
        let cltu = TcEndpoint::cltu("myProvider", "myGroundStation", "mySpacecraft");
        let bytes = endpoint::encode(&cltu).unwrap();

        let added = admin
            .add_endpoint(request(AddEndpointRequest {
                endpoint: bytes.clone(),
            }))
            .await
            .unwrap();
        assert!(added.get_ref().newly_added);
        assert!(registry.contains(&cltu).await);

        let listed = admin
            .list_endpoints(request(ListEndpointsRequest {}))
            .await
            .unwrap();
        let listed = listed
            .get_ref()
            .endpoints
            .iter()
            .map(|e| endpoint::decode(e).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(listed, vec![cltu.clone()]);

        let removed = admin
            .remove_endpoint(request(RemoveEndpointRequest { endpoint: bytes }))
            .await
            .unwrap();
        assert!(removed.get_ref().removed);
        assert!(!registry.contains(&cltu).await);
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_invalid_argument() {
        let admin = TcEndpointAdminService::new(Arc::new(EndpointRegistry::new()));
        let status = admin
            .add_endpoint(request(AddEndpointRequest {
                endpoint: b"{}".to_vec(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
