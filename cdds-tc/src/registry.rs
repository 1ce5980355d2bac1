use std::collections::HashSet;

use tokio::sync::RwLock;

use crate::endpoint::TcEndpoint;

/// The set of endpoints allowed to open a TC stream.
///
/// Shared as `Arc<EndpointRegistry>` between the stream admission path and the
/// admin service.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<HashSet<TcEndpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(endpoints: impl IntoIterator<Item = TcEndpoint>) -> Self {
        Self {
            endpoints: RwLock::new(endpoints.into_iter().collect()),
        }
    }

    /// Returns `true` if the endpoint was not registered yet.
    pub async fn add(&self, endpoint: TcEndpoint) -> bool {
        self.endpoints.write().await.insert(endpoint)
    }

    /// Returns `true` if the endpoint was registered.
    pub async fn remove(&self, endpoint: &TcEndpoint) -> bool {
        self.endpoints.write().await.remove(endpoint)
    }

    pub async fn contains(&self, endpoint: &TcEndpoint) -> bool {
        self.endpoints.read().await.contains(endpoint)
    }

    pub async fn snapshot(&self) -> Vec<TcEndpoint> {
        self.endpoints.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::endpoint::{FrameVersion, GvcId};

    fn endpoint(spacecraft_id: u32) -> TcEndpoint {
        TcEndpoint::gvc_ids(
            "myProvider",
            "myGroundStation",
            "mySpacecraft",
            vec![GvcId::new(spacecraft_id, FrameVersion::TmTcSdlp, 0)],
        )
    }

    #[tokio::test]
    async fn test_add_remove_contains() {
        let registry = EndpointRegistry::new();
        assert!(registry.is_empty().await);
        assert!(!registry.contains(&endpoint(1)).await);

        assert!(registry.add(endpoint(1)).await);
        assert!(!registry.add(endpoint(1)).await);
        assert!(registry.contains(&endpoint(1)).await);
        assert!(!registry.contains(&endpoint(2)).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(&endpoint(1)).await);
        assert!(!registry.remove(&endpoint(1)).await);
        assert!(!registry.contains(&endpoint(1)).await);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let registry = EndpointRegistry::with_endpoints([endpoint(1), endpoint(2), endpoint(1)]);
        let mut ids = registry
            .snapshot()
            .await
            .into_iter()
            .map(|e| match e.link {
                crate::endpoint::TcLink::GvcIds(list) => list.gvc_id[0].spacecraft_id,
                crate::endpoint::TcLink::Cltu(_) => 0,
            })
            .collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_visibility_under_concurrent_readers() {
        let registry = Arc::new(EndpointRegistry::new());

        let readers = (0..4)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for i in 0..500 {
                        registry.contains(&endpoint(i % 50)).await;
                    }
                })
            })
            .collect::<Vec<_>>();

        let writers = (0..8u32)
            .map(|w| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        let e = endpoint(1000 + w * 100 + i);
                        registry.add(e.clone()).await;
                        assert!(registry.contains(&e).await);
                        registry.remove(&e).await;
                        assert!(!registry.contains(&e).await);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in readers.into_iter().chain(writers) {
            handle.await.unwrap();
        }
        assert!(registry.is_empty().await);
    }
}
