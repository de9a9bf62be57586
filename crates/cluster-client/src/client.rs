//! Kubernetes-backed cluster client.

use crate::cluster_trait::{ClusterClientTrait, WatchStream};
use crate::convert::{network_policy_record, service_record};
use crate::error::ClusterError;
use crate::models::{Change, WatchEvent};
use firewall_rules::{NetworkPolicyRecord, ResourceKind, ServiceRecord};
use futures::{StreamExt, future};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::path::Path;
use tracing::{debug, warn};

/// Page size for list requests
const DEFAULT_PAGE_SIZE: u32 = 500;

/// Cluster client over a `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    page_size: u32,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Wraps an existing client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Client from the in-cluster service account or the default kubeconfig.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// Client from an explicit kubeconfig file.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, ClusterError> {
        let kubeconfig = Kubeconfig::read_from(path)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    /// Overrides the list page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Lists every object of `K` cluster-wide, following continue tokens.
    async fn list_all<K>(&self) -> Result<Vec<K>, ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = ListParams::default().limit(self.page_size);
            if let Some(token) = continue_token.as_deref() {
                params = params.continue_token(token);
            }
            let page = api.list(&params).await?;
            items.extend(page.items);

            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }
}

/// Converts objects, skipping the ones that cannot be represented.
fn convert_all<K, R>(kind: ResourceKind, items: &[K], convert: fn(&K) -> Result<R, ClusterError>) -> Vec<R> {
    items
        .iter()
        .filter_map(|item| match convert(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping {}: {}", kind, e);
                None
            }
        })
        .collect()
}

fn watch_kind<K>(client: Client, kind: ResourceKind) -> WatchStream
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::all(client);
    watcher(api, watcher::Config::default())
        .filter_map(move |event| {
            let mapped = match event {
                Ok(watcher::Event::Apply(_)) => Some(Ok(WatchEvent::new(kind, Change::Applied))),
                Ok(watcher::Event::Delete(_)) => Some(Ok(WatchEvent::new(kind, Change::Deleted))),
                Ok(watcher::Event::InitApply(_)) => Some(Ok(WatchEvent::new(kind, Change::Listed))),
                Ok(watcher::Event::InitDone) => Some(Ok(WatchEvent::new(kind, Change::Resynced))),
                Ok(watcher::Event::Init) => {
                    debug!("{} watch (re)listing", kind);
                    None
                }
                Err(e) => Some(Err(ClusterError::Stream(e.to_string()))),
            };
            future::ready(mapped)
        })
        .boxed()
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn server_version(&self) -> Result<String, ClusterError> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ClusterError> {
        let items = self.list_all::<Service>().await?;
        debug!("Listed {} services", items.len());
        Ok(convert_all(ResourceKind::Service, &items, service_record))
    }

    async fn list_network_policies(&self) -> Result<Vec<NetworkPolicyRecord>, ClusterError> {
        let items = self.list_all::<NetworkPolicy>().await?;
        debug!("Listed {} network policies", items.len());
        Ok(convert_all(ResourceKind::NetworkPolicy, &items, network_policy_record))
    }

    fn watch(&self, kind: ResourceKind) -> WatchStream {
        match kind {
            ResourceKind::Service => watch_kind::<Service>(self.client.clone(), kind),
            ResourceKind::NetworkPolicy => watch_kind::<NetworkPolicy>(self.client.clone(), kind),
        }
    }
}
