/*!
Async cluster capabilities and their blocking adapter.

Network clients are async, while the engine processes resource types and
namespaces strictly one call at a time. [`BlockingCluster`] drives an
[`AsyncCluster`] on a shared runtime and races every call against the
caller's [`CancelToken`].
*/

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

use super::{
    Applier, ClusterError, Discoverer, DiscoveryReport, GroupVersionResource, Lister,
    ObjectDocument, ResourceCoordinate,
};
use crate::cancel::CancelToken;

static GLOBAL_RT: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().clamp(2, 4))
        .enable_all()
        .build()
        .expect("Failed to create global async runtime")
});

/// Async counterpart of the [`Discoverer`], [`Lister`] and [`Applier`] capabilities.
#[async_trait]
pub trait AsyncCluster: Send + Sync {
    async fn discover(&self) -> Result<DiscoveryReport, ClusterError>;

    async fn list(
        &self,
        resource: &ResourceCoordinate,
        namespace: Option<&str>,
    ) -> Result<Vec<ObjectDocument>, ClusterError>;

    async fn create(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
    ) -> Result<ObjectDocument, ClusterError>;

    async fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<ObjectDocument, ClusterError>;

    async fn update(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
    ) -> Result<ObjectDocument, ClusterError>;
}

/// Run a future to completion on the shared runtime.
///
/// Must not be called from inside another tokio runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    GLOBAL_RT.block_on(future)
}

/// Cancel `token` when the process receives Ctrl-C.
///
/// The listener exits once the token is cancelled by other means.
pub fn cancel_on_ctrl_c(token: CancelToken) {
    GLOBAL_RT.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    tracing::warn!("Interrupt received, cancelling current operation");
                    token.cancel();
                }
            }
        }
    });
}

fn run_cancellable<F, T>(cancel: &CancelToken, future: F) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    if cancel.is_cancelled() {
        return Err(ClusterError::Cancelled);
    }
    GLOBAL_RT.block_on(async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClusterError::Cancelled),
            result = future => result,
        }
    })
}

/// Blocking wrapper exposing an [`AsyncCluster`] through the sync capabilities.
pub struct BlockingCluster<A: AsyncCluster> {
    inner: Arc<A>,
}

impl<A: AsyncCluster> BlockingCluster<A> {
    pub fn new(cluster: A) -> Self {
        Self {
            inner: Arc::new(cluster),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: AsyncCluster> Discoverer for BlockingCluster<A> {
    fn discover(&self, cancel: &CancelToken) -> Result<DiscoveryReport, ClusterError> {
        run_cancellable(cancel, self.inner.discover())
    }
}

impl<A: AsyncCluster> Lister for BlockingCluster<A> {
    fn list(
        &self,
        resource: &ResourceCoordinate,
        namespace: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Vec<ObjectDocument>, ClusterError> {
        run_cancellable(cancel, self.inner.list(resource, namespace))
    }
}

impl<A: AsyncCluster> Applier for BlockingCluster<A> {
    fn create(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError> {
        run_cancellable(cancel, self.inner.create(gvr, namespace, object))
    }

    fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError> {
        run_cancellable(cancel, self.inner.get(gvr, namespace, name))
    }

    fn update(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError> {
        run_cancellable(cancel, self.inner.update(gvr, namespace, object))
    }
}
