//! Kubernetes resource watchers.
//!
//! Claims, pools and instances each run in a `kube_runtime::Controller` through the generic
//! [`run_controller`] helper, which owns logging and the per-object Fibonacci error backoff.
//! Two raw watch streams feed the [`PoolIndex`](crate::index::PoolIndex).

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::claim::ClaimState;
use crate::reconciler::instance::InstanceState;
use crate::reconciler::pool::PoolState;
use crds::{IPAddress, IPAddressClaim, InfobloxIPPool, InfobloxInstance};
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, WatchStreamExt, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requeue interval while waiting on another object (cluster, pool, claims)
const WAIT_REQUEUE: Duration = Duration::from_secs(30);
/// Requeue interval while a cluster or pool is paused
const PAUSED_REQUEUE: Duration = Duration::from_secs(60);
/// Periodic revalidation of pools and instances
const REVALIDATE_REQUEUE: Duration = Duration::from_secs(300);

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Backoff key of an object
fn resource_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    match obj.namespace() {
        Some(namespace) => format!("{}/{}/{}", K::kind(&()), namespace, obj.name_any()),
        None => format!("{}/{}", K::kind(&()), obj.name_any()),
    }
}

/// Run `controller` until its watch streams end.
///
/// Successful reconciles reset the object's backoff; failures requeue after the next
/// Fibonacci delay for that object.
async fn run_controller<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(obj.as_ref());
        ctx.increment_error(&key);
        let (backoff_seconds, error_count) = ctx.get_backoff_for_resource(&key);
        warn!(
            "Reconciliation of {} failed (attempt {}), retrying in {}s: {}",
            key, error_count, backoff_seconds, error
        );
        Action::requeue(Duration::from_secs(backoff_seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(obj.as_ref());
            debug!("Reconciling {}", key);
            match reconcile_fn(Arc::clone(&ctx), obj).await {
                Ok(action) => {
                    ctx.reset_error(&key);
                    Ok(action)
                }
                Err(e) => Err(e),
            }
        }
    };

    controller
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj.name),
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    Ok(())
}

fn claim_action(state: ClaimState) -> Action {
    match state {
        ClaimState::Skipped | ClaimState::PausedByClaim | ClaimState::Bound(_) | ClaimState::Released => {
            Action::await_change()
        }
        ClaimState::PausedByCluster | ClaimState::PausedByPool => Action::requeue(PAUSED_REQUEUE),
        ClaimState::WaitingForCluster | ClaimState::PoolUnresolved => Action::requeue(WAIT_REQUEUE),
    }
}

fn pool_action(state: PoolState) -> Action {
    match state {
        PoolState::Ready | PoolState::NotReady => Action::requeue(REVALIDATE_REQUEUE),
        PoolState::WaitingForClaims => Action::requeue(WAIT_REQUEUE),
        PoolState::Released => Action::await_change(),
    }
}

fn instance_action(state: InstanceState) -> Action {
    match state {
        InstanceState::Ready | InstanceState::NotReady => Action::requeue(REVALIDATE_REQUEUE),
        InstanceState::Deleted => Action::await_change(),
    }
}

/// Watches the IPAM resources and runs their reconcilers.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    claim_api: Api<IPAddressClaim>,
    address_api: Api<IPAddress>,
    pool_api: Api<InfobloxIPPool>,
    instance_api: Api<InfobloxInstance>,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        claim_api: Api<IPAddressClaim>,
        address_api: Api<IPAddress>,
        pool_api: Api<InfobloxIPPool>,
        instance_api: Api<InfobloxInstance>,
    ) -> Self {
        Self {
            reconciler,
            claim_api,
            address_api,
            pool_api,
            instance_api,
        }
    }

    /// Runs the claim controller.
    ///
    /// Changes to owned IPAddresses re-trigger their claim. Claims are reconciled one at a time
    /// so two claims can never race for the same next-available address.
    pub async fn watch_claims(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.claim_api.clone(), watcher::Config::default())
            .owns(self.address_api.clone(), watcher::Config::default())
            .with_config(ControllerConfig::default().concurrency(1));

        run_controller(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, claim| {
                Box::pin(async move {
                    let state = reconciler.reconcile_claim(&claim).await?;
                    Ok(claim_action(state))
                })
            },
            "IPAddressClaim",
        )
        .await
    }

    /// Runs the InfobloxIPPool controller.
    pub async fn watch_pools(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.pool_api.clone(), watcher::Config::default())
            .with_config(ControllerConfig::default().debounce(Duration::from_secs(5)).concurrency(3));

        run_controller(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, pool| {
                Box::pin(async move {
                    let state = reconciler.reconcile_pool(&pool).await?;
                    Ok(pool_action(state))
                })
            },
            "InfobloxIPPool",
        )
        .await
    }

    /// Runs the InfobloxInstance controller.
    pub async fn watch_instances(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.instance_api.clone(), watcher::Config::default())
            .with_config(ControllerConfig::default().debounce(Duration::from_secs(5)).concurrency(3));

        run_controller(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, instance| {
                Box::pin(async move {
                    let state = reconciler.reconcile_instance(&instance).await?;
                    Ok(instance_action(state))
                })
            },
            "InfobloxInstance",
        )
        .await
    }

    /// Feeds claim events into the lookup index.
    pub async fn index_claims(&self) -> Result<(), ControllerError> {
        let index = Arc::clone(&self.reconciler.index);
        let mut events = watcher(self.claim_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => index.handle_claim_event(event),
                Err(e) => warn!("IPAddressClaim index watch error: {}", e),
            }
        }
        Err(ControllerError::Watch("IPAddressClaim index stream ended".to_string()))
    }

    /// Feeds address events into the lookup index.
    pub async fn index_addresses(&self) -> Result<(), ControllerError> {
        let index = Arc::clone(&self.reconciler.index);
        let mut events = watcher(self.address_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => index.handle_address_event(event),
                Err(e) => warn!("IPAddress index watch error: {}", e),
            }
        }
        Err(ControllerError::Watch("IPAddress index stream ended".to_string()))
    }
}
