//! Unit tests for the InfobloxIPPool reconciler

#[cfg(test)]
mod tests {
    use crate::config::ControllerConfig;
    use crate::error::ControllerError;
    use crate::index::PoolIndex;
    use crate::reconciler::Reconciler;
    use crate::reconciler::pool::PoolState;
    use crate::test_utils::*;
    use crds::*;
    use infoblox_client::{MockInfobloxClient, MockOperation};
    use std::sync::Arc;

    const NS: &str = "default";

    fn setup() -> (MockKubeClient, MockInfobloxClient) {
        let kube = MockKubeClient::new();
        kube.add_instance(&create_test_instance("ib", "ib-creds"));
        kube.add_secret(OPERATOR_NAMESPACE, "ib-creds", create_test_secret_data("admin", "secret"));
        let grid = create_test_grid(&["10.0.0.0/24", "10.0.1.0/24"]);
        (kube, grid)
    }

    /// Reconciler sharing `index` so tests can drive it directly
    fn reconciler_with_index(kube: &MockKubeClient, grid: &MockInfobloxClient, index: Arc<PoolIndex>) -> Reconciler {
        Reconciler::new(
            Arc::new(kube.clone()),
            Arc::new(mock_client_manager(grid)),
            index,
            ControllerConfig {
                watch_namespace: None,
                operator_namespace: OPERATOR_NAMESPACE.to_string(),
                watch_filter: None,
            },
        )
    }

    fn add_pool(kube: &MockKubeClient, subnets: &[(&str, Option<&str>)]) -> InfobloxIPPool {
        let pool = create_test_pool("pool", NS, "ib", subnets);
        kube.add_pool(&pool);
        pool
    }

    /// Stored pool marked for deletion, carrying the protection finalizer
    fn deleting_pool(kube: &MockKubeClient) -> InfobloxIPPool {
        let mut pool = create_test_pool("pool", NS, "ib", &[("10.0.0.0/24", None)]);
        pool.metadata.finalizers = Some(vec![PROTECT_POOL_FINALIZER.to_string()]);
        pool.metadata.deletion_timestamp = deletion_timestamp();
        kube.add_pool(&pool);
        pool
    }

    fn ready_condition(kube: &MockKubeClient) -> Condition {
        kube.pool(NS, "pool")
            .and_then(|p| p.get_condition(READY_CONDITION).cloned())
            .expect("Ready condition set")
    }

    #[tokio::test]
    async fn test_ready_pool() {
        let (kube, grid) = setup();
        let pool = add_pool(&kube, &[("10.0.0.0/24", Some("10.0.0.1")), ("10.0.1.0/24", None)]);
        let reconciler = create_test_reconciler(&kube, &grid);

        let state = reconciler.reconcile_pool(&pool).await.unwrap();

        assert_eq!(state, PoolState::Ready);
        let stored = kube.pool(NS, "pool").unwrap();
        assert_eq!(stored.metadata.finalizers, Some(vec![PROTECT_POOL_FINALIZER.to_string()]));
        let condition = ready_condition(&kube);
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason.as_deref(), Some(READY_REASON));
    }

    #[tokio::test]
    async fn test_missing_network() {
        let (kube, grid) = setup();
        let pool = add_pool(&kube, &[("10.0.0.0/24", None), ("10.9.0.0/24", None)]);
        let reconciler = create_test_reconciler(&kube, &grid);

        let state = reconciler.reconcile_pool(&pool).await.unwrap();

        assert_eq!(state, PoolState::NotReady);
        let condition = ready_condition(&kube);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason.as_deref(), Some(NETWORK_NOT_FOUND_REASON));
        assert!(condition.message.unwrap().contains("10.9.0.0/24"));
    }

    #[tokio::test]
    async fn test_invalid_subnet() {
        let (kube, grid) = setup();
        let pool = add_pool(&kube, &[("not-a-cidr", None)]);
        let reconciler = create_test_reconciler(&kube, &grid);

        let err = reconciler.reconcile_pool(&pool).await.unwrap_err();

        assert!(matches!(err, ControllerError::InvalidConfig(_)));
        assert_eq!(ready_condition(&kube).reason.as_deref(), Some(NETWORK_NOT_FOUND_REASON));
    }

    #[tokio::test]
    async fn test_missing_network_view() {
        let (kube, grid) = setup();
        let mut pool = create_test_pool("pool", NS, "ib", &[("10.0.0.0/24", None)]);
        pool.spec.network_view = Some("lab".to_string());
        kube.add_pool(&pool);
        let reconciler = create_test_reconciler(&kube, &grid);

        let state = reconciler.reconcile_pool(&pool).await.unwrap();

        assert_eq!(state, PoolState::NotReady);
        assert_eq!(ready_condition(&kube).reason.as_deref(), Some(NETWORK_VIEW_NOT_FOUND_REASON));
    }

    #[tokio::test]
    async fn test_missing_dns_view() {
        let (kube, grid) = setup();
        let mut pool = create_test_pool("pool", NS, "ib", &[("10.0.0.0/24", None)]);
        pool.spec.dns_view = Some("internal".to_string());
        kube.add_pool(&pool);
        let reconciler = create_test_reconciler(&kube, &grid);

        let state = reconciler.reconcile_pool(&pool).await.unwrap();

        assert_eq!(state, PoolState::NotReady);
        assert_eq!(ready_condition(&kube).reason.as_deref(), Some(DNS_VIEW_NOT_FOUND_REASON));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let kube = MockKubeClient::new();
        kube.add_instance(&create_test_instance("ib", "ib-creds"));
        let grid = create_test_grid(&["10.0.0.0/24"]);
        let pool = add_pool(&kube, &[("10.0.0.0/24", None)]);
        let reconciler = create_test_reconciler(&kube, &grid);

        assert!(reconciler.reconcile_pool(&pool).await.is_err());
        assert_eq!(ready_condition(&kube).reason.as_deref(), Some(AUTHENTICATION_FAILED_REASON));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_retried() {
        let (kube, grid) = setup();
        grid.fail_on(MockOperation::GetNetworkView, "grid unavailable");
        let pool = add_pool(&kube, &[("10.0.0.0/24", None)]);
        let reconciler = create_test_reconciler(&kube, &grid);

        let err = reconciler.reconcile_pool(&pool).await.unwrap_err();

        assert!(matches!(err, ControllerError::Infoblox(_)));
        let condition = ready_condition(&kube);
        assert_eq!(condition.reason.as_deref(), Some(NETWORK_VIEW_NOT_FOUND_REASON));
        assert_eq!(condition.severity, Some(ConditionSeverity::Warning));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_index_sync() {
        let (kube, grid) = setup();
        let pool = deleting_pool(&kube);
        let reconciler = reconciler_with_index(&kube, &grid, Arc::new(PoolIndex::new()));

        let state = reconciler.reconcile_pool(&pool).await.unwrap();

        assert_eq!(state, PoolState::WaitingForClaims);
        assert!(kube.pool(NS, "pool").is_some());
    }

    #[tokio::test]
    async fn test_deletion_waits_for_claims() {
        let (kube, grid) = setup();
        let pool = deleting_pool(&kube);
        let index = Arc::new(PoolIndex::new());
        index.mark_synced();
        index.apply_claim(&create_test_claim("claim-0", NS, "pool"));
        let reconciler = reconciler_with_index(&kube, &grid, Arc::clone(&index));

        assert_eq!(reconciler.reconcile_pool(&pool).await.unwrap(), PoolState::WaitingForClaims);
        assert!(kube.pool(NS, "pool").is_some());

        index.delete_claim(NS, "claim-0");
        assert_eq!(reconciler.reconcile_pool(&pool).await.unwrap(), PoolState::Released);
        assert!(kube.pool(NS, "pool").is_none());
    }

    #[tokio::test]
    async fn test_claims_of_other_pools_do_not_block_deletion() {
        let (kube, grid) = setup();
        let pool = deleting_pool(&kube);
        let index = Arc::new(PoolIndex::new());
        index.mark_synced();
        index.apply_claim(&create_test_claim("claim-0", NS, "other-pool"));
        index.apply_claim(&create_test_claim("claim-1", "elsewhere", "pool"));
        let reconciler = reconciler_with_index(&kube, &grid, index);

        assert_eq!(reconciler.reconcile_pool(&pool).await.unwrap(), PoolState::Released);
    }

    #[tokio::test]
    async fn test_deletion_without_finalizer() {
        let (kube, grid) = setup();
        let mut pool = create_test_pool("pool", NS, "ib", &[]);
        pool.metadata.deletion_timestamp = deletion_timestamp();
        let reconciler = create_test_reconciler(&kube, &grid);

        assert_eq!(reconciler.reconcile_pool(&pool).await.unwrap(), PoolState::Released);
    }
}
