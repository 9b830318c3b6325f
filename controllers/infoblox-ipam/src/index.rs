//! Lookup index
//!
//! Reverse indices from an `InfobloxIPPool` to the claims and addresses that reference it,
//! fed from raw watch streams. Keys are `namespace/name`. Only references to
//! `ipam.cluster.x-k8s.io/InfobloxIPPool` are indexed.
//!
//! A re-list (`Init` .. `InitDone`) is staged and swapped in atomically, so readers never see
//! a half-built index. Until the first list has completed the index reports itself unsynced
//! and callers must not treat an empty answer as authoritative.

use crds::{INFOBLOX_POOL_KIND, IPAM_GROUP, IPAddress, IPAddressClaim, TypedLocalObjectReference};
use kube::{Resource, ResourceExt};
use kube_runtime::watcher::Event;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

/// `namespace/name` key of an object
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn pool_key(namespace: &str, pool_ref: &TypedLocalObjectReference) -> Option<String> {
    pool_ref
        .is_group_kind(IPAM_GROUP, INFOBLOX_POOL_KIND)
        .then(|| object_key(namespace, &pool_ref.name))
}

/// One object-to-pool mapping with its reverse side
#[derive(Debug, Default)]
struct ReverseIndex {
    pool_of: HashMap<String, String>,
    by_pool: HashMap<String, BTreeSet<String>>,
    staged: Option<HashMap<String, String>>,
    synced: bool,
}

impl ReverseIndex {
    fn apply(&mut self, key: String, pool: Option<String>) {
        self.remove(&key);
        if let Some(pool) = pool {
            self.by_pool.entry(pool.clone()).or_default().insert(key.clone());
            self.pool_of.insert(key, pool);
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(pool) = self.pool_of.remove(key) {
            if let Some(keys) = self.by_pool.get_mut(&pool) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_pool.remove(&pool);
                }
            }
        }
    }

    fn begin_resync(&mut self) {
        self.staged = Some(HashMap::new());
    }

    fn stage(&mut self, key: String, pool: Option<String>) {
        match (&mut self.staged, pool) {
            (Some(staged), Some(pool)) => {
                staged.insert(key, pool);
            }
            (Some(_), None) => {}
            // InitApply without Init: treat as a plain update
            (None, pool) => self.apply(key, pool),
        }
    }

    fn commit_resync(&mut self) {
        if let Some(staged) = self.staged.take() {
            self.pool_of.clear();
            self.by_pool.clear();
            for (key, pool) in staged {
                self.apply(key, Some(pool));
            }
        }
        self.synced = true;
    }

    fn objects_for(&self, pool: &str) -> Vec<String> {
        self.by_pool
            .get(pool)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Claims and addresses by the pool they reference
#[derive(Debug, Default)]
pub struct PoolIndex {
    claims: RwLock<ReverseIndex>,
    addresses: RwLock<ReverseIndex>,
}

fn handle_event<K: Resource>(
    index: &RwLock<ReverseIndex>,
    event: Event<K>,
    pool_of: impl Fn(&K) -> Option<String>,
) {
    let mut index = index.write().unwrap_or_else(PoisonError::into_inner);
    match event {
        Event::Init => index.begin_resync(),
        Event::InitApply(obj) => index.stage(key_of(&obj), pool_of(&obj)),
        Event::InitDone => index.commit_resync(),
        Event::Apply(obj) => index.apply(key_of(&obj), pool_of(&obj)),
        Event::Delete(obj) => index.remove(&key_of(&obj)),
    }
}

fn key_of<K: Resource>(obj: &K) -> String {
    object_key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

fn claim_pool(claim: &IPAddressClaim) -> Option<String> {
    pool_key(&claim.namespace().unwrap_or_default(), &claim.spec.pool_ref)
}

fn address_pool(address: &IPAddress) -> Option<String> {
    pool_key(&address.namespace().unwrap_or_default(), &address.spec.pool_ref)
}

impl PoolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_claim_event(&self, event: Event<IPAddressClaim>) {
        handle_event(&self.claims, event, claim_pool);
    }

    pub fn handle_address_event(&self, event: Event<IPAddress>) {
        handle_event(&self.addresses, event, address_pool);
    }

    /// Record a claim outside of a watch stream
    #[cfg(test)]
    pub fn apply_claim(&self, claim: &IPAddressClaim) {
        self.claims
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(key_of(claim), claim_pool(claim));
    }

    #[cfg(test)]
    pub fn delete_claim(&self, namespace: &str, name: &str) {
        self.claims
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&object_key(namespace, name));
    }

    /// `namespace/name` of every claim referencing the pool, sorted
    pub fn claims_for_pool(&self, namespace: &str, pool: &str) -> Vec<String> {
        self.claims
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects_for(&object_key(namespace, pool))
    }

    /// `namespace/name` of every address referencing the pool, sorted
    pub fn addresses_for_pool(&self, namespace: &str, pool: &str) -> Vec<String> {
        self.addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects_for(&object_key(namespace, pool))
    }

    pub fn has_claims(&self, namespace: &str, pool: &str) -> bool {
        !self.claims_for_pool(namespace, pool).is_empty()
    }

    /// Whether the claim list has completed at least once
    pub fn claims_synced(&self) -> bool {
        self.claims.read().unwrap_or_else(PoisonError::into_inner).synced
    }

    /// Whether the address list has completed at least once
    pub fn addresses_synced(&self) -> bool {
        self.addresses.read().unwrap_or_else(PoisonError::into_inner).synced
    }

    /// Mark both lists as complete without a watch stream
    #[cfg(test)]
    pub fn mark_synced(&self) {
        self.claims.write().unwrap_or_else(PoisonError::into_inner).synced = true;
        self.addresses.write().unwrap_or_else(PoisonError::into_inner).synced = true;
    }
}
