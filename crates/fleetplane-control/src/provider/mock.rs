//! Scriptable in-memory provider for tests.

use std::collections::HashSet;

use async_trait::async_trait;
use fleetplane_core::Provider;
use parking_lot::Mutex;

use super::{ProviderClient, ProviderError, ProviderResult, ProvisionRequest, ProvisionedInstance};

/// A provider call observed by [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `resolve_region(provider, region)`.
    ResolveRegion(Provider, String),
    /// `provision(request)`; the hardware that was asked for.
    Provision(String),
    /// `drain(provider_server_id)`.
    Drain(String),
    /// `destroy(provider_server_id)`.
    Destroy(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<ProviderCall>,
    next_instance: u64,
    unknown_regions: HashSet<String>,
    broken_hardware: HashSet<String>,
    failing_drains: HashSet<String>,
    transient_provision_failures: u32,
    transient_destroy_failures: u32,
}

/// Provider double that records every call and fails on request.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    /// Create a provider where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `resolve_region` reject a region.
    pub fn reject_region(&self, region: impl Into<String>) {
        self.state.lock().unknown_regions.insert(region.into());
    }

    /// Make every provision with this hardware fail with a provider error.
    pub fn break_hardware(&self, hardware: impl Into<String>) {
        self.state.lock().broken_hardware.insert(hardware.into());
    }

    /// Make every drain of this instance fail with a provider error.
    pub fn fail_drain(&self, provider_server_id: impl Into<String>) {
        self.state
            .lock()
            .failing_drains
            .insert(provider_server_id.into());
    }

    /// Fail the next `count` provision calls with a transient error.
    pub fn fail_next_provisions(&self, count: u32) {
        self.state.lock().transient_provision_failures = count;
    }

    /// Fail the next `count` destroy calls with a transient error.
    pub fn fail_next_destroys(&self, count: u32) {
        self.state.lock().transient_destroy_failures = count;
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of provision calls made so far.
    #[must_use]
    pub fn provision_calls(&self) -> usize {
        self.count(|c| matches!(c, ProviderCall::Provision(_)))
    }

    /// Instances drained so far.
    #[must_use]
    pub fn drained(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::Drain(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Instances destroyed so far.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::Destroy(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&ProviderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    fn unavailable(what: &str) -> ProviderError {
        ProviderError::Status {
            status: 503,
            message: format!("{what} unavailable"),
        }
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn resolve_region(
        &self,
        provider: Provider,
        provider_datacenter_id: &str,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::ResolveRegion(
            provider,
            provider_datacenter_id.to_string(),
        ));
        if state.unknown_regions.contains(provider_datacenter_id) {
            return Err(ProviderError::UnknownRegion {
                provider,
                region: provider_datacenter_id.to_string(),
            });
        }
        Ok(())
    }

    async fn provision(&self, request: &ProvisionRequest) -> ProviderResult<ProvisionedInstance> {
        let mut state = self.state.lock();
        state
            .calls
            .push(ProviderCall::Provision(request.provider_hardware.clone()));
        if state.broken_hardware.contains(&request.provider_hardware) {
            return Err(Self::unavailable(&request.provider_hardware));
        }
        if state.transient_provision_failures > 0 {
            state.transient_provision_failures -= 1;
            return Err(Self::unavailable("capacity"));
        }
        state.next_instance += 1;
        Ok(ProvisionedInstance {
            provider_server_id: format!("mock-{}", state.next_instance),
        })
    }

    async fn drain(&self, _provider: Provider, provider_server_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(ProviderCall::Drain(provider_server_id.to_string()));
        if state.failing_drains.contains(provider_server_id) {
            return Err(Self::unavailable(provider_server_id));
        }
        Ok(())
    }

    async fn destroy(&self, _provider: Provider, provider_server_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(ProviderCall::Destroy(provider_server_id.to_string()));
        if state.transient_destroy_failures > 0 {
            state.transient_destroy_failures -= 1;
            return Err(Self::unavailable("destroy"));
        }
        Ok(())
    }
}
