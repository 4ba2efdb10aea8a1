//! Pool validation and scale planning.
//!
//! Everything here is pure: it looks at a pool and its servers and decides
//! what should happen. Carrying out the plan is the service's job.

use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;

use fleetplane_core::{Captured, Patch, Pool, PoolType, Server, ServerId};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::types::{PoolPatch, PoolUpdate};

/// Apply a patch to a pool and validate the result.
///
/// The input pool is left untouched, so a rejected patch changes nothing.
///
/// # Errors
///
/// Returns a validation error if a count field is explicitly `null` or the
/// patched pool breaks its invariants.
pub fn apply_patch(pool: &Captured<Pool>, patch: &PoolPatch) -> Result<Captured<Pool>> {
    let mut next = pool.clone();
    let field = |name: &str| {
        ControlError::validation(format!(
            "{name} of the {} pool cannot be null",
            pool.pool_type
        ))
    };

    next.desired_count = patch
        .desired_count
        .clone()
        .apply_required(next.desired_count)
        .map_err(|()| field("desired_count"))?;
    next.min_count = patch
        .min_count
        .clone()
        .apply_required(next.min_count)
        .map_err(|()| field("min_count"))?;
    next.max_count = patch
        .max_count
        .clone()
        .apply_required(next.max_count)
        .map_err(|()| field("max_count"))?;
    next.drain_timeout_ms = patch
        .drain_timeout_ms
        .clone()
        .apply_required(next.drain_timeout_ms)
        .map_err(|()| field("drain_timeout_ms"))?;
    match &patch.hardware {
        Patch::Unset => {}
        Patch::Null => next.hardware.clear(),
        Patch::Value(hardware) => next.hardware.clone_from(hardware),
    }

    next.validate()?;
    Ok(next)
}

/// Apply a batch of pool updates to a datacenter's pools.
///
/// Updates naming a pool the datacenter does not have yet create it from an
/// empty pool. Either every update is valid and the new pool list is
/// returned, or nothing is applied.
///
/// # Errors
///
/// Returns a validation error if two updates name the same pool type or any
/// single update is invalid.
pub fn apply_updates(
    pools: &[Captured<Pool>],
    updates: &[PoolUpdate],
) -> Result<Vec<Captured<Pool>>> {
    let mut seen = HashSet::new();
    if let Some(dup) = updates.iter().find(|u| !seen.insert(u.pool_type)) {
        return Err(ControlError::validation(format!(
            "pool {} is updated more than once",
            dup.pool_type
        )));
    }

    let mut next = pools.to_vec();
    for update in updates {
        match next.iter_mut().find(|p| p.pool_type == update.pool_type) {
            Some(pool) => *pool = apply_patch(pool, &update.patch)?,
            None => {
                let empty = Captured::new(Pool::empty(update.pool_type));
                next.push(apply_patch(&empty, &update.patch)?);
            }
        }
    }
    Ok(next)
}

/// Validate the pools of a new datacenter.
///
/// # Errors
///
/// Returns a validation error on duplicate pool types or invalid pools.
pub fn validate_pools(pools: &[Captured<Pool>]) -> Result<()> {
    let mut seen = HashSet::new();
    for pool in pools {
        if !seen.insert(pool.pool_type) {
            return Err(ControlError::validation(format!(
                "pool {} is declared more than once",
                pool.pool_type
            )));
        }
        pool.validate()?;
    }
    Ok(())
}

/// What a reconciliation should do to bring a pool to its target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalePlan {
    /// Live servers before any action.
    pub live: u32,
    /// Draining servers to return to service, in order.
    pub reuse: Vec<ServerId>,
    /// Number of new servers to provision.
    pub provision: u32,
    /// Active servers to drain, in order.
    pub drain: Vec<ServerId>,
    /// Excess servers that cannot be drained yet.
    pub deferred: u32,
}

impl ScalePlan {
    /// Returns true if the plan takes no action.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reuse.is_empty() && self.provision == 0 && self.drain.is_empty() && self.deferred == 0
    }
}

/// Plan a reconciliation of one pool.
///
/// `servers` may contain servers of other pools; they are ignored.
#[must_use]
pub fn plan(pool_type: PoolType, desired: u32, servers: &[Server]) -> ScalePlan {
    let members: Vec<&Server> = servers
        .iter()
        .filter(|s| s.pool_type == pool_type)
        .collect();
    let live = count(members.iter().filter(|s| lifecycle::is_live(s.state)));

    match desired.cmp(&live) {
        Ordering::Equal => ScalePlan {
            live,
            ..ScalePlan::default()
        },
        Ordering::Greater => {
            let missing = desired - live;
            let reuse = select_for_reuse(&members, missing);
            ScalePlan {
                live,
                provision: missing - count(reuse.iter()),
                reuse,
                ..ScalePlan::default()
            }
        }
        Ordering::Less => {
            let excess = live - desired;
            let drain = select_for_drain(&members, excess);
            ScalePlan {
                live,
                deferred: excess - count(drain.iter()),
                drain,
                ..ScalePlan::default()
            }
        }
    }
}

/// Pick up to `n` active servers to drain.
///
/// Unhealthy servers go first, then the oldest, with ties broken by
/// ascending server id.
#[must_use]
pub fn select_for_drain(servers: &[&Server], n: u32) -> Vec<ServerId> {
    let mut candidates: Vec<&Server> = servers
        .iter()
        .copied()
        .filter(|s| lifecycle::can_drain(s.state))
        .collect();
    candidates.sort_by_key(|s| (s.healthy, s.create_ts, s.server_id));
    take(candidates, n)
}

/// Pick up to `n` draining servers to return to service.
///
/// Healthy servers go first, then the newest, with ties broken by ascending
/// server id.
#[must_use]
pub fn select_for_reuse(servers: &[&Server], n: u32) -> Vec<ServerId> {
    let mut candidates: Vec<&Server> = servers
        .iter()
        .copied()
        .filter(|s| lifecycle::can_reuse(s.state))
        .collect();
    candidates.sort_by_key(|s| (!s.healthy, Reverse(s.create_ts), s.server_id));
    take(candidates, n)
}

/// Count the live servers of a pool.
#[must_use]
pub fn live_count(pool_type: PoolType, servers: &[Server]) -> u32 {
    count(
        servers
            .iter()
            .filter(|s| s.pool_type == pool_type && lifecycle::is_live(s.state)),
    )
}

/// Count the live servers across every pool.
#[must_use]
pub fn total_live(servers: &[Server]) -> usize {
    servers.iter().filter(|s| lifecycle::is_live(s.state)).count()
}

fn take(candidates: Vec<&Server>, n: u32) -> Vec<ServerId> {
    let n = usize::try_from(n).unwrap_or(usize::MAX);
    candidates.into_iter().take(n).map(|s| s.server_id).collect()
}

fn count<I: Iterator>(iter: I) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}
