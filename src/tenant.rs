//! Tenant scoping.
//!
//! Every data-source call takes the tenant explicitly. Deployments that also
//! keep an ambient "current tenant" (row-level security, connection settings)
//! plug it in through [`TenantScope`]; jobs hold it through a [`ScopedTenant`]
//! guard, which resets stale state on entry and clears it on every exit path.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path};
use std::sync::{Arc, RwLock};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Identifier of a tenant partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tenant ids name a directory and an archive prefix, so they must be
    /// one plain path component
    pub fn validate(&self) -> Result<()> {
        let mut components = Path::new(&self.0).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );

        if single && !self.0.contains(['/', '\\']) {
            Ok(())
        } else {
            Err(Error::Configuration {
                reason: format!("invalid tenant id {:?}", self.0),
            })
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ambient tenant context of the calling worker
pub trait TenantScope: Send + Sync {
    fn set_current(&self, tenant: &TenantId) -> Result<()>;

    fn unset_current(&self);

    fn current(&self) -> Option<TenantId>;
}

/// Used when multi-tenant support is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTenantScope;

impl TenantScope for NoopTenantScope {
    fn set_current(&self, _tenant: &TenantId) -> Result<()> {
        Ok(())
    }

    fn unset_current(&self) {}

    fn current(&self) -> Option<TenantId> {
        None
    }
}

/// Current tenant of each worker thread in the process.
///
/// A job enters and leaves its scope on the blocking thread that runs it, so
/// concurrent jobs on other workers never see or clear each other's tenant.
#[derive(Debug, Default)]
pub struct ProcessTenantScope {
    current: RwLock<HashMap<ThreadId, TenantId>>,
}

impl ProcessTenantScope {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantScope for ProcessTenantScope {
    fn set_current(&self, tenant: &TenantId) -> Result<()> {
        tenant.validate()?;
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        current.insert(thread::current().id(), tenant.clone());
        Ok(())
    }

    fn unset_current(&self) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        current.remove(&thread::current().id());
    }

    fn current(&self) -> Option<TenantId> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        current.get(&thread::current().id()).cloned()
    }
}

/// Holds the tenant context for the lifetime of one job
pub struct ScopedTenant<'a> {
    scope: &'a dyn TenantScope,
    tenant: Option<TenantId>,
}

impl<'a> ScopedTenant<'a> {
    /// Clear whatever a previous job left behind, then activate `tenant`
    pub fn enter(scope: &'a dyn TenantScope, tenant: Option<&TenantId>) -> Result<Self> {
        scope.unset_current();

        if let Some(tenant) = tenant {
            scope.set_current(tenant)?;
            debug!("Tenant context set to {}", tenant);
        }

        Ok(Self {
            scope,
            tenant: tenant.cloned(),
        })
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }
}

impl Drop for ScopedTenant<'_> {
    fn drop(&mut self) {
        self.scope.unset_current();
    }
}

/// Select the scope implementation once at startup
pub fn scope_for(multi_tenant: bool) -> Arc<dyn TenantScope> {
    if multi_tenant {
        Arc::new(ProcessTenantScope::new())
    } else {
        Arc::new(NoopTenantScope)
    }
}
