//! # Child Resolver
//!
//! Maps the configured child to a dashboard profile id. The resolved id is
//! cached until the auth bundle changes or repeated failures suggest the
//! profile list moved.

use curfew_core::ChildProfile;
use tracing::{debug, info, warn};

use crate::config::ChildConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::DashboardGateway;
use crate::store::BundleVersion;

pub struct ChildResolver {
    config: ChildConfig,
    stale_after_failures: u32,
    cached: Option<(ChildProfile, BundleVersion)>,
    failures: u32,
}

impl ChildResolver {
    pub fn new(config: ChildConfig, stale_after_failures: u32) -> Self {
        Self {
            config,
            stale_after_failures: stale_after_failures.max(1),
            cached: None,
            failures: 0,
        }
    }

    pub fn current(&self) -> Option<&ChildProfile> {
        self.cached.as_ref().map(|(profile, _)| profile)
    }

    /// Returns the child profile, listing children only when needed.
    pub async fn resolve(
        &mut self,
        gateway: &DashboardGateway,
        version: BundleVersion,
    ) -> SyncResult<ChildProfile> {
        if let Some(id) = &self.config.id {
            let profile = ChildProfile::new(id.clone(), self.config.name.clone());
            self.cached = Some((profile.clone(), version));
            return Ok(profile);
        }

        if let Some((profile, cached_at)) = &self.cached {
            if *cached_at == version && self.failures < self.stale_after_failures {
                return Ok(profile.clone());
            }
            debug!(failures = self.failures, "Child profile cache invalidated");
        }

        let children = gateway.list_children().await?;
        let profile = pick(&children, &self.config.name)?;
        info!(child_id = %profile.id, name = %profile.name, "Resolved child profile");

        self.cached = Some((profile.clone(), version));
        self.failures = 0;
        Ok(profile)
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures == self.stale_after_failures {
            warn!(failures = self.failures, "Child profile will be re-resolved");
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }
}

/// Case-insensitive name match, or the first child when no name is set.
fn pick(children: &[ChildProfile], name: &str) -> SyncResult<ChildProfile> {
    let wanted = name.trim();
    if wanted.is_empty() {
        return children
            .first()
            .cloned()
            .ok_or_else(|| SyncError::NoChildProfile("account has no children".into()));
    }
    children
        .iter()
        .find(|c| c.name.trim().eq_ignore_ascii_case(wanted))
        .cloned()
        .ok_or_else(|| SyncError::NoChildProfile(format!("no child named {wanted:?}")))
}
