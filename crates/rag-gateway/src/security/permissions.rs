use crate::auth::AuthUser;
use crate::index::DocFilter;
use crate::utils::error::ApiError;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Per-request snapshot of what one user may retrieve.
#[derive(Debug, Clone)]
pub struct PermissionView {
    pub organization_id: String,
    pub allow_all: bool,
    pub allowed_filenames: HashSet<String>,
}

impl PermissionView {
    /// Index filter enforcing this view: always the org, plus the filename
    /// allow-list unless the user sees everything.
    pub fn filter(&self) -> DocFilter {
        let filter = DocFilter::org(self.organization_id.clone());
        if self.allow_all {
            filter
        } else {
            filter.with_filenames(self.allowed_filenames.clone())
        }
    }

    pub fn can_read_file(&self, filename: &str) -> bool {
        self.allow_all || self.allowed_filenames.contains(filename)
    }
}

/// Resolves an authenticated identity into a `PermissionView` and guards
/// cross-organization access.
pub struct PermissionResolver;

/// Allow-list entry granting access to every file in the org.
const ALLOW_ALL_SENTINEL: &str = "all";

impl PermissionResolver {
    pub fn resolve(user: &AuthUser) -> Result<PermissionView, ApiError> {
        let organization_id = user
            .organization_id
            .clone()
            .ok_or(ApiError::OrganizationRequired)?;

        let allow_all = user.role.is_privileged()
            || user.allowed_files.iter().any(|f| f == ALLOW_ALL_SENTINEL);

        let allowed_filenames = if allow_all {
            HashSet::new()
        } else {
            user.allowed_files.iter().cloned().collect()
        };

        debug!(
            "Resolved permissions for {}: org={}, allow_all={}, files={}",
            user.user_id,
            organization_id,
            allow_all,
            allowed_filenames.len()
        );

        Ok(PermissionView {
            organization_id,
            allow_all,
            allowed_filenames,
        })
    }

    /// Guard for operations on a resource with a known owner org. A mismatch
    /// is a security event; the error surfaces externally as NotFound.
    pub fn assert_same_org(
        view: &PermissionView,
        resource_org: &str,
        resource: &str,
    ) -> Result<(), ApiError> {
        if view.organization_id == resource_org {
            return Ok(());
        }

        warn!(
            security_event = true,
            "Org {} attempted access to {} owned by org {}",
            view.organization_id,
            resource,
            resource_org
        );
        Err(ApiError::OrganizationForbidden(format!(
            "{} belongs to another organization",
            resource
        )))
    }
}
