//! HTTP handlers for ledgerly-api.

pub mod checkout;
pub mod download;
pub mod health;
pub mod preview;
pub mod upload;
pub mod webhooks;

use ledgerly_core::JobId;

use crate::error::ApiError;

/// Job id from a path segment. Ids that could never have been issued are
/// reported as not found.
pub(crate) fn path_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).map_err(|_| ApiError::JobNotFound)
}
