use crate::error::{Result, WikiError};
use crate::page::{EditToken, Page};

/// Whether a save carrying `submitted` may overwrite `current`.
///
/// A page that does not exist accepts any token. An existing page accepts
/// only the token it currently carries.
pub fn can_apply(current: &Page, submitted: &EditToken) -> bool {
    !current.exists || current.token == *submitted
}

pub fn check(current: &Page, submitted: &EditToken) -> Result<()> {
    if can_apply(current, submitted) {
        Ok(())
    } else {
        log::info!(
            "rejected save of '{}': token {} is stale (current {})",
            current.name,
            submitted,
            current.token
        );
        Err(WikiError::Conflict {
            page: current.name.to_string(),
        })
    }
}
