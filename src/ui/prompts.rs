//! Confirmation prompt with non-interactive fallback

use super::context::UiContext;
use crate::error::{StratumError, StratumResult};

/// Ask a yes/no question
///
/// Auto-yes approves; a non-interactive context answers `default`.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> StratumResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| StratumError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| StratumError::User(format!("prompt failed: {}", e)))
}
