use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::Role;
use crate::error::Result;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// Jobs still owned when the signal arrives are picked up again by the next
/// startup retry of `role`. Both signal streams are registered before this
/// returns, so a signal sent right after it is never missed.
pub fn install_shutdown_handler(role: Role) -> Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(
            signal = name,
            role = ?role,
            owner = %role.owner(),
            "Stopping job relay, owned jobs resume on next start"
        );
        trigger.cancel();
    });

    Ok(token)
}
