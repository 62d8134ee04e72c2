//! Watchdog status and toggle

use anyhow::Result;
use forgepm_ipc::{Request, Response};

use super::{request, unexpected};
use crate::cli::WatchdogAction;
use crate::output::print_watchdog;

pub async fn execute(action: Option<WatchdogAction>) -> Result<()> {
    let req = match action {
        Some(WatchdogAction::On) => Request::SetWatchdog { enabled: true },
        Some(WatchdogAction::Off) => Request::SetWatchdog { enabled: false },
        Some(WatchdogAction::Status) | None => Request::WatchdogStatus,
    };

    match request(&req).await? {
        Response::Watchdog { status } => {
            print_watchdog(&status);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
