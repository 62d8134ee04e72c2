//! Command implementations

pub mod console;
pub mod instances;
pub mod jobs;
pub mod kill;
pub mod lifecycle;
pub mod logs;
pub mod maps;
pub mod notify;
pub mod ping;
pub mod stats;
pub mod watchdog;

use anyhow::{anyhow, bail, Result};
use forgepm_core::constants;
use forgepm_ipc::{IpcClient, Request, Response};

use crate::output::print_error;

/// Get the IPC client
pub fn get_client() -> IpcClient {
    IpcClient::new(constants::socket_path())
}

/// Send one request; an error response becomes an `Err`
pub async fn request(request: &Request) -> Result<Response> {
    match get_client().send(request).await? {
        Response::Error { message, code } => {
            print_error(&message);
            bail!("{} (code {})", message, code)
        }
        response => Ok(response),
    }
}

pub fn unexpected(response: Response) -> anyhow::Error {
    print_error("Unexpected response from daemon");
    anyhow!("Unexpected response: {:?}", response)
}
