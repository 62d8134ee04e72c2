//! Logs and crash history

use anyhow::{bail, Result};
use forgepm_ipc::{Request, Response};
use regex::Regex;

use super::{request, unexpected};
use crate::cli::LogsArgs;
use crate::output::{print_crashes, print_error, print_log_entries, print_logs};

pub async fn execute(args: LogsArgs) -> Result<()> {
    if args.console && args.instance.is_none() {
        print_error("--console needs an instance id");
        bail!("missing instance id");
    }

    let grep_regex = match &args.grep {
        Some(pattern) => {
            Some(Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid regex pattern: {}", e))?)
        }
        None => None,
    };
    let keep = |text: &str| grep_regex.as_ref().map_or(true, |re| re.is_match(text));

    let response = request(&Request::Logs {
        instance: args.instance,
        lines: args.lines,
        console: args.console,
    })
    .await?;

    match response {
        Response::LogLines { lines } => {
            let lines: Vec<String> = lines.into_iter().filter(|l| keep(l.as_str())).collect();
            print_logs(&lines);
            Ok(())
        }
        Response::LogEntries { entries } => {
            let entries: Vec<_> = entries.into_iter().filter(|e| keep(e.message.as_str())).collect();
            print_log_entries(&entries);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn crashes(limit: usize) -> Result<()> {
    match request(&Request::Crashes { limit: Some(limit) }).await? {
        Response::Crashes { events } => {
            print_crashes(&events);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
