//! Resource usage, console metrics and uptime

use anyhow::Result;
use forgepm_ipc::{Request, Response};
use tracing::debug;

use super::{get_client, request, unexpected};
use crate::cli::StatsArgs;
use crate::output::{print_metric_points, print_stats, LiveStats};

pub async fn execute(args: StatsArgs) -> Result<()> {
    if args.history {
        return history(args).await;
    }

    let samples = match request(&Request::ResourceHistory { id: args.id.clone() }).await? {
        Response::ResourceHistory { samples } => samples,
        other => return Err(unexpected(other)),
    };
    let uptime = match request(&Request::Uptime { id: args.id.clone() }).await? {
        Response::Uptime { stats } => stats,
        other => return Err(unexpected(other)),
    };

    // Console metrics are best effort; a stopped server has none
    let metrics = match get_client()
        .send(&Request::ServerMetrics { id: args.id.clone() })
        .await?
    {
        Response::Metrics { metrics } => Some(metrics),
        other => {
            debug!("No console metrics: {:?}", other.error_message());
            None
        }
    };

    print_stats(&LiveStats {
        metrics: metrics.as_ref(),
        samples: &samples,
        uptime: &uptime,
    });
    Ok(())
}

async fn history(args: StatsArgs) -> Result<()> {
    let response = request(&Request::MetricsHistory {
        id: args.id,
        date: args.date,
    })
    .await?;

    match response {
        Response::MetricsHistory { points } => {
            print_metric_points(&points);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
