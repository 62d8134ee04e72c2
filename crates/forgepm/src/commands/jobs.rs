//! Scheduled jobs

use anyhow::{bail, Result};
use forgepm_core::{JobAction, JobUpdate};
use forgepm_ipc::{Request, Response};

use super::{request, unexpected};
use crate::cli::{ActionKind, AddJobArgs, JobsArgs, JobsCommand, UpdateJobArgs};
use crate::output::{print_error, print_job, print_jobs, print_success};

pub async fn execute(args: JobsArgs) -> Result<()> {
    match args.command.unwrap_or(JobsCommand::Ls) {
        JobsCommand::Ls => list().await,
        JobsCommand::Add(add_args) => add(add_args).await,
        JobsCommand::Update(update_args) => update(update_args).await,
        JobsCommand::Rm { id } => simple(Request::DeleteJob { id }).await,
        JobsCommand::Run { id } => simple(Request::RunJob { id }).await,
    }
}

/// Build the action a job should carry out
pub fn build_action(args: &AddJobArgs) -> Result<JobAction> {
    let instance = args.instance.clone();
    Ok(match args.action {
        ActionKind::Restart => JobAction::Restart { instance },
        ActionKind::Start => JobAction::Start { instance },
        ActionKind::Stop => JobAction::Stop { instance },
        ActionKind::Changemap => match &args.map {
            Some(target) => JobAction::ChangeMap {
                instance,
                target: target.clone(),
            },
            None => bail!("changemap jobs need --map <slot|scenario>"),
        },
    })
}

async fn list() -> Result<()> {
    match request(&Request::ListJobs).await? {
        Response::Jobs { jobs } => {
            print_jobs(&jobs);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn add(args: AddJobArgs) -> Result<()> {
    let action = match build_action(&args) {
        Ok(action) => action,
        Err(e) => {
            print_error(&e.to_string());
            return Err(e);
        }
    };

    let response = request(&Request::AddJob {
        name: args.name,
        cron_expr: args.cron,
        action,
        enabled: !args.disabled,
        description: args.description,
    })
    .await?;

    match response {
        Response::Job { job } => {
            print_job(&job);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn update(args: UpdateJobArgs) -> Result<()> {
    let enabled = match (args.enable, args.disable) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let update = JobUpdate {
        name: args.name,
        cron_expr: args.cron,
        action: None,
        enabled,
        description: args.description,
    };

    match request(&Request::UpdateJob { id: args.id, update }).await? {
        Response::Job { job } => {
            print_job(&job);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn simple(req: Request) -> Result<()> {
    match request(&req).await? {
        Response::Ok { message } => {
            print_success(&message);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
