mod bootstrap;
mod cli_args;
mod console;

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use warden_pagerduty::{OncallSyncOutcome, RemoteClient};
use warden_slack::{run_slack_bridge, SlackBridgeConfig, SlackWorkspace};

use crate::bootstrap::{build_engine, init_tracing, open_identity_map, required, slack_client};
use crate::cli_args::{Cli, CliCommand, PagerDutyArgs};
use crate::console::{run_console, StdoutAnnouncer, UnavailableGroupDirectory};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        CliCommand::Run => run_bridge(&cli).await,
        CliCommand::Console { default_user } => {
            let group_id = cli.engine.oncall_group_id.clone().unwrap_or_default();
            let engine = build_engine(
                &cli,
                &group_id,
                Arc::new(StdoutAnnouncer),
                Arc::new(UnavailableGroupDirectory),
            )?;
            run_console(engine, default_user).await
        }
        CliCommand::Register {
            user,
            token,
            display_name,
        } => {
            let message = register_user(
                &cli.pagerduty,
                &cli.state_dir,
                user,
                token,
                display_name.as_deref(),
            )
            .await?;
            println!("{message}");
            Ok(())
        }
        CliCommand::SyncOnce => {
            let engine = slack_engine(&cli)?;
            let outcome = engine.run_oncall_sync().await?;
            println!("{}", describe_sync_outcome(&outcome));
            Ok(())
        }
    }
}

fn slack_engine(cli: &Cli) -> Result<Arc<warden_pagerduty::Engine>> {
    let client = slack_client(&cli.slack, cli.pagerduty.request_timeout_ms)?;
    let workspace = Arc::new(SlackWorkspace::new(
        client,
        required(&cli.engine.announce_channel, "announce-channel")?,
    ));
    build_engine(
        cli,
        required(&cli.engine.oncall_group_id, "oncall-group-id")?,
        workspace.clone(),
        workspace,
    )
}

async fn run_bridge(cli: &Cli) -> Result<()> {
    required(&cli.slack.app_token, "slack-app-token")?;
    let engine = slack_engine(cli)?;
    let client = slack_client(&cli.slack, cli.pagerduty.request_timeout_ms)?;
    let timers = engine.spawn_background_tasks();
    info!("warden started");

    let result = run_slack_bridge(
        engine,
        client,
        SlackBridgeConfig {
            bot_user_id: cli.slack.bot_user_id.clone(),
            reconnect_delay: Duration::from_millis(cli.slack.reconnect_delay_ms),
        },
    )
    .await;
    for timer in timers {
        timer.abort();
    }
    result
}

/// Confirms `token` with PagerDuty and records it for chat user `user`.
async fn register_user(
    pagerduty: &PagerDutyArgs,
    state_dir: &Path,
    user: &str,
    token: &str,
    display_name: Option<&str>,
) -> Result<String> {
    let client = RemoteClient::new(
        &pagerduty.api_base,
        pagerduty.service_key.as_deref().unwrap_or_default(),
        pagerduty.request_timeout_ms,
    )?;
    let remote_user = client
        .current_user(token)
        .await
        .context("PagerDuty did not accept the token")?;
    let identity = open_identity_map(state_dir)?;
    identity.store_remote_identity(user, display_name, token, &remote_user.id)?;
    Ok(match remote_user.email {
        Some(email) => format!(
            "registered {user} as PagerDuty user {} ({email})",
            remote_user.id
        ),
        None => format!("registered {user} as PagerDuty user {}", remote_user.id),
    })
}

fn describe_sync_outcome(outcome: &OncallSyncOutcome) -> String {
    match outcome {
        OncallSyncOutcome::Unchanged => "on-call set unchanged".to_string(),
        OncallSyncOutcome::NoUsableIdentifiers => {
            "no usable identifiers; group left untouched".to_string()
        }
        OncallSyncOutcome::Updated { previous, current } => format!(
            "on-call group updated: [{}] -> [{}]",
            previous.join(", "),
            current.join(", ")
        ),
    }
}
