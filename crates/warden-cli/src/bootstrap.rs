use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use warden_pagerduty::{
    Announcer, Engine, EngineConfig, EngineStateStore, FilePreferenceStore, GroupDirectory,
    IdentityMap, PeriodicSchedule, RemoteClient,
};
use warden_slack::SlackApiClient;

use crate::cli_args::{Cli, EngineArgs, PagerDutyArgs, SlackArgs};

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn required<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("--{flag} is required for this command"))
}

pub(crate) fn remote_client(args: &PagerDutyArgs) -> Result<RemoteClient> {
    RemoteClient::new(
        &args.api_base,
        required(&args.service_key, "pagerduty-service-key")?,
        args.request_timeout_ms,
    )
}

pub(crate) fn slack_client(args: &SlackArgs, request_timeout_ms: u64) -> Result<SlackApiClient> {
    SlackApiClient::new(
        &args.api_base,
        args.app_token.as_deref().unwrap_or_default(),
        required(&args.bot_token, "slack-bot-token")?,
        request_timeout_ms,
        args.retry_max_attempts,
        args.retry_base_delay_ms,
    )
}

pub(crate) fn engine_config(
    pagerduty: &PagerDutyArgs,
    engine: &EngineArgs,
    oncall_group_id: &str,
) -> Result<EngineConfig> {
    Ok(EngineConfig {
        service_id: required(&pagerduty.service_id, "pagerduty-service-id")?.to_string(),
        escalation_policy_id: required(
            &pagerduty.escalation_policy_id,
            "pagerduty-escalation-policy-id",
        )?
        .to_string(),
        oncall_group_id: oncall_group_id.to_string(),
        oncall_sync: PeriodicSchedule::from_secs(
            engine.oncall_sync_first_delay_secs,
            engine.oncall_sync_interval_secs,
        ),
        maintenance_warning: PeriodicSchedule::from_secs(
            engine.maintenance_warning_first_delay_secs,
            engine.maintenance_warning_interval_secs,
        ),
    })
}

pub(crate) fn open_identity_map(state_dir: &Path) -> Result<IdentityMap> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;
    let preferences = FilePreferenceStore::open(state_dir.join("preferences.json"))?;
    Ok(IdentityMap::new(Arc::new(preferences)))
}

pub(crate) fn build_engine(
    cli: &Cli,
    oncall_group_id: &str,
    announcer: Arc<dyn Announcer>,
    groups: Arc<dyn GroupDirectory>,
) -> Result<Arc<Engine>> {
    let config = engine_config(&cli.pagerduty, &cli.engine, oncall_group_id)?;
    let client = remote_client(&cli.pagerduty)?;
    let identity = open_identity_map(&cli.state_dir)?;
    let state = EngineStateStore::load(cli.state_dir.join("state.json"))?;
    Ok(Arc::new(Engine::new(
        config, client, identity, state, announcer, groups,
    )))
}
