use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "warden",
    about = "Chat-driven PagerDuty incident and on-call orchestration",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub pagerduty: PagerDutyArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub slack: SlackArgs,

    #[arg(
        long,
        env = "WARDEN_STATE_DIR",
        default_value = ".warden",
        help = "Directory holding state.json and preferences.json"
    )]
    pub state_dir: PathBuf,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Connect to Slack and run the on-call sync and maintenance warning timers.
    Run,
    /// Read `user: command` lines from stdin and print replies.
    Console {
        #[arg(
            long = "default-user",
            default_value = "console",
            help = "Chat user for lines without a `user:` prefix"
        )]
        default_user: String,
    },
    /// Validate a PagerDuty token and store it for a chat user.
    Register {
        #[arg(long, help = "Chat user id the token belongs to")]
        user: String,
        #[arg(
            long,
            env = "WARDEN_REGISTER_TOKEN",
            hide_env_values = true,
            help = "The user's personal PagerDuty API token"
        )]
        token: String,
        #[arg(long = "display-name", help = "Name the user is addressed by in chat")]
        display_name: Option<String>,
    },
    /// Run a single on-call sync cycle and exit.
    SyncOnce,
}

#[derive(Debug, Clone, Args)]
pub struct PagerDutyArgs {
    #[arg(
        id = "pagerduty_api_base",
        long = "pagerduty-api-base",
        env = "WARDEN_PAGERDUTY_API_BASE",
        default_value = "https://api.pagerduty.com",
        help = "Base URL for the PagerDuty REST API"
    )]
    pub api_base: String,

    #[arg(
        long = "pagerduty-service-key",
        env = "WARDEN_PAGERDUTY_SERVICE_KEY",
        hide_env_values = true,
        help = "Service-level PagerDuty API key used for reads"
    )]
    pub service_key: Option<String>,

    #[arg(
        long = "pagerduty-service-id",
        env = "WARDEN_PAGERDUTY_SERVICE_ID",
        help = "PagerDuty service whose incidents and maintenance windows are managed"
    )]
    pub service_id: Option<String>,

    #[arg(
        long = "pagerduty-escalation-policy-id",
        env = "WARDEN_PAGERDUTY_ESCALATION_POLICY_ID",
        help = "Escalation policy whose level-1 responders count as on call"
    )]
    pub escalation_policy_id: Option<String>,

    #[arg(
        long = "request-timeout-ms",
        env = "WARDEN_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for PagerDuty and Slack requests"
    )]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    #[arg(
        long = "oncall-group-id",
        env = "WARDEN_ONCALL_GROUP_ID",
        help = "Slack usergroup mirroring the level-1 on-call set"
    )]
    pub oncall_group_id: Option<String>,

    #[arg(
        long = "announce-channel",
        env = "WARDEN_ANNOUNCE_CHANNEL",
        help = "Slack channel receiving on-call and maintenance announcements"
    )]
    pub announce_channel: Option<String>,

    #[arg(
        long = "oncall-sync-first-delay-secs",
        env = "WARDEN_ONCALL_SYNC_FIRST_DELAY_SECS",
        default_value_t = 30
    )]
    pub oncall_sync_first_delay_secs: u64,

    #[arg(
        long = "oncall-sync-interval-secs",
        env = "WARDEN_ONCALL_SYNC_INTERVAL_SECS",
        default_value_t = 150,
        value_parser = parse_positive_u64
    )]
    pub oncall_sync_interval_secs: u64,

    #[arg(
        long = "maintenance-warning-first-delay-secs",
        env = "WARDEN_MAINTENANCE_WARNING_FIRST_DELAY_SECS",
        default_value_t = 45
    )]
    pub maintenance_warning_first_delay_secs: u64,

    #[arg(
        long = "maintenance-warning-interval-secs",
        env = "WARDEN_MAINTENANCE_WARNING_INTERVAL_SECS",
        default_value_t = 600,
        value_parser = parse_positive_u64
    )]
    pub maintenance_warning_interval_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct SlackArgs {
    #[arg(
        id = "slack_api_base",
        long = "slack-api-base",
        env = "WARDEN_SLACK_API_BASE",
        default_value = "https://slack.com/api",
        help = "Base URL for the Slack Web API"
    )]
    pub api_base: String,

    #[arg(
        long = "slack-app-token",
        env = "WARDEN_SLACK_APP_TOKEN",
        hide_env_values = true,
        help = "App-level token (xapp-...) for Socket Mode"
    )]
    pub app_token: Option<String>,

    #[arg(
        long = "slack-bot-token",
        env = "WARDEN_SLACK_BOT_TOKEN",
        hide_env_values = true,
        help = "Bot token (xoxb-...) for Web API calls"
    )]
    pub bot_token: Option<String>,

    #[arg(
        long = "slack-bot-user-id",
        env = "WARDEN_SLACK_BOT_USER_ID",
        help = "Bot user id; resolved with auth.test when omitted"
    )]
    pub bot_user_id: Option<String>,

    #[arg(
        long = "slack-retry-max-attempts",
        env = "WARDEN_SLACK_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "slack-retry-base-delay-ms",
        env = "WARDEN_SLACK_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "slack-reconnect-delay-ms",
        env = "WARDEN_SLACK_RECONNECT_DELAY_MS",
        default_value_t = 2_000,
        value_parser = parse_positive_u64
    )]
    pub reconnect_delay_ms: u64,
}
