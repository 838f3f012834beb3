//! Chat command parsing and dispatch.

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::OpsError;
use crate::incident_ops::ResolveFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    MaintStatus,
    MaintStart {
        force: bool,
    },
    MaintEnd,
    Oncall,
    OncallOverride {
        who: String,
        duration: String,
    },
    AckAll,
    Incidents,
    Resolve {
        filter: ResolveFilter,
        only_acked: Option<bool>,
    },
    Snooze {
        incident_number: u64,
        duration: String,
    },
    Invalid {
        message: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::MaintStatus => "maint-status",
            Self::MaintStart { .. } => "maint-start",
            Self::MaintEnd => "maint-end",
            Self::Oncall => "oncall",
            Self::OncallOverride { .. } => "oncall-override",
            Self::AckAll => "ack-all",
            Self::Incidents => "incidents",
            Self::Resolve { .. } => "resolve",
            Self::Snooze { .. } => "snooze",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// Commands that act with the speaker's PagerDuty token.
    pub fn requires_token(&self) -> bool {
        !matches!(
            self,
            Self::Help | Self::MaintStatus | Self::Oncall | Self::Incidents | Self::Invalid { .. }
        )
    }
}

pub fn command_usage() -> String {
    [
        "Supported commands:",
        "- `maint [status]`",
        "- `maint start [/force]`",
        "- `maint end` (also `stop`, `demaint`, `unmaint`)",
        "- `oncall`",
        "- `oncall override WHO DURATION` or `give oncall to WHO for DURATION`",
        "- `ack all`",
        "- `incidents` (or `alerts`)",
        "- `resolve all|acked|mine [/acked|/any]`",
        "- `snooze #N for DURATION`",
    ]
    .join("\n")
}

fn invalid(usage: &str) -> Command {
    Command::Invalid {
        message: format!("Usage: {usage}"),
    }
}

/// Parses chat text addressed to the bot. Returns `None` for empty text.
pub fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let words = trimmed.split_whitespace().collect::<Vec<_>>();
    let lowered = words
        .iter()
        .map(|word| word.to_ascii_lowercase())
        .collect::<Vec<_>>();
    let keys = lowered.iter().map(String::as_str).collect::<Vec<_>>();

    let parsed = match keys.as_slice() {
        ["help"] => Command::Help,
        ["maint"] | ["maint", "status"] => Command::MaintStatus,
        ["maint", "start"] => Command::MaintStart { force: false },
        ["maint", "start", "/force"] => Command::MaintStart { force: true },
        ["maint", "start", ..] => invalid("maint start [/force]"),
        ["maint", "end" | "stop" | "demaint" | "unmaint"] => Command::MaintEnd,
        ["maint", ..] => invalid("maint [status|start [/force]|end]"),
        ["oncall"] => Command::Oncall,
        ["oncall", "override", _, _, ..] => Command::OncallOverride {
            who: words[2].to_string(),
            duration: words[3..].join(" "),
        },
        ["oncall", ..] => invalid("oncall override WHO DURATION"),
        ["give", "oncall", "to", _, "for", _, ..] => Command::OncallOverride {
            who: words[3].to_string(),
            duration: words[5..].join(" "),
        },
        ["give", ..] => invalid("give oncall to WHO for DURATION"),
        ["ack", "all"] => Command::AckAll,
        ["ack", ..] => invalid("ack all"),
        ["incidents"] | ["alerts"] => Command::Incidents,
        ["resolve", filter, rest @ ..] if rest.len() <= 1 => {
            let filter = match *filter {
                "all" => Some(ResolveFilter::All),
                "acked" => Some(ResolveFilter::Acked),
                "mine" | "own" => Some(ResolveFilter::Own),
                _ => None,
            };
            let only_acked = match rest {
                [] => Some(None),
                ["/acked"] => Some(Some(true)),
                ["/any"] => Some(Some(false)),
                _ => None,
            };
            match (filter, only_acked) {
                (Some(filter), Some(only_acked)) => Command::Resolve { filter, only_acked },
                _ => invalid("resolve all|acked|mine [/acked|/any]"),
            }
        }
        ["resolve", ..] => invalid("resolve all|acked|mine [/acked|/any]"),
        ["snooze", number, "for", _, ..] => {
            match number.trim_start_matches('#').parse::<u64>() {
                Ok(incident_number) => Command::Snooze {
                    incident_number,
                    duration: words[3..].join(" "),
                },
                Err(_) => invalid("snooze #N for DURATION"),
            }
        }
        ["snooze", ..] => invalid("snooze #N for DURATION"),
        _ => Command::Invalid {
            message: format!("I don't know that command.\n\n{}", command_usage()),
        },
    };
    Some(parsed)
}

impl Engine {
    /// Parses and runs one chat message from `speaker`.
    pub async fn handle_message(&self, speaker: &str, text: &str) -> Option<String> {
        let command = parse_command(text)?;
        Some(self.execute_command(speaker, command).await)
    }

    /// Runs `command` for `speaker` and renders the chat reply. Failures are
    /// logged here and turned into user-facing text.
    pub async fn execute_command(&self, speaker: &str, command: Command) -> String {
        let name = command.name();
        let result = self.dispatch_command(speaker, command).await;
        match result {
            Ok(reply) => {
                info!(command = name, speaker, "command completed");
                reply
            }
            Err(error) => {
                if error.is_failure() {
                    error!(command = name, speaker, error = %error, "command failed");
                } else {
                    debug!(command = name, speaker, outcome = %error, "command rejected");
                }
                error.user_message()
            }
        }
    }

    async fn dispatch_command(&self, speaker: &str, command: Command) -> Result<String, OpsError> {
        let actor = if command.requires_token() {
            match self.actor_for(speaker)? {
                Some(actor) => Some(actor),
                None => {
                    return Err(OpsError::Guard(
                        "I don't have a PagerDuty token for you yet. Ask an admin to run `warden register` for your account."
                            .to_string(),
                    ))
                }
            }
        } else {
            None
        };

        match (command, actor) {
            (Command::Help, _) => Ok(command_usage()),
            (Command::Invalid { message }, _) => Ok(message),
            (Command::MaintStatus, _) => self.maintenance_status().await,
            (Command::Oncall, _) => self.oncall_command().await,
            (Command::Incidents, _) => self.incidents_command().await,
            (Command::MaintStart { force }, Some(actor)) => {
                self.start_maintenance(&actor, force).await
            }
            (Command::MaintEnd, Some(actor)) => self.end_maintenance(&actor).await,
            (Command::OncallOverride { who, duration }, Some(actor)) => {
                self.give_oncall(&actor, &who, &duration).await
            }
            (Command::AckAll, Some(actor)) => self.ack_all_command(&actor).await,
            (Command::Resolve { filter, only_acked }, Some(actor)) => {
                self.resolve_command(&actor, filter, only_acked).await
            }
            (
                Command::Snooze {
                    incident_number,
                    duration,
                },
                Some(actor),
            ) => self.snooze(&actor, incident_number, &duration).await,
            (command, None) => Err(OpsError::Local(anyhow::anyhow!(
                "command {} reached dispatch without an actor",
                command.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_maintenance_variants() {
        assert_eq!(parse_command("maint"), Some(Command::MaintStatus));
        assert_eq!(parse_command("Maint Status"), Some(Command::MaintStatus));
        assert_eq!(
            parse_command("maint start"),
            Some(Command::MaintStart { force: false })
        );
        assert_eq!(
            parse_command("maint start /force"),
            Some(Command::MaintStart { force: true })
        );
        for alias in ["end", "stop", "demaint", "unmaint"] {
            assert_eq!(
                parse_command(&format!("maint {alias}")),
                Some(Command::MaintEnd)
            );
        }
        assert!(matches!(
            parse_command("maint start now"),
            Some(Command::Invalid { .. })
        ));
    }

    #[test]
    fn parses_both_override_phrasings_preserving_case() {
        let expected = Command::OncallOverride {
            who: "<@U2>".to_string(),
            duration: "1h 30m".to_string(),
        };
        assert_eq!(
            parse_command("oncall override <@U2> 1h 30m"),
            Some(expected.clone())
        );
        assert_eq!(
            parse_command("give oncall to <@U2> for 1h 30m"),
            Some(expected)
        );
        assert!(matches!(
            parse_command("give oncall to ada"),
            Some(Command::Invalid { .. })
        ));
    }

    #[test]
    fn parses_resolve_filters_and_overrides() {
        assert_eq!(
            parse_command("resolve mine"),
            Some(Command::Resolve {
                filter: ResolveFilter::Own,
                only_acked: None
            })
        );
        assert_eq!(
            parse_command("resolve all /acked"),
            Some(Command::Resolve {
                filter: ResolveFilter::All,
                only_acked: Some(true)
            })
        );
        assert!(matches!(
            parse_command("resolve everything"),
            Some(Command::Invalid { .. })
        ));
    }

    #[test]
    fn parses_snooze_with_or_without_hash() {
        let expected = Command::Snooze {
            incident_number: 42,
            duration: "2h".to_string(),
        };
        assert_eq!(parse_command("snooze #42 for 2h"), Some(expected.clone()));
        assert_eq!(parse_command("snooze 42 for 2h"), Some(expected));
        assert!(matches!(
            parse_command("snooze #x for 2h"),
            Some(Command::Invalid { .. })
        ));
    }

    #[test]
    fn simple_commands_and_unknown_text() {
        assert_eq!(parse_command("ack all"), Some(Command::AckAll));
        assert_eq!(parse_command("alerts"), Some(Command::Incidents));
        assert_eq!(parse_command("oncall"), Some(Command::Oncall));
        assert_eq!(parse_command("   "), None);
        match parse_command("make coffee") {
            Some(Command::Invalid { message }) => assert!(message.contains("Supported commands")),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn read_only_commands_skip_token_requirement() {
        assert!(!Command::MaintStatus.requires_token());
        assert!(!Command::Oncall.requires_token());
        assert!(!Command::Incidents.requires_token());
        assert!(Command::AckAll.requires_token());
        assert!(Command::MaintStart { force: true }.requires_token());
    }
}
