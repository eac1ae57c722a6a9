//! Operator command channel.
//!
//! Commands are JSON objects tagged by `action`:
//!
//! ```json
//! {"action": "set", "key": "extract_fraction", "value": 0.25}
//! {"action": "get", "key": "targets"}
//! {"action": "run", "key": "stop"}
//! ```
//!
//! They are queued on an mpsc channel and applied by the scheduler worker at
//! the start of its next tick, so no command ever observes a half-finished
//! tick.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::state::{SchedulerState, TunableError};

/// An operator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Set { key: String, value: Value },
    Get { key: String },
    Run { key: String },
}

/// Reply to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResponse {
    Ok { key: String, value: Value },
    Error { message: String },
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Command failures.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown {action} key: {key}")]
    UnknownKey { action: &'static str, key: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error(transparent)]
    Tunable(#[from] TunableError),

    #[error("scheduler is not accepting commands")]
    ChannelClosed,
}

/// A queued command and where to send the reply.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    pub reply: oneshot::Sender<CommandResponse>,
}

/// Cloneable handle for submitting commands to a running scheduler.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<CommandRequest>,
}

impl ControlHandle {
    /// Queues `command` and waits for the worker to apply it.
    pub async fn send(&self, command: Command) -> Result<CommandResponse, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| CommandError::ChannelClosed)?;
        rx.await.map_err(|_| CommandError::ChannelClosed)
    }
}

/// Creates a command channel with room for `capacity` pending commands.
pub fn channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<CommandRequest>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControlHandle { tx }, rx)
}

/// Applies `command` to the scheduler state.
pub fn apply(state: &mut SchedulerState, command: Command) -> CommandResponse {
    let key = match &command {
        Command::Set { key, .. } | Command::Get { key } | Command::Run { key } => key.clone(),
    };

    let result = match command {
        Command::Set { key, value } => set(state, &key, &value),
        Command::Get { key } => get(state, &key),
        Command::Run { key } => run(state, &key),
    };

    match result {
        Ok(value) => CommandResponse::Ok { key, value },
        Err(e) => CommandResponse::Error {
            message: e.to_string(),
        },
    }
}

fn set(state: &mut SchedulerState, key: &str, value: &Value) -> Result<Value, CommandError> {
    let mut tunables = state.tunables.clone();

    match key {
        "extract_threshold" => tunables.demand.extract_threshold = as_f64(key, value)?,
        "extract_fraction" => tunables.demand.extract_fraction = as_f64(key, value)?,
        "max_targets" => {
            tunables.max_targets = usize::try_from(as_u64(key, value)?).map_err(|e| {
                CommandError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        "tick_period_ms" => tunables.tick_period = Duration::from_millis(as_u64(key, value)?),
        _ => {
            return Err(CommandError::UnknownKey {
                action: "set",
                key: key.to_string(),
            })
        }
    }

    tunables.validate()?;
    state.tunables = tunables;
    info!(key, value = %value, "Tunable updated");
    Ok(value.clone())
}

fn get(state: &SchedulerState, key: &str) -> Result<Value, CommandError> {
    let value = match key {
        "tunables" => {
            let t = &state.tunables;
            json!({
                "extract_threshold": t.demand.extract_threshold,
                "extract_fraction": t.demand.extract_fraction,
                "max_targets": t.max_targets,
                "tick_period_ms": u64::try_from(t.tick_period.as_millis()).unwrap_or(u64::MAX),
            })
        }
        "targets" => to_value(key, &state.target_snapshots())?,
        "pool" => to_value(key, &state.status())?,
        _ => {
            return Err(CommandError::UnknownKey {
                action: "get",
                key: key.to_string(),
            })
        }
    };
    Ok(value)
}

fn run(state: &mut SchedulerState, key: &str) -> Result<Value, CommandError> {
    match key {
        "stop" => {
            info!("Stop requested by operator");
            state.stop_requested = true;
            Ok(Value::Bool(true))
        }
        _ => Err(CommandError::UnknownKey {
            action: "run",
            key: key.to_string(),
        }),
    }
}

fn as_f64(key: &str, value: &Value) -> Result<f64, CommandError> {
    value.as_f64().ok_or_else(|| CommandError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected a number, got {value}"),
    })
}

fn as_u64(key: &str, value: &Value) -> Result<u64, CommandError> {
    value.as_u64().ok_or_else(|| CommandError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected a non-negative integer, got {value}"),
    })
}

fn to_value<T: Serialize>(key: &str, value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use swarm_model::HostName;

    use super::*;
    use crate::state::Tunables;

    fn state() -> SchedulerState {
        let mut state = SchedulerState::new(Tunables::default(), Vec::<HostName>::new());
        state.track_target(HostName::parse("n00dles").unwrap());
        state
    }

    fn parse(json: &str) -> Command {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_command_wire_format() {
        assert_eq!(
            parse(r#"{"action":"set","key":"extract_fraction","value":0.25}"#),
            Command::Set {
                key: "extract_fraction".into(),
                value: json!(0.25)
            }
        );
        assert_eq!(
            parse(r#"{"action":"run","key":"stop"}"#),
            Command::Run { key: "stop".into() }
        );
        assert!(serde_json::from_str::<Command>(r#"{"action":"delete","key":"x"}"#).is_err());
    }

    #[test]
    fn test_set_updates_tunables() {
        let mut state = state();

        let response = apply(&mut state, parse(r#"{"action":"set","key":"extract_fraction","value":0.25}"#));
        assert!(response.is_ok());
        assert_eq!(state.tunables.demand.extract_fraction, 0.25);

        apply(&mut state, parse(r#"{"action":"set","key":"tick_period_ms","value":250}"#));
        assert_eq!(state.tunables.tick_period, Duration::from_millis(250));

        apply(&mut state, parse(r#"{"action":"set","key":"max_targets","value":3}"#));
        assert_eq!(state.tunables.max_targets, 3);
    }

    #[rstest]
    #[case::out_of_range(r#"{"action":"set","key":"extract_threshold","value":1.5}"#)]
    #[case::zero_fraction(r#"{"action":"set","key":"extract_fraction","value":0}"#)]
    #[case::not_a_number(r#"{"action":"set","key":"extract_fraction","value":"lots"}"#)]
    #[case::negative_integer(r#"{"action":"set","key":"max_targets","value":-1}"#)]
    #[case::zero_cap(r#"{"action":"set","key":"max_targets","value":0}"#)]
    #[case::unknown_set(r#"{"action":"set","key":"colour","value":1}"#)]
    #[case::unknown_get(r#"{"action":"get","key":"colour"}"#)]
    #[case::unknown_run(r#"{"action":"run","key":"explode"}"#)]
    fn test_rejected_commands_leave_state_alone(#[case] json: &str) {
        let mut state = state();
        let before = state.tunables.clone();

        let response = apply(&mut state, parse(json));

        assert!(matches!(response, CommandResponse::Error { .. }));
        assert_eq!(state.tunables, before);
        assert!(!state.stop_requested);
    }

    #[test]
    fn test_get_reports_state() {
        let mut state = state();

        let CommandResponse::Ok { value, .. } = apply(&mut state, parse(r#"{"action":"get","key":"tunables"}"#)) else {
            panic!("get tunables failed");
        };
        assert_eq!(value["extract_threshold"], json!(0.5));
        assert_eq!(value["tick_period_ms"], json!(1000));

        let CommandResponse::Ok { value, .. } = apply(&mut state, parse(r#"{"action":"get","key":"targets"}"#)) else {
            panic!("get targets failed");
        };
        assert_eq!(value[0]["name"], "n00dles");

        let CommandResponse::Ok { value, .. } = apply(&mut state, parse(r#"{"action":"get","key":"pool"}"#)) else {
            panic!("get pool failed");
        };
        assert_eq!(value["pool"]["free_slots"], json!(0));
    }

    #[test]
    fn test_run_stop_sets_flag() {
        let mut state = state();
        let response = apply(&mut state, parse(r#"{"action":"run","key":"stop"}"#));
        assert!(response.is_ok());
        assert!(state.stop_requested);
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (handle, mut rx) = channel(4);

        let server = tokio::spawn(async move {
            let mut state = state();
            let request = rx.recv().await.unwrap();
            let response = apply(&mut state, request.command);
            request.reply.send(response).unwrap();
            state.stop_requested
        });

        let response = handle.send(Command::Run { key: "stop".into() }).await.unwrap();
        assert!(response.is_ok());
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_reports_closed_channel() {
        let (handle, rx) = channel(1);
        drop(rx);
        let result = handle.send(Command::Get { key: "pool".into() }).await;
        assert!(matches!(result, Err(CommandError::ChannelClosed)));
    }
}
