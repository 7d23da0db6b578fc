//! Operator input: dashboard messages, gamepad buttons and console lines,
//! all reduced to `OperatorCommand`s and applied to the execution gate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::ExecutionGate;

/// A discrete operator event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCommand {
    NextStep,
    Autonomous(bool),
    FullAutonomous(bool),
    Stop,
}

impl OperatorCommand {
    /// Apply this command to the gate.
    pub fn apply(self, gate: &ExecutionGate) {
        match self {
            OperatorCommand::NextStep => {
                gate.request_release();
            }
            OperatorCommand::Autonomous(on) => gate.set_autonomous(on),
            OperatorCommand::FullAutonomous(on) => gate.set_full_autonomous(on),
            OperatorCommand::Stop => gate.request_stop(),
        }
    }
}

/// Dashboard control message. The first set field wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardControl {
    #[serde(default)]
    pub next_step: bool,
    #[serde(default)]
    pub auto_step: bool,
    #[serde(default)]
    pub full_auto: bool,
    #[serde(default)]
    pub stop: bool,
}

impl DashboardControl {
    pub fn to_command(&self) -> Option<OperatorCommand> {
        if self.next_step {
            Some(OperatorCommand::NextStep)
        } else if self.auto_step {
            Some(OperatorCommand::Autonomous(true))
        } else if self.full_auto {
            Some(OperatorCommand::FullAutonomous(true))
        } else if self.stop {
            Some(OperatorCommand::Stop)
        } else {
            None
        }
    }
}

/// Gamepad button state, indexed like a Logitech wireless pad.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoyButtons {
    pub buttons: Vec<i32>,
}

impl JoyButtons {
    const A: usize = 0;
    const Y: usize = 3;
    const POWER: usize = 8;

    fn pressed(&self, index: usize) -> bool {
        self.buttons.get(index).is_some_and(|b| *b != 0)
    }

    /// Commands for every mapped button that is down.
    pub fn to_commands(&self) -> Vec<OperatorCommand> {
        let mut commands = Vec::new();
        if self.pressed(Self::A) {
            commands.push(OperatorCommand::NextStep);
        }
        if self.pressed(Self::Y) {
            commands.push(OperatorCommand::Stop);
        }
        if self.pressed(Self::POWER) {
            commands.push(OperatorCommand::FullAutonomous(true));
        }
        commands
    }
}

/// Parse one console line: a short keyword or a `DashboardControl` JSON object.
pub fn parse_operator_line(line: &str) -> Option<OperatorCommand> {
    let line = line.trim();
    if line.starts_with('{') {
        return serde_json::from_str::<DashboardControl>(line)
            .ok()
            .and_then(|msg| msg.to_command());
    }

    match line.to_ascii_lowercase().as_str() {
        "" | "n" | "next" => Some(OperatorCommand::NextStep),
        "a" | "auto" => Some(OperatorCommand::Autonomous(true)),
        "m" | "manual" => Some(OperatorCommand::Autonomous(false)),
        "f" | "full" => Some(OperatorCommand::FullAutonomous(true)),
        "s" | "stop" => Some(OperatorCommand::Stop),
        _ => None,
    }
}

/// Spawn the task that applies operator commands to the gate.
///
/// The task ends when every sender has been dropped.
pub fn spawn_command_listener(
    gate: Arc<ExecutionGate>,
    mut commands: mpsc::Receiver<OperatorCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Remote control ready");
        while let Some(command) = commands.recv().await {
            debug!(?command, "Operator command");
            command.apply(&gate);
        }
        debug!("Remote control channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{WaitKind, WaitOutcome};
    use std::time::Duration;

    #[test]
    fn test_dashboard_precedence() {
        let msg = DashboardControl {
            next_step: true,
            stop: true,
            ..Default::default()
        };
        assert_eq!(msg.to_command(), Some(OperatorCommand::NextStep));

        let msg = DashboardControl {
            full_auto: true,
            stop: true,
            ..Default::default()
        };
        assert_eq!(msg.to_command(), Some(OperatorCommand::FullAutonomous(true)));

        assert_eq!(DashboardControl::default().to_command(), None);
    }

    #[test]
    fn test_joy_mapping() {
        let joy = JoyButtons {
            buttons: vec![1, 0, 0, 1, 0, 0, 0, 0, 0],
        };
        assert_eq!(
            joy.to_commands(),
            vec![OperatorCommand::NextStep, OperatorCommand::Stop]
        );

        let short = JoyButtons { buttons: vec![0, 1] };
        assert!(short.to_commands().is_empty());

        // B and back are not operator commands.
        let unmapped = JoyButtons {
            buttons: vec![0, 1, 0, 0, 0, 0, 1, 0, 0],
        };
        assert!(unmapped.to_commands().is_empty());

        let power = JoyButtons {
            buttons: vec![0, 0, 0, 0, 0, 0, 0, 0, 1],
        };
        assert_eq!(power.to_commands(), vec![OperatorCommand::FullAutonomous(true)]);
    }

    #[test]
    fn test_parse_operator_line() {
        assert_eq!(parse_operator_line(""), Some(OperatorCommand::NextStep));
        assert_eq!(parse_operator_line(" STOP "), Some(OperatorCommand::Stop));
        assert_eq!(parse_operator_line("a"), Some(OperatorCommand::Autonomous(true)));
        assert_eq!(parse_operator_line("manual"), Some(OperatorCommand::Autonomous(false)));
        assert_eq!(
            parse_operator_line(r#"{"full_auto": true}"#),
            Some(OperatorCommand::FullAutonomous(true))
        );
        assert_eq!(parse_operator_line("{broken"), None);
        assert_eq!(parse_operator_line("jump"), None);
    }

    #[test]
    fn test_apply_commands() {
        let gate = ExecutionGate::new(Duration::from_millis(5));
        OperatorCommand::FullAutonomous(true).apply(&gate);
        assert!(gate.state().full_autonomous);
        OperatorCommand::Stop.apply(&gate);
        assert!(!gate.state().autonomous);
        assert!(gate.state().stop_requested);
    }

    #[tokio::test]
    async fn test_listener_releases_waiting_worker() {
        let gate = Arc::new(ExecutionGate::new(Duration::from_millis(5)));
        let (tx, rx) = mpsc::channel(8);
        let listener = spawn_command_listener(gate.clone(), rx);

        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_release(WaitKind::Step, "test").await })
        };
        while !gate.is_waiting() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        tx.send(OperatorCommand::NextStep).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Released);

        drop(tx);
        listener.await.unwrap();
    }
}
