//! Terminal presentation shell
//!
//! Reads single-word commands from stdin and prints bridge updates. The
//! terminal counts as the session surface: focus is granted on attach and
//! released on Ctrl+C.

use std::io::BufRead;

use tokio::sync::mpsc;

use crate::bridge::{BridgeCommand, BridgeUpdate, SessionStatus};

/// Map one input line to a bridge command
#[must_use]
pub fn parse_command(line: &str) -> Option<BridgeCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "t" | "toggle" => Some(BridgeCommand::Toggle),
        "start" => Some(BridgeCommand::Start),
        "stop" => Some(BridgeCommand::Stop),
        "q" | "quit" | "exit" => Some(BridgeCommand::Shutdown),
        _ => None,
    }
}

/// Render an update as terminal text
#[must_use]
pub fn format_update(update: &BridgeUpdate, agent_name: &str) -> String {
    match update {
        BridgeUpdate::Status(status) => {
            let hint = match status {
                SessionStatus::Idle | SessionStatus::Error => " (press Enter to talk)",
                SessionStatus::Listening => " (press Enter to stop)",
                SessionStatus::Connecting => "",
            };
            format!("[{status}]{hint}")
        }
        BridgeUpdate::Turn(turn) => {
            let mut lines = Vec::new();
            if let Some(user) = &turn.user {
                lines.push(format!("  you: {user}"));
            }
            if let Some(agent) = &turn.agent {
                lines.push(format!("  {}: {agent}", agent_name.to_lowercase()));
            }
            lines.join("\n")
        }
        BridgeUpdate::Error(message) => format!("! {message}"),
    }
}

/// Drive the bridge from the terminal until quit, Ctrl+C or end of input
pub async fn run(
    commands: mpsc::UnboundedSender<BridgeCommand>,
    mut updates: mpsc::UnboundedReceiver<BridgeUpdate>,
    agent_name: String,
) {
    let _ = commands.send(BridgeCommand::Focus(true));
    println!("{agent_name} is ready. Press Enter to talk, type 'quit' to leave.");

    let mut lines = spawn_stdin_reader();

    loop {
        tokio::select! {
            line = lines.recv() => {
                match line {
                    Some(Ok(line)) => match parse_command(&line) {
                        Some(BridgeCommand::Shutdown) => {
                            let _ = commands.send(BridgeCommand::Shutdown);
                            break;
                        }
                        Some(command) => {
                            let _ = commands.send(command);
                        }
                        None => println!("commands: Enter/toggle, start, stop, quit"),
                    },
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "failed to read from stdin");
                        let _ = commands.send(BridgeCommand::Shutdown);
                        break;
                    }
                    None => {
                        let _ = commands.send(BridgeCommand::Shutdown);
                        break;
                    }
                }
            }
            update = updates.recv() => {
                let Some(update) = update else {
                    break;
                };
                println!("{}", format_update(&update, &agent_name));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted, releasing focus");
                let _ = commands.send(BridgeCommand::Focus(false));
                let _ = commands.send(BridgeCommand::Shutdown);
                break;
            }
        }
    }
}

/// Read stdin on a detached thread so a pending read never holds up shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
