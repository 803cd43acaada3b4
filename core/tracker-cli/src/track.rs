//! Interactive tracking loop.
//!
//! Drives a [`SessionHandle`] backed by the daemon client. The session's
//! observer redraws on every transition; stdin accepts `start [ASSET_ID]`,
//! `stop`, `status` and `quit`.

use locotrack_core::{SessionHandle, SnapshotProvider};
use std::io::{self, BufRead};
use std::time::Duration;

use crate::daemon_client::DaemonClient;
use crate::render;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Start(Option<String>),
    Stop,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()?.to_ascii_lowercase().as_str() {
        "start" | "retry" => Command::Start(words.next().map(str::to_string)),
        "stop" => Command::Stop,
        "status" => Command::Status,
        "quit" | "exit" | "q" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

pub fn run(asset_id: &str, interval: Duration) -> Result<(), String> {
    let client = DaemonClient::from_env()?;
    tracing::info!(socket = %client.socket().display(), "Using daemon socket");
    let handle = SessionHandle::with_observer(client, interval, |session| {
        println!("{}", render::session_text(session).trim_end());
    });

    let stdin = io::stdin();
    drive(&handle, asset_id, stdin.lock())
}

fn drive<P: SnapshotProvider>(
    handle: &SessionHandle<P>,
    asset_id: &str,
    input: impl BufRead,
) -> Result<(), String> {
    let mut current = asset_id.to_string();
    start(handle, &current);

    for line in input.lines() {
        let line = line.map_err(|err| format!("Failed to read stdin: {}", err))?;
        match parse_command(&line) {
            Some(Command::Start(next)) => {
                if let Some(next) = next {
                    current = next;
                }
                start(handle, &current);
            }
            Some(Command::Stop) => handle.stop(),
            Some(Command::Status) => {
                println!("{}", render::session_text(&handle.session()).trim_end());
            }
            Some(Command::Quit) => break,
            None if line.trim().is_empty() => {}
            None => eprintln!("commands: start [ASSET_ID], stop, status, quit"),
        }
    }

    handle.stop();
    Ok(())
}

fn start<P: SnapshotProvider>(handle: &SessionHandle<P>, asset_id: &str) {
    // Failures are already rendered by the observer.
    if let Err(err) = handle.start(asset_id) {
        tracing::warn!(asset_id = %asset_id, code = err.code(), error = %err, "Tracking start failed");
    }
}
