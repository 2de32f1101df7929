//! Control channel
//!
//! Plain-text, line-oriented TCP protocol, one command per connection:
//!
//! - `shutdown` stops the polling loop
//! - `kick <dataType>` forces immediate emission for a data type
//!
//! The listener thread parses lines into immutable [`ControlCommand`]
//! values and forwards them over an mpsc channel; the maker loop is the
//! only consumer and the only mutator of loop state. Connections that do
//! not produce a line within the read timeout are abandoned, not retried.

use crate::error::{FlagError, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Per-connection read timeout.
const CONN_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A command received over the control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop polling and exit
    Shutdown,
    /// Reset the named data type's deadline into the past
    Kick(String),
}

/// Parse one trimmed command line.
pub fn parse_command(line: &str) -> Option<ControlCommand> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "shutdown" => Some(ControlCommand::Shutdown),
        "kick" => {
            let data_type = parts.next()?;
            Some(ControlCommand::Kick(data_type.to_string()))
        }
        _ => None,
    }
}

/// Running listener; dropped handles leave the daemon thread to die with
/// the process.
pub struct ControlListener {
    pub addr: SocketAddr,
    _handle: JoinHandle<()>,
}

/// Bind the control socket and start accepting commands.
pub fn spawn_listener(bind: &str, tx: mpsc::Sender<ControlCommand>) -> Result<ControlListener> {
    let listener = TcpListener::bind(bind)
        .map_err(|err| FlagError::Control(format!("failed to bind {bind}: {err}")))?;
    let addr = listener
        .local_addr()
        .map_err(|err| FlagError::Control(format!("no local addr: {err}")))?;
    info!(addr = %addr, "control socket listening");

    let handle = thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if handle_connection(stream, &tx).is_err() {
                        // Receiver gone: the loop has exited
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "control accept failed"),
            }
        }
        info!("control listener stopped");
    });

    Ok(ControlListener {
        addr,
        _handle: handle,
    })
}

/// Read one command line, enqueue it, acknowledge. Returns `Err` only when
/// the command channel is closed.
fn handle_connection(
    stream: TcpStream,
    tx: &mpsc::Sender<ControlCommand>,
) -> std::result::Result<(), mpsc::SendError<ControlCommand>> {
    if let Err(err) = stream.set_read_timeout(Some(CONN_READ_TIMEOUT)) {
        warn!(error = %err, "failed to set control read timeout");
        return Ok(());
    }

    let mut line = String::new();
    let mut reader = BufReader::new(&stream);
    if let Err(err) = reader.read_line(&mut line) {
        warn!(error = %err, "control connection abandoned before a full line");
        return Ok(());
    }

    match parse_command(line.trim()) {
        Some(command) => {
            info!(?command, "control command received");
            tx.send(command)?;
            respond(&stream, "ok");
        }
        None => {
            warn!(line = %line.trim(), "unknown control command");
            respond(&stream, "error: unknown command");
        }
    }
    Ok(())
}

fn respond(mut stream: &TcpStream, reply: &str) {
    if let Err(err) = writeln!(stream, "{reply}") {
        warn!(error = %err, "failed to write control response");
    }
}

/// Send one command line to a running maker and return its response line.
pub fn send_command(addr: &str, line: &str) -> Result<String> {
    let stream = TcpStream::connect(addr)
        .map_err(|err| FlagError::Control(format!("failed to connect to {addr}: {err}")))?;
    stream
        .set_read_timeout(Some(CONN_READ_TIMEOUT))
        .map_err(|err| FlagError::Control(format!("failed to set timeout: {err}")))?;
    {
        let mut writer = &stream;
        writeln!(writer, "{line}")
            .map_err(|err| FlagError::Control(format!("failed to send command: {err}")))?;
    }
    let mut response = String::new();
    BufReader::new(&stream)
        .read_line(&mut response)
        .map_err(|err| FlagError::Control(format!("failed to read response: {err}")))?;
    Ok(response.trim().to_string())
}
