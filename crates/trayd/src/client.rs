use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};

use crate::{
    daemon_response::DaemonResponse,
    opts::{ActionClientOnly, ActionWithServer},
    paths::TraydPaths,
};

/// How long the client waits for the daemon to answer before treating the call as answerless.
const READ_TIMEOUT: Duration = Duration::from_millis(1000);
const RETRY_INTERVAL: Duration = Duration::from_millis(200);

pub fn handle_client_only_action(paths: &TraydPaths, action: ActionClientOnly) -> Result<()> {
    match action {
        ActionClientOnly::Logs => {
            std::process::Command::new("tail")
                .arg("-f")
                .arg(paths.get_log_file())
                .stdin(Stdio::null())
                .spawn()
                .context("Failed to run tail on the log file")?
                .wait()?;
        }
    }
    Ok(())
}

/// The daemon as the command line sees it: a socket that may or may not have a daemon behind it.
#[derive(Debug, Clone)]
pub struct DaemonLink {
    socket: PathBuf,
}

impl DaemonLink {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        DaemonLink { socket: socket.into() }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Whether a daemon answers a ping right now.
    pub fn is_alive(&self) -> bool {
        match UnixStream::connect(&self.socket) {
            Ok(mut stream) => do_server_call(&mut stream, &ActionWithServer::Ping).is_ok(),
            Err(_) => false,
        }
    }

    /// Send `action` to the daemon. A daemon that was only just started may not be listening yet,
    /// so connecting is tried up to `attempts` times.
    pub fn call(&self, action: &ActionWithServer, attempts: usize) -> Result<Option<DaemonResponse>> {
        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(RETRY_INTERVAL);
            }
            match UnixStream::connect(&self.socket) {
                Ok(mut stream) => {
                    log::debug!("Connected to trayd daemon at {}", self.socket.display());
                    return do_server_call(&mut stream, action).context("Error while forwarding command to the daemon");
                }
                Err(err) => log::debug!("Daemon not reachable at {}: {}", self.socket.display(), err),
            }
        }
        anyhow::bail!("Failed to connect to the trayd daemon at {}", self.socket.display())
    }

    /// Poll until no daemon answers anymore. Returns false if one is still around after `timeout`.
    pub fn wait_until_gone(&self, timeout: Duration) -> bool {
        let give_up = Instant::now() + timeout;
        while self.is_alive() {
            if Instant::now() >= give_up {
                return false;
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
        true
    }
}

/// Send `action` to the daemon on the other end of `stream` and read its answer.
/// `Ok(None)` means the daemon had nothing to say, which is not a failure.
pub fn do_server_call(stream: &mut UnixStream, action: &ActionWithServer) -> Result<Option<DaemonResponse>> {
    log::debug!("Forwarding {:?} to server", action);
    stream.set_nonblocking(false).context("Failed to set stream to blocking")?;
    write_message(stream, action)?;
    stream.set_read_timeout(Some(READ_TIMEOUT)).context("Failed to set read timeout")?;
    read_response(stream)
}

/// Frame: payload length as u32 big-endian, then the bincode payload.
fn write_message(stream: &mut impl Write, action: &ActionWithServer) -> Result<()> {
    let message_bytes = bincode::serialize(action)?;
    let len = u32::try_from(message_bytes.len()).context("IPC message too large")?;
    stream.write_all(&len.to_be_bytes()).context("Failed to send command size header to IPC stream")?;
    stream.write_all(&message_bytes).context("Failed to write command to IPC stream")?;
    Ok(())
}

/// The daemon answers with a bare bincode payload and closes its end.
fn read_response(stream: &mut impl Read) -> Result<Option<DaemonResponse>> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).context("Error reading response from server")?;
    if buf.is_empty() {
        return Ok(None);
    }
    Ok(Some(bincode::deserialize(&buf).context("Failed to parse response from server")?))
}
