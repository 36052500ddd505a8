use crate::{app::DaemonCommand, opts::ActionWithServer};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::mpsc::UnboundedSender,
};

/// How long a client is kept waiting for the daemon to answer a command.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound for a single client message. Even a long `set-allowed` stays far below this.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

pub async fn run_server<P: AsRef<std::path::Path>>(evt_send: UnboundedSender<DaemonCommand>, socket_path: P) -> Result<()> {
    let socket_path = socket_path.as_ref();
    let listener =
        UnixListener::bind(socket_path).with_context(|| format!("Failed to bind IPC socket {}", socket_path.display()))?;
    log::info!("IPC server listening on {}", socket_path.display());
    loop {
        let stream = tokio::select! {
            _ = crate::application_lifecycle::recv_exit() => break,
            connection = listener.accept() => match connection {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    log::warn!("Failed to accept IPC client: {:?}", e);
                    continue;
                }
            },
        };
        let evt_send = evt_send.clone();
        tokio::spawn(async move {
            let result = handle_connection(stream, evt_send).await;
            crate::print_result_err!("while handling IPC connection with client", result);
        });
    }
    log::debug!("IPC server stopped accepting clients");
    Ok(())
}

/// Read one command, hand it to the daemon, and write back its answer if it has one.
async fn handle_connection(mut stream: UnixStream, evt_send: UnboundedSender<DaemonCommand>) -> Result<()> {
    let (mut stream_read, mut stream_write) = stream.split();

    let action = read_action(&mut stream_read).await?;
    log::debug!("received command from IPC: {:?}", &action);

    let (command, response_recv) = action.into_daemon_command();
    evt_send.send(command).context("Daemon is not accepting commands anymore")?;

    if let Some(mut response_recv) = response_recv {
        match tokio::time::timeout(RESPONSE_TIMEOUT, response_recv.recv()).await {
            Ok(Some(response)) => {
                let response = bincode::serialize(&response)?;
                let result = stream_write.write_all(&response).await;
                crate::print_result_err!("sending response to ipc client", result);
            }
            Ok(None) => log::debug!("Daemon dropped the command without answering"),
            Err(_) => log::warn!("Daemon took longer than {:?} to answer an IPC client", RESPONSE_TIMEOUT),
        }
    }
    stream_write.shutdown().await?;
    Ok(())
}

/// Read a single length-prefixed (u32, big-endian) bincode message.
async fn read_action<R: AsyncRead + Unpin>(stream_read: &mut R) -> Result<ActionWithServer> {
    let mut message_byte_length = [0u8; 4];
    stream_read.read_exact(&mut message_byte_length).await.context("Failed to read message size header in IPC message")?;
    let message_len = u32::from_be_bytes(message_byte_length) as usize;
    if message_len > MAX_MESSAGE_SIZE {
        anyhow::bail!("IPC message of {} bytes exceeds the limit of {} bytes", message_len, MAX_MESSAGE_SIZE);
    }
    let mut raw_message = vec![0u8; message_len];
    stream_read.read_exact(&mut raw_message).await.context("Failed to read actual IPC message")?;

    bincode::deserialize(&raw_message).context("Failed to parse client message")
}
