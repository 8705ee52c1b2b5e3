//! One TCP client connection: read one frame, get it answered, write the
//! reply, hang up.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use gdomap_core::wire::{Request, FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::daemon::Outcome;

/// A request forwarded to the reactor, with the way back.
pub struct Command {
    pub request: Request,
    pub src: SocketAddrV4,
    pub reply: oneshot::Sender<Outcome>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionTimeouts {
    /// Time the client has to deliver its whole frame.
    pub request: Duration,
    pub write: Duration,
}

pub async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    commands: mpsc::Sender<Command>,
    timeouts: ConnectionTimeouts,
) {
    let SocketAddr::V4(src) = peer else {
        tracing::debug!(%peer, "ignoring non-IPv4 connection");
        return;
    };

    let mut frame = [0u8; FRAME_SIZE];
    match timeout(timeouts.request, stream.read_exact(&mut frame)).await {
        Err(_) => {
            tracing::debug!(%src, "timed out waiting for request frame");
            return;
        }
        Ok(Err(e)) => {
            tracing::debug!(%src, error = %e, "connection closed before full frame");
            return;
        }
        Ok(Ok(_)) => {}
    }

    let request = match Request::decode(&frame) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(%src, error = %e, "bad request frame, closing");
            return;
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let command = Command {
        request,
        src,
        reply: reply_tx,
    };
    if commands.send(command).await.is_err() {
        tracing::debug!("reactor gone, dropping connection");
        return;
    }

    let reply = match reply_rx.await {
        Ok(Outcome::Reply(bytes)) => bytes,
        Ok(Outcome::Close) | Err(_) => return,
    };

    match timeout(timeouts.write, stream.write_all(&reply)).await {
        Err(_) => tracing::debug!(%src, "timed out writing reply"),
        Ok(Err(e)) => tracing::debug!(%src, error = %e, "failed to write reply"),
        Ok(Ok(())) => {
            let _ = stream.shutdown().await;
        }
    }
}
