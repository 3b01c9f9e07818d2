//! Unix domain socket plumbing shared by the controller and node services.
use futures::{Stream, TryFutureExt};
use std::{
    fs,
    io::ErrorKind,
    path::Path,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::UnixListener,
    signal::unix::{signal, SignalKind},
};
use tonic::transport::server::Connected;
use tracing::{debug, error, info, warn};

/// A CSI client connection.
#[derive(Debug)]
pub struct UnixStream(tokio::net::UnixStream);

/// Peer details of a CSI client connection.
#[derive(Clone, Debug)]
pub struct UdsConnectInfo {
    pub peer_addr: Option<Arc<tokio::net::unix::SocketAddr>>,
    pub peer_cred: Option<tokio::net::unix::UCred>,
}

impl Connected for UnixStream {
    type ConnectInfo = UdsConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        UdsConnectInfo {
            peer_addr: self.0.peer_addr().ok().map(Arc::new),
            peer_cred: self.0.peer_cred().ok(),
        }
    }
}

impl AsyncRead for UnixStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnixStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// Bind the CSI socket, replacing a stale one left by a previous instance, and return the
/// stream of accepted connections.
pub fn csi_incoming(
    csi_socket: &str,
) -> std::io::Result<impl Stream<Item = std::io::Result<UnixStream>>> {
    match fs::remove_file(csi_socket) {
        Ok(_) => info!("Removed stale CSI socket {}", csi_socket),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    if let Some(parent) = Path::new(csi_socket).parent() {
        fs::create_dir_all(parent)?;
    }

    let uds = UnixListener::bind(csi_socket)?;
    info!("CSI RPC server is listening on {}", csi_socket);

    // Allow non-privileged clients to reach the socket.
    if let Err(error) = fs::set_permissions(
        csi_socket,
        std::os::unix::fs::PermissionsExt::from_mode(0o777),
    ) {
        error!(?error, "Failed to change permissions for CSI socket");
    } else {
        debug!("Successfully changed file permissions for CSI socket");
    }

    Ok(async_stream::stream! {
        loop {
            let item = uds.accept().map_ok(|(st, _)| UnixStream(st)).await;
            yield item;
        }
    })
}

/// Resolves once the process receives SIGTERM or SIGINT.
pub async fn shutdown_signal() {
    let (mut term, mut int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(error), _) | (_, Err(error)) => {
            warn!(%error, "Failed to install the signal handlers");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = term.recv() => info!("SIGTERM received, shutting down"),
        _ = int.recv() => info!("SIGINT received, shutting down"),
    }
}
