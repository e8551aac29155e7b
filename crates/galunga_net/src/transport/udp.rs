//! UDP transport backed by a tokio socket on its own I/O thread.

use std::net::SocketAddr;
use std::thread::JoinHandle;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{debug, error, info};

use super::Transport;
use crate::error::NetError;

/// Largest datagram the I/O thread will read.
pub const MAX_DATAGRAM: usize = 64 * 1024;

type Datagram = (SocketAddr, Vec<u8>);

/// A UDP socket served by a background thread running a single-threaded
/// tokio runtime.
///
/// Received datagrams are queued for [`Transport::try_recv`]; sent datagrams
/// are queued for the I/O thread. Dropping the transport stops and joins the
/// thread.
pub struct UdpTransport {
    local_addr: SocketAddr,
    inbound: UnboundedReceiver<Datagram>,
    outbound: Option<UnboundedSender<Datagram>>,
    thread: Option<JoinHandle<()>>,
}

impl UdpTransport {
    /// Bind `addr` and start the I/O thread.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Bind`] if the socket cannot be bound, or
    /// [`NetError::Io`] if the runtime or thread cannot be started.
    pub fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let socket =
            std::net::UdpSocket::bind(addr).map_err(|source| NetError::Bind { addr, source })?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let (in_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, out_rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(format!("udp-io-{local_addr}"))
            .spawn(move || runtime.block_on(serve(socket, in_tx, out_rx)))?;

        info!(%local_addr, "udp transport bound");
        Ok(Self {
            local_addr,
            inbound,
            outbound: Some(outbound),
            thread: Some(thread),
        })
    }
}

async fn serve(
    socket: std::net::UdpSocket,
    inbound: UnboundedSender<Datagram>,
    mut outbound: UnboundedReceiver<Datagram>,
) {
    let socket = match UdpSocket::from_std(socket) {
        Ok(socket) => socket,
        Err(e) => {
            error!(error = %e, "failed to register udp socket");
            return;
        }
    };
    let mut buf = vec![0_u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    if inbound.send((from, buf[..len].to_vec())).is_err() {
                        break;
                    }
                }
                // ICMP port-unreachable surfaces here on some platforms.
                Err(e) => debug!(error = %e, "udp receive failed"),
            },
            queued = outbound.recv() => match queued {
                Some((to, datagram)) => {
                    if let Err(e) = socket.send_to(&datagram, to).await {
                        debug!(%to, error = %e, "udp send failed");
                    }
                }
                None => break,
            },
        }
    }
    debug!("udp io thread stopped");
}

impl Transport for UdpTransport {
    fn try_recv(&mut self) -> Result<Option<Datagram>, NetError> {
        match self.inbound.try_recv() {
            Ok(datagram) => Ok(Some(datagram)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(NetError::TransportClosed),
        }
    }

    fn send(&mut self, addr: SocketAddr, datagram: Vec<u8>) -> Result<(), NetError> {
        self.outbound
            .as_ref()
            .ok_or(NetError::TransportClosed)?
            .send((addr, datagram))
            .map_err(|_| NetError::TransportClosed)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        // Closing the outbound queue ends the I/O loop.
        self.outbound.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(local_addr = %self.local_addr, "udp io thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
