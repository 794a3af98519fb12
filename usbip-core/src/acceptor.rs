//! TCP listener: binds USB/IP's well-known port and spawns a [`session::run`]
//! task per accepted connection (SPEC_FULL.md §4.5).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::export::ExportTable;
use crate::session;

pub const USBIP_PORT: u16 = 3240;
const LISTEN_BACKLOG: i32 = 16;

/// A running acceptor. Dropping or calling [`Acceptor::shutdown`] signals
/// every live session to DRAIN; the listener itself stops accepting as soon
/// as `run` observes the shutdown signal.
pub struct Acceptor {
    shutdown_tx: watch::Sender<bool>,
}

impl Acceptor {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Bind `0.0.0.0:3240` and accept connections until shutdown, handing each
/// one to an independently-spawned [`session::run`]. Returns once the
/// listener has stopped accepting; in-flight sessions keep running and
/// drain on their own schedule.
pub async fn run(table: Arc<ExportTable>) -> io::Result<Acceptor> {
    let addr: SocketAddr = ([0, 0, 0, 0], USBIP_PORT).into();
    let listener = bind_listener(addr)?;
    info!(%addr, "usbip daemon listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let acceptor = Acceptor { shutdown_tx };

    tokio::spawn(accept_loop(listener, table, shutdown_rx));

    Ok(acceptor)
}

async fn accept_loop(listener: TcpListener, table: Arc<ExportTable>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("acceptor shutting down");
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "accepted connection");
                        let table = Arc::clone(&table);
                        let session_shutdown = shutdown_rx.clone();
                        tokio::spawn(async move {
                            session::run(stream, table, session_shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed, continuing");
                    }
                }
            }
        }
    }
}

/// Run the acceptor until a Ctrl-C is received, then request shutdown and
/// wait out the drain grace period naturally (sessions exit on their own).
pub async fn run_until_ctrl_c(table: Arc<ExportTable>) -> io::Result<()> {
    let acceptor = run(table).await?;
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received interrupt, shutting down"),
        Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down anyway"),
    }
    acceptor.shutdown();
    Ok(())
}
