//! Graceful shutdown: interrupt handling and resource release.
//!
//! An interrupt never jumps out of a loop. It cancels a [`CancellationToken`]
//! which both loops observe in their readiness wait; the loop then returns
//! through [`ShutdownContext::release`], which drops the socket and flushes
//! the sink. Cancelling the token by hand triggers exactly the same path.

use std::io::{self, Write};

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::sink::RecordSink;

/// Spawns a task that cancels the returned token on Ctrl-C (SIGINT).
///
/// Must be called from within a tokio runtime.
pub fn listen_for_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::debug!("Interrupt received, cancelling");
                trigger.cancel();
            }
            Err(e) => log::error!("Failed to listen for interrupt: {}", e),
        }
    });

    token
}

/// Transport handle and output sink owned by one loop.
///
/// Published before the loop starts blocking, released exactly once either at
/// normal exit or after cancellation. Releasing twice is harmless.
pub struct ShutdownContext<W: Write = io::Sink> {
    transport: Option<UdpSocket>,
    sink: Option<RecordSink<W>>,
}

impl ShutdownContext<io::Sink> {
    /// Context for a loop that writes no records.
    pub fn transport_only(transport: UdpSocket) -> Self {
        ShutdownContext {
            transport: Some(transport),
            sink: None,
        }
    }
}

impl<W: Write> ShutdownContext<W> {
    pub fn new(transport: UdpSocket, sink: RecordSink<W>) -> Self {
        ShutdownContext {
            transport: Some(transport),
            sink: Some(sink),
        }
    }

    pub fn transport(&self) -> io::Result<&UdpSocket> {
        self.transport.as_ref().ok_or_else(released)
    }

    /// Borrows the socket and the sink together for the duration of a loop.
    pub fn parts(&mut self) -> io::Result<(&UdpSocket, &mut RecordSink<W>)> {
        match (self.transport.as_ref(), self.sink.as_mut()) {
            (Some(transport), Some(sink)) => Ok((transport, sink)),
            _ => Err(released()),
        }
    }

    /// Closes the socket and flushes the sink.
    pub fn release(&mut self) -> io::Result<()> {
        if let Some(transport) = self.transport.take() {
            if let Ok(addr) = transport.local_addr() {
                log::debug!("Closing socket {}", addr);
            }
            drop(transport);
        }

        match self.sink.take() {
            Some(mut sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for ShutdownContext<W> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Failed to flush output: {}", e);
        }
    }
}

fn released() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket already released")
}
