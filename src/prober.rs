//! Prober: emits timestamped probes on a timer and records the replies.
//!
//! A single task waits on three sources at once: the cancellation token, the
//! probe timer and the socket. Replies that queue up during a burst of sends
//! are read between them, and every reply is fully recorded before the next
//! one is read.
//!
//! The socket is left unconnected. Datagrams from anyone but the peer are
//! ignored, and ICMP errors from an unreachable peer count as lost probes.

use std::{
    io::{self, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{encode64, Reply},
    configuration::ProberSettings,
    handshake::{self, HandshakeError},
    shutdown::ShutdownContext,
    sink::{RecordSink, ResultRecord},
    stats::{RttCollector, StatsSnapshot},
    time::timestamp_micros,
    timer::ProbeTimer,
};

const RECV_BUF_SIZE: usize = 255;

#[derive(Error, Debug)]
pub enum ProberError {
    #[error("Failed to create socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("Failed to send probe to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to receive reply from {peer}: {source}")]
    Receive {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write output: {0}")]
    Output(#[source] io::Error),
}

/// Why the prober stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of replies was recorded.
    LimitReached,
    /// The cancellation token fired.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub stop: StopReason,
    pub stats: StatsSnapshot,
}

pub struct Prober<W: Write> {
    settings: ProberSettings,
    ctx: ShutdownContext<W>,
}

impl<W: Write> Prober<W> {
    /// Binds an ephemeral socket of the peer's address family.
    pub async fn bind(settings: ProberSettings, sink: RecordSink<W>) -> Result<Self, ProberError> {
        let local_addr = match settings.peer.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let socket = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| ProberError::Bind {
                addr: local_addr,
                source,
            })?;

        Ok(Prober {
            settings,
            ctx: ShutdownContext::new(socket, sink),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.ctx.transport()?.local_addr()
    }

    /// Handshakes with the peer, then measures until the count limit is
    /// reached or `token` is cancelled. The socket is closed and the sink
    /// flushed before returning.
    pub async fn run(mut self, token: CancellationToken) -> Result<ProbeReport, ProberError> {
        let mut collector = RttCollector::new();
        let mut sent = 0u64;

        let stop = measure(
            &mut self.ctx,
            &self.settings,
            &token,
            &mut collector,
            &mut sent,
        )
        .await?;

        if stop == StopReason::Interrupted {
            log::warn!("Interrupted");
        }
        self.ctx.release().map_err(ProberError::Output)?;

        Ok(ProbeReport {
            stop,
            stats: collector.snapshot(sent),
        })
    }
}

/// Turns datagrams from the peer into result records.
struct Recorder<'a, W: Write> {
    settings: &'a ProberSettings,
    sink: &'a mut RecordSink<W>,
    collector: &'a mut RttCollector,
}

impl<W: Write> Recorder<'_, W> {
    /// Records one datagram. Returns `true` once the count limit is reached.
    fn record(
        &mut self,
        datagram: &[u8],
        src: SocketAddr,
        received_us: u64,
    ) -> Result<bool, ProberError> {
        if src != self.settings.peer {
            log::debug!("Ignoring {} byte datagram from {}", datagram.len(), src);
            return Ok(false);
        }

        let Some(reply) = Reply::decode(datagram) else {
            log::warn!("Ignoring {} byte datagram from {}", datagram.len(), src);
            return Ok(false);
        };

        let record = ResultRecord::from_reply(&reply, received_us);
        if self.settings.verbose {
            log::info!(
                "Start: {} | reply: {} | rtt: {}",
                record.client_send_us,
                record.server_reply_us,
                record.rtt_us
            );
        }
        self.sink.write(&record).map_err(ProberError::Output)?;
        self.collector.record(record.rtt_us);

        Ok(self.settings.limit == Some(self.collector.count()))
    }

    /// Records every reply already queued on `socket` without waiting.
    fn drain(&mut self, socket: &UdpSocket, buf: &mut [u8]) -> Result<bool, ProberError> {
        loop {
            match socket.try_recv_from(buf) {
                Ok((len, src)) => {
                    let received_us = timestamp_micros();
                    if self.record(&buf[..len], src, received_us)? {
                        return Ok(true);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => receive_failed(self.settings.peer, e)?,
            }
        }
    }
}

/// An unreachable peer only costs what was sent meanwhile.
fn receive_failed(peer: SocketAddr, source: io::Error) -> Result<(), ProberError> {
    match source.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
            log::warn!("Reflector {} unreachable: {}", peer, source);
            Ok(())
        }
        _ => Err(ProberError::Receive { peer, source }),
    }
}

async fn measure<W: Write>(
    ctx: &mut ShutdownContext<W>,
    settings: &ProberSettings,
    token: &CancellationToken,
    collector: &mut RttCollector,
    sent: &mut u64,
) -> Result<StopReason, ProberError> {
    let peer = settings.peer;
    let (socket, sink) = ctx.parts().map_err(ProberError::Output)?;

    if settings.verbose {
        log::info!("Sending handshake to {}...", peer);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(StopReason::Interrupted),
        result = handshake::initiate(socket, peer) => result?,
    }
    if settings.verbose {
        log::info!("Successfully received handshake back from {}", peer);
    }

    let mut recorder = Recorder {
        settings,
        sink,
        collector,
    };
    let mut timer = ProbeTimer::new(settings.period);
    let mut buf = [0u8; RECV_BUF_SIZE];
    log::debug!(
        "Probing {} every {:?}, limit {:?}",
        peer,
        timer.period(),
        settings.limit
    );

    loop {
        // Biased: a pending interrupt wins, and due probes go out first.
        tokio::select! {
            biased;

            _ = token.cancelled() => return Ok(StopReason::Interrupted),

            expirations = timer.wait() => {
                if expirations > 1 {
                    log::debug!("Timer fell behind, replaying {} probes", expirations);
                }
                for _ in 0..expirations {
                    if token.is_cancelled() {
                        return Ok(StopReason::Interrupted);
                    }
                    let probe = encode64(timestamp_micros());
                    socket
                        .send_to(&probe, peer)
                        .await
                        .map_err(|source| ProberError::Send { peer, source })?;
                    *sent += 1;

                    // A replay longer than the period would otherwise keep
                    // the timer ready and starve the socket.
                    if recorder.drain(socket, &mut buf)? {
                        return Ok(StopReason::LimitReached);
                    }
                }
            }

            result = socket.recv_from(&mut buf) => match result {
                Ok((len, src)) => {
                    let received_us = timestamp_micros();
                    if recorder.record(&buf[..len], src, received_us)? {
                        return Ok(StopReason::LimitReached);
                    }
                }
                Err(e) => receive_failed(peer, e)?,
            },
        }
    }
}
