//! Reflector: echoes every datagram back to its sender.
//!
//! Datagrams are classified by length. Probes get the reflector timestamp
//! appended, handshakes are echoed as-is, and everything else follows the
//! configured [`UnknownDatagramPolicy`]. No per-sender state is kept, so any
//! number of probers can share one reflector.

use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{reflect_probe, Inbound, HANDSHAKE, REFLECTED_SIZE},
    configuration::{ReflectorSettings, UnknownDatagramPolicy},
    handshake::{self, HandshakeError},
    shutdown::ShutdownContext,
    stats::ReflectorStats,
    time::timestamp_micros,
};

/// Largest UDP payload; datagrams are never truncated before being forwarded.
const MAX_DATAGRAM_SIZE: usize = 65_535;

#[derive(Error, Debug)]
pub enum ReflectorError {
    #[error("Failed to bind socket to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("Failed to receive msg: {0}")]
    Receive(#[source] io::Error),
    #[error("Failed to send back to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// What to send back for one inbound datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Response<'a> {
    Handshake,
    Reflected([u8; REFLECTED_SIZE]),
    Forward(&'a [u8]),
    Drop,
}

impl Response<'_> {
    /// Payload to send, `None` if the datagram is not answered.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Response::Handshake => Some(HANDSHAKE),
            Response::Reflected(buf) => Some(&buf[..]),
            Response::Forward(buf) => Some(*buf),
            Response::Drop => None,
        }
    }
}

/// Builds the response to `datagram`. `now_us` is the reflector timestamp,
/// sampled right after the receive and before the reply is built.
pub fn respond(datagram: &[u8], now_us: u64, policy: UnknownDatagramPolicy) -> Response<'_> {
    match Inbound::classify(datagram) {
        Inbound::Handshake => Response::Handshake,
        Inbound::Probe(probe) => Response::Reflected(reflect_probe(probe, now_us)),
        Inbound::Unknown(bytes) => match policy {
            UnknownDatagramPolicy::Forward => Response::Forward(bytes),
            UnknownDatagramPolicy::Drop => Response::Drop,
        },
    }
}

pub struct Reflector {
    settings: ReflectorSettings,
    ctx: ShutdownContext,
    stats: ReflectorStats,
}

impl Reflector {
    pub async fn bind(settings: ReflectorSettings) -> Result<Self, ReflectorError> {
        let addr = settings.local_addr;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ReflectorError::Bind { addr, source })?;
        let bound = socket
            .local_addr()
            .map_err(|source| ReflectorError::Bind { addr, source })?;
        log::info!("Reflector listening on {}", bound);

        Ok(Reflector {
            settings,
            ctx: ShutdownContext::transport_only(socket),
            stats: ReflectorStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.ctx.transport()?.local_addr()
    }

    /// Reflects datagrams until `token` is cancelled.
    ///
    /// With `require_handshake` set, the very first datagram must be the
    /// handshake; anything else is fatal.
    pub async fn run(mut self, token: CancellationToken) -> Result<ReflectorStats, ReflectorError> {
        let result = self.serve(&token).await;
        if result.is_ok() {
            log::warn!("Interrupted");
        }
        if let Err(e) = self.ctx.release() {
            log::warn!("Failed to release reflector socket: {}", e);
        }
        result.map(|()| self.stats)
    }

    async fn serve(&mut self, token: &CancellationToken) -> Result<(), ReflectorError> {
        let socket = self.ctx.transport().map_err(ReflectorError::Receive)?;
        let stats = &mut self.stats;
        let settings = &self.settings;

        if settings.require_handshake {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                result = handshake::accept(socket) => {
                    let peer = result?;
                    stats.datagrams_received += 1;
                    stats.handshakes_answered += 1;
                    if settings.verbose {
                        log::info!("Handshake completed with {}", peer);
                    }
                }
            }
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => return Ok(()),

                result = socket.recv_from(&mut buf) => {
                    let (len, src) = result.map_err(ReflectorError::Receive)?;
                    let now_us = timestamp_micros();
                    stats.datagrams_received += 1;

                    let response = respond(&buf[..len], now_us, settings.unknown);
                    match response {
                        Response::Handshake => {
                            stats.handshakes_answered += 1;
                            if settings.verbose {
                                log::info!("Sending handshake to {}", src);
                            }
                        }
                        Response::Reflected(_) => stats.probes_reflected += 1,
                        Response::Forward(_) => {
                            stats.unknown_forwarded += 1;
                            log::debug!("Forwarding {} byte datagram from {} unchanged", len, src);
                        }
                        Response::Drop => {
                            stats.unknown_dropped += 1;
                            log::debug!("Dropping {} byte datagram from {}", len, src);
                        }
                    }

                    if let Some(payload) = response.payload() {
                        log::debug!("Sending back to {}", src);
                        socket
                            .send_to(payload, src)
                            .await
                            .map_err(|source| ReflectorError::Send { peer: src, source })?;
                    }
                }
            }
        }
    }
}
