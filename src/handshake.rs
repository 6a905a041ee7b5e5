//! One-shot liveness exchange that precedes measurement.
//!
//! The prober sends the literal [`HANDSHAKE`] payload and waits for the very
//! same bytes back. There is no retry: a failed handshake means the peer is
//! unreachable or speaks something else.

use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::codec::HANDSHAKE;

/// Largest reply the handshake looks at; anything longer is malformed anyway.
const HANDSHAKE_BUF_SIZE: usize = 255;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Failed to send handshake to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to receive handshake from {peer}: {source}")]
    Receive {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to receive handshake: {0}")]
    Accept(#[source] io::Error),
    #[error("Failed to send handshake back to {peer}: {source}")]
    Acknowledge {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Handshake msg malformed from {peer} ({len} bytes)")]
    Malformed { peer: SocketAddr, len: usize },
}

/// Prober side: send the handshake to `peer` and verify the echo. Datagrams
/// from other sources are skipped.
pub async fn initiate(socket: &UdpSocket, peer: SocketAddr) -> Result<(), HandshakeError> {
    socket
        .send_to(HANDSHAKE, peer)
        .await
        .map_err(|source| HandshakeError::Send { peer, source })?;

    let mut buf = [0u8; HANDSHAKE_BUF_SIZE];
    loop {
        let (len, src) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|source| HandshakeError::Receive { peer, source })?;

        if src != peer {
            log::debug!("Ignoring {} byte datagram from {} during handshake", len, src);
            continue;
        }
        if &buf[..len] != HANDSHAKE {
            return Err(HandshakeError::Malformed { peer, len });
        }
        return Ok(());
    }
}

/// Reflector side: wait for one datagram, require it to be the handshake and
/// answer it to its source. Returns the address of the peer that shook hands.
pub async fn accept(socket: &UdpSocket) -> Result<SocketAddr, HandshakeError> {
    let mut buf = [0u8; HANDSHAKE_BUF_SIZE];
    let (len, peer) = socket
        .recv_from(&mut buf)
        .await
        .map_err(HandshakeError::Accept)?;

    if &buf[..len] != HANDSHAKE {
        return Err(HandshakeError::Malformed { peer, len });
    }

    socket
        .send_to(HANDSHAKE, peer)
        .await
        .map_err(|source| HandshakeError::Acknowledge { peer, source })?;

    Ok(peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn socket_pair() -> (UdpSocket, UdpSocket, SocketAddr) {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();
        let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (local, remote, remote_addr)
    }

    #[tokio::test]
    async fn test_initiate_against_echo() {
        let (local, remote, remote_addr) = socket_pair().await;

        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, src) = remote.recv_from(&mut buf).await.unwrap();
            remote.send_to(&buf[..len], src).await.unwrap();
            buf[..len].to_vec()
        });

        timeout(Duration::from_secs(2), initiate(&local, remote_addr))
            .await
            .unwrap()
            .unwrap();

        // Exactly one request went out and it was the literal payload.
        assert_eq!(echo.await.unwrap(), HANDSHAKE);
    }

    #[tokio::test]
    async fn test_initiate_rejects_wrong_reply() {
        let (local, remote, remote_addr) = socket_pair().await;

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, src) = remote.recv_from(&mut buf).await.unwrap();
            remote.send_to(b"hellx", src).await.unwrap();
        });

        let result = timeout(Duration::from_secs(2), initiate(&local, remote_addr))
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(HandshakeError::Malformed { len: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_initiate_rejects_longer_reply() {
        let (local, remote, remote_addr) = socket_pair().await;

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, src) = remote.recv_from(&mut buf).await.unwrap();
            remote.send_to(b"hello!", src).await.unwrap();
        });

        let result = timeout(Duration::from_secs(2), initiate(&local, remote_addr))
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(HandshakeError::Malformed { len: 6, .. })
        ));
    }

    #[tokio::test]
    async fn test_initiate_skips_foreign_sources() {
        let (local, remote, remote_addr) = socket_pair().await;
        let local_addr = local.local_addr().unwrap();

        // A stranger's datagram is already queued when the handshake starts.
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stranger.send_to(b"nope", local_addr).await.unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, src) = remote.recv_from(&mut buf).await.unwrap();
            remote.send_to(&buf[..len], src).await.unwrap();
        });

        timeout(Duration::from_secs(2), initiate(&local, remote_addr))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_accept_answers_handshake() {
        let reflector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reflector_addr = reflector.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        client.send_to(HANDSHAKE, reflector_addr).await.unwrap();
        let peer = timeout(Duration::from_secs(2), accept(&reflector))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer, client_addr);

        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], HANDSHAKE);
    }

    #[tokio::test]
    async fn test_accept_rejects_probe_as_first_datagram() {
        let reflector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reflector_addr = reflector.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client
            .send_to(&crate::codec::encode64(1), reflector_addr)
            .await
            .unwrap();
        let result = timeout(Duration::from_secs(2), accept(&reflector))
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(HandshakeError::Malformed { len: 8, .. })
        ));
    }
}
