//! rttometer - UDP round-trip time meter.
//!
//! A prober periodically sends timestamped probes to a reflector, which echoes
//! each one back with its own timestamp appended. The prober writes one line
//! per reply: `client_send_us server_reply_us rtt_us`.
//!
//! # Usage
//!
//! Run as a reflector (server):
//! ```bash
//! rttometer -s 9000
//! ```
//!
//! Run as a prober (client), 100 measures every 50 ms into a file:
//! ```bash
//! rttometer -n 100 -p 50000 -o rtt.txt 192.168.1.1 9000
//! ```

/// Wire format encoding and datagram classification.
pub mod codec;
/// Command-line configuration and validation.
pub mod configuration;
/// Liveness handshake preceding measurement.
pub mod handshake;
/// Probe emission and reply recording.
pub mod prober;
/// Stateless datagram reflector.
pub mod reflector;
/// Interrupt handling and resource release.
pub mod shutdown;
/// Result records and the output sink.
pub mod sink;
/// Exit summaries.
pub mod stats;
/// Timestamp generation utilities.
pub mod time;
/// Periodic probe timer.
pub mod timer;
