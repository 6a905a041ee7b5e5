//! Wire format of the probe/reflect protocol.
//!
//! All integer fields are unsigned 64-bit values in big-endian (network) order,
//! independent of host endianness.
//!
//! ```text
//!  Handshake:  "hello" (5 octets, ASCII)
//!
//!  Probe:
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |                    Prober Send Timestamp                      |
//!  |                     (microseconds, u64)                       |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//!  Reflected:
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |              Prober Send Timestamp (echoed as-is)             |
//!  |                                                               |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |                   Reflector Reply Timestamp                   |
//!  |                                                               |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

/// Literal payload exchanged during the handshake, in both directions.
pub const HANDSHAKE: &[u8] = b"hello";

/// Size of a single encoded timestamp field.
pub const FIELD_SIZE: usize = 8;

/// Size of a probe datagram.
pub const PROBE_SIZE: usize = FIELD_SIZE;

/// Size of a reflected datagram (echoed probe + reflector timestamp).
pub const REFLECTED_SIZE: usize = 2 * FIELD_SIZE;

/// Encodes a value into its 8-byte wire representation.
pub fn encode64(value: u64) -> [u8; FIELD_SIZE] {
    value.to_be_bytes()
}

/// Decodes an 8-byte wire field.
///
/// Callers size-check the datagram and slice out exactly one field; the array
/// type makes a short read impossible to express.
pub fn decode64(bytes: &[u8; FIELD_SIZE]) -> u64 {
    u64::from_be_bytes(*bytes)
}

/// Builds a reflected datagram from a received probe payload and the
/// reflector's own timestamp. The probe bytes are copied verbatim.
pub fn reflect_probe(probe: &[u8; PROBE_SIZE], reflector_us: u64) -> [u8; REFLECTED_SIZE] {
    let mut buf = [0u8; REFLECTED_SIZE];
    buf[..FIELD_SIZE].copy_from_slice(probe);
    buf[FIELD_SIZE..].copy_from_slice(&encode64(reflector_us));
    buf
}

/// A datagram as seen by the reflector, classified by its length first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// The literal handshake payload.
    Handshake,
    /// An 8-byte probe; the raw bytes are kept so they can be echoed unchanged.
    Probe(&'a [u8; PROBE_SIZE]),
    /// Anything else.
    Unknown(&'a [u8]),
}

impl<'a> Inbound<'a> {
    pub fn classify(datagram: &'a [u8]) -> Self {
        match datagram.len() {
            PROBE_SIZE => match datagram.try_into() {
                Ok(probe) => Inbound::Probe(probe),
                Err(_) => Inbound::Unknown(datagram),
            },
            len if len == HANDSHAKE.len() && datagram == HANDSHAKE => Inbound::Handshake,
            _ => Inbound::Unknown(datagram),
        }
    }
}

/// A reply as seen by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Single-timestamp variant: the reflector echoed the probe untouched.
    Echoed { client_us: u64 },
    /// Dual-timestamp variant.
    Reflected { client_us: u64, server_us: u64 },
}

impl Reply {
    /// Decodes an 8- or 16-byte reply. Any other size yields `None`.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        match datagram.len() {
            PROBE_SIZE => {
                let client: &[u8; FIELD_SIZE] = datagram.try_into().ok()?;
                Some(Reply::Echoed {
                    client_us: decode64(client),
                })
            }
            REFLECTED_SIZE => {
                let client: &[u8; FIELD_SIZE] = datagram[..FIELD_SIZE].try_into().ok()?;
                let server: &[u8; FIELD_SIZE] = datagram[FIELD_SIZE..].try_into().ok()?;
                Some(Reply::Reflected {
                    client_us: decode64(client),
                    server_us: decode64(server),
                })
            }
            _ => None,
        }
    }

    pub fn client_us(&self) -> u64 {
        match *self {
            Reply::Echoed { client_us } | Reply::Reflected { client_us, .. } => client_us,
        }
    }

    /// Reflector timestamp, zero for the single-timestamp variant.
    pub fn server_us(&self) -> u64 {
        match *self {
            Reply::Echoed { .. } => 0,
            Reply::Reflected { server_us, .. } => server_us,
        }
    }
}
