//! Result records and the sink they are written to.

use std::{
    fmt,
    io::{self, BufWriter, Write},
};

use crate::{codec::Reply, time::elapsed_micros};

/// One measurement, written once and then dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultRecord {
    /// Prober send time, microseconds since the Unix epoch.
    pub client_send_us: u64,
    /// Reflector timestamp, zero when the reflector only echoed the probe.
    pub server_reply_us: u64,
    pub rtt_us: u64,
}

impl ResultRecord {
    pub fn from_reply(reply: &Reply, received_us: u64) -> Self {
        ResultRecord {
            client_send_us: reply.client_us(),
            server_reply_us: reply.server_us(),
            rtt_us: elapsed_micros(reply.client_us(), received_us),
        }
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.client_send_us, self.server_reply_us, self.rtt_us
        )
    }
}

/// Buffered line writer for result records.
///
/// Every record is written as a whole line, so flushing at any point between
/// two records never leaves a truncated line behind.
pub struct RecordSink<W: Write> {
    out: BufWriter<W>,
}

impl<W: Write> RecordSink<W> {
    pub fn new(out: W) -> Self {
        RecordSink {
            out: BufWriter::new(out),
        }
    }

    pub fn write(&mut self, record: &ResultRecord) -> io::Result<()> {
        writeln!(self.out, "{}", record)
    }

    /// Flushing an already flushed sink is a no-op.
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
