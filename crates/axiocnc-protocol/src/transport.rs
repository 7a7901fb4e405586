//! Transport abstraction: owns the physical link (serial or TCP) a
//! Controller writes to and reads from. Realtime bytes bypass everything
//! above this layer — they are written directly, never queued.

use axiocnc_core::error::PortError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

/// Single-byte realtime commands, common across firmware families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeByte {
    FeedHold,
    CycleStart,
    SoftReset,
    StatusQuery,
}

impl RealtimeByte {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::FeedHold => b'!',
            Self::CycleStart => b'~',
            Self::SoftReset => 0x18,
            Self::StatusQuery => b'?',
        }
    }
}

/// A connection to a CNC controller: serial port or raw TCP socket. Owned
/// exclusively by one Controller task; all reads/writes happen from that
/// task's select loop.
pub enum Transport {
    Serial(tokio_serial::SerialStream),
    Tcp(tokio::net::TcpStream),
}

impl Transport {
    pub async fn open_serial(port: &str, baud_rate: u32) -> Result<Self, PortError> {
        let stream = tokio_serial::new(port, baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| PortError::FailedToOpen {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Transport::Serial(stream))
    }

    pub async fn open_tcp(host: &str, port: u16) -> Result<Self, PortError> {
        let addr = format!("{host}:{port}");
        let stream =
            tokio::net::TcpStream::connect(&addr)
                .await
                .map_err(|e| PortError::FailedToOpen {
                    port: addr.clone(),
                    reason: e.to_string(),
                })?;
        Ok(Transport::Tcp(stream))
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        let result = match self {
            Transport::Serial(s) => s.write_all(bytes).await,
            Transport::Tcp(s) => s.write_all(bytes).await,
        };
        result.map_err(|e| PortError::Io {
            port: self.label(),
            reason: e.to_string(),
        })
    }

    /// Write a single realtime byte, bypassing any buffering.
    pub async fn write_realtime(&mut self, byte: RealtimeByte) -> Result<(), PortError> {
        self.write_all(&[byte.as_byte()]).await
    }

    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        let result = match self {
            Transport::Serial(s) => s.read(buf).await,
            Transport::Tcp(s) => s.read(buf).await,
        };
        result.map_err(|e| PortError::Io {
            port: self.label(),
            reason: e.to_string(),
        })
    }

    fn label(&self) -> String {
        match self {
            Transport::Serial(_) => "serial".to_string(),
            Transport::Tcp(_) => "tcp".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_bytes_match_grbl_protocol() {
        assert_eq!(RealtimeByte::FeedHold.as_byte(), b'!');
        assert_eq!(RealtimeByte::CycleStart.as_byte(), b'~');
        assert_eq!(RealtimeByte::SoftReset.as_byte(), 0x18);
        assert_eq!(RealtimeByte::StatusQuery.as_byte(), b'?');
    }
}
