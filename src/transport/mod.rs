//! Abstract Device transport interface.
use std::time::Duration;

use thiserror::Error;

pub use self::usb::UsbTransport;

#[cfg(test)]
pub(crate) mod mock;
mod usb;

/// Failure of the underlying byte channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing arrived before the deadline.
    #[error("timed out")]
    Timeout,
    #[error(transparent)]
    Usb(#[from] rusb::Error),
}

/// Abstraction of the transport layer.
///
/// The bootloader channel is half-duplex: one frame out, at most one packet
/// back. Framing and pairing live in [`crate::Flashing`].
pub trait Transport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<(), TransportError>;
    fn recv_raw(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_raw(&mut self, raw: &[u8]) -> Result<(), TransportError> {
        (**self).send_raw(raw)
    }

    fn recv_raw(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).recv_raw(max_len, timeout)
    }
}
