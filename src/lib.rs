//! USB bootloader protocol for nRF24LU1+ based dongles.

pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod image;
pub mod protocol;
pub mod transport;

pub use self::device::{DeviceProfile, Timeouts};
pub use self::error::{Error, Result};
pub use self::flashing::{Flashing, ReadSize, Unprotect, WriteReport};
pub use self::image::SparseImage;
pub use self::protocol::{Command, Opcode, Response};
pub use self::transport::Transport;
