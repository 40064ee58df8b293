//! USB Transportation.
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};

use super::{Transport, TransportError};
use crate::{
    device::DeviceProfile,
    error::{Error, Result},
};

pub struct UsbTransport {
    device_handle: DeviceHandle<Context>,
    endpoint_out: u8,
    endpoint_in: u8,
    interface: u8,
    send_timeout: Duration,
}

fn map_usb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        other => TransportError::Usb(other),
    }
}

fn matches_profile(device: &Device<Context>, profile: &DeviceProfile) -> bool {
    device
        .device_descriptor()
        .map(|desc| desc.vendor_id() == profile.vendor_id && desc.product_id() == profile.product_id)
        .unwrap_or(false)
}

impl UsbTransport {
    /// Open the first attached device matching `profile`.
    pub fn open(profile: &DeviceProfile) -> Result<UsbTransport> {
        let context = Context::new().map_err(|e| Error::Open(e.into()))?;

        let device = context
            .devices()
            .map_err(|e| Error::Open(e.into()))?
            .iter()
            .find(|device| matches_profile(device, profile))
            .ok_or(Error::DeviceNotFound {
                vendor_id: profile.vendor_id,
                product_id: profile.product_id,
            })?;
        log::debug!("Found USB Device {:?}", device);

        let mut device_handle = device.open().map_err(|e| Error::Open(e.into()))?;

        let config = device
            .active_config_descriptor()
            .or_else(|_| device.config_descriptor(0))
            .map_err(|e| Error::Open(e.into()))?;

        let mut endpoint_out_found = false;
        let mut endpoint_in_found = false;
        for intf in config.interfaces() {
            for desc in intf.descriptors() {
                if desc.interface_number() != profile.interface {
                    continue;
                }
                for endpoint in desc.endpoint_descriptors() {
                    if endpoint.address() == profile.endpoint_out {
                        endpoint_out_found = true;
                    }
                    if endpoint.address() == profile.endpoint_in {
                        endpoint_in_found = true;
                    }
                }
            }
        }

        if !(endpoint_out_found && endpoint_in_found) {
            log::error!(
                "Endpoints {:#04x}/{:#04x} not found on interface {}",
                profile.endpoint_out,
                profile.endpoint_in,
                profile.interface
            );
            return Err(Error::Open(TransportError::Usb(rusb::Error::NotFound)));
        }

        // Not supported on every platform, claiming reports the real failure.
        if let Err(e) = device_handle.set_auto_detach_kernel_driver(true) {
            log::debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        device_handle
            .claim_interface(profile.interface)
            .map_err(|e| Error::Open(e.into()))?;

        log::info!("Opened {}", profile);
        Ok(UsbTransport {
            device_handle,
            endpoint_out: profile.endpoint_out,
            endpoint_in: profile.endpoint_in,
            interface: profile.interface,
            send_timeout: profile.timeouts().command,
        })
    }
}

impl Transport for UsbTransport {
    fn send_raw(&mut self, raw: &[u8]) -> std::result::Result<(), TransportError> {
        self.device_handle
            .write_bulk(self.endpoint_out, raw, self.send_timeout)
            .map_err(map_usb_error)?;
        Ok(())
    }

    fn recv_raw(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];
        let nread = self
            .device_handle
            .read_bulk(self.endpoint_in, &mut buf, timeout)
            .map_err(map_usb_error)?;
        buf.truncate(nread);
        Ok(buf)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.device_handle.release_interface(self.interface);
    }
}
