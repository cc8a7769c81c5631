//! USB transport (C1): open/close the probe and run control/bulk transfers.
//!
//! The rest of the stack is generic over the [`Transport`] trait so it can
//! be driven against an in-memory fake in tests instead of only against a
//! real `rusb` device.

use std::time::Duration;

use crate::error::{Error, Result};
use rusb::UsbContext;

/// USB vendor ID of the CC-Debugger probe.
pub const VENDOR_ID: u16 = 0x0451;
/// USB product ID of the CC-Debugger probe.
pub const PRODUCT_ID: u16 = 0x16a2;

const INTERFACE: u8 = 0;
const BULK_ENDPOINT: u8 = 0x04;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(1);

/// Selects transfer direction. The USB endpoint-address direction bit is
/// OR-ed in by the transport, not by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// The two primitive operations every layer above C1 is built from.
///
/// Implemented by [`UsbTransport`] for real hardware and by a recording
/// fake in `tests` for unit-testing the framing built by C2-C4.
pub trait Transport {
    /// Vendor control transfer. `buf` is filled (IN) or sent (OUT).
    /// Fails unless exactly `buf.len()` bytes are transferred.
    fn control(&mut self, dir: Direction, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<()>;

    /// Bulk transfer on the probe's single bulk endpoint. Fails on a
    /// short transfer.
    fn bulk(&mut self, dir: Direction, buf: &mut [u8]) -> Result<()>;
}

/// An exclusively-owned, open CC-Debugger USB device.
///
/// Interface 0 is claimed for the lifetime of this handle; any active
/// kernel driver on it was detached at `open` time. Dropping the handle
/// releases the interface and closes the device, mirroring the reverse
/// acquisition-order teardown the original C implementation performs
/// manually on every exit path.
pub struct UsbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
    kernel_driver_was_active: bool,
}

impl UsbTransport {
    /// Enumerates USB devices, opens the first one matching
    /// `(vendor_id, product_id)`, detaches any active kernel driver on
    /// interface 0, and claims it.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
        let context = rusb::Context::new()?;
        let devices = context.devices()?;

        let device = devices
            .iter()
            .find(|dev| match dev.device_descriptor() {
                Ok(desc) => desc.vendor_id() == vendor_id && desc.product_id() == product_id,
                Err(_) => false,
            })
            .ok_or(Error::DeviceNotFound)?;

        let mut handle = device.open()?;

        let kernel_driver_was_active = handle.kernel_driver_active(INTERFACE).unwrap_or(false);
        if kernel_driver_was_active {
            handle.detach_kernel_driver(INTERFACE)?;
        }

        handle.claim_interface(INTERFACE)?;

        log::info!("[USB] opened device {:04x}:{:04x}", vendor_id, product_id);

        Ok(UsbTransport {
            handle,
            kernel_driver_was_active,
        })
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        log::info!("[USB] closing connection");
        let _ = self.handle.release_interface(INTERFACE);
        if self.kernel_driver_was_active {
            let _ = self.handle.attach_kernel_driver(INTERFACE);
        }
    }
}

impl Transport for UsbTransport {
    fn control(&mut self, dir: Direction, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<()> {
        log::debug!(
            "[USB] control <{}> {}B req=0x{:02x} val=0x{:02x} idx=0x{:02x}",
            if dir == Direction::In { "in" } else { "out" },
            buf.len(),
            request,
            value,
            index
        );

        let transferred = match dir {
            Direction::In => self.handle.read_control(
                rusb::request_type(rusb::Direction::In, rusb::RequestType::Vendor, rusb::Recipient::Device),
                request,
                value,
                index,
                buf,
                TRANSFER_TIMEOUT,
            )?,
            Direction::Out => self.handle.write_control(
                rusb::request_type(rusb::Direction::Out, rusb::RequestType::Vendor, rusb::Recipient::Device),
                request,
                value,
                index,
                buf,
                TRANSFER_TIMEOUT,
            )?,
        };

        if transferred != buf.len() {
            return Err(Error::ShortTransfer {
                expected: buf.len(),
                actual: transferred,
            });
        }

        Ok(())
    }

    fn bulk(&mut self, dir: Direction, buf: &mut [u8]) -> Result<()> {
        log::debug!(
            "[USB] bulk <{}> {}B",
            if dir == Direction::In { "in" } else { "out" },
            buf.len()
        );

        let endpoint = BULK_ENDPOINT
            | match dir {
                Direction::In => rusb::constants::LIBUSB_ENDPOINT_IN,
                Direction::Out => rusb::constants::LIBUSB_ENDPOINT_OUT,
            };

        let transferred = match dir {
            Direction::In => self.handle.read_bulk(endpoint, buf, TRANSFER_TIMEOUT)?,
            Direction::Out => self.handle.write_bulk(endpoint, buf, TRANSFER_TIMEOUT)?,
        };

        if transferred != buf.len() {
            return Err(Error::ShortTransfer {
                expected: buf.len(),
                actual: transferred,
            });
        }

        Ok(())
    }
}
