//! Probe control (C2): vendor-request-level operations against the
//! CC-Debugger itself, as opposed to the target chip behind it.

use crate::error::{Error, Result};
use crate::transport::{Direction, Transport};

const VENDOR_GET_INFO: u8 = 0xc0;
const VENDOR_GET_STATE: u8 = 0xc6;
const VENDOR_SET_SPEED: u8 = 0xcf;
const VENDOR_RESET: u8 = 0xc9;
const VENDOR_DEBUG_ENTER: u8 = 0xc5;

const STATUS_DEBUG_LOCKED: u8 = 0x04;

/// Debug-config bits understood by [`crate::target::Target::write_config`].
pub const CONFIG_TIMER_SUSPEND: u8 = 0x02;
pub const CONFIG_SOFT_POWER_MODE: u8 = 0x20;

/// Fixed 8-byte little-endian firmware info record.
///
/// `dontknow` is read but never interpreted by this crate or (per the
/// original implementation) by the probe's own host tool; it is carried
/// as a reserved field rather than rejected when nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub chip: u16,
    pub fw_id: u16,
    pub fw_rev: u16,
    _reserved: u16,
}

impl FirmwareInfo {
    fn from_bytes(buf: [u8; 8]) -> Self {
        FirmwareInfo {
            chip: u16::from_le_bytes([buf[0], buf[1]]),
            fw_id: u16::from_le_bytes([buf[2], buf[3]]),
            fw_rev: u16::from_le_bytes([buf[4], buf[5]]),
            _reserved: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }

    /// `chip == 0` means no target is attached, which is fatal for every
    /// subsequent operation.
    pub fn has_target(&self) -> bool {
        self.chip != 0
    }
}

/// Probe-level operations that don't go through the target command
/// buffer: `GET_INFO`, `GET_STATE`, `SET_SPEED`, `RESET`, `DEBUG_ENTER`.
pub struct Probe<'t, T: Transport> {
    transport: &'t mut T,
}

impl<'t, T: Transport> Probe<'t, T> {
    pub fn new(transport: &'t mut T) -> Self {
        Probe { transport }
    }

    pub fn fw_info(&mut self) -> Result<FirmwareInfo> {
        log::info!("[probe] get firmware info");
        let mut buf = [0u8; 8];
        self.transport.control(Direction::In, VENDOR_GET_INFO, 0, 0, &mut buf)?;
        Ok(FirmwareInfo::from_bytes(buf))
    }

    fn get_state(&mut self) -> Result<u8> {
        log::debug!("[probe] get target state");
        let mut buf = [0u8; 1];
        self.transport.control(Direction::In, VENDOR_GET_STATE, 0, 0, &mut buf)?;
        Ok(buf[0])
    }

    fn set_speed(&mut self, fast: bool) -> Result<()> {
        log::debug!("[probe] set speed to {}", if fast { "fast" } else { "slow" });
        let mut empty = [];
        self.transport
            .control(Direction::Out, VENDOR_SET_SPEED, if fast { 0 } else { 1 }, 0, &mut empty)
    }

    fn reset(&mut self, debug_mode: bool) -> Result<()> {
        log::debug!("[probe] reset target{}", if debug_mode { " in debug mode" } else { "" });
        let mut empty = [];
        self.transport
            .control(Direction::Out, VENDOR_RESET, 0, if debug_mode { 1 } else { 0 }, &mut empty)
    }

    fn debug_enter(&mut self) -> Result<()> {
        log::debug!("[probe] enter target debug");
        let mut empty = [];
        self.transport.control(Direction::Out, VENDOR_DEBUG_ENTER, 0, 0, &mut empty)
    }

    /// Precondition: `GET_STATE` must read zero (no activity in
    /// progress), else fails with `BadState`.
    ///
    /// Returns the target's debug status for callers that also want to
    /// observe `CPU_HALTED`/`OSCILLATOR_STABLE` etc; [`Error::Locked`] is
    /// raised if `DEBUG_LOCKED` is set.
    pub fn prepare_enter_debug(&mut self, slow: bool) -> Result<()> {
        let state = self.get_state()?;
        if state != 0 {
            return Err(Error::BadState(state));
        }

        self.set_speed(!slow)?;
        self.reset(true)?;
        self.debug_enter()?;

        Ok(())
    }

    pub fn leave_debug(&mut self) -> Result<()> {
        log::info!("[probe] leave debug mode");
        self.reset(false)
    }
}

/// Fails with [`Error::Locked`] if `status` has `DEBUG_LOCKED` set.
pub fn check_not_locked(status: u8) -> Result<()> {
    if status & STATUS_DEBUG_LOCKED != 0 {
        Err(Error::Locked)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_transport::FakeTransport;

    #[test]
    fn fw_info_decodes_little_endian_record() {
        let mut fake = FakeTransport::new();
        fake.queue_control_in(vec![0x30, 0x25, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]);
        let mut probe = Probe::new(&mut fake);
        let info = probe.fw_info().unwrap();
        assert_eq!(info.chip, 0x2530);
        assert_eq!(info.fw_id, 1);
        assert_eq!(info.fw_rev, 2);
        assert!(info.has_target());
    }

    #[test]
    fn fw_info_zero_chip_has_no_target() {
        let mut fake = FakeTransport::new();
        fake.queue_control_in(vec![0, 0, 0, 0, 0, 0, 0, 0]);
        let mut probe = Probe::new(&mut fake);
        let info = probe.fw_info().unwrap();
        assert!(!info.has_target());
    }

    #[test]
    fn prepare_enter_debug_fails_on_nonzero_state() {
        let mut fake = FakeTransport::new();
        fake.queue_control_in(vec![3]);
        let mut probe = Probe::new(&mut fake);
        let err = probe.prepare_enter_debug(false).unwrap_err();
        assert!(matches!(err, Error::BadState(3)));
    }

    #[test]
    fn locked_status_is_rejected() {
        assert!(matches!(check_not_locked(0x04), Err(Error::Locked)));
        assert!(check_not_locked(0x00).is_ok());
    }
}
