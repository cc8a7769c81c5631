//! Programming engine (C4): flash erase, target identification, the DMA-
//! assisted flash write pipeline, and CRC-16 verification.

use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::crc::{crc16, DEFAULT_SEED};
use crate::dma::{self, Channel};
use crate::error::{Error, Result};
use crate::target::Target;
use crate::transport::Transport;

const MEM_CHIP_VERSION: u16 = 0x6249;
const MEM_CHIP_ID: u16 = 0x624a;
const MEM_CHIP_INFO: u16 = 0x6276;

const FLASH_CONTROL: u16 = 0x6270;
const FLASH_ADDR_LOW: u16 = 0x6271;
const FLASH_ADDR_HIGH: u16 = 0x6272;
const XDATA_FLASH: u16 = 0x8000;
const RNG_DATA_LOW: u16 = 0x70bc;
const RNG_DATA_HIGH: u16 = 0x70bd;

const FLASH_BUSY: u8 = 0x80;
const FLASH_WRITE: u8 = 0x02;
const STATUS_ERASE_BUSY: u8 = 0x80;

const T_DATA: u16 = 0x0000;
const T_CFG: u16 = 0x0800;
const BLOCK_SIZE: usize = 1024;

const ERASE_DEADLINE: Duration = Duration::from_secs(10);
const CHUNK_DEADLINE: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Identity and geometry of the attached target chip, decoded from three
/// xdata reads (see §3 of the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub chip_id: u8,
    pub chip_version: u8,
    pub flash_kib: u32,
    pub sram_kib: u32,
}

/// The state model driving a single programming run. Any USB error or
/// precondition failure moves the engine to `Failed`, which is terminal:
/// the caller must close and reopen the probe handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    DebugReady,
    Erasing,
    Programming,
    Verifying,
    Failed,
}

/// Orchestrates C3 target primitives into the erase/write/verify
/// operations described in §4.4. Constructed once debug mode has already
/// been entered via [`crate::probe::Probe::prepare_enter_debug`].
pub struct ProgrammingEngine<'t, T: Transport> {
    target: Target<'t, T>,
    state: ProgramState,
}

impl<'t, T: Transport> ProgrammingEngine<'t, T> {
    pub fn new(target: Target<'t, T>) -> Self {
        ProgrammingEngine {
            target,
            state: ProgramState::DebugReady,
        }
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    fn require_ready(&self) -> Result<()> {
        if self.state == ProgramState::DebugReady {
            Ok(())
        } else {
            Err(Error::Config("programming engine is not in DEBUG_READY state"))
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = ProgramState::Failed;
        err
    }

    /// Issues chip-erase and polls status until `ERASE_BUSY` clears,
    /// bounded by a 10 s deadline.
    pub fn erase(&mut self) -> Result<()> {
        self.require_ready()?;
        self.state = ProgramState::Erasing;
        log::info!("[engine] erasing flash");

        if let Err(e) = self.target.chip_erase() {
            return Err(self.fail(e));
        }

        let deadline = Instant::now() + ERASE_DEADLINE;
        loop {
            sleep(POLL_INTERVAL);
            let status = match self.target.read_status() {
                Ok(s) => s,
                Err(e) => return Err(self.fail(e)),
            };
            if status & STATUS_ERASE_BUSY == 0 {
                break;
            }
            if Instant::now() > deadline {
                return Err(self.fail(Error::Timeout("flash erase")));
            }
        }

        self.state = ProgramState::DebugReady;
        Ok(())
    }

    /// Reads chip id, chip version and chip info and decodes target
    /// geometry. The 2-byte `chip_info` read is issued as a single
    /// `read_xdata(_, 2)` so the probe returns exactly 2 bytes.
    pub fn target_info(&mut self) -> Result<TargetInfo> {
        self.require_ready()?;

        let chip_id = match self.target.read_xdata(MEM_CHIP_ID, 1) {
            Ok(b) => b[0],
            Err(e) => return Err(self.fail(e)),
        };
        let chip_version = match self.target.read_xdata(MEM_CHIP_VERSION, 1) {
            Ok(b) => b[0],
            Err(e) => return Err(self.fail(e)),
        };
        let chip_info_bytes = match self.target.read_xdata(MEM_CHIP_INFO, 2) {
            Ok(b) => b,
            Err(e) => return Err(self.fail(e)),
        };
        let chip_info = u16::from_le_bytes([chip_info_bytes[0], chip_info_bytes[1]]);

        let flash_kib = 1u32 << (4 + ((chip_info & 0x0070) >> 4));
        let sram_kib = u32::from((chip_info & 0x0700) >> 8) + 1;

        Ok(TargetInfo {
            chip_id,
            chip_version,
            flash_kib,
            sram_kib,
        })
    }

    /// Writes `data` to flash starting at `addr`, in chunks of at most
    /// 1024 bytes, per the DMA-assisted pipeline in §4.4. Fails with
    /// `Alignment` if `data.len()` isn't a multiple of 4.
    pub fn write_flash(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        self.require_ready()?;

        if data.len() % 4 != 0 {
            return Err(Error::Alignment { len: data.len() });
        }

        let mut addr = addr;
        let mut remaining = data;

        while !remaining.is_empty() {
            self.state = ProgramState::Programming;
            let chunk_len = remaining.len().min(BLOCK_SIZE);
            let (chunk, rest) = remaining.split_at(chunk_len);

            if let Err(e) = self.write_chunk(addr, chunk) {
                return Err(self.fail(e));
            }

            addr = addr.wrapping_add(chunk_len as u16);
            remaining = rest;
            self.state = ProgramState::DebugReady;
        }

        Ok(())
    }

    fn write_chunk(&mut self, addr: u16, chunk: &[u8]) -> Result<()> {
        let mut dma = dma::DmaConfig::new();
        dma.add(Channel(1), dma::burst_to_scratch(chunk.len() as u16, T_DATA))?;
        dma.add(Channel(2), dma::scratch_to_flash(chunk.len() as u16, T_DATA))?;
        dma.commit(&mut self.target, T_CFG)?;

        dma::arm(&mut self.target, Channel(1))?;
        self.target.burst_write(chunk)?;

        self.target.write_xdata_u8(FLASH_ADDR_LOW, (addr & 0xff) as u8)?;
        self.target.write_xdata_u8(FLASH_ADDR_HIGH, (addr >> 8) as u8)?;

        self.poll_flag_cleared(FLASH_BUSY, "flash-busy")?;

        dma::arm(&mut self.target, Channel(2))?;
        self.set_flash_flag(FLASH_WRITE)?;
        self.poll_flag_cleared(FLASH_WRITE, "flash-write")?;

        Ok(())
    }

    fn set_flash_flag(&mut self, flag: u8) -> Result<()> {
        let current = self.target.read_xdata(FLASH_CONTROL, 1)?[0];
        self.target.write_xdata_u8(FLASH_CONTROL, current | flag)
    }

    fn poll_flag_cleared(&mut self, flag: u8, what: &'static str) -> Result<()> {
        let deadline = Instant::now() + CHUNK_DEADLINE;
        loop {
            sleep(POLL_INTERVAL);
            let ctrl = self.target.read_xdata(FLASH_CONTROL, 1)?[0];
            if ctrl & flag == 0 {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(Error::Timeout(what));
            }
        }
    }

    /// Verifies `len` bytes of flash starting at `addr` against the
    /// host-computed CRC-16 of `expected_data`, using the target's RNG
    /// peripheral fed by a channel-0 DMA block pass over xdata's flash
    /// window.
    pub fn verify_flash(&mut self, addr: u16, expected_data: &[u8]) -> Result<()> {
        self.require_ready()?;
        self.state = ProgramState::Verifying;

        if let Err(e) = self.verify_inner(addr, expected_data) {
            return Err(self.fail(e));
        }

        self.state = ProgramState::DebugReady;
        Ok(())
    }

    fn verify_inner(&mut self, addr: u16, expected_data: &[u8]) -> Result<()> {
        let len = expected_data.len() as u16;

        let mut dma = dma::DmaConfig::new();
        dma.add(Channel(0), dma::flash_to_rng(XDATA_FLASH.wrapping_add(addr), len))?;
        dma.commit(&mut self.target, T_CFG)?;

        // The RNG's CRC mode latches the seed via two consecutive writes
        // to the LOW register: high byte first, then low byte. This
        // matches the probe firmware's observed behavior even though it
        // looks like swapped registers at a glance (see design notes).
        let seed = DEFAULT_SEED;
        self.target.write_xdata_u8(RNG_DATA_LOW, (seed >> 8) as u8)?;
        self.target.write_xdata_u8(RNG_DATA_LOW, (seed & 0xff) as u8)?;

        dma::arm(&mut self.target, Channel(0))?;
        dma::request(&mut self.target, Channel(0))?;

        let deadline = Instant::now() + CHUNK_DEADLINE;
        loop {
            sleep(POLL_INTERVAL);
            let irq = self.target.read_xdata(dma::DMA_IRQ, 1)?[0];
            if irq & (1 << 0) == 0 {
                break;
            }
            if Instant::now() > deadline {
                return Err(Error::Timeout("DMA verify completion"));
            }
        }

        let low = self.target.read_xdata(RNG_DATA_LOW, 1)?[0];
        let high = self.target.read_xdata(RNG_DATA_HIGH, 1)?[0];
        let crc_target = u16::from(low) | (u16::from(high) << 8);

        let crc_host = crc16(expected_data, DEFAULT_SEED);

        if crc_host != crc_target {
            return Err(Error::ChecksumMismatch {
                expected: crc_host,
                actual: crc_target,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_transport::FakeTransport;

    #[test]
    fn target_info_decodes_geometry() {
        let mut fake = FakeTransport::new();
        fake.queue_bulk_in(vec![0xa5]); // chip_id
        fake.queue_bulk_in(vec![0x14]); // chip_version
        fake.queue_bulk_in(vec![0x40, 0x07]); // chip_info, little-endian on the wire
        let mut engine = ProgrammingEngine::new(Target::new(&mut fake));
        let info = engine.target_info().unwrap();
        assert_eq!(info.chip_id, 0xa5);
        assert_eq!(info.chip_version, 0x14);
        assert_eq!(info.flash_kib, 256);
        assert_eq!(info.sram_kib, 8);
    }

    #[test]
    fn write_flash_rejects_unaligned_length() {
        let mut fake = FakeTransport::new();
        let mut engine = ProgrammingEngine::new(Target::new(&mut fake));
        let err = engine.write_flash(0x1000, &[0xde, 0xad, 0xbe]).unwrap_err();
        assert!(matches!(err, Error::Alignment { len: 3 }));
    }

    #[test]
    fn erase_polls_until_busy_clears() {
        let mut fake = FakeTransport::new();
        fake.queue_bulk_in(vec![STATUS_ERASE_BUSY]);
        fake.queue_bulk_in(vec![STATUS_ERASE_BUSY]);
        fake.queue_bulk_in(vec![0x00]);
        let mut engine = ProgrammingEngine::new(Target::new(&mut fake));
        engine.erase().unwrap();
        assert_eq!(engine.state(), ProgramState::DebugReady);
    }

    #[test]
    fn failed_operation_moves_engine_to_failed_state() {
        let mut fake = FakeTransport::new();
        // no scripted responses -> read_status fails immediately
        let mut engine = ProgrammingEngine::new(Target::new(&mut fake));
        let result = engine.erase();
        assert!(result.is_err());
        assert_eq!(engine.state(), ProgramState::Failed);
    }
}
