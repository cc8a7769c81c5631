//! DMA descriptor construction and channel-table commit (part of C4).
//!
//! Channel 0 has its own descriptor-pointer register; channels 1-4 share
//! a contiguous table of up to four 8-byte descriptors at a single base
//! pointer. A single configuration batch must not mix the two families.

use crate::error::{Error, Result};
use crate::target::Target;
use crate::transport::Transport;

/// Transfer mode occupies bits 7..5 of descriptor byte 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Single = 0b000,
    Block = 0b010,
}

bitflags::bitflags! {
    /// Descriptor byte 7: increment/priority/wordsize flags.
    pub struct DescriptorFlags: u8 {
        const SRC_INC = 0b1000_0000;
        const DST_INC = 0b0010_0000;
        const IRQMASK = 0b0000_1000;
        const WORDSIZE_WORD = 0b0000_0100;
        const PRIO_HIGH = 0b0000_0010;
    }
}

/// A DMA trigger source. Only the two the programming engine needs are
/// named; others pass through as a raw value.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    None,
    Debug,
    Flash,
    Raw(u8),
}

impl Trigger {
    fn value(self) -> u8 {
        match self {
            Trigger::None => 0x00,
            Trigger::Debug => 0x1f,
            Trigger::Flash => 0x12,
            Trigger::Raw(v) => v,
        }
    }
}

/// One 8-byte big-endian DMA descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub src: u16,
    pub dst: u16,
    pub len: u16,
    pub trigger: Trigger,
    pub mode: TransferMode,
    pub src_inc: bool,
    pub dst_inc: bool,
}

impl Descriptor {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut flags = DescriptorFlags::PRIO_HIGH;
        if self.src_inc {
            flags |= DescriptorFlags::SRC_INC;
        }
        if self.dst_inc {
            flags |= DescriptorFlags::DST_INC;
        }

        [
            (self.src >> 8) as u8,
            (self.src & 0xff) as u8,
            (self.dst >> 8) as u8,
            (self.dst & 0xff) as u8,
            (self.len >> 8) as u8,
            (self.len & 0xff) as u8,
            ((self.mode as u8) << 5) | (self.trigger.value() & 0x1f),
            flags.bits(),
        ]
    }
}

const DEBUG_WRITE_DATA: u16 = 0x6260;
const FLASH_WRITE_DATA: u16 = 0x6273;
const RNG_DATA_HIGH: u16 = 0x70bd;

/// Channel-1 descriptor for a program chunk: the debug interface's
/// incoming burst-write byte stream into scratch RAM at `dst`.
pub fn burst_to_scratch(len: u16, dst: u16) -> Descriptor {
    Descriptor {
        src: DEBUG_WRITE_DATA,
        dst,
        len,
        trigger: Trigger::Debug,
        mode: TransferMode::Single,
        src_inc: false,
        dst_inc: true,
    }
}

/// Channel-2 descriptor for a program chunk: scratch RAM at `src` into
/// the flash controller's write-data register, triggered by the flash
/// controller itself as it drains each byte.
pub fn scratch_to_flash(len: u16, src: u16) -> Descriptor {
    Descriptor {
        src,
        dst: FLASH_WRITE_DATA,
        len,
        trigger: Trigger::Flash,
        mode: TransferMode::Single,
        src_inc: true,
        dst_inc: false,
    }
}

/// Channel-0 descriptor for verification: a software-requested block
/// read of `len` bytes of xdata at `src` (the flash window) fed byte by
/// byte into the RNG's CRC accumulator.
pub fn flash_to_rng(src: u16, len: u16) -> Descriptor {
    Descriptor {
        src,
        dst: RNG_DATA_HIGH,
        len,
        trigger: Trigger::None,
        mode: TransferMode::Block,
        src_inc: true,
        dst_inc: false,
    }
}

const DMA0_ADDR_HIGH: u16 = 0x70d5;
const DMA0_ADDR_LOW: u16 = 0x70d4;
const DMA14_ADDR_HIGH: u16 = 0x70d3;
const DMA14_ADDR_LOW: u16 = 0x70d2;
pub const DMA_ARM: u16 = 0x70d6;
pub const DMA_REQ: u16 = 0x70d7;
pub const DMA_IRQ: u16 = 0x70d1;

/// Channel number, 0..=4. Channel 0 is its own family; 1..=4 share the
/// four-slot descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel(pub u8);

/// A batch of DMA channel configurations destined for a single commit.
/// Enforces the "don't mix channel 0 with channels 1-4" invariant at
/// `add` time rather than at commit time, so a bad batch never reaches
/// the USB transport at all.
#[derive(Default)]
pub struct DmaConfig {
    is_channel_zero: Option<bool>,
    slots: [[u8; 8]; 4],
}

impl DmaConfig {
    pub fn new() -> Self {
        DmaConfig::default()
    }

    pub fn add(&mut self, channel: Channel, descriptor: Descriptor) -> Result<()> {
        let is_zero = channel.0 == 0;
        if let Some(existing) = self.is_channel_zero {
            if existing != is_zero {
                return Err(Error::Config("can't mix DMA channel 0 with channels 1-4 in one batch"));
            }
        }
        self.is_channel_zero = Some(is_zero);

        let slot = if is_zero { 0 } else { (channel.0 - 1) as usize };
        if slot >= self.slots.len() {
            return Err(Error::Config("DMA channel out of range"));
        }
        self.slots[slot] = descriptor.to_bytes();

        Ok(())
    }

    /// Writes the descriptor table to scratch xdata at `table_addr` and
    /// points the appropriate channel-family base register at it.
    pub fn commit<T: Transport>(&self, target: &mut Target<'_, T>, table_addr: u16) -> Result<()> {
        let is_zero = self.is_channel_zero.ok_or(Error::Config("commit with no channel configured"))?;

        let table_len = if is_zero { 8 } else { self.slots.len() * 8 };
        let mut table = Vec::with_capacity(table_len);
        for slot in &self.slots[..table_len / 8] {
            table.extend_from_slice(slot);
        }

        target.write_xdata(table_addr, &table)?;

        let (addr_low, addr_high) = if is_zero {
            (DMA0_ADDR_LOW, DMA0_ADDR_HIGH)
        } else {
            (DMA14_ADDR_LOW, DMA14_ADDR_HIGH)
        };

        target.write_xdata_u8(addr_low, (table_addr & 0xff) as u8)?;
        target.write_xdata_u8(addr_high, (table_addr >> 8) as u8)?;

        Ok(())
    }
}

/// Arms a single DMA channel by writing its bit into `DMA_ARM`.
pub fn arm<T: Transport>(target: &mut Target<'_, T>, channel: Channel) -> Result<()> {
    log::debug!("[dma] arm channel {}", channel.0);
    target.write_xdata_u8(DMA_ARM, 1 << channel.0)
}

/// Software-requests a single DMA channel by writing its bit into
/// `DMA_REQ`, used to kick off the CRC-16 verify pass.
pub fn request<T: Transport>(target: &mut Target<'_, T>, channel: Channel) -> Result<()> {
    log::debug!("[dma] software-request channel {}", channel.0);
    target.write_xdata_u8(DMA_REQ, 1 << channel.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_shape_matches_layout() {
        let d = Descriptor {
            src: 0x6260,
            dst: 0x0000,
            len: 1024,
            trigger: Trigger::Debug,
            mode: TransferMode::Single,
            src_inc: false,
            dst_inc: true,
        };
        let bytes = d.to_bytes();
        assert_eq!(bytes[0], 0x62);
        assert_eq!(bytes[1], 0x60);
        assert_eq!(bytes[2], 0x00);
        assert_eq!(bytes[3], 0x00);
        assert_eq!(bytes[4], 0x04); // 1024 >> 8
        assert_eq!(bytes[5], 0x00);
        assert_eq!(bytes[6] & 0xe0, (TransferMode::Single as u8) << 5);
        assert_eq!(bytes[6] & 0x1f, 0x1f); // DEBUG trigger
        assert_eq!(bytes[7] & DescriptorFlags::DST_INC.bits(), DescriptorFlags::DST_INC.bits());
        assert_eq!(bytes[7] & DescriptorFlags::SRC_INC.bits(), 0);
        assert_eq!(bytes[7] & DescriptorFlags::PRIO_HIGH.bits(), DescriptorFlags::PRIO_HIGH.bits());
    }

    #[test]
    fn mixing_channel_families_is_rejected() {
        let mut cfg = DmaConfig::new();
        let d = Descriptor {
            src: 0,
            dst: 0,
            len: 0,
            trigger: Trigger::None,
            mode: TransferMode::Block,
            src_inc: false,
            dst_inc: false,
        };
        cfg.add(Channel(0), d).unwrap();
        let err = cfg.add(Channel(1), d).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn channel_1_through_4_coexist() {
        let mut cfg = DmaConfig::new();
        let d = Descriptor {
            src: 0,
            dst: 0,
            len: 0,
            trigger: Trigger::None,
            mode: TransferMode::Single,
            src_inc: false,
            dst_inc: false,
        };
        cfg.add(Channel(1), d).unwrap();
        cfg.add(Channel(2), d).unwrap();
        assert!(cfg.is_channel_zero == Some(false));
    }
}
