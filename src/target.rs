//! Target primitives (C3): short probe opcodes and synthesized xdata access.
//!
//! Two command families share the bulk endpoint: fixed 2-3 byte short
//! opcodes consumed directly by the probe firmware, and longer streams of
//! synthesized 8051 instruction fragments that drive the target CPU to
//! read or write its external data (xdata) address space.

use crate::error::Result;
use crate::transport::{Direction, Transport};

/// Short opcode: read the probe's debug-config register.
const RD_HDR: u8 = 0x1f;
const RD_CONFIG: u8 = 0x24;
const RD_STATUS: u8 = 0x34;
/// Short opcode: write the probe's debug-config register.
const WR_HDR: u8 = 0x4c;
const WR_CONFIG: u8 = 0x1d;
/// Short opcode: full-chip flash erase.
const ERASE_HDR: u8 = 0x1c;
const CHIP_ERASE: u8 = 0x14;
/// Short opcode: burst-write header, length OR-ed into the low 2 bits of
/// the first byte.
const BURST_HDR: u8 = 0xee;

const PREAMBLE: [u8; 20] = [
    0x40, 0x55, 0x00, 0x72, 0x56, 0xe5, 0x92, 0xbe, 0x57, 0x75, 0x92, 0x00, 0x74, 0x56, 0xe5, 0x83,
    0x76, 0x56, 0xe5, 0x82,
];
const POSTAMBLE: [u8; 10] = [0xd4, 0x57, 0x90, 0xc2, 0x57, 0x75, 0x92, 0x90, 0x56, 0x74];

const MOV_DPTR_READ: u8 = 0x4e;
const MOV_DPTR_READ_LAST: u8 = 0x4f;

/// A reusable, growable byte buffer for assembling target command
/// streams. `reset` clears the contents without releasing the backing
/// allocation, so a single buffer can be reused across many `read_xdata`
/// / `write_xdata` calls instead of allocating fresh `Vec`s.
#[derive(Default)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer { bytes: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    fn push_preamble(&mut self) {
        self.bytes.extend_from_slice(&PREAMBLE);
    }

    fn push_postamble(&mut self) {
        self.bytes.extend_from_slice(&POSTAMBLE);
    }

    fn push_mov_dptr(&mut self, addr: u16) {
        self.bytes.push(0xbe);
        self.bytes.push(0x57);
        self.bytes.push(0x90);
        self.bytes.push((addr >> 8) as u8);
        self.bytes.push((addr & 0xff) as u8);
    }

    fn push_read_byte(&mut self, last: bool) {
        self.bytes.push(if last { MOV_DPTR_READ_LAST } else { MOV_DPTR_READ });
        self.bytes.push(0x55);
        self.bytes.push(0xe0);
        self.bytes.push(0x5e);
        self.bytes.push(0x55);
        self.bytes.push(0xa3);
    }

    fn push_write_byte(&mut self, data: u8) {
        self.bytes.push(0x8e);
        self.bytes.push(0x56);
        self.bytes.push(0x74);
        self.bytes.push(data);
        self.bytes.push(0x5e);
        self.bytes.push(0x55);
        self.bytes.push(0xf0);
        self.bytes.push(0x5e);
        self.bytes.push(0x55);
        self.bytes.push(0xa3);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reads `addr` debug-config, chip-erase and status via the short opcode
/// family, plus synthesized xdata access, over a [`Transport`].
pub struct Target<'t, T: Transport> {
    transport: &'t mut T,
    scratch: CommandBuffer,
}

impl<'t, T: Transport> Target<'t, T> {
    pub fn new(transport: &'t mut T) -> Self {
        Target {
            transport,
            scratch: CommandBuffer::new(),
        }
    }

    pub fn read_config(&mut self) -> Result<u8> {
        log::debug!("[target] read debug-config");
        let mut cmd = [RD_HDR, RD_CONFIG];
        self.transport.bulk(Direction::Out, &mut cmd)?;
        let mut rsp = [0u8; 1];
        self.transport.bulk(Direction::In, &mut rsp)?;
        Ok(rsp[0])
    }

    pub fn write_config(&mut self, config: u8) -> Result<()> {
        log::debug!("[target] write debug-config 0x{:02x}", config);
        let mut cmd = [WR_HDR, WR_CONFIG, config];
        self.transport.bulk(Direction::Out, &mut cmd)
    }

    pub fn read_status(&mut self) -> Result<u8> {
        log::debug!("[target] read status");
        let mut cmd = [RD_HDR, RD_STATUS];
        self.transport.bulk(Direction::Out, &mut cmd)?;
        let mut rsp = [0u8; 1];
        self.transport.bulk(Direction::In, &mut rsp)?;
        Ok(rsp[0])
    }

    pub fn chip_erase(&mut self) -> Result<()> {
        log::debug!("[target] chip erase");
        let mut cmd = [ERASE_HDR, CHIP_ERASE];
        self.transport.bulk(Direction::Out, &mut cmd)
    }

    /// Issues the burst-write short header followed by the payload in a
    /// separate bulk OUT transfer. The probe streams this to the target
    /// over the debug link; some already-armed DMA channel pulls it into
    /// RAM.
    pub fn burst_write(&mut self, data: &[u8]) -> Result<()> {
        log::debug!("[target] burst write {}B", data.len());
        let len = data.len() as u16;
        let mut header = [BURST_HDR | (len >> 8) as u8, (len & 0xff) as u8];
        self.transport.bulk(Direction::Out, &mut header)?;
        let mut payload = data.to_vec();
        self.transport.bulk(Direction::Out, &mut payload)
    }

    /// Synthesizes a `MOV DPTR,#addr` + `size` repetitions of
    /// `MOVX A,@DPTR; INC DPTR`, toggling the opcode of the last
    /// iteration's `MOVX` to 0x4F so the probe captures the resulting
    /// byte back to the host.
    pub fn read_xdata(&mut self, addr: u16, size: usize) -> Result<Vec<u8>> {
        log::debug!("[target] read {}B of xdata at 0x{:04x}", size, addr);

        self.scratch.reset();
        self.scratch.push_preamble();
        self.scratch.push_mov_dptr(addr);
        for i in 0..size {
            self.scratch.push_read_byte(i == size - 1);
        }
        self.scratch.push_postamble();

        let mut out = self.scratch.as_bytes().to_vec();
        self.transport.bulk(Direction::Out, &mut out)?;

        let mut data = vec![0u8; size];
        self.transport.bulk(Direction::In, &mut data)?;
        Ok(data)
    }

    /// Synthesizes a `MOV DPTR,#addr` + per-byte `MOV A,#data; MOVX
    /// @DPTR,A; INC DPTR` for every byte of `data`.
    pub fn write_xdata(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        log::debug!("[target] write {}B of xdata at 0x{:04x}", data.len(), addr);

        self.scratch.reset();
        self.scratch.push_preamble();
        self.scratch.push_mov_dptr(addr);
        for &byte in data {
            self.scratch.push_write_byte(byte);
        }
        self.scratch.push_postamble();

        let mut out = self.scratch.as_bytes().to_vec();
        self.transport.bulk(Direction::Out, &mut out)
    }

    pub fn write_xdata_u8(&mut self, addr: u16, value: u8) -> Result<()> {
        self.write_xdata(addr, &[value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_transport::FakeTransport;

    #[test]
    fn read_xdata_framing_length() {
        let mut fake = FakeTransport::with_bulk_in(vec![0xaa, 0xbb, 0xcc]);
        let mut target = Target::new(&mut fake);
        let data = target.read_xdata(0x6249, 3).unwrap();
        assert_eq!(data, vec![0xaa, 0xbb, 0xcc]);

        let out = &fake_out(&fake)[0];
        assert_eq!(out.len(), 20 + 5 + 6 * 3 + 10);
        assert_eq!(out[3], 0x62);
        assert_eq!(out[4], 0x49);
    }

    #[test]
    fn write_xdata_framing_length() {
        let mut fake = FakeTransport::new();
        let mut target = Target::new(&mut fake);
        target.write_xdata(0x1000, &[0xde, 0xad, 0xbe, 0xef]).unwrap();

        let out = &fake_out(&fake)[0];
        assert_eq!(out.len(), 20 + 5 + 9 * 4 + 10);
        assert_eq!(out[3], 0x10);
        assert_eq!(out[4], 0x00);
    }

    #[test]
    fn read_terminator_is_last_byte_only() {
        let mut fake = FakeTransport::with_bulk_in(vec![0; 4]);
        let mut target = Target::new(&mut fake);
        target.read_xdata(0x6276, 4).unwrap();

        let out = &fake_out(&fake)[0];
        let body = &out[25..out.len() - 10]; // after preamble+mov_dptr
        let mut terminal_count = 0;
        for chunk in body.chunks(6) {
            match chunk[0] {
                MOV_DPTR_READ => {}
                MOV_DPTR_READ_LAST => terminal_count += 1,
                other => panic!("unexpected opcode {:#x}", other),
            }
        }
        assert_eq!(terminal_count, 1);
        assert_eq!(body[body.len() - 6], MOV_DPTR_READ_LAST);
    }

    fn fake_out(fake: &FakeTransport) -> Vec<Vec<u8>> {
        fake.out_transfers.clone()
    }
}
