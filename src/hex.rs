//! Intel-HEX parsing (C5): a hand-rolled state machine rather than a
//! table-driven parser, since the record grammar is small and the
//! checksum/extended-address bookkeeping is easiest to follow as
//! explicit states.

use crate::error::{Error, Result};

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_LINEAR_ADDRESS: u8 = 0x04;

const IMAGE_SIZE: usize = 0x10000;
const MIN_LINE_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    GetLine,
    Colon,
    ByteCount,
    Address,
    RecordType,
    Data,
    Checksum,
    Done,
}

/// A flash image assembled from an Intel-HEX file: a full 64 KiB byte
/// buffer plus the low/high watermark of addresses actually written, so
/// callers can extract just the used window.
#[derive(Debug)]
pub struct HexImage {
    buf: Box<[u8; IMAGE_SIZE]>,
    touched: Vec<bool>,
    min_addr: Option<u32>,
    max_addr: Option<u32>,
}

impl HexImage {
    fn new() -> Self {
        HexImage {
            buf: Box::new([0xff; IMAGE_SIZE]),
            touched: vec![false; IMAGE_SIZE],
            min_addr: None,
            max_addr: None,
        }
    }

    fn set(&mut self, addr: u32, byte: u8) {
        let addr = (addr as usize) % IMAGE_SIZE;
        self.buf[addr] = byte;
        self.touched[addr] = true;
        self.min_addr = Some(self.min_addr.map_or(addr as u32, |m| m.min(addr as u32)));
        self.max_addr = Some(self.max_addr.map_or(addr as u32, |m| m.max(addr as u32)));
    }

    /// Start address of the used window, or `None` if the file contained
    /// no data records.
    pub fn base_address(&self) -> Option<u16> {
        self.min_addr.map(|a| a as u16)
    }

    /// Extracts the used address window as a contiguous buffer, padded
    /// with `0xff` up to a multiple of 4 bytes so it can be written to
    /// flash without a trailing partial word.
    pub fn to_padded_bytes(&self) -> Option<Vec<u8>> {
        let min = self.min_addr? as usize;
        let max = self.max_addr? as usize;
        let mut out: Vec<u8> = self.buf[min..=max].to_vec();
        while out.len() % 4 != 0 {
            out.push(0xff);
        }
        Some(out)
    }
}

/// Parses a complete Intel-HEX file into a [`HexImage`].
///
/// Supports record types 00 (data), 01 (end of file) and 04 (extended
/// linear address). Any other record type is rejected with
/// [`Error::HexFormat`], as are malformed lines and checksum mismatches.
pub fn parse(text: &str) -> Result<HexImage> {
    let mut image = HexImage::new();
    let mut ext_addr: u16 = 0;
    let mut saw_eof = false;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        if saw_eof {
            break;
        }
        parse_line(line, &mut image, &mut ext_addr, &mut saw_eof)
            .map_err(|msg| Error::HexFormat(format!("line {}: {}", lineno + 1, msg)))?;
    }

    if !saw_eof {
        return Err(Error::HexFormat("missing end-of-file record".into()));
    }

    Ok(image)
}

fn parse_line(line: &str, image: &mut HexImage, ext_addr: &mut u16, saw_eof: &mut bool) -> std::result::Result<(), String> {
    let mut state = State::GetLine;
    let mut chars = line.chars();

    let mut byte_count: u8 = 0;
    let mut address: u16 = 0;
    let mut record_type: u8 = 0;
    let mut data: Vec<u8> = Vec::new();
    let mut checksum_accum: u8 = 0;

    let mut hex_buf = String::new();

    loop {
        state = match state {
            State::GetLine => State::Colon,
            State::Colon => {
                if chars.next() != Some(':') {
                    return Err("expected ':'".into());
                }
                State::ByteCount
            }
            State::ByteCount => {
                byte_count = take_hex_byte(&mut chars, &mut hex_buf)?;
                if byte_count as usize * 2 + MIN_LINE_LEN != line.len() {
                    return Err(format!(
                        "bad byte count: line is {} chars long, byte count {} implies {}",
                        line.len(),
                        byte_count,
                        byte_count as usize * 2 + MIN_LINE_LEN
                    ));
                }
                checksum_accum = checksum_accum.wrapping_add(byte_count);
                State::Address
            }
            State::Address => {
                let hi = take_hex_byte(&mut chars, &mut hex_buf)?;
                let lo = take_hex_byte(&mut chars, &mut hex_buf)?;
                address = u16::from_be_bytes([hi, lo]);
                checksum_accum = checksum_accum.wrapping_add(hi).wrapping_add(lo);
                State::RecordType
            }
            State::RecordType => {
                record_type = take_hex_byte(&mut chars, &mut hex_buf)?;
                checksum_accum = checksum_accum.wrapping_add(record_type);
                State::Data
            }
            State::Data => {
                for _ in 0..byte_count {
                    let b = take_hex_byte(&mut chars, &mut hex_buf)?;
                    checksum_accum = checksum_accum.wrapping_add(b);
                    data.push(b);
                }
                State::Checksum
            }
            State::Checksum => {
                let checksum = take_hex_byte(&mut chars, &mut hex_buf)?;
                let expected = (!checksum_accum).wrapping_add(1);
                if checksum != expected {
                    return Err(format!("bad checksum: got {:#04x}, want {:#04x}", checksum, expected));
                }
                State::Done
            }
            State::Done => break,
        };
    }

    match record_type {
        RECORD_DATA => {
            if *ext_addr != 0 {
                return Err("data record follows a nonzero extended linear address".into());
            }
            for (i, &byte) in data.iter().enumerate() {
                image.set(u32::from(address) + i as u32, byte);
            }
        }
        RECORD_EOF => {
            if byte_count != 0 {
                return Err("end-of-file record must have a zero byte count".into());
            }
            *saw_eof = true;
        }
        RECORD_EXT_LINEAR_ADDRESS => {
            if data.len() != 2 {
                return Err("extended linear address record must carry 2 data bytes".into());
            }
            *ext_addr = u16::from_be_bytes([data[0], data[1]]);
        }
        other => {
            return Err(format!("unsupported record type {:#04x}", other));
        }
    }

    Ok(())
}

fn take_hex_byte(chars: &mut std::str::Chars<'_>, scratch: &mut String) -> std::result::Result<u8, String> {
    scratch.clear();
    for _ in 0..2 {
        let c = chars.next().ok_or("unexpected end of line")?;
        scratch.push(c);
    }
    u8::from_str_radix(scratch, 16).map_err(|_| format!("invalid hex digits {:?}", scratch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_data_line_and_eof() {
        let text = ":04001000deadbeefb4\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.base_address(), Some(0x1000));
        assert_eq!(image.to_padded_bytes().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rejects_bad_checksum() {
        let text = ":04001000deadbeef00\n:00000001FF\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::HexFormat(_)));
    }

    #[test]
    fn rejects_unsupported_record_type() {
        let text = ":020000020001fb\n:00000001FF\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::HexFormat(_)));
    }

    #[test]
    fn nonzero_extended_linear_address_rejects_following_data() {
        let text = ":02000004000100f9\n:04001000cafebabeb2\n:00000001FF\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::HexFormat(_)));
    }

    #[test]
    fn zero_extended_linear_address_is_a_noop() {
        let text = ":02000004000000fa\n:04001000cafebabeb2\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.base_address(), Some(0x0010));
        let bytes = image.to_padded_bytes().unwrap();
        assert_eq!(bytes, vec![0xca, 0xfe, 0xba, 0xbe]);
    }

    #[test]
    fn line_length_must_match_declared_byte_count() {
        let text = ":04001000deadbeefb4XX\n:00000001FF\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::HexFormat(_)));
    }

    #[test]
    fn eof_record_with_nonzero_byte_count_is_rejected() {
        let text = ":01000001aa54\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::HexFormat(_)));
    }

    #[test]
    fn pads_output_to_multiple_of_four() {
        let text = ":03001000aabbccbc\n:00000001FF\n";
        let image = parse(text).unwrap();
        let bytes = image.to_padded_bytes().unwrap();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(&bytes[..3], &[0xaa, 0xbb, 0xcc]);
        assert_eq!(bytes[3], 0xff);
    }

    #[test]
    fn missing_eof_record_is_rejected() {
        let text = ":04001000deadbeefb4\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::HexFormat(_)));
    }
}
