//! An in-memory [`Transport`] used by unit tests across C2-C4 to assert
//! exact wire framing without touching real hardware.
#![cfg(test)]

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::transport::{Direction, Transport};

#[derive(Default)]
pub struct FakeTransport {
    pub control_out: Vec<(u8, u16, u16, Vec<u8>)>,
    pub control_in_queue: VecDeque<Vec<u8>>,
    pub out_transfers: Vec<Vec<u8>>,
    pub bulk_in_queue: VecDeque<Vec<u8>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport::default()
    }

    /// Convenience constructor for tests that only care about a single
    /// scripted bulk-IN response.
    pub fn with_bulk_in(data: Vec<u8>) -> Self {
        let mut fake = FakeTransport::new();
        fake.bulk_in_queue.push_back(data);
        fake
    }

    pub fn queue_bulk_in(&mut self, data: Vec<u8>) {
        self.bulk_in_queue.push_back(data);
    }

    pub fn queue_control_in(&mut self, data: Vec<u8>) {
        self.control_in_queue.push_back(data);
    }
}

impl Transport for FakeTransport {
    fn control(&mut self, dir: Direction, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<()> {
        match dir {
            Direction::Out => {
                self.control_out.push((request, value, index, buf.to_vec()));
                Ok(())
            }
            Direction::In => {
                let data = self
                    .control_in_queue
                    .pop_front()
                    .ok_or(Error::Timeout("scripted control-in response"))?;
                if data.len() != buf.len() {
                    return Err(Error::ShortTransfer {
                        expected: buf.len(),
                        actual: data.len(),
                    });
                }
                buf.copy_from_slice(&data);
                Ok(())
            }
        }
    }

    fn bulk(&mut self, dir: Direction, buf: &mut [u8]) -> Result<()> {
        match dir {
            Direction::Out => {
                self.out_transfers.push(buf.to_vec());
                Ok(())
            }
            Direction::In => {
                let data = self
                    .bulk_in_queue
                    .pop_front()
                    .ok_or(Error::Timeout("scripted bulk-in response"))?;
                if data.len() != buf.len() {
                    return Err(Error::ShortTransfer {
                        expected: buf.len(),
                        actual: data.len(),
                    });
                }
                buf.copy_from_slice(&data);
                Ok(())
            }
        }
    }
}
