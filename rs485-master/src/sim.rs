//! In-process Modbus RTU slaves for exercising the master without hardware.
//!
//! # Example
//!
//! ```ignore
//! let (master_io, slave_io) = tokio::io::duplex(512);
//! let sim = SlaveSimulator::new().with_slave(1, vec![100, 200, 300]);
//! sim.attach(slave_io);
//! let engine = MasterEngine::new(master_io, NoDirection, EngineSettings::default());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::crc::{crc16, crc16_le_bytes};
use crate::frame::{FUNCTION_READ_HOLDING, REQUEST_LEN, build_read_response, hex};

/// Modbus exception: illegal data address.
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;

#[derive(Debug, Default)]
struct SimulatedSlave {
    registers: Vec<u16>,
    silent: bool,
    corrupt_crc: bool,
    requests: u64,
}

#[derive(Debug, Default)]
struct SimState {
    slaves: HashMap<u8, SimulatedSlave>,
    response_delay: Duration,
}

/// A bank of simulated slaves answering Read Holding Registers.
///
/// Clones share state, so a test can reconfigure slaves while the simulator
/// is serving.
#[derive(Debug, Clone, Default)]
pub struct SlaveSimulator {
    state: Arc<Mutex<SimState>>,
}

impl SlaveSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slave whose holding registers start at 0 with `registers`.
    pub fn with_slave(self, address: u8, registers: Vec<u16>) -> Self {
        self.state().slaves.insert(
            address,
            SimulatedSlave {
                registers,
                ..Default::default()
            },
        );
        self
    }

    /// Delay every reply by `delay`.
    pub fn with_response_delay(self, delay: Duration) -> Self {
        self.state().response_delay = delay;
        self
    }

    /// Replace the whole register map of `address` at once.
    pub fn set_registers(&self, address: u8, registers: Vec<u16>) {
        self.state().slaves.entry(address).or_default().registers = registers;
    }

    /// Stop (or resume) answering requests for `address`.
    pub fn set_silent(&self, address: u8, silent: bool) {
        self.state().slaves.entry(address).or_default().silent = silent;
    }

    /// Send replies with a broken CRC for `address`.
    pub fn set_corrupt_crc(&self, address: u8, corrupt: bool) {
        self.state().slaves.entry(address).or_default().corrupt_crc = corrupt;
    }

    /// Valid requests received for `address`, answered or not.
    pub fn request_count(&self, address: u8) -> u64 {
        self.state()
            .slaves
            .get(&address)
            .map(|slave| slave.requests)
            .unwrap_or(0)
    }

    /// Serve requests arriving on `io` until it closes.
    pub fn attach<T>(&self, io: T) -> JoinHandle<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let sim = self.clone();
        tokio::spawn(async move { sim.serve(io).await })
    }

    async fn serve<T>(&self, mut io: T)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut request = [0u8; REQUEST_LEN];

        while io.read_exact(&mut request).await.is_ok() {
            trace!(rx = %hex(&request), "Simulator request");

            let (reply, delay) = self.answer(&request);
            let Some(reply) = reply else { continue };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if io.write_all(&reply).await.is_err() {
                break;
            }
        }
    }

    fn answer(&self, request: &[u8; REQUEST_LEN]) -> (Option<Vec<u8>>, Duration) {
        let mut state = self.state();
        let delay = state.response_delay;

        if crc16(&request[..6]) != u16::from_le_bytes([request[6], request[7]]) {
            return (None, delay);
        }
        if request[1] != FUNCTION_READ_HOLDING {
            return (None, delay);
        }

        let address = request[0];
        let Some(slave) = state.slaves.get_mut(&address) else {
            return (None, delay);
        };
        slave.requests += 1;

        if slave.silent {
            return (None, delay);
        }

        let start = u16::from_be_bytes([request[2], request[3]]) as usize;
        let count = u16::from_be_bytes([request[4], request[5]]) as usize;

        let mut reply = match slave.registers.get(start..start + count) {
            Some(values) => build_read_response(address, values),
            None => {
                let mut exception =
                    vec![address, FUNCTION_READ_HOLDING | 0x80, ILLEGAL_DATA_ADDRESS];
                let crc = crc16_le_bytes(&exception);
                exception.extend_from_slice(&crc);
                exception
            }
        };

        if slave.corrupt_crc {
            if let Some(last) = reply.last_mut() {
                *last ^= 0xFF;
            }
        }

        (Some(reply), delay)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{parse_read_response, read_request};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_simulator_answers_read() {
        let (mut master, slave) = duplex(256);
        let sim = SlaveSimulator::new().with_slave(7, vec![1, 2, 3, 4]);
        sim.attach(slave);

        master.write_all(&read_request(7, 1, 2)).await.unwrap();
        let mut reply = [0u8; 9];
        master.read_exact(&mut reply).await.unwrap();

        assert_eq!(parse_read_response(&reply, 7, 2), Ok(vec![2, 3]));
        assert_eq!(sim.request_count(7), 1);
    }

    #[tokio::test]
    async fn test_simulator_exception_for_out_of_range() {
        let (mut master, slave) = duplex(256);
        let sim = SlaveSimulator::new().with_slave(1, vec![0; 2]);
        sim.attach(slave);

        master.write_all(&read_request(1, 0, 10)).await.unwrap();
        let mut reply = [0u8; 5];
        master.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..3], &[0x01, 0x83, 0x02]);
    }
}
