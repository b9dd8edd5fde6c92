//! [`Transport`] implementation for a Linux serial device, via rppal.
//!
//! Dynamixel buses are half duplex. USB adapters (U2D2) switch direction themselves, a bare Pi
//! UART needs a GPIO driving the buffer's direction line, high while transmitting.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, OutputPin};
use rppal::uart::{Parity, Queue, Uart};

use super::{LinkError, Transport};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sleep between polls of the receive queue.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct UartTransport {
    uart: Uart,
    dir_pin: Option<OutputPin>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl UartTransport {
    /// Open `port` as 8N1 at `baud_rate`, optionally claiming `dir_pin` (BCM numbering).
    pub fn open(port: &str, baud_rate: u32, dir_pin: Option<u8>) -> Result<Self, LinkError> {
        let conn_err = |reason: String| LinkError::Connection {
            port: port.to_string(),
            reason,
        };

        let mut uart = Uart::with_path(port, baud_rate, Parity::None, 8, 1)
            .map_err(|e| conn_err(e.to_string()))?;

        // Reads return immediately, recv does its own timing
        uart.set_read_mode(0, Duration::default())
            .map_err(|e| conn_err(e.to_string()))?;

        let dir_pin = match dir_pin {
            Some(pin) => {
                let mut pin = Gpio::new()
                    .and_then(|gpio| gpio.get(pin))
                    .map_err(|e| conn_err(format!("cannot claim direction pin: {}", e)))?
                    .into_output();
                pin.set_low();
                Some(pin)
            }
            None => None,
        };

        Ok(Self { uart, dir_pin })
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;

        while written < bytes.len() {
            match self.uart.write(&bytes[written..]).map_err(to_io)? {
                0 => return Err(io::Error::new(io::ErrorKind::WriteZero, "UART accepted no bytes")),
                n => written += n,
            }
        }

        // Block until the last byte is on the wire so the bus can be turned around
        self.uart.drain().map_err(to_io)
    }
}

impl Transport for UartTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(pin) = self.dir_pin.as_mut() {
            pin.set_high();
        }

        let result = self.write_all(bytes);

        if let Some(pin) = self.dir_pin.as_mut() {
            pin.set_low();
        }

        result
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;

        loop {
            let n = self.uart.read(buf).map_err(to_io)?;

            if n > 0 || Instant::now() >= deadline {
                return Ok(n);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.uart.flush(Queue::Input).map_err(to_io)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn to_io(e: rppal::uart::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
