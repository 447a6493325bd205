//! Byte transports the session can run over.
//!
//! The session only needs non-blocking "how many bytes are waiting", bounded reads and
//! whole-buffer writes. A real companion radio is reached through [`open_serial`]; tests
//! and dry runs use [`MockTransport`].
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[cfg(feature = "serial")]
use log::debug;
#[cfg(feature = "serial")]
use std::time::Duration;

/// Minimal byte-stream interface over the companion link.
pub trait Transport: Send {
    /// Bytes ready to read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Transport slot owned by the session state. `None` once closed.
pub type SharedTransport = Mutex<Option<Box<dyn Transport>>>;

#[cfg(feature = "serial")]
impl Transport for Box<dyn serialport::SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read().map_err(io::Error::from)? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(self)
    }
}

/// Baud rates accepted by the companion firmware's serial interface.
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 115200, 230400];

pub fn is_supported_baud(baud_rate: u32) -> bool {
    SUPPORTED_BAUD_RATES.contains(&baud_rate)
}

/// Open the companion radio's serial port.
///
/// RTS and DTR are deasserted right after open: on ESP32 boards they drive EN and IO0,
/// and a level left asserted by a previous process holds the radio in reset.
#[cfg(feature = "serial")]
pub async fn open_serial(
    port_name: &str,
    baud_rate: u32,
) -> super::errors::Result<Box<dyn serialport::SerialPort>> {
    if !is_supported_baud(baud_rate) {
        return Err(super::MeshCoreError::InvalidBaudRate(baud_rate));
    }
    debug!("Opening serial port {} at {} baud", port_name, baud_rate);

    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(50));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);
    }
    let mut port = builder.open()?;

    let _ = port.write_request_to_send(false);
    let _ = port.write_data_terminal_ready(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = port.clear(serialport::ClearBuffer::Input);

    debug!("Serial port {} ready (RTS/DTR deasserted)", port_name);
    Ok(port)
}

#[derive(Debug, Default)]
struct MockState {
    rx: VecDeque<u8>,
    writes: Vec<(Instant, Vec<u8>)>,
    fail_reads: bool,
}

/// Scripted in-memory transport. Bytes fed through the [`MockRadio`] side become
/// readable; every `write_all` is recorded with its timestamp.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn pair() -> (MockTransport, MockRadio) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            MockTransport {
                state: state.clone(),
            },
            MockRadio { state },
        )
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "mock transport poisoned"))
    }
}

impl Transport for MockTransport {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let state = self.lock()?;
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(state.rx.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock()?;
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.lock()?.writes.push((Instant::now(), data.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MockRadio {
    /// Make bytes available to the session.
    pub fn feed(&self, bytes: &[u8]) {
        if let Ok(mut state) = self.state.lock() {
            state.rx.extend(bytes.iter().copied());
        }
    }

    /// Frames written by the session, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.timed_writes().into_iter().map(|(_, w)| w).collect()
    }

    pub fn timed_writes(&self) -> Vec<(Instant, Vec<u8>)> {
        self.state.lock().map(|s| s.writes.clone()).unwrap_or_default()
    }

    pub fn clear_writes(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.writes.clear();
        }
    }

    /// Bytes fed but not yet consumed.
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.rx.len()).unwrap_or(0)
    }

    /// Make every following availability check fail, as an unplugged device does.
    pub fn unplug(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_reads = true;
        }
    }
}
