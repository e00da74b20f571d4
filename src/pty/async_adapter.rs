//! Async adapters for PTY I/O.
//!
//! PTY reads and writes are blocking syscalls. These adapters run them on
//! dedicated blocking threads and exchange data with the async side through
//! bounded channels, so a slow terminal never stalls the runtime.

use std::io::{Read, Write};

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Default read buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Async reader for PTY output.
///
/// Runs in a blocking thread and sends output chunks through a channel, in
/// the order they were read.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
    buffer_size: usize,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    /// Create a new AsyncPtyReader.
    pub fn new(reader: R, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            reader,
            tx,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Create with custom buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Run the reader loop in a blocking thread.
    ///
    /// Returns when:
    /// - The PTY is closed (read returns 0, or EIO on Unix)
    /// - The channel is closed (receiver dropped)
    /// - An unrecoverable error occurs
    ///
    /// In every case the sender is dropped, which the receiving side
    /// observes as end-of-stream.
    pub async fn run(self) {
        let buffer_size = self.buffer_size;
        let mut reader = self.reader;
        let tx = self.tx;

        let result = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; buffer_size];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("PTY reader: EOF");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY reader: read {} bytes", n);
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            debug!("PTY reader: channel closed");
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO on Unix means the slave side was closed
                        #[cfg(unix)]
                        if e.raw_os_error() == Some(libc::EIO) {
                            debug!("PTY reader: PTY closed (EIO)");
                            break;
                        }

                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            debug!("PTY reader: broken pipe");
                            break;
                        }

                        error!("PTY reader error: {}", e);
                        break;
                    }
                }
            }
        })
        .await;

        if let Err(e) = result {
            error!("PTY reader task panicked: {}", e);
        }
    }
}

/// Async writer for PTY input.
///
/// Receives data through a channel and writes it to the PTY in a blocking
/// thread, verbatim and in order.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    /// Create a new AsyncPtyWriter.
    pub fn new(writer: W, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { writer, rx }
    }

    /// Run the writer loop in a blocking thread.
    ///
    /// Returns the writer once the channel is closed (all senders dropped)
    /// or an unrecoverable error occurs.
    pub async fn run(self) -> Option<W> {
        let mut writer = self.writer;
        let mut rx = self.rx;

        let result = tokio::task::spawn_blocking(move || {
            while let Some(data) = rx.blocking_recv() {
                trace!("PTY writer: writing {} bytes", data.len());
                if let Err(e) = writer.write_all(&data) {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("PTY writer: broken pipe");
                    } else {
                        error!("PTY writer error: {}", e);
                    }
                    // Closing the receiver makes further sends fail fast.
                    rx.close();
                    break;
                }
                if let Err(e) = writer.flush() {
                    error!("PTY writer flush error: {}", e);
                    rx.close();
                    break;
                }
            }
            debug!("PTY writer: channel closed");
            writer
        })
        .await;

        match result {
            Ok(writer) => Some(writer),
            Err(e) => {
                error!("PTY writer task panicked: {}", e);
                None
            }
        }
    }
}
