//! Logging initialization for the coordinator.
//!
//! Every invocation appends JSON lines to a boot log so overlapping
//! bootstrap attempts can be reconstructed afterwards. The log is capped;
//! once it reaches the cap it is rotated to `<path>.1`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Boot log writer that stops writing at max size.
struct BootLogWriter {
    file: File,
    bytes_written: usize,
    max_bytes: usize,
}

impl BootLogWriter {
    fn open(path: &Path, max_bytes: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Rotate instead of truncating so the previous attempts survive once.
        let existing = fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0);
        if existing >= max_bytes {
            fs::rename(path, rotated_path(path))?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let bytes_written = file.metadata()?.len() as usize;

        Ok(Self {
            file,
            bytes_written,
            max_bytes,
        })
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

impl Write for BootLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.bytes_written >= self.max_bytes {
            return Ok(buf.len());
        }

        let remaining = self.max_bytes - self.bytes_written;
        let to_write = buf.len().min(remaining);
        let written = self.file.write(&buf[..to_write])?;
        self.bytes_written += written;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Thread-safe writer wrapper.
struct SharedWriter(Mutex<BootLogWriter>);

impl Write for &SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut writer) => writer.write(buf),
            Err(poisoned) => poisoned.into_inner().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.lock() {
            Ok(mut writer) => writer.flush(),
            Err(poisoned) => poisoned.into_inner().flush(),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for &'static SharedWriter {
    type Writer = &'static SharedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Maximum boot log size (4 MB).
const MAX_LOG_BYTES: usize = 4 * 1024 * 1024;

/// Initialize logging to the boot log file and stderr.
///
/// If the boot log cannot be opened the coordinator still logs to stderr.
pub fn init(log_path: &Path) -> anyhow::Result<()> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(io::stderr)
        .with_filter(filter());

    let file_layer = match BootLogWriter::open(log_path, MAX_LOG_BYTES) {
        Ok(writer) => {
            // Leaked for 'static; lives as long as the process.
            let shared: &'static SharedWriter =
                Box::leak(Box::new(SharedWriter(Mutex::new(writer))));
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(shared)
                    .with_filter(filter()),
            )
        }
        Err(e) => {
            eprintln!(
                "gateway-init: boot log {} unavailable: {}",
                log_path.display(),
                e
            );
            None
        }
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(())
}
