//! Linux i2c-dev access
//!
//! The DS2482 only needs plain transfers: one or two bytes written, one
//! byte read back, which map directly onto `write(2)`/`read(2)` on the
//! character device once the slave address is bound with `I2C_SLAVE`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::debug;

/// `ioctl` request binding a file descriptor to a slave address
const I2C_SLAVE: u64 = 0x0703;

/// Minimal i2c transfer interface used by the DS2482 driver
pub trait I2cBus: Send + fmt::Debug {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn read_byte(&mut self) -> io::Result<u8>;

    /// Close and reopen the underlying device
    fn reopen(&mut self) -> io::Result<()>;
}

/// An i2c slave on `/dev/i2c-N`
pub struct LinuxI2c {
    path: PathBuf,
    address: u16,
    file: Option<File>,
}

impl fmt::Debug for LinuxI2c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinuxI2c")
            .field("path", &self.path)
            .field("address", &format_args!("{:#04x}", self.address))
            .field("open", &self.file.is_some())
            .finish()
    }
}

impl LinuxI2c {
    pub fn open(path: impl AsRef<Path>, address: u16) -> io::Result<Self> {
        let mut bus = Self {
            path: path.as_ref().to_path_buf(),
            address,
            file: None,
        };
        bus.reopen()?;
        Ok(bus)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "i2c device closed"))
    }
}

impl I2cBus for LinuxI2c {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self.file()?;
        let written = file.write(bytes)?;
        if written != bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short i2c write ({} of {} bytes)", written, bytes.len()),
            ));
        }
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.file()?.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.file = None;
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), I2C_SLAVE as _, self.address as libc::c_ulong) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        debug!(path = %self.path.display(), address = self.address, "i2c slave bound");
        self.file = Some(file);
        Ok(())
    }
}
