//! Serial line setup for character-device channels.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Baud rate the cube firmware expects on its serial link.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Put a terminal device into raw 8N1 mode without flow control.
///
/// Descriptors that are not terminals (pipes, plain files, sockets) are left
/// alone.
pub fn configure_raw(file: &File, path: &Path, baud: u32) -> Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: `fd` is an open descriptor owned by `file`.
    if unsafe { libc::isatty(fd) } != 1 {
        debug!(?path, "not a terminal; skipping serial configuration");
        return Ok(());
    }

    let speed = baud_constant(baud).ok_or_else(|| TransportError::Serial {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {baud}"),
        ),
    })?;
    let serial_err = |source: std::io::Error| TransportError::Serial {
        path: path.to_path_buf(),
        source,
    };

    // SAFETY: termios is a plain C struct; all-zero is a valid initial value
    // that tcgetattr fully overwrites.
    let mut tty: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `tty` is a valid writable termios and `fd` is an open terminal.
    if unsafe { libc::tcgetattr(fd, &mut tty) } != 0 {
        return Err(serial_err(std::io::Error::last_os_error()));
    }

    // SAFETY: `tty` is a valid termios obtained from tcgetattr.
    unsafe {
        libc::cfmakeraw(&mut tty);
        libc::cfsetispeed(&mut tty, speed);
        libc::cfsetospeed(&mut tty, speed);
    }

    tty.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CSIZE | libc::CRTSCTS);
    tty.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;

    // SAFETY: `fd` is an open terminal and `tty` a fully initialized termios.
    unsafe {
        libc::tcflush(fd, libc::TCIFLUSH);
        if libc::tcsetattr(fd, libc::TCSANOW, &tty) != 0 {
            return Err(serial_err(std::io::Error::last_os_error()));
        }
    }

    debug!(?path, baud, "configured serial line");
    Ok(())
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    match baud {
        9_600 => Some(libc::B9600),
        19_200 => Some(libc::B19200),
        38_400 => Some(libc::B38400),
        57_600 => Some(libc::B57600),
        115_200 => Some(libc::B115200),
        230_400 => Some(libc::B230400),
        _ => None,
    }
}
