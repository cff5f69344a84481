//! Multiplexed readiness waiting.
//!
//! `poll(2)` works the same way on sockets, ptys and real serial devices, so
//! a single primitive covers every channel kind that can end up in one wait
//! set.

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Result, TransportError};

/// A primitive that blocks until some descriptors become readable.
pub trait Readiness {
    /// Wait until at least one descriptor in `fds` is readable.
    ///
    /// Returns the indices into `fds` of every readable descriptor. With a
    /// `timeout`, an empty vector means the timeout elapsed. A hung-up or
    /// errored descriptor counts as readable: the next read reports the
    /// condition.
    fn wait_readable(&self, fds: &[RawFd], timeout: Option<Duration>) -> Result<Vec<usize>>;
}

/// [`Readiness`] backed by `poll(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollReadiness;

impl Readiness for PollReadiness {
    fn wait_readable(&self, fds: &[RawFd], timeout: Option<Duration>) -> Result<Vec<usize>> {
        let mut pollfds: Vec<libc::pollfd> = fds
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let timeout_ms = match deadline {
                None => -1,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
                }
            };

            // SAFETY: `pollfds` is a valid, initialized array of `pollfds.len()`
            // entries that stays alive for the duration of the call.
            let rc = unsafe {
                libc::poll(
                    pollfds.as_mut_ptr(),
                    pollfds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };

            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Poll(err));
            }

            let mut ready = Vec::new();
            for (index, pfd) in pollfds.iter().enumerate() {
                if pfd.revents & libc::POLLNVAL != 0 {
                    return Err(TransportError::Poll(std::io::Error::from_raw_os_error(
                        libc::EBADF,
                    )));
                }
                if pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                    ready.push(index);
                }
            }

            trace!(waited = fds.len(), ready = ready.len(), "poll returned");
            return Ok(ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn reports_only_readable_descriptors() {
        let (_a_tx, a_rx) = UnixStream::pair().unwrap();
        let (mut b_tx, b_rx) = UnixStream::pair().unwrap();
        let (_c_tx, c_rx) = UnixStream::pair().unwrap();

        b_tx.write_all(b"x").unwrap();

        let fds = [a_rx.as_raw_fd(), b_rx.as_raw_fd(), c_rx.as_raw_fd()];
        let ready = PollReadiness.wait_readable(&fds, None).unwrap();
        assert_eq!(ready, vec![1]);
    }

    #[test]
    fn timeout_returns_empty() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let ready = PollReadiness
            .wait_readable(&[rx.as_raw_fd()], Some(Duration::from_millis(10)))
            .unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn hangup_counts_as_readable() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(tx);
        let ready = PollReadiness
            .wait_readable(&[rx.as_raw_fd()], Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(ready, vec![0]);
    }

    #[test]
    fn blocks_until_data_arrives() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.write_all(b"late").unwrap();
            tx
        });

        let ready = PollReadiness.wait_readable(&[rx.as_raw_fd()], None).unwrap();
        assert_eq!(ready, vec![0]);
        let _tx = writer.join().unwrap();
    }
}
