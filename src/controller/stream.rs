//! Non-blocking byte streams over raw descriptors.
//!
//! Controller endpoints read and write arbitrary descriptors: pipes, stdio,
//! socketpair ends, accepted connections. [`RawStream`] wraps an owned
//! descriptor in [`AsyncFd`] so readiness comes from the reactor and every
//! syscall stays non-blocking.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

pub(crate) struct RawStream {
    inner: AsyncFd<OwnedFd>,
}

impl RawStream {
    /// Take ownership of `fd`, force it non-blocking, and register it with
    /// the reactor.
    pub fn new(fd: OwnedFd) -> io::Result<RawStream> {
        let raw = fd.as_raw_fd();
        let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
        fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
        Ok(RawStream {
            inner: AsyncFd::new(fd)?,
        })
    }

    /// Read whatever is available. `Ok(0)` is end of stream.
    pub async fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| {
                nix::unistd::read(inner.as_raw_fd(), buf)
                    .map_err(|e| io::Error::from_raw_os_error(e as i32))
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write all of `data`, suspending on readiness rather than blocking.
    pub async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| {
                nix::unistd::write(inner.get_ref(), data)
                    .map_err(|e| io::Error::from_raw_os_error(e as i32))
            }) {
                Ok(Ok(written)) => data = &data[written..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipe_round_trip() {
        let (rd, wr) = nix::unistd::pipe().unwrap();
        let reader = RawStream::new(rd).unwrap();
        let writer = RawStream::new(wr).unwrap();

        writer.write_all(b"statedump\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = reader.read_some(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"statedump\n");
    }

    #[tokio::test]
    async fn eof_reads_zero() {
        let (rd, wr) = nix::unistd::pipe().unwrap();
        let reader = RawStream::new(rd).unwrap();
        drop(wr);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read_some(&mut buf).await.unwrap(), 0);
    }
}
