//! I/O transfer descriptors
//!
//! A [`Uio`] describes one data transfer between a vnode and a buffer that
//! lives either in the kernel or in a process's user address space. It
//! carries the file offset and the residual count; vnode operations move
//! bytes through it and advance both, so the caller can compute "bytes
//! transferred" as `requested - resid` afterwards.

use crate::bootstrap::Kernel;
use crate::error::KernelResult;
use crate::mm::usercopy;
use crate::mm::VirtAddr;
use crate::process::Process;

/// Transfer direction, named from the buffer owner's point of view: `Read`
/// fills the buffer from the object, `Write` drains the buffer into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UioRw {
    Read,
    Write,
}

enum UioSeg<'a> {
    Kernel(&'a mut [u8]),
    User {
        kern: &'a Kernel,
        proc: &'a Process,
        base: VirtAddr,
    },
}

/// One in-flight transfer.
pub struct Uio<'a> {
    seg: UioSeg<'a>,
    rw: UioRw,
    /// Object offset the next byte moves at. Vnode operations advance it.
    pub offset: i64,
    len: usize,
    /// Bytes not yet transferred.
    pub resid: usize,
}

impl<'a> Uio<'a> {
    /// Transfer to/from a kernel buffer.
    pub fn kernel(buf: &'a mut [u8], offset: i64, rw: UioRw) -> Self {
        let len = buf.len();
        Self {
            seg: UioSeg::Kernel(buf),
            rw,
            offset,
            len,
            resid: len,
        }
    }

    /// Transfer to/from `len` bytes of user memory at `base` in `proc`'s
    /// address space.
    pub fn user(
        kern: &'a Kernel,
        proc: &'a Process,
        base: VirtAddr,
        len: usize,
        offset: i64,
        rw: UioRw,
    ) -> Self {
        Self {
            seg: UioSeg::User { kern, proc, base },
            rw,
            offset,
            len,
            resid: len,
        }
    }

    pub fn rw(&self) -> UioRw {
        self.rw
    }

    /// Bytes moved so far.
    pub fn transferred(&self) -> usize {
        self.len - self.resid
    }

    /// Move `data` into the buffer (object-to-buffer leg of a read).
    /// Copies at most `resid` bytes; the short count is not an error, and
    /// moving nothing at end-of-file is how EOF is signaled.
    pub fn move_out(&mut self, data: &[u8]) -> KernelResult<usize> {
        debug_assert_eq!(self.rw, UioRw::Read, "move_out on a write uio");
        let n = core::cmp::min(self.resid, data.len());
        if n == 0 {
            return Ok(0);
        }
        let cursor = self.transferred();
        match &mut self.seg {
            UioSeg::Kernel(buf) => {
                buf[cursor..cursor + n].copy_from_slice(&data[..n]);
            }
            UioSeg::User { kern, proc, base } => {
                let (kern, proc, base) = (*kern, *proc, *base);
                usercopy::copyout(kern, proc, &data[..n], base.add(cursor))?;
            }
        }
        self.resid -= n;
        self.offset += n as i64;
        Ok(n)
    }

    /// Fill `out` from the buffer (buffer-to-object leg of a write).
    /// Returns the number of bytes produced, at most `min(resid, out.len())`.
    pub fn move_in(&mut self, out: &mut [u8]) -> KernelResult<usize> {
        debug_assert_eq!(self.rw, UioRw::Write, "move_in on a read uio");
        let n = core::cmp::min(self.resid, out.len());
        if n == 0 {
            return Ok(0);
        }
        let cursor = self.transferred();
        match &mut self.seg {
            UioSeg::Kernel(buf) => {
                out[..n].copy_from_slice(&buf[cursor..cursor + n]);
            }
            UioSeg::User { kern, proc, base } => {
                let (kern, proc, base) = (*kern, *proc, *base);
                usercopy::copyin(kern, proc, base.add(cursor), &mut out[..n])?;
            }
        }
        self.resid -= n;
        self.offset += n as i64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_out_tracks_offset_and_resid() {
        let mut buf = [0u8; 8];
        let mut uio = Uio::kernel(&mut buf, 100, UioRw::Read);
        assert_eq!(uio.move_out(b"abc").unwrap(), 3);
        assert_eq!(uio.move_out(b"defgh").unwrap(), 5);
        // Buffer full: further moves transfer nothing.
        assert_eq!(uio.move_out(b"xyz").unwrap(), 0);
        assert_eq!(uio.offset, 108);
        assert_eq!(uio.resid, 0);
        assert_eq!(uio.transferred(), 8);
        assert_eq!(&buf, b"abcdefgh");
    }

    #[test]
    fn test_move_in_drains_buffer() {
        let mut buf = *b"payload!";
        let mut uio = Uio::kernel(&mut buf, 0, UioRw::Write);
        let mut chunk = [0u8; 4];
        assert_eq!(uio.move_in(&mut chunk).unwrap(), 4);
        assert_eq!(&chunk, b"payl");
        assert_eq!(uio.move_in(&mut chunk).unwrap(), 4);
        assert_eq!(&chunk, b"oad!");
        assert_eq!(uio.move_in(&mut chunk).unwrap(), 0);
        assert_eq!(uio.transferred(), 8);
    }
}
