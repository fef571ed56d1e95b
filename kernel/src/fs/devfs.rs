//! Device filesystem: the console
//!
//! The console is a character device registered as `con:`. Writes append to
//! an output buffer (a real board would drain it to a UART); reads consume
//! whatever input has been queued. Character devices are not seekable.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::uio::Uio;
use super::{NodeType, VStat, Vnode};
use crate::error::KernelResult;

/// The system console device.
pub struct Console {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl Default for Console {
    fn default() -> Self {
        Self {
            input: Mutex::new(VecDeque::new()),
            output: Mutex::new(Vec::new()),
        }
    }
}

impl Console {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            input: Mutex::new(VecDeque::new()),
            output: Mutex::new(Vec::new()),
        })
    }

    /// Queue bytes for subsequent reads, as arriving keystrokes would.
    pub fn push_input(&self, data: &[u8]) {
        self.input.lock().extend(data.iter().copied());
    }

    /// Drain and return everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }

    /// Bytes written and not yet drained.
    pub fn output_len(&self) -> usize {
        self.output.lock().len()
    }
}

impl Vnode for Console {
    fn node_type(&self) -> NodeType {
        NodeType::CharDevice
    }

    fn read(&self, uio: &mut Uio<'_>) -> KernelResult<()> {
        let chunk: Vec<u8> = {
            let mut input = self.input.lock();
            let n = core::cmp::min(uio.resid, input.len());
            input.drain(..n).collect()
        };
        // An empty transfer reads as end-of-input.
        uio.move_out(&chunk)?;
        Ok(())
    }

    fn write(&self, uio: &mut Uio<'_>) -> KernelResult<()> {
        let mut staged = vec![0u8; uio.resid];
        let n = uio.move_in(&mut staged)?;
        self.output.lock().extend_from_slice(&staged[..n]);
        log::trace!("console: {} bytes written", n);
        Ok(())
    }

    fn stat(&self) -> KernelResult<VStat> {
        Ok(VStat {
            size: 0,
            node_type: NodeType::CharDevice,
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::uio::UioRw;

    #[test]
    fn test_write_appends_to_output() {
        let con = Console::new();
        let mut data = *b"hello, world";
        let mut uio = Uio::kernel(&mut data, 0, UioRw::Write);
        con.write(&mut uio).unwrap();
        assert_eq!(uio.transferred(), 12);
        assert_eq!(con.take_output(), b"hello, world");
        assert_eq!(con.output_len(), 0);
    }

    #[test]
    fn test_read_consumes_queued_input() {
        let con = Console::new();
        con.push_input(b"abcdef");

        let mut buf = [0u8; 4];
        let mut uio = Uio::kernel(&mut buf, 0, UioRw::Read);
        con.read(&mut uio).unwrap();
        assert_eq!(uio.transferred(), 4);
        assert_eq!(&buf, b"abcd");

        // Remaining two bytes, then end-of-input.
        let mut buf = [0u8; 4];
        let mut uio = Uio::kernel(&mut buf, 0, UioRw::Read);
        con.read(&mut uio).unwrap();
        assert_eq!(uio.transferred(), 2);

        let mut uio = Uio::kernel(&mut buf, 0, UioRw::Read);
        con.read(&mut uio).unwrap();
        assert_eq!(uio.transferred(), 0);
    }

    #[test]
    fn test_console_is_not_seekable() {
        let con = Console::new();
        assert!(!con.is_seekable());
        assert_eq!(con.stat().unwrap().node_type, NodeType::CharDevice);
    }
}
