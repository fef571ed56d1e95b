//! Kernel error codes
//!
//! Every fallible kernel routine reports failure through [`Errno`], a small
//! non-zero integer code with the traditional Unix names. The syscall layer
//! hands the raw value to user space unchanged; inside the kernel the enum
//! travels through `Result` and `?`.

use core::fmt;

/// Kernel error code.
///
/// The numeric values are the kernel's ABI with user space and are therefore
/// fixed here rather than borrowed from any host libc.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum Errno {
    /// Function not implemented
    Enosys = 1,
    /// Out of memory
    Enomem = 2,
    /// Bad memory reference
    Efault = 3,
    /// Invalid argument
    Einval = 4,
    /// Bad file descriptor
    Ebadf = 5,
    /// Too many open files in this process
    Emfile = 6,
    /// Too many processes in the system
    Enproc = 7,
    /// No such process
    Esrch = 8,
    /// Not a child of the caller
    Echild = 9,
    /// Illegal seek (object is not seekable)
    Espipe = 10,
    /// Argument list too long
    E2big = 11,
    /// Path name too long
    Enametoolong = 12,
    /// No such file or directory
    Enoent = 13,
    /// Not a directory
    Enotdir = 14,
    /// Is a directory
    Eisdir = 15,
    /// File or object already exists
    Eexist = 16,
    /// No such device
    Enodev = 17,
    /// Hardware I/O error
    Eio = 18,
    /// Device read-only or operation not permitted on it
    Erofs = 19,
    /// Not an executable image
    Enoexec = 20,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, Errno>;

impl Errno {
    /// The raw code delivered to user space.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Enosys => "function not implemented",
            Self::Enomem => "out of memory",
            Self::Efault => "bad memory reference",
            Self::Einval => "invalid argument",
            Self::Ebadf => "bad file descriptor",
            Self::Emfile => "too many open files",
            Self::Enproc => "too many processes",
            Self::Esrch => "no such process",
            Self::Echild => "no child processes",
            Self::Espipe => "illegal seek",
            Self::E2big => "argument list too long",
            Self::Enametoolong => "path name too long",
            Self::Enoent => "no such file or directory",
            Self::Enotdir => "not a directory",
            Self::Eisdir => "is a directory",
            Self::Eexist => "file exists",
            Self::Enodev => "no such device",
            Self::Eio => "input/output error",
            Self::Erofs => "read-only device",
            Self::Enoexec => "not an executable",
        };
        write!(f, "{}", msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_nonzero_and_distinct() {
        let all = [
            Errno::Enosys,
            Errno::Enomem,
            Errno::Efault,
            Errno::Einval,
            Errno::Ebadf,
            Errno::Emfile,
            Errno::Enproc,
            Errno::Esrch,
            Errno::Echild,
            Errno::Espipe,
            Errno::E2big,
            Errno::Enametoolong,
            Errno::Enoent,
            Errno::Enotdir,
            Errno::Eisdir,
            Errno::Eexist,
            Errno::Enodev,
            Errno::Eio,
            Errno::Erofs,
            Errno::Enoexec,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_ne!(a.code(), 0);
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}
