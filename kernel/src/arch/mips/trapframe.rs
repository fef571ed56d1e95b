//! Trap frames and user-mode entry conventions
//!
//! A [`TrapFrame`] is the register snapshot saved on kernel entry and
//! restored on the way back to user mode. The context-switch and trap
//! plumbing itself lives below this crate; what is modeled here is the
//! register-level contract the syscall layer must honor:
//!
//! - a fresh process enters user mode with `a0 = argc`, `a1 = argv`,
//!   `a2 = environ (unused)`, `sp` set, and `epc` at the program entry;
//! - a forked child resumes after the syscall instruction with `v0 = 0` and
//!   `a3 = 0` (no error).

/// MIPS register snapshot at trap time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub tf_vaddr: u32,
    pub tf_status: u32,
    pub tf_cause: u32,
    pub tf_lo: u32,
    pub tf_hi: u32,
    pub tf_ra: u32,
    pub tf_at: u32,
    pub tf_v0: u32,
    pub tf_v1: u32,
    pub tf_a0: u32,
    pub tf_a1: u32,
    pub tf_a2: u32,
    pub tf_a3: u32,
    pub tf_t0: u32,
    pub tf_t1: u32,
    pub tf_t2: u32,
    pub tf_t3: u32,
    pub tf_t4: u32,
    pub tf_t5: u32,
    pub tf_t6: u32,
    pub tf_t7: u32,
    pub tf_s0: u32,
    pub tf_s1: u32,
    pub tf_s2: u32,
    pub tf_s3: u32,
    pub tf_s4: u32,
    pub tf_s5: u32,
    pub tf_s6: u32,
    pub tf_s7: u32,
    pub tf_t8: u32,
    pub tf_t9: u32,
    pub tf_gp: u32,
    pub tf_sp: u32,
    pub tf_s8: u32,
    pub tf_epc: u32,
}

/// Build the register state for entering a brand-new user program.
///
/// The trap layer consumes this frame and never returns to the caller; at
/// this crate's boundary the frame itself is the result of `execv` and
/// `runprogram`.
pub fn enter_new_process(argc: usize, argv: u32, stackptr: u32, entry: u32) -> TrapFrame {
    TrapFrame {
        tf_a0: argc as u32,
        tf_a1: argv,
        tf_a2: 0,
        tf_sp: stackptr,
        tf_epc: entry,
        ..TrapFrame::default()
    }
}

/// Fix up a copied parent frame so the child observes `fork() == 0`.
///
/// `v0` carries the syscall return value, `a3` the error flag, and `epc`
/// must step past the syscall instruction or the child would re-enter fork
/// forever.
pub fn enter_forked_process(tf: &mut TrapFrame) {
    tf.tf_v0 = 0;
    tf.tf_a3 = 0;
    tf.tf_epc = tf.tf_epc.wrapping_add(4);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_process_frame_registers() {
        let tf = enter_new_process(2, 0x7fff_ff80, 0x7fff_ff80, 0x0040_0000);
        assert_eq!(tf.tf_a0, 2);
        assert_eq!(tf.tf_a1, 0x7fff_ff80);
        assert_eq!(tf.tf_a2, 0);
        assert_eq!(tf.tf_sp, 0x7fff_ff80);
        assert_eq!(tf.tf_epc, 0x0040_0000);
    }

    #[test]
    fn test_forked_child_returns_zero() {
        let mut tf = TrapFrame {
            tf_v0: 77,
            tf_a3: 1,
            tf_epc: 0x0040_0010,
            ..TrapFrame::default()
        };
        enter_forked_process(&mut tf);
        assert_eq!(tf.tf_v0, 0);
        assert_eq!(tf.tf_a3, 0);
        assert_eq!(tf.tf_epc, 0x0040_0014);
    }
}
