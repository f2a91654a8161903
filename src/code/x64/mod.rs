//! x86-64 jump encodings

use std::mem;

/// Length of the jump produced by [`jmp_rel`]
pub const JMP_REL_LEN: usize = 5;

/// Length of the jump produced by [`jmp_abs`]
pub const JMP_ABS_LEN: usize = mem::size_of::<JmpAbs>();

#[repr(packed)]
#[allow(dead_code)]
/// Struct helper for generating an absolute jump
struct JmpAbs {
    /// `jmp qword ptr [rip]`, reading the target stored right after the instruction
    jmp: [u8; 6],
    /// Absolute address to jump to
    target: u64,
}

/// Generates an absolute jump to `target`, usable from anywhere in the address space
pub fn jmp_abs(target: usize) -> [u8; JMP_ABS_LEN] {
    // SAFETY: `JmpAbs` is packed plain data of exactly `JMP_ABS_LEN` bytes
    unsafe {
        mem::transmute(JmpAbs {
            jmp: [0xFF, 0x25, 0x00, 0x00, 0x00, 0x00],
            target: target as u64,
        })
    }
}

/// Generates a relative jump placed at `source` that lands on `destination`
///
/// Returns `None` if the displacement doesn't fit in 32 bits.
pub fn jmp_rel(source: usize, destination: usize) -> Option<[u8; JMP_REL_LEN]> {
    let next = (source as i64).wrapping_add(JMP_REL_LEN as i64);
    let displacement = i32::try_from((destination as i64).wrapping_sub(next)).ok()?;

    let mut code = [0xE9, 0, 0, 0, 0];
    code[1..].copy_from_slice(&displacement.to_le_bytes());
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::{jmp_abs, jmp_rel, JMP_ABS_LEN};

    #[test]
    /// The absolute jump embeds the target after the opcode
    fn test_jmp_abs() {
        let code = jmp_abs(0x1122_3344_5566_7788);
        assert_eq!(JMP_ABS_LEN, 14);
        assert_eq!(code[..6], [0xFF, 0x25, 0, 0, 0, 0]);
        assert_eq!(code[6..], 0x1122_3344_5566_7788u64.to_le_bytes());
    }

    #[test]
    /// Displacements are relative to the end of the jump
    fn test_jmp_rel() {
        assert_eq!(jmp_rel(0x1000, 0x1005), Some([0xE9, 0, 0, 0, 0]));
        assert_eq!(jmp_rel(0x1000, 0x1000), Some([0xE9, 0xFB, 0xFF, 0xFF, 0xFF]));
        assert_eq!(jmp_rel(0x1000, 0x2000_1000).map(|code| code[0]), Some(0xE9));
    }

    #[test]
    /// Destinations out of `rel32` reach are rejected
    fn test_jmp_rel_out_of_range() {
        assert_eq!(jmp_rel(0x1000, 0x1_0000_1000), None);
        assert_eq!(jmp_rel(0x1_0000_1000, 0x1000), None);
    }
}
