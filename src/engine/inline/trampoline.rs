//! Trampolines: executable memory next to a target holding the relay to the detour and a relocated
//! copy of the instructions the hook overwrites.
//!
//! Layout of one trampoline:
//!
//! ```text
//! +0                 jmp [rip] -> detour
//! +PROLOGUE_OFFSET   relocated prologue of the target
//!                    jmp [rip] -> target + prologue length
//! ```

use std::slice;

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};

use crate::alloc::{self, ExecutableMemory};
use crate::code::x64::{jmp_abs, JMP_ABS_LEN, JMP_REL_LEN};
use crate::engine::Status;

/// Size of one trampoline allocation
pub(super) const TRAMPOLINE_SIZE: usize = 128;

/// Offset of the relocated prologue inside a trampoline
const PROLOGUE_OFFSET: usize = 16;

/// Most bytes decoded from a target; an x86 instruction is at most 15 bytes long
const MAX_DECODE: usize = JMP_REL_LEN + 15;

/// Executable memory redirecting to a detour and back into the original code
pub(super) struct Trampoline {
    /// Backing memory
    memory: ExecutableMemory,
    /// Number of target bytes relocated into the trampoline
    prologue_len: usize,
}

impl Trampoline {
    /// Builds the trampoline for hooking `target` with `detour`
    ///
    /// `readable_end` bounds the bytes that may be decoded at `target`.
    ///
    /// # Safety
    ///
    /// `target..readable_end` must be readable code
    pub(super) unsafe fn build(
        target: usize,
        readable_end: usize,
        detour: usize,
    ) -> Result<Self, Status> {
        let available = readable_end.saturating_sub(target).min(MAX_DECODE);
        let code = slice::from_raw_parts(target as *const u8, available);
        let (instructions, prologue_len) = decode_prologue(target, code)?;

        let mut memory = alloc::allocate_near(target, TRAMPOLINE_SIZE).map_err(|error| {
            tracing::debug!(address = target, %error, "failed to allocate trampoline");
            Status::MemoryAlloc
        })?;
        let prologue_address = memory.as_ptr() as usize + PROLOGUE_OFFSET;

        let block = InstructionBlock::new(&instructions, prologue_address as u64);
        let relocated = BlockEncoder::encode(64, block, BlockEncoderOptions::NONE)
            .map_err(|error| {
                tracing::debug!(address = target, %error, "failed to relocate prologue");
                Status::UnsupportedFunction
            })?
            .code_buffer;
        if PROLOGUE_OFFSET + relocated.len() + JMP_ABS_LEN > TRAMPOLINE_SIZE {
            return Err(Status::UnsupportedFunction);
        }

        memory[..JMP_ABS_LEN].copy_from_slice(&jmp_abs(detour));
        let resume = PROLOGUE_OFFSET + relocated.len();
        memory[PROLOGUE_OFFSET..resume].copy_from_slice(&relocated);
        memory[resume..resume + JMP_ABS_LEN].copy_from_slice(&jmp_abs(target + prologue_len));

        tracing::debug!(
            address = target,
            detour,
            trampoline = memory.as_ptr() as usize,
            prologue_len,
            "built trampoline"
        );
        Ok(Self {
            memory,
            prologue_len,
        })
    }

    /// Address of the relay jumping to the detour
    pub(super) fn relay(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    /// Entry point running the original function
    pub(super) fn original(&self) -> *const () {
        (self.memory.as_ptr() as usize + PROLOGUE_OFFSET) as *const ()
    }

    /// Number of target bytes relocated into the trampoline
    pub(super) fn prologue_len(&self) -> usize {
        self.prologue_len
    }
}

/// Decodes whole instructions at `ip` until at least a relative jump's worth of bytes is covered
///
/// Fails if the code leaves the function (or can't be decoded) before enough bytes are covered.
fn decode_prologue(ip: usize, code: &[u8]) -> Result<(Vec<Instruction>, usize), Status> {
    let mut decoder = Decoder::with_ip(64, code, ip as u64, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut len = 0;

    while len < JMP_REL_LEN {
        if !decoder.can_decode() {
            return Err(Status::UnsupportedFunction);
        }
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(Status::UnsupportedFunction);
        }
        len += instruction.len();

        let leaves = matches!(
            instruction.flow_control(),
            FlowControl::Return
                | FlowControl::UnconditionalBranch
                | FlowControl::IndirectBranch
                | FlowControl::Interrupt
        );
        if leaves && len < JMP_REL_LEN {
            return Err(Status::UnsupportedFunction);
        }
        instructions.push(instruction);
    }

    Ok((instructions, len))
}
