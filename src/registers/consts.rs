// ARMv7-A register numbering as it appears in the RTL dumps.
//
// r0-r3 are caller-saved (also the argument registers), r4-r10 are
// callee-saved and form the rest of the allocation pool. The dump refers
// to the frame pointer by the virtual arg-pointer number 104 and to the
// condition-code register by 100; neither participates in allocation.

pub const CALLER_SAVE_REGISTER_NUMS: [u32; 4] = [0, 1, 2, 3];
pub const CALLEE_SAVE_REGISTER_NUMS: [u32; 7] = [4, 5, 6, 7, 8, 9, 10];

/// Number of allocatable real registers, and therefore of colors.
pub const NUM_REAL_REGISTERS: usize =
  CALLER_SAVE_REGISTER_NUMS.len() + CALLEE_SAVE_REGISTER_NUMS.len();

pub const ARG_POINTER: u32 = 104;
pub const CONDITION_CODES: u32 = 100;

/// Bytes per spill slot.
pub const INT_SIZE: u32 = 4;

pub const LR: &str = "lr";
pub const PC: &str = "pc";
pub const FP: &str = "fp";
pub const SP: &str = "sp";
