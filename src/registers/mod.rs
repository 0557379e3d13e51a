pub(crate) mod consts;
pub(crate) mod reg;

use std::collections::HashSet;

use lazy_static::lazy_static;

use crate::registers::consts::{CALLEE_SAVE_REGISTER_NUMS, CALLER_SAVE_REGISTER_NUMS};
pub use crate::registers::reg::{Reg, RegType};

lazy_static! {
  /// Registers clobbered by a call, in the clobber model used by the
  /// interference builder and the scheduler.
  pub static ref CALLER_SAVE_REGISTERS: HashSet<Reg> = CALLER_SAVE_REGISTER_NUMS
    .iter()
    .map(|&n| Reg::CallerSave(RegType::Si, n))
    .collect();

  /// The full allocation pool, sorted by register number. Seeding the
  /// interference graph with all pairs of these forces them onto distinct
  /// colors, so the color-to-register map is an identity on them.
  pub static ref REAL_REGISTERS: Vec<Reg> = {
    let mut regs: Vec<Reg> = CALLER_SAVE_REGISTER_NUMS
      .iter()
      .map(|&n| Reg::CallerSave(RegType::Si, n))
      .chain(
        CALLEE_SAVE_REGISTER_NUMS
          .iter()
          .map(|&n| Reg::Real(RegType::Si, n)),
      )
      .collect();
    regs.sort_by_key(Reg::number);
    regs
  };
}

/// Classify a register number from the dump into its `Reg` shape.
pub fn reg_from_number(ty: RegType, number: u32) -> Option<Reg> {
  if number == consts::CONDITION_CODES {
    Some(Reg::CondCodes(ty, number))
  } else if CALLER_SAVE_REGISTER_NUMS.contains(&number) {
    Some(Reg::CallerSave(ty, number))
  } else if CALLEE_SAVE_REGISTER_NUMS.contains(&number) || number == consts::ARG_POINTER {
    Some(Reg::Real(ty, number))
  } else {
    None
  }
}
