use std::collections::HashSet;
use std::fmt;

use enum_as_inner::EnumAsInner;

use crate::registers::consts::{ARG_POINTER, CALLEE_SAVE_REGISTER_NUMS, FP};

/// Semantic register class from the dump's mode annotation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegType {
  /// Single integer.
  Si,
  /// Condition codes.
  Cc,
}

impl RegType {
  pub fn translate(tag: &str) -> Option<Self> {
    let tag = tag.to_lowercase();
    if tag.contains("si") {
      Some(RegType::Si)
    } else if tag.contains("cc") {
      Some(RegType::Cc)
    } else {
      None
    }
  }
}

/// A register operand. `Virtual` carries a generation ("prime") so that the
/// pre-spill and post-spill incarnations of the same symbolic register stay
/// distinguishable; generation 0 is the incarnation the input named.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, EnumAsInner)]
pub enum Reg {
  /// Callee-saved machine register, or the arg pointer.
  Real(RegType, u32),
  /// Caller-saved machine register (clobbered across calls).
  CallerSave(RegType, u32),
  /// The condition-code register; never allocated, never live.
  CondCodes(RegType, u32),
  /// Symbolic register: (type, number, generation).
  Virtual(RegType, u32, i64),
}

impl Reg {
  pub fn number(&self) -> u32 {
    match self {
      Reg::Real(_, n) | Reg::CallerSave(_, n) | Reg::CondCodes(_, n) | Reg::Virtual(_, n, _) => *n,
    }
  }

  pub fn reg_type(&self) -> RegType {
    match self {
      Reg::Real(t, _) | Reg::CallerSave(t, _) | Reg::CondCodes(t, _) | Reg::Virtual(t, _, _) => *t,
    }
  }

  /// A machine register, caller- or callee-saved.
  pub fn is_machine(&self) -> bool {
    matches!(self, Reg::Real(..) | Reg::CallerSave(..))
  }

  /// A register the function must preserve for its caller. The arg pointer
  /// is outside the allocation pool and never counts.
  pub fn is_callee_saved(&self) -> bool {
    matches!(self, Reg::Real(_, n) if CALLEE_SAVE_REGISTER_NUMS.contains(n))
  }

  /// Equality up to generation: same class of register, same (type, number).
  pub fn fuzzy_eq(&self, other: &Reg) -> bool {
    match (self, other) {
      (Reg::Virtual(t1, n1, _), Reg::Virtual(t2, n2, _)) => t1 == t2 && n1 == n2,
      _ => self == other,
    }
  }

  /// The same virtual register at a different generation.
  pub fn with_prime(&self, prime: i64) -> Reg {
    match self {
      Reg::Virtual(t, n, _) => Reg::Virtual(*t, *n, prime),
      other => *other,
    }
  }

  /// Registers this operand contributes to a def set. Callee-saved real
  /// registers and condition codes are pre-allocated and contribute nothing.
  pub fn def_set(&self) -> HashSet<Reg> {
    match self {
      Reg::CallerSave(..) | Reg::Virtual(..) => [*self].iter().copied().collect(),
      _ => HashSet::new(),
    }
  }

  pub fn use_set(&self) -> HashSet<Reg> {
    self.def_set()
  }

  /// The hardware name a real register renders as.
  pub fn machine_name(&self) -> String {
    if self.number() == ARG_POINTER {
      FP.to_string()
    } else {
      format!("r{}", self.number())
    }
  }
}

impl fmt::Display for Reg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Reg::Real(_, n) | Reg::CallerSave(_, n) => write!(f, "r{}", n),
      Reg::CondCodes(_, n) => write!(f, "cc{}", n),
      Reg::Virtual(_, n, 0) => write!(f, "v{}", n),
      Reg::Virtual(_, n, p) => write!(f, "v{}'{}", n, p),
    }
  }
}
