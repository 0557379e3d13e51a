use std::collections::HashSet;

use anyhow::{bail, ensure, Result};
use enum_as_inner::EnumAsInner;
use strum_macros::AsRefStr;

use crate::registers::{reg_from_number, Reg, RegType};
use crate::rtl::AsmEnv;
use crate::sexp::Sexp;

/// Arithmetic operations the backend lowers, tagged with their mnemonic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsRefStr)]
pub enum ArithOp {
  #[strum(serialize = "add")]
  Plus,
  #[strum(serialize = "lsl")]
  Ashift,
  #[strum(serialize = "mul")]
  Mult,
  #[strum(serialize = "sub")]
  Minus,
}

impl ArithOp {
  fn translate(tag: &str) -> Option<Self> {
    if tag.contains("plus") {
      Some(ArithOp::Plus)
    } else if tag.contains("ashift") && !tag.contains("ashiftrt") {
      Some(ArithOp::Ashift)
    } else if tag.contains("mult") {
      Some(ArithOp::Mult)
    } else if tag.contains("minus") {
      Some(ArithOp::Minus)
    } else {
      None
    }
  }
}

/// An operand tree.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Value {
  Const(i64),
  Reg(Reg),
  Mem {
    ty: RegType,
    addr: Box<Value>,
  },
  Compare {
    ty: RegType,
    lhs: Box<Value>,
    rhs: Box<Value>,
  },
  Arith {
    op: ArithOp,
    ty: RegType,
    lhs: Box<Value>,
    rhs: Box<Value>,
  },
}

fn reg_type_of(tag: &str) -> Result<RegType> {
  RegType::translate(tag).ok_or_else(|| anyhow::anyhow!("unrecognized machine mode in {:?}", tag))
}

impl Value {
  /// Parse one operand descriptor, dispatching on its type tag.
  /// Unrecognized tags are a fatal internal error.
  pub fn parse(sexp: &Sexp) -> Result<Value> {
    let items = match sexp.as_list() {
      Some(items) if !items.is_empty() => items,
      _ => bail!("operand descriptor is not a list: {:?}", sexp),
    };
    let tag = match sexp.head_sym() {
      Some(tag) => tag.to_lowercase(),
      None => bail!("operand descriptor has no type tag: {:?}", sexp),
    };

    if tag.contains("const") {
      let value = items
        .get(1)
        .and_then(|s| s.as_atom())
        .and_then(|a| a.as_int())
        .copied();
      match value {
        Some(value) => Ok(Value::Const(value)),
        None => bail!("malformed constant: {:?}", sexp),
      }
    } else if tag.contains("reg") {
      Self::parse_reg(&tag, items)
    } else if tag.contains("mem") {
      let ty = reg_type_of(&tag)?;
      let addr = match items.get(1) {
        Some(addr) => Value::parse(addr)?,
        None => bail!("memory operand without an address: {:?}", sexp),
      };
      Ok(Value::Mem {
        ty,
        addr: Box::new(addr),
      })
    } else if tag.contains("compare") {
      ensure!(items.len() == 3, "malformed compare: {:?}", sexp);
      Ok(Value::Compare {
        ty: reg_type_of(&tag)?,
        lhs: Box::new(Value::parse(&items[1])?),
        rhs: Box::new(Value::parse(&items[2])?),
      })
    } else if let Some(op) = ArithOp::translate(&tag) {
      ensure!(items.len() == 3, "malformed arithmetic: {:?}", sexp);
      Ok(Value::Arith {
        op,
        ty: reg_type_of(&tag)?,
        lhs: Box::new(Value::parse(&items[1])?),
        rhs: Box::new(Value::parse(&items[2])?),
      })
    } else {
      bail!("unrecognized operand type {:?}", tag)
    }
  }

  /// Registers 0-10 and the arg pointer are machine registers, 100 is the
  /// condition-code register, anything else with no printable alias is a
  /// virtual register at generation 0.
  fn parse_reg(tag: &str, items: &[Sexp]) -> Result<Value> {
    let ty = reg_type_of(tag)?;
    let number = match items.get(1).and_then(|s| s.as_atom()).and_then(|a| a.as_int()) {
      Some(&n) if n >= 0 => n as u32,
      _ => bail!("malformed register descriptor: {:?}", items),
    };

    if let Some(reg) = reg_from_number(ty, number) {
      return Ok(Value::Reg(reg));
    }
    match items.get(2) {
      None | Some(Sexp::List(_)) => Ok(Value::Reg(Reg::Virtual(ty, number, 0))),
      Some(other) => bail!("unrecognized register alias {:?}", other),
    }
  }

  pub fn defs(&self) -> HashSet<Reg> {
    match self {
      Value::Reg(reg) => reg.def_set(),
      _ => HashSet::new(),
    }
  }

  pub fn uses(&self) -> HashSet<Reg> {
    match self {
      Value::Const(_) => HashSet::new(),
      Value::Reg(reg) => reg.use_set(),
      Value::Mem { addr, .. } => addr.uses(),
      Value::Compare { lhs, rhs, .. } | Value::Arith { lhs, rhs, .. } => {
        lhs.uses().union(&rhs.uses()).copied().collect()
      }
    }
  }

  /// Rewrite every occurrence of `old` (exact generation match) to carry
  /// `prime` instead. Used exclusively by spill rewriting.
  pub fn update_virt_reg(&mut self, old: &Reg, prime: i64) {
    match self {
      Value::Const(_) => {}
      Value::Reg(reg) => {
        if reg == old {
          *reg = reg.with_prime(prime);
        }
      }
      Value::Mem { addr, .. } => addr.update_virt_reg(old, prime),
      Value::Compare { lhs, rhs, .. } | Value::Arith { lhs, rhs, .. } => {
        lhs.update_virt_reg(old, prime);
        rhs.update_virt_reg(old, prime);
      }
    }
  }

  /// Render this value as an operand. `mem` selects addressing-mode syntax:
  /// constants become shift amounts, `plus`/`mult` become index forms.
  pub fn asm(&self, env: &AsmEnv, mem: bool) -> Result<String> {
    match self {
      Value::Const(value) => {
        if mem {
          ensure!(
            *value > 0 && (*value & (*value - 1)) == 0,
            "scaled index by non-power-of-two constant {}",
            value
          );
          Ok(format!("#{}", value.trailing_zeros()))
        } else {
          Ok(format!("#{}", value))
        }
      }
      Value::Reg(reg) => match reg {
        Reg::Real(..) | Reg::CallerSave(..) => Ok(reg.machine_name()),
        Reg::Virtual(..) => match env.mapping.get(reg) {
          Some(real) => Ok(real.machine_name()),
          None => bail!("register {} was never allocated", reg),
        },
        Reg::CondCodes(..) => bail!("condition codes are not a printable operand"),
      },
      Value::Mem { addr, .. } => Ok(format!("[{}]", addr.asm(env, true)?)),
      Value::Compare { .. } => bail!("compare is not a printable operand"),
      Value::Arith { op, lhs, rhs, .. } => {
        if !mem {
          bail!("arithmetic outside an address needs a destination");
        }
        match op {
          ArithOp::Plus => {
            if lhs.is_reg() {
              Ok(format!("{},{}", lhs.asm(env, false)?, rhs.asm(env, false)?))
            } else {
              Ok(format!(
                "{},{}",
                rhs.asm(env, false)?,
                lhs.asm(env, lhs.is_arith())?
              ))
            }
          }
          ArithOp::Mult => {
            ensure!(
              lhs.is_reg() && rhs.is_const(),
              "unsupported scaled-index shape"
            );
            Ok(format!(
              "{},{}{}",
              lhs.asm(env, true)?,
              ArithOp::Ashift.as_ref(),
              rhs.asm(env, true)?
            ))
          }
          _ => bail!("{:?} is not an addressing mode", op),
        }
      }
    }
  }
}
