//! Hand-built RTL nodes for unit tests.

use crate::registers::{Reg, RegType};
use crate::rtl::value::Value;
use crate::rtl::{Rtl, RtlKind};

pub fn vreg(number: u32) -> Reg {
  Reg::Virtual(RegType::Si, number, 0)
}

pub fn caller_save(number: u32) -> Reg {
  Reg::CallerSave(RegType::Si, number)
}

pub fn set_const(insn: i64, bb: i64, def: u32, value: i64) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::Set {
      def_value: Value::Reg(vreg(def)),
      use_value: Value::Const(value),
    },
  )
}

pub fn set_reg(insn: i64, bb: i64, def: u32, used: u32) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::Set {
      def_value: Value::Reg(vreg(def)),
      use_value: Value::Reg(vreg(used)),
    },
  )
}

pub fn set_add(insn: i64, bb: i64, def: u32, lhs: u32, rhs: u32) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::Set {
      def_value: Value::Reg(vreg(def)),
      use_value: Value::Arith {
        op: crate::rtl::value::ArithOp::Plus,
        ty: RegType::Si,
        lhs: Box::new(Value::Reg(vreg(lhs))),
        rhs: Box::new(Value::Reg(vreg(rhs))),
      },
    },
  )
}

pub fn load_mem(insn: i64, bb: i64, def: u32, addr: u32) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::Set {
      def_value: Value::Reg(vreg(def)),
      use_value: Value::Mem {
        ty: RegType::Si,
        addr: Box::new(Value::Reg(vreg(addr))),
      },
    },
  )
}

pub fn store_mem(insn: i64, bb: i64, addr: u32, src: u32) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::Set {
      def_value: Value::Mem {
        ty: RegType::Si,
        addr: Box::new(Value::Reg(vreg(addr))),
      },
      use_value: Value::Reg(vreg(src)),
    },
  )
}

pub fn use_marker(insn: i64, bb: i64, caller_save_num: u32) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::Use {
      use_value: Value::Reg(caller_save(caller_save_num)),
    },
  )
}

pub fn label(insn: i64, bb: i64) -> Rtl {
  Rtl::new(insn, bb, RtlKind::Label)
}

pub fn jump(insn: i64, bb: i64, target: i64) -> Rtl {
  Rtl::new(insn, bb, RtlKind::Jump { target })
}

pub fn cond_jump(insn: i64, bb: i64, comp: &str, target: i64) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::CondJump {
      target,
      comp: comp.to_string(),
    },
  )
}

pub fn call(insn: i64, bb: i64, callee: &str) -> Rtl {
  Rtl::new(
    insn,
    bb,
    RtlKind::Call {
      callee: callee.to_string(),
    },
  )
}
