//! Reader for textual RTL dumps.
//!
//! A dump is free-form commentary (which names the function) followed by one
//! parenthesized expression per instruction, with `[`/`]` usable
//! interchangeably with `(`/`)`.

use std::fs;

use anyhow::{bail, Context, Result};
use enum_as_inner::EnumAsInner;
use logos::{Lexer, Logos};

fn from_num<'a>(lex: &mut Lexer<'a, Token>) -> Option<i64> {
  lex.slice().parse().ok()
}

fn from_string<'a>(lex: &mut Lexer<'a, Token>) -> String {
  let slice = lex.slice();
  slice[1..slice.len() - 1].to_string()
}

fn from_sym<'a>(lex: &mut Lexer<'a, Token>) -> String {
  lex.slice().to_string()
}

#[derive(Logos, Debug, PartialEq)]
enum Token {
  #[token("(")]
  #[token("[")]
  Open,

  #[token(")")]
  #[token("]")]
  Close,

  #[regex(r"-?[0-9]+", priority = 3, callback = from_num)]
  Int(i64),

  #[regex(r#""[^"]*""#, from_string)]
  Str(String),

  // Hex literals and floats land here too; nothing structural reads them.
  #[regex(r#"[^()\[\]"\s]+"#, from_sym)]
  Sym(String),

  #[error]
  #[regex(r"[ \t\r\n\f]+", logos::skip)]
  Error,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Atom {
  Int(i64),
  Sym(String),
  Str(String),
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Sexp {
  Atom(Atom),
  List(Vec<Sexp>),
}

impl Sexp {
  /// The head symbol of a list, if it has one.
  pub fn head_sym(&self) -> Option<&str> {
    match self {
      Sexp::List(items) => items.first()?.as_atom()?.as_sym().map(String::as_str),
      Sexp::Atom(_) => None,
    }
  }
}

/// Parse a whole token stream into the sequence of top-level expressions.
pub fn parse_sexps(input: &str) -> Result<Vec<Sexp>> {
  let mut stack: Vec<Vec<Sexp>> = Vec::new();
  let mut current: Vec<Sexp> = Vec::new();

  let mut lexer = Token::lexer(input);
  while let Some(token) = lexer.next() {
    match token {
      Token::Open => {
        stack.push(std::mem::take(&mut current));
      }
      Token::Close => {
        let finished = match stack.pop() {
          Some(outer) => std::mem::replace(&mut current, outer),
          None => bail!("unbalanced ')' in input"),
        };
        current.push(Sexp::List(finished));
      }
      Token::Int(value) => current.push(Sexp::Atom(Atom::Int(value))),
      Token::Sym(sym) => current.push(Sexp::Atom(Atom::Sym(sym))),
      Token::Str(s) => current.push(Sexp::Atom(Atom::Str(s))),
      Token::Error => bail!("unrecognized input near {:?}", lexer.slice()),
    }
  }

  if !stack.is_empty() {
    bail!("unbalanced '(' in input");
  }
  Ok(current)
}

/// Scan the commentary preceding the first expression for the function name:
/// the token after `function` (or after `void`, when the dump spells out the
/// return type), trimmed at the first `(`.
fn scan_func_name(header: &str) -> String {
  for line in header.lines() {
    let words: Vec<String> = line.to_lowercase().split_whitespace().map(String::from).collect();
    if let Some(pos) = words.iter().position(|w| w == "function") {
      let name_pos = match words.iter().position(|w| w == "void") {
        Some(v) => v + 1,
        None => pos + 1,
      };
      if let Some(word) = words.get(name_pos) {
        return word.split('(').next().unwrap_or("").to_string();
      }
    }
  }
  String::new()
}

/// Split a dump into (function name, RTL expressions).
pub fn parse_rtl_text(text: &str) -> Result<(String, Vec<Sexp>)> {
  let body_start = text
    .lines()
    .scan(0usize, |offset, line| {
      let start = *offset;
      *offset += line.len() + 1;
      Some((start, line))
    })
    .find(|(_, line)| line.starts_with('('))
    .map(|(start, _)| start)
    .unwrap_or_else(|| text.len());

  let func_name = scan_func_name(&text[..body_start]);
  let sexps = parse_sexps(&text[body_start..])?;
  Ok((func_name, sexps))
}

pub fn read_rtl_file(path: &str) -> Result<(String, Vec<Sexp>)> {
  let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path))?;
  parse_rtl_text(&text)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_nested_lists() {
    let sexps = parse_sexps("(insn 10 9 11 2 (set (reg:SI 134) (const_int 5)))").unwrap();
    assert_eq!(sexps.len(), 1);
    let items = sexps[0].as_list().unwrap();
    assert_eq!(items[0], Sexp::Atom(Atom::Sym("insn".to_string())));
    assert_eq!(items[1], Sexp::Atom(Atom::Int(10)));
    assert_eq!(items[5].head_sym(), Some("set"));
  }

  #[test]
  fn brackets_are_parens() {
    let sexps = parse_sexps("(parallel [(a 1) (b 2)])").unwrap();
    let inner = sexps[0].as_list().unwrap();
    assert_eq!(inner[1].as_list().unwrap().len(), 2);
  }

  #[test]
  fn strings_and_hex_atoms() {
    let sexps = parse_sexps(r#"(symbol_ref:SI ("exit") 0x7f)"#).unwrap();
    let items = sexps[0].as_list().unwrap();
    assert_eq!(
      items[1].as_list().unwrap()[0],
      Sexp::Atom(Atom::Str("exit".to_string()))
    );
    // hex literals stay symbolic
    assert_eq!(items[2], Sexp::Atom(Atom::Sym("0x7f".to_string())));
  }

  #[test]
  fn unbalanced_input_is_fatal() {
    assert!(parse_sexps("(a (b c)").is_err());
    assert!(parse_sexps("a) b").is_err());
  }

  #[test]
  fn function_name_from_header() {
    let text = ";; Function fib (fib, funcdef_no=0)\n\n(insn 1 0 2 0 (nil))\n";
    let (name, sexps) = parse_rtl_text(text).unwrap();
    assert_eq!(name, "fib");
    assert_eq!(sexps.len(), 1);
  }

  #[test]
  fn function_name_after_void() {
    let text = "Generated RTL\nfunction void matadd(int *a)\n(insn 1 0 2 0 (nil))\n";
    let (name, _) = parse_rtl_text(text).unwrap();
    assert_eq!(name, "matadd");
  }

  #[test]
  fn negative_numbers_lex_as_ints() {
    let sexps = parse_sexps("(const_int -1)").unwrap();
    let items = sexps[0].as_list().unwrap();
    assert_eq!(items[1], Sexp::Atom(Atom::Int(-1)));
  }
}
