//! Expression parsing and evaluation.
//!
//! User expressions drive the equation, table, ODE and Godley elements.
//! An expression is compiled once at load time into an AST plus a count
//! of state slots for the stateful builtins (`integrate`, `diff`,
//! `lag`). Evaluation is pure with respect to committed state: a
//! Newton-Raphson pass may evaluate the same expression many times per
//! timestep, and state only advances when [`ExprState::commit`] runs at
//! `step_finished`.

pub mod classify;
pub mod error;
pub mod eval;
pub mod parser;
pub mod token;

pub use classify::{RowClass, classify};
pub use error::{ParseError, Result};
pub use eval::{EvalContext, ExprState, eval};
pub use parser::{Compiled, parse};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Built-in pure functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Min,
    Max,
    Pow,
    Atan2,
}

impl Builtin {
    /// Number of arguments the builtin takes.
    pub fn arity(&self) -> usize {
        match self {
            Builtin::Min | Builtin::Max | Builtin::Pow | Builtin::Atan2 => 2,
            _ => 1,
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Some(match name {
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "tan" => Builtin::Tan,
            "asin" => Builtin::Asin,
            "acos" => Builtin::Acos,
            "atan" => Builtin::Atan,
            "sinh" => Builtin::Sinh,
            "cosh" => Builtin::Cosh,
            "tanh" => Builtin::Tanh,
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            "log10" => Builtin::Log10,
            "sqrt" => Builtin::Sqrt,
            "abs" => Builtin::Abs,
            "floor" => Builtin::Floor,
            "ceil" => Builtin::Ceil,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "pow" => Builtin::Pow,
            "atan2" => Builtin::Atan2,
            _ => return None,
        })
    }
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// The simulation time variable `t`.
    Time,
    /// Named reference: labeled node first, computed value second.
    Ident(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
    /// `integrate(x)` with its state slot.
    Integrate(usize, Box<Expr>),
    /// `diff(x)` with its state slot.
    Diff(usize, Box<Expr>),
    /// `lag(x, tau)` with its state slot.
    Lag(usize, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// True if evaluation depends on anything besides literals.
    pub fn has_references(&self) -> bool {
        match self {
            Expr::Number(_) => false,
            Expr::Time | Expr::Ident(_) => true,
            Expr::Neg(e) => e.has_references(),
            Expr::Binary(_, a, b) => a.has_references() || b.has_references(),
            Expr::Call(_, args) => args.iter().any(Expr::has_references),
            Expr::Integrate(..) | Expr::Diff(..) | Expr::Lag(..) => true,
        }
    }

    /// Collect every identifier referenced by the expression.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Ident(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(e) => e.collect_refs(out),
            Expr::Binary(_, a, b) => {
                a.collect_refs(out);
                b.collect_refs(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect_refs(out);
                }
            }
            Expr::Integrate(_, e) | Expr::Diff(_, e) => e.collect_refs(out),
            Expr::Lag(_, e, tau) => {
                e.collect_refs(out);
                tau.collect_refs(out);
            }
            Expr::Number(_) | Expr::Time => {}
        }
    }
}
