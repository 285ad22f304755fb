//! Expression evaluation with committed/pending state.
//!
//! Evaluation never mutates committed state: `integrate(x)` returns
//! `last + dt*x` and records the result as pending; only
//! [`ExprState::commit`] (called from `step_finished` after the timestep
//! converges) moves pending values into the committed slots. This is
//! what makes the evaluator safe under Newton-Raphson, where `x` changes
//! across subiterations.
//!
//! Runtime domain errors never abort the simulation: division by a
//! near-zero denominator, `log` of a non-positive value and friends
//! yield 0 with a one-shot diagnostic per expression instance.

use crate::{BinOp, Builtin, Expr};

/// Denominators below this magnitude clamp the quotient to 0.
const DIV_EPSILON: f64 = 1e-12;

/// Resolves named references during evaluation.
///
/// Implementations resolve against labeled nodes first and fall back to
/// the computed-value registry; `None` means the name is unknown and the
/// reference evaluates to 0.
pub trait EvalContext {
    /// Value of a named reference, if it resolves.
    fn lookup(&self, name: &str) -> Option<f64>;

    /// Current simulation time.
    fn time(&self) -> f64;

    /// Timestep length.
    fn dt(&self) -> f64;
}

/// One stateful-builtin slot: committed value plus the pending value
/// produced by the latest evaluation.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    last: f64,
    pending: f64,
}

/// Per-expression-instance mutable state.
#[derive(Debug, Clone, Default)]
pub struct ExprState {
    slots: Vec<Slot>,
    /// Last overall output of the expression.
    pub last_output: f64,
    warned: bool,
}

impl ExprState {
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: vec![Slot::default(); num_slots],
            last_output: 0.0,
            warned: false,
        }
    }

    /// Commit pending stateful values. Call once per timestep from
    /// `step_finished`, never during subiterations.
    pub fn commit(&mut self) {
        for slot in &mut self.slots {
            slot.last = slot.pending;
        }
    }

    /// Reset all state to zero (engine reset).
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::default();
        }
        self.last_output = 0.0;
        self.warned = false;
    }

    /// Seed the committed value of slot `idx` (initial stock levels).
    pub fn seed_slot(&mut self, idx: usize, value: f64) {
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.last = value;
            slot.pending = value;
        }
    }

    /// Committed value of slot `idx`.
    pub fn slot_value(&self, idx: usize) -> f64 {
        self.slots.get(idx).map(|s| s.last).unwrap_or(0.0)
    }

    fn warn_once(&mut self, what: &str) {
        if !self.warned {
            log::warn!("expression runtime error: {what}; substituting 0");
            self.warned = true;
        }
    }
}

/// Evaluate `expr` against `ctx`, updating pending state in `state`.
pub fn eval(expr: &Expr, ctx: &dyn EvalContext, state: &mut ExprState) -> f64 {
    match expr {
        Expr::Number(v) => *v,
        Expr::Time => ctx.time(),
        Expr::Ident(name) => match ctx.lookup(name) {
            Some(v) => v,
            None => {
                state.warn_once(&format!("unresolved reference '{name}'"));
                0.0
            }
        },
        Expr::Neg(e) => -eval(e, ctx, state),
        Expr::Binary(op, a, b) => {
            let x = eval(a, ctx, state);
            let y = eval(b, ctx, state);
            match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => {
                    if y.abs() < DIV_EPSILON {
                        state.warn_once("division by near-zero");
                        0.0
                    } else {
                        x / y
                    }
                }
                BinOp::Pow => checked(x.powf(y), state),
            }
        }
        Expr::Call(builtin, args) => {
            let a0 = eval(&args[0], ctx, state);
            let v = match builtin {
                Builtin::Sin => a0.sin(),
                Builtin::Cos => a0.cos(),
                Builtin::Tan => a0.tan(),
                Builtin::Asin => a0.asin(),
                Builtin::Acos => a0.acos(),
                Builtin::Atan => a0.atan(),
                Builtin::Sinh => a0.sinh(),
                Builtin::Cosh => a0.cosh(),
                Builtin::Tanh => a0.tanh(),
                Builtin::Exp => a0.exp(),
                Builtin::Log => a0.ln(),
                Builtin::Log10 => a0.log10(),
                Builtin::Sqrt => a0.sqrt(),
                Builtin::Abs => a0.abs(),
                Builtin::Floor => a0.floor(),
                Builtin::Ceil => a0.ceil(),
                Builtin::Min => a0.min(eval(&args[1], ctx, state)),
                Builtin::Max => a0.max(eval(&args[1], ctx, state)),
                Builtin::Pow => a0.powf(eval(&args[1], ctx, state)),
                Builtin::Atan2 => a0.atan2(eval(&args[1], ctx, state)),
            };
            checked(v, state)
        }
        Expr::Integrate(slot, e) => {
            let x = eval(e, ctx, state);
            let out = state.slots[*slot].last + ctx.dt() * x;
            state.slots[*slot].pending = out;
            out
        }
        Expr::Diff(slot, e) => {
            let x = eval(e, ctx, state);
            let dt = ctx.dt();
            let out = if dt.abs() < DIV_EPSILON {
                0.0
            } else {
                (x - state.slots[*slot].last) / dt
            };
            state.slots[*slot].pending = x;
            out
        }
        Expr::Lag(slot, e, tau_expr) => {
            let x = eval(e, ctx, state);
            let tau = eval(tau_expr, ctx, state);
            let y = state.slots[*slot].last;
            let out = if tau.abs() < DIV_EPSILON {
                x
            } else {
                y + (ctx.dt() / tau) * (x - y)
            };
            state.slots[*slot].pending = out;
            out
        }
    }
}

fn checked(v: f64, state: &mut ExprState) -> f64 {
    if v.is_finite() {
        v
    } else {
        state.warn_once("non-finite result");
        0.0
    }
}
