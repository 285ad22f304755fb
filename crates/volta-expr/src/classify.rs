//! Compile-time classification of table-row expressions.
//!
//! The class decides how much matrix the row costs:
//!
//! | Class | Matrix rows | Iteration work |
//! |---|---|---|
//! | Alias | 0 | 0 |
//! | Constant | 1 source row, simplifiable | 0 |
//! | Linear | 1 VCVS row | 0 |
//! | Dynamic | 1 nonlinear source row | eval + convergence check |

use std::collections::BTreeMap;

use crate::{BinOp, Expr};

/// Row class of a compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum RowClass {
    /// A bare reference; the output is the referenced node itself.
    Alias(String),
    /// Pure literal tree; value known at compile time.
    Constant(f64),
    /// Linear combination of references with constant coefficients.
    Linear {
        terms: Vec<(String, f64)>,
        constant: f64,
    },
    /// Everything else: time-dependent, stateful, or nonlinear.
    Dynamic,
}

/// Classify an expression tree.
pub fn classify(expr: &Expr) -> RowClass {
    // Bare reference is an alias regardless of what linear analysis
    // would say; aliases cost no matrix rows at all.
    if let Expr::Ident(name) = expr {
        return RowClass::Alias(name.clone());
    }

    match linear_form(expr) {
        Some((terms, constant)) if terms.is_empty() => RowClass::Constant(constant),
        Some((terms, constant)) => RowClass::Linear {
            terms: terms.into_iter().collect(),
            constant,
        },
        None => RowClass::Dynamic,
    }
}

/// Decompose into `sum(coeff * ident) + constant`, or `None` if the tree
/// is not linear with constant coefficients.
fn linear_form(expr: &Expr) -> Option<(BTreeMap<String, f64>, f64)> {
    match expr {
        Expr::Number(v) => Some((BTreeMap::new(), *v)),
        Expr::Ident(name) => {
            let mut terms = BTreeMap::new();
            terms.insert(name.clone(), 1.0);
            Some((terms, 0.0))
        }
        Expr::Neg(e) => {
            let (mut terms, c) = linear_form(e)?;
            for v in terms.values_mut() {
                *v = -*v;
            }
            Some((terms, -c))
        }
        Expr::Binary(BinOp::Add, a, b) => {
            let (mut ta, ca) = linear_form(a)?;
            let (tb, cb) = linear_form(b)?;
            for (name, coeff) in tb {
                *ta.entry(name).or_insert(0.0) += coeff;
            }
            Some((ta, ca + cb))
        }
        Expr::Binary(BinOp::Sub, a, b) => {
            let (mut ta, ca) = linear_form(a)?;
            let (tb, cb) = linear_form(b)?;
            for (name, coeff) in tb {
                *ta.entry(name).or_insert(0.0) -= coeff;
            }
            Some((ta, ca - cb))
        }
        Expr::Binary(BinOp::Mul, a, b) => {
            let (ta, ca) = linear_form(a)?;
            let (tb, cb) = linear_form(b)?;
            // One side must be a pure constant; variable products are
            // nonlinear.
            if ta.is_empty() {
                let mut terms = tb;
                for v in terms.values_mut() {
                    *v *= ca;
                }
                Some((terms, ca * cb))
            } else if tb.is_empty() {
                let mut terms = ta;
                for v in terms.values_mut() {
                    *v *= cb;
                }
                Some((terms, ca * cb))
            } else {
                None
            }
        }
        Expr::Binary(BinOp::Div, a, b) => {
            let (terms, ca) = linear_form(a)?;
            let (tb, cb) = linear_form(b)?;
            if !tb.is_empty() || cb == 0.0 {
                return None;
            }
            let mut terms = terms;
            for v in terms.values_mut() {
                *v /= cb;
            }
            Some((terms, ca / cb))
        }
        Expr::Binary(BinOp::Pow, a, b) => {
            // Constant folding only: both sides literal.
            let (ta, ca) = linear_form(a)?;
            let (tb, cb) = linear_form(b)?;
            if ta.is_empty() && tb.is_empty() {
                let v = ca.powf(cb);
                if v.is_finite() {
                    return Some((BTreeMap::new(), v));
                }
            }
            None
        }
        Expr::Call(builtin, args) => {
            // A call over pure literals folds to a constant; anything
            // referencing a variable is dynamic.
            if args.iter().any(Expr::has_references) {
                return None;
            }
            let folded: Vec<f64> = args
                .iter()
                .map(|a| linear_form(a).map(|(_, c)| c))
                .collect::<Option<_>>()?;
            let v = fold_call(*builtin, &folded)?;
            Some((BTreeMap::new(), v))
        }
        Expr::Time | Expr::Integrate(..) | Expr::Diff(..) | Expr::Lag(..) => None,
    }
}

fn fold_call(builtin: crate::Builtin, args: &[f64]) -> Option<f64> {
    use crate::Builtin as B;
    let v = match builtin {
        B::Sin => args[0].sin(),
        B::Cos => args[0].cos(),
        B::Tan => args[0].tan(),
        B::Asin => args[0].asin(),
        B::Acos => args[0].acos(),
        B::Atan => args[0].atan(),
        B::Sinh => args[0].sinh(),
        B::Cosh => args[0].cosh(),
        B::Tanh => args[0].tanh(),
        B::Exp => args[0].exp(),
        B::Log => args[0].ln(),
        B::Log10 => args[0].log10(),
        B::Sqrt => args[0].sqrt(),
        B::Abs => args[0].abs(),
        B::Floor => args[0].floor(),
        B::Ceil => args[0].ceil(),
        B::Min => args[0].min(args[1]),
        B::Max => args[0].max(args[1]),
        B::Pow => args[0].powf(args[1]),
        B::Atan2 => args[0].atan2(args[1]),
    };
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn class_of(src: &str) -> RowClass {
        classify(&parse(src).unwrap().expr)
    }

    #[test]
    fn test_bare_reference_is_alias() {
        assert_eq!(class_of("Y"), RowClass::Alias("Y".into()));
        // Anything with structure is not an alias
        assert_ne!(class_of("Y * 1"), RowClass::Alias("Y".into()));
    }

    #[test]
    fn test_literal_tree_is_constant() {
        assert_eq!(class_of("20"), RowClass::Constant(20.0));
        assert_eq!(class_of("2 * (3 + 4)"), RowClass::Constant(14.0));
        match class_of("sin(1) + 2^3") {
            RowClass::Constant(v) => assert!((v - (1.0_f64.sin() + 8.0)).abs() < 1e-12),
            other => panic!("expected Constant, got {other:?}"),
        }
    }

    #[test]
    fn test_linear_combination() {
        match class_of("0.6*YD + 0.4*H - 5") {
            RowClass::Linear { terms, constant } => {
                assert_eq!(constant, -5.0);
                assert!(terms.contains(&("YD".into(), 0.6)));
                assert!(terms.contains(&("H".into(), 0.4)));
            }
            other => panic!("expected Linear, got {other:?}"),
        }
    }

    #[test]
    fn test_division_by_constant_is_linear() {
        match class_of("(a + b) / 2") {
            RowClass::Linear { terms, .. } => {
                assert!(terms.contains(&("a".into(), 0.5)));
                assert!(terms.contains(&("b".into(), 0.5)));
            }
            other => panic!("expected Linear, got {other:?}"),
        }
    }

    #[test]
    fn test_products_of_variables_are_dynamic() {
        assert_eq!(class_of("a * b"), RowClass::Dynamic);
        assert_eq!(class_of("a / b"), RowClass::Dynamic);
        assert_eq!(class_of("a^2"), RowClass::Dynamic);
    }

    #[test]
    fn test_time_and_stateful_are_dynamic() {
        assert_eq!(class_of("t"), RowClass::Dynamic);
        assert_eq!(class_of("2*t + 1"), RowClass::Dynamic);
        assert_eq!(class_of("integrate(x)"), RowClass::Dynamic);
        assert_eq!(class_of("lag(x, 3)"), RowClass::Dynamic);
        assert_eq!(class_of("sin(x)"), RowClass::Dynamic);
    }

    #[test]
    fn test_cancelling_terms_still_linear() {
        match class_of("x - x + 3") {
            RowClass::Linear { terms, constant } => {
                assert_eq!(constant, 3.0);
                assert_eq!(terms, vec![("x".into(), 0.0)]);
            }
            other => panic!("expected Linear, got {other:?}"),
        }
    }
}
