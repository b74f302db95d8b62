//! Reverse-mode automatic differentiation — AST to tape lowering.
//!
//! The builder walks the expression tree bottom-up, appending one tape
//! item per operation. Each item records the symbolic expression for its
//! value and, per operand, the partial-derivative coefficient the reverse
//! sweep multiplies in. The first `var_names.len()` items are reserved for
//! the independent variables; their values come from the caller.
//!
//! Differentiation rules:
//!
//! | Forward   | Partials                                    |
//! |-----------|---------------------------------------------|
//! | a + b     | (a, 1), (b, 1)                              |
//! | a - b     | (a, 1), (b, -1)                             |
//! | a * b     | (b, a), (a, b)                              |
//! | a / b     | (a, 1/b), (b, -a/b²)                        |
//! | -a        | (a, -1)                                     |
//! | sq(a)     | (a, 2a)                                     |
//! | sqrt(a)   | (a, 0.5/sqrt(a))                            |
//! | exp(a)    | (a, exp(a))                                 |
//! | log(a)    | (a, 1/a)                                    |
//! | sin/cos   | (a, cos(a)) / (a, -sin(a))                  |
//! | tan(a)    | (a, 1/cos²(a))                              |
//! | sinh/cosh | mutual                                      |
//! | tanh(a)   | (a, 1 - tanh²(a))                           |
//! | abs(a)    | (a, a/abs(a))                               |
//! | pow(a, b) | (a, b·pow(a, b-1)), (b, pow(a, b)·log(a))   |
//! | norm(aᵢ…) | per i: (aᵢ, aᵢ / norm) — norm read from the |
//! |           | item's own slot during the upsweep          |
//!
//! Two cheap optimizations run during lowering. The expression helpers
//! fold operations whose operands are all literals into a single literal
//! (IEEE semantics; division by zero yields ±inf/NaN). And every slot
//! operation consults a common-subexpression map keyed on the operation
//! name and operand slots — commutative operands are canonicalized
//! low-to-high, `mul(a, a)` is rewritten to the square, and `sub(a, a)`
//! collapses to the literal zero.

use crate::ast::{Expr, ExprKind, ExprOp};
use crate::errors::{BuildError, Error};
use crate::lexer::Tokenizer;
use crate::parser::{parse_expression, ParseResult};
use crate::value::Number;
use std::collections::HashMap;

/// Symbolic expression over tape slots and literals. These trees describe
/// both the forward value of a tape item and the coefficient on each of
/// its partial derivatives; the downstream consumer evaluates them.
///
/// Operator symbols and function names are literal contract strings
/// (`"+"`, `"std::sqrt"`, `"apex::sq"`, …).
#[derive(Debug, Clone, PartialEq)]
pub enum AdExpr {
    /// A value from the tape with this index.
    Tape { index: u32 },

    /// A literal value.
    Literal(f64),

    Unary {
        op: &'static str,
        a: Box<AdExpr>,
    },

    Binary {
        op: &'static str,
        a: Box<AdExpr>,
        b: Box<AdExpr>,
    },

    /// Elementary function call with one or two arguments.
    Func {
        name: &'static str,
        args: Vec<AdExpr>,
    },
}

/// One chain-rule edge: during the reverse sweep the parent at `index`
/// receives the running product multiplied by `coef`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grad {
    pub index: u32,
    pub coef: AdExpr,
}

/// One tape entry. Independent-variable slots have no value expression
/// (the caller supplies their values) and no grads.
#[derive(Debug, Clone, PartialEq)]
pub struct TapeItem {
    pub val: Option<AdExpr>,
    pub grads: Vec<Grad>,
}

/// The frozen result of lowering a formula: a topologically sorted,
/// append-only list of items whose first `var_names.len()` slots are the
/// independent variables in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tape {
    pub var_names: Vec<String>,
    pub items: Vec<TapeItem>,
}

impl Tape {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn num_vars(&self) -> usize {
        self.var_names.len()
    }
}

/// Parse a formula and lower it onto a tape in one step.
pub fn make_autodiff(source: &str, var_names: &[&str]) -> Result<Tape, Error> {
    let parse = parse_expression(source)?;
    make_autodiff_from_parse(&parse, var_names).map_err(Error::from)
}

/// Lower an already parsed formula onto a tape.
pub fn make_autodiff_from_parse(
    parse: &ParseResult,
    var_names: &[&str],
) -> Result<Tape, BuildError> {
    let mut builder = AdBuilder::new(&parse.tokenizer, var_names);
    builder.recurse(&parse.root)?;
    Ok(Tape {
        var_names: var_names.iter().map(|s| s.to_string()).collect(),
        items: builder.tape,
    })
}

// ── Expression helpers ───────────────────────────────────────────────
//
// Constructors for AdExpr trees. The arithmetic ones fold all-literal
// operands into a single literal.

fn val(index: u32) -> AdExpr {
    AdExpr::Tape { index }
}

fn literal(x: f64) -> AdExpr {
    AdExpr::Literal(x)
}

fn add(a: AdExpr, b: AdExpr) -> AdExpr {
    match (&a, &b) {
        (AdExpr::Literal(x), AdExpr::Literal(y)) => AdExpr::Literal(x + y),
        _ => AdExpr::Binary {
            op: "+",
            a: Box::new(a),
            b: Box::new(b),
        },
    }
}

fn sub(a: AdExpr, b: AdExpr) -> AdExpr {
    match (&a, &b) {
        (AdExpr::Literal(x), AdExpr::Literal(y)) => AdExpr::Literal(x - y),
        _ => AdExpr::Binary {
            op: "-",
            a: Box::new(a),
            b: Box::new(b),
        },
    }
}

fn mul(a: AdExpr, b: AdExpr) -> AdExpr {
    match (&a, &b) {
        (AdExpr::Literal(x), AdExpr::Literal(y)) => AdExpr::Literal(x * y),
        _ => AdExpr::Binary {
            op: "*",
            a: Box::new(a),
            b: Box::new(b),
        },
    }
}

fn div(a: AdExpr, b: AdExpr) -> AdExpr {
    match (&a, &b) {
        // Division by zero folds to ±inf/NaN per IEEE 754.
        (AdExpr::Literal(x), AdExpr::Literal(y)) => AdExpr::Literal(x / y),
        _ => AdExpr::Binary {
            op: "/",
            a: Box::new(a),
            b: Box::new(b),
        },
    }
}

fn rcp(a: AdExpr) -> AdExpr {
    div(literal(1.0), a)
}

fn sq(a: AdExpr) -> AdExpr {
    match &a {
        AdExpr::Literal(x) => AdExpr::Literal(x * x),
        _ => AdExpr::Func {
            name: "apex::sq",
            args: vec![a],
        },
    }
}

fn func1(name: &'static str, a: AdExpr) -> AdExpr {
    AdExpr::Func {
        name,
        args: vec![a],
    }
}

fn func2(name: &'static str, a: AdExpr, b: AdExpr) -> AdExpr {
    AdExpr::Func {
        name,
        args: vec![a, b],
    }
}

// ── Builder ──────────────────────────────────────────────────────────

struct AdBuilder<'a> {
    tokenizer: &'a Tokenizer,
    var_names: Vec<String>,
    tape: Vec<TapeItem>,

    /// Operation name + operand slots → the slot already holding that
    /// result.
    cse: HashMap<(&'static str, Vec<u32>), u32>,

    /// f64 bit pattern → the slot holding that literal.
    literal_slots: HashMap<u64, u32>,
}

impl<'a> AdBuilder<'a> {
    fn new(tokenizer: &'a Tokenizer, var_names: &[&str]) -> Self {
        // Provision one empty item per independent variable up front.
        let tape = var_names
            .iter()
            .map(|_| TapeItem {
                val: None,
                grads: Vec::new(),
            })
            .collect();
        Self {
            tokenizer,
            var_names: var_names.iter().map(|s| s.to_string()).collect(),
            tape,
            cse: HashMap::new(),
            literal_slots: HashMap::new(),
        }
    }

    fn push_item(&mut self, item: TapeItem) -> u32 {
        let index = self.tape.len() as u32;
        self.tape.push(item);
        index
    }

    /// CSE-checked push: returns the memoized slot on a key hit.
    fn memoized(
        &mut self,
        name: &'static str,
        operands: Vec<u32>,
        build: impl FnOnce() -> TapeItem,
    ) -> u32 {
        let key = (name, operands);
        if let Some(&slot) = self.cse.get(&key) {
            return slot;
        }
        let slot = self.push_item(build());
        self.cse.insert(key, slot);
        slot
    }

    // ── Slot operations ──────────────────────────────────────────────

    fn literal_slot(&mut self, x: f64) -> u32 {
        if let Some(&slot) = self.literal_slots.get(&x.to_bits()) {
            return slot;
        }
        let slot = self.push_item(TapeItem {
            val: Some(literal(x)),
            grads: Vec::new(),
        });
        self.literal_slots.insert(x.to_bits(), slot);
        slot
    }

    fn add_slot(&mut self, a: u32, b: u32) -> u32 {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.memoized("+", vec![a, b], || TapeItem {
            val: Some(add(val(a), val(b))),
            grads: vec![
                Grad { index: a, coef: literal(1.0) },
                Grad { index: b, coef: literal(1.0) },
            ],
        })
    }

    fn sub_slot(&mut self, a: u32, b: u32) -> u32 {
        if a == b {
            return self.literal_slot(0.0);
        }
        self.memoized("-", vec![a, b], || TapeItem {
            val: Some(sub(val(a), val(b))),
            grads: vec![
                Grad { index: a, coef: literal(1.0) },
                Grad { index: b, coef: literal(-1.0) },
            ],
        })
    }

    fn mul_slot(&mut self, a: u32, b: u32) -> u32 {
        if a == b {
            // Share the memoized square instead.
            return self.sq_slot(a);
        }
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        // grad (a * b) = b grad a + a grad b.
        self.memoized("*", vec![a, b], || TapeItem {
            val: Some(mul(val(a), val(b))),
            grads: vec![
                Grad { index: b, coef: val(a) },
                Grad { index: a, coef: val(b) },
            ],
        })
    }

    fn div_slot(&mut self, a: u32, b: u32) -> u32 {
        // grad (a / b) = 1 / b * grad a - a / b² * grad b.
        self.memoized("/", vec![a, b], || TapeItem {
            val: Some(div(val(a), val(b))),
            grads: vec![
                Grad { index: a, coef: rcp(val(b)) },
                Grad {
                    index: b,
                    coef: mul(literal(-1.0), div(val(a), sq(val(b)))),
                },
            ],
        })
    }

    fn negate_slot(&mut self, a: u32) -> u32 {
        self.memoized("neg", vec![a], || TapeItem {
            val: Some(mul(literal(-1.0), val(a))),
            grads: vec![Grad { index: a, coef: literal(-1.0) }],
        })
    }

    // ── Elementary functions ─────────────────────────────────────────

    /// Shared shape of the one-argument calls: `val = name(a)` with a
    /// single partial.
    fn unary_call(&mut self, name: &'static str, a: u32, coef: AdExpr) -> u32 {
        self.memoized(name, vec![a], || TapeItem {
            val: Some(func1(name, val(a))),
            grads: vec![Grad { index: a, coef }],
        })
    }

    fn sq_slot(&mut self, a: u32) -> u32 {
        // grad (a²) = 2a grad a.
        let coef = mul(literal(2.0), val(a));
        self.memoized("apex::sq", vec![a], || TapeItem {
            val: Some(sq(val(a))),
            grads: vec![Grad { index: a, coef }],
        })
    }

    fn sqrt_slot(&mut self, a: u32) -> u32 {
        // 0.5 / sqrt(a) * grad a.
        let coef = div(literal(0.5), func1("std::sqrt", val(a)));
        self.unary_call("std::sqrt", a, coef)
    }

    fn exp_slot(&mut self, a: u32) -> u32 {
        let coef = func1("std::exp", val(a));
        self.unary_call("std::exp", a, coef)
    }

    fn log_slot(&mut self, a: u32) -> u32 {
        // grad (log a) = grad a / a.
        let coef = rcp(val(a));
        self.unary_call("std::log", a, coef)
    }

    fn sin_slot(&mut self, a: u32) -> u32 {
        let coef = func1("std::cos", val(a));
        self.unary_call("std::sin", a, coef)
    }

    fn cos_slot(&mut self, a: u32) -> u32 {
        let coef = mul(literal(-1.0), func1("std::sin", val(a)));
        self.unary_call("std::cos", a, coef)
    }

    fn tan_slot(&mut self, a: u32) -> u32 {
        let coef = sq(rcp(func1("std::cos", val(a))));
        self.unary_call("std::tan", a, coef)
    }

    fn sinh_slot(&mut self, a: u32) -> u32 {
        let coef = func1("std::cosh", val(a));
        self.unary_call("std::sinh", a, coef)
    }

    fn cosh_slot(&mut self, a: u32) -> u32 {
        let coef = func1("std::sinh", val(a));
        self.unary_call("std::cosh", a, coef)
    }

    fn tanh_slot(&mut self, a: u32) -> u32 {
        let coef = sub(literal(1.0), sq(func1("std::tanh", val(a))));
        self.unary_call("std::tanh", a, coef)
    }

    fn abs_slot(&mut self, a: u32) -> u32 {
        // a / |a|: the sign, undefined at zero.
        let coef = div(val(a), func1("std::abs", val(a)));
        self.unary_call("std::abs", a, coef)
    }

    fn pow_slot(&mut self, a: u32, b: u32) -> u32 {
        self.memoized("std::pow", vec![a, b], || TapeItem {
            val: Some(func2("std::pow", val(a), val(b))),
            grads: vec![
                // d/dx (a**b) = b a**(b - 1) da/dx
                Grad {
                    index: a,
                    coef: mul(
                        val(b),
                        func2("std::pow", val(a), sub(val(b), literal(1.0))),
                    ),
                },
                // d/dx (a**b) = a**b log a db/dx
                Grad {
                    index: b,
                    coef: mul(
                        func2("std::pow", val(a), val(b)),
                        func1("std::log", val(a)),
                    ),
                },
            ],
        })
    }

    fn norm_slot(&mut self, slots: &[u32]) -> u32 {
        // Square and accumulate each argument, then take the root.
        let mut x = sq(val(slots[0]));
        for &s in &slots[1..] {
            x = add(x, sq(val(s)));
        }

        // The partial for each argument is aᵢ / norm. The norm is computed
        // into this very item during the upsweep, so the coefficients read
        // it back from the slot about to be pushed. This is the only
        // permitted self-reference, and only inside grads.
        let index = self.tape.len() as u32;
        let grads: Vec<Grad> = slots
            .iter()
            .map(|&s| Grad {
                index: s,
                coef: div(val(s), val(index)),
            })
            .collect();

        self.memoized("norm", slots.to_vec(), || TapeItem {
            val: Some(func1("std::sqrt", x)),
            grads,
        })
    }

    // ── AST traversal ────────────────────────────────────────────────

    /// Flatten an identifier-like node to the variable-name spelling it
    /// looks up as: `x`, `v.y`, `arr[0]`.
    fn flatten(&self, node: &Expr) -> Result<String, BuildError> {
        match &node.kind {
            ExprKind::Ident(name) => Ok(name.clone()),

            ExprKind::Member { lhs, member, .. } => {
                Ok(format!("{}.{}", self.flatten(lhs)?, member))
            }

            ExprKind::Subscript { lhs, args } => {
                if args.len() != 1 {
                    return Err(self.error(node, "subscript must have 1 index"));
                }
                Ok(format!(
                    "{}[{}]",
                    self.flatten(lhs)?,
                    self.flatten(&args[0])?
                ))
            }

            ExprKind::Number(Number::Int(i)) => Ok(i.to_string()),

            _ => Err(self.error(node, "unsupported identifier kind")),
        }
    }

    /// Independent variables occupy the leading tape slots; they are never
    /// appended.
    fn find_var(&self, node: &Expr, name: &str) -> Result<u32, BuildError> {
        match self.var_names.iter().position(|v| v == name) {
            Some(i) => Ok(i as u32),
            None => Err(self.error(node, format!("unknown variable '{}'", name))),
        }
    }

    fn recurse(&mut self, node: &Expr) -> Result<u32, BuildError> {
        match &node.kind {
            ExprKind::Number(Number::Int(i)) => Ok(self.literal_slot(*i as f64)),
            ExprKind::Number(Number::Float(x)) => Ok(self.literal_slot(*x)),
            ExprKind::Number(Number::Bool(_))
            | ExprKind::Bool(_)
            | ExprKind::Char(_)
            | ExprKind::Str(_) => Err(self.error(node, "unsupported literal kind")),

            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Subscript { .. } => {
                let name = self.flatten(node)?;
                self.find_var(node, &name)
            }

            ExprKind::Unary { op, a } => match op {
                ExprOp::Neg => {
                    let a = self.recurse(a)?;
                    Ok(self.negate_slot(a))
                }
                _ => Err(self.error(node, format!("unsupported unary operator '{}'", op))),
            },

            ExprKind::Binary { op, a, b } => {
                let slot_op: fn(&mut Self, u32, u32) -> u32 = match op {
                    ExprOp::Add => Self::add_slot,
                    ExprOp::Sub => Self::sub_slot,
                    ExprOp::Mul => Self::mul_slot,
                    ExprOp::Div => Self::div_slot,
                    _ => {
                        return Err(self.error(
                            node,
                            format!("unsupported binary operator '{}'", op),
                        ))
                    }
                };
                let a = self.recurse(a)?;
                let b = self.recurse(b)?;
                Ok(slot_op(self, a, b))
            }

            ExprKind::Call { callee, args } => self.call(node, callee, args),

            ExprKind::Assign { .. } => {
                Err(self.error(node, "assignment is not supported in a formula"))
            }
            ExprKind::Ternary { .. } => {
                Err(self.error(node, "conditional operator is not supported in a formula"))
            }
            ExprKind::Braced(_) => {
                Err(self.error(node, "braced initializer is not supported in a formula"))
            }
        }
    }

    fn call(&mut self, node: &Expr, callee: &Expr, args: &[Expr]) -> Result<u32, BuildError> {
        let name = self.flatten(callee)?;
        let slots: Vec<u32> = args
            .iter()
            .map(|arg| self.recurse(arg))
            .collect::<Result<_, _>>()?;

        let unary = |b: &mut Self, f: fn(&mut Self, u32) -> u32| -> Result<u32, BuildError> {
            if slots.len() != 1 {
                return Err(b.error(node, format!("{}() requires 1 argument", name)));
            }
            Ok(f(b, slots[0]))
        };

        match name.as_str() {
            "sq" => unary(self, Self::sq_slot),
            "sqrt" => unary(self, Self::sqrt_slot),
            "exp" => unary(self, Self::exp_slot),
            "log" | "ln" => unary(self, Self::log_slot),
            "sin" => unary(self, Self::sin_slot),
            "cos" => unary(self, Self::cos_slot),
            "tan" => unary(self, Self::tan_slot),
            "sinh" => unary(self, Self::sinh_slot),
            "cosh" => unary(self, Self::cosh_slot),
            "tanh" => unary(self, Self::tanh_slot),
            "abs" => unary(self, Self::abs_slot),

            "pow" => {
                if slots.len() != 2 {
                    return Err(self.error(node, "pow() requires 2 arguments"));
                }
                Ok(self.pow_slot(slots[0], slots[1]))
            }

            "norm" => {
                if slots.is_empty() {
                    return Err(self.error(node, "norm() requires 1 or more arguments"));
                }
                Ok(self.norm_slot(&slots))
            }

            _ => Err(self.error(node, format!("unknown function '{}'", name))),
        }
    }

    fn error(&self, node: &Expr, msg: impl Into<String>) -> BuildError {
        BuildError::new(msg, node.loc, self.tokenizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A miniature tape interpreter: upsweep over the values, then a
    // reverse sweep accumulating adjoints back to the variable slots.
    fn eval_expr(e: &AdExpr, values: &[f64]) -> f64 {
        match e {
            AdExpr::Tape { index } => values[*index as usize],
            AdExpr::Literal(x) => *x,
            AdExpr::Unary { op, a } => match *op {
                "-" => -eval_expr(a, values),
                other => panic!("unknown unary op {:?}", other),
            },
            AdExpr::Binary { op, a, b } => {
                let (x, y) = (eval_expr(a, values), eval_expr(b, values));
                match *op {
                    "+" => x + y,
                    "-" => x - y,
                    "*" => x * y,
                    "/" => x / y,
                    other => panic!("unknown binary op {:?}", other),
                }
            }
            AdExpr::Func { name, args } => {
                let x = eval_expr(&args[0], values);
                match *name {
                    "apex::sq" => x * x,
                    "std::sqrt" => x.sqrt(),
                    "std::exp" => x.exp(),
                    "std::log" => x.ln(),
                    "std::sin" => x.sin(),
                    "std::cos" => x.cos(),
                    "std::tan" => x.tan(),
                    "std::sinh" => x.sinh(),
                    "std::cosh" => x.cosh(),
                    "std::tanh" => x.tanh(),
                    "std::abs" => x.abs(),
                    "std::pow" => x.powf(eval_expr(&args[1], values)),
                    other => panic!("unknown function {:?}", other),
                }
            }
        }
    }

    fn eval_tape(tape: &Tape, inputs: &[f64]) -> (f64, Vec<f64>) {
        let n = tape.items.len();
        let vars = tape.num_vars();
        assert_eq!(inputs.len(), vars);

        let mut values = vec![0.0; n];
        values[..vars].copy_from_slice(inputs);
        for i in vars..n {
            let item_val = tape.items[i].val.as_ref().expect("non-seed item");
            values[i] = eval_expr(item_val, &values);
        }

        let mut adjoint = vec![0.0; n];
        adjoint[n - 1] = 1.0;
        for i in (vars..n).rev() {
            for grad in &tape.items[i].grads {
                adjoint[grad.index as usize] +=
                    adjoint[i] * eval_expr(&grad.coef, &values);
            }
        }

        (values[n - 1], adjoint[..vars].to_vec())
    }

    fn build(formula: &str, vars: &[&str]) -> Tape {
        make_autodiff(formula, vars).expect("build error")
    }

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "expected {} ≈ {}", a, b);
    }

    /// Compare the symbolic gradient of a one-variable formula against a
    /// central difference at each probe point.
    fn check_gradient(formula: &str, points: &[f64]) {
        let tape = build(formula, &["x"]);
        let h = 1e-6;
        for &x in points {
            let (_, grads) = eval_tape(&tape, &[x]);
            let (fp, _) = eval_tape(&tape, &[x + h]);
            let (fm, _) = eval_tape(&tape, &[x - h]);
            let numeric = (fp - fm) / (2.0 * h);
            assert_close(grads[0], numeric, 1e-4);
        }
    }

    #[test]
    fn test_seed_items_empty() {
        let tape = build("x + y", &["x", "y"]);
        assert!(tape.len() > 2);
        for item in &tape.items[..2] {
            assert!(item.val.is_none());
            assert!(item.grads.is_empty());
        }
    }

    #[test]
    fn test_variables_resolve_positionally() {
        let tape = build("z + x", &["x", "y", "z"]);
        let last = tape.items.last().unwrap();
        // z is slot 2, x is slot 0; addition canonicalizes low-to-high.
        assert_eq!(
            last.val,
            Some(AdExpr::Binary {
                op: "+",
                a: Box::new(AdExpr::Tape { index: 0 }),
                b: Box::new(AdExpr::Tape { index: 2 }),
            })
        );
    }

    #[test]
    fn test_unknown_variable() {
        let err = make_autodiff("x + q", &["x"]).unwrap_err();
        let Error::Build(e) = err else {
            panic!("expected BuildError");
        };
        assert!(e.message.contains("unknown variable 'q'"));
    }

    #[test]
    fn test_member_and_subscript_variables() {
        let tape = build("v.y * arr[0]", &["v.y", "arr[0]"]);
        let (value, grads) = eval_tape(&tape, &[3.0, 4.0]);
        assert_close(value, 12.0, 1e-12);
        assert_close(grads[0], 4.0, 1e-12);
        assert_close(grads[1], 3.0, 1e-12);
    }

    #[test]
    fn test_end_to_end_mixed_formula() {
        // f = x + 3 z x / sin(y + z) at (1, 1, 1).
        let tape = build("x + 3 * z * x / sin(y + z)", &["x", "y", "z"]);
        assert!(tape.len() > 3);
        let (value, grads) = eval_tape(&tape, &[1.0, 1.0, 1.0]);

        let s = 2.0_f64.sin();
        let c = 2.0_f64.cos();
        assert_close(value, 1.0 + 3.0 / s, 1e-12);
        assert_close(grads[0], 1.0 + 3.0 / s, 1e-12);
        assert_close(grads[1], -3.0 * c / (s * s), 1e-12);
        assert_close(grads[2], 3.0 / s - 3.0 * c / (s * s), 1e-12);
    }

    #[test]
    fn test_sq_times_sin() {
        let tape = build("sq(x) * sin(x)", &["x"]);
        let x = 0.3_f64;
        let (value, grads) = eval_tape(&tape, &[x]);
        assert_close(value, x * x * x.sin(), 1e-12);
        assert_close(grads[0], 2.0 * x * x.sin() + x * x * x.cos(), 1e-12);
    }

    #[test]
    fn test_norm() {
        let tape = build("norm(x, y, z)", &["x", "y", "z"]);
        let (value, grads) = eval_tape(&tape, &[3.0, 4.0, 12.0]);
        assert_close(value, 13.0, 1e-12);
        assert_close(grads[0], 3.0 / 13.0, 1e-12);
        assert_close(grads[1], 4.0 / 13.0, 1e-12);
        assert_close(grads[2], 12.0 / 13.0, 1e-12);
    }

    #[test]
    fn test_norm_self_reference_only_in_grads() {
        let tape = build("norm(x, y)", &["x", "y"]);
        let k = (tape.len() - 1) as u32;
        let item = tape.items.last().unwrap();
        // The value may not reference the item's own slot.
        assert!(!mentions_slot(item.val.as_ref().unwrap(), k));
        // The coefficients do: that is how the root is shared.
        assert!(item.grads.iter().any(|g| mentions_slot(&g.coef, k)));
    }

    fn mentions_slot(e: &AdExpr, slot: u32) -> bool {
        match e {
            AdExpr::Tape { index } => *index == slot,
            AdExpr::Literal(_) => false,
            AdExpr::Unary { a, .. } => mentions_slot(a, slot),
            AdExpr::Binary { a, b, .. } => mentions_slot(a, slot) || mentions_slot(b, slot),
            AdExpr::Func { args, .. } => args.iter().any(|a| mentions_slot(a, slot)),
        }
    }

    #[test]
    fn test_tape_topology() {
        let tape = build("sq(x) * sin(x + y) / (x - 2)", &["x", "y"]);
        let vars = tape.num_vars() as u32;
        for (i, item) in tape.items.iter().enumerate().skip(vars as usize) {
            let k = i as u32;
            if let Some(val) = &item.val {
                assert!(max_slot(val).map_or(true, |m| m < k));
            }
            for grad in &item.grads {
                assert!(grad.index < k);
                // Only norm may self-reference, and this formula has none.
                assert!(max_slot(&grad.coef).map_or(true, |m| m < k));
            }
        }
    }

    fn max_slot(e: &AdExpr) -> Option<u32> {
        match e {
            AdExpr::Tape { index } => Some(*index),
            AdExpr::Literal(_) => None,
            AdExpr::Unary { a, .. } => max_slot(a),
            AdExpr::Binary { a, b, .. } => max_slot(a).max(max_slot(b)),
            AdExpr::Func { args, .. } => args.iter().filter_map(max_slot).max(),
        }
    }

    // ── Per-rule gradient checks against central differences ─────────

    #[test]
    fn test_rule_add_sub() {
        check_gradient("x + 2 - x / 3 + x", &[-2.0, 0.5, 7.0]);
    }

    #[test]
    fn test_rule_mul() {
        check_gradient("(x + 1) * (x - 2)", &[-1.5, 0.0, 2.5]);
    }

    #[test]
    fn test_rule_div() {
        check_gradient("(x + 3) / (x * x + 1)", &[-0.5, 0.25, 2.0]);
    }

    #[test]
    fn test_rule_negate() {
        check_gradient("-x * 4 + -(x * x)", &[-1.0, 0.3, 2.0]);
    }

    #[test]
    fn test_rule_sq() {
        check_gradient("sq(x + 1)", &[-0.5, 0.7, 3.0]);
    }

    #[test]
    fn test_rule_sqrt() {
        check_gradient("sqrt(x)", &[0.25, 1.0, 9.0]);
    }

    #[test]
    fn test_rule_exp() {
        check_gradient("exp(x)", &[-1.0, 0.0, 1.5]);
    }

    #[test]
    fn test_rule_log() {
        check_gradient("log(x)", &[0.2, 1.0, 5.0]);
        check_gradient("ln(x)", &[0.5, 2.0]);
    }

    #[test]
    fn test_rule_trig() {
        check_gradient("sin(x)", &[-1.0, 0.0, 1.2]);
        check_gradient("cos(x)", &[-0.4, 0.9]);
        check_gradient("tan(x)", &[-0.5, 0.3, 1.0]);
    }

    #[test]
    fn test_rule_hyperbolic() {
        check_gradient("sinh(x)", &[-1.0, 0.5]);
        check_gradient("cosh(x)", &[-0.7, 1.1]);
        check_gradient("tanh(x)", &[-2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_rule_abs() {
        check_gradient("abs(x)", &[-2.0, 1.5]);
    }

    #[test]
    fn test_rule_pow() {
        check_gradient("pow(x, 3)", &[0.5, 1.0, 2.0]);
        // Gradient in the exponent as well.
        let tape = build("pow(2, y)", &["y"]);
        let (value, grads) = eval_tape(&tape, &[1.5]);
        assert_close(value, 2.0_f64.powf(1.5), 1e-12);
        assert_close(grads[0], 2.0_f64.powf(1.5) * 2.0_f64.ln(), 1e-10);
    }

    #[test]
    fn test_rule_norm_gradient() {
        let tape = build("norm(x, y)", &["x", "y"]);
        let h = 1e-6;
        let (x, y) = (1.3, -2.1);
        let (_, grads) = eval_tape(&tape, &[x, y]);
        let (fp, _) = eval_tape(&tape, &[x + h, y]);
        let (fm, _) = eval_tape(&tape, &[x - h, y]);
        assert_close(grads[0], (fp - fm) / (2.0 * h), 1e-4);
    }

    // ── Folding, dedup, CSE ──────────────────────────────────────────

    #[test]
    fn test_helper_constant_folding() {
        assert_eq!(add(literal(2.0), literal(3.0)), literal(5.0));
        assert_eq!(sub(literal(2.0), literal(3.0)), literal(-1.0));
        assert_eq!(mul(literal(2.0), literal(3.0)), literal(6.0));
        assert_eq!(div(literal(3.0), literal(2.0)), literal(1.5));
        assert_eq!(sq(literal(3.0)), literal(9.0));
        assert_eq!(rcp(literal(4.0)), literal(0.25));
        // Division by zero folds to infinity, IEEE style.
        assert_eq!(div(literal(1.0), literal(0.0)), literal(f64::INFINITY));
        // Mixed operands do not fold.
        assert!(matches!(add(literal(1.0), val(0)), AdExpr::Binary { .. }));
    }

    #[test]
    fn test_literal_dedup() {
        let tape = build("2 + x * 2", &["x"]);
        let twos = tape
            .items
            .iter()
            .filter(|item| item.val == Some(AdExpr::Literal(2.0)))
            .count();
        assert_eq!(twos, 1);
    }

    #[test]
    fn test_cse_shares_calls() {
        // sin(x) appears twice but is lowered once.
        let tape = build("sin(x) * sin(x) + sin(x)", &["x"]);
        let sins = tape
            .items
            .iter()
            .filter(|item| {
                matches!(&item.val, Some(AdExpr::Func { name, .. }) if *name == "std::sin")
            })
            .count();
        assert_eq!(sins, 1);
    }

    #[test]
    fn test_cse_shares_norm() {
        let tape = build("norm(x, y) + norm(x, y)", &["x", "y"]);
        let norms = tape
            .items
            .iter()
            .filter(|item| {
                matches!(&item.val, Some(AdExpr::Func { name, .. }) if *name == "std::sqrt")
            })
            .count();
        assert_eq!(norms, 1);
        // The shared slot still evaluates correctly: f = 2·norm.
        let (value, grads) = eval_tape(&tape, &[3.0, 4.0]);
        assert_close(value, 10.0, 1e-12);
        assert_close(grads[0], 2.0 * 3.0 / 5.0, 1e-12);
    }

    #[test]
    fn test_cse_commutative_canonicalization() {
        let tape = build("x * y + y * x", &["x", "y"]);
        let muls = tape
            .items
            .iter()
            .filter(|item| {
                matches!(&item.val, Some(AdExpr::Binary { op, .. }) if *op == "*")
            })
            .count();
        assert_eq!(muls, 1);
    }

    #[test]
    fn test_mul_self_rewrites_to_sq() {
        let tape = build("x * x", &["x"]);
        let last = tape.items.last().unwrap();
        assert_eq!(
            last.val,
            Some(AdExpr::Func {
                name: "apex::sq",
                args: vec![AdExpr::Tape { index: 0 }],
            })
        );
        // And it shares with an explicit sq(x).
        let tape2 = build("x * x + sq(x)", &["x"]);
        let squares = tape2
            .items
            .iter()
            .filter(|item| {
                matches!(&item.val, Some(AdExpr::Func { name, .. }) if *name == "apex::sq")
            })
            .count();
        assert_eq!(squares, 1);
    }

    #[test]
    fn test_sub_self_rewrites_to_zero() {
        let tape = build("x - x", &["x"]);
        let last = tape.items.last().unwrap();
        assert_eq!(last.val, Some(AdExpr::Literal(0.0)));
        assert!(last.grads.is_empty());
    }

    #[test]
    fn test_cse_soundness_no_duplicate_values() {
        let tape = build(
            "sq(x) * sin(x + y) + sq(x) / sin(x + y) - cos(x * y) * cos(x * y)",
            &["x", "y"],
        );
        let vars = tape.num_vars();
        for i in vars..tape.len() {
            for j in (i + 1)..tape.len() {
                assert_ne!(
                    tape.items[i].val, tape.items[j].val,
                    "slots {} and {} hold the same value",
                    i, j
                );
            }
        }
    }

    #[test]
    fn test_determinism() {
        let formula = "sq(x) * sin(x + y) / norm(x, y, 2)";
        let a = build(formula, &["x", "y"]);
        let b = build(formula, &["x", "y"]);
        assert_eq!(a, b);
    }

    // ── Rejections ───────────────────────────────────────────────────

    fn build_err(formula: &str, vars: &[&str]) -> BuildError {
        match make_autodiff(formula, vars) {
            Err(Error::Build(e)) => e,
            other => panic!("expected BuildError, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_function() {
        let e = build_err("frobnicate(x)", &["x"]);
        assert!(e.message.contains("unknown function 'frobnicate'"));
    }

    #[test]
    fn test_arity_errors() {
        assert!(build_err("pow(x)", &["x"]).message.contains("pow() requires 2 arguments"));
        assert!(build_err("sin(x, x)", &["x"]).message.contains("requires 1 argument"));
        assert!(build_err("norm()", &["x"])
            .message
            .contains("norm() requires 1 or more arguments"));
    }

    #[test]
    fn test_unsupported_unary_ops() {
        assert!(build_err("~x", &["x"]).message.contains("unsupported unary operator"));
        assert!(build_err("!x", &["x"]).message.contains("unsupported unary operator"));
        assert!(build_err("+x", &["x"]).message.contains("unsupported unary operator"));
        assert!(build_err("&x", &["x"]).message.contains("unsupported unary operator"));
        assert!(build_err("++x", &["x"]).message.contains("unsupported unary operator"));
    }

    #[test]
    fn test_unsupported_binary_ops() {
        assert!(build_err("x % 2", &["x"]).message.contains("unsupported binary operator"));
        assert!(build_err("x << 1", &["x"]).message.contains("unsupported binary operator"));
        assert!(build_err("x < 1", &["x"]).message.contains("unsupported binary operator"));
    }

    #[test]
    fn test_unsupported_constructs() {
        assert!(build_err("x = 1", &["x"]).message.contains("assignment"));
        assert!(build_err("x ? 1 : 2", &["x"]).message.contains("conditional"));
        assert!(build_err("x, 1", &["x"]).message.contains("unsupported binary operator"));
    }

    #[test]
    fn test_unsupported_literals() {
        assert!(build_err("x + true", &["x"]).message.contains("unsupported literal kind"));
        assert!(build_err("x + 'c'", &["x"]).message.contains("unsupported literal kind"));
        assert!(build_err(r#"x + "s""#, &["x"]).message.contains("unsupported literal kind"));
    }

    #[test]
    fn test_subscript_arity() {
        let e = build_err("arr[0, 1] + x", &["x"]);
        assert!(e.message.contains("subscript must have 1 index"));
    }
}
