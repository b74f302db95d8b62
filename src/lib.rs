//! gradtape — symbolic reverse-mode automatic differentiation for
//! closed-form scalar formulas.
//!
//! Given a textual formula and an ordered list of independent variable
//! names, the crate builds a *tape*: a topologically sorted DAG of
//! intermediate values and their local partial derivatives, sufficient to
//! evaluate the function and its gradient with respect to every variable.
//! How the tape is consumed — interpreter, JIT, code generator — is the
//! caller's choice.
//!
//! # Pipeline
//!
//! ```text
//! Formula text
//!     │
//!     ▼
//! ┌───────────┐
//! │ Tokenizer  │  Bytes → tokens + string/int/float side tables
//! └─────┬─────┘
//!       │
//!       ▼
//! ┌───────────┐
//! │  Parser    │  Recursive descent over the C-family expression grammar
//! └─────┬─────┘
//!       │
//!       ▼
//! ┌───────────┐
//! │ Tape build │  Differentiation rules + constant folding + CSE
//! └─────┬─────┘
//!       │
//!       ▼
//! Tape (values + per-edge partial derivatives)
//! ```
//!
//! # Example
//!
//! ```
//! use gradtape::make_autodiff;
//!
//! let tape = make_autodiff("sq(x) * sin(x)", &["x"]).unwrap();
//! assert_eq!(tape.num_vars(), 1);
//! assert!(tape.len() > 1);
//! ```

pub mod ast;
pub mod autograd;
pub mod errors;
pub mod lexer;
pub mod number;
pub mod operators;
pub mod parser;
pub mod printer;
pub mod token;
pub mod value;

pub use ast::{Expr, ExprKind, ExprOp, MemberKind};
pub use autograd::{make_autodiff, make_autodiff_from_parse, AdExpr, Grad, Tape, TapeItem};
pub use errors::{BuildError, Error, LexError, ParseError};
pub use lexer::Tokenizer;
pub use parser::{parse_expression, ParseResult};
pub use token::{SourceLoc, Span, Token, TokenKind};
pub use value::Number;
