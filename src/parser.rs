//! Parser — recursive descent over the token stream, producing one
//! expression AST.
//!
//! The grammar is the C-family expression subset: fourteen precedence
//! levels, prefix/postfix unary operators, ternary, assignment, comma.
//! Structure:
//!
//! - **Binary operators** are parsed with a fold stack rather than one
//!   function per precedence level: each frame holds a node and the
//!   operator that follows it, and frames fold together whenever the
//!   pending operator's precedence is >= the incoming one. The `>=` gives
//!   left associativity; right associativity exists only for assignment
//!   and the ternary, which have their own productions.
//!
//! - **Grouping** is handled by pre-scanning: three balanced skippers walk
//!   the token stream to find a matching closer (diagnosing mismatched
//!   brackets on the way), and the contents are parsed as a sliced
//!   subrange via a `limit` on the cursor.
//!
//! - **Error policy**: every production takes an `expect` flag. With
//!   `expect = false` a non-match returns `Ok(None)` and the caller tries
//!   something else; with `expect = true` it is a hard `ParseError`. This
//!   gives required-position error reporting without backtracking.

use crate::ast::{Expr, ExprKind, ExprOp, MemberKind};
use crate::errors::{Error, ParseError};
use crate::lexer::Tokenizer;
use crate::token::{SourceLoc, Token, TokenKind};
use crate::value::Number;

/// Result of tokenizing and parsing one formula.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub tokenizer: Tokenizer,
    pub root: Expr,
}

/// Tokenize and parse a complete formula.
pub fn parse_expression(source: &str) -> Result<ParseResult, Error> {
    let tokenizer = Tokenizer::tokenize(source)?;
    let mut parser = Parser::new(&tokenizer);
    let root = parser.parse_root()?;
    Ok(ParseResult { tokenizer, root })
}

// Precedence of the binary operators handled by the fold loop, within the
// full lattice: comma < assignment < logical-or < logical-and < bitwise-or
// < bitwise-xor < bitwise-and < equality < relational < shift < additive <
// multiplicative < pointer-to-member.
mod prec {
    pub const ANY: u8 = 0;
    pub const BIT_OR: u8 = 5;
    pub const BIT_XOR: u8 = 6;
    pub const BIT_AND: u8 = 7;
    pub const EQ: u8 = 8;
    pub const CMP: u8 = 9;
    pub const SHIFT: u8 = 10;
    pub const ADD: u8 = 11;
    pub const MUL: u8 = 12;
    pub const PTR_TO_MEM: u8 = 13;
}

fn switch_unary(kind: TokenKind) -> Option<ExprOp> {
    let op = match kind {
        TokenKind::PlusPlus => ExprOp::IncPre,
        TokenKind::MinusMinus => ExprOp::DecPre,
        TokenKind::Tilde => ExprOp::Complement,
        TokenKind::Bang => ExprOp::Not,
        TokenKind::Plus => ExprOp::Plus,
        TokenKind::Minus => ExprOp::Neg,
        TokenKind::Amp => ExprOp::AddressOf,
        TokenKind::Star => ExprOp::Deref,
        _ => return None,
    };
    Some(op)
}

fn switch_binary(kind: TokenKind) -> Option<(ExprOp, u8)> {
    let desc = match kind {
        TokenKind::ArrowStar => (ExprOp::PtrMemArrow, prec::PTR_TO_MEM),
        TokenKind::DotStar => (ExprOp::PtrMemDot, prec::PTR_TO_MEM),

        TokenKind::Star => (ExprOp::Mul, prec::MUL),
        TokenKind::Slash => (ExprOp::Div, prec::MUL),
        TokenKind::Percent => (ExprOp::Mod, prec::MUL),

        TokenKind::Plus => (ExprOp::Add, prec::ADD),
        TokenKind::Minus => (ExprOp::Sub, prec::ADD),

        TokenKind::LtLt => (ExprOp::Shl, prec::SHIFT),
        TokenKind::GtGt => (ExprOp::Shr, prec::SHIFT),

        TokenKind::Lt => (ExprOp::Lt, prec::CMP),
        TokenKind::Gt => (ExprOp::Gt, prec::CMP),
        TokenKind::LtEq => (ExprOp::Le, prec::CMP),
        TokenKind::GtEq => (ExprOp::Ge, prec::CMP),

        TokenKind::EqEq => (ExprOp::Eq, prec::EQ),
        TokenKind::BangEq => (ExprOp::Ne, prec::EQ),

        TokenKind::Amp => (ExprOp::BitAnd, prec::BIT_AND),
        TokenKind::Caret => (ExprOp::BitXor, prec::BIT_XOR),
        TokenKind::Pipe => (ExprOp::BitOr, prec::BIT_OR),

        _ => return None,
    };
    Some(desc)
}

fn switch_assign(kind: TokenKind) -> Option<ExprOp> {
    let op = match kind {
        TokenKind::Eq => ExprOp::Assign,
        TokenKind::StarEq => ExprOp::AssignMul,
        TokenKind::SlashEq => ExprOp::AssignDiv,
        TokenKind::PercentEq => ExprOp::AssignMod,
        TokenKind::PlusEq => ExprOp::AssignAdd,
        TokenKind::MinusEq => ExprOp::AssignSub,
        TokenKind::LtLtEq => ExprOp::AssignShl,
        TokenKind::GtGtEq => ExprOp::AssignShr,
        TokenKind::AmpEq => ExprOp::AssignAnd,
        TokenKind::PipeEq => ExprOp::AssignOr,
        TokenKind::CaretEq => ExprOp::AssignXor,
        _ => return None,
    };
    Some(op)
}

/// One frame of the binary fold stack: a parsed operand and the operator
/// that follows it (empty on the newest frame and at the end of input).
struct Frame {
    node: Expr,
    desc: Option<(ExprOp, u8)>,
}

pub struct Parser<'t> {
    tokenizer: &'t Tokenizer,
    tokens: &'t [Token],
    pos: usize,
    /// One past the last token this parser may consume; sliced subranges
    /// (call arguments, grouped expressions) lower it temporarily.
    limit: usize,
}

type ExprResult = Result<Option<Expr>, ParseError>;

impl<'t> Parser<'t> {
    pub fn new(tokenizer: &'t Tokenizer) -> Self {
        Self {
            tokenizer,
            tokens: &tokenizer.tokens,
            pos: 0,
            limit: tokenizer.tokens.len(),
        }
    }

    /// Parse the entire token stream as one expression.
    pub fn parse_root(&mut self) -> Result<Expr, ParseError> {
        let expr = self.required(Self::expression)?;
        if self.pos < self.limit {
            return Err(self.error_here("unexpected token in expression"));
        }
        Ok(expr)
    }

    // ── Productions ──────────────────────────────────────────────────

    /// `expression ::= assignment ( ',' assignment )*`
    fn expression(&mut self, expect: bool) -> ExprResult {
        let Some(mut node) = self.assignment_expression(expect)? else {
            return Ok(None);
        };
        while self.advance_if(TokenKind::Comma) {
            let rhs = self.required(Self::assignment_expression)?;
            let loc = node.loc;
            node = Expr::new(
                ExprKind::Binary {
                    op: ExprOp::Sequence,
                    a: Box::new(node),
                    b: Box::new(rhs),
                },
                loc,
            );
        }
        Ok(Some(node))
    }

    /// `assignment ::= logical-or ( assign-op initializer-clause
    ///                            | '?' assignment ':' assignment )?`
    fn assignment_expression(&mut self, expect: bool) -> ExprResult {
        let Some(a) = self.logical_or_expression(expect)? else {
            return Ok(None);
        };
        let loc = a.loc;

        if let Some(op) = self.peek().and_then(switch_assign) {
            self.pos += 1;
            let b = self.required(Self::initializer_clause)?;
            return Ok(Some(Expr::new(
                ExprKind::Assign {
                    op,
                    a: Box::new(a),
                    b: Box::new(b),
                },
                loc,
            )));
        }

        if self.advance_if(TokenKind::Question) {
            let b = self.required(Self::assignment_expression)?;
            if !self.advance_if(TokenKind::Colon) {
                return Err(self.error_here("expected ':' in conditional-expression"));
            }
            let c = self.required(Self::assignment_expression)?;
            return Ok(Some(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(a),
                    on_true: Box::new(b),
                    on_false: Box::new(c),
                },
                loc,
            )));
        }

        Ok(Some(a))
    }

    /// `logical-or ::= logical-and ( '||' logical-and )*`
    fn logical_or_expression(&mut self, expect: bool) -> ExprResult {
        let Some(mut node) = self.logical_and_expression(expect)? else {
            return Ok(None);
        };
        while self.advance_if(TokenKind::PipePipe) {
            let rhs = self.required(Self::logical_and_expression)?;
            let loc = node.loc;
            node = Expr::new(
                ExprKind::Binary {
                    op: ExprOp::LogOr,
                    a: Box::new(node),
                    b: Box::new(rhs),
                },
                loc,
            );
        }
        Ok(Some(node))
    }

    /// `logical-and ::= binary ( '&&' binary )*`
    fn logical_and_expression(&mut self, expect: bool) -> ExprResult {
        let Some(mut node) = self.binary_expression(expect)? else {
            return Ok(None);
        };
        while self.advance_if(TokenKind::AmpAmp) {
            let rhs = self.required(Self::binary_expression)?;
            let loc = node.loc;
            node = Expr::new(
                ExprKind::Binary {
                    op: ExprOp::LogAnd,
                    a: Box::new(node),
                    b: Box::new(rhs),
                },
                loc,
            );
        }
        Ok(Some(node))
    }

    /// `binary ::= unary ( binary-op unary )*`, precedence-folded.
    fn binary_expression(&mut self, expect: bool) -> ExprResult {
        let Some(first) = self.unary_expression(expect)? else {
            return Ok(None);
        };

        let mut stack = vec![Frame {
            node: first,
            desc: None,
        }];

        loop {
            let Some(desc) = self.peek().and_then(switch_binary) else {
                break;
            };
            self.pos += 1;
            if let Some(top) = stack.last_mut() {
                top.desc = Some(desc);
            }

            // Fold the expressions to the left with equal or greater
            // precedence before reading the next operand.
            fold(&mut stack);

            let rhs = self.required(Self::unary_expression)?;
            stack.push(Frame {
                node: rhs,
                desc: None,
            });
        }

        // Fold everything that remains.
        fold(&mut stack);
        match stack.pop() {
            Some(frame) => Ok(Some(frame.node)),
            None => Err(self.error_here("expected expression")),
        }
    }

    /// `unary ::= (prefix-op)* postfix`
    fn unary_expression(&mut self, expect: bool) -> ExprResult {
        if let Some(op) = self.peek().and_then(switch_unary) {
            let loc = self.loc_here();
            self.pos += 1;
            let a = self.required(Self::unary_expression)?;
            return Ok(Some(Expr::new(
                ExprKind::Unary { op, a: Box::new(a) },
                loc,
            )));
        }
        self.postfix_expression(expect)
    }

    /// `postfix ::= primary ( '++' | '--' | '[' ... ']' | '(' ... ')'
    ///                      | '.' ident | '->' ident )*`
    fn postfix_expression(&mut self, expect: bool) -> ExprResult {
        let Some(mut node) = self.primary_expression(expect)? else {
            return Ok(None);
        };
        let loc = node.loc;

        loop {
            match self.peek() {
                Some(TokenKind::PlusPlus) => {
                    self.pos += 1;
                    node = Expr::new(
                        ExprKind::Unary {
                            op: ExprOp::IncPost,
                            a: Box::new(node),
                        },
                        loc,
                    );
                }
                Some(TokenKind::MinusMinus) => {
                    self.pos += 1;
                    node = Expr::new(
                        ExprKind::Unary {
                            op: ExprOp::DecPost,
                            a: Box::new(node),
                        },
                        loc,
                    );
                }
                Some(TokenKind::LBracket) => {
                    let args = self.bracket_initializer()?;
                    node = Expr::new(
                        ExprKind::Subscript {
                            lhs: Box::new(node),
                            args,
                        },
                        loc,
                    );
                }
                Some(TokenKind::LParen) => {
                    let args = self.paren_initializer()?;
                    node = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(node),
                            args,
                        },
                        loc,
                    );
                }
                Some(TokenKind::Dot) | Some(TokenKind::Arrow) => {
                    let connector = if self.peek() == Some(TokenKind::Arrow) {
                        MemberKind::Arrow
                    } else {
                        MemberKind::Dot
                    };
                    self.pos += 1;
                    let member = self.expect_ident("expected identifier after member access")?;
                    node = Expr::new(
                        ExprKind::Member {
                            lhs: Box::new(node),
                            connector,
                            member,
                        },
                        loc,
                    );
                }
                _ => break,
            }
        }

        Ok(Some(node))
    }

    /// `primary ::= literal | identifier | '(' expression ')'`
    fn primary_expression(&mut self, expect: bool) -> ExprResult {
        match self.peek() {
            Some(
                TokenKind::True
                | TokenKind::False
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::Char
                | TokenKind::Str,
            ) => self.literal().map(Some),

            Some(TokenKind::LParen) => self.paren_expression().map(Some),

            Some(TokenKind::Ident) => {
                let loc = self.loc_here();
                let name = self.ident_text();
                self.pos += 1;
                Ok(Some(Expr::new(ExprKind::Ident(name), loc)))
            }

            _ => {
                if expect {
                    Err(self.error_here("expected entity in expression"))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Build a literal node from the current token's side-table payload.
    fn literal(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc_here();
        let token = self.tokens[self.pos];
        self.pos += 1;
        let kind = match token.kind {
            TokenKind::Int => {
                let value = self.tokenizer.ints[token.store as usize];
                ExprKind::Number(Number::from_u64(value))
            }
            TokenKind::Float => {
                let value = self.tokenizer.floats[token.store as usize];
                ExprKind::Number(Number::Float(value))
            }
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::Char => {
                let c = char::from_u32(token.store).unwrap_or(char::REPLACEMENT_CHARACTER);
                ExprKind::Char(c)
            }
            TokenKind::Str => {
                ExprKind::Str(self.tokenizer.strings[token.store as usize].clone())
            }
            _ => return Err(ParseError::new("expected literal", loc, self.tokenizer)),
        };
        Ok(Expr::new(kind, loc))
    }

    // ── Grouping ─────────────────────────────────────────────────────

    /// `'(' expression ')'`
    fn paren_expression(&mut self) -> Result<Expr, ParseError> {
        self.pos += 1; // consume (
        let after = self.advance_paren(self.pos)?;
        let expr = self.parse_within(after - 1, |p| {
            let expr = p.required(Self::expression)?;
            if p.pos < p.limit {
                return Err(p.error_here("unexpected token in expression"));
            }
            Ok(expr)
        })?;
        self.pos = after;
        Ok(expr)
    }

    /// `'(' init-list ')'` — call arguments.
    fn paren_initializer(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.pos += 1; // consume (
        let after = self.advance_paren(self.pos)?;
        let args = self.parse_within(after - 1, Self::init_list)?;
        self.pos = after;
        Ok(args)
    }

    /// `'[' init-list ']'` — subscript indices.
    fn bracket_initializer(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.pos += 1; // consume [
        let after = self.advance_bracket(self.pos)?;
        let args = self.parse_within(after - 1, Self::init_list)?;
        self.pos = after;
        Ok(args)
    }

    /// `'{' init-list '}'`, with an optional trailing comma.
    fn braced_init_list(&mut self) -> ExprResult {
        if self.peek() != Some(TokenKind::LBrace) {
            return Ok(None);
        }
        let loc = self.loc_here();
        self.pos += 1; // consume {
        let after = self.advance_brace(self.pos)?;

        // Tolerate a trailing comma as long as other tokens precede it.
        let mut inner_end = after - 1;
        if inner_end > self.pos + 1 && self.tokens[inner_end - 1].kind == TokenKind::Comma {
            inner_end -= 1;
        }

        let args = self.parse_within(inner_end, Self::init_list)?;
        self.pos = after;
        Ok(Some(Expr::new(ExprKind::Braced(args), loc)))
    }

    /// `initializer-clause ::= braced-init-list | assignment`
    fn initializer_clause(&mut self, expect: bool) -> ExprResult {
        if let Some(braced) = self.braced_init_list()? {
            return Ok(Some(braced));
        }
        self.assignment_expression(expect)
    }

    /// Comma-separated initializer-clauses, consuming the whole subrange.
    fn init_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut list = Vec::new();
        if let Some(first) = self.initializer_clause(false)? {
            list.push(first);
            while self.advance_if(TokenKind::Comma) {
                let item = self.required(Self::initializer_clause)?;
                list.push(item);
            }
        }
        if self.pos < self.limit {
            return Err(self.error_here("unexpected token in initializer-list"));
        }
        Ok(list)
    }

    // ── Balanced-group skippers ──────────────────────────────────────
    //
    // Each takes the index of the first token after the opener and
    // returns the index one past the matching closer, diagnosing
    // mismatched closers of the other kinds on the way.

    fn advance_paren(&self, mut i: usize) -> Result<usize, ParseError> {
        let mut count = 1;
        while i < self.tokens.len() {
            let kind = self.tokens[i].kind;
            i += 1;
            match kind {
                TokenKind::LBracket => i = self.advance_bracket(i)?,
                TokenKind::RBracket => {
                    return Err(self.error_at(i - 1, "unbalanced ']' in paren set ( )"))
                }
                TokenKind::LBrace => i = self.advance_brace(i)?,
                TokenKind::RBrace => {
                    return Err(self.error_at(i - 1, "unbalanced '}' in paren set ( )"))
                }
                TokenKind::LParen => count += 1,
                TokenKind::RParen => {
                    count -= 1;
                    if count == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(self.error_at(i, "no closing ')' in paren set ( )"))
    }

    fn advance_bracket(&self, mut i: usize) -> Result<usize, ParseError> {
        let mut count = 1;
        while i < self.tokens.len() {
            let kind = self.tokens[i].kind;
            i += 1;
            match kind {
                TokenKind::LParen => i = self.advance_paren(i)?,
                TokenKind::RParen => {
                    return Err(self.error_at(i - 1, "unbalanced ')' in bracket set [ ]"))
                }
                TokenKind::LBrace => i = self.advance_brace(i)?,
                TokenKind::RBrace => {
                    return Err(self.error_at(i - 1, "unbalanced '}' in bracket set [ ]"))
                }
                TokenKind::LBracket => count += 1,
                TokenKind::RBracket => {
                    count -= 1;
                    if count == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(self.error_at(i, "no closing ']' in bracket set [ ]"))
    }

    fn advance_brace(&self, mut i: usize) -> Result<usize, ParseError> {
        let mut count = 1;
        while i < self.tokens.len() {
            let kind = self.tokens[i].kind;
            i += 1;
            match kind {
                TokenKind::LParen => i = self.advance_paren(i)?,
                TokenKind::RParen => {
                    return Err(self.error_at(i - 1, "unbalanced ')' in brace set { }"))
                }
                TokenKind::LBracket => i = self.advance_bracket(i)?,
                TokenKind::RBracket => {
                    return Err(self.error_at(i - 1, "unbalanced ']' in brace set { }"))
                }
                TokenKind::LBrace => count += 1,
                TokenKind::RBrace => {
                    count -= 1;
                    if count == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(self.error_at(i, "no closing '}' in brace set { }"))
    }

    // ── Cursor helpers ───────────────────────────────────────────────

    fn peek(&self) -> Option<TokenKind> {
        (self.pos < self.limit).then(|| self.tokens[self.pos].kind)
    }

    fn advance_if(&mut self, kind: TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Current identifier token's interned text.
    fn ident_text(&self) -> String {
        let token = self.tokens[self.pos];
        self.tokenizer.strings[token.store as usize].clone()
    }

    fn expect_ident(&mut self, msg: &str) -> Result<String, ParseError> {
        if self.peek() == Some(TokenKind::Ident) {
            let name = self.ident_text();
            self.pos += 1;
            Ok(name)
        } else {
            Err(self.error_here(msg))
        }
    }

    /// Run `f` with the cursor limited to `[pos, end)`, restoring the old
    /// limit afterwards.
    fn parse_within<T>(
        &mut self,
        end: usize,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let saved = self.limit;
        self.limit = end;
        let result = f(self);
        self.limit = saved;
        result
    }

    /// Invoke a production with `expect = true`; a hard error replaces the
    /// no-match case.
    fn required(
        &mut self,
        production: impl FnOnce(&mut Self, bool) -> ExprResult,
    ) -> Result<Expr, ParseError> {
        match production(self, true)? {
            Some(expr) => Ok(expr),
            None => Err(self.error_here("expected expression")),
        }
    }

    fn loc_here(&self) -> SourceLoc {
        SourceLoc::new(self.pos)
    }

    fn error_here(&self, msg: &str) -> ParseError {
        self.error_at(self.pos, msg)
    }

    fn error_at(&self, token_index: usize, msg: &str) -> ParseError {
        ParseError::new(msg, SourceLoc::new(token_index), self.tokenizer)
    }
}

/// Fold the top two stack frames together while the lower frame's pending
/// operator has precedence >= the operator following the upper frame.
fn fold(stack: &mut Vec<Frame>) {
    while stack.len() >= 2 {
        let rhs_prec = stack[stack.len() - 1].desc.map_or(prec::ANY, |(_, p)| p);
        let Some((op, lhs_prec)) = stack[stack.len() - 2].desc else {
            break;
        };
        if lhs_prec < rhs_prec {
            break;
        }
        let (Some(rhs), Some(lhs)) = (stack.pop(), stack.pop()) else {
            break;
        };
        let loc = lhs.node.loc;
        stack.push(Frame {
            node: Expr::new(
                ExprKind::Binary {
                    op,
                    a: Box::new(lhs.node),
                    b: Box::new(rhs.node),
                },
                loc,
            ),
            desc: rhs.desc,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Expr {
        parse_expression(source).expect("parse error").root
    }

    fn parse_err(source: &str) -> Error {
        parse_expression(source).expect_err("expected a parse error")
    }

    fn binary_parts(expr: &Expr) -> (ExprOp, &Expr, &Expr) {
        match &expr.kind {
            ExprKind::Binary { op, a, b } => (*op, a.as_ref(), b.as_ref()),
            other => panic!("expected Binary, got {:?}", other),
        }
    }

    fn int_value(expr: &Expr) -> i64 {
        match &expr.kind {
            ExprKind::Number(Number::Int(i)) => *i,
            other => panic!("expected integer literal, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        // 1 + 2 * 3 => Add(1, Mul(2, 3))
        let expr = parse("1 + 2 * 3");
        let (op, a, b) = binary_parts(&expr);
        assert_eq!(op, ExprOp::Add);
        assert_eq!(int_value(a), 1);
        let (op2, b1, b2) = binary_parts(b);
        assert_eq!(op2, ExprOp::Mul);
        assert_eq!(int_value(b1), 2);
        assert_eq!(int_value(b2), 3);
    }

    #[test]
    fn test_parens_override_precedence() {
        // (1 + 2) * 3 => Mul(Add(1, 2), 3)
        let expr = parse("(1 + 2) * 3");
        let (op, a, b) = binary_parts(&expr);
        assert_eq!(op, ExprOp::Mul);
        assert_eq!(int_value(b), 3);
        let (op2, ..) = binary_parts(a);
        assert_eq!(op2, ExprOp::Add);
    }

    #[test]
    fn test_left_associativity() {
        // 1 - 2 + 3 => Add(Sub(1, 2), 3)
        let expr = parse("1 - 2 + 3");
        let (op, a, b) = binary_parts(&expr);
        assert_eq!(op, ExprOp::Add);
        assert_eq!(int_value(b), 3);
        let (op2, ..) = binary_parts(a);
        assert_eq!(op2, ExprOp::Sub);
    }

    #[test]
    fn test_full_lattice_ordering() {
        // Every operator binds tighter than the one to its left.
        let expr = parse("1 | 2 ^ 3 & 4 == 5 < 6 << 7 + 8 * 9");
        let ops = [
            ExprOp::BitOr,
            ExprOp::BitXor,
            ExprOp::BitAnd,
            ExprOp::Eq,
            ExprOp::Lt,
            ExprOp::Shl,
            ExprOp::Add,
            ExprOp::Mul,
        ];
        let mut node = &expr;
        for expected in ops {
            let (op, _, b) = binary_parts(node);
            assert_eq!(op, expected);
            node = b;
        }
        assert_eq!(int_value(node), 9);
    }

    #[test]
    fn test_assignment_right_associative() {
        // a = b = c => Assign(a, Assign(b, c))
        let expr = parse("a = b = c");
        let ExprKind::Assign { op, a, b } = &expr.kind else {
            panic!("expected Assign");
        };
        assert_eq!(*op, ExprOp::Assign);
        assert!(matches!(a.kind, ExprKind::Ident(_)));
        assert!(matches!(b.kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn test_compound_assignment() {
        let expr = parse("x += 2");
        let ExprKind::Assign { op, .. } = &expr.kind else {
            panic!("expected Assign");
        };
        assert_eq!(*op, ExprOp::AssignAdd);
    }

    #[test]
    fn test_ternary() {
        let expr = parse("a ? 1 : b ? 2 : 3");
        let ExprKind::Ternary { on_false, .. } = &expr.kind else {
            panic!("expected Ternary");
        };
        // Right-associative: the else branch is itself a ternary.
        assert!(matches!(on_false.kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn test_comma_sequence_folds_left() {
        let expr = parse("a, b, c");
        let (op, a, _) = binary_parts(&expr);
        assert_eq!(op, ExprOp::Sequence);
        let (op2, ..) = binary_parts(a);
        assert_eq!(op2, ExprOp::Sequence);
    }

    #[test]
    fn test_unary_chain() {
        let expr = parse("- -x");
        let ExprKind::Unary { op, a } = &expr.kind else {
            panic!("expected Unary");
        };
        assert_eq!(*op, ExprOp::Neg);
        assert!(matches!(
            a.kind,
            ExprKind::Unary { op: ExprOp::Neg, .. }
        ));
    }

    #[test]
    fn test_prefix_and_postfix_inc() {
        let expr = parse("++x");
        assert!(matches!(
            expr.kind,
            ExprKind::Unary { op: ExprOp::IncPre, .. }
        ));
        let expr = parse("x++");
        assert!(matches!(
            expr.kind,
            ExprKind::Unary { op: ExprOp::IncPost, .. }
        ));
    }

    #[test]
    fn test_logical_operators() {
        let expr = parse("a && b || c && d");
        let (op, a, b) = binary_parts(&expr);
        assert_eq!(op, ExprOp::LogOr);
        assert!(matches!(
            a.kind,
            ExprKind::Binary { op: ExprOp::LogAnd, .. }
        ));
        assert!(matches!(
            b.kind,
            ExprKind::Binary { op: ExprOp::LogAnd, .. }
        ));
    }

    #[test]
    fn test_call_with_arguments() {
        let expr = parse("pow(x, 2)");
        let ExprKind::Call { callee, args } = &expr.kind else {
            panic!("expected Call");
        };
        assert!(matches!(&callee.kind, ExprKind::Ident(n) if n == "pow"));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_empty_call() {
        let expr = parse("f()");
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected Call");
        };
        assert!(args.is_empty());
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse("a.b[0](c)");
        let ExprKind::Call { callee, args } = &expr.kind else {
            panic!("expected Call");
        };
        assert_eq!(args.len(), 1);
        let ExprKind::Subscript { lhs, args } = &callee.kind else {
            panic!("expected Subscript");
        };
        assert_eq!(args.len(), 1);
        assert!(matches!(lhs.kind, ExprKind::Member { .. }));
    }

    #[test]
    fn test_member_arrow() {
        let expr = parse("p->x");
        let ExprKind::Member { connector, member, .. } = &expr.kind else {
            panic!("expected Member");
        };
        assert_eq!(*connector, MemberKind::Arrow);
        assert_eq!(member, "x");
    }

    #[test]
    fn test_braced_initializer_in_call() {
        let expr = parse("f({1, 2, 3})");
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected Call");
        };
        let ExprKind::Braced(elements) = &args[0].kind else {
            panic!("expected Braced");
        };
        assert_eq!(elements.len(), 3);
    }

    #[test]
    fn test_braced_trailing_comma() {
        let expr = parse("f({1, 2,})");
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected Call");
        };
        let ExprKind::Braced(elements) = &args[0].kind else {
            panic!("expected Braced");
        };
        assert_eq!(elements.len(), 2);
    }

    #[test]
    fn test_literals() {
        assert!(matches!(parse("true").kind, ExprKind::Bool(true)));
        assert!(matches!(parse("'z'").kind, ExprKind::Char('z')));
        assert!(matches!(parse(r#""s""#).kind, ExprKind::Str(_)));
        assert!(matches!(
            parse("2.5").kind,
            ExprKind::Number(Number::Float(_))
        ));
    }

    #[test]
    fn test_unbalanced_groups() {
        assert!(matches!(parse_err("(1 + 2"), Error::Parse(_)));
        assert!(matches!(parse_err("f(1, 2]"), Error::Parse(_)));
        assert!(matches!(parse_err("a[1)"), Error::Parse(_)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(matches!(parse_err("1 + 2 3"), Error::Parse(_)));
    }

    #[test]
    fn test_missing_operand() {
        let err = parse_err("1 +");
        let Error::Parse(e) = err else {
            panic!("expected ParseError");
        };
        assert!(e.message.contains("expected"));
    }

    #[test]
    fn test_missing_ternary_colon() {
        let Error::Parse(e) = parse_err("a ? b") else {
            panic!("expected ParseError");
        };
        assert!(e.message.contains(':'));
    }

    #[test]
    fn test_error_carries_location() {
        let Error::Parse(e) = parse_err("1 +\n+") else {
            panic!("expected ParseError");
        };
        // 1-based line/col of the offending position.
        assert_eq!(e.line, 2);
    }
}
