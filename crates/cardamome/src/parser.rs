//! Expression parser
//!
//! Recursive descent over the token vector, one method per grammar rule,
//! from loosest to tightest binding:
//!
//! ```text
//! testlist   := test (',' test)* [',']
//! test       := or_test ['if' or_test 'else' test]
//! or_test    := and_test ('or' and_test)*
//! and_test   := not_test ('and' not_test)*
//! not_test   := 'not' not_test | comparison
//! comparison := filtered (comp_op filtered)*
//! filtered   := arith ('|' NAME ['(' arguments ')'])*
//! arith      := term (('+' | '-') term)*
//! term       := factor (('*' | '/' | '//' | '%') factor)*
//! factor     := ('+' | '-') factor | power
//! power      := primary trailer* ['**' factor]
//! ```
//!
//! Filters sit where Python has its bitwise `|`.

use crate::ast::*;
use crate::error::{SyntaxError, TemplateSource};
use crate::lexer::{Keyword, Op, Tok, Token, tokenize};
use miette::Result;

/// Entry point: holds the text and picks the rule to start from.
pub struct Parser {
    source: TemplateSource,
    statements: bool,
}

impl Parser {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            source: TemplateSource::new(name.into(), source.into()),
            statements: false,
        }
    }

    /// For embedded code, where a line break ends a statement.
    pub fn statements(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            statements: true,
            ..Self::new(name, source)
        }
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    /// Run `rule`, then require that all input was consumed.
    fn run<T>(&self, rule: impl FnOnce(&mut Cursor<'_>) -> Result<T>) -> Result<T> {
        let tokens = tokenize(self.source.text(), self.statements).map_err(|err| SyntaxError {
            found: err.message,
            expected: "a valid token".to_string(),
            span: err.span,
            src: self.source.named_source(),
        })?;
        let mut cursor = Cursor {
            tokens,
            pos: 0,
            source: &self.source,
        };
        let value = rule(&mut cursor)?;
        cursor.expect_end()?;
        Ok(value)
    }

    pub fn parse_expression(self) -> Result<Expr> {
        self.run(|c| c.testlist())
    }

    /// `target in iterable`
    pub fn parse_for_head(self) -> Result<ForHead> {
        self.run(|c| {
            let target = c.target()?;
            c.expect_keyword(Keyword::In)?;
            let iter = c.testlist()?;
            Ok(ForHead { target, iter })
        })
    }

    /// `a = 1; b = a * 2`
    pub fn parse_bindings(self) -> Result<Vec<Binding>> {
        self.run(|c| {
            let mut bindings = Vec::new();
            loop {
                while c.eat_op(Op::Semi) {}
                if c.at_end() {
                    return Ok(bindings);
                }
                let target = c.target()?;
                c.expect_op(Op::Assign)?;
                let value = c.testlist()?;
                bindings.push(Binding { target, value });
                if !c.at_end() {
                    c.expect_op(Op::Semi)?;
                }
            }
        })
    }

    /// `name(a, b=1)`, or a bare `name`
    pub fn parse_signature(self) -> Result<Signature> {
        self.run(|c| {
            let name = c.name()?;
            let params = if c.eat_op(Op::LParen) {
                let params = c.params(Op::RParen)?;
                c.expect_op(Op::RParen)?;
                params
            } else {
                Vec::new()
            };
            Ok(Signature { name, params })
        })
    }

    /// `a, b=1` with no parentheses
    pub fn parse_param_list(self) -> Result<Vec<Param>> {
        self.run(|c| c.params(Op::RParen))
    }

    /// Assignments and bare expressions, separated by line breaks or `;`.
    pub fn parse_statements(self) -> Result<Vec<Statement>> {
        self.run(|c| {
            let mut statements = Vec::new();
            loop {
                while matches!(c.peek(), Tok::Newline | Tok::Op(Op::Semi)) {
                    c.pos += 1;
                }
                if c.at_end() {
                    return Ok(statements);
                }
                statements.push(c.statement()?);
                if !c.at_end() && !matches!(c.peek(), Tok::Op(Op::Semi)) {
                    c.expect(|t| matches!(t, Tok::Newline), "end of line")?;
                }
            }
        })
    }
}

struct Cursor<'p> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'p TemplateSource,
}

impl Cursor<'_> {
    // --- token access -------------------------------------------------------

    fn token(&self, ahead: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn peek(&self) -> &Tok {
        &self.token(0).tok
    }

    fn peek_span(&self) -> Span {
        self.token(0).span
    }

    /// Span of the token just consumed.
    fn last_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), Tok::End)
    }

    fn next(&mut self) -> Token {
        let token = self.token(0).clone();
        if !matches!(token.tok, Tok::End) {
            self.pos += 1;
        }
        token
    }

    fn is_op(&self, op: Op) -> bool {
        *self.peek() == Tok::Op(op)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        *self.peek() == Tok::Keyword(kw)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        let hit = self.is_op(op);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        let hit = self.is_keyword(kw);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn unexpected(&self, expected: impl Into<String>) -> miette::Report {
        SyntaxError {
            found: self.peek().describe(),
            expected: expected.into(),
            span: self.peek_span(),
            src: self.source.named_source(),
        }
        .into()
    }

    fn expect(&mut self, accept: impl Fn(&Tok) -> bool, expected: &str) -> Result<Token> {
        if accept(self.peek()) {
            Ok(self.next())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_op(&mut self, op: Op) -> Result<Token> {
        let expected = Tok::Op(op).describe();
        self.expect(|t| *t == Tok::Op(op), &expected)
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<Token> {
        self.expect(|t| *t == Tok::Keyword(kw), &format!("`{}`", kw.as_str()))
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of expression"))
        }
    }

    fn name(&mut self) -> Result<Ident> {
        let span = self.peek_span();
        match self.peek() {
            Tok::Name(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(Ident { name, span })
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    // --- statement forms ----------------------------------------------------

    /// `x`, `k, v` or `(k, v)`
    fn target(&mut self) -> Result<Target> {
        let start = self.peek_span();
        let parenthesized = self.eat_op(Op::LParen);
        let mut names = vec![self.name()?];
        while self.eat_op(Op::Comma) {
            if !matches!(self.peek(), Tok::Name(_)) {
                break;
            }
            names.push(self.name()?);
        }
        if parenthesized {
            self.expect_op(Op::RParen)?;
        }
        if names.len() == 1 && !parenthesized && !matches!(self.tokens[self.pos - 1].tok, Tok::Op(Op::Comma)) {
            return Ok(Target::Name(names.remove(0)));
        }
        Ok(Target::Unpack {
            names,
            span: join(start, self.last_span()),
        })
    }

    fn params(&mut self, close: Op) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        while !self.is_op(close) && !self.at_end() {
            let name = self.name()?;
            let default = if self.eat_op(Op::Assign) { Some(self.test()?) } else { None };
            params.push(Param { name, default });
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn statement(&mut self) -> Result<Statement> {
        let lhs = self.testlist()?;
        if !self.eat_op(Op::Assign) {
            return Ok(Statement::Expr(lhs));
        }
        let target = self.as_target(lhs)?;
        let value = self.testlist()?;
        let span = join(target.span(), value.span());
        Ok(Statement::Assign { target, value, span })
    }

    fn as_target(&self, expr: Expr) -> Result<Target> {
        let not_a_name = |span: Span| -> miette::Report {
            SyntaxError {
                found: "expression".to_string(),
                expected: "a name to assign to".to_string(),
                span,
                src: self.source.named_source(),
            }
            .into()
        };
        match expr {
            Expr::Name(ident) => Ok(Target::Name(ident)),
            Expr::Tuple(items, span) | Expr::List(items, span) => {
                let names = items
                    .into_iter()
                    .map(|item| match item {
                        Expr::Name(ident) => Ok(ident),
                        other => Err(not_a_name(other.span())),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Target::Unpack { names, span })
            }
            other => Err(not_a_name(other.span())),
        }
    }

    // --- expressions --------------------------------------------------------

    /// A single `test`, or a bare tuple `a, b`.
    fn testlist(&mut self) -> Result<Expr> {
        let first = self.test()?;
        if !self.is_op(Op::Comma) {
            return Ok(first);
        }
        let start = first.span();
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items, join(start, self.last_span())))
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Tok::Name(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => true,
            Tok::Keyword(kw) => matches!(kw, Keyword::Not | Keyword::True | Keyword::False | Keyword::None),
            Tok::Op(op) => matches!(op, Op::LParen | Op::LBracket | Op::LBrace | Op::Minus | Op::Plus),
            Tok::Newline | Tok::End => false,
        }
    }

    fn test(&mut self) -> Result<Expr> {
        let body = self.or_test()?;
        if !self.eat_keyword(Keyword::If) {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_keyword(Keyword::Else)?;
        let orelse = self.test()?;
        Ok(Expr::IfExp {
            span: join(body.span(), orelse.span()),
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn bool_chain(
        &mut self,
        kw: Keyword,
        op: BoolOp,
        operand: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let first = operand(self)?;
        if !self.is_keyword(kw) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword(kw) {
            values.push(operand(self)?);
        }
        let span = join(values[0].span(), values[values.len() - 1].span());
        Ok(Expr::BoolOp { op, values, span })
    }

    fn or_test(&mut self) -> Result<Expr> {
        self.bool_chain(Keyword::Or, BoolOp::Or, Self::and_test)
    }

    fn and_test(&mut self) -> Result<Expr> {
        self.bool_chain(Keyword::And, BoolOp::And, Self::not_test)
    }

    fn not_test(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        if !self.eat_keyword(Keyword::Not) {
            return self.comparison();
        }
        let operand = self.not_test()?;
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            span: join(start, operand.span()),
            operand: Box::new(operand),
        })
    }

    /// The comparison operator at the cursor, with the number of tokens it
    /// spans (`not in` and `is not` take two).
    fn comp_op(&self) -> Option<(CmpOp, usize)> {
        let second = &self.token(1).tok;
        Some(match self.peek() {
            Tok::Op(Op::EqEq) => (CmpOp::Eq, 1),
            Tok::Op(Op::NotEq) => (CmpOp::NotEq, 1),
            Tok::Op(Op::Less) => (CmpOp::Lt, 1),
            Tok::Op(Op::LessEq) => (CmpOp::LtE, 1),
            Tok::Op(Op::Greater) => (CmpOp::Gt, 1),
            Tok::Op(Op::GreaterEq) => (CmpOp::GtE, 1),
            Tok::Keyword(Keyword::In) => (CmpOp::In, 1),
            Tok::Keyword(Keyword::Not) if *second == Tok::Keyword(Keyword::In) => (CmpOp::NotIn, 2),
            Tok::Keyword(Keyword::Is) if *second == Tok::Keyword(Keyword::Not) => (CmpOp::IsNot, 2),
            Tok::Keyword(Keyword::Is) => (CmpOp::Is, 1),
            _ => return None,
        })
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.filtered()?;
        let mut rest = Vec::new();
        while let Some((op, width)) = self.comp_op() {
            self.pos += width;
            rest.push((op, self.filtered()?));
        }
        let Some((_, last)) = rest.last() else {
            return Ok(left);
        };
        let span = join(left.span(), last.span());
        Ok(Expr::Compare {
            span,
            left: Box::new(left),
            rest,
        })
    }

    fn filtered(&mut self) -> Result<Expr> {
        let mut value = self.arith()?;
        while self.eat_op(Op::Pipe) {
            let name = self.name()?;
            let args = if self.eat_op(Op::LParen) {
                let args = self.arguments()?;
                self.expect_op(Op::RParen)?;
                args
            } else {
                Arguments::default()
            };
            value = Expr::Filter {
                span: join(value.span(), self.last_span()),
                value: Box::new(value),
                name,
                args,
            };
        }
        Ok(value)
    }

    fn binary_chain(
        &mut self,
        operator: fn(&Tok) -> Option<Operator>,
        operand: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = operand(self)?;
        while let Some(op) = operator(self.peek()) {
            self.pos += 1;
            let right = operand(self)?;
            left = Expr::BinOp {
                span: join(left.span(), right.span()),
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn arith(&mut self) -> Result<Expr> {
        self.binary_chain(
            |tok| match tok {
                Tok::Op(Op::Plus) => Some(Operator::Add),
                Tok::Op(Op::Minus) => Some(Operator::Sub),
                _ => None,
            },
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_chain(
            |tok| match tok {
                Tok::Op(Op::Star) => Some(Operator::Mult),
                Tok::Op(Op::Slash) => Some(Operator::Div),
                Tok::Op(Op::DoubleSlash) => Some(Operator::FloorDiv),
                Tok::Op(Op::Percent) => Some(Operator::Mod),
                _ => None,
            },
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let op = match self.peek() {
            Tok::Op(Op::Minus) => UnaryOp::Neg,
            Tok::Op(Op::Plus) => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.factor()?;
        Ok(Expr::Unary {
            op,
            span: join(start, operand.span()),
            operand: Box::new(operand),
        })
    }

    /// `**` is right-associative and binds tighter than a unary minus on
    /// its left: `-2 ** 2` is `-(2 ** 2)`.
    fn power(&mut self) -> Result<Expr> {
        let base = self.trailers()?;
        if !self.eat_op(Op::DoubleStar) {
            return Ok(base);
        }
        let exponent = self.factor()?;
        Ok(Expr::BinOp {
            span: join(base.span(), exponent.span()),
            left: Box::new(base),
            op: Operator::Pow,
            right: Box::new(exponent),
        })
    }

    /// A primary followed by any number of `.name`, `[index]` and `(args)`.
    fn trailers(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_op(Op::Dot) {
                let attr = self.name()?;
                expr = Expr::Attribute {
                    span: join(expr.span(), attr.span),
                    value: Box::new(expr),
                    attr,
                };
            } else if self.eat_op(Op::LBracket) {
                let index = self.testlist()?;
                self.expect_op(Op::RBracket)?;
                expr = Expr::Subscript {
                    span: join(expr.span(), self.last_span()),
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(Op::LParen) {
                let args = self.arguments()?;
                self.expect_op(Op::RParen)?;
                expr = Expr::Call {
                    span: join(expr.span(), self.last_span()),
                    func: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Call arguments up to (not including) the closing parenthesis.
    /// Keyword arguments are `name=value`.
    fn arguments(&mut self) -> Result<Arguments> {
        let mut args = Arguments::default();
        while !self.is_op(Op::RParen) {
            let keyword = matches!(self.peek(), Tok::Name(_)) && self.token(1).tok == Tok::Op(Op::Assign);
            if keyword {
                let name = self.name()?;
                self.pos += 1;
                args.keywords.push((name, self.test()?));
            } else if args.keywords.is_empty() {
                args.positional.push(self.test()?);
            } else {
                return Err(self.unexpected("a keyword argument"));
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(args)
    }

    /// Items up to `close`, allowing a trailing comma.
    fn items(&mut self, close: Op) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.is_op(close) {
            items.push(self.test()?);
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let constant = match self.peek() {
            Tok::Int(i) => Some(Const::Int(*i)),
            Tok::Float(f) => Some(Const::Float(*f)),
            Tok::Keyword(Keyword::True) => Some(Const::Bool(true)),
            Tok::Keyword(Keyword::False) => Some(Const::Bool(false)),
            Tok::Keyword(Keyword::None) => Some(Const::None),
            _ => None,
        };
        if let Some(constant) = constant {
            self.pos += 1;
            return Ok(Expr::Const(constant, start));
        }

        match self.peek() {
            Tok::Name(_) => Ok(Expr::Name(self.name()?)),
            Tok::Str(_) => {
                // Adjacent literals concatenate: 'a' "b"
                let mut value = String::new();
                while let Tok::Str(s) = self.peek() {
                    value.push_str(s);
                    self.pos += 1;
                }
                Ok(Expr::Const(Const::Str(value), join(start, self.last_span())))
            }
            Tok::Op(Op::LParen) => {
                self.pos += 1;
                if self.eat_op(Op::RParen) {
                    return Ok(Expr::Tuple(Vec::new(), join(start, self.last_span())));
                }
                let inner = self.testlist()?;
                self.expect_op(Op::RParen)?;
                // Only a comma makes a tuple; keep the parenthesized span.
                Ok(match inner {
                    Expr::Tuple(items, _) => Expr::Tuple(items, join(start, self.last_span())),
                    other => other,
                })
            }
            Tok::Op(Op::LBracket) => {
                self.pos += 1;
                let items = self.items(Op::RBracket)?;
                self.expect_op(Op::RBracket)?;
                Ok(Expr::List(items, join(start, self.last_span())))
            }
            Tok::Op(Op::LBrace) => {
                self.pos += 1;
                let mut entries = Vec::new();
                while !self.is_op(Op::RBrace) {
                    let key = self.test()?;
                    self.expect_op(Op::Colon)?;
                    entries.push((key, self.test()?));
                    if !self.eat_op(Op::Comma) {
                        break;
                    }
                }
                self.expect_op(Op::RBrace)?;
                Ok(Expr::Dict(entries, join(start, self.last_span())))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}
