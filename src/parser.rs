// File: src/parser.rs
//
// Recursive-descent parser. One token of lookahead; precedence
// climbing for
// or < and < relational < concat < additive < multiplicative < unary <
// postfix < primary. Produces the `Stmt`/`Expr` AST nodes directly.

use crate::ast::{ArithOp, Expr, FunctionBody, LogicalOp, ParList, RelOp, Stmt};
use crate::errors::{KalaError, SourceLocation};
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, KalaError>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &TokenKind {
        self.tokens.get(self.pos).map(|t| &t.kind).unwrap_or(&TokenKind::Eof)
    }

    fn loc(&self) -> SourceLocation {
        self.tokens
            .get(self.pos)
            .map(|t| SourceLocation::new(t.line, t.column))
            .unwrap_or_else(SourceLocation::unknown)
    }

    fn advance(&mut self) -> TokenKind {
        let tok = self.tokens.get(self.pos).map(|t| t.kind.clone()).unwrap_or(TokenKind::Eof);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &TokenKind) -> PResult<()> {
        if self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(KalaError::parse(
                format!("expected {:?}, found {:?}", want, self.peek()),
                self.loc(),
            ))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        self.expect(&TokenKind::Keyword(kw.to_string()))
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if k == kw)
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.advance() {
            TokenKind::Ident(name) => Ok(name),
            other => Err(KalaError::parse(format!("expected identifier, found {:?}", other), self.loc())),
        }
    }

    pub fn parse(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        if self.is_keyword("if") {
            return self.parse_if();
        }
        if self.is_keyword("while") {
            return self.parse_while();
        }
        if self.is_keyword("for") {
            return self.parse_for();
        }
        if self.is_keyword("return") {
            self.advance();
            let mut exprs = Vec::new();
            if !self.starts_block_end() {
                exprs.push(self.parse_expr()?);
                while matches!(self.peek(), TokenKind::Comma) {
                    self.advance();
                    exprs.push(self.parse_expr()?);
                }
            }
            return Ok(Stmt::Return(exprs));
        }
        if self.is_keyword("break") {
            self.advance();
            return Ok(Stmt::Break);
        }
        if self.is_keyword("func") {
            return self.parse_func_def();
        }
        if self.is_keyword("var") {
            return self.parse_var_def();
        }
        if self.is_keyword("append") {
            return self.parse_append();
        }
        self.parse_assign_or_expr_stmt()
    }

    fn starts_block_end(&self) -> bool {
        matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.expect_keyword("if")?;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.is_keyword("else") {
            self.advance();
            if self.is_keyword("if") {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If { cond, then_block, else_block })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        self.expect_keyword("while")?;
        let cond = self.parse_expr()?;
        let block = self.parse_block()?;
        Ok(Stmt::While { cond, block })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.expect_keyword("for")?;
        let first = self.expect_ident()?;
        if matches!(self.peek(), TokenKind::Assign) {
            self.advance();
            if self.is_keyword("range") {
                self.advance();
                let object = self.parse_expr()?;
                // range-for binds only a single (index, value) pair; a
                // leading `k,v = range obj` form collapses to this.
                let block = self.parse_block()?;
                return Ok(Stmt::ForRange { index: first, value: "_v_".to_string(), object, block });
            }
            let start = self.parse_expr()?;
            self.expect(&TokenKind::Comma)?;
            let end = self.parse_expr()?;
            let step = if matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            };
            let block = self.parse_block()?;
            return Ok(Stmt::ForNumber { counter_name: first, start, end, step, block });
        }
        self.expect(&TokenKind::Comma)?;
        let value = self.expect_ident()?;
        self.expect(&TokenKind::Assign)?;
        self.expect_keyword("range")?;
        let object = self.parse_expr()?;
        let block = self.parse_block()?;
        Ok(Stmt::ForRange { index: first, value, object, block })
    }

    fn parse_func_def(&mut self) -> PResult<Stmt> {
        self.expect_keyword("func")?;
        let func_name = self.expect_ident()?;
        let params = self.parse_param_list()?;
        let block = self.parse_block()?;
        Ok(Stmt::FuncDef { func_name, params, block })
    }

    fn parse_param_list(&mut self) -> PResult<ParList> {
        self.expect(&TokenKind::LParen)?;
        let mut names = Vec::new();
        let mut has_vararg = false;
        if !matches!(self.peek(), TokenKind::RParen) {
            loop {
                if matches!(self.peek(), TokenKind::DotDot) {
                    self.advance();
                    has_vararg = true;
                    break;
                }
                names.push(self.expect_ident()?);
                if matches!(self.peek(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(ParList { names, has_vararg })
    }

    fn parse_var_def(&mut self) -> PResult<Stmt> {
        self.expect_keyword("var")?;
        let mut vars = vec![self.expect_ident()?];
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            vars.push(self.expect_ident()?);
        }
        let mut exprs = Vec::new();
        if matches!(self.peek(), TokenKind::Assign) {
            self.advance();
            exprs.push(self.parse_expr()?);
            while matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                exprs.push(self.parse_expr()?);
            }
        }
        Ok(Stmt::VarDef { vars, exprs })
    }

    fn parse_append(&mut self) -> PResult<Stmt> {
        self.expect_keyword("append")?;
        self.expect(&TokenKind::LParen)?;
        let object = self.parse_expr()?;
        self.expect(&TokenKind::Comma)?;
        let element = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        Ok(Stmt::ListAppend { object, element })
    }

    fn parse_assign_or_expr_stmt(&mut self) -> PResult<Stmt> {
        let first = self.parse_expr()?;
        let mut lhs = vec![first];
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            lhs.push(self.parse_expr()?);
        }
        if matches!(self.peek(), TokenKind::Assign) {
            self.advance();
            let mut rhs = vec![self.parse_expr()?];
            while matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                rhs.push(self.parse_expr()?);
            }
            return Ok(Stmt::Assign { lhs, rhs });
        }
        if lhs.len() != 1 {
            return Err(KalaError::parse("expected '=' after expression list", self.loc()));
        }
        Ok(Stmt::ExprStmt(lhs.into_iter().next().unwrap()))
    }

    // --- expressions, lowest to highest precedence ---

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Logical { op: LogicalOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_relational()?;
        while self.is_keyword("and") {
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Logical { op: LogicalOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let lhs = self.parse_concat()?;
        let op = match self.peek() {
            TokenKind::Lt => RelOp::Lt,
            TokenKind::Le => RelOp::Le,
            TokenKind::Gt => RelOp::Gt,
            TokenKind::Ge => RelOp::Ge,
            TokenKind::EqEq => RelOp::Eq,
            TokenKind::NotEq => RelOp::Ne,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_concat()?;
        Ok(Expr::Relational { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn parse_concat(&mut self) -> PResult<Expr> {
        let lhs = self.parse_additive()?;
        if matches!(self.peek(), TokenKind::DotDot) {
            self.advance();
            // Right-associative, matching the reference grammar's
            // right-folding concat chains.
            let rhs = self.parse_concat()?;
            return Ok(Expr::Concat { lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => ArithOp::Add,
                TokenKind::Minus => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Arithmetic { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => ArithOp::Mul,
                TokenKind::Slash => ArithOp::Div,
                TokenKind::Percent => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Arithmetic { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), TokenKind::Minus) {
            self.advance();
            return Ok(Expr::Minus(Box::new(self.parse_unary()?)));
        }
        if self.is_keyword("not") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if matches!(self.peek(), TokenKind::Hash) {
            self.advance();
            return Ok(Expr::Len(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let key = self.expect_ident()?;
                    expr = Expr::FieldGet { object: Box::new(expr), key: Box::new(Expr::Str(key)) };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::FieldGet { object: Box::new(expr), key: Box::new(key) };
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), TokenKind::Comma) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    expr = Expr::Call { func: Box::new(expr), args };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            TokenKind::Keyword(kw) if kw == "nil" => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::Keyword(kw) if kw == "true" => {
                self.advance();
                Ok(Expr::True)
            }
            TokenKind::Keyword(kw) if kw == "false" => {
                self.advance();
                Ok(Expr::False)
            }
            TokenKind::Keyword(kw) if kw == "func" => self.parse_function_literal(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBrace => self.parse_dict_literal(),
            TokenKind::LBracket => self.parse_list_literal(),
            other => Err(KalaError::parse(format!("unexpected token {:?}", other), self.loc())),
        }
    }

    fn parse_function_literal(&mut self) -> PResult<Expr> {
        self.expect_keyword("func")?;
        let plist = self.parse_param_list()?;
        let block = self.parse_block()?;
        Ok(Expr::Function(Box::new(FunctionBody {
            params: plist.names,
            has_vararg: plist.has_vararg,
            block,
        })))
    }

    fn parse_dict_literal(&mut self) -> PResult<Expr> {
        self.expect(&TokenKind::LBrace)?;
        let mut entries = Vec::new();
        if !matches!(self.peek(), TokenKind::RBrace) {
            loop {
                let key = match self.advance() {
                    TokenKind::Ident(name) => Expr::Str(name),
                    TokenKind::Str(s) => Expr::Str(s),
                    other => {
                        return Err(KalaError::parse(
                            format!("expected dict key, found {:?}", other),
                            self.loc(),
                        ));
                    }
                };
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if matches!(self.peek(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::Dict(entries))
    }

    fn parse_list_literal(&mut self) -> PResult<Expr> {
        self.expect(&TokenKind::LBracket)?;
        let mut elements = Vec::new();
        if !matches!(self.peek(), TokenKind::RBracket) {
            elements.push(self.parse_expr()?);
            while matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                elements.push(self.parse_expr()?);
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(Expr::List(elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(src: &str) -> Vec<Stmt> {
        let tokens = tokenize(src).unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    #[test]
    fn parses_var_def_with_multiple_values() {
        let stmts = parse_source("var a,b = false,true");
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::VarDef { vars, exprs } => {
                assert_eq!(vars, &["a", "b"]);
                assert_eq!(exprs.len(), 2);
            }
            _ => panic!("expected VarDef"),
        }
    }

    #[test]
    fn parses_if_else_if_chain() {
        let stmts = parse_source("if a { } else if b { } else { }");
        assert_eq!(stmts.len(), 1);
        assert!(matches!(stmts[0], Stmt::If { .. }));
    }

    #[test]
    fn parses_numeric_for() {
        let stmts = parse_source("for i=0,5 { }");
        assert!(matches!(stmts[0], Stmt::ForNumber { .. }));
    }

    #[test]
    fn parses_function_call_chain() {
        let stmts = parse_source("max(n,m)");
        match &stmts[0] {
            Stmt::ExprStmt(Expr::Call { args, .. }) => assert_eq!(args.len(), 2),
            _ => panic!("expected call expr stmt"),
        }
    }
}
