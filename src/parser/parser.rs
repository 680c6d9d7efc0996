//! Рекурсивный спуск для Python-подмножества.

use super::error::ParseError;
use super::lexer::Lexer;
use super::token::{RawFStringPart, Span, Spanned, Token};
use crate::ast::{Ast, NodeId};
use crate::nodecodes::{BinOp, FStringPart, Literal, NodeKind, Param, TypeExpr, UnaryOp};

/// Парсер Python-подмножества. Строит [`Ast`] за один проход.
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned<Token>>,
    pos: usize,
    /// Позиция последнего потреблённого токена
    prev_span: Span,
    ast: Ast,
}

impl<'a> Parser<'a> {
    /// Создать новый парсер. Лексические ошибки проявляются сразу.
    pub fn new(source: &'a str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            source,
            tokens,
            pos: 0,
            prev_span: Span::default(),
            ast: Ast::new(),
        })
    }

    /// Распарсить весь модуль.
    pub fn parse_module(mut self) -> Result<Ast, ParseError> {
        let mut body = Vec::new();
        while !self.check(&Token::Eof) {
            body.push(self.parse_statement()?);
        }
        let span = Span::new(0, self.source.len(), 1, 1);
        self.ast.root = self.ast.add_node(NodeKind::Module { body }, span);
        Ok(self.ast)
    }

    /// Распарсить одно выражение (весь ввод) и вернуть дерево и его корень.
    ///
    /// Корень дерева - модуль из одной инструкции-выражения.
    pub fn parse_single_expression(mut self) -> Result<(Ast, NodeId), ParseError> {
        let expr = self.parse_expression()?;
        if self.check(&Token::Newline) {
            self.advance();
        }
        self.expect(&Token::Eof, "end of expression")?;
        let span = self.ast.span(expr);
        let stmt = self.ast.add_node(NodeKind::ExprStmt { expr }, span);
        self.ast.root = self.ast.add_node(NodeKind::Module { body: vec![stmt] }, span);
        Ok((self.ast, expr))
    }

    // === Работа с токенами ===

    fn peek(&self) -> &Spanned<Token> {
        // Последний токен всегда Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].value
    }

    fn check(&self, token: &Token) -> bool {
        &self.peek().value == token
    }

    fn advance(&mut self) -> Spanned<Token> {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.prev_span = token.span;
        token
    }

    fn expect(&mut self, token: &Token, expected: &str) -> Result<Spanned<Token>, ParseError> {
        if self.check(token) {
            Ok(self.advance())
        } else {
            let found = self.peek();
            Err(ParseError::unexpected_token(found.span, expected, &found.value))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, Span), ParseError> {
        let token = self.peek().clone();
        match token.value {
            Token::Ident(name) => {
                self.advance();
                Ok((name, token.span))
            }
            Token::Reserved(kw) => Err(ParseError::unsupported(token.span, format!("'{}'", kw))),
            other => Err(ParseError::unexpected_token(token.span, expected, &other)),
        }
    }

    fn node(&mut self, kind: NodeKind, start: Span) -> NodeId {
        let span = start.merge(self.prev_span);
        self.ast.add_node(kind, span)
    }

    // === Инструкции ===

    fn parse_statement(&mut self) -> Result<NodeId, ParseError> {
        let token = self.peek().clone();
        match &token.value {
            Token::Def => self.parse_function_def(),
            Token::If => self.parse_if(),
            Token::Indent => Err(ParseError::syntax(token.span, "statement", "unexpected indent")),
            Token::Elif | Token::Else => Err(ParseError::unexpected_token(
                token.span,
                "statement",
                &token.value,
            )),
            Token::Reserved(kw) => Err(ParseError::unsupported(
                token.span,
                format!("'{}' statement", kw),
            )),
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.expect_line_end()?;
                Ok(stmt)
            }
        }
    }

    /// Конец простой инструкции: перевод строки или конец файла.
    fn expect_line_end(&mut self) -> Result<(), ParseError> {
        let token = self.peek().clone();
        match token.value {
            Token::Newline => {
                self.advance();
                Ok(())
            }
            Token::Eof | Token::Dedent => Ok(()),
            Token::Comma => Err(ParseError::unsupported(token.span, "tuple")),
            Token::Reserved(kw) => Err(ParseError::unsupported(
                token.span,
                format!("'{}' operator", kw),
            )),
            Token::If => Err(ParseError::unsupported(token.span, "conditional expression")),
            other => Err(ParseError::unexpected_token(token.span, "end of line", &other)),
        }
    }

    fn parse_simple_statement(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        match self.peek().value.clone() {
            Token::Return => {
                self.advance();
                let value = if matches!(
                    self.peek().value,
                    Token::Newline | Token::Eof | Token::Dedent
                ) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(self.node(NodeKind::Return { value }, start))
            }
            Token::Assert => {
                self.advance();
                let condition = self.parse_expression()?;
                let message = if self.check(&Token::Comma) {
                    self.advance();
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(self.node(NodeKind::Assert { condition, message }, start))
            }
            Token::Pass => {
                self.advance();
                Ok(self.node(NodeKind::Pass, start))
            }
            Token::Reserved(kw) => Err(ParseError::unsupported(start, format!("'{}' statement", kw))),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        let expr = self.parse_expression()?;

        let op = match self.peek().value {
            Token::Assign => None,
            Token::PlusAssign => Some(BinOp::Add),
            Token::MinusAssign => Some(BinOp::Sub),
            Token::StarAssign => Some(BinOp::Mul),
            Token::Colon => {
                return Err(ParseError::unsupported(self.peek().span, "annotated assignment"))
            }
            _ => return Ok(self.node(NodeKind::ExprStmt { expr }, start)),
        };

        let target = match self.ast.kind(expr) {
            Some(NodeKind::Identifier { name }) => name.clone(),
            other => {
                return Err(ParseError::unsupported(
                    self.ast.span(expr),
                    format!("assignment to {}", other.map_or("expression", |k| k.name())),
                ))
            }
        };
        self.advance();

        let rhs = self.parse_expression()?;
        if self.check(&Token::Assign) {
            return Err(ParseError::unsupported(self.peek().span, "chained assignment"));
        }

        let value = match op {
            None => rhs,
            Some(op) => {
                // x op= e  ==>  x = x op e
                let target_ref = self.ast.add_node(
                    NodeKind::Identifier {
                        name: target.clone(),
                    },
                    self.ast.span(expr),
                );
                self.node(
                    NodeKind::BinaryOp {
                        op,
                        left: target_ref,
                        right: rhs,
                    },
                    start,
                )
            }
        };
        Ok(self.node(NodeKind::Assign { target, value }, start))
    }

    fn parse_function_def(&mut self) -> Result<NodeId, ParseError> {
        let start = self.expect(&Token::Def, "'def'")?.span;
        let (name, _) = self.expect_ident("function name")?;
        self.expect(&Token::LParen, "'('")?;

        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let token = self.peek().clone();
            if matches!(token.value, Token::Star | Token::DoubleStar) {
                return Err(ParseError::unsupported(token.span, "variadic parameters"));
            }
            let (param_name, span) = self.expect_ident("parameter name")?;
            let annotation = if self.check(&Token::Colon) {
                self.advance();
                Some(self.parse_type()?)
            } else {
                None
            };
            if self.check(&Token::Assign) {
                return Err(ParseError::unsupported(
                    self.peek().span,
                    "default parameter value",
                ));
            }
            params.push(Param {
                name: param_name,
                annotation,
                span,
            });
            if !self.check(&Token::RParen) {
                self.expect(&Token::Comma, "',' or ')'")?;
            }
        }
        self.expect(&Token::RParen, "')'")?;

        let returns = if self.check(&Token::Arrow) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        Ok(self.node(
            NodeKind::FunctionDef {
                name,
                params,
                returns,
                body,
            },
            start,
        ))
    }

    fn parse_type(&mut self) -> Result<TypeExpr, ParseError> {
        let token = self.advance();
        let name = match token.value {
            Token::None => return Ok(TypeExpr::None),
            Token::Ident(name) => name,
            other => return Err(ParseError::unexpected_token(token.span, "type", &other)),
        };
        match name.as_str() {
            "int" => Ok(TypeExpr::Int),
            "bool" => Ok(TypeExpr::Bool),
            "str" => Ok(TypeExpr::Str),
            "list" | "List" => {
                if self.check(&Token::LBracket) {
                    self.advance();
                    let element = self.parse_type()?;
                    self.expect(&Token::RBracket, "']'")?;
                    Ok(TypeExpr::List(Some(Box::new(element))))
                } else {
                    Ok(TypeExpr::List(None))
                }
            }
            "Optional" => {
                self.expect(&Token::LBracket, "'['")?;
                let inner = self.parse_type()?;
                self.expect(&Token::RBracket, "']'")?;
                Ok(TypeExpr::Optional(Box::new(inner)))
            }
            other => Err(ParseError::unsupported(
                token.span,
                format!("type annotation '{}'", other),
            )),
        }
    }

    /// `:` NEWLINE INDENT stmt+ DEDENT, либо простая инструкция на той же строке.
    fn parse_block(&mut self) -> Result<Vec<NodeId>, ParseError> {
        self.expect(&Token::Colon, "':'")?;

        if !self.check(&Token::Newline) {
            let stmt = self.parse_simple_statement()?;
            self.expect_line_end()?;
            return Ok(vec![stmt]);
        }
        self.advance();
        self.expect(&Token::Indent, "indented block")?;

        let mut body = Vec::new();
        while !self.check(&Token::Dedent) && !self.check(&Token::Eof) {
            body.push(self.parse_statement()?);
        }
        if self.check(&Token::Dedent) {
            self.advance();
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> Result<NodeId, ParseError> {
        // `if` и `elif` разбираются одинаково
        let start = self.advance().span;
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;

        let else_body = match self.peek().value {
            Token::Elif => vec![self.parse_if()?],
            Token::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };

        Ok(self.node(
            NodeKind::If {
                condition,
                then_body,
                else_body,
            },
            start,
        ))
    }

    // === Выражения ===

    /// Разобрать выражение. Глубокая вложенность скобок растит стек
    /// вместо переполнения.
    pub fn parse_expression(&mut self) -> Result<NodeId, ParseError> {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || self.parse_comparison())
    }

    fn parse_comparison(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        let left = self.parse_additive()?;
        self.reject_word_operator()?;

        let op = match self.peek().value {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        self.reject_word_operator()?;

        if self.peek().value.is_comparison() {
            return Err(ParseError::unsupported(self.peek().span, "chained comparison"));
        }
        Ok(self.node(NodeKind::BinaryOp { op, left, right }, start))
    }

    /// `and`, `or`, `in`, `is`, `not in` после операнда.
    fn reject_word_operator(&self) -> Result<(), ParseError> {
        match &self.peek().value {
            Token::Reserved(kw) if matches!(kw.as_str(), "and" | "or" | "in" | "is" | "not") => Err(
                ParseError::unsupported(self.peek().span, format!("'{}' operator", kw)),
            ),
            _ => Ok(()),
        }
    }

    fn parse_additive(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().value {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.node(NodeKind::BinaryOp { op, left, right }, start);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().value {
                Token::Star => BinOp::Mul,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                Token::Slash => {
                    return Err(ParseError::unsupported(self.peek().span, "true division '/'"))
                }
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.node(NodeKind::BinaryOp { op, left, right }, start);
        }
    }

    fn parse_unary(&mut self) -> Result<NodeId, ParseError> {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || self.parse_unary_inner())
    }

    fn parse_unary_inner(&mut self) -> Result<NodeId, ParseError> {
        let token = self.peek().clone();
        match &token.value {
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(self.node(
                    NodeKind::UnaryOp {
                        op: UnaryOp::Neg,
                        operand,
                    },
                    token.span,
                ))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            Token::Reserved(kw) if kw == "not" => {
                Err(ParseError::unsupported(token.span, "'not' operator"))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        let mut expr = self.parse_primary()?;

        loop {
            let token = self.peek().clone();
            match token.value {
                Token::LParen => {
                    let func = match self.ast.kind(expr) {
                        Some(NodeKind::Identifier { name }) => name.clone(),
                        _ => {
                            return Err(ParseError::unsupported(
                                token.span,
                                "call of a non-name expression",
                            ))
                        }
                    };
                    let args = self.parse_call_args()?;
                    expr = self.node(NodeKind::Call { func, args }, start);
                }
                Token::Dot => {
                    self.advance();
                    let (method, method_span) = self.expect_ident("method name")?;
                    if !self.check(&Token::LParen) {
                        return Err(ParseError::unsupported(
                            method_span,
                            format!("attribute access '.{}'", method),
                        ));
                    }
                    let args = self.parse_call_args()?;
                    expr = self.node(
                        NodeKind::MethodCall {
                            receiver: expr,
                            method,
                            args,
                        },
                        start,
                    );
                }
                Token::LBracket => return Err(ParseError::unsupported(token.span, "subscript")),
                Token::DoubleStar => {
                    return Err(ParseError::unsupported(token.span, "power operator '**'"))
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<NodeId>, ParseError> {
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            let token = self.peek().clone();
            if matches!(token.value, Token::Star | Token::DoubleStar) {
                return Err(ParseError::unsupported(token.span, "argument unpacking"));
            }
            if matches!(token.value, Token::Ident(_)) && *self.peek_at(1) == Token::Assign {
                return Err(ParseError::unsupported(token.span, "keyword argument"));
            }
            args.push(self.parse_expression()?);
            if self.check(&Token::Reserved("for".to_string())) {
                return Err(ParseError::unsupported(self.peek().span, "generator expression"));
            }
            if !self.check(&Token::RParen) {
                self.expect(&Token::Comma, "',' or ')'")?;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParseError> {
        let token = self.advance();
        let span = token.span;
        match token.value {
            Token::Int(n) => Ok(self.node(NodeKind::Literal(Literal::Int(n)), span)),
            Token::String(s) => Ok(self.node(NodeKind::Literal(Literal::Str(s)), span)),
            Token::None => Ok(self.node(NodeKind::Literal(Literal::None), span)),
            Token::True => Ok(self.node(NodeKind::Literal(Literal::Bool(true)), span)),
            Token::False => Ok(self.node(NodeKind::Literal(Literal::Bool(false)), span)),
            Token::Ident(name) => Ok(self.node(NodeKind::Identifier { name }, span)),
            Token::FString(parts) => self.parse_fstring(parts, span),
            Token::LBracket => {
                let mut elements = Vec::new();
                while !self.check(&Token::RBracket) {
                    elements.push(self.parse_expression()?);
                    if self.check(&Token::Reserved("for".to_string())) {
                        return Err(ParseError::unsupported(
                            self.peek().span,
                            "list comprehension",
                        ));
                    }
                    if !self.check(&Token::RBracket) {
                        self.expect(&Token::Comma, "',' or ']'")?;
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(self.node(NodeKind::ListLiteral { elements }, span))
            }
            Token::LParen => {
                if self.check(&Token::RParen) {
                    return Err(ParseError::unsupported(span, "tuple"));
                }
                let inner = self.parse_expression()?;
                if self.check(&Token::Comma) {
                    return Err(ParseError::unsupported(self.peek().span, "tuple"));
                }
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBrace => Err(ParseError::unsupported(span, "dict or set literal")),
            Token::Reserved(kw) => Err(ParseError::unsupported(span, format!("'{}'", kw))),
            other => Err(ParseError::unexpected_token(span, "expression", &other)),
        }
    }

    /// Разобрать выражения внутри f-строки тем же парсером.
    fn parse_fstring(&mut self, raw: Vec<RawFStringPart>, span: Span) -> Result<NodeId, ParseError> {
        let mut parts = Vec::with_capacity(raw.len());
        for part in raw {
            match part {
                RawFStringPart::Text(text) => parts.push(FStringPart::Text(text)),
                RawFStringPart::Expr { source, offset } => {
                    let hole_span = Span::new(offset, offset + source.len(), span.line, span.column);
                    if let Some(construct) = hole_suffix(&source) {
                        return Err(ParseError::unsupported(hole_span, construct));
                    }
                    if source.trim().is_empty() {
                        return Err(ParseError::syntax(hole_span, "expression", "empty f-string hole"));
                    }
                    let tokens = Lexer::for_fragment(&source, self.source, offset).tokenize()?;
                    let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
                    let saved_pos = std::mem::replace(&mut self.pos, 0);
                    let saved_prev = self.prev_span;

                    let parsed = self
                        .parse_expression()
                        .and_then(|expr| self.expect(&Token::Eof, "'}'").map(|_| expr));

                    self.tokens = saved_tokens;
                    self.pos = saved_pos;
                    self.prev_span = saved_prev;
                    parts.push(FStringPart::Expr(parsed?));
                }
            }
        }
        Ok(self.ast.add_node(NodeKind::FString { parts }, span))
    }
}

/// Суффикс отверстия f-строки вне подмножества: `!r`, `:spec` или `=`.
/// Учитываются только символы верхнего уровня, вне строк и скобок,
/// так что `{a != b}` и `{f(x)}` остаются выражениями.
fn hole_suffix(source: &str) -> Option<&'static str> {
    let chars: Vec<char> = source.chars().collect();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        let next = chars.get(i + 1).copied();
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => return Some("f-string format spec"),
            '!' if depth == 0 && next != Some('=') => return Some("f-string conversion"),
            '=' if depth == 0 => {
                let prev = i.checked_sub(1).and_then(|p| chars.get(p)).copied();
                let paired = matches!(prev, Some('=' | '!' | '<' | '>')) || next == Some('=');
                if !paired && chars[i + 1..].iter().all(|c| c.is_whitespace()) {
                    return Some("f-string '=' specifier");
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Ast {
        Parser::new(source).unwrap().parse_module().unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        match Parser::new(source) {
            Ok(parser) => parser.parse_module().unwrap_err(),
            Err(e) => e,
        }
    }

    fn function<'a>(ast: &'a Ast, index: usize) -> (&'a str, &'a [Param], &'a [NodeId]) {
        let id = ast.module_body()[index];
        match ast.kind(id) {
            Some(NodeKind::FunctionDef {
                name, params, body, ..
            }) => (name, params, body),
            other => panic!("Expected FunctionDef, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_with_len() {
        let ast = parse("def my_len(x):\n    return len(x)\n");
        let (name, params, body) = function(&ast, 0);
        assert_eq!(name, "my_len");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "x");

        let Some(NodeKind::Return { value: Some(call) }) = ast.kind(body[0]) else {
            panic!("Expected return");
        };
        assert!(matches!(
            ast.kind(*call),
            Some(NodeKind::Call { func, args }) if func == "len" && args.len() == 1
        ));
    }

    #[test]
    fn test_parse_method_calls_and_if() {
        let source = "\
def process_list(items):
    \"\"\"Doc.\"\"\"
    if len(items) == 0:
        return None
    items.append(42)
    first = items.pop()
    return first
";
        let ast = parse(source);
        let (_, _, body) = function(&ast, 0);
        assert_eq!(body.len(), 5);
        assert!(ast.is_docstring(body[0]));
        assert!(matches!(ast.kind(body[1]), Some(NodeKind::If { .. })));
        let Some(NodeKind::ExprStmt { expr }) = ast.kind(body[2]) else {
            panic!("Expected expression statement");
        };
        assert!(matches!(
            ast.kind(*expr),
            Some(NodeKind::MethodCall { method, .. }) if method == "append"
        ));
        assert!(matches!(
            ast.kind(body[3]),
            Some(NodeKind::Assign { target, .. }) if target == "first"
        ));
    }

    #[test]
    fn test_parse_parent_links() {
        let ast = parse("def f(x):\n    return len(x)\n");
        let (_, _, body) = function(&ast, 0);
        let ret = body[0];
        let func = ast.module_body()[0];
        assert_eq!(ast.node(ret).unwrap().parent, Some(func));
        assert_eq!(ast.node(func).unwrap().parent, Some(ast.root));
    }

    #[test]
    fn test_parse_elif_else_chain() {
        let ast = parse("if a == 1:\n    pass\nelif a == 2:\n    pass\nelse:\n    pass\n");
        let Some(NodeKind::If { else_body, .. }) = ast.kind(ast.module_body()[0]) else {
            panic!("Expected if");
        };
        assert_eq!(else_body.len(), 1);
        assert!(matches!(
            ast.kind(else_body[0]),
            Some(NodeKind::If { else_body, .. }) if else_body.len() == 1
        ));
    }

    #[test]
    fn test_parse_annotations() {
        let ast = parse("def f(xs: list[int], flag: bool) -> Optional[int]:\n    pass\n");
        let Some(NodeKind::FunctionDef {
            params, returns, ..
        }) = ast.kind(ast.module_body()[0])
        else {
            panic!("Expected def");
        };
        assert_eq!(
            params[0].annotation,
            Some(TypeExpr::List(Some(Box::new(TypeExpr::Int))))
        );
        assert_eq!(params[1].annotation, Some(TypeExpr::Bool));
        assert_eq!(*returns, Some(TypeExpr::Optional(Box::new(TypeExpr::Int))));
    }

    #[test]
    fn test_parse_augmented_assignment() {
        let ast = parse("n += 2\n");
        let Some(NodeKind::Assign { target, value }) = ast.kind(ast.module_body()[0]) else {
            panic!("Expected assignment");
        };
        assert_eq!(target, "n");
        assert!(matches!(
            ast.kind(*value),
            Some(NodeKind::BinaryOp { op: BinOp::Add, .. })
        ));
    }

    #[test]
    fn test_parse_fstring_holes() {
        let ast = parse("print(f\"Length of {xs} is {len(xs)}\")\n");
        let fstring = ast
            .nodes
            .iter()
            .find_map(|n| match &n.kind {
                NodeKind::FString { parts } => Some(parts.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(fstring.len(), 4);
        let FStringPart::Expr(hole) = fstring[3] else {
            panic!("Expected expression hole");
        };
        assert!(matches!(ast.kind(hole), Some(NodeKind::Call { func, .. }) if func == "len"));
    }

    #[test]
    fn test_parse_precedence() {
        let ast = parse("x = 1 + 2 * 3\n");
        let Some(NodeKind::Assign { value, .. }) = ast.kind(ast.module_body()[0]) else {
            panic!("Expected assignment");
        };
        let Some(NodeKind::BinaryOp { op, right, .. }) = ast.kind(*value) else {
            panic!("Expected binary op");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            ast.kind(*right),
            Some(NodeKind::BinaryOp { op: BinOp::Mul, .. })
        ));
    }

    #[test]
    fn test_unsupported_constructs_fail_fast() {
        let cases = [
            ("for x in xs:\n    pass\n", "'for' statement"),
            ("while True:\n    pass\n", "'while' statement"),
            ("x = a / b\n", "true division '/'"),
            ("x = xs[0]\n", "subscript"),
            ("x = a < b < c\n", "chained comparison"),
            ("x = a and b\n", "'and' operator"),
            ("f(x=1)\n", "keyword argument"),
            ("x = {}\n", "dict or set literal"),
            ("def f(x=1):\n    pass\n", "default parameter value"),
            ("x = [y for y in z]\n", "list comprehension"),
            ("x = a.b\n", "attribute access '.b'"),
            ("x = lambda: 1\n", "'lambda'"),
        ];
        for (source, construct) in cases {
            match parse_err(source) {
                ParseError::UnsupportedConstruct { construct: c, .. } => {
                    assert_eq!(c, construct, "source: {:?}", source)
                }
                other => panic!("Expected UnsupportedConstruct for {:?}, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_syntax_error_reports_expected_and_found() {
        match parse_err("def f(x)\n    return x\n") {
            ParseError::SyntaxError {
                position,
                expected,
                found,
            } => {
                assert_eq!(expected, "':'");
                assert_eq!(found, "newline");
                assert_eq!(position.line, 1);
            }
            other => panic!("Expected SyntaxError, got {:?}", other),
        }
    }

    #[test]
    fn test_fstring_hole_with_inequality() {
        let ast = parse("def f(a: int, b: int):\n    print(f\"{a != b} {a == b}\")\n");
        let (_, _, body) = function(&ast, 0);
        let Some(NodeKind::ExprStmt { expr }) = ast.kind(body[0]) else {
            panic!("Expected expression statement");
        };
        let Some(NodeKind::Call { args, .. }) = ast.kind(*expr) else {
            panic!("Expected print call");
        };
        let Some(NodeKind::FString { parts }) = ast.kind(args[0]) else {
            panic!("Expected f-string");
        };
        let FStringPart::Expr(hole) = &parts[0] else {
            panic!("Expected hole, got {:?}", parts[0]);
        };
        assert!(matches!(
            ast.kind(*hole),
            Some(NodeKind::BinaryOp { op: BinOp::Ne, .. })
        ));
    }

    #[test]
    fn test_fstring_conversion_and_spec_rejected() {
        let cases = [
            ("x = f\"{y!r}\"\n", "f-string conversion"),
            ("x = f\"{y:>4}\"\n", "f-string format spec"),
            ("x = f\"{y=}\"\n", "f-string '=' specifier"),
        ];
        for (source, construct) in cases {
            match parse_err(source) {
                ParseError::UnsupportedConstruct { construct: c, .. } => {
                    assert_eq!(c, construct, "source: {:?}", source)
                }
                other => panic!("Expected UnsupportedConstruct for {:?}, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_deeply_nested_parentheses() {
        let depth = 5000;
        let source = format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        let ast = parse(&source);
        let Some(NodeKind::Assign { value, .. }) = ast.kind(ast.module_body()[0]) else {
            panic!("Expected assignment");
        };
        assert!(matches!(ast.kind(*value), Some(NodeKind::Literal(Literal::Int(1)))));

        let source = format!("x = {}1\n", "-".repeat(depth));
        parse(&source);
    }

    #[test]
    fn test_parse_single_line_block() {
        let ast = parse("def f(x): return x\n");
        let (_, _, body) = function(&ast, 0);
        assert_eq!(body.len(), 1);
    }
}
