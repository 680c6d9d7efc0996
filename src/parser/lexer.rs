//! Лексер для Python-подмножества.
//!
//! Токены внутри строки режет logos; структуру строк (`Newline`, `Indent`,
//! `Dedent`) восстанавливает обёртка [`Lexer`] по ведущим пробелам.

use std::collections::VecDeque;

use logos::Logos;

use super::error::ParseError;
use super::token::{RawFStringPart, Span, Spanned, Token};

/// Ширина табуляции при подсчёте отступа.
const TAB_WIDTH: usize = 8;

/// Внутренние токены для logos.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")] // Пропускаем пробелы внутри строки
#[logos(skip r"#[^\n]*")] // Комментарии до конца строки
#[logos(skip r"\\\r?\n")] // Явное продолжение строки
enum LogosToken {
    #[regex(r"\r?\n")]
    Newline,

    // Тройные кавычки (длиннее пустой строки `""`, поэтому выигрывают)
    #[token("\"\"\"", |lex| lex_triple_quoted(lex, "\"\"\""))]
    #[token("'''", |lex| lex_triple_quoted(lex, "'''"))]
    TripleString(String),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| { let s = lex.slice(); unescape_string(&s[1..s.len() - 1]) })]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| { let s = lex.slice(); unescape_string(&s[1..s.len() - 1]) })]
    String(String),

    #[regex(r#"[fF]"([^"\\\n]|\\.)*""#, lex_fstring)]
    #[regex(r#"[fF]'([^'\\\n]|\\.)*'"#, lex_fstring)]
    FString(Vec<RawFStringPart>),

    #[regex(r"[0-9][0-9_]*", |lex| lex.slice().replace('_', "").parse::<i64>().ok())]
    Int(i64),

    // Ключевые слова различаются после лексера
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Многосимвольные операторы
    #[token("**")]
    DoubleStar,
    #[token("//")]
    DoubleSlash,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("->")]
    Arrow,

    // Односимвольные
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
}

/// Дочитать строку в тройных кавычках до закрывающего разделителя.
fn lex_triple_quoted(lex: &mut logos::Lexer<'_, LogosToken>, delimiter: &str) -> Option<String> {
    let rest = lex.remainder();
    let end = rest.find(delimiter)?;
    let body = unescape_string(&rest[..end]);
    lex.bump(end + delimiter.len());
    Some(body)
}

/// Разбить f-строку на текст и исходники выражений.
fn lex_fstring(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<Vec<RawFStringPart>> {
    let slice = lex.slice();
    // f" ... "
    let body = &slice[2..slice.len() - 1];
    let body_offset = lex.span().start + 2;

    let mut parts = Vec::new();
    let mut text = String::new();
    let bytes = body.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                text.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                text.push('}');
                i += 2;
            }
            b'{' => {
                if !text.is_empty() {
                    parts.push(RawFStringPart::Text(unescape_string(&text)));
                    text.clear();
                }
                let start = i + 1;
                let mut depth = 1;
                let mut j = start;
                while j < bytes.len() {
                    match bytes[j] {
                        b'{' | b'[' | b'(' => depth += 1,
                        b'}' | b']' | b')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if j >= bytes.len() || bytes[j] != b'}' {
                    return None;
                }
                parts.push(RawFStringPart::Expr {
                    source: body[start..j].to_string(),
                    offset: body_offset + start,
                });
                i = j + 1;
            }
            // Одинокая `}` в f-строке недопустима
            b'}' => return None,
            _ => {
                let ch = body[i..].chars().next()?;
                text.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    if !text.is_empty() {
        parts.push(RawFStringPart::Text(unescape_string(&text)));
    }
    Some(parts)
}

/// Обработка escape-последовательностей в строке.
fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some('0') => result.push('\0'),
                Some('\n') => {}
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Ключевые слова Python, которые подмножество отвергает.
const RESERVED_KEYWORDS: &[&str] = &[
    "and", "as", "async", "await", "break", "class", "continue", "del", "except", "finally",
    "for", "from", "global", "import", "in", "is", "lambda", "nonlocal", "not", "or", "raise",
    "try", "while", "with", "yield",
];

/// Классифицировать идентификатор как ключевое слово.
fn keyword_or_ident(name: String) -> Token {
    if RESERVED_KEYWORDS.contains(&name.as_str()) {
        return Token::Reserved(name);
    }
    match name.as_str() {
        "def" => Token::Def,
        "return" => Token::Return,
        "if" => Token::If,
        "elif" => Token::Elif,
        "else" => Token::Else,
        "assert" => Token::Assert,
        "pass" => Token::Pass,
        "None" => Token::None,
        "True" => Token::True,
        "False" => Token::False,
        _ => Token::Ident(name.clone()),
    }
}

/// Лексер Python-подмножества с отслеживанием отступов.
pub struct Lexer<'a> {
    logos: logos::Lexer<'a, LogosToken>,
    source: &'a str,
    /// Смещения начала каждой строки
    line_starts: Vec<usize>,
    /// Стек уровней отступа
    indent_stack: Vec<usize>,
    /// Готовые к выдаче токены (Indent/Dedent и т.п.)
    pending: VecDeque<Spanned<Token>>,
    /// Глубина вложенности скобок: переводы строк внутри игнорируются
    bracket_depth: usize,
    /// Был ли на текущей логической строке значимый токен
    line_has_tokens: bool,
    /// Смещение для лексеров выражений внутри f-строк
    base_offset: usize,
    /// Лексер фрагмента: без Newline и отступов
    fragment: bool,
    started: bool,
    finished: bool,
}

impl<'a> Lexer<'a> {
    /// Создать новый лексер.
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));

        Self {
            logos: LogosToken::lexer(source),
            source,
            line_starts,
            indent_stack: vec![0],
            pending: VecDeque::new(),
            bracket_depth: 0,
            line_has_tokens: false,
            base_offset: 0,
            fragment: false,
            started: false,
            finished: false,
        }
    }

    /// Лексер для фрагмента, вырезанного из большего файла (выражения f-строк).
    ///
    /// Позиции считаются относительно `full_source`. Фрагмент не может
    /// содержать переводов строк, поэтому отступы в нём не отслеживаются.
    pub fn for_fragment(fragment: &'a str, full_source: &'a str, offset: usize) -> Self {
        let mut lexer = Self::new(fragment);
        lexer.line_starts = vec![0];
        lexer
            .line_starts
            .extend(full_source.match_indices('\n').map(|(i, _)| i + 1));
        lexer.base_offset = offset;
        lexer.fragment = true;
        lexer.started = true;
        lexer
    }

    /// Получить следующий токен.
    pub fn next_token(&mut self) -> Result<Spanned<Token>, ParseError> {
        if !self.started {
            self.started = true;
            self.check_first_line_indent()?;
        }

        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            if self.finished {
                let pos = self.base_offset + self.source.len();
                return Ok(Spanned::new(Token::Eof, self.span(pos, pos)));
            }
            self.read_token()?;
        }
    }

    /// Прочитать все токены до `Eof` включительно.
    pub fn tokenize(mut self) -> Result<Vec<Spanned<Token>>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.value, Token::Eof);
            tokens.push(token);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    /// Построить Span по абсолютным смещениям.
    fn span(&self, start: usize, end: usize) -> Span {
        let line_index = match self.line_starts.binary_search(&start) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Span::new(start, end, line_index + 1, start - self.line_starts[line_index] + 1)
    }

    /// Первая значимая строка файла не может быть с отступом.
    fn check_first_line_indent(&mut self) -> Result<(), ParseError> {
        if let Some((offset, width)) = self.next_logical_line(0) {
            if width > 0 {
                let span = self.span(offset, offset + width);
                return Err(ParseError::syntax(span, "statement", "unexpected indent"));
            }
        }
        Ok(())
    }

    /// Найти следующую непустую строку начиная со смещения `from`.
    /// Возвращает её начало и ширину отступа.
    fn next_logical_line(&self, from: usize) -> Option<(usize, usize)> {
        let mut offset = from;
        while offset < self.source.len() {
            let line_end = self.source[offset..]
                .find('\n')
                .map(|i| offset + i)
                .unwrap_or(self.source.len());
            let line = &self.source[offset..line_end];

            let mut width = 0;
            let mut content = "";
            for (i, ch) in line.char_indices() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                    '\x0c' => {}
                    _ => {
                        content = &line[i..];
                        break;
                    }
                }
            }

            let content = content.trim_end_matches('\r');
            if !content.is_empty() && !content.starts_with('#') {
                return Some((offset, width));
            }
            offset = line_end + 1;
        }
        None
    }

    /// Прочитать токен из logos и поставить результат в очередь.
    fn read_token(&mut self) -> Result<(), ParseError> {
        match self.logos.next() {
            Some(Ok(LogosToken::Newline)) => {
                if self.fragment || self.bracket_depth > 0 || !self.line_has_tokens {
                    return Ok(());
                }
                let range = self.logos.span();
                let span = self.span(range.start, range.end);
                self.pending.push_back(Spanned::new(Token::Newline, span));
                self.line_has_tokens = false;
                self.queue_indentation(range.end)
            }
            Some(Ok(logos_token)) => {
                let range = self.logos.span();
                let span = self.span(self.base_offset + range.start, self.base_offset + range.end);
                let token = self.convert_token(logos_token);
                match token {
                    Token::LParen | Token::LBracket | Token::LBrace => self.bracket_depth += 1,
                    Token::RParen | Token::RBracket | Token::RBrace => {
                        self.bracket_depth = self.bracket_depth.saturating_sub(1)
                    }
                    _ => {}
                }
                self.line_has_tokens = true;
                self.pending.push_back(Spanned::new(token, span));
                Ok(())
            }
            Some(Err(())) => {
                let range = self.logos.span();
                let span = self.span(self.base_offset + range.start, self.base_offset + range.end);
                Err(ParseError::syntax(
                    span,
                    "token",
                    format!("unexpected input {:?}", self.logos.slice()),
                ))
            }
            None => {
                let end = self.base_offset + self.source.len();
                let span = self.span(end, end);
                if self.line_has_tokens && !self.fragment {
                    self.pending.push_back(Spanned::new(Token::Newline, span));
                    self.line_has_tokens = false;
                }
                while self.indent_stack.len() > 1 {
                    self.indent_stack.pop();
                    self.pending.push_back(Spanned::new(Token::Dedent, span));
                }
                self.finished = true;
                Ok(())
            }
        }
    }

    /// Сравнить отступ следующей строки со стеком и выдать Indent/Dedent.
    fn queue_indentation(&mut self, from: usize) -> Result<(), ParseError> {
        let Some((offset, width)) = self.next_logical_line(from) else {
            // Хвост файла: Dedent выдаст обработка конца ввода
            return Ok(());
        };
        let span = self.span(offset, offset + width);
        let current = self.indent_stack.last().copied().unwrap_or(0);

        if width > current {
            self.indent_stack.push(width);
            self.pending.push_back(Spanned::new(Token::Indent, span));
        } else if width < current {
            while self.indent_stack.last().copied().unwrap_or(0) > width {
                self.indent_stack.pop();
                self.pending.push_back(Spanned::new(Token::Dedent, span));
            }
            if self.indent_stack.last().copied().unwrap_or(0) != width {
                return Err(ParseError::syntax(
                    span,
                    "indentation matching an outer block",
                    "inconsistent dedent",
                ));
            }
        }
        Ok(())
    }

    /// Конвертировать внутренний токен logos в публичный Token.
    fn convert_token(&self, logos_token: LogosToken) -> Token {
        match logos_token {
            LogosToken::Newline => Token::Newline,
            LogosToken::TripleString(s) | LogosToken::String(s) => Token::String(s),
            LogosToken::FString(parts) => Token::FString(
                parts
                    .into_iter()
                    .map(|part| match part {
                        RawFStringPart::Expr { source, offset } => RawFStringPart::Expr {
                            source,
                            offset: self.base_offset + offset,
                        },
                        text => text,
                    })
                    .collect(),
            ),
            LogosToken::Int(n) => Token::Int(n),
            LogosToken::Ident(s) => keyword_or_ident(s),
            LogosToken::DoubleStar => Token::DoubleStar,
            LogosToken::DoubleSlash => Token::DoubleSlash,
            LogosToken::EqEq => Token::EqEq,
            LogosToken::NotEq => Token::NotEq,
            LogosToken::Le => Token::Le,
            LogosToken::Ge => Token::Ge,
            LogosToken::PlusAssign => Token::PlusAssign,
            LogosToken::MinusAssign => Token::MinusAssign,
            LogosToken::StarAssign => Token::StarAssign,
            LogosToken::Arrow => Token::Arrow,
            LogosToken::Plus => Token::Plus,
            LogosToken::Minus => Token::Minus,
            LogosToken::Star => Token::Star,
            LogosToken::Slash => Token::Slash,
            LogosToken::Percent => Token::Percent,
            LogosToken::Lt => Token::Lt,
            LogosToken::Gt => Token::Gt,
            LogosToken::Assign => Token::Assign,
            LogosToken::LParen => Token::LParen,
            LogosToken::RParen => Token::RParen,
            LogosToken::LBracket => Token::LBracket,
            LogosToken::RBracket => Token::RBracket,
            LogosToken::LBrace => Token::LBrace,
            LogosToken::RBrace => Token::RBrace,
            LogosToken::Comma => Token::Comma,
            LogosToken::Colon => Token::Colon,
            LogosToken::Dot => Token::Dot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn test_lexer_basic() {
        assert_eq!(
            kinds("x = len(items)\n"),
            vec![
                Token::Ident("x".to_string()),
                Token::Assign,
                Token::Ident("len".to_string()),
                Token::LParen,
                Token::Ident("items".to_string()),
                Token::RParen,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_indentation() {
        let tokens = kinds("def f(x):\n    return x\n\ny = 1\n");
        assert!(tokens.contains(&Token::Indent));
        assert_eq!(tokens.iter().filter(|t| **t == Token::Dedent).count(), 1);
        let dedent = tokens.iter().position(|t| *t == Token::Dedent).unwrap();
        assert_eq!(tokens[dedent + 1], Token::Ident("y".to_string()));
    }

    #[test]
    fn test_lexer_blank_and_comment_lines() {
        let tokens = kinds("def f():\n\n    # comment\n    pass\n");
        assert_eq!(
            tokens,
            vec![
                Token::Def,
                Token::Ident("f".to_string()),
                Token::LParen,
                Token::RParen,
                Token::Colon,
                Token::Newline,
                Token::Indent,
                Token::Pass,
                Token::Newline,
                Token::Dedent,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_newlines_inside_brackets() {
        let tokens = kinds("x = [1,\n     2]\n");
        assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 1);
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn test_lexer_inconsistent_dedent() {
        let err = Lexer::new("def f():\n        pass\n    pass\n")
            .tokenize()
            .unwrap_err();
        assert!(matches!(err, ParseError::SyntaxError { .. }));
    }

    #[test]
    fn test_lexer_strings() {
        assert_eq!(
            kinds(r#"'a\'b' "c\nd""#)[..2],
            [
                Token::String("a'b".to_string()),
                Token::String("c\nd".to_string())
            ]
        );
    }

    #[test]
    fn test_lexer_docstring() {
        let tokens = kinds("def f():\n    \"\"\"Doc \"quoted\" text.\"\"\"\n    pass\n");
        assert!(tokens.contains(&Token::String("Doc \"quoted\" text.".to_string())));
    }

    #[test]
    fn test_lexer_fstring_parts() {
        let tokens = kinds(r#"f"Length of {xs} is {{n}}""#);
        match &tokens[0] {
            Token::FString(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], RawFStringPart::Text("Length of ".to_string()));
                assert_eq!(
                    parts[1],
                    RawFStringPart::Expr {
                        source: "xs".to_string(),
                        offset: 13
                    }
                );
                assert_eq!(parts[2], RawFStringPart::Text(" is {n}".to_string()));
            }
            other => panic!("Expected f-string, got {:?}", other),
        }
    }

    #[test]
    fn test_lexer_keywords_and_reserved() {
        assert_eq!(kinds("None")[0], Token::None);
        assert_eq!(kinds("while")[0], Token::Reserved("while".to_string()));
        assert_eq!(kinds("define")[0], Token::Ident("define".to_string()));
    }

    #[test]
    fn test_lexer_positions() {
        let tokens = Lexer::new("a\n  \nbb = 1\n").tokenize().unwrap();
        let bb = tokens
            .iter()
            .find(|t| t.value == Token::Ident("bb".to_string()))
            .unwrap();
        assert_eq!((bb.span.line, bb.span.column), (3, 1));
    }

    #[test]
    fn test_lexer_unexpected_character() {
        assert!(Lexer::new("x = $").tokenize().is_err());
    }
}
