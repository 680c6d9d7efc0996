//! Токены и позиции для парсера Python-подмножества.

use serde::{Deserialize, Serialize};

/// Позиция в исходном коде.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Начальная позиция (байт).
    pub start: usize,
    /// Конечная позиция (байт).
    pub end: usize,
    /// Строка (с 1).
    pub line: usize,
    /// Колонка (с 1).
    pub column: usize,
}

impl Span {
    /// Создать новый Span.
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Объединить два Span. Строка и колонка берутся у более раннего.
    pub fn merge(self, other: Span) -> Span {
        let (line, column) = if self.start <= other.start {
            (self.line, self.column)
        } else {
            (other.line, other.column)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
            column,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Токен с позицией.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

/// Фрагмент f-строки до разбора выражений.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFStringPart {
    /// Обычный текст (`{{` и `}}` уже раскрыты).
    Text(String),
    /// Исходный текст выражения между `{` и `}` и его смещение в файле.
    Expr { source: String, offset: usize },
}

/// Типы токенов.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Ключевые слова подмножества
    Def,
    Return,
    If,
    Elif,
    Else,
    Assert,
    Pass,
    None,
    True,
    False,

    /// Ключевое слово Python вне подмножества (`for`, `while`, `class`, ...).
    Reserved(String),

    /// Целое число
    Int(i64),
    /// Строковый литерал
    String(String),
    /// f-строка, разбитая на части
    FString(Vec<RawFStringPart>),
    /// Идентификатор
    Ident(String),

    // Операторы
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    Arrow,

    // Пунктуация
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,

    // Структура строк
    Newline,
    Indent,
    Dedent,

    /// Конец файла
    Eof,
}

impl Token {
    /// Является ли токен оператором сравнения.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Token::EqEq | Token::NotEq | Token::Lt | Token::Le | Token::Gt | Token::Ge
        )
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Def => write!(f, "'def'"),
            Token::Return => write!(f, "'return'"),
            Token::If => write!(f, "'if'"),
            Token::Elif => write!(f, "'elif'"),
            Token::Else => write!(f, "'else'"),
            Token::Assert => write!(f, "'assert'"),
            Token::Pass => write!(f, "'pass'"),
            Token::None => write!(f, "'None'"),
            Token::True => write!(f, "'True'"),
            Token::False => write!(f, "'False'"),
            Token::Reserved(s) => write!(f, "'{}'", s),
            Token::Int(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "{:?}", s),
            Token::FString(_) => write!(f, "f-string"),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::DoubleStar => write!(f, "'**'"),
            Token::Slash => write!(f, "'/'"),
            Token::DoubleSlash => write!(f, "'//'"),
            Token::Percent => write!(f, "'%'"),
            Token::EqEq => write!(f, "'=='"),
            Token::NotEq => write!(f, "'!='"),
            Token::Lt => write!(f, "'<'"),
            Token::Le => write!(f, "'<='"),
            Token::Gt => write!(f, "'>'"),
            Token::Ge => write!(f, "'>='"),
            Token::Assign => write!(f, "'='"),
            Token::PlusAssign => write!(f, "'+='"),
            Token::MinusAssign => write!(f, "'-='"),
            Token::StarAssign => write!(f, "'*='"),
            Token::Arrow => write!(f, "'->'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::LBrace => write!(f, "'{{'"),
            Token::RBrace => write!(f, "'}}'"),
            Token::Comma => write!(f, "','"),
            Token::Colon => write!(f, "':'"),
            Token::Dot => write!(f, "'.'"),
            Token::Newline => write!(f, "newline"),
            Token::Indent => write!(f, "indent"),
            Token::Dedent => write!(f, "dedent"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}
