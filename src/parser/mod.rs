//! Парсер Python-подмножества.
//!
//! Лексер на базе `logos` превращает отступы в токены `Indent`/`Dedent`,
//! парсер рекурсивным спуском строит [`Ast`].
//!
//! # Поддерживаемые конструкции
//!
//! ```python
//! def f(xs: list[int]) -> int:   # позиционные параметры, аннотации
//!     if len(xs) == 0:           # if / elif / else
//!         return 0
//!     xs.append(1)               # методы списков
//!     n = xs.pop()               # присваивание имени
//!     assert n == 1, "msg"
//!     print(f"len={len(xs)}")    # f-строки без спецификаторов
//!     return n
//! ```
//!
//! Всё остальное отвергается ошибкой [`ParseError::UnsupportedConstruct`]
//! с позицией конструкции.
//!
//! # Пример
//!
//! ```rust,ignore
//! use pytr::parser::parse;
//!
//! let ast = parse("def f(x):\n    return len(x)\n").unwrap();
//! ```

pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use error::ParseError;
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Span, Spanned, Token};

use crate::ast::{Ast, NodeId};

/// Парсит исходный текст модуля.
pub fn parse(source: &str) -> Result<Ast, ParseError> {
    Parser::new(source)?.parse_module()
}

/// Парсит одно выражение (например, вызов в фикстуре).
///
/// Возвращает дерево и ID узла выражения.
pub fn parse_expr(source: &str) -> Result<(Ast, NodeId), ParseError> {
    Parser::new(source)?.parse_single_expression()
}
