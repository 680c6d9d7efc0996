//! Ошибки парсера.

use super::token::{Span, Token};
use thiserror::Error;

/// Ошибка парсинга.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Нарушение грамматики подмножества.
    #[error("Syntax error at {position}: expected {expected}, found {found}")]
    SyntaxError {
        position: Span,
        expected: String,
        found: String,
    },

    /// Конструкция Python, которую подмножество не поддерживает.
    #[error("Unsupported construct '{construct}' at {position}")]
    UnsupportedConstruct { construct: String, position: Span },
}

impl ParseError {
    /// Создать ошибку "неожиданный токен".
    pub fn unexpected_token(position: Span, expected: impl Into<String>, found: &Token) -> Self {
        Self::SyntaxError {
            position,
            expected: expected.into(),
            found: found.to_string(),
        }
    }

    /// Создать синтаксическую ошибку с произвольным описанием найденного.
    pub fn syntax(position: Span, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::SyntaxError {
            position,
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Создать ошибку "неподдерживаемая конструкция".
    pub fn unsupported(position: Span, construct: impl Into<String>) -> Self {
        Self::UnsupportedConstruct {
            construct: construct.into(),
            position,
        }
    }

    /// Получить позицию ошибки.
    pub fn span(&self) -> Span {
        match self {
            Self::SyntaxError { position, .. } => *position,
            Self::UnsupportedConstruct { position, .. } => *position,
        }
    }
}
