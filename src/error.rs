//! Ошибки транспиляции.
//!
//! Одна ошибка описывает один отказ одной стадии конвейера: разбор,
//! семантический анализ, понижение в IR или генерацию кода.

use crate::ast::NodeId;
use crate::parser::{ParseError, Span};
use thiserror::Error;

/// Основной тип `Result` для библиотеки.
pub type TranspileResult<T> = Result<T, TranspileError>;

/// Перечисление всех ошибок времени компиляции.
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("Syntax error at {position}: expected {expected}, found {found}")]
    SyntaxError {
        position: Span,
        expected: String,
        found: String,
    },

    #[error("Unsupported construct '{construct}' at {position}")]
    UnsupportedConstruct { construct: String, position: Span },

    #[error("Unbound name '{identifier}' at {position}")]
    UnboundName { identifier: String, position: Span },

    #[error("Type error at {position}: {reason}")]
    TypeError {
        node: NodeId,
        position: Span,
        reason: String,
    },

    #[error("Unsupported operation '{name}' at {position}")]
    UnsupportedOperation { name: String, position: Span },

    #[error("Lowering error at {position}: {reason}")]
    LoweringError {
        node: NodeId,
        position: Span,
        reason: String,
    },

    #[error("Operation {op} has no mapping for target '{target}'")]
    UnmappedOperation { op: String, target: String },

    #[error("Mapping table error: {0}")]
    Mapping(String),

    #[error("Code generation error: {0}")]
    Emit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Поддерживаемые операции над списками: запись в исходнике и в Rust.
pub const SUPPORTED_OPERATIONS: &[(&str, &str)] = &[
    ("len(xs)", "xs.len()"),
    ("xs.append(v)", "xs.push(v)"),
    ("xs.reverse()", "xs.reverse()"),
    ("xs.pop()", "xs.pop()"),
];

/// Имя операции без получателя, точки и скобок: `xs.append(v)` -> `append`.
fn operation_name(text: &str) -> &str {
    let text = text.trim_start_matches('.');
    let text = text.strip_prefix("xs.").unwrap_or(text);
    text.split('(').next().unwrap_or(text)
}

/// Поддерживаемые операции, похожие на `name`.
///
/// Сначала точные совпадения имени (в исходнике или в Rust), затем
/// совпадения по подстроке, в порядке таблицы. Если похожих нет -
/// первые три операции таблицы.
pub fn find_similar_operations(name: &str) -> Vec<(&'static str, &'static str)> {
    let query = operation_name(name);
    let mut ranked = Vec::new();
    if !query.is_empty() {
        for (index, &(source, target)) in SUPPORTED_OPERATIONS.iter().enumerate() {
            let names = [operation_name(source), operation_name(target)];
            if names.contains(&query) {
                ranked.push((0, index));
            } else if names.iter().any(|n| n.contains(query) || query.contains(n)) {
                ranked.push((1, index));
            }
        }
    }
    if ranked.is_empty() {
        return SUPPORTED_OPERATIONS.iter().take(3).copied().collect();
    }
    ranked.sort();
    ranked
        .into_iter()
        .map(|(_, index)| SUPPORTED_OPERATIONS[index])
        .collect()
}

impl TranspileError {
    /// Подсказка для пользователя, если для ошибки она есть.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::UnsupportedOperation { name, .. } => {
                let mut text = String::from("Closest supported operations:\n");
                for (source, target) in find_similar_operations(name) {
                    text.push_str(&format!("  {:<14} -> {}\n", source, target));
                }
                Some(text)
            }
            Self::UnsupportedConstruct { .. } => Some(
                "Supported statements: def, return, if/elif/else, assert, pass, assignment"
                    .to_string(),
            ),
            Self::UnmappedOperation { op, .. } => Some(format!(
                "Add an entry for \"{}\" to the \"operations\" table of the mapping file",
                op
            )),
            _ => None,
        }
    }

    /// Позиция в исходнике, если ошибка к ней привязана.
    pub fn position(&self) -> Option<Span> {
        match self {
            Self::SyntaxError { position, .. }
            | Self::UnsupportedConstruct { position, .. }
            | Self::UnboundName { position, .. }
            | Self::TypeError { position, .. }
            | Self::UnsupportedOperation { position, .. }
            | Self::LoweringError { position, .. } => Some(*position),
            _ => None,
        }
    }
}

impl From<ParseError> for TranspileError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::SyntaxError {
                position,
                expected,
                found,
            } => Self::SyntaxError {
                position,
                expected,
                found,
            },
            ParseError::UnsupportedConstruct {
                construct,
                position,
            } => Self::UnsupportedConstruct {
                construct,
                position,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_operation_hint_lists_operations() {
        let err = TranspileError::UnsupportedOperation {
            name: "sorted".to_string(),
            position: Span::new(0, 6, 1, 1),
        };
        let hint = err.hint().unwrap();
        assert!(hint.contains("Closest supported operations"));
        assert!(hint.contains("xs.push(v)"));
        assert_eq!(err.to_string(), "Unsupported operation 'sorted' at 1:1");
    }

    #[test]
    fn test_similar_operations_ranked_by_name() {
        // Имя Rust-метода находит операцию исходника
        assert_eq!(
            find_similar_operations(".push()"),
            vec![("xs.append(v)", "xs.push(v)")]
        );
        assert_eq!(
            find_similar_operations(".pop(index)"),
            vec![("xs.pop()", "xs.pop()")]
        );
        assert_eq!(
            find_similar_operations("reversed()"),
            vec![("xs.reverse()", "xs.reverse()")]
        );
    }

    #[test]
    fn test_similar_operations_fall_back_to_first_three() {
        let similar = find_similar_operations("sorted()");
        assert_eq!(similar.len(), 3);
        assert_eq!(similar[0], SUPPORTED_OPERATIONS[0]);
        assert!(find_similar_operations(".insert()").len() == 3);

        let err = TranspileError::UnsupportedOperation {
            name: ".push()".to_string(),
            position: Span::new(0, 6, 1, 1),
        };
        let hint = err.hint().unwrap();
        assert!(hint.contains("xs.append(v)"));
        assert!(!hint.contains("len(xs)"));
    }

    #[test]
    fn test_parse_error_conversion_keeps_position() {
        let parse = ParseError::unsupported(Span::new(4, 9, 2, 3), "while");
        let err: TranspileError = parse.into();
        assert!(matches!(err, TranspileError::UnsupportedConstruct { .. }));
        assert_eq!(err.position().map(|p| p.line), Some(2));
    }
}
