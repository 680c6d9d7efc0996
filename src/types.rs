//! Система типов подмножества.
//!
//! Типы выражены так, как их видит исходный язык: `int`, `bool`, `str`,
//! `None`, `list[T]`, `Optional[T]`. Переменные типа (`Var`) существуют
//! только во время вывода и после него заменяются на конкретные типы.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nodecodes::TypeExpr;

/// Идентификатор переменной типа.
pub type TypeVarId = u32;

/// Тип значения.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolType {
    Int,
    Bool,
    Str,
    /// Тип `None` (результат `append`, функции без возвращаемого значения)
    NoneType,
    /// Однородный список
    List(Box<SymbolType>),
    /// `T` или `None`
    Optional(Box<SymbolType>),
    /// Переменная типа (только во время вывода)
    Var(TypeVarId),
}

impl SymbolType {
    pub fn list(element: SymbolType) -> Self {
        SymbolType::List(Box::new(element))
    }

    pub fn optional(inner: SymbolType) -> Self {
        SymbolType::Optional(Box::new(inner))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, SymbolType::List(_))
    }

    /// Тип элемента списка.
    pub fn element(&self) -> Option<&SymbolType> {
        match self {
            SymbolType::List(element) => Some(element),
            _ => None,
        }
    }

    /// Копируется ли значение без явного клонирования.
    pub fn is_copy(&self) -> bool {
        matches!(
            self,
            SymbolType::Int | SymbolType::Bool | SymbolType::NoneType | SymbolType::Var(_)
        )
    }

    /// Содержит ли тип переменные.
    pub fn has_vars(&self) -> bool {
        match self {
            SymbolType::Var(_) => true,
            SymbolType::List(inner) | SymbolType::Optional(inner) => inner.has_vars(),
            _ => false,
        }
    }

    /// Заменить оставшиеся переменные типа на `int`.
    pub fn default_vars(&self) -> SymbolType {
        match self {
            SymbolType::Var(_) => SymbolType::Int,
            SymbolType::List(inner) => SymbolType::list(inner.default_vars()),
            SymbolType::Optional(inner) => SymbolType::optional(inner.default_vars()),
            other => other.clone(),
        }
    }

    /// Построить тип из аннотации. `fresh` выдаёт переменные для `list` без параметра.
    pub fn from_annotation(annotation: &TypeExpr, fresh: &mut impl FnMut() -> SymbolType) -> Self {
        match annotation {
            TypeExpr::Int => SymbolType::Int,
            TypeExpr::Bool => SymbolType::Bool,
            TypeExpr::Str => SymbolType::Str,
            TypeExpr::None => SymbolType::NoneType,
            TypeExpr::List(Some(element)) => {
                SymbolType::list(SymbolType::from_annotation(element, fresh))
            }
            TypeExpr::List(None) => SymbolType::list(fresh()),
            TypeExpr::Optional(inner) => {
                SymbolType::optional(SymbolType::from_annotation(inner, fresh))
            }
        }
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolType::Int => write!(f, "int"),
            SymbolType::Bool => write!(f, "bool"),
            SymbolType::Str => write!(f, "str"),
            SymbolType::NoneType => write!(f, "None"),
            SymbolType::List(element) => write!(f, "list[{}]", element),
            SymbolType::Optional(inner) => write!(f, "Optional[{}]", inner),
            SymbolType::Var(id) => write!(f, "'t{}", id),
        }
    }
}

/// Ошибка унификации.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeMismatch {
    #[error("expected {expected}, found {found}")]
    Mismatch {
        expected: SymbolType,
        found: SymbolType,
    },

    #[error("infinite type: 't{var} occurs in {ty}")]
    InfiniteType { var: TypeVarId, ty: SymbolType },
}
