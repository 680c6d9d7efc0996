//! Определения видов узлов AST.

use serde::{Deserialize, Serialize};

use crate::ast::NodeId;
use crate::parser::token::Span;

/// Бинарные операторы подмножества.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// Сложение (+)
    Add,
    /// Вычитание (-)
    Sub,
    /// Умножение (*)
    Mul,
    /// Целочисленное деление с округлением вниз (//)
    FloorDiv,
    /// Остаток со знаком делителя (%)
    Mod,
    /// Равенство (==)
    Eq,
    /// Неравенство (!=)
    Ne,
    /// Меньше (<)
    Lt,
    /// Меньше или равно (<=)
    Le,
    /// Больше (>)
    Gt,
    /// Больше или равно (>=)
    Ge,
}

impl BinOp {
    /// Является ли оператор сравнением.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// Запись оператора в исходном языке.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

/// Унарные операторы.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Унарный минус
    Neg,
}

/// Литерал.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
    None,
}

/// Часть f-строки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStringPart {
    Text(String),
    Expr(NodeId),
}

/// Аннотация типа в исходнике (`list[int]`, `Optional[int]`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeExpr {
    Int,
    Bool,
    Str,
    None,
    /// `list` без параметра или `list[T]`
    List(Option<Box<TypeExpr>>),
    Optional(Box<TypeExpr>),
}

/// Позиционный параметр функции.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeExpr>,
    pub span: Span,
}

/// Виды узлов AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    // === Структура ===
    /// Модуль (корень дерева)
    Module { body: Vec<NodeId> },
    /// Определение функции
    FunctionDef {
        name: String,
        params: Vec<Param>,
        returns: Option<TypeExpr>,
        body: Vec<NodeId>,
    },

    // === Инструкции ===
    /// Условие с необязательной веткой else (`elif` разворачивается во вложенный If)
    If {
        condition: NodeId,
        then_body: Vec<NodeId>,
        else_body: Vec<NodeId>,
    },
    /// Возврат из функции
    Return { value: Option<NodeId> },
    /// Проверка утверждения
    Assert {
        condition: NodeId,
        message: Option<NodeId>,
    },
    /// Присваивание имени
    Assign { target: String, value: NodeId },
    /// Выражение как инструкция
    ExprStmt { expr: NodeId },
    /// Пустая инструкция
    Pass,

    // === Выражения ===
    /// Вызов по имени: `func(args)`
    Call { func: String, args: Vec<NodeId> },
    /// Вызов метода: `receiver.method(args)`
    MethodCall {
        receiver: NodeId,
        method: String,
        args: Vec<NodeId>,
    },
    /// Литерал списка
    ListLiteral { elements: Vec<NodeId> },
    /// Ссылка на имя
    Identifier { name: String },
    /// Литерал
    Literal(Literal),
    /// f-строка
    FString { parts: Vec<FStringPart> },
    /// Бинарная операция
    BinaryOp {
        op: BinOp,
        left: NodeId,
        right: NodeId,
    },
    /// Унарная операция
    UnaryOp { op: UnaryOp, operand: NodeId },
}

impl NodeKind {
    /// Короткое имя вида узла для сообщений и дампов.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Module { .. } => "Module",
            NodeKind::FunctionDef { .. } => "FunctionDef",
            NodeKind::If { .. } => "If",
            NodeKind::Return { .. } => "Return",
            NodeKind::Assert { .. } => "Assert",
            NodeKind::Assign { .. } => "Assign",
            NodeKind::ExprStmt { .. } => "ExprStmt",
            NodeKind::Pass => "Pass",
            NodeKind::Call { .. } => "Call",
            NodeKind::MethodCall { .. } => "MethodCall",
            NodeKind::ListLiteral { .. } => "ListLiteral",
            NodeKind::Identifier { .. } => "Identifier",
            NodeKind::Literal(_) => "Literal",
            NodeKind::FString { .. } => "FString",
            NodeKind::BinaryOp { .. } => "BinaryOp",
            NodeKind::UnaryOp { .. } => "UnaryOp",
        }
    }

    /// Прямые потомки узла в порядке исходника.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Module { body } => body.clone(),
            NodeKind::FunctionDef { body, .. } => body.clone(),
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => std::iter::once(*condition)
                .chain(then_body.iter().copied())
                .chain(else_body.iter().copied())
                .collect(),
            NodeKind::Return { value } => value.iter().copied().collect(),
            NodeKind::Assert { condition, message } => std::iter::once(*condition)
                .chain(message.iter().copied())
                .collect(),
            NodeKind::Assign { value, .. } => vec![*value],
            NodeKind::ExprStmt { expr } => vec![*expr],
            NodeKind::Call { args, .. } => args.clone(),
            NodeKind::MethodCall { receiver, args, .. } => std::iter::once(*receiver)
                .chain(args.iter().copied())
                .collect(),
            NodeKind::ListLiteral { elements } => elements.clone(),
            NodeKind::FString { parts } => parts
                .iter()
                .filter_map(|p| match p {
                    FStringPart::Expr(id) => Some(*id),
                    FStringPart::Text(_) => None,
                })
                .collect(),
            NodeKind::BinaryOp { left, right, .. } => vec![*left, *right],
            NodeKind::UnaryOp { operand, .. } => vec![*operand],
            NodeKind::Pass | NodeKind::Identifier { .. } | NodeKind::Literal(_) => Vec::new(),
        }
    }
}
