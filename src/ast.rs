//! Абстрактное синтаксическое дерево в виде арены узлов.
//!
//! Узлы хранятся в одном векторе и ссылаются друг на друга индексами.
//! Ссылка на родителя (`parent`) - обратный индекс, а не владение,
//! поэтому циклов в дереве нет.

use serde::{Deserialize, Serialize};

use crate::nodecodes::{BinOp, FStringPart, Literal, NodeKind};
use crate::parser::token::Span;

/// Индекс узла в арене.
pub type NodeId = u32;

/// Узел AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Позиция в исходном коде.
    pub span: Span,
    /// Родительский узел (None у корня).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
}

/// Дерево разбора одного модуля.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    pub nodes: Vec<AstNode>,
    /// Корневой узел `Module`.
    pub root: NodeId,
}

impl Ast {
    /// Создать новое пустое дерево.
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить узел. Потомки уже должны быть в арене: им проставляется родитель.
    pub fn add_node(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = self.nodes.len() as NodeId;
        for child in kind.children() {
            if let Some(node) = self.nodes.get_mut(child as usize) {
                node.parent = Some(id);
            }
        }
        self.nodes.push(AstNode {
            id,
            kind,
            span,
            parent: None,
        });
        id
    }

    /// Найти узел по ID.
    pub fn node(&self, id: NodeId) -> Option<&AstNode> {
        self.nodes.get(id as usize)
    }

    /// Вид узла по ID.
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    /// Позиция узла (нулевая, если узла нет).
    pub fn span(&self, id: NodeId) -> Span {
        self.node(id).map(|n| n.span).unwrap_or_default()
    }

    /// Инструкции верхнего уровня.
    pub fn module_body(&self) -> &[NodeId] {
        match self.kind(self.root) {
            Some(NodeKind::Module { body }) => body,
            _ => &[],
        }
    }

    /// Получить количество узлов.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Проверить, пусто ли дерево.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Является ли узел охраной `if __name__ == "__main__":`.
    pub fn is_main_guard(&self, id: NodeId) -> bool {
        let Some(NodeKind::If {
            condition,
            else_body,
            ..
        }) = self.kind(id)
        else {
            return false;
        };
        if !else_body.is_empty() {
            return false;
        }
        let Some(NodeKind::BinaryOp {
            op: BinOp::Eq,
            left,
            right,
        }) = self.kind(*condition)
        else {
            return false;
        };
        matches!(self.kind(*left), Some(NodeKind::Identifier { name }) if name == "__name__")
            && matches!(
                self.kind(*right),
                Some(NodeKind::Literal(Literal::Str(s))) if s == "__main__"
            )
    }

    /// Является ли инструкция строкой документации.
    pub fn is_docstring(&self, id: NodeId) -> bool {
        match self.kind(id) {
            Some(NodeKind::ExprStmt { expr }) => {
                matches!(self.kind(*expr), Some(NodeKind::Literal(Literal::Str(_))))
            }
            _ => false,
        }
    }

    /// Текстовый дамп дерева с отступами.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let detail = match &node.kind {
            NodeKind::FunctionDef { name, params, .. } => {
                let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                format!(" {}({})", name, names.join(", "))
            }
            NodeKind::Assign { target, .. } => format!(" {}", target),
            NodeKind::Call { func, .. } => format!(" {}", func),
            NodeKind::MethodCall { method, .. } => format!(" .{}", method),
            NodeKind::Identifier { name } => format!(" {}", name),
            NodeKind::Literal(lit) => format!(" {:?}", lit),
            NodeKind::BinaryOp { op, .. } => format!(" {}", op.symbol()),
            NodeKind::FString { parts } => {
                let text: String = parts
                    .iter()
                    .map(|p| match p {
                        FStringPart::Text(t) => t.clone(),
                        FStringPart::Expr(_) => "{}".to_string(),
                    })
                    .collect();
                format!(" {:?}", text)
            }
            _ => String::new(),
        };
        out.push_str(&format!(
            "{}{}{} @{}\n",
            indent,
            node.kind.name(),
            detail,
            node.span
        ));
        for child in node.kind.children() {
            self.dump_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_node_sets_parent_links() {
        let mut ast = Ast::new();
        let x = ast.add_node(
            NodeKind::Identifier {
                name: "x".to_string(),
            },
            Span::default(),
        );
        let call = ast.add_node(
            NodeKind::Call {
                func: "len".to_string(),
                args: vec![x],
            },
            Span::default(),
        );
        assert_eq!(ast.node(x).unwrap().parent, Some(call));
        assert_eq!(ast.node(call).unwrap().parent, None);
        assert_eq!(ast.node_count(), 2);
    }

    #[test]
    fn test_main_guard_detection() {
        let mut ast = Ast::new();
        let name = ast.add_node(
            NodeKind::Identifier {
                name: "__name__".to_string(),
            },
            Span::default(),
        );
        let main = ast.add_node(
            NodeKind::Literal(Literal::Str("__main__".to_string())),
            Span::default(),
        );
        let cond = ast.add_node(
            NodeKind::BinaryOp {
                op: BinOp::Eq,
                left: name,
                right: main,
            },
            Span::default(),
        );
        let guard = ast.add_node(
            NodeKind::If {
                condition: cond,
                then_body: vec![],
                else_body: vec![],
            },
            Span::default(),
        );
        assert!(ast.is_main_guard(guard));
        assert!(!ast.is_main_guard(cond));
    }
}
