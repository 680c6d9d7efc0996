//! Таблицы отображения операций IR в целевой язык.
//!
//! Таблица - версионированный JSON-файл: шаблон на каждый код операции,
//! отображение типов и литералов, синтаксические фрагменты и именованные
//! блоки прелюдии. Таблица для Rust встроена в библиотеку.
//!
//! # Шаблоны
//!
//! Подстановки записываются как `$name` или `${name}`; `${name:owned}` и
//! `${name:display}` применяют синтаксические модификаторы целевого языка.
//! `$$` - литеральный знак доллара. Многострочный шаблон задаётся массивом
//! строк.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{TranspileError, TranspileResult};
use crate::ir::{Constant, Opcode};
use crate::types::SymbolType;

/// Поддерживаемая версия формата таблиц.
pub const MAPPING_FORMAT_VERSION: u32 = 1;

/// Встроенная таблица для Rust.
pub const RUST_MAPPING_JSON: &str = include_str!("../mappings/rust.json");

const REQUIRED_TYPES: &[&str] = &["int", "bool", "str", "none", "list", "optional"];
const REQUIRED_LITERALS: &[&str] = &["int", "bool", "str", "none"];
const REQUIRED_SYNTAX: &[&str] = &[
    "function",
    "function_void",
    "entry",
    "param",
    "block_end",
    "tuple",
    "bind",
    "statement_end",
    "owned",
    "display",
    "indent",
];

/// Текст шаблона: строка или массив строк.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateText {
    Line(String),
    Lines(Vec<String>),
}

impl TemplateText {
    /// Строки шаблона.
    pub fn lines(&self) -> Vec<&str> {
        match self {
            TemplateText::Line(text) => text.split('\n').collect(),
            TemplateText::Lines(lines) => lines.iter().map(String::as_str).collect(),
        }
    }
}

/// Шаблон одной операции.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTemplate {
    pub template: TemplateText,
    /// Имена блоков прелюдии, нужных операции
    #[serde(default)]
    pub prelude: Vec<String>,
    /// Вариант шаблона для упрощённой формы (`BRANCH` без else и слияний)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate: Option<TemplateText>,
}

/// Таблица отображения для одного целевого языка.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMapping {
    pub target: String,
    pub version: u32,
    pub types: BTreeMap<String, String>,
    pub literals: BTreeMap<String, String>,
    pub syntax: BTreeMap<String, String>,
    /// Слова, которые нельзя использовать как идентификаторы
    #[serde(default)]
    pub reserved: Vec<String>,
    pub operations: BTreeMap<String, OperationTemplate>,
    #[serde(default)]
    pub preludes: BTreeMap<String, TemplateText>,
}

impl OperationMapping {
    /// Загрузить и проверить таблицу из JSON.
    pub fn from_json(json: &str) -> TranspileResult<Self> {
        let mapping: OperationMapping = serde_json::from_str(json)
            .map_err(|e| TranspileError::Mapping(format!("invalid JSON: {}", e)))?;
        mapping.validate()?;
        debug!(
            "Loaded mapping for '{}' v{}: {} operations, {} preludes",
            mapping.target,
            mapping.version,
            mapping.operations.len(),
            mapping.preludes.len()
        );
        Ok(mapping)
    }

    /// Загрузить таблицу из файла.
    pub fn from_file(path: impl AsRef<Path>) -> TranspileResult<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Встроенная таблица для Rust.
    pub fn rust() -> TranspileResult<Self> {
        Self::from_json(RUST_MAPPING_JSON)
    }

    fn validate(&self) -> TranspileResult<()> {
        if self.version != MAPPING_FORMAT_VERSION {
            return Err(TranspileError::Mapping(format!(
                "unsupported mapping version {} (expected {})",
                self.version, MAPPING_FORMAT_VERSION
            )));
        }
        let require = |table: &BTreeMap<String, String>, keys: &[&str], section: &str| {
            match keys.iter().find(|k| !table.contains_key(**k)) {
                Some(missing) => Err(TranspileError::Mapping(format!(
                    "section '{}' is missing '{}'",
                    section, missing
                ))),
                None => Ok(()),
            }
        };
        require(&self.types, REQUIRED_TYPES, "types")?;
        require(&self.literals, REQUIRED_LITERALS, "literals")?;
        require(&self.syntax, REQUIRED_SYNTAX, "syntax")?;

        for (name, op) in &self.operations {
            if Opcode::from_name(name).is_none() {
                return Err(TranspileError::Mapping(format!("unknown opcode '{}'", name)));
            }
            if let Some(missing) = op.prelude.iter().find(|p| !self.preludes.contains_key(*p)) {
                return Err(TranspileError::Mapping(format!(
                    "operation {} references unknown prelude '{}'",
                    name, missing
                )));
            }
        }
        Ok(())
    }

    /// Шаблон операции.
    pub fn operation(&self, opcode: Opcode) -> Option<&OperationTemplate> {
        self.operations.get(opcode.name())
    }

    /// Шаблон операции или ошибка `UnmappedOperation`.
    pub fn require(&self, opcode: Opcode) -> TranspileResult<&OperationTemplate> {
        self.operation(opcode)
            .ok_or_else(|| TranspileError::UnmappedOperation {
                op: opcode.name().to_string(),
                target: self.target.clone(),
            })
    }

    /// Синтаксический фрагмент (проверен при загрузке).
    pub fn syntax(&self, key: &str) -> &str {
        self.syntax.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Является ли слово зарезервированным в целевом языке.
    pub fn is_reserved(&self, word: &str) -> bool {
        self.reserved.iter().any(|r| r == word)
    }

    /// Запись типа в целевом языке.
    pub fn render_type(&self, ty: &SymbolType) -> String {
        let lookup = |key: &str| self.types.get(key).cloned().unwrap_or_default();
        match ty {
            SymbolType::Int | SymbolType::Var(_) => lookup("int"),
            SymbolType::Bool => lookup("bool"),
            SymbolType::Str => lookup("str"),
            SymbolType::NoneType => lookup("none"),
            SymbolType::List(inner) => lookup("list").replace("$0", &self.render_type(inner)),
            SymbolType::Optional(inner) => {
                lookup("optional").replace("$0", &self.render_type(inner))
            }
        }
    }

    /// Запись константы в целевом языке.
    pub fn render_literal(&self, value: &Constant) -> String {
        let (key, text) = match value {
            Constant::Int(n) => ("int", n.to_string()),
            Constant::Bool(b) => ("bool", b.to_string()),
            Constant::Str(s) => ("str", format!("{:?}", s)),
            Constant::None => ("none", String::new()),
        };
        let template = self.literals.get(key).map(String::as_str).unwrap_or("$v");
        let rendered =
            render_template(template, &mut |name, _| (name == "v").then(|| text.clone()));
        rendered.unwrap_or(text)
    }
}

/// Подставить значения в шаблон.
///
/// `lookup` получает имя подстановки и модификатор, возвращает `None` для
/// неизвестного имени.
pub fn render_template(
    template: &str,
    lookup: &mut dyn FnMut(&str, Option<&str>) -> Option<String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let (name, modifier) = match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
                continue;
            }
            Some('{') => {
                chars.next();
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => inner.push(ch),
                        None => return Err(format!("unterminated '${{' in template {:?}", template)),
                    }
                }
                match inner.split_once(':') {
                    Some((name, modifier)) => (name.to_string(), Some(modifier.to_string())),
                    None => (inner, None),
                }
            }
            _ => {
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                (name, None)
            }
        };
        if name.is_empty() {
            return Err(format!("dangling '$' in template {:?}", template));
        }
        match lookup(&name, modifier.as_deref()) {
            Some(value) => out.push_str(&value),
            None => return Err(format!("unknown placeholder '${}' in template {:?}", name, template)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rust_mapping_loads() {
        let mapping = OperationMapping::rust().unwrap();
        assert_eq!(mapping.target, "rust");
        assert_eq!(mapping.version, MAPPING_FORMAT_VERSION);
        for opcode in Opcode::ALL {
            assert!(mapping.operation(*opcode).is_some(), "missing {}", opcode);
        }
    }

    #[test]
    fn test_len_template() {
        let mapping = OperationMapping::rust().unwrap();
        let template = mapping.require(Opcode::Len).unwrap();
        let line = template.template.lines()[0];
        let rendered = render_template(line, &mut |name, _| match name {
            "dst" => Some("n".to_string()),
            "list" => Some("x".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(rendered, "let n = x.len() as i64;");
    }

    #[test]
    fn test_render_template_forms() {
        let mut lookup = |name: &str, modifier: Option<&str>| match (name, modifier) {
            ("v", None) => Some("7".to_string()),
            ("v", Some("owned")) => Some("7.clone()".to_string()),
            _ => None,
        };
        assert_eq!(render_template("${v}i64", &mut lookup).unwrap(), "7i64");
        assert_eq!(render_template("$v + $$", &mut lookup).unwrap(), "7 + $");
        assert_eq!(render_template("${v:owned}", &mut lookup).unwrap(), "7.clone()");
        assert!(render_template("$w", &mut lookup).is_err());
        assert!(render_template("${v", &mut lookup).is_err());
    }

    #[test]
    fn test_render_types_and_literals() {
        let mapping = OperationMapping::rust().unwrap();
        let ty = SymbolType::optional(SymbolType::list(SymbolType::Str));
        assert_eq!(mapping.render_type(&ty), "Option<Vec<String>>");
        assert_eq!(mapping.render_type(&SymbolType::NoneType), "()");
        assert_eq!(
            mapping.render_literal(&Constant::Str("a\"b".to_string())),
            "String::from(\"a\\\"b\")"
        );
        assert_eq!(mapping.render_literal(&Constant::Bool(true)), "true");
        assert_eq!(mapping.render_literal(&Constant::None), "None");
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let json = RUST_MAPPING_JSON.replacen("\"version\": 1", "\"version\": 2", 1);
        let err = OperationMapping::from_json(&json).unwrap_err();
        assert!(matches!(err, TranspileError::Mapping(ref m) if m.contains("version")));
    }

    #[test]
    fn test_unknown_prelude_rejected() {
        let json = RUST_MAPPING_JSON.replacen("[\"py_arith\"]", "[\"missing\"]", 1);
        let err = OperationMapping::from_json(&json).unwrap_err();
        assert!(matches!(err, TranspileError::Mapping(ref m) if m.contains("missing")));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let json = RUST_MAPPING_JSON.replacen("\"LEN\"", "\"LENGTH\"", 1);
        assert!(OperationMapping::from_json(&json).is_err());
    }

    #[test]
    fn test_missing_operation_is_unmapped() {
        let mut mapping = OperationMapping::rust().unwrap();
        mapping.operations.remove("REVERSE");
        let err = mapping.require(Opcode::Reverse).unwrap_err();
        assert!(matches!(
            err,
            TranspileError::UnmappedOperation { ref op, .. } if op == "REVERSE"
        ));
    }
}
