//! Генерация исходного кода по таблице отображения.
//!
//! Эмиттер не знает целевого языка: каждая операция IR выводится по
//! шаблону из [`OperationMapping`], синтаксис функций и веток берётся из
//! раздела `syntax`. Вывод детерминирован: одинаковый модуль и таблица
//! дают побайтно одинаковый текст.
//!
//! # Имена
//!
//! Параметры сохраняют имена исходника. Значение, привязанное к имени,
//! получает это имя, а при повторе `имя_1`, `имя_2`, ... Безымянные
//! временные значения называются `vN`. Зарезервированные слова целевого
//! языка и имена вида `vN` из исходника получают суффикс `_`.

use std::collections::{BTreeSet, HashSet};

use log::debug;

use crate::error::{TranspileError, TranspileResult};
use crate::ir::{block_terminates, FormatPiece, IrFunction, IrModule, IrOp, Opcode, ValueId};
use crate::mapping::{render_template, OperationMapping};
use crate::types::SymbolType;

/// Сгенерировать исходный код модуля.
pub fn emit(module: &IrModule, mapping: &OperationMapping) -> TranspileResult<String> {
    Emitter::new(mapping).emit(module)
}

/// Подстановка в шаблон операции.
enum Slot {
    Value(ValueId),
    Values(Vec<ValueId>),
    Text(String),
}

/// Генератор кода для одной таблицы отображения.
pub struct Emitter<'m> {
    mapping: &'m OperationMapping,
    /// Префикс вызовов пользовательских функций (`subject::` в драйвере)
    call_prefix: String,
}

impl<'m> Emitter<'m> {
    pub fn new(mapping: &'m OperationMapping) -> Self {
        Self {
            mapping,
            call_prefix: String::new(),
        }
    }

    pub fn with_call_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.call_prefix = prefix.into();
        self
    }

    /// Сгенерировать модуль: прелюдии, функции и точку входа.
    pub fn emit(&self, module: &IrModule) -> TranspileResult<String> {
        let taken: HashSet<String> = module
            .functions
            .iter()
            .map(|f| self.identifier(&f.name))
            .collect();

        let mut preludes = BTreeSet::new();
        let mut sections = Vec::new();
        for function in &module.functions {
            let lines = FunctionWriter::new(self, function, &taken, &mut preludes).write(false)?;
            sections.push(lines.join("\n"));
        }
        if let Some(entry) = &module.entry {
            let lines = FunctionWriter::new(self, entry, &taken, &mut preludes).write(true)?;
            sections.push(lines.join("\n"));
        }

        let output = self.assemble(&preludes, sections);
        debug!(
            "Emitted {} function(s) for target '{}': {} bytes",
            module.functions.len() + usize::from(module.entry.is_some()),
            self.mapping.target,
            output.len()
        );
        Ok(output)
    }

    /// Сгенерировать драйвер: точку входа `driver`, вызывающую функции
    /// артефакта `artifact_path`, подключённого как модуль `module_name`.
    pub fn emit_driver(
        &self,
        driver: &IrModule,
        module_name: &str,
        artifact_path: &str,
    ) -> TranspileResult<String> {
        let entry = driver
            .entry
            .as_ref()
            .ok_or_else(|| TranspileError::Emit("driver has no entry point".to_string()))?;
        let include = self
            .mapping
            .syntax
            .get("include_module")
            .ok_or_else(|| {
                TranspileError::Mapping(format!(
                    "target '{}' has no 'include_module' syntax",
                    self.mapping.target
                ))
            })?;
        let path = format!("{:?}", artifact_path);
        let include =
            self.render_syntax(include, &[("module", module_name), ("path", path.as_str())])?;

        let prefixed = Emitter {
            mapping: self.mapping,
            call_prefix: format!("{}::", module_name),
        };
        let taken = HashSet::from([module_name.to_string()]);
        let mut preludes = BTreeSet::new();
        let lines = FunctionWriter::new(&prefixed, entry, &taken, &mut preludes).write(true)?;

        Ok(self.assemble(&preludes, vec![include, lines.join("\n")]))
    }

    fn assemble(&self, preludes: &BTreeSet<String>, sections: Vec<String>) -> String {
        let mut chunks = Vec::new();
        if let Some(header) = self.mapping.syntax.get("header") {
            chunks.push(header.clone());
        }
        for name in preludes {
            if let Some(text) = self.mapping.preludes.get(name) {
                chunks.push(text.lines().join("\n"));
            }
        }
        chunks.extend(sections);
        let mut output = chunks.join("\n\n");
        output.push('\n');
        output
    }

    /// Имя функции или переменной, допустимое в целевом языке.
    fn identifier(&self, name: &str) -> String {
        let temp_like = name
            .strip_prefix('v')
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
        if temp_like || self.mapping.is_reserved(name) {
            format!("{}_", name)
        } else {
            name.to_string()
        }
    }

    fn render_syntax(&self, template: &str, slots: &[(&str, &str)]) -> TranspileResult<String> {
        let rendered = render_template(template, &mut |name, _| {
            slots
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        });
        rendered.map_err(TranspileError::Mapping)
    }

    fn syntax(&self, key: &str, slots: &[(&str, &str)]) -> TranspileResult<String> {
        self.render_syntax(self.mapping.syntax(key), slots)
    }
}

/// Генерация одной функции.
struct FunctionWriter<'e, 'm> {
    emitter: &'e Emitter<'m>,
    func: &'e IrFunction,
    names: Vec<String>,
    preludes: &'e mut BTreeSet<String>,
}

impl<'e, 'm> FunctionWriter<'e, 'm> {
    fn new(
        emitter: &'e Emitter<'m>,
        func: &'e IrFunction,
        taken: &HashSet<String>,
        preludes: &'e mut BTreeSet<String>,
    ) -> Self {
        let mut used = taken.clone();
        let names = func
            .values
            .iter()
            .enumerate()
            .map(|(id, info)| match &info.name {
                Some(hint) => {
                    let base = emitter.identifier(hint);
                    let mut candidate = base.clone();
                    let mut n = 1;
                    while !used.insert(candidate.clone()) {
                        candidate = format!("{}_{}", base, n);
                        n += 1;
                    }
                    candidate
                }
                None => format!("v{}", id),
            })
            .collect();
        Self {
            emitter,
            func,
            names,
            preludes,
        }
    }

    fn mapping(&self) -> &'m OperationMapping {
        self.emitter.mapping
    }

    fn write(mut self, is_entry: bool) -> TranspileResult<Vec<String>> {
        let header = if is_entry {
            self.emitter.syntax("entry", &[])?
        } else {
            let mut params = Vec::with_capacity(self.func.params.len());
            for (index, param) in self.func.params.iter().enumerate() {
                let name = self.param_name(index, &param.name);
                let ty = self.mapping().render_type(&param.ty);
                let slots = [("name", name.as_str()), ("type", ty.as_str())];
                params.push(self.emitter.syntax("param", &slots)?);
            }
            let name = self.emitter.identifier(&self.func.name);
            let params = params.join(", ");
            if self.func.return_type == SymbolType::NoneType {
                self.emitter
                    .syntax(
                        "function_void",
                        &[("name", name.as_str()), ("params", params.as_str())],
                    )?
            } else {
                let ret = self.mapping().render_type(&self.func.return_type);
                self.emitter.syntax(
                    "function",
                    &[
                        ("name", name.as_str()),
                        ("params", params.as_str()),
                        ("ret", ret.as_str()),
                    ],
                )?
            }
        };

        let func = self.func;
        let mut lines = vec![header];
        self.block(&func.body, 1, &mut lines)?;
        lines.push(self.mapping().syntax("block_end").to_string());
        Ok(lines)
    }

    fn param_name(&self, index: usize, fallback: &str) -> String {
        self.func
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::LoadParam { dst, index: i } if *i == index => {
                    self.names.get(*dst as usize).cloned()
                }
                _ => None,
            })
            .unwrap_or_else(|| self.emitter.identifier(fallback))
    }

    fn indent(&self, depth: usize) -> String {
        self.mapping().syntax("indent").repeat(depth)
    }

    fn block(&mut self, body: &[IrOp], depth: usize, out: &mut Vec<String>) -> TranspileResult<()> {
        for op in body {
            let template = self.mapping().require(op.opcode())?;
            self.preludes.extend(template.prelude.iter().cloned());

            if let IrOp::Branch { .. } = op {
                self.branch(op, depth, out)?;
                continue;
            }

            let slots = self.slots(op)?;
            for line in template.template.lines() {
                let rendered = self.render(op.opcode(), line, &slots)?;
                if !rendered.trim().is_empty() {
                    out.push(format!("{}{}", self.indent(depth), rendered));
                }
            }
        }
        Ok(())
    }

    fn branch(&mut self, op: &IrOp, depth: usize, out: &mut Vec<String>) -> TranspileResult<()> {
        let IrOp::Branch {
            cond,
            then_body,
            else_body,
            merges,
        } = op
        else {
            return Ok(());
        };
        let template = self.mapping().require(Opcode::Branch)?;
        let text = match &template.alternate {
            Some(alternate) if else_body.is_empty() && merges.is_empty() => alternate,
            _ => &template.template,
        };

        let (bind, end) = if merges.is_empty() {
            (String::new(), String::new())
        } else {
            let items: Vec<&str> = merges.iter().map(|m| self.name(m.dst)).collect();
            let items = items.join(", ");
            let bind = self.emitter.syntax("bind", &[("items", items.as_str())])?;
            (bind, self.mapping().syntax("statement_end").to_string())
        };
        let slots = vec![
            ("cond", Slot::Value(*cond)),
            ("bind", Slot::Text(bind)),
            ("end", Slot::Text(end)),
        ];

        for line in text.lines() {
            match line.trim() {
                "$then" => {
                    let values: Vec<Option<ValueId>> = merges.iter().map(|m| m.then_value).collect();
                    self.arm(then_body, &values, depth + 1, out)?;
                }
                "$else" => {
                    let values: Vec<Option<ValueId>> = merges.iter().map(|m| m.else_value).collect();
                    self.arm(else_body, &values, depth + 1, out)?;
                }
                _ => {
                    let rendered = self.render(Opcode::Branch, line, &slots)?;
                    if !rendered.trim().is_empty() {
                        out.push(format!("{}{}", self.indent(depth), rendered));
                    }
                }
            }
        }
        Ok(())
    }

    /// Тело ветки и, если ветка не завершается возвратом, кортеж
    /// значений для слияния.
    fn arm(
        &mut self,
        body: &[IrOp],
        values: &[Option<ValueId>],
        depth: usize,
        out: &mut Vec<String>,
    ) -> TranspileResult<()> {
        self.block(body, depth, out)?;
        if values.is_empty() || block_terminates(body) {
            return Ok(());
        }
        let mut items = Vec::with_capacity(values.len());
        for value in values {
            let value = value.ok_or_else(|| {
                TranspileError::Emit(format!(
                    "in '{}': merge has no value from a branch that falls through",
                    self.func.name
                ))
            })?;
            items.push(self.name(value));
        }
        let items = items.join(", ");
        let tail = self.emitter.syntax("tuple", &[("items", items.as_str())])?;
        out.push(format!("{}{}", self.indent(depth), tail));
        Ok(())
    }

    fn name(&self, value: ValueId) -> &str {
        self.names
            .get(value as usize)
            .map(String::as_str)
            .unwrap_or("_")
    }

    /// Значение, которое передаётся во владение: именованное значение
    /// некопируемого типа копируется.
    fn owned(&self, value: ValueId) -> TranspileResult<String> {
        let name = self.name(value);
        match self.func.value(value) {
            Some(info) if info.name.is_some() && !info.ty.is_copy() => {
                self.emitter.syntax("owned", &[("v", name)])
            }
            _ => Ok(name.to_string()),
        }
    }

    fn display(&self, value: ValueId) -> TranspileResult<String> {
        self.emitter.syntax("display", &[("v", self.name(value))])
    }

    fn slot_text(&self, value: ValueId, modifier: Option<&str>) -> Option<String> {
        match modifier {
            None => Some(self.name(value).to_string()),
            Some("owned") => self.owned(value).ok(),
            Some("display") => self.display(value).ok(),
            Some(_) => None,
        }
    }

    fn render(&self, opcode: Opcode, line: &str, slots: &[(&str, Slot)]) -> TranspileResult<String> {
        let rendered = render_template(line, &mut |name, modifier| {
            let (_, slot) = slots.iter().find(|(key, _)| *key == name)?;
            match slot {
                Slot::Value(v) => self.slot_text(*v, modifier),
                Slot::Values(values) => values
                    .iter()
                    .map(|v| self.slot_text(*v, modifier))
                    .collect::<Option<Vec<_>>>()
                    .map(|items| items.join(", ")),
                Slot::Text(text) => modifier.is_none().then(|| text.clone()),
            }
        });
        rendered.map_err(|e| TranspileError::Mapping(format!("{}: {}", opcode, e)))
    }

    fn slots(&self, op: &IrOp) -> TranspileResult<Vec<(&'static str, Slot)>> {
        let typed = match op {
            IrOp::PopLast { dst, .. } => Some(*dst),
            _ => op.defs().first().copied(),
        };
        let mut slots = match op {
            IrOp::LoadParam { dst, index } => vec![
                ("dst", Slot::Value(*dst)),
                ("index", Slot::Text(index.to_string())),
            ],
            IrOp::LoadConst { dst, value } => vec![
                ("dst", Slot::Value(*dst)),
                ("value", Slot::Text(self.mapping().render_literal(value))),
            ],
            IrOp::BuildList { dst, elements } => vec![
                ("dst", Slot::Value(*dst)),
                ("elements", Slot::Values(elements.clone())),
            ],
            IrOp::Store { dst, src } => vec![("dst", Slot::Value(*dst)), ("src", Slot::Value(*src))],
            IrOp::Len { dst, list } => {
                vec![("dst", Slot::Value(*dst)), ("list", Slot::Value(*list))]
            }
            IrOp::Append {
                list,
                new_list,
                value,
            } => vec![
                ("list", Slot::Value(*list)),
                ("new_list", Slot::Value(*new_list)),
                ("value", Slot::Value(*value)),
            ],
            IrOp::Reverse { list, new_list } => vec![
                ("list", Slot::Value(*list)),
                ("new_list", Slot::Value(*new_list)),
            ],
            IrOp::PopLast {
                list,
                new_list,
                dst,
            } => vec![
                ("list", Slot::Value(*list)),
                ("new_list", Slot::Value(*new_list)),
                ("dst", Slot::Value(*dst)),
            ],
            IrOp::Binary { dst, lhs, rhs, .. } => vec![
                ("dst", Slot::Value(*dst)),
                ("lhs", Slot::Value(*lhs)),
                ("rhs", Slot::Value(*rhs)),
            ],
            IrOp::Neg { dst, operand } => vec![
                ("dst", Slot::Value(*dst)),
                ("operand", Slot::Value(*operand)),
            ],
            IrOp::WrapSome { dst, value } => {
                vec![("dst", Slot::Value(*dst)), ("value", Slot::Value(*value))]
            }
            IrOp::Format { dst, pieces } => {
                // Строка формата с `{}` на месте каждого значения
                let mut fmt = String::new();
                let mut tail = String::new();
                let mut args = Vec::new();
                for piece in pieces {
                    match piece {
                        FormatPiece::Text(text) => {
                            fmt.push_str(&text.replace('{', "{{").replace('}', "}}"))
                        }
                        FormatPiece::Value(v) => {
                            fmt.push_str("{}");
                            tail.push_str(", ");
                            tail.push_str(&self.display(*v)?);
                            args.push(*v);
                        }
                    }
                }
                vec![
                    ("dst", Slot::Value(*dst)),
                    ("fmt", Slot::Text(format!("{:?}", fmt))),
                    ("args_tail", Slot::Text(tail)),
                    ("args", Slot::Values(args)),
                ]
            }
            IrOp::Print { value } | IrOp::Return { value } => vec![("value", Slot::Value(*value))],
            IrOp::Call { dst, func, args } => vec![
                ("dst", Slot::Value(*dst)),
                ("func", Slot::Text(self.callee(func))),
                ("args", Slot::Values(args.clone())),
            ],
            IrOp::CallVoid { func, args } => vec![
                ("func", Slot::Text(self.callee(func))),
                ("args", Slot::Values(args.clone())),
            ],
            IrOp::Assert { cond } => vec![("cond", Slot::Value(*cond))],
            IrOp::Fail { message } => vec![("message", Slot::Value(*message))],
            IrOp::ReturnVoid | IrOp::Branch { .. } => Vec::new(),
        };
        if let Some(value) = typed {
            let ty = self.mapping().render_type(&self.func.value_type(value));
            slots.push(("type", Slot::Text(ty)));
        }
        Ok(slots)
    }

    fn callee(&self, func: &str) -> String {
        format!("{}{}", self.emitter.call_prefix, self.emitter.identifier(func))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower;
    use crate::parser::parse;
    use crate::type_checker::{analyze, analyze_with_externals};

    fn rust() -> OperationMapping {
        OperationMapping::rust().unwrap()
    }

    fn emit_source(source: &str) -> TranspileResult<String> {
        let ast = parse(source).expect("parse failed");
        let ir = lower(&analyze(&ast)?)?;
        emit(&ir, &rust())
    }

    const PROCESS_LIST: &str = "\
def process_list(items):
    if len(items) == 0:
        return None
    items.append(42)
    items.append(99)
    size = len(items)
    items.reverse()
    first = items.pop()
    return first
";

    #[test]
    fn test_tracer_bullet_len() {
        let code = emit_source("def my_len(x):\n    return len(x)\n").unwrap();
        assert!(code.starts_with("// Generated by pytr. Do not edit.\n"));
        assert!(code.contains("pub fn my_len(x: Vec<i64>) -> i64 {\n"));
        assert!(code.contains("    let v1 = x.len() as i64;\n"));
        assert!(code.contains("    return v1;\n}\n"));
        assert!(!code.contains("fn main"));
    }

    #[test]
    fn test_process_list_versions() {
        let code = emit_source(PROCESS_LIST).unwrap();
        assert!(code.contains("pub fn process_list(items: Vec<i64>) -> Option<i64> {"));
        assert!(code.contains("    if v3 {\n        let v4: Option<i64> = None;\n        return v4;\n    }\n"));
        assert!(code.contains("let mut items_1 = items;"));
        assert!(code.contains("items_1.push(v5);"));
        assert!(code.contains("let size = items_2.len() as i64;"));
        assert!(code.contains("let first = items_4.pop().expect(\"pop from empty list\");"));
        assert!(code.contains("let v13 = Some(first);"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let first = emit_source(PROCESS_LIST).unwrap();
        let second = emit_source(PROCESS_LIST).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unmapped_operation() {
        let ast = parse(PROCESS_LIST).unwrap();
        let ir = lower(&analyze(&ast).unwrap()).unwrap();
        let mut mapping = rust();
        mapping.operations.remove("REVERSE");
        let err = emit(&ir, &mapping).unwrap_err();
        assert!(matches!(
            err,
            TranspileError::UnmappedOperation { ref op, ref target } if op == "REVERSE" && target == "rust"
        ));
    }

    #[test]
    fn test_branch_with_merge_binds_tuple() {
        let source = "\
def f(xs: list[int], flag: bool) -> int:
    if flag:
        xs.append(1)
    return len(xs)
";
        let code = emit_source(source).unwrap();
        assert!(code.contains("    let (xs_2,) = if flag {\n"));
        assert!(code.contains("        xs_1.push(v2);\n        (xs_1,)\n    } else {\n        (xs,)\n    };\n"));
        assert!(code.contains("let v5 = xs_2.len() as i64;"));
    }

    #[test]
    fn test_reserved_and_temp_like_names() {
        let code = emit_source("def f(fn, v1):\n    return len(fn) + len(v1)\n").unwrap();
        assert!(code.contains("pub fn f(fn_: Vec<i64>, v1_: Vec<i64>) -> i64 {"));
        assert!(code.contains("fn_.len()"));
    }

    #[test]
    fn test_prelude_emitted_once() {
        let source = "\
def h(a: int, b: int) -> int:
    return a // b + a % b + a // 2
";
        let code = emit_source(source).unwrap();
        assert_eq!(code.matches("pub fn py_floordiv").count(), 1);
        assert!(code.contains("py_floordiv(a, b)"));
        assert!(!code.contains("pub trait PyStr"));
    }

    #[test]
    fn test_print_entry() {
        let code = emit_source("print(1, \"a\")\n").unwrap();
        assert!(code.contains("pub trait PyStr"));
        assert!(code.contains("fn main() {\n"));
        assert!(code.contains("let v1: String = String::from(\"a\");"));
        assert!(code.contains("let v2 = format!(\"{} {}\", v0.py_str(), v1.py_str());"));
        assert!(code.contains("println!(\"{}\", v2);"));
    }

    #[test]
    fn test_assert_message_renders_in_else_arm() {
        let source = "\
def f(xs: list[int]) -> int:
    assert len(xs) > 0, f\"{xs.pop()}\"
    return len(xs)
";
        let code = emit_source(source).unwrap();
        assert!(code.contains("} else {\n        let mut xs_1 = xs;"), "{}", code);
        assert!(code.contains("panic!(\"{}\", "));
        assert!(!code.contains("assert!("));
        assert!(code.contains("xs.len() as i64;\n    return"), "{}", code);
    }

    #[test]
    fn test_named_string_is_cloned_on_store() {
        let code = emit_source("a = \"x\"\nb = a\nprint(a, b)\n").unwrap();
        assert!(code.contains("let b = a.clone();"));
    }

    #[test]
    fn test_driver_calls_through_module() {
        let ast = parse("def my_len(x):\n    return len(x)\n").unwrap();
        let typed = analyze(&ast).unwrap();
        let fixture = parse("print(my_len([1, 2]))\n").unwrap();
        let driver_ir = lower(&analyze_with_externals(&fixture, &typed.functions).unwrap()).unwrap();

        let mapping = rust();
        let driver = Emitter::new(&mapping)
            .emit_driver(&driver_ir, "subject", "artifact.rs")
            .unwrap();
        assert!(driver.contains("mod subject {\n    include!(\"artifact.rs\");\n}"));
        assert!(driver.contains("subject::my_len(v2)"));
        assert!(driver.contains("fn main() {"));
        assert!(!driver.contains("pub fn my_len"));
    }
}
