//! Конвейер транспиляции.
//!
//! Стадии идут строго по порядку: текст, токены, AST, аннотированный AST,
//! IR, текст на целевом языке. Ошибка любой стадии останавливает только
//! свою единицу трансляции.

use std::str::FromStr;

use log::{info, warn};

use crate::emitter::{emit, Emitter};
use crate::error::{TranspileError, TranspileResult};
use crate::ir::IrModule;
use crate::lower::lower;
use crate::mapping::OperationMapping;
use crate::parser::parse;
use crate::type_checker::{analyze, analyze_with_externals, FunctionSignature};

/// Что выводить.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitKind {
    Ast,
    Ir,
    /// Код на целевом языке
    #[default]
    Target,
}

impl FromStr for EmitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ast" => Ok(EmitKind::Ast),
            "ir" => Ok(EmitKind::Ir),
            "rust" | "target" => Ok(EmitKind::Target),
            other => Err(format!("unknown emit kind '{}' (expected ast, ir or rust)", other)),
        }
    }
}

/// Разбор, анализ и понижение до IR.
pub fn lower_source(source: &str) -> TranspileResult<IrModule> {
    let ast = parse(source)?;
    let typed = analyze(&ast)?;
    lower(&typed)
}

/// Транспилировать исходник в код на целевом языке.
pub fn transpile(source: &str, mapping: &OperationMapping) -> TranspileResult<String> {
    let ir = lower_source(source)?;
    emit(&ir, mapping)
}

/// Выполнить конвейер до нужной стадии и вернуть её текстовое представление.
pub fn compile(source: &str, kind: EmitKind, mapping: &OperationMapping) -> TranspileResult<String> {
    match kind {
        EmitKind::Ast => Ok(parse(source)?.dump()),
        EmitKind::Ir => Ok(lower_source(source)?.to_string()),
        EmitKind::Target => transpile(source, mapping),
    }
}

/// Единица трансляции.
#[derive(Debug, Clone)]
pub struct Unit {
    pub name: String,
    pub source: String,
}

/// Транспилировать несколько единиц; каждая получает свой результат.
pub fn compile_units(
    units: &[Unit],
    mapping: &OperationMapping,
) -> Vec<(String, TranspileResult<String>)> {
    let results: Vec<_> = units
        .iter()
        .map(|unit| {
            let result = transpile(&unit.source, mapping);
            if let Err(e) = &result {
                warn!("{}: {}", unit.name, e);
            }
            (unit.name.clone(), result)
        })
        .collect();
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    info!(
        "Compiled {} unit(s), {} failed",
        results.len() - failed,
        failed
    );
    results
}

/// Сгенерировать драйвер, печатающий результат вызова `call` функции
/// артефакта. Вызов типизируется по сигнатурам исходного модуля.
pub fn driver_for_call(
    call: &str,
    functions: &[FunctionSignature],
    mapping: &OperationMapping,
    module_name: &str,
    artifact_file: &str,
) -> TranspileResult<String> {
    let ast = parse(&format!("print({})\n", call))?;
    let typed = analyze_with_externals(&ast, functions)?;
    if !typed.functions.is_empty() {
        return Err(TranspileError::Emit(format!(
            "fixture '{}' must be a single call expression",
            call
        )));
    }
    let ir = lower(&typed)?;
    Emitter::new(mapping).emit_driver(&ir, module_name, artifact_file)
}
