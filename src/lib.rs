//! # pytr
//!
//! Транспилятор типизированного подмножества Python в Rust через
//! промежуточное представление на кодах операций.
//!
//! ## Основные модули
//!
//! - [`parser`] - лексер с отступами и парсер подмножества
//! - [`ast`] / [`nodecodes`] - AST в виде арены узлов
//! - [`type_checker`] - семантический анализ и вывод типов
//! - [`types`] - система типов подмножества
//! - [`ir`] / [`lower`] - IR и понижение в него
//! - [`mapping`] / [`emitter`] - таблицы отображения и генерация кода
//! - [`interpreter`] - эталонный интерпретатор с семантикой исходника
//! - [`harness`] - проверка эквивалентности исходника и артефакта
//! - [`compiler`] - конвейер целиком
//!
//! ## Пример
//!
//! ```rust,ignore
//! use pytr::{transpile, OperationMapping};
//!
//! let mapping = OperationMapping::rust()?;
//! let code = transpile("def my_len(x):\n    return len(x)\n", &mapping)?;
//! assert!(code.contains("x.len() as i64"));
//! ```

// === Фронтенд ===
pub mod ast;
pub mod nodecodes;
pub mod parser;

// === Анализ ===
pub mod type_checker;
pub mod types;

// === IR и бэкенд ===
pub mod emitter;
pub mod ir;
pub mod lower;
pub mod mapping;

// === Исполнение и проверка ===
pub mod harness;
pub mod interpreter;

pub mod compiler;
pub mod error;

// === Re-exports для удобства ===
pub use ast::{Ast, NodeId};
pub use compiler::{compile, compile_units, transpile, EmitKind, Unit};
pub use emitter::{emit, Emitter};
pub use error::{TranspileError, TranspileResult};
pub use harness::{
    check_equivalence, check_files, EquivalenceReport, Executor, Fixture, HarnessConfig,
    HarnessError, Observation, Outcome, Status,
};
pub use interpreter::{Interpreter, RuntimeError, Value};
pub use ir::{IrFunction, IrModule, IrOp, Opcode};
pub use lower::lower;
pub use mapping::OperationMapping;
pub use parser::{parse, parse_expr};
pub use type_checker::{analyze, check_types, infer_types, TypeChecker};
pub use types::SymbolType;
