//! Типизированное промежуточное представление.
//!
//! Функция - плоский список операций над пронумерованными значениями.
//! Каждое значение определяется ровно один раз (SSA): изменение списка
//! порождает новую версию. Ветвление структурное: `Branch` содержит обе
//! ветки и таблицу слияний для переменных, перепривязанных внутри.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SymbolType;

/// Индекс значения в таблице функции.
pub type ValueId = u32;

/// Код операции. Имена (`LEN`, `APPEND`, ...) стабильны: по ним
/// операции ищутся в таблицах отображения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Opcode {
    LoadParam,
    LoadConst,
    BuildList,
    Store,
    Len,
    Append,
    Reverse,
    PopLast,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    Add,
    Sub,
    Mul,
    FloorDiv,
    Mod,
    Neg,
    WrapSome,
    Format,
    Print,
    Call,
    CallVoid,
    Branch,
    Return,
    ReturnVoid,
    Assert,
    Fail,
}

impl Opcode {
    /// Все коды операций.
    pub const ALL: &'static [Opcode] = &[
        Opcode::LoadParam,
        Opcode::LoadConst,
        Opcode::BuildList,
        Opcode::Store,
        Opcode::Len,
        Opcode::Append,
        Opcode::Reverse,
        Opcode::PopLast,
        Opcode::CmpEq,
        Opcode::CmpNe,
        Opcode::CmpLt,
        Opcode::CmpLe,
        Opcode::CmpGt,
        Opcode::CmpGe,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::FloorDiv,
        Opcode::Mod,
        Opcode::Neg,
        Opcode::WrapSome,
        Opcode::Format,
        Opcode::Print,
        Opcode::Call,
        Opcode::CallVoid,
        Opcode::Branch,
        Opcode::Return,
        Opcode::ReturnVoid,
        Opcode::Assert,
        Opcode::Fail,
    ];

    /// Стабильное имя операции.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::LoadParam => "LOAD_PARAM",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::BuildList => "BUILD_LIST",
            Opcode::Store => "STORE",
            Opcode::Len => "LEN",
            Opcode::Append => "APPEND",
            Opcode::Reverse => "REVERSE",
            Opcode::PopLast => "POP_LAST",
            Opcode::CmpEq => "CMP_EQ",
            Opcode::CmpNe => "CMP_NE",
            Opcode::CmpLt => "CMP_LT",
            Opcode::CmpLe => "CMP_LE",
            Opcode::CmpGt => "CMP_GT",
            Opcode::CmpGe => "CMP_GE",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::FloorDiv => "FLOOR_DIV",
            Opcode::Mod => "MOD",
            Opcode::Neg => "NEG",
            Opcode::WrapSome => "WRAP_SOME",
            Opcode::Format => "FORMAT",
            Opcode::Print => "PRINT",
            Opcode::Call => "CALL",
            Opcode::CallVoid => "CALL_VOID",
            Opcode::Branch => "BRANCH",
            Opcode::Return => "RETURN",
            Opcode::ReturnVoid => "RETURN_VOID",
            Opcode::Assert => "ASSERT",
            Opcode::Fail => "FAIL",
        }
    }

    /// Найти операцию по имени.
    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Бинарная ли это операция (сравнение или арифметика).
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::CmpEq
                | Opcode::CmpNe
                | Opcode::CmpLt
                | Opcode::CmpLe
                | Opcode::CmpGt
                | Opcode::CmpGe
                | Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::FloorDiv
                | Opcode::Mod
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Константа.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Bool(bool),
    Str(String),
    None,
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Bool(true) => write!(f, "True"),
            Constant::Bool(false) => write!(f, "False"),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::None => write!(f, "None"),
        }
    }
}

/// Часть форматируемой строки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormatPiece {
    Text(String),
    Value(ValueId),
}

/// Слияние значения после ветвления.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub dst: ValueId,
    /// Значение из ветки then (None, если ветка всегда возвращает)
    pub then_value: Option<ValueId>,
    pub else_value: Option<ValueId>,
}

/// Сведения о значении.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub ty: SymbolType,
    /// Имя переменной исходника, если значение к ней привязано
    pub name: Option<String>,
}

/// Параметр функции.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrParam {
    pub name: String,
    pub ty: SymbolType,
}

/// Операция IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrOp {
    LoadParam {
        dst: ValueId,
        index: usize,
    },
    LoadConst {
        dst: ValueId,
        value: Constant,
    },
    BuildList {
        dst: ValueId,
        elements: Vec<ValueId>,
    },
    /// Привязка значения к имени
    Store {
        dst: ValueId,
        src: ValueId,
    },
    Len {
        dst: ValueId,
        list: ValueId,
    },
    Append {
        list: ValueId,
        new_list: ValueId,
        value: ValueId,
    },
    Reverse {
        list: ValueId,
        new_list: ValueId,
    },
    PopLast {
        list: ValueId,
        new_list: ValueId,
        dst: ValueId,
    },
    /// Сравнения и арифметика
    Binary {
        opcode: Opcode,
        dst: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    Neg {
        dst: ValueId,
        operand: ValueId,
    },
    WrapSome {
        dst: ValueId,
        value: ValueId,
    },
    Format {
        dst: ValueId,
        pieces: Vec<FormatPiece>,
    },
    Print {
        value: ValueId,
    },
    Call {
        dst: ValueId,
        func: String,
        args: Vec<ValueId>,
    },
    CallVoid {
        func: String,
        args: Vec<ValueId>,
    },
    Branch {
        cond: ValueId,
        then_body: Vec<IrOp>,
        else_body: Vec<IrOp>,
        merges: Vec<Merge>,
    },
    Return {
        value: ValueId,
    },
    ReturnVoid,
    Assert {
        cond: ValueId,
    },
    /// Аварийное завершение с сообщением (ложный `assert` с текстом)
    Fail {
        message: ValueId,
    },
}

impl IrOp {
    /// Код операции.
    pub fn opcode(&self) -> Opcode {
        match self {
            IrOp::LoadParam { .. } => Opcode::LoadParam,
            IrOp::LoadConst { .. } => Opcode::LoadConst,
            IrOp::BuildList { .. } => Opcode::BuildList,
            IrOp::Store { .. } => Opcode::Store,
            IrOp::Len { .. } => Opcode::Len,
            IrOp::Append { .. } => Opcode::Append,
            IrOp::Reverse { .. } => Opcode::Reverse,
            IrOp::PopLast { .. } => Opcode::PopLast,
            IrOp::Binary { opcode, .. } => *opcode,
            IrOp::Neg { .. } => Opcode::Neg,
            IrOp::WrapSome { .. } => Opcode::WrapSome,
            IrOp::Format { .. } => Opcode::Format,
            IrOp::Print { .. } => Opcode::Print,
            IrOp::Call { .. } => Opcode::Call,
            IrOp::CallVoid { .. } => Opcode::CallVoid,
            IrOp::Branch { .. } => Opcode::Branch,
            IrOp::Return { .. } => Opcode::Return,
            IrOp::ReturnVoid => Opcode::ReturnVoid,
            IrOp::Assert { .. } => Opcode::Assert,
            IrOp::Fail { .. } => Opcode::Fail,
        }
    }

    /// Значения, определяемые операцией (без учёта вложенных веток).
    pub fn defs(&self) -> Vec<ValueId> {
        match self {
            IrOp::LoadParam { dst, .. }
            | IrOp::LoadConst { dst, .. }
            | IrOp::BuildList { dst, .. }
            | IrOp::Store { dst, .. }
            | IrOp::Len { dst, .. }
            | IrOp::Binary { dst, .. }
            | IrOp::Neg { dst, .. }
            | IrOp::WrapSome { dst, .. }
            | IrOp::Format { dst, .. }
            | IrOp::Call { dst, .. } => vec![*dst],
            IrOp::Append { new_list, .. } | IrOp::Reverse { new_list, .. } => vec![*new_list],
            IrOp::PopLast { new_list, dst, .. } => vec![*new_list, *dst],
            IrOp::Branch { merges, .. } => merges.iter().map(|m| m.dst).collect(),
            IrOp::Print { .. }
            | IrOp::CallVoid { .. }
            | IrOp::Return { .. }
            | IrOp::ReturnVoid
            | IrOp::Assert { .. }
            | IrOp::Fail { .. } => Vec::new(),
        }
    }

    /// Значения, используемые операцией (без учёта вложенных веток и слияний).
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            IrOp::LoadParam { .. } | IrOp::LoadConst { .. } | IrOp::ReturnVoid => Vec::new(),
            IrOp::BuildList { elements, .. } => elements.clone(),
            IrOp::Store { src, .. } => vec![*src],
            IrOp::Len { list, .. } | IrOp::Reverse { list, .. } | IrOp::PopLast { list, .. } => {
                vec![*list]
            }
            IrOp::Append { list, value, .. } => vec![*list, *value],
            IrOp::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            IrOp::Neg { operand, .. } => vec![*operand],
            IrOp::WrapSome { value, .. }
            | IrOp::Return { value }
            | IrOp::Print { value }
            | IrOp::Fail { message: value } => vec![*value],
            IrOp::Format { pieces, .. } => pieces
                .iter()
                .filter_map(|p| match p {
                    FormatPiece::Value(v) => Some(*v),
                    FormatPiece::Text(_) => None,
                })
                .collect(),
            IrOp::Call { args, .. } | IrOp::CallVoid { args, .. } => args.clone(),
            IrOp::Branch { cond, .. } => vec![*cond],
            IrOp::Assert { cond } => vec![*cond],
        }
    }

    /// Всегда ли операция передаёт управление из функции.
    pub fn terminates(&self) -> bool {
        match self {
            IrOp::Return { .. } | IrOp::ReturnVoid | IrOp::Fail { .. } => true,
            IrOp::Branch {
                then_body,
                else_body,
                ..
            } => block_terminates(then_body) && block_terminates(else_body),
            _ => false,
        }
    }
}

/// Завершается ли блок возвратом.
pub fn block_terminates(body: &[IrOp]) -> bool {
    body.iter().any(IrOp::terminates)
}

/// Ошибка проверки функции.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("in '{function}': value %{value} used by {op} before definition")]
    UseBeforeDef {
        function: String,
        value: ValueId,
        op: Opcode,
    },

    #[error("in '{function}': value %{value} defined twice")]
    Redefined { function: String, value: ValueId },

    #[error("in '{function}': value %{value} is not in the value table")]
    UnknownValue { function: String, value: ValueId },

    #[error("in '{function}': parameter index {index} out of range")]
    BadParam { function: String, index: usize },
}

/// Функция IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<IrParam>,
    pub return_type: SymbolType,
    pub values: Vec<ValueInfo>,
    pub body: Vec<IrOp>,
}

impl IrFunction {
    /// Создать пустую функцию.
    pub fn new(name: impl Into<String>, params: Vec<IrParam>, return_type: SymbolType) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            values: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Добавить значение в таблицу.
    pub fn new_value(&mut self, ty: SymbolType, name: Option<String>) -> ValueId {
        let id = self.values.len() as ValueId;
        self.values.push(ValueInfo { ty, name });
        id
    }

    /// Сведения о значении.
    pub fn value(&self, id: ValueId) -> Option<&ValueInfo> {
        self.values.get(id as usize)
    }

    /// Тип значения (`None`, если значения нет).
    pub fn value_type(&self, id: ValueId) -> SymbolType {
        self.value(id)
            .map(|v| v.ty.clone())
            .unwrap_or(SymbolType::NoneType)
    }

    /// Проверить, что каждое значение определено до использования в
    /// объемлющей области и определено ровно один раз.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let mut defined_ever = HashSet::new();
        let mut visible = HashSet::new();
        self.verify_block(&self.body, &mut visible, &mut defined_ever)
    }

    fn verify_block(
        &self,
        body: &[IrOp],
        visible: &mut HashSet<ValueId>,
        defined_ever: &mut HashSet<ValueId>,
    ) -> Result<(), VerifyError> {
        for op in body {
            for value in op.uses() {
                self.check_use(value, op.opcode(), visible)?;
            }

            if let IrOp::LoadParam { index, .. } = op {
                if *index >= self.params.len() {
                    return Err(VerifyError::BadParam {
                        function: self.name.clone(),
                        index: *index,
                    });
                }
            }

            if let IrOp::Branch {
                then_body,
                else_body,
                merges,
                ..
            } = op
            {
                let mut then_visible = visible.clone();
                self.verify_block(then_body, &mut then_visible, defined_ever)?;
                let mut else_visible = visible.clone();
                self.verify_block(else_body, &mut else_visible, defined_ever)?;
                for merge in merges {
                    if let Some(v) = merge.then_value {
                        self.check_use(v, Opcode::Branch, &then_visible)?;
                    }
                    if let Some(v) = merge.else_value {
                        self.check_use(v, Opcode::Branch, &else_visible)?;
                    }
                }
            }

            for value in op.defs() {
                if value as usize >= self.values.len() {
                    return Err(VerifyError::UnknownValue {
                        function: self.name.clone(),
                        value,
                    });
                }
                if !defined_ever.insert(value) {
                    return Err(VerifyError::Redefined {
                        function: self.name.clone(),
                        value,
                    });
                }
                visible.insert(value);
            }
        }
        Ok(())
    }

    fn check_use(
        &self,
        value: ValueId,
        op: Opcode,
        visible: &HashSet<ValueId>,
    ) -> Result<(), VerifyError> {
        if value as usize >= self.values.len() {
            return Err(VerifyError::UnknownValue {
                function: self.name.clone(),
                value,
            });
        }
        if !visible.contains(&value) {
            return Err(VerifyError::UseBeforeDef {
                function: self.name.clone(),
                value,
                op,
            });
        }
        Ok(())
    }

    /// Все коды операций функции, включая вложенные, в порядке обхода.
    pub fn opcodes(&self) -> Vec<Opcode> {
        fn walk(body: &[IrOp], out: &mut Vec<Opcode>) {
            for op in body {
                out.push(op.opcode());
                if let IrOp::Branch {
                    then_body,
                    else_body,
                    ..
                } = op
                {
                    walk(then_body, out);
                    walk(else_body, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.body, &mut out);
        out
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, body: &[IrOp], depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        for op in body {
            let defs = op.defs();
            let lhs = if defs.is_empty() || matches!(op, IrOp::Branch { .. }) {
                String::new()
            } else {
                let names: Vec<String> = defs.iter().map(|d| format!("%{}", d)).collect();
                format!("{} = ", names.join(", "))
            };
            let operands = match op {
                IrOp::LoadParam { index, .. } => index.to_string(),
                IrOp::LoadConst { value, .. } => value.to_string(),
                IrOp::Call { func, args, .. } | IrOp::CallVoid { func, args } => {
                    let args: Vec<String> = args.iter().map(|a| format!("%{}", a)).collect();
                    format!("{}({})", func, args.join(", "))
                }
                IrOp::Format { pieces, .. } => pieces
                    .iter()
                    .map(|p| match p {
                        FormatPiece::Text(t) => format!("{:?}", t),
                        FormatPiece::Value(v) => format!("%{}", v),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
                _ => op
                    .uses()
                    .iter()
                    .map(|u| format!("%{}", u))
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            let comment = defs
                .first()
                .and_then(|d| self.value(*d))
                .filter(|_| !matches!(op, IrOp::Branch { .. }))
                .map(|v| match &v.name {
                    Some(name) => format!("  ; {}: {}", name, v.ty),
                    None => format!("  ; {}", v.ty),
                })
                .unwrap_or_default();
            writeln!(
                f,
                "{}{}{} {}{}",
                indent,
                lhs,
                op.opcode(),
                operands,
                comment
            )?;

            if let IrOp::Branch {
                then_body,
                else_body,
                merges,
                ..
            } = op
            {
                writeln!(f, "{}then:", indent)?;
                self.fmt_block(f, then_body, depth + 1)?;
                writeln!(f, "{}else:", indent)?;
                self.fmt_block(f, else_body, depth + 1)?;
                for m in merges {
                    let show = |v: Option<ValueId>| v.map_or("-".to_string(), |v| format!("%{}", v));
                    writeln!(
                        f,
                        "{}%{} = MERGE {}, {}",
                        indent,
                        m.dst,
                        show(m.then_value),
                        show(m.else_value)
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        writeln!(
            f,
            "fn {}({}) -> {}",
            self.name,
            params.join(", "),
            self.return_type
        )?;
        self.fmt_block(f, &self.body, 1)
    }
}

/// Модуль IR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrModule {
    pub functions: Vec<IrFunction>,
    /// Точка входа (инструкции верхнего уровня)
    pub entry: Option<IrFunction>,
}

impl IrModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Найти функцию по имени.
    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Проверить все функции.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for function in self.functions.iter().chain(self.entry.iter()) {
            function.verify()?;
        }
        Ok(())
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, function) in self.functions.iter().chain(self.entry.iter()).enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
