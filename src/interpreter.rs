//! Эталонный интерпретатор подмножества.
//!
//! Выполняет AST с семантикой исходного языка: списки разделяются по
//! ссылке, `//` и `%` округляют вниз, `print` выводит `str()` значений.
//! Вывод собирается в буфер, а не пишется в stdout, поэтому
//! интерпретатор служит исполнителем для проверки эквивалентности без
//! внешнего `python3`.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, trace};
use thiserror::Error;

use crate::ast::{Ast, NodeId};
use crate::nodecodes::{BinOp, FStringPart, Literal, NodeKind, UnaryOp};

/// Глубина вызовов, после которой выполнение прерывается (как
/// ограничение рекурсии по умолчанию в CPython).
pub const RECURSION_LIMIT: usize = 1000;

/// Ошибка времени выполнения.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("IndexError: pop from empty list")]
    EmptyContainer,

    #[error("AssertionError{}", .0.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    AssertionFailed(Option<String>),

    #[error("ZeroDivisionError: integer division or modulo by zero")]
    ZeroDivision,

    #[error("OverflowError: integer result does not fit in 64 bits")]
    Overflow,

    #[error("RecursionError: maximum recursion depth exceeded")]
    RecursionLimit,

    #[error("NameError: name '{0}' is not defined")]
    UnboundName(String),

    #[error("TypeError: {0}")]
    Type(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Значение времени выполнения.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    None,
    /// Список разделяется между всеми ссылками на него
    List(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Истинность значения.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::None => false,
            Value::List(items) => !items.borrow().is_empty(),
        }
    }

    /// Представление, как его печатает `repr()`.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => repr_str(s),
            other => other.to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::None => "NoneType",
            Value::List(_) => "list",
        }
    }
}

/// `str()` значения.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Str(s) => write!(f, "{}", s),
            Value::None => write!(f, "None"),
            Value::List(items) => {
                let items: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            for (l, r) in x.iter().zip(y.iter()) {
                if l != r {
                    return compare(l, r);
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

fn floor_div(a: i64, b: i64) -> RuntimeResult<i64> {
    if b == 0 {
        return Err(RuntimeError::ZeroDivision);
    }
    let q = a.checked_div(b).ok_or(RuntimeError::Overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(a: i64, b: i64) -> RuntimeResult<i64> {
    if b == 0 {
        return Err(RuntimeError::ZeroDivision);
    }
    let r = a.checked_rem(b).ok_or(RuntimeError::Overflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

/// Результат выполнения инструкции.
enum Flow {
    Next,
    Return(Value),
}

#[derive(Debug, Default)]
struct CallFrame {
    locals: HashMap<String, Value>,
}

/// Интерпретатор одного модуля.
pub struct Interpreter<'a> {
    module: &'a Ast,
    /// Функции модуля: имя -> узел определения
    functions: HashMap<String, NodeId>,
    globals: HashMap<String, Value>,
    call_stack: Vec<CallFrame>,
    output: String,
}

impl<'a> Interpreter<'a> {
    pub fn new(module: &'a Ast) -> Self {
        Self {
            module,
            functions: HashMap::new(),
            globals: HashMap::new(),
            call_stack: Vec::new(),
            output: String::new(),
        }
    }

    /// Выполнить модуль как программу (`__name__ == "__main__"`).
    pub fn run_main(&mut self) -> RuntimeResult<()> {
        self.run_module("__main__")
    }

    /// Выполнить модуль как импортируемый: охрана `__main__` не срабатывает.
    pub fn import(&mut self, name: &str) -> RuntimeResult<()> {
        self.run_module(name)
    }

    fn run_module(&mut self, name: &str) -> RuntimeResult<()> {
        debug!("Interpreting module as '{}'", name);
        self.globals
            .insert("__name__".to_string(), Value::Str(name.to_string()));
        let module = self.module;
        for &stmt in module.module_body() {
            if let Flow::Return(_) = self.exec_statement(module, stmt)? {
                return Err(RuntimeError::Type("'return' outside function".to_string()));
            }
        }
        Ok(())
    }

    /// Вычислить выражение `expr` из дерева `ast` (например, вызов из
    /// фикстуры) в глобальном окружении модуля.
    pub fn eval(&mut self, ast: &Ast, expr: NodeId) -> RuntimeResult<Value> {
        self.eval_expr(ast, expr)
    }

    /// Вызвать функцию модуля.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let def = *self
            .functions
            .get(name)
            .ok_or_else(|| RuntimeError::UnboundName(name.to_string()))?;
        let module = self.module;
        let Some(NodeKind::FunctionDef { params, body, .. }) = module.kind(def) else {
            return Err(RuntimeError::Type(format!("'{}' is not callable", name)));
        };
        if params.len() != args.len() {
            return Err(RuntimeError::Type(format!(
                "{}() takes {} positional arguments but {} were given",
                name,
                params.len(),
                args.len()
            )));
        }
        if self.call_stack.len() + 1 >= RECURSION_LIMIT {
            return Err(RuntimeError::RecursionLimit);
        }

        let locals = params
            .iter()
            .map(|p| p.name.clone())
            .zip(args)
            .collect();
        trace!("call {}", name);
        self.call_stack.push(CallFrame { locals });
        let result = self.exec_block(module, body);
        self.call_stack.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::None),
        }
    }

    /// Напечатать значение, как это делает `print(value)`.
    pub fn print_value(&mut self, value: &Value) {
        self.output.push_str(&value.to_string());
        self.output.push('\n');
    }

    /// Накопленный вывод `print`.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    fn resolve_variable(&self, name: &str) -> Option<&Value> {
        self.call_stack
            .last()
            .and_then(|frame| frame.locals.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn assign(&mut self, name: &str, value: Value) {
        match self.call_stack.last_mut() {
            Some(frame) => frame.locals.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    fn exec_block(&mut self, ast: &Ast, body: &[NodeId]) -> RuntimeResult<Flow> {
        for &stmt in body {
            if let Flow::Return(value) = self.exec_statement(ast, stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn exec_statement(&mut self, ast: &Ast, stmt: NodeId) -> RuntimeResult<Flow> {
        let kind = ast
            .kind(stmt)
            .ok_or_else(|| RuntimeError::Type(format!("node {} not found", stmt)))?;
        match kind {
            NodeKind::FunctionDef { name, .. } => {
                if !self.call_stack.is_empty() {
                    return Err(RuntimeError::Type(
                        "nested function definitions are not supported".to_string(),
                    ));
                }
                self.functions.insert(name.clone(), stmt);
            }
            NodeKind::Pass => {}
            NodeKind::ExprStmt { expr } => {
                self.eval_expr(ast, *expr)?;
            }
            NodeKind::Assign { target, value } => {
                let value = self.eval_expr(ast, *value)?;
                self.assign(target, value);
            }
            NodeKind::Return { value } => {
                let value = match value {
                    Some(v) => self.eval_expr(ast, *v)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            NodeKind::Assert { condition, message } => {
                if !self.eval_expr(ast, *condition)?.truthy() {
                    let message = match message {
                        Some(m) => Some(self.eval_expr(ast, *m)?.to_string()),
                        None => None,
                    };
                    return Err(RuntimeError::AssertionFailed(message));
                }
            }
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let branch = if self.eval_expr(ast, *condition)?.truthy() {
                    then_body
                } else {
                    else_body
                };
                return self.exec_block(ast, branch);
            }
            other => {
                return Err(RuntimeError::Type(format!(
                    "{} is not a statement",
                    other.name()
                )))
            }
        }
        Ok(Flow::Next)
    }

    fn eval_expr(&mut self, ast: &Ast, expr: NodeId) -> RuntimeResult<Value> {
        // Глубокая вложенность выражений не должна переполнять стек
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || self.eval_expr_inner(ast, expr))
    }

    fn eval_expr_inner(&mut self, ast: &Ast, expr: NodeId) -> RuntimeResult<Value> {
        let kind = ast
            .kind(expr)
            .ok_or_else(|| RuntimeError::Type(format!("node {} not found", expr)))?;
        match kind {
            NodeKind::Literal(literal) => Ok(match literal {
                Literal::Int(n) => Value::Int(*n),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Str(s) => Value::Str(s.clone()),
                Literal::None => Value::None,
            }),
            NodeKind::Identifier { name } => self
                .resolve_variable(name)
                .cloned()
                .ok_or_else(|| RuntimeError::UnboundName(name.clone())),
            NodeKind::ListLiteral { elements } => {
                let mut items = Vec::with_capacity(elements.len());
                for &element in elements {
                    items.push(self.eval_expr(ast, element)?);
                }
                Ok(Value::list(items))
            }
            NodeKind::FString { parts } => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        FStringPart::Text(t) => text.push_str(t),
                        FStringPart::Expr(hole) => {
                            text.push_str(&self.eval_expr(ast, *hole)?.to_string())
                        }
                    }
                }
                Ok(Value::Str(text))
            }
            NodeKind::BinaryOp { op, left, right } => {
                let lhs = self.eval_expr(ast, *left)?;
                let rhs = self.eval_expr(ast, *right)?;
                self.binary(*op, lhs, rhs)
            }
            NodeKind::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => match self.eval_expr(ast, *operand)? {
                Value::Int(n) => n.checked_neg().map(Value::Int).ok_or(RuntimeError::Overflow),
                other => Err(RuntimeError::Type(format!(
                    "bad operand type for unary -: '{}'",
                    other.type_name()
                ))),
            },
            NodeKind::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.eval_expr(ast, arg)?);
                }
                self.call_builtin_or_user(func, values)
            }
            NodeKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = self.eval_expr(ast, *receiver)?;
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.eval_expr(ast, arg)?);
                }
                self.call_method(receiver, method, values)
            }
            other => Err(RuntimeError::Type(format!(
                "{} is not an expression",
                other.name()
            ))),
        }
    }

    fn call_builtin_or_user(&mut self, func: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        match func {
            "print" => {
                let parts: Vec<String> = args.iter().map(Value::to_string).collect();
                self.output.push_str(&parts.join(" "));
                self.output.push('\n');
                Ok(Value::None)
            }
            "len" => match args.as_slice() {
                [Value::List(items)] => Ok(Value::Int(items.borrow().len() as i64)),
                [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
                [other] => Err(RuntimeError::Type(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
                _ => Err(RuntimeError::Type(format!(
                    "len() takes exactly one argument ({} given)",
                    args.len()
                ))),
            },
            _ => self.call(func, args),
        }
    }

    fn call_method(&mut self, receiver: Value, method: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let Value::List(items) = &receiver else {
            return Err(RuntimeError::Type(format!(
                "'{}' object has no attribute '{}'",
                receiver.type_name(),
                method
            )));
        };
        match (method, args.len()) {
            ("append", 1) => {
                items.borrow_mut().extend(args);
                Ok(Value::None)
            }
            ("reverse", 0) => {
                items.borrow_mut().reverse();
                Ok(Value::None)
            }
            ("pop", 0) => items.borrow_mut().pop().ok_or(RuntimeError::EmptyContainer),
            _ => Err(RuntimeError::Type(format!(
                "unsupported call list.{}() with {} argument(s)",
                method,
                args.len()
            ))),
        }
    }

    fn binary(&self, op: BinOp, lhs: Value, rhs: Value) -> RuntimeResult<Value> {
        match op {
            BinOp::Eq => return Ok(Value::Bool(lhs == rhs)),
            BinOp::Ne => return Ok(Value::Bool(lhs != rhs)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = compare(&lhs, &rhs).ok_or_else(|| {
                    RuntimeError::Type(format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        op.symbol(),
                        lhs.type_name(),
                        rhs.type_name()
                    ))
                })?;
                let result = match op {
                    BinOp::Lt => ordering == Ordering::Less,
                    BinOp::Le => ordering != Ordering::Greater,
                    BinOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                return Ok(Value::Bool(result));
            }
            _ => {}
        }

        let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) else {
            return Err(RuntimeError::Type(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            )));
        };
        let (a, b) = (*a, *b);
        let result = match op {
            BinOp::Add => a.checked_add(b).ok_or(RuntimeError::Overflow)?,
            BinOp::Sub => a.checked_sub(b).ok_or(RuntimeError::Overflow)?,
            BinOp::Mul => a.checked_mul(b).ok_or(RuntimeError::Overflow)?,
            BinOp::FloorDiv => floor_div(a, b)?,
            _ => floor_mod(a, b)?,
        };
        Ok(Value::Int(result))
    }
}

/// Выполнить программу и вернуть её вывод.
pub fn run_program(ast: &Ast) -> (String, RuntimeResult<()>) {
    let mut interpreter = Interpreter::new(ast);
    let result = interpreter.run_main();
    (interpreter.take_output(), result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, parse_expr};

    fn run(source: &str) -> (String, RuntimeResult<()>) {
        run_program(&parse(source).expect("parse failed"))
    }

    const PROCESS_LIST: &str = "\
def process_list(items):
    \"\"\"Append two markers, reverse and pop.\"\"\"
    if len(items) == 0:
        return None
    items.append(42)
    items.append(99)
    size = len(items)
    items.reverse()
    first = items.pop()
    return first
";

    fn call(source: &str, fixture: &str) -> RuntimeResult<Value> {
        let module = parse(source).unwrap();
        let (fixture_ast, expr) = parse_expr(fixture).unwrap();
        let mut interpreter = Interpreter::new(&module);
        interpreter.import("subject")?;
        interpreter.eval(&fixture_ast, expr)
    }

    #[test]
    fn test_process_list_scenarios() {
        assert_eq!(call(PROCESS_LIST, "process_list([])").unwrap(), Value::None);
        assert_eq!(
            call(PROCESS_LIST, "process_list([1, 2, 3])").unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn test_print_renders_like_str() {
        let (out, result) = run("print(1, True, None, \"a\", [1, 2], [\"x\", \"it's\"])\n");
        result.unwrap();
        assert_eq!(out, "1 True None a [1, 2] ['x', \"it's\"]\n");
    }

    #[test]
    fn test_lists_are_shared() {
        let source = "\
def push(xs):
    xs.append(7)

ys = [1]
push(ys)
print(ys, len(ys))
";
        let (out, result) = run(source);
        result.unwrap();
        assert_eq!(out, "[1, 7] 2\n");
    }

    #[test]
    fn test_pop_on_empty_fails_after_output() {
        let (out, result) = run("xs = [1]\nprint(xs.pop())\nxs.pop()\n");
        assert_eq!(out, "1\n");
        assert_eq!(result, Err(RuntimeError::EmptyContainer));
    }

    #[test]
    fn test_floor_semantics() {
        let (out, result) = run("print(-7 // 2, -7 % 2, 7 // -2, 7 % -2)\n");
        result.unwrap();
        assert_eq!(out, "-4 1 -4 -1\n");
        let (_, result) = run("print(1 // 0)\n");
        assert_eq!(result, Err(RuntimeError::ZeroDivision));
    }

    #[test]
    fn test_main_guard_only_runs_as_program() {
        let source = "\
def my_len(x):
    return len(x)

if __name__ == \"__main__\":
    result = my_len([1, 2, 3, 4, 5])
    assert result == 5
    print(f\"len = {result}\")
";
        let (out, result) = run(source);
        result.unwrap();
        assert_eq!(out, "len = 5\n");

        let module = parse(source).unwrap();
        let mut interpreter = Interpreter::new(&module);
        interpreter.import("subject").unwrap();
        assert_eq!(interpreter.output(), "");
        assert_eq!(
            interpreter.call("my_len", vec![Value::list(vec![Value::Int(1)])]),
            Ok(Value::Int(1))
        );
    }

    #[test]
    fn test_assert_message() {
        let (_, result) = run("assert 1 == 2, \"boom\"\n");
        assert_eq!(
            result,
            Err(RuntimeError::AssertionFailed(Some("boom".to_string())))
        );
    }

    #[test]
    fn test_recursion_limit() {
        let source = "def f(n):\n    return f(n + 1)\n\nf(0)\n";
        let (_, result) = run(source);
        assert_eq!(result, Err(RuntimeError::RecursionLimit));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let (_, result) = run("print(9223372036854775807 + 1)\n");
        assert_eq!(result, Err(RuntimeError::Overflow));
    }

    #[test]
    fn test_append_then_pop_restores_length() {
        let (out, result) = run("xs = [1, 2]\nxs.append(9)\nv = xs.pop()\nprint(v, len(xs))\n");
        result.unwrap();
        assert_eq!(out, "9 2\n");
    }
}
