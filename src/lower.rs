//! Понижение аннотированного AST в IR.
//!
//! Каждое определение функции становится [`IrFunction`], инструкции
//! верхнего уровня (и тело `if __name__ == "__main__":`) - функцией
//! точки входа `main`.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::ast::NodeId;
use crate::error::{TranspileError, TranspileResult};
use crate::ir::{
    block_terminates, Constant, FormatPiece, IrFunction, IrModule, IrOp, IrParam, Merge, Opcode,
    ValueId,
};
use crate::nodecodes::{BinOp, FStringPart, Literal, NodeKind, UnaryOp};
use crate::type_checker::{FunctionSignature, TypedModule};
use crate::types::SymbolType;

/// Имя функции точки входа.
pub const ENTRY_NAME: &str = "main";

/// Понизить модуль в IR.
pub fn lower(module: &TypedModule) -> TranspileResult<IrModule> {
    if let Some(&nested) = module.nested_defs.first() {
        return Err(lowering_error(
            module,
            nested,
            "nested function definitions are not supported",
        ));
    }

    let mut ir = IrModule::new();
    for sig in &module.functions {
        let Some(NodeKind::FunctionDef { body, .. }) = module.ast.kind(sig.node) else {
            return Err(lowering_error(module, sig.node, "expected a function definition"));
        };
        let function = FunctionLowerer::new(module, sig).lower(body, sig.node)?;
        debug!(
            "Lowered '{}': {} values, {} ops",
            function.name,
            function.values.len(),
            function.body.len()
        );
        ir.functions.push(function);
    }

    if !module.entry.is_empty() {
        let entry_sig = FunctionSignature {
            name: ENTRY_NAME.to_string(),
            node: module.ast.root,
            params: Vec::new(),
            return_type: SymbolType::NoneType,
            mutated_params: Vec::new(),
            returned_params: Vec::new(),
        };
        let function = FunctionLowerer::new(module, &entry_sig).lower(&module.entry, module.ast.root)?;
        ir.entry = Some(function);
    }

    Ok(ir)
}

fn lowering_error(module: &TypedModule, node: NodeId, reason: impl Into<String>) -> TranspileError {
    TranspileError::LoweringError {
        node,
        position: module.ast.span(node),
        reason: reason.into(),
    }
}

fn binary_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::FloorDiv => Opcode::FloorDiv,
        BinOp::Mod => Opcode::Mod,
        BinOp::Eq => Opcode::CmpEq,
        BinOp::Ne => Opcode::CmpNe,
        BinOp::Lt => Opcode::CmpLt,
        BinOp::Le => Opcode::CmpLe,
        BinOp::Gt => Opcode::CmpGt,
        BinOp::Ge => Opcode::CmpGe,
    }
}

/// Понижение одной функции.
struct FunctionLowerer<'m> {
    module: &'m TypedModule,
    func: IrFunction,
    /// Текущая версия значения для каждого имени
    env: BTreeMap<String, ValueId>,
    /// Операции текущего блока
    current: Vec<IrOp>,
}

impl<'m> FunctionLowerer<'m> {
    fn new(module: &'m TypedModule, sig: &FunctionSignature) -> Self {
        let params = sig
            .params
            .iter()
            .map(|(name, ty)| IrParam {
                name: name.clone(),
                ty: ty.clone(),
            })
            .collect();
        Self {
            module,
            func: IrFunction::new(sig.name.clone(), params, sig.return_type.clone()),
            env: BTreeMap::new(),
            current: Vec::new(),
        }
    }

    fn lower(mut self, body: &[NodeId], node: NodeId) -> TranspileResult<IrFunction> {
        for (index, param) in self.func.params.clone().into_iter().enumerate() {
            let dst = self.func.new_value(param.ty, Some(param.name.clone()));
            self.emit(IrOp::LoadParam { dst, index });
            self.env.insert(param.name, dst);
        }

        self.lower_block(body)?;

        // Выход через конец тела функции с Optional-результатом
        if !block_terminates(&self.current) {
            if let SymbolType::Optional(_) = self.func.return_type {
                let dst = self.func.new_value(self.func.return_type.clone(), None);
                self.emit(IrOp::LoadConst {
                    dst,
                    value: Constant::None,
                });
                self.emit(IrOp::Return { value: dst });
            }
        }

        self.func.body = std::mem::take(&mut self.current);
        self.func
            .verify()
            .map_err(|e| lowering_error(self.module, node, e.to_string()))?;
        Ok(self.func)
    }

    fn emit(&mut self, op: IrOp) {
        trace!("emit {}", op.opcode());
        self.current.push(op);
    }

    fn error(&self, node: NodeId, reason: impl Into<String>) -> TranspileError {
        lowering_error(self.module, node, reason)
    }

    fn kind(&self, node: NodeId) -> TranspileResult<&'m NodeKind> {
        let module: &'m TypedModule = self.module;
        module
            .ast
            .kind(node)
            .ok_or_else(|| self.error(node, format!("node {} not found", node)))
    }

    /// Версия имени после вычисления соседних операндов. Список, переданный
    /// по имени, - это сам объект: он видит их изменения.
    fn current_version(&self, expr: NodeId, value: ValueId) -> TranspileResult<ValueId> {
        Ok(match self.kind(expr)? {
            NodeKind::Identifier { name } => self.env.get(name).copied().unwrap_or(value),
            _ => value,
        })
    }

    /// Обновить версии операндов после вычисления всех операндов.
    fn refresh(&self, exprs: &[NodeId], values: &mut [ValueId]) -> TranspileResult<()> {
        for (&expr, value) in exprs.iter().zip(values.iter_mut()) {
            *value = self.current_version(expr, *value)?;
        }
        Ok(())
    }

    fn type_of(&self, node: NodeId) -> TranspileResult<SymbolType> {
        self.module
            .type_of(node)
            .cloned()
            .ok_or_else(|| self.error(node, "expression has no inferred type"))
    }

    fn lower_block(&mut self, body: &[NodeId]) -> TranspileResult<()> {
        for &stmt in body {
            if block_terminates(&self.current) {
                // Код после return недостижим
                break;
            }
            self.lower_statement(stmt)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, stmt: NodeId) -> TranspileResult<()> {
        match self.kind(stmt)? {
            NodeKind::FunctionDef { name, .. } => Err(self.error(
                stmt,
                format!("nested function definition '{}' is not supported", name),
            )),
            NodeKind::Pass => Ok(()),
            NodeKind::ExprStmt { expr } => {
                if !self.module.ast.is_docstring(stmt) {
                    self.lower_expr(*expr)?;
                }
                Ok(())
            }
            NodeKind::Assign { target, value } => {
                let src = self.lower_value(*value)?;
                let dst = if self.func.value(src).is_some_and(|v| v.name.is_none()) {
                    // Временное значение просто получает имя
                    if let Some(info) = self.func.values.get_mut(src as usize) {
                        info.name = Some(target.clone());
                    }
                    src
                } else {
                    let dst = self
                        .func
                        .new_value(self.func.value_type(src), Some(target.clone()));
                    self.emit(IrOp::Store { dst, src });
                    dst
                };
                self.env.insert(target.clone(), dst);
                Ok(())
            }
            NodeKind::Return { value } => self.lower_return(*value),
            NodeKind::Assert { condition, message } => {
                let cond = self.lower_value(*condition)?;
                match message {
                    // Сообщение вычисляется только при ложном условии
                    Some(message) => {
                        let before = self.env.clone();
                        let outer = std::mem::take(&mut self.current);
                        let result = self.lower_value(*message);
                        let mut else_body = std::mem::replace(&mut self.current, outer);
                        self.env = before;
                        else_body.push(IrOp::Fail { message: result? });
                        self.emit(IrOp::Branch {
                            cond,
                            then_body: Vec::new(),
                            else_body,
                            merges: Vec::new(),
                        });
                    }
                    None => self.emit(IrOp::Assert { cond }),
                }
                Ok(())
            }
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => self.lower_if(*condition, then_body, else_body),
            other => Err(self.error(stmt, format!("{} is not a statement", other.name()))),
        }
    }

    fn lower_return(&mut self, value: Option<NodeId>) -> TranspileResult<()> {
        let return_type = self.func.return_type.clone();
        let value = match value {
            Some(v) if !matches!(self.kind(v)?, NodeKind::Literal(Literal::None)) => Some(v),
            _ => None,
        };

        match (value, &return_type) {
            (None, SymbolType::NoneType) => self.emit(IrOp::ReturnVoid),
            (None, _) => {
                let dst = self.func.new_value(return_type.clone(), None);
                self.emit(IrOp::LoadConst {
                    dst,
                    value: Constant::None,
                });
                self.emit(IrOp::Return { value: dst });
            }
            (Some(node), SymbolType::NoneType) => {
                self.lower_expr(node)?;
                self.emit(IrOp::ReturnVoid);
            }
            (Some(node), SymbolType::Optional(_)) => {
                let v = self.lower_value(node)?;
                if self.func.value_type(v) == return_type {
                    self.emit(IrOp::Return { value: v });
                } else {
                    let dst = self.func.new_value(return_type.clone(), None);
                    self.emit(IrOp::WrapSome { dst, value: v });
                    self.emit(IrOp::Return { value: dst });
                }
            }
            (Some(node), _) => {
                let v = self.lower_value(node)?;
                self.emit(IrOp::Return { value: v });
            }
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: NodeId,
        then_body: &[NodeId],
        else_body: &[NodeId],
    ) -> TranspileResult<()> {
        let cond = self.lower_value(condition)?;
        let before = self.env.clone();

        let (then_ops, then_env) = self.lower_arm(then_body, &before)?;
        let (else_ops, else_env) = self.lower_arm(else_body, &before)?;
        let then_terminates = block_terminates(&then_ops);
        let else_terminates = block_terminates(&else_ops);

        // Имена, видимые после ветвления, и их значения из каждой ветки
        let mut merges = Vec::new();
        let mut after = before.clone();
        let names: Vec<String> = then_env
            .keys()
            .chain(else_env.keys())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        for name in names {
            let then_value = then_env.get(&name).copied().filter(|_| !then_terminates);
            let else_value = else_env.get(&name).copied().filter(|_| !else_terminates);
            let live = match (then_terminates, else_terminates) {
                (true, true) => false,
                (true, false) => else_value.is_some(),
                (false, true) => then_value.is_some(),
                (false, false) => then_value.is_some() && else_value.is_some(),
            };
            if !live {
                continue;
            }
            let previous = before.get(&name).copied();
            let unchanged = [then_value, else_value]
                .iter()
                .flatten()
                .all(|v| Some(*v) == previous);
            if unchanged {
                continue;
            }

            let source = then_value.or(else_value).unwrap_or_default();
            let ty = self.func.value_type(source);
            let dst = self.func.new_value(ty, Some(name.clone()));
            merges.push(Merge {
                dst,
                then_value,
                else_value,
            });
            after.insert(name, dst);
        }

        self.env = after;
        self.emit(IrOp::Branch {
            cond,
            then_body: then_ops,
            else_body: else_ops,
            merges,
        });
        Ok(())
    }

    /// Понизить ветку в собственном блоке. Возвращает операции и окружение на выходе.
    fn lower_arm(
        &mut self,
        body: &[NodeId],
        before: &BTreeMap<String, ValueId>,
    ) -> TranspileResult<(Vec<IrOp>, BTreeMap<String, ValueId>)> {
        let outer = std::mem::take(&mut self.current);
        self.env = before.clone();
        let result = self.lower_block(body);
        let ops = std::mem::replace(&mut self.current, outer);
        result?;
        Ok((ops, std::mem::take(&mut self.env)))
    }

    /// Понизить выражение, обязанное иметь значение.
    fn lower_value(&mut self, expr: NodeId) -> TranspileResult<ValueId> {
        self.lower_expr(expr)?
            .ok_or_else(|| self.error(expr, "expression has no value"))
    }

    /// Понизить выражение. `None` - у выражения нет значения (тип `None`).
    fn lower_expr(&mut self, expr: NodeId) -> TranspileResult<Option<ValueId>> {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || self.lower_expr_inner(expr))
    }

    fn lower_expr_inner(&mut self, expr: NodeId) -> TranspileResult<Option<ValueId>> {
        let value = match self.kind(expr)? {
            NodeKind::Literal(literal) => {
                let value = match literal {
                    Literal::Int(n) => Constant::Int(*n),
                    Literal::Bool(b) => Constant::Bool(*b),
                    Literal::Str(s) => Constant::Str(s.clone()),
                    Literal::None => return Err(self.error(expr, "None is not a value here")),
                };
                let dst = self.func.new_value(self.type_of(expr)?, None);
                self.emit(IrOp::LoadConst { dst, value });
                dst
            }

            NodeKind::Identifier { name } => *self
                .env
                .get(name)
                .ok_or_else(|| self.error(expr, format!("name '{}' has no value here", name)))?,

            NodeKind::ListLiteral { elements } => {
                let mut values = Vec::with_capacity(elements.len());
                for &element in elements {
                    values.push(self.lower_value(element)?);
                }
                self.refresh(elements, &mut values)?;
                let dst = self.func.new_value(self.type_of(expr)?, None);
                self.emit(IrOp::BuildList {
                    dst,
                    elements: values,
                });
                dst
            }

            NodeKind::FString { parts } => {
                let mut pieces = Vec::with_capacity(parts.len());
                let mut holes = Vec::new();
                for part in parts {
                    match part {
                        FStringPart::Text(text) => pieces.push(FormatPiece::Text(text.clone())),
                        FStringPart::Expr(hole) => {
                            let value = self.lower_value(*hole)?;
                            holes.push((pieces.len(), *hole, value, self.current.len()));
                            pieces.push(FormatPiece::Value(value));
                        }
                    }
                }
                // Отверстие форматируется сразу: список, который изменяют
                // следующие отверстия, превращается в текст до изменения
                for &(piece, hole, value, position) in holes.iter().rev() {
                    if self.current_version(hole, value)? != value {
                        let text = self.func.new_value(SymbolType::Str, None);
                        self.current.insert(
                            position,
                            IrOp::Format {
                                dst: text,
                                pieces: vec![FormatPiece::Value(value)],
                            },
                        );
                        pieces[piece] = FormatPiece::Value(text);
                    }
                }
                let dst = self.func.new_value(SymbolType::Str, None);
                self.emit(IrOp::Format { dst, pieces });
                dst
            }

            NodeKind::BinaryOp { op, left, right } => {
                let lhs = self.lower_value(*left)?;
                let rhs = self.lower_value(*right)?;
                let lhs = self.current_version(*left, lhs)?;
                let dst = self.func.new_value(self.type_of(expr)?, None);
                self.emit(IrOp::Binary {
                    opcode: binary_opcode(*op),
                    dst,
                    lhs,
                    rhs,
                });
                dst
            }

            NodeKind::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => {
                let operand = self.lower_value(*operand)?;
                let dst = self.func.new_value(SymbolType::Int, None);
                self.emit(IrOp::Neg { dst, operand });
                dst
            }

            NodeKind::Call { func, args } => return self.lower_call(expr, func, args),

            NodeKind::MethodCall {
                receiver,
                method,
                args,
            } => return self.lower_method_call(expr, *receiver, method, args),

            other => {
                return Err(self.error(expr, format!("{} is not an expression", other.name())))
            }
        };
        Ok(Some(value))
    }

    fn lower_call(
        &mut self,
        expr: NodeId,
        func: &str,
        args: &[NodeId],
    ) -> TranspileResult<Option<ValueId>> {
        match func {
            "len" => {
                let list = self.lower_value(args[0])?;
                let dst = self.func.new_value(SymbolType::Int, None);
                self.emit(IrOp::Len { dst, list });
                Ok(Some(dst))
            }
            "print" => {
                // print(a, b) печатает str(a) + " " + str(b)
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.lower_value(arg)?);
                }
                self.refresh(args, &mut values)?;
                let mut pieces = Vec::with_capacity(args.len() * 2);
                for (i, value) in values.into_iter().enumerate() {
                    if i > 0 {
                        pieces.push(FormatPiece::Text(" ".to_string()));
                    }
                    pieces.push(FormatPiece::Value(value));
                }
                let text = self.func.new_value(SymbolType::Str, None);
                self.emit(IrOp::Format { dst: text, pieces });
                self.emit(IrOp::Print { value: text });
                Ok(None)
            }
            _ => {
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.lower_value(arg)?);
                }
                self.refresh(args, &mut values)?;
                let ty = self.type_of(expr)?;
                if ty == SymbolType::NoneType {
                    self.emit(IrOp::CallVoid {
                        func: func.to_string(),
                        args: values,
                    });
                    Ok(None)
                } else {
                    let dst = self.func.new_value(ty, None);
                    self.emit(IrOp::Call {
                        dst,
                        func: func.to_string(),
                        args: values,
                    });
                    Ok(Some(dst))
                }
            }
        }
    }

    fn lower_method_call(
        &mut self,
        expr: NodeId,
        receiver: NodeId,
        method: &str,
        args: &[NodeId],
    ) -> TranspileResult<Option<ValueId>> {
        let list = self.lower_value(receiver)?;
        let list_type = self.func.value_type(list);
        let binding = match self.kind(receiver)? {
            NodeKind::Identifier { name } => Some(name.clone()),
            _ => None,
        };

        let result = match method {
            "append" => {
                let value = self.lower_value(args[0])?;
                // Аргумент мог изменить сам получатель: `xs.append(xs.pop())`
                let list = self.current_version(receiver, list)?;
                let new_list = self.func.new_value(list_type, binding.clone());
                self.emit(IrOp::Append {
                    list,
                    new_list,
                    value,
                });
                (new_list, None)
            }
            "reverse" => {
                let new_list = self.func.new_value(list_type, binding.clone());
                self.emit(IrOp::Reverse { list, new_list });
                (new_list, None)
            }
            "pop" => {
                let new_list = self.func.new_value(list_type, binding.clone());
                let dst = self.func.new_value(self.type_of(expr)?, None);
                self.emit(IrOp::PopLast {
                    list,
                    new_list,
                    dst,
                });
                (new_list, Some(dst))
            }
            other => {
                return Err(self.error(expr, format!("method '.{}()' cannot be lowered", other)))
            }
        };

        // Изменение перепривязывает имя к новой версии списка
        if let Some(name) = binding {
            self.env.insert(name, result.0);
        }
        Ok(result.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::type_checker::analyze;

    fn lower_source(source: &str) -> TranspileResult<IrModule> {
        let ast = parse(source).expect("parse failed");
        lower(&analyze(&ast)?)
    }

    const PROCESS_LIST: &str = "\
def process_list(items):
    \"\"\"Process a list.\"\"\"
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
        let ir = lower_source("def my_len(x):\n    return len(x)\n").unwrap();
        let func = ir.function("my_len").unwrap();
        assert_eq!(
            func.opcodes(),
            vec![Opcode::LoadParam, Opcode::Len, Opcode::Return]
        );
        assert!(ir.entry.is_none());
    }

    #[test]
    fn test_process_list_opcode_sequence() {
        let ir = lower_source(PROCESS_LIST).unwrap();
        let func = ir.function("process_list").unwrap();
        assert_eq!(
            func.opcodes(),
            vec![
                Opcode::LoadParam,
                Opcode::Len,
                Opcode::LoadConst,
                Opcode::CmpEq,
                Opcode::Branch,
                Opcode::LoadConst,
                Opcode::Return,
                Opcode::LoadConst,
                Opcode::Append,
                Opcode::LoadConst,
                Opcode::Append,
                Opcode::Len,
                Opcode::Reverse,
                Opcode::PopLast,
                Opcode::WrapSome,
                Opcode::Return,
            ]
        );
        assert_eq!(func.return_type, SymbolType::optional(SymbolType::Int));
        func.verify().unwrap();
    }

    #[test]
    fn test_mutations_create_versions() {
        let ir = lower_source(PROCESS_LIST).unwrap();
        let func = ir.function("process_list").unwrap();
        let versions = func
            .values
            .iter()
            .filter(|v| v.name.as_deref() == Some("items"))
            .count();
        // Параметр и по версии на каждый append/reverse/pop
        assert_eq!(versions, 5);
    }

    #[test]
    fn test_branch_merges_rebound_list() {
        let source = "\
def f(xs: list[int], flag: bool) -> int:
    if flag:
        xs.append(1)
    return len(xs)
";
        let ir = lower_source(source).unwrap();
        let func = ir.function("f").unwrap();
        let merges = func
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::Branch { merges, .. } => Some(merges.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(merges.len(), 1);
        assert!(merges[0].then_value.is_some());
        assert_eq!(merges[0].else_value, Some(0));
        func.verify().unwrap();
    }

    #[test]
    fn test_terminating_arm_contributes_no_value() {
        let source = "\
def f(xs: list[int]) -> int:
    if len(xs) == 0:
        return 0
    else:
        xs.append(5)
    return xs.pop()
";
        let ir = lower_source(source).unwrap();
        let func = ir.function("f").unwrap();
        let merge = func
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::Branch { merges, .. } => merges.first().cloned(),
                _ => None,
            })
            .unwrap();
        assert_eq!(merge.then_value, None);
        assert!(merge.else_value.is_some());
    }

    #[test]
    fn test_print_lowers_to_format_and_print() {
        let ir = lower_source("print(1, \"a\")\n").unwrap();
        let entry = ir.entry.unwrap();
        assert_eq!(entry.name, ENTRY_NAME);
        let format = entry
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::Format { pieces, .. } => Some(pieces.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(format.len(), 3);
        assert_eq!(format[1], FormatPiece::Text(" ".to_string()));
        assert_eq!(entry.opcodes().last(), Some(&Opcode::Print));
    }

    #[test]
    fn test_void_call_and_fall_off_end() {
        let source = "\
def show(xs):
    print(len(xs))

show([1, 2])
";
        let ir = lower_source(source).unwrap();
        let show = ir.function("show").unwrap();
        assert_eq!(show.return_type, SymbolType::NoneType);
        assert!(!show.opcodes().contains(&Opcode::ReturnVoid));
        let entry = ir.entry.unwrap();
        assert!(entry.opcodes().contains(&Opcode::CallVoid));
    }

    #[test]
    fn test_nested_def_is_lowering_error() {
        let err = lower_source("def f():\n    def g():\n        pass\n    pass\n").unwrap_err();
        assert!(matches!(err, TranspileError::LoweringError { .. }));
    }

    #[test]
    fn test_assign_names_temporaries() {
        let ir = lower_source("xs = [1, 2]\nn = len(xs)\nprint(n)\n").unwrap();
        let entry = ir.entry.unwrap();
        assert!(!entry.opcodes().contains(&Opcode::Store));
        assert!(entry.values.iter().any(|v| v.name.as_deref() == Some("xs")));
    }

    #[test]
    fn test_alias_of_scalar_uses_store() {
        let ir = lower_source("a = 1\nb = a\nprint(b)\n").unwrap();
        assert!(ir.entry.unwrap().opcodes().contains(&Opcode::Store));
    }

    #[test]
    fn test_append_argument_sees_receiver_mutation() {
        let source = "\
def f(xs: list[int]) -> int:
    xs.append(xs.pop())
    return len(xs)
";
        let ir = lower_source(source).unwrap();
        let func = ir.function("f").unwrap();
        let popped = func
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::PopLast { new_list, .. } => Some(*new_list),
                _ => None,
            })
            .unwrap();
        let appended_to = func
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::Append { list, .. } => Some(*list),
                _ => None,
            })
            .unwrap();
        assert_eq!(appended_to, popped);
        func.verify().unwrap();
    }

    #[test]
    fn test_call_argument_reads_latest_version() {
        let source = "\
def pair(xs: list[int], x: int) -> int:
    return len(xs) + x

def f(xs: list[int]) -> int:
    return pair(xs, xs.pop())
";
        let ir = lower_source(source).unwrap();
        let func = ir.function("f").unwrap();
        let args = func
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::Call { args, .. } => Some(args.clone()),
                _ => None,
            })
            .unwrap();
        assert_ne!(args[0], 0);
        assert_eq!(func.value(args[0]).and_then(|v| v.name.as_deref()), Some("xs"));
        func.verify().unwrap();
    }

    #[test]
    fn test_assert_message_evaluated_only_on_failure() {
        let source = "\
def f(xs: list[int]) -> int:
    assert len(xs) > 0, f\"{xs.pop()}\"
    return len(xs)
";
        let ir = lower_source(source).unwrap();
        let func = ir.function("f").unwrap();
        assert!(!func.body.iter().any(|op| op.opcode() == Opcode::PopLast));
        let (then_body, else_body) = func
            .body
            .iter()
            .find_map(|op| match op {
                IrOp::Branch {
                    then_body,
                    else_body,
                    ..
                } => Some((then_body.clone(), else_body.clone())),
                _ => None,
            })
            .unwrap();
        assert!(then_body.is_empty());
        assert!(else_body.iter().any(|op| op.opcode() == Opcode::PopLast));
        assert_eq!(else_body.last().map(IrOp::opcode), Some(Opcode::Fail));
        // После assert длина считается по исходному списку
        assert!(func
            .body
            .iter()
            .any(|op| matches!(op, IrOp::Len { list: 0, .. })));
        func.verify().unwrap();
    }

    #[test]
    fn test_fstring_hole_formatted_before_later_mutation() {
        let ir = lower_source("xs = [1, 2]\nprint(f\"{xs} {xs.pop()}\")\n").unwrap();
        let entry = ir.entry.unwrap();
        let opcodes = entry.opcodes();
        let snapshot = opcodes.iter().position(|op| *op == Opcode::Format).unwrap();
        let pop = opcodes.iter().position(|op| *op == Opcode::PopLast).unwrap();
        assert!(snapshot < pop);
        entry.verify().unwrap();
    }
}
