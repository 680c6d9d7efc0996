//! Модуль `type_checker`
//!
//! Семантический анализ Python-подмножества.
//!
//! Реализует:
//! - Алгоритм унификации типов (подстановка + occurs check)
//! - Вывод типов параметров без аннотаций по их использованию
//! - Проверку возможностей: `len`, `.append`, `.reverse`, `.pop` только для списков
//! - Правила областей видимости: одна область на функцию, ветки `if` изолированы
//!
//! Результат анализа - [`TypedModule`]: исходное дерево, таблица типов узлов
//! и сигнатуры функций. Оставшиеся неразрешёнными переменные типа
//! заменяются на `int`.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::ast::{Ast, NodeId};
use crate::error::{TranspileError, TranspileResult};
use crate::nodecodes::{BinOp, FStringPart, Literal, NodeKind, UnaryOp};
use crate::types::{SymbolType, TypeMismatch, TypeVarId};

/// Встроенные функции Python вне подмножества.
const UNSUPPORTED_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "chr", "dict", "dir", "enumerate", "eval",
    "exec", "filter", "float", "format", "getattr", "globals", "hasattr", "hash", "id", "input",
    "int", "isinstance", "iter", "list", "locals", "map", "max", "min", "next", "open", "ord",
    "range", "repr", "reversed", "round", "set", "setattr", "sorted", "str", "sum", "super",
    "tuple", "type", "vars", "zip",
];

/// Методы, изменяющие список-получатель.
pub const MUTATING_METHODS: &[&str] = &["append", "reverse", "pop"];

// === Подстановка ===

/// Подстановка: отображение переменных типа на конкретные типы.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    mappings: HashMap<TypeVarId, SymbolType>,
}

impl Substitution {
    /// Создать пустую подстановку.
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить подстановку.
    pub fn insert(&mut self, var: TypeVarId, ty: SymbolType) {
        self.mappings.insert(var, ty);
    }

    /// Проверить наличие переменной.
    pub fn contains(&self, var: TypeVarId) -> bool {
        self.mappings.contains_key(&var)
    }

    /// Применить подстановку к типу.
    pub fn apply(&self, ty: &SymbolType) -> SymbolType {
        match ty {
            SymbolType::Var(id) => match self.mappings.get(id) {
                // Рекурсивно применяем подстановку
                Some(resolved) => self.apply(resolved),
                None => ty.clone(),
            },
            SymbolType::List(inner) => SymbolType::list(self.apply(inner)),
            SymbolType::Optional(inner) => SymbolType::optional(self.apply(inner)),
            // Базовые типы не меняются
            _ => ty.clone(),
        }
    }

    /// Композиция подстановок: self ∘ other
    pub fn compose(&self, other: &Substitution) -> Substitution {
        let mut result = Substitution::new();

        for (k, v) in &other.mappings {
            result.insert(*k, self.apply(v));
        }
        for (k, v) in &self.mappings {
            if !result.contains(*k) {
                result.insert(*k, v.clone());
            }
        }

        result
    }
}

// === Унификация ===

/// Проверка вхождения переменной в тип (occurs check).
/// Предотвращает бесконечные типы вроде t = list[t].
fn occurs_check(var: TypeVarId, ty: &SymbolType) -> bool {
    match ty {
        SymbolType::Var(id) => *id == var,
        SymbolType::List(inner) | SymbolType::Optional(inner) => occurs_check(var, inner),
        _ => false,
    }
}

/// Унификация двух типов.
/// Возвращает подстановку, которая делает типы равными.
pub fn unify(t1: &SymbolType, t2: &SymbolType) -> Result<Substitution, TypeMismatch> {
    match (t1, t2) {
        (SymbolType::Int, SymbolType::Int)
        | (SymbolType::Bool, SymbolType::Bool)
        | (SymbolType::Str, SymbolType::Str)
        | (SymbolType::NoneType, SymbolType::NoneType) => Ok(Substitution::new()),

        (SymbolType::Var(a), SymbolType::Var(b)) if a == b => Ok(Substitution::new()),

        (SymbolType::Var(var), other) | (other, SymbolType::Var(var)) => {
            if occurs_check(*var, other) {
                return Err(TypeMismatch::InfiniteType {
                    var: *var,
                    ty: other.clone(),
                });
            }
            let mut subst = Substitution::new();
            subst.insert(*var, other.clone());
            Ok(subst)
        }

        (SymbolType::List(a), SymbolType::List(b))
        | (SymbolType::Optional(a), SymbolType::Optional(b)) => unify(a, b),

        _ => Err(TypeMismatch::Mismatch {
            expected: t1.clone(),
            found: t2.clone(),
        }),
    }
}

// === Результат анализа ===

/// Сигнатура функции после вывода типов.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    /// Узел `FunctionDef` (для внешних сигнатур - узел в чужом дереве)
    pub node: NodeId,
    pub params: Vec<(String, SymbolType)>,
    pub return_type: SymbolType,
    /// Индексы параметров, которые функция может изменить (сама или через вызов)
    pub mutated_params: Vec<usize>,
    /// Индексы параметров, которые функция может вернуть как есть
    pub returned_params: Vec<usize>,
}

impl FunctionSignature {
    /// Забирает ли функция аргумент с этим индексом: изменение или возврат
    /// станут видны через имя, переданное вызывающим.
    pub fn takes_param(&self, index: usize) -> bool {
        self.mutated_params.contains(&index) || self.returned_params.contains(&index)
    }
}

/// Аннотированный модуль.
#[derive(Debug, Clone)]
pub struct TypedModule {
    pub ast: Ast,
    node_types: HashMap<NodeId, SymbolType>,
    /// Функции модуля в порядке исходника
    pub functions: Vec<FunctionSignature>,
    /// Функции, определённые в другом модуле и доступные для вызова
    pub externals: Vec<FunctionSignature>,
    /// Инструкции точки входа: верхний уровень и тело `if __name__ == "__main__":`
    pub entry: Vec<NodeId>,
    /// Вложенные определения функций (не анализируются)
    pub nested_defs: Vec<NodeId>,
}

impl TypedModule {
    /// Тип узла-выражения.
    pub fn type_of(&self, id: NodeId) -> Option<&SymbolType> {
        self.node_types.get(&id)
    }

    /// Сигнатура функции по имени (своей или внешней).
    pub fn signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions
            .iter()
            .chain(self.externals.iter())
            .find(|s| s.name == name)
    }

    /// Количество типизированных узлов.
    pub fn typed_node_count(&self) -> usize {
        self.node_types.len()
    }
}

// === Контекст типизации ===

/// Контекст типизации: типы узлов и функций.
#[derive(Debug, Clone, Default)]
pub struct TypeContext {
    functions: HashMap<String, FunctionSignature>,
    node_types: HashMap<NodeId, SymbolType>,
}

impl TypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_function(&mut self, sig: FunctionSignature) {
        self.functions.insert(sig.name.clone(), sig);
    }

    pub fn get_function(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.get(name)
    }

    pub fn insert_node_type(&mut self, id: NodeId, ty: SymbolType) {
        self.node_types.insert(id, ty);
    }

    pub fn get_node_type(&self, id: NodeId) -> Option<&SymbolType> {
        self.node_types.get(&id)
    }
}

/// Область видимости: имена, связанные в функции (или в точке входа).
#[derive(Debug, Clone, Default)]
struct Scope {
    vars: HashMap<String, SymbolType>,
    /// Имена, отданные вызову, который забирает аргумент: имя -> функция
    transferred: HashMap<String, String>,
}

/// Сведения о возвратах текущей функции.
#[derive(Debug, Default)]
struct ReturnInfo {
    values: Vec<(NodeId, SymbolType)>,
    none_returns: Vec<NodeId>,
}

/// Перемещение списка, которое проверяется после вывода типов модуля.
/// Ошибка, если узел окажется списком.
#[derive(Debug)]
struct PendingMove {
    node: NodeId,
    reason: String,
}

// === Type Checker ===

/// Семантический анализатор модуля.
pub struct TypeChecker<'a> {
    ast: &'a Ast,
    context: TypeContext,
    substitution: Substitution,
    next_var: TypeVarId,
    returns: Option<ReturnInfo>,
    moves: Vec<PendingMove>,
    nested_defs: Vec<NodeId>,
    external_names: HashSet<String>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(ast: &'a Ast) -> Self {
        Self {
            ast,
            context: TypeContext::new(),
            substitution: Substitution::new(),
            next_var: 0,
            returns: None,
            moves: Vec::new(),
            nested_defs: Vec::new(),
            external_names: HashSet::new(),
        }
    }

    /// Сделать доступными функции другого модуля.
    pub fn with_externals(mut self, externals: &[FunctionSignature]) -> Self {
        for sig in externals {
            self.external_names.insert(sig.name.clone());
            self.context.insert_function(sig.clone());
        }
        self
    }

    /// Генерация свежей переменной типа.
    fn fresh(&mut self) -> SymbolType {
        let id = self.next_var;
        self.next_var += 1;
        SymbolType::Var(id)
    }

    fn resolve(&self, ty: &SymbolType) -> SymbolType {
        self.substitution.apply(ty)
    }

    /// Унифицировать с текущей подстановкой.
    fn constrain(&mut self, expected: &SymbolType, found: &SymbolType) -> Result<(), TypeMismatch> {
        let s = unify(&self.resolve(expected), &self.resolve(found))?;
        self.substitution = self.substitution.compose(&s);
        Ok(())
    }

    fn type_error(&self, node: NodeId, reason: impl Into<String>) -> TranspileError {
        TranspileError::TypeError {
            node,
            position: self.ast.span(node),
            reason: reason.into(),
        }
    }

    fn record(&mut self, node: NodeId, ty: SymbolType) -> SymbolType {
        self.context.insert_node_type(node, ty.clone());
        ty
    }

    fn kind(&self, id: NodeId) -> TranspileResult<&'a NodeKind> {
        let ast: &'a Ast = self.ast;
        ast.kind(id).ok_or_else(|| TranspileError::TypeError {
            node: id,
            position: Default::default(),
            reason: format!("node {} not found", id),
        })
    }

    /// Основная функция анализа: проход по модулю.
    pub fn check(mut self) -> TranspileResult<TypedModule> {
        let module_body = self.ast.module_body().to_vec();
        let mut defs = Vec::new();

        // Сигнатуры создаются заранее: функции можно вызывать до их определения
        for &stmt in &module_body {
            if let NodeKind::FunctionDef {
                name,
                params,
                returns,
                body,
            } = self.kind(stmt)?
            {
                if self.context.get_function(name).is_some() {
                    return Err(self.type_error(stmt, format!("function '{}' is defined twice", name)));
                }
                let mut param_types = Vec::with_capacity(params.len());
                for param in params {
                    let ty = match &param.annotation {
                        Some(annotation) => {
                            let mut fresh = || self.fresh();
                            SymbolType::from_annotation(annotation, &mut fresh)
                        }
                        None => self.fresh(),
                    };
                    param_types.push((param.name.clone(), ty));
                }
                let return_type = match returns {
                    Some(annotation) => {
                        let mut fresh = || self.fresh();
                        SymbolType::from_annotation(annotation, &mut fresh)
                    }
                    None => self.fresh(),
                };
                self.context.insert_function(FunctionSignature {
                    name: name.clone(),
                    node: stmt,
                    params: param_types,
                    return_type,
                    mutated_params: Vec::new(),
                    returned_params: Vec::new(),
                });
                defs.push(stmt);
            }
        }
        self.param_effects(&defs)?;

        for &def in &defs {
            self.check_function(def)?;
        }

        // Точка входа
        let mut entry = Vec::new();
        let mut scope = Scope::default();
        for &stmt in &module_body {
            if matches!(self.kind(stmt)?, NodeKind::FunctionDef { .. }) {
                continue;
            }
            if self.ast.is_main_guard(stmt) {
                if let NodeKind::If { then_body, .. } = self.kind(stmt)? {
                    for &inner in then_body {
                        self.check_statement(inner, &mut scope)?;
                        entry.push(inner);
                    }
                }
                continue;
            }
            self.check_statement(stmt, &mut scope)?;
            entry.push(stmt);
        }
        self.check_moves()?;
        entry.retain(|&id| !self.ast.is_docstring(id));

        // Финализация: подставить всё и заменить неразрешённое на int
        let mut node_types = HashMap::new();
        for (id, ty) in &self.context.node_types {
            node_types.insert(*id, self.resolve(ty).default_vars());
        }
        let mut functions = Vec::new();
        let mut externals = Vec::new();
        for &def in &defs {
            if let NodeKind::FunctionDef { name, .. } = self.kind(def)? {
                if let Some(sig) = self.context.get_function(name) {
                    functions.push(self.finalize(sig));
                }
            }
        }
        let mut external_names: Vec<_> = self.external_names.iter().cloned().collect();
        external_names.sort();
        for name in external_names {
            if let Some(sig) = self.context.get_function(&name) {
                externals.push(sig.clone());
            }
        }

        debug!(
            "Analyzed module: {} functions, {} entry statements, {} typed nodes",
            functions.len(),
            entry.len(),
            node_types.len()
        );

        Ok(TypedModule {
            ast: self.ast.clone(),
            node_types,
            functions,
            externals,
            entry,
            nested_defs: self.nested_defs,
        })
    }

    fn finalize(&self, sig: &FunctionSignature) -> FunctionSignature {
        FunctionSignature {
            name: sig.name.clone(),
            node: sig.node,
            params: sig
                .params
                .iter()
                .map(|(n, t)| (n.clone(), self.resolve(t).default_vars()))
                .collect(),
            return_type: self.resolve(&sig.return_type).default_vars(),
            mutated_params: sig.mutated_params.clone(),
            returned_params: sig.returned_params.clone(),
        }
    }

    /// Изменяемые и возвращаемые параметры всех функций модуля.
    /// Вызовы передают эффекты вызывающему, поэтому проход повторяется
    /// до неподвижной точки.
    fn param_effects(&mut self, defs: &[NodeId]) -> TranspileResult<()> {
        loop {
            let mut changed = false;
            for &def in defs {
                let NodeKind::FunctionDef {
                    name, params, body, ..
                } = self.kind(def)?
                else {
                    continue;
                };
                let (mutated, returned) = self.body_effects(body)?;
                let index_of = |names: &HashSet<String>| -> Vec<usize> {
                    params
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| names.contains(&p.name))
                        .map(|(i, _)| i)
                        .collect()
                };
                let (mutated, returned) = (index_of(&mutated), index_of(&returned));
                if let Some(sig) = self.context.functions.get_mut(name) {
                    if sig.mutated_params != mutated || sig.returned_params != returned {
                        sig.mutated_params = mutated;
                        sig.returned_params = returned;
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Имена, которые тело изменяет, и имена, которые оно возвращает как есть.
    fn body_effects(&self, body: &[NodeId]) -> TranspileResult<(HashSet<String>, HashSet<String>)> {
        let mut mutated = HashSet::new();
        let mut returned = HashSet::new();
        let mut stack: Vec<NodeId> = body.to_vec();
        while let Some(id) = stack.pop() {
            let kind = self.kind(id)?;
            match kind {
                NodeKind::MethodCall {
                    receiver, method, ..
                } if MUTATING_METHODS.contains(&method.as_str()) => {
                    if let NodeKind::Identifier { name } = self.kind(*receiver)? {
                        mutated.insert(name.clone());
                    }
                }
                // Отданный вызову аргумент может быть изменён через результат
                NodeKind::Call { func, args } => {
                    if let Some(sig) = self.context.get_function(func) {
                        for (index, &arg) in args.iter().enumerate() {
                            if let NodeKind::Identifier { name } = self.kind(arg)? {
                                if sig.takes_param(index) {
                                    mutated.insert(name.clone());
                                }
                            }
                        }
                    }
                }
                NodeKind::Return { value: Some(value) } => {
                    self.returned_names(*value, &mut returned)?;
                }
                _ => {}
            }
            if !matches!(kind, NodeKind::FunctionDef { .. }) {
                stack.extend(kind.children());
            }
        }
        Ok((mutated, returned))
    }

    /// Имена, чей объект может оказаться результатом выражения.
    fn returned_names(&self, expr: NodeId, out: &mut HashSet<String>) -> TranspileResult<()> {
        let mut stack = vec![expr];
        while let Some(id) = stack.pop() {
            match self.kind(id)? {
                NodeKind::Identifier { name } => {
                    out.insert(name.clone());
                }
                NodeKind::Call { func, args } => {
                    if let Some(sig) = self.context.get_function(func) {
                        stack.extend(
                            sig.returned_params
                                .iter()
                                .filter_map(|&index| args.get(index).copied()),
                        );
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_function(&mut self, def: NodeId) -> TranspileResult<()> {
        let NodeKind::FunctionDef {
            name,
            returns,
            body,
            ..
        } = self.kind(def)?
        else {
            return Ok(());
        };
        let sig = self
            .context
            .get_function(name)
            .cloned()
            .ok_or_else(|| self.type_error(def, format!("missing signature for '{}'", name)))?;

        let mut scope = Scope::default();
        for (param, ty) in &sig.params {
            scope.vars.insert(param.clone(), ty.clone());
        }

        self.returns = Some(ReturnInfo::default());
        let terminates = self.check_block(body, &mut scope)?;
        let mut info = self.returns.take().unwrap_or_default();
        if !terminates {
            info.none_returns.push(def);
        }

        // Вывод возвращаемого типа
        let inferred = if info.values.is_empty() {
            SymbolType::NoneType
        } else {
            let value_type = self.fresh();
            for (node, ty) in &info.values {
                self.constrain(&value_type, ty).map_err(|e| {
                    self.type_error(*node, format!("inconsistent return types in '{}': {}", name, e))
                })?;
            }
            let value_type = self.resolve(&value_type);
            if info.none_returns.is_empty() || matches!(value_type, SymbolType::Optional(_)) {
                value_type
            } else {
                SymbolType::optional(value_type)
            }
        };

        let declared = self.resolve(&sig.return_type);
        let result = match (&declared, &inferred, returns.is_some()) {
            // `-> Optional[T]` допускает возвраты только T или только None
            (SymbolType::Optional(_), SymbolType::NoneType, true) => Ok(()),
            (SymbolType::Optional(inner), found, true) if !matches!(found, SymbolType::Optional(_)) => {
                let inner = (**inner).clone();
                self.constrain(&inner, found)
            }
            _ => self.constrain(&declared, &inferred),
        };
        result.map_err(|e| {
            self.type_error(def, format!("return type of '{}' does not match: {}", name, e))
        })?;

        // Литералы None в return получают тип функции
        let return_type = self.resolve(&sig.return_type);
        for node in info.none_returns {
            if let NodeKind::Return { value: Some(value) } = self.kind(node)? {
                self.record(*value, return_type.clone());
            }
        }

        debug!("Function '{}' returns {}", name, return_type);
        Ok(())
    }

    fn check_moves(&mut self) -> TranspileResult<()> {
        for m in std::mem::take(&mut self.moves) {
            let ty = self
                .context
                .get_node_type(m.node)
                .map(|t| self.resolve(t))
                .unwrap_or(SymbolType::NoneType);
            if ty.is_list() {
                return Err(self.type_error(m.node, m.reason));
            }
        }
        Ok(())
    }

    /// Проверить блок. Возвращает true, если блок всегда завершается `return`.
    fn check_block(&mut self, body: &[NodeId], scope: &mut Scope) -> TranspileResult<bool> {
        let mut terminates = false;
        for &stmt in body {
            if self.check_statement(stmt, scope)? {
                terminates = true;
            }
        }
        Ok(terminates)
    }

    fn check_statement(&mut self, stmt: NodeId, scope: &mut Scope) -> TranspileResult<bool> {
        match self.kind(stmt)? {
            NodeKind::FunctionDef { .. } => {
                self.nested_defs.push(stmt);
                Ok(false)
            }
            NodeKind::Pass => Ok(false),
            NodeKind::ExprStmt { expr } => {
                if !self.ast.is_docstring(stmt) {
                    self.infer_expr(*expr, scope)?;
                }
                Ok(false)
            }
            NodeKind::Assign { target, value } => {
                let ty = self.check_value(*value, scope)?;
                self.note_move(*value, || format!("'{}'", target))?;
                // Новое значение: имя снова можно читать
                scope.transferred.remove(target);
                match scope.vars.get(target).cloned() {
                    Some(existing) => {
                        self.constrain(&existing, &ty).map_err(|e| {
                            self.type_error(
                                stmt,
                                format!("cannot rebind '{}' to a different type: {}", target, e),
                            )
                        })?;
                    }
                    None => {
                        scope.vars.insert(target.clone(), ty);
                    }
                }
                Ok(false)
            }
            NodeKind::Return { value } => {
                if self.returns.is_none() {
                    return Err(self.type_error(stmt, "'return' outside function"));
                }
                match value {
                    None => self.push_none_return(stmt),
                    Some(v) if matches!(self.kind(*v)?, NodeKind::Literal(Literal::None)) => {
                        self.push_none_return(stmt)
                    }
                    Some(v) => {
                        let ty = self.check_value(*v, scope)?;
                        if let Some(info) = self.returns.as_mut() {
                            info.values.push((*v, ty));
                        }
                    }
                }
                Ok(true)
            }
            NodeKind::Assert { condition, message } => {
                self.check_condition(*condition, scope)?;
                if let Some(message) = message {
                    self.check_value(*message, scope)?;
                }
                Ok(false)
            }
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => {
                self.check_condition(*condition, scope)?;

                let mut then_scope = scope.clone();
                let then_terminates = self.check_block(then_body, &mut then_scope)?;
                let mut else_scope = scope.clone();
                let else_terminates = self.check_block(else_body, &mut else_scope)?;

                // Отданное в любой продолжающейся ветке считается отданным
                let mut transferred = HashMap::new();
                if !then_terminates {
                    transferred.extend(then_scope.transferred.clone());
                }
                if !else_terminates {
                    transferred.extend(else_scope.transferred.clone());
                }

                match (then_terminates, else_terminates) {
                    (true, true) => {}
                    (true, false) => *scope = else_scope,
                    (false, true) => *scope = then_scope,
                    (false, false) => {
                        // Видимы после if только имена, связанные в обеих ветках
                        for (name, ty) in then_scope.vars {
                            if scope.vars.contains_key(&name) {
                                continue;
                            }
                            if let Some(other) = else_scope.vars.get(&name) {
                                self.constrain(&ty, other).map_err(|e| {
                                    self.type_error(
                                        stmt,
                                        format!("'{}' has different types in branches: {}", name, e),
                                    )
                                })?;
                                scope.vars.insert(name, ty);
                            }
                        }
                    }
                }
                if !(then_terminates && else_terminates) {
                    scope.transferred = transferred;
                }
                Ok(then_terminates && else_terminates)
            }
            other => Err(self.type_error(stmt, format!("{} is not a statement", other.name()))),
        }
    }

    fn push_none_return(&mut self, stmt: NodeId) {
        if let Some(info) = self.returns.as_mut() {
            info.none_returns.push(stmt);
        }
    }

    /// Запомнить перемещение, если значение - имя (возможного) списка.
    fn note_move(&mut self, value: NodeId, target: impl FnOnce() -> String) -> TranspileResult<()> {
        if let NodeKind::Identifier { name } = self.kind(value)? {
            self.moves.push(PendingMove {
                node: value,
                reason: format!(
                    "list '{}' cannot be aliased by {}; lists are exclusively owned",
                    name,
                    target()
                ),
            });
        }
        Ok(())
    }

    fn check_condition(&mut self, condition: NodeId, scope: &mut Scope) -> TranspileResult<()> {
        let ty = self.check_value(condition, scope)?;
        self.constrain(&SymbolType::Bool, &ty).map_err(|_| {
            self.type_error(
                condition,
                format!("condition must be bool, found {}", self.resolve(&ty)),
            )
        })
    }

    /// Вывести тип выражения, используемого как значение (не None).
    fn check_value(&mut self, expr: NodeId, scope: &mut Scope) -> TranspileResult<SymbolType> {
        if matches!(self.kind(expr)?, NodeKind::Literal(Literal::None)) {
            return Err(self.type_error(expr, "None can only be returned"));
        }
        let ty = self.infer_expr(expr, scope)?;
        if self.resolve(&ty) == SymbolType::NoneType {
            return Err(self.type_error(expr, "expression has no value (it evaluates to None)"));
        }
        Ok(ty)
    }

    fn check_int(&mut self, expr: NodeId, scope: &mut Scope, what: &str) -> TranspileResult<()> {
        let ty = self.check_value(expr, scope)?;
        self.constrain(&SymbolType::Int, &ty).map_err(|_| {
            self.type_error(
                expr,
                format!("{} requires int operands, found {}", what, self.resolve(&ty)),
            )
        })
    }

    /// Потребовать, чтобы получатель был списком. Возвращает тип элемента.
    fn require_list(&mut self, expr: NodeId, ty: &SymbolType, what: &str) -> TranspileResult<SymbolType> {
        let element = self.fresh();
        let list = SymbolType::list(element.clone());
        self.constrain(&list, ty).map_err(|_| {
            self.type_error(
                expr,
                format!("{} requires a list, found {}", what, self.resolve(ty)),
            )
        })?;
        Ok(self.resolve(&element))
    }

    /// Вывод типа выражения.
    fn infer_expr(&mut self, expr: NodeId, scope: &mut Scope) -> TranspileResult<SymbolType> {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || self.infer_expr_inner(expr, scope))
    }

    fn infer_expr_inner(&mut self, expr: NodeId, scope: &mut Scope) -> TranspileResult<SymbolType> {
        let ty = match self.kind(expr)? {
            // === Литералы ===
            NodeKind::Literal(Literal::Int(_)) => SymbolType::Int,
            NodeKind::Literal(Literal::Bool(_)) => SymbolType::Bool,
            NodeKind::Literal(Literal::Str(_)) => SymbolType::Str,
            NodeKind::Literal(Literal::None) => SymbolType::NoneType,

            NodeKind::Identifier { name } => match scope.vars.get(name) {
                Some(ty) => {
                    if let Some(callee) = scope.transferred.get(name) {
                        self.moves.push(PendingMove {
                            node: expr,
                            reason: format!(
                                "list '{}' is used after it was passed to '{}', which may mutate or return it",
                                name, callee
                            ),
                        });
                    }
                    ty.clone()
                }
                None if self.context.get_function(name).is_some() => {
                    return Err(self.type_error(
                        expr,
                        format!("function '{}' cannot be used as a value", name),
                    ))
                }
                None => {
                    return Err(TranspileError::UnboundName {
                        identifier: name.clone(),
                        position: self.ast.span(expr),
                    })
                }
            },

            NodeKind::ListLiteral { elements } => {
                let element = self.fresh();
                for &item in elements {
                    let ty = self.check_value(item, scope)?;
                    self.constrain(&element, &ty).map_err(|e| {
                        self.type_error(item, format!("list elements must share one type: {}", e))
                    })?;
                    self.note_move(item, || "a list literal".to_string())?;
                }
                SymbolType::list(self.resolve(&element))
            }

            NodeKind::FString { parts } => {
                for part in parts {
                    if let FStringPart::Expr(hole) = part {
                        self.check_value(*hole, scope)?;
                    }
                }
                SymbolType::Str
            }

            // === Операции ===
            NodeKind::BinaryOp { op, left, right } => {
                if matches!(op, BinOp::Eq | BinOp::Ne) {
                    let lt = self.check_value(*left, scope)?;
                    let rt = self.check_value(*right, scope)?;
                    self.constrain(&lt, &rt).map_err(|_| {
                        self.type_error(
                            expr,
                            format!(
                                "cannot compare {} with {}",
                                self.resolve(&lt),
                                self.resolve(&rt)
                            ),
                        )
                    })?;
                    SymbolType::Bool
                } else {
                    let what = format!("operator '{}'", op.symbol());
                    self.check_int(*left, scope, &what)?;
                    self.check_int(*right, scope, &what)?;
                    if op.is_comparison() {
                        SymbolType::Bool
                    } else {
                        SymbolType::Int
                    }
                }
            }

            NodeKind::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => {
                self.check_int(*operand, scope, "unary '-'")?;
                SymbolType::Int
            }

            // === Вызовы ===
            NodeKind::Call { func, args } => self.infer_call(expr, func, args, scope)?,

            NodeKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver_ty = self.check_value(*receiver, scope)?;
                match method.as_str() {
                    "append" => {
                        self.expect_arity(expr, ".append()", args, 1)?;
                        let element = self.require_list(*receiver, &receiver_ty, ".append()")?;
                        let value = self.check_value(args[0], scope)?;
                        self.constrain(&element, &value).map_err(|e| {
                            self.type_error(args[0], format!("cannot append to this list: {}", e))
                        })?;
                        self.note_move(args[0], || "an appended element".to_string())?;
                        SymbolType::NoneType
                    }
                    "reverse" => {
                        self.expect_arity(expr, ".reverse()", args, 0)?;
                        self.require_list(*receiver, &receiver_ty, ".reverse()")?;
                        SymbolType::NoneType
                    }
                    "pop" if !args.is_empty() => {
                        return Err(TranspileError::UnsupportedOperation {
                            name: ".pop(index)".to_string(),
                            position: self.ast.span(expr),
                        })
                    }
                    "pop" => self.require_list(*receiver, &receiver_ty, ".pop()")?,
                    other => {
                        return Err(TranspileError::UnsupportedOperation {
                            name: format!(".{}()", other),
                            position: self.ast.span(expr),
                        })
                    }
                }
            }

            other => {
                return Err(self.type_error(expr, format!("{} is not an expression", other.name())))
            }
        };
        Ok(self.record(expr, ty))
    }

    fn expect_arity(
        &self,
        expr: NodeId,
        what: &str,
        args: &[NodeId],
        expected: usize,
    ) -> TranspileResult<()> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(self.type_error(
                expr,
                format!(
                    "{} takes {} argument(s) ({} given)",
                    what,
                    expected,
                    args.len()
                ),
            ))
        }
    }

    fn infer_call(
        &mut self,
        expr: NodeId,
        func: &str,
        args: &[NodeId],
        scope: &mut Scope,
    ) -> TranspileResult<SymbolType> {
        if scope.vars.contains_key(func) {
            return Err(self.type_error(expr, format!("'{}' is not callable", func)));
        }
        match func {
            "len" => {
                self.expect_arity(expr, "len()", args, 1)?;
                let ty = self.check_value(args[0], scope)?;
                self.require_list(args[0], &ty, "len()")?;
                return Ok(SymbolType::Int);
            }
            "print" => {
                for &arg in args {
                    self.check_value(arg, scope)?;
                }
                return Ok(SymbolType::NoneType);
            }
            _ => {}
        }

        let Some(sig) = self.context.get_function(func).cloned() else {
            if UNSUPPORTED_BUILTINS.contains(&func) {
                return Err(TranspileError::UnsupportedOperation {
                    name: format!("{}()", func),
                    position: self.ast.span(expr),
                });
            }
            return Err(TranspileError::UnboundName {
                identifier: func.to_string(),
                position: self.ast.span(expr),
            });
        };

        if sig.params.len() != args.len() {
            return Err(self.type_error(
                expr,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    func,
                    sig.params.len(),
                    args.len()
                ),
            ));
        }
        let before: HashSet<String> = scope.transferred.keys().cloned().collect();
        let mut named = Vec::new();
        for (index, (&arg, (param, param_ty))) in args.iter().zip(sig.params.iter()).enumerate() {
            let ty = self.check_value(arg, scope)?;
            self.constrain(param_ty, &ty).map_err(|e| {
                self.type_error(
                    arg,
                    format!("argument '{}' of '{}': {}", param, func, e),
                )
            })?;
            if let NodeKind::Identifier { name } = self.kind(arg)? {
                named.push((index, arg, name));
            }
        }

        // Список, отданный вызову по имени, нельзя передать в тот же вызов
        // ещё раз: внутри он оказался бы общим
        for &(index, arg, name) in &named {
            let taken_by_nested = scope.transferred.contains_key(name) && !before.contains(name);
            let taken_by_sibling = named
                .iter()
                .any(|&(other, _, n)| other != index && n == name && sig.takes_param(other));
            if taken_by_nested || taken_by_sibling {
                self.moves.push(PendingMove {
                    node: arg,
                    reason: format!(
                        "list '{}' is passed to '{}' more than once; the call would share it",
                        name, func
                    ),
                });
            }
        }
        for &(index, _, name) in &named {
            if sig.takes_param(index) {
                scope.transferred.insert(name.clone(), func.to_string());
            }
        }
        Ok(self.resolve(&sig.return_type))
    }
}

// === Публичный API ===

/// Анализ модуля.
pub fn analyze(ast: &Ast) -> TranspileResult<TypedModule> {
    TypeChecker::new(ast).check()
}

/// Анализ модуля, вызывающего функции другого (уже проанализированного) модуля.
pub fn analyze_with_externals(
    ast: &Ast,
    externals: &[FunctionSignature],
) -> TranspileResult<TypedModule> {
    TypeChecker::new(ast).with_externals(externals).check()
}

/// Проверка корректности типов.
pub fn check_types(ast: &Ast) -> TranspileResult<()> {
    analyze(ast).map(|_| ())
}

/// Вывод типов, возвращает типы всех узлов-выражений.
pub fn infer_types(ast: &Ast) -> TranspileResult<HashMap<NodeId, SymbolType>> {
    Ok(analyze(ast)?.node_types)
}

// === Тесты ===

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn analyze_source(source: &str) -> TranspileResult<TypedModule> {
        analyze(&parse(source).expect("parse failed"))
    }

    fn signature(module: &TypedModule, name: &str) -> FunctionSignature {
        module.signature(name).cloned().expect("missing signature")
    }

    #[test]
    fn test_unify_same_types() {
        let s = unify(&SymbolType::Int, &SymbolType::Int).unwrap();
        assert!(s.mappings.is_empty());
    }

    #[test]
    fn test_unify_type_variable() {
        let t = SymbolType::Var(0);
        let s = unify(&t, &SymbolType::list(SymbolType::Int)).unwrap();
        assert_eq!(s.apply(&t), SymbolType::list(SymbolType::Int));
    }

    #[test]
    fn test_unify_mismatch() {
        assert!(unify(&SymbolType::Int, &SymbolType::Bool).is_err());
        assert!(unify(
            &SymbolType::list(SymbolType::Int),
            &SymbolType::list(SymbolType::Str)
        )
        .is_err());
    }

    #[test]
    fn test_occurs_check() {
        assert!(occurs_check(0, &SymbolType::list(SymbolType::Var(0))));
        assert!(!occurs_check(0, &SymbolType::Var(1)));
        let result = unify(&SymbolType::Var(0), &SymbolType::list(SymbolType::Var(0)));
        assert!(matches!(result, Err(TypeMismatch::InfiniteType { .. })));
    }

    #[test]
    fn test_len_infers_list_parameter() {
        let module = analyze_source("def my_len(x):\n    return len(x)\n").unwrap();
        let sig = signature(&module, "my_len");
        assert_eq!(sig.params[0].1, SymbolType::list(SymbolType::Int));
        assert_eq!(sig.return_type, SymbolType::Int);
    }

    #[test]
    fn test_process_list_returns_optional() {
        let source = "\
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
        let module = analyze_source(source).unwrap();
        let sig = signature(&module, "process_list");
        assert_eq!(sig.params[0].1, SymbolType::list(SymbolType::Int));
        assert_eq!(sig.return_type, SymbolType::optional(SymbolType::Int));
        assert_eq!(sig.mutated_params, vec![0]);
    }

    #[test]
    fn test_main_guard_is_entry() {
        let source = "\
def my_len(x):
    return len(x)

if __name__ == \"__main__\":
    test_list = [1, 2, 3, 4, 5]
    result = my_len(test_list)
    assert result == 5, f\"Expected 5, got {result}\"
";
        let module = analyze_source(source).unwrap();
        assert_eq!(module.entry.len(), 3);
    }

    #[test]
    fn test_forward_call_and_string_list() {
        let source = "\
def first(xs):
    return helper(xs)

def helper(ys):
    return len(ys)

print(first([\"a\", \"b\"]))
";
        let module = analyze_source(source).unwrap();
        assert_eq!(signature(&module, "first").return_type, SymbolType::Int);
        assert_eq!(
            signature(&module, "helper").params[0].1,
            SymbolType::list(SymbolType::Str)
        );
    }

    #[test]
    fn test_len_of_int_is_type_error() {
        let err = analyze_source("def f(x: int):\n    return len(x)\n").unwrap_err();
        match err {
            TranspileError::TypeError { reason, .. } => {
                assert_eq!(reason, "len() requires a list, found int")
            }
            other => panic!("Expected TypeError, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_builtin_and_method() {
        let err = analyze_source("x = sorted([3, 1])\n").unwrap_err();
        assert!(matches!(err, TranspileError::UnsupportedOperation { ref name, .. } if name == "sorted()"));

        let err = analyze_source("xs = [1]\nxs.insert(0, 2)\n").unwrap_err();
        assert!(matches!(err, TranspileError::UnsupportedOperation { ref name, .. } if name == ".insert()"));

        let err = analyze_source("xs = [1]\nx = xs.pop(0)\n").unwrap_err();
        assert!(matches!(err, TranspileError::UnsupportedOperation { ref name, .. } if name == ".pop(index)"));
    }

    #[test]
    fn test_unbound_name() {
        let err = analyze_source("print(missing)\n").unwrap_err();
        assert!(matches!(err, TranspileError::UnboundName { ref identifier, .. } if identifier == "missing"));
    }

    #[test]
    fn test_name_bound_in_one_branch_is_unbound_after_if() {
        let source = "\
def f(flag: bool):
    if flag:
        y = 1
    return y
";
        let err = analyze_source(source).unwrap_err();
        assert!(matches!(err, TranspileError::UnboundName { ref identifier, .. } if identifier == "y"));
    }

    #[test]
    fn test_name_bound_in_both_branches_is_visible() {
        let source = "\
def f(flag: bool):
    if flag:
        y = 1
    else:
        y = 2
    return y
";
        let module = analyze_source(source).unwrap();
        assert_eq!(signature(&module, "f").return_type, SymbolType::Int);
    }

    #[test]
    fn test_list_aliasing_rejected() {
        let err = analyze_source("a = [1, 2]\nb = a\n").unwrap_err();
        match err {
            TranspileError::TypeError { reason, .. } => assert!(reason.contains("aliased")),
            other => panic!("Expected TypeError, got {:?}", other),
        }
    }

    fn type_error_reason(source: &str) -> String {
        match analyze_source(source) {
            Err(TranspileError::TypeError { reason, .. }) => reason,
            other => panic!("Expected TypeError, got {:?}", other),
        }
    }

    #[test]
    fn test_named_list_given_to_mutating_call() {
        // Имя больше не читается: изменение никто не увидит
        let source = "def push(xs):\n    xs.append(1)\n\nitems = [1]\npush(items)\n";
        assert!(analyze_source(source).is_ok());

        // Имя перепривязано после вызова
        let source = "\
def push(xs):
    xs.append(1)

items = [1]
push(items)
items = [2, 3]
print(len(items))
";
        assert!(analyze_source(source).is_ok());

        let source = "def push(xs):\n    xs.append(1)\n\npush([1])\n";
        assert!(analyze_source(source).is_ok());
    }

    #[test]
    fn test_named_list_used_after_mutating_call_rejected() {
        let source = "\
def push(xs):
    xs.append(1)

items = [1]
push(items)
print(len(items))
";
        let reason = type_error_reason(source);
        assert!(reason.contains("used after it was passed to 'push'"), "{}", reason);
    }

    #[test]
    fn test_returned_parameter_is_an_alias() {
        let source = "\
def ident(xs):
    return xs

def f(xs):
    ys = ident(xs)
    ys.append(9)
    return len(xs)
";
        let reason = type_error_reason(source);
        assert!(reason.contains("list 'xs' is used after"), "{}", reason);

        let module = analyze_source("def ident(xs):\n    return xs\n").unwrap();
        assert_eq!(signature(&module, "ident").returned_params, vec![0]);
        assert!(signature(&module, "ident").mutated_params.is_empty());
    }

    #[test]
    fn test_effects_propagate_through_calls() {
        let source = "\
def outer(xs):
    inner(xs)

def inner(ys):
    ys.append(1)

def forward(xs):
    return ident(xs)

def ident(ys):
    return ys
";
        let module = analyze_source(source).unwrap();
        assert_eq!(signature(&module, "outer").mutated_params, vec![0]);
        assert_eq!(signature(&module, "forward").returned_params, vec![0]);
    }

    #[test]
    fn test_reading_call_keeps_name_usable() {
        let source = "\
def size(xs):
    return len(xs)

items = [1, 2]
n = size(items)
print(n, len(items))
";
        assert!(analyze_source(source).is_ok());
    }

    #[test]
    fn test_list_passed_twice_to_taking_call_rejected() {
        let source = "\
def move_last(src: list[int], dst: list[int]):
    dst.append(src.pop())

items = [1, 2]
move_last(items, items)
";
        let reason = type_error_reason(source);
        assert!(reason.contains("more than once"), "{}", reason);
    }

    #[test]
    fn test_transfer_in_one_branch_counts_after_if() {
        let source = "\
def push(xs):
    xs.append(1)

def f(flag: bool) -> int:
    items = [1]
    if flag:
        push(items)
    return len(items)
";
        let reason = type_error_reason(source);
        assert!(reason.contains("'items'"), "{}", reason);
    }

    #[test]
    fn test_none_value_use_rejected() {
        let err = analyze_source("xs = [1]\ny = xs.append(2)\n").unwrap_err();
        assert!(matches!(err, TranspileError::TypeError { .. }));
        let err = analyze_source("x = None\n").unwrap_err();
        assert!(matches!(err, TranspileError::TypeError { .. }));
    }

    #[test]
    fn test_condition_must_be_bool() {
        let err = analyze_source("xs = [1]\nif xs:\n    pass\n").unwrap_err();
        match err {
            TranspileError::TypeError { reason, .. } => {
                assert_eq!(reason, "condition must be bool, found list[int]")
            }
            other => panic!("Expected TypeError, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_return_type_checked() {
        assert!(analyze_source("def f() -> int:\n    return \"s\"\n").is_err());
        assert!(analyze_source("def f(xs: list[int]) -> Optional[int]:\n    return xs.pop()\n").is_ok());
    }

    #[test]
    fn test_arity_mismatch() {
        let err = analyze_source("def f(a, b):\n    return a + b\n\nprint(f(1))\n").unwrap_err();
        assert!(matches!(err, TranspileError::TypeError { .. }));
    }

    #[test]
    fn test_nested_def_recorded() {
        let module = analyze_source("def f():\n    def g():\n        pass\n    pass\n").unwrap();
        assert_eq!(module.nested_defs.len(), 1);
    }

    #[test]
    fn test_externals_are_callable() {
        let module = analyze_source("def f(xs):\n    return len(xs)\n").unwrap();
        let fixture = parse("print(f([1, 2, 3]))\n").unwrap();
        let typed = analyze_with_externals(&fixture, &module.functions).unwrap();
        assert!(typed.functions.is_empty());
        assert_eq!(typed.externals.len(), 1);
        assert_eq!(typed.entry.len(), 1);
    }

    #[test]
    fn test_infer_types_defaults_unresolved_to_int() {
        let ast = parse("xs = []\nprint(len(xs))\n").unwrap();
        let types = infer_types(&ast).unwrap();
        let list_ty = types
            .values()
            .find(|t| t.is_list())
            .cloned()
            .unwrap();
        assert_eq!(list_ty, SymbolType::list(SymbolType::Int));
    }
}
