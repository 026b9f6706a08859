// Carbon Code Generator
// Lowers an analyzed FileNode into a file Bytecode with nested class Bytecodes

use super::address::{Address, AddressKind};
use super::bytecode::{Bytecode, BytecodeBase, EnumInfo};
use super::function::{Function, MEMBER_INITIALIZER, STATIC_INITIALIZER};
use super::opcode::{Opcode, OpcodeWriter};
use crate::ast::*;
use crate::error::{CarbonError, CarbonResult};
use crate::vm::ops::Operator;
use crate::vm::value::Value;
use rustc_hash::FxHashMap;
use std::rc::Rc;
use tracing::debug;

/// Jump bookkeeping for the innermost loop or switch
struct LoopContext {
    breaks: Vec<usize>,
    continues: Vec<usize>,
    is_switch: bool,
}

/// Where an assignment stores its value
enum Target {
    Addr(Address),
    Member { on: Address, name: u32 },
    Mapped { on: Address, key: Address },
}

pub struct CodeGen<'a> {
    file: &'a FileNode,
    names: Vec<String>,
    name_ids: FxHashMap<String, u32>,
    consts: Vec<Value>,

    // Per function state
    writer: OpcodeWriter,
    scopes: Vec<Vec<(String, u32)>>,
    next_slot: u32,
    max_slot: u32,
    loops: Vec<LoopContext>,
    class: Option<usize>,
    line: usize,
}

impl<'a> CodeGen<'a> {
    pub fn new(file: &'a FileNode) -> Self {
        Self {
            file,
            names: Vec::new(),
            name_ids: FxHashMap::default(),
            consts: Vec::new(),
            writer: OpcodeWriter::new(),
            scopes: Vec::new(),
            next_slot: 0,
            max_slot: 0,
            loops: Vec::new(),
            class: None,
            line: 0,
        }
    }

    /// Generate the file bytecode
    pub fn generate(mut self) -> CarbonResult<Rc<Bytecode>> {
        let file = self.file;
        let mut bytecode = Bytecode::new_file(&file.path);

        for import in &file.imports {
            let imported = import.bytecode.clone().ok_or_else(|| {
                CarbonError::bug(format!("import \"{}\" was not compiled.", import.alias))
            })?;
            bytecode.externs.insert(import.alias.clone(), imported);
        }

        self.members(&file.members, &mut bytecode, None)?;

        let mut classes: Vec<Rc<Bytecode>> = Vec::with_capacity(file.classes.len());
        for index in 0..file.classes.len() {
            classes.push(Rc::new(self.class(index)?));
        }

        // Inheritance links, once every class exists
        for (class, node) in classes.iter().zip(file.classes.iter()) {
            let base = match &node.base {
                ClassBase::None => BytecodeBase::None,
                ClassBase::Local(i) => BytecodeBase::Local(classes[*i].clone()),
                ClassBase::Native(name) => BytecodeBase::Native(name.clone()),
                ClassBase::Extern {
                    bytecode: Some(b), ..
                } => BytecodeBase::Extern(b.clone()),
                ClassBase::Named(name) | ClassBase::Extern { name, .. } => {
                    return Err(CarbonError::bug(format!(
                        "base \"{}\" of class \"{}\" was not resolved.",
                        name, node.name
                    )))
                }
            };
            class.set_base(base);
        }

        for class in &classes {
            bytecode
                .classes
                .insert(class.name().to_string(), class.clone());
        }
        bytecode.global_names = std::mem::take(&mut self.names);
        bytecode.global_consts = std::mem::take(&mut self.consts);

        let bytecode = Rc::new(bytecode);
        for class in &classes {
            class.set_file(&bytecode);
        }

        debug!(
            file = %file.path,
            classes = classes.len(),
            names = bytecode.global_names.len(),
            constants = bytecode.global_consts.len(),
            "generated bytecode"
        );
        Ok(bytecode)
    }

    // ==================== Declarations ====================

    /// Statics, constants, enums and functions shared by files and classes
    fn members(
        &mut self,
        members: &Members,
        bytecode: &mut Bytecode,
        class_name: Option<&str>,
    ) -> CarbonResult<()> {
        for var in members.vars.iter().filter(|v| v.is_static) {
            bytecode
                .static_vars
                .borrow_mut()
                .insert(var.name.clone(), Value::Null);
        }
        for constant in &members.constants {
            let value = constant.resolved().cloned().ok_or_else(|| {
                CarbonError::bug(format!("constant \"{}\" was not folded.", constant.name))
            })?;
            bytecode.constants.insert(constant.name.clone(), value);
        }
        for node in &members.enums {
            let values = node
                .values
                .iter()
                .map(|v| (v.name.clone(), v.value))
                .collect();
            bytecode
                .enums
                .insert(node.name.clone(), Rc::new(EnumInfo::new(&node.name, values)));
        }
        if let Some(unnamed) = &members.unnamed_enum {
            for value in &unnamed.values {
                bytecode.unnamed_enums.insert(value.name.clone(), value.value);
            }
        }

        for func in &members.functions {
            let compiled = Rc::new(self.function(func, class_name)?);
            if func.is_constructor {
                bytecode.constructor = Some(compiled);
            } else {
                bytecode.functions.insert(func.name.clone(), compiled);
            }
        }

        if members.vars.iter().any(|v| v.is_static && v.init.is_some()) {
            let init = self.initializer(STATIC_INITIALIZER, &members.vars, true, class_name)?;
            bytecode.static_initializer = Some(Rc::new(init));
        }
        Ok(())
    }

    fn class(&mut self, index: usize) -> CarbonResult<Bytecode> {
        let file = self.file;
        let node = &file.classes[index];
        let mut bytecode = Bytecode::new_class(&node.name, &self.file.path);

        let base_count = self.base_member_count(index);
        let own = node.members.vars.iter().filter(|v| !v.is_static);
        for (i, var) in own.enumerate() {
            bytecode
                .members
                .insert(var.name.clone(), (base_count + i) as u32);
        }
        bytecode.member_count = self.member_count(index);

        self.class = Some(index);
        let result = self.class_members(index, &mut bytecode);
        self.class = None;
        result?;
        Ok(bytecode)
    }

    fn class_members(&mut self, index: usize, bytecode: &mut Bytecode) -> CarbonResult<()> {
        let file = self.file;
        let node = &file.classes[index];
        self.members(&node.members, bytecode, Some(&node.name))?;
        if node.members.vars.iter().any(|v| !v.is_static && v.init.is_some()) {
            let init =
                self.initializer(MEMBER_INITIALIZER, &node.members.vars, false, Some(&node.name))?;
            bytecode.member_initializer = Some(Rc::new(init));
        }
        Ok(())
    }

    /// Instance members of a class including inherited ones
    fn member_count(&self, class: usize) -> usize {
        let own = self.file.classes[class]
            .members
            .vars
            .iter()
            .filter(|v| !v.is_static)
            .count();
        self.base_member_count(class) + own
    }

    fn base_member_count(&self, class: usize) -> usize {
        match &self.file.classes[class].base {
            ClassBase::Local(base) => self.member_count(*base),
            ClassBase::Extern {
                bytecode: Some(b), ..
            } => b.member_count(),
            _ => 0,
        }
    }

    fn member_index(&self, class: usize, name: &str) -> Option<u32> {
        let node = &self.file.classes[class];
        let own = node
            .members
            .vars
            .iter()
            .filter(|v| !v.is_static)
            .position(|v| v.name == name);
        if let Some(i) = own {
            return Some((self.base_member_count(class) + i) as u32);
        }
        match &node.base {
            ClassBase::Local(base) => self.member_index(*base, name),
            ClassBase::Extern {
                bytecode: Some(b), ..
            } => b.get_member_index(name),
            _ => None,
        }
    }

    fn native_base(&self, class: usize) -> Option<String> {
        match &self.file.classes[class].base {
            ClassBase::Native(name) => Some(name.clone()),
            ClassBase::Local(base) => self.native_base(*base),
            ClassBase::Extern {
                bytecode: Some(b), ..
            } => b.native_base(),
            _ => None,
        }
    }

    fn begin_function(&mut self) {
        self.writer = OpcodeWriter::new();
        self.scopes = vec![Vec::new()];
        self.next_slot = 0;
        self.max_slot = 0;
        self.loops.clear();
    }

    fn end_function(&mut self, mut func: Function) -> Function {
        self.writer.write_op(Opcode::End, self.line);
        let writer = std::mem::take(&mut self.writer);
        func.opcodes = writer.opcodes;
        func.op_dbg = writer.op_dbg;
        func.stack_size = self.max_slot as usize;
        func
    }

    fn function(&mut self, node: &FunctionNode, class_name: Option<&str>) -> CarbonResult<Function> {
        self.begin_function();
        self.line = node.span.line();
        self.statements(&node.body.statements)?;
        let func = Function {
            name: node.name.clone(),
            class_name: class_name.map(str::to_string),
            is_static: node.is_static,
            arg_count: node.params.len(),
            default_args: node.default_args.clone(),
            is_reference: node.params.iter().map(|p| p.is_reference).collect(),
            ..Default::default()
        };
        Ok(self.end_function(func))
    }

    /// `@static_initializer` / `@member_initializer`: evaluate field initializers in order
    fn initializer(
        &mut self,
        name: &str,
        vars: &[VarNode],
        statics: bool,
        class_name: Option<&str>,
    ) -> CarbonResult<Function> {
        self.begin_function();
        for var in vars.iter().filter(|v| v.is_static == statics) {
            let Some(init) = &var.init else {
                continue;
            };
            self.line = var.span.line();
            let target = if statics {
                Address::new(AddressKind::StaticMember, self.name_id(&var.name))
            } else {
                let class = self
                    .class
                    .ok_or_else(|| CarbonError::bug("member initializer outside a class."))?;
                let index = self.member_index(class, &var.name).ok_or_else(|| {
                    CarbonError::bug(format!("member \"{}\" has no slot.", var.name))
                })?;
                Address::new(AddressKind::MemberVar, index)
            };
            let mark = self.next_slot;
            self.expr(init, Some(target))?;
            self.next_slot = mark;
        }
        let func = Function {
            name: name.to_string(),
            class_name: class_name.map(str::to_string),
            is_static: statics,
            ..Default::default()
        };
        Ok(self.end_function(func))
    }

    // ==================== Statements ====================

    fn statements(&mut self, statements: &[Stmt]) -> CarbonResult<()> {
        for stmt in statements {
            self.statement(stmt)?;
        }
        Ok(())
    }

    /// A block with its own scope
    fn block(&mut self, block: &Block) -> CarbonResult<()> {
        let mark = self.next_slot;
        self.scopes.push(Vec::new());
        let result = self.statements(&block.statements);
        self.scopes.pop();
        self.next_slot = mark;
        result
    }

    fn statement(&mut self, stmt: &Stmt) -> CarbonResult<()> {
        self.line = stmt.span.line();
        let mark = self.next_slot;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expr(expr, None)?;
            }
            StmtKind::Var(var) => {
                self.local_var(var)?;
                return Ok(());
            }
            StmtKind::If {
                cond,
                body,
                else_body,
            } => {
                let cond = self.expr(cond, None)?;
                self.emit(Opcode::JumpIfNot);
                self.writer.write_addr(cond);
                let to_else = self.writer.write_placeholder();
                self.block(body)?;
                match else_body {
                    Some(else_body) => {
                        self.emit(Opcode::Jump);
                        let to_end = self.writer.write_placeholder();
                        self.writer.patch_here(to_else);
                        self.block(else_body)?;
                        self.writer.patch_here(to_end);
                    }
                    None => self.writer.patch_here(to_else),
                }
            }
            StmtKind::While { cond, body } => {
                let start = self.writer.position();
                let cond = self.expr(cond, None)?;
                self.emit(Opcode::JumpIfNot);
                self.writer.write_addr(cond);
                let to_end = self.writer.write_placeholder();
                self.push_loop(false);
                self.block(body)?;
                self.emit(Opcode::Jump);
                self.writer.write(start);
                self.writer.patch_here(to_end);
                self.pop_loop(start);
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push(Vec::new());
                let result = self.for_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body);
                self.scopes.pop();
                result?;
            }
            StmtKind::Foreach {
                var,
                iterable,
                body,
            } => {
                self.scopes.push(Vec::new());
                let result = self.foreach(var, iterable, body);
                self.scopes.pop();
                result?;
            }
            StmtKind::Switch { value, cases } => self.switch(value, cases)?,
            StmtKind::Break => {
                self.emit(Opcode::Jump);
                let hole = self.writer.write_placeholder();
                let context = self
                    .loops
                    .last_mut()
                    .ok_or_else(|| CarbonError::bug("break outside a loop."))?;
                context.breaks.push(hole);
            }
            StmtKind::Continue => {
                self.emit(Opcode::Jump);
                let hole = self.writer.write_placeholder();
                let context = self
                    .loops
                    .iter_mut()
                    .rev()
                    .find(|l| !l.is_switch)
                    .ok_or_else(|| CarbonError::bug("continue outside a loop."))?;
                context.continues.push(hole);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(value) => self.expr(value, None)?,
                    None => Address::null(),
                };
                self.emit(Opcode::Return);
                self.writer.write_addr(value);
            }
        }
        self.next_slot = mark;
        Ok(())
    }

    fn local_var(&mut self, var: &VarNode) -> CarbonResult<()> {
        let slot = self.alloc();
        let target = Address::stack(slot);
        let mark = self.next_slot;
        // Loops reuse slots, so an uninitialized local is reset every time
        match &var.init {
            Some(init) => {
                self.expr(init, Some(target))?;
            }
            None => {
                let null = self.const_addr(&Value::Null);
                self.emit(Opcode::Assign);
                self.writer.write_addr(target);
                self.writer.write_addr(null);
            }
        }
        self.next_slot = mark;
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((var.name.clone(), slot));
        }
        Ok(())
    }

    fn for_loop(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Block,
    ) -> CarbonResult<()> {
        if let Some(init) = init {
            self.statement(init)?;
        }
        let start = self.writer.position();
        let to_end = match cond {
            Some(cond) => {
                let mark = self.next_slot;
                let cond = self.expr(cond, None)?;
                self.next_slot = mark;
                self.emit(Opcode::JumpIfNot);
                self.writer.write_addr(cond);
                Some(self.writer.write_placeholder())
            }
            None => None,
        };

        self.push_loop(false);
        let mark = self.next_slot;
        self.statements(&body.statements)?;
        self.next_slot = mark;
        let continue_target = self.writer.position();
        if let Some(step) = step {
            self.expr(step, None)?;
            self.next_slot = mark;
        }
        self.emit(Opcode::Jump);
        self.writer.write(start);
        if let Some(to_end) = to_end {
            self.writer.patch_here(to_end);
        }
        self.pop_loop(continue_target);
        Ok(())
    }

    fn foreach(&mut self, var: &VarNode, iterable: &Expr, body: &Block) -> CarbonResult<()> {
        let iterator = Address::stack(self.alloc());
        let slot = self.alloc();
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((var.name.clone(), slot));
        }

        let mark = self.next_slot;
        let on = self.expr(iterable, None)?;
        self.next_slot = mark;
        self.emit(Opcode::IterBegin);
        self.writer.write_addr(iterator);
        self.writer.write_addr(on);

        let start = self.writer.position();
        self.emit(Opcode::IterNext);
        self.writer.write_addr(Address::stack(slot));
        self.writer.write_addr(iterator);
        let to_end = self.writer.write_placeholder();

        self.push_loop(false);
        self.statements(&body.statements)?;
        self.next_slot = mark;
        self.emit(Opcode::Jump);
        self.writer.write(start);
        self.writer.patch_here(to_end);
        self.pop_loop(start);
        Ok(())
    }

    fn switch(&mut self, value: &Expr, cases: &[SwitchCase]) -> CarbonResult<()> {
        let value = self.expr(value, None)?;
        let check = Address::stack(self.alloc());

        let mut to_case = Vec::with_capacity(cases.len());
        let mut default_case = None;
        for (i, case) in cases.iter().enumerate() {
            let Some(case_value) = &case.value else {
                default_case = Some(i);
                to_case.push(None);
                continue;
            };
            self.line = case.span.line();
            let mark = self.next_slot;
            let case_value = self.expr(case_value, None)?;
            self.next_slot = mark;
            self.operator(Operator::EqCheck, value, case_value, check);
            self.emit(Opcode::JumpIf);
            self.writer.write_addr(check);
            to_case.push(Some(self.writer.write_placeholder()));
        }
        self.emit(Opcode::Jump);
        let to_default = self.writer.write_placeholder();

        self.push_loop(true);
        for (i, case) in cases.iter().enumerate() {
            if let Some(hole) = to_case[i] {
                self.writer.patch_here(hole);
            }
            if default_case == Some(i) {
                self.writer.patch_here(to_default);
            }
            self.block(&case.body)?;
        }
        if default_case.is_none() {
            self.writer.patch_here(to_default);
        }
        let end = self.writer.position();
        self.pop_loop(end);
        Ok(())
    }

    fn push_loop(&mut self, is_switch: bool) {
        self.loops.push(LoopContext {
            breaks: Vec::new(),
            continues: Vec::new(),
            is_switch,
        });
    }

    /// Patch breaks to the current offset and continues to `continue_target`
    fn pop_loop(&mut self, continue_target: u32) {
        let Some(context) = self.loops.pop() else {
            return;
        };
        for hole in context.breaks {
            self.writer.patch_here(hole);
        }
        if context.is_switch {
            // A continue inside a switch belongs to the enclosing loop
            if let Some(outer) = self.loops.iter_mut().rev().find(|l| !l.is_switch) {
                outer.continues.extend(context.continues);
            }
            return;
        }
        for hole in context.continues {
            self.writer.patch(hole, continue_target);
        }
    }

    // ==================== Expressions ====================

    /// Compile `expr`; the result lands in `dst` when given, else wherever is cheapest
    fn expr(&mut self, expr: &Expr, dst: Option<Address>) -> CarbonResult<Address> {
        if !expr.span.is_unknown() {
            self.line = expr.span.line();
        }
        match &expr.kind {
            ExprKind::Const(value) => {
                let addr = self.const_addr(value);
                Ok(self.move_to(addr, dst))
            }
            ExprKind::Identifier(id) => {
                let addr = self.identifier(id)?;
                Ok(self.move_to(addr, dst))
            }
            ExprKind::This | ExprKind::Super => Ok(self.move_to(Address::this(), dst)),
            ExprKind::BuiltinFunc(func) => {
                let addr = Address::new(AddressKind::BuiltinFunc, *func as u32);
                Ok(self.move_to(addr, dst))
            }
            ExprKind::BuiltinType(ty) => {
                let addr = Address::new(AddressKind::BuiltinType, *ty as u32);
                Ok(self.move_to(addr, dst))
            }
            ExprKind::Array(items) => {
                let args = self.args(items)?;
                let dst = self.dst(dst);
                self.emit(Opcode::ConstructLiteralArray);
                self.writer.write_args(&args);
                self.writer.write_addr(dst);
                Ok(dst)
            }
            ExprKind::Map(pairs) => {
                let mut addrs = Vec::with_capacity(pairs.len() * 2);
                for (key, value) in pairs {
                    addrs.push(self.expr(key, None)?);
                    addrs.push(self.expr(value, None)?);
                }
                let dst = self.dst(dst);
                self.emit(Opcode::ConstructLiteralMap);
                self.writer.write(pairs.len() as u32);
                for addr in addrs {
                    self.writer.write_addr(addr);
                }
                self.writer.write_addr(dst);
                Ok(dst)
            }
            ExprKind::Index { base, member } => {
                let on = self.expr(base, None)?;
                let name = self.name_id(&member.name);
                let dst = self.dst(dst);
                self.get(on, name, dst);
                Ok(dst)
            }
            ExprKind::MappedIndex { base, key } => {
                let on = self.expr(base, None)?;
                let key = self.expr(key, None)?;
                let dst = self.dst(dst);
                self.emit(Opcode::GetMapped);
                self.writer.write_addr(on);
                self.writer.write_addr(key);
                self.writer.write_addr(dst);
                Ok(dst)
            }
            ExprKind::Operator { op, args } => self.operator_expr(*op, args, dst),
            ExprKind::Call { base, method, args } => {
                self.call(base.as_deref(), method.as_ref(), args, dst)
            }
        }
    }

    fn identifier(&mut self, id: &Identifier) -> CarbonResult<Address> {
        let addr = match &id.ident_ref {
            IdentRef::Parameter(index) => Address::new(AddressKind::Parameter, *index as u32),
            IdentRef::LocalVar => {
                let slot = self.find_local(&id.name).ok_or_else(|| {
                    CarbonError::bug(format!("local \"{}\" has no slot.", id.name))
                })?;
                Address::stack(slot)
            }
            IdentRef::LocalConst(value)
            | IdentRef::MemberConst(value)
            | IdentRef::EnumValue(value) => self.const_addr(value),
            IdentRef::MemberVar(RefBase::Native) => {
                let name = self.name_id(&id.name);
                let dst = self.temp();
                self.get(Address::this(), name, dst);
                dst
            }
            IdentRef::MemberVar(_) => {
                let class = self
                    .class
                    .ok_or_else(|| CarbonError::bug("member access outside a class."))?;
                let index = self.member_index(class, &id.name).ok_or_else(|| {
                    CarbonError::bug(format!("member \"{}\" has no slot.", id.name))
                })?;
                Address::new(AddressKind::MemberVar, index)
            }
            IdentRef::StaticVar(RefBase::Native) => {
                let on = self.native_class_addr()?;
                let name = self.name_id(&id.name);
                let dst = self.temp();
                self.get(on, name, dst);
                dst
            }
            IdentRef::EnumName(EnumRef::Native { class, name }) => {
                let on = Address::new(AddressKind::NativeClass, self.name_id(class));
                let name = self.name_id(name);
                let dst = self.temp();
                self.get(on, name, dst);
                dst
            }
            IdentRef::StaticVar(_)
            | IdentRef::Function(_)
            | IdentRef::CarbonClass(_)
            | IdentRef::EnumName(_) => {
                Address::new(AddressKind::StaticMember, self.name_id(&id.name))
            }
            IdentRef::NativeClass(name) => {
                Address::new(AddressKind::NativeClass, self.name_id(name))
            }
            IdentRef::Extern(_) => Address::new(AddressKind::Extern, self.name_id(&id.name)),
            IdentRef::Unknown => {
                return Err(CarbonError::bug(format!(
                    "identifier \"{}\" reached code generation unresolved.",
                    id.name
                )))
            }
        };
        Ok(addr)
    }

    fn native_class_addr(&mut self) -> CarbonResult<Address> {
        let class = self
            .class
            .ok_or_else(|| CarbonError::bug("native member access outside a class."))?;
        let native = self
            .native_base(class)
            .ok_or_else(|| CarbonError::bug("class has no native base."))?;
        Ok(Address::new(AddressKind::NativeClass, self.name_id(&native)))
    }

    fn operator_expr(
        &mut self,
        op: OpType,
        args: &[Expr],
        dst: Option<Address>,
    ) -> CarbonResult<Address> {
        if op.is_assignment() {
            return self.assignment(op, &args[0], &args[1], dst);
        }
        if matches!(op, OpType::And | OpType::Or) {
            return self.short_circuit(op == OpType::And, &args[0], &args[1], dst);
        }
        let operator = op
            .to_operator()
            .ok_or_else(|| CarbonError::bug(format!("operator {} has no opcode.", op.symbol())))?;
        let left = self.expr(&args[0], None)?;
        let right = match args.get(1) {
            Some(arg) => self.expr(arg, None)?,
            None => Address::null(),
        };
        let dst = self.dst(dst);
        self.operator(operator, left, right, dst);
        Ok(dst)
    }

    fn short_circuit(
        &mut self,
        is_and: bool,
        left: &Expr,
        right: &Expr,
        dst: Option<Address>,
    ) -> CarbonResult<Address> {
        let jump = if is_and {
            Opcode::JumpIfNot
        } else {
            Opcode::JumpIf
        };
        let dst = self.dst(dst);

        let left = self.expr(left, None)?;
        self.emit(jump);
        self.writer.write_addr(left);
        let first = self.writer.write_placeholder();

        let right = self.expr(right, None)?;
        self.emit(jump);
        self.writer.write_addr(right);
        let second = self.writer.write_placeholder();

        // Both operands passed: true for &&, false for ||
        self.emit(if is_and { Opcode::SetTrue } else { Opcode::SetFalse });
        self.writer.write_addr(dst);
        self.emit(Opcode::Jump);
        let to_end = self.writer.write_placeholder();

        self.writer.patch_here(first);
        self.writer.patch_here(second);
        self.emit(if is_and { Opcode::SetFalse } else { Opcode::SetTrue });
        self.writer.write_addr(dst);
        self.writer.patch_here(to_end);
        Ok(dst)
    }

    fn target(&mut self, expr: &Expr) -> CarbonResult<Target> {
        let target = match &expr.kind {
            ExprKind::Identifier(id) => match &id.ident_ref {
                IdentRef::MemberVar(RefBase::Native) => Target::Member {
                    on: Address::this(),
                    name: self.name_id(&id.name),
                },
                IdentRef::StaticVar(RefBase::Native) => Target::Member {
                    on: self.native_class_addr()?,
                    name: self.name_id(&id.name),
                },
                _ => Target::Addr(self.identifier(id)?),
            },
            ExprKind::Index { base, member } => Target::Member {
                on: self.expr(base, None)?,
                name: self.name_id(&member.name),
            },
            ExprKind::MappedIndex { base, key } => Target::Mapped {
                on: self.expr(base, None)?,
                key: self.expr(key, None)?,
            },
            _ => {
                return Err(CarbonError::bug(
                    "assignment target was not validated by the analyzer.",
                ))
            }
        };
        Ok(target)
    }

    fn assignment(
        &mut self,
        op: OpType,
        target: &Expr,
        value: &Expr,
        dst: Option<Address>,
    ) -> CarbonResult<Address> {
        let target = self.target(target)?;

        let result = match (op.to_operator(), &target) {
            (None, Target::Addr(addr)) => self.expr(value, Some(*addr))?,
            (None, _) => {
                let value = self.expr(value, None)?;
                self.store(&target, value);
                value
            }
            (Some(operator), Target::Addr(addr)) => {
                let rhs = self.expr(value, None)?;
                self.operator(operator, *addr, rhs, *addr);
                *addr
            }
            (Some(operator), _) => {
                let current = self.temp();
                match &target {
                    Target::Member { on, name } => self.get(*on, *name, current),
                    Target::Mapped { on, key } => {
                        self.emit(Opcode::GetMapped);
                        self.writer.write_addr(*on);
                        self.writer.write_addr(*key);
                        self.writer.write_addr(current);
                    }
                    Target::Addr(_) => {}
                }
                let rhs = self.expr(value, None)?;
                self.operator(operator, current, rhs, current);
                self.store(&target, current);
                current
            }
        };
        Ok(self.move_to(result, dst))
    }

    fn store(&mut self, target: &Target, value: Address) {
        match target {
            Target::Addr(addr) => {
                self.emit(Opcode::Assign);
                self.writer.write_addr(*addr);
                self.writer.write_addr(value);
            }
            Target::Member { on, name } => {
                self.emit(Opcode::Set);
                self.writer.write_addr(*on);
                self.writer.write(*name);
                self.writer.write_addr(value);
            }
            Target::Mapped { on, key } => {
                self.emit(Opcode::SetMapped);
                self.writer.write_addr(*on);
                self.writer.write_addr(*key);
                self.writer.write_addr(value);
            }
        }
    }

    fn call(
        &mut self,
        base: Option<&Expr>,
        method: Option<&Identifier>,
        args: &[Expr],
        dst: Option<Address>,
    ) -> CarbonResult<Address> {
        match (base, method) {
            // f(x): a function, a class or a native class of this file
            (None, Some(method)) => {
                let opcode = match &method.ident_ref {
                    IdentRef::Function(_) => Opcode::CallFunc,
                    IdentRef::CarbonClass(_) => Opcode::ConstructCarbon,
                    IdentRef::NativeClass(_) => Opcode::ConstructNative,
                    _ => {
                        // A callable variable
                        let on = self.identifier(method)?;
                        return self.call_value(on, args, dst);
                    }
                };
                let name = self.name_id(&method.name);
                let args = self.args(args)?;
                let dst = self.dst(dst);
                self.emit(opcode);
                self.writer.write(name);
                self.writer.write_args(&args);
                self.writer.write_addr(dst);
                Ok(dst)
            }
            (Some(base), None) => match &base.kind {
                ExprKind::BuiltinFunc(func) => {
                    let args = self.args(args)?;
                    let dst = self.dst(dst);
                    self.emit(Opcode::CallBuiltin);
                    self.writer.write(*func as u32);
                    self.writer.write_args(&args);
                    self.writer.write_addr(dst);
                    Ok(dst)
                }
                ExprKind::BuiltinType(ty) => {
                    let args = self.args(args)?;
                    let dst = self.dst(dst);
                    self.emit(Opcode::ConstructBuiltin);
                    self.writer.write(*ty as u32);
                    self.writer.write_args(&args);
                    self.writer.write_addr(dst);
                    Ok(dst)
                }
                ExprKind::Super => {
                    let args = self.args(args)?;
                    self.emit(Opcode::CallSuperCtor);
                    self.writer.write_args(&args);
                    Ok(self.move_to(Address::null(), dst))
                }
                _ => {
                    let on = self.expr(base, None)?;
                    self.call_value(on, args, dst)
                }
            },
            (Some(base), Some(method)) => {
                let name = self.name_id(&method.name);
                if matches!(base.kind, ExprKind::Super) {
                    let args = self.args(args)?;
                    let dst = self.dst(dst);
                    self.emit(Opcode::CallSuperMethod);
                    self.writer.write(name);
                    self.writer.write_args(&args);
                    self.writer.write_addr(dst);
                    return Ok(dst);
                }
                let on = self.expr(base, None)?;
                let args = self.args(args)?;
                let dst = self.dst(dst);
                self.emit(Opcode::CallMethod);
                self.writer.write_addr(on);
                self.writer.write(name);
                self.writer.write_args(&args);
                self.writer.write_addr(dst);
                Ok(dst)
            }
            (None, None) => Err(CarbonError::bug("call without a callee.")),
        }
    }

    fn call_value(
        &mut self,
        on: Address,
        args: &[Expr],
        dst: Option<Address>,
    ) -> CarbonResult<Address> {
        let args = self.args(args)?;
        let dst = self.dst(dst);
        self.emit(Opcode::Call);
        self.writer.write_addr(on);
        self.writer.write_args(&args);
        self.writer.write_addr(dst);
        Ok(dst)
    }

    fn args(&mut self, args: &[Expr]) -> CarbonResult<Vec<Address>> {
        args.iter().map(|arg| self.expr(arg, None)).collect()
    }

    // ==================== Helpers ====================

    fn emit(&mut self, op: Opcode) {
        self.writer.write_op(op, self.line);
    }

    fn get(&mut self, on: Address, name: u32, dst: Address) {
        self.emit(Opcode::Get);
        self.writer.write_addr(on);
        self.writer.write(name);
        self.writer.write_addr(dst);
    }

    fn operator(&mut self, op: Operator, left: Address, right: Address, dst: Address) {
        self.emit(Opcode::Operator);
        self.writer.write(op as u32);
        self.writer.write_addr(left);
        self.writer.write_addr(right);
        self.writer.write_addr(dst);
    }

    /// Copy `addr` into `dst` when a destination was requested
    fn move_to(&mut self, addr: Address, dst: Option<Address>) -> Address {
        match dst {
            Some(dst) if dst != addr => {
                self.emit(Opcode::Assign);
                self.writer.write_addr(dst);
                self.writer.write_addr(addr);
                dst
            }
            _ => addr,
        }
    }

    fn dst(&mut self, dst: Option<Address>) -> Address {
        match dst {
            Some(dst) => dst,
            None => self.temp(),
        }
    }

    fn alloc(&mut self) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        slot
    }

    fn temp(&mut self) -> Address {
        Address::stack(self.alloc())
    }

    fn find_local(&self, name: &str) -> Option<u32> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|(n, _)| n == name))
            .map(|(_, slot)| *slot)
    }

    fn name_id(&mut self, name: &str) -> u32 {
        if let Some(id) = self.name_ids.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_ids.insert(name.to_string(), id);
        id
    }

    fn const_addr(&mut self, value: &Value) -> Address {
        let index = match self.consts.iter().position(|c| c.same_literal(value)) {
            Some(index) => index,
            None => {
                self.consts.push(value.clone());
                self.consts.len() - 1
            }
        };
        Address::new(AddressKind::ConstValue, index as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::native::NativeClasses;
    use crate::Config;

    fn compile(source: &str) -> Rc<Bytecode> {
        let mut compiler = Compiler::new(Rc::new(NativeClasses::new()), Config::default());
        compiler.compile_source(source, "test.cb").unwrap().bytecode
    }

    #[test]
    fn test_member_layout_follows_inheritance() {
        let bytecode = compile(
            "class A { var a1; var a2; static var s; }
             class B : A { var b1; }
             class C : B { var c1; var c2; }
             func main() {}",
        );
        let c = bytecode.get_class("C").unwrap();
        assert_eq!(c.member_count(), 5);
        assert_eq!(c.get_member_index("a1"), Some(0));
        assert_eq!(c.get_member_index("a2"), Some(1));
        assert_eq!(c.get_member_index("b1"), Some(2));
        assert_eq!(c.get_member_index("c1"), Some(3));
        assert_eq!(c.get_member_index("c2"), Some(4));
        assert_eq!(c.get_member_index("s"), None);
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let bytecode = compile("func main() { var a = 7; var b = 7; var c = 7.0; return 0; }");
        let sevens = bytecode
            .global_consts
            .iter()
            .filter(|v| matches!(v, Value::Int(7)))
            .count();
        assert_eq!(sevens, 1);
        assert!(bytecode
            .global_consts
            .iter()
            .any(|v| matches!(v, Value::Float(f) if *f == 7.0)));
    }

    #[test]
    fn test_function_ends_with_end() {
        let bytecode = compile("func main() { var x = 1; while x < 3 { x += 1; } }");
        let main = bytecode.get_function("main").unwrap();
        assert_eq!(main.opcodes.last().copied(), Some(Opcode::End as u32));
        assert!(main.stack_size >= 1);
        assert!(bytecode.disassemble().contains("JUMP_IF_NOT"));
    }

    #[test]
    fn test_initializers_are_generated() {
        let bytecode = compile("var g = 1; class A { var x = [1]; static var y = 2; } func main() {}");
        assert!(bytecode.static_initializer().is_some());
        let a = bytecode.get_class("A").unwrap();
        assert!(a.member_initializer().is_some());
        assert!(a.static_initializer().is_some());
        assert_eq!(
            a.member_initializer().unwrap().name,
            MEMBER_INITIALIZER.to_string()
        );
    }
}
