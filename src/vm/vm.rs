// Carbon Virtual Machine
// Interprets the word stream of one function per invocation. Nested scripted
// calls recurse through `call_function`, bounded by the configured depth.

use super::context::{Args, RefCache, RuntimeContext};
use super::instance::Instance;
use super::ops::{self, Operator};
use super::value::{MapData, MapKey, Value};
use crate::builtins::{self, BuiltinFunction, BuiltinType};
use crate::compiler::{Address, Bytecode, BytecodeBase, Function, Opcode};
use crate::config::Config;
use crate::error::{arg_count_mismatch, CarbonError, CarbonResult, ErrorKind, Span, StackFrame};
use crate::native::NativeClasses;
use smallvec::{smallvec, SmallVec};
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Outcome of executing one opcode
enum Flow {
    Continue,
    Return(Value),
}

/// Result of a call, with the scripted function that ran (if any) so the
/// caller can write reference parameters back
struct Called {
    value: Value,
    function: Option<Rc<Function>>,
}

impl Called {
    fn native(value: Value) -> Self {
        Self {
            value,
            function: None,
        }
    }
}

/// The Carbon Virtual Machine
pub struct VM {
    natives: Rc<NativeClasses>,
    max_call_depth: usize,
    depth: usize,
    /// Native stack bytes scripted recursion may consume
    stack_budget: usize,
    /// Stack address at the outermost `call_function`
    stack_base: Option<usize>,
    refs: RefCache,
    out: Box<dyn Write>,
}

/// Fits the 2 MiB a spawned thread gets by default, with room for builtins
/// and error reporting below the deepest scripted frame
pub const DEFAULT_STACK_BUDGET: usize = 1 << 20;

impl VM {
    pub fn new(natives: Rc<NativeClasses>, config: &Config) -> Self {
        Self {
            natives,
            max_call_depth: config.max_call_depth,
            depth: 0,
            stack_budget: DEFAULT_STACK_BUDGET,
            stack_base: None,
            refs: RefCache::default(),
            out: Box::new(io::stdout()),
        }
    }

    /// Redirect `print`/`println` output
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    /// Allow deeper native recursion when the VM runs on a larger stack
    pub fn with_stack_budget(mut self, bytes: usize) -> Self {
        self.stack_budget = bytes;
        self
    }

    pub fn natives(&self) -> &Rc<NativeClasses> {
        &self.natives
    }

    /// Run `main` and map its result to a process exit code
    pub fn run(&mut self, bytecode: &Rc<Bytecode>, args: &[String]) -> CarbonResult<i32> {
        let main = bytecode.get_function("main").cloned().ok_or_else(|| {
            CarbonError::new(
                ErrorKind::NullPointer,
                "entry point function \"main\" not found.",
                Span::default(),
                bytecode.path(),
            )
        })?;

        let mut call_args = Args::new();
        match main.arg_count {
            0 => {}
            1 => call_args.push(Value::array(args.iter().map(|a| Value::string(a)).collect())),
            n => {
                return Err(CarbonError::new(
                    ErrorKind::InvalidArgCount,
                    format!("main function takes at most 1 argument, {} declared.", n),
                    Span::default(),
                    bytecode.path(),
                ))
            }
        }

        debug!(file = %bytecode.path(), args = args.len(), "running main");
        let result = self.call_function(&main, bytecode, None, &mut call_args);
        self.flush()?;
        match result? {
            Value::Null => Ok(0),
            Value::Int(code) => i32::try_from(code).map_err(|_| {
                CarbonError::new(
                    ErrorKind::TypeError,
                    format!("exit code {} out of range.", code),
                    Span::default(),
                    bytecode.path(),
                )
            }),
            other => Err(CarbonError::new(
                ErrorKind::TypeError,
                format!(
                    "main function must return an integer or null, got {}.",
                    other.type_name()
                ),
                Span::default(),
                bytecode.path(),
            )),
        }
    }

    /// Call any callable value from the host side
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> CarbonResult<Value> {
        let mut args: Args = args.iter().cloned().collect();
        let called = self.call_value(None, callee, &mut args)?;
        Ok(called.value)
    }

    /// Invoke a scripted function defined by `bytecode`
    pub fn call_function(
        &mut self,
        function: &Rc<Function>,
        bytecode: &Rc<Bytecode>,
        this: Option<Rc<Instance>>,
        args: &mut Args,
    ) -> CarbonResult<Value> {
        let marker = 0u8;
        let here = std::ptr::addr_of!(marker) as usize;
        let owns_base = self.stack_base.is_none();
        let base = *self.stack_base.get_or_insert(here);

        let result = self.call_bounded(function, bytecode, this, args, base.abs_diff(here));
        if owns_base {
            self.stack_base = None;
        }
        result
    }

    fn call_bounded(
        &mut self,
        function: &Rc<Function>,
        bytecode: &Rc<Bytecode>,
        this: Option<Rc<Instance>>,
        args: &mut Args,
        stack_used: usize,
    ) -> CarbonResult<Value> {
        if self.depth >= self.max_call_depth {
            warn!(depth = self.depth, function = %function.qualified_name(), "call depth limit reached");
            return Err(CarbonError::runtime(
                ErrorKind::StackOverflow,
                format!("stack overflow, call depth exceeded {}.", self.max_call_depth),
            ));
        }
        if stack_used > self.stack_budget {
            warn!(
                depth = self.depth,
                stack_used,
                function = %function.qualified_name(),
                "native stack budget exhausted"
            );
            return Err(CarbonError::runtime(
                ErrorKind::StackOverflow,
                format!("stack overflow, native stack exhausted at call depth {}.", self.depth),
            ));
        }
        self.initialize(bytecode)?;

        if let Some(message) = arg_count_mismatch(
            function.arg_count as i32,
            function.default_count() as i32,
            args.len(),
        ) {
            return Err(CarbonError::runtime(
                ErrorKind::InvalidArgCount,
                format!("{}() {}", function.qualified_name(), message),
            ));
        }

        // Copy the missing trailing defaults in, fresh for every call
        let given = args.len();
        let first_default = function.default_count() - (function.arg_count - given);
        for value in &function.default_args[first_default..] {
            args.push(value.copy(true));
        }

        trace!(function = %function.qualified_name(), args = given, depth = self.depth, "call");
        self.depth += 1;
        let result = self.execute(function, bytecode, this, args);
        self.depth -= 1;
        args.truncate(given);
        result
    }

    /// Run the static initializer of `bytecode` (and of everything it depends on) once
    fn initialize(&mut self, bytecode: &Rc<Bytecode>) -> CarbonResult<()> {
        if bytecode.is_initialized() {
            return Ok(());
        }
        bytecode.set_initialized();
        if bytecode.is_class() {
            if let Some(file) = bytecode.file() {
                self.initialize(&file)?;
            }
            if let Some(base) = bytecode.base_bytecode() {
                self.initialize(&base)?;
            }
        }
        if let Some(init) = bytecode.static_initializer().cloned() {
            debug!(bytecode = %bytecode.name(), "running static initializer");
            self.call_function(&init, bytecode, None, &mut Args::new())?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        function: &Rc<Function>,
        bytecode: &Rc<Bytecode>,
        this: Option<Rc<Instance>>,
        args: &mut Args,
    ) -> CarbonResult<Value> {
        let mut ctx = RuntimeContext::new(function, bytecode, this, args)?;
        loop {
            let start = ctx.ip;
            match self.step(&mut ctx) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(err) => return Err(traceback(err, &ctx, start)),
            }
        }
    }

    /// Dispatch one opcode. Arms that allocate or call out live in their own
    /// non-inlined functions so this frame, re-entered once per script call,
    /// stays small.
    fn step(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<Flow> {
        let word = ctx.read()?;
        let op = Opcode::from_u32(word)
            .ok_or_else(|| CarbonError::bug(format!("invalid opcode 0x{:08x}.", word)))?;

        match op {
            Opcode::Get => self.op_get(ctx)?,
            Opcode::Set => self.op_set(ctx)?,
            Opcode::GetMapped => self.op_get_mapped(ctx)?,
            Opcode::SetMapped => self.op_set_mapped(ctx)?,
            Opcode::SetTrue | Opcode::SetFalse => {
                let dst = ctx.read_addr()?;
                ctx.set_var_at(dst, Value::Bool(op == Opcode::SetTrue))?;
            }
            Opcode::Operator => self.op_operator(ctx)?,
            Opcode::Assign => {
                let dst = ctx.read_addr()?;
                let value = self.load(ctx)?;
                ctx.set_var_at(dst, value)?;
            }
            Opcode::ConstructBuiltin => self.op_construct_builtin(ctx)?,
            Opcode::ConstructNative => self.op_construct_native(ctx)?,
            Opcode::ConstructCarbon => self.op_construct_carbon(ctx)?,
            Opcode::ConstructLiteralArray => self.op_literal_array(ctx)?,
            Opcode::ConstructLiteralMap => self.op_literal_map(ctx)?,
            Opcode::Call => self.op_call(ctx)?,
            Opcode::CallFunc => self.op_call_func(ctx)?,
            Opcode::CallMethod => self.op_call_method(ctx)?,
            Opcode::CallBuiltin => self.op_call_builtin(ctx)?,
            Opcode::CallSuperCtor => self.op_call_super_ctor(ctx)?,
            Opcode::CallSuperMethod => self.op_call_super_method(ctx)?,
            Opcode::Jump => {
                ctx.ip = ctx.read()? as usize;
            }
            Opcode::JumpIf | Opcode::JumpIfNot => {
                let cond = self.load(ctx)?;
                let target = ctx.read()? as usize;
                if cond.is_truthy() == (op == Opcode::JumpIf) {
                    ctx.ip = target;
                }
            }
            Opcode::Return => {
                let value = self.load(ctx)?;
                return Ok(Flow::Return(value));
            }
            Opcode::IterBegin => self.op_iter_begin(ctx)?,
            Opcode::IterNext => self.op_iter_next(ctx)?,
            Opcode::End => return Ok(Flow::Return(Value::Null)),
        }
        Ok(Flow::Continue)
    }

    // ==================== Opcodes ====================

    #[inline(never)]
    fn op_get(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let on = self.load(ctx)?;
        let name = ctx.read_name()?;
        let dst = ctx.read_addr()?;
        let value = self.get_attrib(&on, &name)?;
        ctx.set_var_at(dst, value)
    }

    #[inline(never)]
    fn op_set(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let on = self.load(ctx)?;
        let name = ctx.read_name()?;
        let value = self.load(ctx)?;
        self.set_attrib(&on, &name, value)
    }

    #[inline(never)]
    fn op_get_mapped(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let on = self.load(ctx)?;
        let key = self.load(ctx)?;
        let dst = ctx.read_addr()?;
        ctx.set_var_at(dst, on.get_mapped(&key)?)
    }

    #[inline(never)]
    fn op_set_mapped(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let on_addr = ctx.read_addr()?;
        let mut on = ctx.get_var_at(on_addr, &mut self.refs)?;
        let key = self.load(ctx)?;
        let value = self.load(ctx)?;
        on.set_mapped(&key, value)?;
        // Strings are values: store the modified copy back
        if matches!(on, Value::String(_)) {
            ctx.set_var_at(on_addr, on)?;
        }
        Ok(())
    }

    #[inline(never)]
    fn op_operator(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let raw = ctx.read()?;
        let operator = Operator::from_u32(raw)
            .ok_or_else(|| CarbonError::bug(format!("invalid operator {}.", raw)))?;
        let left = self.load(ctx)?;
        let right = self.load(ctx)?;
        let dst = ctx.read_addr()?;
        let value = self.operator(operator, &left, &right)?;
        ctx.set_var_at(dst, value)
    }

    #[inline(never)]
    fn op_construct_builtin(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let raw = ctx.read()?;
        let ty = BuiltinType::from_u32(raw)
            .ok_or_else(|| CarbonError::bug(format!("invalid builtin type {}.", raw)))?;
        let (_, args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        ctx.set_var_at(dst, ty.construct(&args)?)
    }

    #[inline(never)]
    fn op_construct_native(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let name = ctx.read_name()?;
        let (_, args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        let object = self.natives.construct(&name, &args)?;
        ctx.set_var_at(dst, Value::Native(object))
    }

    #[inline(never)]
    fn op_construct_carbon(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let name = ctx.read_name()?;
        let (addrs, mut args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        let class = ctx.file.get_class(&name).ok_or_else(|| {
            CarbonError::bug(format!("class \"{}\" not found in its file.", name))
        })?;
        let called = self.construct(&class, &mut args)?;
        finish_call(ctx, &addrs, &args, called, Some(dst))
    }

    #[inline(never)]
    fn op_literal_array(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let (_, args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        ctx.set_var_at(dst, Value::array(args.into_vec()))
    }

    #[inline(never)]
    fn op_literal_map(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let pairs = ctx.read()? as usize;
        let mut map = MapData::default();
        for _ in 0..pairs {
            let key = self.load(ctx)?;
            let value = self.load(ctx)?;
            map.insert(MapKey::from_value(&key)?, value);
        }
        let dst = ctx.read_addr()?;
        ctx.set_var_at(dst, Value::map(map))
    }

    #[inline(never)]
    fn op_call(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let callee = self.load(ctx)?;
        let (addrs, mut args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        let this = ctx.this.clone();
        let called = self.call_value(this.as_ref(), &callee, &mut args)?;
        finish_call(ctx, &addrs, &args, called, Some(dst))
    }

    #[inline(never)]
    fn op_call_func(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let name = ctx.read_name()?;
        let (addrs, mut args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        let called = self.call_func(ctx, &name, &mut args)?;
        finish_call(ctx, &addrs, &args, called, Some(dst))
    }

    #[inline(never)]
    fn op_call_method(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let on = self.load(ctx)?;
        let name = ctx.read_name()?;
        let (addrs, mut args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        let called = self.call_method(&on, &name, &mut args)?;
        finish_call(ctx, &addrs, &args, called, Some(dst))
    }

    #[inline(never)]
    fn op_call_builtin(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let raw = ctx.read()?;
        let func = BuiltinFunction::from_u32(raw)
            .ok_or_else(|| CarbonError::bug(format!("invalid builtin function {}.", raw)))?;
        let (_, args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        let value = self.call_builtin(func, &args)?;
        ctx.set_var_at(dst, value)
    }

    #[inline(never)]
    fn op_call_super_ctor(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let (addrs, mut args) = self.load_args(ctx)?;
        let called = self.call_super_ctor(ctx, &mut args)?;
        finish_call(ctx, &addrs, &args, called, None)
    }

    #[inline(never)]
    fn op_call_super_method(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let name = ctx.read_name()?;
        let (addrs, mut args) = self.load_args(ctx)?;
        let dst = ctx.read_addr()?;
        let called = self.call_super_method(ctx, &name, &mut args)?;
        finish_call(ctx, &addrs, &args, called, Some(dst))
    }

    #[inline(never)]
    fn op_iter_begin(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let dst = ctx.read_addr()?;
        let on = self.load(ctx)?;
        ctx.set_var_at(dst, on.iter_begin()?)
    }

    #[inline(never)]
    fn op_iter_next(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<()> {
        let dst = ctx.read_addr()?;
        let iter = self.load(ctx)?;
        let exit = ctx.read()? as usize;
        let Value::Iterator(iter) = iter else {
            return Err(CarbonError::bug(format!(
                "ITER_NEXT on {} instead of an iterator.",
                iter.type_name()
            )));
        };
        let next = iter.borrow_mut().next_value();
        match next {
            Some(value) => ctx.set_var_at(dst, value),
            None => {
                ctx.ip = exit;
                Ok(())
            }
        }
    }

    // ==================== Operands ====================

    fn load(&mut self, ctx: &mut RuntimeContext) -> CarbonResult<Value> {
        let addr = ctx.read_addr()?;
        ctx.get_var_at(addr, &mut self.refs)
    }

    fn load_args(
        &mut self,
        ctx: &mut RuntimeContext,
    ) -> CarbonResult<(SmallVec<[Address; 8]>, Args)> {
        let addrs = ctx.read_args()?;
        let mut args = Args::with_capacity(addrs.len());
        for addr in &addrs {
            args.push(ctx.get_var_at(*addr, &mut self.refs)?);
        }
        Ok((addrs, args))
    }

    // ==================== Calls ====================

    fn invoke(
        &mut self,
        function: Rc<Function>,
        bytecode: Rc<Bytecode>,
        this: Option<Rc<Instance>>,
        args: &mut Args,
    ) -> CarbonResult<Called> {
        let value = self.call_function(&function, &bytecode, this, args)?;
        Ok(Called {
            value,
            function: Some(function),
        })
    }

    /// `name(args)`: the instance's class chain, the defining class, the file,
    /// then the native part of the instance
    fn call_func(
        &mut self,
        ctx: &RuntimeContext,
        name: &str,
        args: &mut Args,
    ) -> CarbonResult<Called> {
        if let Some(this) = &ctx.this {
            if let Some((function, owner)) = this.blueprint.find_function(name) {
                let this = (!function.is_static).then(|| this.clone());
                return self.invoke(function, owner, this, args);
            }
        } else if ctx.bytecode.is_class() {
            if let Some((function, owner)) = ctx.bytecode.find_function(name) {
                if !function.is_static {
                    return Err(CarbonError::bug(format!(
                        "non-static method \"{}\" called without an instance.",
                        function.qualified_name()
                    )));
                }
                return self.invoke(function, owner, None, args);
            }
        }

        if let Some(function) = ctx.file.get_function(name).cloned() {
            return self.invoke(function, ctx.file.clone(), None, args);
        }

        if let Some(object) = ctx.this.as_ref().and_then(|this| this.native()) {
            return self
                .natives
                .call_method_on(&object, name, args)
                .map(Called::native);
        }
        if let Some(native) = ctx.bytecode.native_base() {
            return self
                .natives
                .call_static(&native, name, args)
                .map(Called::native);
        }
        Err(CarbonError::bug(format!(
            "function \"{}\" couldn't be resolved at runtime.",
            name
        )))
    }

    /// `on.name(args)`
    fn call_method(&mut self, on: &Value, name: &str, args: &mut Args) -> CarbonResult<Called> {
        match on {
            Value::Instance(instance) => {
                if let Some((function, owner)) = instance.blueprint.find_function(name) {
                    let this = (!function.is_static).then(|| instance.clone());
                    return self.invoke(function, owner, this, args);
                }
                if let Some(index) = instance.member_index(name) {
                    let callee = instance.get_member(index)?;
                    return self.call_value(Some(instance), &callee, args);
                }
                if let Some(object) = instance.native() {
                    if self.natives.find_bind_data(object.class_name(), name).is_some() {
                        return self
                            .natives
                            .call_method_on(&object, name, args)
                            .map(Called::native);
                    }
                }
                if let Some(callee) = instance.blueprint.get_static_member(name) {
                    return self.call_value(Some(instance), &callee, args);
                }
                if builtins::has_common_method(name) {
                    return builtins::call_method(on, name, args).map(Called::native);
                }
                Err(missing_attribute(name, &on.type_name()))
            }

            Value::Class(bytecode) => {
                self.initialize(bytecode)?;
                if bytecode.is_class() {
                    if let Some((function, owner)) = bytecode.find_function(name) {
                        if !function.is_static {
                            return Err(CarbonError::runtime(
                                ErrorKind::AttributeError,
                                format!(
                                    "can't call non-static method \"{}\" statically.",
                                    function.qualified_name()
                                ),
                            ));
                        }
                        return self.invoke(function, owner, None, args);
                    }
                }
                if let Some(callee) = bytecode.get_static_member(name) {
                    return self.call_value(None, &callee, args);
                }
                if let Some(native) = bytecode.native_base() {
                    return self
                        .natives
                        .call_static(&native, name, args)
                        .map(Called::native);
                }
                Err(missing_attribute(name, bytecode.name()))
            }

            Value::NativeClass(class) => self
                .natives
                .call_static(class, name, args)
                .map(Called::native),

            Value::Native(object) => self
                .natives
                .call_method_on(object, name, args)
                .map(Called::native),

            Value::Enum(info) => Err(missing_attribute(name, &info.name)),

            _ => builtins::call_method(on, name, args).map(Called::native),
        }
    }

    /// `callee(args)` on a value. `this` binds instance methods referenced by value.
    fn call_value(
        &mut self,
        this: Option<&Rc<Instance>>,
        callee: &Value,
        args: &mut Args,
    ) -> CarbonResult<Called> {
        match callee {
            Value::Function(func) => {
                let this = if func.function.is_static {
                    None
                } else {
                    let bound = this
                        .filter(|this| this.blueprint.find_function(&func.function.name).is_some())
                        .cloned();
                    Some(bound.ok_or_else(|| {
                        CarbonError::runtime(
                            ErrorKind::TypeError,
                            format!(
                                "can't call non-static method \"{}\" without an instance.",
                                func.function.qualified_name()
                            ),
                        )
                    })?)
                };
                self.invoke(func.function.clone(), func.owner.clone(), this, args)
            }
            Value::BuiltinFunc(func) => self.call_builtin(*func, args).map(Called::native),
            Value::BuiltinType(ty) => ty.construct(args).map(Called::native),
            Value::Class(bytecode) if bytecode.is_class() => self.construct(bytecode, args),
            Value::NativeClass(class) => self
                .natives
                .construct(class, args)
                .map(|object| Called::native(Value::Native(object))),
            Value::Instance(instance) => match instance.blueprint.find_function("__call") {
                Some((function, owner)) => self.invoke(function, owner, Some(instance.clone()), args),
                None => Err(CarbonError::runtime(
                    ErrorKind::OperatorNotSupported,
                    format!(
                        "instance of \"{}\" is not callable, it doesn't define __call.",
                        instance.blueprint.name()
                    ),
                )),
            },
            Value::Null => Err(CarbonError::runtime(
                ErrorKind::NullPointer,
                "null is not callable.",
            )),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("{} is not callable.", other.type_name()),
            )),
        }
    }

    /// New instance: member initializer, then constructor
    fn construct(&mut self, class: &Rc<Bytecode>, args: &mut Args) -> CarbonResult<Called> {
        self.initialize(class)?;
        let instance = Rc::new(Instance::new(class.clone()));

        if let Some(init) = class.member_initializer().cloned() {
            self.call_function(&init, class, Some(instance.clone()), &mut Args::new())?;
        }

        let function = match class.constructor().cloned() {
            Some(ctor) => {
                self.call_function(&ctor, class, Some(instance.clone()), args)?;
                Some(ctor)
            }
            None => {
                if let Some(message) = arg_count_mismatch(0, 0, args.len()) {
                    return Err(CarbonError::runtime(
                        ErrorKind::InvalidArgCount,
                        format!("{}() {}", class.name(), message),
                    ));
                }
                None
            }
        };
        Ok(Called {
            value: Value::Instance(instance),
            function,
        })
    }

    /// `super(args)`: a scripted base runs its initializer and constructor on the
    /// same instance, a native base builds the embedded native object
    fn call_super_ctor(&mut self, ctx: &RuntimeContext, args: &mut Args) -> CarbonResult<Called> {
        let this = ctx.this_instance()?.clone();
        let base = ctx.bytecode.base().clone();
        match base {
            BytecodeBase::Native(class) => {
                let object = self.natives.construct(&class, args)?;
                this.set_native(object);
                Ok(Called::native(Value::Null))
            }
            BytecodeBase::Local(base) | BytecodeBase::Extern(base) => {
                if let Some(init) = base.member_initializer().cloned() {
                    self.call_function(&init, &base, Some(this.clone()), &mut Args::new())?;
                }
                match base.constructor().cloned() {
                    Some(ctor) => {
                        self.invoke(ctor, base, Some(this), args)?;
                        Ok(Called::native(Value::Null))
                    }
                    None => match arg_count_mismatch(0, 0, args.len()) {
                        Some(message) => Err(CarbonError::runtime(
                            ErrorKind::InvalidArgCount,
                            format!("{}() {}", base.name(), message),
                        )),
                        None => Ok(Called::native(Value::Null)),
                    },
                }
            }
            BytecodeBase::None => Err(CarbonError::bug(format!(
                "super constructor called in \"{}\" which has no base.",
                ctx.bytecode.name()
            ))),
        }
    }

    /// `super.name(args)`, dispatched from the base of the class defining the caller
    fn call_super_method(
        &mut self,
        ctx: &RuntimeContext,
        name: &str,
        args: &mut Args,
    ) -> CarbonResult<Called> {
        let base = ctx.bytecode.base().clone();
        let native = match base {
            BytecodeBase::Local(base) | BytecodeBase::Extern(base) => {
                if let Some((function, owner)) = base.find_function(name) {
                    let this = if function.is_static {
                        None
                    } else {
                        Some(ctx.this_instance()?.clone())
                    };
                    return self.invoke(function, owner, this, args);
                }
                base.native_base()
            }
            BytecodeBase::Native(class) => Some(class),
            BytecodeBase::None => None,
        };

        let Some(class) = native else {
            return Err(CarbonError::bug(format!(
                "super method \"{}\" of \"{}\" couldn't be resolved.",
                name,
                ctx.bytecode.name()
            )));
        };
        let value = match ctx.this.as_ref().and_then(|this| this.native()) {
            Some(object) => self.natives.call_method_on(&object, name, args)?,
            None => self.natives.call_static(&class, name, args)?,
        };
        Ok(Called::native(value))
    }

    fn call_builtin(&mut self, func: BuiltinFunction, args: &[Value]) -> CarbonResult<Value> {
        match func {
            BuiltinFunction::Print | BuiltinFunction::Println => {
                let text = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                let newline = if func == BuiltinFunction::Println { "\n" } else { "" };
                write!(self.out, "{}{}", text, newline).map_err(io_error)?;
                Ok(Value::Null)
            }
            BuiltinFunction::Input => {
                if let Some(prompt) = args.first() {
                    write!(self.out, "{}", prompt).map_err(io_error)?;
                }
                self.flush()?;
                let mut line = String::new();
                io::stdin().lock().read_line(&mut line).map_err(io_error)?;
                let trimmed = line.trim_end_matches(&['\n', '\r'][..]);
                Ok(Value::string(trimmed))
            }
            _ => func.call(args),
        }
    }

    // ==================== Attributes and operators ====================

    /// `on.name`
    fn get_attrib(&mut self, on: &Value, name: &str) -> CarbonResult<Value> {
        match on {
            Value::Instance(instance) => {
                if let Some(index) = instance.member_index(name) {
                    return instance.get_member(index);
                }
                if let Some(value) = instance.blueprint.get_static_member(name) {
                    return Ok(value);
                }
                match instance.native() {
                    Some(object) => object.get_member(name),
                    None => Err(missing_attribute(name, &on.type_name())),
                }
            }
            Value::Class(bytecode) => {
                self.initialize(bytecode)?;
                if let Some(value) = bytecode.get_static_member(name) {
                    return Ok(value);
                }
                match bytecode.native_base() {
                    Some(native) => self.natives.get_static(&native, name),
                    None => Err(missing_attribute(name, bytecode.name())),
                }
            }
            Value::NativeClass(class) => self.natives.get_static(class, name),
            Value::BuiltinType(ty) => ty.get_member(name),
            other => other.get_member(name),
        }
    }

    /// `on.name = value`
    fn set_attrib(&mut self, on: &Value, name: &str, value: Value) -> CarbonResult<()> {
        match on {
            Value::Instance(instance) => {
                if let Some(index) = instance.member_index(name) {
                    return instance.set_member(index, value);
                }
                if instance.blueprint.set_static_member(name, value.clone()) {
                    return Ok(());
                }
                match instance.native() {
                    Some(object) => object.set_member(name, value),
                    None => Err(missing_attribute(name, &on.type_name())),
                }
            }
            Value::Class(bytecode) => {
                self.initialize(bytecode)?;
                if bytecode.set_static_member(name, value.clone()) {
                    return Ok(());
                }
                match bytecode.native_base() {
                    Some(native) => self.natives.set_static(&native, name, value),
                    None => Err(missing_attribute(name, bytecode.name())),
                }
            }
            Value::NativeClass(class) => self.natives.set_static(class, name, value),
            Value::Native(object) => object.set_member(name, value),
            Value::Null => Err(CarbonError::runtime(
                ErrorKind::NullPointer,
                format!("attribute \"{}\" assigned on null.", name),
            )),
            other => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!(
                    "can't assign attribute \"{}\" on base {}.",
                    name,
                    other.type_name()
                ),
            )),
        }
    }

    /// Operators on instances dispatch to their magic methods first
    fn operator(&mut self, op: Operator, left: &Value, right: &Value) -> CarbonResult<Value> {
        if op.is_unary() {
            return ops::unary(op, left);
        }
        if let Value::Instance(instance) = left {
            let magic = match op {
                Operator::NotEqCheck => Some("__eq"),
                _ => op.magic_method(),
            };
            if let Some((function, owner)) =
                magic.and_then(|name| instance.blueprint.find_function(name))
            {
                let mut args: Args = smallvec![right.clone()];
                let result =
                    self.call_function(&function, &owner, Some(instance.clone()), &mut args)?;
                if op == Operator::NotEqCheck {
                    return Ok(Value::Bool(!result.is_truthy()));
                }
                return Ok(result);
            }
        }
        ops::binary(op, left, right)
    }

    fn flush(&mut self) -> CarbonResult<()> {
        self.out.flush().map_err(io_error)
    }
}

/// Store the result and write reference parameters back to the caller's storage
fn finish_call(
    ctx: &mut RuntimeContext,
    addrs: &[Address],
    args: &Args,
    called: Called,
    dst: Option<Address>,
) -> CarbonResult<()> {
    if let Some(function) = &called.function {
        for (i, addr) in addrs.iter().enumerate() {
            let is_reference = function.is_reference.get(i).copied().unwrap_or(false);
            if is_reference && addr.is_assignable() {
                if let Some(value) = args.get(i) {
                    ctx.write_back(*addr, value.clone())?;
                }
            }
        }
    }
    match dst {
        Some(dst) => ctx.set_var_at(dst, called.value),
        None => Ok(()),
    }
}

/// Attach the position of the failing instruction and a frame for this call level
fn traceback(err: CarbonError, ctx: &RuntimeContext, ip: usize) -> CarbonError {
    let line = ctx.function.line_at(ip);
    let path = ctx.bytecode.path();
    let mut err = err.at(Span::single(line, 1, 0), path);
    err.push_frame(StackFrame::new(ctx.function.qualified_name(), path, line));
    err
}

fn missing_attribute(name: &str, on: &str) -> CarbonError {
    CarbonError::runtime(
        ErrorKind::AttributeError,
        format!("attribute \"{}\" doesn't exists on base {}.", name, on),
    )
}

fn io_error(err: io::Error) -> CarbonError {
    CarbonError::runtime(ErrorKind::IoError, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use std::cell::RefCell;

    /// Shared buffer standing in for stdout
    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    fn compile(source: &str) -> Rc<Bytecode> {
        let natives = Rc::new(NativeClasses::new());
        Compiler::new(natives, Config::default())
            .compile_source(source, "test.cb")
            .unwrap()
            .bytecode
    }

    fn run_with(source: &str, config: &Config) -> (CarbonResult<i32>, String) {
        let bytecode = compile(source);
        let out = Captured::default();
        let mut vm = VM::new(Rc::new(NativeClasses::new()), config)
            .with_output(Box::new(out.clone()));
        let result = vm.run(&bytecode, &[]);
        (result, out.text())
    }

    fn run(source: &str) -> CarbonResult<i32> {
        run_with(source, &Config::default()).0
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(run("func main() { return 2 + 3; }").unwrap(), 5);
        assert_eq!(run("func main() {}").unwrap(), 0);
    }

    #[test]
    fn test_super_method() {
        let source = "
            class A { func f() { return 1; } }
            class B : A { func f() { return super.f() + 1; } }
            func main() { return B().f(); }
        ";
        assert_eq!(run(source).unwrap(), 2);
    }

    #[test]
    fn test_default_args_are_not_shared() {
        let source = "
            func push(x, list = []) { list.push(x); return list.size(); }
            func main() { var a = push(1); var b = push(2); return a * 10 + b; }
        ";
        assert_eq!(run(source).unwrap(), 11);
    }

    #[test]
    fn test_arg_count_error_points_at_call() {
        let source = "func add(a, b) { return a + b; }
func main() {
    var f = add;
    return f(1);
}";
        let err = run(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
        assert_eq!(err.span.line(), 4);
        assert_eq!(err.stack_trace.len(), 1);
        assert_eq!(err.stack_trace[0].function_name, "main");
    }

    #[test]
    fn test_print_output() {
        let (result, out) = run_with(
            "func main() { println(\"a\", 1); print(2.5); }",
            &Config::default(),
        );
        result.unwrap();
        assert_eq!(out, "a 1\n2.5");
    }

    #[test]
    fn test_stack_overflow() {
        let config = Config {
            max_call_depth: 64,
            ..Config::default()
        };
        let (result, _) = run_with(
            "func f(n) { return f(n + 1); } func main() { return f(0); }",
            &config,
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackOverflow);
        assert_eq!(err.stack_trace.last().unwrap().function_name, "main");
    }

    #[test]
    fn test_unbounded_recursion_hits_the_guard() {
        let (result, _) = run_with(
            "func f(n) { var s = [n, n]; return f(n + 1) + s.size(); } func main() { return f(0); }",
            &Config::default(),
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackOverflow);
        assert_eq!(err.stack_trace.last().unwrap().function_name, "main");
    }

    #[test]
    fn test_stack_budget_is_released_after_run() {
        let config = Config::default();
        let bytecode = compile(
            "func f(n) { if (n == 0) return 0; return f(n - 1) + 1; } func main() { return f(50); }",
        );
        let mut vm = VM::new(Rc::new(NativeClasses::new()), &config)
            .with_output(Box::new(Captured::default()));
        assert_eq!(vm.run(&bytecode, &[]).unwrap(), 50);
        assert_eq!(vm.stack_base, None);
        assert_eq!(vm.depth, 0);

        let mut tight = VM::new(Rc::new(NativeClasses::new()), &config)
            .with_output(Box::new(Captured::default()))
            .with_stack_budget(0);
        let err = tight.run(&bytecode, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackOverflow);
        assert_eq!(tight.stack_base, None);
    }

    #[test]
    fn test_reference_parameters() {
        let source = "
            func inc(n&) { n += 1; }
            func main() { var x = 1; inc(x); inc(x); return x; }
        ";
        assert_eq!(run(source).unwrap(), 3);
    }

    #[test]
    fn test_reference_parameters_update_members_and_statics() {
        let member = "
            func inc(v&) { v += 1; }
            class A { var n = 1; func bump() { inc(n); return n; } }
            func main() { return A().bump(); }
        ";
        assert_eq!(run(member).unwrap(), 2);

        let file_static = "
            var g = 1;
            func inc(v&) { v += 1; }
            func main() { inc(g); return g; }
        ";
        assert_eq!(run(file_static).unwrap(), 2);

        let class_static = "
            func inc(v&) { v += 1; }
            class C { static var count = 10; static func bump() { inc(count); return count; } }
            func main() { return C.bump(); }
        ";
        assert_eq!(run(class_static).unwrap(), 11);
    }

    #[test]
    fn test_reference_parameter_given_a_function_name() {
        let source = "
            func keep(v&) { return 4; }
            func main() { return keep(main); }
        ";
        assert_eq!(run(source).unwrap(), 4);
    }

    #[test]
    fn test_exit_code_out_of_range() {
        let err = run("func main() { return 5000000000; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn test_native_buffer() {
        let source = "func main() { var b = Buffer(4); b[0] = 7; return b[0] + b.size(); }";
        assert_eq!(run(source).unwrap(), 11);
    }

    #[test]
    fn test_native_base_class() {
        let source = "
            class Bytes : Buffer {
                var tag = 3;
                func Bytes(n) { super(n); }
                func total() { return size() + tag; }
            }
            func main() { var b = Bytes(5); return b.total(); }
        ";
        assert_eq!(run(source).unwrap(), 8);
    }

    #[test]
    fn test_statics_are_initialized_lazily() {
        let source = "
            class Counter {
                static var count = 10;
                static func next() { count += 1; return count; }
            }
            func main() { Counter.next(); return Counter.next(); }
        ";
        assert_eq!(run(source).unwrap(), 12);
    }

    #[test]
    fn test_inherited_members_share_one_instance() {
        let source = "
            class Base { var x = 1; }
            class Derived : Base { var y = 2; func sum() { return x + y; } }
            func main() { return Derived().sum(); }
        ";
        assert_eq!(run(source).unwrap(), 3);
    }

    #[test]
    fn test_foreach_loop() {
        let source = "
            func main() {
                var total = 0;
                for (var v : [1, 2, 3]) { total += v; }
                return total;
            }
        ";
        assert_eq!(run(source).unwrap(), 6);
    }

    #[test]
    fn test_magic_operator() {
        let source = "
            class V {
                var n;
                func V(n) { this.n = n; }
                func __add(other) { return V(n + other.n); }
            }
            func main() { var v = V(2) + V(3); return v.n; }
        ";
        assert_eq!(run(source).unwrap(), 5);
    }

    #[test]
    fn test_runtime_error_traceback() {
        let source = "func div(a, b) { return a / b; }
func main() {
    return div(1, 0);
}";
        let err = run(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        assert_eq!(err.span.line(), 1);
        let names: Vec<&str> = err
            .stack_trace
            .iter()
            .map(|f| f.function_name.as_str())
            .collect();
        assert_eq!(names, vec!["div", "main"]);
        assert_eq!(err.stack_trace[1].line, 3);
    }

    #[test]
    fn test_main_result_types() {
        let err = run("func main() { return \"x\"; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);

        let err = run("func helper() {}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NullPointer);
    }

    #[test]
    fn test_main_receives_arguments() {
        let bytecode = compile("func main(args) { return args.size(); }");
        let mut vm = VM::new(Rc::new(NativeClasses::new()), &Config::default());
        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(vm.run(&bytecode, &args).unwrap(), 2);
    }

    #[test]
    fn test_host_call() {
        let bytecode = compile("func twice(n) = n * 2; func main() {}");
        let mut vm = VM::new(Rc::new(NativeClasses::new()), &Config::default());
        let twice = bytecode.get_static_member("twice").unwrap();
        assert_eq!(vm.call(&twice, &[Value::Int(21)]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_imported_module() {
        let dir = std::env::temp_dir().join("carbon-vm-import-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("lib.cb"),
            "class Point { var x; func Point(x) { this.x = x; } } func twice(n) = n * 2;",
        )
        .unwrap();
        let main = dir.join("main.cb");
        std::fs::write(
            &main,
            "import lib = \"lib.cb\"; func main() { var p = lib.Point(2); return lib.twice(p.x); }",
        )
        .unwrap();

        let natives = Rc::new(NativeClasses::new());
        let bytecode = Compiler::new(natives.clone(), Config::default())
            .compile_file(&main.to_string_lossy())
            .unwrap()
            .bytecode;
        let mut vm = VM::new(natives, &Config::default());
        assert_eq!(vm.run(&bytecode, &[]).unwrap(), 4);
    }
}
