// Carbon Compiled Function

use super::address::{Address, AddressKind};
use super::opcode::Opcode;
use crate::builtins::{BuiltinFunction, BuiltinType};
use crate::vm::ops::Operator;
use crate::vm::value::Value;
use std::fmt::Write;

pub const MEMBER_INITIALIZER: &str = "@member_initializer";
pub const STATIC_INITIALIZER: &str = "@static_initializer";

#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: String,
    /// Owning class, `None` for file level functions
    pub class_name: Option<String>,
    pub is_static: bool,
    pub arg_count: usize,
    /// Values of the trailing defaulted parameters
    pub default_args: Vec<Value>,
    /// Per parameter: written back to the caller's local after the call
    pub is_reference: Vec<bool>,
    /// Stack slots needed by locals and temporaries
    pub stack_size: usize,
    pub opcodes: Vec<u32>,
    /// Sparse (ip, line) table, sorted by ip
    pub op_dbg: Vec<(u32, u32)>,
}

impl Function {
    pub fn default_count(&self) -> usize {
        self.default_args.len()
    }

    /// `Class.method` or the bare name
    pub fn qualified_name(&self) -> String {
        match &self.class_name {
            Some(class) => format!("{}.{}", class, self.name),
            None => self.name.clone(),
        }
    }

    /// Line of the instruction at `ip`: the last entry at or before it
    pub fn line_at(&self, ip: usize) -> usize {
        let ip = ip as u32;
        let index = self.op_dbg.partition_point(|(entry_ip, _)| *entry_ip <= ip);
        if index == 0 {
            return 0;
        }
        self.op_dbg[index - 1].1 as usize
    }

    /// Human readable listing, names and constants taken from the owning file
    pub fn disassemble(&self, names: &[String], consts: &[Value]) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "== {} (args: {}, defaults: {}, stack: {}) ==",
            self.qualified_name(),
            self.arg_count,
            self.default_count(),
            self.stack_size
        );

        let mut reader = Reader {
            code: &self.opcodes,
            ip: 0,
            names,
            consts,
        };
        while reader.ip < self.opcodes.len() {
            let start = reader.ip;
            let Some(op) = Opcode::from_u32(reader.word()) else {
                let _ = writeln!(out, "{:04}  <invalid 0x{:08x}>", start, self.opcodes[start]);
                break;
            };
            let operands = reader.operands(op);
            let _ = writeln!(
                out,
                "{:04}  {:>4}  {:<24}{}",
                start,
                self.line_at(start),
                op.name(),
                operands
            );
        }
        out
    }
}

struct Reader<'a> {
    code: &'a [u32],
    ip: usize,
    names: &'a [String],
    consts: &'a [Value],
}

impl Reader<'_> {
    fn word(&mut self) -> u32 {
        let word = self.code.get(self.ip).copied().unwrap_or(0);
        self.ip += 1;
        word
    }

    fn addr(&mut self) -> String {
        let addr = Address::from_word(self.word());
        let index = addr.index() as usize;
        match addr.kind() {
            Some(AddressKind::StaticMember)
            | Some(AddressKind::Extern)
            | Some(AddressKind::NativeClass) => match self.names.get(index) {
                Some(name) => format!("{:?}<{}>", addr, name),
                None => format!("{:?}", addr),
            },
            Some(AddressKind::ConstValue) => match self.consts.get(index) {
                Some(value) => format!("{:?}<{}>", addr, value.repr()),
                None => format!("{:?}", addr),
            },
            Some(AddressKind::BuiltinFunc) => BuiltinFunction::from_u32(addr.index())
                .map(|f| format!("{:?}<{}>", addr, f.name()))
                .unwrap_or_else(|| format!("{:?}", addr)),
            Some(AddressKind::BuiltinType) => BuiltinType::from_u32(addr.index())
                .map(|t| format!("{:?}<{}>", addr, t.name()))
                .unwrap_or_else(|| format!("{:?}", addr)),
            _ => format!("{:?}", addr),
        }
    }

    fn name(&mut self) -> String {
        let index = self.word() as usize;
        match self.names.get(index) {
            Some(name) => format!("\"{}\"", name),
            None => format!("name#{}", index),
        }
    }

    fn args(&mut self) -> String {
        let argc = self.word() as usize;
        let args: Vec<String> = (0..argc).map(|_| self.addr()).collect();
        format!("({})", args.join(", "))
    }

    fn operands(&mut self, op: Opcode) -> String {
        match op {
            Opcode::Get | Opcode::Set => {
                let on = self.addr();
                let name = self.name();
                format!("{}, {}, {}", on, name, self.addr())
            }
            Opcode::GetMapped | Opcode::SetMapped => {
                let on = self.addr();
                let key = self.addr();
                format!("{}, {}, {}", on, key, self.addr())
            }
            Opcode::SetTrue | Opcode::SetFalse | Opcode::Return => self.addr(),
            Opcode::Operator => {
                let op = Operator::from_u32(self.word())
                    .map(|o| o.symbol())
                    .unwrap_or("?");
                let left = self.addr();
                let right = self.addr();
                format!("{}, {}, {}, {}", op, left, right, self.addr())
            }
            Opcode::Assign => {
                let dst = self.addr();
                format!("{}, {}", dst, self.addr())
            }
            Opcode::ConstructBuiltin => {
                let ty = BuiltinType::from_u32(self.word())
                    .map(|t| t.name())
                    .unwrap_or("?");
                let args = self.args();
                format!("{}{} -> {}", ty, args, self.addr())
            }
            Opcode::CallBuiltin => {
                let func = BuiltinFunction::from_u32(self.word())
                    .map(|f| f.name())
                    .unwrap_or("?");
                let args = self.args();
                format!("{}{} -> {}", func, args, self.addr())
            }
            Opcode::ConstructNative
            | Opcode::ConstructCarbon
            | Opcode::CallFunc
            | Opcode::CallSuperMethod => {
                let name = self.name();
                let args = self.args();
                format!("{}{} -> {}", name, args, self.addr())
            }
            Opcode::ConstructLiteralArray => {
                let args = self.args();
                format!("{} -> {}", args, self.addr())
            }
            Opcode::ConstructLiteralMap => {
                let argc = self.word() as usize;
                let pairs: Vec<String> = (0..argc)
                    .map(|_| {
                        let key = self.addr();
                        format!("{}: {}", key, self.addr())
                    })
                    .collect();
                format!("{{{}}} -> {}", pairs.join(", "), self.addr())
            }
            Opcode::Call => {
                let on = self.addr();
                let args = self.args();
                format!("{}{} -> {}", on, args, self.addr())
            }
            Opcode::CallMethod => {
                let on = self.addr();
                let name = self.name();
                let args = self.args();
                format!("{}.{}{} -> {}", on, name, args, self.addr())
            }
            Opcode::CallSuperCtor => self.args(),
            Opcode::Jump => format!("{}", self.word()),
            Opcode::JumpIf | Opcode::JumpIfNot => {
                let cond = self.addr();
                format!("{}, {}", cond, self.word())
            }
            Opcode::IterBegin => {
                let dst = self.addr();
                format!("{}, {}", dst, self.addr())
            }
            Opcode::IterNext => {
                let dst = self.addr();
                let iter = self.addr();
                format!("{}, {}, {}", dst, iter, self.word())
            }
            Opcode::End => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_lookup_uses_lower_bound() {
        let func = Function {
            name: "f".to_string(),
            op_dbg: vec![(0, 2), (5, 4), (9, 7)],
            ..Default::default()
        };
        assert_eq!(func.line_at(0), 2);
        assert_eq!(func.line_at(4), 2);
        assert_eq!(func.line_at(5), 4);
        assert_eq!(func.line_at(100), 7);
    }

    #[test]
    fn test_qualified_name() {
        let func = Function {
            name: "area".to_string(),
            class_name: Some("Shape".to_string()),
            ..Default::default()
        };
        assert_eq!(func.qualified_name(), "Shape.area");
    }
}
