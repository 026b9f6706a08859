// Carbon Bytecode Instructions
// Word-oriented: every opcode and operand is one u32

use super::address::Address;

/// Bytecode operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    // Member and subscript access
    Get,       // on, name, dst
    Set,       // on, name, value
    GetMapped, // on, key, dst
    SetMapped, // on, key, value

    // Assignment
    SetTrue,  // dst
    SetFalse, // dst
    Operator, // op, left, right, dst
    Assign,   // dst, src

    // Construction
    ConstructBuiltin,      // type, argc, args..., dst
    ConstructNative,       // name, argc, args..., dst
    ConstructCarbon,       // name, argc, args..., dst
    ConstructLiteralArray, // argc, args..., dst
    ConstructLiteralMap,   // argc, (key, value)..., dst

    // Calls
    Call,            // on, argc, args..., dst
    CallFunc,        // name, argc, args..., dst
    CallMethod,      // on, name, argc, args..., dst
    CallBuiltin,     // func, argc, args..., dst
    CallSuperCtor,   // argc, args...
    CallSuperMethod, // name, argc, args..., dst

    // Control flow
    Jump,      // addr
    JumpIf,    // cond, addr
    JumpIfNot, // cond, addr
    Return,    // value

    // Iteration
    IterBegin, // iterator_dst, on
    IterNext,  // value_dst, iterator, exit_addr

    End,
}

const ALL_OPCODES: [Opcode; 26] = [
    Opcode::Get,
    Opcode::Set,
    Opcode::GetMapped,
    Opcode::SetMapped,
    Opcode::SetTrue,
    Opcode::SetFalse,
    Opcode::Operator,
    Opcode::Assign,
    Opcode::ConstructBuiltin,
    Opcode::ConstructNative,
    Opcode::ConstructCarbon,
    Opcode::ConstructLiteralArray,
    Opcode::ConstructLiteralMap,
    Opcode::Call,
    Opcode::CallFunc,
    Opcode::CallMethod,
    Opcode::CallBuiltin,
    Opcode::CallSuperCtor,
    Opcode::CallSuperMethod,
    Opcode::Jump,
    Opcode::JumpIf,
    Opcode::JumpIfNot,
    Opcode::Return,
    Opcode::IterBegin,
    Opcode::IterNext,
    Opcode::End,
];

impl Opcode {
    pub fn from_u32(word: u32) -> Option<Opcode> {
        ALL_OPCODES.get(word as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Get => "GET",
            Opcode::Set => "SET",
            Opcode::GetMapped => "GET_MAPPED",
            Opcode::SetMapped => "SET_MAPPED",
            Opcode::SetTrue => "SET_TRUE",
            Opcode::SetFalse => "SET_FALSE",
            Opcode::Operator => "OPERATOR",
            Opcode::Assign => "ASSIGN",
            Opcode::ConstructBuiltin => "CONSTRUCT_BUILTIN",
            Opcode::ConstructNative => "CONSTRUCT_NATIVE",
            Opcode::ConstructCarbon => "CONSTRUCT_CARBON",
            Opcode::ConstructLiteralArray => "CONSTRUCT_LITERAL_ARRAY",
            Opcode::ConstructLiteralMap => "CONSTRUCT_LITERAL_MAP",
            Opcode::Call => "CALL",
            Opcode::CallFunc => "CALL_FUNC",
            Opcode::CallMethod => "CALL_METHOD",
            Opcode::CallBuiltin => "CALL_BUILTIN",
            Opcode::CallSuperCtor => "CALL_SUPER_CTOR",
            Opcode::CallSuperMethod => "CALL_SUPER_METHOD",
            Opcode::Jump => "JUMP",
            Opcode::JumpIf => "JUMP_IF",
            Opcode::JumpIfNot => "JUMP_IF_NOT",
            Opcode::Return => "RETURN",
            Opcode::IterBegin => "ITER_BEGIN",
            Opcode::IterNext => "ITER_NEXT",
            Opcode::End => "END",
        }
    }
}

/// Appends opcodes to a function body and records the source line of each instruction
#[derive(Debug, Default)]
pub struct OpcodeWriter {
    pub opcodes: Vec<u32>,
    /// (ip, line) pairs, only where the line changes
    pub op_dbg: Vec<(u32, u32)>,
}

impl OpcodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an opcode and tag it with its source line
    pub fn write_op(&mut self, op: Opcode, line: usize) {
        let ip = self.opcodes.len() as u32;
        let line = line as u32;
        if self.op_dbg.last().map(|(_, l)| *l != line).unwrap_or(true) {
            self.op_dbg.push((ip, line));
        }
        self.opcodes.push(op as u32);
    }

    pub fn write(&mut self, word: u32) {
        self.opcodes.push(word);
    }

    pub fn write_addr(&mut self, addr: Address) {
        self.opcodes.push(addr.word());
    }

    pub fn write_args(&mut self, args: &[Address]) {
        self.write(args.len() as u32);
        for arg in args {
            self.write_addr(*arg);
        }
    }

    /// Current code offset
    pub fn position(&self) -> u32 {
        self.opcodes.len() as u32
    }

    /// Write a placeholder jump target and return its offset
    pub fn write_placeholder(&mut self) -> usize {
        self.opcodes.push(0);
        self.opcodes.len() - 1
    }

    /// Point a placeholder at the current offset
    pub fn patch_here(&mut self, offset: usize) {
        self.opcodes[offset] = self.opcodes.len() as u32;
    }

    pub fn patch(&mut self, offset: usize, target: u32) {
        self.opcodes[offset] = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip_through_word() {
        assert_eq!(Opcode::from_u32(Opcode::IterNext as u32), Some(Opcode::IterNext));
        assert_eq!(Opcode::from_u32(Opcode::End as u32 + 1), None);
    }

    #[test]
    fn test_line_table_is_sparse() {
        let mut writer = OpcodeWriter::new();
        writer.write_op(Opcode::SetTrue, 3);
        writer.write_addr(Address::stack(0));
        writer.write_op(Opcode::SetFalse, 3);
        writer.write_addr(Address::stack(0));
        writer.write_op(Opcode::End, 4);
        assert_eq!(writer.op_dbg, vec![(0, 3), (4, 4)]);
    }

    #[test]
    fn test_patch_jump() {
        let mut writer = OpcodeWriter::new();
        writer.write_op(Opcode::Jump, 1);
        let hole = writer.write_placeholder();
        writer.write_op(Opcode::End, 1);
        writer.patch_here(hole);
        assert_eq!(writer.opcodes[hole], 3);
    }
}
