// Carbon Runtime Addresses
// One word per operand: the kind in the top 4 bits, the index below

use std::fmt;

const KIND_SHIFT: u32 = 28;
const INDEX_MASK: u32 = (1 << KIND_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AddressKind {
    Null = 0,
    Stack,
    Parameter,
    This,
    MemberVar,
    /// Index into the file's name table
    StaticMember,
    /// Import alias, index into the file's name table
    Extern,
    /// Native class name, index into the file's name table
    NativeClass,
    BuiltinFunc,
    BuiltinType,
    /// Index into the file's constant table
    ConstValue,
}

const ALL_KINDS: [AddressKind; 11] = [
    AddressKind::Null,
    AddressKind::Stack,
    AddressKind::Parameter,
    AddressKind::This,
    AddressKind::MemberVar,
    AddressKind::StaticMember,
    AddressKind::Extern,
    AddressKind::NativeClass,
    AddressKind::BuiltinFunc,
    AddressKind::BuiltinType,
    AddressKind::ConstValue,
];

impl AddressKind {
    pub fn name(&self) -> &'static str {
        match self {
            AddressKind::Null => "null",
            AddressKind::Stack => "stack",
            AddressKind::Parameter => "param",
            AddressKind::This => "this",
            AddressKind::MemberVar => "member",
            AddressKind::StaticMember => "static",
            AddressKind::Extern => "extern",
            AddressKind::NativeClass => "native",
            AddressKind::BuiltinFunc => "builtin_func",
            AddressKind::BuiltinType => "builtin_type",
            AddressKind::ConstValue => "const",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Address(u32);

impl Address {
    pub fn new(kind: AddressKind, index: u32) -> Self {
        Address(((kind as u32) << KIND_SHIFT) | (index & INDEX_MASK))
    }

    pub fn null() -> Self {
        Address::new(AddressKind::Null, 0)
    }

    pub fn this() -> Self {
        Address::new(AddressKind::This, 0)
    }

    pub fn stack(slot: u32) -> Self {
        Address::new(AddressKind::Stack, slot)
    }

    pub fn from_word(word: u32) -> Self {
        Address(word)
    }

    pub fn word(&self) -> u32 {
        self.0
    }

    /// `None` for a corrupt word
    pub fn kind(&self) -> Option<AddressKind> {
        ALL_KINDS.get((self.0 >> KIND_SHIFT) as usize).copied()
    }

    pub fn index(&self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// Storage a reference parameter can write back to
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind(),
            Some(AddressKind::Stack)
                | Some(AddressKind::Parameter)
                | Some(AddressKind::MemberVar)
                | Some(AddressKind::StaticMember)
        )
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::null()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(AddressKind::Null) => write!(f, "null"),
            Some(AddressKind::This) => write!(f, "this"),
            Some(kind) => write!(f, "{}({})", kind.name(), self.index()),
            None => write!(f, "invalid(0x{:08x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_index_share_one_word() {
        let addr = Address::new(AddressKind::ConstValue, 42);
        assert_eq!(addr.kind(), Some(AddressKind::ConstValue));
        assert_eq!(addr.index(), 42);
        assert_eq!(Address::from_word(addr.word()), addr);
    }

    #[test]
    fn test_assignable_addresses() {
        assert!(Address::stack(0).is_assignable());
        assert!(Address::new(AddressKind::Parameter, 1).is_assignable());
        assert!(Address::new(AddressKind::MemberVar, 1).is_assignable());
        assert!(Address::new(AddressKind::StaticMember, 2).is_assignable());
        assert!(!Address::new(AddressKind::ConstValue, 0).is_assignable());
        assert!(!Address::this().is_assignable());
        assert_eq!(format!("{:?}", Address::stack(3)), "stack(3)");
    }
}
