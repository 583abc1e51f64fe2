//! Opcode and inline-code definitions for the bytecode wire format.
//!
//! The format is a flat byte stream: every instruction starts with one
//! opcode byte, followed by inline operands. Multi-byte integers are
//! little-endian. The numeric values here are the wire format and must not
//! be reordered.

/// Magic number at the start of every bytecode image (`HTVM`).
pub const MAGIC: u32 = u32::from_le_bytes(*b"HTVM");

/// One instruction selector byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Absolute end of the bytecode image
    EndOfCode = 0x00,
    /// End of a module: resolve imports, return the module value
    EndOfModule = 0x01,
    /// End of the statements of one source file
    EndOfFile = 0x02,
    /// Return from the current function body
    EndOfFunc = 0x03,
    /// End of an inline expression region
    EndOfExec = 0x04,
    /// End of one statement
    EndOfStmt = 0x05,
    /// Close the current code block namespace
    EndOfCodeBlock = 0x06,
    /// Open a code block namespace; operand: id string index (u16)
    CodeBlock = 0x07,
    /// Start a new source file; operands: source kind (u8), filename (utf8)
    File = 0x08,
    /// Update current line/column; operands: line (u16), column (u16)
    LineInfo = 0x09,
    /// Global int constant table; u16 count then count i64 entries
    ConstIntTable = 0x0A,
    /// Global float constant table; u16 count then count f64 entries
    ConstFloatTable = 0x0B,
    /// Global string constant table; u16 count then count utf8 entries
    ConstStringTable = 0x0C,
    /// Push a fresh stack frame for a compound expression
    CreateStackFrame = 0x0D,
    /// Pop the stack frame pushed by `CreateStackFrame`
    RetractStackFrame = 0x0E,
    /// Load a literal into the local value slot; operand: literal kind + payload
    Local = 0x0F,
    /// Copy the local value into a named register; operand: register index (u8)
    Register = 0x10,

    /// Relative jump; operand: distance (i16) from after the operand
    Skip = 0x20,
    /// Jump relative to the innermost anchor; operand: offset (u16)
    Goto = 0x21,
    /// Open a loop; operands: continue offset (u16), break offset (u16)
    LoopPoint = 0x22,
    /// Jump to the innermost loop's break point and close it
    BreakLoop = 0x23,
    /// Jump to the innermost loop's continue point
    ContinueLoop = 0x24,
    /// Push the current ip onto the anchor stack
    Anchor = 0x25,
    /// Pop the innermost anchor
    ClearAnchor = 0x26,
    /// Conditional skip; operand: then-branch length (u16)
    IfStmt = 0x27,
    /// While check: leave the loop when the condition is falsy
    WhileStmt = 0x28,
    /// Do-while check; operand: has-condition (u8)
    DoStmt = 0x29,
    /// Switch; see the emitter for the case table layout
    SwitchStmt = 0x2A,

    /// Assign local value to the symbol named by the local symbol slot
    Assign = 0x40,
    /// Member read; operand: nullable access flag (u8)
    MemberGet = 0x41,
    /// Member write; operand: nullable access flag (u8)
    MemberSet = 0x42,
    /// Subscript read; operand: nullable access flag (u8)
    SubGet = 0x43,
    /// Subscript write; operand: nullable access flag (u8)
    SubSet = 0x44,
    /// Short-circuit or; operand: right side length (u16)
    LogicalOr = 0x45,
    /// Short-circuit and; operand: right side length (u16)
    LogicalAnd = 0x46,
    /// Null-coalescing; operand: right side length (u16)
    IfNull = 0x47,
    /// Equality comparison
    Equal = 0x48,
    /// Inequality comparison
    NotEqual = 0x49,
    /// Less-than comparison
    Lesser = 0x4A,
    /// Greater-than comparison
    Greater = 0x4B,
    /// Less-or-equal comparison
    LesserOrEqual = 0x4C,
    /// Greater-or-equal comparison
    GreaterOrEqual = 0x4D,
    /// Cast; operand: inline type expression
    TypeAs = 0x4E,
    /// Type test; operand: inline type expression
    TypeIs = 0x4F,
    /// Negated type test; operand: inline type expression
    TypeIsNot = 0x50,
    /// Addition / string concatenation
    Add = 0x51,
    /// Subtraction
    Subtract = 0x52,
    /// Multiplication
    Multiply = 0x53,
    /// Division
    Divide = 0x54,
    /// Truncating division
    TruncatingDivide = 0x55,
    /// Modulo
    Modulo = 0x56,
    /// Unary minus
    Negative = 0x57,
    /// Logical not
    LogicalNot = 0x58,
    /// Bitwise not
    BitwiseNot = 0x59,
    /// Bitwise or
    BitwiseOr = 0x5A,
    /// Bitwise xor
    BitwiseXor = 0x5B,
    /// Bitwise and
    BitwiseAnd = 0x5C,
    /// Left shift
    LeftShift = 0x5D,
    /// Arithmetic right shift
    RightShift = 0x5E,
    /// Logical right shift
    UnsignedRightShift = 0x5F,
    /// Type of the current local value
    TypeValueOf = 0x60,
    /// Declared type of the symbol named by the local symbol slot
    DecltypeOf = 0x61,
    /// Await: suspend on a pending host future
    AwaitedValue = 0x62,
    /// Call; operands: flags, positional list, named list
    Call = 0x63,
    /// Assert the local value; operand: description (utf8)
    Assertion = 0x64,
    /// Throw the stringified local value
    Throws = 0x65,
    /// Delete a struct or namespace entry; operand: delete kind (u8)
    Delete = 0x66,

    /// Import/export declaration record
    ImportExportDecl = 0x80,
    /// Type alias declaration
    TypeAliasDecl = 0x81,
    /// Function declaration
    FuncDecl = 0x82,
    /// Open a class declaration
    ClassDecl = 0x83,
    /// Close a class declaration
    ClassDeclEnd = 0x84,
    /// External enum declaration
    ExternalEnumDecl = 0x85,
    /// Named struct declaration
    StructDecl = 0x86,
    /// Variable declaration
    VarDecl = 0x87,
    /// Destructuring declaration
    DestructuringDecl = 0x88,
    /// Compile-time constant declaration
    ConstDecl = 0x89,
    /// Open a namespace declaration
    NamespaceDecl = 0x8A,
    /// Close a namespace declaration
    NamespaceDeclEnd = 0x8B,
}

impl Opcode {
    /// Decode an opcode from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0x00 => Opcode::EndOfCode,
            0x01 => Opcode::EndOfModule,
            0x02 => Opcode::EndOfFile,
            0x03 => Opcode::EndOfFunc,
            0x04 => Opcode::EndOfExec,
            0x05 => Opcode::EndOfStmt,
            0x06 => Opcode::EndOfCodeBlock,
            0x07 => Opcode::CodeBlock,
            0x08 => Opcode::File,
            0x09 => Opcode::LineInfo,
            0x0A => Opcode::ConstIntTable,
            0x0B => Opcode::ConstFloatTable,
            0x0C => Opcode::ConstStringTable,
            0x0D => Opcode::CreateStackFrame,
            0x0E => Opcode::RetractStackFrame,
            0x0F => Opcode::Local,
            0x10 => Opcode::Register,
            0x20 => Opcode::Skip,
            0x21 => Opcode::Goto,
            0x22 => Opcode::LoopPoint,
            0x23 => Opcode::BreakLoop,
            0x24 => Opcode::ContinueLoop,
            0x25 => Opcode::Anchor,
            0x26 => Opcode::ClearAnchor,
            0x27 => Opcode::IfStmt,
            0x28 => Opcode::WhileStmt,
            0x29 => Opcode::DoStmt,
            0x2A => Opcode::SwitchStmt,
            0x40 => Opcode::Assign,
            0x41 => Opcode::MemberGet,
            0x42 => Opcode::MemberSet,
            0x43 => Opcode::SubGet,
            0x44 => Opcode::SubSet,
            0x45 => Opcode::LogicalOr,
            0x46 => Opcode::LogicalAnd,
            0x47 => Opcode::IfNull,
            0x48 => Opcode::Equal,
            0x49 => Opcode::NotEqual,
            0x4A => Opcode::Lesser,
            0x4B => Opcode::Greater,
            0x4C => Opcode::LesserOrEqual,
            0x4D => Opcode::GreaterOrEqual,
            0x4E => Opcode::TypeAs,
            0x4F => Opcode::TypeIs,
            0x50 => Opcode::TypeIsNot,
            0x51 => Opcode::Add,
            0x52 => Opcode::Subtract,
            0x53 => Opcode::Multiply,
            0x54 => Opcode::Divide,
            0x55 => Opcode::TruncatingDivide,
            0x56 => Opcode::Modulo,
            0x57 => Opcode::Negative,
            0x58 => Opcode::LogicalNot,
            0x59 => Opcode::BitwiseNot,
            0x5A => Opcode::BitwiseOr,
            0x5B => Opcode::BitwiseXor,
            0x5C => Opcode::BitwiseAnd,
            0x5D => Opcode::LeftShift,
            0x5E => Opcode::RightShift,
            0x5F => Opcode::UnsignedRightShift,
            0x60 => Opcode::TypeValueOf,
            0x61 => Opcode::DecltypeOf,
            0x62 => Opcode::AwaitedValue,
            0x63 => Opcode::Call,
            0x64 => Opcode::Assertion,
            0x65 => Opcode::Throws,
            0x66 => Opcode::Delete,
            0x80 => Opcode::ImportExportDecl,
            0x81 => Opcode::TypeAliasDecl,
            0x82 => Opcode::FuncDecl,
            0x83 => Opcode::ClassDecl,
            0x84 => Opcode::ClassDeclEnd,
            0x85 => Opcode::ExternalEnumDecl,
            0x86 => Opcode::StructDecl,
            0x87 => Opcode::VarDecl,
            0x88 => Opcode::DestructuringDecl,
            0x89 => Opcode::ConstDecl,
            0x8A => Opcode::NamespaceDecl,
            0x8B => Opcode::NamespaceDeclEnd,
            _ => return None,
        };
        Some(opcode)
    }
}

/// Literal kind selector, following an [`Opcode::Local`] byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LiteralKind {
    /// The null literal
    Null = 0x00,
    /// Boolean; payload: one byte
    Bool = 0x01,
    /// Integer from the constant pool; payload: u16 index
    ConstInt = 0x02,
    /// Float from the constant pool; payload: u16 index
    ConstFloat = 0x03,
    /// String from the constant pool; payload: u16 index
    ConstString = 0x04,
    /// Inline utf8 string
    String = 0x05,
    /// Interpolated string; payload: utf8 template, u8 count, count regions
    StringInterpolation = 0x06,
    /// Identifier; payload: u16 string index, is-local flag (u8)
    Identifier = 0x07,
    /// Parenthesized group; payload: inline region
    Group = 0x08,
    /// List literal; payload: u16 count, count × (spread flag, region)
    List = 0x09,
    /// Struct literal; payload: see the emitter
    Struct = 0x0A,
    /// Function literal; payload: same layout as a function declaration
    Function = 0x0B,
    /// Type literal; payload: inline type expression
    Type = 0x0C,
    /// Big integer literal; payload: utf8 decimal digits
    BigInt = 0x0D,
}

impl LiteralKind {
    /// Decode a literal kind from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let kind = match byte {
            0x00 => LiteralKind::Null,
            0x01 => LiteralKind::Bool,
            0x02 => LiteralKind::ConstInt,
            0x03 => LiteralKind::ConstFloat,
            0x04 => LiteralKind::ConstString,
            0x05 => LiteralKind::String,
            0x06 => LiteralKind::StringInterpolation,
            0x07 => LiteralKind::Identifier,
            0x08 => LiteralKind::Group,
            0x09 => LiteralKind::List,
            0x0A => LiteralKind::Struct,
            0x0B => LiteralKind::Function,
            0x0C => LiteralKind::Type,
            0x0D => LiteralKind::BigInt,
            _ => return None,
        };
        Some(kind)
    }
}

/// Type expression selector inside type literals and type operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    /// Intrinsic atom; payload: one byte (see [`IntrinsicCode`])
    Intrinsic = 0x00,
    /// Nominal type; payload: u16 id, nullable flag, u8 arg count, args
    Nominal = 0x01,
    /// Function type; payload: u8 param count, params, return type
    Function = 0x02,
    /// Structural type; payload: u16 field count, fields
    Structural = 0x03,
}

impl TypeCode {
    /// Decode a type code from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(TypeCode::Intrinsic),
            0x01 => Some(TypeCode::Nominal),
            0x02 => Some(TypeCode::Function),
            0x03 => Some(TypeCode::Structural),
            _ => None,
        }
    }
}

/// Wire bytes of the intrinsic type atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IntrinsicCode {
    /// `any`
    Any = 0x00,
    /// `unknown`
    Unknown = 0x01,
    /// `void`
    Void = 0x02,
    /// `never`
    Never = 0x03,
    /// `type`
    Type = 0x04,
    /// `function`
    Function = 0x05,
    /// `namespace`
    Namespace = 0x06,
    /// `null`
    Null = 0x07,
}

impl IntrinsicCode {
    /// Decode an intrinsic atom from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(IntrinsicCode::Any),
            0x01 => Some(IntrinsicCode::Unknown),
            0x02 => Some(IntrinsicCode::Void),
            0x03 => Some(IntrinsicCode::Never),
            0x04 => Some(IntrinsicCode::Type),
            0x05 => Some(IntrinsicCode::Function),
            0x06 => Some(IntrinsicCode::Namespace),
            0x07 => Some(IntrinsicCode::Null),
            _ => None,
        }
    }
}

/// Sub-selector of the `Delete` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeleteKind {
    /// Delete a symbol from the current namespace; payload: u16 id
    Local = 0x00,
    /// Delete a member of the postfix object; payload: u16 key
    Member = 0x01,
    /// Delete a subscript of the postfix object; key in the local value slot
    Sub = 0x02,
}

impl DeleteKind {
    /// Decode a delete kind from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(DeleteKind::Local),
            0x01 => Some(DeleteKind::Member),
            0x02 => Some(DeleteKind::Sub),
            _ => None,
        }
    }
}

/// Named register slots of a stack frame.
///
/// The compiler stages at most one operand per slot per expression; these
/// are semantic operand slots, not an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    /// Most recently produced value
    LocalValue = 0x00,
    /// Most recently named symbol (assignment target)
    LocalSymbol = 0x01,
    /// Left operand of `+`/`-`
    AdditiveLeft = 0x02,
    /// Left operand of `*`/`/`/`%`
    MultiplicativeLeft = 0x03,
    /// Left operand of relational comparisons and type tests
    RelationLeft = 0x04,
    /// Left operand of equality comparisons
    EqualLeft = 0x05,
    /// Left operand of logical and
    AndLeft = 0x06,
    /// Left operand of logical or
    OrLeft = 0x07,
    /// Left operand of null-coalescing
    IfNullLeft = 0x08,
    /// Left operand of bitwise or
    BitwiseOrLeft = 0x09,
    /// Left operand of bitwise xor
    BitwiseXorLeft = 0x0A,
    /// Left operand of bitwise and
    BitwiseAndLeft = 0x0B,
    /// Left operand of shifts
    BitwiseShiftLeft = 0x0C,
    /// Receiver of member/subscript access
    PostfixObject = 0x0D,
    /// Key of member access
    PostfixKey = 0x0E,
    /// Right-hand side of member/subscript assignment
    AssignRight = 0x0F,
}

/// Number of register slots in a stack frame.
pub const REGISTER_COUNT: usize = 16;

impl Register {
    /// Decode a register index from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let register = match byte {
            0x00 => Register::LocalValue,
            0x01 => Register::LocalSymbol,
            0x02 => Register::AdditiveLeft,
            0x03 => Register::MultiplicativeLeft,
            0x04 => Register::RelationLeft,
            0x05 => Register::EqualLeft,
            0x06 => Register::AndLeft,
            0x07 => Register::OrLeft,
            0x08 => Register::IfNullLeft,
            0x09 => Register::BitwiseOrLeft,
            0x0A => Register::BitwiseXorLeft,
            0x0B => Register::BitwiseAndLeft,
            0x0C => Register::BitwiseShiftLeft,
            0x0D => Register::PostfixObject,
            0x0E => Register::PostfixKey,
            0x0F => Register::AssignRight,
            _ => return None,
        };
        Some(register)
    }
}

/// Function category byte inside function declarations and literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCategory {
    /// An ordinary function or method
    Normal = 0x00,
    /// A constructor
    Constructor = 0x01,
    /// A getter, auto-invoked on member reads
    Getter = 0x02,
    /// A setter, auto-invoked on member writes
    Setter = 0x03,
    /// An anonymous function literal
    Literal = 0x04,
}

impl FunctionCategory {
    /// Decode a function category from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(FunctionCategory::Normal),
            0x01 => Some(FunctionCategory::Constructor),
            0x02 => Some(FunctionCategory::Getter),
            0x03 => Some(FunctionCategory::Setter),
            0x04 => Some(FunctionCategory::Literal),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0u8..=255 {
            if let Some(opcode) = Opcode::from_byte(byte) {
                assert_eq!(opcode as u8, byte);
            }
        }
        assert_eq!(Opcode::from_byte(0x0F), Some(Opcode::Local));
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_literal_kind_roundtrip() {
        for byte in 0u8..=255 {
            if let Some(kind) = LiteralKind::from_byte(byte) {
                assert_eq!(kind as u8, byte);
            }
        }
        assert_eq!(LiteralKind::from_byte(0x30), None);
    }

    #[test]
    fn test_register_roundtrip() {
        for byte in 0u8..0x10 {
            let register = Register::from_byte(byte).unwrap();
            assert_eq!(register as u8, byte);
        }
    }

    #[test]
    fn test_magic_is_stable() {
        assert_eq!(MAGIC.to_le_bytes(), *b"HTVM");
    }
}
