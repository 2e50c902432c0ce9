//! Instruction words and opcodes
//!
//! Instruction format (32 bits, Lua 5.3 layout):
//!
//! ```text
//! iABC:   B:9 | C:9 | A:8 | op:6
//! iABx:   Bx:18     | A:8 | op:6
//! iAsBx:  sBx:18    | A:8 | op:6     (sBx stored excess-131071)
//! iAx:    Ax:26           | op:6
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

const POS_A: u32 = 6;
const POS_C: u32 = 14;
const POS_B: u32 = 23;
const POS_BX: u32 = 14;
const POS_AX: u32 = 6;

/// Maximum value of the A operand (8 bits).
pub const MAXARG_A: u32 = (1 << 8) - 1;
/// Maximum value of the B and C operands (9 bits).
pub const MAXARG_B: u32 = (1 << 9) - 1;
/// Maximum value of the Bx operand (18 bits).
pub const MAXARG_BX: u32 = (1 << 18) - 1;
/// Maximum value of the signed sBx operand; also its storage bias.
pub const MAXARG_SBX: i32 = (MAXARG_BX >> 1) as i32;
/// Maximum value of the Ax operand (26 bits).
pub const MAXARG_AX: u32 = (1 << 26) - 1;

/// Instruction encoding shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFormat {
    /// Three operands A, B, C.
    ABC,
    /// Operand A plus an 18-bit unsigned Bx.
    ABx,
    /// Operand A plus an 18-bit signed sBx (jump offsets).
    AsBx,
    /// A single 26-bit Ax operand.
    Ax,
}

/// Bytecode opcodes, numbered exactly as the target VM expects.
///
/// Register-transfer notation: `r[x]` is a frame register, `kst[x]` a
/// constant, `upval[x]` an upvalue, `rk(x)` a register-or-constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// `r[a] = r[b]`
    Move = 0,
    /// `r[a] = kst[bx]`
    LoadK = 1,
    /// `r[a] = kst[extra arg]`, index carried by a following `ExtraArg`
    LoadKx = 2,
    /// `r[a] = (bool)b; if c then pc++`
    LoadBool = 3,
    /// `r[a], r[a+1], ..., r[a+b] = nil`
    LoadNil = 4,
    /// `r[a] = upval[b]`
    GetUpval = 5,
    /// `r[a] = upval[b][rk(c)]`
    GetTabUp = 6,
    /// `r[a] = r[b][rk(c)]`
    GetTable = 7,
    /// `upval[a][rk(b)] = rk(c)`
    SetTabUp = 8,
    /// `upval[b] = r[a]`
    SetUpval = 9,
    /// `r[a][rk(b)] = rk(c)`
    SetTable = 10,
    /// `r[a] = {}` with array/hash size hints b, c
    NewTable = 11,
    /// `r[a+1] = r[b]; r[a] = r[b][rk(c)]`
    Self_ = 12,
    /// `r[a] = rk(b) + rk(c)`
    Add = 13,
    /// `r[a] = rk(b) - rk(c)`
    Sub = 14,
    /// `r[a] = rk(b) * rk(c)`
    Mul = 15,
    /// `r[a] = rk(b) % rk(c)`
    Mod = 16,
    /// `r[a] = rk(b) ^ rk(c)`
    Pow = 17,
    /// `r[a] = rk(b) / rk(c)`
    Div = 18,
    /// `r[a] = rk(b) // rk(c)`
    IDiv = 19,
    /// `r[a] = rk(b) & rk(c)`
    BAnd = 20,
    /// `r[a] = rk(b) | rk(c)`
    BOr = 21,
    /// `r[a] = rk(b) ~ rk(c)`
    BXor = 22,
    /// `r[a] = rk(b) << rk(c)`
    Shl = 23,
    /// `r[a] = rk(b) >> rk(c)`
    Shr = 24,
    /// `r[a] = -r[b]`
    Unm = 25,
    /// `r[a] = ~r[b]`
    BNot = 26,
    /// `r[a] = not r[b]`
    Not = 27,
    /// `r[a] = length of r[b]`
    Len = 28,
    /// `r[a] = r[b] .. ... .. r[c]`
    Concat = 29,
    /// `pc += sBx; if a > 0 then close upvalues >= r[a-1]`
    Jmp = 30,
    /// `if (rk(b) == rk(c)) != a then pc++`
    Eq = 31,
    /// `if (rk(b) < rk(c)) != a then pc++`
    Lt = 32,
    /// `if (rk(b) <= rk(c)) != a then pc++`
    Le = 33,
    /// `if boolean(r[a]) != c then pc++`
    Test = 34,
    /// `if boolean(r[b]) == c then r[a] = r[b] else pc++`
    TestSet = 35,
    /// `r[a], ..., r[a+c-2] = r[a](r[a+1], ..., r[a+b-1])`
    Call = 36,
    /// `return r[a](r[a+1], ..., r[a+b-1])`
    TailCall = 37,
    /// `return r[a], ..., r[a+b-2]`
    Return = 38,
    /// `r[a] += r[a+2]; if r[a] <?= r[a+1] then { pc += sBx; r[a+3] = r[a] }`
    ForLoop = 39,
    /// `r[a] -= r[a+2]; pc += sBx`
    ForPrep = 40,
    /// `r[a+3], ..., r[a+2+c] = r[a](r[a+1], r[a+2])`
    TForCall = 41,
    /// `if r[a+1] != nil then { r[a] = r[a+1]; pc += sBx }`
    TForLoop = 42,
    /// `r[a][(c-1)*50+i] = r[a+i], 1 <= i <= b`
    SetList = 43,
    /// `r[a] = closure(proto[bx])`
    Closure = 44,
    /// `r[a], r[a+1], ..., r[a+b-2] = vararg`
    VarArg = 45,
    /// Extra 26-bit argument for the preceding instruction.
    ExtraArg = 46,
}

impl Opcode {
    /// Number of opcodes.
    pub const COUNT: usize = 47;

    const ALL: [Opcode; Self::COUNT] = [
        Opcode::Move,
        Opcode::LoadK,
        Opcode::LoadKx,
        Opcode::LoadBool,
        Opcode::LoadNil,
        Opcode::GetUpval,
        Opcode::GetTabUp,
        Opcode::GetTable,
        Opcode::SetTabUp,
        Opcode::SetUpval,
        Opcode::SetTable,
        Opcode::NewTable,
        Opcode::Self_,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Mod,
        Opcode::Pow,
        Opcode::Div,
        Opcode::IDiv,
        Opcode::BAnd,
        Opcode::BOr,
        Opcode::BXor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Unm,
        Opcode::BNot,
        Opcode::Not,
        Opcode::Len,
        Opcode::Concat,
        Opcode::Jmp,
        Opcode::Eq,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Test,
        Opcode::TestSet,
        Opcode::Call,
        Opcode::TailCall,
        Opcode::Return,
        Opcode::ForLoop,
        Opcode::ForPrep,
        Opcode::TForCall,
        Opcode::TForLoop,
        Opcode::SetList,
        Opcode::Closure,
        Opcode::VarArg,
        Opcode::ExtraArg,
    ];

    /// Decode an opcode from its numeric value.
    pub fn from_u8(value: u8) -> Option<Opcode> {
        Self::ALL.get(value as usize).copied()
    }

    /// Encoding shape of this opcode.
    pub fn format(self) -> OpFormat {
        match self {
            Opcode::LoadK | Opcode::LoadKx | Opcode::Closure => OpFormat::ABx,
            Opcode::Jmp | Opcode::ForLoop | Opcode::ForPrep | Opcode::TForLoop => OpFormat::AsBx,
            Opcode::ExtraArg => OpFormat::Ax,
            _ => OpFormat::ABC,
        }
    }

    /// Uppercase mnemonic, as disassemblers print it.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Move => "MOVE",
            Opcode::LoadK => "LOADK",
            Opcode::LoadKx => "LOADKX",
            Opcode::LoadBool => "LOADBOOL",
            Opcode::LoadNil => "LOADNIL",
            Opcode::GetUpval => "GETUPVAL",
            Opcode::GetTabUp => "GETTABUP",
            Opcode::GetTable => "GETTABLE",
            Opcode::SetTabUp => "SETTABUP",
            Opcode::SetUpval => "SETUPVAL",
            Opcode::SetTable => "SETTABLE",
            Opcode::NewTable => "NEWTABLE",
            Opcode::Self_ => "SELF",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Mod => "MOD",
            Opcode::Pow => "POW",
            Opcode::Div => "DIV",
            Opcode::IDiv => "IDIV",
            Opcode::BAnd => "BAND",
            Opcode::BOr => "BOR",
            Opcode::BXor => "BXOR",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::Unm => "UNM",
            Opcode::BNot => "BNOT",
            Opcode::Not => "NOT",
            Opcode::Len => "LEN",
            Opcode::Concat => "CONCAT",
            Opcode::Jmp => "JMP",
            Opcode::Eq => "EQ",
            Opcode::Lt => "LT",
            Opcode::Le => "LE",
            Opcode::Test => "TEST",
            Opcode::TestSet => "TESTSET",
            Opcode::Call => "CALL",
            Opcode::TailCall => "TAILCALL",
            Opcode::Return => "RETURN",
            Opcode::ForLoop => "FORLOOP",
            Opcode::ForPrep => "FORPREP",
            Opcode::TForCall => "TFORCALL",
            Opcode::TForLoop => "TFORLOOP",
            Opcode::SetList => "SETLIST",
            Opcode::Closure => "CLOSURE",
            Opcode::VarArg => "VARARG",
            Opcode::ExtraArg => "EXTRAARG",
        }
    }
}

/// One encoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Instruction(pub u32);

impl Instruction {
    /// Encode an iABC instruction.
    #[inline]
    pub fn abc(op: Opcode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAXARG_A && b <= MAXARG_B && c <= MAXARG_B);
        Instruction(b << POS_B | c << POS_C | a << POS_A | op as u32)
    }

    /// Encode an iABx instruction.
    #[inline]
    pub fn abx(op: Opcode, a: u32, bx: u32) -> Self {
        debug_assert!(a <= MAXARG_A && bx <= MAXARG_BX);
        Instruction(bx << POS_BX | a << POS_A | op as u32)
    }

    /// Encode an iAsBx instruction; `sbx` is biased into the Bx field.
    #[inline]
    pub fn asbx(op: Opcode, a: u32, sbx: i32) -> Self {
        debug_assert!(sbx.abs() <= MAXARG_SBX);
        Self::abx(op, a, (sbx + MAXARG_SBX) as u32)
    }

    /// Encode an iAx instruction.
    #[inline]
    pub fn ax(op: Opcode, ax: u32) -> Self {
        debug_assert!(ax <= MAXARG_AX);
        Instruction(ax << POS_AX | op as u32)
    }

    /// Raw word.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Decode the opcode.
    #[inline]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_u8((self.0 & 0x3F) as u8)
    }

    /// The A operand.
    #[inline]
    pub const fn a(self) -> u32 {
        (self.0 >> POS_A) & MAXARG_A
    }

    /// The B operand.
    #[inline]
    pub const fn b(self) -> u32 {
        (self.0 >> POS_B) & MAXARG_B
    }

    /// The C operand.
    #[inline]
    pub const fn c(self) -> u32 {
        (self.0 >> POS_C) & MAXARG_B
    }

    /// The unsigned Bx operand.
    #[inline]
    pub const fn bx(self) -> u32 {
        (self.0 >> POS_BX) & MAXARG_BX
    }

    /// The signed sBx operand.
    #[inline]
    pub const fn sbx(self) -> i32 {
        self.bx() as i32 - MAXARG_SBX
    }

    /// The Ax operand.
    #[inline]
    pub const fn ax_arg(self) -> u32 {
        (self.0 >> POS_AX) & MAXARG_AX
    }

    /// Overwrite the sBx field in place, leaving opcode and A untouched.
    /// Used when backpatching a jump whose target was unknown at emit time.
    pub fn set_sbx(&mut self, sbx: i32) {
        debug_assert!(sbx.abs() <= MAXARG_SBX);
        let cleared = (self.0 << 18) >> 18;
        self.0 = cleared | ((sbx + MAXARG_SBX) as u32) << POS_BX;
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "INVALID({:#010x})", self.0);
        };
        match op.format() {
            OpFormat::ABC => write!(f, "{} {} {} {}", op.name(), self.a(), self.b(), self.c()),
            OpFormat::ABx => write!(f, "{} {} {}", op.name(), self.a(), self.bx()),
            OpFormat::AsBx => write!(f, "{} {} {}", op.name(), self.a(), self.sbx()),
            OpFormat::Ax => write!(f, "{} {}", op.name(), self.ax_arg()),
        }
    }
}
