//! Read-only instruction records.
//!
//! Instructions are produced by the bytecode front end; the interpreter only reads them. An
//! instruction carries a coarse [`Opcode`] and a raw `flags` byte selecting the variant, which is
//! decoded on demand into one of the typed sub-opcodes below.

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::program::InstIndex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Nop,
    Move,
    Return,
    Const,
    Monitor,
    CheckCast,
    Instance,
    Array,
    Throw,
    Goto,
    Switch,
    Cmp,
    If,
    Invoke,
    Unop,
    Binop,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Move => "move",
            Opcode::Return => "return",
            Opcode::Const => "const",
            Opcode::Monitor => "monitor",
            Opcode::CheckCast => "check-cast",
            Opcode::Instance => "instance",
            Opcode::Array => "array",
            Opcode::Throw => "throw",
            Opcode::Goto => "goto",
            Opcode::Switch => "switch",
            Opcode::Cmp => "cmp",
            Opcode::If => "if",
            Opcode::Invoke => "invoke",
            Opcode::Unop => "unop",
            Opcode::Binop => "binop",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declare a sub-opcode enum decoded from the flags byte, variants numbered from zero.
macro_rules! flag_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn from_flags(flags: u8) -> Option<Self> {
                Self::ALL.get(flags as usize).copied()
            }

            pub fn flags(self) -> u8 {
                self as u8
            }
        }
    };
}

flag_enum!(
    /// Variant of [`Opcode::Monitor`].
    MonitorOp { Enter, Exit }
);

flag_enum!(
    /// Variant of [`Opcode::Switch`].
    SwitchOp { Packed, Sparse }
);

flag_enum!(
    /// Variant of [`Opcode::Instance`].
    InstanceOp { Of, New, Get, Put, StaticGet, StaticPut }
);

flag_enum!(
    /// Variant of [`Opcode::Array`].
    ArrayOp { Length, New, FilledNew, FilledNewRange, Get, Put }
);

flag_enum!(
    /// Variant of [`Opcode::If`].
    IfCond { Eq, Ne, Gt, Ge, Le, Lt }
);

flag_enum!(
    /// Variant of [`Opcode::Unop`]. `To` is a numeric conversion.
    UnaryOp { Neg, Not, To }
);

flag_enum!(
    /// Variant of [`Opcode::Binop`]. `Rsub` computes `b - a` (`rsub-int`).
    BinaryOp { Add, Sub, Mul, Div, Rem, And, Or, Xor, Shr, Shl, Ushr, Rsub }
);

flag_enum!(
    /// Declared type of an operand.
    OperandType {
        Any,
        Boolean,
        Byte,
        Char,
        Short,
        Int,
        Long,
        Double,
        Float,
        Object,
        String,
        Class,
        Void,
        Label,
        LabelVector,
        Sparse,
        TypeDesc,
        TypeList,
        Field,
        Exception,
    }
);

const FLAG_WIDE: u8 = 0x01;
const FLAG_CONST: u8 = 0x40;
const FLAG_RESULT: u8 = 0x80;

/// Operand header, packed into one byte as `result:1 const:1 type:5 wide:1`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OperandHeader {
    /// 64-bit operand.
    pub wide: bool,
    pub ty: OperandType,
    pub is_const: bool,
    /// The operand names the result register.
    pub is_result: bool,
}

impl OperandHeader {
    pub const fn new(ty: OperandType) -> Self {
        Self {
            wide: false,
            ty,
            is_const: false,
            is_result: false,
        }
    }

    pub fn bits(self) -> u8 {
        let mut bits = self.ty.flags() << 1;
        if self.wide {
            bits |= FLAG_WIDE;
        }
        if self.is_const {
            bits |= FLAG_CONST;
        }
        if self.is_result {
            bits |= FLAG_RESULT;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(Self {
            wide: bits & FLAG_WIDE != 0,
            ty: OperandType::from_flags((bits >> 1) & 0x1f)?,
            is_const: bits & FLAG_CONST != 0,
            is_result: bits & FLAG_RESULT != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Register(u16),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Label(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub header: OperandHeader,
    pub payload: Payload,
}

impl Operand {
    fn constant(ty: OperandType, payload: Payload) -> Self {
        Self {
            header: OperandHeader {
                is_const: true,
                ..OperandHeader::new(ty)
            },
            payload,
        }
    }

    pub fn register(reg: u16) -> Self {
        Self {
            header: OperandHeader::new(OperandType::Any),
            payload: Payload::Register(reg),
        }
    }

    pub fn wide_register(reg: u16) -> Self {
        Self {
            header: OperandHeader {
                wide: true,
                ..OperandHeader::new(OperandType::Any)
            },
            payload: Payload::Register(reg),
        }
    }

    /// The result register.
    pub fn result() -> Self {
        Self {
            header: OperandHeader {
                is_result: true,
                ..OperandHeader::new(OperandType::Any)
            },
            payload: Payload::None,
        }
    }

    /// The exception register.
    pub fn exception() -> Self {
        Self {
            header: OperandHeader::new(OperandType::Exception),
            payload: Payload::None,
        }
    }

    pub fn void() -> Self {
        Self {
            header: OperandHeader::new(OperandType::Void),
            payload: Payload::None,
        }
    }

    pub fn int(value: i64) -> Self {
        Self::constant(OperandType::Int, Payload::Int(value))
    }

    pub fn long(value: i64) -> Self {
        let mut op = Self::constant(OperandType::Int, Payload::Int(value));
        op.header.wide = true;
        op
    }

    pub fn boolean(value: bool) -> Self {
        Self::constant(OperandType::Boolean, Payload::Int(value as i64))
    }

    pub fn float(value: f64) -> Self {
        Self::constant(OperandType::Float, Payload::Float(value))
    }

    pub fn double(value: f64) -> Self {
        let mut op = Self::constant(OperandType::Double, Payload::Float(value));
        op.header.wide = true;
        op
    }

    pub fn string(value: &str) -> Self {
        Self::constant(OperandType::String, Payload::Str(value.into()))
    }

    pub fn class(classpath: &str) -> Self {
        Self::constant(OperandType::Class, Payload::Str(classpath.into()))
    }

    pub fn field(name: &str) -> Self {
        Self::constant(OperandType::Field, Payload::Str(name.into()))
    }

    pub fn typedesc(desc: &str) -> Self {
        Self::constant(OperandType::TypeDesc, Payload::Str(desc.into()))
    }

    pub fn label(id: u32) -> Self {
        Self::constant(OperandType::Label, Payload::Label(id))
    }

    pub fn is_const(&self) -> bool {
        self.header.is_const
    }

    pub fn ty(&self) -> OperandType {
        self.header.ty
    }

    /// String payload (string constant, class path, field name or type descriptor).
    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(&**s),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.header;
        if !h.is_const {
            return match (h.ty, h.is_result, &self.payload) {
                (OperandType::Void, _, _) => write!(f, "void"),
                (_, true, _) => write!(f, "reg-result"),
                (OperandType::Exception, _, _) => write!(f, "reg-exception"),
                (_, _, Payload::Register(r)) => write!(f, "reg{}", r),
                (_, _, payload) => write!(f, "reg?{:?}", payload),
            };
        }
        match (h.ty, &self.payload) {
            (OperandType::Class, Payload::Str(s)) => write!(f, "[class {}]", s),
            (OperandType::String, Payload::Str(s)) => write!(f, "{:?}", &**s),
            (OperandType::Boolean, Payload::Int(v)) => write!(f, "{}", *v != 0),
            (_, Payload::Int(v)) => write!(f, "{}{}", v, if h.wide { "L" } else { "I" }),
            (_, Payload::Float(v)) => write!(f, "{}{}", v, if h.wide { "D" } else { "F" }),
            (_, Payload::Str(s)) => write!(f, "{}", s),
            (_, Payload::Label(l)) => write!(f, "L{}", l),
            (ty, payload) => write!(f, "invalid-constant {:?} {:?}", ty, payload),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub flags: u8,
    pub operands: Vec<Operand>,
    /// Next instruction of the method, if any.
    pub next: Option<InstIndex>,
    /// Source line.
    pub line: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, flags: u8, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            flags,
            operands,
            next: None,
            line: 0,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn nop() -> Self {
        Self::new(Opcode::Nop, 0, vec![])
    }

    /// `move dest, src`
    pub fn mov(dest: Operand, src: Operand) -> Self {
        Self::new(Opcode::Move, 0, vec![dest, src])
    }

    /// `const dest, value`
    pub fn constant(dest: u16, value: Operand) -> Self {
        Self::new(Opcode::Const, 0, vec![Operand::register(dest), value])
    }

    pub fn monitor(op: MonitorOp, reg: u16) -> Self {
        Self::new(Opcode::Monitor, op.flags(), vec![Operand::register(reg)])
    }

    pub fn check_cast(reg: u16, classpath: &str) -> Self {
        Self::new(Opcode::CheckCast, 0, vec![Operand::register(reg), Operand::class(classpath)])
    }

    pub fn throw(reg: u16) -> Self {
        Self::new(Opcode::Throw, 0, vec![Operand::register(reg)])
    }

    /// `packed-switch` / `sparse-switch` on a register. The targets live in the block branches.
    pub fn switch(op: SwitchOp, reg: u16) -> Self {
        Self::new(Opcode::Switch, op.flags(), vec![Operand::register(reg)])
    }

    /// `instance-of dest, src, [class classpath]`
    pub fn instance_of(dest: u16, src: u16, classpath: &str) -> Self {
        Self::new(
            Opcode::Instance,
            InstanceOp::Of.flags(),
            vec![Operand::register(dest), Operand::register(src), Operand::class(classpath)],
        )
    }

    /// `new-instance dest, [class classpath]`
    pub fn new_instance(dest: u16, classpath: &str) -> Self {
        Self::new(
            Opcode::Instance,
            InstanceOp::New.flags(),
            vec![Operand::register(dest), Operand::class(classpath)],
        )
    }

    /// `iget dest, obj, classpath, field, type`
    pub fn iget(dest: u16, obj: u16, classpath: &str, field: &str, ty: &str) -> Self {
        Self::new(
            Opcode::Instance,
            InstanceOp::Get.flags(),
            vec![
                Operand::register(dest),
                Operand::register(obj),
                Operand::class(classpath),
                Operand::field(field),
                Operand::typedesc(ty),
            ],
        )
    }

    /// `iput src, obj, classpath, field, type`
    pub fn iput(src: u16, obj: u16, classpath: &str, field: &str, ty: &str) -> Self {
        Self::new(
            Opcode::Instance,
            InstanceOp::Put.flags(),
            vec![
                Operand::register(src),
                Operand::register(obj),
                Operand::class(classpath),
                Operand::field(field),
                Operand::typedesc(ty),
            ],
        )
    }

    /// `sget` / `sput` on a static field.
    pub fn static_field(op: InstanceOp, reg: u16, classpath: &str, field: &str, ty: &str) -> Self {
        Self::new(
            Opcode::Instance,
            op.flags(),
            vec![
                Operand::register(reg),
                Operand::class(classpath),
                Operand::field(field),
                Operand::typedesc(ty),
            ],
        )
    }

    pub fn array(op: ArrayOp, operands: Vec<Operand>) -> Self {
        Self::new(Opcode::Array, op.flags(), operands)
    }

    /// `cmp dest, a, b`
    pub fn cmp(dest: u16, a: Operand, b: Operand) -> Self {
        Self::new(Opcode::Cmp, 0, vec![Operand::register(dest), a, b])
    }

    /// `unop dest, src`
    pub fn unop(op: UnaryOp, dest: u16, src: Operand) -> Self {
        Self::new(Opcode::Unop, op.flags(), vec![Operand::register(dest), src])
    }

    /// `binop dest, a, b`
    pub fn binop(op: BinaryOp, dest: u16, a: Operand, b: Operand) -> Self {
        Self::new(Opcode::Binop, op.flags(), vec![Operand::register(dest), a, b])
    }

    pub fn goto(label: u32) -> Self {
        Self::new(Opcode::Goto, 0, vec![Operand::label(label)])
    }

    /// `if-<cond> a, b, label`
    pub fn if_cond(cond: IfCond, a: Operand, b: Operand, label: u32) -> Self {
        Self::new(Opcode::If, cond.flags(), vec![a, b, Operand::label(label)])
    }

    pub fn ret(value: Operand) -> Self {
        Self::new(Opcode::Return, 0, vec![value])
    }

    pub fn invoke(classpath: &str, method: &str, args: &[u16]) -> Self {
        let mut operands = vec![Operand::class(classpath), Operand::field(method)];
        operands.extend(args.iter().map(|&r| Operand::register(r)));
        Self::new(Opcode::Invoke, 0, operands)
    }

    /// The `i`-th operand, or a malformed-instruction error naming `index`.
    pub fn operand(&self, index: InstIndex, i: usize) -> Result<&Operand> {
        self.operands
            .get(i)
            .ok_or_else(|| Error::malformed(index, format!("{} has no operand {}", self.opcode, i)))
    }

    /// Decode the flags byte as a sub-opcode of type `T`.
    pub fn decode<T>(&self, index: InstIndex, from_flags: fn(u8) -> Option<T>) -> Result<T> {
        from_flags(self.flags).ok_or_else(|| {
            Error::malformed(
                index,
                format!("unknown flags {:#x} for opcode {}", self.flags, self.opcode),
            )
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for op in &self.operands {
            write!(f, " {}", op)?;
        }
        Ok(())
    }
}
