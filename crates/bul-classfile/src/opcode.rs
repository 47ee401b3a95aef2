//! JVM instruction set
//!
//! Defines every opcode of JVMS chapter 6 together with its mnemonic and the
//! length of its fixed operands, plus an iterator that splits a method's code
//! array into instructions.
//!
//! Opcodes are grouped the way the JVMS lists them:
//! - 0x00-0x14: constants
//! - 0x15-0x35: loads
//! - 0x36-0x56: stores
//! - 0x57-0x5F: stack
//! - 0x60-0x84: math
//! - 0x85-0x93: conversions
//! - 0x94-0xA6: comparisons
//! - 0xA7-0xB1: control
//! - 0xB2-0xC3: references
//! - 0xC4-0xC9: extended

use crate::encoder::DecodeError;

macro_rules! define_opcodes {
    ($($variant:ident = $byte:literal => $mnemonic:literal, $len:expr;)*) => {
        /// JVM opcode enumeration
        ///
        /// Every opcode is a single byte. `operand_len` gives the number of
        /// operand bytes that follow it, or `None` for the variable-length
        /// forms (`tableswitch`, `lookupswitch`, `wide`).
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $(
                #[doc = concat!("`", $mnemonic, "`")]
                $variant = $byte,
            )*
        }

        impl Opcode {
            /// Convert a byte to an opcode
            pub fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $($byte => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// JVMS mnemonic of the opcode
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)*
                }
            }

            /// Number of fixed operand bytes, `None` when variable
            pub fn operand_len(self) -> Option<usize> {
                match self {
                    $(Self::$variant => $len,)*
                }
            }
        }
    };
}

define_opcodes! {
    // ===== Constants =====
    Nop = 0x00 => "nop", Some(0);
    AconstNull = 0x01 => "aconst_null", Some(0);
    IconstM1 = 0x02 => "iconst_m1", Some(0);
    Iconst0 = 0x03 => "iconst_0", Some(0);
    Iconst1 = 0x04 => "iconst_1", Some(0);
    Iconst2 = 0x05 => "iconst_2", Some(0);
    Iconst3 = 0x06 => "iconst_3", Some(0);
    Iconst4 = 0x07 => "iconst_4", Some(0);
    Iconst5 = 0x08 => "iconst_5", Some(0);
    Lconst0 = 0x09 => "lconst_0", Some(0);
    Lconst1 = 0x0A => "lconst_1", Some(0);
    Fconst0 = 0x0B => "fconst_0", Some(0);
    Fconst1 = 0x0C => "fconst_1", Some(0);
    Fconst2 = 0x0D => "fconst_2", Some(0);
    Dconst0 = 0x0E => "dconst_0", Some(0);
    Dconst1 = 0x0F => "dconst_1", Some(0);
    Bipush = 0x10 => "bipush", Some(1);
    Sipush = 0x11 => "sipush", Some(2);
    Ldc = 0x12 => "ldc", Some(1);
    LdcW = 0x13 => "ldc_w", Some(2);
    Ldc2W = 0x14 => "ldc2_w", Some(2);

    // ===== Loads =====
    Iload = 0x15 => "iload", Some(1);
    Lload = 0x16 => "lload", Some(1);
    Fload = 0x17 => "fload", Some(1);
    Dload = 0x18 => "dload", Some(1);
    Aload = 0x19 => "aload", Some(1);
    Iload0 = 0x1A => "iload_0", Some(0);
    Iload1 = 0x1B => "iload_1", Some(0);
    Iload2 = 0x1C => "iload_2", Some(0);
    Iload3 = 0x1D => "iload_3", Some(0);
    Lload0 = 0x1E => "lload_0", Some(0);
    Lload1 = 0x1F => "lload_1", Some(0);
    Lload2 = 0x20 => "lload_2", Some(0);
    Lload3 = 0x21 => "lload_3", Some(0);
    Fload0 = 0x22 => "fload_0", Some(0);
    Fload1 = 0x23 => "fload_1", Some(0);
    Fload2 = 0x24 => "fload_2", Some(0);
    Fload3 = 0x25 => "fload_3", Some(0);
    Dload0 = 0x26 => "dload_0", Some(0);
    Dload1 = 0x27 => "dload_1", Some(0);
    Dload2 = 0x28 => "dload_2", Some(0);
    Dload3 = 0x29 => "dload_3", Some(0);
    Aload0 = 0x2A => "aload_0", Some(0);
    Aload1 = 0x2B => "aload_1", Some(0);
    Aload2 = 0x2C => "aload_2", Some(0);
    Aload3 = 0x2D => "aload_3", Some(0);
    Iaload = 0x2E => "iaload", Some(0);
    Laload = 0x2F => "laload", Some(0);
    Faload = 0x30 => "faload", Some(0);
    Daload = 0x31 => "daload", Some(0);
    Aaload = 0x32 => "aaload", Some(0);
    Baload = 0x33 => "baload", Some(0);
    Caload = 0x34 => "caload", Some(0);
    Saload = 0x35 => "saload", Some(0);

    // ===== Stores =====
    Istore = 0x36 => "istore", Some(1);
    Lstore = 0x37 => "lstore", Some(1);
    Fstore = 0x38 => "fstore", Some(1);
    Dstore = 0x39 => "dstore", Some(1);
    Astore = 0x3A => "astore", Some(1);
    Istore0 = 0x3B => "istore_0", Some(0);
    Istore1 = 0x3C => "istore_1", Some(0);
    Istore2 = 0x3D => "istore_2", Some(0);
    Istore3 = 0x3E => "istore_3", Some(0);
    Lstore0 = 0x3F => "lstore_0", Some(0);
    Lstore1 = 0x40 => "lstore_1", Some(0);
    Lstore2 = 0x41 => "lstore_2", Some(0);
    Lstore3 = 0x42 => "lstore_3", Some(0);
    Fstore0 = 0x43 => "fstore_0", Some(0);
    Fstore1 = 0x44 => "fstore_1", Some(0);
    Fstore2 = 0x45 => "fstore_2", Some(0);
    Fstore3 = 0x46 => "fstore_3", Some(0);
    Dstore0 = 0x47 => "dstore_0", Some(0);
    Dstore1 = 0x48 => "dstore_1", Some(0);
    Dstore2 = 0x49 => "dstore_2", Some(0);
    Dstore3 = 0x4A => "dstore_3", Some(0);
    Astore0 = 0x4B => "astore_0", Some(0);
    Astore1 = 0x4C => "astore_1", Some(0);
    Astore2 = 0x4D => "astore_2", Some(0);
    Astore3 = 0x4E => "astore_3", Some(0);
    Iastore = 0x4F => "iastore", Some(0);
    Lastore = 0x50 => "lastore", Some(0);
    Fastore = 0x51 => "fastore", Some(0);
    Dastore = 0x52 => "dastore", Some(0);
    Aastore = 0x53 => "aastore", Some(0);
    Bastore = 0x54 => "bastore", Some(0);
    Castore = 0x55 => "castore", Some(0);
    Sastore = 0x56 => "sastore", Some(0);

    // ===== Stack =====
    Pop = 0x57 => "pop", Some(0);
    Pop2 = 0x58 => "pop2", Some(0);
    Dup = 0x59 => "dup", Some(0);
    DupX1 = 0x5A => "dup_x1", Some(0);
    DupX2 = 0x5B => "dup_x2", Some(0);
    Dup2 = 0x5C => "dup2", Some(0);
    Dup2X1 = 0x5D => "dup2_x1", Some(0);
    Dup2X2 = 0x5E => "dup2_x2", Some(0);
    Swap = 0x5F => "swap", Some(0);

    // ===== Math =====
    Iadd = 0x60 => "iadd", Some(0);
    Ladd = 0x61 => "ladd", Some(0);
    Fadd = 0x62 => "fadd", Some(0);
    Dadd = 0x63 => "dadd", Some(0);
    Isub = 0x64 => "isub", Some(0);
    Lsub = 0x65 => "lsub", Some(0);
    Fsub = 0x66 => "fsub", Some(0);
    Dsub = 0x67 => "dsub", Some(0);
    Imul = 0x68 => "imul", Some(0);
    Lmul = 0x69 => "lmul", Some(0);
    Fmul = 0x6A => "fmul", Some(0);
    Dmul = 0x6B => "dmul", Some(0);
    Idiv = 0x6C => "idiv", Some(0);
    Ldiv = 0x6D => "ldiv", Some(0);
    Fdiv = 0x6E => "fdiv", Some(0);
    Ddiv = 0x6F => "ddiv", Some(0);
    Irem = 0x70 => "irem", Some(0);
    Lrem = 0x71 => "lrem", Some(0);
    Frem = 0x72 => "frem", Some(0);
    Drem = 0x73 => "drem", Some(0);
    Ineg = 0x74 => "ineg", Some(0);
    Lneg = 0x75 => "lneg", Some(0);
    Fneg = 0x76 => "fneg", Some(0);
    Dneg = 0x77 => "dneg", Some(0);
    Ishl = 0x78 => "ishl", Some(0);
    Lshl = 0x79 => "lshl", Some(0);
    Ishr = 0x7A => "ishr", Some(0);
    Lshr = 0x7B => "lshr", Some(0);
    Iushr = 0x7C => "iushr", Some(0);
    Lushr = 0x7D => "lushr", Some(0);
    Iand = 0x7E => "iand", Some(0);
    Land = 0x7F => "land", Some(0);
    Ior = 0x80 => "ior", Some(0);
    Lor = 0x81 => "lor", Some(0);
    Ixor = 0x82 => "ixor", Some(0);
    Lxor = 0x83 => "lxor", Some(0);
    Iinc = 0x84 => "iinc", Some(2);

    // ===== Conversions =====
    I2l = 0x85 => "i2l", Some(0);
    I2f = 0x86 => "i2f", Some(0);
    I2d = 0x87 => "i2d", Some(0);
    L2i = 0x88 => "l2i", Some(0);
    L2f = 0x89 => "l2f", Some(0);
    L2d = 0x8A => "l2d", Some(0);
    F2i = 0x8B => "f2i", Some(0);
    F2l = 0x8C => "f2l", Some(0);
    F2d = 0x8D => "f2d", Some(0);
    D2i = 0x8E => "d2i", Some(0);
    D2l = 0x8F => "d2l", Some(0);
    D2f = 0x90 => "d2f", Some(0);
    I2b = 0x91 => "i2b", Some(0);
    I2c = 0x92 => "i2c", Some(0);
    I2s = 0x93 => "i2s", Some(0);

    // ===== Comparisons =====
    Lcmp = 0x94 => "lcmp", Some(0);
    Fcmpl = 0x95 => "fcmpl", Some(0);
    Fcmpg = 0x96 => "fcmpg", Some(0);
    Dcmpl = 0x97 => "dcmpl", Some(0);
    Dcmpg = 0x98 => "dcmpg", Some(0);
    Ifeq = 0x99 => "ifeq", Some(2);
    Ifne = 0x9A => "ifne", Some(2);
    Iflt = 0x9B => "iflt", Some(2);
    Ifge = 0x9C => "ifge", Some(2);
    Ifgt = 0x9D => "ifgt", Some(2);
    Ifle = 0x9E => "ifle", Some(2);
    IfIcmpeq = 0x9F => "if_icmpeq", Some(2);
    IfIcmpne = 0xA0 => "if_icmpne", Some(2);
    IfIcmplt = 0xA1 => "if_icmplt", Some(2);
    IfIcmpge = 0xA2 => "if_icmpge", Some(2);
    IfIcmpgt = 0xA3 => "if_icmpgt", Some(2);
    IfIcmple = 0xA4 => "if_icmple", Some(2);
    IfAcmpeq = 0xA5 => "if_acmpeq", Some(2);
    IfAcmpne = 0xA6 => "if_acmpne", Some(2);

    // ===== Control =====
    Goto = 0xA7 => "goto", Some(2);
    Jsr = 0xA8 => "jsr", Some(2);
    Ret = 0xA9 => "ret", Some(1);
    Tableswitch = 0xAA => "tableswitch", None;
    Lookupswitch = 0xAB => "lookupswitch", None;
    Ireturn = 0xAC => "ireturn", Some(0);
    Lreturn = 0xAD => "lreturn", Some(0);
    Freturn = 0xAE => "freturn", Some(0);
    Dreturn = 0xAF => "dreturn", Some(0);
    Areturn = 0xB0 => "areturn", Some(0);
    Return = 0xB1 => "return", Some(0);

    // ===== References =====
    Getstatic = 0xB2 => "getstatic", Some(2);
    Putstatic = 0xB3 => "putstatic", Some(2);
    Getfield = 0xB4 => "getfield", Some(2);
    Putfield = 0xB5 => "putfield", Some(2);
    Invokevirtual = 0xB6 => "invokevirtual", Some(2);
    Invokespecial = 0xB7 => "invokespecial", Some(2);
    Invokestatic = 0xB8 => "invokestatic", Some(2);
    Invokeinterface = 0xB9 => "invokeinterface", Some(4);
    Invokedynamic = 0xBA => "invokedynamic", Some(4);
    New = 0xBB => "new", Some(2);
    Newarray = 0xBC => "newarray", Some(1);
    Anewarray = 0xBD => "anewarray", Some(2);
    Arraylength = 0xBE => "arraylength", Some(0);
    Athrow = 0xBF => "athrow", Some(0);
    Checkcast = 0xC0 => "checkcast", Some(2);
    Instanceof = 0xC1 => "instanceof", Some(2);
    Monitorenter = 0xC2 => "monitorenter", Some(0);
    Monitorexit = 0xC3 => "monitorexit", Some(0);

    // ===== Extended =====
    Wide = 0xC4 => "wide", None;
    Multianewarray = 0xC5 => "multianewarray", Some(3);
    Ifnull = 0xC6 => "ifnull", Some(2);
    Ifnonnull = 0xC7 => "ifnonnull", Some(2);
    GotoW = 0xC8 => "goto_w", Some(4);
    JsrW = 0xC9 => "jsr_w", Some(4);
}

impl Opcode {
    /// Convert opcode to its byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this opcode returns from the method
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Self::Ireturn
                | Self::Lreturn
                | Self::Freturn
                | Self::Dreturn
                | Self::Areturn
                | Self::Return
        )
    }

    /// Check if this opcode is a method invocation
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::Invokevirtual
                | Self::Invokespecial
                | Self::Invokestatic
                | Self::Invokeinterface
                | Self::Invokedynamic
        )
    }

    /// Check if this opcode reads or writes a field
    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            Self::Getstatic | Self::Putstatic | Self::Getfield | Self::Putfield
        )
    }

    /// Check if this opcode is a branch with a relative target
    pub fn is_branch(self) -> bool {
        matches!(self as u8, 0x99..=0xA8 | 0xC6..=0xC9)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return()
            || matches!(
                self,
                Self::Athrow
                    | Self::Goto
                    | Self::GotoW
                    | Self::Ret
                    | Self::Tableswitch
                    | Self::Lookupswitch
            )
    }

    /// Check if the first operand is a constant pool index
    pub fn has_pool_operand(self) -> bool {
        matches!(
            self,
            Self::Ldc
                | Self::LdcW
                | Self::Ldc2W
                | Self::New
                | Self::Anewarray
                | Self::Checkcast
                | Self::Instanceof
                | Self::Multianewarray
        ) || self.is_field_access()
            || self.is_invoke()
    }
}

/// One decoded instruction borrowed from a code array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// Byte offset of the opcode
    pub offset: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Operand bytes (for `wide`, the widened opcode byte is included)
    pub operands: &'a [u8],
}

impl<'a> Instruction<'a> {
    /// Total encoded length including the opcode byte
    pub fn len(&self) -> usize {
        1 + self.operands.len()
    }

    /// Always false: every instruction has at least its opcode byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The constant pool index operand, if the opcode takes one
    pub fn pool_index(&self) -> Option<u16> {
        if !self.opcode.has_pool_operand() {
            return None;
        }
        match self.opcode {
            Opcode::Ldc => self.operands.first().map(|&b| b as u16),
            _ => Some(u16::from_be_bytes([self.operands[0], self.operands[1]])),
        }
    }

    /// Absolute branch target for `if*`, `goto`, `jsr` and their wide forms
    pub fn branch_target(&self) -> Option<i64> {
        if !self.opcode.is_branch() {
            return None;
        }
        let relative = match self.operands.len() {
            2 => i16::from_be_bytes([self.operands[0], self.operands[1]]) as i64,
            _ => i32::from_be_bytes([
                self.operands[0],
                self.operands[1],
                self.operands[2],
                self.operands[3],
            ]) as i64,
        };
        Some(self.offset as i64 + relative)
    }
}

/// Iterator over the instructions of a code array
pub struct Instructions<'a> {
    code: &'a [u8],
    position: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    /// Iterate over `code` from offset 0
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            position: 0,
            failed: false,
        }
    }

    fn read_i32_at(&self, at: usize) -> Result<i32, DecodeError> {
        self.code
            .get(at..at + 4)
            .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or(DecodeError::UnexpectedEnd(at))
    }

    /// Operand length of the variable-length instruction at `offset`
    fn variable_operand_len(&self, opcode: Opcode, offset: usize) -> Result<usize, DecodeError> {
        let padding = (4 - (offset + 1) % 4) % 4;
        let base = offset + 1 + padding;
        match opcode {
            Opcode::Tableswitch => {
                let low = self.read_i32_at(base + 4)?;
                let high = self.read_i32_at(base + 8)?;
                if high < low {
                    return Err(DecodeError::InvalidOpcode(opcode.to_u8(), offset));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                Ok(padding + 12 + count * 4)
            }
            Opcode::Lookupswitch => {
                let pairs = self.read_i32_at(base + 4)?;
                if pairs < 0 {
                    return Err(DecodeError::InvalidOpcode(opcode.to_u8(), offset));
                }
                Ok(padding + 8 + pairs as usize * 8)
            }
            Opcode::Wide => {
                let widened = *self
                    .code
                    .get(offset + 1)
                    .ok_or(DecodeError::UnexpectedEnd(offset + 1))?;
                match Opcode::from_u8(widened) {
                    Some(Opcode::Iinc) => Ok(5),
                    Some(
                        Opcode::Iload
                        | Opcode::Lload
                        | Opcode::Fload
                        | Opcode::Dload
                        | Opcode::Aload
                        | Opcode::Istore
                        | Opcode::Lstore
                        | Opcode::Fstore
                        | Opcode::Dstore
                        | Opcode::Astore
                        | Opcode::Ret,
                    ) => Ok(3),
                    _ => Err(DecodeError::InvalidOpcode(widened, offset + 1)),
                }
            }
            _ => Ok(0),
        }
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.code.len() {
            return None;
        }
        let code: &'a [u8] = self.code;
        let offset = self.position;
        let byte = code[offset];
        let result = Opcode::from_u8(byte)
            .ok_or(DecodeError::InvalidOpcode(byte, offset))
            .and_then(|opcode| {
                let len = match opcode.operand_len() {
                    Some(len) => len,
                    None => self.variable_operand_len(opcode, offset)?,
                };
                let end = offset + 1 + len;
                if end > code.len() {
                    return Err(DecodeError::UnexpectedEnd(code.len()));
                }
                Ok(Instruction {
                    offset,
                    opcode,
                    operands: &code[offset + 1..end],
                })
            });
        match &result {
            Ok(instr) => self.position = offset + instr.len(),
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_mapping() {
        for byte in 0x00..=0xC9u8 {
            let opcode = Opcode::from_u8(byte).expect("every byte up to 0xC9 is assigned");
            assert_eq!(opcode.to_u8(), byte);
        }
        for byte in 0xCAu8..=0xFF {
            assert_eq!(Opcode::from_u8(byte), None);
        }
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Opcode::Invokedynamic.mnemonic(), "invokedynamic");
        assert_eq!(Opcode::IfAcmpne.mnemonic(), "if_acmpne");
        assert_eq!(Opcode::Ldc2W.mnemonic(), "ldc2_w");
    }

    #[test]
    fn test_predicates() {
        assert!(Opcode::Return.is_return());
        assert!(Opcode::Areturn.is_terminator());
        assert!(Opcode::Athrow.is_terminator());
        assert!(!Opcode::Invokestatic.is_terminator());
        assert!(Opcode::Invokedynamic.is_invoke());
        assert!(Opcode::Putfield.is_field_access());
        assert!(Opcode::Ifnull.is_branch());
        assert!(!Opcode::Ret.is_branch());
        assert!(Opcode::Multianewarray.has_pool_operand());
        assert!(!Opcode::Bipush.has_pool_operand());
    }

    #[test]
    fn test_iterate_simple_code() {
        // getstatic #2; ldc #3; invokevirtual #4; return
        let code = [0xB2, 0x00, 0x02, 0x12, 0x03, 0xB6, 0x00, 0x04, 0xB1];
        let instrs: Vec<_> = Instructions::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(instrs.len(), 4);
        assert_eq!(instrs[0].pool_index(), Some(2));
        assert_eq!(instrs[1].pool_index(), Some(3));
        assert_eq!(instrs[2].offset, 5);
        assert_eq!(instrs[3].opcode, Opcode::Return);
    }

    #[test]
    fn test_tableswitch_padding() {
        // nop at 0, tableswitch at 1 -> two padding bytes before default
        let mut code = vec![0x00, 0xAA, 0x00, 0x00];
        code.extend_from_slice(&20i32.to_be_bytes()); // default
        code.extend_from_slice(&0i32.to_be_bytes()); // low
        code.extend_from_slice(&1i32.to_be_bytes()); // high
        code.extend_from_slice(&10i32.to_be_bytes());
        code.extend_from_slice(&15i32.to_be_bytes());
        code.push(0xB1);

        let instrs: Vec<_> = Instructions::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(instrs.len(), 3);
        assert_eq!(instrs[1].opcode, Opcode::Tableswitch);
        assert_eq!(instrs[1].len(), 1 + 2 + 12 + 8);
        assert_eq!(instrs[2].offset, code.len() - 1);
    }

    #[test]
    fn test_lookupswitch_and_wide() {
        // lookupswitch at 0 -> three padding bytes
        let mut code = vec![0xAB, 0x00, 0x00, 0x00];
        code.extend_from_slice(&9i32.to_be_bytes()); // default
        code.extend_from_slice(&1i32.to_be_bytes()); // npairs
        code.extend_from_slice(&7i32.to_be_bytes());
        code.extend_from_slice(&12i32.to_be_bytes());
        code.extend_from_slice(&[0xC4, 0x84, 0x01, 0x00, 0xFF, 0xFF]); // wide iinc
        code.extend_from_slice(&[0xC4, 0x15, 0x01, 0x00]); // wide iload

        let instrs: Vec<_> = Instructions::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(instrs.len(), 3);
        assert_eq!(instrs[0].len(), 20);
        assert_eq!(instrs[1].len(), 6);
        assert_eq!(instrs[2].len(), 4);
    }

    #[test]
    fn test_branch_target() {
        // goto -3 at offset 3
        let code = [0x00, 0x00, 0x00, 0xA7, 0xFF, 0xFD];
        let instrs: Vec<_> = Instructions::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(instrs[3].branch_target(), Some(0));
    }

    #[test]
    fn test_truncated_instruction_stops_iteration() {
        let code = [0xB8, 0x00];
        let mut iter = Instructions::new(&code);
        assert!(matches!(iter.next(), Some(Err(DecodeError::UnexpectedEnd(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_invalid_opcode() {
        let code = [0xFE];
        let mut iter = Instructions::new(&code);
        assert_eq!(iter.next(), Some(Err(DecodeError::InvalidOpcode(0xFE, 0))));
    }
}
