/// Bytecode instruction set.
///
/// The byte values are part of the container contract and must not change.
/// Instructions either stand alone, carry one little-endian i32 operand, or
/// (for `Fpush`) one little-endian f32 operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Push = 0x01,
    Pop = 0x02,
    Add = 0x03,
    Sub = 0x04,
    Mul = 0x05,
    Div = 0x06,
    Mod = 0x07,
    Dup = 0x08,
    Swap = 0x09,
    Print = 0x0A,
    PrintStr = 0x0B,
    InputStr = 0x0C,
    Input = 0x0D,

    Jmp = 0x10,
    Jz = 0x11,
    Jnz = 0x12,
    Jl = 0x13,
    Jg = 0x14,
    Jle = 0x15,
    Jge = 0x16,
    Cmp = 0x17,
    Call = 0x18,
    Ret = 0x19,

    Load = 0x20,
    Store = 0x21,
    LoadBp = 0x22,
    StoreBp = 0x23,
    PushBp = 0x24,
    PopBp = 0x25,
    PushStr = 0x26,
    LoadIndirect = 0x27,
    StoreIndirect = 0x28,
    Alloc = 0x29,
    Free = 0x2A,

    // FPU (x87-style circular register stack, 8 slots)
    Fpush = 0x30,
    Fpop = 0x31,
    Fadd = 0x32,
    Fsub = 0x33,
    Fmul = 0x34,
    Fdiv = 0x35,
    Fload = 0x36,
    Fstore = 0x37,
    Fprint = 0x38,
    Fcmp = 0x39,
    Fneg = 0x3A,
    Fdup = 0x3B,
    IntToFp = 0x3C,
    FpToInt = 0x3D,

    Halt = 0xFF,
}

impl Opcode {
    /// Decodes one opcode byte. Unknown bytes are left to the caller to
    /// fault on.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0x01 => Opcode::Push,
            0x02 => Opcode::Pop,
            0x03 => Opcode::Add,
            0x04 => Opcode::Sub,
            0x05 => Opcode::Mul,
            0x06 => Opcode::Div,
            0x07 => Opcode::Mod,
            0x08 => Opcode::Dup,
            0x09 => Opcode::Swap,
            0x0A => Opcode::Print,
            0x0B => Opcode::PrintStr,
            0x0C => Opcode::InputStr,
            0x0D => Opcode::Input,
            0x10 => Opcode::Jmp,
            0x11 => Opcode::Jz,
            0x12 => Opcode::Jnz,
            0x13 => Opcode::Jl,
            0x14 => Opcode::Jg,
            0x15 => Opcode::Jle,
            0x16 => Opcode::Jge,
            0x17 => Opcode::Cmp,
            0x18 => Opcode::Call,
            0x19 => Opcode::Ret,
            0x20 => Opcode::Load,
            0x21 => Opcode::Store,
            0x22 => Opcode::LoadBp,
            0x23 => Opcode::StoreBp,
            0x24 => Opcode::PushBp,
            0x25 => Opcode::PopBp,
            0x26 => Opcode::PushStr,
            0x27 => Opcode::LoadIndirect,
            0x28 => Opcode::StoreIndirect,
            0x29 => Opcode::Alloc,
            0x2A => Opcode::Free,
            0x30 => Opcode::Fpush,
            0x31 => Opcode::Fpop,
            0x32 => Opcode::Fadd,
            0x33 => Opcode::Fsub,
            0x34 => Opcode::Fmul,
            0x35 => Opcode::Fdiv,
            0x36 => Opcode::Fload,
            0x37 => Opcode::Fstore,
            0x38 => Opcode::Fprint,
            0x39 => Opcode::Fcmp,
            0x3A => Opcode::Fneg,
            0x3B => Opcode::Fdup,
            0x3C => Opcode::IntToFp,
            0x3D => Opcode::FpToInt,
            0xFF => Opcode::Halt,
            _ => return None,
        };
        Some(op)
    }

    /// True if the instruction carries one i32 operand.
    pub fn has_i32_operand(self) -> bool {
        matches!(
            self,
            Opcode::Push
                | Opcode::Jmp
                | Opcode::Jz
                | Opcode::Jnz
                | Opcode::Jl
                | Opcode::Jg
                | Opcode::Jle
                | Opcode::Jge
                | Opcode::Call
                | Opcode::Load
                | Opcode::LoadBp
                | Opcode::StoreBp
                | Opcode::PushStr
                | Opcode::Fload
                | Opcode::Fstore
        )
    }

    /// True if the instruction carries one f32 operand.
    pub fn has_f32_operand(self) -> bool {
        self == Opcode::Fpush
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Dup => "DUP",
            Opcode::Swap => "SWAP",
            Opcode::Print => "PRINT",
            Opcode::PrintStr => "PRINT_STR",
            Opcode::InputStr => "INPUT_STR",
            Opcode::Input => "INPUT",
            Opcode::Jmp => "JMP",
            Opcode::Jz => "JZ",
            Opcode::Jnz => "JNZ",
            Opcode::Jl => "JL",
            Opcode::Jg => "JG",
            Opcode::Jle => "JLE",
            Opcode::Jge => "JGE",
            Opcode::Cmp => "CMP",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::LoadBp => "LOAD_BP",
            Opcode::StoreBp => "STORE_BP",
            Opcode::PushBp => "PUSH_BP",
            Opcode::PopBp => "POP_BP",
            Opcode::PushStr => "PUSH_STR",
            Opcode::LoadIndirect => "LOAD_INDIRECT",
            Opcode::StoreIndirect => "STORE_INDIRECT",
            Opcode::Alloc => "ALLOC",
            Opcode::Free => "FREE",
            Opcode::Fpush => "FPUSH",
            Opcode::Fpop => "FPOP",
            Opcode::Fadd => "FADD",
            Opcode::Fsub => "FSUB",
            Opcode::Fmul => "FMUL",
            Opcode::Fdiv => "FDIV",
            Opcode::Fload => "FLOAD",
            Opcode::Fstore => "FSTORE",
            Opcode::Fprint => "FPRINT",
            Opcode::Fcmp => "FCMP",
            Opcode::Fneg => "FNEG",
            Opcode::Fdup => "FDUP",
            Opcode::IntToFp => "INT_TO_FP",
            Opcode::FpToInt => "FP_TO_INT",
            Opcode::Halt => "HALT",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_values_are_fixed() {
        assert_eq!(Opcode::Push as u8, 0x01);
        assert_eq!(Opcode::Input as u8, 0x0D);
        assert_eq!(Opcode::Jmp as u8, 0x10);
        assert_eq!(Opcode::Cmp as u8, 0x17);
        assert_eq!(Opcode::Ret as u8, 0x19);
        assert_eq!(Opcode::Load as u8, 0x20);
        assert_eq!(Opcode::Free as u8, 0x2A);
        assert_eq!(Opcode::Fpush as u8, 0x30);
        assert_eq!(Opcode::FpToInt as u8, 0x3D);
        assert_eq!(Opcode::Halt as u8, 0xFF);
    }

    #[test]
    fn test_from_byte_round_trips_every_opcode() {
        let all = [
            Opcode::Push,
            Opcode::Pop,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
            Opcode::Mod,
            Opcode::Dup,
            Opcode::Swap,
            Opcode::Print,
            Opcode::PrintStr,
            Opcode::InputStr,
            Opcode::Input,
            Opcode::Jmp,
            Opcode::Jz,
            Opcode::Jnz,
            Opcode::Jl,
            Opcode::Jg,
            Opcode::Jle,
            Opcode::Jge,
            Opcode::Cmp,
            Opcode::Call,
            Opcode::Ret,
            Opcode::Load,
            Opcode::Store,
            Opcode::LoadBp,
            Opcode::StoreBp,
            Opcode::PushBp,
            Opcode::PopBp,
            Opcode::PushStr,
            Opcode::LoadIndirect,
            Opcode::StoreIndirect,
            Opcode::Alloc,
            Opcode::Free,
            Opcode::Fpush,
            Opcode::Fpop,
            Opcode::Fadd,
            Opcode::Fsub,
            Opcode::Fmul,
            Opcode::Fdiv,
            Opcode::Fload,
            Opcode::Fstore,
            Opcode::Fprint,
            Opcode::Fcmp,
            Opcode::Fneg,
            Opcode::Fdup,
            Opcode::IntToFp,
            Opcode::FpToInt,
            Opcode::Halt,
        ];
        for op in all {
            assert_eq!(Opcode::from_byte(op as u8), Some(op), "{}", op);
        }
    }

    #[test]
    fn test_unknown_bytes_decode_to_none() {
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0x0E), None);
        assert_eq!(Opcode::from_byte(0x2B), None);
        assert_eq!(Opcode::from_byte(0xFE), None);
    }

    #[test]
    fn test_operand_widths() {
        assert!(Opcode::Push.has_i32_operand());
        assert!(Opcode::Call.has_i32_operand());
        assert!(Opcode::Fstore.has_i32_operand());
        assert!(!Opcode::Add.has_i32_operand());
        assert!(!Opcode::Fpush.has_i32_operand());
        assert!(Opcode::Fpush.has_f32_operand());
        assert!(!Opcode::Halt.has_f32_operand());
    }
}
