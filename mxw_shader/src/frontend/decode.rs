//! Maxwell instruction decoding from the top 16 bits of each instruction word.
use std::sync::OnceLock;

use crate::error::CompileError;

/// The source of the second operand for instructions with register, constant buffer
/// and immediate variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Reg,
    Cbuf,
    Imm,
}

/// The operand sources for three operand float instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmaSrc {
    /// B and C are registers.
    Reg,
    /// B is a register and C is a constant buffer value.
    Rc,
    /// B is a constant buffer value and C is a register.
    Cr,
    /// B is an immediate and C is a register.
    Imm,
}

/// A decoded Maxwell opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxwellOp {
    Ald,
    Ast,
    Bar,
    Bra,
    Brk,
    Exit,
    F2i(Src),
    Fadd(Src),
    Fadd32i,
    Ffma(FfmaSrc),
    Fmnmx(Src),
    Fmul(Src),
    Fmul32i,
    Fsetp(Src),
    I2f(Src),
    Iadd(Src),
    Iadd3(Src),
    Iadd32i,
    Imnmx(Src),
    Ipa,
    Iscadd(Src),
    Isetp(Src),
    Kil,
    Ldc,
    Ldg,
    Ldl,
    Lds,
    Lop(Src),
    Lop32i,
    Membar,
    Mov(Src),
    Mov32i,
    Mufu,
    Nop,
    Pbk,
    Psetp,
    S2r,
    Sel(Src),
    Shfl,
    Shl(Src),
    Shr(Src),
    Ssy,
    Stg,
    Stl,
    Sts,
    Sust,
    Sync,
    Tex,
    TexB,
    Tld,
    Vote,
}

impl MaxwellOp {
    /// Returns `true` for instructions that end a block.
    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            MaxwellOp::Bra | MaxwellOp::Brk | MaxwellOp::Exit | MaxwellOp::Sync
        )
    }
}

// Patterns for the top 16 bits of the instruction with '-' for bits that are not fixed.
const PATTERNS: &[(&str, MaxwellOp)] = &[
    ("1110 1111 1101 1---", MaxwellOp::Ald),
    ("1110 1111 1111 0---", MaxwellOp::Ast),
    ("1111 0000 1010 1---", MaxwellOp::Bar),
    ("1110 0010 0100 ----", MaxwellOp::Bra),
    ("1110 0011 0100 ----", MaxwellOp::Brk),
    ("1110 0011 0000 ----", MaxwellOp::Exit),
    ("0101 1100 1011 0---", MaxwellOp::F2i(Src::Reg)),
    ("0100 1100 1011 0---", MaxwellOp::F2i(Src::Cbuf)),
    ("0011 100- 1011 0---", MaxwellOp::F2i(Src::Imm)),
    ("0101 1100 0101 1---", MaxwellOp::Fadd(Src::Reg)),
    ("0100 1100 0101 1---", MaxwellOp::Fadd(Src::Cbuf)),
    ("0011 100- 0101 1---", MaxwellOp::Fadd(Src::Imm)),
    ("0000 10-- ---- ----", MaxwellOp::Fadd32i),
    ("0101 1001 1--- ----", MaxwellOp::Ffma(FfmaSrc::Reg)),
    ("0101 0001 1--- ----", MaxwellOp::Ffma(FfmaSrc::Rc)),
    ("0100 1001 1--- ----", MaxwellOp::Ffma(FfmaSrc::Cr)),
    ("0011 001- 1--- ----", MaxwellOp::Ffma(FfmaSrc::Imm)),
    ("0101 1100 0110 0---", MaxwellOp::Fmnmx(Src::Reg)),
    ("0100 1100 0110 0---", MaxwellOp::Fmnmx(Src::Cbuf)),
    ("0011 100- 0110 0---", MaxwellOp::Fmnmx(Src::Imm)),
    ("0101 1100 0110 1---", MaxwellOp::Fmul(Src::Reg)),
    ("0100 1100 0110 1---", MaxwellOp::Fmul(Src::Cbuf)),
    ("0011 100- 0110 1---", MaxwellOp::Fmul(Src::Imm)),
    ("0001 1110 ---- ----", MaxwellOp::Fmul32i),
    ("0101 1011 1011 ----", MaxwellOp::Fsetp(Src::Reg)),
    ("0100 1011 1011 ----", MaxwellOp::Fsetp(Src::Cbuf)),
    ("0011 011- 1011 ----", MaxwellOp::Fsetp(Src::Imm)),
    ("0101 1100 1011 1---", MaxwellOp::I2f(Src::Reg)),
    ("0100 1100 1011 1---", MaxwellOp::I2f(Src::Cbuf)),
    ("0011 100- 1011 1---", MaxwellOp::I2f(Src::Imm)),
    ("0101 1100 0001 0---", MaxwellOp::Iadd(Src::Reg)),
    ("0100 1100 0001 0---", MaxwellOp::Iadd(Src::Cbuf)),
    ("0011 100- 0001 0---", MaxwellOp::Iadd(Src::Imm)),
    ("0101 1100 1100 ----", MaxwellOp::Iadd3(Src::Reg)),
    ("0100 1100 1100 ----", MaxwellOp::Iadd3(Src::Cbuf)),
    ("0011 100- 1100 ----", MaxwellOp::Iadd3(Src::Imm)),
    ("0001 110- ---- ----", MaxwellOp::Iadd32i),
    ("0101 1100 0010 0---", MaxwellOp::Imnmx(Src::Reg)),
    ("0100 1100 0010 0---", MaxwellOp::Imnmx(Src::Cbuf)),
    ("0011 100- 0010 0---", MaxwellOp::Imnmx(Src::Imm)),
    ("1110 0000 ---- ----", MaxwellOp::Ipa),
    ("0101 1100 0001 1---", MaxwellOp::Iscadd(Src::Reg)),
    ("0100 1100 0001 1---", MaxwellOp::Iscadd(Src::Cbuf)),
    ("0011 100- 0001 1---", MaxwellOp::Iscadd(Src::Imm)),
    ("0101 1011 0110 ----", MaxwellOp::Isetp(Src::Reg)),
    ("0100 1011 0110 ----", MaxwellOp::Isetp(Src::Cbuf)),
    ("0011 011- 0110 ----", MaxwellOp::Isetp(Src::Imm)),
    ("1110 0011 0011 ----", MaxwellOp::Kil),
    ("1110 1111 1001 0---", MaxwellOp::Ldc),
    ("1110 1110 1101 0---", MaxwellOp::Ldg),
    ("1110 1111 0100 0---", MaxwellOp::Ldl),
    ("1110 1111 0100 1---", MaxwellOp::Lds),
    ("0101 1100 0100 0---", MaxwellOp::Lop(Src::Reg)),
    ("0100 1100 0100 0---", MaxwellOp::Lop(Src::Cbuf)),
    ("0011 100- 0100 0---", MaxwellOp::Lop(Src::Imm)),
    ("0000 01-- ---- ----", MaxwellOp::Lop32i),
    ("1110 1111 1001 1---", MaxwellOp::Membar),
    ("0101 1100 1001 1---", MaxwellOp::Mov(Src::Reg)),
    ("0100 1100 1001 1---", MaxwellOp::Mov(Src::Cbuf)),
    ("0011 100- 1001 1---", MaxwellOp::Mov(Src::Imm)),
    ("0000 0001 0000 ----", MaxwellOp::Mov32i),
    ("0101 0000 1000 0---", MaxwellOp::Mufu),
    ("0101 0000 1011 0---", MaxwellOp::Nop),
    ("1110 0010 1010 ----", MaxwellOp::Pbk),
    ("0101 0000 1001 0---", MaxwellOp::Psetp),
    ("1111 0000 1100 1---", MaxwellOp::S2r),
    ("0101 1100 1010 0---", MaxwellOp::Sel(Src::Reg)),
    ("0100 1100 1010 0---", MaxwellOp::Sel(Src::Cbuf)),
    ("0011 100- 1010 0---", MaxwellOp::Sel(Src::Imm)),
    ("1110 1111 0001 0---", MaxwellOp::Shfl),
    ("0101 1100 0100 1---", MaxwellOp::Shl(Src::Reg)),
    ("0100 1100 0100 1---", MaxwellOp::Shl(Src::Cbuf)),
    ("0011 100- 0100 1---", MaxwellOp::Shl(Src::Imm)),
    ("0101 1100 0010 1---", MaxwellOp::Shr(Src::Reg)),
    ("0100 1100 0010 1---", MaxwellOp::Shr(Src::Cbuf)),
    ("0011 100- 0010 1---", MaxwellOp::Shr(Src::Imm)),
    ("1110 0010 1001 ----", MaxwellOp::Ssy),
    ("1110 1110 1101 1---", MaxwellOp::Stg),
    ("1110 1111 0101 0---", MaxwellOp::Stl),
    ("1110 1111 0101 1---", MaxwellOp::Sts),
    ("1110 1011 001- ----", MaxwellOp::Sust),
    ("1111 0000 1111 1---", MaxwellOp::Sync),
    ("1100 0--- ---- ----", MaxwellOp::Tex),
    ("1101 1110 10-- ----", MaxwellOp::TexB),
    ("1101 1100 ---- ----", MaxwellOp::Tld),
    ("0101 0000 1101 1---", MaxwellOp::Vote),
];

struct Entry {
    mask: u16,
    value: u16,
    op: MaxwellOp,
}

fn parse_pattern(pattern: &str) -> (u16, u16) {
    let mut mask = 0u16;
    let mut value = 0u16;
    for c in pattern.chars().filter(|c| !c.is_whitespace()) {
        mask <<= 1;
        value <<= 1;
        match c {
            '0' => mask |= 1,
            '1' => {
                mask |= 1;
                value |= 1;
            }
            _ => (),
        }
    }
    (mask, value)
}

fn decode_table() -> &'static [Entry] {
    static TABLE: OnceLock<Vec<Entry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: Vec<_> = PATTERNS
            .iter()
            .map(|(pattern, op)| {
                let (mask, value) = parse_pattern(pattern);
                Entry {
                    mask,
                    value,
                    op: *op,
                }
            })
            .collect();
        // Check more specific patterns first.
        table.sort_by_key(|e| std::cmp::Reverse(e.mask.count_ones()));
        table
    })
}

/// Decode the instruction `word` at `address`.
pub fn decode(word: u64, address: u32) -> Result<MaxwellOp, CompileError> {
    let top = (word >> 48) as u16;
    decode_table()
        .iter()
        .find(|e| top & e.mask == e.value)
        .map(|e| e.op)
        .ok_or(CompileError::UnknownInstruction { address, word })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_instructions() {
        assert_eq!(Ok(MaxwellOp::Exit), decode(0xe30000000007000f, 0));
        assert_eq!(Ok(MaxwellOp::Bra), decode(0xe2400fffff87000f, 0));
        assert_eq!(Ok(MaxwellOp::Mov32i), decode(0x0100000000170000, 0));
        assert_eq!(Ok(MaxwellOp::Fadd(Src::Reg)), decode(0x5c58000000270100, 0));
        assert_eq!(Ok(MaxwellOp::Fadd(Src::Imm)), decode(0x3858000000070100, 0));
        assert_eq!(Ok(MaxwellOp::Fadd(Src::Imm)), decode(0x3958000000070100, 0));
        assert_eq!(Ok(MaxwellOp::Ldg), decode(0xeed4200000070204, 0));
        assert_eq!(Ok(MaxwellOp::TexB), decode(0xdeb8000000070000, 0));
    }

    #[test]
    fn decode_unknown() {
        assert_eq!(
            Err(CompileError::UnknownInstruction {
                address: 0x18,
                word: 0xffffffffffffffff
            }),
            decode(0xffffffffffffffff, 0x18)
        );
    }

    #[test]
    fn patterns_are_unambiguous() {
        // No two patterns with the same number of fixed bits can match the same input.
        let table = decode_table();
        for (i, a) in table.iter().enumerate() {
            for b in &table[i + 1..] {
                if a.mask.count_ones() == b.mask.count_ones() {
                    let common = a.mask & b.mask;
                    assert!(
                        a.value & common != b.value & common,
                        "{:?} {:?}",
                        a.op,
                        b.op
                    );
                }
            }
        }
    }
}
