use log::trace;

use crate::error::CompileError;
use crate::ir::{Opcode, Program};

fn replacement(op: Opcode) -> Option<Opcode> {
    match op {
        Opcode::FPAbs16 => Some(Opcode::FPAbs32),
        Opcode::FPAdd16 => Some(Opcode::FPAdd32),
        Opcode::FPFma16 => Some(Opcode::FPFma32),
        Opcode::FPMul16 => Some(Opcode::FPMul32),
        Opcode::FPNeg16 => Some(Opcode::FPNeg32),
        Opcode::FPSaturate16 => Some(Opcode::FPSaturate32),
        Opcode::CompositeConstructF16x2 => Some(Opcode::CompositeConstructF32x2),
        Opcode::CompositeExtractF16x2 => Some(Opcode::CompositeExtractF32x2),
        Opcode::PackFloat2x16 => Some(Opcode::PackHalf2x16),
        Opcode::UnpackFloat2x16 => Some(Opcode::UnpackHalf2x16),
        Opcode::ConvertF16F32 | Opcode::ConvertF32F16 => Some(Opcode::Identity),
        _ => None,
    }
}

/// Replace half precision arithmetic with single precision arithmetic
/// for hosts without native 16-bit float support.
///
/// Values are packed and unpacked with half conversions,
/// so results only differ in the precision of intermediate values.
pub fn lower_fp16_to_fp32(program: &mut Program) -> Result<(), CompileError> {
    let insts: Vec<_> = program.instructions().collect();
    for inst in insts {
        let op = program.pool.opcode(inst);
        if let Some(new_op) = replacement(op) {
            trace!("Lower {op:?} to {new_op:?}");
            program.pool.replace_opcode(inst, new_op)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FpControl, IrEmitter, Value};
    use crate::passes::verification;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    #[test]
    fn lower_half_arithmetic() {
        let mut program = Program::new(Stage::Fragment);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];

        let mut ir = IrEmitter::new(&mut program.pool, block);
        let reg = ir.lane_id();
        let halves = ir.emit(Opcode::UnpackFloat2x16, &[reg]);
        let x = ir.emit(Opcode::CompositeExtractF16x2, &[halves, Value::U32(0)]);
        let y = ir.emit(Opcode::CompositeExtractF16x2, &[halves, Value::U32(1)]);
        let sum = ir.emit_flags(Opcode::FPAdd16, &[x, y], FpControl::default().flags());
        let vector = ir.emit(Opcode::CompositeConstructF16x2, &[sum, y]);
        let packed = ir.emit(Opcode::PackFloat2x16, &[vector]);
        ir.reference(packed);

        lower_fp16_to_fp32(&mut program).unwrap();

        let ops: Vec<_> = program
            .instructions()
            .map(|i| program.pool.opcode(i))
            .collect();
        assert_eq!(
            vec![
                Opcode::LaneId,
                Opcode::UnpackHalf2x16,
                Opcode::CompositeExtractF32x2,
                Opcode::CompositeExtractF32x2,
                Opcode::FPAdd32,
                Opcode::CompositeConstructF32x2,
                Opcode::PackHalf2x16,
                Opcode::Reference
            ],
            ops
        );
        assert_eq!(Ok(()), verification(&program));
    }

    #[test]
    fn conversions_become_identities() {
        let mut program = Program::new(Stage::Fragment);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];

        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.get_cbuf_f32(Value::U32(0), Value::U32(0));
        let half = ir.emit(Opcode::ConvertF16F32, &[value]);
        let single = ir.emit(Opcode::ConvertF32F16, &[half]);
        ir.reference(single);

        lower_fp16_to_fp32(&mut program).unwrap();

        assert_eq!(value, program.pool.resolve(single));
    }
}
