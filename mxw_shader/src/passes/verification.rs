//! Consistency checks for the IR after the optimization passes.
use crate::error::CompileError;
use crate::ir::{are_types_compatible, Opcode, Program, Value};
use crate::logic_error;

fn validate_types(program: &Program) -> Result<(), CompileError> {
    let pool = &program.pool;
    for inst in program.instructions() {
        let i = pool.inst(inst);
        let op = i.opcode();
        if op == Opcode::Phi {
            let ty = i.result_type();
            for (_, value) in i.phi_operands() {
                let value_ty = pool.value_type(value);
                if !are_types_compatible(value_ty, ty) {
                    return Err(logic_error!(
                        "Phi {inst:?} of type {} has an operand of type {}",
                        ty.name(),
                        value_ty.name()
                    ));
                }
            }
            continue;
        }
        for (index, (arg, expected)) in i.args().iter().zip(op.arg_types()).enumerate() {
            let ty = pool.value_type(*arg);
            if !arg.is_void() && !are_types_compatible(ty, *expected) {
                return Err(logic_error!(
                    "Argument {index} of {op:?} has type {} but expected {}",
                    ty.name(),
                    expected.name()
                ));
            }
        }
    }
    Ok(())
}

fn validate_uses(program: &Program) -> Result<(), CompileError> {
    let pool = &program.pool;
    let mut uses = vec![0u32; pool.num_insts()];
    for inst in pool.inst_ids() {
        let i = pool.inst(inst);
        if i.opcode() == Opcode::Void {
            continue;
        }
        for arg in i.args() {
            if let Value::Inst(def) = arg {
                if pool.opcode(*def) == Opcode::Void {
                    return Err(logic_error!("{inst:?} uses the invalidated {def:?}"));
                }
                uses[def.index()] += 1;
            }
        }
    }

    for inst in pool.inst_ids() {
        let expected = uses[inst.index()];
        let actual = pool.inst(inst).use_count();
        if expected != actual {
            return Err(logic_error!(
                "{inst:?} has {actual} recorded uses but {expected} users"
            ));
        }
    }
    Ok(())
}

fn validate_phis(program: &Program) -> Result<(), CompileError> {
    let pool = &program.pool;
    for block in &program.blocks {
        let b = pool.block(*block);
        let mut in_header = true;
        for inst in b.instructions() {
            let i = pool.inst(*inst);
            if !i.is_phi() {
                in_header = false;
                continue;
            }
            if !in_header {
                return Err(logic_error!("Phi {inst:?} after a non phi instruction"));
            }
            for (pred, _) in i.phi_operands() {
                if !b.imm_predecessors().contains(&pred) {
                    return Err(logic_error!(
                        "Phi {inst:?} has an operand from {pred:?} which is not a predecessor"
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Check argument types, use counts and phi placement.
/// Errors indicate a bug in the translator or an earlier pass.
pub fn verification(program: &Program) -> Result<(), CompileError> {
    validate_types(program)?;
    validate_uses(program)?;
    validate_phis(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrEmitter, Type};
    use mxw_lib::Stage;

    fn single_block_program() -> Program {
        let mut program = Program::new(Stage::Compute);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];
        program
    }

    #[test]
    fn valid_program() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let f = ir.convert_i_to_f(lane, 32, false);
        let sum = ir.fp_add(f, Value::F32(1.0), Default::default());
        ir.reference(sum);

        assert_eq!(Ok(()), verification(&program));
    }

    #[test]
    fn mismatched_argument_type() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let sum = ir.fp_add(lane, Value::F32(1.0), Default::default());
        ir.reference(sum);

        assert!(matches!(
            verification(&program),
            Err(CompileError::Logic(_))
        ));
    }

    #[test]
    fn phi_after_instruction() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        IrEmitter::new(&mut program.pool, block).lane_id();
        let phi = program.pool.create_phi(Type::U32);
        program.pool.insert_existing(block, 1, phi);

        assert!(matches!(
            verification(&program),
            Err(CompileError::Logic(_))
        ));
    }
}
