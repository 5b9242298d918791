//! Conversion of register, predicate and flag accesses into SSA values.
//!
//! Based on "Simple and Efficient Construction of Static Single Assignment Form"
//! by Braun et al. A block is sealed once all of its predecessors are filled,
//! so reads across loop back edges see the definitions at the end of the latch.
use std::collections::BTreeMap;

use crate::error::CompileError;
use crate::ir::{BlockId, InstId, IrEmitter, ObjectPool, Opcode, Pred, Program, Reg, Type, Value};
use crate::logic_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Variable {
    Reg(Reg),
    Pred(Pred),
    ZFlag,
    SFlag,
    CFlag,
    OFlag,
}

impl Variable {
    fn ty(self) -> Type {
        match self {
            Variable::Reg(_) => Type::U32,
            _ => Type::U1,
        }
    }
}

struct SsaBuilder<'a> {
    pool: &'a mut ObjectPool,
    entry: BlockId,
    current_defs: Vec<BTreeMap<Variable, Value>>,
    incomplete_phis: Vec<Vec<(Variable, InstId)>>,
    sealed: Vec<bool>,
    filled: Vec<bool>,
}

impl<'a> SsaBuilder<'a> {
    fn new(pool: &'a mut ObjectPool, entry: BlockId) -> Self {
        let num_blocks = pool.num_blocks();
        Self {
            pool,
            entry,
            current_defs: vec![BTreeMap::new(); num_blocks],
            incomplete_phis: vec![Vec::new(); num_blocks],
            sealed: vec![false; num_blocks],
            filled: vec![false; num_blocks],
        }
    }

    fn write_variable(&mut self, variable: Variable, block: BlockId, value: Value) {
        self.current_defs[block.index()].insert(variable, value);
    }

    fn read_variable(&mut self, variable: Variable, block: BlockId) -> Result<Value, CompileError> {
        if let Some(value) = self.current_defs[block.index()].get(&variable) {
            return Ok(*value);
        }

        let value = if !self.sealed[block.index()] {
            let phi = self.new_phi(variable, block);
            self.incomplete_phis[block.index()].push((variable, phi));
            Value::Inst(phi)
        } else {
            let preds = self.pool.block(block).imm_predecessors().to_vec();
            match preds.as_slice() {
                [] => self.undef(variable),
                [pred] => self.read_variable(variable, *pred)?,
                _ => {
                    // Break cycles by defining the variable before reading the operands.
                    let phi = self.new_phi(variable, block);
                    self.write_variable(variable, block, Value::Inst(phi));
                    self.add_phi_operands(variable, phi)?
                }
            }
        };
        self.write_variable(variable, block, value);
        Ok(value)
    }

    fn new_phi(&mut self, variable: Variable, block: BlockId) -> InstId {
        let phi = self.pool.create_phi(variable.ty());
        self.pool.insert_existing(block, 0, phi);
        phi
    }

    fn undef(&mut self, variable: Variable) -> Value {
        // Undefined values are placed after any phis at the start of the entry block.
        let index = self
            .pool
            .block(self.entry)
            .instructions()
            .iter()
            .take_while(|i| self.pool.inst(**i).is_phi())
            .count();
        IrEmitter::at(self.pool, self.entry, index).undef(variable.ty())
    }

    fn add_phi_operands(&mut self, variable: Variable, phi: InstId) -> Result<Value, CompileError> {
        let Some(block) = self.pool.inst(phi).block() else {
            return Err(logic_error!("Phi {phi:?} is not in a block"));
        };
        let preds = self.pool.block(block).imm_predecessors().to_vec();
        for pred in preds {
            let value = self.read_variable(variable, pred)?;
            self.pool.add_phi_operand(phi, pred, value)?;
        }
        self.try_remove_trivial_phi(variable, phi)
    }

    fn try_remove_trivial_phi(
        &mut self,
        variable: Variable,
        phi: InstId,
    ) -> Result<Value, CompileError> {
        let mut same = None;
        for arg in self.pool.inst(phi).args() {
            let arg = self.pool.resolve(*arg);
            if Some(arg) == same || arg == Value::Inst(phi) {
                continue;
            }
            if same.is_some() {
                return Ok(Value::Inst(phi));
            }
            same = Some(arg);
        }

        // A phi with no operands other than itself is unreachable or in the entry block.
        let same = match same {
            Some(value) => value,
            None => self.undef(variable),
        };
        self.pool.replace_uses_with(phi, same)?;
        Ok(same)
    }

    fn seal_block(&mut self, block: BlockId) -> Result<(), CompileError> {
        let phis = std::mem::take(&mut self.incomplete_phis[block.index()]);
        for (variable, phi) in phis {
            self.add_phi_operands(variable, phi)?;
        }
        self.sealed[block.index()] = true;
        Ok(())
    }

    fn try_seal(&mut self, block: BlockId) -> Result<(), CompileError> {
        if !self.sealed[block.index()]
            && self
                .pool
                .block(block)
                .imm_predecessors()
                .iter()
                .all(|p| self.filled[p.index()])
        {
            self.seal_block(block)?;
        }
        Ok(())
    }

    fn visit(&mut self, block: BlockId, inst: InstId) -> Result<(), CompileError> {
        let op = self.pool.opcode(inst);
        let (arg0, arg1) = {
            let inst = self.pool.inst(inst);
            (inst.arg(0), inst.arg(1))
        };
        match op {
            Opcode::GetRegister => {
                let reg = reg_arg(arg0)?;
                let value = self.read_variable(Variable::Reg(reg), block)?;
                self.pool.replace_uses_with(inst, value)?;
            }
            Opcode::SetRegister => {
                let (reg, value) = (reg_arg(arg0)?, arg1);
                self.write_variable(Variable::Reg(reg), block, value);
                self.pool.invalidate(inst)?;
            }
            Opcode::GetPred => {
                let pred = pred_arg(arg0)?;
                let value = self.read_variable(Variable::Pred(pred), block)?;
                self.pool.replace_uses_with(inst, value)?;
            }
            Opcode::SetPred => {
                let (pred, value) = (pred_arg(arg0)?, arg1);
                self.write_variable(Variable::Pred(pred), block, value);
                self.pool.invalidate(inst)?;
            }
            Opcode::GetZFlag | Opcode::GetSFlag | Opcode::GetCFlag | Opcode::GetOFlag => {
                let value = self.read_variable(flag_variable(op), block)?;
                self.pool.replace_uses_with(inst, value)?;
            }
            Opcode::SetZFlag | Opcode::SetSFlag | Opcode::SetCFlag | Opcode::SetOFlag => {
                self.write_variable(flag_variable(op), block, arg0);
                self.pool.invalidate(inst)?;
            }
            _ => (),
        }
        Ok(())
    }
}

fn reg_arg(value: Value) -> Result<Reg, CompileError> {
    value
        .reg()
        .ok_or_else(|| logic_error!("Expected a register but found {value:?}"))
}

fn pred_arg(value: Value) -> Result<Pred, CompileError> {
    value
        .pred()
        .ok_or_else(|| logic_error!("Expected a predicate but found {value:?}"))
}

fn flag_variable(op: Opcode) -> Variable {
    match op {
        Opcode::GetZFlag | Opcode::SetZFlag => Variable::ZFlag,
        Opcode::GetSFlag | Opcode::SetSFlag => Variable::SFlag,
        Opcode::GetCFlag | Opcode::SetCFlag => Variable::CFlag,
        _ => Variable::OFlag,
    }
}

/// Replace every register, predicate and flag access with SSA values and phi nodes.
pub fn ssa_rewrite(program: &mut Program) -> Result<(), CompileError> {
    let Some(entry) = program.post_order_blocks.last().copied() else {
        return Ok(());
    };
    let reverse_post_order: Vec<_> = program.post_order_blocks.iter().rev().copied().collect();

    let mut builder = SsaBuilder::new(&mut program.pool, entry);

    // Blocks the entry does not reach never define anything.
    let mut reachable = vec![false; builder.pool.num_blocks()];
    for block in &reverse_post_order {
        reachable[block.index()] = true;
    }
    for (i, reachable) in reachable.iter().enumerate() {
        if !reachable {
            builder.filled[i] = true;
            builder.sealed[i] = true;
        }
    }

    for block in reverse_post_order.iter().copied() {
        builder.try_seal(block)?;

        let insts = builder.pool.block(block).instructions().to_vec();
        for inst in insts {
            builder.visit(block, inst)?;
        }
        builder.filled[block.index()] = true;

        let successors = builder.pool.block(block).imm_successors().to_vec();
        for succ in successors {
            builder.try_seal(succ)?;
        }
    }

    for block in reverse_post_order {
        if !builder.sealed[block.index()] {
            builder.seal_block(block)?;
        }
    }

    Ok(())
}
