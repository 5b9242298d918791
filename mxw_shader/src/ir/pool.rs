use super::arena::Arena;
use super::block::Block;
use super::inst::Inst;
use super::opcodes::Opcode;
use super::types::Type;
use super::value::Value;
use super::{BlockId, InstId};
use crate::error::CompileError;
use crate::{invalid_argument, logic_error};

/// Owns every instruction and block for a single program.
///
/// Instructions are never freed individually.
/// Retired instructions become [Opcode::Void] and stay in the pool until the pool is dropped.
/// All argument changes go through the pool so that use counts and
/// pseudo instruction back references always stay consistent.
#[derive(Debug, Clone, Default)]
pub struct ObjectPool {
    pub(crate) insts: Arena<Inst>,
    pub(crate) blocks: Arena<Block>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id]
    }

    /// Mutable access for the fields that do not affect use counts
    /// like the flags or backend definitions.
    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id]
    }

    pub fn opcode(&self, id: InstId) -> Opcode {
        self.insts[id].op
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> {
        self.insts.handles()
    }

    pub fn new_block(&mut self) -> BlockId {
        self.blocks.append(Block::default())
    }

    /// Add a control flow edge from `from` to `to`.
    pub fn add_branch(&mut self, from: BlockId, to: BlockId) -> Result<(), CompileError> {
        if self.blocks[from].imm_successors.contains(&to) {
            return Err(logic_error!("Successor {to:?} already inserted in {from:?}"));
        }
        if self.blocks[to].imm_predecessors.contains(&from) {
            return Err(logic_error!("Predecessor {from:?} already inserted in {to:?}"));
        }
        self.blocks[from].imm_successors.push(to);
        self.blocks[to].imm_predecessors.push(from);
        Ok(())
    }

    /// Remove the edge from `from` to `to` if present.
    pub fn remove_branch(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].imm_successors.retain(|b| *b != to);
        self.blocks[to].imm_predecessors.retain(|b| *b != from);
    }

    /// Create an instruction that is not yet part of any block.
    pub fn create_inst(
        &mut self,
        op: Opcode,
        args: &[Value],
        flags: u32,
    ) -> Result<InstId, CompileError> {
        if op == Opcode::Phi {
            return Err(logic_error!("Phi nodes must be created with create_phi"));
        }
        if args.len() != op.num_args() {
            return Err(invalid_argument!(
                "{op:?} expects {} arguments but got {}",
                op.num_args(),
                args.len()
            ));
        }
        let id = self.insts.append(Inst::new(op, flags));
        for arg in args {
            self.use_value(id, *arg)?;
            self.insts[id].args.push(*arg);
        }
        Ok(id)
    }

    /// Create an instruction that cannot fail validation.
    /// Pseudo instructions must use [ObjectPool::create_inst] instead.
    pub(crate) fn emit_inst(&mut self, op: Opcode, args: &[Value], flags: u32) -> InstId {
        debug_assert!(!op.is_pseudo_instruction() && op != Opcode::Phi);
        debug_assert_eq!(op.num_args(), args.len(), "{op:?}");
        let id = self.insts.append(Inst::new(op, flags));
        for arg in args {
            self.add_use(*arg);
        }
        self.insts[id].args.extend_from_slice(args);
        id
    }

    /// Create a phi node with no operands.
    pub fn create_phi(&mut self, ty: Type) -> InstId {
        self.insts.append(Inst::new(Opcode::Phi, ty.bits()))
    }

    pub fn append_inst(
        &mut self,
        block: BlockId,
        op: Opcode,
        args: &[Value],
        flags: u32,
    ) -> Result<InstId, CompileError> {
        let id = self.create_inst(op, args, flags)?;
        self.insert_existing(block, self.blocks[block].insts.len(), id);
        Ok(id)
    }

    /// Create and insert an instruction at `index` in `block`.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        op: Opcode,
        args: &[Value],
        flags: u32,
    ) -> Result<InstId, CompileError> {
        let id = self.create_inst(op, args, flags)?;
        self.insert_existing(block, index, id);
        Ok(id)
    }

    /// Insert an instruction created by the pool into `block` at `index`.
    pub fn insert_existing(&mut self, block: BlockId, index: usize, inst: InstId) {
        let index = index.min(self.blocks[block].insts.len());
        self.blocks[block].insts.insert(index, inst);
        self.insts[inst].block = Some(block);
    }

    /// The index of `inst` in its parent block.
    pub fn position(&self, inst: InstId) -> Option<usize> {
        let block = self.insts[inst].block?;
        self.blocks[block].insts.iter().position(|i| *i == inst)
    }

    /// Remove `inst` from its parent block without changing its arguments.
    pub fn remove_inst_from_block(&mut self, inst: InstId) {
        if let Some(block) = self.insts[inst].block.take() {
            self.blocks[block].insts.retain(|i| *i != inst);
        }
    }

    /// Set the argument at `index` while updating use counts.
    pub fn set_arg(&mut self, inst: InstId, index: usize, value: Value) -> Result<(), CompileError> {
        let len = self.insts[inst].args.len();
        if index >= len {
            return Err(invalid_argument!(
                "Out of bounds argument index {index} in opcode {:?}",
                self.insts[inst].op
            ));
        }
        let old = self.insts[inst].args[index];
        self.undo_use(inst, old)?;
        self.use_value(inst, value)?;
        self.insts[inst].args[index] = value;
        Ok(())
    }

    /// Add an incoming `value` from predecessor `block` to a phi node.
    pub fn add_phi_operand(
        &mut self,
        phi: InstId,
        block: BlockId,
        value: Value,
    ) -> Result<(), CompileError> {
        if !self.insts[phi].is_phi() {
            return Err(logic_error!(
                "{:?} is not a phi instruction",
                self.insts[phi].op
            ));
        }
        self.use_value(phi, value)?;
        let phi = &mut self.insts[phi];
        phi.args.push(value);
        phi.phi_blocks.push(block);
        Ok(())
    }

    /// Remove every argument while undoing the uses.
    pub fn clear_args(&mut self, inst: InstId) -> Result<(), CompileError> {
        let args = std::mem::take(&mut self.insts[inst].args);
        self.insts[inst].phi_blocks.clear();
        for arg in args {
            self.undo_use(inst, arg)?;
        }
        Ok(())
    }

    /// Retire the instruction by clearing its arguments and replacing its opcode with [Opcode::Void].
    pub fn invalidate(&mut self, inst: InstId) -> Result<(), CompileError> {
        self.clear_args(inst)?;
        self.insts[inst].op = Opcode::Void;
        self.insts[inst].flags = 0;
        Ok(())
    }

    /// Turn `inst` into an [Opcode::Identity] of `value`.
    /// Existing users see `value` after resolving the identity.
    pub fn replace_uses_with(&mut self, inst: InstId, value: Value) -> Result<(), CompileError> {
        self.invalidate(inst)?;
        self.insts[inst].op = Opcode::Identity;
        self.use_value(inst, value)?;
        self.insts[inst].args.push(value);
        Ok(())
    }

    /// Change the opcode while keeping the arguments.
    pub fn replace_opcode(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        if op == Opcode::Phi {
            return Err(logic_error!("Cannot transition into Phi"));
        }
        if self.insts[inst].op == Opcode::Phi {
            return Err(logic_error!("Cannot transition out of Phi"));
        }
        self.insts[inst].op = op;
        Ok(())
    }

    /// Follow identity instructions to the underlying value.
    pub fn resolve(&self, value: Value) -> Value {
        let mut value = value;
        while let Value::Inst(id) = value {
            let inst = &self.insts[id];
            if inst.op != Opcode::Identity {
                break;
            }
            value = inst.arg(0);
        }
        value
    }

    /// The defining instruction after resolving identities.
    pub fn resolve_inst(&self, value: Value) -> Option<InstId> {
        self.resolve(value).inst()
    }

    /// The opcode of the defining instruction after resolving identities.
    pub fn resolve_opcode(&self, value: Value) -> Option<Opcode> {
        self.resolve_inst(value).map(|i| self.insts[i].op)
    }

    pub fn value_type(&self, value: Value) -> Type {
        match self.resolve(value) {
            Value::Inst(id) => self.insts[id].result_type(),
            v => v.immediate_type(),
        }
    }

    /// Append every block and instruction from `other`.
    /// Returns the instruction and block offsets for remapping handles from `other`.
    pub(crate) fn absorb(&mut self, other: ObjectPool) -> (u32, u32) {
        let inst_offset = self.insts.len() as u32;
        let block_offset = self.blocks.len() as u32;

        let remap = |v: Value| match v {
            Value::Inst(i) => Value::Inst(i.offset(inst_offset)),
            Value::Label(b) => Value::Label(b.offset(block_offset)),
            v => v,
        };

        for mut inst in other.insts.into_items() {
            for arg in &mut inst.args {
                *arg = remap(*arg);
            }
            for block in &mut inst.phi_blocks {
                *block = block.offset(block_offset);
            }
            let a = &mut inst.associated;
            for slot in [
                &mut a.zero,
                &mut a.sign,
                &mut a.carry,
                &mut a.overflow,
                &mut a.sparse,
                &mut a.in_bounds,
            ] {
                *slot = slot.map(|i| i.offset(inst_offset));
            }
            inst.block = inst.block.map(|b| b.offset(block_offset));
            self.insts.append(inst);
        }

        for mut block in other.blocks.into_items() {
            for inst in &mut block.insts {
                *inst = inst.offset(inst_offset);
            }
            for b in block
                .imm_predecessors
                .iter_mut()
                .chain(block.imm_successors.iter_mut())
            {
                *b = b.offset(block_offset);
            }
            self.blocks.append(block);
        }

        (inst_offset, block_offset)
    }

    fn use_value(&mut self, user: InstId, value: Value) -> Result<(), CompileError> {
        if let Value::Inst(def) = value {
            let user_op = self.insts[user].op;
            if user_op.is_pseudo_instruction() {
                let producer = self.resolve_inst(value).unwrap_or(def);
                if let Some(slot) = self.insts[producer].associated.slot_mut(user_op) {
                    if slot.is_some() {
                        return Err(logic_error!("Only one of each type of pseudo-op allowed"));
                    }
                    *slot = Some(user);
                }
            }
            self.insts[def].use_count += 1;
        }
        Ok(())
    }

    fn add_use(&mut self, value: Value) {
        if let Value::Inst(def) = value {
            self.insts[def].use_count += 1;
        }
    }

    fn undo_use(&mut self, user: InstId, value: Value) -> Result<(), CompileError> {
        if let Value::Inst(def) = value {
            let user_op = self.insts[user].op;
            if user_op.is_pseudo_instruction() {
                let producer = self.resolve_inst(value).unwrap_or(def);
                let registered = self.insts[producer].associated.get(user_op);
                match registered {
                    Some(id) if self.insts[id].op == user_op => {
                        if let Some(slot) = self.insts[producer].associated.slot_mut(user_op) {
                            *slot = None;
                        }
                    }
                    _ => return Err(logic_error!("Undoing use of invalid pseudo-op")),
                }
            }
            let inst = &mut self.insts[def];
            inst.use_count = inst
                .use_count
                .checked_sub(1)
                .ok_or_else(|| logic_error!("Use count underflow in {:?}", inst.op))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn count_uses(pool: &ObjectPool, def: InstId) -> u32 {
        pool.inst_ids()
            .filter(|i| pool.inst(*i).opcode() != Opcode::Void)
            .map(|i| {
                pool.inst(i)
                    .args()
                    .iter()
                    .filter(|a| **a == Value::Inst(def))
                    .count() as u32
            })
            .sum()
    }

    #[test]
    fn set_arg_updates_use_counts() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let a = pool
            .append_inst(block, Opcode::UndefU32, &[], 0)
            .unwrap();
        let b = pool
            .append_inst(block, Opcode::UndefU32, &[], 0)
            .unwrap();
        let add = pool
            .append_inst(block, Opcode::IAdd32, &[a.into(), a.into()], 0)
            .unwrap();
        assert_eq!(2, pool.inst(a).use_count());

        pool.set_arg(add, 1, b.into()).unwrap();
        assert_eq!(1, pool.inst(a).use_count());
        assert_eq!(1, pool.inst(b).use_count());
        assert_eq!(count_uses(&pool, a), pool.inst(a).use_count());
        assert_eq!(count_uses(&pool, b), pool.inst(b).use_count());

        pool.set_arg(add, 0, Value::U32(1)).unwrap();
        assert_eq!(0, pool.inst(a).use_count());
        assert_eq!(count_uses(&pool, a), pool.inst(a).use_count());
    }

    #[test]
    fn set_arg_out_of_bounds() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let neg = pool
            .append_inst(block, Opcode::FPNeg32, &[Value::F32(1.0)], 0)
            .unwrap();
        assert!(matches!(
            pool.set_arg(neg, 1, Value::F32(2.0)),
            Err(CompileError::InvalidArgument(_))
        ));
    }

    #[test]
    fn invalidate_and_replace_uses() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let a = pool.append_inst(block, Opcode::UndefU32, &[], 0).unwrap();
        let neg = pool
            .append_inst(block, Opcode::INeg32, &[a.into()], 0)
            .unwrap();
        let not = pool
            .append_inst(block, Opcode::BitwiseNot32, &[neg.into()], 0)
            .unwrap();

        pool.replace_uses_with(neg, Value::U32(5)).unwrap();
        assert_eq!(Opcode::Identity, pool.opcode(neg));
        assert_eq!(0, pool.inst(a).use_count());
        assert_eq!(1, pool.inst(neg).use_count());
        assert_eq!(Value::U32(5), pool.resolve(pool.inst(not).arg(0)));

        pool.invalidate(not).unwrap();
        assert_eq!(Opcode::Void, pool.opcode(not));
        assert_eq!(0, pool.inst(neg).use_count());
        assert_eq!(count_uses(&pool, neg), pool.inst(neg).use_count());
    }

    #[test]
    fn phi_operands_count_uses() {
        let mut pool = ObjectPool::new();
        let a = pool.new_block();
        let b = pool.new_block();
        let c = pool.new_block();
        pool.add_branch(a, c).unwrap();
        pool.add_branch(b, c).unwrap();

        let x = pool.append_inst(a, Opcode::UndefU32, &[], 0).unwrap();
        let phi = pool.create_phi(Type::U32);
        pool.insert_existing(c, 0, phi);
        pool.add_phi_operand(phi, a, x.into()).unwrap();
        pool.add_phi_operand(phi, b, x.into()).unwrap();
        assert_eq!(2, pool.inst(x).use_count());
        assert_eq!(Type::U32, pool.value_type(phi.into()));
        assert_eq!(Some(b), pool.inst(phi).phi_block(1));

        assert!(pool.add_phi_operand(x, a, Value::U32(0)).is_err());
        assert!(pool.replace_opcode(phi, Opcode::Identity).is_err());
    }

    #[test]
    fn duplicate_branch() {
        let mut pool = ObjectPool::new();
        let a = pool.new_block();
        let b = pool.new_block();
        pool.add_branch(a, b).unwrap();
        assert!(matches!(
            pool.add_branch(a, b),
            Err(CompileError::Logic(_))
        ));
    }

    #[test]
    fn pseudo_instructions_are_unique() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let add = pool
            .append_inst(block, Opcode::IAdd32, &[Value::U32(1), Value::U32(2)], 0)
            .unwrap();
        let carry = pool
            .append_inst(block, Opcode::GetCarryFromOp, &[add.into()], 0)
            .unwrap();
        assert_eq!(Some(carry), pool.inst(add).associated().carry);

        assert_eq!(
            Err(CompileError::Logic(
                "Only one of each type of pseudo-op allowed".to_string()
            )),
            pool.append_inst(block, Opcode::GetCarryFromOp, &[add.into()], 0)
        );

        // Other kinds of pseudo instructions are still allowed.
        let zero = pool
            .append_inst(block, Opcode::GetZeroFromOp, &[add.into()], 0)
            .unwrap();
        assert_eq!(Some(zero), pool.inst(add).associated().zero);

        // Undoing the first use allows registering another.
        pool.invalidate(carry).unwrap();
        assert_eq!(None, pool.inst(add).associated().carry);
        pool.append_inst(block, Opcode::GetCarryFromOp, &[add.into()], 0)
            .unwrap();
    }

    #[test]
    fn undo_pseudo_instruction_wrong_opcode() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let add = pool
            .append_inst(block, Opcode::IAdd32, &[Value::U32(1), Value::U32(2)], 0)
            .unwrap();
        let carry = pool
            .append_inst(block, Opcode::GetCarryFromOp, &[add.into()], 0)
            .unwrap();

        pool.replace_opcode(carry, Opcode::GetOverflowFromOp).unwrap();
        assert_eq!(
            Err(CompileError::Logic(
                "Undoing use of invalid pseudo-op".to_string()
            )),
            pool.invalidate(carry)
        );
    }

    #[test]
    fn use_count_underflow() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let a = pool.append_inst(block, Opcode::UndefU32, &[], 0).unwrap();
        let neg = pool
            .append_inst(block, Opcode::INeg32, &[a.into()], 0)
            .unwrap();

        pool.insts[a].use_count = 0;
        assert_eq!(
            Err(CompileError::Logic(
                "Use count underflow in UndefU32".to_string()
            )),
            pool.invalidate(neg)
        );
    }

    #[test]
    fn absorb_remaps_handles() {
        let mut first = ObjectPool::new();
        let block = first.new_block();
        first.append_inst(block, Opcode::UndefU32, &[], 0).unwrap();

        let mut second = ObjectPool::new();
        let a = second.new_block();
        let b = second.new_block();
        second.add_branch(a, b).unwrap();
        let x = second.append_inst(a, Opcode::UndefU32, &[], 0).unwrap();
        let y = second
            .append_inst(b, Opcode::INeg32, &[x.into()], 0)
            .unwrap();

        let (inst_offset, block_offset) = first.absorb(second);
        assert_eq!((1, 1), (inst_offset, block_offset));

        let y = y.offset(inst_offset);
        let b = b.offset(block_offset);
        assert_eq!(Value::Inst(x.offset(inst_offset)), first.inst(y).arg(0));
        assert_eq!(Some(b), first.inst(y).block());
        assert_eq!(&[a.offset(block_offset)], first.block(b).imm_predecessors());
    }
}
