use super::opcodes::Opcode;
use super::types::Type;
use super::value::Value;
use super::{BlockId, InstId};

/// The instructions reading secondary outputs of a single producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociatedInsts {
    pub zero: Option<InstId>,
    pub sign: Option<InstId>,
    pub carry: Option<InstId>,
    pub overflow: Option<InstId>,
    pub sparse: Option<InstId>,
    pub in_bounds: Option<InstId>,
}

impl AssociatedInsts {
    /// The slot for the pseudo instruction `op`.
    pub(crate) fn slot_mut(&mut self, op: Opcode) -> Option<&mut Option<InstId>> {
        match op {
            Opcode::GetZeroFromOp => Some(&mut self.zero),
            Opcode::GetSignFromOp => Some(&mut self.sign),
            Opcode::GetCarryFromOp => Some(&mut self.carry),
            Opcode::GetOverflowFromOp => Some(&mut self.overflow),
            Opcode::GetSparseFromOp => Some(&mut self.sparse),
            Opcode::GetInBoundsFromOp => Some(&mut self.in_bounds),
            _ => None,
        }
    }

    pub fn get(&self, op: Opcode) -> Option<InstId> {
        match op {
            Opcode::GetZeroFromOp => self.zero,
            Opcode::GetSignFromOp => self.sign,
            Opcode::GetCarryFromOp => self.carry,
            Opcode::GetOverflowFromOp => self.overflow,
            Opcode::GetSparseFromOp => self.sparse,
            Opcode::GetInBoundsFromOp => self.in_bounds,
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = InstId> + '_ {
        [
            self.zero,
            self.sign,
            self.carry,
            self.overflow,
            self.sparse,
            self.in_bounds,
        ]
        .into_iter()
        .flatten()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// A single SSA instruction.
///
/// Instructions are owned by an [ObjectPool](super::ObjectPool)
/// and all mutation that changes arguments goes through the pool to keep use counts correct.
#[derive(Debug, Clone)]
pub struct Inst {
    pub(crate) op: Opcode,
    pub(crate) flags: u32,
    pub(crate) args: Vec<Value>,
    pub(crate) phi_blocks: Vec<BlockId>,
    pub(crate) use_count: u32,
    pub(crate) associated: AssociatedInsts,
    pub(crate) block: Option<BlockId>,
    /// Backend specific data like a SPIR-V id or an allocated register.
    pub definition: u32,
}

impl Inst {
    pub(crate) fn new(op: Opcode, flags: u32) -> Self {
        Self {
            op,
            flags,
            args: Vec::new(),
            phi_blocks: Vec::new(),
            use_count: 0,
            associated: AssociatedInsts::default(),
            block: None,
            definition: 0,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.op
    }

    /// Opcode specific data like [FpControl](super::FpControl)
    /// or the result type of a phi node.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// The arguments or the incoming values for phi nodes.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).copied().unwrap_or_default()
    }

    /// The predecessor block for the phi operand at `index`.
    pub fn phi_block(&self, index: usize) -> Option<BlockId> {
        self.phi_blocks.get(index).copied()
    }

    pub fn phi_operands(&self) -> impl Iterator<Item = (BlockId, Value)> + '_ {
        self.phi_blocks.iter().copied().zip(self.args.iter().copied())
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn has_uses(&self) -> bool {
        self.use_count > 0
    }

    pub fn associated(&self) -> &AssociatedInsts {
        &self.associated
    }

    pub fn has_associated_pseudo_operation(&self) -> bool {
        !self.associated.is_empty()
    }

    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    pub fn is_phi(&self) -> bool {
        self.op == Opcode::Phi
    }

    /// The type of the result ignoring identity chains.
    /// Phi nodes store their type in the flags.
    pub fn result_type(&self) -> Type {
        match self.op {
            Opcode::Phi => Type::from_bits_retain(self.flags),
            op => op.return_type(),
        }
    }

    /// Returns `true` if removing this instruction changes the behavior of the program
    /// even when the result is unused.
    pub fn may_have_side_effects(&self) -> bool {
        match self.op {
            Opcode::ConditionRef
            | Opcode::Reference
            | Opcode::PhiMove
            | Opcode::Prologue
            | Opcode::Epilogue
            | Opcode::Join
            | Opcode::DemoteToHelperInvocation
            | Opcode::EmitVertex
            | Opcode::EndPrimitive
            | Opcode::Barrier
            | Opcode::WorkgroupMemoryBarrier
            | Opcode::DeviceMemoryBarrier
            | Opcode::SetRegister
            | Opcode::SetPred
            | Opcode::SetAttribute
            | Opcode::SetAttributeIndexed
            | Opcode::SetPatch
            | Opcode::SetFragColor
            | Opcode::SetSampleMask
            | Opcode::SetFragDepth
            | Opcode::SetZFlag
            | Opcode::SetSFlag
            | Opcode::SetCFlag
            | Opcode::SetOFlag
            | Opcode::WriteLocal
            | Opcode::WriteSharedU8
            | Opcode::WriteSharedU16
            | Opcode::WriteSharedU32
            | Opcode::WriteSharedU64
            | Opcode::WriteSharedU128
            | Opcode::ImageWrite => true,
            op => op.is_write_global() || op.is_global_atomic() || is_storage_write(op),
        }
    }
}

fn is_storage_write(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::WriteStorageU8
            | Opcode::WriteStorageS8
            | Opcode::WriteStorageU16
            | Opcode::WriteStorageS16
            | Opcode::WriteStorage32
            | Opcode::WriteStorage64
            | Opcode::WriteStorage128
            | Opcode::StorageAtomicIAdd32
            | Opcode::StorageAtomicExchange32
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_effects() {
        assert!(Inst::new(Opcode::WriteGlobal32, 0).may_have_side_effects());
        assert!(Inst::new(Opcode::WriteStorage32, 0).may_have_side_effects());
        assert!(Inst::new(Opcode::GlobalAtomicIAdd32, 0).may_have_side_effects());
        assert!(Inst::new(Opcode::Epilogue, 0).may_have_side_effects());
        assert!(!Inst::new(Opcode::FPAdd32, 0).may_have_side_effects());
        assert!(!Inst::new(Opcode::LoadGlobal32, 0).may_have_side_effects());
    }

    #[test]
    fn phi_type_in_flags() {
        let phi = Inst::new(Opcode::Phi, Type::U32.bits());
        assert_eq!(Type::U32, phi.result_type());
        assert_eq!(Type::F32, Inst::new(Opcode::FPAdd32, 0).result_type());
    }
}
