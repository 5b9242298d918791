//! The IR opcode table.
//!
//! Each opcode declares its return type and the type of each argument.
//! The arity of every opcode except [Opcode::Phi] is fixed by the table.
use strum::{EnumCount, EnumIter, IntoStaticStr};

use super::types::Type;

macro_rules! opcodes {
    ($($name:ident: $ret:ident, [$($arg:ident),*];)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount, IntoStaticStr)]
        pub enum Opcode {
            $($name,)*
        }

        impl Opcode {
            pub fn return_type(self) -> Type {
                match self {
                    $(Opcode::$name => Type::$ret,)*
                }
            }

            pub fn arg_types(self) -> &'static [Type] {
                match self {
                    $(Opcode::$name => &[$(Type::$arg),*],)*
                }
            }
        }
    };
}

opcodes! {
    // Special
    Phi: OPAQUE, [];
    Identity: OPAQUE, [OPAQUE];
    Void: VOID, [];
    ConditionRef: U1, [U1];
    Reference: VOID, [OPAQUE];
    PhiMove: VOID, [OPAQUE, OPAQUE];

    // Special operations
    Prologue: VOID, [];
    Epilogue: VOID, [];
    Join: VOID, [];
    DemoteToHelperInvocation: VOID, [];
    EmitVertex: VOID, [U32];
    EndPrimitive: VOID, [U32];

    // Barriers
    Barrier: VOID, [];
    WorkgroupMemoryBarrier: VOID, [];
    DeviceMemoryBarrier: VOID, [];

    // Context getters and setters
    GetRegister: U32, [REG];
    SetRegister: VOID, [REG, U32];
    GetPred: U1, [PRED];
    SetPred: VOID, [PRED, U1];
    GetCbufU8: U32, [U32, U32];
    GetCbufS8: U32, [U32, U32];
    GetCbufU16: U32, [U32, U32];
    GetCbufS16: U32, [U32, U32];
    GetCbufU32: U32, [U32, U32];
    GetCbufF32: F32, [U32, U32];
    GetCbufU32x2: U32X2, [U32, U32];
    GetAttribute: F32, [ATTRIBUTE, U32];
    GetAttributeU32: U32, [ATTRIBUTE, U32];
    SetAttribute: VOID, [ATTRIBUTE, F32, U32];
    GetAttributeIndexed: F32, [U32, U32];
    SetAttributeIndexed: VOID, [U32, F32, U32];
    GetPatch: F32, [PATCH];
    SetPatch: VOID, [PATCH, F32];
    SetFragColor: VOID, [U32, U32, F32];
    SetSampleMask: VOID, [U32];
    SetFragDepth: VOID, [F32];
    GetZFlag: U1, [];
    GetSFlag: U1, [];
    GetCFlag: U1, [];
    GetOFlag: U1, [];
    SetZFlag: VOID, [U1];
    SetSFlag: VOID, [U1];
    SetCFlag: VOID, [U1];
    SetOFlag: VOID, [U1];
    WorkgroupId: U32X3, [];
    LocalInvocationId: U32X3, [];
    InvocationId: U32, [];
    SampleId: U32, [];
    IsHelperInvocation: U1, [];
    YDirection: F32, [];

    // Undefined
    UndefU1: U1, [];
    UndefU8: U8, [];
    UndefU16: U16, [];
    UndefU32: U32, [];
    UndefU64: U64, [];

    // Memory operations
    LoadGlobalU8: U32, [U64];
    LoadGlobalS8: U32, [U64];
    LoadGlobalU16: U32, [U64];
    LoadGlobalS16: U32, [U64];
    LoadGlobal32: U32, [U64];
    LoadGlobal64: U32X2, [U64];
    LoadGlobal128: U32X4, [U64];
    WriteGlobalU8: VOID, [U64, U32];
    WriteGlobalS8: VOID, [U64, U32];
    WriteGlobalU16: VOID, [U64, U32];
    WriteGlobalS16: VOID, [U64, U32];
    WriteGlobal32: VOID, [U64, U32];
    WriteGlobal64: VOID, [U64, U32X2];
    WriteGlobal128: VOID, [U64, U32X4];

    // Storage buffer operations
    LoadStorageU8: U32, [U32, U32];
    LoadStorageS8: U32, [U32, U32];
    LoadStorageU16: U32, [U32, U32];
    LoadStorageS16: U32, [U32, U32];
    LoadStorage32: U32, [U32, U32];
    LoadStorage64: U32X2, [U32, U32];
    LoadStorage128: U32X4, [U32, U32];
    WriteStorageU8: VOID, [U32, U32, U32];
    WriteStorageS8: VOID, [U32, U32, U32];
    WriteStorageU16: VOID, [U32, U32, U32];
    WriteStorageS16: VOID, [U32, U32, U32];
    WriteStorage32: VOID, [U32, U32, U32];
    WriteStorage64: VOID, [U32, U32, U32X2];
    WriteStorage128: VOID, [U32, U32, U32X4];

    // Local memory operations
    LoadLocal: U32, [U32];
    WriteLocal: VOID, [U32, U32];

    // Shared memory operations
    LoadSharedU8: U32, [U32];
    LoadSharedS8: U32, [U32];
    LoadSharedU16: U32, [U32];
    LoadSharedS16: U32, [U32];
    LoadSharedU32: U32, [U32];
    LoadSharedU64: U32X2, [U32];
    LoadSharedU128: U32X4, [U32];
    WriteSharedU8: VOID, [U32, U32];
    WriteSharedU16: VOID, [U32, U32];
    WriteSharedU32: VOID, [U32, U32];
    WriteSharedU64: VOID, [U32, U32X2];
    WriteSharedU128: VOID, [U32, U32X4];

    // Vector utility
    CompositeConstructU32x2: U32X2, [U32, U32];
    CompositeConstructU32x3: U32X3, [U32, U32, U32];
    CompositeConstructU32x4: U32X4, [U32, U32, U32, U32];
    CompositeExtractU32x2: U32, [U32X2, U32];
    CompositeExtractU32x3: U32, [U32X3, U32];
    CompositeExtractU32x4: U32, [U32X4, U32];
    CompositeInsertU32x2: U32X2, [U32X2, U32, U32];
    CompositeInsertU32x4: U32X4, [U32X4, U32, U32];
    CompositeConstructF16x2: F16X2, [F16, F16];
    CompositeExtractF16x2: F16, [F16X2, U32];
    CompositeConstructF32x2: F32X2, [F32, F32];
    CompositeConstructF32x3: F32X3, [F32, F32, F32];
    CompositeConstructF32x4: F32X4, [F32, F32, F32, F32];
    CompositeExtractF32x2: F32, [F32X2, U32];
    CompositeExtractF32x3: F32, [F32X3, U32];
    CompositeExtractF32x4: F32, [F32X4, U32];
    CompositeInsertF32x4: F32X4, [F32X4, F32, U32];

    // Select operations
    SelectU1: U1, [U1, U1, U1];
    SelectU32: U32, [U1, U32, U32];
    SelectU64: U64, [U1, U64, U64];
    SelectF32: F32, [U1, F32, F32];
    SelectF64: F64, [U1, F64, F64];

    // Bitwise conversions
    BitCastU16F16: U16, [F16];
    BitCastU32F32: U32, [F32];
    BitCastU64F64: U64, [F64];
    BitCastF16U16: F16, [U16];
    BitCastF32U32: F32, [U32];
    BitCastF64U64: F64, [U64];
    PackUint2x32: U64, [U32X2];
    UnpackUint2x32: U32X2, [U64];
    PackFloat2x16: U32, [F16X2];
    UnpackFloat2x16: F16X2, [U32];
    PackHalf2x16: U32, [F32X2];
    UnpackHalf2x16: F32X2, [U32];
    PackDouble2x32: F64, [U32X2];
    UnpackDouble2x32: U32X2, [F64];

    // Pseudo-operations, handled specially at final emit
    GetZeroFromOp: U1, [OPAQUE];
    GetSignFromOp: U1, [OPAQUE];
    GetCarryFromOp: U1, [OPAQUE];
    GetOverflowFromOp: U1, [OPAQUE];
    GetSparseFromOp: U1, [OPAQUE];
    GetInBoundsFromOp: U1, [OPAQUE];

    // Floating-point operations
    FPAbs16: F16, [F16];
    FPAbs32: F32, [F32];
    FPAbs64: F64, [F64];
    FPAdd16: F16, [F16, F16];
    FPAdd32: F32, [F32, F32];
    FPAdd64: F64, [F64, F64];
    FPFma16: F16, [F16, F16, F16];
    FPFma32: F32, [F32, F32, F32];
    FPFma64: F64, [F64, F64, F64];
    FPMax32: F32, [F32, F32];
    FPMax64: F64, [F64, F64];
    FPMin32: F32, [F32, F32];
    FPMin64: F64, [F64, F64];
    FPMul16: F16, [F16, F16];
    FPMul32: F32, [F32, F32];
    FPMul64: F64, [F64, F64];
    FPNeg16: F16, [F16];
    FPNeg32: F32, [F32];
    FPNeg64: F64, [F64];
    FPRecip32: F32, [F32];
    FPRecip64: F64, [F64];
    FPRecipSqrt32: F32, [F32];
    FPRecipSqrt64: F64, [F64];
    FPSqrt: F32, [F32];
    FPSin: F32, [F32];
    FPCos: F32, [F32];
    FPExp2: F32, [F32];
    FPLog2: F32, [F32];
    FPSaturate16: F16, [F16];
    FPSaturate32: F32, [F32];
    FPSaturate64: F64, [F64];
    FPClamp32: F32, [F32, F32, F32];
    FPRoundEven32: F32, [F32];
    FPFloor32: F32, [F32];
    FPCeil32: F32, [F32];
    FPTrunc32: F32, [F32];
    FPOrdEqual32: U1, [F32, F32];
    FPUnordEqual32: U1, [F32, F32];
    FPOrdNotEqual32: U1, [F32, F32];
    FPUnordNotEqual32: U1, [F32, F32];
    FPOrdLessThan32: U1, [F32, F32];
    FPUnordLessThan32: U1, [F32, F32];
    FPOrdGreaterThan32: U1, [F32, F32];
    FPUnordGreaterThan32: U1, [F32, F32];
    FPOrdLessThanEqual32: U1, [F32, F32];
    FPUnordLessThanEqual32: U1, [F32, F32];
    FPOrdGreaterThanEqual32: U1, [F32, F32];
    FPUnordGreaterThanEqual32: U1, [F32, F32];
    FPIsNan32: U1, [F32];

    // Integer operations
    IAdd32: U32, [U32, U32];
    IAdd64: U64, [U64, U64];
    ISub32: U32, [U32, U32];
    ISub64: U64, [U64, U64];
    IMul32: U32, [U32, U32];
    INeg32: U32, [U32];
    INeg64: U64, [U64];
    IAbs32: U32, [U32];
    ShiftLeftLogical32: U32, [U32, U32];
    ShiftLeftLogical64: U64, [U64, U32];
    ShiftRightLogical32: U32, [U32, U32];
    ShiftRightLogical64: U64, [U64, U32];
    ShiftRightArithmetic32: U32, [U32, U32];
    ShiftRightArithmetic64: U64, [U64, U32];
    BitwiseAnd32: U32, [U32, U32];
    BitwiseOr32: U32, [U32, U32];
    BitwiseXor32: U32, [U32, U32];
    BitFieldInsert: U32, [U32, U32, U32, U32];
    BitFieldSExtract: U32, [U32, U32, U32];
    BitFieldUExtract: U32, [U32, U32, U32];
    BitReverse32: U32, [U32];
    BitCount32: U32, [U32];
    BitwiseNot32: U32, [U32];
    FindSMsb32: U32, [U32];
    FindUMsb32: U32, [U32];
    SMin32: U32, [U32, U32];
    UMin32: U32, [U32, U32];
    SMax32: U32, [U32, U32];
    UMax32: U32, [U32, U32];
    SClamp32: U32, [U32, U32, U32];
    UClamp32: U32, [U32, U32, U32];
    SLessThan: U1, [U32, U32];
    ULessThan: U1, [U32, U32];
    IEqual: U1, [U32, U32];
    SLessThanEqual: U1, [U32, U32];
    ULessThanEqual: U1, [U32, U32];
    SGreaterThan: U1, [U32, U32];
    UGreaterThan: U1, [U32, U32];
    INotEqual: U1, [U32, U32];
    SGreaterThanEqual: U1, [U32, U32];
    UGreaterThanEqual: U1, [U32, U32];

    // Atomic operations
    GlobalAtomicIAdd32: U32, [U64, U32];
    GlobalAtomicExchange32: U32, [U64, U32];
    StorageAtomicIAdd32: U32, [U32, U32, U32];
    StorageAtomicExchange32: U32, [U32, U32, U32];

    // Logical operations
    LogicalOr: U1, [U1, U1];
    LogicalAnd: U1, [U1, U1];
    LogicalXor: U1, [U1, U1];
    LogicalNot: U1, [U1];

    // Conversion operations
    ConvertS32F32: U32, [F32];
    ConvertU32F32: U32, [F32];
    ConvertS32F64: U32, [F64];
    ConvertF32S32: F32, [U32];
    ConvertF32U32: F32, [U32];
    ConvertF64S32: F64, [U32];
    ConvertF64U32: F64, [U32];
    ConvertF16F32: F16, [F32];
    ConvertF32F16: F32, [F16];
    ConvertF32F64: F32, [F64];
    ConvertF64F32: F64, [F32];
    ConvertU32U64: U32, [U64];
    ConvertU64U32: U64, [U32];

    // Image operations
    ImageSampleImplicitLod: F32X4, [OPAQUE, OPAQUE, OPAQUE, OPAQUE];
    ImageSampleExplicitLod: F32X4, [OPAQUE, OPAQUE, OPAQUE, OPAQUE];
    ImageSampleDrefImplicitLod: F32, [OPAQUE, OPAQUE, F32, OPAQUE, OPAQUE];
    ImageFetch: F32X4, [OPAQUE, OPAQUE, OPAQUE, OPAQUE];
    ImageQueryDimensions: U32X4, [OPAQUE, U32];
    ImageRead: U32X4, [OPAQUE, OPAQUE];
    ImageWrite: VOID, [OPAQUE, OPAQUE, U32X4];

    // Warp operations
    LaneId: U32, [];
    VoteAll: U1, [U1];
    VoteAny: U1, [U1];
    VoteEqual: U1, [U1];
    SubgroupBallot: U32, [U1];
    ShuffleIndex: U32, [U32, U32, U32, U32];
    ShuffleUp: U32, [U32, U32, U32, U32];
    ShuffleDown: U32, [U32, U32, U32, U32];
    ShuffleButterfly: U32, [U32, U32, U32, U32];
}

impl Opcode {
    /// The number of fixed arguments. Phi nodes report 0.
    pub fn num_args(self) -> usize {
        self.arg_types().len()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for instructions that read a secondary output of another instruction.
    pub fn is_pseudo_instruction(self) -> bool {
        matches!(
            self,
            Opcode::GetZeroFromOp
                | Opcode::GetSignFromOp
                | Opcode::GetCarryFromOp
                | Opcode::GetOverflowFromOp
                | Opcode::GetSparseFromOp
                | Opcode::GetInBoundsFromOp
        )
    }

    pub fn is_load_global(self) -> bool {
        matches!(
            self,
            Opcode::LoadGlobalU8
                | Opcode::LoadGlobalS8
                | Opcode::LoadGlobalU16
                | Opcode::LoadGlobalS16
                | Opcode::LoadGlobal32
                | Opcode::LoadGlobal64
                | Opcode::LoadGlobal128
        )
    }

    pub fn is_write_global(self) -> bool {
        matches!(
            self,
            Opcode::WriteGlobalU8
                | Opcode::WriteGlobalS8
                | Opcode::WriteGlobalU16
                | Opcode::WriteGlobalS16
                | Opcode::WriteGlobal32
                | Opcode::WriteGlobal64
                | Opcode::WriteGlobal128
        )
    }

    pub fn is_global_atomic(self) -> bool {
        matches!(
            self,
            Opcode::GlobalAtomicIAdd32 | Opcode::GlobalAtomicExchange32
        )
    }

    /// Returns `true` for instructions with a storage buffer descriptor index as the first argument.
    pub fn is_storage(self) -> bool {
        matches!(
            self,
            Opcode::LoadStorageU8
                | Opcode::LoadStorageS8
                | Opcode::LoadStorageU16
                | Opcode::LoadStorageS16
                | Opcode::LoadStorage32
                | Opcode::LoadStorage64
                | Opcode::LoadStorage128
                | Opcode::WriteStorageU8
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

    /// Returns `true` for any instruction accessing memory through a 64-bit global address.
    pub fn is_global_memory(self) -> bool {
        self.is_load_global() || self.is_write_global() || self.is_global_atomic()
    }

    pub fn is_texture(self) -> bool {
        matches!(
            self,
            Opcode::ImageSampleImplicitLod
                | Opcode::ImageSampleExplicitLod
                | Opcode::ImageSampleDrefImplicitLod
                | Opcode::ImageFetch
                | Opcode::ImageQueryDimensions
        )
    }

    pub fn is_image(self) -> bool {
        matches!(self, Opcode::ImageRead | Opcode::ImageWrite)
    }

    pub fn is_cbuf_read(self) -> bool {
        matches!(
            self,
            Opcode::GetCbufU8
                | Opcode::GetCbufS8
                | Opcode::GetCbufU16
                | Opcode::GetCbufS16
                | Opcode::GetCbufU32
                | Opcode::GetCbufF32
                | Opcode::GetCbufU32x2
        )
    }

    pub fn is_undef(self) -> bool {
        matches!(
            self,
            Opcode::UndefU1
                | Opcode::UndefU8
                | Opcode::UndefU16
                | Opcode::UndefU32
                | Opcode::UndefU64
        )
    }

    /// The storage buffer equivalent of a global memory instruction.
    pub fn global_to_storage(self) -> Option<Opcode> {
        match self {
            Opcode::LoadGlobalU8 => Some(Opcode::LoadStorageU8),
            Opcode::LoadGlobalS8 => Some(Opcode::LoadStorageS8),
            Opcode::LoadGlobalU16 => Some(Opcode::LoadStorageU16),
            Opcode::LoadGlobalS16 => Some(Opcode::LoadStorageS16),
            Opcode::LoadGlobal32 => Some(Opcode::LoadStorage32),
            Opcode::LoadGlobal64 => Some(Opcode::LoadStorage64),
            Opcode::LoadGlobal128 => Some(Opcode::LoadStorage128),
            Opcode::WriteGlobalU8 => Some(Opcode::WriteStorageU8),
            Opcode::WriteGlobalS8 => Some(Opcode::WriteStorageS8),
            Opcode::WriteGlobalU16 => Some(Opcode::WriteStorageU16),
            Opcode::WriteGlobalS16 => Some(Opcode::WriteStorageS16),
            Opcode::WriteGlobal32 => Some(Opcode::WriteStorage32),
            Opcode::WriteGlobal64 => Some(Opcode::WriteStorage64),
            Opcode::WriteGlobal128 => Some(Opcode::WriteStorage128),
            Opcode::GlobalAtomicIAdd32 => Some(Opcode::StorageAtomicIAdd32),
            Opcode::GlobalAtomicExchange32 => Some(Opcode::StorageAtomicExchange32),
            _ => None,
        }
    }
}
