//! SPIR-V modules for Vulkan built with the [rspirv] data representation builder.
//!
//! Every IR block becomes a SPIR-V block with its own label.
//! Structured control flow comes from the [SyntaxNode] list.
//! `If` nodes become selection headers while `Loop` nodes get a separate header block
//! holding the loop merge and the phis of the loop body.
//! Phis are inserted once the function is complete,
//! since the blocks they read from can appear later in the function.
use std::collections::HashMap;

use indexmap::IndexSet;
use log::trace;
use rspirv::binary::Assemble;
use rspirv::dr::{Builder, InsertPoint};
use rspirv::spirv::{
    self, Capability, FunctionControl, LoopControl, SelectionControl, StorageClass, Word,
};

use super::{is_emitted_elsewhere, reachable_blocks, resolved_use_counts, Bindings, StageBindings};
use crate::error::CompileError;
use crate::ir::{BlockId, InstId, Opcode, Program, SyntaxNode, Type, Value};
use crate::profile::{Profile, RuntimeInfo};
use crate::{logic_error, not_implemented};

mod attributes;
mod declarations;
mod image;
mod instructions;
mod memory;

use declarations::{Resources, Var};

pub(crate) const BACKEND: &str = "SPIR-V";

/// Emit a SPIR-V module for `program` with bindings starting at `bindings`.
#[tracing::instrument(skip_all)]
pub fn emit_spirv(
    profile: &Profile,
    runtime_info: &RuntimeInfo,
    program: &Program,
    bindings: &mut Bindings,
) -> Result<Vec<u32>, CompileError> {
    let stage_bindings = bindings.assign(&program.info, profile.unified_descriptor_binding);
    let mut ctx = EmitContext::new(profile, runtime_info, program, stage_bindings);
    ctx.declare_resources()?;

    let void_type = ctx.void_type;
    let function_type = ctx.builder.type_function(void_type, vec![]);
    let main = ctx
        .builder
        .begin_function(void_type, None, FunctionControl::NONE, function_type)?;
    ctx.emit_syntax_list()?;
    ctx.insert_phis()?;
    ctx.builder.end_function()?;
    ctx.declare_entry_point(main)?;

    let words = ctx.finish();
    trace!("Emitted {} words of SPIR-V", words.len());
    Ok(words)
}

/// The module version as `(major, minor)` for a profile version like `0x00010300`.
fn spirv_version(version: u32) -> (u8, u8) {
    let major = ((version >> 16) & 0xff) as u8;
    let minor = ((version >> 8) & 0xff) as u8;
    if major == 0 {
        (1, 0)
    } else {
        (major, minor)
    }
}

pub(crate) struct EmitContext<'a> {
    pub program: &'a Program,
    pub profile: &'a Profile,
    pub runtime_info: &'a RuntimeInfo,
    pub bindings: StageBindings,
    builder: Builder,
    version: (u8, u8),
    glsl: Word,
    void_type: Word,
    bool_type: Word,
    u32_type: Word,
    i32_type: Word,
    f32_type: Word,
    capabilities: IndexSet<Capability>,
    extensions: IndexSet<&'static str>,
    /// Variables listed by the entry point.
    interface: Vec<Word>,
    types: HashMap<Type, Word>,
    signed_vectors: HashMap<u32, Word>,
    pointers: HashMap<(StorageClass, Word), Word>,
    constants: HashMap<(Word, u64), Word>,
    nulls: HashMap<Word, Word>,
    vars: HashMap<Var, Word>,
    resources: Resources,
    values: Vec<Option<Word>>,
    use_counts: Vec<u32>,
    reachable: Vec<bool>,
    labels: Vec<Word>,
    /// The label of the last SPIR-V block of each IR block.
    exit_labels: Vec<Word>,
    /// The index of the SPIR-V block receiving the phis of each IR block.
    phi_blocks: Vec<Option<usize>>,
    /// The header label for each loop by the first block of its body.
    loop_headers: Vec<Option<Word>>,
    current_block: Option<BlockId>,
    /// The selected block still needs a terminator.
    open: bool,
}

impl<'a> EmitContext<'a> {
    fn new(
        profile: &'a Profile,
        runtime_info: &'a RuntimeInfo,
        program: &'a Program,
        bindings: StageBindings,
    ) -> Self {
        let version = spirv_version(profile.supported_spirv);
        let mut builder = Builder::new();
        builder.set_version(version.0, version.1);
        builder.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);
        let glsl = builder.ext_inst_import("GLSL.std.450");

        let void_type = builder.type_void();
        let bool_type = builder.type_bool();
        let u32_type = builder.type_int(32, 0);
        let i32_type = builder.type_int(32, 1);
        let f32_type = builder.type_float(32);
        let types = HashMap::from([
            (Type::VOID, void_type),
            (Type::U1, bool_type),
            (Type::U32, u32_type),
            (Type::F32, f32_type),
        ]);

        let num_blocks = program.pool.num_blocks();
        let labels: Vec<_> = (0..num_blocks).map(|_| builder.id()).collect();
        Self {
            program,
            profile,
            runtime_info,
            bindings,
            builder,
            version,
            glsl,
            void_type,
            bool_type,
            u32_type,
            i32_type,
            f32_type,
            capabilities: IndexSet::from([Capability::Shader]),
            extensions: IndexSet::new(),
            interface: Vec::new(),
            types,
            signed_vectors: HashMap::new(),
            pointers: HashMap::new(),
            constants: HashMap::new(),
            nulls: HashMap::new(),
            vars: HashMap::new(),
            resources: Resources::default(),
            values: vec![None; program.pool.num_insts()],
            use_counts: resolved_use_counts(program),
            reachable: reachable_blocks(program),
            exit_labels: labels.clone(),
            labels,
            phi_blocks: vec![None; num_blocks],
            loop_headers: vec![None; num_blocks],
            current_block: None,
            open: false,
        }
    }

    fn finish(mut self) -> Vec<u32> {
        for capability in std::mem::take(&mut self.capabilities) {
            self.builder.capability(capability);
        }
        for extension in std::mem::take(&mut self.extensions) {
            self.builder.extension(extension);
        }
        self.builder.module().assemble()
    }

    /// Returns `true` if the module version is at least `1.minor`.
    pub fn supports_version(&self, minor: u8) -> bool {
        self.version >= (1, minor)
    }

    pub fn capability(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn extension(&mut self, extension: &'static str) {
        self.extensions.insert(extension);
    }

    fn label(&self, block: BlockId) -> Word {
        self.labels[block.index()]
    }

    fn emit_syntax_list(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        for node in &program.syntax_list {
            match *node {
                SyntaxNode::Block(block) => self.emit_block(block)?,
                SyntaxNode::If { cond, body, merge } => {
                    let cond = self.id(cond)?;
                    self.builder
                        .selection_merge(self.labels[merge.index()], SelectionControl::NONE)?;
                    self.builder
                        .branch_conditional(cond, self.label(body), self.label(merge), [])?;
                    self.open = false;
                }
                SyntaxNode::EndIf { merge } => {
                    if self.open {
                        self.builder.branch(self.label(merge))?;
                        self.open = false;
                    }
                }
                SyntaxNode::Loop {
                    body,
                    continue_block,
                    merge,
                } => {
                    let header = self.builder.id();
                    if self.open {
                        self.builder.branch(header)?;
                    }
                    self.builder.begin_block(Some(header))?;
                    // The body phis read from the blocks branching to the header.
                    self.phi_blocks[body.index()] = self.builder.selected_block();
                    self.loop_headers[body.index()] = Some(header);
                    self.builder.loop_merge(
                        self.label(merge),
                        self.label(continue_block),
                        LoopControl::NONE,
                        [],
                    )?;
                    self.builder.branch(self.label(body))?;
                    self.open = false;
                }
                SyntaxNode::Repeat {
                    cond,
                    loop_header,
                    merge,
                } => {
                    let header = self.loop_headers[loop_header.index()]
                        .ok_or_else(|| logic_error!("Repeat without a loop header"))?;
                    if self.open {
                        let cond = self.id(cond)?;
                        self.builder
                            .branch_conditional(cond, header, self.label(merge), [])?;
                        self.open = false;
                    }
                }
                SyntaxNode::Break { cond, merge, skip } => {
                    if self.open {
                        let cond = self.id(cond)?;
                        self.builder
                            .branch_conditional(cond, self.label(merge), self.label(skip), [])?;
                        self.open = false;
                    }
                }
                SyntaxNode::Return => {
                    if self.open {
                        self.builder.ret()?;
                        self.open = false;
                    }
                }
                SyntaxNode::Unreachable => {
                    if self.open {
                        self.builder.unreachable()?;
                        self.open = false;
                    }
                }
            }
        }
        if self.open {
            self.builder.ret()?;
            self.open = false;
        }
        Ok(())
    }

    fn emit_block(&mut self, block: BlockId) -> Result<(), CompileError> {
        let label = self.label(block);
        if self.open {
            self.builder.branch(label)?;
        }
        self.builder.begin_block(Some(label))?;
        self.open = true;
        self.current_block = Some(block);
        if self.phi_blocks[block.index()].is_none() {
            self.phi_blocks[block.index()] = self.builder.selected_block();
        }
        if !self.reachable[block.index()] {
            return Ok(());
        }

        let program = self.program;
        for inst in program.pool.block(block).instructions() {
            if !is_emitted_elsewhere(program.pool.opcode(*inst)) {
                self.emit_inst(*inst)?;
            }
        }
        Ok(())
    }

    /// Start a new SPIR-V block that continues the current IR block.
    fn continue_block(&mut self, label: Word) -> Result<(), CompileError> {
        self.builder.begin_block(Some(label))?;
        self.open = true;
        if let Some(block) = self.current_block {
            self.exit_labels[block.index()] = label;
        }
        Ok(())
    }

    /// Terminate the invocation if `cond` is true and continue in a new block.
    pub fn emit_conditional_kill(&mut self, cond: Word) -> Result<(), CompileError> {
        let kill = self.builder.id();
        let merge = self.builder.id();
        self.builder.selection_merge(merge, SelectionControl::NONE)?;
        self.builder.branch_conditional(cond, kill, merge, [])?;
        self.builder.begin_block(Some(kill))?;
        self.builder.kill()?;
        self.continue_block(merge)
    }

    fn insert_phis(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        for block in &program.blocks {
            if !self.reachable[block.index()] {
                continue;
            }
            let Some(index) = self.phi_blocks[block.index()] else {
                continue;
            };
            for phi in super::phis(program, *block) {
                let ty = self.result_type(phi)?;
                let mut incoming = Vec::new();
                for (pred, value) in program.pool.inst(phi).phi_operands() {
                    let value = self.id(value)?;
                    incoming.push((value, self.exit_labels[pred.index()]));
                }
                let id = self.def(phi);
                self.builder.select_block(Some(index))?;
                self.builder
                    .insert_phi(InsertPoint::Begin, ty, Some(id), incoming)?;
            }
        }
        self.builder.select_block(None)?;
        Ok(())
    }

    /// The result id of `inst` allocated on first use.
    pub fn def(&mut self, inst: InstId) -> Word {
        *self.values[inst.index()].get_or_insert_with(|| self.builder.id())
    }

    /// The id for `value` after resolving identities.
    ///
    /// Values defined in unreachable blocks are replaced with zero.
    pub fn id(&mut self, value: Value) -> Result<Word, CompileError> {
        match self.program.pool.resolve(value) {
            Value::Inst(inst) => {
                let i = self.program.pool.inst(inst);
                if i.block().is_some_and(|b| self.reachable[b.index()]) {
                    Ok(self.def(inst))
                } else {
                    let ty = self.ty(i.result_type())?;
                    Ok(self.null(ty))
                }
            }
            Value::U1(v) => Ok(self.bool_const(v)),
            Value::U8(v) => Ok(self.u32_const(v as u32)),
            Value::U16(v) => Ok(self.u32_const(v as u32)),
            Value::U32(v) => Ok(self.u32_const(v)),
            Value::U64(v) => {
                let ty = self.ty(Type::U64)?;
                Ok(self.constant64(ty, v))
            }
            Value::F32(v) => Ok(self.f32_const(v)),
            Value::F64(v) => {
                let ty = self.ty(Type::F64)?;
                Ok(self.constant64(ty, v.to_bits()))
            }
            v => Err(logic_error!("Value {v:?} is not an operand")),
        }
    }

    pub fn result_type(&mut self, inst: InstId) -> Result<Word, CompileError> {
        self.ty(self.program.pool.inst(inst).result_type())
    }

    /// The type id for a scalar or vector IR type.
    pub fn ty(&mut self, ty: Type) -> Result<Word, CompileError> {
        if let Some(id) = self.types.get(&ty) {
            return Ok(*id);
        }
        let id = match ty {
            Type::U64 => {
                self.capability(Capability::Int64);
                self.builder.type_int(64, 0)
            }
            Type::F64 => {
                self.capability(Capability::Float64);
                self.builder.type_float(64)
            }
            // Sub word integers are always widened.
            Type::U8 | Type::U16 => self.u32_type,
            Type::F16 => {
                self.capability(Capability::Float16);
                self.builder.type_float(16)
            }
            Type::F16X2 | Type::F16X3 | Type::F16X4 => {
                let half = self.ty(Type::F16)?;
                let count = ty.component_count() as u32;
                self.builder.type_vector(half, count)
            }
            Type::U32X2 | Type::U32X3 | Type::U32X4 => {
                let count = ty.component_count() as u32;
                self.builder.type_vector(self.u32_type, count)
            }
            Type::F32X2 | Type::F32X3 | Type::F32X4 => {
                let count = ty.component_count() as u32;
                self.builder.type_vector(self.f32_type, count)
            }
            ty => return Err(not_implemented!("{} values", ty.name())),
        };
        self.types.insert(ty, id);
        Ok(id)
    }

    /// A signed 32-bit integer scalar or vector type.
    pub fn signed_type(&mut self, count: u32) -> Word {
        if count == 1 {
            return self.i32_type;
        }
        *self
            .signed_vectors
            .entry(count)
            .or_insert_with(|| self.builder.type_vector(self.i32_type, count))
    }

    pub fn pointer(&mut self, class: StorageClass, pointee: Word) -> Word {
        *self
            .pointers
            .entry((class, pointee))
            .or_insert_with(|| self.builder.type_pointer(None, class, pointee))
    }

    pub fn constant32(&mut self, ty: Word, bits: u32) -> Word {
        *self
            .constants
            .entry((ty, bits as u64))
            .or_insert_with(|| self.builder.constant_bit32(ty, bits))
    }

    fn constant64(&mut self, ty: Word, bits: u64) -> Word {
        *self
            .constants
            .entry((ty, bits))
            .or_insert_with(|| self.builder.constant_bit64(ty, bits))
    }

    pub fn u32_const(&mut self, v: u32) -> Word {
        self.constant32(self.u32_type, v)
    }

    pub fn i32_const(&mut self, v: i32) -> Word {
        self.constant32(self.i32_type, v as u32)
    }

    pub fn f32_const(&mut self, v: f32) -> Word {
        self.constant32(self.f32_type, v.to_bits())
    }

    pub fn bool_const(&mut self, v: bool) -> Word {
        let ty = self.bool_type;
        *self.constants.entry((ty, v as u64)).or_insert_with(|| {
            if v {
                self.builder.constant_true(ty)
            } else {
                self.builder.constant_false(ty)
            }
        })
    }

    /// The zero value of any type.
    pub fn null(&mut self, ty: Word) -> Word {
        *self
            .nulls
            .entry(ty)
            .or_insert_with(|| self.builder.constant_null(ty))
    }

    /// Define the pseudo instructions of `inst` reading secondary outputs like the carry.
    ///
    /// The carry and overflow are only defined for additions with `operands`.
    pub fn emit_pseudo_operations(
        &mut self,
        inst: InstId,
        result: Word,
        operands: Option<(Word, Word)>,
    ) -> Result<(), CompileError> {
        let program = self.program;
        let i = program.pool.inst(inst);
        for pseudo in i.associated().iter() {
            if self.use_counts[pseudo.index()] == 0 {
                continue;
            }
            let id = self.def(pseudo);
            let bool_type = self.bool_type;
            match (program.pool.opcode(pseudo), operands) {
                (Opcode::GetZeroFromOp, _) => {
                    let ty = self.result_type(inst)?;
                    let zero = self.null(ty);
                    self.builder.i_equal(bool_type, Some(id), result, zero)?;
                }
                (Opcode::GetSignFromOp, _) => {
                    let ty = self.result_type(inst)?;
                    let zero = self.null(ty);
                    self.builder.s_less_than(bool_type, Some(id), result, zero)?;
                }
                (Opcode::GetCarryFromOp, Some((a, _))) => {
                    self.builder.u_less_than(bool_type, Some(id), result, a)?;
                }
                (Opcode::GetOverflowFromOp, Some((a, b))) => {
                    // Both operands have a different sign than the result.
                    let ty = self.result_type(inst)?;
                    let lhs = self.builder.bitwise_xor(ty, None, a, result)?;
                    let rhs = self.builder.bitwise_xor(ty, None, b, result)?;
                    let both = self.builder.bitwise_and(ty, None, lhs, rhs)?;
                    let zero = self.null(ty);
                    self.builder.s_less_than(bool_type, Some(id), both, zero)?;
                }
                // Accesses are assumed to be resident and in bounds.
                (Opcode::GetSparseFromOp | Opcode::GetInBoundsFromOp, _) => {
                    let value = self.bool_const(true);
                    self.builder.copy_object(bool_type, Some(id), value)?;
                }
                (op, _) => {
                    return Err(logic_error!(
                        "{op:?} is not supported for {:?}",
                        i.opcode()
                    ))
                }
            }
        }
        Ok(())
    }
}
