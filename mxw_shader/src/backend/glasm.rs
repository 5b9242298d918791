//! NV_gpu_program5 assembly for OpenGL drivers supporting the NV assembly extensions.
//!
//! SSA values live in `R` or `D` temporaries assigned the same way as GLSL variables.
//! Booleans are stored as integers with `-1` for true and `0` for false,
//! so conditions become condition codes with a single `MOV.S.CC`.
//! Secondary outputs of an instruction like the carry are read from the condition codes
//! written by the `.CC` form of the instruction.
use std::fmt::Display;

use log::trace;

use super::{is_emitted_elsewhere, reachable_blocks, resolved_use_counts, Bindings, StageBindings};
use crate::error::CompileError;
use crate::ir::{BlockId, InstId, Opcode, Program, SyntaxNode, Value};
use crate::logic_error;
use crate::profile::{Profile, RuntimeInfo};

mod context;
mod declarations;
mod image;
mod instructions;
mod reg_alloc;

pub use reg_alloc::NUM_REGS;
use reg_alloc::{RegAlloc, Register};

pub(crate) const BACKEND: &str = "GLASM";

/// Emit an assembly program for `program` with bindings starting at `bindings`.
#[tracing::instrument(skip_all)]
pub fn emit_glasm(
    profile: &Profile,
    runtime_info: &RuntimeInfo,
    program: &Program,
    bindings: &mut Bindings,
) -> Result<String, CompileError> {
    let stage_bindings = bindings.assign(&program.info, profile.unified_descriptor_binding);
    let mut ctx = EmitContext::new(profile, runtime_info, program, stage_bindings);
    ctx.emit_syntax_list()?;

    let mut source = ctx.header();
    source.push_str("TEMP RC;\n");
    source.push_str(&ctx.reg_alloc.declarations());
    source.push_str(&ctx.local_declarations());
    source.push_str("main:\n");
    source.push_str(&ctx.code);
    source.push_str("END\n");
    trace!("Emitted {} bytes of GLASM", source.len());
    Ok(source)
}

pub(crate) struct EmitContext<'a> {
    pub program: &'a Program,
    pub profile: &'a Profile,
    pub runtime_info: &'a RuntimeInfo,
    pub bindings: StageBindings,
    reg_alloc: RegAlloc,
    regs: Vec<Option<Register>>,
    phi_regs: Vec<Option<Register>>,
    remaining_uses: Vec<u32>,
    def_loop: Vec<u32>,
    loop_stack: Vec<u32>,
    next_loop: u32,
    pending_free: Vec<Register>,
    reachable: Vec<bool>,
    code: String,
}

impl<'a> EmitContext<'a> {
    fn new(
        profile: &'a Profile,
        runtime_info: &'a RuntimeInfo,
        program: &'a Program,
        bindings: StageBindings,
    ) -> Self {
        let num_insts = program.pool.num_insts();
        Self {
            program,
            profile,
            runtime_info,
            bindings,
            reg_alloc: RegAlloc::default(),
            regs: vec![None; num_insts],
            phi_regs: vec![None; num_insts],
            remaining_uses: resolved_use_counts(program),
            def_loop: vec![0; num_insts],
            loop_stack: Vec::new(),
            next_loop: 1,
            pending_free: Vec::new(),
            reachable: reachable_blocks(program),
            code: String::new(),
        }
    }

    fn current_loop(&self) -> u32 {
        self.loop_stack.last().copied().unwrap_or_default()
    }

    pub fn line(&mut self, text: impl Display) {
        use std::fmt::Write;
        let _ = writeln!(self.code, "{text}");
    }

    /// Set the condition code register from a boolean.
    fn set_cc(&mut self, cond: Value) -> Result<(), CompileError> {
        let cond = self.cond(cond)?;
        self.line(format_args!("MOV.S.CC RC.x,{cond};"));
        Ok(())
    }

    fn emit_syntax_list(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        for node in &program.syntax_list {
            match *node {
                SyntaxNode::Block(block) => {
                    if self.reachable[block.index()] {
                        self.emit_block(block)?;
                    }
                }
                SyntaxNode::If { cond, .. } => {
                    self.set_cc(cond)?;
                    self.line("IF NE.x;");
                }
                SyntaxNode::EndIf { .. } => self.line("ENDIF;"),
                SyntaxNode::Loop { .. } => {
                    self.line("REP;");
                    self.loop_stack.push(self.next_loop);
                    self.next_loop += 1;
                }
                SyntaxNode::Repeat { cond, .. } => {
                    self.set_cc(cond)?;
                    self.line("BRK (EQ.x);");
                    self.loop_stack.pop();
                    self.line("ENDREP;");
                }
                SyntaxNode::Break { cond, .. } => {
                    self.set_cc(cond)?;
                    self.line("BRK (NE.x);");
                }
                SyntaxNode::Return => self.line("RET;"),
                SyntaxNode::Unreachable => (),
            }
            self.release_pending();
        }
        Ok(())
    }

    fn emit_block(&mut self, block: BlockId) -> Result<(), CompileError> {
        let program = self.program;
        for inst in program.pool.block(block).instructions() {
            let op = program.pool.opcode(*inst);
            if op == Opcode::Phi {
                self.emit_phi(*inst)?;
            } else if !is_emitted_elsewhere(op) {
                self.emit_inst(*inst)?;
            }
            self.release_pending();
        }
        self.emit_phi_moves(block)
    }

    fn emit_phi(&mut self, inst: InstId) -> Result<(), CompileError> {
        let phi = self.phi_reg(inst)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("MOV.{} {ret},{phi};", phi.move_type()));
        }
        Ok(())
    }

    fn emit_phi_moves(&mut self, block: BlockId) -> Result<(), CompileError> {
        let program = self.program;
        for successor in program.pool.block(block).imm_successors() {
            for phi in super::phis(program, *successor) {
                let value = program
                    .pool
                    .inst(phi)
                    .phi_operands()
                    .find(|(b, _)| *b == block)
                    .map(|(_, v)| v);
                if let Some(value) = value {
                    let reg = self.phi_reg(phi)?;
                    let value = self.arg(value)?;
                    self.line(format_args!("MOV.{} {reg},{value};", reg.move_type()));
                }
            }
            self.release_pending();
        }
        Ok(())
    }

    fn phi_reg(&mut self, inst: InstId) -> Result<Register, CompileError> {
        match self.phi_regs[inst.index()] {
            Some(reg) => Ok(reg),
            None => {
                let ty = self.program.pool.inst(inst).result_type();
                let reg = self.reg_alloc.define(ty)?;
                self.phi_regs[inst.index()] = Some(reg);
                Ok(reg)
            }
        }
    }

    fn cond(&mut self, cond: Value) -> Result<String, CompileError> {
        if let Some(inst) = self.program.pool.resolve_inst(cond) {
            let defined_in_reachable_block = self
                .program
                .pool
                .inst(inst)
                .block()
                .is_some_and(|b| self.reachable[b.index()]);
            if self.regs[inst.index()].is_none() && !defined_in_reachable_block {
                return Ok("0".to_string());
            }
        }
        self.arg(cond)
    }

    /// The operand for `value` marking one use of its definition as emitted.
    pub fn arg(&mut self, value: Value) -> Result<String, CompileError> {
        match self.program.pool.resolve(value) {
            Value::Inst(inst) => {
                let reg = self.regs[inst.index()]
                    .ok_or_else(|| logic_error!("Use of undefined value %{}", inst.index()))?;
                self.consume(inst, reg);
                Ok(reg.to_string())
            }
            Value::U1(v) => Ok(if v { "-1" } else { "0" }.to_string()),
            Value::U8(v) => Ok(v.to_string()),
            Value::U16(v) => Ok(v.to_string()),
            Value::U32(v) => Ok(v.to_string()),
            Value::U64(v) => Ok(v.to_string()),
            Value::F32(v) => Ok(f32_literal(v)),
            Value::F64(v) => Ok(f64_literal(v)),
            v => Err(logic_error!("Value {v:?} is not an operand")),
        }
    }

    fn consume(&mut self, inst: InstId, reg: Register) {
        let uses = &mut self.remaining_uses[inst.index()];
        *uses = uses.saturating_sub(1);
        if *uses == 0 && self.def_loop[inst.index()] == self.current_loop() {
            self.pending_free.push(reg);
        }
    }

    fn release_pending(&mut self) {
        for reg in self.pending_free.drain(..) {
            self.reg_alloc.free(reg);
        }
    }

    pub fn discard_arg(&mut self, value: Value) {
        if let Some(inst) = self.program.pool.resolve_inst(value) {
            match self.regs[inst.index()] {
                Some(reg) => self.consume(inst, reg),
                None => {
                    let uses = &mut self.remaining_uses[inst.index()];
                    *uses = uses.saturating_sub(1);
                }
            }
        }
    }

    /// The destination register for the result of `inst`.
    ///
    /// Unused results with side effects are written to the scratch register.
    /// Returns `None` if the instruction does not need to be emitted.
    pub fn define(&mut self, inst: InstId) -> Result<Option<String>, CompileError> {
        let i = self.program.pool.inst(inst);
        if self.remaining_uses[inst.index()] == 0 && !i.has_associated_pseudo_operation() {
            if !i.may_have_side_effects() {
                return Ok(None);
            }
            let scratch = if i.result_type().component_count() > 1 {
                "RC"
            } else {
                "RC.x"
            };
            return Ok(Some(scratch.to_string()));
        }
        let ty = i.result_type();
        let reg = self.reg_alloc.define(ty)?;
        self.regs[inst.index()] = Some(reg);
        self.def_loop[inst.index()] = self.current_loop();
        if self.remaining_uses[inst.index()] == 0 {
            self.pending_free.push(reg);
        }
        Ok(Some(reg.to_string()))
    }

    /// The `.CC` modifier if a secondary output of `inst` is read.
    pub fn cc(&self, inst: InstId) -> &'static str {
        if self.program.pool.inst(inst).has_associated_pseudo_operation() {
            ".CC"
        } else {
            ""
        }
    }

    /// Define the pseudo instructions of `inst` from the condition codes it just wrote.
    pub fn emit_pseudo_operations(&mut self, inst: InstId) -> Result<(), CompileError> {
        let program = self.program;
        let i = program.pool.inst(inst);
        for pseudo in i.associated().iter() {
            if self.remaining_uses[pseudo.index()] == 0 {
                continue;
            }
            let test = match program.pool.opcode(pseudo) {
                Opcode::GetZeroFromOp => Some("EQ"),
                Opcode::GetSignFromOp => Some("SF"),
                Opcode::GetCarryFromOp => Some("CF"),
                Opcode::GetOverflowFromOp => Some("OF"),
                // Accesses are assumed to be resident and in bounds.
                Opcode::GetSparseFromOp | Opcode::GetInBoundsFromOp => None,
                op => {
                    return Err(logic_error!(
                        "{op:?} is not supported for {:?}",
                        i.opcode()
                    ))
                }
            };
            let Some(ret) = self.define(pseudo)? else {
                continue;
            };
            match test {
                Some(test) => {
                    self.line(format_args!("MOV.S {ret},0;"));
                    self.line(format_args!("MOV.S {ret}({test}.x),-1;"));
                }
                None => self.line(format_args!("MOV.S {ret},-1;")),
            }
        }
        Ok(())
    }
}

fn f32_literal(v: f32) -> String {
    if v.is_finite() {
        format!("{v:?}")
    } else {
        // Non finite values can only be written as raw bits.
        format!("{:#x}", v.to_bits())
    }
}

fn f64_literal(v: f64) -> String {
    if v.is_finite() {
        format!("{v:?}")
    } else {
        format!("{:#x}", v.to_bits())
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::ir::{IntCompare, IrEmitter, Reg, Type};
    use indoc::indoc;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    pub fn single_block(stage: Stage) -> (Program, BlockId) {
        let mut program = Program::new(stage);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];
        program.syntax_list = vec![SyntaxNode::Block(block), SyntaxNode::Return];
        (program, block)
    }

    pub fn emit(program: &Program) -> String {
        emit_glasm(
            &Profile::default(),
            &RuntimeInfo::default(),
            program,
            &mut Bindings::default(),
        )
        .unwrap()
    }

    /// The lines after the `main` label without the final `END`.
    pub fn body(source: &str) -> String {
        let start = source.find("main:\n").unwrap() + "main:\n".len();
        let end = source.rfind("END\n").unwrap();
        source[start..end].to_string()
    }

    /// The register declarations before the `main` label.
    fn temps(source: &str) -> Vec<&str> {
        source
            .lines()
            .filter(|l| l.starts_with("TEMP") || l.starts_with("LONG TEMP"))
            .collect()
    }

    #[test]
    fn program_layout() {
        let (mut program, block) = single_block(Stage::Compute);
        program.workgroup_size = [64, 1, 1];
        program.local_memory_size = 4;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        ir.write_local(Value::U32(0), lane);

        let source = emit(&program);
        assert!(source.starts_with("!!NVcp5.0\n"));
        assert!(source.contains("GROUP_SIZE 64 1 1;\n"));
        assert_eq!(vec!["TEMP RC;", "TEMP R0;", "TEMP lmem[1];"], temps(&source));
        assert!(source.ends_with("RET;\nEND\n"));
    }

    #[test]
    fn add_with_carry() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let a = ir.lane_id();
        let sum = ir.iadd(a, Value::U32(16));
        let carry = ir.get_carry_from_op(sum).unwrap();
        let value = ir.select(carry, Value::U32(1), sum);
        ir.write_local(Value::U32(0), value);

        // The lane id register is free again once the addition is complete.
        assert_eq!(
            indoc! {"
                MOV.U R0.x,invocation.threadid;
                ADD.U.CC R1.x,R0.x,16;
                MOV.S R2.x,0;
                MOV.S R2.x(CF.x),-1;
                CMP.S R0.x,R2.x,1,R1.x;
                MOV.U lmem[0].x,R0.x;
                RET;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn loop_with_phi() {
        let mut program = Program::new(Stage::Compute);
        let pool = &mut program.pool;
        let entry = pool.new_block();
        let header = pool.new_block();
        let merge = pool.new_block();
        pool.add_branch(entry, header).unwrap();
        pool.add_branch(header, header).unwrap();
        pool.add_branch(header, merge).unwrap();

        let phi = pool.create_phi(Type::U32);
        pool.insert_existing(header, 0, phi);
        let mut ir = IrEmitter::new(pool, header);
        let next = ir.iadd(Value::Inst(phi), Value::U32(1));
        let less = ir.icompare(IntCompare::LessThan, next, Value::U32(4), false);
        let cond = ir.condition_ref(less);
        let mut ir = IrEmitter::new(pool, merge);
        ir.write_local(Value::U32(0), next);
        pool.add_phi_operand(phi, entry, Value::U32(0)).unwrap();
        pool.add_phi_operand(phi, header, next).unwrap();

        program.blocks = vec![entry, header, merge];
        program.post_order_blocks = vec![merge, header, entry];
        program.syntax_list = vec![
            SyntaxNode::Block(entry),
            SyntaxNode::Loop {
                body: header,
                continue_block: header,
                merge,
            },
            SyntaxNode::Block(header),
            SyntaxNode::Repeat {
                cond,
                loop_header: header,
                merge,
            },
            SyntaxNode::Block(merge),
            SyntaxNode::Return,
        ];

        assert_eq!(
            indoc! {"
                MOV.U R0.x,0;
                REP;
                MOV.U R1.x,R0.x;
                ADD.U R2.x,R1.x,1;
                SLT.U R1.x,R2.x,4;
                MOV.S R3.x,R1.x;
                MOV.U R0.x,R2.x;
                MOV.S.CC RC.x,R3.x;
                BRK (EQ.x);
                ENDREP;
                MOV.U lmem[0].x,R2.x;
                RET;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn registers_must_not_reach_emission() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.get_reg(Reg(1));
        ir.write_local(Value::U32(0), value);

        let result = emit_glasm(
            &Profile::default(),
            &RuntimeInfo::default(),
            &program,
            &mut Bindings::default(),
        );
        assert!(matches!(result, Err(CompileError::Logic(_))));
    }
}
