//! GLSL 4.50 source for OpenGL.
//!
//! SSA values are stored in function local variables assigned by [RegAlloc].
//! A variable is reused once every use of its value has been emitted.
//! Values defined outside the innermost loop are kept alive until the loop exits
//! since later iterations may still read them.
//!
//! Each phi node has a dedicated variable written by its predecessors before branching.
//! The phi result is copied to a regular variable at the start of its block,
//! so writes for the next iteration of a loop never clobber the current value.
use std::fmt::Display;

use log::trace;

use super::{is_emitted_elsewhere, reachable_blocks, resolved_use_counts, Bindings, StageBindings};
use crate::error::CompileError;
use crate::ir::{BlockId, InstId, Opcode, Program, SyntaxNode, Value};
use crate::profile::{Profile, RuntimeInfo};
use crate::logic_error;

mod attributes;
mod declarations;
mod image;
mod instructions;
mod memory;
mod reg_alloc;

pub use reg_alloc::NUM_REGS;
use reg_alloc::{Id, RegAlloc, VarType};

pub(crate) const BACKEND: &str = "GLSL";

/// Emit GLSL source for `program` with bindings starting at `bindings`.
///
/// `bindings` is advanced past the resources used by this program.
#[tracing::instrument(skip_all)]
pub fn emit_glsl(
    profile: &Profile,
    runtime_info: &RuntimeInfo,
    program: &Program,
    bindings: &mut Bindings,
) -> Result<String, CompileError> {
    let stage_bindings = bindings.assign(&program.info, profile.unified_descriptor_binding);
    let mut ctx = EmitContext::new(profile, runtime_info, program, stage_bindings);
    ctx.emit_syntax_list()?;

    let mut source = ctx.header();
    source.push_str("void main() {\n");
    source.push_str(&ctx.reg_alloc.declarations("    "));
    source.push_str(&ctx.local_declarations());
    source.push_str(&ctx.code);
    source.push_str("}\n");
    trace!("Emitted {} bytes of GLSL", source.len());
    Ok(source)
}

pub(crate) struct EmitContext<'a> {
    pub program: &'a Program,
    pub profile: &'a Profile,
    pub runtime_info: &'a RuntimeInfo,
    pub bindings: StageBindings,
    reg_alloc: RegAlloc,
    /// The variable holding the result of each instruction.
    vars: Vec<Option<Id>>,
    /// The variable written by predecessors for each phi node.
    phi_vars: Vec<Option<Id>>,
    remaining_uses: Vec<u32>,
    /// The innermost loop enclosing the definition of each instruction.
    def_loop: Vec<u32>,
    loop_stack: Vec<u32>,
    next_loop: u32,
    pending_free: Vec<Id>,
    reachable: Vec<bool>,
    code: String,
    indent: usize,
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
            vars: vec![None; num_insts],
            phi_vars: vec![None; num_insts],
            remaining_uses: resolved_use_counts(program),
            def_loop: vec![0; num_insts],
            loop_stack: Vec::new(),
            next_loop: 1,
            pending_free: Vec::new(),
            reachable: reachable_blocks(program),
            code: String::new(),
            indent: 1,
        }
    }

    fn current_loop(&self) -> u32 {
        self.loop_stack.last().copied().unwrap_or_default()
    }

    /// Write a single indented line of code.
    pub fn line(&mut self, text: impl Display) {
        use std::fmt::Write;
        let _ = writeln!(self.code, "{:1$}{text}", "", self.indent * 4);
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
                    let cond = self.cond(cond)?;
                    self.line(format_args!("if ({cond}) {{"));
                    self.indent += 1;
                }
                SyntaxNode::EndIf { .. } => {
                    self.indent -= 1;
                    self.line("}");
                }
                SyntaxNode::Loop { .. } => {
                    self.line("for (;;) {");
                    self.indent += 1;
                    self.loop_stack.push(self.next_loop);
                    self.next_loop += 1;
                }
                SyntaxNode::Repeat { cond, .. } => {
                    let cond = self.cond(cond)?;
                    self.line(format_args!("if (!{cond}) {{ break; }}"));
                    self.loop_stack.pop();
                    self.indent -= 1;
                    self.line("}");
                }
                SyntaxNode::Break { cond, .. } => {
                    let cond = self.cond(cond)?;
                    self.line(format_args!("if ({cond}) {{ break; }}"));
                }
                SyntaxNode::Return => self.line("return;"),
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
        let phi = self.phi_var(inst)?;
        self.define_result(inst, phi.to_string())
    }

    /// Write the incoming values of every successor phi node for the edge from `block`.
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
                    let var = self.phi_var(phi)?;
                    let value = self.arg(value)?;
                    self.line(format_args!("{var} = {value};"));
                }
            }
            self.release_pending();
        }
        Ok(())
    }

    fn phi_var(&mut self, inst: InstId) -> Result<Id, CompileError> {
        match self.phi_vars[inst.index()] {
            Some(id) => Ok(id),
            None => {
                let ty = VarType::from_type(self.program.pool.inst(inst).result_type())?;
                let id = self.reg_alloc.define(ty)?;
                self.phi_vars[inst.index()] = Some(id);
                Ok(id)
            }
        }
    }

    /// The condition of a syntax node.
    /// Conditions defined in unreachable blocks are never evaluated.
    fn cond(&mut self, cond: Value) -> Result<String, CompileError> {
        if let Some(inst) = self.program.pool.resolve_inst(cond) {
            let defined_in_reachable_block = self
                .program
                .pool
                .inst(inst)
                .block()
                .is_some_and(|b| self.reachable[b.index()]);
            if self.vars[inst.index()].is_none() && !defined_in_reachable_block {
                return Ok("false".to_string());
            }
        }
        self.arg(cond)
    }

    /// The expression for `value` marking one use of its definition as emitted.
    pub fn arg(&mut self, value: Value) -> Result<String, CompileError> {
        match self.program.pool.resolve(value) {
            Value::Inst(inst) => {
                let id = self.vars[inst.index()]
                    .ok_or_else(|| logic_error!("Use of undefined value %{}", inst.index()))?;
                self.consume(inst, id);
                Ok(id.to_string())
            }
            Value::U1(v) => Ok(v.to_string()),
            Value::U8(v) => Ok(format!("{v}u")),
            Value::U16(v) => Ok(format!("{v}u")),
            Value::U32(v) => Ok(format!("{v}u")),
            Value::U64(v) => Ok(format!("{v}ul")),
            Value::F32(v) => Ok(f32_literal(v)),
            Value::F64(v) => Ok(f64_literal(v)),
            v => Err(logic_error!("Value {v:?} is not an expression")),
        }
    }

    fn consume(&mut self, inst: InstId, id: Id) {
        let uses = &mut self.remaining_uses[inst.index()];
        *uses = uses.saturating_sub(1);
        if *uses == 0 && self.def_loop[inst.index()] == self.current_loop() {
            self.pending_free.push(id);
        }
    }

    /// Free the variables of values whose last use was just emitted.
    /// Freeing is delayed until the current instruction is complete,
    /// so a result never shares a variable with one of its own arguments.
    fn release_pending(&mut self) {
        for id in self.pending_free.drain(..) {
            self.reg_alloc.free(id);
        }
    }

    /// Assign `expr` to a new variable holding the result of `inst`.
    /// Unused results are skipped unless evaluating `expr` has side effects.
    pub fn define_result(&mut self, inst: InstId, expr: String) -> Result<(), CompileError> {
        self.define_with_operands(inst, expr, None)
    }

    /// [define_result](Self::define_result) that also emits the pseudo instructions
    /// reading secondary outputs like the carry of an addition.
    pub fn define_with_operands(
        &mut self,
        inst: InstId,
        expr: String,
        operands: Option<(&str, &str)>,
    ) -> Result<(), CompileError> {
        let program = self.program;
        let i = program.pool.inst(inst);
        if !self.is_used(inst) && !i.has_associated_pseudo_operation() {
            if i.may_have_side_effects() {
                self.line(format_args!("{expr};"));
            }
            return Ok(());
        }

        let id = self.define_var(inst)?;
        self.line(format_args!("{id} = {expr};"));
        for pseudo in i.associated().iter() {
            if !self.is_used(pseudo) {
                continue;
            }
            let op = program.pool.opcode(pseudo);
            let value = match (op, operands) {
                (Opcode::GetZeroFromOp, _) => format!("{id} == 0u"),
                (Opcode::GetSignFromOp, _) => format!("int({id}) < 0"),
                (Opcode::GetCarryFromOp, Some((a, _))) => format!("{id} < {a}"),
                (Opcode::GetOverflowFromOp, Some((a, b))) => {
                    format!("int(~({a} ^ {b}) & ({a} ^ {id})) < 0")
                }
                // Accesses are assumed to be resident and in bounds.
                (Opcode::GetSparseFromOp | Opcode::GetInBoundsFromOp, _) => "true".to_string(),
                (op, _) => {
                    return Err(logic_error!(
                        "{op:?} is not supported for {:?}",
                        i.opcode()
                    ))
                }
            };
            let pseudo_id = self.define_var(pseudo)?;
            self.line(format_args!("{pseudo_id} = {value};"));
        }
        if !self.is_used(inst) {
            self.pending_free.push(id);
        }
        Ok(())
    }

    /// Mark one use of `value` as emitted without generating an expression.
    pub fn discard_arg(&mut self, value: Value) {
        if let Some(inst) = self.program.pool.resolve_inst(value) {
            if let Some(id) = self.vars[inst.index()] {
                self.consume(inst, id);
            } else {
                let uses = &mut self.remaining_uses[inst.index()];
                *uses = uses.saturating_sub(1);
            }
        }
    }

    /// Allocate the variable for `inst` without writing to it.
    pub fn define_var(&mut self, inst: InstId) -> Result<Id, CompileError> {
        let ty = VarType::from_type(self.program.pool.inst(inst).result_type())?;
        let id = self.reg_alloc.define(ty)?;
        self.vars[inst.index()] = Some(id);
        self.def_loop[inst.index()] = self.current_loop();
        Ok(id)
    }

    pub fn is_used(&self, inst: InstId) -> bool {
        self.remaining_uses[inst.index()] > 0
    }
}

pub(crate) fn f32_literal(v: f32) -> String {
    if v.is_finite() {
        format!("{v:?}")
    } else {
        format!("uintBitsToFloat({:#x}u)", v.to_bits())
    }
}

fn f64_literal(v: f64) -> String {
    if v.is_finite() {
        format!("{v:?}lf")
    } else {
        let bits = v.to_bits();
        format!(
            "packDouble2x32(uvec2({:#x}u, {:#x}u))",
            bits as u32,
            (bits >> 32) as u32
        )
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::ir::{FpControl, IntCompare, IrEmitter, Type};
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
        emit_glsl(
            &Profile::default(),
            &RuntimeInfo::default(),
            program,
            &mut Bindings::default(),
        )
        .unwrap()
    }

    /// The unindented lines of the main function without the closing brace.
    pub fn body(source: &str) -> String {
        let start = source.find("void main() {\n").unwrap() + "void main() {\n".len();
        let end = source.rfind("}\n").unwrap();
        source[start..end]
            .lines()
            .map(|l| format!("{}\n", l.strip_prefix("    ").unwrap_or(l)))
            .collect()
    }

    #[test]
    fn literals() {
        assert_eq!("1.0", f32_literal(1.0));
        assert_eq!("-0.5", f32_literal(-0.5));
        assert_eq!("uintBitsToFloat(0x7f800000u)", f32_literal(f32::INFINITY));
        assert_eq!("2.0lf", f64_literal(2.0));
    }

    #[test]
    fn reuse_variables_after_last_use() {
        let (mut program, block) = single_block(Stage::Compute);
        program.info.constant_buffer_descriptors =
            vec![crate::ir::ConstantBufferDescriptor { index: 0, count: 1 }];

        let mut ir = IrEmitter::new(&mut program.pool, block);
        let a = ir.get_cbuf_f32(Value::U32(0), Value::U32(0x14));
        let b = ir.fp_add(a, Value::F32(1.0), FpControl::default());
        let c = ir.fp_mul(b, b, FpControl::default());
        let bits = ir.bit_cast_to_uint(c);
        ir.write_local(Value::U32(0), bits);

        let mut bindings = Bindings::default();
        let source = emit_glsl(
            &Profile::default(),
            &RuntimeInfo::default(),
            &program,
            &mut bindings,
        )
        .unwrap();

        assert!(source.starts_with("#version 450\n"));
        assert_eq!(
            indoc! {"
                uint u_0;
                float f_0, f_1;
                f_0 = uintBitsToFloat(cs_cbuf0[1].y);
                f_1 = f_0 + 1.0;
                f_0 = f_1 * f_1;
                u_0 = floatBitsToUint(f_0);
                lmem[0u] = u_0;
                return;
            "},
            body(&source)
        );
        assert_eq!(1, bindings.uniform_buffer);
    }

    #[test]
    fn unused_results_are_skipped() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        ir.iadd(lane, Value::U32(1));
        ir.write_local(Value::U32(0), lane);

        assert_eq!(
            indoc! {"
                uint u_0;
                u_0 = gl_SubgroupInvocationID;
                lmem[0u] = u_0;
                return;
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
        let cont = pool.new_block();
        let merge = pool.new_block();
        pool.add_branch(entry, header).unwrap();
        pool.add_branch(header, cont).unwrap();
        pool.add_branch(cont, header).unwrap();
        pool.add_branch(cont, merge).unwrap();

        let phi = pool.create_phi(Type::U32);
        pool.insert_existing(header, 0, phi);
        let mut ir = IrEmitter::new(pool, header);
        let next = ir.iadd(Value::Inst(phi), Value::U32(1));
        let mut ir = IrEmitter::new(pool, cont);
        let less = ir.icompare(IntCompare::LessThan, next, Value::U32(4), false);
        let cond = ir.condition_ref(less);
        let mut ir = IrEmitter::new(pool, merge);
        ir.write_local(Value::U32(0), next);
        pool.add_phi_operand(phi, entry, Value::U32(0)).unwrap();
        pool.add_phi_operand(phi, cont, next).unwrap();

        program.blocks = vec![entry, header, cont, merge];
        program.post_order_blocks = vec![merge, cont, header, entry];
        program.syntax_list = vec![
            SyntaxNode::Block(entry),
            SyntaxNode::Loop {
                body: header,
                continue_block: cont,
                merge,
            },
            SyntaxNode::Block(header),
            SyntaxNode::Block(cont),
            SyntaxNode::Repeat {
                cond,
                loop_header: header,
                merge,
            },
            SyntaxNode::Block(merge),
            SyntaxNode::Return,
        ];

        // The phi variable u_0 is only written on edges into the header.
        assert_eq!(
            indoc! {"
                bool b_0, b_1;
                uint u_0, u_1, u_2;
                u_0 = 0u;
                for (;;) {
                    u_1 = u_0;
                    u_2 = u_1 + 1u;
                    b_0 = u_2 < 4u;
                    b_1 = b_0;
                    u_0 = u_2;
                    if (!b_1) { break; }
                }
                lmem[0u] = u_2;
                return;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn swapped_phis_keep_previous_values() {
        let mut program = Program::new(Stage::Compute);
        let pool = &mut program.pool;
        let entry = pool.new_block();
        let header = pool.new_block();
        let merge = pool.new_block();
        pool.add_branch(entry, header).unwrap();
        pool.add_branch(header, header).unwrap();
        pool.add_branch(header, merge).unwrap();

        let a = pool.create_phi(Type::U32);
        let b = pool.create_phi(Type::U32);
        pool.insert_existing(header, 0, a);
        pool.insert_existing(header, 1, b);
        let mut ir = IrEmitter::new(pool, header);
        let lane = ir.lane_id();
        let done = ir.icompare(IntCompare::Equal, Value::Inst(a), lane, false);
        let cond = ir.condition_ref(done);
        let mut ir = IrEmitter::new(pool, merge);
        ir.write_local(Value::U32(0), Value::Inst(b));
        pool.add_phi_operand(a, entry, Value::U32(1)).unwrap();
        pool.add_phi_operand(a, header, Value::Inst(b)).unwrap();
        pool.add_phi_operand(b, entry, Value::U32(2)).unwrap();
        pool.add_phi_operand(b, header, Value::Inst(a)).unwrap();

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

        let source = emit(&program);
        let body = body(&source);
        assert!(body.contains("    u_0 = u_3;\n    u_1 = u_2;\n"), "{body}");
    }
}
