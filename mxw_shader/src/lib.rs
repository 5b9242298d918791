//! A recompiler for Maxwell GPU shader programs.
//!
//! Guest programs are read through an [Environment](environment::Environment),
//! translated into the SSA [ir] by the [frontend], optimized by the [passes],
//! and finally emitted as GLSL, GLASM, or SPIR-V by one of the [backend] modules.
//!
//! ```rust no_run
//! use mxw_shader::environment::FileEnvironment;
//! use mxw_shader::profile::{Profile, RuntimeInfo};
//! use mxw_shader::{backend::Bindings, frontend::translate_program, Backend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let blob = mxw_lib::environment::EnvironmentBlob::from_file("fragment.env")?;
//! let mut env = FileEnvironment::new(blob);
//!
//! let profile = Profile::default();
//! let program = translate_program(&mut env, &profile)?;
//! let code = mxw_shader::emit_code(
//!     Backend::Glsl,
//!     &profile,
//!     &RuntimeInfo::default(),
//!     &program,
//!     &mut Bindings::default(),
//! )?;
//! println!("{}", code.to_text());
//! # Ok(())
//! # }
//! ```
//!
//! Unsupported guest instructions and IR opcodes are errors rather than silently
//! producing incorrect code. See [CompileError](error::CompileError).
use backend::Bindings;
use error::CompileError;
use ir::Program;
use profile::{Profile, RuntimeInfo};

pub mod backend;
pub mod environment;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod passes;
pub mod profile;

/// The target language for emitted shader code.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Backend {
    Glsl,
    Glasm,
    Spirv,
}

/// The output of a [Backend].
#[derive(Debug, PartialEq, Clone)]
pub enum ShaderCode {
    Glsl(String),
    Glasm(String),
    /// SPIR-V words including the module header.
    Spirv(Vec<u32>),
}

impl ShaderCode {
    /// The file contents for the code with SPIR-V as little endian words.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ShaderCode::Glsl(source) | ShaderCode::Glasm(source) => source.as_bytes().to_vec(),
            ShaderCode::Spirv(words) => words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        }
    }

    /// The source text or a disassembly for SPIR-V.
    pub fn to_text(&self) -> String {
        match self {
            ShaderCode::Glsl(source) | ShaderCode::Glasm(source) => source.clone(),
            ShaderCode::Spirv(words) => match rspirv::dr::load_words(words) {
                Ok(module) => {
                    use rspirv::binary::Disassemble;
                    module.disassemble()
                }
                Err(e) => format!("; invalid module: {e}"),
            },
        }
    }
}

/// Emit code for an optimized `program` with `backend`.
///
/// `bindings` is advanced past the resources of `program`,
/// so later stages of the same pipeline use the following binding slots.
pub fn emit_code(
    backend: Backend,
    profile: &Profile,
    runtime_info: &RuntimeInfo,
    program: &Program,
    bindings: &mut Bindings,
) -> Result<ShaderCode, CompileError> {
    match backend {
        Backend::Glsl => {
            backend::glsl::emit_glsl(profile, runtime_info, program, bindings).map(ShaderCode::Glsl)
        }
        Backend::Glasm => backend::glasm::emit_glasm(profile, runtime_info, program, bindings)
            .map(ShaderCode::Glasm),
        Backend::Spirv => backend::spirv::emit_spirv(profile, runtime_info, program, bindings)
            .map(ShaderCode::Spirv),
    }
}
