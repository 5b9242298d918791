use hexlit::hex;
use mxw_lib::environment::EnvironmentBlob;
use mxw_lib::header::ProgramHeader;
use mxw_lib::Stage;
use mxw_shader::backend::Bindings;
use mxw_shader::environment::FileEnvironment;
use mxw_shader::error::CompileError;
use mxw_shader::frontend::translate_program;
use mxw_shader::profile::{Profile, RuntimeInfo};
use mxw_shader::{emit_code, Backend, ShaderCode};

const SCHED_WORD: u64 = 0x001f8000fc0007e0;
// MOV32I R0, 0x3f800000
const MOV32I: u64 = 0x0103f80000070000;
const EXIT: u64 = 0xe30000000007000f;

fn environment(stage: Stage, sph: ProgramHeader, code: Vec<u64>) -> FileEnvironment {
    FileEnvironment::new(EnvironmentBlob {
        stage,
        start_address: 0,
        read_lowest: 0,
        texture_bound: 1,
        local_memory_size: 0,
        shared_memory_size: 0,
        workgroup_size: [64, 1, 1],
        sph,
        code,
        cbuf_values: Vec::new(),
        texture_types: Vec::new(),
    })
}

fn empty_sph() -> ProgramHeader {
    ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap()
}

fn fragment_sph() -> ProgramHeader {
    // Render target 0 with all components written.
    let mut bytes = [0u8; 0x50];
    bytes[0x48..0x4c].copy_from_slice(&hex!("0f000000"));
    ProgramHeader::from_bytes(&bytes).unwrap()
}

fn compile(backend: Backend, stage: Stage, sph: ProgramHeader, code: Vec<u64>) -> ShaderCode {
    let profile = Profile {
        supported_spirv: 0x00010300,
        ..Default::default()
    };
    let mut env = environment(stage, sph, code);
    let program = translate_program(&mut env, &profile).unwrap();
    emit_code(
        backend,
        &profile,
        &RuntimeInfo::default(),
        &program,
        &mut Bindings::default(),
    )
    .unwrap()
}

#[test]
fn compute_to_glsl() {
    let code = compile(
        Backend::Glsl,
        Stage::Compute,
        empty_sph(),
        vec![SCHED_WORD, MOV32I, EXIT],
    );
    let source = code.to_text();
    assert!(source.starts_with("#version 450\n"));
    assert!(source.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"));
    assert!(source.contains("void main() {"));
}

#[test]
fn compute_to_glasm() {
    let code = compile(
        Backend::Glasm,
        Stage::Compute,
        empty_sph(),
        vec![SCHED_WORD, MOV32I, EXIT],
    );
    let source = code.to_text();
    assert!(source.contains("main:\n"));
    assert!(source.ends_with("END\n"));
}

#[test]
fn compute_to_spirv() {
    let code = compile(
        Backend::Spirv,
        Stage::Compute,
        empty_sph(),
        vec![SCHED_WORD, MOV32I, EXIT],
    );
    let ShaderCode::Spirv(words) = &code else {
        panic!("expected SPIR-V");
    };
    assert_eq!(0x07230203, words[0]);
    assert_eq!(0x00010300, words[1]);
    assert_eq!(&hex!("03022307"), &code.to_bytes()[..4]);
    assert!(code.to_text().contains("OpEntryPoint GLCompute"));
}

#[test]
fn fragment_outputs_are_declared() {
    let glsl = compile(
        Backend::Glsl,
        Stage::Fragment,
        fragment_sph(),
        vec![SCHED_WORD, MOV32I, EXIT],
    );
    assert!(glsl.to_text().contains("out vec4 frag_color0;"));

    let spirv = compile(
        Backend::Spirv,
        Stage::Fragment,
        fragment_sph(),
        vec![SCHED_WORD, MOV32I, EXIT],
    );
    let text = spirv.to_text();
    assert!(text.contains("OpEntryPoint Fragment"));
    assert!(text.contains("OriginUpperLeft"));
}

#[test]
fn environment_file_round_trip() {
    let env = environment(Stage::Compute, empty_sph(), vec![SCHED_WORD, MOV32I, EXIT]);
    let bytes = env.blob().to_bytes().unwrap();
    assert_eq!(b"MXEN", &bytes[..4]);

    let blob: EnvironmentBlob = mxw_lib::read_le(&bytes).unwrap();
    let mut env = FileEnvironment::new(blob);
    assert!(translate_program(&mut env, &Profile::default()).is_ok());
}

#[test]
fn missing_exit_reads_out_of_bounds() {
    let mut env = environment(Stage::Compute, empty_sph(), vec![SCHED_WORD, MOV32I]);
    let result = translate_program(&mut env, &Profile::default());
    assert!(matches!(result, Err(CompileError::Runtime(_))));
}
