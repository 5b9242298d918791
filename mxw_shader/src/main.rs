use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use mxw_lib::cache::PipelineCacheFile;
use mxw_lib::environment::EnvironmentBlob;
use mxw_lib::Stage;
use mxw_shader::backend::Bindings;
use mxw_shader::environment::FileEnvironment;
use mxw_shader::frontend::{merge_dual_vertex_programs, translate_program};
use mxw_shader::profile::{Profile, RuntimeInfo};
use mxw_shader::{emit_code, Backend};
use rayon::prelude::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print debug logs for each translation step.
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a single shader environment file.
    Translate {
        /// The serialized shader environment.
        input: String,
        /// The output shader code file.
        output: String,
        #[arg(long, value_enum, default_value_t = Target::Glsl)]
        backend: Target,
        /// The first half of a dual vertex program to run before the input program.
        #[arg(long)]
        vertex_a: Option<String>,
        /// Write the program info with descriptors as JSON.
        #[arg(long)]
        info: Option<String>,
        /// Write the optimized IR next to the output.
        #[arg(long)]
        ir: bool,
        /// The SPIR-V minor version for the 1.x target.
        #[arg(long, default_value_t = 3)]
        spirv_minor: u8,
    },
    /// Translate every .env file in a folder recursively.
    Batch {
        input_folder: String,
        output_folder: String,
        #[arg(long, value_enum, default_value_t = Target::Glsl)]
        backend: Target,
        #[arg(long, default_value_t = 3)]
        spirv_minor: u8,
    },
    /// Print the records of a pipeline cache file.
    Cache {
        /// The pipeline cache file.
        input: String,
        /// Extract each environment as a .env file into this folder.
        #[arg(long)]
        extract: Option<String>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Target {
    Glsl,
    Glasm,
    Spirv,
}

impl Target {
    fn backend(self) -> Backend {
        match self {
            Target::Glsl => Backend::Glsl,
            Target::Glasm => Backend::Glasm,
            Target::Spirv => Backend::Spirv,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Target::Glsl => "glsl",
            Target::Glasm => "glasm",
            Target::Spirv => "spv",
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .unwrap();

    #[cfg(feature = "trace-spans")]
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .finish(),
    )
    .unwrap();

    let start = std::time::Instant::now();
    match cli.command {
        Commands::Translate {
            input,
            output,
            backend,
            vertex_a,
            info,
            ir,
            spirv_minor,
        } => {
            let profile = profile(spirv_minor);
            let files = TranslateFiles {
                input: Path::new(&input),
                vertex_a: vertex_a.as_deref().map(Path::new),
                output: Path::new(&output),
                info: info.as_deref().map(Path::new),
                ir,
            };
            if let Err(e) = translate_file(&files, backend, &profile) {
                error!("Error translating {input:?}: {e:?}");
            }
        }
        Commands::Batch {
            input_folder,
            output_folder,
            backend,
            spirv_minor,
        } => batch_translate(&input_folder, &output_folder, backend, &profile(spirv_minor)),
        Commands::Cache { input, extract } => {
            let cache = PipelineCacheFile::from_file(&input).unwrap();
            print_cache(&cache);
            if let Some(folder) = extract {
                extract_environments(&cache, Path::new(&folder));
            }
        }
    }

    println!("Finished in {:?}", start.elapsed());
}

fn profile(spirv_minor: u8) -> Profile {
    Profile {
        supported_spirv: 0x00010000 | ((spirv_minor as u32) << 8),
        ..Default::default()
    }
}

struct TranslateFiles<'a> {
    input: &'a Path,
    vertex_a: Option<&'a Path>,
    output: &'a Path,
    info: Option<&'a Path>,
    ir: bool,
}

fn translate_file(files: &TranslateFiles, target: Target, profile: &Profile) -> Result<()> {
    let blob = EnvironmentBlob::from_file(files.input)
        .with_context(|| format!("failed to read {:?}", files.input))?;
    let mut env = FileEnvironment::new(blob);
    let mut program = translate_program(&mut env, profile)?;

    if let Some(path) = files.vertex_a {
        let blob = EnvironmentBlob::from_file(path)
            .with_context(|| format!("failed to read {path:?}"))?;
        let mut env_a = FileEnvironment::new(blob);
        let vertex_a = translate_program(&mut env_a, profile)?;
        program = merge_dual_vertex_programs(vertex_a, program, &mut env)?;
    }

    if files.ir {
        std::fs::write(files.output.with_extension("ir"), program.dump())?;
    }
    if let Some(path) = files.info {
        let json = serde_json::to_string_pretty(&program.info)?;
        std::fs::write(path, json)?;
    }

    let code = emit_code(
        target.backend(),
        profile,
        &RuntimeInfo::default(),
        &program,
        &mut Bindings::default(),
    )?;
    std::fs::write(files.output, code.to_bytes())?;
    info!("Translated {:?} to {:?}", files.input, files.output);
    Ok(())
}

fn batch_translate(input: &str, output: &str, target: Target, profile: &Profile) {
    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    globwalk::GlobWalkerBuilder::from_patterns(input, &["*.env"])
        .build()
        .unwrap()
        .par_bridge()
        .for_each(|entry| {
            let path = entry.as_ref().unwrap().path();

            // Keep the folder structure of the input to avoid name collisions.
            let relative = path.strip_prefix(input).unwrap_or(path);
            let output_path = Path::new(output)
                .join(relative)
                .with_extension(target.extension());
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }

            let files = TranslateFiles {
                input: path,
                vertex_a: None,
                output: &output_path,
                info: None,
                ir: false,
            };
            match translate_file(&files, target, profile) {
                Ok(()) => {
                    succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!("Error translating {path:?}: {e:?}");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

    println!(
        "Translated {} programs with {} errors",
        succeeded.into_inner(),
        failed.into_inner()
    );
}

fn print_cache(cache: &PipelineCacheFile) {
    println!("Version {}", cache.version);
    for (i, record) in cache.records.iter().enumerate() {
        let hash = mxw_lib::hash::hash_bytes(&record.key);
        let stages: Vec<Stage> = record.environments.iter().map(|e| e.stage).collect();
        println!(
            "{i}: {:?} {hash:016x} {} bytes {stages:?}",
            record.kind,
            record.key.len()
        );
    }
}

fn extract_environments(cache: &PipelineCacheFile, folder: &Path) {
    std::fs::create_dir_all(folder).unwrap();
    for (i, record) in cache.records.iter().enumerate() {
        for environment in &record.environments {
            let name = format!("{i}.{:?}.env", environment.stage);
            let path: PathBuf = folder.join(name);
            environment.save(&path).unwrap();
        }
    }
}
