use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use ignition_config::{BuildConfig, EmulatorConfig, PipelineManifest, Profile};
use ignition_core::pipeline::Pipeline;
use ignition_core::runner::SystemRunner;
use ignition_core::{stage, PipelineError};

const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "ignition",
    version,
    about = "Ignition embedded build & launch pipeline",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cross-compile the firmware artifact
    Build(PipelineArgs),
    /// Launch an already-built kernel image under the emulator
    Launch(PipelineArgs),
    /// Build the firmware, then launch it under the emulator
    Run(PipelineArgs),
    /// Check that the required host tools are available
    Doctor(PipelineArgs),
}

impl Commands {
    fn args(&self) -> &PipelineArgs {
        match self {
            Commands::Build(args)
            | Commands::Launch(args)
            | Commands::Run(args)
            | Commands::Doctor(args) => args,
        }
    }
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Path to a pipeline manifest (YAML)
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Cross-compilation target triple
    #[arg(long, env = "TARGET")]
    target: Option<String>,

    /// Name of the binary artifact to build and launch
    #[arg(short = 'p', long, env = "PROJECT_NAME")]
    project_name: Option<String>,

    /// Build without optimizations (debug profile)
    #[arg(long)]
    debug: bool,

    /// Root of the build output tree
    #[arg(long, default_value = "target")]
    build_root: PathBuf,

    /// Directory the build tool runs in
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Override the build tool
    #[arg(long)]
    build_command: Option<String>,

    /// Override the emulator binary
    #[arg(long)]
    emulator: Option<String>,

    /// Launch this kernel image instead of the derived artifact path
    /// (launch only)
    #[arg(short = 'k', long)]
    kernel: Option<PathBuf>,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable debug-level execution tracing
    #[arg(short, long)]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.command.args().trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            EXIT_CONFIG_ERROR
        }
    };
    process::exit(code);
}

fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Build(args) => build(&args),
        Commands::Launch(args) => launch(&args),
        Commands::Run(args) => run(&args),
        Commands::Doctor(args) => doctor(&args),
    }
}

/// Layered resolution: defaults, then the manifest, then flags/environment.
fn resolve_config(
    args: &PipelineArgs,
    require_project: bool,
) -> Result<(BuildConfig, EmulatorConfig)> {
    let manifest = match args.manifest {
        Some(ref path) => {
            info!("Loading pipeline manifest: {:?}", path);
            PipelineManifest::from_file(path)?
        }
        None => PipelineManifest::default(),
    };

    let mut build = manifest.build;
    let mut emulator = manifest.emulator;

    if let Some(ref target) = args.target {
        build.target = target.clone();
    }
    if let Some(ref name) = args.project_name {
        build.project_name = name.clone();
    }
    if args.debug {
        build.profile = Profile::Debug;
    }
    if let Some(ref dir) = args.project_dir {
        build.project_dir = Some(dir.clone());
    }
    if let Some(ref command) = args.build_command {
        build.command = command.clone();
    }
    if let Some(ref command) = args.emulator {
        emulator.command = command.clone();
    }

    if require_project && build.project_name.trim().is_empty() {
        bail!("project name not set: pass --project-name, set PROJECT_NAME, or add it to the manifest");
    }

    Ok((build, emulator))
}

fn effective_build_root(args: &PipelineArgs, build: &BuildConfig) -> PathBuf {
    match build.project_dir {
        Some(ref dir) if args.build_root.is_relative() => dir.join(&args.build_root),
        _ => args.build_root.clone(),
    }
}

fn resolve_kernel(args: &PipelineArgs, build: &BuildConfig) -> PathBuf {
    args.kernel
        .clone()
        .unwrap_or_else(|| build.artifact_path(&effective_build_root(args, build)))
}

fn execute(pipeline: &Pipeline) -> i32 {
    let mut runner = SystemRunner;
    match pipeline.execute(&mut runner) {
        Ok(status) => status.code().unwrap_or(0),
        Err(err) => {
            error!("{}", err);
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &PipelineError) -> i32 {
    match err {
        PipelineError::StageFailed {
            code: Some(code), ..
        } => *code,
        PipelineError::StageFailed { code: None, .. } => EXIT_FAILURE,
        PipelineError::Spawn { .. }
        | PipelineError::MissingInput { .. }
        | PipelineError::Io { .. }
        | PipelineError::ImageTooLarge { .. } => EXIT_CONFIG_ERROR,
    }
}

fn build(args: &PipelineArgs) -> Result<i32> {
    let (build, emulator) = resolve_config(args, true)?;
    let artifact = build.artifact_path(&effective_build_root(args, &build));

    info!(
        "Building '{}' for {} ({} profile)",
        build.project_name, build.target, build.profile
    );

    let pipeline = Pipeline::new().step(stage::build_step(&build));
    let code = execute(&pipeline);

    if code == 0 {
        info!("Artifact ready: {}", artifact.display());
    }
    write_report(args, code, &build, &emulator, &artifact)?;
    Ok(code)
}

fn launch(args: &PipelineArgs) -> Result<i32> {
    let (build, emulator) = resolve_config(args, args.kernel.is_none())?;
    let kernel = resolve_kernel(args, &build);
    let flash_limit = emulator.flash_limit_bytes()?;

    info!(
        "Launching {} under {} ({} / {})",
        kernel.display(),
        emulator.command,
        emulator.cpu,
        emulator.machine
    );

    let pipeline = stage::launch_pipeline(&emulator, &kernel, flash_limit);
    Ok(execute(&pipeline))
}

fn run(args: &PipelineArgs) -> Result<i32> {
    let (build, emulator) = resolve_config(args, true)?;
    let build_root = effective_build_root(args, &build);
    let artifact = build.artifact_path(&build_root);
    let flash_limit = emulator.flash_limit_bytes()?;

    info!(
        "Building '{}' for {} ({} profile), then launching under {}",
        build.project_name, build.target, build.profile, emulator.command
    );

    let pipeline = stage::run_pipeline(&build, &emulator, &build_root, flash_limit);
    let code = execute(&pipeline);

    write_report(args, code, &build, &emulator, &artifact)?;
    Ok(code)
}

fn doctor(args: &PipelineArgs) -> Result<i32> {
    let (build, emulator) = resolve_config(args, false)?;

    println!("=== Ignition Doctor ===");
    println!();
    println!("Ignition version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("--- Host Tools ---");
    print_tool_status(&build.command, "--version");
    print_tool_status(&emulator.command, "--version");
    println!();

    println!("--- Pipeline Configuration ---");
    match args.manifest {
        Some(ref path) => println!("  manifest: {}", path.display()),
        None => println!("  manifest: (defaults)"),
    }
    println!("  target:   {}", build.target);
    println!("  profile:  {}", build.profile);
    if build.project_name.is_empty() {
        println!("  project:  (not set)");
    } else {
        println!("  project:  {}", build.project_name);
        println!(
            "  artifact: {}",
            build
                .artifact_path(&effective_build_root(args, &build))
                .display()
        );
    }
    println!(
        "  emulator: {} ({} / {})",
        emulator.command, emulator.cpu, emulator.machine
    );

    Ok(0)
}

fn print_tool_status(name: &str, arg: &str) {
    match Command::new(name).arg(arg).output() {
        Ok(output) => {
            let version = String::from_utf8_lossy(&output.stdout);
            let first_line = version.lines().next().unwrap_or("(unknown version)");
            println!("  {name}: {first_line}");
        }
        Err(_) => {
            println!("  {name}: not found");
        }
    }
}

#[derive(Serialize)]
struct RunReport {
    status: &'static str,
    exit_code: i32,
    config: ConfigEcho,
    artifact: Option<ArtifactReport>,
}

#[derive(Serialize)]
struct ConfigEcho {
    target: String,
    profile: String,
    project_name: String,
    cpu: String,
    machine: String,
}

#[derive(Serialize)]
struct ArtifactReport {
    path: String,
    size_bytes: u64,
    sha256: String,
    entry_point: Option<u64>,
}

fn artifact_report(path: &Path) -> Option<ArtifactReport> {
    let image = ignition_image::inspect(path).ok()?;
    let sha256 = ignition_image::sha256_hex(path).ok()?;
    Some(ArtifactReport {
        path: path.display().to_string(),
        size_bytes: image.size_bytes,
        sha256,
        entry_point: image.elf.map(|elf| elf.entry_point),
    })
}

fn write_report(
    args: &PipelineArgs,
    exit_code: i32,
    build: &BuildConfig,
    emulator: &EmulatorConfig,
    artifact: &Path,
) -> Result<()> {
    let Some(ref path) = args.report else {
        return Ok(());
    };

    let report = RunReport {
        status: if exit_code == 0 { "pass" } else { "fail" },
        exit_code,
        config: ConfigEcho {
            target: build.target.clone(),
            profile: build.profile.to_string(),
            project_name: build.project_name.clone(),
            cpu: emulator.cpu.clone(),
            machine: emulator.machine.clone(),
        },
        artifact: artifact_report(artifact),
    };

    let json = serde_json::to_string_pretty(&report).context("serializing run report")?;
    fs::write(path, json).with_context(|| format!("writing run report to {:?}", path))?;
    info!("Run report written to {}", path.display());
    Ok(())
}
