//! Maps configuration onto the concrete builder / preflight / launcher steps.

use std::path::Path;

use ignition_config::{BuildConfig, EmulatorConfig, Profile};

use crate::pipeline::{Invocation, Pipeline, Step};

pub const BUILD_STAGE: &str = "build";
pub const PREFLIGHT_STAGE: &str = "preflight";
pub const LAUNCH_STAGE: &str = "launch";

/// Cross-compilation step: `<command> build [--release] --target <triple>`,
/// run in the configured project directory.
pub fn build_step(config: &BuildConfig) -> Step {
    let mut invocation = Invocation::new(&config.command).arg("build");
    if config.profile == Profile::Release {
        invocation = invocation.arg("--release");
    }
    invocation = invocation.args(["--target", config.target.as_str()]);
    if let Some(ref dir) = config.project_dir {
        invocation = invocation.current_dir(dir);
    }
    Step::command(BUILD_STAGE, invocation)
}

/// Kernel-image validation between build and launch.
pub fn preflight_step(kernel: &Path, flash_limit: Option<u64>) -> Step {
    Step::inspect_image(PREFLIGHT_STAGE, kernel, flash_limit)
}

/// Emulator step. The kernel path is a required input so a missing
/// artifact aborts before the emulator is ever invoked.
pub fn launch_step(config: &EmulatorConfig, kernel: &Path) -> Step {
    let mut invocation = Invocation::new(&config.command)
        .args(["-cpu", config.cpu.as_str()])
        .args(["-machine", config.machine.as_str()]);
    if !config.graphics {
        invocation = invocation.arg("-nographic");
    }
    if config.semihosting.enabled {
        let semihosting = config.semihosting.config_arg();
        invocation = invocation.args(["-semihosting-config", semihosting.as_str()]);
    }
    let kernel_arg = kernel.display().to_string();
    invocation = invocation.args(["-kernel", kernel_arg.as_str()]);
    Step::command(LAUNCH_STAGE, invocation).requires(kernel)
}

/// The full pipeline: build, preflight, launch.
pub fn run_pipeline(
    build: &BuildConfig,
    emulator: &EmulatorConfig,
    build_root: &Path,
    flash_limit: Option<u64>,
) -> Pipeline {
    let artifact = build.artifact_path(build_root);
    Pipeline::new()
        .step(build_step(build))
        .step(preflight_step(&artifact, flash_limit))
        .step(launch_step(emulator, &artifact))
}

/// Launch an already-built kernel image: preflight, launch.
pub fn launch_pipeline(
    emulator: &EmulatorConfig,
    kernel: &Path,
    flash_limit: Option<u64>,
) -> Pipeline {
    Pipeline::new()
        .step(preflight_step(kernel, flash_limit))
        .step(launch_step(emulator, kernel))
}
