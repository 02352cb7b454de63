use std::fmt;
use std::path::PathBuf;

use tracing::info;

use crate::runner::{ProcessRunner, RunStatus};
use crate::{PipelineError, PipelineResult};

/// External command: program, arguments, optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What a step does when it runs.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Spawn an external command and wait for it.
    Command(Invocation),
    /// Validate a kernel image on disk before later stages consume it.
    InspectImage {
        path: PathBuf,
        flash_limit: Option<u64>,
    },
}

#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    /// Paths that must exist before the step may run.
    pub requires: Vec<PathBuf>,
}

impl Step {
    pub fn command(name: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Command(invocation),
            requires: Vec::new(),
        }
    }

    pub fn inspect_image(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        flash_limit: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            action: StepAction::InspectImage {
                path: path.into(),
                flash_limit,
            },
            requires: Vec::new(),
        }
    }

    pub fn requires(mut self, path: impl Into<PathBuf>) -> Self {
        self.requires.push(path.into());
        self
    }
}

/// Ordered steps with a required-success policy: the first failure aborts
/// the whole pipeline, and later steps are never attempted.
#[derive(Debug, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step in order. Returns the final step's exit status; an
    /// empty pipeline reports success.
    pub fn execute(&self, runner: &mut dyn ProcessRunner) -> PipelineResult<RunStatus> {
        let mut last = RunStatus::ok();

        for step in &self.steps {
            for path in &step.requires {
                if !path.exists() {
                    return Err(PipelineError::MissingInput {
                        stage: step.name.clone(),
                        path: path.clone(),
                    });
                }
            }

            last = match &step.action {
                StepAction::Command(invocation) => {
                    info!("[{}] {}", step.name, invocation);
                    let status =
                        runner
                            .run(invocation)
                            .map_err(|source| PipelineError::Spawn {
                                stage: step.name.clone(),
                                program: invocation.program.clone(),
                                source,
                            })?;
                    if !status.success() {
                        return Err(PipelineError::StageFailed {
                            stage: step.name.clone(),
                            code: status.code(),
                        });
                    }
                    status
                }
                StepAction::InspectImage { path, flash_limit } => {
                    let image = ignition_image::inspect(path).map_err(|source| {
                        if source.kind() == std::io::ErrorKind::NotFound {
                            PipelineError::MissingInput {
                                stage: step.name.clone(),
                                path: path.clone(),
                            }
                        } else {
                            PipelineError::Io {
                                stage: step.name.clone(),
                                source,
                            }
                        }
                    })?;

                    if let Some(limit) = *flash_limit {
                        if image.size_bytes > limit {
                            return Err(PipelineError::ImageTooLarge {
                                path: path.clone(),
                                size: image.size_bytes,
                                limit,
                            });
                        }
                    }

                    match image.elf {
                        Some(ref elf) => info!(
                            "[{}] kernel image: entry point {:#x}, {} loadable bytes, {} on disk",
                            step.name, elf.entry_point, elf.loadable_bytes, image.size_bytes
                        ),
                        None => info!(
                            "[{}] kernel image: {} bytes on disk",
                            step.name, image.size_bytes
                        ),
                    }

                    RunStatus::ok()
                }
            };
        }

        Ok(last)
    }
}
