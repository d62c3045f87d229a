//! Script materialisation for Windows builds.
//!
//! Each user command becomes one PowerShell script with a fixed safety
//! header; all scripts share one environment file. Output is a pure
//! function of the job ID, the command list, the environment and the
//! instance layout, so rendering twice yields byte-identical files.

use thiserror::Error;

use crate::exec::Env;
use crate::job::is_valid_env_name;
use crate::remote::powershell_quote;

use crate::platform::image::{is_valid_image_reference, split_step_image};

/// Working directory of build containers.
pub const CONTAINER_WORKSPACE: &str = r"C:\workspace";
/// Script directory inside build containers.
pub const CONTAINER_SCRIPTS: &str = r"C:\build-scripts";
/// Name of the shared environment file.
pub const ENV_FILE_NAME: &str = "hal-env.ps1";

/// Per-job directories on the Windows instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceLayout {
    job_dir: String,
}

impl InstanceLayout {
    /// Lays out `<base_path>\<job_id>`.
    #[must_use]
    pub fn new(base_path: &str, job_id: &str) -> Self {
        Self {
            job_dir: format!("{}\\{job_id}", base_path.trim_end_matches(['\\', '/'])),
        }
    }

    /// Root directory of the job.
    #[must_use]
    pub fn job_dir(&self) -> &str {
        &self.job_dir
    }

    /// Directory holding the workspace a container starts from.
    #[must_use]
    pub fn input_dir(&self) -> String {
        format!("{}\\input", self.job_dir)
    }

    /// Directory receiving the workspace a container produced.
    #[must_use]
    pub fn output_dir(&self) -> String {
        format!("{}\\output", self.job_dir)
    }

    /// Directory holding generated scripts.
    #[must_use]
    pub fn scripts_dir(&self) -> String {
        format!("{}\\scripts", self.job_dir)
    }
}

/// Where generated scripts execute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptTarget {
    /// Inside a build container.
    Container,
    /// Directly on the instance.
    Instance,
}

/// Named parameters of one rendered script.
#[derive(Clone, Copy, Debug)]
pub struct ScriptTemplate<'s> {
    /// User command, inserted verbatim.
    pub command: &'s str,
    /// Environment file to dot-source, if any.
    pub env_file_path: Option<&'s str>,
    /// Path the script is executed from, recorded in its header.
    pub script_path: &'s str,
    /// Directory the command runs in.
    pub working_dir: &'s str,
}

impl ScriptTemplate<'_> {
    /// Renders the script body.
    #[must_use]
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("# hal-agent build step {}", self.script_path),
            String::from("$ErrorActionPreference = 'Stop'"),
            String::from("trap { Write-Error $_; exit 1 }"),
            format!("Set-Location -LiteralPath {}", powershell_quote(self.working_dir)),
        ];
        if let Some(env_file) = self.env_file_path {
            let quoted = powershell_quote(env_file);
            lines.push(format!("if (Test-Path -LiteralPath {quoted}) {{ . {quoted} }}"));
        }
        lines.push(self.command.to_owned());
        lines.push(String::from("if ($LASTEXITCODE) { exit $LASTEXITCODE }"));
        lines.push(String::from("exit 0"));
        let mut body = lines.join("\r\n");
        body.push_str("\r\n");
        body
    }
}

/// One materialised script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratedScript {
    /// Original command text.
    pub command: String,
    /// Rendered script body.
    pub body: String,
    /// File name, unique per container and step.
    pub file_name: String,
    /// Path on the instance.
    pub instance_path: String,
    /// Path the script is executed from.
    pub run_path: String,
}

/// Consecutive commands sharing one image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlannedJob {
    /// Image reference.
    pub image: String,
    /// Commands, with any image override token removed.
    pub commands: Vec<String>,
}

/// Scripts for one container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerJob {
    /// Image reference.
    pub image: String,
    /// Scripts, in execution order.
    pub scripts: Vec<GeneratedScript>,
}

/// A generated file other than a step script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratedFile {
    /// Path on the instance.
    pub instance_path: String,
    /// File contents.
    pub body: String,
}

/// Every file a build needs on the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Materialized {
    /// Container jobs in order. Native builds have exactly one.
    pub jobs: Vec<ContainerJob>,
    /// The shared environment file.
    pub env_file: GeneratedFile,
}

impl Materialized {
    /// Every file to write, environment file first.
    #[must_use]
    pub fn files(&self) -> Vec<(&str, &str)> {
        let mut files = vec![(
            self.env_file.instance_path.as_str(),
            self.env_file.body.as_str(),
        )];
        files.extend(self.jobs.iter().flat_map(|job| {
            job.scripts
                .iter()
                .map(|script| (script.instance_path.as_str(), script.body.as_str()))
        }));
        files
    }

    /// Total number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|job| job.scripts.len()).sum()
    }
}

/// Groups `commands` into container jobs.
///
/// A step may start with `docker:<ref>` to run in a different image than
/// `default_image`; consecutive steps with the same image share a container.
///
/// # Errors
///
/// Returns [`ScriptError::InvalidImage`] for malformed references and
/// [`ScriptError::EmptyCommand`] for steps with nothing to run.
pub fn plan_jobs(default_image: &str, commands: &[String]) -> Result<Vec<PlannedJob>, ScriptError> {
    let mut jobs: Vec<PlannedJob> = Vec::new();
    for (index, raw) in commands.iter().enumerate() {
        let (override_image, command) = split_step_image(raw);
        let image = override_image.unwrap_or(default_image);
        if !is_valid_image_reference(image) {
            return Err(ScriptError::InvalidImage {
                reference: image.to_owned(),
            });
        }
        if command.trim().is_empty() {
            return Err(ScriptError::EmptyCommand { step: index + 1 });
        }
        match jobs.last_mut() {
            Some(job) if job.image == image => job.commands.push(command.to_owned()),
            _ => jobs.push(PlannedJob {
                image: image.to_owned(),
                commands: vec![command.to_owned()],
            }),
        }
    }
    Ok(jobs)
}

/// Renders the scripts and environment file for `plan`.
///
/// # Errors
///
/// Returns [`ScriptError::InvalidEnvName`] when an environment variable
/// cannot be assigned in PowerShell.
pub fn materialize(
    plan: &[PlannedJob],
    env: &Env,
    layout: &InstanceLayout,
    target: ScriptTarget,
) -> Result<Materialized, ScriptError> {
    let scripts_dir = layout.scripts_dir();
    let input_dir = layout.input_dir();
    let (run_dir, working_dir) = match target {
        ScriptTarget::Container => (CONTAINER_SCRIPTS, CONTAINER_WORKSPACE),
        ScriptTarget::Instance => (scripts_dir.as_str(), input_dir.as_str()),
    };
    let env_run_path = format!("{run_dir}\\{ENV_FILE_NAME}");

    let jobs = plan
        .iter()
        .enumerate()
        .map(|(job_index, job)| ContainerJob {
            image: job.image.clone(),
            scripts: job
                .commands
                .iter()
                .enumerate()
                .map(|(step_index, command)| {
                    let file_name = format!("hal-{job_index}-{step_index}.ps1");
                    let run_path = format!("{run_dir}\\{file_name}");
                    let body = ScriptTemplate {
                        command,
                        env_file_path: Some(&env_run_path),
                        script_path: &run_path,
                        working_dir,
                    }
                    .render();
                    GeneratedScript {
                        command: command.clone(),
                        body,
                        instance_path: format!("{scripts_dir}\\{file_name}"),
                        file_name,
                        run_path,
                    }
                })
                .collect(),
        })
        .collect();

    Ok(Materialized {
        jobs,
        env_file: GeneratedFile {
            instance_path: format!("{scripts_dir}\\{ENV_FILE_NAME}"),
            body: render_env_file(env)?,
        },
    })
}

/// Renders `$env:NAME = 'value'` assignments, one per line.
///
/// # Errors
///
/// Returns [`ScriptError::InvalidEnvName`] for names PowerShell cannot
/// assign without quoting.
pub fn render_env_file(env: &Env) -> Result<String, ScriptError> {
    let mut body = String::from("# hal-agent environment\r\n");
    for (name, value) in env {
        if !is_valid_env_name(name) {
            return Err(ScriptError::InvalidEnvName { name: name.clone() });
        }
        body.push_str(&format!("$env:{name} = {}\r\n", powershell_quote(value)));
    }
    Ok(body)
}

/// Errors raised while planning or rendering scripts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptError {
    /// An image reference is malformed.
    #[error("invalid Docker image reference {reference:?}")]
    InvalidImage {
        /// Offending reference.
        reference: String,
    },
    /// A step has no command after its image override.
    #[error("step {step} has no command")]
    EmptyCommand {
        /// One-based step number.
        step: usize,
    },
    /// An environment variable name is unusable.
    #[error("invalid environment variable name {name:?}")]
    InvalidEnvName {
        /// Offending name.
        name: String,
    },
}

