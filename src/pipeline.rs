//! Drives the external code generator and build tool.
//!
//! Both tools are treated as black boxes: the driver hands them their
//! arguments, passes whatever they print through to the log, and judges the
//! outcome by exit status alone. There are no retries; one failed invocation
//! fails the whole transaction.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{Settings, ToolSettings};
use crate::error::{CompositionError, Result};
use crate::schema::CellType;
use crate::transaction::{CancelToken, Stage};

// ------------- Build Descriptor -------------
pub const DESCRIPTOR_FILE: &str = "Cargo.toml";

const DESCRIPTOR_TEMPLATE: &str = r#"[package]
name = "{namespace}"
version = "0.1.0"
edition = "2024"

[lib]
crate-type = ["cdylib"]

[dependencies]
cellcomp = { path = "{include_dir}" }
"#;

/// The project file the build tool is pointed at.
#[derive(Debug, Clone)]
pub struct BuildDescriptor {
    namespace: String,
    include_dir: PathBuf,
}

impl BuildDescriptor {
    pub fn new(namespace: &str, include_dir: &Path) -> Self {
        Self {
            namespace: namespace.to_owned(),
            include_dir: include_dir.to_path_buf(),
        }
    }
    pub fn render(&self) -> String {
        let include_dir = self
            .include_dir
            .to_string_lossy()
            .replace('\\', "\\\\")
            .replace('"', "\\\"");
        DESCRIPTOR_TEMPLATE
            .replace("{namespace}", &self.namespace)
            .replace("{include_dir}", &include_dir)
    }
    pub fn write_to(&self, build_dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(build_dir)?;
        let path = build_dir.join(DESCRIPTOR_FILE);
        fs::write(&path, self.render())?;
        Ok(path)
    }
}

/// Schema-language files in `dir`, sorted so the generator sees a stable order.
pub fn schema_sources(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources)
}

// ------------- Jobs -------------
#[derive(Debug, Clone)]
pub struct CodegenJob {
    pub sources: Vec<PathBuf>,
    pub offset: CellType,
    pub namespace: String,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BuildJob {
    pub build_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// The two external steps of a load transaction.
pub trait Toolchain: Send + Sync {
    /// Emits generated source for `job.sources` into `job.output_dir`.
    /// Fails with `CodeGenFailed` or `Cancelled`.
    fn generate(&self, job: &CodegenJob, cancel: &CancelToken) -> Result<()>;
    /// Builds `job.build_dir` into an artifact placed in `job.output_dir`.
    /// Fails with `BuildFailed` or `Cancelled`.
    fn build(&self, job: &BuildJob, cancel: &CancelToken) -> Result<()>;
}

// ------------- Command Toolchain -------------
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs the code generator and the build tool as child processes.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    codegen: ToolSettings,
    build: ToolSettings,
    timeout: Option<Duration>,
}

impl CommandToolchain {
    pub fn new(codegen: ToolSettings, build: ToolSettings, timeout: Option<Duration>) -> Self {
        let codegen = if codegen.args.is_empty() {
            ToolSettings { args: ToolSettings::codegen().args, ..codegen }
        } else {
            codegen
        };
        let build = if build.args.is_empty() {
            ToolSettings { args: ToolSettings::build().args, ..build }
        } else {
            build
        };
        Self { codegen, build, timeout }
    }
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.codegen.clone(), settings.build.clone(), settings.tool_timeout())
    }
}

impl Toolchain for CommandToolchain {
    fn generate(&self, job: &CodegenJob, cancel: &CancelToken) -> Result<()> {
        let args = expand(
            &self.codegen.args,
            &job.sources,
            &[
                ("{offset}", job.offset.to_string()),
                ("{namespace}", job.namespace.clone()),
                ("{output_dir}", job.output_dir.to_string_lossy().into_owned()),
            ],
        );
        run_tool(&self.codegen.executable, &args, self.timeout, cancel).map_err(|failure| match failure {
            ToolFailure::Cancelled => CompositionError::Cancelled(Stage::GeneratedSource),
            failure => CompositionError::CodeGenFailed(failure.to_string()),
        })
    }
    fn build(&self, job: &BuildJob, cancel: &CancelToken) -> Result<()> {
        let args = expand(
            &self.build.args,
            &[],
            &[
                ("{build_dir}", job.build_dir.to_string_lossy().into_owned()),
                ("{output_dir}", job.output_dir.to_string_lossy().into_owned()),
            ],
        );
        run_tool(&self.build.executable, &args, self.timeout, cancel).map_err(|failure| match failure {
            ToolFailure::Cancelled => CompositionError::Cancelled(Stage::Built),
            failure => CompositionError::BuildFailed(failure.to_string()),
        })
    }
}

// "{sources}" standing alone expands to one argument per source file
fn expand(template: &[String], sources: &[PathBuf], vars: &[(&str, String)]) -> Vec<OsString> {
    let mut args = Vec::with_capacity(template.len() + sources.len());
    for arg in template {
        if arg == "{sources}" {
            args.extend(sources.iter().map(|source| source.as_os_str().to_owned()));
            continue;
        }
        let mut expanded = arg.clone();
        for (placeholder, value) in vars {
            expanded = expanded.replace(placeholder, value);
        }
        args.push(OsString::from(expanded));
    }
    args
}

#[derive(Debug)]
enum ToolFailure {
    Spawn(io::Error),
    Wait(io::Error),
    Exit { status: ExitStatus, stderr: String },
    TimedOut(Duration),
    Cancelled,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ToolFailure::Spawn(e) => write!(f, "unable to start: {}", e),
            ToolFailure::Wait(e) => write!(f, "unable to wait for completion: {}", e),
            ToolFailure::Exit { status, stderr } if stderr.is_empty() => write!(f, "exited with {}", status),
            ToolFailure::Exit { status, stderr } => write!(f, "exited with {}: {}", status, stderr),
            ToolFailure::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
            ToolFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

fn drain(mut reader: impl Read) -> String {
    let mut buffer = Vec::new();
    let _ = reader.read_to_end(&mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

// Kills the tool together with its process group and reaps it.
fn stop(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: plain kill(2) on the group the child was spawned to lead
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn run_tool(
    executable: &Path,
    args: &[OsString],
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> std::result::Result<(), ToolFailure> {
    info!(tool = %executable.display(), ?args, "invoking external tool");
    let mut command = Command::new(executable);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // the tool leads its own group, so whatever it spawns can be stopped with it
    #[cfg(unix)]
    command.process_group(0);
    let mut child = command.spawn().map_err(ToolFailure::Spawn)?;
    // pipes are drained on their own threads so a chatty tool cannot stall on a full pipe
    let stdout = child.stdout.take().map(|out| thread::spawn(move || drain(out)));
    let stderr = child.stderr.take().map(|err| thread::spawn(move || drain(err)));

    let started = Instant::now();
    let outcome = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => (),
            Err(e) => break Err(ToolFailure::Wait(e)),
        }
        if cancel.is_cancelled() {
            break Err(ToolFailure::Cancelled);
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                break Err(ToolFailure::TimedOut(limit));
            }
        }
        thread::sleep(POLL_INTERVAL);
    };
    let status = match outcome {
        Ok(status) => status,
        Err(failure) => {
            stop(&mut child);
            // descendants may still hold the pipes, so the drain threads are left to finish alone
            warn!(tool = %executable.display(), %failure, "tool stopped");
            return Err(failure);
        }
    };

    let stdout = stdout.and_then(|reader| reader.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|reader| reader.join().ok()).unwrap_or_default();
    for line in stdout.lines() {
        debug!(tool = %executable.display(), "{}", line);
    }
    for line in stderr.lines() {
        debug!(tool = %executable.display(), stream = "stderr", "{}", line);
    }

    if status.success() {
        debug!(tool = %executable.display(), elapsed_ms = started.elapsed().as_millis() as u64, "tool finished");
        Ok(())
    } else {
        warn!(tool = %executable.display(), %status, "tool reported failure");
        Err(ToolFailure::Exit {
            status,
            stderr: stderr.trim().to_owned(),
        })
    }
}
