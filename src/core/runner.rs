/// Command execution port
///
/// Every external tool (dump/restore utilities, package manager, migration
/// runner, process supervisor) is invoked through `CommandRunner`, so the
/// pipelines can be driven by `SystemRunner` in production and by a fake in
/// tests.

use anyhow::anyhow;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::core::error::OpsError;

/// A file wired to one of the child's standard streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFile {
    pub path: PathBuf,
    pub gzip: bool,
}

impl StreamFile {
    /// Compression is inferred from a `.gz` extension
    pub fn for_path(path: &Path) -> Self {
        let gzip = path.extension().map(|ext| ext == "gz").unwrap_or(false);
        Self {
            path: path.to_path_buf(),
            gzip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<StreamFile>,
    pub stdout: Option<StreamFile>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            stdin: None,
            stdout: None,
        }
    }

    /// Build from a configured argv such as `["pnpm", "install", "--frozen-lockfile"]`
    pub fn from_argv(argv: &[String]) -> Result<Self, OpsError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| OpsError::Other(anyhow!("empty command line in settings")))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin_from(mut self, path: &Path) -> Self {
        self.stdin = Some(StreamFile::for_path(path));
        self
    }

    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout = Some(StreamFile::for_path(path));
        self
    }

    /// Unredacted command line, used for matching in tests
    pub fn argv_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Display form is safe for logs: password arguments and env values are masked
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.env {
            write!(f, "{}=**** ", key)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.starts_with("--password=") {
                write!(f, " --password=****")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. Non-zero exit is reported as `OpsError::CommandFailed`,
    /// a missing executable as `OpsError::ToolingMissing`.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, OpsError>;
}

/// Spawns real processes on the blocking pool
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, OpsError> {
        tracing::debug!(command = %spec, "running command");
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || run_blocking(&spec))
            .await
            .map_err(|e| OpsError::Other(anyhow!("command task aborted: {}", e)))?
    }
}

fn run_blocking(spec: &CommandSpec) -> Result<CommandOutput, OpsError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            OpsError::ToolingMissing {
                tool: spec.program.clone(),
            }
        } else {
            OpsError::Io(e)
        }
    })?;

    // stdin feeder and stderr drain run on their own threads so a full pipe
    // on one stream never stalls the other
    let feeder = match (spec.stdin.clone(), child.stdin.take()) {
        (Some(source), Some(mut stdin)) => Some(thread::spawn(move || -> io::Result<u64> {
            let mut file = BufReader::new(File::open(&source.path)?);
            if source.gzip {
                io::copy(&mut GzDecoder::new(file), &mut stdin)
            } else {
                io::copy(&mut file, &mut stdin)
            }
        })),
        _ => None,
    };
    let drain = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        })
    });

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| OpsError::Other(anyhow!("stdout of `{}` not captured", spec.program)))?;
    let captured = match &spec.stdout {
        Some(sink) => write_sink(&mut stdout, sink).map(|_| Vec::new()),
        None => {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        }
    };
    let captured = match captured {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(OpsError::Io(e));
        }
    };

    let status = child.wait()?;
    let stderr = drain
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
        .unwrap_or_default();

    if !status.success() {
        return Err(OpsError::CommandFailed {
            program: spec.program.clone(),
            code: status.code(),
            stderr,
        });
    }

    if let Some(handle) = feeder {
        match handle.join() {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(OpsError::Io(e)),
            Err(_) => {
                return Err(OpsError::Other(anyhow!(
                    "stdin feeder for `{}` panicked",
                    spec.program
                )))
            }
        }
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&captured).to_string(),
        stderr,
    })
}

fn write_sink(source: &mut impl Read, sink: &StreamFile) -> io::Result<()> {
    let file = BufWriter::new(File::create(&sink.path)?);
    if sink.gzip {
        let mut encoder = GzEncoder::new(file, Compression::default());
        io::copy(source, &mut encoder)?;
        encoder.finish()?.flush()
    } else {
        let mut file = file;
        io::copy(source, &mut file)?;
        file.flush()
    }
}
