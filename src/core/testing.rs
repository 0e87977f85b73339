/// Recording `CommandRunner` used by the engine tests

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::core::database::DatabaseConfig;
use crate::core::error::OpsError;
use crate::core::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Minimal deployment tree: version 1.0.0, two config artifacts, one upload
pub fn seed_deployment(root: &Path) {
    fs::write(root.join("package.json"), r#"{"name": "mall", "version": "1.0.0"}"#).unwrap();
    fs::write(root.join(".env"), "DATABASE_URL=postgresql://mall:pw@localhost:5432/mall\n").unwrap();
    fs::write(root.join("ecosystem.config.js"), "module.exports = { apps: [] };\n").unwrap();
    fs::create_dir_all(root.join("uploads/products")).unwrap();
    fs::write(root.join("uploads/products/1.png"), vec![7u8; 64]).unwrap();
}

pub fn pg_config() -> DatabaseConfig {
    DatabaseConfig::from_url("postgresql://mall:pw@localhost:5432/mall").unwrap()
}

pub const FAKE_DUMP: &[u8] = b"-- fake dump\nCREATE TABLE products (id int);\n";

#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    responses: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<(String, String)>>,
    missing: Mutex<Vec<String>>,
    restored: Mutex<Vec<Vec<u8>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands whose argv line contains `pattern` print `stdout`
    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), stdout.to_string()));
    }

    /// Commands whose argv line contains `pattern` exit with status 1
    pub fn fail(&self, pattern: &str, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), stderr.to_string()));
    }

    pub fn missing(&self, program: &str) {
        self.missing.lock().unwrap().push(program.to_string());
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.specs().iter().map(CommandSpec::argv_line).collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.calls().iter().any(|line| line.contains(pattern))
    }

    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|line| line.contains(pattern))
    }

    /// Decompressed stdin payloads fed to commands, in call order
    pub fn stdin_payloads(&self) -> Vec<Vec<u8>> {
        self.restored.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, OpsError> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.argv_line();

        if self.missing.lock().unwrap().contains(&spec.program) {
            return Err(OpsError::ToolingMissing {
                tool: spec.program.clone(),
            });
        }

        if let Some(source) = &spec.stdin {
            let mut payload = Vec::new();
            let mut file = File::open(&source.path)?;
            if source.gzip {
                GzDecoder::new(file).read_to_end(&mut payload)?;
            } else {
                file.read_to_end(&mut payload)?;
            }
            self.restored.lock().unwrap().push(payload);
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, stderr)| stderr.clone());
        if let Some(stderr) = failure {
            return Err(OpsError::CommandFailed {
                program: spec.program.clone(),
                code: Some(1),
                stderr,
            });
        }

        if let Some(sink) = &spec.stdout {
            if sink.gzip {
                let mut encoder = GzEncoder::new(File::create(&sink.path)?, Compression::default());
                encoder.write_all(FAKE_DUMP)?;
                encoder.finish()?;
            } else {
                fs::write(&sink.path, FAKE_DUMP)?;
            }
        }

        let stdout = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}
