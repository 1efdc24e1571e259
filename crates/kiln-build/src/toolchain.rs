//! The external toolchain seam.

use std::path::PathBuf;
use std::process::Command;

use kiln_workspace::ModuleId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codegen::GeneratedUnit;
use crate::error::{BuildResult, CompileError};

/// Identity of a toolchain; part of every cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainInfo {
    /// Toolchain name.
    pub name: String,
    /// Toolchain version.
    pub version: String,
    /// Execution platform the output targets.
    pub target: String,
}

/// One batch of generated units to compile.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Module being compiled.
    pub module: ModuleId,
    /// Package the units live in.
    pub namespace: String,
    /// Units, prelude first and entry last.
    pub units: Vec<GeneratedUnit>,
    /// Directory that receives one `<unit>.wasm` per unit.
    pub out_dir: PathBuf,
}

/// Compiles generated units into WebAssembly.
///
/// Implementations are called from blocking worker threads and may take
/// arbitrarily long.
pub trait Toolchain: Send + Sync {
    /// Toolchain identity.
    fn info(&self) -> &ToolchainInfo;

    /// Compile `request`, writing `<unit>.wasm` for every unit into
    /// `request.out_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Toolchain`] with every diagnostic line on
    /// failure, or [`CompileError::ToolchainSpawn`] if it could not run.
    fn compile(&self, request: &CompileRequest) -> BuildResult<()>;
}

/// Toolchain driven through an external program.
///
/// Arguments may contain placeholders: `{out}` (output directory),
/// `{target}`, `{module}`, `{namespace}`, and `{sources}`, which expands to
/// one argument per generated unit.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    program: String,
    args: Vec<String>,
    info: ToolchainInfo,
}

impl CommandToolchain {
    /// Create a toolchain running `program`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, info: ToolchainInfo) -> Self {
        Self {
            program: program.into(),
            args,
            info,
        }
    }

    fn expand_args(&self, request: &CompileRequest) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len().saturating_add(request.units.len()));
        for arg in &self.args {
            if arg == "{sources}" {
                out.extend(
                    request
                        .units
                        .iter()
                        .map(|u| u.path.to_string_lossy().into_owned()),
                );
                continue;
            }
            out.push(
                arg.replace("{out}", &request.out_dir.to_string_lossy())
                    .replace("{target}", &self.info.target)
                    .replace("{module}", request.module.as_str())
                    .replace("{namespace}", &request.namespace),
            );
        }
        out
    }
}

impl Toolchain for CommandToolchain {
    fn info(&self) -> &ToolchainInfo {
        &self.info
    }

    fn compile(&self, request: &CompileRequest) -> BuildResult<()> {
        let args = self.expand_args(request);
        debug!(module_id = %request.module, program = %self.program, ?args, "Invoking toolchain");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| CompileError::ToolchainSpawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let diagnostics = collect_diagnostics(&output.stdout, &output.stderr);
        warn!(
            module_id = %request.module,
            status = %output.status,
            lines = diagnostics.len(),
            "Toolchain reported errors"
        );
        Err(CompileError::Toolchain {
            module: request.module.to_string(),
            diagnostics,
        })
    }
}

/// Non-blank lines of stdout followed by stderr, untouched otherwise.
fn collect_diagnostics(stdout: &[u8], stderr: &[u8]) -> Vec<String> {
    [stdout, stderr]
        .iter()
        .flat_map(|stream| {
            String::from_utf8_lossy(stream)
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompileRequest {
        CompileRequest {
            module: ModuleId::from_static("shop"),
            namespace: "kiln:module/shop/".into(),
            units: vec![
                GeneratedUnit {
                    name: "__prelude".into(),
                    path: PathBuf::from("/gen/__prelude.ks"),
                    origin: None,
                },
                GeneratedUnit {
                    name: "__entry".into(),
                    path: PathBuf::from("/gen/__entry.ks"),
                    origin: Some("src/main.ks".into()),
                },
            ],
            out_dir: PathBuf::from("/out"),
        }
    }

    fn info() -> ToolchainInfo {
        ToolchainInfo {
            name: "ksc".into(),
            version: "1.0".into(),
            target: "wasm32-wasip1".into(),
        }
    }

    #[test]
    fn placeholders_expand() {
        let tc = CommandToolchain::new(
            "ksc",
            vec![
                "--target={target}".into(),
                "-o".into(),
                "{out}".into(),
                "{sources}".into(),
                "--pkg={namespace}".into(),
            ],
            info(),
        );
        assert_eq!(
            tc.expand_args(&request()),
            vec![
                "--target=wasm32-wasip1",
                "-o",
                "/out",
                "/gen/__prelude.ks",
                "/gen/__entry.ks",
                "--pkg=kiln:module/shop/",
            ]
        );
    }

    #[test]
    fn diagnostics_keep_order_and_text() {
        let lines = collect_diagnostics(
            b"[ERROR] src/main.ks:1:1: unexpected token\n\n",
            b"  [WARN] src/a.ks:3:7: unused\n[ERROR] 1 error\n",
        );
        assert_eq!(
            lines,
            vec![
                "[ERROR] src/main.ks:1:1: unexpected token",
                "  [WARN] src/a.ks:3:7: unused",
                "[ERROR] 1 error",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_diagnostics() {
        let tc = CommandToolchain::new(
            "sh",
            vec![
                "-c".into(),
                "echo '[ERROR] main.ks:2:1: boom'; echo 'second' 1>&2; exit 3".into(),
            ],
            info(),
        );
        match tc.compile(&request()).unwrap_err() {
            CompileError::Toolchain { diagnostics, .. } => {
                assert_eq!(diagnostics, vec!["[ERROR] main.ks:2:1: boom", "second"]);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let tc = CommandToolchain::new("kiln-no-such-toolchain-xyz", vec![], info());
        assert!(matches!(
            tc.compile(&request()),
            Err(CompileError::ToolchainSpawn { .. })
        ));
    }
}
