use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;

pub mod binary;
pub mod codegen;
pub mod error;
pub mod execution;
pub mod numeric;
pub mod translate;
pub mod trap;

pub use error::CompileError;
pub use translate::{compile, CompiledFunction, CompiledModule};
pub use trap::Trap;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct CmdConfig {
    #[arg(value_name = "FILE", help = "wasm or wat file path, `-` for stdin", default_value = "-")]
    pub file: String,
    #[arg(long, value_name = "EXPORT", help = "exported function to run after instantiation")]
    pub invoke: Option<String>,
    #[arg(value_name = "ARGS", help = "arguments for --invoke, e.g. `7` or `1.5:f32`", allow_hyphen_values = true)]
    pub args: Vec<String>,
    #[arg(long)]
    pub disable_ansi_color: bool,
    #[arg(long, default_value_t = Config::default().max_call_depth)]
    pub max_call_depth: usize,
}

pub fn get_args() -> Result<CmdConfig> {
    Ok(CmdConfig::parse())
}

/// Limits applied while compiling and running a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Declared locals per function, parameters excluded.
    pub max_locals: u32,
    pub max_call_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_locals: 50_000,
            max_call_depth: 1024,
        }
    }
}

impl From<&CmdConfig> for Config {
    fn from(cmd: &CmdConfig) -> Self {
        Self {
            max_call_depth: cmd.max_call_depth,
            ..Self::default()
        }
    }
}

/// Reads a module from `file` (or stdin for `-`), converting text format
/// to binary when needed.
pub fn read_module(file: &str) -> Result<Vec<u8>> {
    let bytes = match file {
        "-" => {
            let mut buf = vec![];
            std::io::stdin().lock().read_to_end(&mut buf)?;
            buf
        }
        path => std::fs::read(path).with_context(|| format!("failed to read {path}"))?,
    };
    Ok(wat::parse_bytes(&bytes)?.into_owned())
}

#[cfg(test)]
mod lib_tests {
    use std::io::Write;

    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reads_text_and_binary_modules() -> Result<()> {
        let text = r#"(module (func (export "f") (result i32) i32.const 1))"#;
        let binary = wat::parse_str(text)?;

        let mut wat_file = tempfile::Builder::new().suffix(".wat").tempfile()?;
        wat_file.write_all(text.as_bytes())?;
        let mut wasm_file = tempfile::Builder::new().suffix(".wasm").tempfile()?;
        wasm_file.write_all(&binary)?;

        assert_eq!(binary, read_module(&wat_file.path().to_string_lossy())?);
        assert_eq!(binary, read_module(&wasm_file.path().to_string_lossy())?);
        Ok(())
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_module("/nonexistent/module.wasm").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/module.wasm"), "{err}");
    }

    #[test]
    fn command_line_overrides_call_depth() {
        let cmd = CmdConfig::parse_from(["tiny-wasm-aot", "m.wat", "--invoke", "f", "--max-call-depth", "16", "--", "-3", "2:i64"]);
        assert_eq!(Some("f"), cmd.invoke.as_deref());
        assert_eq!(vec!["-3", "2:i64"], cmd.args);
        assert_eq!(
            Config {
                max_locals: 50_000,
                max_call_depth: 16
            },
            Config::from(&cmd)
        );
    }
}
