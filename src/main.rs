use anyhow::Result;
use tiny_wasm_aot::{
    execution::{imports::Imports, runtime::Runtime, value::Value},
    get_args, read_module, Config,
};
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cmd = get_args()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(!cmd.disable_ansi_color).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(ErrorLayer::default())
        .init();

    let wasm = read_module(&cmd.file)?;
    let mut rt = Runtime::instantiate_with_config(wasm, Imports::new(), Config::from(&cmd))?;

    let Some(name) = cmd.invoke.as_deref() else {
        for func in &rt.compiled.functions {
            println!(
                "{:>4} {:<24} {} ({} ops, {} slots)",
                func.index,
                func.symbol,
                func.ty,
                func.code.ops.len(),
                func.layout.max_slots
            );
        }
        return Ok(());
    };

    let args = cmd
        .args
        .iter()
        .map(|arg| arg.parse::<Value>())
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(result) = rt.call(name, args)? {
        println!("{result}");
    }
    Ok(())
}
