//! CommonJS-style `require` built on `sendSync`.
//!
//! The script asks for a module id with `sendSync(id)`; the host reads the file
//! from disk, wraps it in a module function and replies with JSON.
//!
//! Run with `cargo run --example commonjs [module-id]`.

use anyhow::{Context, Result};
use jsworker::{CallbackSet, Worker, WorkerConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

const NATIVE_MODULE: &str = include_str!("native_module.js");

#[derive(Debug, Default, Serialize)]
struct RawModule {
    err: Option<String>,
    source: String,
    id: String,
    filename: String,
    dirname: String,
}

fn module_path(root: &Path, id: &str) -> PathBuf {
    let stem = id.strip_suffix(".js").unwrap_or(id);
    root.join(format!("{stem}.js"))
}

fn read_module(root: &Path, id: &str) -> Result<(RawModule, String)> {
    let path = module_path(root, id);
    let body = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let dirname = path
        .parent()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();

    let module = RawModule {
        err: None,
        source: String::new(),
        id: id.to_string(),
        filename: path.display().to_string(),
        dirname,
    };
    Ok((module, body))
}

/// Reply to `sendSync(id)` with the wrapped module as JSON.
fn resolve(root: &Path, id: &str) -> String {
    let module = match read_module(root, id) {
        Ok((mut module, body)) => {
            module.source = format!(
                "(function (exports, require, module, __filename, __dirname) {{ {body}\n}});"
            );
            module
        }
        Err(err) => RawModule {
            err: Some(format!("{err:#}")),
            id: id.to_string(),
            ..RawModule::default()
        },
    };

    serde_json::to_string(&module).unwrap_or_else(|err| {
        format!(r#"{{"err":{:?}}}"#, err.to_string())
    })
}

fn main_source(root: &Path, id: &str) -> Result<(String, String)> {
    let (module, body) = read_module(root, id)?;
    let header = serde_json::to_string(&module)?;
    let source = format!(
        "var main = new NativeModule({header});\n\
         (function (exports, require, module, __filename, __dirname) {{\n\
         require.main = module;\n\
         {body}\n\
         }})(main.exports, NativeModule.require, main, main.filename, main.dirname);\n\
         send('exit');"
    );
    Ok((module.filename, source))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let entry = std::env::args().nth(1).unwrap_or_else(|| "module-1".to_string());
    let root = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/commonjs"));

    let resolver_root = root.clone();
    let callbacks = CallbackSet::new(
        |msg| {
            if msg == "exit" {
                info!("main module finished");
            } else {
                info!(text = msg, "message from script");
            }
        },
        move |id| resolve(&resolver_root, id),
    );
    let config = WorkerConfig::new().with_execution_timeout(Duration::from_secs(30));
    let worker = Worker::with_config(config, callbacks)?;

    worker.load("native_module.js", NATIVE_MODULE)?;

    let (filename, source) = main_source(&root, &entry)?;
    if let Err(err) = worker.load(&filename, &source) {
        warn!("main module failed:\n{err}");
        return Err(err.into());
    }

    worker.dispose();
    Ok(())
}
