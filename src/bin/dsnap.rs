//! Snapshot tool: stream a formatted snapshot of a hub's resource tree.
//!
//! The IPC surface that would attach this tool to a long-running hub is out
//! of scope here, so the tool hosts an embedded hub, optionally populated
//! from a TOML seed file, and streams the snapshot to stdout or a file.

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::str::FromStr;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use datahub::{
    DataHub, DataType, HubConfig, ReadOutcome, Result as HubResult, FORMAT_JSON, NOW,
};

#[derive(Parser, Debug)]
#[command(
    name = "dsnap",
    version,
    about = "Stream a formatted snapshot of the Data Hub resource tree",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        short = 'f',
        long,
        default_value = "json",
        help = "Output format (only \"json\" so far)"
    )]
    format: String,

    #[arg(
        short = 's',
        long,
        default_value_t = 0.0,
        help = "Only include records changed after this many seconds from the Epoch (0 = no limit)"
    )]
    since: f64,

    #[arg(
        short = 'p',
        long,
        default_value = "/",
        help = "Only consider the tree at and beneath this path"
    )]
    path: String,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the output to FILE instead of stdout"
    )]
    output: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Hub configuration file (TOML)")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Populate the embedded hub from a TOML seed file before snapshotting"
    )]
    seed: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedFile {
    #[serde(default)]
    resource: Vec<SeedResource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedResource {
    path: String,
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    units: String,
    #[serde(default)]
    ts: Option<f64>,
    #[serde(default)]
    value: Option<toml::Value>,
}

fn default_kind() -> String {
    "input".to_string()
}

fn apply_seed(hub: &DataHub, seed: &SeedFile) -> HubResult<()> {
    for entry in &seed.resource {
        let data_type = DataType::from_str(&entry.data_type)?;
        match entry.kind.as_str() {
            "input" => hub.create_input(&entry.path, data_type, &entry.units)?,
            "output" => hub.create_output(&entry.path, data_type, &entry.units)?,
            other => {
                eprintln!("dsnap: unknown resource kind '{other}' for {}", entry.path);
                return Err(datahub::HubError::BadParameter("unknown resource kind"));
            }
        }
        let ts = entry.ts.unwrap_or(NOW);
        match (data_type, &entry.value) {
            (DataType::Trigger, _) => hub.push_trigger(&entry.path, ts)?,
            (_, None) => {}
            (DataType::Boolean, Some(toml::Value::Boolean(v))) => {
                hub.push_boolean(&entry.path, ts, *v)?
            }
            (DataType::Numeric, Some(toml::Value::Float(v))) => {
                hub.push_numeric(&entry.path, ts, *v)?
            }
            (DataType::Numeric, Some(toml::Value::Integer(v))) => {
                hub.push_numeric(&entry.path, ts, *v as f64)?
            }
            (DataType::String, Some(toml::Value::String(v))) => {
                hub.push_string(&entry.path, ts, v)?
            }
            (DataType::Json, Some(toml::Value::String(v))) => hub.push_json(&entry.path, ts, v)?,
            (_, Some(_)) => {
                eprintln!("dsnap: value type mismatch for {}", entry.path);
                return Err(datahub::HubError::BadParameter("seed value type mismatch"));
            }
        }
    }
    hub.run_until_idle();
    Ok(())
}

fn run(cli: Cli) -> Result<(), String> {
    let format = match cli.format.as_str() {
        "json" => FORMAT_JSON,
        other => return Err(format!("unknown format: {other}")),
    };

    let cfg = HubConfig::load(cli.config.as_deref()).map_err(|err| err.to_string())?;
    let hub = DataHub::with_config(cfg);

    if let Some(seed_path) = &cli.seed {
        let text = fs::read_to_string(seed_path)
            .map_err(|err| format!("failed to read seed {}: {err}", seed_path.display()))?;
        let seed: SeedFile = toml::from_str(&text)
            .map_err(|err| format!("failed to parse seed {}: {err}", seed_path.display()))?;
        apply_seed(&hub, &seed).map_err(|err| format!("failed to apply seed: {err}"))?;
    }

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            fs::File::create(path)
                .map_err(|err| format!("failed to open {}: {err}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let result: Rc<RefCell<Option<HubResult<()>>>> = Rc::new(RefCell::new(None));
    let result_slot = result.clone();
    let reader = hub.take_snapshot(format, 0, &cli.path, cli.since, move |status| {
        *result_slot.borrow_mut() = Some(status);
    });

    if let Some(mut reader) = reader {
        let mut buf = [0u8; 4096];
        loop {
            hub.run_until_idle();
            match reader.read(&mut buf) {
                ReadOutcome::Data(n) => {
                    out.write_all(&buf[..n]).map_err(|err| err.to_string())?;
                }
                ReadOutcome::WouldBlock => continue,
                ReadOutcome::Eof => break,
            }
        }
        out.write_all(b"\n").map_err(|err| err.to_string())?;
        out.flush().map_err(|err| err.to_string())?;
    }
    hub.run_until_idle();

    let outcome = result.borrow_mut().take();
    match outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(err)) => Err(format!("snapshot failed: {err}")),
        None => Err("snapshot produced no result".to_string()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("dsnap: {message}");
            ExitCode::FAILURE
        }
    }
}
