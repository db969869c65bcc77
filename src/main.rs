use anyhow::{bail, Context};
use futures::stream::StreamExt;
use rollsmith::control;
use rollsmith::error::Error;
use rollsmith::logger::{diagnostics_writer, logs_tracing};
use rollsmith::parse::parser;
use rollsmith::runtime::{apply_config, SharedRegistry, SinkRegistry};
use rollsmith::shell::run_shell;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const USAGE: &str = "usage: rollsmith [--config <file>] (pipe <sink> | shell)";

enum Mode {
    Pipe(String),
    Shell,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<(PathBuf, Mode)> {
    let mut config = PathBuf::from("config/rollsmith.yml");
    let mut mode = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => config = args.next().context(USAGE)?.into(),
            "pipe" => mode = Some(Mode::Pipe(args.next().context(USAGE)?)),
            "shell" => mode = Some(Mode::Shell),
            other => bail!("unexpected argument `{}`\n{}", other, USAGE),
        }
    }
    Ok((config, mode.context(USAGE)?))
}

/*
    @@@
    @pipe();
    . Appends every stdin line to the sink until EOF.
    . SIGHUP re-reads the config; SIGTERM/SIGINT/SIGQUIT stop reading.
    . Rollover faults are already logged by the writer and do not stop the pump.
*/
async fn pipe(registry: SharedRegistry, config_path: PathBuf, sink: String) -> anyhow::Result<()> {
    registry.get(&sink).with_context(|| format!("sink `{}` is not configured", sink))?;

    let mut signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT]).context("installing signal handlers")?;
    let handle = signals.handle();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                let written = tokio::task::block_in_place(|| control::write_line(&registry, &sink, &line));
                match written {
                    Ok(()) | Err(Error::RolloverIo { .. }) => {}
                    Err(e) => return Err(e).context("writing to sink"),
                }
            }
            Some(signal) = signals.next() => match signal {
                SIGHUP => {
                    info!("SIGHUP received, reloading");
                    if let Err(e) = control::reload(&registry, &config_path) {
                        warn!(error = %e, "reload failed; keeping the current sinks");
                    }
                }
                _ => {
                    info!(signal, "stopping");
                    break;
                }
            },
        }
    }

    handle.close();
    Ok(())
}

async fn shell(registry: SharedRegistry, config_path: PathBuf) -> anyhow::Result<()> {
    let (r1, r2, r3, r4, r5) = (registry.clone(), registry.clone(), registry.clone(), registry.clone(), registry.clone());
    run_shell(
        registry.names(),
        move || {
            let r = r1.clone();
            async move { control::print_status(&r) }
        },
        move || {
            let r = r2.clone();
            let path = config_path.clone();
            async move {
                match control::reload(&r, &path) {
                    Ok(()) => println!("Reloaded"),
                    Err(e) => eprintln!("Reload failed: {}", e),
                }
            }
        },
        move |sink: &str, text: &str| {
            let r = r3.clone();
            let (sink, text) = (sink.to_string(), text.to_string());
            async move {
                if let Err(e) = control::write_line(&r, &sink, &text) {
                    eprintln!("Write to `{}` failed: {}", sink, e);
                }
            }
        },
        move |sink: &str| {
            let r = r4.clone();
            let sink = sink.to_string();
            async move { control::rotate_sink(&r, &sink) }
        },
        move |sink: &str| {
            let r = r5.clone();
            let sink = sink.to_string();
            async move { control::close_sink(&r, &sink) }
        },
    )
    .await
    .context("shell failed")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config_path, mode) = parse_args(std::env::args().skip(1))?;

    let _guard = logs_tracing(diagnostics_writer("logs")?).context("installing the tracing subscriber")?;

    let cfg = parser(&config_path).with_context(|| format!("loading {}", config_path.display()))?;
    let registry: SharedRegistry = Arc::new(SinkRegistry::new());
    apply_config(&cfg, &registry)?;

    let result = match mode {
        Mode::Pipe(sink) => pipe(registry.clone(), config_path, sink).await,
        Mode::Shell => shell(registry.clone(), config_path).await,
    };

    if let Err(e) = registry.close_all() {
        error!(error = %e, "closing sinks failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_modes_and_config() {
        let (cfg, mode) = parse_args(args(&["-c", "x.yml", "pipe", "app"])).unwrap();
        assert_eq!(cfg, PathBuf::from("x.yml"));
        assert!(matches!(mode, Mode::Pipe(ref s) if s == "app"));

        let (cfg, mode) = parse_args(args(&["shell"])).unwrap();
        assert_eq!(cfg, PathBuf::from("config/rollsmith.yml"));
        assert!(matches!(mode, Mode::Shell));

        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["pipe"])).is_err());
        assert!(parse_args(args(&["bogus"])).is_err());
    }
}
