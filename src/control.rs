use crate::error::{Error, Result};
use crate::parse::parser;
use crate::runtime::{apply_config, SinkRegistry};
use std::path::Path;
use tracing::{error, info};

/// Appends `text` to a sink as one newline-terminated payload.
pub fn write_line(registry: &SinkRegistry, name: &str, text: &str) -> Result<()> {
    let mut payload = String::with_capacity(text.len() + 1);
    payload.push_str(text);
    if !payload.ends_with('\n') {
        payload.push('\n');
    }
    registry.write(name, payload.as_bytes())
}

pub fn rotate_sink(registry: &SinkRegistry, name: &str) {
    match registry.rotate(name) {
        Ok(()) => println!("Rotated `{}`", name),
        Err(Error::UnknownSink(_)) => eprintln!("No such sink: `{}`", name),
        Err(e) => {
            error!(sink = %name, error = %e, "manual rotation failed");
            eprintln!("Rotation of `{}` failed: {}", name, e);
        }
    }
}

pub fn close_sink(registry: &SinkRegistry, name: &str) {
    match registry.close(name) {
        Ok(()) => println!("Closed `{}`", name),
        Err(Error::UnknownSink(_)) => eprintln!("No such sink: `{}`", name),
        Err(e) => eprintln!("Closing `{}` failed: {}", name, e),
    }
}

/// Prints every sink's state as YAML.
pub fn print_status(registry: &SinkRegistry) {
    let infos = registry.info();
    if infos.is_empty() {
        println!("No sinks open");
        return;
    }
    for (name, info) in infos {
        match serde_yaml::to_string(&info) {
            Ok(yaml) => println!("{}:\n{}", name, indent(&yaml)),
            Err(e) => eprintln!("{}: unprintable status: {}", name, e),
        }
    }
}

/// Re-reads the config file and applies it to the registry.
pub fn reload(registry: &SinkRegistry, config_path: &Path) -> Result<()> {
    let cfg = parser(config_path)?;
    apply_config(&cfg, registry)?;
    info!(config = %config_path.display(), sinks = cfg.sinks.len(), "config applied");
    Ok(())
}

fn indent(block: &str) -> String {
    block.lines().map(|l| format!("  {}\n", l)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::from_yaml;
    use std::fs;

    #[test]
    fn write_line_terminates_once() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("sinks:\n  s:\n    path: {}/s.log\n", dir.path().display());
        let registry = SinkRegistry::new();
        apply_config(&from_yaml(&yaml).unwrap(), &registry).unwrap();

        write_line(&registry, "s", "plain").unwrap();
        write_line(&registry, "s", "terminated\n").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("s.log")).unwrap(), "plain\nterminated\n");
        assert!(matches!(write_line(&registry, "nope", "x"), Err(Error::UnknownSink(_))));
    }

    #[test]
    fn reload_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("rollsmith.yml");
        fs::write(&cfg_path, format!("sinks:\n  r:\n    path: {}/r.log\n", dir.path().display())).unwrap();

        let registry = SinkRegistry::new();
        reload(&registry, &cfg_path).unwrap();
        assert_eq!(registry.names(), vec!["r"]);
    }
}
