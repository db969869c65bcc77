use crate::error::{Error, Result};
use crate::lock::LockMode;
use crate::policy::{ExpirationRule, ExpirationScale, RotationPolicy, When, DEFAULT_BACKUP_COUNT};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, path::PathBuf};

fn default_backup_count() -> i64 { DEFAULT_BACKUP_COUNT as i64 }

// Signed on purpose: negative values must reach policy validation.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExpirationConfig {
    pub scale: Option<ExpirationScale>,
    #[serde(default)]
    pub interval: i64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    pub when: Option<When>,
    pub interval: Option<i64>,
    /// "HH:MM" or "HH:MM:SS", daily/weekly anchor
    pub at: Option<String>,
    pub max_bytes: Option<i64>,
    #[serde(default = "default_backup_count")]
    pub backup_count: i64,
    pub expiration: Option<ExpirationConfig>,
    #[serde(default)]
    pub append_pid: bool,
    #[serde(default)]
    pub append_timestamp: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub rotation: Option<RotationConfig>,
    #[serde(default)]
    pub locking: LockMode,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sinks: HashMap<String, SinkConfig>,
}

impl RotationConfig {
    pub fn to_policy(&self) -> Result<RotationPolicy> {
        let mut builder = RotationPolicy::builder()
            .backup_count(self.backup_count)
            .append_pid(self.append_pid)
            .append_timestamp(self.append_timestamp);
        if let Some(when) = self.when {
            builder = builder.when(when);
        }
        if let Some(interval) = self.interval {
            builder = builder.interval(interval);
        }
        if let Some(at) = &self.at {
            builder = builder.anchor(at.parse()?);
        }
        if let Some(max_bytes) = self.max_bytes {
            builder = builder.max_bytes(max_bytes);
        }
        if let Some(exp) = &self.expiration {
            let scale = exp.scale.ok_or_else(|| Error::Configuration {
                field: "expiration.scale",
                reason: "is required".into(),
            })?;
            builder = builder.expiration(ExpirationRule::new(scale, exp.interval)?);
        }
        builder.build()
    }
}

impl SinkConfig {
    /// A sink without a `rotation` block is a plain append-only file.
    pub fn policy(&self) -> Result<RotationPolicy> {
        match &self.rotation {
            Some(rotation) => rotation.to_policy(),
            None => RotationPolicy::builder().build(),
        }
    }
}

impl Config {
    /// Builds every sink's policy, failing on the first invalid one.
    pub fn policies(&self) -> Result<HashMap<String, RotationPolicy>> {
        self.sinks
            .iter()
            .map(|(name, sink)| {
                sink.policy().map(|p| (name.clone(), p)).inspect_err(|e| {
                    tracing::error!(sink = %name, error = %e, "invalid sink configuration");
                })
            })
            .collect()
    }
}

pub fn from_yaml(yaml: &str) -> Result<Config> {
    let parsed_config: Config = serde_yaml::from_str(yaml)?;
    parsed_config.policies()?;
    Ok(parsed_config)
}

/*
    @@@
    @parser();
    . Reads the YAML config into a String. Any I/O error is returned as ConfigRead.
    . Hands the text to serde_yaml to map it into the Config struct; malformed YAML is a ConfigParse error.
    . Validates every sink's rotation policy up front, so bad values never wait for the first write.
*/
pub fn parser(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let yaml_file = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    from_yaml(&yaml_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
sinks:
  app:
    path: logs/app.log
    rotation:
      when: everyday
      at: "03:15"
      max_bytes: 1048576
      backup_count: 7
      expiration:
        scale: days
        interval: 30
  audit:
    path: logs/audit.log
    locking: none
  events:
    path: logs/events.log
    rotation:
      when: minute
      interval: 5
"#;

    #[test]
    fn parses_sinks_into_policies() {
        let cfg = from_yaml(SAMPLE).unwrap();
        assert_eq!(cfg.sinks.len(), 3);

        let app = cfg.sinks["app"].policy().unwrap();
        assert_eq!(app.when(), Some(When::Everyday));
        assert_eq!(app.anchor().to_string(), "03:15:00");
        assert_eq!(app.max_bytes(), 1_048_576);
        assert_eq!(app.backup_count(), 7);
        assert_eq!(app.expiration().unwrap().scale(), ExpirationScale::Days);
        assert_eq!(cfg.sinks["app"].locking, LockMode::Exclusive);

        let audit = &cfg.sinks["audit"];
        assert_eq!(audit.locking, LockMode::Disabled);
        assert!(!audit.policy().unwrap().rotates());

        let events = cfg.sinks["events"].policy().unwrap();
        assert_eq!(events.interval(), 5);
        assert_eq!(events.backup_count(), DEFAULT_BACKUP_COUNT);
    }

    #[test]
    fn negative_values_are_rejected_not_clamped() {
        let yaml = "sinks:\n  a:\n    path: a.log\n    rotation:\n      max_bytes: -1\n";
        match from_yaml(yaml) {
            Err(Error::Configuration { field, .. }) => assert_eq!(field, "max_bytes"),
            other => panic!("expected configuration error, got {other:?}"),
        }

        let yaml = "sinks:\n  a:\n    path: a.log\n    rotation:\n      backup_count: -2\n";
        assert!(matches!(from_yaml(yaml), Err(Error::Configuration { field: "backup_count", .. })));
    }

    #[test]
    fn unknown_trigger_is_a_parse_error() {
        let yaml = "sinks:\n  a:\n    path: a.log\n    rotation:\n      when: fortnightly\n";
        assert!(matches!(from_yaml(yaml), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(parser(dir.path().join("nope.yml")), Err(Error::ConfigRead { .. })));
    }
}
