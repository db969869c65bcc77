use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::parse::{Config, SinkConfig};
use crate::writer::{RotatingFileWriter, WriterInfo, WriterOptions};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

// Shared registry of open sinks
// Updated each time the config is applied
pub type SharedRegistry = Arc<SinkRegistry>;

const AUDIT: &str = "<audit>";

// A configured sink with its open writer
struct Sink {
    config: SinkConfig,
    writer: Arc<RotatingFileWriter>,
}

/// Process-scoped set of named rotating writers.
///
/// Created explicitly at startup and torn down with [`close_all`](Self::close_all);
/// the optional audit sink receives a copy of every payload written through
/// the registry.
pub struct SinkRegistry {
    sinks: RwLock<HashMap<String, Sink>>,
    audit: RwLock<Option<Arc<RotatingFileWriter>>>,
    clock: Arc<dyn Clock>,
}

impl Default for SinkRegistry {
    fn default() -> Self {
        SinkRegistry::with_clock(Arc::new(SystemClock))
    }
}

impl SinkRegistry {
    pub fn new() -> Self {
        SinkRegistry::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        SinkRegistry { sinks: RwLock::new(HashMap::new()), audit: RwLock::new(None), clock }
    }

    fn build_writer(&self, config: &SinkConfig) -> Result<RotatingFileWriter> {
        let options = WriterOptions { lock_mode: config.locking, clock: self.clock.clone() };
        RotatingFileWriter::with_options(&config.path, config.policy()?, options)
    }

    /// Opens a sink. Two sinks, the audit sink included, may not share a
    /// resolved path in one process.
    pub fn open(&self, name: &str, config: &SinkConfig) -> Result<Arc<RotatingFileWriter>> {
        let writer = Arc::new(self.build_writer(config)?);
        let mut map = self.sinks.write().unwrap_or_else(PoisonError::into_inner);

        if let Some((existing, _)) = map
            .iter()
            .find(|(other, sink)| other.as_str() != name && sink.writer.path() == writer.path())
        {
            return Err(Error::DuplicateSink {
                name: name.to_string(),
                existing: existing.clone(),
                path: writer.path().to_path_buf(),
            });
        }

        let audit = self.audit.read().unwrap_or_else(PoisonError::into_inner);
        if audit.as_ref().is_some_and(|a| a.path() == writer.path()) {
            return Err(Error::DuplicateSink {
                name: name.to_string(),
                existing: AUDIT.to_string(),
                path: writer.path().to_path_buf(),
            });
        }
        drop(audit);

        if let Some(old) = map.insert(name.to_string(), Sink { config: config.clone(), writer: writer.clone() }) {
            old.writer.close()?;
        }
        info!(sink = %name, path = %writer.path().display(), "sink opened");
        Ok(writer)
    }

    pub fn get(&self, name: &str) -> Result<Arc<RotatingFileWriter>> {
        let map = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).map(|s| s.writer.clone()).ok_or_else(|| Error::UnknownSink(name.to_string()))
    }

    /// Writes to the named sink, then copies the payload to the audit sink.
    ///
    /// Audit failures are logged and never fail the primary write.
    pub fn write(&self, name: &str, payload: &[u8]) -> Result<()> {
        let primary = self.get(name)?.write(payload);

        let audit = self.audit.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(audit) = audit {
            if let Err(e) = audit.write(payload) {
                warn!(sink = %name, error = %e, "audit copy failed");
            }
        }
        primary
    }

    pub fn rotate(&self, name: &str) -> Result<()> {
        self.get(name)?.rotate()
    }

    /// Closes and forgets a sink.
    pub fn close(&self, name: &str) -> Result<()> {
        let removed = self.sinks.write().unwrap_or_else(PoisonError::into_inner).remove(name);
        match removed {
            Some(sink) => {
                info!(sink = %name, "sink closed");
                sink.writer.close()
            }
            None => Err(Error::UnknownSink(name.to_string())),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let map = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every sink, sorted by name, audit sink last.
    pub fn info(&self) -> Vec<(String, WriterInfo)> {
        let mut out: Vec<(String, WriterInfo)> = {
            let map = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
            map.iter().map(|(name, sink)| (name.clone(), sink.writer.info())).collect()
        };
        out.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(audit) = self.audit.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            out.push((AUDIT.to_string(), audit.info()));
        }
        out
    }

    pub fn enable_audit(&self, config: &SinkConfig) -> Result<()> {
        let writer = Arc::new(self.build_writer(config)?);
        let previous = {
            let map = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
            if let Some((existing, _)) = map.iter().find(|(_, sink)| sink.writer.path() == writer.path()) {
                return Err(Error::DuplicateSink {
                    name: AUDIT.to_string(),
                    existing: existing.clone(),
                    path: writer.path().to_path_buf(),
                });
            }
            self.audit.write().unwrap_or_else(PoisonError::into_inner).replace(writer.clone())
        };
        info!(path = %writer.path().display(), "audit enabled");
        match previous {
            Some(old) => old.close(),
            None => Ok(()),
        }
    }

    /// Safe to call when auditing is off.
    pub fn disable_audit(&self) -> Result<()> {
        let previous = self.audit.write().unwrap_or_else(PoisonError::into_inner).take();
        match previous {
            Some(old) => {
                info!("audit disabled");
                old.close()
            }
            None => Ok(()),
        }
    }

    pub fn is_auditing(&self) -> bool {
        self.audit.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Closes every sink and the audit sink. Returns the first failure.
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<(String, Sink)> =
            self.sinks.write().unwrap_or_else(PoisonError::into_inner).drain().collect();
        let mut first_err = self.disable_audit().err();
        for (name, sink) in drained {
            if let Err(e) = sink.writer.close() {
                warn!(sink = %name, error = %e, "close failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn config_of(&self, name: &str) -> Option<SinkConfig> {
        let map = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).map(|s| s.config.clone())
    }
}

/*
    @@@
    @apply_config();
    . Validates every sink's policy before touching the registry; one bad sink rejects the whole config.
    . Keeps sinks whose config is unchanged, reopens the changed ones, opens the new ones.
    . Closes sinks that are no longer configured.
    . Keeps going after a failing sink and returns the first error.
*/
pub fn apply_config(cfg: &Config, registry: &SinkRegistry) -> Result<()> {
    cfg.policies()?;
    let mut first_err: Option<Error> = None;

    for name in registry.names() {
        if !cfg.sinks.contains_key(&name) {
            if let Err(e) = registry.close(&name) {
                first_err.get_or_insert(e);
            }
        }
    }

    let mut names: Vec<&String> = cfg.sinks.keys().collect();
    names.sort();
    for name in names {
        let sink_cfg = &cfg.sinks[name];
        match registry.config_of(name) {
            Some(current) if current == *sink_cfg => continue,
            Some(_) => info!(sink = %name, "config changed; reopening"),
            None => {}
        }
        if let Err(e) = registry.open(name, sink_cfg) {
            warn!(sink = %name, error = %e, "failed to open sink");
            first_err.get_or_insert(e);
        }
    }

    first_err.map_or(Ok(()), Err)
}
