//! Built-in modules.
//!
//! | kind          | types             | parameters                         |
//! |---------------|-------------------|------------------------------------|
//! | `sequence`    | source            | `count`, `field`, `interval_ms`    |
//! | `select`      | processor         | `fields` (comma separated)         |
//! | `passthrough` | processor         |                                    |
//! | `log`         | sink              | `level`                            |
//! | `noop`        | job               |                                    |

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_types::{Envelope, Parameters, StageType};

use crate::catalog::{Module, ModuleCatalog};
use crate::error::{ModuleError, ResolutionError};

const DEFAULT_SEQUENCE_FIELD: &str = "sequence";
const DEFAULT_SEQUENCE_INTERVAL_MS: u64 = 1_000;

pub(crate) fn register_builtin(catalog: &mut ModuleCatalog) {
    catalog.register("sequence", &[StageType::Source], |p| {
        Ok(Box::new(SequenceSource::from_parameters(p)?))
    });
    catalog.register("select", &[StageType::Processor], |p| {
        Ok(Box::new(SelectProcessor::from_parameters(p)?))
    });
    catalog.register("passthrough", &[StageType::Processor], |p| {
        reject_unknown("passthrough", p, &[])?;
        Ok(Box::new(Passthrough))
    });
    catalog.register("log", &[StageType::Sink], |p| {
        Ok(Box::new(LogSink::from_parameters(p)?))
    });
    catalog.register("noop", &[StageType::Job], |p| {
        reject_unknown("noop", p, &[])?;
        Ok(Box::new(NoopJob))
    });
}

fn reject_unknown(kind: &str, params: &Parameters, allowed: &[&str]) -> Result<(), ResolutionError> {
    match params.keys().find(|name| !allowed.contains(&name.as_str())) {
        Some(name) => Err(ResolutionError::invalid_parameter(
            kind,
            name.as_str(),
            "unknown parameter",
        )),
        None => Ok(()),
    }
}

fn parse_param<T>(kind: &str, params: &Parameters, name: &str) -> Result<Option<T>, ResolutionError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    params
        .get(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ResolutionError::invalid_parameter(kind, name, format!("'{raw}': {e}")))
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// sequence
// ---------------------------------------------------------------------------

/// Emits `{<field>: n}` for n = 0, 1, 2, ... every `interval_ms`,
/// stopping after `count` envelopes when set.
#[derive(Debug)]
pub struct SequenceSource {
    field: String,
    count: Option<u64>,
    interval: Duration,
    emitted: u64,
}

impl SequenceSource {
    /// # Errors
    ///
    /// [`ResolutionError::InvalidParameter`] for unknown or unparsable
    /// parameters.
    pub fn from_parameters(params: &Parameters) -> Result<Self, ResolutionError> {
        reject_unknown("sequence", params, &["count", "field", "interval_ms"])?;
        let field = params
            .get("field")
            .map_or(DEFAULT_SEQUENCE_FIELD, String::as_str)
            .to_string();
        if field.is_empty() {
            return Err(ResolutionError::invalid_parameter(
                "sequence",
                "field",
                "must not be empty",
            ));
        }
        Ok(Self {
            field,
            count: parse_param("sequence", params, "count")?,
            interval: Duration::from_millis(
                parse_param("sequence", params, "interval_ms")?
                    .unwrap_or(DEFAULT_SEQUENCE_INTERVAL_MS),
            ),
            emitted: 0,
        })
    }
}

#[async_trait]
impl Module for SequenceSource {
    async fn next(&mut self) -> Result<Option<Envelope>, ModuleError> {
        if self.count.is_some_and(|count| self.emitted >= count) {
            return Ok(None);
        }
        if self.emitted > 0 {
            if self.interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.interval).await;
            }
        }
        let n = i64::try_from(self.emitted)
            .map_err(|_| ModuleError::processing("sequence overflowed i64"))?;
        self.emitted += 1;
        Ok(Some(Envelope::builder().put(self.field.as_str(), n).build()?))
    }
}

// ---------------------------------------------------------------------------
// select
// ---------------------------------------------------------------------------

/// Keeps only the named fields, in their original order.
#[derive(Debug)]
pub struct SelectProcessor {
    fields: BTreeSet<String>,
}

impl SelectProcessor {
    /// # Errors
    ///
    /// [`ResolutionError::InvalidParameter`] when `fields` is missing or
    /// empty.
    pub fn from_parameters(params: &Parameters) -> Result<Self, ResolutionError> {
        reject_unknown("select", params, &["fields"])?;
        let fields: BTreeSet<String> = params
            .get("fields")
            .into_iter()
            .flat_map(|raw| raw.split(','))
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            return Err(ResolutionError::invalid_parameter(
                "select",
                "fields",
                "at least one field name is required",
            ));
        }
        Ok(Self { fields })
    }
}

#[async_trait]
impl Module for SelectProcessor {
    async fn process(
        &mut self,
        envelope: Arc<Envelope>,
    ) -> Result<Option<Arc<Envelope>>, ModuleError> {
        let selected = envelope.select(|name, _| self.fields.contains(name));
        Ok(Some(Arc::new(selected)))
    }
}

// ---------------------------------------------------------------------------
// passthrough
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Passthrough;

#[async_trait]
impl Module for Passthrough {
    async fn process(
        &mut self,
        envelope: Arc<Envelope>,
    ) -> Result<Option<Arc<Envelope>>, ModuleError> {
        Ok(Some(envelope))
    }
}

// ---------------------------------------------------------------------------
// log
// ---------------------------------------------------------------------------

/// Logs each envelope's external form.
#[derive(Debug)]
pub struct LogSink {
    level: tracing::Level,
}

impl LogSink {
    /// # Errors
    ///
    /// [`ResolutionError::InvalidParameter`] for an unknown level.
    pub fn from_parameters(params: &Parameters) -> Result<Self, ResolutionError> {
        reject_unknown("log", params, &["level"])?;
        let level = parse_param::<tracing::Level>("log", params, "level")?
            .unwrap_or(tracing::Level::INFO);
        Ok(Self { level })
    }
}

#[async_trait]
impl Module for LogSink {
    async fn process(
        &mut self,
        envelope: Arc<Envelope>,
    ) -> Result<Option<Arc<Envelope>>, ModuleError> {
        let payload = envelope.to_json();
        match self.level {
            tracing::Level::TRACE => tracing::trace!(%payload, "envelope"),
            tracing::Level::DEBUG => tracing::debug!(%payload, "envelope"),
            tracing::Level::INFO => tracing::info!(%payload, "envelope"),
            tracing::Level::WARN => tracing::warn!(%payload, "envelope"),
            _ => tracing::error!(%payload, "envelope"),
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// noop
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct NoopJob;

#[async_trait]
impl Module for NoopJob {
    async fn run(&mut self) -> Result<(), ModuleError> {
        tracing::debug!("noop job ran");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn sequence_counts_up_then_stops() {
        let mut source = SequenceSource::from_parameters(&params(&[
            ("count", "3"),
            ("field", "n"),
            ("interval_ms", "0"),
        ]))
        .unwrap();
        let mut seen = Vec::new();
        while let Some(env) = source.next().await.unwrap() {
            seen.push(env.get_i64("n").unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(source.next().await.unwrap().is_none());
    }

    #[test]
    fn sequence_rejects_bad_parameters() {
        let err = SequenceSource::from_parameters(&params(&[("count", "many")])).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidParameter { ref name, .. } if name == "count"));
        let err = SequenceSource::from_parameters(&params(&[("colour", "red")])).unwrap_err();
        assert!(err.to_string().contains("unknown parameter"));
    }

    #[tokio::test]
    async fn select_keeps_named_fields_in_order() {
        let mut select = SelectProcessor::from_parameters(&params(&[("fields", "c, a")])).unwrap();
        let env = Envelope::builder()
            .put("a", 1)
            .put("b", 2)
            .put("c", 3)
            .build()
            .unwrap();
        let out = select.process(Arc::new(env)).await.unwrap().unwrap();
        assert_eq!(out.field_names().to_vec(), vec!["a", "c"]);
    }

    #[test]
    fn select_requires_fields() {
        assert!(SelectProcessor::from_parameters(&params(&[])).is_err());
        assert!(SelectProcessor::from_parameters(&params(&[("fields", " , ")])).is_err());
    }

    #[test]
    fn log_level_is_parsed() {
        assert_eq!(
            LogSink::from_parameters(&params(&[("level", "warn")])).unwrap().level,
            tracing::Level::WARN
        );
        assert!(LogSink::from_parameters(&params(&[("level", "loud")])).is_err());
    }

    #[tokio::test]
    async fn log_sink_emits_nothing_downstream() {
        let mut sink = LogSink::from_parameters(&params(&[])).unwrap();
        let env = Arc::new(Envelope::builder().put("x", "y").build().unwrap());
        assert!(sink.process(env).await.unwrap().is_none());
    }
}
