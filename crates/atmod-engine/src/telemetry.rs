//! Metric declarations.
//!
//! The engine records through the `metrics` facade; installing a recorder
//! is up to the host. Call [`describe_metrics`] once at startup to register
//! descriptions.
//!
//! ```rust,ignore
//! use atmod_engine::telemetry::metric_defs;
//!
//! metrics::counter!(metric_defs::COMMANDS.name, "outcome" => "ok").increment(1);
//! ```

use metrics::{describe_counter, describe_gauge, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "atmod.link.tx_bytes").
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
        }
    }
}

/// All metric definitions for the engine.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Command dispatch
    // ========================================================================

    /// Dispatched command lines.
    ///
    /// Labels: outcome (ok, deferred, syntax, rejected, precondition, resource, io)
    pub const COMMANDS: Metric = Metric::counter("atmod.commands")
        .with_description("Command lines dispatched, by outcome")
        .with_unit(Unit::Count)
        .with_labels(&["outcome"]);

    /// Complete lines answered with `busy p...`.
    pub const COMMANDS_BUSY: Metric = Metric::counter("atmod.commands.busy")
        .with_description("Command lines rejected while an operation was pending")
        .with_unit(Unit::Count);

    // ========================================================================
    // Links
    // ========================================================================

    /// Payload bytes written to links.
    ///
    /// Labels: kind
    pub const LINK_TX_BYTES: Metric = Metric::counter("atmod.link.tx_bytes")
        .with_description("Payload bytes written to network links")
        .with_unit(Unit::Bytes)
        .with_labels(&["kind"]);

    /// Payload bytes read from links.
    ///
    /// Labels: kind
    pub const LINK_RX_BYTES: Metric = Metric::counter("atmod.link.rx_bytes")
        .with_description("Payload bytes read from network links")
        .with_unit(Unit::Bytes)
        .with_labels(&["kind"]);

    /// Links currently occupying a slot.
    pub const LINKS_OPEN: Metric = Metric::gauge("atmod.link.open")
        .with_description("Occupied link slots")
        .with_unit(Unit::Count);

    // ========================================================================
    // Certificates
    // ========================================================================

    /// Certificate load attempts.
    ///
    /// Labels: outcome (added, duplicate, capacity, invalid)
    pub const CERT_LOADS: Metric = Metric::counter("atmod.cert.loads")
        .with_description("Certificate load attempts, by outcome")
        .with_unit(Unit::Count)
        .with_labels(&["outcome"]);

    /// Every declared metric.
    pub const ALL: &[Metric] = &[
        COMMANDS,
        COMMANDS_BUSY,
        LINK_TX_BYTES,
        LINK_RX_BYTES,
        LINKS_OPEN,
        CERT_LOADS,
    ];
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
