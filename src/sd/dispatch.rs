//! Maps `(service, action)` pairs onto unit operations and wraps the result in a
//! `{action: outcome}` envelope.

use crate::sd::journal::JournalReader;
use crate::sd::registry::{ServiceConfig, ServiceRegistry};
use crate::sd::status::{self, Clock, SystemClock, NOT_FOUND};
use crate::sd::unit::UnitControl;
use serde::ser::SerializeMap as _;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Lines returned by the `journal` action and the journal page.
pub const DEFAULT_JOURNAL_LINES: usize = 100;

pub const OK: &str = "OK";
pub const FAIL: &str = "Fail";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Reload,
    ReloadOrRestart,
    Status,
    Uptime,
    Journal,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Reload => "reload",
            Action::ReloadOrRestart => "reloadorrestart",
            Action::Status => "status",
            Action::Uptime => "uptime",
            Action::Journal => "journal",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            "reload" => Ok(Action::Reload),
            "reloadorrestart" => Ok(Action::ReloadOrRestart),
            "status" => Ok(Action::Status),
            "uptime" => Ok(Action::Uptime),
            "journal" => Ok(Action::Journal),
            _ => Err(DispatchError::UnsupportedAction(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Sorry, but '{0}' is not defined in config.")]
    NotConfigured(String),

    #[error("Sorry, but cannot perform '{0}' action.")]
    UnsupportedAction(String),

    #[error("invalid line count '{0}': expected a non-negative integer")]
    InvalidArgument(String),

    #[error("{action} on {unit} failed: {source:#}")]
    TransportFailure {
        action: Action,
        unit: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Text(String),
    Lines(Vec<String>),
}

impl Outcome {
    pub fn text(s: impl Into<String>) -> Self {
        Outcome::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outcome::Text(s) => Some(s),
            Outcome::Lines(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.as_text() == Some(NOT_FOUND)
    }
}

/// Serialized as a single-entry object: `{"<action>": <outcome>}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub action: Action,
    pub outcome: Outcome,
}

impl Serialize for ActionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.action.as_str(), &self.outcome)?;
        map.end()
    }
}

pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    units: Arc<dyn UnitControl>,
    journal: Arc<dyn JournalReader>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        units: Arc<dyn UnitControl>,
        journal: Arc<dyn JournalReader>,
    ) -> Self {
        Self {
            registry,
            units,
            journal,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Run the action named by `action` on `service`.
    ///
    /// The service is checked before the action keyword, so an unknown service is always
    /// `NotConfigured` whatever the action.
    pub fn dispatch(&self, service: &str, action: &str) -> Result<ActionResult, DispatchError> {
        self.lookup(service)?;
        let action: Action = action.parse()?;
        self.run(service, action)
    }

    pub fn run(&self, service: &str, action: Action) -> Result<ActionResult, DispatchError> {
        let svc = self.lookup(service)?;
        let outcome = match action {
            Action::Start => self.control(svc, action, |u| self.units.start_unit(u)),
            Action::Stop => self.control(svc, action, |u| self.units.stop_unit(u)),
            Action::Restart => self.control(svc, action, |u| self.units.restart_unit(u)),
            Action::Reload => self.control(svc, action, |u| self.units.reload_unit(u)),
            Action::ReloadOrRestart => {
                self.control(svc, action, |u| self.units.reload_or_restart_unit(u))
            }
            Action::Status => self.status(svc)?,
            Action::Uptime => self.uptime(svc)?,
            Action::Journal => return self.read_journal(svc, Ok(DEFAULT_JOURNAL_LINES)),
        };
        Ok(ActionResult { action, outcome })
    }

    /// Last `lines` journal lines of `service`; `lines` comes straight from the URL.
    ///
    /// A unit systemd does not know yields `not-found` before `lines` is looked at.
    pub fn journal(&self, service: &str, lines: &str) -> Result<ActionResult, DispatchError> {
        let svc = self.lookup(service)?;
        let parsed = lines
            .parse::<usize>()
            .map_err(|_| DispatchError::InvalidArgument(lines.to_string()));
        self.read_journal(svc, parsed)
    }

    fn lookup(&self, service: &str) -> Result<&ServiceConfig, DispatchError> {
        self.registry
            .get(service)
            .ok_or_else(|| DispatchError::NotConfigured(service.to_string()))
    }

    fn control(
        &self,
        svc: &ServiceConfig,
        action: Action,
        op: impl FnOnce(&str) -> anyhow::Result<()>,
    ) -> Outcome {
        match op(&svc.unit) {
            Ok(()) => {
                info!(component = "dispatch", service = %svc.name, unit = %svc.unit, %action, "job queued");
                Outcome::text(OK)
            }
            Err(e) => {
                warn!(component = "dispatch", service = %svc.name, unit = %svc.unit, %action, error = %format!("{e:#}"), "job rejected");
                Outcome::text(FAIL)
            }
        }
    }

    fn is_absent(&self, svc: &ServiceConfig, action: Action) -> Result<bool, DispatchError> {
        let load = self
            .units
            .load_state(&svc.unit)
            .map_err(|e| transport(svc, action, e))?;
        Ok(load == NOT_FOUND)
    }

    fn status(&self, svc: &ServiceConfig) -> Result<Outcome, DispatchError> {
        if self.is_absent(svc, Action::Status)? {
            return Ok(Outcome::text(NOT_FOUND));
        }
        let active = self
            .units
            .active_state(&svc.unit)
            .map_err(|e| transport(svc, Action::Status, e))?;
        Ok(Outcome::Text(active))
    }

    fn uptime(&self, svc: &ServiceConfig) -> Result<Outcome, DispatchError> {
        if self.is_absent(svc, Action::Uptime)? {
            return Ok(Outcome::text(NOT_FOUND));
        }
        let started = self
            .units
            .uptime_micros(&svc.unit)
            .map_err(|e| transport(svc, Action::Uptime, e))?;
        Ok(Outcome::Text(status::format_uptime(started, self.clock.now())))
    }

    fn read_journal(
        &self,
        svc: &ServiceConfig,
        lines: Result<usize, DispatchError>,
    ) -> Result<ActionResult, DispatchError> {
        let outcome = if self.is_absent(svc, Action::Journal)? {
            Outcome::text(NOT_FOUND)
        } else {
            let lines = lines?;
            let tail = self
                .journal
                .tail(&svc.unit, lines)
                .map_err(|e| transport(svc, Action::Journal, e))?;
            Outcome::Lines(tail)
        };
        Ok(ActionResult {
            action: Action::Journal,
            outcome,
        })
    }
}

fn transport(svc: &ServiceConfig, action: Action, source: anyhow::Error) -> DispatchError {
    warn!(component = "dispatch", service = %svc.name, unit = %svc.unit, %action, error = %format!("{source:#}"), "unit query failed");
    DispatchError::TransportFailure {
        action,
        unit: svc.unit.clone(),
        source,
    }
}
