//! Unit control over the systemd D-Bus API.
//!
//! Bus: `org.freedesktop.systemd1` on the system bus, or on the caller's session bus when the
//! dashboard runs with `scope: user`.

use crate::sd::config::Scope;
use anyhow::Context as _;
use zbus::blocking::Connection;
use zbus::proxy::CacheProperties;
use zbus::zvariant::OwnedObjectPath;

/// Job mode passed to every Start/Stop/...Unit call.
const JOB_MODE: &str = "replace";

/// Operations the dispatcher needs from the service manager.
///
/// Control methods only enqueue a job; they return once systemd accepted it.
pub trait UnitControl: Send + Sync {
    fn start_unit(&self, unit: &str) -> anyhow::Result<()>;
    fn stop_unit(&self, unit: &str) -> anyhow::Result<()>;
    fn restart_unit(&self, unit: &str) -> anyhow::Result<()>;
    fn reload_unit(&self, unit: &str) -> anyhow::Result<()>;
    fn reload_or_restart_unit(&self, unit: &str) -> anyhow::Result<()>;

    fn load_state(&self, unit: &str) -> anyhow::Result<String>;
    fn active_state(&self, unit: &str) -> anyhow::Result<String>;
    /// Microseconds since the epoch at which the unit last entered the active state.
    /// `None` if it never did.
    fn uptime_micros(&self, unit: &str) -> anyhow::Result<Option<u64>>;
}

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
trait Systemd1Manager {
    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn reload_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn reload_or_restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    /// Returns the unit object, loading it from disk if needed.
    /// Unknown units still resolve; their LoadState is `not-found`.
    fn load_unit(&self, name: &str) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Unit",
    default_service = "org.freedesktop.systemd1"
)]
trait Systemd1Unit {
    #[zbus(property)]
    fn load_state(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn active_state(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn active_enter_timestamp(&self) -> zbus::Result<u64>;
}

/// `UnitControl` backed by one shared D-Bus connection.
#[derive(Clone)]
pub struct SystemdBus {
    connection: Connection,
}

impl SystemdBus {
    pub fn connect(scope: Scope) -> anyhow::Result<Self> {
        let connection = match scope {
            Scope::System => Connection::system().context("failed to connect to the system D-Bus")?,
            Scope::User => Connection::session().context("failed to connect to the session D-Bus")?,
        };
        Ok(Self { connection })
    }

    fn manager(&self) -> anyhow::Result<Systemd1ManagerProxyBlocking<'_>> {
        Systemd1ManagerProxyBlocking::new(&self.connection)
            .context("failed to create systemd Manager proxy")
    }

    fn unit(&self, unit: &str) -> anyhow::Result<Systemd1UnitProxyBlocking<'_>> {
        let path = self
            .manager()?
            .load_unit(unit)
            .with_context(|| format!("failed to load unit {unit}"))?;
        Systemd1UnitProxyBlocking::builder(&self.connection)
            .path(path)
            .context("invalid unit object path")?
            .cache_properties(CacheProperties::No)
            .build()
            .context("failed to create systemd Unit proxy")
    }
}

impl UnitControl for SystemdBus {
    fn start_unit(&self, unit: &str) -> anyhow::Result<()> {
        self.manager()?
            .start_unit(unit, JOB_MODE)
            .with_context(|| format!("StartUnit {unit}"))?;
        Ok(())
    }

    fn stop_unit(&self, unit: &str) -> anyhow::Result<()> {
        self.manager()?
            .stop_unit(unit, JOB_MODE)
            .with_context(|| format!("StopUnit {unit}"))?;
        Ok(())
    }

    fn restart_unit(&self, unit: &str) -> anyhow::Result<()> {
        self.manager()?
            .restart_unit(unit, JOB_MODE)
            .with_context(|| format!("RestartUnit {unit}"))?;
        Ok(())
    }

    fn reload_unit(&self, unit: &str) -> anyhow::Result<()> {
        self.manager()?
            .reload_unit(unit, JOB_MODE)
            .with_context(|| format!("ReloadUnit {unit}"))?;
        Ok(())
    }

    fn reload_or_restart_unit(&self, unit: &str) -> anyhow::Result<()> {
        self.manager()?
            .reload_or_restart_unit(unit, JOB_MODE)
            .with_context(|| format!("ReloadOrRestartUnit {unit}"))?;
        Ok(())
    }

    fn load_state(&self, unit: &str) -> anyhow::Result<String> {
        self.unit(unit)?
            .load_state()
            .with_context(|| format!("failed to read LoadState of {unit}"))
    }

    fn active_state(&self, unit: &str) -> anyhow::Result<String> {
        self.unit(unit)?
            .active_state()
            .with_context(|| format!("failed to read ActiveState of {unit}"))
    }

    fn uptime_micros(&self, unit: &str) -> anyhow::Result<Option<u64>> {
        let ts = self
            .unit(unit)?
            .active_enter_timestamp()
            .with_context(|| format!("failed to read ActiveEnterTimestamp of {unit}"))?;
        Ok((ts != 0).then_some(ts))
    }
}
