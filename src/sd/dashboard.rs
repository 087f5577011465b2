use crate::sd::dispatch::{Action, DispatchError, Dispatcher};
use crate::sd::status::{self, StatusClass};
use serde::Serialize;

/// One row of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewRecord {
    pub service: String,
    pub title: String,
    pub class: StatusClass,
    pub uptime: String,
    pub disabled_start: bool,
    pub disabled_stop: bool,
    pub disabled_restart: bool,
}

/// Build one record per configured service, in registry order.
///
/// The first failing unit query aborts the whole dashboard.
pub fn build_dashboard(dispatcher: &Dispatcher) -> Result<Vec<ViewRecord>, DispatchError> {
    let registry = dispatcher.registry();
    let mut out = Vec::with_capacity(registry.len());
    for svc in registry.iter() {
        let state = dispatcher.run(&svc.name, Action::Status)?;
        let uptime = dispatcher.run(&svc.name, Action::Uptime)?;

        let class = status::classify_status(state.outcome.as_text().unwrap_or_default());
        let controls = class.controls();
        out.push(ViewRecord {
            service: svc.name.clone(),
            title: svc.title.clone(),
            class,
            uptime: status::display_uptime(class, uptime.outcome.as_text().unwrap_or_default()),
            disabled_start: controls.disable_start,
            disabled_stop: controls.disable_stop,
            disabled_restart: controls.disable_restart,
        });
    }
    Ok(out)
}
