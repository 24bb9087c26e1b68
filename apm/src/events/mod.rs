// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-process event plane.
//!
//! Operations describe themselves as tasks; every update lands in the task
//! table and fans out to whichever sinks are attached: the CLI spinner,
//! the D-Bus signal and the WebSocket hub. Sinks render, they never mutate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::warn;
use serde::{Deserialize, Serialize};

pub use self::hub::Hub;

pub mod hub;

use crate::environment;

/// Well known task names; the wire form is the localisation key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
    Install,
    Remove,
    Update,
    Upgrade,
    Reinstall,
    ImageApply,
    ImageUpdate,
    Working,
    AptUpdate,
    UpdateAllPackagesDb,
    Download,
    UnpackAndInstall,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "system.Install",
            Self::Remove => "system.Remove",
            Self::Update => "system.Update",
            Self::Upgrade => "system.Upgrade",
            Self::Reinstall => "system.Reinstall",
            Self::ImageApply => "system.ImageApply",
            Self::ImageUpdate => "system.ImageUpdate",
            Self::Working => "system.Working",
            Self::AptUpdate => "system.AptUpdate",
            Self::UpdateAllPackagesDb => "system.updateAllPackagesDB",
            Self::Download => "system.Download",
            Self::UnpackAndInstall => "system.UnpackAndInstall",
        }
    }
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Notification,
    Progress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Before,
    After,
}

/// One update flowing through the plane
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub name: TaskName,
    pub view: String,
    pub state: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_done_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

#[derive(Debug, Clone)]
struct Task {
    kind: Kind,
    percent: u8,
}

/// Sink wiring shared by every operation
#[derive(Debug, Clone, Default)]
pub struct Events {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
    spinner: Arc<RwLock<Option<Arc<tui::Spinner>>>>,
    hub: Hub,
    dbus: Arc<RwLock<Option<zbus::Connection>>>,
}

impl Events {
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Attach the CLI spinner sink
    pub fn attach_spinner(&self, spinner: Arc<tui::Spinner>) {
        *self.spinner.write().expect("events lock") = Some(spinner);
    }

    pub fn detach_spinner(&self) {
        *self.spinner.write().expect("events lock") = None;
    }

    pub fn spinner(&self) -> Option<Arc<tui::Spinner>> {
        self.spinner.read().expect("events lock").clone()
    }

    /// Attach the bus used for `Notification` signals
    pub fn attach_dbus(&self, connection: zbus::Connection) {
        *self.dbus.write().expect("events lock") = Some(connection);
    }

    /// Outstanding (unclosed) task count, used to verify pairing
    pub fn open_tasks(&self) -> usize {
        self.tasks.lock().expect("events lock").len()
    }

    /// Frame a task: `before` inserts, `after` completes and removes
    pub fn notify(&self, name: TaskName, view: impl Into<String>, state: Phase, transaction: Option<String>) {
        self.update(Event {
            kind: Kind::Notification,
            name,
            view: view.into(),
            state,
            progress: None,
            progress_done_text: None,
            transaction,
        });
    }

    pub fn progress(
        &self,
        name: TaskName,
        view: impl Into<String>,
        percent: u8,
        transaction: Option<String>,
    ) {
        self.update(Event {
            kind: Kind::Progress,
            name,
            view: view.into(),
            state: Phase::Before,
            progress: Some(percent),
            progress_done_text: None,
            transaction,
        });
    }

    pub fn progress_done(
        &self,
        name: TaskName,
        view: impl Into<String>,
        done_text: impl Into<String>,
        transaction: Option<String>,
    ) {
        self.update(Event {
            kind: Kind::Progress,
            name,
            view: view.into(),
            state: Phase::After,
            progress: None,
            progress_done_text: Some(done_text.into()),
            transaction,
        });
    }

    /// Core state machine + fan-out
    pub fn update(&self, mut event: Event) {
        let key = task_key(&event);

        {
            let mut tasks = self.tasks.lock().expect("events lock");
            match event.state {
                Phase::Before => {
                    let task = tasks.entry(key).or_insert(Task {
                        kind: event.kind,
                        percent: 0,
                    });
                    // percents clamp and never move backwards
                    if let Some(percent) = event.progress {
                        task.percent = task.percent.max(percent.min(100));
                        event.progress = Some(task.percent);
                    }
                }
                Phase::After => {
                    // terminal background events close tasks they never opened
                    tasks.remove(&key);
                    // a finished progress task lands on 100
                    if event.kind == Kind::Progress {
                        event.progress = Some(event.progress.unwrap_or(100).min(100));
                    }
                }
            }
        }

        self.render(&event);
        self.emit(&event);
    }

    /// Local spinner rendering
    fn render(&self, event: &Event) {
        let Some(spinner) = self.spinner() else {
            return;
        };

        match (event.state, event.kind) {
            (Phase::Before, Kind::Progress) => spinner.update(&event.view, event.progress),
            (Phase::Before, Kind::Notification) => spinner.update(&event.view, None),
            (Phase::After, Kind::Progress) => {
                let done = event
                    .progress_done_text
                    .clone()
                    .unwrap_or_else(|| event.view.clone());
                spinner.finish_task(&done);
            }
            (Phase::After, Kind::Notification) => {
                spinner.finish_task(&event.view);
            }
        }
    }

    /// Remote fan-out: WebSocket frame always, bus signal when attached
    fn emit(&self, event: &Event) {
        let Ok(frame) = serde_json::to_string(event) else {
            return;
        };

        self.hub.broadcast(&frame);

        if let Some(connection) = self.dbus.read().expect("events lock").clone() {
            tokio::spawn(async move {
                let result = connection
                    .emit_signal(
                        None::<&str>,
                        environment::BUS_PATH,
                        environment::BUS_NAME,
                        "Notification",
                        &frame,
                    )
                    .await;
                if let Err(err) = result {
                    warn!("failed to emit Notification signal: {err}");
                }
            });
        }
    }
}

fn task_key(event: &Event) -> String {
    match &event.transaction {
        Some(transaction) => format!("{}:{transaction}", event.name),
        None => event.name.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn before_after_pairs_close() {
        let events = Events::default();

        events.notify(TaskName::Install, "Installing", Phase::Before, Some("t1".into()));
        events.progress(TaskName::Download, "Downloading", 10, Some("t1".into()));
        assert_eq!(events.open_tasks(), 2);

        events.progress_done(TaskName::Download, "Downloading", "Downloaded", Some("t1".into()));
        events.notify(TaskName::Install, "Installing", Phase::After, Some("t1".into()));
        assert_eq!(events.open_tasks(), 0);
    }

    #[test]
    fn percent_clamped_and_monotonic() {
        let events = Events::default();
        let (_id, mut rx) = events.hub().register();

        events.progress(TaskName::Download, "dl", 50, None);
        events.progress(TaskName::Download, "dl", 30, None);
        events.progress(TaskName::Download, "dl", 200, None);

        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"progress\":50"));
        let frame = rx.try_recv().unwrap();
        // regressing percent is coerced forward
        assert!(frame.contains("\"progress\":50"));
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"progress\":100"));

        events.progress_done(TaskName::Download, "dl", "done", None);
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"progress\":100"));
        assert!(frame.contains("\"progressDoneText\":\"done\""));
    }

    #[test]
    fn frames_carry_transaction_and_wire_names() {
        let events = Events::default();
        let (_id, mut rx) = events.hub().register();

        events.notify(TaskName::Update, "Refreshing", Phase::Before, Some("tx-9".into()));

        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"name\":\"system.Update\""));
        assert!(frame.contains("\"transaction\":\"tx-9\""));
        assert!(frame.contains("\"state\":\"before\""));
        assert!(frame.contains("\"type\":\"notification\""));

        events.notify(TaskName::Update, "Refreshing", Phase::After, Some("tx-9".into()));
    }
}
