// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Translation of native tool status lines into event-plane updates.
//!
//! apt's machine status stream interleaves download (`dlstatus`) and
//! install (`pmstatus`) records. Identical percents are deduped and the
//! terminal done text is emitted exactly once.

use crate::events::{Events, TaskName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Download,
    Install,
}

/// Feeds parsed status lines into the event plane
pub struct Translator<'a> {
    events: &'a Events,
    transaction: Option<String>,
    last: Option<(Stage, u8)>,
    finished: bool,
}

impl<'a> Translator<'a> {
    pub fn new(events: &'a Events, transaction: Option<String>) -> Self {
        Self {
            events,
            transaction,
            last: None,
            finished: false,
        }
    }

    /// Consume one raw output line; non-status lines are ignored
    pub fn feed(&mut self, line: &str) {
        let Some((stage, percent, message)) = parse_status(line) else {
            return;
        };

        // close the download phase once installation starts
        if stage == Stage::Install
            && matches!(self.last, Some((Stage::Download, _)))
        {
            self.events.progress_done(
                TaskName::Download,
                "Downloading packages",
                "Packages downloaded",
                self.transaction.clone(),
            );
        }

        if self.last == Some((stage, percent)) {
            return;
        }
        self.last = Some((stage, percent));

        let name = match stage {
            Stage::Download => TaskName::Download,
            Stage::Install => TaskName::UnpackAndInstall,
        };
        self.events
            .progress(name, message, percent, self.transaction.clone());
    }

    /// Emit the terminal done text; safe to call more than once
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        match self.last {
            Some((Stage::Download, _)) => {
                self.events.progress_done(
                    TaskName::Download,
                    "Downloading packages",
                    "Packages downloaded",
                    self.transaction.clone(),
                );
            }
            Some((Stage::Install, _)) => {
                self.events.progress_done(
                    TaskName::UnpackAndInstall,
                    "Installing packages",
                    "Packages installed",
                    self.transaction.clone(),
                );
            }
            None => {}
        }
    }
}

/// `pmstatus:hello:42.5:Unpacking hello` → (Install, 42, "Unpacking hello")
fn parse_status(line: &str) -> Option<(Stage, u8, String)> {
    let mut fields = line.splitn(4, ':');
    let kind = fields.next()?;

    let stage = match kind {
        "dlstatus" => Stage::Download,
        "pmstatus" => Stage::Install,
        _ => return None,
    };

    let _id = fields.next()?;
    let percent: f64 = fields.next()?.trim().parse().ok()?;
    let message = fields.next().unwrap_or_default().trim().to_owned();

    Some((stage, percent.clamp(0.0, 100.0) as u8, message))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::events::Events;

    fn collect(lines: &[&str]) -> Vec<String> {
        let events = Events::default();
        let (_id, mut rx) = events.hub().register();

        let mut translator = Translator::new(&events, Some("tx".into()));
        for line in lines {
            translator.feed(line);
        }
        translator.finish();
        translator.finish();

        let mut frames = vec![];
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn dedupes_identical_percents() {
        let frames = collect(&[
            "dlstatus:1:10.0:Retrieving hello",
            "dlstatus:1:10.4:Retrieving hello",
            "dlstatus:1:20.0:Retrieving hello",
            "noise line",
        ]);

        // 10, 20, then the single download done frame
        assert_eq!(frames.len(), 3);
        assert!(frames[2].contains("Packages downloaded"));
        assert_eq!(
            frames
                .iter()
                .filter(|frame| frame.contains("progressDoneText"))
                .count(),
            1
        );
    }

    #[test]
    fn download_closes_when_install_begins() {
        let frames = collect(&[
            "dlstatus:1:50.0:Retrieving hello",
            "pmstatus:hello:10.0:Unpacking hello",
        ]);

        assert!(frames[1].contains("Packages downloaded"));
        assert!(frames[2].contains("system.UnpackAndInstall"));
        assert!(frames[3].contains("Packages installed"));
    }

    #[test]
    fn ignores_non_status_output() {
        let frames = collect(&["Reading package lists...", "Building dependency tree..."]);
        assert!(frames.is_empty());
    }
}
