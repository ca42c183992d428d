// src/machine_state.rs - Machine state model shared by the reconciler and the display
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single current status of the monitored machine.
///
/// The server models status as a combinable flag set serialized as a
/// comma-joined string (e.g. `"Printing, Paused"`). The kiosk collapses that
/// set into exactly one variant with [`classify_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineStatus {
    Unknown,
    Disconnected,
    Connecting,
    Idle,
    Printing,
    Printed,
    Paused,
    Canceled,
}

/// Classification precedence: first keyword found in the raw string wins.
const STATUS_PRIORITY: [(&str, MachineStatus); 7] = [
    ("Printing", MachineStatus::Printing),
    ("Paused", MachineStatus::Paused),
    ("Printed", MachineStatus::Printed),
    ("Canceled", MachineStatus::Canceled),
    ("Idle", MachineStatus::Idle),
    ("Connecting", MachineStatus::Connecting),
    ("Disconnected", MachineStatus::Disconnected),
];

impl MachineStatus {
    /// Human readable label used by the display.
    pub fn label(self) -> &'static str {
        match self {
            MachineStatus::Disconnected => "Disconnected",
            MachineStatus::Connecting => "Connecting...",
            MachineStatus::Idle => "Idle",
            MachineStatus::Printing => "Printing",
            MachineStatus::Printed => "Print Complete",
            MachineStatus::Paused => "Paused",
            MachineStatus::Canceled => "Canceled",
            MachineStatus::Unknown => "Unknown",
        }
    }

    /// Finished states the operator may acknowledge with "mark as idle".
    pub fn is_finished(self) -> bool {
        matches!(self, MachineStatus::Printed | MachineStatus::Canceled)
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Collapse a server status string into one [`MachineStatus`].
///
/// Matching is by substring with the fixed precedence
/// Printing > Paused > Printed > Canceled > Idle > Connecting > Disconnected.
/// Absent, empty and unrecognized input all yield `Unknown`.
pub fn classify_status(raw: Option<&str>) -> MachineStatus {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return MachineStatus::Unknown;
    };
    STATUS_PRIORITY
        .iter()
        .find(|(keyword, _)| raw.contains(keyword))
        .map(|&(_, status)| status)
        .unwrap_or(MachineStatus::Unknown)
}

/// Display label for a status.
pub fn label_for(status: MachineStatus) -> &'static str {
    status.label()
}

/// What to forget when the WebSocket link drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Keep nickname and job so the screen shows the last known values.
    #[default]
    KeepLastKnown,
    /// Reset nickname and job along with the connection flags.
    ClearAll,
}

/// The active print job, meaningful only while `MachineState::has_job` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintJobState {
    pub name: String,
    /// Expected 0..=100, passed through unclamped.
    pub percentage_complete: i64,
    /// Duration strings as sent by the server, e.g. `"00:30:00"` or `"1.02:30:00"`.
    pub remaining_time: String,
    pub total_time: String,
    pub sub_stage: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub ws_connected: bool,
    pub status: MachineStatus,
    /// Raw nickname from the server; may be empty.
    pub nickname: String,
    pub has_job: bool,
    pub job: PrintJobState,
}

impl MachineState {
    pub fn new() -> Self {
        Self {
            ws_connected: false,
            status: MachineStatus::Disconnected,
            nickname: String::new(),
            has_job: false,
            job: PrintJobState::default(),
        }
    }

    /// Name to show on screen, falling back to the configured machine ID.
    pub fn display_name<'a>(&'a self, machine_id: &'a str) -> &'a str {
        if self.nickname.is_empty() {
            machine_id
        } else {
            &self.nickname
        }
    }

    pub fn start_job(&mut self, name: &str) {
        self.has_job = true;
        self.job.name = name.to_string();
    }

    pub fn clear_job(&mut self) {
        self.has_job = false;
        self.job = PrintJobState::default();
    }

    pub fn link_up(&mut self) {
        self.ws_connected = true;
    }

    pub fn link_down(&mut self, policy: DisconnectPolicy) {
        self.ws_connected = false;
        self.status = MachineStatus::Disconnected;
        if policy == DisconnectPolicy::ClearAll {
            self.nickname.clear();
            self.clear_job();
        }
    }

    /// `has_job == false` implies an empty job.
    pub fn is_consistent(&self) -> bool {
        self.has_job || self.job == PrintJobState::default()
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}
