// src/display.rs - Presentation model derived from the machine state
use std::fmt;

use chrono::{DateTime, Utc};

use crate::machine_state::{MachineState, MachineStatus};

/// Status bar colour for each status, as 0xRRGGBB.
pub fn status_color(status: MachineStatus) -> u32 {
    match status {
        MachineStatus::Idle => 0x27AE60,
        MachineStatus::Printing => 0x2980B9,
        MachineStatus::Paused => 0xF39C12,
        MachineStatus::Printed => 0x8E44AD,
        MachineStatus::Canceled => 0xE74C3C,
        MachineStatus::Connecting => 0x95A5A6,
        MachineStatus::Disconnected | MachineStatus::Unknown => 0x555555,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanel {
    pub name: String,
    pub percent: i64,
    pub percent_label: String,
    /// `"Remaining: <r>  /  <t>"`, or empty when no remaining time is known.
    pub time_label: String,
    pub sub_stage: String,
}

/// Everything one screen refresh needs, computed without touching a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayModel {
    pub status_label: &'static str,
    pub status_color: u32,
    pub title: String,
    pub connection_label: &'static str,
    pub show_mark_idle: bool,
    pub job: Option<JobPanel>,
}

impl DisplayModel {
    pub fn from_state(state: &MachineState, machine_id: &str) -> Self {
        let show_job = state.has_job
            && matches!(
                state.status,
                MachineStatus::Printing | MachineStatus::Paused | MachineStatus::Printed
            );

        let job = show_job.then(|| {
            let time_label = if state.job.remaining_time.is_empty() {
                String::new()
            } else if state.job.total_time.is_empty() {
                format!("Remaining: {}", state.job.remaining_time)
            } else {
                format!("Remaining: {}  /  {}", state.job.remaining_time, state.job.total_time)
            };
            JobPanel {
                name: state.job.name.clone(),
                percent: state.job.percentage_complete,
                percent_label: format!("{}%", state.job.percentage_complete),
                time_label,
                sub_stage: state.job.sub_stage.clone(),
            }
        });

        Self {
            status_label: state.status.label(),
            status_color: status_color(state.status),
            title: state.display_name(machine_id).to_string(),
            connection_label: if state.ws_connected { "Connected" } else { "No server" },
            show_mark_idle: state.status.is_finished(),
            job,
        }
    }
}

const BAR_WIDTH: usize = 30;

fn progress_bar(percent: i64) -> String {
    let filled = (percent.clamp(0, 100) as usize * BAR_WIDTH) / 100;
    format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

impl fmt::Display for DisplayModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[ {} ]", self.status_label)?;
        write!(f, "{}", self.title)?;
        if self.show_mark_idle {
            write!(f, "    [Mark as Idle: press i]")?;
        }
        writeln!(f)?;
        if let Some(job) = &self.job {
            writeln!(f, "Job: {}", job.name)?;
            writeln!(f, "[{}] {}", progress_bar(job.percent), job.percent_label)?;
            if !job.sub_stage.is_empty() {
                writeln!(f, "{}", job.sub_stage)?;
            }
            if !job.time_label.is_empty() {
                writeln!(f, "{}", job.time_label)?;
            }
        }
        write!(f, "({})", self.connection_label)
    }
}

/// Counters kept by the session for the dev stats line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_received: u64,
    pub snapshots_applied: u64,
    pub deltas_applied: u64,
    pub dropped: u64,
    pub reconnects: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl LinkStats {
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let age = match self.last_update {
            Some(at) => format!("{}s ago", (now - at).num_seconds().max(0)),
            None => "never".to_string(),
        };
        format!(
            "Frames: {}  Snap: {}  Delta: {}  Drop: {}  Reconnects: {}  Updated: {}",
            self.frames_received,
            self.snapshots_applied,
            self.deltas_applied,
            self.dropped,
            self.reconnects,
            age
        )
    }
}
