// src/reconciler.rs - Applies AtAGlance snapshots and deltas to the machine state
use serde_json::{Map, Value};

use crate::machine_state::{MachineState, PrintJobState, classify_status};
use crate::protocol::{
    Envelope, KEY_AT_A_GLANCE_CHANGES, KEY_AT_A_GLANCE_STATE, MARK_AS_IDLE_TOPIC, ProtocolError,
    SUBSCRIBE_TOPIC, state_topic,
};

/// What a single inbound frame did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A full AtAGlance snapshot replaced the tracked fields.
    Snapshot,
    /// An AtAGlance delta was merged.
    Delta,
    /// Valid frame with nothing for this kiosk; state untouched.
    Ignored,
    /// Malformed or failed frame, logged and discarded; state untouched.
    Dropped,
}

type Object = Map<String, Value>;

fn str_field<'a>(obj: &'a Object, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn int_field(obj: &Object, key: &str) -> Option<i64> {
    let value = obj.get(key)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// `<Field>HasChanged`; absent or non-boolean means unchanged.
fn changed(obj: &Object, field: &str) -> bool {
    obj.get(&format!("{field}HasChanged"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn new_value<'a>(obj: &'a Object, field: &str) -> Option<&'a Value> {
    obj.get(&format!("{field}New")).filter(|v| !v.is_null())
}

/// Replace status, nickname and job with the contents of an `AtAGlanceState` object.
pub fn apply_full_snapshot(snapshot: &Object, state: &mut MachineState) {
    state.status = classify_status(str_field(snapshot, "Status"));
    state.nickname = str_field(snapshot, "Nickname").unwrap_or_default().to_string();

    match snapshot.get("Job").and_then(Value::as_object) {
        Some(job) => {
            state.has_job = true;
            state.job = PrintJobState {
                name: str_field(job, "Name").unwrap_or_default().to_string(),
                percentage_complete: int_field(job, "PercentageComplete").unwrap_or(0),
                remaining_time: str_field(job, "RemainingTime").unwrap_or_default().to_string(),
                total_time: str_field(job, "TotalTime").unwrap_or_default().to_string(),
                sub_stage: str_field(job, "SubStage").unwrap_or_default().to_string(),
            };
        }
        None => state.clear_job(),
    }
}

/// Merge an `AtAGlanceChanges` object, touching only fields flagged as changed.
pub fn apply_delta(changes: &Object, state: &mut MachineState) {
    if changed(changes, "Status") {
        // Flagged but null: keep the current status rather than guess.
        if let Some(raw) = new_value(changes, "Status").and_then(Value::as_str) {
            state.status = classify_status(Some(raw));
        }
    }

    if changed(changes, "Nickname") {
        state.nickname = new_value(changes, "Nickname")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }

    if let Some(job_changes) = changes.get("CurrentJobChanges").and_then(Value::as_object) {
        apply_job_changes(job_changes, state);
    }
}

fn apply_job_changes(jc: &Object, state: &mut MachineState) {
    if changed(jc, "Name") {
        match new_value(jc, "Name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => state.start_job(name),
            _ => {
                // Job ended; the other fields in this delta describe nothing.
                state.clear_job();
                return;
            }
        }
    }

    if !state.has_job {
        return;
    }

    if changed(jc, "PercentageComplete") {
        if let Some(pct) = int_field(jc, "PercentageCompleteNew") {
            state.job.percentage_complete = pct;
        }
    }
    if changed(jc, "RemainingTime") {
        if let Some(t) = new_value(jc, "RemainingTime").and_then(Value::as_str) {
            state.job.remaining_time = t.to_string();
        }
    }
    if changed(jc, "TotalTime") {
        if let Some(t) = new_value(jc, "TotalTime").and_then(Value::as_str) {
            state.job.total_time = t.to_string();
        }
    }
    if changed(jc, "SubStage") {
        state.job.sub_stage = new_value(jc, "SubStage")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }
}

/// Routes decoded server frames for one configured machine.
#[derive(Debug, Clone)]
pub struct StateReconciler {
    expected_topic: String,
}

impl StateReconciler {
    pub fn new(machine_id: &str) -> Self {
        Self {
            expected_topic: state_topic(machine_id),
        }
    }

    pub fn expected_topic(&self) -> &str {
        &self.expected_topic
    }

    /// Parse one text frame and apply it.
    ///
    /// The caller must hold exclusive access to `state` for the whole call;
    /// both apply paths write several fields.
    pub fn dispatch(&self, payload: &str, state: &mut MachineState) -> Result<Outcome, ProtocolError> {
        let message: Value = serde_json::from_str(payload)?;
        let envelope = Envelope::parse(&message)?;

        if envelope.topic == SUBSCRIBE_TOPIC {
            if let Some(reason) = envelope.failure_reason() {
                return Err(ProtocolError::SubscribeFailed(reason.to_string()));
            }
            return Ok(match envelope.object(KEY_AT_A_GLANCE_STATE) {
                Some(snapshot) => {
                    apply_full_snapshot(snapshot, state);
                    Outcome::Snapshot
                }
                None => Outcome::Ignored,
            });
        }

        if envelope.topic == self.expected_topic {
            return Ok(match envelope.object(KEY_AT_A_GLANCE_CHANGES) {
                Some(changes) => {
                    apply_delta(changes, state);
                    Outcome::Delta
                }
                None => Outcome::Ignored,
            });
        }

        if envelope.topic == MARK_AS_IDLE_TOPIC {
            if let Some(reason) = envelope.failure_reason() {
                return Err(ProtocolError::ActionFailed {
                    action: MARK_AS_IDLE_TOPIC.to_string(),
                    reason: reason.to_string(),
                });
            }
            tracing::debug!("Mark as idle acknowledged");
            return Ok(Outcome::Ignored);
        }

        tracing::trace!("Ignoring message on topic '{}'", envelope.topic);
        Ok(Outcome::Ignored)
    }

    /// Like [`dispatch`](Self::dispatch), but logs failures and reports them as `Dropped`.
    pub fn handle_message(&self, payload: &str, state: &mut MachineState) -> Outcome {
        match self.dispatch(payload, state) {
            Ok(Outcome::Snapshot) => {
                tracing::info!("Initial AtAGlance state applied ({})", state.status);
                Outcome::Snapshot
            }
            Ok(Outcome::Delta) => {
                tracing::debug!("State delta applied ({})", state.status);
                Outcome::Delta
            }
            Ok(outcome) => outcome,
            Err(e @ (ProtocolError::SubscribeFailed(_) | ProtocolError::ActionFailed { .. })) => {
                tracing::error!("{}", e);
                Outcome::Dropped
            }
            Err(e) => {
                tracing::warn!("Dropping malformed message: {}", e);
                Outcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine_state::MachineStatus;
    use serde_json::json;

    fn obj(value: Value) -> Object {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn printing_state() -> MachineState {
        let mut state = MachineState::new();
        apply_full_snapshot(
            &obj(json!({
                "Status": "Printing",
                "Nickname": "Ender-5",
                "Job": {
                    "Name": "benchy.3mf",
                    "PercentageComplete": 45,
                    "RemainingTime": "00:30:00",
                    "TotalTime": "01:30:00",
                    "SubStage": "Layer 12"
                }
            })),
            &mut state,
        );
        state
    }

    #[test]
    fn test_snapshot_populates_job() {
        let state = printing_state();
        assert_eq!(state.status, MachineStatus::Printing);
        assert_eq!(state.nickname, "Ender-5");
        assert!(state.has_job);
        assert_eq!(state.job.name, "benchy.3mf");
        assert_eq!(state.job.percentage_complete, 45);
        assert_eq!(state.job.remaining_time, "00:30:00");
        assert_eq!(state.job.total_time, "01:30:00");
        assert_eq!(state.job.sub_stage, "Layer 12");
    }

    #[test]
    fn test_snapshot_job_defaults() {
        let mut state = MachineState::new();
        apply_full_snapshot(&obj(json!({"Status": "Printing", "Job": {}})), &mut state);
        assert!(state.has_job);
        assert_eq!(state.job, PrintJobState::default());
        assert!(state.nickname.is_empty());
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let snapshot = obj(json!({
            "Status": "Paused",
            "Nickname": "Prusa",
            "Job": {"Name": "a.gcode", "PercentageComplete": 3}
        }));
        let mut state = MachineState::new();
        apply_full_snapshot(&snapshot, &mut state);
        let once = state.clone();
        apply_full_snapshot(&snapshot, &mut state);
        assert_eq!(state, once);
    }

    #[test]
    fn test_snapshot_without_job_replaces_active_job() {
        let mut state = printing_state();
        apply_full_snapshot(&obj(json!({"Status": "Idle", "Nickname": "Ender-5"})), &mut state);
        assert!(!state.has_job);
        assert_eq!(state.job, PrintJobState::default());

        let mut state = printing_state();
        apply_full_snapshot(&obj(json!({"Status": "Idle", "Job": "not an object"})), &mut state);
        assert!(!state.has_job);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_snapshot_missing_status_is_unknown() {
        let mut state = printing_state();
        apply_full_snapshot(&obj(json!({"Nickname": 7})), &mut state);
        assert_eq!(state.status, MachineStatus::Unknown);
        assert!(state.nickname.is_empty());
    }

    #[test]
    fn test_delta_without_flags_is_noop() {
        let mut state = printing_state();
        let before = state.clone();
        apply_delta(
            &obj(json!({
                "StatusHasChanged": false, "StatusNew": "Idle",
                "NicknameHasChanged": false, "NicknameNew": "Other",
                "CurrentJobChanges": {
                    "NameHasChanged": false, "NameNew": null,
                    "PercentageCompleteHasChanged": false, "PercentageCompleteNew": 99,
                    "RemainingTimeHasChanged": false, "RemainingTimeNew": "00:00:01",
                    "TotalTimeHasChanged": false, "TotalTimeNew": "00:00:02",
                    "SubStageHasChanged": false, "SubStageNew": null
                }
            })),
            &mut state,
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_delta_null_status_is_skipped() {
        let mut state = printing_state();
        apply_delta(&obj(json!({"StatusHasChanged": true, "StatusNew": null})), &mut state);
        assert_eq!(state.status, MachineStatus::Printing);
    }

    #[test]
    fn test_delta_null_nickname_clears() {
        let mut state = printing_state();
        apply_delta(&obj(json!({"NicknameHasChanged": true, "NicknameNew": null})), &mut state);
        assert!(state.nickname.is_empty());
    }

    #[test]
    fn test_delta_job_end_skips_other_fields() {
        let mut state = printing_state();
        apply_delta(
            &obj(json!({
                "CurrentJobChanges": {
                    "NameHasChanged": true, "NameNew": null,
                    "PercentageCompleteHasChanged": true, "PercentageCompleteNew": 100,
                    "SubStageHasChanged": true, "SubStageNew": "Cooling"
                }
            })),
            &mut state,
        );
        assert!(!state.has_job);
        assert_eq!(state.job, PrintJobState::default());
    }

    #[test]
    fn test_delta_empty_name_ends_job() {
        let mut state = printing_state();
        apply_delta(
            &obj(json!({"CurrentJobChanges": {"NameHasChanged": true, "NameNew": ""}})),
            &mut state,
        );
        assert!(!state.has_job);
    }

    #[test]
    fn test_delta_percentage_only() {
        let mut state = printing_state();
        apply_delta(
            &obj(json!({
                "CurrentJobChanges": {
                    "PercentageCompleteHasChanged": true, "PercentageCompleteNew": 67,
                    "RemainingTimeNew": "00:01:00"
                }
            })),
            &mut state,
        );
        assert_eq!(state.job.percentage_complete, 67);
        assert_eq!(state.job.name, "benchy.3mf");
        assert_eq!(state.job.remaining_time, "00:30:00");
        assert_eq!(state.job.total_time, "01:30:00");
    }

    #[test]
    fn test_snapshot_percentage_types() {
        let mut state = MachineState::new();
        apply_full_snapshot(
            &obj(json!({"Status": "Printing", "Job": {"Name": "a", "PercentageComplete": 45.9}})),
            &mut state,
        );
        assert_eq!(state.job.percentage_complete, 45);

        apply_full_snapshot(
            &obj(json!({"Status": "Printing", "Job": {"Name": "a", "PercentageComplete": "45"}})),
            &mut state,
        );
        assert_eq!(state.job.percentage_complete, 0);
    }

    #[test]
    fn test_delta_percentage_types() {
        let mut state = printing_state();
        apply_delta(
            &obj(json!({
                "CurrentJobChanges": {"PercentageCompleteHasChanged": true, "PercentageCompleteNew": 67.5}
            })),
            &mut state,
        );
        assert_eq!(state.job.percentage_complete, 67);

        apply_delta(
            &obj(json!({
                "CurrentJobChanges": {"PercentageCompleteHasChanged": true, "PercentageCompleteNew": "80"}
            })),
            &mut state,
        );
        assert_eq!(state.job.percentage_complete, 67);
    }

    #[test]
    fn test_delta_without_job_is_ignored() {
        let mut state = MachineState::new();
        apply_delta(
            &obj(json!({
                "CurrentJobChanges": {
                    "PercentageCompleteHasChanged": true, "PercentageCompleteNew": 50,
                    "SubStageHasChanged": true, "SubStageNew": "Heating"
                }
            })),
            &mut state,
        );
        assert!(!state.has_job);
        assert_eq!(state.job, PrintJobState::default());
    }

    #[test]
    fn test_delta_null_values_per_field() {
        let mut state = printing_state();
        apply_delta(
            &obj(json!({
                "CurrentJobChanges": {
                    "PercentageCompleteHasChanged": true, "PercentageCompleteNew": null,
                    "RemainingTimeHasChanged": true, "RemainingTimeNew": null,
                    "TotalTimeHasChanged": true, "TotalTimeNew": null,
                    "SubStageHasChanged": true, "SubStageNew": null
                }
            })),
            &mut state,
        );
        assert_eq!(state.job.percentage_complete, 45);
        assert_eq!(state.job.remaining_time, "00:30:00");
        assert_eq!(state.job.total_time, "01:30:00");
        assert_eq!(state.job.sub_stage, "");
    }

    #[test]
    fn test_delta_new_job_in_one_message() {
        let mut state = MachineState::new();
        apply_delta(
            &obj(json!({
                "CurrentJobChanges": {
                    "NameHasChanged": true, "NameNew": "cube.gcode",
                    "TotalTimeHasChanged": true, "TotalTimeNew": "00:45:00"
                }
            })),
            &mut state,
        );
        assert!(state.has_job);
        assert_eq!(state.job.name, "cube.gcode");
        assert_eq!(state.job.total_time, "00:45:00");
    }

    #[test]
    fn test_dispatch_routes_by_topic() {
        let reconciler = StateReconciler::new("my-id");
        assert_eq!(reconciler.expected_topic(), "machine/my-id/state");
        let mut state = MachineState::new();

        let outcome = reconciler
            .dispatch(
                r#"{"Topic":"machine/subscribe","Data":{"AtAGlanceState":{"Status":"Idle"}}}"#,
                &mut state,
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Snapshot);

        let outcome = reconciler
            .dispatch(
                r#"{"Topic":"machine/my-id/state","Data":{"AtAGlanceChanges":{"StatusHasChanged":true,"StatusNew":"Printing"}}}"#,
                &mut state,
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Delta);
        assert_eq!(state.status, MachineStatus::Printing);

        let outcome = reconciler
            .dispatch(r#"{"Topic":"logs","Data":{}}"#, &mut state)
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
    }

    #[test]
    fn test_dispatch_errors_leave_state() {
        let reconciler = StateReconciler::new("my-id");
        let mut state = printing_state();
        let before = state.clone();

        assert!(matches!(reconciler.dispatch("{not json", &mut state), Err(ProtocolError::Json(_))));
        assert!(matches!(
            reconciler.dispatch(r#"{"Data":{}}"#, &mut state),
            Err(ProtocolError::MissingTopic)
        ));
        assert!(matches!(
            reconciler.dispatch(
                r#"{"Topic":"machine/subscribe","Data":{"FailureReason":"no such machine","AtAGlanceState":{"Status":"Idle"}}}"#,
                &mut state
            ),
            Err(ProtocolError::SubscribeFailed(reason)) if reason == "no such machine"
        ));
        assert!(matches!(
            reconciler.dispatch(
                r#"{"Topic":"machine/markAsIdle","Data":{"FailureReason":"busy"}}"#,
                &mut state
            ),
            Err(ProtocolError::ActionFailed { .. })
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_handle_message_drops_failures() {
        let reconciler = StateReconciler::new("my-id");
        let mut state = MachineState::new();
        assert_eq!(reconciler.handle_message("[]", &mut state), Outcome::Dropped);
        assert_eq!(
            reconciler.handle_message(r#"{"Topic":"machine/my-id/state","Data":{}}"#, &mut state),
            Outcome::Ignored
        );
        assert_eq!(state, MachineState::new());
    }
}
