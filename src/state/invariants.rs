use super::schema::FocusState;

/// Repairs the cross-field rules on an already-typed candidate:
///
/// - no task means not in flow;
/// - not in flow means all reminder timing fields are cleared.
///
/// Idempotent: both bootstrap and every update pass through it.
pub fn enforce_invariants(mut state: FocusState) -> FocusState {
    if state.current_task.is_empty() {
        state.is_in_flow = false;
    }

    if !state.is_in_flow {
        state.reminder_start_time = None;
        state.reminder_interval = None;
        state.reminder_expected_end_time = None;
    }

    state
}

pub fn invariants_hold(state: &FocusState) -> bool {
    let flow_needs_task = !state.current_task.is_empty() || !state.is_in_flow;
    let idle_has_no_timer = state.is_in_flow
        || (state.reminder_start_time.is_none()
            && state.reminder_interval.is_none()
            && state.reminder_expected_end_time.is_none());
    flow_needs_task && idle_has_no_timer
}
