//! The task lifecycle as a pure transition table, unit-tested
//! exhaustively so the executor loop never has to reason about which
//! moves are legal inline.

use engine_domain::model::TaskStatus;
use engine_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    ImplicitStart,
    PauseForTurn,
    DispatchResume,
    Stop,
    Resume,
    CriteriaMet,
    CapExceeded,
    ExecutionError,
    EnterTesting,
    TestsPass,
    TestsFail,
    Recover,
}

/// Apply `event` to `from`, returning the resulting status or a
/// validation error if the move is illegal. `recover` is accepted from
/// any terminal status or from `Stopped` (the control-surface
/// precondition is explicit about this; it is not limited to "active"
/// statuses the way the rest of the table's prose summary suggests).
pub fn transition(from: TaskStatus, event: Event) -> Result<TaskStatus> {
    use Event::*;
    use TaskStatus::*;

    match (from, event) {
        (Pending, Start) => Ok(Running),
        (Pending, ImplicitStart) => Ok(Running),
        (Running, PauseForTurn) => Ok(Paused),
        (Paused, DispatchResume) => Ok(Running),
        (Running, Stop) | (Paused, Stop) | (Testing, Stop) => Ok(Stopped),
        (Stopped, Resume) => Ok(Running),
        (Running, CriteriaMet) => Ok(Finished),
        (Running, CapExceeded) => Ok(Exhausted),
        (Running, ExecutionError) => Ok(Failed),
        (Running, EnterTesting) => Ok(Testing),
        (Testing, TestsPass) => Ok(Completed),
        (Testing, TestsFail) => Ok(Failed),
        (from, Recover) if from.is_terminal() || from == Stopped => Ok(Running),
        (from, event) => Err(Error::Validation(format!(
            "illegal task transition: {from:?} via {event:?}"
        ))),
    }
}
