use std::fmt;

/// Camera/cell proximity events published by the grid's camera tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellEvent {
    CameraEntered { cell: usize },
    CameraExited { cell: usize },
}

impl fmt::Display for CellEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellEvent::CameraEntered { cell } => write!(f, "CameraEntered cell={cell}"),
            CellEvent::CameraExited { cell } => write!(f, "CameraExited cell={cell}"),
        }
    }
}

/// Event service owned by the grid. Publishing queues; the grid drains and
/// handles the queue synchronously in the same update, so subscribers (the
/// grid itself) observe events in publish order before the frame continues.
#[derive(Default)]
pub struct CellEventBus {
    events: Vec<CellEvent>,
}

impl CellEventBus {
    pub fn publish(&mut self, event: CellEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<CellEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
