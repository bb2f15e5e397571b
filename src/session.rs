use crate::models::Operation;

/// Identifies one issued load. Only the most recently issued session may
/// apply its result; anything older is discarded on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSession {
    pub id: u64,
    pub operation: Operation,
}

#[derive(Debug, Default)]
pub struct SessionCounter {
    current: u64,
    active: bool,
}

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersedes whatever session was active and returns the new one.
    pub fn begin(&mut self, operation: Operation) -> LoadSession {
        self.current = self.current.wrapping_add(1);
        self.active = true;
        LoadSession {
            id: self.current,
            operation,
        }
    }

    pub fn is_current(&self, session: &LoadSession) -> bool {
        self.active && self.current == session.id
    }

    /// True while the latest session has not completed.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Marks `session` complete. Stale sessions leave the counter untouched.
    pub fn finish(&mut self, session: &LoadSession) -> bool {
        if !self.is_current(session) {
            return false;
        }
        self.active = false;
        true
    }
}
