use crate::module::ModuleId;

/// Fire-and-forget hook called when a module's observable state changes.
pub trait Notifier {
    fn notify(&mut self, id: ModuleId);
}

/// Collects notifications during a tick so they can be published after the
/// module lock is released. Repeated ids are coalesced.
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    pending: Vec<ModuleId>,
}

impl NotificationQueue {
    pub fn drain(&mut self) -> Vec<ModuleId> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[ModuleId] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Notifier for NotificationQueue {
    fn notify(&mut self, id: ModuleId) {
        if !self.pending.contains(&id) {
            self.pending.push(id);
        }
    }
}
