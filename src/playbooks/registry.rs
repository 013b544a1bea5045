use std::collections::HashMap;
use std::sync::Arc;

use super::playbook::Playbook;

/// Playbooks by name.
#[derive(Debug, Default, Clone)]
pub struct PlaybookRegistry {
    playbooks: HashMap<String, Arc<Playbook>>,
}

impl PlaybookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `playbook`, replacing (and returning) one with the same name.
    pub fn register(&mut self, playbook: Playbook) -> Option<Arc<Playbook>> {
        self.playbooks
            .insert(playbook.name.clone(), Arc::new(playbook))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Playbook>> {
        self.playbooks.get(name).cloned()
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Playbook>> {
        self.playbooks.remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.playbooks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }
}

impl FromIterator<Playbook> for PlaybookRegistry {
    fn from_iter<I: IntoIterator<Item = Playbook>>(iter: I) -> Self {
        let mut reg = Self::new();
        for pb in iter {
            reg.register(pb);
        }
        reg
    }
}
