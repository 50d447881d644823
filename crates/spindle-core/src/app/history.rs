//! History - 終了したタスクの記録（上限付き、古いものから捨てる）

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use crate::domain::Task;

pub struct History {
    entries: RwLock<VecDeque<Task>>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            limit,
        }
    }

    pub fn record(&self, task: Task) {
        if self.limit == 0 {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.limit {
            entries.pop_front();
        }
        entries.push_back(task);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Task> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
