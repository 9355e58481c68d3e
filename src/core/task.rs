use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TodoError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identity; survives renumbering.
    pub uid: Uuid,
    /// User-facing number, contiguous from 1.
    pub id: u32,
    pub title: String,
    pub due: Option<NaiveDate>,
    pub created: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    /// Permalink to the message this task was pulled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Task {
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            id,
            title: title.into(),
            due: None,
            created: chrono::Local::now().naive_local(),
            completed_at: None,
            url: None,
        }
    }

    pub fn completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_pending(&self) -> bool {
        !self.completed()
    }

    /// Mark done. Completing an already-done task keeps the original stamp.
    pub fn complete(&mut self) {
        if self.completed_at.is_none() {
            self.completed_at = Some(chrono::Local::now().naive_local());
        }
    }
}

/// Ordered task collection with contiguous ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn next_id(&self) -> u32 {
        self.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }

    pub fn add(&mut self, title: &str, due: Option<NaiveDate>) -> Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TodoError::InvalidInput("task title must not be empty".into()));
        }
        let mut task = Task::new(self.next_id(), title);
        task.due = due;
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Insert a fully built task (used by Pull), assigning it the next id.
    pub(crate) fn push(&mut self, mut task: Task) -> &Task {
        task.id = self.next_id();
        self.tasks.push(task);
        &self.tasks[self.tasks.len() - 1]
    }

    /// Remove task `id` and shift every later id down by one.
    pub fn remove(&mut self, id: u32) -> Result<Task> {
        let pos = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TodoError::NotFound(id))?;
        let removed = self.tasks.remove(pos);
        for task in self.tasks.iter_mut().filter(|t| t.id > id) {
            task.id -= 1;
        }
        Ok(removed)
    }

    pub fn complete(&mut self, id: u32) -> Result<Task> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TodoError::NotFound(id))?;
        task.complete();
        Ok(task.clone())
    }

    pub fn get(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_by_uid(&self, uid: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.uid == uid)
    }

    pub fn list(&self, include_completed: bool) -> Vec<&Task> {
        let mut out: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| include_completed || t.is_pending())
            .collect();
        out.sort_by_key(|t| t.id);
        out
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_pending()).count()
    }

    pub fn done_count(&self) -> usize {
        self.tasks.len() - self.pending_count()
    }

    /// Restore the contiguity invariant on loaded data: sort by the stored
    /// id and renumber 1..=n. Returns true if anything changed.
    pub(crate) fn normalize(&mut self) -> bool {
        self.tasks.sort_by_key(|t| t.id);
        let mut changed = false;
        for (i, task) in self.tasks.iter_mut().enumerate() {
            let want = i as u32 + 1;
            if task.id != want {
                task.id = want;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(list: &TaskList) -> Vec<u32> {
        list.list(true).iter().map(|t| t.id).collect()
    }

    fn assert_contiguous(list: &TaskList) {
        let want: Vec<u32> = (1..=list.len() as u32).collect();
        assert_eq!(ids(list), want);
    }

    #[test]
    fn add_assigns_sequential_ids() {
        let mut list = TaskList::new();
        assert_eq!(list.add("a", None).unwrap().id, 1);
        assert_eq!(list.add("b", None).unwrap().id, 2);
        assert_eq!(list.add("c", None).unwrap().id, 3);
    }

    #[test]
    fn add_rejects_blank_title() {
        let mut list = TaskList::new();
        assert!(matches!(list.add("   ", None), Err(TodoError::InvalidInput(_))));
        assert!(list.is_empty());
    }

    #[test]
    fn remove_renumbers_and_keeps_order() {
        let mut list = TaskList::new();
        for t in ["a", "b", "c", "d"] {
            list.add(t, None).unwrap();
        }
        let uid_c = list.get(3).unwrap().uid;
        list.remove(2).unwrap();
        let titles: Vec<&str> = list.list(true).iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["a", "c", "d"]);
        assert_contiguous(&list);
        assert_eq!(list.get(2).unwrap().uid, uid_c, "uid survives renumbering");
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut list = TaskList::new();
        list.add("a", None).unwrap();
        assert!(matches!(list.remove(5), Err(TodoError::NotFound(5))));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn complete_is_idempotent() {
        let mut list = TaskList::new();
        list.add("a", None).unwrap();
        let first = list.complete(1).unwrap().completed_at;
        let second = list.complete(1).unwrap().completed_at;
        assert!(first.is_some());
        assert_eq!(first, second);
        assert!(matches!(list.complete(2), Err(TodoError::NotFound(2))));
    }

    #[test]
    fn list_filters_completed() {
        let mut list = TaskList::new();
        list.add("a", None).unwrap();
        list.add("b", None).unwrap();
        list.complete(1).unwrap();
        assert_eq!(list.list(false).len(), 1);
        assert_eq!(list.list(true).len(), 2);
        assert_eq!(list.pending_count(), 1);
        assert_eq!(list.done_count(), 1);
    }

    #[test]
    fn normalize_closes_gaps() {
        let mut list = TaskList::new();
        let a = Task::new(7, "a");
        let b = Task::new(3, "b");
        list.tasks = vec![a, b];
        assert!(list.normalize());
        assert_eq!(list.get(1).unwrap().title, "b");
        assert_eq!(list.get(2).unwrap().title, "a");
        assert!(!list.normalize());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Delete(usize),
        Complete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Add),
            2 => any::<usize>().prop_map(Op::Delete),
            1 => any::<usize>().prop_map(Op::Complete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn random_add_delete_interleavings_stay_contiguous(
            ops in proptest::collection::vec(op_strategy(), 0..200)
        ) {
            let mut list = TaskList::new();
            let mut expected = 0usize;
            for (step, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Add => {
                        let task = list.add(&format!("task {step}"), None).unwrap();
                        expected += 1;
                        prop_assert_eq!(task.id as usize, expected);
                    }
                    Op::Delete(pick) if !list.is_empty() => {
                        let id = (pick % list.len()) as u32 + 1;
                        let uid = list.get(id).unwrap().uid;
                        list.remove(id).unwrap();
                        expected -= 1;
                        prop_assert!(list.get_by_uid(uid).is_none());
                    }
                    Op::Complete(pick) if !list.is_empty() => {
                        let id = (pick % list.len()) as u32 + 1;
                        list.complete(id).unwrap();
                        prop_assert!(list.get(id).unwrap().completed());
                    }
                    Op::Delete(_) | Op::Complete(_) => {
                        prop_assert!(list.remove(1).is_err());
                    }
                }
                prop_assert_eq!(list.len(), expected);
                assert_contiguous(&list);
            }
        }
    }
}
