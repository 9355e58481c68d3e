use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Coordinates of one remote annotation instance.
///
/// The triple is the identity: the same emoji on the same message is one
/// annotation, no matter how many times it is observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteRef {
    pub conversation_id: String,
    pub message_timestamp: String,
    pub annotation_key: String,
}

impl RemoteRef {
    pub fn new(
        conversation_id: impl Into<String>,
        message_timestamp: impl Into<String>,
        annotation_key: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_timestamp: message_timestamp.into(),
            annotation_key: annotation_key.into(),
        }
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            self.conversation_id, self.message_timestamp, self.annotation_key
        )
    }
}

/// A task linked to the annotation it came from.
///
/// `task` is the task's stable uid. The link may outlive its task: a
/// deleted task keeps its link until the remote removal succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub task: Uuid,
    pub remote: RemoteRef,
}

/// Durable task ⇔ annotation mapping, one-to-one in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkIndex {
    links: Vec<Link>,
}

impl LinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn contains_remote(&self, remote: &RemoteRef) -> bool {
        self.links.iter().any(|l| &l.remote == remote)
    }

    pub fn remote_for(&self, task: Uuid) -> Option<&RemoteRef> {
        self.links.iter().find(|l| l.task == task).map(|l| &l.remote)
    }

    pub fn task_for(&self, remote: &RemoteRef) -> Option<Uuid> {
        self.links
            .iter()
            .find(|l| &l.remote == remote)
            .map(|l| l.task)
    }

    /// Link `task` to `remote`. Returns false and changes nothing if either
    /// side is already linked.
    pub fn insert(&mut self, task: Uuid, remote: RemoteRef) -> bool {
        if self.contains_remote(&remote) || self.remote_for(task).is_some() {
            return false;
        }
        self.links.push(Link { task, remote });
        true
    }

    /// Drop the link for `remote`, returning it if there was one.
    pub fn clear(&mut self, remote: &RemoteRef) -> Option<Link> {
        let pos = self.links.iter().position(|l| &l.remote == remote)?;
        Some(self.links.remove(pos))
    }

    /// Remove every link rejected by `keep`, returning what was dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&Link) -> bool) -> Vec<Link> {
        let mut dropped = Vec::new();
        self.links.retain(|l| {
            if keep(l) {
                true
            } else {
                dropped.push(l.clone());
                false
            }
        });
        dropped
    }

    /// Remove duplicate links left behind by a hand-edited file. The first
    /// occurrence of each task and each remote wins.
    pub(crate) fn dedupe(&mut self) -> usize {
        let before = self.links.len();
        let mut kept: Vec<Link> = Vec::with_capacity(before);
        for link in self.links.drain(..) {
            if kept
                .iter()
                .any(|k| k.task == link.task || k.remote == link.remote)
            {
                continue;
            }
            kept.push(link);
        }
        self.links = kept;
        before - self.links.len()
    }
}
