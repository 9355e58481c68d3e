pub mod cache;
pub mod client;
pub mod keyring;
pub mod retry;
pub mod slack;

use std::collections::HashSet;

use crate::core::link::{Link, RemoteRef};
use crate::core::task::Task;
use crate::core::text::title_from_message;
use crate::error::{Result, TodoError};
use crate::store::{Document, TaskStore};
use cache::{AnnotationCache, Clock, SystemClock};
use client::{AnnotationClient, Listing, RemoteError, Scope};
use retry::{RetryPolicy, call_with_retry};

/// Result of a Pull.
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    /// Tasks created for newly seen annotations.
    pub created: Vec<Task>,
    /// Links cleared because their annotation vanished remotely.
    pub detached: Vec<RemoteRef>,
    /// The snapshot was served from the annotation cache.
    pub from_cache: bool,
    /// Slack could not be reached; nothing was changed.
    pub offline: bool,
    /// Non-fatal problems worth telling the user about.
    pub warnings: Vec<String>,
}

/// Result of a Push.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub removed: Vec<RemoteRef>,
    pub failed: Vec<RemoteRef>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}

impl SyncReport {
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.push
            .warnings
            .iter()
            .chain(self.pull.warnings.iter())
            .map(String::as_str)
    }
}

/// Links whose annotation should be removed remotely: the task was
/// completed, or deleted while the link was still active.
pub fn pending_removals(doc: &Document) -> Vec<Link> {
    doc.links
        .iter()
        .filter(|link| {
            doc.tasks
                .get_by_uid(link.task)
                .is_none_or(|task| task.completed())
        })
        .cloned()
        .collect()
}

/// Reconcile `doc` with a listing of `scope`.
///
/// Creates a task for every annotation not already linked and clears every
/// in-scope link whose annotation is missing from the listing. A partial
/// listing clears nothing. Tasks are never completed or deleted here.
pub fn apply_snapshot(
    doc: &mut Document,
    scope: &Scope,
    listing: &Listing,
) -> (Vec<Task>, Vec<RemoteRef>) {
    let mut created = Vec::new();
    for annotation in &listing.annotations {
        if doc.links.contains_remote(&annotation.remote) {
            continue;
        }
        let mut task = Task::new(0, title_from_message(&annotation.message_text));
        task.url = annotation.permalink.clone();
        let task = doc.tasks.push(task).clone();
        doc.links.insert(task.uid, annotation.remote.clone());
        log::info!("Pull: new task #{} from {}", task.id, annotation.remote);
        created.push(task);
    }

    if !listing.complete {
        return (created, Vec::new());
    }

    let present: HashSet<&RemoteRef> = listing.annotations.iter().map(|a| &a.remote).collect();
    let key = scope.source.key();
    let detached = doc
        .links
        .retain(|link| {
            let in_scope = link.remote.annotation_key == key
                && scope.allows(&link.remote.conversation_id);
            !in_scope || present.contains(&link.remote)
        })
        .into_iter()
        .map(|link| {
            log::info!("Pull: {} vanished remotely; link cleared", link.remote);
            link.remote
        })
        .collect();

    (created, detached)
}

fn config_fault(err: RemoteError) -> TodoError {
    match err {
        RemoteError::Unsupported(kind) => TodoError::Config(format!(
            "{} annotations are not supported yet; run `todo setup --annotation-kind reaction`",
            kind
        )),
        other => TodoError::Auth(format!(
            "{}. Check SLACK_TOKEN or run `todo setup --save-token`",
            other
        )),
    }
}

/// Keeps the local task list and remote annotations consistent.
///
/// Network calls run without holding the store lock; their results are
/// applied to a freshly loaded document under the lock.
pub struct SyncEngine<C, K = SystemClock> {
    client: C,
    cache: AnnotationCache<K>,
    policy: RetryPolicy,
    scope: Scope,
}

impl<C: AnnotationClient> SyncEngine<C, SystemClock> {
    pub fn new(client: C, scope: Scope) -> Self {
        Self::with_clock(client, scope, SystemClock)
    }
}

impl<C: AnnotationClient, K: Clock> SyncEngine<C, K> {
    pub fn with_clock(client: C, scope: Scope, clock: K) -> Self {
        Self {
            client,
            cache: AnnotationCache::with_clock(clock),
            policy: RetryPolicy::default(),
            scope,
        }
    }

    /// Push pending removals, then Pull.
    pub async fn sync(&mut self, store: &TaskStore) -> Result<SyncReport> {
        let push = self.push_pending(store).await?;
        let pull = self.pull(store).await?;
        Ok(SyncReport { push, pull })
    }

    /// Remote → local: create tasks for new annotations, detach vanished ones.
    ///
    /// Transient failures degrade to a no-op with a warning. Only
    /// configuration faults (bad credentials) are returned as errors.
    pub async fn pull(&mut self, store: &TaskStore) -> Result<PullReport> {
        let mut report = PullReport::default();

        {
            let guard = store.lock()?;
            let shared = store.load_cache(&guard);
            self.cache.absorb(&shared);
        }

        let client = &self.client;
        let policy = &self.policy;
        let scope = &self.scope;
        let fetched = self
            .cache
            .get_or_fetch(scope, || {
                call_with_retry(policy, "list annotations", || client.list_annotations(scope))
            })
            .await;

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_config_fault() => return Err(config_fault(e)),
            Err(e) => {
                log::warn!("Pull skipped, working offline: {}", e);
                report.offline = true;
                report
                    .warnings
                    .push(format!("Slack unreachable, showing local tasks only ({})", e));
                return Ok(report);
            }
        };
        report.from_cache = snapshot.from_cache;

        let key = self.scope.key();
        let now = self.cache.now();
        let local = self.cache.table().clone();
        let applied = store.transact_with_cache(|doc, shared| {
            shared.merge(&local);
            shared.prune(now);
            // Another invocation removed an annotation after this listing was
            // taken; applying it could resurrect that annotation as a task.
            if shared.invalidated_since(&key, snapshot.fetched_at) {
                return Ok(None);
            }
            Ok(Some(apply_snapshot(doc, scope, &snapshot.listing)))
        })?;

        match applied {
            Some((created, detached)) => {
                log::info!(
                    "Pull complete: {} annotations, {} created, {} detached{}",
                    snapshot.annotations().len(),
                    created.len(),
                    detached.len(),
                    if snapshot.from_cache { " (cached)" } else { "" }
                );
                report.created = created;
                report.detached = detached;
                if !snapshot.listing.complete {
                    report
                        .warnings
                        .push("Slack listing was truncated; vanished annotations not checked".to_string());
                }
            }
            None => {
                log::warn!("Pull: listing for {} went stale during sync; skipped", key);
                report
                    .warnings
                    .push("Slack annotations changed during sync; skipped this round".to_string());
            }
        }

        Ok(report)
    }

    /// Local → remote: remove the annotation of every completed or deleted
    /// task that still holds a link.
    ///
    /// Local state is never rolled back. A failed removal keeps its link so a
    /// later run retries it.
    pub async fn push_pending(&mut self, store: &TaskStore) -> Result<PushReport> {
        let mut report = PushReport::default();
        let pending = pending_removals(&store.read()?);
        if pending.is_empty() {
            return Ok(report);
        }
        log::info!("Push: {} pending annotation removals", pending.len());

        let mut fault = None;
        for link in &pending {
            let what = format!("remove {}", link.remote);
            let res = call_with_retry(&self.policy, &what, || {
                self.client.remove_annotation(&link.remote, &self.scope.source)
            })
            .await;
            match res {
                Ok(()) => report.removed.push(link.remote.clone()),
                Err(e) if e.is_config_fault() => {
                    fault = Some(e);
                    break;
                }
                Err(e) => {
                    log::warn!("Push: failed to remove {}: {}", link.remote, e);
                    report
                        .warnings
                        .push(format!("Could not remove Slack annotation {} ({}); will retry", link.remote, e));
                    report.failed.push(link.remote.clone());
                }
            }
        }

        if !report.removed.is_empty() {
            self.cache.invalidate(&self.scope);
            let local = self.cache.table().clone();
            let removed = &report.removed;
            store.transact_with_cache(|doc, shared| {
                for remote in removed {
                    doc.links.clear(remote);
                }
                shared.merge(&local);
                Ok(())
            })?;
            log::info!("Push complete: {} removed, {} failed", removed.len(), report.failed.len());
        }

        match fault {
            Some(e) => Err(config_fault(e)),
            None => Ok(report),
        }
    }
}
