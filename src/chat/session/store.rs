//! Session store: the thread list of one identity, its local cache and remote mirror.
//!
//! The local cache is the durability guarantee; every mutation rewrites the full
//! thread list there synchronously. The remote store is a best-effort mirror:
//! full-set replaces and deletes are queued to one background worker that sends
//! them in order. Their failures are logged, never surfaced and never rolled back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chat::core::config::{ChatConfig, LabelConfig};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{Identity, ThreadId};
use crate::chat::core::markup::Markup;
use crate::chat::core::message::Message;
use crate::chat::core::thread::Thread;
use crate::chat::remote::api::RemoteApi;
use crate::chat::remote::types::RemoteThread;
use crate::chat::storage::keys::CacheKey;
use crate::chat::storage::local_cache::LocalCache;

/// Where the thread list of a load came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadSource {
    /// The remote store answered (possibly merged with newer local threads).
    Remote,
    /// The remote store failed and the local cache was used.
    LocalCache,
    /// Neither source had anything.
    Empty,
}

/// Summary of a [`SessionStore::load`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadReport {
    /// Source of the thread list.
    pub source: LoadSource,
    /// Whether the identity differs from the previously loaded one.
    pub switched: bool,
    /// Thread created by the load (identity switch or empty list).
    pub fresh_thread: Option<ThreadId>,
    /// Number of threads after the load.
    pub thread_count: usize,
}

/// Current time in milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Work for the replication worker, handled strictly in queue order.
enum ReplicationJob {
    Replace {
        identity: Identity,
        threads: Vec<Thread>,
        done: Option<oneshot::Sender<ChatResult<()>>>,
    },
    Delete {
        identity: Identity,
        id: ThreadId,
    },
    Flush(oneshot::Sender<()>),
}

impl ReplicationJob {
    const fn describe(&self) -> &'static str {
        match self {
            Self::Replace { .. } => "thread sync",
            Self::Delete { .. } => "thread delete",
            Self::Flush(_) => "flush",
        }
    }
}

/// Drain replication jobs one at a time until every sender is dropped.
async fn replicate(remote: Arc<dyn RemoteApi>, mut jobs: mpsc::UnboundedReceiver<ReplicationJob>) {
    debug!("Replication worker started");
    while let Some(job) = jobs.recv().await {
        match job {
            ReplicationJob::Replace {
                identity,
                threads,
                done,
            } => {
                let result = remote.replace_threads(&identity, &threads).await;
                match (done, result) {
                    (Some(done), outcome) => {
                        let _ = done.send(outcome);
                    }
                    (None, Err(err)) => warn!("Remote thread sync failed: {err}"),
                    (None, Ok(())) => debug!("Replicated {} threads", threads.len()),
                }
            }
            ReplicationJob::Delete { identity, id } => {
                if let Err(err) = remote.delete_thread(&identity, &id).await {
                    warn!("Remote thread delete failed: {err}");
                }
            }
            ReplicationJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Replication worker stopped");
}

/// Owner of the thread list for the current identity.
pub struct SessionStore {
    cache: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteApi>,
    markup: Markup,
    labels: LabelConfig,
    title_max_chars: usize,
    identity: Option<Identity>,
    last_identity: Option<Identity>,
    threads: Vec<Thread>,
    active: Option<ThreadId>,
    in_flight: HashSet<ThreadId>,
    replication: Option<mpsc::UnboundedSender<ReplicationJob>>,
}

impl SessionStore {
    /// Create a store; nothing is loaded until [`SessionStore::load`].
    ///
    /// # Errors
    /// Returns an error if the markup patterns fail to compile.
    pub fn new(
        config: &ChatConfig,
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteApi>,
    ) -> ChatResult<Self> {
        let last_identity = match cache.get(&CacheKey::LastIdentity) {
            Ok(value) => value.and_then(|v| Identity::new(v).ok()),
            Err(err) => {
                warn!("Failed to read last identity from local cache: {err}");
                None
            }
        };

        Ok(Self {
            cache,
            remote,
            markup: Markup::new()?,
            labels: config.labels.clone(),
            title_max_chars: config.title.max_chars,
            identity: None,
            last_identity,
            threads: Vec::new(),
            active: None,
            in_flight: HashSet::new(),
            replication: None,
        })
    }

    /// Identity whose threads are loaded.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// All threads, newest first.
    #[must_use]
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Look up a thread.
    #[must_use]
    pub fn thread(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    /// Id of the selected thread.
    #[must_use]
    pub const fn active_id(&self) -> Option<&ThreadId> {
        self.active.as_ref()
    }

    /// The selected thread.
    #[must_use]
    pub fn active_thread(&self) -> Option<&Thread> {
        self.active.as_ref().and_then(|id| self.thread(id))
    }

    /// Compiled markup patterns shared with export.
    #[must_use]
    pub const fn markup(&self) -> &Markup {
        &self.markup
    }

    /// Load the threads of `identity`: remote first, local cache as fallback.
    ///
    /// Loading an identity other than the previously loaded one always prepends
    /// and selects a fresh empty thread.
    ///
    /// # Errors
    /// Returns an error if the resolved list cannot be written to the local cache.
    pub async fn load(&mut self, identity: Identity) -> ChatResult<LoadReport> {
        let fetched = self.remote.fetch_threads(&identity).await;
        self.apply_load(identity, fetched)
    }

    /// Second half of [`SessionStore::load`]: resolve an already fetched remote
    /// answer against the local cache and install the result.
    ///
    /// Threads with a query still outstanding get their loading placeholder back.
    ///
    /// # Errors
    /// Returns an error if the resolved list cannot be written to the local cache.
    pub fn apply_load(
        &mut self,
        identity: Identity,
        fetched: ChatResult<Vec<RemoteThread>>,
    ) -> ChatResult<LoadReport> {
        let now = now_ms();
        let (threads, source) = self.resolve_threads(&identity, fetched, now);

        let switched = self.last_identity.as_ref() != Some(&identity);
        let previous_active = if switched { None } else { self.active.take() };

        self.identity = Some(identity.clone());
        self.threads = threads;
        self.active = None;
        self.reattach_loading();

        let fresh_thread = if switched || self.threads.is_empty() {
            Some(self.prepend_fresh_thread(now))
        } else {
            self.active = previous_active
                .filter(|id| self.thread(id).is_some())
                .or_else(|| self.threads.first().map(|t| t.id.clone()));
            None
        };

        if switched {
            info!("Identity switch, starting a fresh thread");
        }
        self.last_identity = Some(identity.clone());
        self.cache.set(&CacheKey::LastIdentity, identity.as_str())?;
        self.write_local()?;

        debug!(
            "Loaded {} threads from {:?} (switched: {switched})",
            self.threads.len(),
            source
        );
        Ok(LoadReport {
            source,
            switched,
            fresh_thread,
            thread_count: self.threads.len(),
        })
    }

    /// Prepend and select a new empty thread named `Chat <n>`.
    ///
    /// # Errors
    /// Returns an error if no identity is loaded or the local write fails.
    pub fn create_thread(&mut self) -> ChatResult<ThreadId> {
        self.require_identity()?;
        let id = self.prepend_fresh_thread(now_ms());
        self.persist()?;
        Ok(id)
    }

    /// Select a thread; unknown ids are ignored. Returns whether it was selected.
    pub fn select_thread(&mut self, id: &ThreadId) -> bool {
        if self.thread(id).is_none() {
            return false;
        }
        self.active = Some(id.clone());
        true
    }

    /// Rename a thread. A name that is empty after trimming cancels the rename.
    /// Returns whether a thread was renamed.
    ///
    /// # Errors
    /// Returns an error if the local write fails.
    pub fn rename_thread(&mut self, id: &ThreadId, new_name: &str) -> ChatResult<bool> {
        let name = new_name.trim();
        if name.is_empty() {
            return Ok(false);
        }
        let Some(thread) = self.threads.iter_mut().find(|t| &t.id == id) else {
            return Ok(false);
        };
        thread.name = name.to_string();
        thread.touch(now_ms());
        self.persist()?;
        Ok(true)
    }

    /// Delete a thread locally and, best-effort, remotely. When the active thread
    /// is deleted the first remaining thread is selected, or none.
    ///
    /// # Errors
    /// Returns an error if the local write fails.
    pub fn delete_thread(&mut self, id: &ThreadId) -> ChatResult<bool> {
        let Some(pos) = self.threads.iter().position(|t| &t.id == id) else {
            return Ok(false);
        };
        self.threads.remove(pos);
        if self.active.as_ref() == Some(id) {
            self.active = self.threads.first().map(|t| t.id.clone());
        }
        self.persist()?;

        let identity = self.require_identity()?.clone();
        self.enqueue(ReplicationJob::Delete {
            identity,
            id: id.clone(),
        });
        Ok(true)
    }

    /// Append a message. When the thread goes from empty to non-empty and still
    /// has its placeholder name, it is titled after its first user message.
    ///
    /// # Errors
    /// Returns an error if the thread does not exist.
    pub fn append_message(&mut self, id: &ThreadId, message: Message) -> ChatResult<()> {
        let markup = &self.markup;
        let max_chars = self.title_max_chars;
        let thread = self
            .threads
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| ChatError::UnknownThread(id.to_string()))?;

        let was_empty = thread.messages.is_empty();
        let is_loading = message.is_loading();
        thread.messages.push(message);
        if !is_loading {
            thread.touch(now_ms());
        }

        if was_empty && markup.is_placeholder_name(&thread.name) {
            let title = thread
                .first_user_message()
                .and_then(|m| markup.title_from(&m.text, max_chars));
            if let Some(title) = title {
                debug!("Auto-titled thread {}: {title}", thread.id);
                thread.name = title;
            }
        }
        Ok(())
    }

    /// Whether a query for the thread is outstanding.
    #[must_use]
    pub fn is_awaiting_reply(&self, id: &ThreadId) -> bool {
        self.in_flight.contains(id) || self.thread(id).is_some_and(Thread::is_awaiting_reply)
    }

    /// Record an outstanding query and show the loading placeholder. The mark
    /// survives reloads of the thread list until [`SessionStore::finish_reply`].
    ///
    /// # Errors
    /// Returns an error if the thread does not exist.
    pub fn begin_reply(&mut self, id: &ThreadId) -> ChatResult<()> {
        let loading = self.loading_message();
        self.append_message(id, loading)?;
        self.in_flight.insert(id.clone());
        Ok(())
    }

    /// Clear the outstanding-query mark and remove the loading placeholder.
    /// `None` if the thread is gone.
    pub fn finish_reply(&mut self, id: &ThreadId) -> Option<usize> {
        self.in_flight.remove(id);
        self.threads
            .iter_mut()
            .find(|t| &t.id == id)
            .map(Thread::remove_loading)
    }

    /// Write the full thread list to the local cache, then queue it for remote
    /// replication.
    ///
    /// # Errors
    /// Returns an error if no identity is loaded or the local write fails.
    pub fn persist(&mut self) -> ChatResult<()> {
        let threads = self.write_local()?;
        let identity = self.require_identity()?.clone();
        self.enqueue(ReplicationJob::Replace {
            identity,
            threads,
            done: None,
        });
        Ok(())
    }

    /// Write locally and queue a full replace whose outcome is reported on the
    /// returned channel, behind every replication already queued.
    ///
    /// # Errors
    /// Returns an error if no identity is loaded or the local write fails.
    pub fn request_sync(&mut self) -> ChatResult<oneshot::Receiver<ChatResult<()>>> {
        let threads = self.write_local()?;
        let identity = self.require_identity()?.clone();
        let (done, outcome) = oneshot::channel();
        self.enqueue(ReplicationJob::Replace {
            identity,
            threads,
            done: Some(done),
        });
        Ok(outcome)
    }

    /// Write locally, then push the full list remotely and wait for the outcome.
    ///
    /// # Errors
    /// Returns an error if the local write or the remote replace fails.
    pub async fn sync_now(&mut self) -> ChatResult<()> {
        let outcome = self.request_sync()?;
        await_sync(outcome).await
    }

    /// Queue a marker behind every pending replication. The receiver resolves
    /// once they have all been sent; `None` if nothing was ever queued.
    #[must_use]
    pub fn request_flush(&self) -> Option<oneshot::Receiver<()>> {
        let sender = self.replication.as_ref()?;
        let (done, finished) = oneshot::channel();
        sender.send(ReplicationJob::Flush(done)).ok()?;
        Some(finished)
    }

    /// Wait for every replication queued so far.
    pub async fn flush(&self) {
        if let Some(finished) = self.request_flush() {
            let _ = finished.await;
        }
    }

    /// Forget the in-memory session. Cached data stays on disk.
    pub fn clear(&mut self) {
        self.identity = None;
        self.threads.clear();
        self.active = None;
    }

    fn require_identity(&self) -> ChatResult<&Identity> {
        self.identity.as_ref().ok_or(ChatError::NoIdentity)
    }

    fn loading_message(&self) -> Message {
        Message::loading(self.labels.assistant.as_str(), self.labels.loading.as_str())
    }

    fn prepend_fresh_thread(&mut self, now: i64) -> ThreadId {
        let thread = Thread::new(Markup::placeholder_name(self.threads.len() + 1), now);
        let id = thread.id.clone();
        self.threads.insert(0, thread);
        self.active = Some(id.clone());
        id
    }

    /// Pick the thread list for a load, with every stored placeholder removed.
    fn resolve_threads(
        &self,
        identity: &Identity,
        fetched: ChatResult<Vec<RemoteThread>>,
        now: i64,
    ) -> (Vec<Thread>, LoadSource) {
        let cached = self.read_cached(identity);
        let (mut threads, source) = match fetched {
            Ok(records) => {
                let labels = (self.labels.user.as_str(), self.labels.assistant.as_str());
                let remote: Vec<Thread> = records
                    .into_iter()
                    .enumerate()
                    .map(|(i, record)| record.into_thread(i, labels, now))
                    .collect();
                (merge_threads(remote, cached.unwrap_or_default()), LoadSource::Remote)
            }
            Err(err) => {
                warn!("Remote thread fetch failed, using local cache: {err}");
                cached.map_or((Vec::new(), LoadSource::Empty), |threads| {
                    (threads, LoadSource::LocalCache)
                })
            }
        };
        for thread in &mut threads {
            thread.remove_loading();
        }
        (threads, source)
    }

    fn reattach_loading(&mut self) {
        let loading = self.loading_message();
        for thread in &mut self.threads {
            if self.in_flight.contains(&thread.id) {
                debug!("Thread {} still awaits its reply", thread.id);
                thread.messages.push(loading.clone());
            }
        }
    }

    /// Write the persistable thread list locally and return it.
    fn write_local(&self) -> ChatResult<Vec<Thread>> {
        let identity = self.require_identity()?;
        let snapshot: Vec<Thread> = self.threads.iter().map(Thread::persistable).collect();
        let json = serde_json::to_string(&snapshot)?;
        self.cache.set(&CacheKey::Threads(identity.clone()), &json)?;
        Ok(snapshot)
    }

    fn read_cached(&self, identity: &Identity) -> Option<Vec<Thread>> {
        let raw = match self.cache.get(&CacheKey::Threads(identity.clone())) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("Failed to read cached threads: {err}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(threads) => Some(threads),
            Err(err) => {
                warn!("Ignoring unreadable cached threads: {err}");
                None
            }
        }
    }

    /// Hand a job to the replication worker, starting it on first use.
    fn enqueue(&mut self, job: ReplicationJob) {
        if self
            .replication
            .as_ref()
            .is_none_or(mpsc::UnboundedSender::is_closed)
        {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                warn!("No async runtime available, skipping remote {}", job.describe());
                return;
            };
            let (sender, jobs) = mpsc::unbounded_channel();
            handle.spawn(replicate(Arc::clone(&self.remote), jobs));
            self.replication = Some(sender);
        }
        if let Some(Err(err)) = self.replication.as_ref().map(|sender| sender.send(job)) {
            warn!("Replication worker is gone, dropping remote {}", err.0.describe());
        }
    }
}

/// Wait for a sync queued by [`SessionStore::request_sync`].
///
/// # Errors
/// Returns the remote failure, or [`ChatError::ReplicationStopped`] when the
/// replication worker went away before answering.
pub async fn await_sync(outcome: oneshot::Receiver<ChatResult<()>>) -> ChatResult<()> {
    outcome
        .await
        .unwrap_or(Err(ChatError::ReplicationStopped))?;
    info!("Synchronized threads with the remote store");
    Ok(())
}

/// Merge a remote thread list with the local cache.
///
/// Remote order and content win, except that a local thread with the same id
/// and a strictly newer `updated_at` is kept, and local-only threads are kept
/// in front.
fn merge_threads(remote: Vec<Thread>, local: Vec<Thread>) -> Vec<Thread> {
    let remote_ids: HashSet<ThreadId> = remote.iter().map(|t| t.id.clone()).collect();
    let mut local_by_id: HashMap<ThreadId, Thread> = HashMap::new();
    let mut merged = Vec::with_capacity(remote.len() + local.len());

    for thread in local {
        if remote_ids.contains(&thread.id) {
            local_by_id.insert(thread.id.clone(), thread);
        } else {
            merged.push(thread);
        }
    }

    for thread in remote {
        match local_by_id.remove(&thread.id) {
            Some(local) if local.updated_at > thread.updated_at => merged.push(local),
            _ => merged.push(thread),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::session::testing::{FakeRemote, wait_until};
    use crate::chat::storage::local_cache::MemoryLocalCache;

    fn who(email: &str) -> Identity {
        Identity::new(email).unwrap()
    }

    fn store_with(remote: &Arc<FakeRemote>, cache: &Arc<MemoryLocalCache>) -> SessionStore {
        let cache: Arc<dyn LocalCache> = Arc::clone(cache) as Arc<dyn LocalCache>;
        let remote: Arc<dyn RemoteApi> = Arc::clone(remote) as Arc<dyn RemoteApi>;
        SessionStore::new(&ChatConfig::default(), cache, remote).unwrap()
    }

    fn cached_threads(cache: &MemoryLocalCache, email: &str) -> Vec<Thread> {
        let raw = cache.get(&CacheKey::Threads(who(email))).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn assert_active_valid(store: &SessionStore) {
        match store.active_id() {
            Some(id) => assert!(store.thread(id).is_some()),
            None => assert!(store.threads().is_empty()),
        }
    }

    #[tokio::test]
    async fn test_first_load_with_empty_remote() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);

        let report = store.load(who("a@x.com")).await.unwrap();

        assert_eq!(report.source, LoadSource::Remote);
        assert!(report.switched);
        assert_eq!(store.threads().len(), 1);
        let active = store.active_thread().unwrap();
        assert_eq!(active.name, "Chat 1");
        assert!(active.messages.is_empty());

        let cached = cached_threads(&cache, "a@x.com");
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "Chat 1");
        assert!(cached[0].messages.is_empty());
    }

    #[tokio::test]
    async fn test_load_falls_back_to_cache_then_empty() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        store.rename_thread(&store.threads()[0].id.clone(), "Kept").unwrap();

        remote.fail_fetch(true);
        let report = store.load(who("a@x.com")).await.unwrap();
        assert_eq!(report.source, LoadSource::LocalCache);
        assert!(!report.switched);
        assert_eq!(store.threads()[0].name, "Kept");

        let report = store.load(who("nobody@x.com")).await.unwrap();
        assert_eq!(report.source, LoadSource::Empty);
        assert_eq!(store.threads().len(), 1);
        assert_eq!(store.threads()[0].name, "Chat 1");
    }

    #[tokio::test]
    async fn test_identity_switch_isolates_and_starts_fresh() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);

        store.load(who("a@x.com")).await.unwrap();
        let a_thread = store.active_id().unwrap().clone();
        store.rename_thread(&a_thread, "A private").unwrap();
        store.flush().await;

        let report = store.load(who("b@x.com")).await.unwrap();
        assert!(report.switched);
        assert!(store.threads().iter().all(|t| t.id != a_thread));
        assert!(store.threads().iter().all(|t| t.name != "A private"));
        assert!(store.active_thread().unwrap().messages.is_empty());

        let report = store.load(who("a@x.com")).await.unwrap();
        assert!(report.switched);
        assert_eq!(store.threads().len(), 2);
        assert_eq!(store.active_id(), store.threads().first().map(|t| &t.id));
        assert!(store.threads().iter().any(|t| t.name == "A private"));
    }

    #[tokio::test]
    async fn test_reload_same_identity_keeps_selection() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let first = store.active_id().unwrap().clone();
        store.create_thread().unwrap();
        assert!(store.select_thread(&first));
        store.flush().await;

        let report = store.load(who("a@x.com")).await.unwrap();
        assert!(!report.switched);
        assert_eq!(report.fresh_thread, None);
        assert_eq!(store.active_id(), Some(&first));
    }

    #[tokio::test]
    async fn test_last_identity_survives_restart() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        store_with(&remote, &cache).load(who("a@x.com")).await.unwrap();

        let mut restarted = store_with(&remote, &cache);
        let report = restarted.load(who("a@x.com")).await.unwrap();
        assert!(!report.switched);
        assert_eq!(restarted.threads().len(), 1);
    }

    #[tokio::test]
    async fn test_create_names_sequentially_and_selects() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();

        let second = store.create_thread().unwrap();
        assert_eq!(store.threads()[0].name, "Chat 2");
        assert_eq!(store.active_id(), Some(&second));
        assert_eq!(cached_threads(&cache, "a@x.com").len(), 2);
    }

    #[tokio::test]
    async fn test_create_requires_identity() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        assert!(matches!(store.create_thread(), Err(ChatError::NoIdentity)));
    }

    #[tokio::test]
    async fn test_select_unknown_is_noop() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let active = store.active_id().cloned();

        assert!(!store.select_thread(&ThreadId::from_raw("missing")));
        assert_eq!(store.active_id().cloned(), active);
    }

    #[tokio::test]
    async fn test_rename_trims_and_ignores_blank() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();

        assert!(!store.rename_thread(&id, "   ").unwrap());
        assert_eq!(store.thread(&id).unwrap().name, "Chat 1");
        assert!(store.rename_thread(&id, "  Blood pressure  ").unwrap());
        assert_eq!(store.thread(&id).unwrap().name, "Blood pressure");
        assert_eq!(cached_threads(&cache, "a@x.com")[0].name, "Blood pressure");
    }

    #[tokio::test]
    async fn test_delete_reselects_and_replicates() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let older = store.active_id().unwrap().clone();
        let newer = store.create_thread().unwrap();

        assert!(store.delete_thread(&newer).unwrap());
        assert_eq!(store.active_id(), Some(&older));

        assert!(store.delete_thread(&older).unwrap());
        assert_eq!(store.active_id(), None);
        assert!(store.threads().is_empty());
        assert!(!store.delete_thread(&older).unwrap());

        store.flush().await;
        let mut deleted = remote.deleted();
        deleted.sort();
        let mut expected = vec![newer.to_string(), older.to_string()];
        expected.sort();
        assert_eq!(deleted, expected);
        assert!(remote.stored(&who("a@x.com")).is_empty());
    }

    #[tokio::test]
    async fn test_remote_failures_never_roll_back_local_state() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();

        remote.fail_writes(true);
        let id = store.create_thread().unwrap();
        assert!(store.delete_thread(&id).unwrap());
        store.flush().await;

        assert_eq!(store.threads().len(), 1);
        assert_eq!(cached_threads(&cache, "a@x.com").len(), 1);
        assert!(store.sync_now().await.is_err());
    }

    #[tokio::test]
    async fn test_active_pointer_stays_valid() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();

        for step in 0..24_usize {
            match step % 4 {
                0 | 1 => {
                    store.create_thread().unwrap();
                }
                2 => {
                    let id = store.threads()[step % store.threads().len()].id.clone();
                    store.delete_thread(&id).unwrap();
                }
                _ => {
                    if let Some(id) = store.threads().last().map(|t| t.id.clone()) {
                        store.rename_thread(&id, "renamed").unwrap();
                        store.delete_thread(&id).unwrap();
                    }
                }
            }
            assert_active_valid(&store);
        }
        while let Some(id) = store.threads().first().map(|t| t.id.clone()) {
            store.delete_thread(&id).unwrap();
            assert_active_valid(&store);
        }
        assert_eq!(store.active_id(), None);
    }

    #[tokio::test]
    async fn test_auto_title_once() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();

        let long = format!("What about <b>ibuprofen</b>\n{}", "and more ".repeat(10));
        store.append_message(&id, Message::user("You", &long)).unwrap();
        let title = store.thread(&id).unwrap().name.clone();
        assert!(title.starts_with("What about ibuprofen and more"));
        assert_eq!(title.chars().count(), 40);

        store
            .append_message(&id, Message::user("You", "Something else"))
            .unwrap();
        assert_eq!(store.thread(&id).unwrap().name, title);
    }

    #[tokio::test]
    async fn test_auto_title_respects_user_rename() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();

        store.rename_thread(&id, "My meds").unwrap();
        store.append_message(&id, Message::user("You", "Hi")).unwrap();
        assert_eq!(store.thread(&id).unwrap().name, "My meds");
    }

    #[tokio::test]
    async fn test_loading_is_never_cached() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();

        store.append_message(&id, Message::user("You", "Hi")).unwrap();
        store.begin_reply(&id).unwrap();
        store.persist().unwrap();
        store.flush().await;

        assert_eq!(cached_threads(&cache, "a@x.com")[0].messages.len(), 1);
        assert_eq!(remote.stored(&who("a@x.com"))[0].messages.len(), 1);
        assert!(store.thread(&id).unwrap().is_awaiting_reply());
        assert!(store.is_awaiting_reply(&id));
    }

    #[tokio::test]
    async fn test_reload_keeps_outstanding_reply_marked() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();
        store.append_message(&id, Message::user("You", "Hi")).unwrap();
        store.persist().unwrap();
        store.begin_reply(&id).unwrap();
        store.flush().await;

        store.load(who("a@x.com")).await.unwrap();
        assert!(store.is_awaiting_reply(&id));
        let thread = store.thread(&id).unwrap();
        assert_eq!(thread.messages.iter().filter(|m| m.is_loading()).count(), 1);
        assert_eq!(thread.messages[0].text, "Hi");

        assert_eq!(store.finish_reply(&id), Some(1));
        assert!(!store.is_awaiting_reply(&id));
        store.load(who("a@x.com")).await.unwrap();
        assert!(!store.is_awaiting_reply(&id));
        assert_eq!(store.thread(&id).unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_reply_for_missing_thread() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();
        store.begin_reply(&id).unwrap();

        store.load(who("b@x.com")).await.unwrap();
        assert!(store.thread(&id).is_none());
        assert_eq!(store.finish_reply(&id), None);
        assert!(!store.is_awaiting_reply(&id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replication_is_sent_in_order() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();

        remote.hold_replaces(true);
        for n in 0..8 {
            store.rename_thread(&id, &format!("Name {n}")).unwrap();
        }
        wait_until(|| remote.replace_count() >= 1).await;
        remote.hold_replaces(false);
        store.flush().await;

        assert_eq!(remote.replace_count(), 8);
        assert_eq!(remote.max_concurrent_replaces(), 1);
        assert_eq!(remote.stored(&who("a@x.com"))[0].name, "Name 7");
    }

    #[tokio::test]
    async fn test_sync_reports_behind_queued_writes() {
        let remote = Arc::new(FakeRemote::default());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut store = store_with(&remote, &cache);
        store.load(who("a@x.com")).await.unwrap();
        let id = store.active_id().unwrap().clone();

        store.rename_thread(&id, "Queued").unwrap();
        let outcome = store.request_sync().unwrap();
        store.rename_thread(&id, "Latest").unwrap();
        await_sync(outcome).await.unwrap();
        store.flush().await;

        assert_eq!(remote.replace_count(), 3);
        assert_eq!(remote.stored(&who("a@x.com"))[0].name, "Latest");
    }

    #[test]
    fn test_merge_prefers_newer_local_and_keeps_local_only() {
        let mut shared_remote = Thread::new("Remote name", 0);
        shared_remote.updated_at = 10;
        let mut shared_local = shared_remote.clone();
        shared_local.name = "Local name".to_string();
        shared_local.updated_at = 20;

        let mut stale_local = Thread::new("Stale", 0);
        stale_local.updated_at = 1;
        let mut fresh_remote = stale_local.clone();
        fresh_remote.name = "Fresh".to_string();
        fresh_remote.updated_at = 5;

        let local_only = Thread::new("Local only", 30);

        let merged = merge_threads(
            vec![shared_remote, fresh_remote],
            vec![local_only.clone(), shared_local, stale_local],
        );
        let names: Vec<&str> = merged.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Local only", "Local name", "Fresh"]);
        assert_eq!(merged[0].id, local_only.id);
    }
}
