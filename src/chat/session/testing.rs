//! Scripted in-process [`RemoteApi`] used by the session tests.

use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{Identity, ThreadId};
use crate::chat::core::member::Member;
use crate::chat::core::thread::Thread;
use crate::chat::remote::api::{ApiFuture, RemoteApi};
use crate::chat::remote::types::{AskFailure, AskRequest, RemoteThread};

#[derive(Default)]
pub(crate) struct FakeRemote {
    store: Mutex<HashMap<String, Vec<Thread>>>,
    deleted: Mutex<Vec<String>>,
    asked: Mutex<Vec<AskRequest>>,
    replies: Mutex<VecDeque<Result<String, AskFailure>>>,
    members: Mutex<Vec<Member>>,
    fail_fetch: AtomicBool,
    fail_writes: AtomicBool,
    replaces: AtomicUsize,
    replaces_running: AtomicUsize,
    max_replaces_running: AtomicUsize,
    hold_asks: AtomicBool,
    release: Notify,
    ask_started: Notify,
    hold_fetches: AtomicBool,
    hold_replaces: AtomicBool,
    unblock: Notify,
    fetches: AtomicUsize,
}

/// Yield to other tasks until `done` holds.
pub(crate) async fn wait_until(done: impl Fn() -> bool) {
    while !done() {
        tokio::task::yield_now().await;
    }
}

/// Wait until `held` is cleared by [`FakeRemote::hold_fetches`] or
/// [`FakeRemote::hold_replaces`].
async fn wait_while_held(held: &AtomicBool, unblock: &Notify) {
    loop {
        let mut notified = pin!(unblock.notified());
        notified.as_mut().enable();
        if !held.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl FakeRemote {
    pub(crate) fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Queue the outcome of the next `ask`; unscripted asks answer `"ok"`.
    pub(crate) fn reply(&self, outcome: Result<&str, AskFailure>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(outcome.map(str::to_string));
    }

    pub(crate) fn set_members(&self, members: Vec<Member>) {
        *self.members.lock().unwrap() = members;
    }

    pub(crate) fn seed(&self, identity: &Identity, threads: Vec<Thread>) {
        self.store
            .lock()
            .unwrap()
            .insert(identity.as_str().to_string(), threads);
    }

    /// Make `ask` block until [`FakeRemote::release_ask`].
    pub(crate) fn hold_asks(&self) {
        self.hold_asks.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_ask(&self) {
        self.release.notify_one();
    }

    pub(crate) async fn ask_started(&self) {
        self.ask_started.notified().await;
    }

    /// Make `fetch_threads` block while `hold` is set.
    pub(crate) fn hold_fetches(&self, hold: bool) {
        self.set_hold(&self.hold_fetches, hold);
    }

    /// Make `replace_threads` block while `hold` is set.
    pub(crate) fn hold_replaces(&self, hold: bool) {
        self.set_hold(&self.hold_replaces, hold);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Highest number of `replace_threads` calls seen running at once.
    pub(crate) fn max_concurrent_replaces(&self) -> usize {
        self.max_replaces_running.load(Ordering::SeqCst)
    }

    fn set_hold(&self, flag: &AtomicBool, hold: bool) {
        flag.store(hold, Ordering::SeqCst);
        if !hold {
            self.unblock.notify_waiters();
        }
    }

    pub(crate) fn stored(&self, identity: &Identity) -> Vec<Thread> {
        self.store
            .lock()
            .unwrap()
            .get(identity.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub(crate) fn asked(&self) -> Vec<AskRequest> {
        self.asked.lock().unwrap().clone()
    }

    pub(crate) fn replace_count(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    fn write_guard(&self) -> ChatResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChatError::Remote {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteApi for FakeRemote {
    fn fetch_threads(&self, identity: &Identity) -> ApiFuture<'_, ChatResult<Vec<RemoteThread>>> {
        let email = identity.as_str().to_string();
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            wait_while_held(&self.hold_fetches, &self.unblock).await;
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(ChatError::Remote {
                    status: 500,
                    body: "down".to_string(),
                });
            }
            let threads = self
                .store
                .lock()
                .unwrap()
                .get(&email)
                .cloned()
                .unwrap_or_default();
            let json = serde_json::to_value(threads)?;
            Ok(serde_json::from_value(json)?)
        })
    }

    fn replace_threads(
        &self,
        identity: &Identity,
        threads: &[Thread],
    ) -> ApiFuture<'_, ChatResult<()>> {
        let email = identity.as_str().to_string();
        let threads = threads.to_vec();
        Box::pin(async move {
            self.replaces.fetch_add(1, Ordering::SeqCst);
            let running = self.replaces_running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_replaces_running.fetch_max(running, Ordering::SeqCst);
            wait_while_held(&self.hold_replaces, &self.unblock).await;
            tokio::task::yield_now().await;
            self.replaces_running.fetch_sub(1, Ordering::SeqCst);
            self.write_guard()?;
            self.store.lock().unwrap().insert(email, threads);
            Ok(())
        })
    }

    fn delete_thread(&self, identity: &Identity, id: &ThreadId) -> ApiFuture<'_, ChatResult<()>> {
        let email = identity.as_str().to_string();
        let id = id.clone();
        Box::pin(async move {
            self.write_guard()?;
            self.deleted.lock().unwrap().push(id.to_string());
            if let Some(threads) = self.store.lock().unwrap().get_mut(&email) {
                threads.retain(|t| t.id != id);
            }
            Ok(())
        })
    }

    fn ask(&self, request: &AskRequest) -> ApiFuture<'_, Result<String, AskFailure>> {
        let request = request.clone();
        Box::pin(async move {
            self.asked.lock().unwrap().push(request);
            self.ask_started.notify_one();
            if self.hold_asks.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        })
    }

    fn fetch_members(&self, _identity: &Identity) -> ApiFuture<'_, ChatResult<Vec<Member>>> {
        Box::pin(async move { Ok(self.members.lock().unwrap().clone()) })
    }
}
