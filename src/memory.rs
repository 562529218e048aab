// In-memory collaborators: a key-value store, a document store with live
// subscriptions and an auth provider. Used by the tests and for offline runs.
// Each one supports failure injection so best-effort paths can be exercised.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::auth::{AuthProvider, AuthUser};
use crate::error::{AuthError, StoreError};
use crate::feed::{Feed, Unsubscribe};
use crate::store::{
    Document, DocumentEvent, DocumentStore, FieldFilter, LocalStore, QueryEvent, StoredDocument,
};

const GENERATED_ID_LEN: usize = 20;

pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> futures::stream::BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
        .boxed()
}

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: DashMap<String, String>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_delay_ms: AtomicU64,
    write_count: AtomicUsize,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    // Makes every read stall, simulating an unresponsive device store
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("local read failed".to_string()));
        }
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("local write failed".to_string()));
        }
        self.entries.insert(key.to_string(), value.to_string());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("local write failed".to_string()));
        }
        self.entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

enum WatchTarget {
    Document {
        collection: String,
        id: String,
        sender: mpsc::UnboundedSender<DocumentEvent>,
    },
    Query {
        collection: String,
        filter: FieldFilter,
        sender: mpsc::UnboundedSender<QueryEvent>,
    },
}

struct Watcher {
    id: u64,
    target: WatchTarget,
}

type Watchers = Mutex<Vec<Watcher>>;

pub struct MemoryDocumentStore {
    documents: DashMap<(String, String), Document>,
    watchers: Arc<Watchers>,
    next_watcher_id: AtomicU64,
    subscriptions_opened: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscribes: AtomicBool,
    write_count: AtomicUsize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self {
            documents: DashMap::new(),
            watchers: Arc::new(Mutex::new(Vec::new())),
            next_watcher_id: AtomicU64::new(1),
            subscriptions_opened: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_subscribes: AtomicBool::new(false),
            write_count: AtomicUsize::new(0),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    // Subscriptions currently open (not yet unsubscribed)
    pub fn active_subscriptions(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.subscriptions_opened.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn peek(&self, collection: &str, id: &str) -> Option<Document> {
        self.documents
            .get(&(collection.to_string(), id.to_string()))
            .map(|d| d.value().clone())
    }

    pub fn documents_in(&self, collection: &str) -> Vec<StoredDocument> {
        let mut docs: Vec<StoredDocument> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| StoredDocument {
                id: entry.key().1.clone(),
                data: entry.value().clone(),
            })
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    // Writes without failure injection, as another device would
    pub fn seed(&self, collection: &str, id: &str, data: Document) {
        self.documents
            .insert((collection.to_string(), id.to_string()), data);
        self.notify(collection);
    }

    // Pushes an error to every open subscription
    pub fn broadcast_error(&self, error: StoreError) {
        for watcher in self.watchers.lock().iter() {
            match &watcher.target {
                WatchTarget::Document { sender, .. } => {
                    let _ = sender.send(Err(error.clone()));
                }
                WatchTarget::Query { sender, .. } => {
                    let _ = sender.send(Err(error.clone()));
                }
            }
        }
    }

    fn matching(&self, collection: &str, filter: &FieldFilter) -> Vec<StoredDocument> {
        self.documents_in(collection)
            .into_iter()
            .filter(|doc| filter.matches(&doc.data))
            .collect()
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote write failed".to_string()));
        }
        Ok(())
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote read failed".to_string()));
        }
        Ok(())
    }

    // Sends a fresh snapshot to every watcher of the collection.
    // Snapshots are built before taking the watcher lock.
    fn notify(&self, collection: &str) {
        let targets: Vec<(u64, Option<String>, Option<FieldFilter>)> = self
            .watchers
            .lock()
            .iter()
            .filter_map(|w| match &w.target {
                WatchTarget::Document { collection: c, id, .. } if c == collection => {
                    Some((w.id, Some(id.clone()), None))
                }
                WatchTarget::Query { collection: c, filter, .. } if c == collection => {
                    Some((w.id, None, Some(filter.clone())))
                }
                _ => None,
            })
            .collect();

        let mut doc_snapshots = Vec::new();
        let mut query_snapshots = Vec::new();
        for (watcher_id, doc_id, filter) in targets {
            if let Some(doc_id) = doc_id {
                doc_snapshots.push((watcher_id, self.peek(collection, &doc_id)));
            } else if let Some(filter) = filter {
                query_snapshots.push((watcher_id, self.matching(collection, &filter)));
            }
        }

        let watchers = self.watchers.lock();
        for (watcher_id, snapshot) in doc_snapshots {
            if let Some(Watcher {
                target: WatchTarget::Document { sender, .. },
                ..
            }) = watchers.iter().find(|w| w.id == watcher_id)
            {
                let _ = sender.send(Ok(snapshot));
            }
        }
        for (watcher_id, snapshot) in query_snapshots {
            if let Some(Watcher {
                target: WatchTarget::Query { sender, .. },
                ..
            }) = watchers.iter().find(|w| w.id == watcher_id)
            {
                let _ = sender.send(Ok(snapshot));
            }
        }
    }

    fn register(&self, target: WatchTarget) -> Unsubscribe {
        let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);
        self.watchers.lock().push(Watcher { id, target });
        self.subscriptions_opened.fetch_add(1, Ordering::SeqCst);

        let watchers: Weak<Watchers> = Arc::downgrade(&self.watchers);
        Unsubscribe::new(move || {
            if let Some(watchers) = watchers.upgrade() {
                watchers.lock().retain(|w| w.id != id);
            }
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        self.check_reads()?;
        Ok(self.peek(collection, id))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> Result<(), StoreError> {
        self.check_writes()?;
        self.documents
            .insert((collection.to_string(), id.to_string()), data);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.notify(collection);
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        updates: Document,
    ) -> Result<(), StoreError> {
        self.check_writes()?;
        {
            let key = (collection.to_string(), id.to_string());
            let mut existing = self.documents.get_mut(&key).ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            for (field, value) in updates {
                existing.insert(field, value);
            }
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.notify(collection);
        Ok(())
    }

    async fn add_document(&self, collection: &str, data: Document) -> Result<String, StoreError> {
        self.check_writes()?;
        let id = generate_id();
        self.documents
            .insert((collection.to_string(), id.clone()), data);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.notify(collection);
        Ok(id)
    }

    async fn query_documents(
        &self,
        collection: &str,
        filter: &FieldFilter,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.check_reads()?;
        Ok(self.matching(collection, filter))
    }

    fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Feed<DocumentEvent>, StoreError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("subscribe failed".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Ok(self.peek(collection, id)));
        let unsubscribe = self.register(WatchTarget::Document {
            collection: collection.to_string(),
            id: id.to_string(),
            sender,
        });
        Ok(Feed::new(receiver_stream(receiver), unsubscribe))
    }

    fn subscribe_query(
        &self,
        collection: &str,
        filter: &FieldFilter,
    ) -> Result<Feed<QueryEvent>, StoreError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("subscribe failed".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Ok(self.matching(collection, filter)));
        let unsubscribe = self.register(WatchTarget::Query {
            collection: collection.to_string(),
            filter: filter.clone(),
            sender,
        });
        Ok(Feed::new(receiver_stream(receiver), unsubscribe))
    }
}

// ---------------------------------------------------------------------------
// Auth provider
// ---------------------------------------------------------------------------

struct Account {
    password: String,
    user: AuthUser,
}

pub struct MemoryAuthProvider {
    accounts: DashMap<String, Account>,
    current: watch::Sender<Option<AuthUser>>,
    listeners: Arc<AtomicUsize>,
    password_resets: Mutex<Vec<String>>,
    fail_sign_out: AtomicBool,
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: DashMap::new(),
            current,
            listeners: Arc::new(AtomicUsize::new(0)),
            password_resets: Mutex::new(Vec::new()),
            fail_sign_out: AtomicBool::new(false),
        }
    }
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, email: &str, password: &str, display_name: Option<&str>) -> Self {
        self.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: AuthUser {
                    uid: generate_id(),
                    display_name: display_name.map(str::to_string),
                    email: Some(email.to_string()),
                },
            },
        );
        self
    }

    // Simulates the provider reporting a session change (e.g. token restored or expired)
    pub fn set_current_user(&self, user: Option<AuthUser>) {
        self.current.send_replace(user);
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.current.borrow().clone()
    }

    pub fn active_listeners(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    pub fn password_resets(&self) -> Vec<String> {
        self.password_resets.lock().clone()
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    fn on_session_change(&self) -> Feed<Option<AuthUser>> {
        let receiver = self.current.subscribe();
        let events = futures::stream::unfold((receiver, true), |(mut receiver, first)| async move {
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let user = receiver.borrow_and_update().clone();
            Some((user, (receiver, false)))
        })
        .boxed();

        self.listeners.fetch_add(1, Ordering::SeqCst);
        let listeners = Arc::clone(&self.listeners);
        Feed::new(
            events,
            Unsubscribe::new(move || {
                listeners.fetch_sub(1, Ordering::SeqCst);
            }),
        )
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let user = {
            let account = self
                .accounts
                .get(email)
                .ok_or_else(|| AuthError::UnknownAccount(email.to_string()))?;
            if account.password != password {
                return Err(AuthError::InvalidCredentials);
            }
            account.user.clone()
        };
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let user = AuthUser {
            uid: generate_id(),
            display_name: None,
            email: Some(email.to_string()),
        };
        match self.accounts.entry(email.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AuthError::AccountExists(email.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Account {
                    password: password.to_string(),
                    user: user.clone(),
                });
            }
        }
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::NetworkError("sign out failed".to_string()));
        }
        self.current.send_replace(None);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if !self.accounts.contains_key(email) {
            return Err(AuthError::UnknownAccount(email.to_string()));
        }
        self.password_resets.lock().push(email.to_string());
        Ok(())
    }
}
