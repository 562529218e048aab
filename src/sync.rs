// Session state synchronizer.
//
// Owns the session-scoped state (identity, cart, bookings, reviews, onboarding
// flag, currency) and reconciles it across the local store and the remote
// document store as the identity changes and the user acts.
//
// State lives in watch channels so consumers can observe it and so no lock is
// ever held across an await. The only lock is the listener registry, taken for
// the synchronous part of an identity transition.

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::{validate_email, AuthProvider, AuthUser, ProfileUpdate, Registration, Session, SignIn};
use crate::booking::{Booking, BookingDraft, Review, ReviewDraft};
use crate::cart::{Cart, CartLine, Product};
use crate::config::SyncConfig;
use crate::currency::Currency;
use crate::error::{StoreError, SyncError};
use crate::feed::{FeedHandle, FeedKind, Listeners};
use crate::store::{Document, DocumentEvent, DocumentStore, FieldFilter, LocalStore, QueryEvent, StoredDocument};

const CART_ITEMS_FIELD: &str = "items";
const HOTEL_FIELD: &str = "hotelId";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    #[default]
    Uninitialized,
    // Started, waiting for the provider's first report
    Resolving,
    Authenticated(Session),
    Anonymous,
}

impl IdentityState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            IdentityState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

struct Shared {
    config: SyncConfig,
    auth: Arc<dyn AuthProvider>,
    documents: Arc<dyn DocumentStore>,
    local: Arc<dyn LocalStore>,
    identity: watch::Sender<IdentityState>,
    cart: watch::Sender<Cart>,
    bookings: watch::Sender<Vec<Booking>>,
    reviews: watch::Sender<Vec<Review>>,
    onboarding_completed: watch::Sender<bool>,
    currency: watch::Sender<Currency>,
    // Generation whose local-cart reload is still in flight; cart operations wait for it
    cart_reload: watch::Sender<Option<u64>>,
    listeners: Mutex<Listeners>,
    // Bumped on every identity transition; feed work tagged with an older value is dropped
    generation: AtomicU64,
}

pub struct SessionSynchronizer {
    shared: Arc<Shared>,
    session_feed: Mutex<Option<FeedHandle>>,
}

impl SessionSynchronizer {
    pub fn new(
        config: SyncConfig,
        auth: Arc<dyn AuthProvider>,
        documents: Arc<dyn DocumentStore>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        let shared = Shared {
            config,
            auth,
            documents,
            local,
            identity: watch::channel(IdentityState::Uninitialized).0,
            cart: watch::channel(Cart::new()).0,
            bookings: watch::channel(Vec::new()).0,
            reviews: watch::channel(Vec::new()).0,
            onboarding_completed: watch::channel(false).0,
            currency: watch::channel(Currency::default()).0,
            cart_reload: watch::channel(None).0,
            listeners: Mutex::new(Listeners::default()),
            generation: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
            session_feed: Mutex::new(None),
        }
    }

    // Loads the onboarding flag and starts following the auth provider's session
    // reports. Must be called from within a tokio runtime.
    pub async fn start(&self) {
        info!("Starting session synchronizer");
        self.shared.identity.send_replace(IdentityState::Resolving);
        self.shared.load_onboarding_flag().await;

        let (mut events, unsubscribe) = self.shared.auth.on_session_change().into_parts();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(user) = events.next().await {
                shared.apply_session_change(user).await;
            }
            debug!("Session change feed ended");
        });

        if let Some(mut previous) = self
            .session_feed
            .lock()
            .replace(FeedHandle::new(task, unsubscribe))
        {
            previous.close();
        }
    }

    // Applies a session report directly. The auth feed calls this for every
    // report; it is public so hosts that receive auth events some other way can
    // drive the synchronizer themselves.
    pub async fn handle_session_change(&self, user: Option<AuthUser>) {
        self.shared.apply_session_change(user).await;
    }

    // Closes the auth feed and every open subscription. Safe to call twice.
    pub fn shutdown(&self) {
        if let Some(mut feed) = self.session_feed.lock().take() {
            feed.close();
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.cart_reload.send_replace(None);
        let closed = self.shared.listeners.lock().close_all();
        debug!(closed, "Session synchronizer shut down");
    }

    // ---- observable state ----

    pub fn identity(&self) -> IdentityState {
        self.shared.identity.borrow().clone()
    }

    pub fn watch_identity(&self) -> watch::Receiver<IdentityState> {
        self.shared.identity.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.current_session()
    }

    pub fn cart(&self) -> Cart {
        self.shared.cart.borrow().clone()
    }

    pub fn watch_cart(&self) -> watch::Receiver<Cart> {
        self.shared.cart.subscribe()
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.shared.bookings.borrow().clone()
    }

    pub fn watch_bookings(&self) -> watch::Receiver<Vec<Booking>> {
        self.shared.bookings.subscribe()
    }

    pub fn reviews(&self) -> Vec<Review> {
        self.shared.reviews.borrow().clone()
    }

    pub fn watch_reviews(&self) -> watch::Receiver<Vec<Review>> {
        self.shared.reviews.subscribe()
    }

    pub fn onboarding_completed(&self) -> bool {
        *self.shared.onboarding_completed.borrow()
    }

    pub fn watch_onboarding(&self) -> watch::Receiver<bool> {
        self.shared.onboarding_completed.subscribe()
    }

    pub fn currency(&self) -> Currency {
        *self.shared.currency.borrow()
    }

    pub fn watch_currency(&self) -> watch::Receiver<Currency> {
        self.shared.currency.subscribe()
    }

    pub fn currencies(&self) -> &'static [Currency] {
        &Currency::ALL
    }

    pub fn open_feed_count(&self) -> usize {
        self.shared.listeners.lock().open_count()
    }

    pub fn select_currency(&self, currency: Currency) {
        self.shared.currency.send_replace(currency);
    }

    // ---- cart ----

    pub async fn add_item(&self, product: &Product, qty: u32) -> Cart {
        self.shared.cart_settled().await;
        let next = self.shared.mutate_cart(|cart| cart.add(product, qty));
        self.shared.persist_cart(&next).await;
        next
    }

    pub async fn set_quantity(&self, id: &str, qty: i64) -> Cart {
        self.shared.cart_settled().await;
        let next = self.shared.mutate_cart(|cart| cart.set_quantity(id, qty));
        self.shared.persist_cart(&next).await;
        next
    }

    pub async fn remove_item(&self, id: &str) -> Cart {
        self.shared.cart_settled().await;
        let next = self.shared.mutate_cart(|cart| {
            cart.remove(id);
        });
        self.shared.persist_cart(&next).await;
        next
    }

    pub async fn clear(&self) -> Cart {
        self.shared.cart_settled().await;
        let next = self.shared.mutate_cart(Cart::clear);
        self.shared.persist_cart(&next).await;
        next
    }

    // ---- bookings and reviews ----

    // Returns the new booking id, or None when signed out, invalid or not stored
    pub async fn add_booking(&self, draft: BookingDraft) -> Option<String> {
        let Some(session) = self.session() else {
            debug!(error = %SyncError::NotAuthenticated, "Ignoring booking");
            return None;
        };
        if let Err(e) = draft.validate() {
            warn!(error = %e, hotel_id = %draft.hotel_id, "Rejected booking");
            return None;
        }

        let booking = draft.into_booking(&session.uid, Utc::now());
        let result = match booking.to_document() {
            Ok(data) => self
                .shared
                .documents
                .add_document(&self.shared.config.bookings_collection, data)
                .await
                .map_err(|e| SyncError::RemoteWriteFailure(e.to_string())),
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => {
                info!(booking_id = %id, hotel_id = %booking.hotel_id, total = booking.total_price, "Booking created");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to add booking");
                None
            }
        }
    }

    pub async fn add_review(&self, hotel_id: &str, draft: ReviewDraft) -> Option<String> {
        let Some(session) = self.session() else {
            debug!(error = %SyncError::NotAuthenticated, "Ignoring review");
            return None;
        };
        if let Err(e) = draft.validate() {
            warn!(error = %e, hotel_id, "Rejected review");
            return None;
        }

        let review = draft.into_review(
            hotel_id,
            &session.uid,
            session.display_name.as_deref(),
            Utc::now(),
        );
        let result = match review.to_document() {
            Ok(data) => self
                .shared
                .documents
                .add_document(&self.shared.config.reviews_collection, data)
                .await
                .map_err(|e| SyncError::RemoteWriteFailure(e.to_string())),
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, hotel_id, "Failed to add review");
                None
            }
        }
    }

    // All reviews for a hotel, by any author. Empty when the store cannot be read.
    pub async fn hotel_reviews(&self, hotel_id: &str) -> Vec<Review> {
        let filter = FieldFilter::eq(HOTEL_FIELD, hotel_id);
        match self
            .shared
            .documents
            .query_documents(&self.shared.config.reviews_collection, &filter)
            .await
        {
            Ok(docs) => parse_records(docs, Review::from_stored, "review"),
            Err(e) => {
                let e = SyncError::RemoteReadFailure(e.to_string());
                warn!(error = %e, hotel_id, "Failed to fetch hotel reviews");
                Vec::new()
            }
        }
    }

    // ---- profile and onboarding ----

    pub async fn create_profile(&self, uid: &str, name: &str, email: &str) {
        let mut data = Document::new();
        data.insert("name".to_string(), Value::from(name));
        data.insert("email".to_string(), Value::from(email));
        data.insert("createdAt".to_string(), json!(Utc::now()));

        if let Err(e) = self
            .shared
            .documents
            .set_document(&self.shared.config.users_collection, uid, data)
            .await
        {
            let e = SyncError::RemoteWriteFailure(e.to_string());
            warn!(error = %e, uid, "Failed to create user profile");
        }
    }

    pub async fn update_profile(&self, update: ProfileUpdate) {
        let Some(session) = self.session() else {
            debug!(error = %SyncError::NotAuthenticated, "Ignoring profile update");
            return;
        };
        if update.is_empty() {
            return;
        }
        if let Err(e) = update.validate() {
            warn!(error = %e, "Rejected profile update");
            return;
        }

        let mut data = Document::new();
        if let Some(name) = &update.display_name {
            data.insert("name".to_string(), Value::from(name.as_str()));
        }
        if let Some(email) = &update.email {
            data.insert("email".to_string(), Value::from(email.as_str()));
        }

        if let Err(e) = self
            .shared
            .documents
            .update_document(&self.shared.config.users_collection, &session.uid, data)
            .await
        {
            let e = SyncError::RemoteWriteFailure(e.to_string());
            warn!(error = %e, uid = %session.uid, "Failed to update user profile");
            return;
        }

        self.shared.identity.send_if_modified(|state| match state {
            IdentityState::Authenticated(current) if current.uid == session.uid => {
                if let Some(name) = &update.display_name {
                    current.display_name = Some(name.clone());
                }
                if let Some(email) = &update.email {
                    current.email = Some(email.clone());
                }
                true
            }
            _ => false,
        });
    }

    pub async fn complete_onboarding(&self) {
        let key = &self.shared.config.onboarding_key;
        match self.shared.local.set(key, "true").await {
            Ok(()) => {
                self.shared.onboarding_completed.send_replace(true);
            }
            Err(e) => {
                let e = SyncError::LocalStorageFailure(e.to_string());
                warn!(error = %e, "Failed to complete onboarding");
            }
        }
    }

    // ---- authentication ----

    // Signs in and makes sure a profile document exists. The session itself
    // arrives through the provider's session feed.
    pub async fn sign_in(&self, credentials: SignIn) -> Result<AuthUser, SyncError> {
        credentials.validate()?;
        let user = self
            .shared
            .auth
            .sign_in(credentials.email.trim(), &credentials.password)
            .await?;
        self.ensure_profile(&user, credentials.email.trim()).await;
        Ok(user)
    }

    pub async fn register(&self, registration: Registration) -> Result<AuthUser, SyncError> {
        registration.validate()?;
        let email = registration.email.trim();
        let user = self
            .shared
            .auth
            .sign_up(email, &registration.password)
            .await?;
        self.create_profile(&user.uid, registration.name.trim(), email)
            .await;
        Ok(user)
    }

    pub async fn send_password_reset(&self, email: &str) -> Result<(), SyncError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SyncError::ValidationFailure("email is required".to_string()));
        }
        validate_email(email)?;
        self.shared.auth.send_password_reset(email).await?;
        Ok(())
    }

    // Signs out and moves to Anonymous right away instead of waiting for the feed
    pub async fn logout(&self) {
        match self.shared.auth.sign_out().await {
            Ok(()) => self.shared.apply_session_change(None).await,
            Err(e) => {
                let e = SyncError::from(e);
                warn!(error = %e, "Sign out failed");
            }
        }
    }

    async fn ensure_profile(&self, user: &AuthUser, email: &str) {
        match self
            .shared
            .documents
            .get_document(&self.shared.config.users_collection, &user.uid)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                let name = user.display_name.as_deref().unwrap_or_default();
                self.create_profile(&user.uid, name, email).await;
            }
            Err(e) => {
                let e = SyncError::RemoteReadFailure(e.to_string());
                warn!(error = %e, uid = %user.uid, "Could not check user profile");
            }
        }
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn current_session(&self) -> Option<Session> {
        self.identity.borrow().session().cloned()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn mutate_cart(&self, mutate: impl FnOnce(&mut Cart)) -> Cart {
        let mut next = Cart::new();
        self.cart.send_modify(|cart| {
            mutate(cart);
            next = cart.clone();
        });
        next
    }

    async fn apply_session_change(self: &Arc<Self>, user: Option<AuthUser>) {
        match user {
            Some(user) => self.become_authenticated(Session::from(user)),
            None => self.become_anonymous().await,
        }
    }

    // Replaces the previous identity's feeds with three new ones scoped to `session`
    fn become_authenticated(self: &Arc<Self>, session: Session) {
        let uid = session.uid.clone();
        let mut listeners = self.listeners.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let closed = listeners.close_all();
        self.cart_reload.send_replace(None);
        self.identity
            .send_replace(IdentityState::Authenticated(session));
        info!(uid = %uid, closed, "Session authenticated");

        for kind in FeedKind::ALL {
            match self.open_feed(kind, &uid, generation) {
                Ok(handle) => listeners.replace(kind, handle),
                Err(e) => warn!(feed = %kind, uid = %uid, error = %e, "Failed to open subscription"),
            }
        }
    }

    async fn become_anonymous(self: &Arc<Self>) {
        let generation = {
            let mut listeners = self.listeners.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let closed = listeners.close_all();
            self.identity.send_replace(IdentityState::Anonymous);
            self.bookings.send_replace(Vec::new());
            self.reviews.send_replace(Vec::new());
            self.cart_reload.send_replace(Some(generation));
            info!(closed, "Session is anonymous");
            generation
        };

        // The remote cart is not authoritative without an identity. A slow local
        // store delays the reload, not the transition.
        let shared = Arc::clone(self);
        let reload = tokio::spawn(async move { shared.reload_local_cart(generation).await });
        match tokio::time::timeout(self.config.transition_timeout(), reload).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Local cart reload task failed"),
            Err(_) => {
                let e = StoreError::Timeout(self.config.transition_timeout_ms);
                warn!(error = %e, "Local cart reload still pending, continuing in background");
            }
        }
    }

    async fn reload_local_cart(&self, generation: u64) {
        let cart = match self.load_local_cart().await {
            Ok(cart) => cart,
            Err(e) => {
                warn!(error = %e, "Failed to load local cart");
                Cart::new()
            }
        };
        if self.is_current(generation) {
            self.cart.send_replace(cart);
        }
        self.cart_reload.send_if_modified(|pending| {
            if *pending == Some(generation) {
                *pending = None;
                true
            } else {
                false
            }
        });
    }

    async fn cart_settled(&self) {
        let mut pending = self.cart_reload.subscribe();
        let _ = pending.wait_for(Option::is_none).await;
    }

    fn open_feed(self: &Arc<Self>, kind: FeedKind, uid: &str, generation: u64) -> Result<FeedHandle, SyncError> {
        let subscription_failed = |e: StoreError| SyncError::RemoteSubscriptionFailure(e.to_string());
        let owner = FieldFilter::eq(self.config.owner_field.clone(), uid);
        let shared = Arc::clone(self);

        let handle = match kind {
            FeedKind::Cart => {
                let feed = self
                    .documents
                    .subscribe_document(&self.config.carts_collection, uid)
                    .map_err(subscription_failed)?;
                let (mut events, unsubscribe) = feed.into_parts();
                let task = tokio::spawn(async move {
                    while let Some(event) = events.next().await {
                        shared.on_cart_snapshot(event, generation).await;
                    }
                });
                FeedHandle::new(task, unsubscribe)
            }
            FeedKind::Bookings => {
                let feed = self
                    .documents
                    .subscribe_query(&self.config.bookings_collection, &owner)
                    .map_err(subscription_failed)?;
                let (mut events, unsubscribe) = feed.into_parts();
                let task = tokio::spawn(async move {
                    while let Some(event) = events.next().await {
                        shared.on_bookings_snapshot(event, generation);
                    }
                });
                FeedHandle::new(task, unsubscribe)
            }
            FeedKind::Reviews => {
                let feed = self
                    .documents
                    .subscribe_query(&self.config.reviews_collection, &owner)
                    .map_err(subscription_failed)?;
                let (mut events, unsubscribe) = feed.into_parts();
                let task = tokio::spawn(async move {
                    while let Some(event) = events.next().await {
                        shared.on_reviews_snapshot(event, generation);
                    }
                });
                FeedHandle::new(task, unsubscribe)
            }
        };
        debug!(feed = %kind, uid, "Subscription opened");
        Ok(handle)
    }

    // Remote wins when the document carries items; otherwise the local cart stands
    async fn on_cart_snapshot(&self, event: DocumentEvent, generation: u64) {
        let data = match event {
            Ok(data) => data,
            Err(e) => {
                let e = SyncError::RemoteSubscriptionFailure(e.to_string());
                warn!(feed = %FeedKind::Cart, error = %e, "Cart listener error");
                return;
            }
        };

        let remote_items = data
            .as_ref()
            .and_then(|doc| doc.get(CART_ITEMS_FIELD))
            .and_then(|items| match serde_json::from_value::<Vec<CartLine>>(items.clone()) {
                Ok(lines) => Some(Cart::from_lines(lines)),
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed remote cart items");
                    None
                }
            });

        match remote_items {
            Some(cart) => {
                if !self.is_current(generation) {
                    return;
                }
                self.cart.send_replace(cart.clone());
                if let Err(e) = self.write_local_cart(&cart).await {
                    warn!(error = %e, "Failed to persist cart locally");
                }
            }
            None => {
                let cart = match self.load_local_cart().await {
                    Ok(cart) => cart,
                    Err(e) => {
                        warn!(error = %e, "Failed to load local cart");
                        return;
                    }
                };
                if self.is_current(generation) {
                    self.cart.send_replace(cart);
                }
            }
        }
    }

    fn on_bookings_snapshot(&self, event: QueryEvent, generation: u64) {
        match event {
            Ok(docs) if self.is_current(generation) => {
                self.bookings
                    .send_replace(parse_records(docs, Booking::from_stored, "booking"));
            }
            Ok(_) => {}
            Err(e) => {
                let e = SyncError::RemoteSubscriptionFailure(e.to_string());
                warn!(feed = %FeedKind::Bookings, error = %e, "Bookings listener error");
            }
        }
    }

    fn on_reviews_snapshot(&self, event: QueryEvent, generation: u64) {
        match event {
            Ok(docs) if self.is_current(generation) => {
                self.reviews
                    .send_replace(parse_records(docs, Review::from_stored, "review"));
            }
            Ok(_) => {}
            Err(e) => {
                let e = SyncError::RemoteSubscriptionFailure(e.to_string());
                warn!(feed = %FeedKind::Reviews, error = %e, "Reviews listener error");
            }
        }
    }

    // Write-through: local always, remote only with a session. Failures are logged only.
    async fn persist_cart(&self, cart: &Cart) {
        if let Err(e) = self.write_local_cart(cart).await {
            warn!(error = %e, "Failed to persist cart locally");
        }
        if let Some(session) = self.current_session() {
            if let Err(e) = self.write_remote_cart(&session.uid, cart).await {
                warn!(error = %e, uid = %session.uid, "Failed to write cart to remote store");
            }
        }
    }

    async fn write_local_cart(&self, cart: &Cart) -> Result<(), SyncError> {
        let raw = serde_json::to_string(cart)?;
        self.local
            .set(&self.config.cart_key, &raw)
            .await
            .map_err(|e| SyncError::LocalStorageFailure(e.to_string()))
    }

    async fn write_remote_cart(&self, uid: &str, cart: &Cart) -> Result<(), SyncError> {
        let mut data = Document::new();
        data.insert(CART_ITEMS_FIELD.to_string(), serde_json::to_value(cart)?);
        self.documents
            .set_document(&self.config.carts_collection, uid, data)
            .await
            .map_err(|e| SyncError::RemoteWriteFailure(e.to_string()))
    }

    async fn load_local_cart(&self) -> Result<Cart, SyncError> {
        let raw = self
            .local
            .get(&self.config.cart_key)
            .await
            .map_err(|e| SyncError::LocalStorageFailure(e.to_string()))?;
        match raw {
            Some(raw) => {
                let lines: Vec<CartLine> = serde_json::from_str(&raw)?;
                Ok(Cart::from_lines(lines))
            }
            None => Ok(Cart::new()),
        }
    }

    async fn load_onboarding_flag(&self) {
        let read = tokio::time::timeout(
            self.config.transition_timeout(),
            self.local.get(&self.config.onboarding_key),
        )
        .await;
        match read {
            Ok(Ok(value)) => {
                self.onboarding_completed
                    .send_replace(value.as_deref() == Some("true"));
            }
            Ok(Err(e)) => {
                let e = SyncError::LocalStorageFailure(e.to_string());
                warn!(error = %e, "Failed to check onboarding");
            }
            Err(_) => {
                let e = StoreError::Timeout(self.config.transition_timeout_ms);
                warn!(error = %e, "Failed to check onboarding");
            }
        }
    }
}

fn parse_records<T>(
    docs: Vec<StoredDocument>,
    parse: impl Fn(StoredDocument) -> Result<T, SyncError>,
    kind: &str,
) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.id.clone();
            match parse(doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(id = %id, kind, error = %e, "Skipping malformed record");
                    None
                }
            }
        })
        .collect()
}
