//! In-memory stores and identity provider.
//!
//! Compiled for tests and behind the `test-support` feature so downstream
//! crates can drive the real coordinator and router without PostgreSQL or a
//! live provider.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::auth::{Identity, LegacyAccountRecord, Scheme, Session};
use crate::models::migration::{MigrationReceipt, MigrationState, PendingMigration};
use crate::provider::{ManagedIdentityProvider, NewIdentity, ProviderError, Provisioned};
use crate::store::{LegacyStore, MigrationJournal, OwnerTable, ReferenceStore, StoreError};
use crate::uuid::uuidv7;

/// bcrypt cost for seeded accounts; low so tests stay fast.
const TEST_BCRYPT_COST: u32 = 4;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Legacy accounts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryLegacyStore {
    accounts: Mutex<HashMap<String, LegacyAccountRecord>>,
    fail_deletes: AtomicBool,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with a bcrypt-hashed password.
    pub fn insert_account(&self, id: &str, email: &str, password: &str, username: &str) {
        let password_hash = bcrypt::hash(password, TEST_BCRYPT_COST).unwrap_or_default();
        lock(&self.accounts).insert(
            id.to_string(),
            LegacyAccountRecord {
                id: id.to_string(),
                email: email.to_string(),
                password_hash,
                username: username.to_string(),
                created_at: Utc::now(),
            },
        );
    }

    pub fn remove(&self, id: &str) {
        lock(&self.accounts).remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.accounts).contains_key(id)
    }

    pub fn ids(&self) -> HashSet<String> {
        lock(&self.accounts).keys().cloned().collect()
    }

    /// Make `delete_by_id` fail until switched off again.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LegacyStore for MemoryLegacyStore {
    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<LegacyAccountRecord>, StoreError> {
        Ok(lock(&self.accounts)
            .values()
            .find(|r| r.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<LegacyAccountRecord>, StoreError> {
        Ok(lock(&self.accounts).get(id).cloned())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("legacy delete failed".into()));
        }
        lock(&self.accounts).remove(id);
        Ok(())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(lock(&self.accounts).len() as i64)
    }
}

// ---------------------------------------------------------------------------
// Owner-keyed tables
// ---------------------------------------------------------------------------

/// Tables of `row id -> owner id`.
#[derive(Default)]
pub struct MemoryReferenceStore {
    tables: Mutex<HashMap<String, BTreeMap<String, String>>>,
    failing: Mutex<HashSet<String>>,
    legacy: Option<Arc<MemoryLegacyStore>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference store that reports legacy-owned rows against `legacy`.
    pub fn with_legacy_store(legacy: Arc<MemoryLegacyStore>) -> Self {
        Self {
            legacy: Some(legacy),
            ..Self::default()
        }
    }

    pub fn insert_row(&self, table: &str, row_id: &str, owner: &str) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .insert(row_id.to_string(), owner.to_string());
    }

    pub fn owner_of(&self, table: &str, row_id: &str) -> Option<String> {
        lock(&self.tables)
            .get(table)
            .and_then(|rows| rows.get(row_id))
            .cloned()
    }

    /// `(table, row id)` pairs owned by `owner`, across all tables.
    pub fn rows_owned_by(&self, owner: &str) -> Vec<(String, String)> {
        let tables = lock(&self.tables);
        let mut rows: Vec<_> = tables
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter()
                    .filter(|(_, o)| o.as_str() == owner)
                    .map(move |(id, _)| (table.clone(), id.clone()))
            })
            .collect();
        rows.sort();
        rows
    }

    /// Make updates to `table` fail until switched off again.
    pub fn fail_table(&self, table: &str, fail: bool) {
        let mut failing = lock(&self.failing);
        if fail {
            failing.insert(table.to_string());
        } else {
            failing.remove(table);
        }
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn update_owner(
        &self,
        table: &OwnerTable,
        old_owner: &str,
        new_owner: &str,
    ) -> Result<u64, StoreError> {
        if lock(&self.failing).contains(table.as_str()) {
            return Err(StoreError::Unavailable(format!("{table} is unavailable")));
        }
        let mut tables = lock(&self.tables);
        let Some(rows) = tables.get_mut(table.as_str()) else {
            return Ok(0);
        };
        let mut moved = 0;
        for owner in rows.values_mut().filter(|o| o.as_str() == old_owner) {
            *owner = new_owner.to_string();
            moved += 1;
        }
        Ok(moved)
    }

    async fn count_owned_by_legacy(&self, table: &OwnerTable) -> Result<i64, StoreError> {
        let Some(legacy) = &self.legacy else {
            return Ok(0);
        };
        let ids = legacy.ids();
        Ok(lock(&self.tables)
            .get(table.as_str())
            .map(|rows| rows.values().filter(|o| ids.contains(*o)).count() as i64)
            .unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Migration journal
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<BTreeMap<String, PendingMigration>>,
    receipts: Mutex<Vec<MigrationReceipt>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipts(&self) -> Vec<MigrationReceipt> {
        lock(&self.receipts).clone()
    }

    pub fn state_of(&self, legacy_id: &str) -> Option<MigrationState> {
        lock(&self.entries).get(legacy_id).map(|e| e.state)
    }

    /// Backdate a claim, as if its holder crashed `age` ago.
    pub fn age_claim(&self, legacy_id: &str, age: Duration) {
        if let Some(entry) = lock(&self.entries).get_mut(legacy_id)
            && let Ok(age) = chrono::Duration::from_std(age)
        {
            entry.claimed_at = Some(Utc::now() - age);
        }
    }
}

#[async_trait]
impl MigrationJournal for MemoryJournal {
    async fn record_provisioned(&self, entry: &PendingMigration) -> Result<(), StoreError> {
        lock(&self.entries)
            .entry(entry.legacy_id.clone())
            .or_insert_with(|| PendingMigration {
                state: MigrationState::Provisioned,
                claimed_at: None,
                ..entry.clone()
            });
        Ok(())
    }

    async fn find(&self, legacy_id: &str) -> Result<Option<PendingMigration>, StoreError> {
        Ok(lock(&self.entries).get(legacy_id).cloned())
    }

    async fn claim(&self, legacy_id: &str, stale_after: Duration) -> Result<bool, StoreError> {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(legacy_id) else {
            return Ok(false);
        };
        let now = Utc::now();
        let claimable = match entry.state {
            MigrationState::Provisioned => true,
            MigrationState::Remapping => entry.claimed_at.is_none_or(|at| {
                (now - at)
                    .to_std()
                    .is_ok_and(|held_for| held_for > stale_after)
            }),
            MigrationState::Completed => false,
        };
        if claimable {
            entry.state = MigrationState::Remapping;
            entry.claimed_at = Some(now);
        }
        Ok(claimable)
    }

    async fn release(&self, legacy_id: &str) -> Result<(), StoreError> {
        if let Some(entry) = lock(&self.entries).get_mut(legacy_id)
            && entry.state == MigrationState::Remapping
        {
            entry.state = MigrationState::Provisioned;
            entry.claimed_at = None;
        }
        Ok(())
    }

    async fn complete(&self, receipt: &MigrationReceipt) -> Result<(), StoreError> {
        if let Some(entry) = lock(&self.entries).get_mut(&receipt.legacy_id) {
            entry.state = MigrationState::Completed;
            entry.confirmation_pending = false;
        }
        let mut receipts = lock(&self.receipts);
        if !receipts.iter().any(|r| r.legacy_id == receipt.legacy_id) {
            receipts.push(receipt.clone());
        }
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<PendingMigration>, StoreError> {
        let mut unfinished: Vec<_> = lock(&self.entries)
            .values()
            .filter(|e| e.state != MigrationState::Completed)
            .cloned()
            .collect();
        unfinished.sort_by_key(|e| e.created_at);
        Ok(unfinished)
    }

    async fn count_completed(&self) -> Result<i64, StoreError> {
        Ok(lock(&self.entries)
            .values()
            .filter(|e| e.state == MigrationState::Completed)
            .count() as i64)
    }
}

// ---------------------------------------------------------------------------
// Identity provider
// ---------------------------------------------------------------------------

struct StoredIdentity {
    identity: Identity,
    password: String,
}

#[derive(Default)]
struct ProviderState {
    identities: HashMap<String, StoredIdentity>,
    /// access token -> identity id
    sessions: HashMap<String, String>,
    /// refresh token -> identity id
    refresh_tokens: HashMap<String, String>,
    reset_requests: Vec<String>,
}

/// Managed identity provider keeping everything in memory.
///
/// Emails are unique (case-insensitive), like the real provider, so
/// concurrent sign-ups for one email see exactly one success.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    state: Mutex<ProviderState>,
    verify_calls: AtomicU32,
    latency_ms: AtomicU32,
    sign_up_answer_delay_ms: AtomicU32,
    unavailable: AtomicBool,
    require_confirmation: AtomicBool,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an identity directly and return a live access token for it.
    pub fn seed_identity(&self, email: &str, password: &str, confirmed: bool) -> String {
        let identity = new_identity(email, confirmed, Default::default());
        let id = identity.id.clone();
        let mut state = lock(&self.state);
        state.identities.insert(
            id.clone(),
            StoredIdentity {
                identity,
                password: password.to_string(),
            },
        );
        issue_session(&mut state, &id).access_token
    }

    /// Number of `verify_session` calls that reached the provider.
    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, latency: Duration) {
        let ms = u32::try_from(latency.as_millis()).unwrap_or(u32::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Hold back the answer to `create_identity` after the identity has been
    /// stored, as when the response is lost once the provider has committed.
    pub fn delay_sign_up_answer(&self, delay: Duration) {
        let ms = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
        self.sign_up_answer_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// When on, sign-up withholds the session until `confirm` is called.
    pub fn require_confirmation(&self, required: bool) {
        self.require_confirmation.store(required, Ordering::SeqCst);
    }

    /// Confirm the email of every identity registered with `email`.
    pub fn confirm(&self, email: &str) {
        for stored in lock(&self.state).identities.values_mut() {
            if stored.identity.email.eq_ignore_ascii_case(email) {
                stored.identity.email_confirmed = true;
            }
        }
    }

    /// Whether `password` signs in the identity registered with `email`.
    pub fn has_password(&self, email: &str, password: &str) -> bool {
        lock(&self.state)
            .identities
            .values()
            .any(|s| s.identity.email.eq_ignore_ascii_case(email) && s.password == password)
    }

    pub fn identities_with_email(&self, email: &str) -> usize {
        lock(&self.state)
            .identities
            .values()
            .filter(|s| s.identity.email.eq_ignore_ascii_case(email))
            .count()
    }

    /// Emails that asked for a password reset, in order.
    pub fn reset_requests(&self) -> Vec<String> {
        lock(&self.state).reset_requests.clone()
    }

    async fn round_trip(&self) -> Result<(), ProviderError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(latency))).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("provider is down".into()));
        }
        Ok(())
    }
}

fn new_identity(email: &str, confirmed: bool, metadata: crate::models::auth::Metadata) -> Identity {
    let display_name = metadata
        .get("display_name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    Identity {
        id: uuidv7().to_string(),
        email: email.to_string(),
        display_name,
        email_confirmed: confirmed,
        created_at: Utc::now(),
        metadata,
        scheme: Scheme::Managed,
    }
}

fn issue_session(state: &mut ProviderState, id: &str) -> Session {
    let session = Session {
        access_token: format!("access-{}", uuidv7()),
        refresh_token: format!("refresh-{}", uuidv7()),
        expires_in: 3600,
        token_type: "bearer".into(),
    };
    state
        .sessions
        .insert(session.access_token.clone(), id.to_string());
    state
        .refresh_tokens
        .insert(session.refresh_token.clone(), id.to_string());
    session
}

#[async_trait]
impl ManagedIdentityProvider for MemoryIdentityProvider {
    async fn create_identity(&self, request: NewIdentity) -> Result<Provisioned, ProviderError> {
        self.round_trip().await?;
        let confirmed = !self.require_confirmation.load(Ordering::SeqCst);
        let provisioned = {
            let mut state = lock(&self.state);
            if state
                .identities
                .values()
                .any(|s| s.identity.email.eq_ignore_ascii_case(&request.email))
            {
                return Err(ProviderError::Conflict);
            }
            let identity = new_identity(&request.email, confirmed, request.metadata);
            let id = identity.id.clone();
            state.identities.insert(
                id.clone(),
                StoredIdentity {
                    identity: identity.clone(),
                    password: request.password,
                },
            );
            let session = confirmed.then(|| issue_session(&mut state, &id));
            Provisioned { identity, session }
        };
        let delay = self.sign_up_answer_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(delay))).await;
        }
        Ok(provisioned)
    }

    async fn verify_session(&self, access_token: &str) -> Result<Identity, ProviderError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;
        let state = lock(&self.state);
        state
            .sessions
            .get(access_token)
            .and_then(|id| state.identities.get(id))
            .map(|s| s.identity.clone())
            .ok_or_else(|| ProviderError::Rejected("invalid JWT".into()))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        self.round_trip().await?;
        let mut state = lock(&self.state);
        let id = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| ProviderError::Rejected("invalid refresh token".into()))?;
        Ok(issue_session(&mut state, &id))
    }

    async fn reset_credential(&self, email: &str) -> Result<(), ProviderError> {
        self.round_trip().await?;
        lock(&self.state).reset_requests.push(email.to_string());
        Ok(())
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Identity, Session), ProviderError> {
        self.round_trip().await?;
        let mut state = lock(&self.state);
        let (id, identity) = state
            .identities
            .iter()
            .find(|(_, s)| s.identity.email.eq_ignore_ascii_case(email) && s.password == password)
            .map(|(id, s)| (id.clone(), s.identity.clone()))
            .ok_or_else(|| ProviderError::Rejected("invalid login credentials".into()))?;
        if !identity.email_confirmed {
            return Err(ProviderError::Rejected("email not confirmed".into()));
        }
        let session = issue_session(&mut state, &id);
        Ok((identity, session))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        self.round_trip().await?;
        let mut state = lock(&self.state);
        let id = state
            .sessions
            .remove(access_token)
            .ok_or_else(|| ProviderError::Rejected("invalid JWT".into()))?;
        state.refresh_tokens.retain(|_, owner| *owner != id);
        Ok(())
    }

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        self.round_trip().await?;
        let mut state = lock(&self.state);
        let id = state
            .sessions
            .get(access_token)
            .cloned()
            .ok_or_else(|| ProviderError::Rejected("invalid JWT".into()))?;
        let stored = state
            .identities
            .get_mut(&id)
            .ok_or_else(|| ProviderError::Rejected("user not found".into()))?;
        stored.password = new_password.to_string();
        Ok(())
    }

    async fn fetch_identity(&self, id: &str) -> Result<Option<Identity>, ProviderError> {
        self.round_trip().await?;
        Ok(lock(&self.state)
            .identities
            .get(id)
            .map(|s| s.identity.clone()))
    }

    async fn find_identity_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Identity>, ProviderError> {
        self.round_trip().await?;
        Ok(lock(&self.state)
            .identities
            .values()
            .find(|s| s.identity.email.eq_ignore_ascii_case(email))
            .map(|s| s.identity.clone()))
    }
}
