use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDateTime};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::telegram::TelegramRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::membership::{Decision, JoinResult};
use crate::models::referrals::{ReferralOutcome, StateChange};
use crate::models::users::{UserRecord, UserStats, UserStatus, Users};
use crate::repositories::users::UserStore;
use crate::settings::{Referrals, Settings};

pub mod admission;
pub mod ledger;
pub mod retention;

pub enum UserRequest {
    Start {
        user_id: String,
        referral_code: Option<String>,
        display_name: Option<String>,
        handle: Option<String>,
        response: oneshot::Sender<Result<StartResult, ServiceError>>,
    },
    GetStatus {
        id: String,
        response: oneshot::Sender<Result<Option<UserStatus>, ServiceError>>,
    },
    JoinRequest {
        user_id: String,
        response: oneshot::Sender<Result<JoinResult, ServiceError>>,
    },
    Stats {
        response: oneshot::Sender<Result<UserStats, ServiceError>>,
    },
    Sweep {
        response: oneshot::Sender<Result<usize, ServiceError>>,
    },
    RestoreBackup {
        response: oneshot::Sender<Result<usize, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct StartResult {
    pub status: UserStatus,
    pub outcome: Option<ReferralOutcome>,
}

struct UserState {
    store: UserStore,
    users: Users,
}

impl UserState {
    // Disk first: memory only moves forward once the save succeeded.
    fn commit(&mut self, next: Users) -> Result<(), ServiceError> {
        self.store.save(&next).map_err(|e| {
            log::error!("Failed to save user data: {}", e);
            ServiceError::Repository("Users".to_string(), e.to_string())
        })?;
        self.users = next;

        Ok(())
    }
}

/// Owns the user mapping. Every request runs its read-decide-write sequence
/// under one lock, so concurrent referrals for the same referrer never both
/// observe the pre-crossing count.
#[derive(Clone)]
pub struct UserRequestHandler {
    state: Arc<Mutex<UserState>>,
    referrals: Referrals,
    retention: Duration,
    telegram_channel: mpsc::Sender<TelegramRequest>,
}

impl UserRequestHandler {
    pub fn new(
        settings: &Settings,
        telegram_channel: mpsc::Sender<TelegramRequest>,
    ) -> Result<Self, ServiceError> {
        let store = UserStore::from_settings(&settings.storage)
            .map_err(|e| ServiceError::Repository("Users".to_string(), e.to_string()))?;
        let users = store
            .load()
            .map_err(|e| ServiceError::Repository("Users".to_string(), e.to_string()))?;
        log::info!(
            "Loaded {} users from {}.",
            users.len(),
            store.data_file().display()
        );

        Ok(Self {
            state: Arc::new(Mutex::new(UserState { store, users })),
            referrals: settings.referrals,
            retention: Duration::try_days(settings.storage.retention_days)
                .unwrap_or(Duration::MAX),
            telegram_channel,
        })
    }

    fn now() -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn start(
        &self,
        user_id: String,
        referral_code: Option<String>,
        display_name: Option<String>,
        handle: Option<String>,
    ) -> Result<StartResult, ServiceError> {
        let now = Self::now();
        let mut state = self.state.lock().await;
        let mut next = state.users.clone();

        let outcome = referral_code
            .as_deref()
            .map(|code| ledger::process_referral(&mut next, &user_id, code, &self.referrals));

        match next.get_mut(&user_id) {
            Some(record) => record.last_activity_at = Some(now),
            None => {
                log::info!("New user {}.", user_id);
                next.insert(user_id.clone(), UserRecord::new(display_name, handle, now));
            }
        }

        state.commit(next)?;

        let record = state
            .users
            .get(&user_id)
            .ok_or_else(|| ServiceError::Internal(format!("user {} vanished", user_id)))?;
        let status = UserStatus::from_record(&user_id, record, self.referrals.required);

        let change = match (&outcome, referral_code) {
            (Some(outcome), Some(referrer_id)) if outcome.notifies() => {
                state.users.get(&referrer_id).map(|referrer| StateChange {
                    referee_id: user_id.clone(),
                    display_name: referrer.display_name.clone(),
                    handle: referrer.handle.clone(),
                    referral_count: referrer.referral_count(),
                    outcome: outcome.clone(),
                    referrer_id,
                })
            }
            _ => None,
        };
        // Queued under the lock so notifications follow commit order.
        if let Some(change) = change {
            self.notify(change).await;
        }
        drop(state);

        Ok(StartResult { status, outcome })
    }

    async fn notify(&self, change: StateChange) {
        if let Err(e) = self
            .telegram_channel
            .send(TelegramRequest::Notify(change))
            .await
        {
            log::error!("Failed to queue notification: {}", e);
        }
    }

    async fn get_status(&self, id: &str) -> Result<Option<UserStatus>, ServiceError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(id) {
            return Ok(None);
        }

        let mut next = state.users.clone();
        if let Some(record) = next.get_mut(id) {
            record.last_activity_at = Some(Self::now());
        }
        if let Err(e) = state.commit(next) {
            log::warn!("Could not refresh activity for {}: {}", id, e);
        }

        Ok(state
            .users
            .get(id)
            .map(|record| UserStatus::from_record(id, record, self.referrals.required)))
    }

    async fn join_request(&self, user_id: String) -> Result<JoinResult, ServiceError> {
        let decision = {
            let state = self.state.lock().await;
            admission::decide(&state.users, &user_id, self.referrals.required)
        };
        log::info!("Join request from {}: {:?}.", user_id, decision);

        let delivered = self.deliver_decision(&user_id, decision).await;
        let recorded =
            decision == Decision::Approve && delivered && self.record_approval(&user_id).await;

        Ok(JoinResult {
            decision,
            delivered,
            recorded,
        })
    }

    async fn deliver_decision(&self, user_id: &str, decision: Decision) -> bool {
        let (tx, rx) = oneshot::channel();
        let request = match decision {
            Decision::Approve => TelegramRequest::ApproveJoinRequest {
                user_id: user_id.to_string(),
                response: tx,
            },
            Decision::Decline => TelegramRequest::DeclineJoinRequest {
                user_id: user_id.to_string(),
                response: tx,
            },
        };

        if let Err(e) = self.telegram_channel.send(request).await {
            log::error!("Failed to queue join decision for {}: {}", user_id, e);
            return false;
        }

        match rx.await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("Join decision for {} not delivered: {}", user_id, e);
                false
            }
            Err(e) => {
                log::error!("No answer for join decision of {}: {}", user_id, e);
                false
            }
        }
    }

    async fn record_approval(&self, user_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let mut next = state.users.clone();
        let Some(record) = next.get_mut(user_id) else {
            log::warn!("Approved user {} is no longer stored.", user_id);
            return false;
        };

        let now = Self::now();
        record.is_approved = true;
        record.approved_at = Some(now);
        record.last_activity_at = Some(now);

        state.commit(next).is_ok()
    }

    /// Evicts inactive users and persists the result when anything changed.
    pub async fn sweep(&self) -> Result<usize, ServiceError> {
        let mut state = self.state.lock().await;
        let mut next = state.users.clone();

        let removed = retention::sweep(&mut next, self.retention, Self::now());
        if removed > 0 {
            state.commit(next)?;
            log::info!("{} inactive users removed.", removed);
        }

        Ok(removed)
    }

    pub async fn start_sweep_task(&self, interval_hours: u64) {
        let handler = self.clone();

        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(interval_hours.max(1) * 3600);
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately and startup already swept.
            interval.tick().await;

            loop {
                interval.tick().await;

                if let Err(e) = handler.sweep().await {
                    log::error!("Error sweeping inactive users: {}", e);
                }
            }
        });

        log::info!("Sweep task started");
    }

    async fn stats(&self) -> Result<UserStats, ServiceError> {
        if let Err(e) = self.sweep().await {
            log::error!("Sweep before stats failed: {}", e);
        }

        let state = self.state.lock().await;
        let required = self.referrals.required;
        let mut stats = UserStats {
            total_users: state.users.len(),
            ..Default::default()
        };
        for record in state.users.values() {
            stats.total_referrals += record.referral_count();
            if record.referral_count() >= required {
                stats.completed_users += 1;
            }
        }
        stats.pending_users = stats.total_users - stats.completed_users;

        Ok(stats)
    }

    async fn restore_backup(&self) -> Result<usize, ServiceError> {
        let mut state = self.state.lock().await;

        let backup = state
            .store
            .rollback_to_latest_backup()
            .map_err(|e| ServiceError::Repository("Users".to_string(), e.to_string()))?;
        state.users = state
            .store
            .load()
            .map_err(|e| ServiceError::Repository("Users".to_string(), e.to_string()))?;
        log::warn!(
            "Restored {} users from {}.",
            state.users.len(),
            backup.display()
        );

        Ok(state.users.len())
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Start {
                user_id,
                referral_code,
                display_name,
                handle,
                response,
            } => {
                let result = self
                    .start(user_id, referral_code, display_name, handle)
                    .await;
                let _ = response.send(result);
            }
            UserRequest::GetStatus { id, response } => {
                let status = self.get_status(&id).await;
                let _ = response.send(status);
            }
            UserRequest::JoinRequest { user_id, response } => {
                let result = self.join_request(user_id).await;
                let _ = response.send(result);
            }
            UserRequest::Stats { response } => {
                let stats = self.stats().await;
                let _ = response.send(stats);
            }
            UserRequest::Sweep { response } => {
                let removed = self.sweep().await;
                let _ = response.send(removed);
            }
            UserRequest::RestoreBackup { response } => {
                let result = self.restore_backup().await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
