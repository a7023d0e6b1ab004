use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};

use super::{RequestHandler, Service, ServiceError};
use crate::models::referrals::{Notification, ReferralOutcome, StateChange};
use crate::repositories::telegram::ChatPlatform;
use crate::settings::Settings;

pub enum TelegramRequest {
    /// Fire and forget: delivery failures are only logged.
    Notify(StateChange),
    ApproveJoinRequest {
        user_id: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    DeclineJoinRequest {
        user_id: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    IsChannelMember {
        user_id: String,
        response: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
pub struct TelegramRequestHandler {
    platform: Arc<dyn ChatPlatform>,
    channel_id: String,
    invite_link: String,
    admin_id: String,
    required: usize,
    award: u64,
}

impl TelegramRequestHandler {
    pub fn new(platform: Arc<dyn ChatPlatform>, settings: &Settings) -> Self {
        Self {
            platform,
            channel_id: settings.channel.channel_id.clone(),
            invite_link: settings.channel.invite_link.clone(),
            admin_id: settings.admin.user_id.clone(),
            required: settings.referrals.required,
            award: settings.referrals.points,
        }
    }

    /// Messages owed for a persisted referral credit.
    pub fn notifications(&self, change: &StateChange) -> Vec<Notification> {
        match change.outcome {
            ReferralOutcome::ProgressUpdate { referrals, points } => {
                vec![Notification::Progress {
                    chat_id: change.referrer_id.clone(),
                    award: self.award,
                    referrals,
                    required: self.required,
                    points,
                }]
            }
            ReferralOutcome::ThresholdReached { .. } => vec![
                Notification::Completed {
                    chat_id: change.referrer_id.clone(),
                    required: self.required,
                    invite_link: self.invite_link.clone(),
                },
                Notification::AdminCompleted {
                    admin_id: self.admin_id.clone(),
                    user_id: change.referrer_id.clone(),
                    display_name: change.display_name.clone(),
                    handle: change.handle.clone(),
                    referrals: change.referral_count,
                },
            ],
            _ => Vec::new(),
        }
    }

    async fn deliver(&self, change: StateChange) {
        let notifications = self.notifications(&change);
        let sends = notifications.iter().map(|notification| async move {
            let text = render(notification);
            (notification, self.platform.send_message(notification.chat_id(), &text).await)
        });

        for (notification, result) in join_all(sends).await {
            match result {
                Ok(()) => log::info!("Notified {}.", notification.chat_id()),
                Err(e) => log::error!("Notification to {} failed: {}", notification.chat_id(), e),
            }
        }
    }

    async fn approve(&self, user_id: &str) -> Result<(), ServiceError> {
        self.platform
            .approve_join_request(&self.channel_id, user_id)
            .await
            .map_err(|e| {
                ServiceError::ExternalService(
                    "TelegramService".to_string(),
                    "approveChatJoinRequest".to_string(),
                    e.to_string(),
                )
            })?;
        log::info!("Approved user {}", user_id);

        Ok(())
    }

    async fn decline(&self, user_id: &str) -> Result<(), ServiceError> {
        self.platform
            .decline_join_request(&self.channel_id, user_id)
            .await
            .map_err(|e| {
                ServiceError::ExternalService(
                    "TelegramService".to_string(),
                    "declineChatJoinRequest".to_string(),
                    e.to_string(),
                )
            })?;
        log::info!("Declined user {}", user_id);

        Ok(())
    }

    async fn is_channel_member(&self, user_id: &str) -> bool {
        match self.platform.get_chat_member(&self.channel_id, user_id).await {
            Ok(status) => status.is_joined(),
            Err(e) => {
                log::warn!("Could not check membership of {}: {}", user_id, e);
                false
            }
        }
    }
}

fn render(notification: &Notification) -> String {
    match notification {
        Notification::Progress {
            award,
            referrals,
            required,
            points,
            ..
        } => format!(
            "+{} point received!\n\nReferrals: {}/{}\nPoints: {}\n\nOnly {} more needed!",
            award,
            referrals,
            required,
            points,
            required.saturating_sub(*referrals)
        ),
        Notification::Completed {
            required,
            invite_link,
            ..
        } => format!(
            "Congratulations! You have completed {} referrals.\n\nYou can now join the channel:\n{}\n\nSend a join request to get auto-approved.",
            required, invite_link
        ),
        Notification::AdminCompleted {
            user_id,
            display_name,
            handle,
            referrals,
            ..
        } => format!(
            "Referral target completed.\n\nName: {}\nUsername: @{}\nUser ID: {}\nTotal referrals: {}\nCompleted at: {}\n\nUser is eligible for channel access.",
            display_name.as_deref().unwrap_or("N/A"),
            handle.as_deref().unwrap_or("N/A"),
            user_id,
            referrals,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
    }
}

#[async_trait]
impl RequestHandler<TelegramRequest> for TelegramRequestHandler {
    async fn handle_request(&self, request: TelegramRequest) {
        match request {
            TelegramRequest::Notify(change) => {
                self.deliver(change).await;
            }
            TelegramRequest::ApproveJoinRequest { user_id, response } => {
                let result = self.approve(&user_id).await;
                let _ = response.send(result);
            }
            TelegramRequest::DeclineJoinRequest { user_id, response } => {
                let result = self.decline(&user_id).await;
                let _ = response.send(result);
            }
            TelegramRequest::IsChannelMember { user_id, response } => {
                let joined = self.is_channel_member(&user_id).await;
                let _ = response.send(joined);
            }
        }
    }
}

pub struct TelegramService;

impl TelegramService {
    pub fn new() -> Self {
        Self {}
    }
}

/// Notifications go through one ordered delivery task so a referrer never sees
/// "2/3" before "1/3". Join decisions and membership checks stay concurrent.
#[async_trait]
impl Service<TelegramRequest, TelegramRequestHandler> for TelegramService {
    async fn run(
        &mut self,
        handler: TelegramRequestHandler,
        receiver: &mut mpsc::Receiver<TelegramRequest>,
    ) {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let notifier = handler.clone();
        tokio::spawn(async move {
            while let Some(change) = notify_rx.recv().await {
                notifier.deliver(change).await;
            }
        });

        while let Some(request) = receiver.recv().await {
            match request {
                TelegramRequest::Notify(change) => {
                    if let Err(e) = notify_tx.send(change) {
                        log::error!("Notification task is gone: {}", e);
                    }
                }
                request => {
                    let handler = handler.clone();

                    tokio::spawn(async move {
                        handler.handle_request(request).await;
                    });
                }
            }
        }
    }
}
