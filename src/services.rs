use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::telegram::TelegramApi;
use crate::settings::Settings;

mod http;
pub mod telegram;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("External service error: {0} -> {1} => {2}")]
    ExternalService(String, String, String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(settings: Settings) -> Result<(), anyhow::Error> {
    let (telegram_tx, mut telegram_rx) = mpsc::channel(512);
    let (user_tx, mut user_rx) = mpsc::channel(512);

    let mut telegram_service = telegram::TelegramService::new();
    let mut user_service = users::UserService::new();

    log::info!("Starting Telegram service.");
    let platform = Arc::new(TelegramApi::new(&settings.telegram)?);
    let telegram_handler = telegram::TelegramRequestHandler::new(platform, &settings);
    tokio::spawn(async move {
        telegram_service
            .run(telegram_handler, &mut telegram_rx)
            .await;
    });

    log::info!("Starting user service.");
    let user_handler = users::UserRequestHandler::new(&settings, telegram_tx.clone())?;
    match user_handler.sweep().await {
        Ok(removed) => log::info!("Startup sweep removed {} inactive users.", removed),
        Err(e) => log::error!("Startup sweep failed: {}", e),
    }
    if let Some(hours) = settings.storage.sweep_interval_hours {
        user_handler.start_sweep_task(hours).await;
    }
    tokio::spawn(async move {
        user_service.run(user_handler, &mut user_rx).await;
    });

    log::info!(
        "Referral gate ready: {} referrals required, {} point(s) per referral.",
        settings.referrals.required,
        settings.referrals.points
    );

    log::info!("Starting HTTP server.");
    http::start_http_server(&settings, user_tx, telegram_tx).await
}
