use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::models::membership::MemberStatus;
use crate::settings;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} failed: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

/// Outbound chat platform calls. Every call is a single attempt.
#[async_trait]
pub trait ChatPlatform: Send + Sync + 'static {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), PlatformError>;
    async fn get_chat_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<MemberStatus, PlatformError>;
    async fn approve_join_request(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), PlatformError>;
    async fn decline_join_request(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), PlatformError>;
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct ChatMember {
    status: MemberStatus,
}

pub struct TelegramApi {
    base_url: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(settings: &settings::Telegram) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: format!(
                "{}/bot{}",
                settings.api_url.trim_end_matches('/'),
                settings.bot_token
            ),
            client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        payload: serde_json::Value,
    ) -> Result<T, PlatformError> {
        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(PlatformError::Api {
                method,
                description: response
                    .description
                    .unwrap_or_else(|| "Bad response format.".to_string()),
            }),
        }
    }
}

#[async_trait]
impl ChatPlatform for TelegramApi {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), PlatformError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text
                }),
            )
            .await?;

        Ok(())
    }

    async fn get_chat_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<MemberStatus, PlatformError> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                json!({
                    "chat_id": channel_id,
                    "user_id": user_id
                }),
            )
            .await?;

        Ok(member.status)
    }

    async fn approve_join_request(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), PlatformError> {
        let _: bool = self
            .call(
                "approveChatJoinRequest",
                json!({
                    "chat_id": channel_id,
                    "user_id": user_id
                }),
            )
            .await?;

        Ok(())
    }

    async fn decline_join_request(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), PlatformError> {
        let _: bool = self
            .call(
                "declineChatJoinRequest",
                json!({
                    "chat_id": channel_id,
                    "user_id": user_id
                }),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call; approve/decline/send fail when told to.
    #[derive(Default)]
    pub(crate) struct RecordingPlatform {
        pub calls: Mutex<Vec<String>>,
        pub messages: Mutex<Vec<(String, String)>>,
        pub fail_sends: bool,
        pub fail_approve: bool,
        pub member_status: Option<MemberStatus>,
    }

    impl RecordingPlatform {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn messages(&self) -> Vec<(String, String)> {
            self.messages.lock().unwrap().clone()
        }

        fn failure(method: &'static str) -> PlatformError {
            PlatformError::Api {
                method,
                description: "Forbidden".to_string(),
            }
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push(format!("send:{}", chat_id));
            if self.fail_sends {
                return Err(Self::failure("sendMessage"));
            }
            self.messages
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn get_chat_member(
            &self,
            _channel_id: &str,
            user_id: &str,
        ) -> Result<MemberStatus, PlatformError> {
            self.calls.lock().unwrap().push(format!("member:{}", user_id));
            self.member_status
                .clone()
                .ok_or_else(|| Self::failure("getChatMember"))
        }

        async fn approve_join_request(
            &self,
            _channel_id: &str,
            user_id: &str,
        ) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push(format!("approve:{}", user_id));
            if self.fail_approve {
                return Err(Self::failure("approveChatJoinRequest"));
            }
            Ok(())
        }

        async fn decline_join_request(
            &self,
            _channel_id: &str,
            user_id: &str,
        ) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push(format!("decline:{}", user_id));
            Ok(())
        }
    }

    #[test]
    fn parses_api_envelopes() {
        let ok: ApiResponse<ChatMember> =
            serde_json::from_str(r#"{"ok":true,"result":{"status":"administrator"}}"#).unwrap();
        assert!(ok.ok);
        assert!(ok.result.unwrap().status.is_joined());

        let member: ChatMember = serde_json::from_str(r#"{"status":"left"}"#).unwrap();
        assert!(!member.status.is_joined());

        let odd: ChatMember = serde_json::from_str(r#"{"status":"banned_forever"}"#).unwrap();
        assert_eq!(odd.status, MemberStatus::Unknown);

        let err: ApiResponse<bool> =
            serde_json::from_str(r#"{"ok":false,"description":"Bad Request: user not found"}"#)
                .unwrap();
        assert!(!err.ok);
        assert_eq!(
            err.description.as_deref(),
            Some("Bad Request: user not found")
        );
    }
}
