//! REST pull calls: authentication, directory, unread counts, history and
//! read receipts.

use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use chat_core::{
    ChatError, ChatErrorCategory, Message, MessageOrigin, Session, User, UserId,
    auth_error_message, classify_auth_status, classify_http_status, message_from_wire,
    normalize_unread_counts,
    wire::{AuthResponse, LoginRequest, MarkReadRequest, RegisterRequest, WireMessage},
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, header::RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Pull side of the server contract.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<Session, ChatError>;

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, ChatError>;

    /// Directory of users visible to `self_id`.
    async fn users(&self, self_id: UserId) -> Result<Vec<User>, ChatError>;

    async fn unread_counts(&self, self_id: UserId) -> Result<HashMap<UserId, u64>, ChatError>;

    async fn history(&self, self_id: UserId, peer_id: UserId) -> Result<Vec<Message>, ChatError>;

    async fn mark_read(&self, self_id: UserId, peer_id: UserId) -> Result<(), ChatError>;

    /// Bearer token attached to subsequent calls; `None` clears it.
    fn set_auth_token(&self, token: Option<String>);
}

/// `reqwest`-backed [`ChatApi`].
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl HttpChatApi {
    pub fn new(base_url: Url) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                ChatError::new(
                    ChatErrorCategory::Internal,
                    "http_client_init_failed",
                    err.to_string(),
                )
            })?;
        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.base_url.join(path).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_endpoint",
                format!("cannot build endpoint '{path}': {err}"),
            )
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.token.read().ok().and_then(|guard| guard.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = ensure_success(response).await?;
        decode_json(response).await
    }

    async fn authenticate<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Session, ChatError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let text = response.text().await.unwrap_or_default();
            let category = classify_auth_status(status.as_u16());
            let code = match category {
                ChatErrorCategory::Auth => "auth_failed".to_owned(),
                ChatErrorCategory::RateLimited => "rate_limited".to_owned(),
                _ => format!("http_{}", status.as_u16()),
            };
            let mut error = ChatError::new(category, code, auth_error_message(&text));
            if let Some(delay) = retry_after {
                error = error.with_retry_after(delay);
            }
            return Err(error);
        }

        let auth: AuthResponse = decode_json(response).await?;
        Ok(Session {
            user: auth.user,
            token: auth.token,
        })
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn login(&self, username: &str, password: &str) -> Result<Session, ChatError> {
        self.authenticate(
            "auth/login",
            &LoginRequest {
                username: username.to_owned(),
                password: password.to_owned(),
            },
        )
        .await
    }

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, ChatError> {
        self.authenticate(
            "auth/register",
            &RegisterRequest {
                username: username.to_owned(),
                email: email.to_owned(),
                password: password.to_owned(),
            },
        )
        .await
    }

    async fn users(&self, self_id: UserId) -> Result<Vec<User>, ChatError> {
        self.get_json(&format!("users/{self_id}")).await
    }

    async fn unread_counts(&self, self_id: UserId) -> Result<HashMap<UserId, u64>, ChatError> {
        let raw: HashMap<String, serde_json::Value> =
            self.get_json(&format!("messages/unread/{self_id}")).await?;
        Ok(normalize_unread_counts(raw))
    }

    async fn history(&self, self_id: UserId, peer_id: UserId) -> Result<Vec<Message>, ChatError> {
        let rows: Vec<WireMessage> = self
            .get_json(&format!("messages/{self_id}/{peer_id}"))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| message_from_wire(row, MessageOrigin::FetchedHistory))
            .collect())
    }

    async fn mark_read(&self, self_id: UserId, peer_id: UserId) -> Result<(), ChatError> {
        let url = self.endpoint("messages/read")?;
        let response = self
            .authorized(self.client.post(url))
            .json(&MarkReadRequest {
                user_id: self_id,
                contact_id: peer_id,
            })
            .send()
            .await
            .map_err(map_transport_error)?;
        ensure_success(response).await.map(|_| ())
    }

    fn set_auth_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(_) => warn!("auth token lock poisoned, token not updated"),
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    let mut error = status_error(status, body);
    if let Some(delay) = retry_after {
        error = error.with_retry_after(delay);
    }
    warn!(code = %error.code, status = status.as_u16(), "pull call failed");
    Err(error)
}

fn status_error(status: StatusCode, body: String) -> ChatError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned()
    } else {
        body
    };
    ChatError::new(
        classify_http_status(status.as_u16()),
        format!("http_{}", status.as_u16()),
        message,
    )
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ChatError> {
    let bytes = response.bytes().await.map_err(map_transport_error)?;
    serde_json::from_slice(&bytes).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "invalid_response",
            err.to_string(),
        )
    })
}

fn map_transport_error(err: reqwest::Error) -> ChatError {
    let code = if err.is_timeout() {
        "request_timeout"
    } else if err.is_connect() {
        "connect_failed"
    } else {
        "request_failed"
    };
    let error = ChatError::new(ChatErrorCategory::Network, code, err.to_string());
    warn!(code, error = %err, "pull call transport failure");
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash_so_joins_keep_prefix() {
        let api = HttpChatApi::new(Url::parse("http://localhost:5000/api").expect("url"))
            .expect("client");
        assert_eq!(
            api.endpoint("auth/login").expect("endpoint").as_str(),
            "http://localhost:5000/api/auth/login"
        );

        let api = HttpChatApi::new(Url::parse("http://localhost:5000").expect("url"))
            .expect("client");
        assert_eq!(
            api.endpoint("messages/1/2").expect("endpoint").as_str(),
            "http://localhost:5000/messages/1/2"
        );
    }

    #[test]
    fn status_errors_use_classification_and_stable_codes() {
        let error = status_error(StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert_eq!(error.category, ChatErrorCategory::Network);
        assert_eq!(error.code, "http_503");
        assert_eq!(error.message, "Service Unavailable");

        let error = status_error(StatusCode::UNAUTHORIZED, "expired".to_owned());
        assert_eq!(error.category, ChatErrorCategory::Auth);
        assert_eq!(error.message, "expired");
    }

    #[test]
    fn token_can_be_set_and_cleared() {
        let api = HttpChatApi::new(Url::parse("http://localhost:5000").expect("url"))
            .expect("client");
        api.set_auth_token(Some("abc".to_owned()));
        assert_eq!(
            api.token.read().expect("lock").as_deref(),
            Some("abc")
        );
        api.set_auth_token(None);
        assert_eq!(api.token.read().expect("lock").as_deref(), None);
    }
}
