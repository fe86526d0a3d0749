//! Matrix client-server API transport.
//!
//! Posts each message as an `m.notice` room event. The message is HTML: it is
//! sent unchanged as `formatted_body`, with a tag-stripped copy as `body` for
//! clients that only show plain text.
//! Every call is a single `PUT /rooms/{roomId}/send/m.room.message/{txnId}`
//! with a fresh transaction id.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::RoomId;

use crate::error::{DeliveryError, Result};
use crate::transport::Deliverer;

/// Longest slice of an unparseable error body kept in the error message.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Connection settings for the homeserver.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub homeserver_url: String,
    pub access_token: String,
    pub timeout: Duration,
}

/// An HTML tag: `<`, at least one character other than `<`, then `>`.
static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^<]+?>").unwrap_or_else(|_| unreachable!()));

/// `m.room.message` event content.
#[derive(Debug, Serialize)]
struct NoticeContent<'a> {
    msgtype: &'static str,
    body: String,
    format: &'static str,
    formatted_body: &'a str,
}

/// Standard Matrix error body.
#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    errcode: String,
    #[serde(default)]
    error: Option<String>,
}

/// Delivers notices to Matrix rooms.
#[derive(Debug, Clone)]
pub struct MatrixClient {
    client: reqwest::Client,
    homeserver: Url,
    access_token: String,
    timeout: Duration,
}

impl MatrixClient {
    pub fn new(config: MatrixConfig) -> std::result::Result<Self, AppError> {
        let homeserver = Url::parse(&config.homeserver_url).map_err(|e| {
            AppError::Config(format!(
                "invalid homeserver URL '{}': {e}",
                config.homeserver_url
            ))
        })?;
        if homeserver.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "homeserver URL '{}' cannot be used as a base URL",
                config.homeserver_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(homeserver = %homeserver, "Matrix client configured");

        Ok(Self {
            client,
            homeserver,
            access_token: config.access_token,
            timeout: config.timeout,
        })
    }

    /// Build the send URL for a room and transaction id.
    fn send_url(&self, room: &RoomId, txn_id: &str) -> Result<Url> {
        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .map_err(|_| DeliveryError::unexpected("homeserver URL cannot be a base"))?
            .pop_if_empty()
            .extend([
                "_matrix",
                "client",
                "v3",
                "rooms",
                room.as_str(),
                "send",
                "m.room.message",
                txn_id,
            ]);
        Ok(url)
    }
}

impl Deliverer for MatrixClient {
    async fn deliver(&self, destination: &RoomId, body: &str) -> Result<()> {
        let txn_id = Uuid::new_v4().simple().to_string();
        let url = self.send_url(destination, &txn_id)?;
        let content = NoticeContent {
            msgtype: "m.notice",
            body: plain_body(body),
            format: "org.matrix.custom.html",
            formatted_body: body,
        };

        let response = match self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&content)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(DeliveryError::timeout(self.timeout.as_secs()));
            }
            Err(e) => return Err(DeliveryError::network(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            tracing::trace!(room_id = %destination, txn_id = %txn_id, "Matrix accepted notice");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::from_status(
            status.as_u16(),
            error_message(&body),
        ))
    }
}

/// Plain-text fallback of an HTML message: the same text with tags removed.
pub fn plain_body(html: &str) -> String {
    HTML_TAG.replace_all(html, "").into_owned()
}

/// Human-readable summary of an error response body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<MatrixErrorBody>(body) {
        Ok(MatrixErrorBody {
            errcode,
            error: Some(error),
        }) => format!("{errcode}: {error}"),
        Ok(MatrixErrorBody { errcode, .. }) => errcode,
        Err(_) => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}
