use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{Result, UpdateError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const CLIENT_AGENT: &str = "xvc-updater";

/// Bearer session issued by the device's update endpoint.
///
/// Ephemeral: lives for one update run and is never persisted. There is no
/// renewal protocol; callers needing a fresh token perform a new handshake.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires: SystemTime,
}

/// Performs the handshake establishing a bearer token for update calls.
#[derive(Clone)]
pub struct SessionNegotiator {
    client: Client,
}

impl SessionNegotiator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Single handshake request against `http://{address}:{port}/handshake`.
    ///
    /// No internal retry; callers decide whether a failed handshake is worth
    /// repeating.
    pub async fn handshake(&self, address: &str, port: u16) -> Result<Session> {
        let url = format!("http://{address}:{port}/handshake");
        tracing::info!(%url, "attempting handshake with update endpoint");

        let response = self
            .client
            .get(&url)
            .timeout(HANDSHAKE_TIMEOUT)
            .header(USER_AGENT, CLIENT_AGENT)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        let session = parse_handshake(status, &body)?;
        if let Ok(remaining) = session.expires.duration_since(SystemTime::now()) {
            tracing::info!(
                token = %session.token,
                expires_in_secs = remaining.as_secs(),
                "handshake successful"
            );
        } else {
            tracing::warn!(token = %session.token, "handshake token is already expired");
        }
        Ok(session)
    }
}

#[derive(Deserialize)]
struct HandshakeBody {
    status: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expires: Option<i64>,
}

fn parse_handshake(status: StatusCode, body: &str) -> Result<Session> {
    if status != StatusCode::OK {
        return Err(UpdateError::Status {
            status,
            body: body.to_owned(),
        });
    }

    let parsed: HandshakeBody = serde_json::from_str(body)
        .map_err(|err| UpdateError::protocol(format!("invalid handshake response: {err}")))?;

    if parsed.status != "ready" {
        return Err(UpdateError::protocol(format!(
            "update endpoint not ready (status {:?})",
            parsed.status
        )));
    }

    let token = parsed
        .token
        .ok_or_else(|| UpdateError::protocol("handshake response missing token"))?;
    let expires = parsed
        .expires
        .and_then(|secs| u64::try_from(secs).ok())
        .ok_or_else(|| UpdateError::protocol("handshake response missing expires"))?;

    Ok(Session {
        token,
        expires: UNIX_EPOCH + Duration::from_secs(expires),
    })
}
