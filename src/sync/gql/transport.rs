//! GraphQL-over-HTTP transport.
//!
//! The three wire calls of the sync protocol, behind a trait so channel
//! tests mock the wire instead of standing up a server.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::ChannelError;
use crate::ChannelSide;
use crate::GqlChannelConfig;
use crate::PollResponse;
use crate::Result;
use crate::SyncEnvelope;
use crate::TouchChannelInput;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
    /// Registers or refreshes the remote-side channel record; returns the
    /// remote's channel id.
    async fn touch_channel(
        &self,
        input: TouchChannelInput,
    ) -> Result<String>;

    /// Fetches pending envelopes, simultaneously acknowledging our outbox
    /// state to the remote.
    async fn poll_sync_envelopes(
        &self,
        channel_id: &str,
        outbox_ack: u64,
        outbox_latest: u64,
    ) -> Result<PollResponse>;

    async fn push_sync_envelopes(
        &self,
        envelopes: Vec<SyncEnvelope>,
    ) -> Result<()>;
}

const POLL_SYNC_ENVELOPES_QUERY: &str = r#"
query PollSyncEnvelopes($channelId: String!, $outboxAck: Int!, $outboxLatest: Int!) {
  pollSyncEnvelopes(channelId: $channelId, outboxAck: $outboxAck, outboxLatest: $outboxLatest) {
    envelopes {
      type
      channelMeta {
        id
      }
      operations {
        operation {
          id
          index
          skip
          hash
          timestampUtcMs
          action {
            id
            type
            input
            scope
            timestampUtcMs
            context
          }
        }
        context {
          documentId
          documentType
          scope
          branch
          ordinal
        }
      }
      cursor {
        remoteName
        cursorOrdinal
        lastSyncedAtUtcMs
      }
      key
      dependsOn
    }
    ackOrdinal
  }
}
"#;

const PUSH_SYNC_ENVELOPES_MUTATION: &str = r#"
mutation PushSyncEnvelopes($envelopes: [SyncEnvelopeInput!]!) {
  pushSyncEnvelopes(envelopes: $envelopes)
}
"#;

const TOUCH_CHANNEL_MUTATION: &str = r#"
mutation TouchChannel($input: TouchChannelInput!) {
  touchChannel(input: $input)
}
"#;

pub struct GqlTransport {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl GqlTransport {
    pub fn new(config: &GqlChannelConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
        }
    }

    fn transport_err(
        side: ChannelSide,
        reason: impl std::fmt::Display,
    ) -> crate::Error {
        ChannelError::Transport {
            side,
            reason: reason.to_string(),
        }
        .into()
    }

    /// One GraphQL POST; returns the `data` payload or maps HTTP/GraphQL
    /// failures onto the channel error taxonomy.
    async fn execute(
        &self,
        side: ChannelSide,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::transport_err(side, e))?;

        if !response.status().is_success() {
            return Err(Self::transport_err(
                side,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChannelError::Protocol(format!("malformed response: {e}")))?;

        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            let text = errors.to_string();
            if text.contains("Channel not found") {
                return Err(ChannelError::NotFound(text).into());
            }
            return Err(ChannelError::Protocol(text).into());
        }

        body.get("data")
            .filter(|d| !d.is_null())
            .cloned()
            .ok_or_else(|| ChannelError::Protocol("response missing data field".to_string()).into())
    }
}

#[async_trait]
impl SyncTransport for GqlTransport {
    async fn touch_channel(
        &self,
        input: TouchChannelInput,
    ) -> Result<String> {
        debug!("touchChannel {} -> {}", input.id, self.url);
        let data = self
            .execute(
                ChannelSide::Outbox,
                TOUCH_CHANNEL_MUTATION,
                json!({ "input": input }),
            )
            .await?;

        match &data["touchChannel"] {
            serde_json::Value::String(id) => Ok(id.clone()),
            // servers that answer with a bare confirmation keep our id
            _ => Ok(input.id),
        }
    }

    async fn poll_sync_envelopes(
        &self,
        channel_id: &str,
        outbox_ack: u64,
        outbox_latest: u64,
    ) -> Result<PollResponse> {
        let data = self
            .execute(
                ChannelSide::Inbox,
                POLL_SYNC_ENVELOPES_QUERY,
                json!({
                    "channelId": channel_id,
                    "outboxAck": outbox_ack,
                    "outboxLatest": outbox_latest,
                }),
            )
            .await?;

        let response: PollResponse = serde_json::from_value(data["pollSyncEnvelopes"].clone())
            .map_err(|e| ChannelError::Protocol(format!("malformed poll payload: {e}")))?;

        Ok(PollResponse {
            envelopes: response
                .envelopes
                .into_iter()
                .map(SyncEnvelope::normalize)
                .collect(),
            ack_ordinal: response.ack_ordinal,
        })
    }

    async fn push_sync_envelopes(
        &self,
        envelopes: Vec<SyncEnvelope>,
    ) -> Result<()> {
        debug!("pushSyncEnvelopes x{} -> {}", envelopes.len(), self.url);
        self.execute(
            ChannelSide::Outbox,
            PUSH_SYNC_ENVELOPES_MUTATION,
            json!({ "envelopes": envelopes }),
        )
        .await
        .map(|_| ())
    }
}
