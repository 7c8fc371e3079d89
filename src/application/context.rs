//! Per-dispatch context handed to route handlers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::domain::foundation::{
    session_topic, DomainError, Envelope, ErrorCode, MetadataItem, ValidationError,
    APPLICATION_JSON, METADATA_ADD, TEXT_PLAIN,
};
use crate::ports::Hub;

/// Binds the inbound envelope to the hub used for replies.
///
/// Replies are addressed to sessions: each recipient id `X` is published on
/// `s.X`. When no recipients are given the reply goes back to the sender.
#[derive(Clone)]
pub struct Context {
    hub: Arc<dyn Hub>,
    source: String,
    envelope: Envelope,
}

impl Context {
    pub fn new(hub: Arc<dyn Hub>, source: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            hub,
            source: source.into(),
            envelope,
        }
    }

    /// The inbound envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn event_type(&self) -> &str {
        &self.envelope.event_type
    }

    /// Session that sent the inbound envelope.
    pub fn sender_session_id(&self) -> Option<&str> {
        self.envelope.session_id()
    }

    /// Reads an extension attribute of the inbound envelope.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.envelope.extension(key)
    }

    /// Stores `key = value` in the sender's session metadata.
    ///
    /// The value shows up as an extension on every later envelope that
    /// session sends.
    pub async fn set(&self, key: &str, value: impl Into<JsonValue>) -> Result<(), DomainError> {
        let item = MetadataItem {
            key: key.to_string(),
            value: value.into(),
        };
        self.json(METADATA_ADD, &item, &[]).await
    }

    /// Decodes the inbound payload as JSON.
    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        self.envelope.data_as()
    }

    /// Publishes a reply with a raw payload.
    pub async fn write(
        &self,
        event_type: &str,
        content_type: &str,
        data: impl Into<Vec<u8>>,
        recipients: &[&str],
    ) -> Result<(), DomainError> {
        let mut reply = Envelope::new(event_type);
        let data = data.into();
        if !data.is_empty() {
            reply = reply.with_data(content_type, data);
        }
        self.response(reply, recipients).await
    }

    /// Publishes a reply whose payload is `value` encoded as JSON.
    pub async fn json<T: Serialize + ?Sized + Sync>(
        &self,
        event_type: &str,
        value: &T,
        recipients: &[&str],
    ) -> Result<(), DomainError> {
        let data = serde_json::to_vec(value)?;
        self.write(event_type, APPLICATION_JSON, data, recipients).await
    }

    /// Publishes a plain-text reply.
    pub async fn text(
        &self,
        event_type: &str,
        text: &str,
        recipients: &[&str],
    ) -> Result<(), DomainError> {
        self.write(event_type, TEXT_PLAIN, text.as_bytes(), recipients)
            .await
    }

    /// Publishes a prepared envelope to each recipient session.
    ///
    /// The envelope's source defaults to the router name.
    pub async fn response(
        &self,
        mut reply: Envelope,
        recipients: &[&str],
    ) -> Result<(), DomainError> {
        if reply.source.is_empty() {
            reply.source = self.source.clone();
        }
        reply.validate()?;

        if recipients.is_empty() {
            let sender = self.sender_session_id().ok_or_else(|| {
                DomainError::from(ValidationError::empty_field("sessionid"))
                    .with_detail("type", reply.event_type.clone())
            })?;
            return self.publish_to(sender, &reply).await;
        }

        for recipient in recipients {
            self.publish_to(recipient, &reply).await?;
        }
        Ok(())
    }

    async fn publish_to(&self, session_id: &str, reply: &Envelope) -> Result<(), DomainError> {
        if session_id.is_empty() {
            return Err(DomainError::new(
                ErrorCode::SessionNotFound,
                "Reply recipient is empty",
            ));
        }
        self.hub
            .publish(&session_topic(session_id), reply)
            .await
            .map_err(DomainError::from)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("source", &self.source)
            .field("envelope", &self.envelope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::hub::InMemoryHub;
    use serde::Deserialize;
    use serde_json::json;

    fn inbound(event_type: &str, sender: Option<&str>) -> Envelope {
        let mut envelope = Envelope::new(event_type).with_source("client");
        if let Some(sender) = sender {
            envelope.set_session_id(sender);
        }
        envelope
    }

    fn context(hub: &Arc<InMemoryHub>, envelope: Envelope) -> Context {
        Context::new(hub.clone(), "prelude", envelope)
    }

    #[tokio::test]
    async fn json_reply_defaults_to_sender() {
        let hub = Arc::new(InMemoryHub::new());
        let ctx = context(&hub, inbound("ping", Some("S1")));

        ctx.json("pong", &"ok", &[]).await.unwrap();

        let published = hub.published_to("s.S1");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "pong");
        assert_eq!(published[0].source, "prelude");
        assert_eq!(published[0].data, br#""ok""#);
    }

    #[tokio::test]
    async fn explicit_recipients_each_get_a_copy() {
        let hub = Arc::new(InMemoryHub::new());
        let ctx = context(&hub, inbound("broadcast", Some("S1")));

        ctx.text("notice", "hi", &["A", "B"]).await.unwrap();

        assert!(hub.published_to("s.S1").is_empty());
        assert_eq!(hub.published_to("s.A").len(), 1);
        assert_eq!(hub.published_to("s.B")[0].data, b"hi");
    }

    #[tokio::test]
    async fn reply_without_sender_fails() {
        let hub = Arc::new(InMemoryHub::new());
        let ctx = context(&hub, inbound("ping", None));

        let err = ctx.json("pong", &"ok", &[]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidEnvelope);
        assert_eq!(hub.published_count(), 0);
    }

    #[tokio::test]
    async fn empty_reply_type_fails() {
        let hub = Arc::new(InMemoryHub::new());
        let ctx = context(&hub, inbound("ping", Some("S1")));

        let err = ctx.write("", TEXT_PLAIN, "x", &[]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidEnvelope);
    }

    #[tokio::test]
    async fn set_publishes_metadata_item_to_sender() {
        let hub = Arc::new(InMemoryHub::new());
        let ctx = context(&hub, inbound("hello", Some("S2")));

        ctx.set("k", "v").await.unwrap();

        let published = hub.published_to("s.S2");
        assert_eq!(published[0].event_type, METADATA_ADD);
        let item: MetadataItem = published[0].data_as().unwrap();
        assert_eq!(item.key, "k");
        assert_eq!(item.value, json!("v"));
    }

    #[test]
    fn get_and_bind_json_read_inbound_envelope() {
        #[derive(Deserialize)]
        struct Hello {
            message: String,
        }

        let hub = Arc::new(InMemoryHub::new());
        let envelope = inbound("hello", Some("S3"))
            .with_json(&json!({"message": "hello world"}))
            .unwrap()
            .with_extension("token", "atoken");
        let ctx = context(&hub, envelope);

        assert_eq!(ctx.sender_session_id(), Some("S3"));
        assert_eq!(ctx.get("token"), Some(&json!("atoken")));
        assert_eq!(ctx.bind_json::<Hello>().unwrap().message, "hello world");
    }
}
