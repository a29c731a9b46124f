//! Session setup that has to happen outside the process before a ticket exists
//! (creating the channel the pair will talk in, and so on).

use async_trait::async_trait;
use thiserror::Error;

use waitline_core::{ChannelRef, PromotionHandoff};

#[derive(Debug, Error)]
#[error("session provisioning failed: {0}")]
pub struct ProvisionError(pub String);

#[async_trait]
pub trait SessionProvisioner: Send + Sync {
    /// Prepare a session for a popped queue head. On success the returned
    /// channel becomes the ticket's channel.
    async fn provision(&self, handoff: &PromotionHandoff) -> Result<ChannelRef, ProvisionError>;
}

/// Provisioner for running without a chat transport: the channel reference is
/// derived from the requester id and nothing external is touched.
pub struct LocalProvisioner;

#[async_trait]
impl SessionProvisioner for LocalProvisioner {
    async fn provision(&self, handoff: &PromotionHandoff) -> Result<ChannelRef, ProvisionError> {
        Ok(ChannelRef(format!(
            "session-{}-{}",
            handoff.region.as_str().to_ascii_lowercase(),
            handoff.requester_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waitline_core::{Region, UserId};

    #[tokio::test]
    async fn test_local_provisioner_derives_channel() {
        let handoff = PromotionHandoff {
            requester_id: UserId::from("u1"),
            reviewer_id: UserId::from("t1"),
            region: Region::Eu,
            preferred_target: "srv".to_string(),
        };
        let channel = LocalProvisioner.provision(&handoff).await.unwrap();
        assert_eq!(channel, ChannelRef::from("session-eu-u1"));
    }
}
