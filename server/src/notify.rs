use chat_protocol::{Message, UserProfile};
use tracing::info;

/// Hook invoked for each recipient that was offline when a message was sent.
pub trait OfflineNotifier: Send + Sync {
    fn notify(&self, recipient: &UserProfile, message: &Message) -> anyhow::Result<()>;
}

/// Default notifier: records the would-be push notification in the log.
#[derive(Clone, Default)]
pub struct LogNotifier;

impl OfflineNotifier for LogNotifier {
    fn notify(&self, recipient: &UserProfile, message: &Message) -> anyhow::Result<()> {
        info!(
            recipient = %recipient.id,
            recipient_name = %recipient.name,
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            "would notify offline user"
        );
        Ok(())
    }
}
