use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{ChatMemberKind, ChatMemberUpdated},
};
use tracing::warn;

use otp_relay_core::domain::ChatId;

use crate::router::AppState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Membership {
    Joined,
    Left,
}

/// Restricted and owner states leave the subscription untouched.
fn membership_of(kind: &ChatMemberKind) -> Option<Membership> {
    match kind {
        ChatMemberKind::Member { .. } | ChatMemberKind::Administrator { .. } => {
            Some(Membership::Joined)
        }
        ChatMemberKind::Left { .. } | ChatMemberKind::Banned { .. } => Some(Membership::Left),
        _ => None,
    }
}

/// Track the bot being added to or removed from groups.
pub(super) async fn handle_my_chat_member(
    update: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let chat = &update.chat;
    if !(chat.is_group() || chat.is_supergroup()) {
        return Ok(());
    }
    if let Some(change) = membership_of(&update.new_chat_member.kind) {
        apply_membership(
            &state,
            ChatId(chat.id.0),
            chat.title().map(str::to_string),
            change,
        )
        .await;
    }
    Ok(())
}

async fn apply_membership(
    state: &AppState,
    chat_id: ChatId,
    title: Option<String>,
    change: Membership,
) {
    let res = match change {
        Membership::Joined => state.subscribers.add_group(chat_id, title).await,
        Membership::Left => state.subscribers.remove_group(chat_id).await,
    };
    if let Err(e) = res {
        warn!(
            category = "SUBSCRIBERS",
            chat_id = chat_id.0,
            change = ?change,
            error = %e,
            "membership update not saved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{harness, ADMIN};

    #[tokio::test]
    async fn joining_and_leaving_toggle_the_group() {
        let h = harness(Some(ADMIN));
        apply_membership(&h.state, ChatId(-300), Some("G".into()), Membership::Joined).await;
        apply_membership(&h.state, ChatId(-300), Some("G".into()), Membership::Joined).await;
        assert_eq!(h.state.subscribers.stats().await.groups, 1);

        apply_membership(&h.state, ChatId(-300), None, Membership::Left).await;
        assert_eq!(h.state.subscribers.stats().await.groups, 0);
    }
}
