//! Durable list of chats that receive OTP notifications.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    domain::ChatId,
    persist::{load_json_or_default, JsonFileWriter},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSubscriber {
    pub chat_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub joined_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSubscriber {
    pub chat_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub joined_at: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberList {
    #[serde(default)]
    pub users: Vec<UserSubscriber>,
    #[serde(default)]
    pub groups: Vec<GroupSubscriber>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    pub users: usize,
    pub groups: usize,
    pub total: usize,
}

/// Read side used by the notifier to enumerate destinations.
#[async_trait::async_trait]
pub trait Destinations: Send + Sync {
    async fn all_chat_ids(&self) -> Vec<ChatId>;
}

pub struct SubscriberRepository {
    list: RwLock<SubscriberList>,
    writer: JsonFileWriter,
}

impl SubscriberRepository {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let list: SubscriberList = load_json_or_default(&path, "subscribers");
        info!(
            category = "SUBSCRIBERS",
            users = list.users.len(),
            groups = list.groups.len(),
            "subscribers loaded"
        );
        Self {
            list: RwLock::new(list),
            writer: JsonFileWriter::spawn(path),
        }
    }

    pub async fn snapshot(&self) -> SubscriberList {
        self.list.read().await.clone()
    }

    /// Returns `false` if the group was already subscribed.
    pub async fn add_group(&self, chat_id: ChatId, title: Option<String>) -> Result<bool> {
        let mut list = self.list.write().await;
        if list.groups.iter().any(|g| g.chat_id == chat_id.0) {
            return Ok(false);
        }
        info!(
            category = "SUBSCRIBERS",
            chat_id = chat_id.0,
            title = title.as_deref().unwrap_or(""),
            "group subscribed"
        );
        list.groups.push(GroupSubscriber {
            chat_id: chat_id.0,
            title,
            joined_at: Some(Utc::now().to_rfc3339()),
        });
        self.writer.write(&*list).await?;
        Ok(true)
    }

    /// Returns `false` if the group was not subscribed.
    pub async fn remove_group(&self, chat_id: ChatId) -> Result<bool> {
        let mut list = self.list.write().await;
        let before = list.groups.len();
        list.groups.retain(|g| g.chat_id != chat_id.0);
        if list.groups.len() == before {
            return Ok(false);
        }
        self.writer.write(&*list).await?;
        info!(category = "SUBSCRIBERS", chat_id = chat_id.0, "group removed");
        Ok(true)
    }

    pub async fn stats(&self) -> SubscriberStats {
        let list = self.list.read().await;
        SubscriberStats {
            users: list.users.len(),
            groups: list.groups.len(),
            total: list.users.len() + list.groups.len(),
        }
    }
}

#[async_trait::async_trait]
impl Destinations for SubscriberRepository {
    /// Users first, then groups.
    async fn all_chat_ids(&self) -> Vec<ChatId> {
        let list = self.list.read().await;
        list.users
            .iter()
            .map(|u| ChatId(u.chat_id))
            .chain(list.groups.iter().map(|g| ChatId(g.chat_id)))
            .collect()
    }
}
