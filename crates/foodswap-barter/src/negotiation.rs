//! Negotiation threads: one chat per (item, offerer, owner) triple.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use foodswap_shared::constants::MAX_MESSAGE_CHARS;
use foodswap_shared::{ChatId, ChatStatus, ItemId, ItemStatus, MessageId, Page, StatusFilter, UserId};
use foodswap_store::{BarterChat, BarterMessage, ChatRole, Database};

use crate::catalog::ItemView;
use crate::coordinator::{load_transaction_view, TransactionView};
use crate::error::{BarterError, Entity, OrNotFound, Result};
use crate::service::BarterService;

/// A chat as listed for one participant.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: BarterChat,
    pub item_name: String,
    pub counterpart_id: UserId,
    pub counterpart_name: Option<String>,
    /// Messages from the counterpart the caller has not read.
    pub unread_count: i64,
    pub last_message: Option<BarterMessage>,
}

/// Everything a participant sees when opening a chat.
#[derive(Debug, Clone, Serialize)]
pub struct ChatDetail {
    #[serde(flatten)]
    pub chat: BarterChat,
    pub role: ChatRole,
    pub item: ItemView,
    pub owner_name: Option<String>,
    pub offerer_name: Option<String>,
    pub unread_count: i64,
    pub last_message: Option<BarterMessage>,
    pub transaction: Option<TransactionView>,
}

fn check_content(content: &str) -> Result<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(BarterError::validation("message must not be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(BarterError::validation(format!(
            "message longer than {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(content.to_string())
}

/// Load a chat and the caller's role in it.
pub(crate) fn participant_chat(
    db: &Database,
    chat_id: ChatId,
    user_id: UserId,
) -> Result<(BarterChat, ChatRole)> {
    let chat = db.get_chat(chat_id).or_not_found(Entity::Chat)?;
    let role = chat.role_of(user_id).ok_or(BarterError::Unauthorized)?;
    Ok((chat, role))
}

impl BarterService {
    /// Open, or return the existing, chat between `from_user` and the owner
    /// of `item_id`. `message` becomes the first message of a new chat.
    pub async fn express_interest(
        &self,
        item_id: ItemId,
        from_user: UserId,
        message: &str,
    ) -> Result<BarterChat> {
        let content = check_content(message)?;

        let (chat, created) = self.with(|db| {
            let item = db.get_item(item_id).or_not_found(Entity::Item)?;
            if item.owner_id == from_user {
                return Err(BarterError::SelfTransaction);
            }
            if let Some(existing) = db.find_chat(item_id, from_user, item.owner_id)? {
                return Ok((existing, false));
            }
            if item.status != ItemStatus::Available {
                return Err(BarterError::InvalidStatus(format!(
                    "item is {}",
                    item.status
                )));
            }

            let now = Utc::now();
            let chat = BarterChat {
                id: ChatId::new(),
                item_id,
                offerer_id: from_user,
                owner_id: item.owner_id,
                status: ChatStatus::Active,
                last_message_at: now,
                created_at: now,
            };
            let first = BarterMessage {
                id: MessageId::new(),
                chat_id: chat.id,
                sender_id: from_user,
                content,
                is_read: false,
                created_at: now,
            };
            Ok(db.open_chat(&chat, &first)?)
        })?;

        if created {
            info!(chat_id = %chat.id, item_id = %item_id, offerer_id = %from_user, "Chat opened");
        } else {
            debug!(chat_id = %chat.id, "Reusing existing chat");
        }
        Ok(chat)
    }

    pub async fn send_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<BarterMessage> {
        let content = check_content(content)?;

        self.with(|db| {
            let (chat, _) = participant_chat(db, chat_id, sender_id)?;
            if chat.status != ChatStatus::Active {
                return Err(BarterError::InvalidStatus(format!("chat is {}", chat.status)));
            }

            let message = BarterMessage {
                id: MessageId::new(),
                chat_id,
                sender_id,
                content,
                is_read: false,
                created_at: Utc::now(),
            };
            db.append_message(&message)?;
            debug!(chat_id = %chat_id, message_id = %message.id, "Message sent");
            Ok(message)
        })
    }

    /// The caller's chats, most recent activity first, plus the total count.
    pub async fn list_user_chats(
        &self,
        user_id: UserId,
        filter: StatusFilter<ChatStatus>,
        page: Page,
    ) -> Result<(Vec<ChatSummary>, i64)> {
        let (rows, total) = self.with(|db| {
            let (chats, total) =
                db.list_user_chats(user_id, filter.status(), page.limit, page.offset())?;
            let mut rows = Vec::with_capacity(chats.len());
            for chat in chats {
                let item_name = db.get_item(chat.item_id)?.name;
                let unread = db.unread_count(chat.id, user_id)?;
                let last = db.last_message(chat.id)?;
                rows.push((chat, item_name, unread, last));
            }
            Ok((rows, total))
        })?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (chat, item_name, unread_count, last_message) in rows {
            let counterpart_id = chat.other_participant(user_id);
            let counterpart_name = self.profile(counterpart_id).await.map(|p| p.display_name);
            summaries.push(ChatSummary {
                chat,
                item_name,
                counterpart_id,
                counterpart_name,
                unread_count,
                last_message,
            });
        }
        Ok((summaries, total))
    }

    /// Full view of a chat for one of its participants.
    pub async fn get_chat(&self, chat_id: ChatId, viewer_id: UserId) -> Result<ChatDetail> {
        let (chat, role, item, unread_count, last_message, transaction) = self.with(|db| {
            let (chat, role) = participant_chat(db, chat_id, viewer_id)?;
            let item = db.get_item(chat.item_id).or_not_found(Entity::Item)?;
            let unread = db.unread_count(chat_id, viewer_id)?;
            let last = db.last_message(chat_id)?;
            let transaction = match db.transaction_for_chat(chat_id)? {
                Some(t) => Some(load_transaction_view(db, t)?),
                None => None,
            };
            Ok((chat, role, item, unread, last, transaction))
        })?;

        let owner = self.profile(chat.owner_id).await;
        let offerer_name = self.profile(chat.offerer_id).await.map(|p| p.display_name);
        let item = self.view_with_owner(item, owner.as_ref(), None);

        Ok(ChatDetail {
            owner_name: owner.map(|p| p.display_name),
            offerer_name,
            role,
            item,
            unread_count,
            last_message,
            transaction,
            chat,
        })
    }

    /// Message history, oldest first, plus the total count.
    pub async fn list_messages(
        &self,
        chat_id: ChatId,
        viewer_id: UserId,
        page: Page,
    ) -> Result<(Vec<BarterMessage>, i64)> {
        self.with(|db| {
            participant_chat(db, chat_id, viewer_id)?;
            Ok(db.list_messages(chat_id, page.limit, page.offset())?)
        })
    }

    /// Mark the counterpart's messages as read. Returns how many flipped.
    pub async fn mark_read(&self, chat_id: ChatId, viewer_id: UserId) -> Result<usize> {
        self.with(|db| {
            participant_chat(db, chat_id, viewer_id)?;
            Ok(db.mark_read(chat_id, viewer_id)?)
        })
    }

    /// Cancel an active chat and any pending transaction on it.
    pub async fn cancel_chat(&self, chat_id: ChatId, user_id: UserId) -> Result<BarterChat> {
        let chat = self.with(|db| {
            let (chat, _) = participant_chat(db, chat_id, user_id)?;
            if chat.status != ChatStatus::Active {
                return Err(BarterError::InvalidStatus(format!("chat is {}", chat.status)));
            }
            db.cancel_chat(chat_id, Utc::now())?;
            Ok(db.get_chat(chat_id)?)
        })?;

        info!(chat_id = %chat_id, cancelled_by = %user_id, "Chat cancelled");
        Ok(chat)
    }
}
