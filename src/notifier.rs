//! Outbound messages.

use async_trait::async_trait;
use log::debug;
use teloxide::{
    prelude::*,
    types::{self as tg, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
};

use crate::{
    error::NotifyError,
    formatter::{
        format_callback_data, MENU_RANDOM_LABEL, MENU_STATS_LABEL, MENU_UPCOMING_LABEL,
    },
    types::{CallbackAction, ChatId, Keyboard, MenuAction, MessageId},
};

/// Narrow interface used by the event lifecycle to talk to the chat.
///
/// Texts are MarkdownV2. Failures are reported to the caller, which decides
/// whether there is a fallback.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message and return its ID.
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId, NotifyError>;

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), NotifyError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId)
        -> Result<(), NotifyError>;
}

pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> TelegramNotifier {
        TelegramNotifier { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId, NotifyError> {
        let mut request = self
            .bot
            .send_message(tg::ChatId(chat_id), text)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(make_keyboard(keyboard));
        }

        let message = request
            .await
            .map_err(|e| NotifyError::telegram(chat_id, e))?;
        debug!("Sent message {} to chat {chat_id}", message.id.0);
        Ok(message.id.0)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), NotifyError> {
        let mut request = self
            .bot
            .edit_message_text(tg::ChatId(chat_id), tg::MessageId(message_id), text)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(make_keyboard(keyboard));
        }

        request
            .await
            .map_err(|e| NotifyError::telegram(chat_id, e))?;
        Ok(())
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), NotifyError> {
        self.bot
            .delete_message(tg::ChatId(chat_id), tg::MessageId(message_id))
            .await
            .map_err(|e| NotifyError::telegram(chat_id, e))?;
        Ok(())
    }
}

pub fn make_keyboard(keyboard: Keyboard) -> InlineKeyboardMarkup {
    match keyboard {
        Keyboard::EventCard(event_id) => InlineKeyboardMarkup::new(vec![
            vec![
                InlineKeyboardButton::callback(
                    "✅ I'm in / I'm out",
                    format_callback_data(CallbackAction::Join(event_id)),
                ),
                InlineKeyboardButton::callback(
                    "❌ Cancel (penalty)",
                    format_callback_data(CallbackAction::Cancel(event_id)),
                ),
            ],
            vec![InlineKeyboardButton::callback(
                "🔄 Reset (admins)",
                format_callback_data(CallbackAction::Reset(event_id)),
            )],
        ]),
        Keyboard::Menu => InlineKeyboardMarkup::new(vec![
            vec![InlineKeyboardButton::callback(
                MENU_RANDOM_LABEL,
                format_callback_data(CallbackAction::Menu(MenuAction::Random)),
            )],
            vec![
                InlineKeyboardButton::callback(
                    MENU_STATS_LABEL,
                    format_callback_data(CallbackAction::Menu(MenuAction::Stats)),
                ),
                InlineKeyboardButton::callback(
                    MENU_UPCOMING_LABEL,
                    format_callback_data(CallbackAction::Menu(MenuAction::Upcoming)),
                ),
            ],
        ]),
    }
}

#[cfg(test)]
pub mod testing {
    //! A notifier that records everything instead of talking to Telegram.

    use std::{collections::HashSet, sync::Mutex};

    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SentMessage {
        pub chat_id: ChatId,
        pub message_id: MessageId,
        pub text: String,
        pub keyboard: Option<Keyboard>,
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<SentMessage>>,
        edited: Mutex<Vec<SentMessage>>,
        deleted: Mutex<Vec<(ChatId, MessageId)>>,
        unreachable: Mutex<HashSet<ChatId>>,
    }

    impl RecordingNotifier {
        /// Every message to this chat will fail, like a user that never
        /// started a private conversation with the bot.
        pub fn make_unreachable(&self, chat_id: ChatId) {
            self.unreachable.lock().unwrap().insert(chat_id);
        }

        pub fn sent(&self) -> Vec<SentMessage> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_to(&self, chat_id: ChatId) -> Vec<SentMessage> {
            self.sent()
                .into_iter()
                .filter(|m| m.chat_id == chat_id)
                .collect()
        }

        pub fn edited(&self) -> Vec<SentMessage> {
            self.edited.lock().unwrap().clone()
        }

        pub fn deleted(&self) -> Vec<(ChatId, MessageId)> {
            self.deleted.lock().unwrap().clone()
        }

        fn check_reachable(&self, chat_id: ChatId) -> Result<(), NotifyError> {
            if self.unreachable.lock().unwrap().contains(&chat_id) {
                Err(NotifyError {
                    chat_id,
                    reason: "bot was blocked by the user".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_message(
            &self,
            chat_id: ChatId,
            text: &str,
            keyboard: Option<Keyboard>,
        ) -> Result<MessageId, NotifyError> {
            self.check_reachable(chat_id)?;
            let mut sent = self.sent.lock().unwrap();
            let message_id = sent.len() as MessageId + 100;
            sent.push(SentMessage {
                chat_id,
                message_id,
                text: text.to_string(),
                keyboard,
            });
            Ok(message_id)
        }

        async fn edit_message(
            &self,
            chat_id: ChatId,
            message_id: MessageId,
            text: &str,
            keyboard: Option<Keyboard>,
        ) -> Result<(), NotifyError> {
            self.check_reachable(chat_id)?;
            self.edited.lock().unwrap().push(SentMessage {
                chat_id,
                message_id,
                text: text.to_string(),
                keyboard,
            });
            Ok(())
        }

        async fn delete_message(
            &self,
            chat_id: ChatId,
            message_id: MessageId,
        ) -> Result<(), NotifyError> {
            self.check_reachable(chat_id)?;
            self.deleted.lock().unwrap().push((chat_id, message_id));
            Ok(())
        }
    }
}
