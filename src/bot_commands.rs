//! Definition of Telegram bot commands and handlers.

use log::{debug, info, warn};
use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        UpdateHandler,
    },
    net::Download,
    prelude::*,
    types::{self as tg, Chat, KeyboardButton, KeyboardMarkup, ParseMode, User},
    utils::command::BotCommands,
};

use crate::{
    database::sqlite::SqliteDatabase,
    error::BotError,
    formatter::{
        format_cancel_answer, format_cleared_reviews, format_import_summary, format_join_answer,
        format_menu_prompt, format_review_saved, format_reviews, format_stats, format_upcoming,
        MENU_RANDOM_LABEL, MENU_STATS_LABEL, MENU_UPCOMING_LABEL,
    },
    lifecycle::EventLifecycle,
    notifier::{make_keyboard, TelegramNotifier},
    parser::{
        looks_like_date_time, parse_callback_data, parse_date_time, parse_event_id,
        parse_import_file, parse_menu_text, parse_review,
    },
    types::{CallbackAction, Keyboard, MenuAction, UserInfo},
    validator::validate_import_file_name,
};

#[derive(Clone, Default)]
pub enum State {
    #[default]
    Normal,
}

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "This bot picks a random restaurant for the group and keeps track of who goes \
                   and what they thought of it. Supported commands:"
)]
enum Command {
    #[command(description = "shows this message.")]
    Help,
    #[command(description = "shows the shortcuts to the most used commands.")]
    Menu,
    #[command(description = "pick a random restaurant for the next outing.")]
    Random,
    #[command(
        description = "/setreminder DD.MM.YYYY HH:MM sets the date of the outing once 3 people joined."
    )]
    SetReminder(String),
    #[command(description = "show the visited restaurants and the upcoming outings.")]
    Stats,
    #[command(description = "show the upcoming outings.")]
    Upcoming,
    #[command(description = "/reviews <id> shows the reviews of an outing; the ID is in /stats.")]
    Reviews(String),
    #[command(description = "cancel the current outing (admins only).")]
    CancelEvent,
    #[command(
        description = "/clearreviews <restaurant name> deletes the reviews of a restaurant (admins only)."
    )]
    ClearReviews(String),
}

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

// The dispatcher resolves dependencies by type, so the concrete lifecycle is named here.
type LifecycleInUse = EventLifecycle<SqliteDatabase, TelegramNotifier>;

pub fn dialogue_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler =
        teloxide::filter_command::<Command, _>().branch(case![State::Normal].endpoint(
            |msg: Message, bot: Bot, cmd: Command, lifecycle: LifecycleInUse| async move {
                let chat_id = msg.chat.id;
                let result = match cmd {
                    Command::Help => handle_help(&bot, chat_id).await,
                    Command::Menu => handle_menu(&bot, chat_id).await,
                    Command::Random => handle_random(chat_id, &lifecycle).await,
                    Command::SetReminder(s) => handle_set_reminder(&msg, &lifecycle, &s).await,
                    Command::Stats => handle_stats(&bot, chat_id, &lifecycle).await,
                    Command::Upcoming => handle_upcoming(&bot, chat_id, &lifecycle).await,
                    Command::Reviews(id) => handle_reviews(&bot, &msg, &lifecycle, &id).await,
                    Command::CancelEvent => handle_cancel_event(&bot, &msg, &lifecycle).await,
                    Command::ClearReviews(name) => {
                        handle_clear_reviews(&bot, &msg, &lifecycle, &name).await
                    }
                };
                reply_on_error(&bot, &msg, result).await
            },
        ));

    let document_handler = dptree::filter(|msg: Message| msg.document().is_some()).endpoint(
        |msg: Message, bot: Bot, lifecycle: LifecycleInUse| async move {
            let result = handle_document(&bot, &msg, &lifecycle).await;
            reply_on_error(&bot, &msg, result).await
        },
    );

    let review_handler = dptree::filter(|msg: Message| {
        msg.reply_to_message().is_some() && msg.text().is_some()
    })
    .endpoint(
        |msg: Message, bot: Bot, lifecycle: LifecycleInUse| async move {
            let result = handle_review_reply(&bot, &msg, &lifecycle).await;
            reply_on_error(&bot, &msg, result).await
        },
    );

    // A date sent on its own sets the time of the outing, like /setreminder.
    let date_handler = dptree::filter(|msg: Message| {
        msg.reply_to_message().is_none() && msg.text().map_or(false, looks_like_date_time)
    })
    .endpoint(
        |msg: Message, lifecycle: LifecycleInUse, bot: Bot| async move {
            let text = msg.text().unwrap_or_default().to_string();
            let result = handle_set_reminder(&msg, &lifecycle, &text).await;
            reply_on_error(&bot, &msg, result).await
        },
    );

    let menu_text_handler = dptree::filter_map(|msg: Message| {
        if msg.reply_to_message().is_some() {
            return None;
        }
        msg.text().and_then(parse_menu_text)
    })
    .endpoint(
        |msg: Message, bot: Bot, action: MenuAction, lifecycle: LifecycleInUse| async move {
            let result = run_menu_action(&bot, msg.chat.id, &lifecycle, action).await;
            reply_on_error(&bot, &msg, result).await
        },
    );

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(document_handler)
        .branch(review_handler)
        .branch(date_handler)
        .branch(menu_text_handler);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    dialogue::enter::<Update, InMemStorage<State>, State, _>()
        .branch(message_handler)
        .branch(callback_handler)
}

/// Tell the chat what went wrong, then hand the error to teloxide for logging.
async fn reply_on_error(bot: &Bot, msg: &Message, result: HandlerResult) -> HandlerResult {
    if let Err(e) = &result {
        bot.send_message(msg.chat.id, format!("{e}"))
            .await
            .map_err(|e| BotError::telegram("cannot send error message", e))?;
    }
    result
}

fn user_info(user: &User) -> UserInfo {
    UserInfo::new(
        user.id.0 as i64,
        user.username.clone(),
        Some(user.first_name.clone()),
    )
}

fn sender(msg: &Message) -> Result<UserInfo, BotError> {
    msg.from().map(user_info).ok_or_else(|| {
        BotError::new(
            format!("message {} has no sender", msg.id.0),
            "cannot tell who sent this message".to_string(),
        )
    })
}

/// Administrators and the creator of a group are privileged. In a private
/// chat the user is always privileged.
async fn is_admin(bot: &Bot, chat: &Chat, user: &User) -> Result<bool, BotError> {
    if chat.is_private() {
        return Ok(true);
    }
    let member = bot
        .get_chat_member(chat.id, user.id)
        .await
        .map_err(|e| BotError::telegram("cannot get chat member", e))?;
    Ok(member.kind.is_privileged())
}

async fn ensure_admin(bot: &Bot, msg: &Message) -> Result<(), BotError> {
    let user = msg.from().ok_or_else(|| {
        BotError::new(
            "admin check on a message without sender".to_string(),
            "only administrators can do this".to_string(),
        )
    })?;
    if is_admin(bot, &msg.chat, user).await? {
        Ok(())
    } else {
        Err(BotError::new(
            format!("user {} is not an administrator of chat {}", user.id.0, msg.chat.id.0),
            "only administrators can do this".to_string(),
        ))
    }
}

/// Show the commands in the client menu of every chat. Failing is not fatal,
/// the commands keep working without it.
pub async fn register_commands(bot: &Bot) -> Result<(), BotError> {
    bot.set_my_commands(Command::bot_commands())
        .await
        .map_err(|e| BotError::telegram("cannot set bot commands", e))?;
    Ok(())
}

async fn handle_help(bot: &Bot, chat_id: tg::ChatId) -> HandlerResult {
    bot.send_message(chat_id, Command::descriptions().to_string())
        .await
        .map_err(|e| BotError::telegram("cannot send help", e))?;
    Ok(())
}

/// Send the shortcuts twice: as a keyboard replacing the text box, whose
/// buttons send their label as text, and as buttons under a message.
async fn handle_menu(bot: &Bot, chat_id: tg::ChatId) -> HandlerResult {
    let shortcuts = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(MENU_RANDOM_LABEL)],
        vec![
            KeyboardButton::new(MENU_STATS_LABEL),
            KeyboardButton::new(MENU_UPCOMING_LABEL),
        ],
    ])
    .resize_keyboard(true);
    bot.send_message(chat_id, "Shortcuts are available under the text box.")
        .reply_markup(shortcuts)
        .await
        .map_err(|e| BotError::telegram("cannot send menu keyboard", e))?;

    bot.send_message(chat_id, format_menu_prompt())
        .parse_mode(ParseMode::MarkdownV2)
        .reply_markup(make_keyboard(Keyboard::Menu))
        .await
        .map_err(|e| BotError::telegram("cannot send menu", e))?;
    Ok(())
}

async fn run_menu_action(
    bot: &Bot,
    chat_id: tg::ChatId,
    lifecycle: &LifecycleInUse,
    action: MenuAction,
) -> HandlerResult {
    debug!("Menu action {action:?} in chat {}", chat_id.0);
    match action {
        MenuAction::Help => handle_help(bot, chat_id).await,
        MenuAction::Menu => handle_menu(bot, chat_id).await,
        MenuAction::Random => handle_random(chat_id, lifecycle).await,
        MenuAction::Stats => handle_stats(bot, chat_id, lifecycle).await,
        MenuAction::Upcoming => handle_upcoming(bot, chat_id, lifecycle).await,
    }
}

async fn handle_random(chat_id: tg::ChatId, lifecycle: &LifecycleInUse) -> HandlerResult {
    let card = lifecycle.pick_or_reject_new_event(chat_id.0).await?;
    debug!(
        "Picked restaurant {} for event {}",
        card.restaurant.id, card.event_id
    );
    Ok(())
}

async fn handle_set_reminder(
    msg: &Message,
    lifecycle: &LifecycleInUse,
    payload: &str,
) -> HandlerResult {
    let when = parse_date_time(payload, lifecycle.utc_offset())?;
    lifecycle.set_schedule_for_chat(msg.chat.id.0, when).await?;
    Ok(())
}

async fn handle_stats(bot: &Bot, chat_id: tg::ChatId, lifecycle: &LifecycleInUse) -> HandlerResult {
    let snapshot = lifecycle.stats_snapshot(chat_id.0).await?;

    bot.send_message(chat_id, format_stats(&snapshot, lifecycle.utc_offset()))
        .parse_mode(ParseMode::MarkdownV2)
        .await
        .map_err(|e| BotError::telegram("cannot send stats", e))?;
    Ok(())
}

async fn handle_upcoming(
    bot: &Bot,
    chat_id: tg::ChatId,
    lifecycle: &LifecycleInUse,
) -> HandlerResult {
    let upcoming = lifecycle.upcoming(chat_id.0).await?;

    bot.send_message(chat_id, format_upcoming(&upcoming, lifecycle.utc_offset()))
        .parse_mode(ParseMode::MarkdownV2)
        .await
        .map_err(|e| BotError::telegram("cannot send upcoming outings", e))?;
    Ok(())
}

async fn handle_reviews(
    bot: &Bot,
    msg: &Message,
    lifecycle: &LifecycleInUse,
    event_id: &str,
) -> HandlerResult {
    let event_id = parse_event_id(event_id)?;
    let (restaurant, reviews) = lifecycle.reviews_of(msg.chat.id.0, event_id).await?;

    bot.send_message(msg.chat.id, format_reviews(&restaurant, &reviews))
        .parse_mode(ParseMode::MarkdownV2)
        .await
        .map_err(|e| BotError::telegram("cannot send reviews", e))?;
    Ok(())
}

async fn handle_cancel_event(
    bot: &Bot,
    msg: &Message,
    lifecycle: &LifecycleInUse,
) -> HandlerResult {
    ensure_admin(bot, msg).await?;
    info!("Cancelling the current event of chat {}", msg.chat.id.0);
    lifecycle.cancel_latest_event(msg.chat.id.0).await?;
    Ok(())
}

async fn handle_clear_reviews(
    bot: &Bot,
    msg: &Message,
    lifecycle: &LifecycleInUse,
    restaurant_name: &str,
) -> HandlerResult {
    ensure_admin(bot, msg).await?;
    let deleted = lifecycle.clear_reviews(msg.chat.id.0, restaurant_name).await?;

    bot.send_message(msg.chat.id, format_cleared_reviews(restaurant_name.trim(), deleted))
        .parse_mode(ParseMode::MarkdownV2)
        .await
        .map_err(|e| BotError::telegram("cannot send cleared reviews", e))?;
    Ok(())
}

async fn handle_document(bot: &Bot, msg: &Message, lifecycle: &LifecycleInUse) -> HandlerResult {
    let document = match msg.document() {
        Some(document) => document,
        None => return Ok(()),
    };
    ensure_admin(bot, msg).await?;
    let format = validate_import_file_name(document.file_name.as_deref())?;

    let file = bot
        .get_file(&document.file.id)
        .await
        .map_err(|e| BotError::telegram("cannot get import file", e))?;
    let mut contents = Vec::new();
    bot.download_file(&file.path, &mut contents)
        .await
        .map_err(|e| BotError::import("cannot download import file", e.into()))?;

    let parsed = parse_import_file(&contents, format)?;
    if parsed.invalid > 0 {
        warn!(
            "Skipped {} restaurants without a name in the file uploaded to chat {}",
            parsed.invalid, msg.chat.id.0
        );
    }
    let summary = lifecycle.import_restaurants(&parsed.restaurants).await?;

    bot.send_message(msg.chat.id, format_import_summary(&summary))
        .parse_mode(ParseMode::MarkdownV2)
        .await
        .map_err(|e| BotError::telegram("cannot send import summary", e))?;
    Ok(())
}

/// Replies to the feedback prompt are reviews; any other reply is ignored.
async fn handle_review_reply(
    bot: &Bot,
    msg: &Message,
    lifecycle: &LifecycleInUse,
) -> HandlerResult {
    let (reply_to, text) = match (msg.reply_to_message(), msg.text()) {
        (Some(reply_to), Some(text)) => (reply_to, text),
        _ => return Ok(()),
    };
    let user = sender(msg)?;
    let (rating, review) = parse_review(text)?;

    let receipt = lifecycle
        .submit_review_reply(msg.chat.id.0, reply_to.id.0, &user, &review, rating)
        .await?;
    if let Some(receipt) = receipt {
        bot.send_message(msg.chat.id, format_review_saved(&receipt))
            .parse_mode(ParseMode::MarkdownV2)
            .reply_to_message_id(msg.id)
            .await
            .map_err(|e| BotError::telegram("cannot acknowledge review", e))?;
    }
    Ok(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    lifecycle: LifecycleInUse,
) -> HandlerResult {
    let action = q.data.as_deref().and_then(parse_callback_data);
    let answer = match action {
        Some(action) => run_callback_action(&bot, &q, &lifecycle, action).await,
        None => {
            debug!("Unknown callback data {:?}", q.data);
            Err("unknown action".into())
        }
    };

    let (text, show_alert) = match &answer {
        Ok(text) => (text.clone(), false),
        Err(e) => (e.to_string(), true),
    };
    let mut request = bot.answer_callback_query(q.id);
    if !text.is_empty() {
        request = request.text(text).show_alert(show_alert);
    }
    request
        .await
        .map_err(|e| BotError::telegram("cannot answer callback query", e))?;

    answer.map(|_| ())
}

async fn run_callback_action(
    bot: &Bot,
    q: &CallbackQuery,
    lifecycle: &LifecycleInUse,
    action: CallbackAction,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let user = user_info(&q.from);
    match action {
        CallbackAction::Join(event_id) => {
            let update = lifecycle.toggle_join(event_id, &user).await?;
            Ok(format_join_answer(update.joined, update.penalty))
        }
        CallbackAction::Cancel(event_id) => {
            let update = lifecycle.cancel_participation(event_id, user.id).await?;
            Ok(format_cancel_answer(update.penalty))
        }
        CallbackAction::Reset(event_id) => {
            let chat = callback_chat(q)?;
            if !is_admin(bot, chat, &q.from).await? {
                return Ok("Only administrators can reset the outing.".to_string());
            }
            info!("User {} reset event {event_id}", user.id);
            lifecycle.cancel_event(chat.id.0, event_id).await?;
            Ok("Outing reset.".to_string())
        }
        CallbackAction::Menu(action) => {
            let chat = callback_chat(q)?;
            run_menu_action(bot, chat.id, lifecycle, action).await?;
            Ok(String::new())
        }
    }
}

/// The chat of the message carrying the pressed button.
fn callback_chat(q: &CallbackQuery) -> Result<&Chat, BotError> {
    q.message.as_ref().map(|m| &m.chat).ok_or_else(|| {
        BotError::new(
            format!("callback query {} without a message", q.id),
            "this button is too old, use the commands instead".to_string(),
        )
    })
}
