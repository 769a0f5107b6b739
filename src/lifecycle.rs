//! The life of an outing, from the pick of a restaurant to the last review.
//!
//! Every check followed by a write happens while holding the database lock.
//! Messages are sent after the lock is released; when sending fails the state
//! is kept and the failure is logged.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc::UnboundedReceiver, Mutex};

use crate::{
    database::Database,
    error::{DatabaseError, EventError, SchedulerError},
    formatter::{
        format_event_cancelled, format_event_card, format_event_completed,
        format_feedback_prompt, format_reminder, format_review_nag, format_review_nag_mention,
        format_schedule_confirmation, format_schedule_request,
    },
    ledger::{self, CANCELLATION_PENALTY, MAX_PARTICIPANTS},
    notifier::Notifier,
    reviews::{self, is_complete, ReviewReceipt},
    scheduler::{Firing, Scheduler, TaskKind},
    types::{
        Amount, ChatId, EventId, ImportSummary, ImportedRestaurant, Keyboard, MessageId,
        Participant, Rating, Restaurant, Review, SavedEvent, StatsSnapshot, UpcomingEvent,
        UserId, UserInfo,
    },
    validator::{validate_rating, validate_restaurant_name, validate_schedule},
};

/// Time between the reminder and the request for feedback.
pub const FEEDBACK_DELAY_HOURS: i64 = 3;

/// Time between the reminder and the first nag to the participants that did not review.
pub const REVIEW_NAG_DELAY_HOURS: i64 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventState {
    AwaitingParticipants { joined: usize },
    AwaitingSchedule,
    Scheduled { at: DateTime<Utc> },
    AwaitingFeedback { prompt_sent: bool },
    Completed,
    /// The event was deleted. Only returned by cancellations.
    Cancelled,
}

/// Result of a scheduled callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Delivered,
    /// Nothing to do: the event is gone or the message was already sent.
    Skipped,
    /// The message could not be sent. The task will be armed again at the next start.
    Failed,
    /// The task disarmed itself.
    Disarmed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventCard {
    pub event_id: EventId,
    pub restaurant: Restaurant,
    /// None if the card could not be posted.
    pub message_id: Option<MessageId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinUpdate {
    pub joined: bool,
    pub joined_count: usize,
    /// Outstanding penalty of the user, only reported when joining.
    pub penalty: Amount,
    /// True when this join filled the table and the group was asked for a date.
    pub schedule_requested: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardUpdate {
    pub joined_count: usize,
    pub penalty: Amount,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reminders: usize,
    pub feedback_prompts: usize,
    pub review_nags: usize,
    pub failures: usize,
}

struct CardData {
    event: SavedEvent,
    restaurant: Restaurant,
    participants: Vec<Participant>,
}

/// Compute the state of a stored event.
pub fn event_state<D: Database>(database: &D, event: &SavedEvent) -> Result<EventState, EventError> {
    if is_complete(database.count_distinct_reviews(event.id)?) {
        return Ok(EventState::Completed);
    }

    let state = match event.reminder_at {
        None => {
            let joined = database.count_joined_participants(event.id)?;
            if joined < MAX_PARTICIPANTS {
                EventState::AwaitingParticipants { joined }
            } else {
                EventState::AwaitingSchedule
            }
        }
        Some(at) if !event.reminder_sent => EventState::Scheduled { at },
        Some(_) => EventState::AwaitingFeedback {
            prompt_sent: event.feedback_prompt_sent,
        },
    };
    Ok(state)
}

pub fn feedback_at(reminder_at: DateTime<Utc>) -> DateTime<Utc> {
    reminder_at + Duration::hours(FEEDBACK_DELAY_HOURS)
}

pub fn first_review_nag_at(reminder_at: DateTime<Utc>) -> DateTime<Utc> {
    reminder_at + Duration::hours(REVIEW_NAG_DELAY_HOURS)
}

/// First time of the daily series starting at *first* that is not before *now*.
fn next_daily_occurrence(first: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if first >= now {
        return first;
    }
    let elapsed = now - first;
    let mut days = elapsed.num_days();
    if elapsed > Duration::days(days) {
        days += 1;
    }
    first + Duration::days(days)
}

pub struct EventLifecycle<D, N> {
    database: Arc<Mutex<D>>,
    notifier: Arc<N>,
    scheduler: Scheduler,
    utc_offset: FixedOffset,
}

impl<D, N> Clone for EventLifecycle<D, N> {
    fn clone(&self) -> Self {
        EventLifecycle {
            database: self.database.clone(),
            notifier: self.notifier.clone(),
            scheduler: self.scheduler.clone(),
            utc_offset: self.utc_offset,
        }
    }
}

impl<D, N> EventLifecycle<D, N>
where
    D: Database + Send + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        database: Arc<Mutex<D>>,
        notifier: Arc<N>,
        scheduler: Scheduler,
        utc_offset: FixedOffset,
    ) -> Self {
        EventLifecycle {
            database,
            notifier,
            scheduler,
            utc_offset,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Start a new outing in the chat with a random eligible restaurant.
    ///
    /// Refused while the latest outing of the chat is not completed. A completed
    /// outing is replaced by the new one.
    pub async fn pick_or_reject_new_event(&self, chat_id: ChatId) -> Result<EventCard, EventError> {
        let (event_id, restaurant) = {
            let mut database = self.database.lock().await;

            let latest = database.get_latest_event_for_chat(chat_id)?;
            if let Some(latest) = &latest {
                if event_state(&*database, latest)? != EventState::Completed {
                    return Err(EventError::EventInProgress);
                }
            }

            let restaurant = database
                .pick_eligible_restaurant(chat_id, MAX_PARTICIPANTS)?
                .ok_or(EventError::NoEligibleRestaurant)?;

            if let Some(latest) = latest {
                info!("Replacing completed event {} of chat {chat_id}", latest.id);
                database.delete_event_with_relations(latest.id)?;
                self.scheduler.disarm_event(latest.id);
            }

            let event_id = database.create_event(chat_id, restaurant.id, Utc::now())?;
            (event_id, restaurant)
        };
        info!(
            "Created event {event_id} in chat {chat_id} for restaurant {}",
            restaurant.id
        );

        let text = format_event_card(&restaurant, &[], None, self.utc_offset);
        let message_id = match self
            .notifier
            .send_message(chat_id, &text, Some(Keyboard::EventCard(event_id)))
            .await
        {
            Ok(message_id) => {
                self.database
                    .lock()
                    .await
                    .set_event_message(event_id, message_id)?;
                Some(message_id)
            }
            Err(e) => {
                warn!("Cannot post the card of event {event_id}: {e}");
                None
            }
        };

        Ok(EventCard {
            event_id,
            restaurant,
            message_id,
        })
    }

    /// Join the outing, or leave it if already joined.
    pub async fn toggle_join(
        &self,
        event_id: EventId,
        user: &UserInfo,
    ) -> Result<JoinUpdate, EventError> {
        let (update, card) = {
            let mut database = self.database.lock().await;
            let joined = ledger::toggle_join(&mut *database, event_id, user, Utc::now())?;
            let penalty = if joined {
                ledger::penalty_for(&*database, user.id)?
            } else {
                0
            };

            let card = load_card(&*database, event_id)?;
            let joined_count = card.participants.len();
            let update = JoinUpdate {
                joined,
                joined_count,
                penalty,
                schedule_requested: joined
                    && joined_count == MAX_PARTICIPANTS
                    && card.event.reminder_at.is_none(),
            };
            (update, card)
        };

        self.refresh_card(&card).await;
        if update.schedule_requested {
            info!("Event {event_id} is full, asking for a date");
            self.notify(card.event.chat_id, &format_schedule_request(&card.restaurant))
                .await;
        }
        Ok(update)
    }

    /// Withdraw from the outing, paying the cancellation penalty.
    pub async fn cancel_participation(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<CardUpdate, EventError> {
        let card = {
            let mut database = self.database.lock().await;
            ledger::cancel(&mut *database, event_id, user_id)?;
            load_card(&*database, event_id)?
        };

        self.refresh_card(&card).await;
        Ok(CardUpdate {
            joined_count: card.participants.len(),
            penalty: CANCELLATION_PENALTY,
        })
    }

    /// Fix the time of the outing and arm its notifications.
    ///
    /// Setting a new time replaces the notifications armed for the previous one.
    pub async fn set_schedule(
        &self,
        event_id: EventId,
        when: DateTime<Utc>,
    ) -> Result<EventState, EventError> {
        validate_schedule(when, Utc::now())?;

        let card = {
            let mut database = self.database.lock().await;
            let event = database.get_event(event_id)?;
            if event_state(&*database, &event)? == EventState::Completed {
                return Err(EventError::EventClosed);
            }
            let joined = database.count_joined_participants(event_id)?;
            if joined < MAX_PARTICIPANTS {
                return Err(EventError::invalid_schedule(format!(
                    "{MAX_PARTICIPANTS} participants are needed, {joined} joined so far"
                )));
            }

            database.set_reminder(event_id, when)?;
            self.arm_event_tasks(event_id, when)?;
            load_card(&*database, event_id)?
        };
        info!("Event {event_id} scheduled at {when}");

        self.refresh_card(&card).await;
        self.notify(
            card.event.chat_id,
            &format_schedule_confirmation(&card.restaurant, when, self.utc_offset),
        )
        .await;
        Ok(EventState::Scheduled { at: when })
    }

    /// Same as `set_schedule`, for the latest outing of the chat.
    pub async fn set_schedule_for_chat(
        &self,
        chat_id: ChatId,
        when: DateTime<Utc>,
    ) -> Result<EventState, EventError> {
        let event = self.latest_event(chat_id).await?;
        self.set_schedule(event.id, when).await
    }

    fn arm_event_tasks(&self, event_id: EventId, at: DateTime<Utc>) -> Result<(), EventError> {
        self.scheduler.arm_once(event_id, TaskKind::Reminder, at)?;
        self.scheduler
            .arm_once(event_id, TaskKind::Feedback, feedback_at(at))?;
        self.scheduler
            .arm_daily(event_id, TaskKind::DailyReviewNag, first_review_nag_at(at))?;
        Ok(())
    }

    /// Save the review of a participant. The third distinct review completes the outing.
    pub async fn submit_review(
        &self,
        event_id: EventId,
        user: &UserInfo,
        text: &str,
        rating: Option<Rating>,
    ) -> Result<ReviewReceipt, EventError> {
        if let Some(rating) = rating {
            validate_rating(rating)?;
        }

        let (receipt, completion) = {
            let mut database = self.database.lock().await;
            let receipt =
                reviews::submit_review(&mut *database, event_id, user, text, rating, Utc::now())?;

            let mut completion = None;
            if receipt.is_completed() {
                self.scheduler.disarm_event(event_id);
                if receipt.just_completed {
                    let event = database.get_event(event_id)?;
                    let restaurant = database.get_restaurant(event.restaurant_id)?;
                    let reviews = database.get_reviews(event_id)?;
                    completion = Some((event.chat_id, format_event_completed(&restaurant, &reviews)));
                }
            }
            (receipt, completion)
        };

        if let Some((chat_id, text)) = completion {
            info!("Event {event_id} completed");
            self.notify(chat_id, &text).await;
        }
        Ok(receipt)
    }

    /// Save a review sent as a reply to a message of the chat.
    ///
    /// Returns None if the message replied to is not a feedback prompt.
    pub async fn submit_review_reply(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        user: &UserInfo,
        text: &str,
        rating: Option<Rating>,
    ) -> Result<Option<ReviewReceipt>, EventError> {
        let event = self
            .database
            .lock()
            .await
            .get_event_by_feedback_message(chat_id, reply_to)?;

        match event {
            Some(event) => self
                .submit_review(event.id, user, text, rating)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    pub async fn stats_snapshot(&self, chat_id: ChatId) -> Result<StatsSnapshot, EventError> {
        let database = self.database.lock().await;
        let visited = database.get_visited_events(chat_id)?;
        let total_count = database.count_restaurants()?;
        let upcoming = database.get_upcoming_events(chat_id, MAX_PARTICIPANTS)?;

        Ok(StatsSnapshot {
            visited_count: visited.len(),
            total_count,
            visited,
            upcoming,
        })
    }

    pub async fn upcoming(&self, chat_id: ChatId) -> Result<Vec<UpcomingEvent>, EventError> {
        Ok(self
            .database
            .lock()
            .await
            .get_upcoming_events(chat_id, MAX_PARTICIPANTS)?)
    }

    /// Reviews of an outing of the chat.
    pub async fn reviews_of(
        &self,
        chat_id: ChatId,
        event_id: EventId,
    ) -> Result<(Restaurant, Vec<Review>), EventError> {
        let database = self.database.lock().await;
        let event = database.get_event(event_id)?;
        if event.chat_id != chat_id {
            return Err(EventError::NotFound(format!("event {event_id}")));
        }
        let restaurant = database.get_restaurant(event.restaurant_id)?;
        let reviews = database.get_reviews(event_id)?;
        Ok((restaurant, reviews))
    }

    pub async fn current_state(&self, event_id: EventId) -> Result<EventState, EventError> {
        let database = self.database.lock().await;
        let event = database.get_event(event_id)?;
        event_state(&*database, &event)
    }

    pub async fn import_restaurants(
        &self,
        restaurants: &[ImportedRestaurant],
    ) -> Result<ImportSummary, EventError> {
        let summary = self
            .database
            .lock()
            .await
            .import_restaurants(restaurants)?;
        info!(
            "Imported {} restaurants, {} already present",
            summary.inserted, summary.skipped
        );
        Ok(summary)
    }

    /// Delete the outing of the chat with everything attached to it.
    ///
    /// An outing of another chat is reported as not found and left untouched.
    pub async fn cancel_event(
        &self,
        chat_id: ChatId,
        event_id: EventId,
    ) -> Result<EventState, EventError> {
        let event = {
            let mut database = self.database.lock().await;
            let event = database.get_event(event_id)?;
            if event.chat_id != chat_id {
                return Err(EventError::NotFound(format!("event {event_id}")));
            }
            self.scheduler.disarm_event(event_id);
            database.delete_event_with_relations(event_id)?;
            event
        };
        info!("Event {event_id} of chat {} cancelled", event.chat_id);

        if let Some(message_id) = event.message_id {
            if let Err(e) = self.notifier.delete_message(event.chat_id, message_id).await {
                debug!("Cannot delete the card of event {event_id}: {e}");
            }
        }
        self.notify(event.chat_id, &format_event_cancelled()).await;
        Ok(EventState::Cancelled)
    }

    pub async fn cancel_latest_event(&self, chat_id: ChatId) -> Result<EventState, EventError> {
        let event = self.latest_event(chat_id).await?;
        self.cancel_event(chat_id, event.id).await
    }

    /// Delete the reviews left in the chat for the restaurant with the given name
    /// and return how many were deleted.
    ///
    /// The participants may review again. An outing that loses its reviews is no
    /// longer completed, so its restaurant becomes eligible again.
    pub async fn clear_reviews(
        &self,
        chat_id: ChatId,
        restaurant_name: &str,
    ) -> Result<usize, EventError> {
        let restaurant_name = validate_restaurant_name(restaurant_name)?;
        let deleted = self
            .database
            .lock()
            .await
            .clear_reviews_by_restaurant_name(chat_id, restaurant_name)?;
        info!("Deleted {deleted} reviews of '{restaurant_name}' in chat {chat_id}");
        Ok(deleted)
    }

    async fn latest_event(&self, chat_id: ChatId) -> Result<SavedEvent, EventError> {
        self.database
            .lock()
            .await
            .get_latest_event_for_chat(chat_id)?
            .ok_or(EventError::NoActiveEvent)
    }

    pub async fn on_reminder_due(&self, event_id: EventId) -> TaskOutcome {
        self.reminder_due(event_id)
            .await
            .unwrap_or_else(|e| log_task_error(TaskKind::Reminder, event_id, e))
    }

    async fn reminder_due(&self, event_id: EventId) -> Result<TaskOutcome, EventError> {
        let card = {
            let database = self.database.lock().await;
            let event = match find_event(&*database, event_id)? {
                Some(event) if !event.reminder_sent => event,
                _ => return Ok(TaskOutcome::Skipped),
            };
            if event_state(&*database, &event)? == EventState::Completed {
                return Ok(TaskOutcome::Skipped);
            }
            load_card_of(&*database, event)?
        };
        let at = match card.event.reminder_at {
            Some(at) => at,
            None => return Ok(TaskOutcome::Skipped),
        };

        let text = format_reminder(&card.restaurant, &card.participants, at, self.utc_offset);
        if let Err(e) = self.notifier.send_message(card.event.chat_id, &text, None).await {
            warn!("Cannot send the reminder of event {event_id}: {e}");
            return Ok(TaskOutcome::Failed);
        }

        let mut database = self.database.lock().await;
        // The outing may have been moved while the reminder was being sent.
        match find_event(&*database, event_id)? {
            Some(event) if event.reminder_at == Some(at) => {
                database.mark_reminder_sent(event_id)?;
                info!("Reminder of event {event_id} sent");
                Ok(TaskOutcome::Delivered)
            }
            _ => Ok(TaskOutcome::Skipped),
        }
    }

    pub async fn on_feedback_due(&self, event_id: EventId) -> TaskOutcome {
        self.feedback_due(event_id)
            .await
            .unwrap_or_else(|e| log_task_error(TaskKind::Feedback, event_id, e))
    }

    async fn feedback_due(&self, event_id: EventId) -> Result<TaskOutcome, EventError> {
        let (event, restaurant) = {
            let database = self.database.lock().await;
            let event = match find_event(&*database, event_id)? {
                Some(event) if !event.feedback_prompt_sent => event,
                _ => return Ok(TaskOutcome::Skipped),
            };
            if event_state(&*database, &event)? == EventState::Completed {
                return Ok(TaskOutcome::Skipped);
            }
            let restaurant = database.get_restaurant(event.restaurant_id)?;
            (event, restaurant)
        };

        let text = format_feedback_prompt(&restaurant);
        let message_id = match self.notifier.send_message(event.chat_id, &text, None).await {
            Ok(message_id) => message_id,
            Err(e) => {
                warn!("Cannot send the feedback prompt of event {event_id}: {e}");
                return Ok(TaskOutcome::Failed);
            }
        };

        self.database
            .lock()
            .await
            .mark_feedback_prompt_sent(event_id, message_id)?;
        info!("Feedback prompt of event {event_id} sent as message {message_id}");
        Ok(TaskOutcome::Delivered)
    }

    pub async fn on_daily_nag_due(&self, event_id: EventId) -> TaskOutcome {
        self.daily_nag_due(event_id)
            .await
            .unwrap_or_else(|e| log_task_error(TaskKind::DailyReviewNag, event_id, e))
    }

    async fn daily_nag_due(&self, event_id: EventId) -> Result<TaskOutcome, EventError> {
        let (event, restaurant, pending) = {
            let database = self.database.lock().await;
            let event = match find_event(&*database, event_id)? {
                Some(event) => event,
                None => return Ok(self.stop_nagging(event_id)),
            };
            if is_complete(database.count_distinct_reviews(event_id)?) {
                return Ok(self.stop_nagging(event_id));
            }
            let pending = database.get_participants_without_review(event_id)?;
            if pending.is_empty() {
                return Ok(self.stop_nagging(event_id));
            }
            let restaurant = database.get_restaurant(event.restaurant_id)?;
            (event, restaurant, pending)
        };

        let text = format_review_nag(&restaurant);
        for participant in &pending {
            let user = &participant.user;
            // The private chat with a user has the same ID as the user.
            if let Err(e) = self.notifier.send_message(user.id, &text, None).await {
                warn!(
                    "Cannot remind user {} privately, mentioning them in chat {}: {e}",
                    user.id, event.chat_id
                );
                self.notify(event.chat_id, &format_review_nag_mention(&restaurant, user))
                    .await;
            }
        }
        info!(
            "Reminded {} participants of event {event_id} to leave a review",
            pending.len()
        );
        Ok(TaskOutcome::Delivered)
    }

    fn stop_nagging(&self, event_id: EventId) -> TaskOutcome {
        info!("No reviews pending for event {event_id}, stopping reminders");
        self.scheduler.disarm(event_id, TaskKind::DailyReviewNag);
        TaskOutcome::Disarmed
    }

    /// Arm again the tasks of the stored events, after a restart.
    ///
    /// Times already in the past are moved to *now*. Reminders that were sent are
    /// never armed again, and completed outings get no tasks at all.
    pub async fn restore_scheduled_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport, EventError> {
        let (reminders, feedback_prompts, awaiting_reviews, missed) = {
            let database = self.database.lock().await;
            let open = |events: Vec<SavedEvent>| -> Result<Vec<SavedEvent>, EventError> {
                let mut kept = Vec::with_capacity(events.len());
                for event in events {
                    if event_state(&*database, &event)? != EventState::Completed {
                        kept.push(event);
                    }
                }
                Ok(kept)
            };
            let missed = open(database.due_reminders(now)?)?.len()
                + open(database.due_feedback_prompts(now, Duration::hours(FEEDBACK_DELAY_HOURS))?)?
                    .len();
            (
                open(database.pending_reminders()?)?,
                open(database.pending_feedback_prompts()?)?,
                database.awaiting_reviews(MAX_PARTICIPANTS)?,
                missed,
            )
        };
        if missed > 0 {
            warn!("{missed} notifications were due while the bot was offline, sending them now");
        }

        let mut report = RecoveryReport::default();

        for event in &reminders {
            if let Some(at) = event.reminder_at {
                let result = self
                    .scheduler
                    .arm_once(event.id, TaskKind::Reminder, at.max(now));
                tally(result, &mut report.reminders, &mut report.failures, event.id);
            }
        }

        for event in &feedback_prompts {
            if let Some(at) = event.reminder_at {
                let result = self
                    .scheduler
                    .arm_once(event.id, TaskKind::Feedback, feedback_at(at).max(now))
                    .and_then(|_| {
                        self.scheduler.arm_daily(
                            event.id,
                            TaskKind::DailyReviewNag,
                            first_review_nag_at(at).max(now),
                        )
                    });
                tally(
                    result,
                    &mut report.feedback_prompts,
                    &mut report.failures,
                    event.id,
                );
            }
        }

        for event in &awaiting_reviews {
            if let Some(at) = event.reminder_at {
                let result = self.scheduler.arm_daily(
                    event.id,
                    TaskKind::DailyReviewNag,
                    next_daily_occurrence(first_review_nag_at(at), now),
                );
                tally(result, &mut report.review_nags, &mut report.failures, event.id);
            }
        }

        info!(
            "Restored {} reminders, {} feedback prompts, {} review reminders ({} failures)",
            report.reminders, report.feedback_prompts, report.review_nags, report.failures
        );
        Ok(report)
    }

    /// Run the callbacks of the tasks, one at a time, as they fire.
    pub async fn run_task_loop(self, mut receiver: UnboundedReceiver<Firing>) {
        while let Some(firing) = receiver.recv().await {
            if !self.scheduler.claim(&firing) {
                debug!(
                    "Ignoring stale {} of event {}",
                    firing.kind, firing.event_id
                );
                continue;
            }

            let outcome = match firing.kind {
                TaskKind::Reminder => self.on_reminder_due(firing.event_id).await,
                TaskKind::Feedback => self.on_feedback_due(firing.event_id).await,
                TaskKind::DailyReviewNag => self.on_daily_nag_due(firing.event_id).await,
            };
            debug!(
                "{} of event {} finished: {outcome:?}",
                firing.kind, firing.event_id
            );
        }
        info!("Task loop terminated");
    }

    async fn refresh_card(&self, card: &CardData) {
        if let Some(message_id) = card.event.message_id {
            let text = format_event_card(
                &card.restaurant,
                &card.participants,
                card.event.reminder_at,
                self.utc_offset,
            );
            let result = self
                .notifier
                .edit_message(
                    card.event.chat_id,
                    message_id,
                    &text,
                    Some(Keyboard::EventCard(card.event.id)),
                )
                .await;
            if let Err(e) = result {
                warn!("Cannot update the card of event {}: {e}", card.event.id);
            }
        }
    }

    async fn notify(&self, chat_id: ChatId, text: &str) -> Option<MessageId> {
        match self.notifier.send_message(chat_id, text, None).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    }
}

fn find_event<D: Database>(database: &D, event_id: EventId) -> Result<Option<SavedEvent>, EventError> {
    match database.get_event(event_id) {
        Ok(event) => Ok(Some(event)),
        Err(DatabaseError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn load_card<D: Database>(database: &D, event_id: EventId) -> Result<CardData, EventError> {
    let event = database.get_event(event_id)?;
    load_card_of(database, event)
}

fn load_card_of<D: Database>(database: &D, event: SavedEvent) -> Result<CardData, EventError> {
    let restaurant = database.get_restaurant(event.restaurant_id)?;
    let participants = database.get_joined_participants(event.id)?;
    Ok(CardData {
        event,
        restaurant,
        participants,
    })
}

fn tally(
    result: Result<(), SchedulerError>,
    counter: &mut usize,
    failures: &mut usize,
    event_id: EventId,
) {
    match result {
        Ok(()) => *counter += 1,
        Err(e) => {
            error!("Cannot restore the tasks of event {event_id}: {e}");
            *failures += 1;
        }
    }
}

fn log_task_error(kind: TaskKind, event_id: EventId, e: EventError) -> TaskOutcome {
    error!("The {kind} of event {event_id} failed: {e:?}");
    TaskOutcome::Failed
}
