//! Durable storage of restaurants, events, participants and reviews.

use chrono::{DateTime, Utc};

use crate::{
    error::DatabaseError,
    types::{
        Amount, ChatId, EventId, ImportSummary, ImportedRestaurant, MessageId, Participant,
        Restaurant, RestaurantId, Review, ReviewOutcome, SavedEvent, ToggleOutcome, UpcomingEvent,
        UserId, UserInfo, VisitedEvent,
    },
};

type DatabaseResult<T> = Result<T, DatabaseError>;

pub mod sqlite;

/// This trait abstracts over the type of database.
///
/// Every method that mutates more than one row must do so atomically. Callers
/// additionally serialize all access behind a single lock, so a check followed
/// by a write inside one method never interleaves with another one.
pub trait Database {
    /// Save the given restaurants.
    ///
    /// Restaurants whose name and address are already present are skipped, not
    /// overwritten.
    fn import_restaurants(
        &mut self,
        restaurants: &[ImportedRestaurant],
    ) -> DatabaseResult<ImportSummary>;

    /// Get the total number of known restaurants.
    fn count_restaurants(&self) -> DatabaseResult<usize>;

    /// Get the restaurant with the given *restaurant_id*.
    fn get_restaurant(&self, restaurant_id: RestaurantId) -> DatabaseResult<Restaurant>;

    /// Pick a random restaurant that is still eligible in the given chat.
    ///
    /// A restaurant stops being eligible once an event of the chat that references
    /// it has collected reviews from at least *consumed_at* distinct users.
    fn pick_eligible_restaurant(
        &self,
        chat_id: ChatId,
        consumed_at: usize,
    ) -> DatabaseResult<Option<Restaurant>>;

    /// Create a new event for the chat and return its ID.
    fn create_event(
        &mut self,
        chat_id: ChatId,
        restaurant_id: RestaurantId,
        created_at: DateTime<Utc>,
    ) -> DatabaseResult<EventId>;

    /// Get the event with the given *event_id*.
    fn get_event(&self, event_id: EventId) -> DatabaseResult<SavedEvent>;

    /// Get the most recent event of the chat, if any.
    fn get_latest_event_for_chat(&self, chat_id: ChatId) -> DatabaseResult<Option<SavedEvent>>;

    /// Find the event whose feedback prompt is the message with the given ID.
    fn get_event_by_feedback_message(
        &self,
        chat_id: ChatId,
        feedback_message_id: MessageId,
    ) -> DatabaseResult<Option<SavedEvent>>;

    /// Record the ID of the message announcing the event.
    fn set_event_message(&mut self, event_id: EventId, message_id: MessageId)
        -> DatabaseResult<()>;

    /// Set the reminder time of the event and mark the reminder as not sent.
    fn set_reminder(&mut self, event_id: EventId, reminder_at: DateTime<Utc>)
        -> DatabaseResult<()>;

    fn mark_reminder_sent(&mut self, event_id: EventId) -> DatabaseResult<()>;

    fn mark_feedback_prompt_sent(
        &mut self,
        event_id: EventId,
        feedback_message_id: MessageId,
    ) -> DatabaseResult<()>;

    /// Delete the event together with its participants and reviews.
    ///
    /// Deleting an event that does not exist is a no-op.
    fn delete_event_with_relations(&mut self, event_id: EventId) -> DatabaseResult<()>;

    /// Events whose reminder time is not later than *now* and whose reminder was not sent.
    fn due_reminders(&self, now: DateTime<Utc>) -> DatabaseResult<Vec<SavedEvent>>;

    /// Events whose feedback time (reminder time plus *delay*) is not later than *now*
    /// and whose feedback prompt was not sent.
    fn due_feedback_prompts(
        &self,
        now: DateTime<Utc>,
        delay: chrono::Duration,
    ) -> DatabaseResult<Vec<SavedEvent>>;

    /// Events with a reminder time whose reminder was not sent yet.
    fn pending_reminders(&self) -> DatabaseResult<Vec<SavedEvent>>;

    /// Events with a reminder time whose feedback prompt was not sent yet.
    fn pending_feedback_prompts(&self) -> DatabaseResult<Vec<SavedEvent>>;

    /// Events whose feedback prompt was sent but that have fewer than *completed_at*
    /// distinct reviews.
    fn awaiting_reviews(&self, completed_at: usize) -> DatabaseResult<Vec<SavedEvent>>;

    /// Toggle the participation of a user, refreshing their display information.
    ///
    /// A join (new row, or an existing row flipping to joined) only happens when fewer
    /// than *capacity* participants have joined; otherwise nothing is written and
    /// `ToggleOutcome::CapacityExceeded` is returned.
    fn toggle_participation(
        &mut self,
        event_id: EventId,
        user: &UserInfo,
        capacity: usize,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ToggleOutcome>;

    /// Mark the participation of a user as cancelled with the given penalty.
    ///
    /// Returns false if the user has no participation row for the event.
    fn cancel_participation(
        &mut self,
        event_id: EventId,
        user_id: UserId,
        penalty: Amount,
    ) -> DatabaseResult<bool>;

    /// Get the joined participants, in order of joining.
    fn get_joined_participants(&self, event_id: EventId) -> DatabaseResult<Vec<Participant>>;

    fn count_joined_participants(&self, event_id: EventId) -> DatabaseResult<usize>;

    /// Get the joined participants that have not left a review yet.
    fn get_participants_without_review(
        &self,
        event_id: EventId,
    ) -> DatabaseResult<Vec<Participant>>;

    /// Get the penalty of the latest cancelled participation of the user with a
    /// positive penalty, across all events. Zero if there is none.
    fn get_user_penalty(&self, user_id: UserId) -> DatabaseResult<Amount>;

    /// Clear the penalty on all cancelled participations of the user.
    fn clear_user_penalty(&mut self, user_id: UserId) -> DatabaseResult<()>;

    /// Save a review, overwriting the previous one of the same user for the same event.
    ///
    /// Only joined participants can review: for anybody else nothing is written and
    /// `ReviewOutcome::NotAParticipant` is returned. Saving marks the participant as
    /// having left a review.
    fn save_review(
        &mut self,
        event_id: EventId,
        author: &UserInfo,
        text: &str,
        rating: Option<u8>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ReviewOutcome>;

    /// Delete the reviews of the chat's events whose restaurant has the given name,
    /// ignoring case, and let their participants review again.
    ///
    /// Returns the number of deleted reviews.
    fn clear_reviews_by_restaurant_name(
        &mut self,
        chat_id: ChatId,
        restaurant_name: &str,
    ) -> DatabaseResult<usize>;

    /// Count the distinct users that reviewed the event.
    fn count_distinct_reviews(&self, event_id: EventId) -> DatabaseResult<usize>;

    /// Get the reviews of the event, oldest first.
    fn get_reviews(&self, event_id: EventId) -> DatabaseResult<Vec<Review>>;

    /// Events of the chat with at least one review, newest first.
    fn get_visited_events(&self, chat_id: ChatId) -> DatabaseResult<Vec<VisitedEvent>>;

    /// Events of the chat with at least *capacity* joined participants and fewer than
    /// *capacity* distinct reviews, newest first.
    fn get_upcoming_events(
        &self,
        chat_id: ChatId,
        capacity: usize,
    ) -> DatabaseResult<Vec<UpcomingEvent>>;
}
