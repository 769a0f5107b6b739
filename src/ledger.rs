//! Seats and penalties of the participants of an event.
//!
//! All functions take the already locked database: checks and writes of one
//! call are never interleaved with another call.

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::{
    database::Database,
    error::EventError,
    types::{Amount, EventId, ToggleOutcome, UserId, UserInfo},
};

/// Seats available at each outing.
pub const MAX_PARTICIPANTS: usize = 3;

/// What a participant owes after cancelling explicitly.
pub const CANCELLATION_PENALTY: Amount = 500;

/// Flip the participation of the user and return whether they are now joined.
///
/// Leaving is always possible, joining only while a seat is free.
pub fn toggle_join<D: Database>(
    database: &mut D,
    event_id: EventId,
    user: &UserInfo,
    now: DateTime<Utc>,
) -> Result<bool, EventError> {
    database.get_event(event_id)?;
    if database.count_distinct_reviews(event_id)? >= MAX_PARTICIPANTS {
        return Err(EventError::EventClosed);
    }

    match database.toggle_participation(event_id, user, MAX_PARTICIPANTS, now)? {
        ToggleOutcome::Joined => {
            debug!("User {} joined event {event_id}", user.id);
            Ok(true)
        }
        ToggleOutcome::Left => {
            debug!("User {} left event {event_id}", user.id);
            Ok(false)
        }
        ToggleOutcome::CapacityExceeded => Err(EventError::CapacityExceeded),
    }
}

/// Cancel the participation of the user, recording the penalty.
pub fn cancel<D: Database>(
    database: &mut D,
    event_id: EventId,
    user_id: UserId,
) -> Result<(), EventError> {
    database.get_event(event_id)?;
    if !database.cancel_participation(event_id, user_id, CANCELLATION_PENALTY)? {
        return Err(EventError::NotAParticipant);
    }
    info!("User {user_id} cancelled event {event_id} with a penalty of {CANCELLATION_PENALTY}");
    Ok(())
}

pub fn penalty_for<D: Database>(database: &D, user_id: UserId) -> Result<Amount, EventError> {
    Ok(database.get_user_penalty(user_id)?)
}

pub fn clear_penalty<D: Database>(database: &mut D, user_id: UserId) -> Result<(), EventError> {
    Ok(database.clear_user_penalty(user_id)?)
}
