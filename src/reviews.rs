//! Collection of the reviews left after an outing.

use chrono::{DateTime, Utc};
use log::info;

use crate::{
    database::Database,
    error::EventError,
    ledger::{self, MAX_PARTICIPANTS},
    types::{EventId, Rating, Review, ReviewOutcome, UserInfo},
};

/// What happened to a review that was accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReviewReceipt {
    pub event_id: EventId,
    /// False when the review replaced an earlier one of the same user.
    pub created: bool,
    pub distinct_reviews: usize,
    /// True only for the review that made the event complete.
    pub just_completed: bool,
}

impl ReviewReceipt {
    pub fn is_completed(&self) -> bool {
        is_complete(self.distinct_reviews)
    }
}

pub fn is_complete(distinct_reviews: usize) -> bool {
    distinct_reviews >= MAX_PARTICIPANTS
}

/// Save the review of a joined participant and clear their penalty.
pub fn submit_review<D: Database>(
    database: &mut D,
    event_id: EventId,
    author: &UserInfo,
    text: &str,
    rating: Option<Rating>,
    now: DateTime<Utc>,
) -> Result<ReviewReceipt, EventError> {
    database.get_event(event_id)?;
    let previous_reviews = database.count_distinct_reviews(event_id)?;

    let created = match database.save_review(event_id, author, text, rating, now)? {
        ReviewOutcome::NotAParticipant => return Err(EventError::NotAParticipant),
        ReviewOutcome::Created => true,
        ReviewOutcome::Updated => false,
    };
    ledger::clear_penalty(database, author.id)?;

    let distinct_reviews = database.count_distinct_reviews(event_id)?;
    info!(
        "Review of user {} for event {event_id} saved ({distinct_reviews} distinct)",
        author.id
    );

    Ok(ReviewReceipt {
        event_id,
        created,
        distinct_reviews,
        just_completed: !is_complete(previous_reviews) && is_complete(distinct_reviews),
    })
}

/// Mean of the ratings that were given. Reviews without rating are ignored.
pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    let ratings: Vec<f64> = reviews
        .iter()
        .filter_map(|r| r.rating)
        .map(f64::from)
        .collect();
    if ratings.is_empty() {
        None
    } else {
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        database::sqlite::SqliteDatabase,
        ledger::{cancel, penalty_for, toggle_join, CANCELLATION_PENALTY},
        types::{ImportedRestaurant, UserId},
    };

    fn make_event_with_participants() -> anyhow::Result<(SqliteDatabase, EventId)> {
        let mut database = SqliteDatabase::in_memory()?;
        database.import_restaurants(&[ImportedRestaurant::new("Trattoria", "Via Roma 1")])?;
        let event_id = database.create_event(1, 1, Utc::now())?;
        for id in 1..=3 {
            toggle_join(&mut database, event_id, &user(id), Utc::now())?;
        }
        Ok((database, event_id))
    }

    fn user(id: UserId) -> UserInfo {
        UserInfo::new(id, Some(format!("user{id}")), None)
    }

    fn review(rating: Option<Rating>) -> Review {
        Review {
            id: 1,
            event_id: 1,
            user_id: 1,
            author: "@user1".to_string(),
            text: "text".to_string(),
            rating,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_average_rating() {
        assert_eq!(average_rating(&[]), None);
        assert_eq!(average_rating(&[review(None)]), None);

        let average = average_rating(&[review(Some(4)), review(None), review(Some(5))]);
        assert_relative_eq!(average.unwrap_or_default(), 4.5);

        let average = average_rating(&[review(Some(1)), review(Some(2)), review(Some(2))]);
        assert_relative_eq!(average.unwrap_or_default(), 5.0 / 3.0);
    }

    #[test]
    fn test_third_review_completes() -> anyhow::Result<()> {
        let (mut database, event_id) = make_event_with_participants()?;

        let receipt = submit_review(&mut database, event_id, &user(1), "good", Some(4), Utc::now())?;
        assert!(receipt.created);
        assert!(!receipt.is_completed());

        let receipt = submit_review(&mut database, event_id, &user(2), "fine", None, Utc::now())?;
        assert_eq!(receipt.distinct_reviews, 2);
        assert!(!receipt.just_completed);

        let receipt = submit_review(&mut database, event_id, &user(3), "bad", Some(1), Utc::now())?;
        assert!(receipt.just_completed);
        assert!(receipt.is_completed());

        // Editing a review after completion does not complete the event again.
        let receipt = submit_review(&mut database, event_id, &user(3), "meh", Some(2), Utc::now())?;
        assert!(!receipt.created);
        assert!(!receipt.just_completed);
        assert!(receipt.is_completed());
        Ok(())
    }

    #[test]
    fn test_non_participant_cannot_review() -> anyhow::Result<()> {
        let (mut database, event_id) = make_event_with_participants()?;

        let result = submit_review(&mut database, event_id, &user(9), "great", Some(5), Utc::now());
        assert!(matches!(result, Err(EventError::NotAParticipant)));
        assert_eq!(database.count_distinct_reviews(event_id)?, 0);
        Ok(())
    }

    #[test]
    fn test_review_clears_penalty_of_another_event() -> anyhow::Result<()> {
        let (mut database, event_id) = make_event_with_participants()?;
        cancel(&mut database, event_id, 1)?;
        assert_eq!(penalty_for(&database, 1)?, CANCELLATION_PENALTY);

        let other_event_id = database.create_event(2, 1, Utc::now())?;
        toggle_join(&mut database, other_event_id, &user(1), Utc::now())?;
        submit_review(&mut database, other_event_id, &user(1), "ok", None, Utc::now())?;

        assert_eq!(penalty_for(&database, 1)?, 0);
        Ok(())
    }
}
