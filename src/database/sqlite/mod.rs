//! The implementation of a data storage using Sqlite.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task::block_in_place;

use crate::{
    error::DatabaseError,
    types::{
        Amount, ChatId, EventId, ImportSummary, ImportedRestaurant, MessageId, Participant,
        Restaurant, RestaurantId, Review, ReviewOutcome, SavedEvent, ToggleOutcome, UpcomingEvent,
        UserId, UserInfo, VisitedEvent,
    },
};

use super::{Database, DatabaseResult};

mod schema;

const EVENT_COLUMNS: &str = "e.id, e.chat_id, e.restaurant_id, e.message_id, e.reminder_at, \
     e.reminder_sent, e.feedback_prompt_sent, e.feedback_message_id, e.created_at";

const PARTICIPANT_COLUMNS: &str = "id, event_id, user_id, username, first_name, joined, \
     joined_at, review_left, cancelled, penalty_amount";

pub struct SqliteDatabase {
    connection: Connection,
}

impl SqliteDatabase {
    pub fn new<P: AsRef<Path>>(path: P) -> DatabaseResult<SqliteDatabase> {
        block_in_place(|| {
            let connection = Connection::open(path)
                .map_err(|e| DatabaseError::new("cannot open database", e.into()))?;
            Self::with_connection(connection)
        })
    }

    /// A private database that lives as long as the returned value.
    pub fn in_memory() -> DatabaseResult<SqliteDatabase> {
        let connection = Connection::open_in_memory()
            .map_err(|e| DatabaseError::new("cannot open in-memory database", e.into()))?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> DatabaseResult<SqliteDatabase> {
        schema::create_all_tables(&connection)
            .map_err(|e| DatabaseError::new("cannot create tables", e))?;
        Ok(SqliteDatabase { connection })
    }

    fn query_events<P: rusqlite::Params>(
        &self,
        condition: &str,
        params: P,
    ) -> anyhow::Result<Vec<SavedEvent>> {
        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM event e WHERE {condition} ORDER BY e.id"
        ))?;
        let event_iter = stmt.query_map(params, event_from_row)?;
        let events = event_iter.collect::<Result<_, _>>()?;
        Ok(events)
    }

    fn query_participants<P: rusqlite::Params>(
        &self,
        condition: &str,
        params: P,
    ) -> anyhow::Result<Vec<Participant>> {
        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participant WHERE {condition}
             ORDER BY joined_at ASC, id ASC"
        ))?;
        let participant_iter = stmt.query_map(params, participant_from_row)?;
        let participants = participant_iter.collect::<Result<_, _>>()?;
        Ok(participants)
    }
}

impl Database for SqliteDatabase {
    fn import_restaurants(
        &mut self,
        restaurants: &[ImportedRestaurant],
    ) -> DatabaseResult<ImportSummary> {
        let mut fn_impl = || -> anyhow::Result<ImportSummary> {
            let tx = self.connection.transaction()?;
            let mut summary = ImportSummary::default();

            {
                let mut insert_restaurant_stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO restaurant (name, address, cuisine, description, price_indicator)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;

                for restaurant in restaurants {
                    let num_inserted_rows = insert_restaurant_stmt.execute(params![
                        &restaurant.name,
                        &restaurant.address,
                        &restaurant.cuisine,
                        &restaurant.description,
                        &restaurant.price_indicator,
                    ])?;
                    if num_inserted_rows == 0 {
                        debug!(
                            "Restaurant '{}' at '{}' is already present",
                            restaurant.name, restaurant.address
                        );
                        summary.skipped += 1;
                    } else {
                        summary.inserted += 1;
                    }
                }
            }

            tx.commit()?;

            Ok(summary)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot import restaurants", e)))
    }

    fn count_restaurants(&self) -> DatabaseResult<usize> {
        let fn_impl = || -> anyhow::Result<usize> {
            let count: i64 =
                self.connection
                    .query_row("SELECT COUNT(*) FROM restaurant", [], |row| row.get(0))?;
            Ok(count as usize)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot count restaurants", e)))
    }

    fn get_restaurant(&self, restaurant_id: RestaurantId) -> DatabaseResult<Restaurant> {
        let fn_impl = || -> anyhow::Result<Restaurant> {
            let restaurant = self
                .connection
                .query_row(
                    "SELECT id, name, address, cuisine, description, price_indicator
                     FROM restaurant WHERE id = ?1",
                    params![&restaurant_id],
                    restaurant_from_row,
                )
                .optional()?;

            restaurant.ok_or_else(|| {
                DatabaseError::not_found(format!("restaurant {restaurant_id}")).into()
            })
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get restaurant", e)))
    }

    fn pick_eligible_restaurant(
        &self,
        chat_id: ChatId,
        consumed_at: usize,
    ) -> DatabaseResult<Option<Restaurant>> {
        let fn_impl = || -> anyhow::Result<Option<Restaurant>> {
            let restaurant = self
                .connection
                .query_row(
                    "SELECT r.id, r.name, r.address, r.cuisine, r.description, r.price_indicator
                     FROM restaurant r
                     WHERE r.id NOT IN (
                         SELECT e.restaurant_id FROM event e
                         INNER JOIN review rv ON rv.event_id = e.id
                         WHERE e.chat_id = ?1
                         GROUP BY e.id
                         HAVING COUNT(DISTINCT rv.user_id) >= ?2
                     )
                     ORDER BY RANDOM()
                     LIMIT 1",
                    params![&chat_id, &(consumed_at as i64)],
                    restaurant_from_row,
                )
                .optional()?;
            Ok(restaurant)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot pick a restaurant", e)))
    }

    fn create_event(
        &mut self,
        chat_id: ChatId,
        restaurant_id: RestaurantId,
        created_at: DateTime<Utc>,
    ) -> DatabaseResult<EventId> {
        let fn_impl = || -> anyhow::Result<EventId> {
            self.connection.execute(
                "INSERT INTO event (chat_id, restaurant_id, created_at) VALUES (?1, ?2, ?3)",
                params![&chat_id, &restaurant_id, &created_at],
            )?;
            let event_id = self.connection.last_insert_rowid();

            debug!("event_id is {event_id}");
            Ok(event_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot create event", e)))
    }

    fn get_event(&self, event_id: EventId) -> DatabaseResult<SavedEvent> {
        let fn_impl = || -> anyhow::Result<SavedEvent> {
            let event = self
                .connection
                .query_row(
                    &format!("SELECT {EVENT_COLUMNS} FROM event e WHERE e.id = ?1"),
                    params![&event_id],
                    event_from_row,
                )
                .optional()?;

            event.ok_or_else(|| DatabaseError::not_found(format!("event {event_id}")).into())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get event", e)))
    }

    fn get_latest_event_for_chat(&self, chat_id: ChatId) -> DatabaseResult<Option<SavedEvent>> {
        let fn_impl = || -> anyhow::Result<Option<SavedEvent>> {
            let event = self
                .connection
                .query_row(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM event e WHERE e.chat_id = ?1
                         ORDER BY e.id DESC LIMIT 1"
                    ),
                    params![&chat_id],
                    event_from_row,
                )
                .optional()?;
            Ok(event)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get latest event", e)))
    }

    fn get_event_by_feedback_message(
        &self,
        chat_id: ChatId,
        feedback_message_id: MessageId,
    ) -> DatabaseResult<Option<SavedEvent>> {
        let fn_impl = || -> anyhow::Result<Option<SavedEvent>> {
            let event = self
                .connection
                .query_row(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM event e
                         WHERE e.chat_id = ?1 AND e.feedback_message_id = ?2
                         LIMIT 1"
                    ),
                    params![&chat_id, &feedback_message_id],
                    event_from_row,
                )
                .optional()?;
            Ok(event)
        };

        block_in_place(|| {
            fn_impl().map_err(|e| map_error("cannot get event by feedback message", e))
        })
    }

    fn set_event_message(
        &mut self,
        event_id: EventId,
        message_id: MessageId,
    ) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            let num_updated_rows = self.connection.execute(
                "UPDATE event SET message_id = ?1 WHERE id = ?2",
                params![&message_id, &event_id],
            )?;
            ensure_updated(num_updated_rows, event_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot set event message", e)))
    }

    fn set_reminder(
        &mut self,
        event_id: EventId,
        reminder_at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        debug!("Setting reminder of event {event_id} at {reminder_at}");
        let fn_impl = || -> anyhow::Result<()> {
            let num_updated_rows = self.connection.execute(
                "UPDATE event SET reminder_at = ?1, reminder_sent = 0 WHERE id = ?2",
                params![&reminder_at, &event_id],
            )?;
            ensure_updated(num_updated_rows, event_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot set reminder", e)))
    }

    fn mark_reminder_sent(&mut self, event_id: EventId) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            let num_updated_rows = self.connection.execute(
                "UPDATE event SET reminder_sent = 1 WHERE id = ?1",
                params![&event_id],
            )?;
            ensure_updated(num_updated_rows, event_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot mark reminder as sent", e)))
    }

    fn mark_feedback_prompt_sent(
        &mut self,
        event_id: EventId,
        feedback_message_id: MessageId,
    ) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            let num_updated_rows = self.connection.execute(
                "UPDATE event SET feedback_prompt_sent = 1, feedback_message_id = ?1
                 WHERE id = ?2",
                params![&feedback_message_id, &event_id],
            )?;
            ensure_updated(num_updated_rows, event_id)
        };

        block_in_place(|| {
            fn_impl().map_err(|e| map_error("cannot mark feedback prompt as sent", e))
        })
    }

    fn delete_event_with_relations(&mut self, event_id: EventId) -> DatabaseResult<()> {
        debug!("Deleting event {event_id} with its participants and reviews");
        let mut fn_impl = || -> anyhow::Result<()> {
            let tx = self.connection.transaction()?;
            tx.execute(
                "DELETE FROM participant WHERE event_id = ?1",
                params![&event_id],
            )?;
            tx.execute("DELETE FROM review WHERE event_id = ?1", params![&event_id])?;
            tx.execute("DELETE FROM event WHERE id = ?1", params![&event_id])?;
            tx.commit()?;
            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete event", e)))
    }

    fn due_reminders(&self, now: DateTime<Utc>) -> DatabaseResult<Vec<SavedEvent>> {
        let fn_impl = || -> anyhow::Result<Vec<SavedEvent>> {
            let events = self.query_events(
                "e.reminder_at IS NOT NULL AND e.reminder_sent = 0",
                (),
            )?;
            Ok(events
                .into_iter()
                .filter(|e| e.reminder_at.map_or(false, |at| at <= now))
                .collect())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get due reminders", e)))
    }

    fn due_feedback_prompts(
        &self,
        now: DateTime<Utc>,
        delay: chrono::Duration,
    ) -> DatabaseResult<Vec<SavedEvent>> {
        let fn_impl = || -> anyhow::Result<Vec<SavedEvent>> {
            let events = self.query_events(
                "e.reminder_at IS NOT NULL AND e.feedback_prompt_sent = 0",
                (),
            )?;
            Ok(events
                .into_iter()
                .filter(|e| {
                    e.reminder_at
                        .and_then(|at| at.checked_add_signed(delay))
                        .map_or(false, |at| at <= now)
                })
                .collect())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get due feedback prompts", e)))
    }

    fn pending_reminders(&self) -> DatabaseResult<Vec<SavedEvent>> {
        let fn_impl = || {
            self.query_events("e.reminder_at IS NOT NULL AND e.reminder_sent = 0", ())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get pending reminders", e)))
    }

    fn pending_feedback_prompts(&self) -> DatabaseResult<Vec<SavedEvent>> {
        let fn_impl = || {
            self.query_events(
                "e.reminder_at IS NOT NULL AND e.feedback_prompt_sent = 0",
                (),
            )
        };

        block_in_place(|| {
            fn_impl().map_err(|e| map_error("cannot get pending feedback prompts", e))
        })
    }

    fn awaiting_reviews(&self, completed_at: usize) -> DatabaseResult<Vec<SavedEvent>> {
        let fn_impl = || {
            self.query_events(
                "e.reminder_at IS NOT NULL AND e.feedback_prompt_sent = 1
                 AND (SELECT COUNT(DISTINCT rv.user_id) FROM review rv WHERE rv.event_id = e.id) < ?1",
                params![&(completed_at as i64)],
            )
        };

        block_in_place(|| {
            fn_impl().map_err(|e| map_error("cannot get events awaiting reviews", e))
        })
    }

    fn toggle_participation(
        &mut self,
        event_id: EventId,
        user: &UserInfo,
        capacity: usize,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ToggleOutcome> {
        let mut fn_impl = || -> anyhow::Result<ToggleOutcome> {
            let tx = self.connection.transaction()?;

            let existing: Option<(i64, bool)> = tx
                .query_row(
                    "SELECT id, joined FROM participant WHERE event_id = ?1 AND user_id = ?2",
                    params![&event_id, &user.id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let outcome = match existing {
                None => {
                    if count_joined(&tx, event_id)? >= capacity {
                        ToggleOutcome::CapacityExceeded
                    } else {
                        tx.execute(
                            "INSERT INTO participant (event_id, user_id, username, first_name, joined, joined_at)
                             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                            params![&event_id, &user.id, &user.username, &user.first_name, &now],
                        )?;
                        ToggleOutcome::Joined
                    }
                }
                Some((participant_id, joined)) => {
                    let joining = !joined;
                    // The seat may have been taken since the user left it.
                    if joining && count_joined(&tx, event_id)? >= capacity {
                        ToggleOutcome::CapacityExceeded
                    } else {
                        tx.execute(
                            "UPDATE participant SET joined = ?1, joined_at = ?2, username = ?3, first_name = ?4
                             WHERE id = ?5",
                            params![&joining, &now, &user.username, &user.first_name, &participant_id],
                        )?;
                        if joining {
                            ToggleOutcome::Joined
                        } else {
                            ToggleOutcome::Left
                        }
                    }
                }
            };

            if outcome != ToggleOutcome::CapacityExceeded {
                tx.commit()?;
            }

            Ok(outcome)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot toggle participation", e)))
    }

    fn cancel_participation(
        &mut self,
        event_id: EventId,
        user_id: UserId,
        penalty: Amount,
    ) -> DatabaseResult<bool> {
        debug!("Cancelling participation of user {user_id} to event {event_id}");
        let fn_impl = || -> anyhow::Result<bool> {
            let num_updated_rows = self.connection.execute(
                "UPDATE participant SET joined = 0, cancelled = 1, penalty_amount = ?1
                 WHERE event_id = ?2 AND user_id = ?3",
                params![&penalty, &event_id, &user_id],
            )?;
            Ok(num_updated_rows > 0)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot cancel participation", e)))
    }

    fn get_joined_participants(&self, event_id: EventId) -> DatabaseResult<Vec<Participant>> {
        let fn_impl = || self.query_participants("event_id = ?1 AND joined = 1", params![&event_id]);

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get joined participants", e)))
    }

    fn count_joined_participants(&self, event_id: EventId) -> DatabaseResult<usize> {
        let fn_impl = || -> anyhow::Result<usize> { Ok(count_joined(&self.connection, event_id)?) };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot count joined participants", e)))
    }

    fn get_participants_without_review(
        &self,
        event_id: EventId,
    ) -> DatabaseResult<Vec<Participant>> {
        let fn_impl = || {
            self.query_participants(
                "event_id = ?1 AND joined = 1 AND review_left = 0",
                params![&event_id],
            )
        };

        block_in_place(|| {
            fn_impl().map_err(|e| map_error("cannot get participants without review", e))
        })
    }

    fn get_user_penalty(&self, user_id: UserId) -> DatabaseResult<Amount> {
        let fn_impl = || -> anyhow::Result<Amount> {
            let penalty: Option<Amount> = self
                .connection
                .query_row(
                    "SELECT penalty_amount FROM participant
                     WHERE user_id = ?1 AND cancelled = 1 AND penalty_amount > 0
                     ORDER BY id DESC
                     LIMIT 1",
                    params![&user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(penalty.unwrap_or(0))
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get user penalty", e)))
    }

    fn clear_user_penalty(&mut self, user_id: UserId) -> DatabaseResult<()> {
        let fn_impl = || -> anyhow::Result<()> {
            self.connection.execute(
                "UPDATE participant SET penalty_amount = 0 WHERE user_id = ?1 AND cancelled = 1",
                params![&user_id],
            )?;
            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot clear user penalty", e)))
    }

    fn save_review(
        &mut self,
        event_id: EventId,
        author: &UserInfo,
        text: &str,
        rating: Option<u8>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ReviewOutcome> {
        let mut fn_impl = || -> anyhow::Result<ReviewOutcome> {
            let tx = self.connection.transaction()?;

            let joined: Option<bool> = tx
                .query_row(
                    "SELECT joined FROM participant WHERE event_id = ?1 AND user_id = ?2",
                    params![&event_id, &author.id],
                    |row| row.get(0),
                )
                .optional()?;
            if !joined.unwrap_or(false) {
                return Ok(ReviewOutcome::NotAParticipant);
            }

            let author_name = author.display_name();
            let num_updated_rows = tx.execute(
                "UPDATE review SET text = ?1, rating = ?2, author = ?3, created_at = ?4
                 WHERE event_id = ?5 AND user_id = ?6",
                params![&text, &rating, &author_name, &now, &event_id, &author.id],
            )?;
            let outcome = if num_updated_rows == 0 {
                tx.execute(
                    "INSERT INTO review (event_id, user_id, author, text, rating, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![&event_id, &author.id, &author_name, &text, &rating, &now],
                )?;
                ReviewOutcome::Created
            } else {
                ReviewOutcome::Updated
            };

            tx.execute(
                "UPDATE participant SET review_left = 1 WHERE event_id = ?1 AND user_id = ?2",
                params![&event_id, &author.id],
            )?;

            tx.commit()?;

            Ok(outcome)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save review", e)))
    }

    fn clear_reviews_by_restaurant_name(
        &mut self,
        chat_id: ChatId,
        restaurant_name: &str,
    ) -> DatabaseResult<usize> {
        let mut fn_impl = || -> anyhow::Result<usize> {
            let tx = self.connection.transaction()?;

            let events_of_restaurant = "SELECT e.id FROM event e
                 JOIN restaurant r ON r.id = e.restaurant_id
                 WHERE e.chat_id = ?1 AND r.name = ?2 COLLATE NOCASE";
            tx.execute(
                &format!(
                    "UPDATE participant SET review_left = 0
                     WHERE event_id IN ({events_of_restaurant})"
                ),
                params![&chat_id, &restaurant_name],
            )?;
            let num_deleted_rows = tx.execute(
                &format!("DELETE FROM review WHERE event_id IN ({events_of_restaurant})"),
                params![&chat_id, &restaurant_name],
            )?;

            tx.commit()?;

            Ok(num_deleted_rows)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot clear reviews", e)))
    }

    fn count_distinct_reviews(&self, event_id: EventId) -> DatabaseResult<usize> {
        let fn_impl = || -> anyhow::Result<usize> {
            let count: i64 = self.connection.query_row(
                "SELECT COUNT(DISTINCT user_id) FROM review WHERE event_id = ?1",
                params![&event_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot count reviews", e)))
    }

    fn get_reviews(&self, event_id: EventId) -> DatabaseResult<Vec<Review>> {
        let fn_impl = || -> anyhow::Result<Vec<Review>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT id, event_id, user_id, author, text, rating, created_at FROM review
                 WHERE event_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let review_iter = stmt.query_map(params![&event_id], |row| {
                Ok(Review {
                    id: row.get(0)?,
                    event_id: row.get(1)?,
                    user_id: row.get(2)?,
                    author: row.get(3)?,
                    text: row.get(4)?,
                    rating: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?;

            let reviews = review_iter.collect::<Result<_, _>>()?;
            Ok(reviews)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get reviews", e)))
    }

    fn get_visited_events(&self, chat_id: ChatId) -> DatabaseResult<Vec<VisitedEvent>> {
        let fn_impl = || -> anyhow::Result<Vec<VisitedEvent>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT e.id, r.name, r.address, COUNT(rv.id), AVG(rv.rating) FROM event e
                 INNER JOIN restaurant r ON r.id = e.restaurant_id
                 LEFT JOIN review rv ON rv.event_id = e.id
                 WHERE e.chat_id = ?1
                 GROUP BY e.id
                 HAVING COUNT(rv.id) > 0
                 ORDER BY e.id DESC",
            )?;

            let visited_iter = stmt.query_map(params![&chat_id], |row| {
                Ok(VisitedEvent {
                    event_id: row.get(0)?,
                    restaurant_name: row.get(1)?,
                    restaurant_address: row.get(2)?,
                    review_count: row.get::<_, i64>(3)? as usize,
                    average_rating: row.get(4)?,
                })
            })?;

            let visited = visited_iter.collect::<Result<_, _>>()?;
            Ok(visited)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get visited events", e)))
    }

    fn get_upcoming_events(
        &self,
        chat_id: ChatId,
        capacity: usize,
    ) -> DatabaseResult<Vec<UpcomingEvent>> {
        let fn_impl = || -> anyhow::Result<Vec<UpcomingEvent>> {
            let mut stmt = self.connection.prepare_cached(
                "SELECT e.id, r.name, e.reminder_at FROM event e
                 INNER JOIN restaurant r ON r.id = e.restaurant_id
                 WHERE e.chat_id = ?1
                 AND (SELECT COUNT(*) FROM participant p WHERE p.event_id = e.id AND p.joined = 1) >= ?2
                 AND (SELECT COUNT(DISTINCT rv.user_id) FROM review rv WHERE rv.event_id = e.id) < ?2
                 ORDER BY e.id DESC",
            )?;

            let upcoming_iter = stmt.query_map(params![&chat_id, &(capacity as i64)], |row| {
                Ok(UpcomingEvent {
                    event_id: row.get(0)?,
                    restaurant_name: row.get(1)?,
                    reminder_at: row.get(2)?,
                })
            })?;

            let upcoming = upcoming_iter.collect::<Result<_, _>>()?;
            Ok(upcoming)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get upcoming events", e)))
    }
}

fn count_joined(connection: &Connection, event_id: EventId) -> rusqlite::Result<usize> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM participant WHERE event_id = ?1 AND joined = 1",
        params![&event_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn ensure_updated(num_updated_rows: usize, event_id: EventId) -> anyhow::Result<()> {
    if num_updated_rows == 0 {
        Err(DatabaseError::not_found(format!("event {event_id}")).into())
    } else {
        Ok(())
    }
}

fn restaurant_from_row(row: &Row) -> rusqlite::Result<Restaurant> {
    Ok(Restaurant {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        cuisine: row.get(3)?,
        description: row.get(4)?,
        price_indicator: row.get(5)?,
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<SavedEvent> {
    Ok(SavedEvent {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        restaurant_id: row.get(2)?,
        message_id: row.get(3)?,
        reminder_at: row.get(4)?,
        reminder_sent: row.get(5)?,
        feedback_prompt_sent: row.get(6)?,
        feedback_message_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn participant_from_row(row: &Row) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        event_id: row.get(1)?,
        user: UserInfo {
            id: row.get(2)?,
            username: row.get(3)?,
            first_name: row.get(4)?,
        },
        joined: row.get(5)?,
        joined_at: row.get(6)?,
        review_left: row.get(7)?,
        cancelled: row.get(8)?,
        penalty_amount: row.get(9)?,
    })
}

fn map_error<T: AsRef<str>>(message: T, e: anyhow::Error) -> DatabaseError {
    match e.downcast::<DatabaseError>() {
        Ok(e) => e,
        Err(e) => DatabaseError::new(message, e),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempdir::TempDir;

    use super::*;

    impl SqliteDatabase {
        fn get_participant(
            &self,
            event_id: EventId,
            user_id: UserId,
        ) -> anyhow::Result<Option<Participant>> {
            let participant = self
                .connection
                .query_row(
                    &format!(
                        "SELECT {PARTICIPANT_COLUMNS} FROM participant
                         WHERE event_id = ?1 AND user_id = ?2"
                    ),
                    params![&event_id, &user_id],
                    participant_from_row,
                )
                .optional()?;
            Ok(participant)
        }
    }

    fn user(id: UserId) -> UserInfo {
        UserInfo::new(id, Some(format!("user{id}")), None)
    }

    fn make_database() -> anyhow::Result<(SqliteDatabase, EventId)> {
        let mut database = SqliteDatabase::in_memory()?;
        database.import_restaurants(&[ImportedRestaurant::new("Trattoria", "Via Roma 1")])?;
        let restaurant = database
            .pick_eligible_restaurant(1, 3)?
            .ok_or_else(|| anyhow::anyhow!("no restaurant"))?;
        let event_id = database.create_event(1, restaurant.id, Utc::now())?;
        Ok((database, event_id))
    }

    #[test]
    fn test_import_skips_duplicates() -> anyhow::Result<()> {
        let mut database = SqliteDatabase::in_memory()?;
        let restaurants = vec![
            ImportedRestaurant::new("X", "Y"),
            ImportedRestaurant::new("X", "Y"),
            ImportedRestaurant::new("X", "Z"),
        ];

        let summary = database.import_restaurants(&restaurants)?;
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);

        let summary = database.import_restaurants(&restaurants[0..1])?;
        assert_eq!(summary.inserted, 0);
        assert_eq!(database.count_restaurants()?, 2);
        Ok(())
    }

    #[test]
    fn test_toggle_participation_flips_the_same_row() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();

        let outcome = database.toggle_participation(event_id, &user(1), 3, now)?;
        assert_eq!(outcome, ToggleOutcome::Joined);
        let outcome = database.toggle_participation(event_id, &user(1), 3, now)?;
        assert_eq!(outcome, ToggleOutcome::Left);

        let participant = database
            .get_participant(event_id, 1)?
            .ok_or_else(|| anyhow::anyhow!("missing participant"))?;
        assert!(!participant.joined);
        assert_eq!(database.count_joined_participants(event_id)?, 0);
        Ok(())
    }

    #[test]
    fn test_toggle_participation_respects_capacity() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();

        for id in 1..=3 {
            database.toggle_participation(event_id, &user(id), 3, now)?;
        }
        let outcome = database.toggle_participation(event_id, &user(4), 3, now)?;
        assert_eq!(outcome, ToggleOutcome::CapacityExceeded);
        assert!(database.get_participant(event_id, 4)?.is_none());

        // A seat freed by user 1 is taken by user 4: user 1 cannot come back.
        database.toggle_participation(event_id, &user(1), 3, now)?;
        database.toggle_participation(event_id, &user(4), 3, now)?;
        let outcome = database.toggle_participation(event_id, &user(1), 3, now)?;
        assert_eq!(outcome, ToggleOutcome::CapacityExceeded);
        assert_eq!(database.count_joined_participants(event_id)?, 3);
        Ok(())
    }

    #[test]
    fn test_toggle_participation_refreshes_display_info() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();

        database.toggle_participation(event_id, &user(1), 3, now)?;
        database.toggle_participation(event_id, &user(1), 3, now)?;
        let renamed = UserInfo::new(1, None, Some("Bob".to_string()));
        database.toggle_participation(event_id, &renamed, 3, now)?;

        let participants = database.get_joined_participants(event_id)?;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].user, renamed);
        Ok(())
    }

    #[test]
    fn test_save_review_overwrites() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();
        database.toggle_participation(event_id, &user(1), 3, now)?;

        let outcome = database.save_review(event_id, &user(1), "good", Some(4), now)?;
        assert_eq!(outcome, ReviewOutcome::Created);
        let later = now + Duration::minutes(5);
        let outcome = database.save_review(event_id, &user(1), "great", Some(5), later)?;
        assert_eq!(outcome, ReviewOutcome::Updated);

        let reviews = database.get_reviews(event_id)?;
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].text, "great");
        assert_eq!(reviews[0].rating, Some(5));
        assert_eq!(reviews[0].created_at, later);
        assert_eq!(database.count_distinct_reviews(event_id)?, 1);

        let participant = database
            .get_participant(event_id, 1)?
            .ok_or_else(|| anyhow::anyhow!("missing participant"))?;
        assert!(participant.review_left);
        Ok(())
    }

    #[test]
    fn test_clear_reviews_by_restaurant_name() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();
        for id in 1..=3 {
            database.toggle_participation(event_id, &user(id), 3, now)?;
            database.save_review(event_id, &user(id), "ok", Some(3), now)?;
        }
        assert!(database.pick_eligible_restaurant(1, 3)?.is_none());

        // Another chat, another restaurant name: nothing to delete.
        assert_eq!(database.clear_reviews_by_restaurant_name(2, "Trattoria")?, 0);
        assert_eq!(database.clear_reviews_by_restaurant_name(1, "Pizzeria")?, 0);
        assert_eq!(database.count_distinct_reviews(event_id)?, 3);

        assert_eq!(database.clear_reviews_by_restaurant_name(1, "trattoria")?, 3);
        assert!(database.get_reviews(event_id)?.is_empty());
        assert_eq!(database.get_participants_without_review(event_id)?.len(), 3);
        assert!(database.pick_eligible_restaurant(1, 3)?.is_some());
        Ok(())
    }

    #[test]
    fn test_save_review_requires_joined_participant() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();

        let outcome = database.save_review(event_id, &user(9), "great", Some(5), now)?;
        assert_eq!(outcome, ReviewOutcome::NotAParticipant);

        database.toggle_participation(event_id, &user(1), 3, now)?;
        database.cancel_participation(event_id, 1, 500)?;
        let outcome = database.save_review(event_id, &user(1), "meh", None, now)?;
        assert_eq!(outcome, ReviewOutcome::NotAParticipant);
        assert!(database.get_reviews(event_id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_penalty_is_global_and_cleared() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();
        database.toggle_participation(event_id, &user(1), 3, now)?;

        assert!(database.cancel_participation(event_id, 1, 500)?);
        assert!(!database.cancel_participation(event_id, 2, 500)?);
        assert_eq!(database.get_user_penalty(1)?, 500);
        assert_eq!(database.get_user_penalty(2)?, 0);

        database.clear_user_penalty(1)?;
        assert_eq!(database.get_user_penalty(1)?, 0);
        Ok(())
    }

    #[test]
    fn test_delete_event_cascades() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();
        database.toggle_participation(event_id, &user(1), 3, now)?;
        database.save_review(event_id, &user(1), "ok", None, now)?;

        database.delete_event_with_relations(event_id)?;

        assert!(matches!(
            database.get_event(event_id),
            Err(DatabaseError::NotFound(_))
        ));
        assert!(database.get_participant(event_id, 1)?.is_none());
        assert!(database.get_reviews(event_id)?.is_empty());
        // Deleting twice is harmless.
        database.delete_event_with_relations(event_id)?;
        Ok(())
    }

    #[test]
    fn test_completed_restaurant_is_not_eligible() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();
        for id in 1..=3 {
            database.toggle_participation(event_id, &user(id), 3, now)?;
            database.save_review(event_id, &user(id), "ok", None, now)?;
        }

        assert!(database.pick_eligible_restaurant(1, 3)?.is_none());
        // Other chats are not affected.
        assert!(database.pick_eligible_restaurant(2, 3)?.is_some());
        Ok(())
    }

    #[test]
    fn test_due_queries() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let at = Utc::now() + Duration::hours(2);
        database.set_reminder(event_id, at)?;

        assert!(database.due_reminders(at - Duration::minutes(1))?.is_empty());
        assert_eq!(database.due_reminders(at)?.len(), 1);
        assert_eq!(database.pending_reminders()?.len(), 1);

        database.mark_reminder_sent(event_id)?;
        assert!(database.due_reminders(at)?.is_empty());
        assert!(database.pending_reminders()?.is_empty());

        let delay = Duration::hours(3);
        assert!(database.due_feedback_prompts(at, delay)?.is_empty());
        assert_eq!(database.due_feedback_prompts(at + delay, delay)?.len(), 1);

        database.mark_feedback_prompt_sent(event_id, 42)?;
        assert!(database.pending_feedback_prompts()?.is_empty());
        assert_eq!(database.awaiting_reviews(3)?.len(), 1);
        let event = database
            .get_event_by_feedback_message(1, 42)?
            .ok_or_else(|| anyhow::anyhow!("missing event"))?;
        assert_eq!(event.id, event_id);
        Ok(())
    }

    #[test]
    fn test_missing_event_is_not_found() -> anyhow::Result<()> {
        let mut database = SqliteDatabase::in_memory()?;
        assert!(matches!(
            database.set_reminder(7, Utc::now()),
            Err(DatabaseError::NotFound(_))
        ));
        assert!(matches!(
            database.get_restaurant(7),
            Err(DatabaseError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_stats_queries() -> anyhow::Result<()> {
        let (mut database, event_id) = make_database()?;
        let now = Utc::now();
        for id in 1..=3 {
            database.toggle_participation(event_id, &user(id), 3, now)?;
        }

        let upcoming = database.get_upcoming_events(1, 3)?;
        assert_eq!(upcoming.len(), 1);
        assert!(database.get_visited_events(1)?.is_empty());

        database.save_review(event_id, &user(1), "good", Some(4), now)?;
        database.save_review(event_id, &user(2), "fine", None, now)?;
        let visited = database.get_visited_events(1)?;
        assert_eq!(visited.len(), 1);
        assert_eq!(visited[0].review_count, 2);
        assert_eq!(visited[0].average_rating, Some(4.0));
        Ok(())
    }

    #[test]
    fn test_data_survives_reopening() -> anyhow::Result<()> {
        let dir = TempDir::new("restaurant_roulette")?;
        let path = dir.path().join("test.db");
        let at = Utc::now() + Duration::hours(1);

        let event_id = {
            let mut database = SqliteDatabase::new(&path)?;
            database.import_restaurants(&[ImportedRestaurant::new("Osteria", "")])?;
            let restaurant = database
                .pick_eligible_restaurant(1, 3)?
                .ok_or_else(|| anyhow::anyhow!("no restaurant"))?;
            let event_id = database.create_event(1, restaurant.id, Utc::now())?;
            database.set_reminder(event_id, at)?;
            event_id
        };

        let database = SqliteDatabase::new(&path)?;
        let event = database.get_event(event_id)?;
        assert_eq!(event.reminder_at, Some(at));
        assert!(!event.reminder_sent);
        Ok(())
    }
}
