use teloxide::RequestError;
use thiserror::Error;

#[derive(Error)]
#[error("An error occurred: {user_message}")]
pub struct BotError {
    message: String,
    user_message: String,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{message}: {cause}")]
    Query { message: String, cause: anyhow::Error },
}

/// Errors of the event lifecycle. The messages are shown to users as they are.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("all 3 seats are already taken")]
    CapacityExceeded,

    #[error("cannot set the date: {0}")]
    InvalidSchedule(String),

    #[error("you did not take part in this outing")]
    NotAParticipant,

    #[error(
        "finish the current outing first (all 3 participants must leave a review), \
         then a new restaurant can be picked"
    )]
    EventInProgress,

    #[error("this outing is already completed")]
    EventClosed,

    #[error("there are no restaurants left to pick; upload a JSON file with new ones")]
    NoEligibleRestaurant,

    #[error("there is no active outing in this chat; pick a restaurant with /random")]
    NoActiveEvent,

    #[error("cannot query the database, please try again later")]
    Database(#[source] DatabaseError),

    #[error("cannot schedule the notifications, please try again later")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Input(#[from] InputError),
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("invalid date `{0}`: expected format DD.MM.YYYY HH:MM")]
    InvalidDateTime(String),

    #[error("invalid rating `{0}`: ratings go from 1 to 5")]
    InvalidRating(String),

    #[error("invalid value `{0}` for event ID: expected an integer")]
    InvalidEventId(String),

    #[error("invalid restaurant list: {0}")]
    InvalidImportFile(String),

    #[error("only .json and .csv files are supported")]
    UnsupportedImportFormat,

    #[error("the review is empty")]
    EmptyReview,

    #[error("missing restaurant name: use /clearreviews <restaurant name>")]
    MissingRestaurantName,
}

/// A best-effort notification that did not reach its recipient.
#[derive(Error, Debug)]
#[error("cannot notify chat {chat_id}: {reason}")]
pub struct NotifyError {
    pub chat_id: i64,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("the task dispatcher has stopped, cannot arm {0}")]
    Closed(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {name}")]
    InvalidValue { name: &'static str, value: String },
}

impl DatabaseError {
    pub fn new<T: AsRef<str>>(message: T, e: anyhow::Error) -> Self {
        DatabaseError::Query {
            message: message.as_ref().to_string(),
            cause: e,
        }
    }

    pub fn not_found<T: AsRef<str>>(what: T) -> Self {
        DatabaseError::NotFound(what.as_ref().to_string())
    }
}

impl From<DatabaseError> for EventError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => EventError::NotFound(what),
            e => EventError::Database(e),
        }
    }
}

impl EventError {
    pub fn invalid_schedule<T: AsRef<str>>(reason: T) -> Self {
        EventError::InvalidSchedule(reason.as_ref().to_string())
    }
}

impl InputError {
    pub fn invalid_date_time(input: &str) -> Self {
        InputError::InvalidDateTime(input.to_string())
    }

    pub fn invalid_rating(input: &str) -> Self {
        InputError::InvalidRating(input.to_string())
    }

    pub fn invalid_event_id(input: &str) -> Self {
        InputError::InvalidEventId(input.to_string())
    }

    pub fn invalid_import_file<E: std::fmt::Display>(e: E) -> Self {
        InputError::InvalidImportFile(e.to_string())
    }
}

impl NotifyError {
    pub fn telegram(chat_id: i64, e: RequestError) -> Self {
        NotifyError {
            chat_id,
            reason: e.to_string(),
        }
    }
}

impl BotError {
    pub fn new(message: String, user_message: String) -> Self {
        BotError {
            message,
            user_message,
        }
    }

    pub fn telegram(message: &str, e: RequestError) -> Self {
        let message = format!("{message}: {e}");
        let user_message =
            "cannot communicate with Telegram server, please try again later".to_string();
        BotError {
            message,
            user_message,
        }
    }

    pub fn import(message: &str, e: anyhow::Error) -> Self {
        let message = format!("{message}: {e}");
        let user_message = "cannot read the uploaded file, please try again".to_string();
        BotError {
            message,
            user_message,
        }
    }
}

impl std::fmt::Debug for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_not_found_becomes_event_not_found() {
        let e: EventError = DatabaseError::not_found("event 3").into();
        assert!(matches!(e, EventError::NotFound(ref what) if what == "event 3"));
        assert_eq!(e.to_string(), "event 3 not found");
    }

    #[test]
    fn test_database_query_error_hides_details() {
        let e: EventError = DatabaseError::new("cannot get event", anyhow::anyhow!("disk I/O")).into();
        assert_eq!(
            e.to_string(),
            "cannot query the database, please try again later"
        );
    }
}
