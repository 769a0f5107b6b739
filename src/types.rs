use chrono::{DateTime, Utc};

pub type Amount = i64;
pub type ChatId = i64;
pub type UserId = i64;
pub type EventId = i64;
pub type RestaurantId = i64;
pub type MessageId = i32;
pub type Rating = u8;

/// A restaurant record as delivered by the import file, before it is saved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedRestaurant {
    pub name: String,
    pub address: String,
    pub cuisine: Option<String>,
    pub description: Option<String>,
    pub price_indicator: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub name: String,
    pub address: String,
    pub cuisine: Option<String>,
    pub description: Option<String>,
    pub price_indicator: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedEvent {
    pub id: EventId,
    pub chat_id: ChatId,
    pub restaurant_id: RestaurantId,
    pub message_id: Option<MessageId>,
    pub reminder_at: Option<DateTime<Utc>>,
    pub reminder_sent: bool,
    pub feedback_prompt_sent: bool,
    pub feedback_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

/// Who is interacting with the bot. Name and handle may change between
/// interactions, the ID never does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: i64,
    pub event_id: EventId,
    pub user: UserInfo,
    pub joined: bool,
    pub joined_at: Option<DateTime<Utc>>,
    pub review_left: bool,
    pub cancelled: bool,
    pub penalty_amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Review {
    pub id: i64,
    pub event_id: EventId,
    pub user_id: UserId,
    pub author: String,
    pub text: String,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
}

/// Result of a join toggle as seen by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Joined,
    Left,
    CapacityExceeded,
}

/// Result of saving a review as seen by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewOutcome {
    Created,
    Updated,
    NotAParticipant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// An event of the chat that received at least one review.
#[derive(Clone, Debug, PartialEq)]
pub struct VisitedEvent {
    pub event_id: EventId,
    pub restaurant_name: String,
    pub restaurant_address: String,
    pub review_count: usize,
    pub average_rating: Option<f64>,
}

/// An event of the chat with a full table but not yet enough reviews.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpcomingEvent {
    pub event_id: EventId,
    pub restaurant_name: String,
    pub reminder_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatsSnapshot {
    pub visited_count: usize,
    pub total_count: usize,
    pub visited: Vec<VisitedEvent>,
    pub upcoming: Vec<UpcomingEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportFormat {
    Json,
    Csv,
}

/// Shortcuts offered by the menu, as buttons or as plain text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuAction {
    Help,
    Menu,
    Random,
    Stats,
    Upcoming,
}

/// What an inline button asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Join(EventId),
    Cancel(EventId),
    Reset(EventId),
    Menu(MenuAction),
}

/// Inline buttons that can be attached to an outgoing message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyboard {
    EventCard(EventId),
    Menu,
}

impl UserInfo {
    pub fn new(id: UserId, username: Option<String>, first_name: Option<String>) -> UserInfo {
        UserInfo {
            id,
            username,
            first_name,
        }
    }

    /// The handle when there is one, the first name otherwise.
    pub fn display_name(&self) -> String {
        match (&self.username, &self.first_name) {
            (Some(username), _) if !username.is_empty() => format!("@{username}"),
            (_, Some(first_name)) if !first_name.is_empty() => first_name.clone(),
            _ => "Anonymous".to_string(),
        }
    }
}

impl ImportedRestaurant {
    pub fn new(name: &str, address: &str) -> ImportedRestaurant {
        ImportedRestaurant {
            name: name.to_string(),
            address: address.to_string(),
            cuisine: None,
            description: None,
            price_indicator: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let user = UserInfo::new(1, Some("alice".to_string()), Some("Alice".to_string()));
        assert_eq!(user.display_name(), "@alice");

        let user = UserInfo::new(1, None, Some("Alice".to_string()));
        assert_eq!(user.display_name(), "Alice");

        let user = UserInfo::new(1, Some(String::new()), None);
        assert_eq!(user.display_name(), "Anonymous");
    }
}
