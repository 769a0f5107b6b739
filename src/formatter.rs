//! Produce the strings that are sent as bot messages.
//! The formatting consists in using basic markdown formatting, emojis
//! and composing the actual output string.

use std::iter::repeat;

use chrono::{DateTime, FixedOffset, Utc};
use teloxide::utils::markdown::{bold, escape, italic, link};

use crate::{
    ledger::MAX_PARTICIPANTS,
    reviews::{average_rating, ReviewReceipt},
    types::{
        Amount, CallbackAction, ImportSummary, MenuAction, Participant, Restaurant, Review, StatsSnapshot,
        UpcomingEvent, UserInfo, VisitedEvent,
    },
};

/// Format of dates, both shown to and typed by users.
pub const DATE_TIME_FORMAT: &str = "%d.%m.%Y %H:%M";

const SEPARATOR_LENGTH: usize = 24;

pub const MENU_RANDOM_LABEL: &str = "🎲 Random restaurant";
pub const MENU_STATS_LABEL: &str = "📊 Statistics";
pub const MENU_UPCOMING_LABEL: &str = "📅 Upcoming outings";

pub fn format_local_time(at: DateTime<Utc>, utc_offset: FixedOffset) -> String {
    at.with_timezone(&utc_offset)
        .format(DATE_TIME_FORMAT)
        .to_string()
}

pub fn format_callback_data(action: CallbackAction) -> String {
    match action {
        CallbackAction::Join(event_id) => format!("join:{event_id}"),
        CallbackAction::Cancel(event_id) => format!("cancel:{event_id}"),
        CallbackAction::Reset(event_id) => format!("reset:{event_id}"),
        CallbackAction::Menu(action) => {
            let name = match action {
                MenuAction::Help => "help",
                MenuAction::Menu => "menu",
                MenuAction::Random => "random",
                MenuAction::Stats => "stats",
                MenuAction::Upcoming => "upcoming",
            };
            format!("menu:{name}")
        }
    }
}

/// The announcement of an event, updated every time somebody joins or leaves.
pub fn format_event_card(
    restaurant: &Restaurant,
    participants: &[Participant],
    reminder_at: Option<DateTime<Utc>>,
    utc_offset: FixedOffset,
) -> String {
    let separator = escape(&make_string_of_char('─', SEPARATOR_LENGTH));
    let mut lines = vec![
        format!("🍽 {}", bold(&escape(&restaurant.name))),
        separator.clone(),
    ];
    if !restaurant.address.is_empty() {
        lines.push(format!("📍 {} {}", bold("Address:"), escape(&restaurant.address)));
    }
    if let Some(cuisine) = &restaurant.cuisine {
        lines.push(format!("🍴 {} {}", bold("Cuisine:"), escape(cuisine)));
    }
    if let Some(price) = &restaurant.price_indicator {
        lines.push(format!("💰 {} {}", bold("Average bill:"), escape(price)));
    }
    if let Some(description) = &restaurant.description {
        lines.push(String::new());
        lines.push(format!("📝 {}", italic(&escape(description))));
    }
    lines.push(separator);
    lines.push(format!(
        "👥 {} {}",
        bold(&escape(&format!(
            "Going ({}/{MAX_PARTICIPANTS}):",
            participants.len()
        ))),
        format_participant_names(participants)
    ));
    if let Some(at) = reminder_at {
        lines.push(format!(
            "📅 {} {}",
            bold("When:"),
            escape(&format_local_time(at, utc_offset))
        ));
    }

    lines.join("\n")
}

fn format_participant_names(participants: &[Participant]) -> String {
    if participants.is_empty() {
        escape("nobody yet")
    } else {
        participants
            .iter()
            .map(|p| escape(&p.user.display_name()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn format_schedule_request(restaurant: &Restaurant) -> String {
    escape(&format!(
        "Everybody is in for {}! Send the date and time of the outing as \
         DD.MM.YYYY HH:MM, or use /setreminder DD.MM.YYYY HH:MM",
        restaurant.name
    ))
}

pub fn format_schedule_confirmation(
    restaurant: &Restaurant,
    at: DateTime<Utc>,
    utc_offset: FixedOffset,
) -> String {
    format!(
        "⏰ {} {}",
        escape("Reminder set for"),
        bold(&escape(&format!(
            "{} at {}",
            format_local_time(at, utc_offset),
            restaurant.name
        )))
    )
}

pub fn format_reminder(
    restaurant: &Restaurant,
    participants: &[Participant],
    at: DateTime<Utc>,
    utc_offset: FixedOffset,
) -> String {
    let mut result = format!(
        "🔔 {} {}{}",
        escape(&format!(
            "Reminder: at {} you are going to",
            format_local_time(at, utc_offset)
        )),
        bold(&escape(&restaurant.name)),
        escape("!")
    );
    if !restaurant.address.is_empty() {
        result += &escape(&format!("\nAddress: {}", restaurant.address));
    }
    result += &format!(
        "\n{} {}",
        escape("Participants:"),
        format_participant_names(participants)
    );
    result
}

pub fn format_feedback_prompt(restaurant: &Restaurant) -> String {
    format!(
        "{} {}{}\n\n{}",
        escape("How was"),
        bold(&escape(&restaurant.name)),
        escape("? Reply to this message with your review."),
        italic(&escape(
            "Format: [rating 1-5] text\nExample: 5 Great place, we'll be back!"
        ))
    )
}

/// Private reminder to a participant that has not reviewed yet.
pub fn format_review_nag(restaurant: &Restaurant) -> String {
    escape(&format!(
        "You have not reviewed {} yet. Please reply to the feedback message in the group!",
        restaurant.name
    ))
}

/// Same as `format_review_nag`, but posted in the group mentioning the user.
pub fn format_review_nag_mention(restaurant: &Restaurant, user: &UserInfo) -> String {
    let mention = match &user.username {
        Some(username) if !username.is_empty() => escape(&format!("@{username}")),
        _ => link(
            &format!("tg://user?id={}", user.id),
            &escape(&user.display_name()),
        ),
    };
    format!(
        "{mention}{}",
        escape(&format!(
            ", a reminder to leave your review of {}!",
            restaurant.name
        ))
    )
}

pub fn format_event_completed(restaurant: &Restaurant, reviews: &[Review]) -> String {
    let mut result = format!(
        "🎉 {} {}{}",
        escape("Everybody reviewed"),
        bold(&escape(&restaurant.name)),
        escape("!")
    );
    if let Some(average) = average_rating(reviews) {
        result += &escape(&format!(" Average rating: {average:.1} {}", stars(average)));
    }
    result += &escape("\nPick the next restaurant with /random");
    result
}

pub fn format_event_cancelled() -> String {
    escape("The outing was reset. Pick a new restaurant with /random")
}

pub fn format_reviews(restaurant: &Restaurant, reviews: &[Review]) -> String {
    let header = format!("📝 {} {}", escape("Reviews of"), bold(&escape(&restaurant.name)));
    if reviews.is_empty() {
        return format!("{header}\n{}", escape("No reviews yet."));
    }

    reviews
        .iter()
        .map(format_review)
        .fold(header + "\n", |a, b| a + &b + "\n")
}

fn format_review(review: &Review) -> String {
    let rating = review
        .rating
        .map(|r| format!(" {}", stars(f64::from(r))))
        .unwrap_or_default();
    format!(
        "• {}{}: {}",
        bold(&escape(&review.author)),
        escape(&rating),
        escape(&review.text)
    )
}

pub fn format_stats(snapshot: &StatsSnapshot, utc_offset: FixedOffset) -> String {
    let percent = if snapshot.total_count == 0 {
        0.0
    } else {
        snapshot.visited_count as f64 * 100.0 / snapshot.total_count as f64
    };

    let mut lines = vec![
        format!(
            "{} {}",
            bold("Restaurants:"),
            escape(&snapshot.total_count.to_string())
        ),
        format!(
            "{} {}",
            bold("Visited:"),
            escape(&format!(
                "{} of {} (≈{percent:.0}%)",
                snapshot.visited_count, snapshot.total_count
            ))
        ),
    ];

    if !snapshot.visited.is_empty() {
        lines.push(String::new());
        lines.push(bold("Visited restaurants"));
        lines.extend(snapshot.visited.iter().map(format_visited_event));
    }

    lines.push(String::new());
    lines.push(format_upcoming(&snapshot.upcoming, utc_offset));
    lines.join("\n")
}

fn format_visited_event(event: &VisitedEvent) -> String {
    let average = event
        .average_rating
        .map(|a| format!(" {a:.1} {}", stars(a)))
        .unwrap_or_default();
    escape(&format!(
        "• {} (reviews: {}{average}) /reviews {}",
        event.restaurant_name, event.review_count, event.event_id
    ))
}

pub fn format_upcoming(upcoming: &[UpcomingEvent], utc_offset: FixedOffset) -> String {
    if upcoming.is_empty() {
        return escape("No upcoming outings.");
    }

    upcoming
        .iter()
        .map(|e| {
            let when = e
                .reminder_at
                .map(|at| format_local_time(at, utc_offset))
                .unwrap_or_else(|| "date not set".to_string());
            escape(&format!("• {} - {when}", e.restaurant_name))
        })
        .fold(bold("Upcoming outings") + "\n", |a, b| a + &b + "\n")
}

pub fn format_import_summary(summary: &ImportSummary) -> String {
    escape(&format!(
        "Imported restaurants: {} (already present: {})",
        summary.inserted, summary.skipped
    ))
}

pub fn format_cleared_reviews(restaurant_name: &str, deleted: usize) -> String {
    if deleted == 0 {
        escape(&format!(
            "No reviews found for a restaurant named '{restaurant_name}'."
        ))
    } else {
        escape(&format!(
            "Deleted reviews: {deleted} for restaurant '{restaurant_name}'."
        ))
    }
}

pub fn format_menu_prompt() -> String {
    escape("What do you want to do?")
}

/// Text of the pop-up answering a press of the join button. Not markdown.
pub fn format_join_answer(joined: bool, penalty: Amount) -> String {
    if !joined {
        return "You are out.".to_string();
    }
    if penalty > 0 {
        format!("You are in! You owe a penalty of {penalty} for a cancelled outing.")
    } else {
        "You are in!".to_string()
    }
}

pub fn format_cancel_answer(penalty: Amount) -> String {
    format!("Participation cancelled. Penalty: {penalty}.")
}

pub fn format_review_saved(receipt: &ReviewReceipt) -> String {
    let action = if receipt.created { "saved" } else { "updated" };
    escape(&format!(
        "Thanks, review {action} ({}/{MAX_PARTICIPANTS}).",
        receipt.distinct_reviews.min(MAX_PARTICIPANTS)
    ))
}

fn stars(rating: f64) -> String {
    make_string_of_char('⭐', rating.round().clamp(0.0, 5.0) as usize)
}

fn make_string_of_char(c: char, length: usize) -> String {
    repeat(c).take(length).collect::<String>()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{EventId, UserId};

    fn restaurant() -> Restaurant {
        Restaurant {
            id: 1,
            name: "Da Mario".to_string(),
            address: "Via Roma 1".to_string(),
            cuisine: Some("Italian".to_string()),
            description: None,
            price_indicator: Some("2000".to_string()),
        }
    }

    fn participant(id: UserId, username: &str) -> Participant {
        Participant {
            id,
            event_id: 1,
            user: UserInfo::new(id, Some(username.to_string()), None),
            joined: true,
            joined_at: None,
            review_left: false,
            cancelled: false,
            penalty_amount: 0,
        }
    }

    fn review(user_id: UserId, rating: Option<u8>) -> Review {
        Review {
            id: user_id,
            event_id: 1,
            user_id,
            author: format!("@user{user_id}"),
            text: "nice.".to_string(),
            rating,
            created_at: Utc::now(),
        }
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).expect("valid offset")
    }

    #[test]
    fn test_format_local_time() {
        let at = Utc.with_ymd_and_hms(2030, 1, 5, 16, 30, 0).unwrap();
        assert_eq!(format_local_time(at, offset()), "05.01.2030 19:30");
    }

    #[test]
    fn test_format_callback_data() {
        let event_id: EventId = 12;
        assert_eq!(format_callback_data(CallbackAction::Join(event_id)), "join:12");
        assert_eq!(format_callback_data(CallbackAction::Cancel(event_id)), "cancel:12");
        assert_eq!(format_callback_data(CallbackAction::Reset(event_id)), "reset:12");
        assert_eq!(
            format_callback_data(CallbackAction::Menu(MenuAction::Upcoming)),
            "menu:upcoming"
        );
    }

    #[test]
    fn test_format_cleared_reviews() {
        assert_eq!(
            format_cleared_reviews("Da Mario", 2),
            "Deleted reviews: 2 for restaurant 'Da Mario'\\."
        );
        assert!(format_cleared_reviews("Da Mario", 0).starts_with("No reviews found"));
    }

    #[test]
    fn test_format_event_card() {
        let participants = vec![participant(1, "alice"), participant(2, "bob")];
        let card = format_event_card(&restaurant(), &participants, None, offset());
        assert!(card.contains("*Da Mario*"));
        assert!(card.contains("Going \\(2/3\\):"));
        assert!(card.contains("@alice, @bob"));
        assert!(!card.contains("When:"));

        let card = format_event_card(&restaurant(), &[], None, offset());
        assert!(card.contains("nobody yet"));
    }

    #[test]
    fn test_format_event_completed() {
        let reviews = vec![review(1, Some(4)), review(2, Some(5)), review(3, None)];
        let text = format_event_completed(&restaurant(), &reviews);
        assert!(text.contains("Average rating: 4\\.5"));
        // 4.5 rounds away from zero.
        assert!(text.contains("⭐⭐⭐⭐⭐"));
    }

    #[test]
    fn test_format_reviews() {
        let text = format_reviews(&restaurant(), &[]);
        assert!(text.contains("No reviews yet\\."));

        let text = format_reviews(&restaurant(), &[review(1, Some(3))]);
        assert!(text.contains("*@user1* ⭐⭐⭐: nice\\."));
    }

    #[test]
    fn test_format_stats() {
        let snapshot = StatsSnapshot {
            visited_count: 1,
            total_count: 4,
            visited: vec![VisitedEvent {
                event_id: 3,
                restaurant_name: "Da Mario".to_string(),
                restaurant_address: String::new(),
                review_count: 3,
                average_rating: Some(4.0),
            }],
            upcoming: vec![],
        };
        let text = format_stats(&snapshot, offset());
        assert!(text.contains("1 of 4 \\(≈25%\\)"));
        assert!(text.contains("/reviews 3"));
        assert!(text.contains("No upcoming outings\\."));
    }

    #[test]
    fn test_format_review_nag_mention() {
        let user = UserInfo::new(7, None, Some("Carla".to_string()));
        let text = format_review_nag_mention(&restaurant(), &user);
        assert!(text.starts_with("[Carla](tg://user?id=7)"));

        let user = UserInfo::new(7, Some("carla".to_string()), None);
        let text = format_review_nag_mention(&restaurant(), &user);
        assert!(text.starts_with("@carla"));
    }

    #[test]
    fn test_format_join_answer() {
        assert_eq!(format_join_answer(false, 500), "You are out.");
        assert_eq!(format_join_answer(true, 0), "You are in!");
        assert!(format_join_answer(true, 500).contains("500"));
    }

    #[test]
    fn test_format_review_saved() {
        let receipt = ReviewReceipt {
            event_id: 1,
            created: true,
            distinct_reviews: 2,
            just_completed: false,
        };
        assert_eq!(format_review_saved(&receipt), "Thanks, review saved \\(2/3\\)\\.");

        let receipt = ReviewReceipt {
            created: false,
            distinct_reviews: 3,
            ..receipt
        };
        assert_eq!(format_review_saved(&receipt), "Thanks, review updated \\(3/3\\)\\.");
    }
}
