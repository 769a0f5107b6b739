//! Parse the user input.

mod date_time;
mod import;

pub use date_time::{looks_like_date_time, parse_date_time};
pub use import::parse_import_file;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{i64 as parse_i64, multispace1, one_of},
    combinator::{all_consuming, eof, map, map_res, value},
    sequence::{preceded, terminated},
    IResult,
};

use crate::{
    error::InputError,
    types::{CallbackAction, EventId, MenuAction, Rating},
};

/// Parse the event ID given as argument of a command.
pub fn parse_event_id(s: &str) -> Result<EventId, InputError> {
    s.trim()
        .parse()
        .map_err(|_| InputError::invalid_event_id(s))
}

/// Parse the data attached to an inline button, e.g. `join:12` or `menu:stats`.
pub fn parse_callback_data(s: &str) -> Option<CallbackAction> {
    let result: IResult<&str, CallbackAction> = all_consuming(alt((
        map(preceded(tag("join:"), parse_i64), CallbackAction::Join),
        map(preceded(tag("cancel:"), parse_i64), CallbackAction::Cancel),
        map(preceded(tag("reset:"), parse_i64), CallbackAction::Reset),
        map(
            preceded(
                tag("menu:"),
                alt((
                    value(MenuAction::Help, tag("help")),
                    value(MenuAction::Menu, tag("menu")),
                    value(MenuAction::Random, tag("random")),
                    value(MenuAction::Stats, tag("stats")),
                    value(MenuAction::Upcoming, tag("upcoming")),
                )),
            ),
            CallbackAction::Menu,
        ),
    )))(s);
    result.ok().map(|(_, action)| action)
}

/// Recognize the menu shortcuts sent as plain text, with or without the emoji
/// of the menu buttons.
pub fn parse_menu_text(s: &str) -> Option<MenuAction> {
    let text = s
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim()
        .to_lowercase();
    match text.as_str() {
        "start" | "help" => Some(MenuAction::Help),
        "menu" => Some(MenuAction::Menu),
        "random" | "random restaurant" => Some(MenuAction::Random),
        "stats" | "statistics" => Some(MenuAction::Stats),
        "upcoming" | "upcomming" | "upcoming outings" => Some(MenuAction::Upcoming),
        _ => None,
    }
}

/// Split a review in its rating and its text.
///
/// The rating is a single digit from 1 to 5 standing alone at the beginning of
/// the review. Anything else is part of the text.
pub fn parse_review(s: &str) -> Result<(Option<Rating>, String), InputError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(InputError::EmptyReview);
    }

    match parse_rating(s) {
        Ok((text, rating)) => Ok((Some(rating), text.trim().to_string())),
        Err(_) => Ok((None, s.to_string())),
    }
}

fn parse_rating(s: &str) -> IResult<&str, Rating> {
    terminated(
        map_res(one_of("12345"), |digit: char| digit.to_string().parse::<Rating>()),
        alt((multispace1, eof)),
    )(s)
}
