const ENABLE_FOREIGN_KEYS: &str = "PRAGMA foreign_keys = ON";

const CREATE_RESTAURANT_TABLE: &str = "CREATE TABLE IF NOT EXISTS restaurant (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  address TEXT NOT NULL DEFAULT '',
  cuisine TEXT,
  description TEXT,
  price_indicator TEXT,
  UNIQUE(name, address)
)";

const CREATE_EVENT_TABLE: &str = "CREATE TABLE IF NOT EXISTS event (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  chat_id INTEGER NOT NULL,
  restaurant_id INTEGER NOT NULL REFERENCES restaurant(id),
  message_id INTEGER,
  reminder_at DATETIME,
  reminder_sent BOOL NOT NULL DEFAULT 0,
  feedback_prompt_sent BOOL NOT NULL DEFAULT 0,
  feedback_message_id INTEGER,
  created_at DATETIME NOT NULL
)";

const CREATE_PARTICIPANT_TABLE: &str = "CREATE TABLE IF NOT EXISTS participant (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  event_id INTEGER NOT NULL REFERENCES event(id) ON DELETE CASCADE,
  user_id INTEGER NOT NULL,
  username TEXT,
  first_name TEXT,
  joined BOOL NOT NULL DEFAULT 1,
  joined_at DATETIME,
  review_left BOOL NOT NULL DEFAULT 0,
  cancelled BOOL NOT NULL DEFAULT 0,
  penalty_amount INTEGER NOT NULL DEFAULT 0,
  UNIQUE(event_id, user_id)
)";

const CREATE_REVIEW_TABLE: &str = "CREATE TABLE IF NOT EXISTS review (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  event_id INTEGER NOT NULL REFERENCES event(id) ON DELETE CASCADE,
  user_id INTEGER NOT NULL,
  author TEXT NOT NULL,
  text TEXT NOT NULL,
  rating INTEGER CHECK (rating IS NULL OR rating BETWEEN 1 AND 5),
  created_at DATETIME NOT NULL,
  UNIQUE(event_id, user_id)
)";

const CREATE_INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_event_chat ON event(chat_id)",
    "CREATE INDEX IF NOT EXISTS idx_participant_event_joined ON participant(event_id, joined)",
    "CREATE INDEX IF NOT EXISTS idx_participant_user ON participant(user_id)",
];

pub fn create_all_tables(connection: &rusqlite::Connection) -> anyhow::Result<()> {
    connection.execute_batch(ENABLE_FOREIGN_KEYS)?;
    connection.execute(CREATE_RESTAURANT_TABLE, ())?;
    connection.execute(CREATE_EVENT_TABLE, ())?;
    connection.execute(CREATE_PARTICIPANT_TABLE, ())?;
    connection.execute(CREATE_REVIEW_TABLE, ())?;
    for index in CREATE_INDEXES {
        connection.execute(index, ())?;
    }
    Ok(())
}
