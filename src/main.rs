use std::{path::Path, sync::Arc};

use chrono::Utc;
use log::{error, info, warn};
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
};
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tokio::{
    sync::Mutex,
    time::{interval, Duration},
};

mod bot_commands;
mod config;
mod database;
mod error;
mod formatter;
mod ledger;
mod lifecycle;
mod notifier;
mod parser;
mod reviews;
mod scheduler;
mod types;
mod validator;

use crate::bot_commands::{dialogue_handler, register_commands, State};
use crate::config::Config;
use crate::database::sqlite::SqliteDatabase;
use crate::lifecycle::EventLifecycle;
use crate::notifier::TelegramNotifier;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("Cannot read configuration");

    init_log(&config.log_dir);

    info!("Initializing database...");
    let database = SqliteDatabase::new(&config.db_path)
        .map_err(|e| error!("Cannot initialize database: {}", e))
        .expect("Cannot initialize database");

    let database = Arc::new(Mutex::new(database));

    info!("Starting command bot...");

    let bot = Bot::from_env();
    if let Err(e) = register_commands(&bot).await {
        warn!("Commands will not be suggested by the clients: {:?}", e);
    }

    let (scheduler, firings) = Scheduler::new();
    let notifier = Arc::new(TelegramNotifier::new(bot.clone()));
    let lifecycle = EventLifecycle::new(database, notifier, scheduler, config.utc_offset);

    lifecycle
        .restore_scheduled_tasks(Utc::now())
        .await
        .map_err(|e| error!("Cannot restore scheduled tasks: {}", e))
        .expect("Cannot restore scheduled tasks");
    tokio::spawn(lifecycle.clone().run_task_loop(firings));

    spawn_background_health_log(lifecycle.scheduler().clone());

    Dispatcher::builder(bot, dialogue_handler())
        .dependencies(dptree::deps![InMemStorage::<State>::new(), lifecycle])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// WORKAROUND: This is an attempt at preventing the OS from killing the bot
/// after a while when it is inactive for too long.
fn spawn_background_health_log(scheduler: Scheduler) {
    tokio::spawn(async move {
        // Create an interval timer that ticks every 3 hours.
        let mut interval = interval(Duration::from_secs(3 * 60 * 60));

        loop {
            // Wait for the next tick.
            interval.tick().await;
            // Log bot health.
            info!("Bot is healthy, {} tasks armed", scheduler.armed_count());
        }
    });
}

fn init_log(log_dir: &Path) {
    // Create a trigger that rolls the log file when it exceeds 10 MB.
    let size_trigger = SizeTrigger::new(10 * 1024 * 1024);

    // Create a roller that keeps up to 2 backup log files with a pattern.
    let roller_pattern = log_dir.join("restaurant_roulette.{}.log");
    let fixed_window_roller = FixedWindowRoller::builder()
        .build(&roller_pattern.to_string_lossy(), 2)
        .expect("[init log] Cannot create fixed window roller");

    // Combine trigger and roller into a compound policy.
    let compound_policy =
        CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

    // Create a rolling file appender.
    let rolling_file_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} - {l} - {m}{n}")))
        .build(
            log_dir.join("restaurant_roulette.log"),
            Box::new(compound_policy),
        )
        .expect("[init log] Cannot create rolling file appender");

    // Create the configuration.
    let config = LogConfig::builder()
        .appender(Appender::builder().build("rolling_file", Box::new(rolling_file_appender)))
        .build(
            Root::builder()
                .appender("rolling_file")
                .build(log::LevelFilter::Info),
        )
        .expect("[init log] Cannot build config");

    // Initialize log4rs with the configuration
    log4rs::init_config(config).expect("[init log] Cannot init log4rs");
}
