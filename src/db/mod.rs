mod connection;
pub mod helpers;
mod migrations;
pub mod repositories;

pub use connection::Database;
pub use repositories::stats::{
    COMPLETED_SESSIONS_KEY, LAST_SESSION_DATE_KEY, TOTAL_FOCUS_TIME_KEY,
};
