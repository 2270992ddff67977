//! Statement voting backend: statements, subscriptions, one vote per voter
//! per statement, and the agree / skip / disagree tally chart.

pub mod auth;
pub mod chart;
pub mod config;
pub mod error;
pub mod models;
pub mod pages;
pub mod routes;
pub mod store;
pub mod tally;

pub use chart::{ChartHandle, Document, MountError, TallyChart, render_tally_chart};
pub use config::Config;
pub use error::{Error, Result};
pub use models::{Choice, Statement, Tally};
pub use routes::{AppState, router};
pub use store::Store;
pub use tally::TallyBook;

/// `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
