pub mod attend;
pub mod config;
pub mod countdown;
pub mod maintain;
pub mod slot;
pub mod stats;
pub mod watch;

use std::sync::Arc;

use vigil_core::{Config, Database, SlotService};

/// Config, database and service wired together for one command.
pub struct Context {
    pub config: Config,
    pub db: Arc<Database>,
    pub service: SlotService,
}

impl Context {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let db = Arc::new(Database::open()?);
        let service = SlotService::from_config(db.clone(), &config);
        Ok(Self {
            config,
            db,
            service,
        })
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
