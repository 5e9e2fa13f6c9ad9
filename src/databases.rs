use crate::config::Config;
use crate::database::{Database, DbError};
use crate::modules::tempvoice::database::TempVoiceDatabase;

#[derive(Debug)]
pub struct Databases {
    pub tempvoice: Database<TempVoiceDatabase>,
}

impl Databases {
    pub async fn open(config: &Config) -> Result<Self, DbError> {
        Ok(Self {
            tempvoice: Database::new(config.database_path("tempvoice")).await?,
        })
    }
}
