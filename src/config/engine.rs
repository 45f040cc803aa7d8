//! Engine configuration: built in code or read from the environment.

use crate::error::EngineError;
use crate::schema::is_valid_identifier;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/assets";
const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_url: String,
    /// PostgreSQL schema holding the catalog, entity tables and join tables.
    pub schema: String,
    pub max_connections: u32,
    /// Create the database named in `database_url` when it does not exist yet.
    pub create_database: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_url: DEFAULT_DATABASE_URL.into(),
            schema: DEFAULT_SCHEMA.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            create_database: true,
        }
    }
}

impl EngineConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        EngineConfig {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Reads `DATABASE_URL`, `ASSET_SCHEMA`, `ASSET_MAX_CONNECTIONS` and `ASSET_CREATE_DATABASE`.
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into());
        let schema = std::env::var("ASSET_SCHEMA").unwrap_or_else(|_| DEFAULT_SCHEMA.into());
        let max_connections = match std::env::var("ASSET_MAX_CONNECTIONS") {
            Ok(s) => s
                .trim()
                .parse()
                .map_err(|_| EngineError::Config(format!("ASSET_MAX_CONNECTIONS must be a positive integer, got '{}'", s)))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };
        let create_database = match std::env::var("ASSET_CREATE_DATABASE") {
            Ok(s) => parse_flag(&s)
                .ok_or_else(|| EngineError::Config(format!("ASSET_CREATE_DATABASE must be true or false, got '{}'", s)))?,
            Err(_) => true,
        };
        let config = EngineConfig {
            database_url,
            schema,
            max_connections,
            create_database,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !is_valid_identifier(&self.schema) {
            return Err(EngineError::Config(format!("invalid schema name '{}'", self.schema)));
        }
        if self.max_connections == 0 {
            return Err(EngineError::Config("max_connections must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
