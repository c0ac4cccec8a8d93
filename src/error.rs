//! Error types and handling for the weather load job

use thiserror::Error;

/// Main error type for the weather load job
#[derive(Error, Debug)]
pub enum LoadError {
    /// Required credential or startup parameter missing
    #[error("Startup error: {message}")]
    Startup { message: String },

    /// City configuration missing or malformed
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Warehouse could not be reached or refused the login
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Network failure while talking to the weather provider
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Weather provider reported a failure for a city
    #[error("API error for {city}: {message}")]
    Api { city: String, message: String },

    /// Weather provider returned something that is not usable JSON
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Warehouse rejected schema creation or row insert
    #[error("Insert error: {message}")]
    Insert { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl LoadError {
    /// Create a new startup error
    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new warehouse connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new provider-reported API error
    pub fn api<C: Into<String>, S: Into<String>>(city: C, message: S) -> Self {
        Self::Api {
            city: city.into(),
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a new insert error
    pub fn insert<S: Into<String>>(message: S) -> Self {
        Self::Insert {
            message: message.into(),
        }
    }

    /// Stable lower-case label for log fields
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Startup { .. } => "startup",
            LoadError::Config { .. } => "config",
            LoadError::Connection { .. } => "connection",
            LoadError::Transport { .. } => "transport",
            LoadError::Api { .. } => "api",
            LoadError::Parse { .. } => "parse",
            LoadError::Insert { .. } => "insert",
            LoadError::Io { .. } => "io",
        }
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            LoadError::Startup { message } => {
                format!("Startup failed: {message}. Check the job's environment variables.")
            }
            LoadError::Config { .. } => {
                "Configuration error. Please check the city list file.".to_string()
            }
            LoadError::Connection { .. } => {
                "Unable to connect to the warehouse. Check the account and credentials."
                    .to_string()
            }
            LoadError::Transport { .. } => {
                "Unable to reach the weather provider. Please check your internet connection."
                    .to_string()
            }
            LoadError::Api { city, message } => {
                format!("Weather provider rejected the request for {city}: {message}")
            }
            LoadError::Parse { .. } => {
                "The weather provider returned an unreadable response.".to_string()
            }
            LoadError::Insert { .. } => {
                "Warehouse insert failed. Check that the target table exists and its columns match."
                    .to_string()
            }
            LoadError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
        }
    }
}
