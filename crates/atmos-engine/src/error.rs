//! Error types for the engine binary.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: atmos_core::config::ConfigError,
    },

    /// Session setup failed.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: atmos_core::session::SessionError,
    },

    /// Building the demo world failed.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: atmos_world::WorldError,
    },

    /// The session loop failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: atmos_core::runner::RunnerError,
    },

    /// The log subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
