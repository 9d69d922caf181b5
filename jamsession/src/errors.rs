use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Resource creation failed for '{0}': {1}")]
    ResourceCreation(String, String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Player command '{0}' rejected in state {1}")]
    PlayerCommand(String, String),
    #[error("Player error: {0}")]
    Player(String),
    #[error("Notification error: {0}")]
    Notify(String),
    #[error("Session '{0}' is not registered")]
    SessionNotFound(String),
    #[error("Session '{0}' is already registered")]
    SessionExists(String),
}

impl SessionError {
    pub fn resource_creation(title: &str, message: impl ToString) -> Self {
        SessionError::ResourceCreation(title.to_string(), message.to_string())
    }

    pub fn transport(message: impl ToString) -> Self {
        SessionError::Transport(message.to_string())
    }

    pub fn player_command(command: &str, state: impl ToString) -> Self {
        SessionError::PlayerCommand(command.to_string(), state.to_string())
    }

    pub fn notify(message: impl ToString) -> Self {
        SessionError::Notify(message.to_string())
    }
}
