use crate::model::ReservationId;

#[derive(Debug)]
pub enum EngineError {
    DuplicateTable(String),
    DuplicateGuest { name: String, phone: String },
    NotFound(ReservationId),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    Persistence(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::DuplicateTable(table) => {
                write!(f, "table {table} is already occupied")
            }
            EngineError::DuplicateGuest { name, .. } => {
                write!(f, "guest {name} already has an active reservation")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
