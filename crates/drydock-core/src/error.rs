use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrydockError {
    #[error("app not found: {0}")]
    AppNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("app already exists: {0}")]
    AppExists(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("quota exceeded: requested {requested}, available {available}")]
    QuotaExceeded { requested: u32, available: u32 },

    #[error("not enough reserved units")]
    InsufficientReservation,

    #[error("invalid app name '{0}': must be lowercase alphanumeric with hyphens, starting with a letter")]
    InvalidName(String),

    #[error("parameter {position} must be {expected}")]
    InvalidArgument {
        position: usize,
        expected: &'static str,
    },

    #[error("chained result must be {expected}")]
    InvalidResult { expected: &'static str },

    #[error("action {action} requires {required} parameters, got {given}")]
    InsufficientParams {
        action: &'static str,
        required: usize,
        given: usize,
    },

    #[error("no actions to execute")]
    EmptyPipeline,

    #[error("store error: {0}")]
    Store(String),

    #[error("provisioner error: {0}")]
    Provision(String),

    #[error("cloud error: {0}")]
    Cloud(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, DrydockError>;
