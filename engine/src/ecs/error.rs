use crate::core::config::ConfigError;

/// Recoverable failures surfaced by the ECS.
///
/// Contract violations (bad bit indexes, undeclared component access, double adds from inside a
/// chunk system) panic instead.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    #[error("too many {kind}: the configured limit is {limit}")]
    OutOfRange { kind: &'static str, limit: usize },
    #[error("entity does not have component {component}")]
    MissingComponent { component: &'static str },
    #[error("entity already has component {component}")]
    ComponentAlreadyPresent { component: &'static str },
    #[error("entity address is stale or out of range")]
    InvalidAddress,
    #[error("a command is already registered with id {id}")]
    CommandAlreadyRegistered { id: u32 },
    #[error("component {component} requires alignment {align}, chunks only guarantee 16")]
    UnalignedComponent { component: &'static str, align: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = EcsError> = std::result::Result<T, E>;
