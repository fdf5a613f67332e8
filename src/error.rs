use thiserror::Error;

/// Problems with the declarative input, detected before any generation work.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("total relative area of all zones is zero")]
    ZeroTotalRelativeArea,

    #[error("zone '{0}' has non-positive relative size")]
    NonPositiveZoneSize(String),

    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    #[error("unknown {kind} id '{id}'")]
    MissingEntity { kind: &'static str, id: String },

    #[error("connection '{connection}' references unknown zone '{zone}'")]
    UnknownConnectionZone { connection: String, zone: String },

    #[error("guard '{guard}' mirrors unknown guard id '{mirror}'")]
    UnknownMirrorGuard { guard: String, mirror: String },

    #[error("template parse error: {0}")]
    Parse(String),
}

/// What exactly went wrong inside a stage.
#[derive(Debug, Error)]
pub enum FailureKind {
    #[error("layout infeasible: {0}")]
    InfeasibleLayout(String),

    #[error("no border tiles between zones '{from}' and '{to}'")]
    InfeasibleConnection { from: String, to: String },

    #[error("object budget unmet: {0}")]
    ObjectBudgetUnmet(String),

    #[error("placement failure: {0}")]
    PlacementFailure(String),

    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("{0}")]
    Internal(String),
}

/// Terminal per-stage error. Identifies the failing zone (when one is in
/// scope) and the stage name so a driver can pick a new seed and re-run.
#[derive(Debug)]
pub struct GenerationError {
    pub stage: &'static str,
    pub zone: Option<String>,
    pub kind: FailureKind,
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {}", self.stage)?;
        if let Some(zone) = &self.zone {
            write!(f, ", zone '{zone}'")?;
        }
        write!(f, ": {}", self.kind)
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl GenerationError {
    pub fn new(stage: &'static str, kind: FailureKind) -> Self {
        GenerationError {
            stage,
            zone: None,
            kind,
        }
    }

    pub fn in_zone(stage: &'static str, zone: impl Into<String>, kind: FailureKind) -> Self {
        GenerationError {
            stage,
            zone: Some(zone.into()),
            kind,
        }
    }
}
