use analyst_index::IndexError;

pub type AnalystResult<T> = Result<T, AnalystError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalystError {
    #[error("metric is already dimensioned")]
    AlreadyDimensioned,

    #[error("metric is not dimensioned")]
    NotDimensioned,

    #[error("duplicate alias: {0}")]
    DuplicateAlias(String),

    #[error("all reducing functions must be aliased once more than one is declared")]
    MustBeAliased,

    #[error("unknown alias: {0}")]
    UnknownAlias(String),

    #[error("an alias is required unless the metric has a single anonymous reducer")]
    AliasRequired,

    #[error("combine requires every reducing function to be aliased")]
    CombineRequiresAliases,

    #[error("combine has already been set")]
    CombineAlreadySet,

    #[error("combine cannot be mixed with per-alias transforms")]
    CombineWithFieldTransforms,

    #[error("metric configuration is sealed once the metric has been read")]
    Sealed,

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
