use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("unknown datum: {0}")]
    UnknownDatum(String),

    #[error("invalid datum semi-axes: a={0}, b={1}")]
    InvalidAxes(f64, f64),

    #[error("unknown projection: {0}")]
    UnknownProjection(String),

    #[error("invalid UTM zone: {0}")]
    InvalidUtmZone(String),

    #[error("PROJ error ({context}): {message}")]
    Proj {
        context: &'static str,
        message: String,
    },

    #[error("point ({0}, {1}) is outside the domain of the {2} projection")]
    OutOfDomain(f64, f64, &'static str),
}
