use thiserror::Error;

use crate::record::StoreError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed point encoding: {0}")]
    MalformedEncoding(String),

    #[error("point is not a member of the curve")]
    CurveMembership,

    #[error("scalar multiplication produced the point at infinity")]
    InfiniteResult,

    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    #[error("storage fault: {0}")]
    Storage(#[from] StoreError),
}
