pub mod dates;
pub mod envelope;
pub mod error;
pub mod fields;
pub mod licence;
pub mod ports;
pub mod registry;
pub mod toll_tag;

pub type GatewayResult<T> = Result<T, error::GatewayError>;
