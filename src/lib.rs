pub mod record;
pub mod layout;
pub mod endpoint;
pub mod error;
pub mod sink;
pub mod shipper;
pub mod layer;

pub mod init;
pub mod env;

pub use endpoint::{Endpoint, EndpointConfig};
pub use error::ShipError;
pub use shipper::{EsShipper, ShipperConfig};
