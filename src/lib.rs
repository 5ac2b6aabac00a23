// Library interface for testing

// Declare all modules
pub mod audio;
pub mod capacity;
pub mod carrier;
pub mod clip;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod qr;
pub mod service;
pub mod transcode;
pub mod upload;

pub use carrier::{Carrier, CarrierKind};
pub use clip::{CompressedClip, Location, Metadata};
pub use config::ServiceConfig;
pub use decoder::{DecodedPayload, PayloadDecoder};
pub use encoder::PayloadEncoder;
pub use error::{PayloadError, ServiceError};
