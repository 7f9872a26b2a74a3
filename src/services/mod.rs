//! Service layer
//!
//! Payload handling, output encoding and the request-level operations that
//! every entry point shares.

pub mod format;
pub mod image_service;
pub mod payload;

pub use self::format::OutputFormatHandler;
pub use self::image_service::{
    BackgroundSource, EncodedImage, ImageRequest, ImageResponse, ImageService, Operation,
};
pub use self::payload::{decode_base64, decode_image, encode_base64, DecodedImage};
