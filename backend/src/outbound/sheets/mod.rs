//! Sheet service outbound adapters.
//!
//! [`HttpSheetStore`] speaks the values-range REST API; credentials come
//! from a [`crate::domain::ports::CredentialProvider`].

mod credentials;
mod dto;
mod http_store;

pub use credentials::StaticCredentialProvider;
pub use http_store::{HttpSheetStore, HttpSheetStoreConfig};
