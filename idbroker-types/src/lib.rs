pub mod client;
pub mod connector;
pub mod device;
pub mod identity;
pub mod keys;
pub mod oidc;
pub mod request;
pub mod scope;
pub mod token;

pub use client::*;
pub use connector::*;
pub use device::*;
pub use identity::*;
pub use keys::*;
pub use oidc::*;
pub use request::*;
pub use scope::*;
pub use token::*;
