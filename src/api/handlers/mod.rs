//! Route handlers: health, root banner and the credential engine proxy.

pub mod health;
pub mod proxy;
pub mod root;
