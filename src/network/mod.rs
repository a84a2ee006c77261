//! Network domain: the request state machine, interception, and storage

pub mod headers;
pub mod manager;
pub mod request;
pub mod storage;

pub use headers::{BidiHeader, BytesValue, CookieHeader};
pub use manager::NetworkManager;
pub use request::{
    AuthAction, AuthCredentials, ContinueRequestOverrides, ContinueResponseOverrides,
    NetworkRequest, ProvideResponseOverrides,
};
pub use storage::{Intercept, InterceptPhase, NetworkStorage};
