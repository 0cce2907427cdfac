//! Transport adapters: the raw HTTP client and the authenticating gateway

mod gateway;
pub mod http_client;

pub use gateway::{ApiRequest, HttpGateway};
pub use http_client::{HttpClient, HttpMethod, ReqwestHttpClient, SimpleHttpResponse};
