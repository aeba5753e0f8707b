pub mod access;
pub mod error;
pub mod gateway;
pub mod h2;
pub mod protocol;
pub mod route_table;

pub use access::{IpFilter, MethodPolicy};
pub use error::{ProxyError, ProxyResult};
pub use gateway::{GatewayService, ProxySettings, RouteEvent};
pub use route_table::{GrpcRoute, HttpRoute, RouteTable, RouteTableError};
