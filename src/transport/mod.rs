//! Transport plumbing for the broadcast channel.

mod broker;

pub use broker::{
    build_transport, ensure_loopback, parse_broker_addr, resolve_broker, BrokerEndpoint,
    TlsMaterials,
};
