//! インメモリ Repository 実装

pub mod connection;
pub mod delivery;

pub use connection::InMemoryConnectionRepository;
pub use delivery::InMemoryDeliveryRepository;
