//! クレデンシャル検証の実装

pub mod jwt;

pub use jwt::{Claims, CredentialError, JwtCredentialValidator};
