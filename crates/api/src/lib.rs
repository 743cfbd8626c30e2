#![deny(missing_docs)]
//! Vault2 API contains the types and traits shared by the vault2 crates:
//! identities, domain errors, the message wrapper codec, the routing-matrix
//! view consumed from the overlay, and the group policy seam that the group
//! database is parameterised over.
//!
//! If you want to run a vault node, please see the vault2 crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub(crate) mod serde_bytes_base64 {
    pub fn serialize<S>(
        b: &bytes::Bytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::prelude::*;
        serializer.serialize_str(&BASE64_URL_SAFE_NO_PAD.encode(b))
    }

    pub fn deserialize<'de, D, T: From<bytes::Bytes>>(
        deserializer: D,
    ) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use base64::prelude::*;
        let s: &'de str = serde::Deserialize::deserialize(deserializer)?;
        BASE64_URL_SAFE_NO_PAD
            .decode(s)
            .map(|v| bytes::Bytes::copy_from_slice(&v).into())
            .map_err(serde::de::Error::custom)
    }
}

pub mod builder;
pub mod config;

mod error;
pub use error::*;

pub mod id;
pub use id::{GroupName, Id, NodeId, ID_LEN};

mod timestamp;
pub use timestamp::*;

pub mod wire;

mod persona;
pub use persona::*;

mod protocol;
pub use protocol::*;

pub mod matrix;
pub use matrix::*;

pub mod policy;
pub use policy::*;

mod sender;
pub use sender::*;
