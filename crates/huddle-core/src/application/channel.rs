//! Typed action channels over the mesh transport.
//!
//! A channel binds a namespace to a payload type and a CBOR codec. Sends are
//! fire-and-forget: delivery failures on a closing room are logged, never
//! surfaced — callers must not assume delivery. Receiving happens in the
//! room session's dispatch loop, which decodes with [`ActionChannel::decode`]
//! and routes to exactly one handler per namespace; tearing the session down
//! flushes the dispatch so late arrivals are no-ops.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::domain::wire::MAX_NAMESPACE_LEN;

use super::ports::{MeshSession, Target};

/// Encode a payload for the wire.
pub fn encode<T: Serialize>(value: &T) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(serde_cbor::to_vec(value)?))
}

/// Decode a payload off the wire.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> anyhow::Result<T> {
    serde_cbor::from_slice(payload).map_err(Into::into)
}

/// A named, typed broadcast/unicast primitive layered on the mesh session.
pub struct ActionChannel<T> {
    namespace: &'static str,
    mesh: Arc<dyn MeshSession>,
    _payload: PhantomData<fn(T)>,
}

impl<T> std::fmt::Debug for ActionChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionChannel")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> ActionChannel<T> {
    /// Bind a channel to `namespace`. The transport enforces a tight length
    /// limit on channel identifiers.
    pub fn new(mesh: Arc<dyn MeshSession>, namespace: &'static str) -> anyhow::Result<Self> {
        if namespace.len() > MAX_NAMESPACE_LEN {
            anyhow::bail!(
                "action namespace {namespace:?} exceeds the {MAX_NAMESPACE_LEN}-byte transport bound"
            );
        }
        Ok(Self {
            namespace,
            mesh,
            _payload: PhantomData,
        })
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Unicast or broadcast `value`. Best effort: an encode or transport
    /// error is logged and swallowed.
    pub async fn send(&self, value: &T, to: Target) {
        let payload = match encode(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(namespace = self.namespace, "Failed to encode action payload: {e}");
                return;
            }
        };
        if let Err(e) = self.mesh.send_action(self.namespace, to, payload).await {
            warn!(namespace = self.namespace, "Action send failed: {e}");
        }
    }

    /// Decode an inbound payload for this channel's type.
    pub fn decode(payload: &[u8]) -> anyhow::Result<T> {
        decode(payload)
    }
}
