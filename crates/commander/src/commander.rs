//! The sub-command driver.

use crate::Args;
use bytes::Bytes;
use rand::RngCore;
use std::path::PathBuf;
use vault2::{default_builder, Vault};
use vault2_api::{
    BoxFut, Destination, MessageSource, MessageWrapper, NodeId, Persona,
    RoutingMessage, RoutingSender, VaultError, VaultResult, ID_LEN,
};
use vault2_core::personas::pmid_node::{ActionGetChunk, ActionPutChunk};
use vault2_core::{DataId, DataKind, DiskBasedStore};

/// A sender for vaults that are not attached to an overlay.
#[derive(Debug)]
pub struct NoopSender;

impl RoutingSender for NoopSender {
    fn send(
        &self,
        destination: Destination,
        wrapper: MessageWrapper,
    ) -> BoxFut<'static, VaultResult<()>> {
        tracing::trace!(?destination, message_id = wrapper.message_id, "dropping outbound, no overlay");
        Box::pin(async { Ok(()) })
    }
}

pub struct Commander {
    args: Args,
    keys: Vec<NodeId>,
}

impl Commander {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            keys: Vec::new(),
        }
    }

    fn keys_path(&self) -> PathBuf {
        self.args
            .keys_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("key_directory.dat"))
    }

    fn chunk_path(&self) -> PathBuf {
        self.args
            .chunk_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("keys_chunks"))
    }

    pub async fn execute(mut self) -> VaultResult<()> {
        if self.args.peer.is_some() {
            tracing::warn!(
                "--peer given, but network attach is handled by the routing \
                 layer; continuing with local operations",
            );
        }
        self.handle_keys()?;
        self.handle_network().await?;
        self.handle_store().await?;
        self.handle_verify().await?;
        self.handle_test().await?;
        self.handle_delete_keys()?;
        Ok(())
    }

    fn handle_keys(&mut self) -> VaultResult<()> {
        if self.args.create {
            self.keys = (0..self.args.pmids_count)
                .map(|_| {
                    let mut bytes = vec![0u8; ID_LEN];
                    rand::thread_rng().fill_bytes(&mut bytes);
                    NodeId::from(Bytes::from(bytes))
                })
                .collect();
            let encoded = serde_json::to_vec_pretty(&self.keys)
                .map_err(|e| VaultError::failed_src("encode keys", e))?;
            std::fs::write(self.keys_path(), encoded)
                .map_err(|e| VaultError::failed_src("write keys", e))?;
            tracing::info!(
                count = self.keys.len(),
                path = %self.keys_path().display(),
                "created keys",
            );
        } else if self.args.load {
            let raw = std::fs::read(self.keys_path())
                .map_err(|e| VaultError::failed_src("read keys", e))?;
            self.keys = serde_json::from_slice(&raw)
                .map_err(|e| VaultError::failed_src("parse keys", e))?;
            tracing::info!(
                count = self.keys.len(),
                path = %self.keys_path().display(),
                "loaded keys",
            );
        }

        if self.args.print {
            for (i, key) in self.keys.iter().enumerate() {
                println!(
                    "\t{i}\t PMID {key}{}",
                    if i < 2 { " (bootstrap)" } else { "" },
                );
            }
        }
        Ok(())
    }

    async fn handle_network(&self) -> VaultResult<()> {
        if !self.args.run && !self.args.bootstrap {
            return Ok(());
        }
        if self.keys.len() < 4 {
            return Err(VaultError::failed(
                "need at least 4 keys to run vaults; use --create first",
            ));
        }
        let count = if self.args.run { self.keys.len() } else { 2 };
        let root = self.chunk_path().join("vaults");
        let mut vaults = Vec::with_capacity(count);
        for key in self.keys.iter().take(count) {
            let builder =
                default_builder(crate::noop_sender())?.build();
            let dir = root.join(format!("{key}"));
            vaults.push(Vault::new(builder, &dir, key.clone())?);
        }
        tracing::info!(count = vaults.len(), "vaults came up cleanly");
        Ok(())
    }

    async fn handle_store(&self) -> VaultResult<()> {
        if !self.args.store {
            return Ok(());
        }
        let store = DiskBasedStore::new(&self.chunk_path())?;
        for (data, content) in self.chunk_set() {
            match store.store(&data, 0, content).await {
                Ok(()) => {}
                Err(error) => {
                    tracing::debug!(?error, "chunk already stored");
                }
            }
        }
        tracing::info!(
            count = self.args.chunk_set_count,
            path = %self.chunk_path().display(),
            "stored chunk set",
        );
        Ok(())
    }

    async fn handle_verify(&self) -> VaultResult<()> {
        if !self.args.verify {
            return Ok(());
        }
        let store = DiskBasedStore::new(&self.chunk_path())?;
        for (data, content) in self.chunk_set() {
            let fetched = store.fetch(&data, 0).await?;
            if fetched != content {
                return Err(VaultError::failed(format!(
                    "chunk {data} does not match its stored content"
                )));
            }
        }
        tracing::info!(
            count = self.args.chunk_set_count,
            "verified chunk set",
        );
        Ok(())
    }

    /// Store and retrieve a chunk through a real vault's message path.
    async fn handle_test(&self) -> VaultResult<()> {
        if !self.args.test {
            return Ok(());
        }
        let node_id = NodeId::from(Bytes::from(vec![0x05; ID_LEN]));
        let root = self.chunk_path().join("test_vault");
        let builder = default_builder(crate::noop_sender())?.build();
        let vault = Vault::new(builder, &root, node_id.clone())?;

        let data = DataId::new(
            DataKind::Immutable,
            vault2_api::Id(Bytes::from(vec![0x36; ID_LEN])),
        );
        let put = MessageWrapper {
            message_id: 1,
            persona: Persona::PmidNode,
            action_tag: ActionPutChunk::ACTION_ID,
            payload: ActionPutChunk {
                data: data.clone(),
                content: Bytes::from_static(b"commander test chunk"),
            }
            .to_bytes(),
        };
        for fill in 1..=3u8 {
            vault.handle_message(&RoutingMessage {
                contents: put.encode(),
                sender: MessageSource {
                    persona: Persona::PmidManager,
                    node: NodeId::from(Bytes::from(vec![fill; ID_LEN])),
                },
                receiver: node_id.clone(),
            });
        }
        // the store write is asynchronous
        for _ in 0..200 {
            if vault.pmid_node().store().get_file_count().await? == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let fetched = vault.pmid_node().store().fetch(&data, 0).await?;
        if fetched != Bytes::from_static(b"commander test chunk") {
            return Err(VaultError::failed("test chunk mismatch"));
        }
        // exercise the read path too; the reply goes to the noop overlay
        let get = MessageWrapper {
            message_id: 2,
            persona: Persona::PmidNode,
            action_tag: ActionGetChunk::ACTION_ID,
            payload: ActionGetChunk { data }.to_bytes(),
        };
        vault.handle_message(&RoutingMessage {
            contents: get.encode(),
            sender: MessageSource {
                persona: Persona::DataManager,
                node: NodeId::from(Bytes::from(vec![0x21; ID_LEN])),
            },
            receiver: node_id,
        });
        tracing::info!("store and retrieve test passed");
        Ok(())
    }

    fn handle_delete_keys(&self) -> VaultResult<()> {
        if !self.args.delete {
            return Ok(());
        }
        match std::fs::remove_file(self.keys_path()) {
            Ok(()) => {
                tracing::info!(path = %self.keys_path().display(), "deleted keys file");
                Ok(())
            }
            Err(error) => Err(VaultError::failed_src("delete keys", error)),
        }
    }

    /// Deterministic chunk set so verify can re-derive what store wrote.
    fn chunk_set(&self) -> Vec<(DataId, Bytes)> {
        (0..self.args.chunk_set_count)
            .map(|i| {
                let fill = 0x80 | (i as u8);
                let name =
                    vault2_api::Id(Bytes::from(vec![fill; ID_LEN]));
                let content =
                    Bytes::from(format!("chunk set element {i}"));
                (DataId::new(DataKind::Immutable, name), content)
            })
            .collect()
    }
}
