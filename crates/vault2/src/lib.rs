#![deny(missing_docs)]
//! A persona-based vault node for content-addressed p2p storage.
//!
//! A [Vault] adopts the five managed personas, wires each service to its
//! own account store under one root directory, and exposes the two entry
//! points the routing overlay drives: [Vault::handle_message] for inbound
//! persona messages and [Vault::handle_matrix_change] for close-group
//! membership changes.

use std::path::Path;
use std::sync::Arc;
use vault2_api::builder::Builder;
use vault2_api::config::Config;
use vault2_api::{
    DynRoutingSender, MatrixChange, NodeId, RoutingMessage, VaultResult,
};
use vault2_core::personas::pmid_node::PmidNodeConfig;
use vault2_core::personas::version_handler::VersionHandlerConfig;
use vault2_core::personas::{
    DataManagerService, MaidManagerService, PmidManagerService,
    PmidNodeService, VersionHandlerService,
};
use vault2_core::{AccumulatorConfig, Demultiplexer};

/// Construct a production-ready default builder around the embedder's
/// routing sender.
///
/// - `accumulator` - quorum gathering, [AccumulatorConfig].
/// - `version_handler` - implicit version tree bounds,
///   [VersionHandlerConfig].
/// - `pmid_node` - offered disk capacity, [PmidNodeConfig].
pub fn default_builder(sender: DynRoutingSender) -> VaultResult<Builder> {
    let mut config = Config::default();
    config.add_default_module_config::<AccumulatorConfig>(
        "accumulator".into(),
    )?;
    config.add_default_module_config::<VersionHandlerConfig>(
        "version_handler".into(),
    )?;
    config.add_default_module_config::<PmidNodeConfig>("pmid_node".into())?;
    Ok(Builder { config, sender })
}

/// A running vault node.
#[derive(Debug)]
pub struct Vault {
    node_id: NodeId,
    demux: Demultiplexer,
    maid_manager: Arc<MaidManagerService>,
    version_handler: Arc<VersionHandlerService>,
    data_manager: Arc<DataManagerService>,
    pmid_manager: Arc<PmidManagerService>,
    pmid_node: Arc<PmidNodeService>,
}

impl Vault {
    /// Bring up the persona services under `root`. Must be called within a
    /// tokio runtime; each service spawns its outbound queue task.
    pub fn new(
        builder: Arc<Builder>,
        root: &Path,
        node_id: NodeId,
    ) -> VaultResult<Self> {
        let maid_manager =
            Arc::new(MaidManagerService::new(root, &builder)?);
        let version_handler =
            Arc::new(VersionHandlerService::new(root, &builder)?);
        let data_manager =
            Arc::new(DataManagerService::new(root, &builder)?);
        let pmid_manager =
            Arc::new(PmidManagerService::new(root, &builder)?);
        let pmid_node = Arc::new(PmidNodeService::new(
            root,
            &builder,
            node_id.clone(),
        )?);
        let demux = Demultiplexer::new(
            maid_manager.clone(),
            version_handler.clone(),
            data_manager.clone(),
            pmid_manager.clone(),
            pmid_node.clone(),
        );
        tracing::info!(%node_id, root = %root.display(), "vault up");
        Ok(Self {
            node_id,
            demux,
            maid_manager,
            version_handler,
            data_manager,
            pmid_manager,
            pmid_node,
        })
    }

    /// This vault's overlay address.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Dispatch one inbound routing message.
    pub fn handle_message(&self, routing_message: &RoutingMessage) {
        self.demux.handle_message(routing_message);
    }

    /// React to a close-group membership change: every persona packages
    /// departing accounts for their new holders and prunes what this node
    /// no longer covers.
    pub fn handle_matrix_change(
        &self,
        matrix_change: &MatrixChange,
    ) -> VaultResult<()> {
        self.maid_manager.handle_matrix_change(matrix_change)?;
        self.version_handler.handle_matrix_change(matrix_change)?;
        self.data_manager.handle_matrix_change(matrix_change)?;
        self.pmid_manager.handle_matrix_change(matrix_change)?;
        Ok(())
    }

    /// The MaidManager service.
    pub fn maid_manager(&self) -> &Arc<MaidManagerService> {
        &self.maid_manager
    }

    /// The VersionHandler service.
    pub fn version_handler(&self) -> &Arc<VersionHandlerService> {
        &self.version_handler
    }

    /// The DataManager service.
    pub fn data_manager(&self) -> &Arc<DataManagerService> {
        &self.data_manager
    }

    /// The PmidManager service.
    pub fn pmid_manager(&self) -> &Arc<PmidManagerService> {
        &self.pmid_manager
    }

    /// The PmidNode service.
    pub fn pmid_node(&self) -> &Arc<PmidNodeService> {
        &self.pmid_node
    }
}
