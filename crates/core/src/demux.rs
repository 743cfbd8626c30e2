//! Fans inbound routing messages out to the persona services.

use crate::personas::{
    DataManagerService, MaidManagerService, PmidManagerService,
    PmidNodeService, VersionHandlerService,
};
use std::sync::Arc;
use vault2_api::{MessageWrapper, Persona, RoutingMessage};

/// Routes each inbound message to the service its persona tag names.
///
/// The demultiplexer itself is stateless; it only holds the services.
#[derive(Debug, Clone)]
pub struct Demultiplexer {
    maid_manager: Arc<MaidManagerService>,
    version_handler: Arc<VersionHandlerService>,
    data_manager: Arc<DataManagerService>,
    pmid_manager: Arc<PmidManagerService>,
    pmid_node: Arc<PmidNodeService>,
}

impl Demultiplexer {
    /// Construct a demultiplexer over the five persona services.
    pub fn new(
        maid_manager: Arc<MaidManagerService>,
        version_handler: Arc<VersionHandlerService>,
        data_manager: Arc<DataManagerService>,
        pmid_manager: Arc<PmidManagerService>,
        pmid_node: Arc<PmidNodeService>,
    ) -> Self {
        Self {
            maid_manager,
            version_handler,
            data_manager,
            pmid_manager,
            pmid_node,
        }
    }

    /// Parse and dispatch one routing message. Unparseable messages and
    /// unknown personas are logged and dropped.
    pub fn handle_message(&self, routing_message: &RoutingMessage) {
        let wrapper =
            match MessageWrapper::parse(routing_message.contents.clone()) {
                Ok(wrapper) => wrapper,
                Err(error) => {
                    tracing::warn!(
                        ?error,
                        from = %routing_message.sender.node,
                        "dropping unparseable message",
                    );
                    return;
                }
            };
        let sender = &routing_message.sender;
        let receiver = &routing_message.receiver;
        let result = match wrapper.persona {
            Persona::MaidManager => {
                self.maid_manager.handle_message(wrapper, sender, receiver)
            }
            Persona::VersionHandler => self
                .version_handler
                .handle_message(wrapper, sender, receiver),
            Persona::DataManager => {
                self.data_manager.handle_message(wrapper, sender, receiver)
            }
            Persona::PmidManager => {
                self.pmid_manager.handle_message(wrapper, sender, receiver)
            }
            Persona::PmidNode => {
                self.pmid_node.handle_message(wrapper, sender, receiver)
            }
            persona => {
                tracing::error!(%persona, "unhandled persona");
                Ok(())
            }
        };
        if let Err(error) = result {
            tracing::debug!(
                ?error,
                from = %sender.node,
                "service did not handle message",
            );
        }
    }
}
