use tracing::info;

use campaign_core::event_bus::GraphDelta;
use campaign_core::{Channel, FlowResult, NodeId, TemplateId};

use crate::graph::JourneyGraph;

impl JourneyGraph {
    /// Binds a catalog template to a channel on `node_id`, replacing the
    /// existing binding for that channel or appending a new one. A step with
    /// an audience is flagged for re-resolution when the channel is listed in
    /// `channels.refresh_on`.
    pub fn assign_template(
        &mut self,
        node_id: NodeId,
        channel: Channel,
        template_id: Option<TemplateId>,
    ) -> FlowResult<()> {
        let rule = self.settings.channel_rules.refreshes(channel);
        let node = self.node_mut(node_id)?;
        if !node.upsert_message(channel, template_id) {
            return Ok(());
        }
        let refresh = rule && node.audience_id().is_some();
        if refresh {
            node.flags.needs_resolution_refresh = true;
        }

        info!(node_id = %node_id, %channel, template_id = ?template_id, "Assigned template");
        self.emit(GraphDelta::MessageAssigned {
            node_id,
            channel,
            template_id,
        });
        if refresh {
            self.emit(GraphDelta::FlagsChanged { node_id });
        }
        Ok(())
    }

    /// Removes the binding for `channel`, if any. Branches are untouched.
    pub fn detach_template(&mut self, node_id: NodeId, channel: Channel) -> FlowResult<()> {
        let rule = self.settings.channel_rules.refreshes(channel);
        let node = self.node_mut(node_id)?;
        if !node.remove_message(channel) {
            return Ok(());
        }
        let refresh = rule && node.audience_id().is_some();
        if refresh {
            node.flags.needs_resolution_refresh = true;
        }

        info!(node_id = %node_id, %channel, "Detached template");
        self.emit(GraphDelta::MessageDetached { node_id, channel });
        if refresh {
            self.emit(GraphDelta::FlagsChanged { node_id });
        }
        Ok(())
    }

    /// Removes every binding to `template_id` on `node_id`, whatever its
    /// channel. Returns the channels that were detached.
    pub fn detach_template_id(
        &mut self,
        node_id: NodeId,
        template_id: TemplateId,
    ) -> FlowResult<Vec<Channel>> {
        let rules = self.settings.channel_rules.clone();
        let node = self.node_mut(node_id)?;
        let channels = node.remove_template(template_id);
        let refresh =
            node.audience_id().is_some() && channels.iter().any(|c| rules.refreshes(*c));
        if refresh {
            node.flags.needs_resolution_refresh = true;
        }

        for channel in &channels {
            info!(node_id = %node_id, %channel, template_id, "Detached template");
            self.emit(GraphDelta::MessageDetached {
                node_id,
                channel: *channel,
            });
        }
        if refresh {
            self.emit(GraphDelta::FlagsChanged { node_id });
        }
        Ok(channels)
    }
}
