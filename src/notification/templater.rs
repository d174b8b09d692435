//! Compiles a notification definition into a reusable render operation.

use std::sync::Arc;

use serde_json::Value;

use crate::template::{FuncMap, Template, TemplateResult};

use super::{ChatNotification, DeliveryPolicy, Notification};

/// A precompiled render operation bound to one notification definition.
///
/// Renders every templated field against `context` and writes the result into
/// the output notification. The output is only assigned once every field
/// rendered; on error it is left exactly as it was.
pub type Templater = Arc<dyn Fn(&mut Notification, &Value) -> TemplateResult<()> + Send + Sync>;

impl Notification {
    /// Compile all templated fields of this notification.
    ///
    /// `funcs` extends (and may shadow) the built-in template functions.
    pub fn get_templater(&self, name: &str, funcs: &FuncMap) -> TemplateResult<Templater> {
        let message = Template::compile(&format!("{name}.message"), &self.message, funcs)?;
        let grouping_key =
            Template::compile(&format!("{name}.groupingKey"), &self.grouping_key, funcs)?;
        let chat = self
            .chat
            .as_ref()
            .map(|chat| ChatTemplater::compile(name, chat, funcs))
            .transpose()?;

        Ok(Arc::new(move |out: &mut Notification, context: &Value| -> TemplateResult<()> {
            let mut staged = out.clone();
            staged.message = message.render(context)?;
            staged.grouping_key = grouping_key.render(context)?;
            if let Some(chat) = &chat {
                staged.chat = Some(chat.render(context)?);
            }
            *out = staged;
            Ok(())
        }))
    }
}

struct ChatTemplater {
    username: Template,
    icon: Template,
    attachments: Template,
    blocks: Template,
    grouping_key: Template,
    notify_broadcast: bool,
    delivery_policy: DeliveryPolicy,
}

impl ChatTemplater {
    fn compile(name: &str, chat: &ChatNotification, funcs: &FuncMap) -> TemplateResult<Self> {
        let field = |field: &str, text: &str| {
            Template::compile(&format!("{name}.chat.{field}"), text, funcs)
        };

        Ok(Self {
            username: field("username", &chat.username)?,
            icon: field("icon", &chat.icon)?,
            attachments: field("attachments", &chat.attachments)?,
            blocks: field("blocks", &chat.blocks)?,
            grouping_key: field("groupingKey", &chat.grouping_key)?,
            notify_broadcast: chat.notify_broadcast,
            delivery_policy: chat.delivery_policy,
        })
    }

    fn render(&self, context: &Value) -> TemplateResult<ChatNotification> {
        Ok(ChatNotification {
            username: self.username.render(context)?,
            icon: self.icon.render(context)?,
            attachments: self.attachments.render(context)?,
            blocks: self.blocks.render(context)?,
            grouping_key: self.grouping_key.render(context)?,
            notify_broadcast: self.notify_broadcast,
            delivery_policy: self.delivery_policy,
        })
    }
}
