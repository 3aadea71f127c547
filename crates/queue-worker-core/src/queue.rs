/// Location of a tool-specific sub-queue on a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub url: String,
    pub name: String,
}

impl QueueSpec {
    /// Resolve the queue a tool consumes from.
    ///
    /// `https://` URLs are SQS endpoints and are rewritten to the `sqs://`
    /// scheme. The queue name is the tool name, namespaced as
    /// `"{queue_name}::{tool_name}"` when a parent queue name is given.
    pub fn parse(queue_url: &str, tool_name: &str, queue_name: Option<&str>) -> Self {
        let url = match queue_url.strip_prefix("https://") {
            Some(rest) => format!("sqs://{}", rest),
            None => queue_url.to_string(),
        };

        let name = match queue_name {
            Some(queue) => format!("{}::{}", queue, tool_name),
            None => tool_name.to_string(),
        };

        QueueSpec { url, name }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.url.split_once("://").map(|(scheme, _)| scheme)
    }
}
