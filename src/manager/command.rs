use std::sync::Arc;

use crate::{
    endpoint::Endpoint,
    listener::{ListenerId, MessageListener, StatusListener},
    message::Message,
};

/// One unit of work a handle enqueues for the connection task.
pub(crate) enum Command {
    Connect { endpoint: Option<Endpoint> },
    Disconnect,
    Reconnect,
    Send { message: Message },
    SetId { id: String },
    AddListener {
        id: ListenerId,
        listener: Arc<dyn MessageListener>,
    },
    RemoveListener { id: ListenerId },
    AddStatusListener {
        id: ListenerId,
        listener: Arc<dyn StatusListener>,
    },
    RemoveStatusListener { id: ListenerId },
}
