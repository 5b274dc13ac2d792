use tokio::sync::mpsc::UnboundedSender;

use crate::domain::{ServerMessage, SubscriberId};

/// Outbound half of a subscriber connection
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    outbox: UnboundedSender<ServerMessage>,
}

impl Subscriber {
    pub fn new(id: SubscriberId, outbox: UnboundedSender<ServerMessage>) -> Self {
        Self { id, outbox }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// False once the connection's writer has gone away
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }

    fn deliver(&self, message: ServerMessage) -> bool {
        self.outbox.send(message).is_ok()
    }
}

/// Fan a message out to every open subscriber and return how many accepted it.
///
/// Never waits on a subscriber. Closed connections are skipped; they are
/// pruned by the disconnect path, not here.
pub fn publish<'a, I>(subscribers: I, message: &ServerMessage) -> usize
where
    I: IntoIterator<Item = &'a Subscriber>,
{
    subscribers
        .into_iter()
        .filter(|subscriber| subscriber.is_open())
        .filter(|subscriber| subscriber.deliver(message.clone()))
        .count()
}
