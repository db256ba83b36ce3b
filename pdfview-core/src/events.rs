use serde::Serialize;
use tokio::sync::mpsc;

use crate::navigator::PageChange;

/// Consumer-facing notifications, serialized as `{"event": "<name>", ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum ViewEvent {
    #[serde(rename = "onLoad")]
    Load {
        source: String,
        #[serde(rename = "pageCount")]
        page_count: usize,
    },
    #[serde(rename = "onError")]
    Error { message: String },
    #[serde(rename = "onPageChanged")]
    PageChanged {
        page: usize,
        #[serde(rename = "pageCount", skip_serializing_if = "Option::is_none")]
        page_count: Option<usize>,
    },
    #[serde(rename = "onPasswordRequired")]
    PasswordRequired,
    #[serde(rename = "onScaleChanged")]
    ScaleChanged { scale: f32 },
}

impl ViewEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ViewEvent::Load { .. } => "onLoad",
            ViewEvent::Error { .. } => "onError",
            ViewEvent::PageChanged { .. } => "onPageChanged",
            ViewEvent::PasswordRequired => "onPasswordRequired",
            ViewEvent::ScaleChanged { .. } => "onScaleChanged",
        }
    }

    pub fn error(message: impl ToString) -> Self {
        ViewEvent::Error {
            message: message.to_string(),
        }
    }
}

impl From<PageChange> for ViewEvent {
    fn from(change: PageChange) -> Self {
        ViewEvent::PageChanged {
            page: change.page,
            page_count: Some(change.page_count),
        }
    }
}

/// The bridge that hands events to whatever UI layer hosts the view.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ViewEvent);
}

/// Forwards events to an unbounded channel. Delivery stops silently once the receiver is
/// gone.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ViewEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: ViewEvent) {
        let _ = self.sender.send(event);
    }
}

/// Outbox owned by a session. Events queue here during a transition and are handed to the
/// sink by the driver one scheduling turn later; while muted nothing is queued.
#[derive(Debug, Default)]
pub struct EventEmitter {
    outbox: Vec<ViewEvent>,
    muted: bool,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: ViewEvent) {
        if !self.muted {
            self.outbox.push(event);
        }
    }

    /// Drops anything queued and ignores further events until [`unmute`](Self::unmute).
    pub fn mute(&mut self) {
        self.muted = true;
        self.outbox.clear();
    }

    pub fn unmute(&mut self) {
        self.muted = false;
    }

    pub fn take(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_callback_names() {
        let load = ViewEvent::Load {
            source: "https://example.com/a.pdf".into(),
            page_count: 3,
        };
        assert_eq!(
            serde_json::to_value(&load).unwrap(),
            json!({"event": "onLoad", "source": "https://example.com/a.pdf", "pageCount": 3})
        );

        let page = ViewEvent::PageChanged {
            page: 1,
            page_count: None,
        };
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!({"event": "onPageChanged", "page": 1})
        );
        assert_eq!(
            serde_json::to_value(ViewEvent::PasswordRequired).unwrap(),
            json!({"event": "onPasswordRequired"})
        );
        assert_eq!(ViewEvent::error("boom").name(), "onError");
    }

    #[test]
    fn muted_emitter_drops_queued_and_new_events() {
        let mut emitter = EventEmitter::new();
        emitter.emit(ViewEvent::PasswordRequired);
        emitter.mute();
        emitter.emit(ViewEvent::error("late"));
        assert!(emitter.take().is_empty());

        emitter.unmute();
        emitter.emit(ViewEvent::PasswordRequired);
        assert_eq!(emitter.take(), vec![ViewEvent::PasswordRequired]);
        assert!(emitter.take().is_empty());
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        sink.deliver(ViewEvent::PasswordRequired);
    }
}
