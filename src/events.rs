//! Engine events.
//!
//! Inbound events (schema changes, settings changes, view loads) drive the
//! cascades in [`ViewHandler::handle_event`](crate::handler::ViewHandler::handle_event).
//! Outbound events are published on an [`EventBus`] after every committed
//! configuration change, for realtime layers and audit logs to consume.

use crate::field::FieldId;
use crate::filters::FilterOperator;
use crate::table::{RowId, TableId};
use crate::view::{DecorationId, FilterGroupId, FilterId, SortId, ViewId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    FieldTypeChanged {
        table_id: TableId,
        field_id: FieldId,
    },
    FieldDeleted {
        table_id: TableId,
        field_id: FieldId,
    },
    ViewPermanentlyDeleted {
        table_id: TableId,
        view_id: ViewId,
        db_index_name: Option<String>,
    },
    CollationChanged {
        collation: Option<String>,
    },
    ViewLoaded {
        view_id: ViewId,
    },
    RowsChanged {
        table_id: TableId,
        row_ids: Vec<RowId>,
    },
    TableTrashed {
        table_id: TableId,
    },
    TableRestored {
        table_id: TableId,
    },

    ViewCreated {
        table_id: TableId,
        view_id: ViewId,
    },
    ViewUpdated {
        view_id: ViewId,
    },
    ViewDeleted {
        table_id: TableId,
        view_id: ViewId,
    },
    ViewRestored {
        view_id: ViewId,
    },
    ViewsReordered {
        table_id: TableId,
        order: Vec<ViewId>,
    },
    ViewFilterCreated {
        view_id: ViewId,
        filter_id: FilterId,
        operator: FilterOperator,
    },
    ViewFilterUpdated {
        view_id: ViewId,
        filter_id: FilterId,
    },
    ViewFilterDeleted {
        view_id: ViewId,
        filter_id: FilterId,
    },
    ViewFilterGroupChanged {
        view_id: ViewId,
        filter_group_id: FilterGroupId,
    },
    ViewSortCreated {
        view_id: ViewId,
        sort_id: SortId,
    },
    ViewSortUpdated {
        view_id: ViewId,
        sort_id: SortId,
    },
    ViewSortDeleted {
        view_id: ViewId,
        sort_id: SortId,
    },
    ViewDecorationChanged {
        view_id: ViewId,
        decoration_id: DecorationId,
    },
    FieldOptionsUpdated {
        view_id: ViewId,
    },
}

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Fan-out of outbound events to every subscriber.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers.push(subscriber),
            Err(err) => log::error!("event bus lock poisoned: {}", err),
        }
    }

    pub fn publish(&self, event: EngineEvent) {
        log::debug!("publishing {:?}", event);
        let subscribers = match self.subscribers.read() {
            Ok(subscribers) => subscribers.clone(),
            Err(err) => {
                log::error!("event bus lock poisoned: {}", err);
                return;
            }
        };
        for subscriber in subscribers {
            subscriber.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("subscribers", &count).finish()
    }
}

/// Subscriber that keeps every event it sees.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<EngineEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSubscriber for EventLog {
    fn on_event(&self, event: &EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let log = EventLog::new();
        bus.subscribe(log.clone());
        bus.publish(EngineEvent::ViewUpdated { view_id: 3 });
        assert_eq!(log.events(), vec![EngineEvent::ViewUpdated { view_id: 3 }]);
        log.clear();
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_value(EngineEvent::FieldDeleted {
            table_id: 1,
            field_id: 2,
        })
        .unwrap();
        assert_eq!(json["type"], "field_deleted");
        assert_eq!(json["field_id"], 2);
    }
}
