pub mod orders;

use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventSender,
    services::{
        calendar::CalendarSync,
        orders::OrderService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        calendar: Arc<dyn CalendarSync>,
    ) -> Self {
        Self {
            orders: Arc::new(OrderService::new(db_pool, Some(event_sender), calendar)),
        }
    }
}
