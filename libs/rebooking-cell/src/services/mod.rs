pub mod claim;
pub mod dispatch;
pub mod events;
pub mod monitor;
pub mod notifier;
pub mod offer;
pub mod scheduling;

pub use claim::ClaimResolverService;
pub use dispatch::InvitationDispatchService;
pub use events::{EventPublisher, RebookingEvent};
pub use monitor::RebookingMonitorService;
pub use notifier::{Notifier, OfferNotification, WebhookNotifier};
pub use offer::SlotOfferService;
pub use scheduling::{InMemorySchedulingClient, SchedulingClient, SupabaseSchedulingClient};
