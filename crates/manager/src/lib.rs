//! Agent manager: the front of the orchestrator
//!
//! Owns the agent registry and the agent-room bindings, translates bus
//! envelopes into operations, and fans committed state changes out to
//! observers and the bus. Construction wires the process-wide provider
//! services and the media transport:
//!
//! ```ignore
//! let settings = load_settings(None)?;
//! let providers = ProviderSet::from_settings(&settings);
//! let transport = Arc::new(LoopbackTransport::new());
//! let manager = AgentManager::new(settings, providers, transport);
//!
//! let bus = InProcessBus::connected();
//! let dispatcher = BusDispatcher::start(manager.clone(), bus.clone())?;
//! let bridge = manager.events().bridge_to_bus(bus);
//! ```

pub mod binding;
pub mod dispatch;
pub mod events;
pub mod manager;
pub mod providers;

pub use dispatch::BusDispatcher;
pub use events::EventHub;
pub use manager::{AgentManager, BindingStats, ManagerStats, RoomInfo};
pub use providers::ProviderSet;
