//! # pgmcp-mcp
//!
//! Turns catalog objects into protocol endpoints.
//!
//! ```text
//!  BridgeConfig ──► Binder ──► BindingSet (ArcSwap) ──► Dispatcher ──► QueryExecutor ──► Postgres
//!                     │                                     │
//!                  Catalog                           NotificationHub ◄── LISTEN connections
//! ```
//!
//! - [`binding`]: rules resolved against the catalog into immutable endpoint bindings
//! - [`query`]: parameterized read, count and call SQL
//! - [`dispatch`]: the generic read/call/subscribe handler
//! - [`notify`]: one listener per channel, fanned out to bounded subscriber queues
//! - [`registry`]: the registration surface handed to a transport
//! - [`bridge`]: everything wired together from one configuration

pub mod binding;
pub mod bridge;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod filter;
pub mod notify;
pub mod query;
pub mod registry;

pub use binding::{
    BindOutcome, Binder, BindingSet, BoundColumn, BoundParameter, CONFIRM_ARG, EndpointBinding,
    EndpointKind, PaginationPolicy, RuleFailure,
};
pub use bridge::{BindReport, Bridge, BridgeError};
pub use dispatch::{Dispatcher, PageInfo, ReadResponse};
pub use error::{BindError, ErrorBody, McpError, NotifyError};
pub use executor::{ExecError, PgExecutor, QueryExecutor};
pub use filter::{Direction, Filter, FilterError, FilterOp, OrderTerm};
pub use notify::{
    ChannelListener, ListenerConnector, ListenerState, NotificationEvent, NotificationHub,
    PgListenerConnector, RawNotification, Subscription,
};
pub use query::{
    BoundValue, CallShape, CallTemplate, QueryTemplate, ReadRequest, ReadTemplates, build_call,
    build_count, build_read,
};
pub use registry::{EndpointDescriptor, EndpointRegistrar, EndpointRegistry, StreamDescriptor};
