pub mod channel;
pub mod expressions;
pub mod interface;
pub mod link;

pub use channel::{channel_connector, ChannelConnector, ChannelSink, SinkAttacher, SinkConnector, SinkEndpoint};
pub use expressions::{ExpressionCatalog, ExpressionConfig, UnknownExpression};
pub use interface::{RenderSink, SinkCapabilities, SinkCommand, SinkError, WindowAction};
pub use link::{supervise_sink, SinkConfig, SinkLink};
