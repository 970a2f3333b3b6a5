//! Request pipeline, handlers, and runtime adapters.

pub mod api;
pub mod frames;
pub mod handlers;
pub mod pipeline;
pub mod registry;
pub mod tokio_spawner;

pub use frames::{parse_reply, parse_request, request_frames, Envelope, Inbound};
pub use handlers::{register_builtins, TaskFactory};
pub use pipeline::{PipelineStats, RequestPipeline, Responder, ShutdownHandle};
pub use registry::{HandlerContext, HandlerRegistry, HandlerScope, RequestHandler};
pub use tokio_spawner::TokioSpawner;
