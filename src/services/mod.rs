/// Event-record side effects of clock progression.
pub mod callbacks;
/// Clock command surface and authoritative reads.
pub mod clock_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming.
pub mod sse_service;
/// Durable store connection supervisor.
pub mod storage_supervisor;
