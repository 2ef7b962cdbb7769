mod middleware;
mod probe;
mod public;

pub use middleware::RequestContext;
pub use probe::build_probe_router;
pub use public::{HttpState, build_router};
