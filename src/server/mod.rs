mod router;
mod state;

pub use router::build_install_router;
pub use state::ServeState;
