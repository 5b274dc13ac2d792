mod handlers;
mod routes;
mod socket;

pub use routes::create_router;
