pub mod auth;
pub mod channels;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod password;
pub mod router;
pub mod servers;
pub mod service;
pub mod sessions;
pub mod state;
pub mod tokens;
pub mod ws;

#[cfg(test)]
mod test_support;
