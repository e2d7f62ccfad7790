//! Login sessions for authenticated institutions

mod cache;
mod login;

pub use cache::{Clock, Session, SessionCache, SystemClock};
pub use login::form_login;
