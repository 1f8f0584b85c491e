//! Rate limiting logic and state management.

mod clock;
mod counter;
mod limiter;
mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{Limiter, Quota, Transition, CREATION_WINDOW};
pub use limiter::{Decision, RateLimiter};
pub use registry::{IdentifierLock, LockRegistry};
